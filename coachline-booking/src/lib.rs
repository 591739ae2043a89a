pub mod error;
pub mod models;
pub mod lifecycle;
pub mod policy;
pub mod refund;
pub mod ledger;
pub mod inventory;
pub mod transfer;
pub mod expiry;
pub mod locks;
pub mod store;
pub mod memory;
pub mod service;

pub use error::{BookingError, BookingResult};
pub use expiry::SweepReport;
pub use ledger::{LedgerRecorder, PartnerStatement};
pub use memory::InMemoryBookingStore;
pub use models::{
    Booking, BookingCancellation, BookingStatus, CancellationScope, EntryType, LedgerEntry, Passenger,
    PassengerStatus, PaymentStatus, Seat,
};
pub use policy::{CancelPolicy, CancelPolicyRule, FeeProration, PolicyResolver, Resolution, ResolutionBasis};
pub use refund::{CancelScope, RefundCalculator, RefundQuote};
pub use service::{BookingService, EngineSettings, NewBooking, TransferOutcome};
pub use store::{BookingStore, Changeset, CommitReceipt, SeatClaim, StoreError};
