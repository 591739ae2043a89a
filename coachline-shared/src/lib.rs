pub mod models;
pub mod money;
pub mod pii;

pub use models::events::BookingEvent;
pub use money::Money;
pub use pii::Masked;
