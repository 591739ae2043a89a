pub mod authz;
pub mod payment;
pub mod trip;

pub use authz::{Actor, AuthDecision, Authorizer, Capability, Role, ScopedAuthorizer};
pub use payment::{PaymentMethod, PaymentRecord};
pub use trip::{StaticTripDirectory, TripDirectory, TripInfo};

#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Validation failed: {0}")]
    ValidationError(String),
    #[error("Internal service error: {0}")]
    InternalError(String),
    #[error("Collaborator unavailable: {0}")]
    Unavailable(String),
}

pub type CoreResult<T> = Result<T, CoreError>;
