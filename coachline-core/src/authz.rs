use serde::{Deserialize, Serialize};
use async_trait::async_trait;
use uuid::Uuid;

/// What an operation needs the caller to be allowed to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    ManageBookings,
    ManagePayments,
    ManageRefunds,
    ManageTrips,
    /// Only the unattended expiry sweep holds this one
    ExpireBookings,
}

impl Capability {
    pub fn code(&self) -> &'static str {
        match self {
            Capability::ManageBookings => "manage_bookings",
            Capability::ManagePayments => "manage_payments",
            Capability::ManageRefunds => "manage_refunds",
            Capability::ManageTrips => "manage_trips",
            Capability::ExpireBookings => "expire_bookings",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Superuser,
    Admin,
    /// Owner account of a partner (bus operator)
    Partner,
    Employee,
    Customer,
    System,
}

/// A pre-authenticated caller. The engine never sees credentials, only this.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Actor {
    pub id: Uuid,
    pub role: Role,
    pub partner_id: Option<Uuid>,
    pub capabilities: Vec<Capability>,
}

impl Actor {
    pub fn system() -> Self {
        Self {
            id: Uuid::nil(),
            role: Role::System,
            partner_id: None,
            capabilities: vec![Capability::ExpireBookings],
        }
    }

    pub fn admin(id: Uuid) -> Self {
        Self {
            id,
            role: Role::Admin,
            partner_id: None,
            capabilities: Vec::new(),
        }
    }

    pub fn partner_staff(id: Uuid, partner_id: Uuid, capabilities: Vec<Capability>) -> Self {
        Self {
            id,
            role: Role::Employee,
            partner_id: Some(partner_id),
            capabilities,
        }
    }

    pub fn has(&self, capability: Capability) -> bool {
        self.capabilities.contains(&capability)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthDecision {
    Authorized,
    Denied(String),
}

impl AuthDecision {
    pub fn is_authorized(&self) -> bool {
        matches!(self, AuthDecision::Authorized)
    }
}

#[async_trait]
pub trait Authorizer: Send + Sync {
    /// Decide whether `actor` may perform `capability` on data owned by `partner_id`
    async fn authorize(
        &self,
        actor: &Actor,
        capability: Capability,
        partner_id: Uuid,
    ) -> AuthDecision;
}

/// Role + partner scope evaluation, mirroring how operator permissions are
/// granted: superusers and admins bypass, partner owners act on their own
/// partner, employees need the explicit capability as well.
pub struct ScopedAuthorizer;

#[async_trait]
impl Authorizer for ScopedAuthorizer {
    async fn authorize(
        &self,
        actor: &Actor,
        capability: Capability,
        partner_id: Uuid,
    ) -> AuthDecision {
        let decision = match actor.role {
            Role::Superuser | Role::Admin => AuthDecision::Authorized,
            Role::System => {
                if capability == Capability::ExpireBookings {
                    AuthDecision::Authorized
                } else {
                    AuthDecision::Denied(format!("system actor cannot {}", capability.code()))
                }
            }
            Role::Partner | Role::Employee => {
                if actor.partner_id != Some(partner_id) {
                    AuthDecision::Denied(format!("actor {} is not scoped to partner {}", actor.id, partner_id))
                } else if actor.role == Role::Partner || actor.has(capability) {
                    AuthDecision::Authorized
                } else {
                    AuthDecision::Denied(format!("missing capability {}", capability.code()))
                }
            }
            Role::Customer => AuthDecision::Denied("customers act through an operator".to_string()),
        };

        if let AuthDecision::Denied(reason) = &decision {
            tracing::debug!("Authorization denied for {}: {}", actor.id, reason);
        }

        decision
    }
}
