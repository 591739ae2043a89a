use chrono::{DateTime, Utc};
use coachline_shared::Money;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

use crate::error::BookingError;

/// How a policy's cancellation fee is split when only some passengers cancel
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum FeeProration {
    /// Each passenger carries the fee in proportion to their share of the price
    #[default]
    PerPassenger,
    /// The fee is charged once per booking, against the first refunds issued
    PerBooking,
}

impl FeeProration {
    pub fn as_str(&self) -> &'static str {
        match self {
            FeeProration::PerPassenger => "per_passenger",
            FeeProration::PerBooking => "per_booking",
        }
    }
}

impl FromStr for FeeProration {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "per_passenger" => Ok(FeeProration::PerPassenger),
            "per_booking" => Ok(FeeProration::PerBooking),
            other => Err(format!("unknown fee proration {}", other)),
        }
    }
}

/// One time-window tier: `[min_hours, max_hours)` before departure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CancelPolicyRule {
    pub id: Uuid,
    /// None reads as 0
    pub min_hours_before_departure: Option<i64>,
    /// None reads as unbounded
    pub max_hours_before_departure: Option<i64>,
    pub refund_percentage: u8,
    pub cancellation_fee: Money,
    pub display_order: i32,
    pub is_active: bool,
}

impl CancelPolicyRule {
    pub fn new(min: Option<i64>, max: Option<i64>, refund_percentage: u8, cancellation_fee: Money, display_order: i32) -> Self {
        Self {
            id: Uuid::new_v4(),
            min_hours_before_departure: min,
            max_hours_before_departure: max,
            refund_percentage,
            cancellation_fee,
            display_order,
            is_active: true,
        }
    }

    fn lower(&self) -> i64 {
        self.min_hours_before_departure.unwrap_or(0)
    }

    fn upper(&self) -> i64 {
        self.max_hours_before_departure.unwrap_or(i64::MAX)
    }

    pub fn contains(&self, hours: i64) -> bool {
        hours >= self.lower() && hours < self.upper()
    }

    fn overlaps(&self, other: &CancelPolicyRule) -> bool {
        self.lower() < other.upper() && other.lower() < self.upper()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancelPolicy {
    pub id: Uuid,
    /// None for the platform-wide policies
    pub partner_id: Option<Uuid>,
    pub name: String,
    /// Policy-level refund used when no rule matches
    pub refund_percentage: Option<u8>,
    /// The policy-level refund only applies this many days (or more) out
    pub days_before_trip: Option<u32>,
    pub priority: i32,
    pub is_default: bool,
    pub is_active: bool,
    pub fee_proration: FeeProration,
    pub rules: Vec<CancelPolicyRule>,
}

impl CancelPolicy {
    pub fn new(partner_id: Option<Uuid>, name: impl Into<String>, rules: Vec<CancelPolicyRule>) -> Self {
        Self {
            id: Uuid::new_v4(),
            partner_id,
            name: name.into(),
            refund_percentage: None,
            days_before_trip: None,
            priority: 0,
            is_default: true,
            is_active: true,
            fee_proration: FeeProration::default(),
            rules,
        }
    }

    /// Reject policies the resolver could not evaluate unambiguously
    pub fn validate(&self) -> Result<(), PolicyError> {
        if let Some(pct) = self.refund_percentage {
            if pct > 100 {
                return Err(PolicyError::PercentageOutOfRange(pct));
            }
        }

        for rule in &self.rules {
            if rule.refund_percentage > 100 {
                return Err(PolicyError::PercentageOutOfRange(rule.refund_percentage));
            }
            if rule.cancellation_fee.is_negative() {
                return Err(PolicyError::NegativeFee(rule.id));
            }
            if rule.lower() >= rule.upper() {
                return Err(PolicyError::EmptyRange(rule.id));
            }
        }

        let active: Vec<&CancelPolicyRule> = self.rules.iter().filter(|r| r.is_active).collect();
        for (i, a) in active.iter().enumerate() {
            for b in &active[i + 1..] {
                if a.display_order == b.display_order && a.overlaps(b) {
                    return Err(PolicyError::AmbiguousRules(a.id, b.id));
                }
            }
        }

        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PolicyError {
    #[error("Refund percentage {0} is above 100")]
    PercentageOutOfRange(u8),

    #[error("Rule {0} has a negative cancellation fee")]
    NegativeFee(Uuid),

    #[error("Rule {0} has an empty hour range")]
    EmptyRange(Uuid),

    #[error("Rules {0} and {1} overlap with the same display order")]
    AmbiguousRules(Uuid, Uuid),
}

/// Where a resolution's numbers came from
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionBasis {
    Rule,
    PolicyDefault,
    Denied,
}

impl ResolutionBasis {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResolutionBasis::Rule => "rule",
            ResolutionBasis::PolicyDefault => "policy_default",
            ResolutionBasis::Denied => "denied",
        }
    }
}

impl FromStr for ResolutionBasis {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "rule" => Ok(ResolutionBasis::Rule),
            "policy_default" => Ok(ResolutionBasis::PolicyDefault),
            "denied" => Ok(ResolutionBasis::Denied),
            other => Err(format!("unknown resolution basis {}", other)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Resolution {
    pub policy_id: Uuid,
    pub rule_id: Option<Uuid>,
    pub basis: ResolutionBasis,
    pub refund_percentage: u8,
    pub cancellation_fee: Money,
    pub fee_proration: FeeProration,
    pub hours_before_departure: i64,
}

/// Whole hours until departure, rounded down (negative once departed)
pub fn hours_before_departure(departure: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
    (departure - now).num_seconds().div_euclid(3600)
}

pub struct PolicyResolver;

impl PolicyResolver {
    /// Pick the policy that governs a booking: its own override, then the
    /// partner's default, then the platform-wide default.
    pub fn select_policy(
        booking_id: Uuid,
        partner_id: Uuid,
        override_policy: Option<CancelPolicy>,
        defaults: Vec<CancelPolicy>,
    ) -> Result<CancelPolicy, BookingError> {
        if let Some(policy) = override_policy {
            if policy.is_active {
                return Ok(policy);
            }
            tracing::warn!(
                "Booking {} references inactive cancellation policy {}, using defaults",
                booking_id,
                policy.id
            );
        }

        let pick = |scope: Option<Uuid>| {
            defaults
                .iter()
                .filter(|p| p.is_active && p.is_default && p.partner_id == scope)
                .max_by_key(|p| p.priority)
                .cloned()
        };

        pick(Some(partner_id))
            .or_else(|| pick(None))
            .ok_or(BookingError::PolicyNotFound(booking_id))
    }

    /// Map hours-before-departure onto exactly one `(percentage, fee)` pair
    pub fn resolve(policy: &CancelPolicy, hours: i64) -> Resolution {
        let matched = policy
            .rules
            .iter()
            .filter(|r| r.is_active && r.contains(hours))
            .min_by_key(|r| r.display_order);

        if let Some(rule) = matched {
            return Resolution {
                policy_id: policy.id,
                rule_id: Some(rule.id),
                basis: ResolutionBasis::Rule,
                refund_percentage: rule.refund_percentage,
                cancellation_fee: rule.cancellation_fee,
                fee_proration: policy.fee_proration,
                hours_before_departure: hours,
            };
        }

        let default_applies = match (policy.refund_percentage, policy.days_before_trip) {
            (Some(_), Some(days)) => hours >= i64::from(days) * 24,
            (Some(_), None) => true,
            (None, _) => false,
        };

        if default_applies {
            let pct = policy.refund_percentage.unwrap_or(0);
            tracing::warn!(
                "No rule of policy {} covers {}h before departure, falling back to policy refund of {}%",
                policy.id,
                hours,
                pct
            );
            return Resolution {
                policy_id: policy.id,
                rule_id: None,
                basis: ResolutionBasis::PolicyDefault,
                refund_percentage: pct,
                cancellation_fee: Money::ZERO,
                fee_proration: policy.fee_proration,
                hours_before_departure: hours,
            };
        }

        let full_fee = policy
            .rules
            .iter()
            .filter(|r| r.is_active)
            .map(|r| r.cancellation_fee)
            .max()
            .unwrap_or(Money::ZERO);
        tracing::warn!(
            "No rule or default of policy {} covers {}h before departure, refund denied with fee {}",
            policy.id,
            hours,
            full_fee
        );
        Resolution {
            policy_id: policy.id,
            rule_id: None,
            basis: ResolutionBasis::Denied,
            refund_percentage: 0,
            cancellation_fee: full_fee,
            fee_proration: policy.fee_proration,
            hours_before_departure: hours,
        }
    }
}
