use coachline_shared::Masked;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::CoreError;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    Cash,
    Card,
    Wallet,
    BankTransfer,
    StcPay,
}

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethod::Cash => "cash",
            PaymentMethod::Card => "card",
            PaymentMethod::Wallet => "wallet",
            PaymentMethod::BankTransfer => "bank_transfer",
            PaymentMethod::StcPay => "stc_pay",
        }
    }

    /// Everything except cash is settled by an outside collaborator that
    /// hands us a transaction reference.
    pub fn requires_reference(&self) -> bool {
        !matches!(self, PaymentMethod::Cash)
    }
}

impl fmt::Display for PaymentMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PaymentMethod {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "cash" => Ok(PaymentMethod::Cash),
            "card" => Ok(PaymentMethod::Card),
            "wallet" => Ok(PaymentMethod::Wallet),
            "bank_transfer" => Ok(PaymentMethod::BankTransfer),
            "stc_pay" => Ok(PaymentMethod::StcPay),
            other => Err(CoreError::ValidationError(format!("unknown payment method {}", other))),
        }
    }
}

/// What the wallet/payment collaborator reports for a settled payment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentRecord {
    pub method: PaymentMethod,
    pub reference: Option<Masked<String>>,
}

impl PaymentRecord {
    pub fn cash() -> Self {
        Self { method: PaymentMethod::Cash, reference: None }
    }

    pub fn with_reference(method: PaymentMethod, reference: impl Into<String>) -> Self {
        Self {
            method,
            reference: Some(Masked(reference.into())),
        }
    }

    pub fn validate(&self) -> Result<(), CoreError> {
        let has_reference = self
            .reference
            .as_ref()
            .map(|r| !r.expose().trim().is_empty())
            .unwrap_or(false);

        if self.method.requires_reference() && !has_reference {
            return Err(CoreError::ValidationError(format!(
                "{} payments need a transaction reference",
                self.method
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_non_cash_requires_reference() {
        assert!(PaymentRecord::cash().validate().is_ok());
        assert!(PaymentRecord { method: PaymentMethod::Wallet, reference: None }.validate().is_err());
        assert!(PaymentRecord::with_reference(PaymentMethod::Wallet, "  ").validate().is_err());
        assert!(PaymentRecord::with_reference(PaymentMethod::StcPay, "STC-1").validate().is_ok());
    }

    #[test]
    fn test_method_round_trips_through_str() {
        for method in [PaymentMethod::Cash, PaymentMethod::BankTransfer, PaymentMethod::StcPay] {
            assert_eq!(method.as_str().parse::<PaymentMethod>().unwrap(), method);
        }
        assert!("cheque".parse::<PaymentMethod>().is_err());
    }
}
