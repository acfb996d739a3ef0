use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::money::Money;
use crate::wire::wire_enum;

/// Response code the issuer returns for an approved request.
pub const ISSUER_SUCCESS_CODE: &str = "00";

pub fn is_issuer_success(code: &str) -> bool {
    code == ISSUER_SUCCESS_CODE
}

wire_enum! {
    /// Cached summary of a payment's ledger.
    pub enum PaymentStatus (PaymentStatus) {
        Pending => "PENDING",
        Authorized => "AUTHORIZED",
        Declined => "DECLINED",
        PartiallyCaptured => "PARTIALLY_CAPTURED",
        Captured => "CAPTURED",
        PartiallyRefunded => "PARTIALLY_REFUNDED",
        Refunded => "REFUNDED",
        Voided => "VOIDED",
    }
}

impl PaymentStatus {
    pub const fn is_terminal(self) -> bool {
        matches!(
            self,
            PaymentStatus::Declined | PaymentStatus::Refunded | PaymentStatus::Voided
        )
    }
}

wire_enum! {
    /// The operation a ledger entry records.
    pub enum PaymentType (PaymentType) {
        Authorization => "AUTHORIZATION",
        Capture => "CAPTURE",
        Refund => "REFUND",
        Void => "VOID",
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Expiry {
    pub month: u32,
    pub year: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Card {
    pub number: String,
    pub expiry: Expiry,
}

impl Card {
    /// The card number without grouping spaces.
    pub fn digits(&self) -> String {
        self.number.chars().filter(|c| !c.is_whitespace()).collect()
    }

    /// First six and last four digits, for logging.
    pub fn masked(&self) -> String {
        let digits = self.digits();
        if digits.len() < 10 {
            return "*".repeat(digits.len());
        }
        let (head, rest) = digits.split_at(6);
        let tail = &rest[rest.len() - 4..];
        format!("{}{}{}", head, "*".repeat(rest.len() - 4), tail)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PaymentMethod {
    Card(Card),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payment {
    pub id: Uuid,
    pub amount: Money,
    pub status: PaymentStatus,
    pub payment_method: PaymentMethod,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

/// One attempted operation against a payment. Written before the issuer is
/// called and completed exactly once with the issuer's response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentAction {
    pub id: Uuid,
    pub payment_id: Uuid,
    pub amount: u64,
    #[serde(rename = "type")]
    pub action_type: PaymentType,
    pub response_code: Option<String>,
    pub created_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
}

impl PaymentAction {
    pub fn is_processed(&self) -> bool {
        self.processed_at.is_some()
    }

    pub fn is_successful(&self) -> bool {
        self.is_processed() && self.response_code.as_deref().is_some_and(is_issuer_success)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::str::FromStr;

    #[test]
    fn test_status_codes_round_trip() {
        // Adding a variant without listing it in ALL fails this match.
        for status in PaymentStatus::ALL {
            match status {
                PaymentStatus::Pending
                | PaymentStatus::Authorized
                | PaymentStatus::Declined
                | PaymentStatus::PartiallyCaptured
                | PaymentStatus::Captured
                | PaymentStatus::PartiallyRefunded
                | PaymentStatus::Refunded
                | PaymentStatus::Voided => {}
            }
            assert_eq!(PaymentStatus::from_str(status.code()).unwrap(), *status);
        }
        assert_eq!(PaymentStatus::ALL.len(), 8);

        let codes: HashSet<_> = PaymentStatus::ALL.iter().map(|s| s.code()).collect();
        assert_eq!(codes.len(), PaymentStatus::ALL.len());
    }

    #[test]
    fn test_type_codes_round_trip() {
        for payment_type in PaymentType::ALL {
            assert_eq!(PaymentType::from_str(payment_type.code()).unwrap(), *payment_type);
        }
        assert_eq!(PaymentType::ALL.len(), 4);

        let codes: HashSet<_> = PaymentType::ALL.iter().map(|t| t.code()).collect();
        assert_eq!(codes.len(), PaymentType::ALL.len());
    }

    #[test]
    fn test_unknown_codes_are_rejected() {
        assert!(PaymentStatus::from_str("SETTLED").is_err());
        assert!(PaymentStatus::from_str("authorized").is_err());
        assert!(PaymentType::from_str("CHARGEBACK").is_err());
    }

    #[test]
    fn test_status_serializes_as_wire_code() {
        let json = serde_json::to_string(&PaymentStatus::PartiallyCaptured).unwrap();
        assert_eq!(json, "\"PARTIALLY_CAPTURED\"");
        let parsed: PaymentType = serde_json::from_str("\"REFUND\"").unwrap();
        assert_eq!(parsed, PaymentType::Refund);
    }

    #[test]
    fn test_terminal_statuses() {
        let terminal: Vec<_> = PaymentStatus::ALL
            .iter()
            .filter(|s| s.is_terminal())
            .copied()
            .collect();
        assert_eq!(
            terminal,
            vec![
                PaymentStatus::Declined,
                PaymentStatus::Refunded,
                PaymentStatus::Voided
            ]
        );
    }

    #[test]
    fn test_card_masking() {
        let card = Card {
            number: "4603 1110 9388 0019".to_string(),
            expiry: Expiry { month: 12, year: 2030 },
        };
        assert_eq!(card.digits(), "4603111093880019");
        assert_eq!(card.masked(), "460311******0019");
    }

    #[test]
    fn test_action_success_requires_outcome() {
        let mut action = PaymentAction {
            id: Uuid::new_v4(),
            payment_id: Uuid::new_v4(),
            amount: 100,
            action_type: PaymentType::Capture,
            response_code: None,
            created_at: Utc::now(),
            processed_at: None,
        };
        assert!(!action.is_successful());

        action.response_code = Some("12".to_string());
        action.processed_at = Some(Utc::now());
        assert!(!action.is_successful());

        action.response_code = Some(ISSUER_SUCCESS_CODE.to_string());
        assert!(action.is_successful());
    }
}
