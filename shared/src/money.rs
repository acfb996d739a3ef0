use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::ParseError;

/// ISO 4217 style currency code: three upper-case ASCII letters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Currency([u8; 3]);

impl Currency {
    pub fn as_str(&self) -> &str {
        // Only ASCII letters are ever stored.
        std::str::from_utf8(&self.0).unwrap_or_default()
    }
}

impl FromStr for Currency {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = s.trim().as_bytes();
        match bytes {
            [a, b, c] if bytes.iter().all(u8::is_ascii_alphabetic) => Ok(Self([
                a.to_ascii_uppercase(),
                b.to_ascii_uppercase(),
                c.to_ascii_uppercase(),
            ])),
            _ => Err(ParseError::Currency(s.to_string())),
        }
    }
}

impl TryFrom<String> for Currency {
    type Error = ParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Currency> for String {
    fn from(currency: Currency) -> Self {
        currency.as_str().to_string()
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An amount in the smallest unit of its currency (pence for GBP).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Money {
    pub minor_units: u64,
    pub currency: Currency,
}

impl Money {
    pub fn new(minor_units: u64, currency: Currency) -> Self {
        Self { minor_units, currency }
    }

    /// Same currency, different amount.
    pub fn with_minor_units(&self, minor_units: u64) -> Self {
        Self::new(minor_units, self.currency)
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.minor_units, self.currency)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gbp() -> Currency {
        "GBP".parse().unwrap()
    }

    #[test]
    fn test_currency_parsing() {
        assert_eq!("gbp".parse::<Currency>().unwrap(), gbp());
        assert_eq!(gbp().as_str(), "GBP");
        assert!("GB".parse::<Currency>().is_err());
        assert!("GBPX".parse::<Currency>().is_err());
        assert!("G8P".parse::<Currency>().is_err());
        assert!("".parse::<Currency>().is_err());
    }

    #[test]
    fn test_currency_serde() {
        let json = serde_json::to_string(&gbp()).unwrap();
        assert_eq!(json, "\"GBP\"");
        assert!(serde_json::from_str::<Currency>("\"EURO\"").is_err());
    }

    #[test]
    fn test_money_keeps_currency() {
        let authorized = Money::new(1000, gbp());
        let capture = authorized.with_minor_units(250);
        assert_eq!(capture.currency, gbp());
        assert_eq!(capture.to_string(), "250 GBP");
        assert_eq!(
            serde_json::to_value(capture).unwrap(),
            serde_json::json!({"minor_units": 250, "currency": "GBP"})
        );
    }
}
