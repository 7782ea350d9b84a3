use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::typedid::{TypedId, TypedIdMarker};
use crate::voter::VoterId;

pub mod db;
pub mod endpoints;
pub mod manager;
pub use endpoints::*;

pub type OptOutId = TypedId<OptOutRecord>;

/// A durable suppression entry. Append-only from the engine's point of
/// view; deletion is a SuperAdmin administrative action, never part of a
/// send cycle.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct OptOutRecord {
    #[serde(rename = "_id")]
    pub id: OptOutId,
    pub phone_number: String,
    pub scope: OptOutScope,
    pub method: OptOutMethod,
    #[serde(with = "mongodb::bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub opted_out_at: DateTime<Utc>,
    pub reason: Option<String>,
    pub voter_id: Option<VoterId>,
}

impl TypedIdMarker for OptOutRecord {
    fn tag() -> &'static str {
        "OPT"
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "SCREAMING-KEBAB-CASE")]
pub enum OptOutScope {
    All,
    RoboCalls,
    Sms,
}

impl OptOutScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            OptOutScope::All => "ALL",
            OptOutScope::RoboCalls => "ROBO-CALLS",
            OptOutScope::Sms => "SMS",
        }
    }
}

impl From<OptOutScope> for mongodb::bson::Bson {
    fn from(scope: OptOutScope) -> mongodb::bson::Bson {
        scope.as_str().into()
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "SCREAMING-KEBAB-CASE")]
pub enum OptOutMethod {
    Phone,
    Sms,
    Manual,
    Web,
}

impl OptOutMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            OptOutMethod::Phone => "PHONE",
            OptOutMethod::Sms => "SMS",
            OptOutMethod::Manual => "MANUAL",
            OptOutMethod::Web => "WEB",
        }
    }
}

/// Canonicalize to E.164. The directory is US-centric: bare 10-digit
/// numbers get a +1 country code, 11 digits must already start with 1, and
/// anything explicitly `+`-prefixed passes through on digit count alone.
pub fn normalize_phone(raw: &str) -> Result<String, Error> {
    let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();

    let normalized = match digits.len() {
        10 => format!("+1{}", digits),
        11 if digits.starts_with('1') => format!("+{}", digits),
        11..=15 if raw.trim_start().starts_with('+') => format!("+{}", digits),
        _ => {
            return Err(Error::InvalidPhoneNumber {
                phone_number: raw.to_string(),
            })
        }
    };

    Ok(normalized)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_common_us_formats() {
        assert_eq!(normalize_phone("(205) 555-0134").unwrap(), "+12055550134");
        assert_eq!(normalize_phone("205-555-0134").unwrap(), "+12055550134");
        assert_eq!(normalize_phone("12055550134").unwrap(), "+12055550134");
        assert_eq!(normalize_phone("+1 205 555 0134").unwrap(), "+12055550134");
    }

    #[test]
    fn passes_international_numbers_with_explicit_prefix() {
        assert_eq!(normalize_phone("+44 20 7946 0958").unwrap(), "+442079460958");
    }

    #[test]
    fn rejects_short_or_garbled_input() {
        assert_eq!(
            normalize_phone("555-0134").unwrap_err(),
            Error::InvalidPhoneNumber {
                phone_number: "555-0134".to_string()
            }
        );
        assert!(normalize_phone("not a number").is_err());
    }
}
