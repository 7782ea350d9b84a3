use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::campaign::CampaignId;
use crate::typedid::{TypedId, TypedIdMarker};
use crate::voter::VoterId;

pub mod db;

pub type DeliveryId = TypedId<DeliveryRecord>;

/// Per-recipient send tracking, owned by exactly one campaign. A record is
/// terminal once Sent or Failed; retry cycles append fresh Pending records
/// instead of rewriting old ones, so the full attempt history survives.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct DeliveryRecord {
    #[serde(rename = "_id")]
    pub id: DeliveryId,
    pub campaign_id: CampaignId,
    pub voter_id: VoterId,
    /// Phone or email, already canonicalized for the campaign's channel.
    pub address: String,
    pub status: DeliveryStatus,
    #[serde(with = "mongodb::bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "mongodb::bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub modified_at: DateTime<Utc>,
    #[serde(default, with = "crate::utils::opt_chrono_datetime_as_bson_datetime")]
    pub attempted_at: Option<DateTime<Utc>>,
    pub error_detail: Option<String>,
}

impl TypedIdMarker for DeliveryRecord {
    fn tag() -> &'static str {
        "DLV"
    }
}

impl DeliveryRecord {
    pub fn pending(
        campaign_id: CampaignId,
        voter_id: VoterId,
        address: String,
        now: DateTime<Utc>,
    ) -> DeliveryRecord {
        DeliveryRecord {
            id: DeliveryId::new(),
            campaign_id,
            voter_id,
            address,
            status: DeliveryStatus::Pending,
            created_at: now,
            modified_at: now,
            attempted_at: None,
            error_detail: None,
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "SCREAMING-KEBAB-CASE")]
pub enum DeliveryStatus {
    Pending,
    Sent,
    Failed,
}

impl DeliveryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryStatus::Pending => "PENDING",
            DeliveryStatus::Sent => "SENT",
            DeliveryStatus::Failed => "FAILED",
        }
    }
}

impl From<DeliveryStatus> for mongodb::bson::Bson {
    fn from(status: DeliveryStatus) -> mongodb::bson::Bson {
        status.as_str().into()
    }
}
