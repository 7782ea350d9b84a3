use chrono::{DateTime, Datelike, FixedOffset, Timelike, Utc, Weekday};
use serde::{Deserialize, Serialize};

use crate::actor::ActorId;
use crate::optout::OptOutScope;
use crate::recording::VoiceRecordingId;
use crate::tag::TagId;
use crate::typedid::{TypedId, TypedIdMarker};

pub mod db;
pub mod endpoints;
pub mod manager;
pub use endpoints::*;

pub type CampaignId = TypedId<Campaign>;

pub const MESSAGE_MAX_LENGTH: usize = 1600;

/// One authored bulk-message unit: one channel, one audience filter, one
/// lifecycle. Counters are authoritative here; `pending_deliveries` is
/// derived so `total == successful + failed + pending` cannot be violated
/// by a missed update.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Campaign {
    #[serde(rename = "_id")]
    pub id: CampaignId,
    pub name: String,
    /// SMS body; doubles as the robocall script when no recording is set.
    pub message: String,
    pub channel: Channel,
    pub status: CampaignStatus,
    #[serde(default, with = "crate::utils::opt_chrono_datetime_as_bson_datetime")]
    pub scheduled_time: Option<DateTime<Utc>>,
    #[serde(with = "mongodb::bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "mongodb::bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub modified_at: DateTime<Utc>,
    #[serde(default, with = "crate::utils::opt_chrono_datetime_as_bson_datetime")]
    pub sent_at: Option<DateTime<Utc>>,
    pub created_by: ActorId,
    pub audience: AudienceFilter,
    pub voice_recording_id: Option<VoiceRecordingId>,
    pub email: Option<EmailContent>,
    pub calling_hours: CallingHours,
    pub prevent_duplicate_messages: bool,
    pub total_recipients: i64,
    pub successful_deliveries: i64,
    pub failed_deliveries: i64,
}

impl TypedIdMarker for Campaign {
    fn tag() -> &'static str {
        "CMP"
    }
}

impl Campaign {
    pub fn pending_deliveries(&self) -> i64 {
        self.total_recipients - self.successful_deliveries - self.failed_deliveries
    }

    /// Only a draft that has never materialized recipients may be edited.
    pub fn is_pristine_draft(&self) -> bool {
        self.status == CampaignStatus::Draft && self.total_recipients == 0
    }

    /// The calling-hours gate, evaluated in the organization's civic time.
    /// Channels that do not honor the gate are always clear, as is any
    /// campaign that leaves enforcement off.
    pub fn calling_hours_open(&self, local_now: DateTime<FixedOffset>) -> bool {
        if !self.channel.honors_calling_hours() || !self.calling_hours.enforce {
            return true;
        }

        let day_ok = self.calling_hours.include_weekends
            || !matches!(local_now.weekday(), Weekday::Sat | Weekday::Sun);
        let hour = local_now.hour();

        day_ok && hour >= self.calling_hours.start_hour && hour < self.calling_hours.end_hour
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "SCREAMING-KEBAB-CASE")]
pub enum Channel {
    Sms,
    RoboCall,
    Email,
}

impl Channel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Sms => "SMS",
            Channel::RoboCall => "ROBO-CALL",
            Channel::Email => "EMAIL",
        }
    }

    /// Email is deliberately exempt: list hygiene and unsubscribe handling
    /// belong to the upstream mail system, not the phone opt-out registry.
    pub fn honors_opt_out_registry(&self) -> bool {
        !matches!(self, Channel::Email)
    }

    pub fn honors_calling_hours(&self) -> bool {
        matches!(self, Channel::RoboCall)
    }

    /// Opt-out scopes that suppress a send on this channel.
    pub fn opt_out_scopes(&self) -> &'static [OptOutScope] {
        match self {
            Channel::Sms => &[OptOutScope::All, OptOutScope::Sms],
            Channel::RoboCall => &[OptOutScope::All, OptOutScope::RoboCalls],
            Channel::Email => &[],
        }
    }
}

impl From<Channel> for mongodb::bson::Bson {
    fn from(channel: Channel) -> mongodb::bson::Bson {
        channel.as_str().into()
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "SCREAMING-KEBAB-CASE")]
pub enum CampaignStatus {
    Draft,
    Scheduled,
    Sending,
    Completed,
    Failed,
    Cancelled,
    Sealed,
}

impl CampaignStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CampaignStatus::Draft => "DRAFT",
            CampaignStatus::Scheduled => "SCHEDULED",
            CampaignStatus::Sending => "SENDING",
            CampaignStatus::Completed => "COMPLETED",
            CampaignStatus::Failed => "FAILED",
            CampaignStatus::Cancelled => "CANCELLED",
            CampaignStatus::Sealed => "SEALED",
        }
    }
}

impl From<CampaignStatus> for mongodb::bson::Bson {
    fn from(status: CampaignStatus) -> mongodb::bson::Bson {
        status.as_str().into()
    }
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct AudienceFilter {
    pub zip_codes: Vec<String>,
    pub tag_ids: Vec<TagId>,
}

impl AudienceFilter {
    pub fn is_empty(&self) -> bool {
        self.zip_codes.is_empty() && self.tag_ids.is_empty()
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct EmailContent {
    pub subject: String,
    pub html_content: String,
    pub plain_text_content: Option<String>,
}

/// Recurring local-time window in which robocalls may go out. The window
/// is half-open: `[start_hour, end_hour)`.
#[derive(Clone, Copy, Debug, Deserialize, Serialize)]
pub struct CallingHours {
    pub enforce: bool,
    pub start_hour: u32,
    pub end_hour: u32,
    pub include_weekends: bool,
}

impl Default for CallingHours {
    fn default() -> CallingHours {
        CallingHours {
            enforce: false,
            start_hour: 9,
            end_hour: 20,
            include_weekends: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn robo_campaign(calling_hours: CallingHours) -> Campaign {
        let now = Utc::now();
        Campaign {
            id: CampaignId::new(),
            name: "GOTV reminder".to_string(),
            message: "Polls are open Tuesday 7am-7pm.".to_string(),
            channel: Channel::RoboCall,
            status: CampaignStatus::Sending,
            scheduled_time: None,
            created_at: now,
            modified_at: now,
            sent_at: None,
            created_by: ActorId::new(),
            audience: AudienceFilter {
                zip_codes: vec!["35201".to_string()],
                tag_ids: vec![],
            },
            voice_recording_id: None,
            email: None,
            calling_hours,
            prevent_duplicate_messages: false,
            total_recipients: 0,
            successful_deliveries: 0,
            failed_deliveries: 0,
        }
    }

    fn weekday_window() -> CallingHours {
        CallingHours {
            enforce: true,
            start_hour: 9,
            end_hour: 20,
            include_weekends: false,
        }
    }

    fn local(offset_hours: i32, y: i32, mo: u32, d: u32, h: u32) -> DateTime<FixedOffset> {
        FixedOffset::east_opt(offset_hours * 3600)
            .unwrap()
            .with_ymd_and_hms(y, mo, d, h, 0, 0)
            .unwrap()
    }

    #[test]
    fn gate_closed_on_saturday_morning() {
        let campaign = robo_campaign(weekday_window());

        // 2026-08-01 is a Saturday
        assert!(!campaign.calling_hours_open(local(-6, 2026, 8, 1, 10)));
    }

    #[test]
    fn gate_open_on_monday_morning() {
        let campaign = robo_campaign(weekday_window());

        // 2026-08-03 is a Monday
        assert!(campaign.calling_hours_open(local(-6, 2026, 8, 3, 10)));
    }

    #[test]
    fn gate_half_open_at_window_edges() {
        let campaign = robo_campaign(weekday_window());

        assert!(campaign.calling_hours_open(local(-6, 2026, 8, 3, 9)));
        assert!(!campaign.calling_hours_open(local(-6, 2026, 8, 3, 20)));
        assert!(!campaign.calling_hours_open(local(-6, 2026, 8, 3, 8)));
    }

    #[test]
    fn gate_opens_weekends_when_included() {
        let mut window = weekday_window();
        window.include_weekends = true;
        let campaign = robo_campaign(window);

        assert!(campaign.calling_hours_open(local(-6, 2026, 8, 1, 10)));
    }

    #[test]
    fn sms_ignores_the_gate_entirely() {
        let mut campaign = robo_campaign(weekday_window());
        campaign.channel = Channel::Sms;

        // Saturday at midnight would close any enforced window
        assert!(campaign.calling_hours_open(local(-6, 2026, 8, 1, 0)));
    }

    #[test]
    fn email_bypasses_opt_out_registry_by_policy() {
        assert!(!Channel::Email.honors_opt_out_registry());
        assert!(Channel::Email.opt_out_scopes().is_empty());
        assert!(Channel::Sms.honors_opt_out_registry());
        assert!(Channel::RoboCall.honors_opt_out_registry());
    }

    #[test]
    fn pending_deliveries_is_derived_from_counters() {
        let mut campaign = robo_campaign(CallingHours::default());
        campaign.total_recipients = 37;
        campaign.successful_deliveries = 30;
        campaign.failed_deliveries = 4;

        assert_eq!(campaign.pending_deliveries(), 3);
    }
}
