use actix_web::web::{Data, Json, Path, Query};
use actix_web::{delete, get, post, put};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::actor::{Actor, ActorId};
use crate::database::Database;
use crate::dispatch::{CycleOptions, Dispatcher};
use crate::error::Error;
use crate::recording::VoiceRecordingId;
use crate::scheduler;
use crate::tag::TagId;
use crate::utils::SuccessBody;

use super::manager::CampaignDraft;
use super::{
    manager, AudienceFilter, CallingHours, Campaign, CampaignId, CampaignStatus, Channel,
    EmailContent,
};

#[derive(Clone, Debug, Deserialize)]
pub struct CampaignDraftBody {
    pub name: String,
    #[serde(default)]
    pub message: String,
    pub channel: Channel,
    #[serde(default)]
    pub zip_codes: Vec<String>,
    #[serde(default)]
    pub tag_ids: Vec<TagId>,
    pub voice_recording_id: Option<VoiceRecordingId>,
    pub email: Option<EmailContent>,
    #[serde(default)]
    pub enforce_calling_hours: bool,
    #[serde(default = "default_start_hour")]
    pub start_hour: u32,
    #[serde(default = "default_end_hour")]
    pub end_hour: u32,
    #[serde(default)]
    pub include_weekends: bool,
    #[serde(default)]
    pub prevent_duplicate_messages: bool,
}

fn default_start_hour() -> u32 {
    9
}

fn default_end_hour() -> u32 {
    20
}

impl CampaignDraftBody {
    fn into_draft(self) -> CampaignDraft {
        CampaignDraft {
            name: self.name,
            message: self.message,
            channel: self.channel,
            audience: AudienceFilter {
                zip_codes: self.zip_codes,
                tag_ids: self.tag_ids,
            },
            voice_recording_id: self.voice_recording_id,
            email: self.email,
            calling_hours: CallingHours {
                enforce: self.enforce_calling_hours,
                start_hour: self.start_hour,
                end_hour: self.end_hour,
                include_weekends: self.include_weekends,
            },
            prevent_duplicate_messages: self.prevent_duplicate_messages,
        }
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct CampaignBody {
    pub id: CampaignId,
    pub name: String,
    pub message: String,
    pub channel: Channel,
    pub status: CampaignStatus,
    pub scheduled_time: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
    pub sent_at: Option<DateTime<Utc>>,
    pub created_by: ActorId,
    pub zip_codes: Vec<String>,
    pub tag_ids: Vec<TagId>,
    pub voice_recording_id: Option<VoiceRecordingId>,
    pub email: Option<EmailContent>,
    pub enforce_calling_hours: bool,
    pub start_hour: u32,
    pub end_hour: u32,
    pub include_weekends: bool,
    pub prevent_duplicate_messages: bool,
    pub total_recipients: i64,
    pub successful_deliveries: i64,
    pub failed_deliveries: i64,
    pub pending_deliveries: i64,
}

impl CampaignBody {
    pub fn render(campaign: Campaign) -> CampaignBody {
        let pending_deliveries = campaign.pending_deliveries();
        CampaignBody {
            id: campaign.id,
            name: campaign.name,
            message: campaign.message,
            channel: campaign.channel,
            status: campaign.status,
            scheduled_time: campaign.scheduled_time,
            created_at: campaign.created_at,
            modified_at: campaign.modified_at,
            sent_at: campaign.sent_at,
            created_by: campaign.created_by,
            zip_codes: campaign.audience.zip_codes,
            tag_ids: campaign.audience.tag_ids,
            voice_recording_id: campaign.voice_recording_id,
            email: campaign.email,
            enforce_calling_hours: campaign.calling_hours.enforce,
            start_hour: campaign.calling_hours.start_hour,
            end_hour: campaign.calling_hours.end_hour,
            include_weekends: campaign.calling_hours.include_weekends,
            prevent_duplicate_messages: campaign.prevent_duplicate_messages,
            total_recipients: campaign.total_recipients,
            successful_deliveries: campaign.successful_deliveries,
            failed_deliveries: campaign.failed_deliveries,
            pending_deliveries,
        }
    }
}

#[post("/campaigns")]
#[tracing::instrument(skip(db, body))]
pub async fn create_campaign(
    db: Data<dyn Database>,
    actor: Actor,
    body: Json<CampaignDraftBody>,
) -> Result<Json<CampaignBody>, Error> {
    let draft = body.into_inner().into_draft();

    let campaign = manager::create_campaign(db.get_ref(), &actor, draft).await?;

    Ok(Json(CampaignBody::render(campaign)))
}

#[get("/campaigns")]
#[tracing::instrument(skip(db))]
pub async fn get_campaigns(db: Data<dyn Database>, _actor: Actor) -> Result<Json<Vec<CampaignBody>>, Error> {
    let campaigns = manager::get_campaigns(db.get_ref()).await?;

    Ok(Json(campaigns.into_iter().map(CampaignBody::render).collect()))
}

#[derive(Clone, Debug, Deserialize)]
pub struct RecipientCountQuery {
    pub channel: Channel,
    #[serde(default)]
    pub zip_codes: Option<String>,
    #[serde(default)]
    pub tag_ids: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub prevent_duplicate_messages: Option<bool>,
}

#[derive(Clone, Debug, Serialize)]
pub struct RecipientCountBody {
    pub recipient_count: usize,
}

#[get("/campaigns/recipient-count")]
#[tracing::instrument(skip(db))]
pub async fn get_recipient_count(
    db: Data<dyn Database>,
    _actor: Actor,
    params: Query<RecipientCountQuery>,
) -> Result<Json<RecipientCountBody>, Error> {
    let params = params.into_inner();

    let zip_codes = split_csv(params.zip_codes.as_deref());
    let tag_ids = split_csv(params.tag_ids.as_deref())
        .into_iter()
        .map(|value| {
            value.parse::<TagId>().map_err(|_| Error::InvalidQueryValue {
                field: "tag_ids",
                value,
            })
        })
        .collect::<Result<Vec<TagId>, Error>>()?;

    let filter = AudienceFilter { zip_codes, tag_ids };
    let recipient_count = manager::preview_recipient_count(
        db.get_ref(),
        &filter,
        params.channel,
        params.message.as_deref().unwrap_or_default(),
        params.prevent_duplicate_messages.unwrap_or(false),
    )
    .await?;

    Ok(Json(RecipientCountBody { recipient_count }))
}

fn split_csv(raw: Option<&str>) -> Vec<String> {
    raw.unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
        .collect()
}

#[get("/campaigns/{campaign_id}")]
#[tracing::instrument(skip(db))]
pub async fn get_campaign_by_id(
    db: Data<dyn Database>,
    _actor: Actor,
    params: Path<CampaignId>,
) -> Result<Json<CampaignBody>, Error> {
    let campaign = manager::get_campaign_by_id(db.get_ref(), params.into_inner()).await?;

    Ok(Json(CampaignBody::render(campaign)))
}

#[put("/campaigns/{campaign_id}")]
#[tracing::instrument(skip(db, body))]
pub async fn update_campaign(
    db: Data<dyn Database>,
    actor: Actor,
    params: Path<CampaignId>,
    body: Json<CampaignDraftBody>,
) -> Result<Json<CampaignBody>, Error> {
    let campaign_id = params.into_inner();
    let draft = body.into_inner().into_draft();

    let campaign = manager::update_campaign(db.get_ref(), &actor, campaign_id, draft).await?;

    Ok(Json(CampaignBody::render(campaign)))
}

#[delete("/campaigns/{campaign_id}")]
#[tracing::instrument(skip(db))]
pub async fn delete_campaign(
    db: Data<dyn Database>,
    actor: Actor,
    params: Path<CampaignId>,
) -> Result<Json<SuccessBody>, Error> {
    manager::delete_campaign(db.get_ref(), &actor, params.into_inner()).await?;

    Ok(Json(SuccessBody {}))
}

#[post("/campaigns/{campaign_id}/send")]
#[tracing::instrument(skip(db, dispatcher))]
pub async fn send_campaign(
    db: Data<dyn Database>,
    dispatcher: Data<Dispatcher>,
    actor: Actor,
    params: Path<CampaignId>,
) -> Result<Json<CampaignBody>, Error> {
    let campaign_id = params.into_inner();

    let campaign =
        manager::send_campaign(db.get_ref(), dispatcher.clock(), &actor, campaign_id).await?;
    dispatcher.spawn_cycle(campaign.id);

    Ok(Json(CampaignBody::render(campaign)))
}

#[derive(Clone, Debug, Deserialize)]
pub struct ScheduleBody {
    pub scheduled_time: DateTime<Utc>,
}

#[post("/campaigns/{campaign_id}/schedule")]
#[tracing::instrument(skip(db, dispatcher))]
pub async fn schedule_campaign(
    db: Data<dyn Database>,
    dispatcher: Data<Dispatcher>,
    actor: Actor,
    params: Path<CampaignId>,
    body: Json<ScheduleBody>,
) -> Result<Json<CampaignBody>, Error> {
    let campaign_id = params.into_inner();

    let campaign = manager::schedule_campaign(
        db.get_ref(),
        dispatcher.clock(),
        &actor,
        campaign_id,
        body.scheduled_time,
    )
    .await?;

    Ok(Json(CampaignBody::render(campaign)))
}

#[post("/campaigns/{campaign_id}/cancel")]
#[tracing::instrument(skip(db))]
pub async fn cancel_campaign(
    db: Data<dyn Database>,
    actor: Actor,
    params: Path<CampaignId>,
) -> Result<Json<CampaignBody>, Error> {
    let campaign = manager::cancel_campaign(db.get_ref(), &actor, params.into_inner()).await?;

    Ok(Json(CampaignBody::render(campaign)))
}

#[post("/campaigns/{campaign_id}/force-stop")]
#[tracing::instrument(skip(db, dispatcher))]
pub async fn force_stop_campaign(
    db: Data<dyn Database>,
    dispatcher: Data<Dispatcher>,
    actor: Actor,
    params: Path<CampaignId>,
) -> Result<Json<CampaignBody>, Error> {
    let campaign = manager::force_stop_campaign(
        db.get_ref(),
        dispatcher.clock(),
        &actor,
        params.into_inner(),
    )
    .await?;

    Ok(Json(CampaignBody::render(campaign)))
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct RetryFailedBody {
    #[serde(default)]
    pub override_opt_outs: bool,
}

#[post("/campaigns/{campaign_id}/retry-failed")]
#[tracing::instrument(skip(db, dispatcher))]
pub async fn retry_failed_deliveries(
    db: Data<dyn Database>,
    dispatcher: Data<Dispatcher>,
    actor: Actor,
    params: Path<CampaignId>,
    body: Json<RetryFailedBody>,
) -> Result<Json<CampaignBody>, Error> {
    let campaign_id = params.into_inner();
    let override_opt_outs = body.override_opt_outs;

    let campaign = manager::retry_failed_deliveries(
        db.get_ref(),
        dispatcher.clock(),
        &actor,
        campaign_id,
        override_opt_outs,
    )
    .await?;
    dispatcher.spawn_cycle_with(
        campaign.id,
        CycleOptions {
            skip_opt_out_check: override_opt_outs,
        },
    );

    Ok(Json(CampaignBody::render(campaign)))
}

#[post("/campaigns/{campaign_id}/duplicate")]
#[tracing::instrument(skip(db))]
pub async fn duplicate_campaign(
    db: Data<dyn Database>,
    actor: Actor,
    params: Path<CampaignId>,
) -> Result<Json<CampaignBody>, Error> {
    let campaign = manager::duplicate_campaign(db.get_ref(), &actor, params.into_inner()).await?;

    Ok(Json(CampaignBody::render(campaign)))
}

#[derive(Clone, Debug, Serialize)]
pub struct CheckStuckBody {
    pub restarted_campaign_ids: Vec<CampaignId>,
}

#[post("/campaigns/check-stuck")]
#[tracing::instrument(skip(db, dispatcher))]
pub async fn check_stuck_campaigns(
    db: Data<dyn Database>,
    dispatcher: Data<Dispatcher>,
    actor: Actor,
) -> Result<Json<CheckStuckBody>, Error> {
    actor.require_super_admin("check-stuck")?;

    let restarted_campaign_ids =
        scheduler::check_stuck(db.get_ref(), &dispatcher, dispatcher.clock()).await?;

    Ok(Json(CheckStuckBody {
        restarted_campaign_ids,
    }))
}
