use std::collections::{BTreeMap, HashSet};

use chrono::{DateTime, Utc};
use tracing::warn;

use crate::actor::Actor;
use crate::audience;
use crate::clock::Clock;
use crate::database::Database;
use crate::delivery::{DeliveryRecord, DeliveryStatus};
use crate::error::Error;
use crate::recording::VoiceRecordingId;
use crate::voter::VoterId;

use super::{
    AudienceFilter, CallingHours, Campaign, CampaignId, CampaignStatus, Channel, EmailContent,
    MESSAGE_MAX_LENGTH,
};

/// Validated command payload for create/update.
#[derive(Clone, Debug)]
pub struct CampaignDraft {
    pub name: String,
    pub message: String,
    pub channel: Channel,
    pub audience: AudienceFilter,
    pub voice_recording_id: Option<VoiceRecordingId>,
    pub email: Option<EmailContent>,
    pub calling_hours: CallingHours,
    pub prevent_duplicate_messages: bool,
}

impl CampaignDraft {
    fn from_campaign(campaign: &Campaign) -> CampaignDraft {
        CampaignDraft {
            name: campaign.name.clone(),
            message: campaign.message.clone(),
            channel: campaign.channel,
            audience: campaign.audience.clone(),
            voice_recording_id: campaign.voice_recording_id,
            email: campaign.email.clone(),
            calling_hours: campaign.calling_hours,
            prevent_duplicate_messages: campaign.prevent_duplicate_messages,
        }
    }
}

#[tracing::instrument(skip(db, draft))]
pub async fn create_campaign(
    db: &dyn Database,
    actor: &Actor,
    draft: CampaignDraft,
) -> Result<Campaign, Error> {
    validate_draft(db, &draft).await?;

    let now = Utc::now();
    let campaign = Campaign {
        id: CampaignId::new(),
        name: draft.name,
        message: draft.message,
        channel: draft.channel,
        status: CampaignStatus::Draft,
        scheduled_time: None,
        created_at: now,
        modified_at: now,
        sent_at: None,
        created_by: actor.id,
        audience: draft.audience,
        voice_recording_id: draft.voice_recording_id,
        email: draft.email,
        calling_hours: draft.calling_hours,
        prevent_duplicate_messages: draft.prevent_duplicate_messages,
        total_recipients: 0,
        successful_deliveries: 0,
        failed_deliveries: 0,
    };

    db.campaigns().insert_campaign(&campaign).await?;

    Ok(campaign)
}

#[tracing::instrument(skip(db, draft))]
pub async fn update_campaign(
    db: &dyn Database,
    actor: &Actor,
    campaign_id: CampaignId,
    draft: CampaignDraft,
) -> Result<Campaign, Error> {
    let campaign = assert_campaign_exists(db, campaign_id).await?;

    if !actor.owns_or_super_admin(campaign.created_by) {
        return Err(Error::NotAuthorized { action: "update" });
    }
    if !campaign.is_pristine_draft() {
        return Err(Error::CampaignNotEditable { campaign_id });
    }

    validate_draft(db, &draft).await?;

    let updated = Campaign {
        name: draft.name,
        message: draft.message,
        channel: draft.channel,
        audience: draft.audience,
        voice_recording_id: draft.voice_recording_id,
        email: draft.email,
        calling_hours: draft.calling_hours,
        prevent_duplicate_messages: draft.prevent_duplicate_messages,
        ..campaign
    };

    db.campaigns().update_campaign_details(updated).await
}

#[tracing::instrument(skip(db))]
pub async fn delete_campaign(
    db: &dyn Database,
    actor: &Actor,
    campaign_id: CampaignId,
) -> Result<(), Error> {
    let campaign = assert_campaign_exists(db, campaign_id).await?;

    if matches!(
        campaign.status,
        CampaignStatus::Sending | CampaignStatus::Sealed
    ) {
        return Err(Error::InvalidStatusTransition {
            campaign_id,
            status: campaign.status,
            action: "delete",
        });
    }
    if campaign.total_recipients != 0 && !actor.owns_or_super_admin(campaign.created_by) {
        return Err(Error::NotAuthorized { action: "delete" });
    }

    db.deliveries()
        .delete_deliveries_by_campaign(campaign_id)
        .await?;
    db.campaigns().delete_campaign(campaign_id).await?;

    Ok(())
}

#[tracing::instrument(skip(db))]
pub async fn get_campaigns(db: &dyn Database) -> Result<Vec<Campaign>, Error> {
    let campaigns = db.campaigns().fetch_campaigns().await?;

    Ok(campaigns)
}

#[tracing::instrument(skip(db))]
pub async fn get_campaign_by_id(
    db: &dyn Database,
    campaign_id: CampaignId,
) -> Result<Campaign, Error> {
    assert_campaign_exists(db, campaign_id).await
}

/// Draft -> Sending on an explicit send command. The audience resolves
/// here; an empty result rejects the command and leaves the draft alone.
#[tracing::instrument(skip(db, clock))]
pub async fn send_campaign(
    db: &dyn Database,
    clock: &dyn Clock,
    actor: &Actor,
    campaign_id: CampaignId,
) -> Result<Campaign, Error> {
    actor.require_super_admin("send")?;
    let campaign = assert_campaign_exists(db, campaign_id).await?;

    if campaign.status != CampaignStatus::Draft {
        return Err(Error::InvalidStatusTransition {
            campaign_id,
            status: campaign.status,
            action: "send",
        });
    }

    validate_draft(db, &CampaignDraft::from_campaign(&campaign)).await?;

    let recipients = audience::resolve(
        db,
        &campaign.audience,
        campaign.channel,
        &campaign.message,
        campaign.prevent_duplicate_messages,
    )
    .await?;
    if recipients.is_empty() {
        return Err(Error::AudienceResolvedEmpty { campaign_id });
    }

    materialize_send(db, clock, campaign, recipients).await
}

/// Scheduled -> Sending when the scheduler releases a due campaign. Unlike
/// the interactive path, an empty audience marks the campaign Failed so it
/// cannot sit Scheduled forever.
#[tracing::instrument(skip(db, clock, campaign))]
pub async fn begin_scheduled_send(
    db: &dyn Database,
    clock: &dyn Clock,
    campaign: Campaign,
) -> Result<Campaign, Error> {
    let campaign_id = campaign.id;
    if campaign.status != CampaignStatus::Scheduled {
        return Err(Error::InvalidStatusTransition {
            campaign_id,
            status: campaign.status,
            action: "scheduled-send",
        });
    }

    let recipients = audience::resolve(
        db,
        &campaign.audience,
        campaign.channel,
        &campaign.message,
        campaign.prevent_duplicate_messages,
    )
    .await?;
    if recipients.is_empty() {
        warn!(%campaign_id, "scheduled campaign resolved to zero recipients, marking failed");
        db.campaigns()
            .update_campaign_status(campaign, CampaignStatus::Failed)
            .await?;
        return Err(Error::AudienceResolvedEmpty { campaign_id });
    }

    materialize_send(db, clock, campaign, recipients).await
}

async fn materialize_send(
    db: &dyn Database,
    clock: &dyn Clock,
    campaign: Campaign,
    recipients: Vec<audience::Recipient>,
) -> Result<Campaign, Error> {
    let now = clock.now();
    let campaign = db
        .campaigns()
        .begin_campaign_send(campaign, recipients.len() as i64, now)
        .await?;

    let records: Vec<DeliveryRecord> = recipients
        .into_iter()
        .map(|recipient| {
            DeliveryRecord::pending(campaign.id, recipient.voter_id, recipient.address, now)
        })
        .collect();
    db.deliveries().insert_deliveries(&records).await?;

    Ok(campaign)
}

#[tracing::instrument(skip(db, clock))]
pub async fn schedule_campaign(
    db: &dyn Database,
    clock: &dyn Clock,
    actor: &Actor,
    campaign_id: CampaignId,
    scheduled_time: DateTime<Utc>,
) -> Result<Campaign, Error> {
    actor.require_super_admin("schedule")?;
    let campaign = assert_campaign_exists(db, campaign_id).await?;

    if campaign.status != CampaignStatus::Draft {
        return Err(Error::InvalidStatusTransition {
            campaign_id,
            status: campaign.status,
            action: "schedule",
        });
    }
    if scheduled_time <= clock.now() {
        return Err(Error::ScheduledTimeNotInFuture { scheduled_time });
    }

    validate_draft(db, &CampaignDraft::from_campaign(&campaign)).await?;

    db.campaigns()
        .update_campaign_schedule(campaign, scheduled_time)
        .await
}

#[tracing::instrument(skip(db))]
pub async fn cancel_campaign(
    db: &dyn Database,
    actor: &Actor,
    campaign_id: CampaignId,
) -> Result<Campaign, Error> {
    actor.require_super_admin("cancel")?;
    let campaign = assert_campaign_exists(db, campaign_id).await?;

    if campaign.status != CampaignStatus::Scheduled {
        return Err(Error::InvalidStatusTransition {
            campaign_id,
            status: campaign.status,
            action: "cancel",
        });
    }

    db.campaigns()
        .update_campaign_status(campaign, CampaignStatus::Cancelled)
        .await
}

/// Hard abort: no drain, no further attempts. Status flips first so a live
/// worker stops at its next batch boundary, then the remaining Pending
/// records are failed in bulk.
#[tracing::instrument(skip(db, clock))]
pub async fn force_stop_campaign(
    db: &dyn Database,
    clock: &dyn Clock,
    actor: &Actor,
    campaign_id: CampaignId,
) -> Result<Campaign, Error> {
    actor.require_super_admin("force-stop")?;
    let campaign = assert_campaign_exists(db, campaign_id).await?;

    if campaign.status != CampaignStatus::Sending {
        return Err(Error::InvalidStatusTransition {
            campaign_id,
            status: campaign.status,
            action: "force-stop",
        });
    }

    db.campaigns()
        .update_campaign_status(campaign, CampaignStatus::Failed)
        .await?;

    let failed = db
        .deliveries()
        .fail_pending_deliveries(campaign_id, clock.now(), "delivery aborted by force stop")
        .await?;
    if failed > 0 {
        db.campaigns()
            .increment_delivery_counters(campaign_id, 0, failed)
            .await?;
    }

    assert_campaign_exists(db, campaign_id).await
}

/// Re-attempt exactly the recipients whose latest record is Failed. The
/// failed counter drops by the retried count, so the derived pending count
/// matches the fresh Pending records. Returns the reopened campaign; the
/// caller starts the cycle.
#[tracing::instrument(skip(db, clock))]
pub async fn retry_failed_deliveries(
    db: &dyn Database,
    clock: &dyn Clock,
    actor: &Actor,
    campaign_id: CampaignId,
    override_opt_outs: bool,
) -> Result<Campaign, Error> {
    actor.require_super_admin("retry-failed")?;
    let campaign = assert_campaign_exists(db, campaign_id).await?;

    if !matches!(
        campaign.status,
        CampaignStatus::Completed | CampaignStatus::Failed
    ) {
        return Err(Error::InvalidStatusTransition {
            campaign_id,
            status: campaign.status,
            action: "retry-failed",
        });
    }
    if campaign.failed_deliveries <= 0 {
        return Err(Error::NoFailedDeliveries { campaign_id });
    }

    let deliveries = db
        .deliveries()
        .fetch_deliveries_by_campaign(campaign_id)
        .await?;
    let mut latest: BTreeMap<VoterId, DeliveryRecord> = BTreeMap::new();
    for record in deliveries {
        let newer = latest
            .get(&record.voter_id)
            .map_or(true, |existing| existing.created_at <= record.created_at);
        if newer {
            latest.insert(record.voter_id, record);
        }
    }
    let mut targets: Vec<(VoterId, String)> = latest
        .into_values()
        .filter(|record| record.status == DeliveryStatus::Failed)
        .map(|record| (record.voter_id, record.address))
        .collect();

    if campaign.channel.honors_opt_out_registry() {
        let suppressed: HashSet<String> = db
            .opt_outs()
            .fetch_opt_outs_by_scopes(campaign.channel.opt_out_scopes())
            .await?
            .into_iter()
            .map(|opt_out| opt_out.phone_number)
            .collect();

        if override_opt_outs {
            if !suppressed.is_empty() {
                // TCPA-style legal override: explicit, privileged, audited.
                warn!(
                    %campaign_id,
                    suppressed = suppressed.len(),
                    "retry bypassing the opt-out registry by operator override"
                );
            }
        } else {
            targets.retain(|(_, address)| !suppressed.contains(address));
        }
    }

    if targets.is_empty() {
        return Err(Error::AudienceResolvedEmpty { campaign_id });
    }

    let now = clock.now();
    let records: Vec<DeliveryRecord> = targets
        .into_iter()
        .map(|(voter_id, address)| DeliveryRecord::pending(campaign_id, voter_id, address, now))
        .collect();

    // Records land before the status flips so the reconciliation sweep can
    // never observe a Sending campaign with no work.
    db.deliveries().insert_deliveries(&records).await?;
    db.campaigns()
        .reopen_campaign_for_retry(campaign, records.len() as i64)
        .await
}

/// Clone content and targeting into a fresh pristine draft owned by the
/// caller, independent of the source campaign's history.
#[tracing::instrument(skip(db))]
pub async fn duplicate_campaign(
    db: &dyn Database,
    actor: &Actor,
    campaign_id: CampaignId,
) -> Result<Campaign, Error> {
    let source = assert_campaign_exists(db, campaign_id).await?;

    let now = Utc::now();
    let copy = Campaign {
        id: CampaignId::new(),
        name: format!("{} (copy)", source.name),
        message: source.message,
        channel: source.channel,
        status: CampaignStatus::Draft,
        scheduled_time: None,
        created_at: now,
        modified_at: now,
        sent_at: None,
        created_by: actor.id,
        audience: source.audience,
        voice_recording_id: source.voice_recording_id,
        email: source.email,
        calling_hours: source.calling_hours,
        prevent_duplicate_messages: source.prevent_duplicate_messages,
        total_recipients: 0,
        successful_deliveries: 0,
        failed_deliveries: 0,
    };

    db.campaigns().insert_campaign(&copy).await?;

    Ok(copy)
}

#[tracing::instrument(skip(db, message))]
pub async fn preview_recipient_count(
    db: &dyn Database,
    filter: &AudienceFilter,
    channel: Channel,
    message: &str,
    prevent_duplicates: bool,
) -> Result<usize, Error> {
    audience::preview_count(db, filter, channel, message, prevent_duplicates).await
}

pub async fn assert_campaign_exists(
    db: &dyn Database,
    campaign_id: CampaignId,
) -> Result<Campaign, Error> {
    db.campaigns()
        .fetch_campaign_by_id(campaign_id)
        .await?
        .ok_or(Error::CampaignNotFound { campaign_id })
}

async fn validate_draft(db: &dyn Database, draft: &CampaignDraft) -> Result<(), Error> {
    if draft.name.trim().is_empty() {
        return Err(Error::CampaignNameEmpty);
    }

    match draft.channel {
        Channel::Sms => validate_message(&draft.message, Channel::Sms)?,
        Channel::RoboCall => match draft.voice_recording_id {
            Some(recording_id) => {
                db.recordings()
                    .fetch_recording_by_id(recording_id)
                    .await?
                    .ok_or(Error::VoiceRecordingNotFound { recording_id })?;
            }
            None => validate_message(&draft.message, Channel::RoboCall)?,
        },
        Channel::Email => {
            let email = draft.email.as_ref().ok_or(Error::EmailContentMissing)?;
            if email.subject.trim().is_empty() || email.html_content.trim().is_empty() {
                return Err(Error::EmailContentMissing);
            }
        }
    }

    if draft.audience.is_empty() {
        return Err(Error::AudienceFilterEmpty);
    }
    for tag_id in &draft.audience.tag_ids {
        db.tags()
            .fetch_tag_by_id(*tag_id)
            .await?
            .ok_or(Error::TagNotFound { tag_id: *tag_id })?;
    }

    let hours = &draft.calling_hours;
    if hours.enforce && (hours.start_hour >= hours.end_hour || hours.end_hour > 24) {
        return Err(Error::InvalidCallingHours {
            start_hour: hours.start_hour,
            end_hour: hours.end_hour,
        });
    }

    Ok(())
}

fn validate_message(message: &str, channel: Channel) -> Result<(), Error> {
    if message.trim().is_empty() {
        return Err(Error::MessageEmpty { channel });
    }
    let length = message.chars().count();
    if length > MESSAGE_MAX_LENGTH {
        return Err(Error::MessageTooLong {
            length,
            maximum: MESSAGE_MAX_LENGTH,
        });
    }
    Ok(())
}
