use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use mongodb::options::FindOptions;
use mongodb::{bson, Database};

use crate::database::MongoCampaignStore;
use crate::error::Error;

use super::{Campaign, CampaignId, CampaignStatus, Channel};

const CAMPAIGNS: &str = "campaigns";

pub async fn initialize(db: &Database) -> Result<(), Error> {
    db.run_command(
        bson::doc! {
            "createIndexes": CAMPAIGNS,
            "indexes": [
                { "key": { "status": 1, "scheduled_time": 1 }, "name": "by_status" },
                { "key": { "channel": 1, "message": 1 }, "name": "by_channel_and_message" },
            ]
        },
        None,
    )
    .await?;

    Ok(())
}

#[async_trait]
pub trait CampaignStore: Send + Sync {
    async fn insert_campaign(&self, campaign: &Campaign) -> Result<(), Error>;

    async fn fetch_campaigns(&self) -> Result<Vec<Campaign>, Error>;

    async fn fetch_campaign_by_id(
        &self,
        campaign_id: CampaignId,
    ) -> Result<Option<Campaign>, Error>;

    /// Content/targeting rewrite for a pristine draft. Guarded upstream by
    /// the editability rule; guarded here against concurrent writers.
    async fn update_campaign_details(&self, campaign: Campaign) -> Result<Campaign, Error>;

    async fn update_campaign_status(
        &self,
        campaign: Campaign,
        status: CampaignStatus,
    ) -> Result<Campaign, Error>;

    async fn update_campaign_schedule(
        &self,
        campaign: Campaign,
        scheduled_time: DateTime<Utc>,
    ) -> Result<Campaign, Error>;

    /// Draft/Scheduled -> Sending with a fresh recipient count and zeroed
    /// outcome counters.
    async fn begin_campaign_send(
        &self,
        campaign: Campaign,
        total_recipients: i64,
        sent_at: DateTime<Utc>,
    ) -> Result<Campaign, Error>;

    /// Completed/Failed -> Sending for a retry cycle. The failed counter
    /// drops by the number of recipients getting a fresh attempt so the
    /// derived pending count matches the new Pending records.
    async fn reopen_campaign_for_retry(
        &self,
        campaign: Campaign,
        retried: i64,
    ) -> Result<Campaign, Error>;

    /// Commutative counter bump; correct under any completion order.
    async fn increment_delivery_counters(
        &self,
        campaign_id: CampaignId,
        successes: i64,
        failures: i64,
    ) -> Result<(), Error>;

    async fn fetch_due_scheduled(&self, now: DateTime<Utc>) -> Result<Vec<Campaign>, Error>;

    async fn fetch_campaigns_by_status(
        &self,
        status: CampaignStatus,
    ) -> Result<Vec<Campaign>, Error>;

    async fn fetch_campaigns_by_channel_and_message(
        &self,
        channel: Channel,
        message: &str,
    ) -> Result<Vec<Campaign>, Error>;

    async fn delete_campaign(&self, campaign_id: CampaignId) -> Result<(), Error>;
}

#[async_trait]
impl CampaignStore for MongoCampaignStore {
    #[tracing::instrument(skip(self))]
    async fn insert_campaign(&self, campaign: &Campaign) -> Result<(), Error> {
        self.insert_one(campaign, None).await?;

        Ok(())
    }

    #[tracing::instrument(skip(self))]
    async fn fetch_campaigns(&self) -> Result<Vec<Campaign>, Error> {
        let options = FindOptions::builder()
            .sort(bson::doc! { "created_at": -1 })
            .build();

        let campaigns: Vec<Campaign> = self
            .find(bson::doc! {}, options)
            .await?
            .try_collect()
            .await?;

        Ok(campaigns)
    }

    #[tracing::instrument(skip(self))]
    async fn fetch_campaign_by_id(
        &self,
        campaign_id: CampaignId,
    ) -> Result<Option<Campaign>, Error> {
        let campaign: Option<Campaign> =
            self.find_one(bson::doc! { "_id": campaign_id }, None).await?;

        Ok(campaign)
    }

    #[tracing::instrument(skip(self, campaign))]
    async fn update_campaign_details(&self, mut campaign: Campaign) -> Result<Campaign, Error> {
        let now = Utc::now();
        let old_modified_at = bson::DateTime::from_chrono(campaign.modified_at);
        let new_modified_at = bson::DateTime::from_chrono(now);
        let new_audience = bson::to_bson(&campaign.audience)?;
        let new_recording = bson::to_bson(&campaign.voice_recording_id)?;
        let new_email = bson::to_bson(&campaign.email)?;
        let new_calling_hours = bson::to_bson(&campaign.calling_hours)?;

        let result = self
            .update_one(
                bson::doc! { "_id": campaign.id, "modified_at": old_modified_at },
                bson::doc! { "$set": {
                    "name": &campaign.name,
                    "message": &campaign.message,
                    "channel": campaign.channel,
                    "audience": new_audience,
                    "voice_recording_id": new_recording,
                    "email": new_email,
                    "calling_hours": new_calling_hours,
                    "prevent_duplicate_messages": campaign.prevent_duplicate_messages,
                    "modified_at": new_modified_at,
                } },
                None,
            )
            .await?;

        if result.matched_count == 0 {
            return Err(Error::ConcurrentModificationDetected);
        }

        campaign.modified_at = now;

        Ok(campaign)
    }

    #[tracing::instrument(skip(self, campaign))]
    async fn update_campaign_status(
        &self,
        mut campaign: Campaign,
        status: CampaignStatus,
    ) -> Result<Campaign, Error> {
        let now = Utc::now();
        let old_modified_at = bson::DateTime::from_chrono(campaign.modified_at);
        let new_modified_at = bson::DateTime::from_chrono(now);

        let result = self
            .update_one(
                bson::doc! { "_id": campaign.id, "modified_at": old_modified_at },
                bson::doc! { "$set": { "status": status, "modified_at": new_modified_at } },
                None,
            )
            .await?;

        if result.matched_count == 0 {
            return Err(Error::ConcurrentModificationDetected);
        }

        campaign.modified_at = now;
        campaign.status = status;

        Ok(campaign)
    }

    #[tracing::instrument(skip(self, campaign))]
    async fn update_campaign_schedule(
        &self,
        mut campaign: Campaign,
        scheduled_time: DateTime<Utc>,
    ) -> Result<Campaign, Error> {
        let now = Utc::now();
        let old_modified_at = bson::DateTime::from_chrono(campaign.modified_at);
        let new_modified_at = bson::DateTime::from_chrono(now);
        let new_scheduled_time = bson::DateTime::from_chrono(scheduled_time);

        let result = self
            .update_one(
                bson::doc! { "_id": campaign.id, "modified_at": old_modified_at },
                bson::doc! { "$set": {
                    "status": CampaignStatus::Scheduled,
                    "scheduled_time": new_scheduled_time,
                    "modified_at": new_modified_at,
                } },
                None,
            )
            .await?;

        if result.matched_count == 0 {
            return Err(Error::ConcurrentModificationDetected);
        }

        campaign.modified_at = now;
        campaign.status = CampaignStatus::Scheduled;
        campaign.scheduled_time = Some(scheduled_time);

        Ok(campaign)
    }

    #[tracing::instrument(skip(self, campaign))]
    async fn begin_campaign_send(
        &self,
        mut campaign: Campaign,
        total_recipients: i64,
        sent_at: DateTime<Utc>,
    ) -> Result<Campaign, Error> {
        let now = Utc::now();
        let old_modified_at = bson::DateTime::from_chrono(campaign.modified_at);
        let new_modified_at = bson::DateTime::from_chrono(now);
        let new_sent_at = bson::DateTime::from_chrono(sent_at);

        let result = self
            .update_one(
                bson::doc! { "_id": campaign.id, "modified_at": old_modified_at },
                bson::doc! { "$set": {
                    "status": CampaignStatus::Sending,
                    "total_recipients": total_recipients,
                    "successful_deliveries": 0i64,
                    "failed_deliveries": 0i64,
                    "sent_at": new_sent_at,
                    "modified_at": new_modified_at,
                } },
                None,
            )
            .await?;

        if result.matched_count == 0 {
            return Err(Error::ConcurrentModificationDetected);
        }

        campaign.modified_at = now;
        campaign.status = CampaignStatus::Sending;
        campaign.total_recipients = total_recipients;
        campaign.successful_deliveries = 0;
        campaign.failed_deliveries = 0;
        campaign.sent_at = Some(sent_at);

        Ok(campaign)
    }

    #[tracing::instrument(skip(self, campaign))]
    async fn reopen_campaign_for_retry(
        &self,
        mut campaign: Campaign,
        retried: i64,
    ) -> Result<Campaign, Error> {
        let now = Utc::now();
        let old_modified_at = bson::DateTime::from_chrono(campaign.modified_at);
        let new_modified_at = bson::DateTime::from_chrono(now);
        let new_failed = campaign.failed_deliveries - retried;

        let result = self
            .update_one(
                bson::doc! { "_id": campaign.id, "modified_at": old_modified_at },
                bson::doc! { "$set": {
                    "status": CampaignStatus::Sending,
                    "failed_deliveries": new_failed,
                    "modified_at": new_modified_at,
                } },
                None,
            )
            .await?;

        if result.matched_count == 0 {
            return Err(Error::ConcurrentModificationDetected);
        }

        campaign.modified_at = now;
        campaign.status = CampaignStatus::Sending;
        campaign.failed_deliveries = new_failed;

        Ok(campaign)
    }

    #[tracing::instrument(skip(self))]
    async fn increment_delivery_counters(
        &self,
        campaign_id: CampaignId,
        successes: i64,
        failures: i64,
    ) -> Result<(), Error> {
        self.update_one(
            bson::doc! { "_id": campaign_id },
            bson::doc! { "$inc": {
                "successful_deliveries": successes,
                "failed_deliveries": failures,
            } },
            None,
        )
        .await?;

        Ok(())
    }

    #[tracing::instrument(skip(self))]
    async fn fetch_due_scheduled(&self, now: DateTime<Utc>) -> Result<Vec<Campaign>, Error> {
        let cutoff = bson::DateTime::from_chrono(now);

        let campaigns: Vec<Campaign> = self
            .find(
                bson::doc! {
                    "status": CampaignStatus::Scheduled,
                    "scheduled_time": { "$lte": cutoff },
                },
                None,
            )
            .await?
            .try_collect()
            .await?;

        Ok(campaigns)
    }

    #[tracing::instrument(skip(self))]
    async fn fetch_campaigns_by_status(
        &self,
        status: CampaignStatus,
    ) -> Result<Vec<Campaign>, Error> {
        let campaigns: Vec<Campaign> = self
            .find(bson::doc! { "status": status }, None)
            .await?
            .try_collect()
            .await?;

        Ok(campaigns)
    }

    #[tracing::instrument(skip(self))]
    async fn fetch_campaigns_by_channel_and_message(
        &self,
        channel: Channel,
        message: &str,
    ) -> Result<Vec<Campaign>, Error> {
        let campaigns: Vec<Campaign> = self
            .find(bson::doc! { "channel": channel, "message": message }, None)
            .await?
            .try_collect()
            .await?;

        Ok(campaigns)
    }

    #[tracing::instrument(skip(self))]
    async fn delete_campaign(&self, campaign_id: CampaignId) -> Result<(), Error> {
        self.delete_one(bson::doc! { "_id": campaign_id }, None)
            .await?;

        Ok(())
    }
}
