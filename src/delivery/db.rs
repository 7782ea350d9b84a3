use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use mongodb::options::FindOptions;
use mongodb::{bson, Database};

use crate::campaign::CampaignId;
use crate::database::MongoDeliveryStore;
use crate::error::Error;
use crate::voter::VoterId;

use super::{DeliveryRecord, DeliveryStatus};

const DELIVERIES: &str = "deliveries";

pub async fn initialize(db: &Database) -> Result<(), Error> {
    db.run_command(
        bson::doc! {
            "createIndexes": DELIVERIES,
            "indexes": [
                { "key": { "campaign_id": 1, "status": 1 }, "name": "by_campaign_and_status" },
                { "key": { "campaign_id": 1, "created_at": 1 }, "name": "by_campaign_id" },
            ]
        },
        None,
    )
    .await?;

    Ok(())
}

#[async_trait]
pub trait DeliveryStore: Send + Sync {
    async fn insert_deliveries(&self, deliveries: &[DeliveryRecord]) -> Result<(), Error>;

    async fn fetch_deliveries_by_campaign(
        &self,
        campaign_id: CampaignId,
    ) -> Result<Vec<DeliveryRecord>, Error>;

    async fn fetch_pending_batch(
        &self,
        campaign_id: CampaignId,
        limit: i64,
    ) -> Result<Vec<DeliveryRecord>, Error>;

    /// Compare-and-set: Pending -> Sent. Returns None if the record was no
    /// longer Pending (a concurrent force-stop got there first), in which
    /// case the caller must not count the delivery.
    async fn mark_delivery_sent(
        &self,
        delivery: DeliveryRecord,
        attempted_at: DateTime<Utc>,
    ) -> Result<Option<DeliveryRecord>, Error>;

    /// Compare-and-set: Pending -> Failed, capturing the provider detail.
    async fn mark_delivery_failed(
        &self,
        delivery: DeliveryRecord,
        attempted_at: DateTime<Utc>,
        error_detail: String,
    ) -> Result<Option<DeliveryRecord>, Error>;

    /// Force-stop path: flip every remaining Pending record to Failed in
    /// one sweep. Returns how many records were flipped.
    async fn fail_pending_deliveries(
        &self,
        campaign_id: CampaignId,
        attempted_at: DateTime<Utc>,
        error_detail: &str,
    ) -> Result<i64, Error>;

    /// Voters with a Sent record in any of the given campaigns; backs
    /// duplicate-message suppression.
    async fn fetch_sent_voter_ids(
        &self,
        campaign_ids: &[CampaignId],
    ) -> Result<Vec<VoterId>, Error>;

    async fn delete_deliveries_by_campaign(&self, campaign_id: CampaignId) -> Result<(), Error>;
}

#[async_trait]
impl DeliveryStore for MongoDeliveryStore {
    #[tracing::instrument(skip(self, deliveries))]
    async fn insert_deliveries(&self, deliveries: &[DeliveryRecord]) -> Result<(), Error> {
        if deliveries.is_empty() {
            return Ok(());
        }
        self.insert_many(deliveries, None).await?;

        Ok(())
    }

    #[tracing::instrument(skip(self))]
    async fn fetch_deliveries_by_campaign(
        &self,
        campaign_id: CampaignId,
    ) -> Result<Vec<DeliveryRecord>, Error> {
        let options = FindOptions::builder()
            .sort(bson::doc! { "created_at": 1 })
            .build();

        let deliveries: Vec<DeliveryRecord> = self
            .find(bson::doc! { "campaign_id": campaign_id }, options)
            .await?
            .try_collect()
            .await?;

        Ok(deliveries)
    }

    #[tracing::instrument(skip(self))]
    async fn fetch_pending_batch(
        &self,
        campaign_id: CampaignId,
        limit: i64,
    ) -> Result<Vec<DeliveryRecord>, Error> {
        let options = FindOptions::builder()
            .sort(bson::doc! { "created_at": 1 })
            .limit(limit)
            .build();

        let deliveries: Vec<DeliveryRecord> = self
            .find(
                bson::doc! {
                    "campaign_id": campaign_id,
                    "status": DeliveryStatus::Pending,
                },
                options,
            )
            .await?
            .try_collect()
            .await?;

        Ok(deliveries)
    }

    #[tracing::instrument(skip(self))]
    async fn mark_delivery_sent(
        &self,
        mut delivery: DeliveryRecord,
        attempted_at: DateTime<Utc>,
    ) -> Result<Option<DeliveryRecord>, Error> {
        let timestamp = bson::DateTime::from_chrono(attempted_at);

        let result = self
            .update_one(
                bson::doc! { "_id": delivery.id, "status": DeliveryStatus::Pending },
                bson::doc! { "$set": {
                    "status": DeliveryStatus::Sent,
                    "attempted_at": timestamp,
                    "modified_at": timestamp,
                } },
                None,
            )
            .await?;

        if result.matched_count == 0 {
            return Ok(None);
        }

        delivery.status = DeliveryStatus::Sent;
        delivery.attempted_at = Some(attempted_at);
        delivery.modified_at = attempted_at;

        Ok(Some(delivery))
    }

    #[tracing::instrument(skip(self))]
    async fn mark_delivery_failed(
        &self,
        mut delivery: DeliveryRecord,
        attempted_at: DateTime<Utc>,
        error_detail: String,
    ) -> Result<Option<DeliveryRecord>, Error> {
        let timestamp = bson::DateTime::from_chrono(attempted_at);

        let result = self
            .update_one(
                bson::doc! { "_id": delivery.id, "status": DeliveryStatus::Pending },
                bson::doc! { "$set": {
                    "status": DeliveryStatus::Failed,
                    "attempted_at": timestamp,
                    "modified_at": timestamp,
                    "error_detail": &error_detail,
                } },
                None,
            )
            .await?;

        if result.matched_count == 0 {
            return Ok(None);
        }

        delivery.status = DeliveryStatus::Failed;
        delivery.attempted_at = Some(attempted_at);
        delivery.modified_at = attempted_at;
        delivery.error_detail = Some(error_detail);

        Ok(Some(delivery))
    }

    #[tracing::instrument(skip(self))]
    async fn fail_pending_deliveries(
        &self,
        campaign_id: CampaignId,
        attempted_at: DateTime<Utc>,
        error_detail: &str,
    ) -> Result<i64, Error> {
        let timestamp = bson::DateTime::from_chrono(attempted_at);

        let result = self
            .update_many(
                bson::doc! {
                    "campaign_id": campaign_id,
                    "status": DeliveryStatus::Pending,
                },
                bson::doc! { "$set": {
                    "status": DeliveryStatus::Failed,
                    "attempted_at": timestamp,
                    "modified_at": timestamp,
                    "error_detail": error_detail,
                } },
                None,
            )
            .await?;

        Ok(result.modified_count as i64)
    }

    #[tracing::instrument(skip(self))]
    async fn fetch_sent_voter_ids(
        &self,
        campaign_ids: &[CampaignId],
    ) -> Result<Vec<VoterId>, Error> {
        if campaign_ids.is_empty() {
            return Ok(vec![]);
        }

        let ids: Vec<bson::Bson> = campaign_ids.iter().map(|id| (*id).into()).collect();

        let deliveries: Vec<DeliveryRecord> = self
            .find(
                bson::doc! {
                    "campaign_id": { "$in": ids },
                    "status": DeliveryStatus::Sent,
                },
                None,
            )
            .await?
            .try_collect()
            .await?;

        Ok(deliveries.into_iter().map(|d| d.voter_id).collect())
    }

    #[tracing::instrument(skip(self))]
    async fn delete_deliveries_by_campaign(&self, campaign_id: CampaignId) -> Result<(), Error> {
        self.delete_many(bson::doc! { "campaign_id": campaign_id }, None)
            .await?;

        Ok(())
    }
}
