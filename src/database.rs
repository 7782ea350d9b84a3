use mongodb::{Collection, Database as MongoDb};

use crate::campaign::db::CampaignStore;
use crate::campaign::Campaign;
use crate::delivery::db::DeliveryStore;
use crate::delivery::DeliveryRecord;
use crate::error::Error;
use crate::optout::db::OptOutStore;
use crate::optout::OptOutRecord;
use crate::recording::db::RecordingStore;
use crate::recording::VoiceRecording;
use crate::tag::db::TagStore;
use crate::tag::Tag;
use crate::voter::db::VoterStore;
use crate::voter::Voter;

pub type MongoCampaignStore = Collection<Campaign>;
pub type MongoDeliveryStore = Collection<DeliveryRecord>;
pub type MongoVoterStore = Collection<Voter>;
pub type MongoOptOutStore = Collection<OptOutRecord>;
pub type MongoTagStore = Collection<Tag>;
pub type MongoRecordingStore = Collection<VoiceRecording>;

/// Aggregated storage handle the managers, dispatcher, and scheduler work
/// against. Everything behind it is swappable in tests.
pub trait Database: Send + Sync {
    fn campaigns(&self) -> &dyn CampaignStore;
    fn deliveries(&self) -> &dyn DeliveryStore;
    fn voters(&self) -> &dyn VoterStore;
    fn opt_outs(&self) -> &dyn OptOutStore;
    fn tags(&self) -> &dyn TagStore;
    fn recordings(&self) -> &dyn RecordingStore;
}

#[derive(Clone, Debug)]
pub struct MongoDatabase {
    campaigns: MongoCampaignStore,
    deliveries: MongoDeliveryStore,
    voters: MongoVoterStore,
    opt_outs: MongoOptOutStore,
    tags: MongoTagStore,
    recordings: MongoRecordingStore,
    db: MongoDb,
}

impl MongoDatabase {
    pub async fn initialize(db: MongoDb) -> Result<MongoDatabase, Error> {
        crate::campaign::db::initialize(&db).await?;
        crate::delivery::db::initialize(&db).await?;
        crate::voter::db::initialize(&db).await?;
        crate::optout::db::initialize(&db).await?;

        Ok(MongoDatabase {
            campaigns: db.collection("campaigns"),
            deliveries: db.collection("deliveries"),
            voters: db.collection("voters"),
            opt_outs: db.collection("opt_outs"),
            tags: db.collection("tags"),
            recordings: db.collection("recordings"),
            db,
        })
    }

    pub async fn drop(&self) -> Result<(), Error> {
        self.db.drop(None).await?;
        Ok(())
    }
}

impl Database for MongoDatabase {
    fn campaigns(&self) -> &dyn CampaignStore {
        &self.campaigns
    }

    fn deliveries(&self) -> &dyn DeliveryStore {
        &self.deliveries
    }

    fn voters(&self) -> &dyn VoterStore {
        &self.voters
    }

    fn opt_outs(&self) -> &dyn OptOutStore {
        &self.opt_outs
    }

    fn tags(&self) -> &dyn TagStore {
        &self.tags
    }

    fn recordings(&self) -> &dyn RecordingStore {
        &self.recordings
    }
}

#[cfg(test)]
pub mod test {
    use std::sync::Mutex;

    use async_trait::async_trait;
    use chrono::{DateTime, Utc};

    use crate::campaign::{CampaignId, CampaignStatus, Channel};
    use crate::delivery::DeliveryStatus;
    use crate::optout::OptOutScope;
    use crate::recording::VoiceRecordingId;
    use crate::tag::TagId;
    use crate::voter::VoterId;

    use super::*;

    // Closure-backed doubles for unit tests that assert on exactly which
    // store calls a manager makes.

    pub struct MockDatabase {
        pub campaigns: MockCampaignStore,
        pub deliveries: MockDeliveryStore,
        pub voters: MockVoterStore,
        pub opt_outs: MockOptOutStore,
        pub tags: MockTagStore,
        pub recordings: MockRecordingStore,
    }

    impl MockDatabase {
        pub fn new() -> MockDatabase {
            MockDatabase {
                campaigns: MockCampaignStore::new(),
                deliveries: MockDeliveryStore::new(),
                voters: MockVoterStore::new(),
                opt_outs: MockOptOutStore::new(),
                tags: MockTagStore::new(),
                recordings: MockRecordingStore::new(),
            }
        }
    }

    impl Database for MockDatabase {
        fn campaigns(&self) -> &dyn CampaignStore {
            &self.campaigns
        }
        fn deliveries(&self) -> &dyn DeliveryStore {
            &self.deliveries
        }
        fn voters(&self) -> &dyn VoterStore {
            &self.voters
        }
        fn opt_outs(&self) -> &dyn OptOutStore {
            &self.opt_outs
        }
        fn tags(&self) -> &dyn TagStore {
            &self.tags
        }
        fn recordings(&self) -> &dyn RecordingStore {
            &self.recordings
        }
    }

    type Callback<A, R> = Box<dyn Fn(A) -> Result<R, Error> + Send + Sync>;

    pub struct MockCampaignStore {
        pub on_insert_campaign: Callback<Campaign, ()>,
        pub on_fetch_campaigns: Callback<(), Vec<Campaign>>,
        pub on_fetch_campaign_by_id: Callback<CampaignId, Option<Campaign>>,
        pub on_update_campaign_details: Callback<Campaign, Campaign>,
        pub on_update_campaign_status: Callback<(Campaign, CampaignStatus), Campaign>,
        pub on_update_campaign_schedule: Callback<(Campaign, DateTime<Utc>), Campaign>,
        pub on_begin_campaign_send: Callback<(Campaign, i64, DateTime<Utc>), Campaign>,
        pub on_reopen_campaign_for_retry: Callback<(Campaign, i64), Campaign>,
        pub on_increment_delivery_counters: Callback<(CampaignId, i64, i64), ()>,
        pub on_fetch_due_scheduled: Callback<DateTime<Utc>, Vec<Campaign>>,
        pub on_fetch_campaigns_by_status: Callback<CampaignStatus, Vec<Campaign>>,
        pub on_fetch_campaigns_by_channel_and_message: Callback<(Channel, String), Vec<Campaign>>,
        pub on_delete_campaign: Callback<CampaignId, ()>,
    }

    impl MockCampaignStore {
        pub fn new() -> MockCampaignStore {
            MockCampaignStore {
                on_insert_campaign: Box::new(|_| Ok(())),
                on_fetch_campaigns: Box::new(|_| Ok(vec![])),
                on_fetch_campaign_by_id: Box::new(|_| Ok(None)),
                on_update_campaign_details: Box::new(|campaign| Ok(campaign)),
                on_update_campaign_status: Box::new(|(mut campaign, status)| {
                    campaign.status = status;
                    Ok(campaign)
                }),
                on_update_campaign_schedule: Box::new(|(mut campaign, scheduled_time)| {
                    campaign.status = CampaignStatus::Scheduled;
                    campaign.scheduled_time = Some(scheduled_time);
                    Ok(campaign)
                }),
                on_begin_campaign_send: Box::new(|(mut campaign, total, sent_at)| {
                    campaign.status = CampaignStatus::Sending;
                    campaign.total_recipients = total;
                    campaign.successful_deliveries = 0;
                    campaign.failed_deliveries = 0;
                    campaign.sent_at = Some(sent_at);
                    Ok(campaign)
                }),
                on_reopen_campaign_for_retry: Box::new(|(mut campaign, retried)| {
                    campaign.status = CampaignStatus::Sending;
                    campaign.failed_deliveries -= retried;
                    Ok(campaign)
                }),
                on_increment_delivery_counters: Box::new(|_| Ok(())),
                on_fetch_due_scheduled: Box::new(|_| Ok(vec![])),
                on_fetch_campaigns_by_status: Box::new(|_| Ok(vec![])),
                on_fetch_campaigns_by_channel_and_message: Box::new(|_| Ok(vec![])),
                on_delete_campaign: Box::new(|_| Ok(())),
            }
        }
    }

    #[async_trait]
    impl CampaignStore for MockCampaignStore {
        async fn insert_campaign(&self, campaign: &Campaign) -> Result<(), Error> {
            (self.on_insert_campaign)(campaign.clone())
        }
        async fn fetch_campaigns(&self) -> Result<Vec<Campaign>, Error> {
            (self.on_fetch_campaigns)(())
        }
        async fn fetch_campaign_by_id(
            &self,
            campaign_id: CampaignId,
        ) -> Result<Option<Campaign>, Error> {
            (self.on_fetch_campaign_by_id)(campaign_id)
        }
        async fn update_campaign_details(&self, campaign: Campaign) -> Result<Campaign, Error> {
            (self.on_update_campaign_details)(campaign)
        }
        async fn update_campaign_status(
            &self,
            campaign: Campaign,
            status: CampaignStatus,
        ) -> Result<Campaign, Error> {
            (self.on_update_campaign_status)((campaign, status))
        }
        async fn update_campaign_schedule(
            &self,
            campaign: Campaign,
            scheduled_time: DateTime<Utc>,
        ) -> Result<Campaign, Error> {
            (self.on_update_campaign_schedule)((campaign, scheduled_time))
        }
        async fn begin_campaign_send(
            &self,
            campaign: Campaign,
            total_recipients: i64,
            sent_at: DateTime<Utc>,
        ) -> Result<Campaign, Error> {
            (self.on_begin_campaign_send)((campaign, total_recipients, sent_at))
        }
        async fn reopen_campaign_for_retry(
            &self,
            campaign: Campaign,
            retried: i64,
        ) -> Result<Campaign, Error> {
            (self.on_reopen_campaign_for_retry)((campaign, retried))
        }
        async fn increment_delivery_counters(
            &self,
            campaign_id: CampaignId,
            successes: i64,
            failures: i64,
        ) -> Result<(), Error> {
            (self.on_increment_delivery_counters)((campaign_id, successes, failures))
        }
        async fn fetch_due_scheduled(&self, now: DateTime<Utc>) -> Result<Vec<Campaign>, Error> {
            (self.on_fetch_due_scheduled)(now)
        }
        async fn fetch_campaigns_by_status(
            &self,
            status: CampaignStatus,
        ) -> Result<Vec<Campaign>, Error> {
            (self.on_fetch_campaigns_by_status)(status)
        }
        async fn fetch_campaigns_by_channel_and_message(
            &self,
            channel: Channel,
            message: &str,
        ) -> Result<Vec<Campaign>, Error> {
            (self.on_fetch_campaigns_by_channel_and_message)((channel, message.to_string()))
        }
        async fn delete_campaign(&self, campaign_id: CampaignId) -> Result<(), Error> {
            (self.on_delete_campaign)(campaign_id)
        }
    }

    pub struct MockDeliveryStore {
        pub on_insert_deliveries: Callback<Vec<DeliveryRecord>, ()>,
        pub on_fetch_deliveries_by_campaign: Callback<CampaignId, Vec<DeliveryRecord>>,
        pub on_fetch_pending_batch: Callback<(CampaignId, i64), Vec<DeliveryRecord>>,
        pub on_mark_delivery_sent: Callback<(DeliveryRecord, DateTime<Utc>), Option<DeliveryRecord>>,
        pub on_mark_delivery_failed:
            Callback<(DeliveryRecord, DateTime<Utc>, String), Option<DeliveryRecord>>,
        pub on_fail_pending_deliveries: Callback<(CampaignId, DateTime<Utc>, String), i64>,
        pub on_fetch_sent_voter_ids: Callback<Vec<CampaignId>, Vec<VoterId>>,
        pub on_delete_deliveries_by_campaign: Callback<CampaignId, ()>,
    }

    impl MockDeliveryStore {
        pub fn new() -> MockDeliveryStore {
            MockDeliveryStore {
                on_insert_deliveries: Box::new(|_| Ok(())),
                on_fetch_deliveries_by_campaign: Box::new(|_| Ok(vec![])),
                on_fetch_pending_batch: Box::new(|_| Ok(vec![])),
                on_mark_delivery_sent: Box::new(|(mut delivery, at)| {
                    delivery.status = DeliveryStatus::Sent;
                    delivery.attempted_at = Some(at);
                    Ok(Some(delivery))
                }),
                on_mark_delivery_failed: Box::new(|(mut delivery, at, detail)| {
                    delivery.status = DeliveryStatus::Failed;
                    delivery.attempted_at = Some(at);
                    delivery.error_detail = Some(detail);
                    Ok(Some(delivery))
                }),
                on_fail_pending_deliveries: Box::new(|_| Ok(0)),
                on_fetch_sent_voter_ids: Box::new(|_| Ok(vec![])),
                on_delete_deliveries_by_campaign: Box::new(|_| Ok(())),
            }
        }
    }

    #[async_trait]
    impl DeliveryStore for MockDeliveryStore {
        async fn insert_deliveries(&self, deliveries: &[DeliveryRecord]) -> Result<(), Error> {
            (self.on_insert_deliveries)(deliveries.to_vec())
        }
        async fn fetch_deliveries_by_campaign(
            &self,
            campaign_id: CampaignId,
        ) -> Result<Vec<DeliveryRecord>, Error> {
            (self.on_fetch_deliveries_by_campaign)(campaign_id)
        }
        async fn fetch_pending_batch(
            &self,
            campaign_id: CampaignId,
            limit: i64,
        ) -> Result<Vec<DeliveryRecord>, Error> {
            (self.on_fetch_pending_batch)((campaign_id, limit))
        }
        async fn mark_delivery_sent(
            &self,
            delivery: DeliveryRecord,
            attempted_at: DateTime<Utc>,
        ) -> Result<Option<DeliveryRecord>, Error> {
            (self.on_mark_delivery_sent)((delivery, attempted_at))
        }
        async fn mark_delivery_failed(
            &self,
            delivery: DeliveryRecord,
            attempted_at: DateTime<Utc>,
            error_detail: String,
        ) -> Result<Option<DeliveryRecord>, Error> {
            (self.on_mark_delivery_failed)((delivery, attempted_at, error_detail))
        }
        async fn fail_pending_deliveries(
            &self,
            campaign_id: CampaignId,
            attempted_at: DateTime<Utc>,
            error_detail: &str,
        ) -> Result<i64, Error> {
            (self.on_fail_pending_deliveries)((campaign_id, attempted_at, error_detail.to_string()))
        }
        async fn fetch_sent_voter_ids(
            &self,
            campaign_ids: &[CampaignId],
        ) -> Result<Vec<VoterId>, Error> {
            (self.on_fetch_sent_voter_ids)(campaign_ids.to_vec())
        }
        async fn delete_deliveries_by_campaign(
            &self,
            campaign_id: CampaignId,
        ) -> Result<(), Error> {
            (self.on_delete_deliveries_by_campaign)(campaign_id)
        }
    }

    pub struct MockVoterStore {
        pub on_insert_voter: Callback<Voter, ()>,
        pub on_fetch_voters_by_zip: Callback<String, Vec<Voter>>,
        pub on_fetch_voters_by_tag: Callback<TagId, Vec<Voter>>,
    }

    impl MockVoterStore {
        pub fn new() -> MockVoterStore {
            MockVoterStore {
                on_insert_voter: Box::new(|_| Ok(())),
                on_fetch_voters_by_zip: Box::new(|_| Ok(vec![])),
                on_fetch_voters_by_tag: Box::new(|_| Ok(vec![])),
            }
        }
    }

    #[async_trait]
    impl VoterStore for MockVoterStore {
        async fn insert_voter(&self, voter: &Voter) -> Result<(), Error> {
            (self.on_insert_voter)(voter.clone())
        }
        async fn fetch_voters_by_zip(&self, zip_code: &str) -> Result<Vec<Voter>, Error> {
            (self.on_fetch_voters_by_zip)(zip_code.to_string())
        }
        async fn fetch_voters_by_tag(&self, tag_id: TagId) -> Result<Vec<Voter>, Error> {
            (self.on_fetch_voters_by_tag)(tag_id)
        }
    }

    pub struct MockOptOutStore {
        pub on_insert_opt_out: Callback<OptOutRecord, ()>,
        pub on_fetch_opt_outs: Callback<(), Vec<OptOutRecord>>,
        pub on_fetch_opt_outs_by_scopes: Callback<Vec<OptOutScope>, Vec<OptOutRecord>>,
        pub on_fetch_opt_out: Callback<(String, OptOutScope), Option<OptOutRecord>>,
        pub on_delete_opt_out: Callback<(String, OptOutScope), bool>,
    }

    impl MockOptOutStore {
        pub fn new() -> MockOptOutStore {
            MockOptOutStore {
                on_insert_opt_out: Box::new(|_| Ok(())),
                on_fetch_opt_outs: Box::new(|_| Ok(vec![])),
                on_fetch_opt_outs_by_scopes: Box::new(|_| Ok(vec![])),
                on_fetch_opt_out: Box::new(|_| Ok(None)),
                on_delete_opt_out: Box::new(|_| Ok(false)),
            }
        }
    }

    #[async_trait]
    impl OptOutStore for MockOptOutStore {
        async fn insert_opt_out(&self, opt_out: &OptOutRecord) -> Result<(), Error> {
            (self.on_insert_opt_out)(opt_out.clone())
        }
        async fn fetch_opt_outs(&self) -> Result<Vec<OptOutRecord>, Error> {
            (self.on_fetch_opt_outs)(())
        }
        async fn fetch_opt_outs_by_scopes(
            &self,
            scopes: &[OptOutScope],
        ) -> Result<Vec<OptOutRecord>, Error> {
            (self.on_fetch_opt_outs_by_scopes)(scopes.to_vec())
        }
        async fn fetch_opt_out(
            &self,
            phone_number: &str,
            scope: OptOutScope,
        ) -> Result<Option<OptOutRecord>, Error> {
            (self.on_fetch_opt_out)((phone_number.to_string(), scope))
        }
        async fn delete_opt_out(
            &self,
            phone_number: &str,
            scope: OptOutScope,
        ) -> Result<bool, Error> {
            (self.on_delete_opt_out)((phone_number.to_string(), scope))
        }
    }

    pub struct MockTagStore {
        pub on_insert_tag: Callback<Tag, ()>,
        pub on_fetch_tags: Callback<(), Vec<Tag>>,
        pub on_fetch_tag_by_id: Callback<TagId, Option<Tag>>,
    }

    impl MockTagStore {
        pub fn new() -> MockTagStore {
            MockTagStore {
                on_insert_tag: Box::new(|_| Ok(())),
                on_fetch_tags: Box::new(|_| Ok(vec![])),
                on_fetch_tag_by_id: Box::new(|_| Ok(None)),
            }
        }
    }

    #[async_trait]
    impl TagStore for MockTagStore {
        async fn insert_tag(&self, tag: &Tag) -> Result<(), Error> {
            (self.on_insert_tag)(tag.clone())
        }
        async fn fetch_tags(&self) -> Result<Vec<Tag>, Error> {
            (self.on_fetch_tags)(())
        }
        async fn fetch_tag_by_id(&self, tag_id: TagId) -> Result<Option<Tag>, Error> {
            (self.on_fetch_tag_by_id)(tag_id)
        }
    }

    pub struct MockRecordingStore {
        pub on_insert_recording: Callback<VoiceRecording, ()>,
        pub on_fetch_recording_by_id: Callback<VoiceRecordingId, Option<VoiceRecording>>,
    }

    impl MockRecordingStore {
        pub fn new() -> MockRecordingStore {
            MockRecordingStore {
                on_insert_recording: Box::new(|_| Ok(())),
                on_fetch_recording_by_id: Box::new(|_| Ok(None)),
            }
        }
    }

    #[async_trait]
    impl RecordingStore for MockRecordingStore {
        async fn insert_recording(&self, recording: &VoiceRecording) -> Result<(), Error> {
            (self.on_insert_recording)(recording.clone())
        }
        async fn fetch_recording_by_id(
            &self,
            recording_id: VoiceRecordingId,
        ) -> Result<Option<VoiceRecording>, Error> {
            (self.on_fetch_recording_by_id)(recording_id)
        }
    }

    // Stateful in-memory database for flow tests (dispatcher, scheduler,
    // audience). Mirrors the mongo impls' semantics, including the
    // modified_at compare-and-set and the Pending-only terminalization.

    #[derive(Default)]
    pub struct MemoryDatabase {
        pub campaigns: MemoryCampaignStore,
        pub deliveries: MemoryDeliveryStore,
        pub voters: MemoryVoterStore,
        pub opt_outs: MemoryOptOutStore,
        pub tags: MemoryTagStore,
        pub recordings: MemoryRecordingStore,
    }

    impl MemoryDatabase {
        pub fn new() -> MemoryDatabase {
            MemoryDatabase::default()
        }
    }

    impl Database for MemoryDatabase {
        fn campaigns(&self) -> &dyn CampaignStore {
            &self.campaigns
        }
        fn deliveries(&self) -> &dyn DeliveryStore {
            &self.deliveries
        }
        fn voters(&self) -> &dyn VoterStore {
            &self.voters
        }
        fn opt_outs(&self) -> &dyn OptOutStore {
            &self.opt_outs
        }
        fn tags(&self) -> &dyn TagStore {
            &self.tags
        }
        fn recordings(&self) -> &dyn RecordingStore {
            &self.recordings
        }
    }

    #[derive(Default)]
    pub struct MemoryCampaignStore {
        pub rows: Mutex<Vec<Campaign>>,
    }

    #[async_trait]
    impl CampaignStore for MemoryCampaignStore {
        async fn insert_campaign(&self, campaign: &Campaign) -> Result<(), Error> {
            self.rows.lock().unwrap().push(campaign.clone());
            Ok(())
        }
        async fn fetch_campaigns(&self) -> Result<Vec<Campaign>, Error> {
            Ok(self.rows.lock().unwrap().clone())
        }
        async fn fetch_campaign_by_id(
            &self,
            campaign_id: CampaignId,
        ) -> Result<Option<Campaign>, Error> {
            Ok(self
                .rows
                .lock()
                .unwrap()
                .iter()
                .find(|c| c.id == campaign_id)
                .cloned())
        }
        async fn update_campaign_details(&self, campaign: Campaign) -> Result<Campaign, Error> {
            self.compare_and_swap(campaign, |stored, mut campaign| {
                campaign.status = stored.status;
                campaign.total_recipients = stored.total_recipients;
                campaign.successful_deliveries = stored.successful_deliveries;
                campaign.failed_deliveries = stored.failed_deliveries;
                campaign
            })
        }
        async fn update_campaign_status(
            &self,
            campaign: Campaign,
            status: CampaignStatus,
        ) -> Result<Campaign, Error> {
            self.compare_and_swap(campaign, |stored, _| {
                let mut updated = stored;
                updated.status = status;
                updated
            })
        }
        async fn update_campaign_schedule(
            &self,
            campaign: Campaign,
            scheduled_time: DateTime<Utc>,
        ) -> Result<Campaign, Error> {
            self.compare_and_swap(campaign, |stored, _| {
                let mut updated = stored;
                updated.status = CampaignStatus::Scheduled;
                updated.scheduled_time = Some(scheduled_time);
                updated
            })
        }
        async fn begin_campaign_send(
            &self,
            campaign: Campaign,
            total_recipients: i64,
            sent_at: DateTime<Utc>,
        ) -> Result<Campaign, Error> {
            self.compare_and_swap(campaign, |stored, _| {
                let mut updated = stored;
                updated.status = CampaignStatus::Sending;
                updated.total_recipients = total_recipients;
                updated.successful_deliveries = 0;
                updated.failed_deliveries = 0;
                updated.sent_at = Some(sent_at);
                updated
            })
        }
        async fn reopen_campaign_for_retry(
            &self,
            campaign: Campaign,
            retried: i64,
        ) -> Result<Campaign, Error> {
            self.compare_and_swap(campaign, |stored, _| {
                let mut updated = stored;
                updated.status = CampaignStatus::Sending;
                updated.failed_deliveries -= retried;
                updated
            })
        }
        async fn increment_delivery_counters(
            &self,
            campaign_id: CampaignId,
            successes: i64,
            failures: i64,
        ) -> Result<(), Error> {
            let mut rows = self.rows.lock().unwrap();
            if let Some(stored) = rows.iter_mut().find(|c| c.id == campaign_id) {
                stored.successful_deliveries += successes;
                stored.failed_deliveries += failures;
            }
            Ok(())
        }
        async fn fetch_due_scheduled(&self, now: DateTime<Utc>) -> Result<Vec<Campaign>, Error> {
            Ok(self
                .rows
                .lock()
                .unwrap()
                .iter()
                .filter(|c| {
                    c.status == CampaignStatus::Scheduled
                        && c.scheduled_time.map_or(false, |t| t <= now)
                })
                .cloned()
                .collect())
        }
        async fn fetch_campaigns_by_status(
            &self,
            status: CampaignStatus,
        ) -> Result<Vec<Campaign>, Error> {
            Ok(self
                .rows
                .lock()
                .unwrap()
                .iter()
                .filter(|c| c.status == status)
                .cloned()
                .collect())
        }
        async fn fetch_campaigns_by_channel_and_message(
            &self,
            channel: Channel,
            message: &str,
        ) -> Result<Vec<Campaign>, Error> {
            Ok(self
                .rows
                .lock()
                .unwrap()
                .iter()
                .filter(|c| c.channel == channel && c.message == message)
                .cloned()
                .collect())
        }
        async fn delete_campaign(&self, campaign_id: CampaignId) -> Result<(), Error> {
            self.rows.lock().unwrap().retain(|c| c.id != campaign_id);
            Ok(())
        }
    }

    impl MemoryCampaignStore {
        fn compare_and_swap(
            &self,
            campaign: Campaign,
            apply: impl FnOnce(Campaign, Campaign) -> Campaign,
        ) -> Result<Campaign, Error> {
            let mut rows = self.rows.lock().unwrap();
            let stored = rows
                .iter_mut()
                .find(|c| c.id == campaign.id && c.modified_at == campaign.modified_at)
                .ok_or(Error::ConcurrentModificationDetected)?;

            let mut updated = apply(stored.clone(), campaign);
            updated.modified_at = Utc::now();
            *stored = updated.clone();

            Ok(updated)
        }
    }

    #[derive(Default)]
    pub struct MemoryDeliveryStore {
        pub rows: Mutex<Vec<DeliveryRecord>>,
    }

    #[async_trait]
    impl DeliveryStore for MemoryDeliveryStore {
        async fn insert_deliveries(&self, deliveries: &[DeliveryRecord]) -> Result<(), Error> {
            self.rows.lock().unwrap().extend_from_slice(deliveries);
            Ok(())
        }
        async fn fetch_deliveries_by_campaign(
            &self,
            campaign_id: CampaignId,
        ) -> Result<Vec<DeliveryRecord>, Error> {
            let mut deliveries: Vec<DeliveryRecord> = self
                .rows
                .lock()
                .unwrap()
                .iter()
                .filter(|d| d.campaign_id == campaign_id)
                .cloned()
                .collect();
            deliveries.sort_by_key(|d| d.created_at);
            Ok(deliveries)
        }
        async fn fetch_pending_batch(
            &self,
            campaign_id: CampaignId,
            limit: i64,
        ) -> Result<Vec<DeliveryRecord>, Error> {
            let mut pending: Vec<DeliveryRecord> = self
                .rows
                .lock()
                .unwrap()
                .iter()
                .filter(|d| d.campaign_id == campaign_id && d.status == DeliveryStatus::Pending)
                .cloned()
                .collect();
            pending.sort_by_key(|d| d.created_at);
            pending.truncate(limit as usize);
            Ok(pending)
        }
        async fn mark_delivery_sent(
            &self,
            delivery: DeliveryRecord,
            attempted_at: DateTime<Utc>,
        ) -> Result<Option<DeliveryRecord>, Error> {
            let mut rows = self.rows.lock().unwrap();
            match rows
                .iter_mut()
                .find(|d| d.id == delivery.id && d.status == DeliveryStatus::Pending)
            {
                Some(stored) => {
                    stored.status = DeliveryStatus::Sent;
                    stored.attempted_at = Some(attempted_at);
                    stored.modified_at = attempted_at;
                    Ok(Some(stored.clone()))
                }
                None => Ok(None),
            }
        }
        async fn mark_delivery_failed(
            &self,
            delivery: DeliveryRecord,
            attempted_at: DateTime<Utc>,
            error_detail: String,
        ) -> Result<Option<DeliveryRecord>, Error> {
            let mut rows = self.rows.lock().unwrap();
            match rows
                .iter_mut()
                .find(|d| d.id == delivery.id && d.status == DeliveryStatus::Pending)
            {
                Some(stored) => {
                    stored.status = DeliveryStatus::Failed;
                    stored.attempted_at = Some(attempted_at);
                    stored.modified_at = attempted_at;
                    stored.error_detail = Some(error_detail);
                    Ok(Some(stored.clone()))
                }
                None => Ok(None),
            }
        }
        async fn fail_pending_deliveries(
            &self,
            campaign_id: CampaignId,
            attempted_at: DateTime<Utc>,
            error_detail: &str,
        ) -> Result<i64, Error> {
            let mut rows = self.rows.lock().unwrap();
            let mut flipped = 0;
            for stored in rows
                .iter_mut()
                .filter(|d| d.campaign_id == campaign_id && d.status == DeliveryStatus::Pending)
            {
                stored.status = DeliveryStatus::Failed;
                stored.attempted_at = Some(attempted_at);
                stored.modified_at = attempted_at;
                stored.error_detail = Some(error_detail.to_string());
                flipped += 1;
            }
            Ok(flipped)
        }
        async fn fetch_sent_voter_ids(
            &self,
            campaign_ids: &[CampaignId],
        ) -> Result<Vec<VoterId>, Error> {
            Ok(self
                .rows
                .lock()
                .unwrap()
                .iter()
                .filter(|d| {
                    campaign_ids.contains(&d.campaign_id) && d.status == DeliveryStatus::Sent
                })
                .map(|d| d.voter_id)
                .collect())
        }
        async fn delete_deliveries_by_campaign(
            &self,
            campaign_id: CampaignId,
        ) -> Result<(), Error> {
            self.rows
                .lock()
                .unwrap()
                .retain(|d| d.campaign_id != campaign_id);
            Ok(())
        }
    }

    #[derive(Default)]
    pub struct MemoryVoterStore {
        pub rows: Mutex<Vec<Voter>>,
    }

    #[async_trait]
    impl VoterStore for MemoryVoterStore {
        async fn insert_voter(&self, voter: &Voter) -> Result<(), Error> {
            self.rows.lock().unwrap().push(voter.clone());
            Ok(())
        }
        async fn fetch_voters_by_zip(&self, zip_code: &str) -> Result<Vec<Voter>, Error> {
            Ok(self
                .rows
                .lock()
                .unwrap()
                .iter()
                .filter(|v| v.zip_code.as_deref() == Some(zip_code))
                .cloned()
                .collect())
        }
        async fn fetch_voters_by_tag(&self, tag_id: TagId) -> Result<Vec<Voter>, Error> {
            Ok(self
                .rows
                .lock()
                .unwrap()
                .iter()
                .filter(|v| v.tag_ids.contains(&tag_id))
                .cloned()
                .collect())
        }
    }

    #[derive(Default)]
    pub struct MemoryOptOutStore {
        pub rows: Mutex<Vec<OptOutRecord>>,
    }

    #[async_trait]
    impl OptOutStore for MemoryOptOutStore {
        async fn insert_opt_out(&self, opt_out: &OptOutRecord) -> Result<(), Error> {
            self.rows.lock().unwrap().push(opt_out.clone());
            Ok(())
        }
        async fn fetch_opt_outs(&self) -> Result<Vec<OptOutRecord>, Error> {
            Ok(self.rows.lock().unwrap().clone())
        }
        async fn fetch_opt_outs_by_scopes(
            &self,
            scopes: &[OptOutScope],
        ) -> Result<Vec<OptOutRecord>, Error> {
            Ok(self
                .rows
                .lock()
                .unwrap()
                .iter()
                .filter(|o| scopes.contains(&o.scope))
                .cloned()
                .collect())
        }
        async fn fetch_opt_out(
            &self,
            phone_number: &str,
            scope: OptOutScope,
        ) -> Result<Option<OptOutRecord>, Error> {
            Ok(self
                .rows
                .lock()
                .unwrap()
                .iter()
                .find(|o| o.phone_number == phone_number && o.scope == scope)
                .cloned())
        }
        async fn delete_opt_out(
            &self,
            phone_number: &str,
            scope: OptOutScope,
        ) -> Result<bool, Error> {
            let mut rows = self.rows.lock().unwrap();
            let before = rows.len();
            rows.retain(|o| !(o.phone_number == phone_number && o.scope == scope));
            Ok(rows.len() < before)
        }
    }

    #[derive(Default)]
    pub struct MemoryTagStore {
        pub rows: Mutex<Vec<Tag>>,
    }

    #[async_trait]
    impl TagStore for MemoryTagStore {
        async fn insert_tag(&self, tag: &Tag) -> Result<(), Error> {
            self.rows.lock().unwrap().push(tag.clone());
            Ok(())
        }
        async fn fetch_tags(&self) -> Result<Vec<Tag>, Error> {
            Ok(self.rows.lock().unwrap().clone())
        }
        async fn fetch_tag_by_id(&self, tag_id: TagId) -> Result<Option<Tag>, Error> {
            Ok(self
                .rows
                .lock()
                .unwrap()
                .iter()
                .find(|t| t.id == tag_id)
                .cloned())
        }
    }

    #[derive(Default)]
    pub struct MemoryRecordingStore {
        pub rows: Mutex<Vec<VoiceRecording>>,
    }

    #[async_trait]
    impl RecordingStore for MemoryRecordingStore {
        async fn insert_recording(&self, recording: &VoiceRecording) -> Result<(), Error> {
            self.rows.lock().unwrap().push(recording.clone());
            Ok(())
        }
        async fn fetch_recording_by_id(
            &self,
            recording_id: VoiceRecordingId,
        ) -> Result<Option<VoiceRecording>, Error> {
            Ok(self
                .rows
                .lock()
                .unwrap()
                .iter()
                .find(|r| r.id == recording_id)
                .cloned())
        }
    }
}
