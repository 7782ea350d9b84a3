use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::FixedOffset;
use futures::{stream, StreamExt};
use tokio::time::timeout;
use tracing::{debug, error, info};

use crate::campaign::{Campaign, CampaignId, CampaignStatus, Channel};
use crate::clock::Clock;
use crate::config::EngineConfig;
use crate::database::Database;
use crate::delivery::DeliveryRecord;
use crate::error::Error;
use crate::sender::{ProviderError, RoboCallContent, Senders};

#[derive(Clone, Debug)]
pub struct DispatchConfig {
    pub send_concurrency: usize,
    pub send_timeout: Duration,
    pub batch_size: i64,
    pub civic_offset: FixedOffset,
}

impl DispatchConfig {
    pub fn from_engine(config: &EngineConfig) -> DispatchConfig {
        DispatchConfig {
            send_concurrency: config.send_concurrency,
            send_timeout: config.send_timeout,
            batch_size: config.delivery_batch_size,
            civic_offset: config.civic_offset(),
        }
    }
}

/// In-process per-campaign leases: at most one live cycle per campaign.
/// Campaigns run concurrently with each other; a campaign never overlaps
/// itself.
#[derive(Clone, Default)]
pub struct CycleLeases {
    held: Arc<Mutex<HashSet<CampaignId>>>,
}

impl CycleLeases {
    pub fn try_acquire(&self, campaign_id: CampaignId) -> Option<CycleLease> {
        let mut held = self.held.lock().expect("lease registry poisoned");
        if !held.insert(campaign_id) {
            return None;
        }
        Some(CycleLease {
            registry: Arc::clone(&self.held),
            campaign_id,
        })
    }

    pub fn is_held(&self, campaign_id: CampaignId) -> bool {
        self.held
            .lock()
            .expect("lease registry poisoned")
            .contains(&campaign_id)
    }
}

pub struct CycleLease {
    registry: Arc<Mutex<HashSet<CampaignId>>>,
    campaign_id: CampaignId,
}

impl Drop for CycleLease {
    fn drop(&mut self) {
        if let Ok(mut held) = self.registry.lock() {
            held.remove(&self.campaign_id);
        }
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct CycleOptions {
    /// Set only by the privileged retry override; skips the per-send
    /// opt-out re-check.
    pub skip_opt_out_check: bool,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CycleOutcome {
    /// Every record reached a terminal status; the campaign is Sealed when
    /// nothing failed, Completed otherwise.
    Finished { sealed: bool },
    /// Calling-hours gate closed mid-send. Status stays Sending; the
    /// scheduler sweep resumes the cycle when the window reopens.
    Paused,
    /// The campaign stopped being Sending under us (force-stop/delete).
    Aborted,
    /// Another cycle holds this campaign's lease; the trigger is a no-op.
    AlreadyRunning,
}

/// The delivery worker. Consumes Pending records batch by batch, invokes
/// the channel sender with bounded concurrency and a per-send timeout, and
/// applies outcomes sequentially so counter updates stay per-campaign
/// linear while the sends themselves fan out.
#[derive(Clone)]
pub struct Dispatcher {
    db: Arc<dyn Database>,
    senders: Senders,
    clock: Arc<dyn Clock>,
    leases: CycleLeases,
    config: DispatchConfig,
}

impl Dispatcher {
    pub fn new(
        db: Arc<dyn Database>,
        senders: Senders,
        clock: Arc<dyn Clock>,
        config: DispatchConfig,
    ) -> Dispatcher {
        Dispatcher {
            db,
            senders,
            clock,
            leases: CycleLeases::default(),
            config,
        }
    }

    pub fn leases(&self) -> &CycleLeases {
        &self.leases
    }

    pub fn civic_offset(&self) -> FixedOffset {
        self.config.civic_offset
    }

    pub fn clock(&self) -> &dyn Clock {
        &*self.clock
    }

    /// Fire-and-forget cycle start. Returns false (and does nothing) when
    /// the campaign already has a live cycle.
    pub fn spawn_cycle(&self, campaign_id: CampaignId) -> bool {
        self.spawn_cycle_with(campaign_id, CycleOptions::default())
    }

    pub fn spawn_cycle_with(&self, campaign_id: CampaignId, options: CycleOptions) -> bool {
        let lease = match self.leases.try_acquire(campaign_id) {
            Some(lease) => lease,
            None => {
                debug!(%campaign_id, "send cycle already running, trigger ignored");
                return false;
            }
        };

        let dispatcher = self.clone();
        tokio::spawn(async move {
            let _lease = lease;
            match dispatcher.drive_cycle(campaign_id, options).await {
                Ok(outcome) => info!(%campaign_id, ?outcome, "send cycle ended"),
                Err(err) => error!(%campaign_id, %err, "send cycle aborted on error"),
            }
        });

        true
    }

    /// Run a cycle to its outcome on the caller's task.
    pub async fn run_cycle(
        &self,
        campaign_id: CampaignId,
        options: CycleOptions,
    ) -> Result<CycleOutcome, Error> {
        let _lease = match self.leases.try_acquire(campaign_id) {
            Some(lease) => lease,
            None => return Ok(CycleOutcome::AlreadyRunning),
        };

        self.drive_cycle(campaign_id, options).await
    }

    async fn drive_cycle(
        &self,
        campaign_id: CampaignId,
        options: CycleOptions,
    ) -> Result<CycleOutcome, Error> {
        loop {
            // Re-read per batch: the status check is the force-stop abort
            // point, and the gate check is the pause point.
            let campaign = match self.db.campaigns().fetch_campaign_by_id(campaign_id).await? {
                Some(campaign) => campaign,
                None => return Ok(CycleOutcome::Aborted),
            };
            if campaign.status != CampaignStatus::Sending {
                return Ok(CycleOutcome::Aborted);
            }

            let local_now = self.clock.now().with_timezone(&self.config.civic_offset);
            if !campaign.calling_hours_open(local_now) {
                info!(%campaign_id, "calling-hours gate closed, suspending cycle");
                return Ok(CycleOutcome::Paused);
            }

            let batch = self
                .db
                .deliveries()
                .fetch_pending_batch(campaign_id, self.config.batch_size)
                .await?;
            if batch.is_empty() {
                return self.finalize(campaign).await;
            }

            self.process_batch(&campaign, batch, options).await?;
        }
    }

    async fn process_batch(
        &self,
        campaign: &Campaign,
        batch: Vec<DeliveryRecord>,
        options: CycleOptions,
    ) -> Result<(), Error> {
        let voice_content = self.voice_content(campaign).await?;
        // Snapshot per batch: an opt-out arriving mid-cycle is honored from
        // the next batch on, never retroactively.
        let suppressed = self.suppressed_phones(campaign, options).await?;

        let results: Vec<(DeliveryRecord, Result<(), ProviderError>)> = stream::iter(batch)
            .map(|record| {
                let voice_content = &voice_content;
                let suppressed = &suppressed;
                async move {
                    let result = self
                        .attempt_send(campaign, voice_content.as_ref(), suppressed, &record)
                        .await;
                    (record, result)
                }
            })
            .buffer_unordered(self.config.send_concurrency)
            .collect()
            .await;

        let now = self.clock.now();
        let mut successes = 0;
        let mut failures = 0;
        for (record, result) in results {
            match result {
                Ok(()) => {
                    if self
                        .db
                        .deliveries()
                        .mark_delivery_sent(record, now)
                        .await?
                        .is_some()
                    {
                        successes += 1;
                    }
                }
                Err(provider_error) => {
                    if self
                        .db
                        .deliveries()
                        .mark_delivery_failed(record, now, provider_error.to_string())
                        .await?
                        .is_some()
                    {
                        failures += 1;
                    }
                }
            }
        }

        if successes != 0 || failures != 0 {
            self.db
                .campaigns()
                .increment_delivery_counters(campaign.id, successes, failures)
                .await?;
        }

        Ok(())
    }

    async fn attempt_send(
        &self,
        campaign: &Campaign,
        voice_content: Option<&RoboCallContent>,
        suppressed: &HashSet<String>,
        record: &DeliveryRecord,
    ) -> Result<(), ProviderError> {
        if suppressed.contains(&record.address) {
            return Err(ProviderError::new("recipient opted out"));
        }

        let send = self.send_one(campaign, voice_content, &record.address);
        match timeout(self.config.send_timeout, send).await {
            Ok(result) => result,
            Err(_) => Err(ProviderError::new(format!(
                "send timed out after {}s",
                self.config.send_timeout.as_secs()
            ))),
        }
    }

    async fn send_one(
        &self,
        campaign: &Campaign,
        voice_content: Option<&RoboCallContent>,
        address: &str,
    ) -> Result<(), ProviderError> {
        match campaign.channel {
            Channel::Sms => self.senders.sms.send_sms(address, &campaign.message).await,
            Channel::RoboCall => {
                let content = voice_content
                    .ok_or_else(|| ProviderError::new("robocall content missing"))?;
                self.senders.voice.place_robo_call(address, content).await
            }
            Channel::Email => {
                let email = campaign
                    .email
                    .as_ref()
                    .ok_or_else(|| ProviderError::new("email content missing"))?;
                self.senders
                    .email
                    .send_email(
                        address,
                        &email.subject,
                        &email.html_content,
                        email.plain_text_content.as_deref(),
                    )
                    .await
            }
        }
    }

    async fn voice_content(&self, campaign: &Campaign) -> Result<Option<RoboCallContent>, Error> {
        if campaign.channel != Channel::RoboCall {
            return Ok(None);
        }

        match campaign.voice_recording_id {
            Some(recording_id) => {
                let recording = self
                    .db
                    .recordings()
                    .fetch_recording_by_id(recording_id)
                    .await?
                    .ok_or(Error::VoiceRecordingNotFound { recording_id })?;
                Ok(Some(RoboCallContent::Recording { url: recording.url }))
            }
            None => Ok(Some(RoboCallContent::Script(campaign.message.clone()))),
        }
    }

    async fn suppressed_phones(
        &self,
        campaign: &Campaign,
        options: CycleOptions,
    ) -> Result<HashSet<String>, Error> {
        if options.skip_opt_out_check || !campaign.channel.honors_opt_out_registry() {
            return Ok(HashSet::new());
        }

        Ok(self
            .db
            .opt_outs()
            .fetch_opt_outs_by_scopes(campaign.channel.opt_out_scopes())
            .await?
            .into_iter()
            .map(|opt_out| opt_out.phone_number)
            .collect())
    }

    async fn finalize(&self, campaign: Campaign) -> Result<CycleOutcome, Error> {
        // Reload for fresh counters before deciding the terminal status.
        let campaign = match self.db.campaigns().fetch_campaign_by_id(campaign.id).await? {
            Some(campaign) => campaign,
            None => return Ok(CycleOutcome::Aborted),
        };
        if campaign.status != CampaignStatus::Sending {
            return Ok(CycleOutcome::Aborted);
        }

        let sealed = campaign.failed_deliveries == 0;
        let status = if sealed {
            CampaignStatus::Sealed
        } else {
            CampaignStatus::Completed
        };

        match self
            .db
            .campaigns()
            .update_campaign_status(campaign, status)
            .await
        {
            Ok(_) => Ok(CycleOutcome::Finished { sealed }),
            Err(Error::ConcurrentModificationDetected) => Ok(CycleOutcome::Aborted),
            Err(err) => Err(err),
        }
    }
}
