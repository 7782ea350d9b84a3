use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{error, info, warn};

use crate::campaign::{manager, CampaignId, CampaignStatus};
use crate::clock::Clock;
use crate::database::Database;
use crate::dispatch::Dispatcher;
use crate::error::Error;

/// The single decision maker for when campaigns run: releases due
/// scheduled campaigns and sweeps for stuck ones on a fixed poll interval.
/// Everything it does is also safe to trigger manually (the check-stuck
/// endpoint); the loop just makes recovery automatic.
pub struct Scheduler {
    db: Arc<dyn Database>,
    dispatcher: Dispatcher,
    clock: Arc<dyn Clock>,
    poll_interval: Duration,
}

impl Scheduler {
    pub fn new(
        db: Arc<dyn Database>,
        dispatcher: Dispatcher,
        clock: Arc<dyn Clock>,
        poll_interval: Duration,
    ) -> Scheduler {
        Scheduler {
            db,
            dispatcher,
            clock,
            poll_interval,
        }
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = interval(self.poll_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if let Err(err) = self.tick().await {
                    error!(%err, "scheduler tick failed");
                }
            }
        })
    }

    pub async fn tick(&self) -> Result<(), Error> {
        self.release_due_campaigns().await?;
        check_stuck(&*self.db, &self.dispatcher, &*self.clock).await?;
        Ok(())
    }

    async fn release_due_campaigns(&self) -> Result<(), Error> {
        let due = self
            .db
            .campaigns()
            .fetch_due_scheduled(self.clock.now())
            .await?;

        for campaign in due {
            let campaign_id = campaign.id;
            match manager::begin_scheduled_send(&*self.db, &*self.clock, campaign).await {
                Ok(_) => {
                    info!(%campaign_id, "scheduled campaign released");
                    self.dispatcher.spawn_cycle(campaign_id);
                }
                Err(err) => {
                    warn!(%campaign_id, %err, "scheduled campaign could not start");
                }
            }
        }

        Ok(())
    }
}

/// Reconciliation sweep: a Sending campaign with pending work, no live
/// cycle, and an open calling-hours gate gets its worker restarted. Safe
/// to call repeatedly; with nothing eligible it changes no state.
pub async fn check_stuck(
    db: &dyn Database,
    dispatcher: &Dispatcher,
    clock: &dyn Clock,
) -> Result<Vec<CampaignId>, Error> {
    let local_now = clock.now().with_timezone(&dispatcher.civic_offset());
    let sending = db
        .campaigns()
        .fetch_campaigns_by_status(CampaignStatus::Sending)
        .await?;

    let mut restarted = Vec::new();
    for campaign in sending {
        if campaign.pending_deliveries() <= 0 {
            continue;
        }
        if dispatcher.leases().is_held(campaign.id) {
            continue;
        }
        if !campaign.calling_hours_open(local_now) {
            continue;
        }
        if dispatcher.spawn_cycle(campaign.id) {
            info!(campaign_id = %campaign.id, "restarting stuck campaign");
            restarted.push(campaign.id);
        }
    }

    Ok(restarted)
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};
    use chrono::FixedOffset;

    use crate::actor::{Actor, ActorId, Role};
    use crate::campaign::manager::CampaignDraft;
    use crate::campaign::{AudienceFilter, CallingHours, Campaign, Channel};
    use crate::clock::FixedClock;
    use crate::database::test::MemoryDatabase;
    use crate::dispatch::DispatchConfig;
    use crate::sender::test::ScriptedSender;
    use crate::sender::Senders;
    use crate::voter::{Voter, VoterId};

    use super::*;

    fn super_admin() -> Actor {
        Actor {
            id: ActorId::new(),
            role: Role::SuperAdmin,
        }
    }

    // 2026-08-03 was a Monday
    fn monday_morning() -> Arc<FixedClock> {
        Arc::new(FixedClock(
            Utc.with_ymd_and_hms(2026, 8, 3, 15, 0, 0).unwrap(),
        ))
    }

    fn saturday_morning() -> Arc<FixedClock> {
        Arc::new(FixedClock(
            Utc.with_ymd_and_hms(2026, 8, 1, 15, 0, 0).unwrap(),
        ))
    }

    fn dispatcher(db: Arc<MemoryDatabase>, clock: Arc<FixedClock>) -> Dispatcher {
        Dispatcher::new(
            db,
            Senders::scripted(Arc::new(ScriptedSender::default())),
            clock,
            DispatchConfig {
                send_concurrency: 4,
                send_timeout: Duration::from_secs(5),
                batch_size: 50,
                civic_offset: FixedOffset::east_opt(0).unwrap(),
            },
        )
    }

    async fn seed_voter(db: &MemoryDatabase, zip: &str, phone: &str) {
        db.voters()
            .insert_voter(&Voter {
                id: VoterId::new(),
                first_name: "Sam".to_string(),
                last_name: "Voter".to_string(),
                phone_number: Some(phone.to_string()),
                email: None,
                zip_code: Some(zip.to_string()),
                tag_ids: vec![],
            })
            .await
            .unwrap();
    }

    async fn draft(db: &MemoryDatabase, calling_hours: CallingHours) -> Campaign {
        manager::create_campaign(
            db,
            &super_admin(),
            CampaignDraft {
                name: "GOTV".to_string(),
                message: "Vote Tuesday!".to_string(),
                channel: Channel::RoboCall,
                audience: AudienceFilter {
                    zip_codes: vec!["35201".to_string()],
                    tag_ids: vec![],
                },
                voice_recording_id: None,
                email: None,
                calling_hours,
                prevent_duplicate_messages: false,
            },
        )
        .await
        .unwrap()
    }

    async fn wait_for_status(db: &MemoryDatabase, campaign_id: CampaignId, status: CampaignStatus) {
        for _ in 0..100 {
            let stored = manager::assert_campaign_exists(db, campaign_id)
                .await
                .unwrap();
            if stored.status == status {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("campaign never reached {:?}", status);
    }

    #[tokio::test]
    async fn releases_a_due_scheduled_campaign() {
        let db = Arc::new(MemoryDatabase::new());
        seed_voter(&db, "35201", "2055550101").await;
        let campaign = draft(&db, CallingHours::default()).await;
        let clock = monday_morning();
        let when = clock.0 - chrono::Duration::minutes(1);

        // scheduled in the past relative to the pinned clock: due now
        let stored = manager::assert_campaign_exists(&*db, campaign.id)
            .await
            .unwrap();
        db.campaigns()
            .update_campaign_schedule(stored, when)
            .await
            .unwrap();

        let scheduler = Scheduler::new(
            db.clone(),
            dispatcher(db.clone(), clock.clone()),
            clock,
            Duration::from_secs(30),
        );
        scheduler.tick().await.unwrap();

        wait_for_status(&db, campaign.id, CampaignStatus::Sealed).await;
        let stored = manager::assert_campaign_exists(&*db, campaign.id)
            .await
            .unwrap();
        assert_eq!(stored.total_recipients, 1);
        assert_eq!(stored.successful_deliveries, 1);
    }

    #[tokio::test]
    async fn restarts_a_stuck_sending_campaign() {
        let db = Arc::new(MemoryDatabase::new());
        seed_voter(&db, "35201", "2055550101").await;
        seed_voter(&db, "35201", "2055550102").await;
        let campaign = draft(&db, CallingHours::default()).await;
        let clock = monday_morning();

        // sent, records materialized, but no worker ever ran
        let stored = manager::assert_campaign_exists(&*db, campaign.id)
            .await
            .unwrap();
        manager::begin_scheduled_send(
            &*db,
            &*clock,
            db.campaigns()
                .update_campaign_schedule(stored, clock.0)
                .await
                .unwrap(),
        )
        .await
        .unwrap();

        let dispatcher = dispatcher(db.clone(), clock.clone());
        let restarted = check_stuck(&*db, &dispatcher, &*clock).await.unwrap();

        assert_eq!(restarted, vec![campaign.id]);
        wait_for_status(&db, campaign.id, CampaignStatus::Sealed).await;
    }

    #[tokio::test]
    async fn check_stuck_is_idempotent_with_nothing_eligible() {
        let db = Arc::new(MemoryDatabase::new());
        let clock = monday_morning();
        let dispatcher = dispatcher(db.clone(), clock.clone());

        // a sending campaign with no pending work is not eligible
        let campaign = draft(&db, CallingHours::default()).await;
        let stored = manager::assert_campaign_exists(&*db, campaign.id)
            .await
            .unwrap();
        db.campaigns()
            .update_campaign_status(stored, CampaignStatus::Sending)
            .await
            .unwrap();

        let before = db.campaigns().fetch_campaigns().await.unwrap();
        let first = check_stuck(&*db, &dispatcher, &*clock).await.unwrap();
        let second = check_stuck(&*db, &dispatcher, &*clock).await.unwrap();
        let after = db.campaigns().fetch_campaigns().await.unwrap();

        assert!(first.is_empty());
        assert!(second.is_empty());
        assert_eq!(before.len(), after.len());
        assert_eq!(before[0].status, after[0].status);
        assert_eq!(before[0].modified_at, after[0].modified_at);
    }

    #[tokio::test]
    async fn closed_gate_defers_the_restart() {
        let db = Arc::new(MemoryDatabase::new());
        seed_voter(&db, "35201", "2055550101").await;
        let window = CallingHours {
            enforce: true,
            start_hour: 9,
            end_hour: 20,
            include_weekends: false,
        };
        let campaign = draft(&db, window).await;
        let clock = saturday_morning();

        let stored = manager::assert_campaign_exists(&*db, campaign.id)
            .await
            .unwrap();
        manager::begin_scheduled_send(
            &*db,
            &*clock,
            db.campaigns()
                .update_campaign_schedule(stored, clock.0)
                .await
                .unwrap(),
        )
        .await
        .unwrap();

        let dispatcher = dispatcher(db.clone(), clock.clone());
        let restarted = check_stuck(&*db, &dispatcher, &*clock).await.unwrap();
        assert!(restarted.is_empty());

        // monday reopens the window and the sweep picks it up
        let monday = monday_morning();
        let restarted = check_stuck(&*db, &dispatcher, &*monday).await.unwrap();
        assert_eq!(restarted, vec![campaign.id]);
    }
}
