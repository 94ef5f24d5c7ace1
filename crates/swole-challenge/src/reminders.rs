//! Per-participant reminder tasks for the final photo deadline.
//!
//! A reminder task is spawned when a participant's final-photo DM goes out
//! and aborted the moment they submit. A task that runs to exhaustion
//! disqualifies the participant.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{info, warn};
use uuid::Uuid;

use swole_db::Database;
use swole_gateway::ChatGateway;
use swole_types::content::OutboundMessage;

use crate::config::LifecycleConfig;

pub const DISQUALIFICATION_REASON: &str = "No final photos submitted";

/// Tracks live reminder tasks keyed by (challenge, participant) so that
/// submission or challenge completion can abort them.
#[derive(Default)]
pub struct ReminderRegistry {
    tasks: Mutex<HashMap<(Uuid, Uuid), JoinHandle<()>>>,
}

impl ReminderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a task, aborting any previous one for the same participant.
    pub fn start(&self, challenge_id: Uuid, user_id: Uuid, handle: JoinHandle<()>) {
        let mut tasks = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(old) = tasks.insert((challenge_id, user_id), handle) {
            old.abort();
        }
    }

    pub fn cancel(&self, challenge_id: Uuid, user_id: Uuid) {
        let mut tasks = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(handle) = tasks.remove(&(challenge_id, user_id)) {
            handle.abort();
        }
    }

    /// Abort every reminder for a challenge (voting ended, or cancelled).
    pub fn cancel_for_challenge(&self, challenge_id: Uuid) {
        let mut tasks = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
        tasks.retain(|(ch, _), handle| {
            if *ch == challenge_id {
                handle.abort();
                false
            } else {
                true
            }
        });
    }

    pub fn active_count(&self) -> usize {
        self.tasks.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

/// Sleep out the quiet period, then nag hourly until the participant submits
/// or the reminder budget runs out.
pub async fn reminder_loop(
    db: Arc<Database>,
    gateway: Arc<dyn ChatGateway>,
    cfg: LifecycleConfig,
    challenge_id: Uuid,
    user_id: Uuid,
) {
    let quiet = cfg.submission_window.saturating_sub(cfg.reminder_lead);
    tokio::time::sleep(quiet).await;

    for sent in 0..cfg.max_reminders {
        match db.is_submitted(challenge_id, user_id) {
            Ok(true) => return,
            Ok(false) => {}
            Err(e) => {
                warn!("Reminder check failed for {}: {:#}", user_id, e);
                return;
            }
        }

        let remaining = cfg
            .reminder_lead
            .saturating_sub(cfg.reminder_interval * sent);
        let nag = OutboundMessage::embed(
            "⏰ Final photos reminder",
            format!(
                "You have {} left to send your final progress photos. \
                 Reply here whenever you're ready!",
                format_remaining(remaining)
            ),
        );
        if let Err(e) = gateway.send_dm(user_id, nag).await {
            warn!("Reminder DM to {} failed: {}", user_id, e);
            if e.is_unreachable() {
                // Stop nagging, but sleep out the rest of the reminder budget
                // so the deadline lands at the same time as for everyone else.
                let rest = cfg.reminder_interval * (cfg.max_reminders - sent);
                tokio::time::sleep(rest).await;
                break;
            }
        }

        tokio::time::sleep(cfg.reminder_interval).await;
    }

    // Budget exhausted. Re-check before disqualifying; the conditional update
    // in the database keeps this safe against a concurrent submission.
    match db.disqualify(challenge_id, user_id, DISQUALIFICATION_REASON) {
        Ok(true) => {
            info!("Disqualified {} in {}: deadline passed", user_id, challenge_id);
            let notice = OutboundMessage::embed(
                "Challenge update",
                "The submission deadline has passed without your final photos, \
                 so you've been removed from the voting round. \
                 We hope to see you in the next challenge! 💪",
            );
            if let Err(e) = gateway.send_dm(user_id, notice).await {
                warn!("Disqualification DM to {} failed: {}", user_id, e);
            }
        }
        Ok(false) => {} // Submitted in the meantime.
        Err(e) => warn!("Disqualify failed for {}: {:#}", user_id, e),
    }
}

fn format_remaining(d: Duration) -> String {
    let hours = d.as_secs() / 3600;
    match hours {
        0 => "less than an hour".to_string(),
        1 => "about 1 hour".to_string(),
        n => format!("about {n} hours"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use swole_db::NewChallenge;
    use swole_gateway::memory::InMemoryGateway;

    fn setup() -> (Arc<Database>, Arc<InMemoryGateway>, Uuid, Uuid) {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let gateway = Arc::new(InMemoryGateway::new());
        let ch = Uuid::new_v4();
        let user = Uuid::new_v4();
        let now = Utc::now();
        db.create_challenge(&NewChallenge {
            id: ch,
            name: "Cut".into(),
            goal: "Lean out".into(),
            start_at: now,
            end_at: now,
            channel_id: Uuid::new_v4(),
        })
        .unwrap();
        db.insert_participant(ch, user, "Max", now).unwrap();
        (db, gateway, ch, user)
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_reminders_disqualify() {
        let (db, gateway, ch, user) = setup();
        let cfg = LifecycleConfig {
            submission_window: Duration::from_secs(24 * 3600),
            reminder_lead: Duration::from_secs(6 * 3600),
            reminder_interval: Duration::from_secs(3600),
            max_reminders: 6,
            ..LifecycleConfig::default()
        };

        reminder_loop(db.clone(), gateway.clone(), cfg, ch, user).await;

        assert_eq!(gateway.dms_to(user).len(), 7); // 6 reminders + DQ notice
        let p = db.get_participant(ch, user).unwrap().unwrap();
        assert!(p.disqualified);
        assert_eq!(
            p.disqualification_reason.as_deref(),
            Some(DISQUALIFICATION_REASON)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_submission_stops_reminders() {
        let (db, gateway, ch, user) = setup();
        db.record_final_submission(ch, user, &[], Some(180.0), Utc::now())
            .unwrap();

        reminder_loop(
            db.clone(),
            gateway.clone(),
            LifecycleConfig::default(),
            ch,
            user,
        )
        .await;

        assert!(gateway.dms_to(user).is_empty());
        let p = db.get_participant(ch, user).unwrap().unwrap();
        assert!(!p.disqualified);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unreachable_user_disqualified_at_deadline() {
        let (db, gateway, ch, user) = setup();
        gateway.set_unreachable(user);
        let cfg = LifecycleConfig::default();
        let window = cfg.submission_window;

        let started = tokio::time::Instant::now();
        reminder_loop(db.clone(), gateway.clone(), cfg, ch, user).await;

        // Closed DMs must not shorten the window: disqualification happens
        // at the deadline, not at the first failed reminder.
        assert!(started.elapsed() >= window);
        let p = db.get_participant(ch, user).unwrap().unwrap();
        assert!(p.disqualified);
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_submission_beats_unreachable_disqualification() {
        let (db, gateway, ch, user) = setup();
        gateway.set_unreachable(user);
        let cfg = LifecycleConfig::default();
        let window = cfg.submission_window;

        let db_clone = db.clone();
        let submit = tokio::spawn(async move {
            tokio::time::sleep(window - Duration::from_secs(60)).await;
            db_clone
                .record_final_submission(ch, user, &[], Some(180.0), Utc::now())
                .unwrap();
        });

        reminder_loop(db.clone(), gateway.clone(), cfg, ch, user).await;
        submit.await.unwrap();

        let p = db.get_participant(ch, user).unwrap().unwrap();
        assert!(!p.disqualified);
    }

    #[tokio::test]
    async fn test_registry_replaces_and_cancels() {
        let registry = ReminderRegistry::new();
        let ch = Uuid::new_v4();
        let user = Uuid::new_v4();

        registry.start(ch, user, tokio::spawn(std::future::pending::<()>()));
        registry.start(ch, user, tokio::spawn(std::future::pending::<()>()));
        assert_eq!(registry.active_count(), 1);

        registry.start(ch, Uuid::new_v4(), tokio::spawn(std::future::pending::<()>()));
        registry.cancel(ch, user);
        assert_eq!(registry.active_count(), 1);

        registry.cancel_for_challenge(ch);
        assert_eq!(registry.active_count(), 0);
    }
}
