//! The lifecycle controller: a polling loop that walks every active
//! challenge through end notification, photo collection, voting and results.
//!
//! Every transition is a conditional database update, so ticks are idempotent
//! and the process can crash and resume anywhere without double-posting.

use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use tracing::{info, warn};
use uuid::Uuid;

use async_trait::async_trait;
use swole_db::{Database, NewChallenge};
use swole_gateway::{ChatGateway, ReactionSink};
use swole_types::content::OutboundMessage;
use swole_types::events::ReactionEvent;
use swole_types::models::{Challenge, ChallengeStatus};

use crate::config::{LifecycleConfig, chrono_duration};
use crate::final_submission;
use crate::onboarding;
use crate::reminders::ReminderRegistry;
use crate::voting::{self, SubmissionOrderTieBreaker, TieBreaker};

pub struct LifecycleController {
    db: Arc<Database>,
    gateway: Arc<dyn ChatGateway>,
    cfg: LifecycleConfig,
    reminders: Arc<ReminderRegistry>,
    tiebreaker: Arc<dyn TieBreaker>,
}

impl LifecycleController {
    pub fn new(db: Arc<Database>, gateway: Arc<dyn ChatGateway>, cfg: LifecycleConfig) -> Self {
        Self {
            db,
            gateway,
            cfg,
            reminders: Arc::new(ReminderRegistry::new()),
            tiebreaker: Arc::new(SubmissionOrderTieBreaker),
        }
    }

    pub fn with_tiebreaker(mut self, tiebreaker: Arc<dyn TieBreaker>) -> Self {
        self.tiebreaker = tiebreaker;
        self
    }

    /// Create and announce a challenge. The announcement carries the join
    /// reaction; reacting to it enrolls you.
    pub async fn create_challenge(
        &self,
        name: &str,
        goal: &str,
        duration: std::time::Duration,
        channel_id: Uuid,
    ) -> Result<Challenge> {
        anyhow::ensure!(!name.trim().is_empty(), "challenge name must not be empty");
        anyhow::ensure!(
            name.chars().count() <= 50,
            "challenge name must be at most 50 characters"
        );
        let id = Uuid::new_v4();
        let now = Utc::now();
        self.db.create_challenge(&NewChallenge {
            id,
            name: name.to_string(),
            goal: goal.to_string(),
            start_at: now,
            end_at: now + chrono_duration(duration),
            channel_id,
        })?;

        let days = duration.as_secs() / 86_400;
        let announcement = OutboundMessage::embed(
            format!("🏋️ New challenge: {name}"),
            format!(
                "**Goal:** {goal}\n**Duration:** {days} day(s)\n\nReact with {} \
                 to join — I'll DM you to get your starting photos and weight.",
                self.cfg.join_emoji
            ),
        );
        let message_id = self.gateway.send_channel(channel_id, announcement).await?;
        self.gateway
            .add_reaction(message_id, &self.cfg.join_emoji)
            .await?;
        self.db.set_announcement(id, message_id)?;

        info!("Challenge '{}' created ({})", name, id);
        self.reload(id)
    }

    /// Poll forever. One failing tick is logged and retried next interval.
    pub async fn run(self: Arc<Self>) {
        let mut interval = tokio::time::interval(self.cfg.poll_interval);
        loop {
            interval.tick().await;
            self.tick().await;
        }
    }

    /// One pass over every active challenge. Per-challenge failures are
    /// isolated: a broken challenge can't stall the others.
    pub async fn tick(&self) {
        let challenges = match self.db.active_challenges() {
            Ok(challenges) => challenges,
            Err(e) => {
                warn!("Listing active challenges failed: {:#}", e);
                return;
            }
        };
        for challenge in challenges {
            let id = challenge.id;
            if let Err(e) = self.advance(challenge).await {
                warn!("Advancing challenge {} failed: {:#}", id, e);
            }
        }
    }

    async fn advance(&self, mut challenge: Challenge) -> Result<()> {
        let now = Utc::now();
        if challenge.status != ChallengeStatus::Active {
            return Ok(());
        }

        // Challenge end: announce, fan out final-photo DMs, start the clock.
        // Keyed on photo_collection_started so an interrupted pass (announced,
        // every DM recorded, deadline not yet set) is resumed on the next
        // tick; the announcement itself is CAS-guarded inside end_pass.
        if now >= challenge.end_at
            && (!challenge.photo_collection_started
                || self.db.count_needing_final_dm(challenge.id)? > 0)
        {
            self.end_pass(&challenge).await?;
            challenge = self.reload(challenge.id)?;
        }

        // Photo deadline: either open voting or cancel for lack of entries.
        if challenge.photo_collection_started && !challenge.voting_started {
            if let Some(deadline) = challenge.photo_collection_deadline {
                if now >= deadline {
                    self.deadline_pass(&challenge).await?;
                    challenge = self.reload(challenge.id)?;
                }
            }
        }

        // Voting end: tally and post results.
        if challenge.voting_started && !challenge.results_posted {
            if let Some(end) = challenge.voting_end_time {
                if now >= end {
                    self.voting_end_pass(&challenge).await?;
                }
            }
        }

        Ok(())
    }

    async fn end_pass(&self, challenge: &Challenge) -> Result<()> {
        if self.db.mark_end_notification_sent(challenge.id)? {
            info!("Challenge {} ended, notifying channel", challenge.id);
            let hours = self.cfg.submission_window.as_secs() / 3600;
            let notice = OutboundMessage::embed(
                format!("🏁 {} has ended!", challenge.name),
                format!(
                    "Participants: check your DMs — you have {hours} hours to \
                     send in your final progress photos. Voting starts after \
                     the deadline."
                ),
            );
            self.gateway
                .send_channel(challenge.channel_id, notice)
                .await?;
        }

        final_submission::dispatch_all(
            &self.db,
            &self.gateway,
            &self.cfg,
            &self.reminders,
            challenge,
        )
        .await?;

        // Only once every pending DM has an outcome does the deadline start.
        if self.db.count_needing_final_dm(challenge.id)? == 0 {
            let deadline = Utc::now() + chrono_duration(self.cfg.submission_window);
            if self.db.mark_photo_collection_started(challenge.id, deadline)? {
                info!(
                    "Photo collection open for {} until {}",
                    challenge.id, deadline
                );
            }
        }
        Ok(())
    }

    async fn deadline_pass(&self, challenge: &Challenge) -> Result<()> {
        if self.db.count_finalists(challenge.id)? < 2 {
            if self.db.complete_without_voting(challenge.id)? {
                self.reminders.cancel_for_challenge(challenge.id);
                info!("Challenge {} cancelled: not enough submissions", challenge.id);
                let notice = OutboundMessage::embed(
                    format!("{} is over", challenge.name),
                    "Fewer than two finalists submitted final photos, so there \
                     won't be a voting round this time. Thanks to everyone who \
                     took part — see you at the next one! 💪",
                );
                self.gateway
                    .send_channel(challenge.channel_id, notice)
                    .await?;
            }
            return Ok(());
        }

        let voting_end = Utc::now() + chrono_duration(self.cfg.voting_window);
        if self.db.mark_voting_started(challenge.id, voting_end)? {
            let fresh = self.reload(challenge.id)?;
            voting::start_voting(&self.db, &self.gateway, &self.cfg, &fresh).await?;
        }
        Ok(())
    }

    async fn voting_end_pass(&self, challenge: &Challenge) -> Result<()> {
        // Ranks are persisted before the completion flip: a failure anywhere
        // in here leaves the flags unset so the next tick retries, while the
        // flip still guards the public results post against double-posting.
        let ranked = voting::settle(
            &self.db,
            &self.gateway,
            &self.cfg,
            self.tiebreaker.as_ref(),
            challenge,
        )
        .await?;
        if self.db.mark_completed(challenge.id)? {
            self.reminders.cancel_for_challenge(challenge.id);
            voting::announce(
                &self.db,
                &self.gateway,
                self.tiebreaker.as_ref(),
                challenge,
                &ranked,
            )
            .await?;
        }
        Ok(())
    }

    fn reload(&self, id: Uuid) -> Result<Challenge> {
        self.db
            .get_challenge(id)?
            .with_context(|| format!("challenge {id} disappeared"))
    }
}

#[async_trait]
impl ReactionSink for LifecycleController {
    /// Enrollment: a join reaction on an active challenge's announcement.
    async fn handle_reaction(&self, event: ReactionEvent) {
        if event.is_bot || event.emoji != self.cfg.join_emoji {
            return;
        }
        let challenge = match self.db.challenge_by_announcement(event.message_id) {
            Ok(Some(challenge)) => challenge,
            Ok(None) => return, // Reaction on something that isn't an open announcement.
            Err(e) => {
                warn!("Announcement lookup failed: {:#}", e);
                return;
            }
        };

        let joined = match self.db.insert_participant(
            challenge.id,
            event.user_id,
            &event.username,
            Utc::now(),
        ) {
            Ok(joined) => joined,
            Err(e) => {
                warn!("Enrolling {} failed: {:#}", event.user_id, e);
                return;
            }
        };

        if !joined {
            let note = OutboundMessage::text(format!(
                "You're already in **{}** — no need to join twice! 💪",
                challenge.name
            ));
            if let Err(e) = self.gateway.send_dm(event.user_id, note).await {
                warn!("Duplicate-join DM to {} failed: {}", event.user_id, e);
            }
            return;
        }

        info!("{} joined challenge {}", event.username, challenge.id);
        let ack = OutboundMessage::text(format!(
            "💪 **{}** joined **{}**!",
            event.username, challenge.name
        ));
        if let Err(e) = self.gateway.send_channel(challenge.channel_id, ack).await {
            warn!("Join announcement failed: {}", e);
        }

        tokio::spawn(onboarding::run_onboarding(
            self.db.clone(),
            self.gateway.clone(),
            self.cfg.clone(),
            challenge,
            event.user_id,
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use std::time::Duration as StdDuration;
    use swole_gateway::memory::InMemoryGateway;
    use swole_types::events::Reactor;
    use swole_types::models::PhotoRef;

    fn setup() -> (Arc<Database>, Arc<InMemoryGateway>, LifecycleController) {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let gateway = Arc::new(InMemoryGateway::new());
        let gw: Arc<dyn ChatGateway> = gateway.clone();
        // Default timings: all deadlines in tests are set explicitly, and the
        // in-memory gateway never actually waits on reply timeouts.
        let controller = LifecycleController::new(db.clone(), gw, LifecycleConfig::default());
        (db, gateway, controller)
    }

    fn ended_challenge(db: &Database) -> Challenge {
        let id = Uuid::new_v4();
        let now = Utc::now();
        db.create_challenge(&NewChallenge {
            id,
            name: "Cut".into(),
            goal: "Lean out".into(),
            start_at: now - Duration::days(30),
            end_at: now - Duration::hours(1),
            channel_id: Uuid::new_v4(),
        })
        .unwrap();
        db.get_challenge(id).unwrap().unwrap()
    }

    fn enroll(db: &Database, ch: Uuid, name: &str) -> Uuid {
        let user = Uuid::new_v4();
        db.insert_participant(ch, user, name, Utc::now()).unwrap();
        user
    }

    fn submit(db: &Database, ch: Uuid, user: Uuid) {
        db.record_final_submission(
            ch,
            user,
            &[PhotoRef::new("cdn://final")],
            Some(180.0),
            Utc::now(),
        )
        .unwrap();
    }

    #[tokio::test]
    async fn test_end_pass_is_idempotent() {
        let (db, gateway, controller) = setup();
        let challenge = ended_challenge(&db);
        enroll(&db, challenge.id, "a");
        enroll(&db, challenge.id, "b");

        controller.tick().await;
        controller.tick().await;

        // One ending announcement despite two ticks.
        assert_eq!(gateway.channel_posts().len(), 1);
        let fresh = db.get_challenge(challenge.id).unwrap().unwrap();
        assert!(fresh.end_notification_sent);
        assert!(fresh.photo_collection_started);
        assert!(fresh.photo_collection_deadline.is_some());
        assert_eq!(db.count_needing_final_dm(challenge.id).unwrap(), 0);
    }

    #[tokio::test]
    async fn test_interrupted_end_pass_resumes_photo_collection() {
        let (db, gateway, controller) = setup();
        let challenge = ended_challenge(&db);
        let user = enroll(&db, challenge.id, "a");
        // Crash mid-pass: the ending was announced and the final-photo DM
        // recorded, but the collection deadline never got set.
        db.mark_end_notification_sent(challenge.id).unwrap();
        db.mark_final_dm(challenge.id, user, false).unwrap();

        controller.tick().await;

        let fresh = db.get_challenge(challenge.id).unwrap().unwrap();
        assert!(fresh.photo_collection_started);
        assert!(fresh.photo_collection_deadline.is_some());
        // No duplicate ending announcement on resume.
        assert!(gateway.channel_posts().is_empty());
        assert!(gateway.dms_to(user).is_empty());
    }

    #[tokio::test]
    async fn test_unreachable_participant_does_not_block_deadline() {
        let (db, gateway, controller) = setup();
        let challenge = ended_challenge(&db);
        let blocked = enroll(&db, challenge.id, "blocked");
        enroll(&db, challenge.id, "fine");
        gateway.set_unreachable(blocked);

        controller.tick().await;

        let fresh = db.get_challenge(challenge.id).unwrap().unwrap();
        assert!(fresh.photo_collection_started);
        let p = db.get_participant(challenge.id, blocked).unwrap().unwrap();
        assert!(p.dm_failed);
    }

    #[tokio::test]
    async fn test_too_few_finalists_cancels_voting() {
        let (db, gateway, controller) = setup();
        let challenge = ended_challenge(&db);
        let solo = enroll(&db, challenge.id, "solo");
        submit(&db, challenge.id, solo);
        db.mark_end_notification_sent(challenge.id).unwrap();
        db.mark_photo_collection_started(challenge.id, Utc::now() - Duration::minutes(1))
            .unwrap();

        controller.tick().await;

        let fresh = db.get_challenge(challenge.id).unwrap().unwrap();
        assert_eq!(fresh.status, ChallengeStatus::Completed);
        assert!(fresh.results_posted);
        assert!(fresh.voting_end_time.is_none());
        let posts = gateway.channel_posts();
        assert_eq!(posts.len(), 1);
        assert!(posts[0].1.body.contains("Fewer than two"));
    }

    #[tokio::test]
    async fn test_deadline_opens_voting_with_enough_finalists() {
        let (db, gateway, controller) = setup();
        let challenge = ended_challenge(&db);
        for name in ["a", "b", "c"] {
            let u = enroll(&db, challenge.id, name);
            submit(&db, challenge.id, u);
        }
        db.mark_end_notification_sent(challenge.id).unwrap();
        db.mark_photo_collection_started(challenge.id, Utc::now() - Duration::minutes(1))
            .unwrap();

        controller.tick().await;

        let fresh = db.get_challenge(challenge.id).unwrap().unwrap();
        assert!(fresh.voting_started);
        assert!(fresh.voting_end_time.is_some());
        // Voting header + 3 comparison posts.
        assert_eq!(gateway.channel_posts().len(), 4);
        assert_eq!(db.voting_posts(challenge.id).unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_voting_end_posts_results_once() {
        let (db, gateway, controller) = setup();
        let challenge = ended_challenge(&db);
        let a = enroll(&db, challenge.id, "a");
        let b = enroll(&db, challenge.id, "b");
        submit(&db, challenge.id, a);
        submit(&db, challenge.id, b);
        db.mark_end_notification_sent(challenge.id).unwrap();
        db.mark_photo_collection_started(challenge.id, Utc::now() - Duration::hours(2))
            .unwrap();
        db.mark_voting_started(challenge.id, Utc::now() - Duration::minutes(1))
            .unwrap();
        let post_a = Uuid::new_v4();
        db.insert_voting_post(challenge.id, post_a, a).unwrap();
        db.insert_voting_post(challenge.id, Uuid::new_v4(), b).unwrap();
        gateway.set_reactors(
            post_a,
            "✅",
            vec![Reactor { user_id: Uuid::new_v4(), is_bot: false }],
        );

        controller.tick().await;
        controller.tick().await;

        let fresh = db.get_challenge(challenge.id).unwrap().unwrap();
        assert_eq!(fresh.status, ChallengeStatus::Completed);
        // Exactly one results post.
        assert_eq!(gateway.channel_posts().len(), 1);
        let pa = db.get_participant(challenge.id, a).unwrap().unwrap();
        assert_eq!(pa.final_rank, Some(1));
        assert_eq!(pa.votes_received, Some(1));
    }

    #[tokio::test]
    async fn test_create_challenge_announces_and_seeds_reaction() {
        let (db, gateway, controller) = setup();
        let channel = Uuid::new_v4();

        let challenge = controller
            .create_challenge("Spring Cut", "Drop 5%", StdDuration::from_secs(30 * 86_400), channel)
            .await
            .unwrap();

        assert_eq!(challenge.name, "Spring Cut");
        assert!(challenge.announcement_message_id.is_some());
        assert_eq!(gateway.channel_posts().len(), 1);
        assert_eq!(gateway.reactions_added().len(), 1);

        // The announcement is joinable.
        let found = db
            .challenge_by_announcement(challenge.announcement_message_id.unwrap())
            .unwrap();
        assert!(found.is_some());
    }

    #[tokio::test]
    async fn test_create_challenge_rejects_bad_names() {
        let (_db, gateway, controller) = setup();
        let channel = Uuid::new_v4();
        let long = "x".repeat(51);

        for name in ["", "   ", long.as_str()] {
            let result = controller
                .create_challenge(name, "goal", StdDuration::from_secs(86_400), channel)
                .await;
            assert!(result.is_err());
        }
        assert!(gateway.channel_posts().is_empty());
    }

    fn join_event(challenge: &Challenge, user: Uuid, name: &str, emoji: &str, is_bot: bool) -> ReactionEvent {
        ReactionEvent {
            message_id: challenge.announcement_message_id.unwrap(),
            channel_id: challenge.channel_id,
            user_id: user,
            username: name.to_string(),
            emoji: emoji.to_string(),
            is_bot,
        }
    }

    #[tokio::test]
    async fn test_join_reaction_enrolls_once() {
        let (db, gateway, controller) = setup();
        let challenge = controller
            .create_challenge("Bulk", "Gain", StdDuration::from_secs(86_400), Uuid::new_v4())
            .await
            .unwrap();
        let user = Uuid::new_v4();

        controller
            .handle_reaction(join_event(&challenge, user, "Lena", "✅", false))
            .await;
        assert!(db.get_participant(challenge.id, user).unwrap().is_some());
        // Announcement + join ack.
        assert_eq!(gateway.channel_posts().len(), 2);

        controller
            .handle_reaction(join_event(&challenge, user, "Lena", "✅", false))
            .await;
        // Duplicate: a DM, no second ack.
        assert_eq!(gateway.channel_posts().len(), 2);
        let dms = gateway.dms_to(user);
        assert!(dms.iter().any(|m| m.body.contains("already in")));
    }

    #[tokio::test]
    async fn test_bot_and_foreign_reactions_ignored() {
        let (db, _gateway, controller) = setup();
        let challenge = controller
            .create_challenge("Bulk", "Gain", StdDuration::from_secs(86_400), Uuid::new_v4())
            .await
            .unwrap();

        let bot = Uuid::new_v4();
        controller
            .handle_reaction(join_event(&challenge, bot, "bot", "✅", true))
            .await;
        assert!(db.get_participant(challenge.id, bot).unwrap().is_none());

        let user = Uuid::new_v4();
        controller
            .handle_reaction(join_event(&challenge, user, "Lena", "🔥", false))
            .await;
        assert!(db.get_participant(challenge.id, user).unwrap().is_none());
    }
}
