//! Onboarding DM conversation, run for each user who joins a challenge.
//!
//! Collects the four starting poses, current weight, goal weight and a
//! personal goal, then writes everything in one update. An abandoned
//! conversation leaves the enrollment intact; re-running it overwrites
//! whatever partial data the earlier attempt saved.

use std::sync::Arc;

use tracing::{info, warn};
use uuid::Uuid;

use swole_db::Database;
use swole_gateway::{ChatGateway, GatewayError, ReplyFilter};
use swole_types::content::OutboundMessage;
use swole_types::models::{Challenge, PhotoRef};

use crate::config::LifecycleConfig;
use crate::poses::POSES;

pub async fn run_onboarding(
    db: Arc<Database>,
    gateway: Arc<dyn ChatGateway>,
    cfg: LifecycleConfig,
    challenge: Challenge,
    user_id: Uuid,
) {
    let conversation = conversation(&db, gateway.as_ref(), &cfg, &challenge, user_id);
    match tokio::time::timeout(cfg.onboarding_window, conversation).await {
        Ok(Ok(true)) => info!("Onboarding complete for {} in {}", user_id, challenge.id),
        Ok(Ok(false)) => info!("Onboarding abandoned by {} in {}", user_id, challenge.id),
        Ok(Err(e)) => warn!("Onboarding failed for {}: {:#}", user_id, e),
        Err(_) => {
            warn!("Onboarding window expired for {} in {}", user_id, challenge.id);
        }
    }
}

/// Returns Ok(true) when onboarding data was recorded, Ok(false) when the
/// user stopped responding partway through.
async fn conversation(
    db: &Database,
    gateway: &dyn ChatGateway,
    cfg: &LifecycleConfig,
    challenge: &Challenge,
    user_id: Uuid,
) -> anyhow::Result<bool> {
    let welcome = OutboundMessage::embed(
        format!("Welcome to {}! 🏋️", challenge.name),
        format!(
            "**Goal:** {}\n\nLet's get your starting point on record. \
             I'll ask for 4 progress photos, your current weight, your goal \
             weight, and what you personally want to get out of this.",
            challenge.goal
        ),
    );
    gateway.send_dm(user_id, welcome).await?;

    let mut photos: Vec<PhotoRef> = Vec::with_capacity(POSES.len());
    for (i, pose) in POSES.iter().enumerate() {
        let prompt = OutboundMessage::embed(
            format!("Photo {}/{}: {}", i + 1, POSES.len(), pose.name),
            pose.instruction.to_string(),
        )
        .with_footer(format!("Tip: {}", pose.tip))
        .with_photos(vec![PhotoRef::new(pose.example)]);
        gateway.send_dm(user_id, prompt).await?;

        match gateway
            .await_dm_reply(user_id, ReplyFilter::Photo, cfg.photo_wait)
            .await
        {
            Ok(reply) => {
                if let Some(photo) = reply.photos.into_iter().next() {
                    photos.push(photo);
                }
            }
            Err(GatewayError::Timeout) => {
                let bye = OutboundMessage::text(
                    "No photo received in time. No worries — you're still in! \
                     Message me whenever you're ready and we'll pick this up again.",
                );
                gateway.send_dm(user_id, bye).await?;
                return Ok(false);
            }
            Err(e) => return Err(e.into()),
        }
    }

    let Some(current_weight) = ask_weight(
        gateway,
        cfg,
        user_id,
        "What's your current weight? (just the number)",
    )
    .await?
    else {
        return Ok(false);
    };

    let Some(goal_weight) = ask_weight(
        gateway,
        cfg,
        user_id,
        "What weight are you aiming for by the end?",
    )
    .await?
    else {
        return Ok(false);
    };

    gateway
        .send_dm(
            user_id,
            OutboundMessage::text(
                "Last one: in a sentence, what do you want to get out of this challenge?",
            ),
        )
        .await?;
    let personal_goal = match gateway
        .await_dm_reply(user_id, ReplyFilter::Text, cfg.text_wait)
        .await
    {
        Ok(reply) => reply.content.trim().to_string(),
        Err(GatewayError::Timeout) => return Ok(false),
        Err(e) => return Err(e.into()),
    };

    db.record_onboarding(
        challenge.id,
        user_id,
        current_weight,
        goal_weight,
        &personal_goal,
        &photos,
    )?;

    let done = OutboundMessage::embed(
        "You're all set! ✅",
        format!(
            "Starting weight **{current_weight}**, goal **{goal_weight}**. \
             Good luck — see you at the finish line!"
        ),
    );
    gateway.send_dm(user_id, done).await?;
    Ok(true)
}

/// Ask for a weight. One re-prompt on an unparseable answer, then give up.
/// Returns Ok(None) when the user stops answering or fails twice.
async fn ask_weight(
    gateway: &dyn ChatGateway,
    cfg: &LifecycleConfig,
    user_id: Uuid,
    question: &str,
) -> anyhow::Result<Option<f64>> {
    gateway
        .send_dm(user_id, OutboundMessage::text(question))
        .await?;

    for attempt in 0..2 {
        let reply = match gateway
            .await_dm_reply(user_id, ReplyFilter::Text, cfg.text_wait)
            .await
        {
            Ok(reply) => reply,
            Err(GatewayError::Timeout) => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        if let Some(weight) = parse_weight(&reply.content) {
            return Ok(Some(weight));
        }
        if attempt == 0 {
            gateway
                .send_dm(
                    user_id,
                    OutboundMessage::text(
                        "I couldn't read that as a weight — try just the number, like `82.5`.",
                    ),
                )
                .await?;
        }
    }
    Ok(None)
}

/// Parse a weight out of a DM. Accepts a bare number, optionally followed by
/// a unit ("82.5", "180 lbs", "75kg"). Rejects non-positive and absurd values.
pub(crate) fn parse_weight(raw: &str) -> Option<f64> {
    let token = raw.trim().split_whitespace().next()?;
    let numeric = token.trim_end_matches(|c: char| c.is_alphabetic());
    let value: f64 = numeric.parse().ok()?;
    (value > 0.0 && value <= 1000.0).then_some(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use swole_db::NewChallenge;
    use swole_gateway::InboundReply;
    use swole_gateway::memory::InMemoryGateway;

    fn setup() -> (Arc<Database>, Arc<InMemoryGateway>, Challenge, Uuid) {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let gateway = Arc::new(InMemoryGateway::new());
        let id = Uuid::new_v4();
        let now = Utc::now();
        db.create_challenge(&NewChallenge {
            id,
            name: "Winter Bulk".into(),
            goal: "Build mass".into(),
            start_at: now,
            end_at: now + chrono::Duration::days(30),
            channel_id: Uuid::new_v4(),
        })
        .unwrap();
        let challenge = db.get_challenge(id).unwrap().unwrap();
        let user = Uuid::new_v4();
        db.insert_participant(id, user, "Max", now).unwrap();
        (db, gateway, challenge, user)
    }

    fn photo_reply(name: &str) -> InboundReply {
        InboundReply {
            content: String::new(),
            photos: vec![PhotoRef::new(format!("cdn://{name}"))],
        }
    }

    #[tokio::test]
    async fn test_full_onboarding_records_everything() {
        let (db, gateway, challenge, user) = setup();
        for i in 0..4 {
            gateway.script_reply(user, photo_reply(&format!("pose{i}")));
        }
        gateway.script_text(user, "200");
        gateway.script_text(user, "185 lbs");
        gateway.script_text(user, "Fit into my old jeans");

        run_onboarding(
            db.clone(),
            gateway.clone(),
            LifecycleConfig::fast(),
            challenge.clone(),
            user,
        )
        .await;

        let p = db.get_participant(challenge.id, user).unwrap().unwrap();
        assert_eq!(p.current_weight, Some(200.0));
        assert_eq!(p.goal_weight, Some(185.0));
        assert_eq!(p.personal_goal.as_deref(), Some("Fit into my old jeans"));
        assert_eq!(p.initial_photos.len(), 4);
        assert_eq!(p.initial_photos[2], PhotoRef::new("cdn://pose2"));
    }

    #[tokio::test]
    async fn test_silence_mid_photos_keeps_enrollment() {
        let (db, gateway, challenge, user) = setup();
        gateway.script_reply(user, photo_reply("pose0"));
        // Then nothing: the second photo prompt times out.

        run_onboarding(
            db.clone(),
            gateway.clone(),
            LifecycleConfig::fast(),
            challenge.clone(),
            user,
        )
        .await;

        let p = db.get_participant(challenge.id, user).unwrap().unwrap();
        assert!(p.initial_photos.is_empty());
        assert!(p.current_weight.is_none());
        // Final DM explains the pause.
        let last = gateway.dms_to(user).pop().unwrap();
        assert!(last.body.contains("still in"));
    }

    #[tokio::test]
    async fn test_bad_weight_gets_one_retry() {
        let (db, gateway, challenge, user) = setup();
        for i in 0..4 {
            gateway.script_reply(user, photo_reply(&format!("pose{i}")));
        }
        gateway.script_text(user, "a lot");
        gateway.script_text(user, "198.5");
        gateway.script_text(user, "190");
        gateway.script_text(user, "Stay consistent");

        run_onboarding(
            db.clone(),
            gateway.clone(),
            LifecycleConfig::fast(),
            challenge.clone(),
            user,
        )
        .await;

        let p = db.get_participant(challenge.id, user).unwrap().unwrap();
        assert_eq!(p.current_weight, Some(198.5));
    }

    #[tokio::test]
    async fn test_two_bad_weights_abort() {
        let (db, gateway, challenge, user) = setup();
        for i in 0..4 {
            gateway.script_reply(user, photo_reply(&format!("pose{i}")));
        }
        gateway.script_text(user, "dunno");
        gateway.script_text(user, "-5");

        run_onboarding(
            db.clone(),
            gateway.clone(),
            LifecycleConfig::fast(),
            challenge.clone(),
            user,
        )
        .await;

        let p = db.get_participant(challenge.id, user).unwrap().unwrap();
        assert!(p.current_weight.is_none());
    }

    #[test]
    fn test_parse_weight() {
        assert_eq!(parse_weight("82.5"), Some(82.5));
        assert_eq!(parse_weight(" 180 lbs "), Some(180.0));
        assert_eq!(parse_weight("75kg"), Some(75.0));
        assert_eq!(parse_weight("zero"), None);
        assert_eq!(parse_weight("0"), None);
        assert_eq!(parse_weight("1200"), None);
        assert_eq!(parse_weight(""), None);
    }
}
