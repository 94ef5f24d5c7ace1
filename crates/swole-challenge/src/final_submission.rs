//! End-of-challenge photo collection.
//!
//! When a challenge ends, every participant who hasn't submitted gets a DM
//! kicking off a final-photo conversation, plus a reminder task that nags as
//! the deadline approaches. Failures are per-participant: one closed DM inbox
//! never blocks the rest of the roster.

use std::sync::Arc;

use futures_util::future::join_all;
use tracing::{info, warn};
use uuid::Uuid;

use swole_db::Database;
use swole_gateway::{ChatGateway, GatewayError, ReplyFilter};
use swole_types::content::OutboundMessage;
use swole_types::models::{Challenge, PhotoRef};

use crate::config::LifecycleConfig;
use crate::onboarding::parse_weight;
use crate::poses::POSES;
use crate::reminders::{ReminderRegistry, reminder_loop};

/// Kick off final-photo collection for everyone still owed a DM.
/// Returns (dispatched, failed).
pub async fn dispatch_all(
    db: &Arc<Database>,
    gateway: &Arc<dyn ChatGateway>,
    cfg: &LifecycleConfig,
    reminders: &Arc<ReminderRegistry>,
    challenge: &Challenge,
) -> anyhow::Result<(usize, usize)> {
    let pending = db.participants_needing_final_dm(challenge.id)?;
    let attempts = pending.iter().map(|p| {
        dispatch_one(
            db.clone(),
            gateway.clone(),
            cfg.clone(),
            reminders.clone(),
            challenge.id,
            p.user_id,
        )
    });

    let results = join_all(attempts).await;
    let sent = results.iter().filter(|ok| **ok).count();
    let failed = results.len() - sent;
    if failed > 0 {
        warn!(
            "Final-photo DMs for {}: {} sent, {} unreachable",
            challenge.id, sent, failed
        );
    }
    Ok((sent, failed))
}

/// DM one participant and, if they're reachable, hand them off to the
/// conversation task. Either way the outcome is recorded so the next
/// controller pass skips them.
async fn dispatch_one(
    db: Arc<Database>,
    gateway: Arc<dyn ChatGateway>,
    cfg: LifecycleConfig,
    reminders: Arc<ReminderRegistry>,
    challenge_id: Uuid,
    user_id: Uuid,
) -> bool {
    // The reminder clock starts at dispatch, whether or not the intro lands:
    // it is also what eventually disqualifies silent participants.
    reminders.start(
        challenge_id,
        user_id,
        tokio::spawn(reminder_loop(
            db.clone(),
            gateway.clone(),
            cfg.clone(),
            challenge_id,
            user_id,
        )),
    );

    let hours = cfg.submission_window.as_secs() / 3600;
    let intro = OutboundMessage::embed(
        "🏁 The challenge has ended!",
        format!(
            "Time to show off your results. You have **{hours} hours** to send \
             your final progress photos. I'll walk you through the same poses \
             as when you started — reply `skip` to pass on any of them."
        ),
    );

    match gateway.send_dm(user_id, intro).await {
        Ok(_) => {
            if let Err(e) = db.mark_final_dm(challenge_id, user_id, false) {
                warn!("Recording final DM for {} failed: {:#}", user_id, e);
            }
            tokio::spawn(collect_submission(db, gateway, cfg, reminders, challenge_id, user_id));
            true
        }
        Err(e) => {
            warn!("Final-photo DM to {} failed: {}", user_id, e);
            if let Err(e) = db.mark_final_dm(challenge_id, user_id, true) {
                warn!("Recording failed DM for {} failed: {:#}", user_id, e);
            }
            false
        }
    }
}

/// The final-photo conversation. Pose prompts accept a photo or `skip`; going
/// silent at any point ends the conversation without a submission (the
/// reminder task keeps running, so they can still be nagged back).
pub(crate) async fn collect_submission(
    db: Arc<Database>,
    gateway: Arc<dyn ChatGateway>,
    cfg: LifecycleConfig,
    reminders: Arc<ReminderRegistry>,
    challenge_id: Uuid,
    user_id: Uuid,
) {
    match conversation(&db, gateway.as_ref(), &cfg, challenge_id, user_id).await {
        Ok(true) => {
            reminders.cancel(challenge_id, user_id);
            info!("Final submission recorded for {} in {}", user_id, challenge_id);
        }
        Ok(false) => {
            info!("Final submission not completed by {} in {}", user_id, challenge_id);
        }
        Err(e) => warn!("Final submission failed for {}: {:#}", user_id, e),
    }
}

async fn conversation(
    db: &Database,
    gateway: &dyn ChatGateway,
    cfg: &LifecycleConfig,
    challenge_id: Uuid,
    user_id: Uuid,
) -> anyhow::Result<bool> {
    let mut photos: Vec<PhotoRef> = Vec::with_capacity(POSES.len());

    'poses: for (i, pose) in POSES.iter().enumerate() {
        let prompt = OutboundMessage::embed(
            format!("Final photo {}/{}: {}", i + 1, POSES.len(), pose.name),
            format!("{}\nSend the photo, or reply `skip`.", pose.instruction),
        )
        .with_footer(format!("Tip: {}", pose.tip))
        .with_photos(vec![PhotoRef::new(pose.example)]);
        gateway.send_dm(user_id, prompt).await?;

        // A few chances per pose to send something usable.
        for _ in 0..3 {
            match gateway
                .await_dm_reply(user_id, ReplyFilter::Any, cfg.photo_wait)
                .await
            {
                Ok(reply) => {
                    if let Some(photo) = reply.photos.into_iter().next() {
                        photos.push(photo);
                        continue 'poses;
                    }
                    if reply.content.trim().eq_ignore_ascii_case("skip") {
                        continue 'poses;
                    }
                    gateway
                        .send_dm(
                            user_id,
                            OutboundMessage::text("Send a photo, or reply `skip` to move on."),
                        )
                        .await?;
                }
                Err(GatewayError::Timeout) => {
                    gateway
                        .send_dm(
                            user_id,
                            OutboundMessage::text(
                                "Looks like now isn't a good time. Message me before the \
                                 deadline and we'll finish your submission.",
                            ),
                        )
                        .await?;
                    return Ok(false);
                }
                Err(e) => return Err(e.into()),
            }
        }
        // Three unusable replies plays the same as going quiet.
        return Ok(false);
    }

    if photos.is_empty() {
        gateway
            .send_dm(
                user_id,
                OutboundMessage::text(
                    "You skipped every pose — at least one final photo is needed \
                     to enter the voting round. Message me to try again.",
                ),
            )
            .await?;
        return Ok(false);
    }

    gateway
        .send_dm(
            user_id,
            OutboundMessage::text("Almost done! What's your final weight? (just the number)"),
        )
        .await?;
    // Weight is optional for the submission: if we can't get a usable number
    // the photos still count.
    let final_weight = read_final_weight(gateway, cfg, user_id).await?;

    let recorded = db.record_final_submission(
        challenge_id,
        user_id,
        &photos,
        final_weight,
        chrono::Utc::now(),
    )?;
    if !recorded {
        gateway
            .send_dm(
                user_id,
                OutboundMessage::text("You already have a submission on record — you're good!"),
            )
            .await?;
        return Ok(true);
    }

    let done = OutboundMessage::embed(
        "Submission received! 🎉",
        format!(
            "{} photo(s) recorded{}. Voting opens once everyone is in — good luck!",
            photos.len(),
            match final_weight {
                Some(w) => format!(", final weight {w}"),
                None => String::new(),
            }
        ),
    );
    gateway.send_dm(user_id, done).await?;
    Ok(true)
}

async fn read_final_weight(
    gateway: &dyn ChatGateway,
    cfg: &LifecycleConfig,
    user_id: Uuid,
) -> anyhow::Result<Option<f64>> {
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
                        "I couldn't read that — just the number, like `82.5`. \
                         (Or ignore this and your photos will be submitted as-is.)",
                    ),
                )
                .await?;
        }
    }
    Ok(None)
}
