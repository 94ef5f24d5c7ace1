//! Peer voting: comparison posts, vote tallying and results.
//!
//! Votes are reactions on per-participant comparison posts. Bot reactions and
//! self-votes never count. Equal vote counts are resolved by a [`TieBreaker`]
//! so that every finalist gets a distinct rank.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rand::seq::SliceRandom;
use tracing::{info, warn};
use uuid::Uuid;

use swole_db::Database;
use swole_gateway::ChatGateway;
use swole_types::content::OutboundMessage;
use swole_types::models::{Challenge, Participant, PhotoRef};

use crate::config::LifecycleConfig;

const MEDALS: [&str; 5] = ["🥇", "🥈", "🥉", "4️⃣", "5️⃣"];

/// Deterministic resolution of equal vote counts.
pub trait TieBreaker: Send + Sync {
    /// Order a group of equal-vote finalists, best first.
    fn order(&self, tied: &mut [Participant]);

    /// One line for the results footer explaining how ties were resolved.
    fn describe(&self) -> &'static str;
}

/// Default policy: the earlier final submission wins the tie.
pub struct SubmissionOrderTieBreaker;

impl TieBreaker for SubmissionOrderTieBreaker {
    fn order(&self, tied: &mut [Participant]) {
        tied.sort_by_key(|p| p.submitted_at.unwrap_or(DateTime::<Utc>::MAX_UTC));
    }

    fn describe(&self) -> &'static str {
        "Tied vote counts go to the earlier final submission."
    }
}

#[derive(Debug)]
pub struct RankedFinalist {
    pub participant: Participant,
    pub votes: i64,
    pub rank: i64,
    pub tie_broken: bool,
}

/// Post the voting round: a header, then one comparison post per finalist in
/// random order (so the announcement order doesn't bias early votes), each
/// seeded with the vote reaction.
pub async fn start_voting(
    db: &Arc<Database>,
    gateway: &Arc<dyn ChatGateway>,
    cfg: &LifecycleConfig,
    challenge: &Challenge,
) -> anyhow::Result<()> {
    let mut finalists = db.finalists(challenge.id)?;
    if finalists.len() < 2 {
        warn!(
            "Voting requested for {} with {} finalist(s), skipping",
            challenge.id,
            finalists.len()
        );
        return Ok(());
    }
    finalists.shuffle(&mut rand::rng());

    let ends = challenge
        .voting_end_time
        .map(|t| t.format("%Y-%m-%d %H:%M UTC").to_string())
        .unwrap_or_else(|| "soon".to_string());
    let header = OutboundMessage::embed(
        format!("🗳️ Voting is open: {}", challenge.name),
        format!(
            "{} finalists made it to the end. React with {} on the posts below \
             to vote for the best transformation. Voting closes at {}.",
            finalists.len(),
            cfg.vote_emoji,
            ends
        ),
    );
    gateway.send_channel(challenge.channel_id, header).await?;

    for finalist in &finalists {
        if let Err(e) = post_comparison(db, gateway, cfg, challenge, finalist).await {
            // One broken post shouldn't sink the whole round.
            warn!(
                "Comparison post for {} in {} failed: {:#}",
                finalist.user_id, challenge.id, e
            );
        }
    }

    info!("Voting started for {} ({} finalists)", challenge.id, finalists.len());
    Ok(())
}

async fn post_comparison(
    db: &Arc<Database>,
    gateway: &Arc<dyn ChatGateway>,
    cfg: &LifecycleConfig,
    challenge: &Challenge,
    finalist: &Participant,
) -> anyhow::Result<()> {
    let mut lines = Vec::new();
    if let Some(goal) = &finalist.personal_goal {
        lines.push(format!("**Goal:** {goal}"));
    }
    match (finalist.current_weight, finalist.final_weight) {
        (Some(start), Some(end)) => {
            lines.push(format!(
                "**Weight:** {start} → {end} ({:+.1})",
                end - start
            ));
        }
        (Some(start), None) => lines.push(format!("**Starting weight:** {start}")),
        _ => {}
    }
    lines.push(format!("React {} to vote!", cfg.vote_emoji));

    let mut photos: Vec<PhotoRef> = finalist.initial_photos.clone();
    photos.extend(finalist.final_photos.iter().cloned());

    let post = OutboundMessage::embed(
        format!("💪 {}", finalist.display_name),
        lines.join("\n"),
    )
    .with_footer("Before & after")
    .with_photos(photos);

    let message_id = gateway.send_channel(challenge.channel_id, post).await?;
    gateway.add_reaction(message_id, &cfg.vote_emoji).await?;
    db.insert_voting_post(challenge.id, message_id, finalist.user_id)?;
    Ok(())
}

/// Count valid votes per finalist: distinct human reactors, excluding the
/// finalist voting for themselves.
pub async fn tally(
    db: &Arc<Database>,
    gateway: &Arc<dyn ChatGateway>,
    challenge_id: Uuid,
    vote_emoji: &str,
) -> anyhow::Result<HashMap<Uuid, i64>> {
    let mut votes = HashMap::new();
    for (message_id, user_id) in db.voting_posts(challenge_id)? {
        let count = match gateway.reactors(message_id, vote_emoji).await {
            Ok(reactors) => {
                let mut voters: Vec<Uuid> = reactors
                    .iter()
                    .filter(|r| !r.is_bot && r.user_id != user_id)
                    .map(|r| r.user_id)
                    .collect();
                voters.sort();
                voters.dedup();
                voters.len() as i64
            }
            Err(e) => {
                warn!("Fetching reactors for {} failed: {}", message_id, e);
                0
            }
        };
        votes.insert(user_id, count);
    }
    Ok(votes)
}

/// Assign distinct ranks. Stable-sorted by votes descending; groups with
/// equal counts are ordered by the tie breaker.
pub fn rank(
    finalists: Vec<Participant>,
    votes: &HashMap<Uuid, i64>,
    tiebreaker: &dyn TieBreaker,
) -> Vec<RankedFinalist> {
    let mut scored: Vec<(Participant, i64)> = finalists
        .into_iter()
        .map(|p| {
            let v = votes.get(&p.user_id).copied().unwrap_or(0);
            (p, v)
        })
        .collect();
    scored.sort_by(|a, b| b.1.cmp(&a.1));

    let mut out: Vec<RankedFinalist> = Vec::with_capacity(scored.len());
    let mut i = 0;
    while i < scored.len() {
        let group_votes = scored[i].1;
        let mut j = i + 1;
        while j < scored.len() && scored[j].1 == group_votes {
            j += 1;
        }
        let tie_broken = j - i > 1;

        let mut group: Vec<Participant> = scored[i..j].iter().map(|(p, _)| p.clone()).collect();
        if tie_broken {
            tiebreaker.order(&mut group);
        }
        for p in group {
            out.push(RankedFinalist {
                rank: out.len() as i64 + 1,
                votes: group_votes,
                tie_broken,
                participant: p,
            });
        }
        i = j;
    }
    out
}

/// Tally, rank and persist the outcome. Idempotent: the tally is recomputed
/// from reactions and `set_result` overwrites, so a retried tick converges on
/// the same ranks.
pub async fn settle(
    db: &Arc<Database>,
    gateway: &Arc<dyn ChatGateway>,
    cfg: &LifecycleConfig,
    tiebreaker: &dyn TieBreaker,
    challenge: &Challenge,
) -> anyhow::Result<Vec<RankedFinalist>> {
    let finalists = db.finalists(challenge.id)?;
    let votes = tally(db, gateway, challenge.id, &cfg.vote_emoji).await?;
    let ranked = rank(finalists, &votes, tiebreaker);

    for r in &ranked {
        db.set_result(challenge.id, r.participant.user_id, r.rank, r.votes)?;
    }
    Ok(ranked)
}

/// Post the results summary in the channel and DM the podium. Call once per
/// challenge, after [`settle`] has persisted the ranks.
pub async fn announce(
    db: &Arc<Database>,
    gateway: &Arc<dyn ChatGateway>,
    tiebreaker: &dyn TieBreaker,
    challenge: &Challenge,
    ranked: &[RankedFinalist],
) -> anyhow::Result<()> {
    let mut body = String::new();
    for r in ranked.iter().take(MEDALS.len()) {
        let medal = MEDALS[r.rank as usize - 1];
        body.push_str(&format!(
            "{medal} **{}** — {} vote(s)\n",
            r.participant.display_name, r.votes
        ));
    }

    body.push('\n');
    let stats = db.challenge_stats(challenge.id)?;
    body.push_str(&format!(
        "**{}** joined, **{}** finished.\n",
        stats.total_participants, stats.completed
    ));
    if let Some(avg) = stats.avg_weight_change {
        body.push_str(&format!("Average weight change: **{avg:+.1}**\n"));
    }
    if let Some((_, name, lost)) = db.biggest_weight_loss(challenge.id)? {
        body.push_str(&format!("Biggest loss: **{name}** ({lost:.1} down) 🔥\n"));
    }
    if let Some((_, name, count)) =
        db.most_checkins_between(challenge.start_at, challenge.end_at)?
    {
        body.push_str(&format!("Most check-ins: **{name}** ({count})\n"));
    }

    let mut results =
        OutboundMessage::embed(format!("🏆 Results: {}", challenge.name), body);
    if ranked.iter().any(|r| r.tie_broken) {
        results = results.with_footer(tiebreaker.describe());
    }
    gateway.send_channel(challenge.channel_id, results).await?;

    for r in ranked.iter().take(3) {
        let medal = MEDALS[r.rank as usize - 1];
        let congrats = OutboundMessage::embed(
            format!("{medal} You placed #{}!", r.rank),
            format!(
                "Congratulations on finishing **{}** in place {} with {} vote(s). \
                 Amazing work!",
                challenge.name, r.rank, r.votes
            ),
        );
        if let Err(e) = gateway.send_dm(r.participant.user_id, congrats).await {
            warn!("Podium DM to {} failed: {}", r.participant.user_id, e);
        }
    }

    info!("Results posted for {}", challenge.id);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use swole_db::NewChallenge;
    use swole_gateway::memory::InMemoryGateway;
    use swole_types::events::Reactor;

    fn setup() -> (Arc<Database>, Arc<InMemoryGateway>, Challenge) {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let gateway = Arc::new(InMemoryGateway::new());
        let id = Uuid::new_v4();
        let now = Utc::now();
        db.create_challenge(&NewChallenge {
            id,
            name: "Cut".into(),
            goal: "Lean out".into(),
            start_at: now - Duration::days(30),
            end_at: now,
            channel_id: Uuid::new_v4(),
        })
        .unwrap();
        db.mark_voting_started(id, now + Duration::hours(24)).unwrap();
        let challenge = db.get_challenge(id).unwrap().unwrap();
        (db, gateway, challenge)
    }

    fn finalist(db: &Database, ch: Uuid, name: &str, submitted_at: DateTime<Utc>) -> Uuid {
        let user = Uuid::new_v4();
        db.insert_participant(ch, user, name, Utc::now()).unwrap();
        db.record_final_submission(
            ch,
            user,
            &[PhotoRef::new(format!("cdn://{name}"))],
            Some(180.0),
            submitted_at,
        )
        .unwrap();
        user
    }

    fn human(user_id: Uuid) -> Reactor {
        Reactor { user_id, is_bot: false }
    }

    #[tokio::test]
    async fn test_start_voting_posts_one_per_finalist() {
        let (db, gateway, challenge) = setup();
        let now = Utc::now();
        let a = finalist(&db, challenge.id, "a", now);
        let b = finalist(&db, challenge.id, "b", now);
        let c = finalist(&db, challenge.id, "c", now);

        let gw: Arc<dyn ChatGateway> = gateway.clone();
        start_voting(&db, &gw, &LifecycleConfig::default(), &challenge)
            .await
            .unwrap();

        // Header + 3 comparison posts.
        assert_eq!(gateway.channel_posts().len(), 4);
        assert_eq!(gateway.reactions_added().len(), 3);

        let posts = db.voting_posts(challenge.id).unwrap();
        let users: Vec<Uuid> = posts.iter().map(|(_, u)| *u).collect();
        for u in [a, b, c] {
            assert!(users.contains(&u));
        }
    }

    #[tokio::test]
    async fn test_start_voting_refuses_single_finalist() {
        let (db, gateway, challenge) = setup();
        finalist(&db, challenge.id, "solo", Utc::now());

        let gw: Arc<dyn ChatGateway> = gateway.clone();
        start_voting(&db, &gw, &LifecycleConfig::default(), &challenge)
            .await
            .unwrap();

        assert!(gateway.channel_posts().is_empty());
    }

    #[tokio::test]
    async fn test_tally_excludes_bots_and_self_votes() {
        let (db, gateway, challenge) = setup();
        let a = finalist(&db, challenge.id, "a", Utc::now());
        let post = Uuid::new_v4();
        db.insert_voting_post(challenge.id, post, a).unwrap();

        let voter = Uuid::new_v4();
        gateway.set_reactors(
            post,
            "✅",
            vec![
                human(voter),
                human(voter), // double-click counts once
                human(a),     // self-vote
                Reactor { user_id: Uuid::new_v4(), is_bot: true },
            ],
        );

        let gw: Arc<dyn ChatGateway> = gateway.clone();
        let votes = tally(&db, &gw, challenge.id, "✅").await.unwrap();
        assert_eq!(votes.get(&a), Some(&1));
    }

    #[test]
    fn test_rank_breaks_ties_by_submission_time() {
        let db = Database::open_in_memory().unwrap();
        let ch = Uuid::new_v4();
        let now = Utc::now();
        db.create_challenge(&NewChallenge {
            id: ch,
            name: "x".into(),
            goal: "y".into(),
            start_at: now,
            end_at: now,
            channel_id: Uuid::new_v4(),
        })
        .unwrap();
        let late = finalist(&db, ch, "late", now);
        let early = finalist(&db, ch, "early", now - Duration::hours(3));
        let winner = finalist(&db, ch, "winner", now);

        let votes = HashMap::from([(winner, 5), (early, 3), (late, 3)]);
        let ranked = rank(db.finalists(ch).unwrap(), &votes, &SubmissionOrderTieBreaker);

        assert_eq!(ranked.len(), 3);
        assert_eq!(ranked[0].participant.user_id, winner);
        assert_eq!(ranked[0].rank, 1);
        assert!(!ranked[0].tie_broken);
        // The 3-3 tie resolves to distinct ranks, earlier submission first.
        assert_eq!(ranked[1].participant.user_id, early);
        assert_eq!(ranked[1].rank, 2);
        assert!(ranked[1].tie_broken);
        assert_eq!(ranked[2].participant.user_id, late);
        assert_eq!(ranked[2].rank, 3);
        assert!(ranked[2].tie_broken);
    }

    #[tokio::test]
    async fn test_settle_persists_ranks_without_posting() {
        let (db, gateway, challenge) = setup();
        let now = Utc::now();
        let a = finalist(&db, challenge.id, "a", now);
        let b = finalist(&db, challenge.id, "b", now - Duration::hours(1));

        let post_a = Uuid::new_v4();
        let post_b = Uuid::new_v4();
        db.insert_voting_post(challenge.id, post_a, a).unwrap();
        db.insert_voting_post(challenge.id, post_b, b).unwrap();
        gateway.set_reactors(post_a, "✅", vec![human(Uuid::new_v4()), human(Uuid::new_v4())]);
        gateway.set_reactors(post_b, "✅", vec![human(Uuid::new_v4())]);

        let gw: Arc<dyn ChatGateway> = gateway.clone();
        let ranked = settle(
            &db,
            &gw,
            &LifecycleConfig::default(),
            &SubmissionOrderTieBreaker,
            &challenge,
        )
        .await
        .unwrap();

        // Ranks land in the store before anything public goes out, so a
        // failure while announcing never strands a tallied round.
        let pa = db.get_participant(challenge.id, a).unwrap().unwrap();
        assert_eq!(pa.final_rank, Some(1));
        assert_eq!(pa.votes_received, Some(2));
        let pb = db.get_participant(challenge.id, b).unwrap().unwrap();
        assert_eq!(pb.final_rank, Some(2));
        assert_eq!(pb.votes_received, Some(1));
        assert!(gateway.channel_posts().is_empty());
        assert!(gateway.dms_to(a).is_empty());

        assert_eq!(ranked.len(), 2);
        assert_eq!(ranked[0].participant.user_id, a);
    }

    #[tokio::test]
    async fn test_announce_posts_results_and_dms_podium() {
        let (db, gateway, challenge) = setup();
        let now = Utc::now();
        let a = finalist(&db, challenge.id, "a", now);
        let b = finalist(&db, challenge.id, "b", now - Duration::hours(1));

        let post_a = Uuid::new_v4();
        let post_b = Uuid::new_v4();
        db.insert_voting_post(challenge.id, post_a, a).unwrap();
        db.insert_voting_post(challenge.id, post_b, b).unwrap();
        gateway.set_reactors(post_a, "✅", vec![human(Uuid::new_v4()), human(Uuid::new_v4())]);
        gateway.set_reactors(post_b, "✅", vec![human(Uuid::new_v4())]);

        let gw: Arc<dyn ChatGateway> = gateway.clone();
        let ranked = settle(
            &db,
            &gw,
            &LifecycleConfig::default(),
            &SubmissionOrderTieBreaker,
            &challenge,
        )
        .await
        .unwrap();
        announce(&db, &gw, &SubmissionOrderTieBreaker, &challenge, &ranked)
            .await
            .unwrap();

        // Results post in the channel, congrats DMs to both podium spots.
        assert_eq!(gateway.channel_posts().len(), 1);
        assert_eq!(gateway.dms_to(a).len(), 1);
        assert_eq!(gateway.dms_to(b).len(), 1);
    }
}
