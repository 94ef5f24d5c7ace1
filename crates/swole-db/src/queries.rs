use chrono::{DateTime, Utc};
use swole_types::models::{Challenge, Participant, PhotoRef};
use uuid::Uuid;

use crate::Database;
use crate::models::{ChallengeRow, ParticipantRow, encode_photos, parse_opt_ts, parse_uuid};
use anyhow::Result;

const CHALLENGE_COLUMNS: &str = "id, name, goal, status, start_at, end_at, \
     photo_collection_started, photo_collection_deadline, voting_started, voting_end_time, \
     results_posted, end_notification_sent, channel_id, announcement_message_id, created_at";

const PARTICIPANT_COLUMNS: &str = "challenge_id, user_id, display_name, current_weight, \
     goal_weight, personal_goal, initial_photos, final_photos, final_weight, submitted_final, \
     submitted_at, final_dm_sent, dm_failed, disqualified, disqualification_reason, \
     votes_received, final_rank, joined_at";

pub struct NewChallenge {
    pub id: Uuid,
    pub name: String,
    pub goal: String,
    pub start_at: DateTime<Utc>,
    pub end_at: DateTime<Utc>,
    pub channel_id: Uuid,
}

pub struct ChallengeStats {
    pub total_participants: i64,
    pub completed: i64,
    pub avg_weight_change: Option<f64>,
}

impl Database {
    // -- Challenges --

    pub fn create_challenge(&self, new: &NewChallenge) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO challenges (id, name, goal, status, start_at, end_at, channel_id)
                 VALUES (?1, ?2, ?3, 'active', ?4, ?5, ?6)",
                rusqlite::params![
                    new.id.to_string(),
                    new.name,
                    new.goal,
                    new.start_at.to_rfc3339(),
                    new.end_at.to_rfc3339(),
                    new.channel_id.to_string(),
                ],
            )?;
            Ok(())
        })
    }

    pub fn set_announcement(&self, challenge_id: Uuid, message_id: Uuid) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "UPDATE challenges SET announcement_message_id = ?1 WHERE id = ?2",
                rusqlite::params![message_id.to_string(), challenge_id.to_string()],
            )?;
            Ok(())
        })
    }

    pub fn get_challenge(&self, id: Uuid) -> Result<Option<Challenge>> {
        self.with_conn(|conn| {
            let sql = format!("SELECT {CHALLENGE_COLUMNS} FROM challenges WHERE id = ?1");
            let mut stmt = conn.prepare(&sql)?;
            let row = stmt
                .query_row([id.to_string()], challenge_from_row)
                .optional()?;
            Ok(row.map(Challenge::from))
        })
    }

    pub fn active_challenges(&self) -> Result<Vec<Challenge>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {CHALLENGE_COLUMNS} FROM challenges
                 WHERE status = 'active' ORDER BY start_at"
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map([], challenge_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows.into_iter().map(Challenge::from).collect())
        })
    }

    /// Look up the active challenge whose announcement message was reacted to.
    pub fn challenge_by_announcement(&self, message_id: Uuid) -> Result<Option<Challenge>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {CHALLENGE_COLUMNS} FROM challenges
                 WHERE announcement_message_id = ?1 AND status = 'active'"
            );
            let mut stmt = conn.prepare(&sql)?;
            let row = stmt
                .query_row([message_id.to_string()], challenge_from_row)
                .optional()?;
            Ok(row.map(Challenge::from))
        })
    }

    // -- Lifecycle transitions --
    //
    // Every flag flip is a conditional update so that overlapping controller
    // ticks cannot double-fire a transition: only the caller that sees
    // rows-affected == 1 won the transition.

    pub fn mark_end_notification_sent(&self, id: Uuid) -> Result<bool> {
        self.with_conn_mut(|conn| {
            let n = conn.execute(
                "UPDATE challenges SET end_notification_sent = 1
                 WHERE id = ?1 AND end_notification_sent = 0",
                [id.to_string()],
            )?;
            Ok(n == 1)
        })
    }

    pub fn mark_photo_collection_started(
        &self,
        id: Uuid,
        deadline: DateTime<Utc>,
    ) -> Result<bool> {
        self.with_conn_mut(|conn| {
            let n = conn.execute(
                "UPDATE challenges
                 SET photo_collection_started = 1, photo_collection_deadline = ?1
                 WHERE id = ?2 AND photo_collection_started = 0",
                rusqlite::params![deadline.to_rfc3339(), id.to_string()],
            )?;
            Ok(n == 1)
        })
    }

    pub fn mark_voting_started(&self, id: Uuid, voting_end_time: DateTime<Utc>) -> Result<bool> {
        self.with_conn_mut(|conn| {
            let n = conn.execute(
                "UPDATE challenges SET voting_started = 1, voting_end_time = ?1
                 WHERE id = ?2 AND voting_started = 0",
                rusqlite::params![voting_end_time.to_rfc3339(), id.to_string()],
            )?;
            Ok(n == 1)
        })
    }

    /// Voting ended normally: flip to completed exactly once.
    pub fn mark_completed(&self, id: Uuid) -> Result<bool> {
        self.with_conn_mut(|conn| {
            let n = conn.execute(
                "UPDATE challenges SET status = 'completed', results_posted = 1
                 WHERE id = ?1 AND results_posted = 0",
                [id.to_string()],
            )?;
            Ok(n == 1)
        })
    }

    /// Fewer than two submissions at the photo deadline: skip voting entirely.
    pub fn complete_without_voting(&self, id: Uuid) -> Result<bool> {
        self.with_conn_mut(|conn| {
            let n = conn.execute(
                "UPDATE challenges
                 SET status = 'completed', voting_started = 1, results_posted = 1
                 WHERE id = ?1 AND voting_started = 0",
                [id.to_string()],
            )?;
            Ok(n == 1)
        })
    }

    // -- Participants --

    /// Enroll a user. Returns false if they already joined (duplicate
    /// reactions are idempotent).
    pub fn insert_participant(
        &self,
        challenge_id: Uuid,
        user_id: Uuid,
        display_name: &str,
        joined_at: DateTime<Utc>,
    ) -> Result<bool> {
        self.with_conn_mut(|conn| {
            let n = conn.execute(
                "INSERT OR IGNORE INTO participants (challenge_id, user_id, display_name, joined_at)
                 VALUES (?1, ?2, ?3, ?4)",
                rusqlite::params![
                    challenge_id.to_string(),
                    user_id.to_string(),
                    display_name,
                    joined_at.to_rfc3339(),
                ],
            )?;
            Ok(n == 1)
        })
    }

    pub fn get_participant(&self, challenge_id: Uuid, user_id: Uuid) -> Result<Option<Participant>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {PARTICIPANT_COLUMNS} FROM participants
                 WHERE challenge_id = ?1 AND user_id = ?2"
            );
            let mut stmt = conn.prepare(&sql)?;
            let row = stmt
                .query_row(
                    [challenge_id.to_string(), user_id.to_string()],
                    participant_from_row,
                )
                .optional()?;
            Ok(row.map(Participant::from))
        })
    }

    /// Participants still owed the end-of-challenge DM: not disqualified, not
    /// yet submitted, not yet (successfully or unsuccessfully) DMed.
    pub fn participants_needing_final_dm(&self, challenge_id: Uuid) -> Result<Vec<Participant>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {PARTICIPANT_COLUMNS} FROM participants
                 WHERE challenge_id = ?1
                   AND disqualified = 0 AND submitted_final = 0 AND final_dm_sent = 0
                 ORDER BY joined_at"
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map([challenge_id.to_string()], participant_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows.into_iter().map(Participant::from).collect())
        })
    }

    pub fn count_needing_final_dm(&self, challenge_id: Uuid) -> Result<i64> {
        self.with_conn(|conn| {
            let n = conn.query_row(
                "SELECT COUNT(*) FROM participants
                 WHERE challenge_id = ?1
                   AND disqualified = 0 AND submitted_final = 0 AND final_dm_sent = 0",
                [challenge_id.to_string()],
                |row| row.get(0),
            )?;
            Ok(n)
        })
    }

    /// Persist everything collected during onboarding in one update.
    /// Overwrites any partial data from an aborted earlier attempt.
    pub fn record_onboarding(
        &self,
        challenge_id: Uuid,
        user_id: Uuid,
        current_weight: f64,
        goal_weight: f64,
        personal_goal: &str,
        initial_photos: &[PhotoRef],
    ) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "UPDATE participants
                 SET current_weight = ?1, goal_weight = ?2, personal_goal = ?3,
                     initial_photos = ?4
                 WHERE challenge_id = ?5 AND user_id = ?6",
                rusqlite::params![
                    current_weight,
                    goal_weight,
                    personal_goal,
                    encode_photos(initial_photos),
                    challenge_id.to_string(),
                    user_id.to_string(),
                ],
            )?;
            Ok(())
        })
    }

    /// Record the outcome of a final-photo DM attempt so repeated controller
    /// passes do not re-send to this participant.
    pub fn mark_final_dm(&self, challenge_id: Uuid, user_id: Uuid, failed: bool) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "UPDATE participants SET final_dm_sent = 1, dm_failed = ?1
                 WHERE challenge_id = ?2 AND user_id = ?3",
                rusqlite::params![failed, challenge_id.to_string(), user_id.to_string()],
            )?;
            Ok(())
        })
    }

    /// Persist a final submission atomically. `submitted_final` is monotonic:
    /// the guard means a second submission attempt can never overwrite the
    /// first. Returns false if the participant had already submitted.
    pub fn record_final_submission(
        &self,
        challenge_id: Uuid,
        user_id: Uuid,
        final_photos: &[PhotoRef],
        final_weight: Option<f64>,
        submitted_at: DateTime<Utc>,
    ) -> Result<bool> {
        self.with_conn_mut(|conn| {
            let n = conn.execute(
                "UPDATE participants
                 SET final_photos = ?1, final_weight = ?2, submitted_final = 1, submitted_at = ?3
                 WHERE challenge_id = ?4 AND user_id = ?5 AND submitted_final = 0",
                rusqlite::params![
                    encode_photos(final_photos),
                    final_weight,
                    submitted_at.to_rfc3339(),
                    challenge_id.to_string(),
                    user_id.to_string(),
                ],
            )?;
            Ok(n == 1)
        })
    }

    pub fn is_submitted(&self, challenge_id: Uuid, user_id: Uuid) -> Result<bool> {
        self.with_conn(|conn| {
            let submitted: Option<bool> = conn
                .query_row(
                    "SELECT submitted_final FROM participants
                     WHERE challenge_id = ?1 AND user_id = ?2",
                    [challenge_id.to_string(), user_id.to_string()],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(submitted.unwrap_or(false))
        })
    }

    /// Disqualify a participant. Monotonic, and a participant who already
    /// submitted can no longer be disqualified. Returns false if nothing changed.
    pub fn disqualify(&self, challenge_id: Uuid, user_id: Uuid, reason: &str) -> Result<bool> {
        self.with_conn_mut(|conn| {
            let n = conn.execute(
                "UPDATE participants SET disqualified = 1, disqualification_reason = ?1
                 WHERE challenge_id = ?2 AND user_id = ?3
                   AND submitted_final = 0 AND disqualified = 0",
                rusqlite::params![reason, challenge_id.to_string(), user_id.to_string()],
            )?;
            Ok(n == 1)
        })
    }

    /// Participants eligible for voting, earliest submission first.
    pub fn finalists(&self, challenge_id: Uuid) -> Result<Vec<Participant>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {PARTICIPANT_COLUMNS} FROM participants
                 WHERE challenge_id = ?1 AND submitted_final = 1 AND disqualified = 0
                 ORDER BY submitted_at"
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map([challenge_id.to_string()], participant_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows.into_iter().map(Participant::from).collect())
        })
    }

    pub fn count_finalists(&self, challenge_id: Uuid) -> Result<i64> {
        self.with_conn(|conn| {
            let n = conn.query_row(
                "SELECT COUNT(*) FROM participants
                 WHERE challenge_id = ?1 AND submitted_final = 1 AND disqualified = 0",
                [challenge_id.to_string()],
                |row| row.get(0),
            )?;
            Ok(n)
        })
    }

    pub fn set_result(
        &self,
        challenge_id: Uuid,
        user_id: Uuid,
        final_rank: i64,
        votes_received: i64,
    ) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "UPDATE participants SET final_rank = ?1, votes_received = ?2
                 WHERE challenge_id = ?3 AND user_id = ?4",
                rusqlite::params![
                    final_rank,
                    votes_received,
                    challenge_id.to_string(),
                    user_id.to_string(),
                ],
            )?;
            Ok(())
        })
    }

    // -- Voting posts --

    pub fn insert_voting_post(
        &self,
        challenge_id: Uuid,
        message_id: Uuid,
        user_id: Uuid,
    ) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT OR REPLACE INTO voting_posts (message_id, challenge_id, user_id)
                 VALUES (?1, ?2, ?3)",
                rusqlite::params![
                    message_id.to_string(),
                    challenge_id.to_string(),
                    user_id.to_string(),
                ],
            )?;
            Ok(())
        })
    }

    /// (message_id, participant user_id) pairs for a challenge's voting round.
    pub fn voting_posts(&self, challenge_id: Uuid) -> Result<Vec<(Uuid, Uuid)>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT message_id, user_id FROM voting_posts
                 WHERE challenge_id = ?1 ORDER BY created_at",
            )?;
            let rows = stmt
                .query_map([challenge_id.to_string()], |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows
                .into_iter()
                .map(|(m, u)| (parse_uuid(&m), parse_uuid(&u)))
                .collect())
        })
    }

    // -- Statistics for results posting --

    pub fn challenge_stats(&self, challenge_id: Uuid) -> Result<ChallengeStats> {
        self.with_conn(|conn| {
            let stats = conn.query_row(
                "SELECT COUNT(*),
                        COUNT(CASE WHEN submitted_final = 1 THEN 1 END),
                        AVG(final_weight - current_weight)
                 FROM participants WHERE challenge_id = ?1",
                [challenge_id.to_string()],
                |row| {
                    Ok(ChallengeStats {
                        total_participants: row.get(0)?,
                        completed: row.get(1)?,
                        avg_weight_change: row.get(2)?,
                    })
                },
            )?;
            Ok(stats)
        })
    }

    /// Finalist who lost the most weight, if any recorded both weights.
    pub fn biggest_weight_loss(&self, challenge_id: Uuid) -> Result<Option<(Uuid, String, f64)>> {
        self.with_conn(|conn| {
            let row = conn
                .query_row(
                    "SELECT user_id, display_name, (current_weight - final_weight) AS lost
                     FROM participants
                     WHERE challenge_id = ?1 AND submitted_final = 1
                       AND current_weight IS NOT NULL AND final_weight IS NOT NULL
                     ORDER BY lost DESC LIMIT 1",
                    [challenge_id.to_string()],
                    |row| {
                        Ok((
                            row.get::<_, String>(0)?,
                            row.get::<_, String>(1)?,
                            row.get::<_, f64>(2)?,
                        ))
                    },
                )
                .optional()?;
            Ok(row.map(|(u, name, lost)| (parse_uuid(&u), name, lost)))
        })
    }

    /// User with the most check-ins inside a time window.
    pub fn most_checkins_between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Option<(Uuid, String, i64)>> {
        self.with_conn(|conn| {
            let row = conn
                .query_row(
                    "SELECT user_id, display_name, COUNT(*) AS total FROM checkins
                     WHERE created_at >= ?1 AND created_at <= ?2
                     GROUP BY user_id ORDER BY total DESC LIMIT 1",
                    [start.to_rfc3339(), end.to_rfc3339()],
                    |row| {
                        Ok((
                            row.get::<_, String>(0)?,
                            row.get::<_, String>(1)?,
                            row.get::<_, i64>(2)?,
                        ))
                    },
                )
                .optional()?;
            Ok(row.map(|(u, name, n)| (parse_uuid(&u), name, n)))
        })
    }

    // -- Check-ins --

    pub fn has_checkin_image(&self, user_id: Uuid, image_hash: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let n: i64 = conn.query_row(
                "SELECT COUNT(*) FROM checkins WHERE user_id = ?1 AND image_hash = ?2",
                [user_id.to_string(), image_hash.to_string()],
                |row| row.get(0),
            )?;
            Ok(n > 0)
        })
    }

    /// When this user last earned a point for this category, if ever.
    pub fn last_point_checkin(
        &self,
        user_id: Uuid,
        category: &str,
    ) -> Result<Option<DateTime<Utc>>> {
        self.with_conn(|conn| {
            let raw: Option<String> = conn
                .query_row(
                    "SELECT created_at FROM checkins
                     WHERE user_id = ?1 AND category = ?2 AND earned_point = 1
                     ORDER BY created_at DESC LIMIT 1",
                    [user_id.to_string(), category.to_string()],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(parse_opt_ts(raw.as_deref()))
        })
    }

    #[allow(clippy::too_many_arguments)]
    pub fn insert_checkin(
        &self,
        id: Uuid,
        user_id: Uuid,
        display_name: &str,
        category: &str,
        note: &str,
        weight: Option<f64>,
        image_hash: Option<&str>,
        earned_point: bool,
        created_at: DateTime<Utc>,
    ) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO checkins
                 (id, user_id, display_name, category, note, weight, image_hash, earned_point, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                rusqlite::params![
                    id.to_string(),
                    user_id.to_string(),
                    display_name,
                    category,
                    note,
                    weight,
                    image_hash,
                    earned_point,
                    created_at.to_rfc3339(),
                ],
            )?;
            Ok(())
        })
    }
}

fn challenge_from_row(row: &rusqlite::Row<'_>) -> std::result::Result<ChallengeRow, rusqlite::Error> {
    Ok(ChallengeRow {
        id: row.get(0)?,
        name: row.get(1)?,
        goal: row.get(2)?,
        status: row.get(3)?,
        start_at: row.get(4)?,
        end_at: row.get(5)?,
        photo_collection_started: row.get(6)?,
        photo_collection_deadline: row.get(7)?,
        voting_started: row.get(8)?,
        voting_end_time: row.get(9)?,
        results_posted: row.get(10)?,
        end_notification_sent: row.get(11)?,
        channel_id: row.get(12)?,
        announcement_message_id: row.get(13)?,
        created_at: row.get(14)?,
    })
}

fn participant_from_row(
    row: &rusqlite::Row<'_>,
) -> std::result::Result<ParticipantRow, rusqlite::Error> {
    Ok(ParticipantRow {
        challenge_id: row.get(0)?,
        user_id: row.get(1)?,
        display_name: row.get(2)?,
        current_weight: row.get(3)?,
        goal_weight: row.get(4)?,
        personal_goal: row.get(5)?,
        initial_photos: row.get(6)?,
        final_photos: row.get(7)?,
        final_weight: row.get(8)?,
        submitted_final: row.get(9)?,
        submitted_at: row.get(10)?,
        final_dm_sent: row.get(11)?,
        dm_failed: row.get(12)?,
        disqualified: row.get(13)?,
        disqualification_reason: row.get(14)?,
        votes_received: row.get(15)?,
        final_rank: row.get(16)?,
        joined_at: row.get(17)?,
    })
}

/// Extension trait for optional query results
trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>>;
}

impl<T> OptionalExt<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
