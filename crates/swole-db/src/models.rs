//! Database row types and the conversions into the shared domain models.
//! Rust-written timestamps are RFC 3339; SQLite column defaults produce
//! `YYYY-MM-DD HH:MM:SS`, so parsing accepts both.

use chrono::{DateTime, Utc};
use serde_json::json;
use swole_types::models::{Challenge, ChallengeStatus, Participant, PhotoRef};
use uuid::Uuid;

pub struct ChallengeRow {
    pub id: String,
    pub name: String,
    pub goal: String,
    pub status: String,
    pub start_at: String,
    pub end_at: String,
    pub photo_collection_started: bool,
    pub photo_collection_deadline: Option<String>,
    pub voting_started: bool,
    pub voting_end_time: Option<String>,
    pub results_posted: bool,
    pub end_notification_sent: bool,
    pub channel_id: String,
    pub announcement_message_id: Option<String>,
    pub created_at: String,
}

pub struct ParticipantRow {
    pub challenge_id: String,
    pub user_id: String,
    pub display_name: String,
    pub current_weight: Option<f64>,
    pub goal_weight: Option<f64>,
    pub personal_goal: Option<String>,
    pub initial_photos: String,
    pub final_photos: String,
    pub final_weight: Option<f64>,
    pub submitted_final: bool,
    pub submitted_at: Option<String>,
    pub final_dm_sent: bool,
    pub dm_failed: bool,
    pub disqualified: bool,
    pub disqualification_reason: Option<String>,
    pub votes_received: Option<i64>,
    pub final_rank: Option<i64>,
    pub joined_at: String,
}

/// Parse a stored timestamp, accepting RFC 3339 or SQLite's default
/// `datetime('now')` format (naive UTC).
pub fn parse_ts(raw: &str) -> DateTime<Utc> {
    raw.parse::<DateTime<Utc>>()
        .or_else(|_| {
            chrono::NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S").map(|ndt| ndt.and_utc())
        })
        .unwrap_or_else(|e| {
            tracing::warn!("Corrupt timestamp '{}': {}", raw, e);
            DateTime::default()
        })
}

pub fn parse_opt_ts(raw: Option<&str>) -> Option<DateTime<Utc>> {
    raw.map(parse_ts)
}

pub fn parse_uuid(raw: &str) -> Uuid {
    raw.parse().unwrap_or_else(|e| {
        tracing::warn!("Corrupt uuid '{}': {}", raw, e);
        Uuid::default()
    })
}

/// Photo lists are stored as JSON arrays in a TEXT column.
pub fn encode_photos(photos: &[PhotoRef]) -> String {
    json!(photos).to_string()
}

pub fn decode_photos(raw: &str) -> Vec<PhotoRef> {
    serde_json::from_str(raw).unwrap_or_else(|e| {
        tracing::warn!("Corrupt photo list '{}': {}", raw, e);
        Vec::new()
    })
}

impl From<ChallengeRow> for Challenge {
    fn from(row: ChallengeRow) -> Self {
        Challenge {
            id: parse_uuid(&row.id),
            name: row.name,
            goal: row.goal,
            status: ChallengeStatus::parse(&row.status).unwrap_or_else(|| {
                tracing::warn!("Unknown challenge status '{}'", row.status);
                ChallengeStatus::Active
            }),
            start_at: parse_ts(&row.start_at),
            end_at: parse_ts(&row.end_at),
            photo_collection_started: row.photo_collection_started,
            photo_collection_deadline: parse_opt_ts(row.photo_collection_deadline.as_deref()),
            voting_started: row.voting_started,
            voting_end_time: parse_opt_ts(row.voting_end_time.as_deref()),
            results_posted: row.results_posted,
            end_notification_sent: row.end_notification_sent,
            channel_id: parse_uuid(&row.channel_id),
            announcement_message_id: row.announcement_message_id.as_deref().map(parse_uuid),
            created_at: parse_ts(&row.created_at),
        }
    }
}

impl From<ParticipantRow> for Participant {
    fn from(row: ParticipantRow) -> Self {
        Participant {
            challenge_id: parse_uuid(&row.challenge_id),
            user_id: parse_uuid(&row.user_id),
            display_name: row.display_name,
            current_weight: row.current_weight,
            goal_weight: row.goal_weight,
            personal_goal: row.personal_goal,
            initial_photos: decode_photos(&row.initial_photos),
            final_photos: decode_photos(&row.final_photos),
            final_weight: row.final_weight,
            submitted_final: row.submitted_final,
            submitted_at: parse_opt_ts(row.submitted_at.as_deref()),
            final_dm_sent: row.final_dm_sent,
            dm_failed: row.dm_failed,
            disqualified: row.disqualified,
            disqualification_reason: row.disqualification_reason,
            votes_received: row.votes_received,
            final_rank: row.final_rank,
            joined_at: parse_ts(&row.joined_at),
        }
    }
}
