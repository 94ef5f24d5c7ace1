use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Opaque reference to a photo held by the chat platform (URL or attachment id).
/// The coordinator never inspects photo bytes; it only shuttles references.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PhotoRef(pub String);

impl PhotoRef {
    pub fn new(reference: impl Into<String>) -> Self {
        Self(reference.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Lifecycle status of a challenge. Photo collection and voting are tracked
/// as flags on the challenge row, not separate status values, so the status
/// only ever moves `Active -> Completed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChallengeStatus {
    Active,
    Completed,
}

impl ChallengeStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Completed => "completed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(Self::Active),
            "completed" => Some(Self::Completed),
            _ => None,
        }
    }
}

/// A timed group fitness challenge. Created on the challenge-start command,
/// mutated only by the lifecycle controller, never deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Challenge {
    pub id: Uuid,
    pub name: String,
    pub goal: String,
    pub status: ChallengeStatus,
    pub start_at: DateTime<Utc>,
    pub end_at: DateTime<Utc>,
    pub photo_collection_started: bool,
    pub photo_collection_deadline: Option<DateTime<Utc>>,
    pub voting_started: bool,
    pub voting_end_time: Option<DateTime<Utc>>,
    pub results_posted: bool,
    pub end_notification_sent: bool,
    /// Channel where the challenge was announced and voting is posted.
    pub channel_id: Uuid,
    /// The announcement message users react to in order to join.
    pub announcement_message_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

/// A user enrolled in a specific challenge. Keyed by (challenge, user).
/// `submitted_final` and `disqualified` are monotonic: once true, they stay
/// true for the lifetime of the challenge.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Participant {
    pub challenge_id: Uuid,
    pub user_id: Uuid,
    pub display_name: String,
    pub current_weight: Option<f64>,
    pub goal_weight: Option<f64>,
    pub personal_goal: Option<String>,
    pub initial_photos: Vec<PhotoRef>,
    pub final_photos: Vec<PhotoRef>,
    pub final_weight: Option<f64>,
    pub submitted_final: bool,
    pub submitted_at: Option<DateTime<Utc>>,
    pub final_dm_sent: bool,
    pub dm_failed: bool,
    pub disqualified: bool,
    pub disqualification_reason: Option<String>,
    pub votes_received: Option<i64>,
    pub final_rank: Option<i64>,
    pub joined_at: DateTime<Utc>,
}

impl Participant {
    /// Weight change over the challenge, when both endpoints were recorded.
    pub fn weight_change(&self) -> Option<f64> {
        match (self.current_weight, self.final_weight) {
            (Some(start), Some(end)) => Some(end - start),
            _ => None,
        }
    }
}
