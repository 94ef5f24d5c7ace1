//! Daily accountability check-ins (gym, weigh-in, meal prep).
//!
//! A check-in always gets recorded; whether it earns a point depends on the
//! per-category cooldown. Re-used images are rejected outright via a content
//! fingerprint, so the same gym selfie can't be posted twice.

use std::time::Duration;

use chrono::Utc;
use md5::{Digest, Md5};
use tracing::debug;
use uuid::Uuid;

use swole_db::Database;

/// One point per category per day.
const POINT_COOLDOWN: Duration = Duration::from_secs(24 * 3600);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckinCategory {
    Gym,
    Weight,
    Food,
}

impl CheckinCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Gym => "gym",
            Self::Weight => "weight",
            Self::Food => "food",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "gym" => Some(Self::Gym),
            "weight" => Some(Self::Weight),
            "food" => Some(Self::Food),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CheckinRequest {
    pub user_id: Uuid,
    pub display_name: String,
    pub category: CheckinCategory,
    pub note: String,
    /// Required for weight check-ins, ignored otherwise.
    pub weight: Option<f64>,
    /// Raw image bytes, fingerprinted for dedup.
    pub image: Option<Vec<u8>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckinOutcome {
    /// Recorded and earned a point.
    PointEarned,
    /// Recorded, but the category is still on cooldown.
    RecordedNoPoint,
    /// Rejected: this exact image was already checked in.
    DuplicateImage,
    /// Rejected: a weight check-in needs a weight.
    MissingWeight,
}

pub fn image_fingerprint(bytes: &[u8]) -> String {
    hex::encode(Md5::digest(bytes))
}

pub fn log_checkin(db: &Database, req: &CheckinRequest) -> anyhow::Result<CheckinOutcome> {
    if req.category == CheckinCategory::Weight && req.weight.is_none() {
        return Ok(CheckinOutcome::MissingWeight);
    }

    let image_hash = req.image.as_deref().map(image_fingerprint);
    if let Some(hash) = &image_hash {
        if db.has_checkin_image(req.user_id, hash)? {
            debug!("Duplicate check-in image from {}", req.user_id);
            return Ok(CheckinOutcome::DuplicateImage);
        }
    }

    let now = Utc::now();
    let category = req.category.as_str();
    let on_cooldown = match db.last_point_checkin(req.user_id, category)? {
        Some(last) => now - last < crate::config::chrono_duration(POINT_COOLDOWN),
        None => false,
    };

    db.insert_checkin(
        Uuid::new_v4(),
        req.user_id,
        &req.display_name,
        category,
        &req.note,
        req.weight,
        image_hash.as_deref(),
        !on_cooldown,
        now,
    )?;

    Ok(if on_cooldown {
        CheckinOutcome::RecordedNoPoint
    } else {
        CheckinOutcome::PointEarned
    })
}
