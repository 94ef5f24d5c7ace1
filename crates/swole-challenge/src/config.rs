use std::time::Duration;

use anyhow::{Result, bail};

/// Timing knobs for the lifecycle controller and DM workflows. Defaults match
/// the production cadence; tests shrink them.
#[derive(Debug, Clone)]
pub struct LifecycleConfig {
    /// How often the controller re-examines active challenges.
    pub poll_interval: Duration,
    /// How long participants have to submit final photos after a challenge ends.
    pub submission_window: Duration,
    /// Reminders start this long before the submission deadline.
    pub reminder_lead: Duration,
    /// Spacing between reminder DMs.
    pub reminder_interval: Duration,
    /// Reminders sent before giving up and disqualifying.
    pub max_reminders: u32,
    /// Per-photo wait in the final submission conversation.
    pub photo_wait: Duration,
    /// Wait for short text answers (weights, goals).
    pub text_wait: Duration,
    /// How long voting stays open.
    pub voting_window: Duration,
    /// Overall ceiling on one onboarding conversation.
    pub onboarding_window: Duration,
    /// Reacting with this emoji on the announcement joins the challenge.
    pub join_emoji: String,
    /// Reaction used to vote on comparison posts.
    pub vote_emoji: String,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(30 * 60),
            submission_window: Duration::from_secs(24 * 3600),
            reminder_lead: Duration::from_secs(6 * 3600),
            reminder_interval: Duration::from_secs(3600),
            max_reminders: 6,
            photo_wait: Duration::from_secs(3600),
            text_wait: Duration::from_secs(300),
            voting_window: Duration::from_secs(24 * 3600),
            onboarding_window: Duration::from_secs(6 * 3600),
            join_emoji: "✅".to_string(),
            vote_emoji: "✅".to_string(),
        }
    }
}

impl LifecycleConfig {
    /// Fast timings for tests: every wait collapses to milliseconds.
    pub fn fast() -> Self {
        Self {
            poll_interval: Duration::from_millis(10),
            submission_window: Duration::from_millis(100),
            reminder_lead: Duration::from_millis(50),
            reminder_interval: Duration::from_millis(10),
            max_reminders: 2,
            photo_wait: Duration::from_millis(50),
            text_wait: Duration::from_millis(50),
            voting_window: Duration::from_millis(100),
            onboarding_window: Duration::from_millis(200),
            ..Self::default()
        }
    }
}

/// Parse a human duration like `45s`, `30m`, `2h` or `5d`.
pub fn parse_duration(raw: &str) -> Result<Duration> {
    let raw = raw.trim();
    let Some(unit) = raw.chars().last() else {
        bail!("empty duration");
    };
    let number = &raw[..raw.len() - unit.len_utf8()];
    let value: u64 = number
        .parse()
        .map_err(|_| anyhow::anyhow!("bad duration '{}': expected e.g. 30m, 2h, 5d", raw))?;
    let secs = match unit {
        's' => value,
        'm' => value * 60,
        'h' => value * 3600,
        'd' => value * 86_400,
        _ => bail!("bad duration '{}': unit must be s, m, h or d", raw),
    };
    Ok(Duration::from_secs(secs))
}

/// Std durations come from config; chrono durations are what timestamp
/// arithmetic wants. Saturates instead of failing on absurd values.
pub fn chrono_duration(d: Duration) -> chrono::Duration {
    chrono::Duration::from_std(d).unwrap_or(chrono::TimeDelta::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_duration_units() {
        assert_eq!(parse_duration("45s").unwrap(), Duration::from_secs(45));
        assert_eq!(parse_duration("30m").unwrap(), Duration::from_secs(1800));
        assert_eq!(parse_duration("2h").unwrap(), Duration::from_secs(7200));
        assert_eq!(parse_duration("5d").unwrap(), Duration::from_secs(432_000));
        assert_eq!(parse_duration(" 1h ").unwrap(), Duration::from_secs(3600));
    }

    #[test]
    fn test_parse_duration_rejects_garbage() {
        assert!(parse_duration("").is_err());
        assert!(parse_duration("h").is_err());
        assert!(parse_duration("10w").is_err());
        assert!(parse_duration("-5m").is_err());
        assert!(parse_duration("1.5h").is_err());
    }
}
