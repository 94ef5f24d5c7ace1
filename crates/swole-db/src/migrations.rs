use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS challenges (
            id                          TEXT PRIMARY KEY,
            name                        TEXT NOT NULL,
            goal                        TEXT NOT NULL,
            status                      TEXT NOT NULL DEFAULT 'active',
            start_at                    TEXT NOT NULL,
            end_at                      TEXT NOT NULL,
            photo_collection_started    INTEGER NOT NULL DEFAULT 0,
            photo_collection_deadline   TEXT,
            voting_started              INTEGER NOT NULL DEFAULT 0,
            voting_end_time             TEXT,
            results_posted              INTEGER NOT NULL DEFAULT 0,
            end_notification_sent       INTEGER NOT NULL DEFAULT 0,
            channel_id                  TEXT NOT NULL,
            announcement_message_id     TEXT,
            created_at                  TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE INDEX IF NOT EXISTS idx_challenges_status
            ON challenges(status);

        CREATE TABLE IF NOT EXISTS participants (
            challenge_id            TEXT NOT NULL REFERENCES challenges(id),
            user_id                 TEXT NOT NULL,
            display_name            TEXT NOT NULL,
            current_weight          REAL,
            goal_weight             REAL,
            personal_goal           TEXT,
            initial_photos          TEXT NOT NULL DEFAULT '[]',
            final_photos            TEXT NOT NULL DEFAULT '[]',
            final_weight            REAL,
            submitted_final         INTEGER NOT NULL DEFAULT 0,
            submitted_at            TEXT,
            final_dm_sent           INTEGER NOT NULL DEFAULT 0,
            dm_failed               INTEGER NOT NULL DEFAULT 0,
            disqualified            INTEGER NOT NULL DEFAULT 0,
            disqualification_reason TEXT,
            votes_received          INTEGER,
            final_rank              INTEGER,
            joined_at               TEXT NOT NULL DEFAULT (datetime('now')),
            PRIMARY KEY (challenge_id, user_id)
        );

        -- Comparison post -> participant mapping, written when voting starts
        -- and read back at tally time.
        CREATE TABLE IF NOT EXISTS voting_posts (
            message_id      TEXT PRIMARY KEY,
            challenge_id    TEXT NOT NULL REFERENCES challenges(id),
            user_id         TEXT NOT NULL,
            created_at      TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE INDEX IF NOT EXISTS idx_voting_posts_challenge
            ON voting_posts(challenge_id);

        CREATE TABLE IF NOT EXISTS checkins (
            id              TEXT PRIMARY KEY,
            user_id         TEXT NOT NULL,
            display_name    TEXT NOT NULL,
            category        TEXT NOT NULL,
            note            TEXT,
            weight          REAL,
            image_hash      TEXT,
            earned_point    INTEGER NOT NULL DEFAULT 0,
            created_at      TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_checkins_user
            ON checkins(user_id, category, created_at);
        ",
    )?;

    info!("Database migrations complete");
    Ok(())
}
