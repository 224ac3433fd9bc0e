//! Action fingerprint ledger for cross-run de-duplication.
//!
//! Before an action fires, its fingerprint is reserved here. A fingerprint
//! that fired inside the cooldown is refused, so successive runs do not
//! re-file the same issue or re-post the same alert.

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};

use crate::sources::{format_ts, parse_ts};

/// Reserve `fingerprint` at `now`. Returns `false` when it already fired
/// within `cooldown`; otherwise records `now` and returns `true`.
pub fn reserve(conn: &mut Connection, fingerprint: &str, now: DateTime<Utc>, cooldown: Duration) -> Result<bool> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

    let last: Option<String> = tx
        .query_row(
            "SELECT fired_at FROM action_ledger WHERE fingerprint = ?1",
            params![fingerprint],
            |row| row.get(0),
        )
        .optional()?;

    if let Some(raw) = last {
        // unreadable timestamps are treated as expired
        if let Ok(fired_at) = parse_ts(&raw) {
            if now - fired_at < cooldown {
                return Ok(false);
            }
        }
    }

    tx.execute(
        "INSERT INTO action_ledger (fingerprint, fired_at) VALUES (?1, ?2)
         ON CONFLICT(fingerprint) DO UPDATE SET fired_at = excluded.fired_at",
        params![fingerprint, format_ts(now)],
    )?;
    tx.commit()?;
    Ok(true)
}

/// Drop a reservation so a failed dispatch can be retried by the next run.
pub fn release(conn: &Connection, fingerprint: &str) -> Result<()> {
    conn.execute("DELETE FROM action_ledger WHERE fingerprint = ?1", params![fingerprint])?;
    Ok(())
}

/// Remove entries older than `horizon`. Returns the number of rows removed.
pub fn prune(conn: &Connection, now: DateTime<Utc>, horizon: Duration) -> Result<usize> {
    let cutoff = format_ts(now - horizon);
    let removed = conn.execute("DELETE FROM action_ledger WHERE fired_at < ?1", params![cutoff])?;
    Ok(removed)
}
