//! Capacity ledger: occupied seats are always counted from the reservations
//! table. There is no stored counter to drift out of sync.

use anyhow::Result;
use sqlx::SqlitePool;

/// Non-cancelled reservations for one (match, class).
pub async fn occupied(pool: &SqlitePool, match_id: i64, class: &str) -> Result<i64> {
    let count: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM reservations \
         WHERE match_id = ? AND class = ? AND status != 'cancelled'",
    )
    .bind(match_id)
    .bind(class)
    .fetch_one(pool)
    .await?;
    Ok(count)
}

/// Non-cancelled reservations per class for one match. Classes with no
/// reservations are absent.
pub async fn occupied_counts(pool: &SqlitePool, match_id: i64) -> Result<Vec<(String, i64)>> {
    let rows = sqlx::query_as::<_, (String, i64)>(
        "SELECT class, COUNT(*) FROM reservations \
         WHERE match_id = ? AND status != 'cancelled' \
         GROUP BY class ORDER BY class",
    )
    .bind(match_id)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

/// Per-match capacity overrides, keyed by class.
pub async fn capacity_overrides(pool: &SqlitePool, match_id: i64) -> Result<Vec<(String, i64)>> {
    let rows = sqlx::query_as::<_, (String, i64)>(
        "SELECT class, seats FROM match_capacity WHERE match_id = ? ORDER BY class",
    )
    .bind(match_id)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}
