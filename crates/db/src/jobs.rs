//! Durable queue of ticket issuance work, drained by the issuance worker.

use anyhow::Result;
use fcb_models::IssuanceJob;
use sqlx::{SqliteConnection, SqlitePool};

const JOB_COLUMNS: &str = "reservation_id, attempts, next_attempt_at, last_error, created_at";

/// Queue issuance for a reservation. A reservation is queued at most once.
pub async fn enqueue_issuance(
    conn: &mut SqliteConnection,
    reservation_id: i64,
    now: &str,
) -> Result<bool> {
    let result = sqlx::query(
        "INSERT INTO issuance_jobs (reservation_id, attempts, next_attempt_at, created_at) \
         VALUES (?1, 0, ?2, ?2) ON CONFLICT(reservation_id) DO NOTHING",
    )
    .bind(reservation_id)
    .bind(now)
    .execute(&mut *conn)
    .await?;
    Ok(result.rows_affected() == 1)
}

/// Jobs whose next attempt is due, oldest first.
pub async fn due_jobs(pool: &SqlitePool, now: &str, limit: i64) -> Result<Vec<IssuanceJob>> {
    let sql = format!(
        "SELECT {JOB_COLUMNS} FROM issuance_jobs WHERE next_attempt_at <= ? \
         ORDER BY next_attempt_at, reservation_id LIMIT ?"
    );
    let jobs = sqlx::query_as::<_, IssuanceJob>(&sql)
        .bind(now)
        .bind(limit)
        .fetch_all(pool)
        .await?;
    Ok(jobs)
}

pub async fn list_jobs(pool: &SqlitePool) -> Result<Vec<IssuanceJob>> {
    let sql = format!("SELECT {JOB_COLUMNS} FROM issuance_jobs ORDER BY reservation_id");
    let jobs = sqlx::query_as::<_, IssuanceJob>(&sql).fetch_all(pool).await?;
    Ok(jobs)
}

pub async fn finish_job(pool: &SqlitePool, reservation_id: i64) -> Result<()> {
    sqlx::query("DELETE FROM issuance_jobs WHERE reservation_id = ?")
        .bind(reservation_id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Push the next attempt out without counting a failure.
pub async fn defer_job(pool: &SqlitePool, reservation_id: i64, next_attempt_at: &str) -> Result<()> {
    sqlx::query("UPDATE issuance_jobs SET next_attempt_at = ? WHERE reservation_id = ?")
        .bind(next_attempt_at)
        .bind(reservation_id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Record a failed attempt and push the next one out to `next_attempt_at`.
pub async fn reschedule_job(
    pool: &SqlitePool,
    reservation_id: i64,
    next_attempt_at: &str,
    error: &str,
) -> Result<()> {
    sqlx::query(
        "UPDATE issuance_jobs SET attempts = attempts + 1, next_attempt_at = ?, last_error = ? \
         WHERE reservation_id = ?",
    )
    .bind(next_attempt_at)
    .bind(error)
    .bind(reservation_id)
    .execute(pool)
    .await?;
    Ok(())
}
