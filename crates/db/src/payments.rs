use anyhow::Result;
use fcb_models::PaymentEvent;
use sqlx::{SqliteConnection, SqlitePool};

/// Record a gateway event id. Returns false if the id was already recorded,
/// which is how redeliveries are recognised.
pub async fn insert_payment_event(
    conn: &mut SqliteConnection,
    id: &str,
    event_type: &str,
    reservation_id: Option<i64>,
    received_at: &str,
) -> Result<bool> {
    let result = sqlx::query(
        "INSERT INTO payment_events (id, event_type, reservation_id, processed, received_at) \
         VALUES (?, ?, ?, 0, ?) ON CONFLICT(id) DO NOTHING",
    )
    .bind(id)
    .bind(event_type)
    .bind(reservation_id)
    .bind(received_at)
    .execute(&mut *conn)
    .await?;
    Ok(result.rows_affected() == 1)
}

/// Set the processed flag; it is only ever set once.
pub async fn mark_event_processed(conn: &mut SqliteConnection, id: &str) -> Result<()> {
    sqlx::query("UPDATE payment_events SET processed = 1 WHERE id = ? AND processed = 0")
        .bind(id)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

pub async fn get_payment_event(pool: &SqlitePool, id: &str) -> Result<Option<PaymentEvent>> {
    let event = sqlx::query_as::<_, PaymentEvent>(
        "SELECT id, event_type, reservation_id, processed, received_at FROM payment_events WHERE id = ?",
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;
    Ok(event)
}
