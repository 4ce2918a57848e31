use anyhow::Result;
use fcb_models::{Ticket, TicketDetail};
use sqlx::SqlitePool;

/// Claim the right to issue a ticket for a paid reservation.
///
/// Inserts an `issuing` row. A row that already exists is only taken over
/// when it is still `issuing` and its claim is older than `stale_before`
/// (the previous issuer died mid-way). Returns false when there is nothing
/// to do: already delivered, claimed by someone else, or not paid.
pub async fn claim_ticket(
    pool: &SqlitePool,
    reservation_id: i64,
    claimed_at: &str,
    stale_before: &str,
) -> Result<bool> {
    let result = sqlx::query(
        "INSERT INTO tickets (reservation_id, delivery_status, claimed_at) \
         SELECT id, 'issuing', ?1 FROM reservations WHERE id = ?2 AND status = 'paid' \
         ON CONFLICT(reservation_id) DO UPDATE SET claimed_at = excluded.claimed_at \
         WHERE tickets.delivery_status = 'issuing' AND tickets.claimed_at < ?3",
    )
    .bind(claimed_at)
    .bind(reservation_id)
    .bind(stale_before)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() == 1)
}

/// Drop an unfinished claim so a later attempt can issue again.
///
/// Only the claim stamped `claimed_at` is removed; a claim that was taken
/// over in the meantime belongs to another issuer and is left alone.
pub async fn release_ticket(pool: &SqlitePool, reservation_id: i64, claimed_at: &str) -> Result<bool> {
    let result = sqlx::query(
        "DELETE FROM tickets \
         WHERE reservation_id = ? AND delivery_status = 'issuing' AND claimed_at = ?",
    )
    .bind(reservation_id)
    .bind(claimed_at)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() == 1)
}

/// Mark the ticket delivered and move the reservation Paid → Issued.
///
/// Returns false, changing nothing, when the claim stamped `claimed_at` is
/// no longer held.
pub async fn complete_ticket(
    pool: &SqlitePool,
    reservation_id: i64,
    claimed_at: &str,
    issued_at: &str,
    valid_until: &str,
) -> Result<bool> {
    let mut tx = pool.begin().await?;
    let result = sqlx::query(
        "UPDATE tickets SET delivery_status = 'delivered', issued_at = ?, valid_until = ? \
         WHERE reservation_id = ? AND delivery_status = 'issuing' AND claimed_at = ?",
    )
    .bind(issued_at)
    .bind(valid_until)
    .bind(reservation_id)
    .bind(claimed_at)
    .execute(&mut *tx)
    .await?;
    if result.rows_affected() != 1 {
        return Ok(false);
    }
    sqlx::query("UPDATE reservations SET status = 'issued' WHERE id = ? AND status = 'paid'")
        .bind(reservation_id)
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;
    Ok(true)
}

pub async fn get_ticket(pool: &SqlitePool, reservation_id: i64) -> Result<Option<Ticket>> {
    let ticket = sqlx::query_as::<_, Ticket>(
        "SELECT reservation_id, delivery_status, claimed_at, issued_at, valid_until \
         FROM tickets WHERE reservation_id = ?",
    )
    .bind(reservation_id)
    .fetch_optional(pool)
    .await?;
    Ok(ticket)
}

pub async fn ticket_detail(pool: &SqlitePool, reservation_id: i64) -> Result<Option<TicketDetail>> {
    let detail = sqlx::query_as::<_, TicketDetail>(
        "SELECT r.id AS reservation_id, m.id AS match_id, m.title, m.date, m.time, \
                r.class, r.name, r.email, r.status \
         FROM reservations r JOIN matches m ON m.id = r.match_id \
         WHERE r.id = ?",
    )
    .bind(reservation_id)
    .fetch_optional(pool)
    .await?;
    Ok(detail)
}
