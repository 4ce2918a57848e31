use anyhow::Result;
use fcb_models::{Reservation, ReservationStatus};
use sqlx::{SqliteConnection, SqlitePool};

const RESERVATION_COLUMNS: &str = "id, match_id, class, name, email, status, created_at";

/// A reservation row waiting to be admitted against the capacity ledger.
#[derive(Debug, Clone)]
pub struct NewReservation<'a> {
    pub match_id: i64,
    pub class: &'a str,
    pub name: &'a str,
    pub email: &'a str,
    pub status: ReservationStatus,
    /// Configured seats for the class; `None` is unbounded. A row in
    /// `match_capacity` takes precedence.
    pub capacity: Option<u32>,
    /// Matches dated before this `YYYY-MM-DD` are closed for booking.
    pub open_from: &'a str,
    pub created_at: &'a str,
}

/// Insert the reservation only if the match is open and the class still has a
/// free seat. Check and insert are one statement, so concurrent callers are
/// serialized on the database write lock.
///
/// Returns `None` when nothing was inserted; use [`match_date`] on the same
/// connection to tell a missing or past match from a full class.
pub async fn insert_if_capacity(
    conn: &mut SqliteConnection,
    new: &NewReservation<'_>,
) -> Result<Option<Reservation>> {
    let capacity = new.capacity.map(i64::from).unwrap_or(i64::MAX);
    let sql = format!(
        "INSERT INTO reservations (match_id, class, name, email, status, created_at) \
         SELECT m.id, ?1, ?2, ?3, ?4, ?5 FROM matches m \
         WHERE m.id = ?6 AND m.date >= ?7 \
           AND (SELECT COUNT(*) FROM reservations r \
                WHERE r.match_id = m.id AND r.class = ?1 AND r.status != 'cancelled') \
             < COALESCE((SELECT seats FROM match_capacity mc \
                         WHERE mc.match_id = m.id AND mc.class = ?1), ?8) \
         RETURNING {RESERVATION_COLUMNS}"
    );
    let row = sqlx::query_as::<_, Reservation>(&sql)
        .bind(new.class)
        .bind(new.name)
        .bind(new.email)
        .bind(new.status)
        .bind(new.created_at)
        .bind(new.match_id)
        .bind(new.open_from)
        .bind(capacity)
        .fetch_optional(&mut *conn)
        .await?;
    Ok(row)
}

pub async fn match_date(conn: &mut SqliteConnection, match_id: i64) -> Result<Option<String>> {
    let date = sqlx::query_scalar("SELECT date FROM matches WHERE id = ?")
        .bind(match_id)
        .fetch_optional(&mut *conn)
        .await?;
    Ok(date)
}

pub async fn get_reservation(pool: &SqlitePool, id: i64) -> Result<Option<Reservation>> {
    let sql = format!("SELECT {RESERVATION_COLUMNS} FROM reservations WHERE id = ?");
    let reservation = sqlx::query_as::<_, Reservation>(&sql)
        .bind(id)
        .fetch_optional(pool)
        .await?;
    Ok(reservation)
}

pub async fn list_reservations(pool: &SqlitePool, match_id: Option<i64>) -> Result<Vec<Reservation>> {
    let sql = format!(
        "SELECT {RESERVATION_COLUMNS} FROM reservations \
         WHERE (?1 IS NULL OR match_id = ?1) ORDER BY id"
    );
    let reservations = sqlx::query_as::<_, Reservation>(&sql)
        .bind(match_id)
        .fetch_all(pool)
        .await?;
    Ok(reservations)
}

pub async fn reservation_status(
    conn: &mut SqliteConnection,
    id: i64,
) -> Result<Option<ReservationStatus>> {
    let status = sqlx::query_scalar("SELECT status FROM reservations WHERE id = ?")
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;
    Ok(status)
}

/// Pending → Paid. Returns false if the reservation is missing or not pending.
pub async fn mark_paid(conn: &mut SqliteConnection, id: i64) -> Result<bool> {
    let result = sqlx::query("UPDATE reservations SET status = 'paid' WHERE id = ? AND status = 'pending'")
        .bind(id)
        .execute(&mut *conn)
        .await?;
    Ok(result.rows_affected() == 1)
}

/// Pending → Cancelled. Paid reservations cannot be cancelled here.
pub async fn cancel_reservation(pool: &SqlitePool, id: i64) -> Result<bool> {
    let result = sqlx::query("UPDATE reservations SET status = 'cancelled' WHERE id = ? AND status = 'pending'")
        .bind(id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() == 1)
}
