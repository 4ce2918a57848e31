use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Match {
    pub id: i64,
    pub title: String,
    pub date: String,
    pub time: String,
}

/// Reservation lifecycle. Transitions only move forward:
/// `Pending → Paid → Issued`, or `Pending → Cancelled`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum ReservationStatus {
    Pending,
    Paid,
    Issued,
    Cancelled,
}

impl ReservationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReservationStatus::Pending => "pending",
            ReservationStatus::Paid => "paid",
            ReservationStatus::Issued => "issued",
            ReservationStatus::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for ReservationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Reservation {
    pub id: i64,
    pub match_id: i64,
    pub class: String,
    pub name: String,
    pub email: String,
    pub status: ReservationStatus,
    pub created_at: String,
}

/// Occupancy of one class for one match, as derived from the reservations table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassOccupancy {
    pub class: String,
    /// `None` means the class is unbounded.
    pub capacity: Option<i64>,
    pub occupied: i64,
    pub available: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchOccupancy {
    #[serde(flatten)]
    pub fixture: Match,
    pub classes: Vec<ClassOccupancy>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct PaymentEvent {
    pub id: String,
    pub event_type: String,
    pub reservation_id: Option<i64>,
    pub processed: bool,
    pub received_at: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum DeliveryStatus {
    Issuing,
    Delivered,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Ticket {
    pub reservation_id: i64,
    pub delivery_status: DeliveryStatus,
    pub claimed_at: String,
    pub issued_at: Option<String>,
    pub valid_until: Option<String>,
}

/// Everything needed to render and deliver a ticket.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct TicketDetail {
    pub reservation_id: i64,
    pub match_id: i64,
    pub title: String,
    pub date: String,
    pub time: String,
    pub class: String,
    pub name: String,
    pub email: String,
    pub status: ReservationStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct IssuanceJob {
    pub reservation_id: i64,
    pub attempts: i64,
    pub next_attempt_at: String,
    pub last_error: Option<String>,
    pub created_at: String,
}
