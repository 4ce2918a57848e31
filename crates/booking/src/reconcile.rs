use std::sync::Arc;

use chrono::Utc;
use fcb_models::ReservationStatus;
use fcb_payments::{CHECKOUT_COMPLETED, Event, SignatureVerifier, WebhookError};
use serde::Serialize;
use sqlx::SqlitePool;
use tokio::sync::Notify;
use tracing::{info, warn};

use crate::error::{BookingError, Result};

/// Outcome of one webhook delivery. Every variant is acknowledged to the
/// gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Reconciled {
    /// First sighting of a completed checkout; the reservation is now paid
    /// and queued for ticket issuance.
    Paid { reservation_id: i64 },
    /// Event id seen before. Nothing was repeated.
    Duplicate,
    /// Event type we do not act on.
    Ignored { event_type: String },
    /// No reservation matches the event metadata.
    Unmatched { reference: Option<String> },
    /// The reservation exists but is no longer pending.
    AlreadySettled { reservation_id: i64, status: ReservationStatus },
}

/// Applies payment gateway events to reservations, once per event id.
#[derive(Clone)]
pub struct PaymentReconciler {
    pool: SqlitePool,
    verifier: SignatureVerifier,
    wake: Arc<Notify>,
}

impl PaymentReconciler {
    pub fn new(pool: SqlitePool, verifier: SignatureVerifier, wake: Arc<Notify>) -> Self {
        Self { pool, verifier, wake }
    }

    /// Verify, parse, and apply a raw webhook body.
    pub async fn handle_payment_event(&self, payload: &[u8], signature: Option<&str>) -> Result<Reconciled> {
        let signature = signature.ok_or_else(|| {
            BookingError::SignatureVerification(WebhookError::MalformedHeader.to_string())
        })?;
        self.verifier
            .verify(payload, signature, Utc::now().timestamp())
            .map_err(|e| BookingError::SignatureVerification(e.to_string()))?;

        let event = Event::parse(payload).map_err(|e| BookingError::Validation(e.to_string()))?;
        self.apply(&event).await
    }

    /// Apply an already verified event.
    ///
    /// The dedup record, the paid transition, the issuance job, and the
    /// processed flag commit together; a failure rolls all of them back so a
    /// redelivery starts from scratch.
    pub async fn apply(&self, event: &Event) -> Result<Reconciled> {
        let reference = event.reservation_ref().map(str::to_string);
        let reservation_id = reference.as_deref().and_then(|r| r.trim().parse::<i64>().ok());
        let now = fcb_db::timestamp(Utc::now());

        let mut tx = self.pool.begin().await?;
        let recorded =
            fcb_db::insert_payment_event(&mut *tx, &event.id, &event.event_type, reservation_id, &now).await?;
        if !recorded {
            info!(event_id = %event.id, "Duplicate payment event ignored");
            return Ok(Reconciled::Duplicate);
        }

        let outcome = if event.event_type != CHECKOUT_COMPLETED {
            Reconciled::Ignored { event_type: event.event_type.clone() }
        } else {
            match reservation_id {
                None => Reconciled::Unmatched { reference },
                Some(id) => {
                    if fcb_db::mark_paid(&mut *tx, id).await? {
                        fcb_db::enqueue_issuance(&mut *tx, id, &now).await?;
                        Reconciled::Paid { reservation_id: id }
                    } else {
                        match fcb_db::reservation_status(&mut *tx, id).await? {
                            None => Reconciled::Unmatched { reference },
                            Some(status) => Reconciled::AlreadySettled { reservation_id: id, status },
                        }
                    }
                }
            }
        };
        fcb_db::mark_event_processed(&mut *tx, &event.id).await?;
        tx.commit().await?;

        match &outcome {
            Reconciled::Paid { reservation_id } => {
                info!(event_id = %event.id, reservation_id, "Reservation marked paid");
                self.wake.notify_one();
            }
            Reconciled::Ignored { event_type } => {
                info!(event_id = %event.id, event_type = %event_type, "Payment event acknowledged, not handled");
            }
            Reconciled::Unmatched { reference } => {
                warn!(event_id = %event.id, reference = ?reference, "Payment event matches no reservation");
            }
            Reconciled::AlreadySettled { reservation_id, status } => {
                warn!(event_id = %event.id, reservation_id, status = %status, "Payment for reservation that is not pending");
            }
            Reconciled::Duplicate => {}
        }
        Ok(outcome)
    }
}
