use std::sync::Arc;

use chrono::{DateTime, Months, Utc};
use fcb_models::{DeliveryStatus, TicketDetail};
use serde::Serialize;
use sqlx::SqlitePool;
use tracing::{error, info, warn};

use crate::error::{BookingError, Result};
use crate::mailer::{Attachment, Mailer, OutgoingEmail};
use crate::render::{TicketDocument, TicketRenderer};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Issuance {
    /// Ticket rendered and delivered by this call.
    Issued { reservation_id: i64, valid_until: String },
    /// The ticket was already delivered.
    AlreadyIssued,
    /// Another issuer holds the claim. It may still fail, so callers that
    /// own a retry should try again later.
    InProgress,
    /// The reservation is missing or not paid.
    NotEligible,
}

#[derive(Debug, Clone)]
pub struct IssuerSettings {
    pub validity_months: u32,
    /// Claims older than this are considered abandoned.
    pub lease: chrono::Duration,
    pub admin_email: Option<String>,
}

/// Renders and delivers one ticket per paid reservation.
pub struct TicketIssuer {
    pool: SqlitePool,
    mailer: Arc<dyn Mailer>,
    renderer: TicketRenderer,
    settings: IssuerSettings,
}

impl TicketIssuer {
    pub fn new(
        pool: SqlitePool,
        mailer: Arc<dyn Mailer>,
        renderer: TicketRenderer,
        settings: IssuerSettings,
    ) -> Self {
        Self { pool, mailer, renderer, settings }
    }

    /// Issue the ticket for `reservation_id` unless one already exists.
    ///
    /// The claim row is the idempotency gate. It is released if rendering or
    /// delivery fails, so the call can be retried; once delivery succeeded the
    /// claim is never released.
    pub async fn issue_ticket(&self, reservation_id: i64) -> Result<Issuance> {
        let now = Utc::now();
        let claimed_at = fcb_db::timestamp(now);
        let stale_before = fcb_db::timestamp(now - self.settings.lease);

        if !fcb_db::claim_ticket(&self.pool, reservation_id, &claimed_at, &stale_before).await? {
            return match fcb_db::get_ticket(&self.pool, reservation_id).await? {
                Some(ticket) if ticket.delivery_status == DeliveryStatus::Delivered => Ok(Issuance::AlreadyIssued),
                Some(_) => {
                    info!(reservation_id, "Ticket issuance already in progress elsewhere");
                    Ok(Issuance::InProgress)
                }
                None => {
                    warn!(reservation_id, "Ticket not issued: reservation is missing or not paid");
                    Ok(Issuance::NotEligible)
                }
            };
        }

        let valid_until = match self.render_and_deliver(reservation_id, now).await {
            Ok(valid_until) => valid_until,
            Err(e) => {
                match fcb_db::release_ticket(&self.pool, reservation_id, &claimed_at).await {
                    Ok(true) => {}
                    Ok(false) => warn!(reservation_id, "Ticket claim was taken over before release"),
                    Err(release_err) => error!(reservation_id, "Failed to release ticket claim: {release_err}"),
                }
                warn!(reservation_id, "Ticket issuance failed: {e}");
                return Err(e);
            }
        };

        let valid_until = fcb_db::timestamp(valid_until);
        if !fcb_db::complete_ticket(&self.pool, reservation_id, &claimed_at, &claimed_at, &valid_until).await? {
            error!(reservation_id, "Ticket delivered but the claim was taken over; the new holder finishes it");
            return Ok(Issuance::InProgress);
        }
        info!(reservation_id, valid_until = %valid_until, "Ticket issued");
        Ok(Issuance::Issued { reservation_id, valid_until })
    }

    async fn render_and_deliver(&self, reservation_id: i64, now: DateTime<Utc>) -> Result<DateTime<Utc>> {
        let detail = fcb_db::ticket_detail(&self.pool, reservation_id)
            .await?
            .ok_or(BookingError::ReservationNotFound(reservation_id))?;
        let valid_until = now
            .checked_add_months(Months::new(self.settings.validity_months))
            .ok_or_else(|| BookingError::Validation("ticket validity window out of range".to_string()))?;
        let document = self.renderer.render(&detail, now, valid_until)?;

        let email = holder_email(&detail, &document);
        self.mailer
            .send(&email)
            .await
            .map_err(|e| BookingError::ExternalService(format!("ticket delivery failed: {e:#}")))?;

        if let Some(admin) = &self.settings.admin_email {
            let notice = admin_notice(admin, &detail, &document);
            // The holder already has the ticket; a lost notice must not cause a resend.
            if let Err(e) = self.mailer.send(&notice).await {
                warn!(reservation_id, "Admin notification failed: {e:#}");
            }
        }
        Ok(valid_until)
    }
}

fn holder_email(detail: &TicketDetail, document: &TicketDocument) -> OutgoingEmail {
    OutgoingEmail {
        to: detail.email.clone(),
        subject: "Vaše vstupenka FC Bažantnice".to_string(),
        text: format!(
            "Děkujeme za nákup! V příloze najdete svou vstupenku na zápas {} ({} {}).",
            detail.title, detail.date, detail.time
        ),
        attachments: vec![Attachment {
            filename: document.filename.clone(),
            content_type: "text/html".to_string(),
            content: document.html.clone().into_bytes(),
        }],
    }
}

fn admin_notice(admin: &str, detail: &TicketDetail, document: &TicketDocument) -> OutgoingEmail {
    OutgoingEmail {
        to: admin.to_string(),
        subject: format!("Vstupenka vydána: rezervace #{}", detail.reservation_id),
        text: format!(
            "{} <{}>, {}, {} {} {}\n{}",
            detail.name, detail.email, detail.class, detail.title, detail.date, detail.time,
            document.verification_url
        ),
        attachments: Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::admission::{AdmissionController, ReservationRequest};
    use crate::testing::{FUTURE_DATE, RecordingMailer, classes, issuer, scratch_pool};
    use async_trait::async_trait;
    use fcb_models::ReservationStatus;
    use std::sync::Arc;
    use tokio::sync::Notify;

    async fn paid_reservation(pool: &SqlitePool) -> i64 {
        let game = fcb_db::create_match(pool, "FCB vs Dukla", FUTURE_DATE, "17:00", &[]).await.unwrap();
        let admission = AdmissionController::new(pool.clone(), classes(), Arc::new(Notify::new()));
        let request = ReservationRequest {
            match_id: game.id,
            class: "S".to_string(),
            name: "Marek".to_string(),
            email: "marek@example.cz".to_string(),
        };
        admission.create_reservation(&request).await.unwrap().id
    }

    #[tokio::test]
    async fn issues_once_and_marks_reservation_issued() {
        let (_dir, pool) = scratch_pool().await;
        let id = paid_reservation(&pool).await;
        let mailer = Arc::new(RecordingMailer::default());
        let issuer = issuer(&pool, mailer.clone(), None);

        let first = issuer.issue_ticket(id).await.unwrap();
        assert!(matches!(first, Issuance::Issued { reservation_id, .. } if reservation_id == id));
        assert_eq!(issuer.issue_ticket(id).await.unwrap(), Issuance::AlreadyIssued);

        let sent = mailer.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].to, "marek@example.cz");
        assert_eq!(sent[0].attachments.len(), 1);

        let ticket = fcb_db::get_ticket(&pool, id).await.unwrap().unwrap();
        assert_eq!(ticket.delivery_status, DeliveryStatus::Delivered);
        assert!(ticket.valid_until.is_some());
        let reservation = fcb_db::get_reservation(&pool, id).await.unwrap().unwrap();
        assert_eq!(reservation.status, ReservationStatus::Issued);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_calls_deliver_once() {
        let (_dir, pool) = scratch_pool().await;
        let id = paid_reservation(&pool).await;
        let mailer = Arc::new(RecordingMailer::default());
        let issuer = Arc::new(issuer(&pool, mailer.clone(), None));

        let a = tokio::spawn({
            let issuer = issuer.clone();
            async move { issuer.issue_ticket(id).await }
        });
        let b = tokio::spawn({
            let issuer = issuer.clone();
            async move { issuer.issue_ticket(id).await }
        });
        let outcomes = [a.await.unwrap().unwrap(), b.await.unwrap().unwrap()];

        assert_eq!(outcomes.iter().filter(|o| matches!(o, Issuance::Issued { .. })).count(), 1);
        assert_eq!(mailer.sent().len(), 1);
    }

    #[tokio::test]
    async fn failed_delivery_releases_gate_for_retry() {
        let (_dir, pool) = scratch_pool().await;
        let id = paid_reservation(&pool).await;
        let mailer = Arc::new(RecordingMailer::default());
        let issuer = issuer(&pool, mailer.clone(), None);

        mailer.set_failing(true);
        let err = issuer.issue_ticket(id).await.unwrap_err();
        assert!(matches!(err, BookingError::ExternalService(_)));
        assert!(fcb_db::get_ticket(&pool, id).await.unwrap().is_none());
        assert_eq!(
            fcb_db::get_reservation(&pool, id).await.unwrap().unwrap().status,
            ReservationStatus::Paid
        );

        mailer.set_failing(false);
        assert!(matches!(issuer.issue_ticket(id).await.unwrap(), Issuance::Issued { .. }));
        assert_eq!(mailer.sent().len(), 1);
    }

    #[tokio::test]
    async fn live_claim_elsewhere_reports_in_progress() {
        let (_dir, pool) = scratch_pool().await;
        let id = paid_reservation(&pool).await;
        let mailer = Arc::new(RecordingMailer::default());
        let issuer = issuer(&pool, mailer.clone(), None);

        let other_claim = fcb_db::timestamp(Utc::now());
        assert!(fcb_db::claim_ticket(&pool, id, &other_claim, "2000-01-01T00:00:00.000Z").await.unwrap());
        assert_eq!(issuer.issue_ticket(id).await.unwrap(), Issuance::InProgress);
        assert!(mailer.sent().is_empty());

        // The other issuer fails and lets go; the next attempt delivers.
        assert!(fcb_db::release_ticket(&pool, id, &other_claim).await.unwrap());
        assert!(matches!(issuer.issue_ticket(id).await.unwrap(), Issuance::Issued { .. }));
        assert_eq!(mailer.sent().len(), 1);
    }

    /// Simulates a delivery that outlives the lease: while sending, another
    /// issuer takes the claim over.
    struct SlowMailer {
        pool: SqlitePool,
        reservation_id: i64,
        fail: bool,
    }

    const TAKEOVER_AT: &str = "2999-01-01T00:00:00.000Z";

    #[async_trait]
    impl Mailer for SlowMailer {
        async fn send(&self, _email: &OutgoingEmail) -> anyhow::Result<String> {
            assert!(fcb_db::claim_ticket(&self.pool, self.reservation_id, TAKEOVER_AT, TAKEOVER_AT).await?);
            if self.fail {
                anyhow::bail!("relay timed out");
            }
            Ok("msg_slow".to_string())
        }
    }

    fn slow_issuer(pool: &SqlitePool, reservation_id: i64, fail: bool) -> TicketIssuer {
        TicketIssuer::new(
            pool.clone(),
            Arc::new(SlowMailer { pool: pool.clone(), reservation_id, fail }),
            TicketRenderer::new("https://fcb.example", classes()),
            IssuerSettings {
                validity_months: 6,
                lease: chrono::Duration::minutes(10),
                admin_email: None,
            },
        )
    }

    #[tokio::test]
    async fn displaced_issuer_leaves_new_claim_alone() {
        let (_dir, pool) = scratch_pool().await;

        let failing = paid_reservation(&pool).await;
        let err = slow_issuer(&pool, failing, true).issue_ticket(failing).await.unwrap_err();
        assert!(matches!(err, BookingError::ExternalService(_)));
        let ticket = fcb_db::get_ticket(&pool, failing).await.unwrap().unwrap();
        assert_eq!(ticket.delivery_status, DeliveryStatus::Issuing);
        assert_eq!(ticket.claimed_at, TAKEOVER_AT);

        let finishing = paid_reservation(&pool).await;
        let outcome = slow_issuer(&pool, finishing, false).issue_ticket(finishing).await.unwrap();
        assert_eq!(outcome, Issuance::InProgress);
        let ticket = fcb_db::get_ticket(&pool, finishing).await.unwrap().unwrap();
        assert_eq!(ticket.delivery_status, DeliveryStatus::Issuing);
        assert_eq!(
            fcb_db::get_reservation(&pool, finishing).await.unwrap().unwrap().status,
            ReservationStatus::Paid
        );
    }

    #[tokio::test]
    async fn pending_reservation_gets_no_ticket() {
        let (_dir, pool) = scratch_pool().await;
        let game = fcb_db::create_match(&pool, "League", FUTURE_DATE, "17:00", &[]).await.unwrap();
        let admission = AdmissionController::new(pool.clone(), classes(), Arc::new(Notify::new()));
        let request = ReservationRequest {
            match_id: game.id,
            class: "A".to_string(),
            name: "Iva".to_string(),
            email: "iva@example.cz".to_string(),
        };
        let id = admission.create_reservation(&request).await.unwrap().id;
        let mailer = Arc::new(RecordingMailer::default());

        let outcome = issuer(&pool, mailer.clone(), None).issue_ticket(id).await.unwrap();
        assert_eq!(outcome, Issuance::NotEligible);
        assert!(mailer.sent().is_empty());
    }

    #[tokio::test]
    async fn admin_copy_is_sent_when_configured() {
        let (_dir, pool) = scratch_pool().await;
        let id = paid_reservation(&pool).await;
        let mailer = Arc::new(RecordingMailer::default());

        issuer(&pool, mailer.clone(), Some("admin@fcb.example".to_string()))
            .issue_ticket(id)
            .await
            .unwrap();
        let recipients: Vec<_> = mailer.sent().into_iter().map(|e| e.to).collect();
        assert_eq!(recipients, vec!["marek@example.cz".to_string(), "admin@fcb.example".to_string()]);
    }
}
