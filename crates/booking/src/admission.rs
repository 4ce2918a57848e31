use std::sync::Arc;

use chrono::{Local, Utc};
use fcb_config::ClassConfig;
use fcb_db::NewReservation;
use fcb_models::{Reservation, ReservationStatus};
use serde::Deserialize;
use sqlx::SqlitePool;
use tokio::sync::Notify;
use tracing::{info, warn};

use crate::error::{BookingError, Result};

/// Body of `POST /api/book`.
#[derive(Debug, Clone, Deserialize)]
pub struct ReservationRequest {
    pub match_id: i64,
    pub class: String,
    pub name: String,
    pub email: String,
}

/// Admits reservations against per-(match, class) capacity.
#[derive(Clone)]
pub struct AdmissionController {
    pool: SqlitePool,
    classes: Arc<[ClassConfig]>,
    wake: Arc<Notify>,
}

impl AdmissionController {
    pub fn new(pool: SqlitePool, classes: Vec<ClassConfig>, wake: Arc<Notify>) -> Self {
        Self { pool, classes: classes.into(), wake }
    }

    pub fn class(&self, name: &str) -> Option<&ClassConfig> {
        self.classes.iter().find(|c| c.name == name)
    }

    /// Create a reservation if the class still has a seat for this match.
    ///
    /// Pay-on-site classes are admitted as paid and queued for ticket
    /// issuance in the same transaction; every other class starts pending.
    pub async fn create_reservation(&self, request: &ReservationRequest) -> Result<Reservation> {
        let name = request.name.trim();
        let email = request.email.trim();
        let class = self
            .class(&request.class)
            .ok_or_else(|| BookingError::Validation(format!("unknown class '{}'", request.class)))?;
        if name.is_empty() {
            return Err(BookingError::Validation("name is required".to_string()));
        }
        if !is_valid_email(email) {
            return Err(BookingError::Validation(format!("invalid email address '{email}'")));
        }

        let status = if class.pay_on_site {
            ReservationStatus::Paid
        } else {
            ReservationStatus::Pending
        };
        let today = Local::now().date_naive().format("%Y-%m-%d").to_string();
        let now = fcb_db::timestamp(Utc::now());
        let new = NewReservation {
            match_id: request.match_id,
            class: &class.name,
            name,
            email,
            status,
            capacity: class.capacity,
            open_from: &today,
            created_at: &now,
        };

        let mut tx = self.pool.begin().await?;
        let Some(reservation) = fcb_db::insert_if_capacity(&mut *tx, &new).await? else {
            let err = match fcb_db::match_date(&mut *tx, request.match_id).await? {
                None => BookingError::MatchNotFound(request.match_id),
                Some(date) if date < today => {
                    BookingError::Validation(format!("match {} on {date} is closed for booking", request.match_id))
                }
                Some(_) => BookingError::CapacityExceeded {
                    match_id: request.match_id,
                    class: class.name.clone(),
                },
            };
            warn!(match_id = request.match_id, class = %class.name, "Reservation refused: {err}");
            return Err(err);
        };
        if class.pay_on_site {
            fcb_db::enqueue_issuance(&mut *tx, reservation.id, &now).await?;
        }
        tx.commit().await?;

        info!(
            reservation_id = reservation.id,
            match_id = reservation.match_id,
            class = %reservation.class,
            status = %reservation.status,
            "Reservation admitted"
        );
        if class.pay_on_site {
            self.wake.notify_one();
        }
        Ok(reservation)
    }
}

/// Basic `local@domain.tld` shape check.
pub fn is_valid_email(email: &str) -> bool {
    if email.is_empty() || email.chars().any(char::is_whitespace) {
        return false;
    }
    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };
    if local.is_empty() || domain.contains('@') {
        return false;
    }
    let labels: Vec<&str> = domain.split('.').collect();
    labels.len() >= 2 && labels.iter().all(|l| !l.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FUTURE_DATE, classes, scratch_pool};

    fn request(match_id: i64, class: &str) -> ReservationRequest {
        ReservationRequest {
            match_id,
            class: class.to_string(),
            name: "Karel Fan".to_string(),
            email: "karel@example.cz".to_string(),
        }
    }

    #[test]
    fn email_shape() {
        assert!(is_valid_email("a@b.cz"));
        assert!(is_valid_email("first.last+tag@mail.example.com"));
        assert!(!is_valid_email(""));
        assert!(!is_valid_email("no-at-sign.cz"));
        assert!(!is_valid_email("@example.cz"));
        assert!(!is_valid_email("a@localhost"));
        assert!(!is_valid_email("a@b..cz"));
        assert!(!is_valid_email("a b@c.cz"));
        assert!(!is_valid_email("a@b@c.cz"));
    }

    #[tokio::test]
    async fn sixth_booking_in_full_class_fails_other_class_still_open() {
        let (_dir, pool) = scratch_pool().await;
        let game = fcb_db::create_match(&pool, "FCB vs Sparta B", FUTURE_DATE, "17:00", &[]).await.unwrap();
        let admission = AdmissionController::new(pool.clone(), classes(), Arc::new(Notify::new()));

        for _ in 0..5 {
            let r = admission.create_reservation(&request(game.id, "A")).await.unwrap();
            assert_eq!(r.status, ReservationStatus::Pending);
        }
        let err = admission.create_reservation(&request(game.id, "A")).await.unwrap_err();
        assert!(matches!(err, BookingError::CapacityExceeded { .. }), "{err:?}");

        admission.create_reservation(&request(game.id, "B")).await.unwrap();
        assert_eq!(fcb_db::occupied(&pool, game.id, "A").await.unwrap(), 5);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_admissions_never_exceed_capacity() {
        let (_dir, pool) = scratch_pool().await;
        let game = fcb_db::create_match(&pool, "Cup final", FUTURE_DATE, "17:00", &[]).await.unwrap();
        let admission = Arc::new(AdmissionController::new(pool.clone(), classes(), Arc::new(Notify::new())));

        let mut handles = Vec::new();
        for n in 0..12 {
            let admission = admission.clone();
            let mut req = request(game.id, "A");
            req.email = format!("fan{n}@example.cz");
            handles.push(tokio::spawn(async move { admission.create_reservation(&req).await }));
        }

        let mut admitted = 0;
        let mut refused = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => admitted += 1,
                Err(BookingError::CapacityExceeded { .. }) => refused += 1,
                Err(other) => panic!("unexpected error: {other:?}"),
            }
        }
        assert_eq!(admitted, 5);
        assert_eq!(refused, 7);
        assert_eq!(fcb_db::occupied(&pool, game.id, "A").await.unwrap(), 5);
    }

    #[tokio::test]
    async fn invalid_input_writes_nothing() {
        let (_dir, pool) = scratch_pool().await;
        let game = fcb_db::create_match(&pool, "League", FUTURE_DATE, "17:00", &[]).await.unwrap();
        let admission = AdmissionController::new(pool.clone(), classes(), Arc::new(Notify::new()));

        let bad_class = request(game.id, "VIP");
        let mut no_name = request(game.id, "A");
        no_name.name = "   ".to_string();
        let mut bad_email = request(game.id, "A");
        bad_email.email = "karel".to_string();

        for req in [bad_class, no_name, bad_email] {
            let err = admission.create_reservation(&req).await.unwrap_err();
            assert!(matches!(err, BookingError::Validation(_)), "{err:?}");
        }
        assert!(fcb_db::list_reservations(&pool, None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn unknown_and_past_matches_are_refused() {
        let (_dir, pool) = scratch_pool().await;
        let past = fcb_db::create_match(&pool, "Last season", "2001-05-01", "17:00", &[]).await.unwrap();
        let admission = AdmissionController::new(pool.clone(), classes(), Arc::new(Notify::new()));

        let err = admission.create_reservation(&request(404, "A")).await.unwrap_err();
        assert!(matches!(err, BookingError::MatchNotFound(404)));
        let err = admission.create_reservation(&request(past.id, "A")).await.unwrap_err();
        assert!(matches!(err, BookingError::Validation(_)));
    }

    #[tokio::test]
    async fn pay_on_site_is_admitted_paid_and_queued() {
        let (_dir, pool) = scratch_pool().await;
        let game = fcb_db::create_match(&pool, "Friendly", FUTURE_DATE, "10:30", &[]).await.unwrap();
        let admission = AdmissionController::new(pool.clone(), classes(), Arc::new(Notify::new()));

        let r = admission.create_reservation(&request(game.id, "S")).await.unwrap();
        assert_eq!(r.status, ReservationStatus::Paid);
        let jobs = fcb_db::list_jobs(&pool).await.unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].reservation_id, r.id);
    }
}
