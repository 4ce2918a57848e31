use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::bail;
use async_trait::async_trait;
use fcb_config::ClassConfig;
use sqlx::SqlitePool;
use tempfile::TempDir;

use crate::issuance::{IssuerSettings, TicketIssuer};
use crate::mailer::{Mailer, OutgoingEmail};
use crate::render::TicketRenderer;

pub const FUTURE_DATE: &str = "2099-05-01";

pub async fn scratch_pool() -> (TempDir, SqlitePool) {
    let dir = tempfile::tempdir().unwrap();
    let url = format!("sqlite://{}", dir.path().join("booking-test.db").display());
    let pool = fcb_db::connect(&url).await.unwrap();
    fcb_db::migrate(&pool).await.unwrap();
    (dir, pool)
}

/// A: capacity 5, B: capacity 5, S: unbounded pay-on-site.
pub fn classes() -> Vec<ClassConfig> {
    vec![
        ClassConfig {
            name: "A".to_string(),
            code: "1".to_string(),
            slug: "a".to_string(),
            capacity: Some(5),
            price: 8000,
            pay_on_site: false,
        },
        ClassConfig {
            name: "B".to_string(),
            code: "2".to_string(),
            slug: "b".to_string(),
            capacity: Some(5),
            price: 3500,
            pay_on_site: false,
        },
        ClassConfig {
            name: "S".to_string(),
            code: "S".to_string(),
            slug: "s".to_string(),
            capacity: None,
            price: 0,
            pay_on_site: true,
        },
    ]
}

#[derive(Default)]
pub struct RecordingMailer {
    sent: Mutex<Vec<OutgoingEmail>>,
    failing: AtomicBool,
}

impl RecordingMailer {
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<OutgoingEmail> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Mailer for RecordingMailer {
    async fn send(&self, email: &OutgoingEmail) -> anyhow::Result<String> {
        if self.failing.load(Ordering::SeqCst) {
            bail!("mail relay unavailable");
        }
        let mut sent = self.sent.lock().unwrap();
        sent.push(email.clone());
        Ok(format!("msg_{}", sent.len()))
    }
}

pub fn issuer(pool: &SqlitePool, mailer: Arc<RecordingMailer>, admin_email: Option<String>) -> TicketIssuer {
    TicketIssuer::new(
        pool.clone(),
        mailer,
        TicketRenderer::new("https://fcb.example", classes()),
        IssuerSettings {
            validity_months: 6,
            lease: chrono::Duration::minutes(10),
            admin_email,
        },
    )
}
