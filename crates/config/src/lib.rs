use std::path::PathBuf;
use serde::Deserialize;

/// All configuration for the FCB booking service.
///
/// Precedence (lowest to highest): defaults → config file → env var → CLI arg.
/// CLI arg merging is done by the caller after `Config::load()`.
#[derive(Debug, Clone)]
pub struct Config {
    // Database
    pub db_url: String,

    // Server
    pub port: u16,
    pub base_url: String,
    pub public_dir: String,

    // Logging
    pub log_level: String,
    pub utc: bool,

    // Stripe
    pub stripe_secret_key: String,
    pub stripe_webhook_secret: String,
    pub webhook_tolerance_secs: u64,
    pub currency: String,

    // Ticket delivery (Resend)
    pub resend_api_key: Option<String>,
    pub mail_from: String,
    pub admin_email: Option<String>,
    pub ticket_validity_months: u32,

    // Issuance worker
    pub worker_poll_secs: u64,
    pub worker_max_attempts: u32,
    pub issuance_lease_secs: u64,

    // Seat classes
    pub classes: Vec<ClassConfig>,
}

/// One priced seat class, e.g. `[[classes]]` in the config file.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct ClassConfig {
    /// Display name, also stored on reservations (e.g. "1. třída").
    pub name: String,
    /// Short code embedded in the ticket verification URL.
    pub code: String,
    /// Path segment of the payment redirect, `/pay/{slug}/{id}`.
    pub slug: String,
    /// Seats per match. Absent means unbounded.
    #[serde(default)]
    pub capacity: Option<u32>,
    /// Price in minor currency units (haléře).
    pub price: u64,
    /// Admitted straight to paid; no gateway event is awaited.
    #[serde(default)]
    pub pay_on_site: bool,
}

/// Config file layout (~/.fcb/config.toml). All fields optional; they layer
/// on top of compiled-in defaults.
#[derive(Debug, Deserialize, Default)]
struct FileConfig {
    db_url: Option<String>,
    port: Option<u16>,
    base_url: Option<String>,
    public_dir: Option<String>,
    log_level: Option<String>,
    utc: Option<bool>,
    stripe_secret_key: Option<String>,
    stripe_webhook_secret: Option<String>,
    webhook_tolerance_secs: Option<u64>,
    currency: Option<String>,
    resend_api_key: Option<String>,
    mail_from: Option<String>,
    admin_email: Option<String>,
    ticket_validity_months: Option<u32>,
    worker_poll_secs: Option<u64>,
    worker_max_attempts: Option<u32>,
    issuance_lease_secs: Option<u64>,
    classes: Option<Vec<ClassConfig>>,
}

impl Config {
    /// Config directory: ~/.fcb/
    pub fn dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".fcb")
    }

    /// Config file path: ~/.fcb/config.toml
    pub fn file_path() -> PathBuf {
        Self::dir().join("config.toml")
    }

    /// Load config: defaults → config file → env vars.
    /// CLI args should be merged by the caller afterward.
    pub fn load() -> Self {
        let mut config = Self::defaults();

        // Layer 2: config file
        if let Ok(contents) = std::fs::read_to_string(Self::file_path()) {
            if let Ok(file) = toml::from_str::<FileConfig>(&contents) {
                config.apply_file(file);
            }
        }

        // Layer 3: environment variables
        config.apply_env();

        config
    }

    /// Look up a class by its display name.
    pub fn class(&self, name: &str) -> Option<&ClassConfig> {
        self.classes.iter().find(|c| c.name == name)
    }

    /// Look up a class by its payment redirect slug.
    pub fn class_by_slug(&self, slug: &str) -> Option<&ClassConfig> {
        self.classes.iter().find(|c| c.slug == slug)
    }

    pub fn defaults() -> Self {
        Self {
            db_url: "sqlite:fcb.db".to_string(),
            port: 3000,
            base_url: "http://localhost:3000".to_string(),
            public_dir: "public".to_string(),
            log_level: "info".to_string(),
            utc: false,
            stripe_secret_key: String::new(),
            stripe_webhook_secret: String::new(),
            webhook_tolerance_secs: 300,
            currency: "czk".to_string(),
            resend_api_key: None,
            mail_from: "FC Bažantnice <info@fcbazantnice.online>".to_string(),
            admin_email: None,
            ticket_validity_months: 6,
            worker_poll_secs: 15,
            worker_max_attempts: 8,
            issuance_lease_secs: 600,
            classes: default_classes(),
        }
    }

    // --- Private helpers ---

    fn apply_file(&mut self, file: FileConfig) {
        if let Some(v) = file.db_url { self.db_url = v; }
        if let Some(v) = file.port { self.port = v; }
        if let Some(v) = file.base_url { self.base_url = v; }
        if let Some(v) = file.public_dir { self.public_dir = v; }
        if let Some(v) = file.log_level { self.log_level = v; }
        if let Some(v) = file.utc { self.utc = v; }
        if let Some(v) = file.stripe_secret_key { self.stripe_secret_key = v; }
        if let Some(v) = file.stripe_webhook_secret { self.stripe_webhook_secret = v; }
        if let Some(v) = file.webhook_tolerance_secs { self.webhook_tolerance_secs = v; }
        if let Some(v) = file.currency { self.currency = v; }
        if let Some(v) = file.resend_api_key { self.resend_api_key = Some(v); }
        if let Some(v) = file.mail_from { self.mail_from = v; }
        if let Some(v) = file.admin_email { self.admin_email = Some(v); }
        if let Some(v) = file.ticket_validity_months { self.ticket_validity_months = v; }
        if let Some(v) = file.worker_poll_secs { self.worker_poll_secs = v; }
        if let Some(v) = file.worker_max_attempts { self.worker_max_attempts = v; }
        if let Some(v) = file.issuance_lease_secs { self.issuance_lease_secs = v; }
        if let Some(v) = file.classes {
            if !v.is_empty() { self.classes = v; }
        }
    }

    fn apply_env(&mut self) {
        if let Ok(v) = std::env::var("FCB_DB_URL") { self.db_url = v; }
        if let Ok(v) = std::env::var("FCB_PORT") {
            if let Ok(p) = v.parse() { self.port = p; }
        }
        if let Ok(v) = std::env::var("BASE_URL") { self.base_url = v; }
        if let Ok(v) = std::env::var("FCB_PUBLIC_DIR") { self.public_dir = v; }
        if let Ok(v) = std::env::var("FCB_LOG_LEVEL") { self.log_level = v; }
        if let Ok(v) = std::env::var("FCB_UTC") {
            self.utc = v == "1" || v.eq_ignore_ascii_case("true");
        }
        if let Ok(v) = std::env::var("STRIPE_SECRET_KEY") { self.stripe_secret_key = v; }
        if let Ok(v) = std::env::var("STRIPE_WEBHOOK_SECRET") { self.stripe_webhook_secret = v; }
        if let Ok(v) = std::env::var("RESEND_API_KEY") {
            if !v.is_empty() { self.resend_api_key = Some(v); }
        }
        if let Ok(v) = std::env::var("RESEND_FROM") { self.mail_from = v; }
        if let Ok(v) = std::env::var("FCB_ADMIN_EMAIL") {
            if !v.is_empty() { self.admin_email = Some(v); }
        }
    }
}

fn default_classes() -> Vec<ClassConfig> {
    vec![
        ClassConfig {
            name: "1. třída".to_string(),
            code: "1".to_string(),
            slug: "1trida".to_string(),
            capacity: Some(5),
            price: 8000,
            pay_on_site: false,
        },
        ClassConfig {
            name: "2. třída".to_string(),
            code: "2".to_string(),
            slug: "2trida".to_string(),
            capacity: Some(5),
            price: 3500,
            pay_on_site: false,
        },
        ClassConfig {
            name: "3. třída".to_string(),
            code: "3".to_string(),
            slug: "3trida".to_string(),
            capacity: Some(10),
            price: 2000,
            pay_on_site: false,
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_layer_overrides_defaults() {
        let file: FileConfig = toml::from_str(
            r#"
            port = 8080
            ticket_validity_months = 3

            [[classes]]
            name = "Tribuna"
            code = "T"
            slug = "tribuna"
            capacity = 40
            price = 15000

            [[classes]]
            name = "Stání"
            code = "S"
            slug = "stani"
            price = 5000
            pay_on_site = true
            "#,
        )
        .unwrap();

        let mut config = Config::defaults();
        config.apply_file(file);

        assert_eq!(config.port, 8080);
        assert_eq!(config.ticket_validity_months, 3);
        assert_eq!(config.classes.len(), 2);
        let standing = config.class_by_slug("stani").unwrap();
        assert_eq!(standing.capacity, None);
        assert!(standing.pay_on_site);
        assert_eq!(config.class("Tribuna").unwrap().capacity, Some(40));
    }

    #[test]
    fn empty_class_list_keeps_defaults() {
        let file: FileConfig = toml::from_str("classes = []").unwrap();
        let mut config = Config::defaults();
        config.apply_file(file);
        assert_eq!(config.classes, default_classes());
    }
}
