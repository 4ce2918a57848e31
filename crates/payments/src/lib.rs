use anyhow::{Context, Result, bail};
use serde::Deserialize;
use tracing::info;

pub mod webhook;

pub use webhook::{CHECKOUT_COMPLETED, Event, SignatureVerifier, WebhookError};

const STRIPE_API_URL: &str = "https://api.stripe.com/v1";

// --- Stripe API response types ---

#[derive(Debug, Deserialize)]
pub struct CheckoutSession {
    pub id: String,
    pub url: Option<String>,
}

#[derive(Deserialize)]
struct ApiErrorResponse {
    error: ApiError,
}

#[derive(Deserialize)]
struct ApiError {
    message: Option<String>,
}

// --- Checkout ---

/// What to charge for one reservation.
#[derive(Debug, Clone)]
pub struct CheckoutRequest<'a> {
    pub reservation_id: i64,
    pub class_name: &'a str,
    /// Minor currency units.
    pub amount: u64,
    pub currency: &'a str,
    pub customer_email: Option<&'a str>,
    pub success_url: &'a str,
    pub cancel_url: &'a str,
}

impl CheckoutRequest<'_> {
    /// Form fields for `POST /v1/checkout/sessions`. The reservation id and
    /// class travel as metadata and come back on the webhook event.
    pub fn form(&self) -> Vec<(String, String)> {
        let mut form = vec![
            ("mode".to_string(), "payment".to_string()),
            ("payment_method_types[0]".to_string(), "card".to_string()),
            ("line_items[0][quantity]".to_string(), "1".to_string()),
            ("line_items[0][price_data][currency]".to_string(), self.currency.to_string()),
            ("line_items[0][price_data][unit_amount]".to_string(), self.amount.to_string()),
            (
                "line_items[0][price_data][product_data][name]".to_string(),
                format!("Rezervace – {}", self.class_name.to_uppercase()),
            ),
            ("success_url".to_string(), self.success_url.to_string()),
            ("cancel_url".to_string(), self.cancel_url.to_string()),
            ("metadata[reservationId]".to_string(), self.reservation_id.to_string()),
            ("metadata[seatClass]".to_string(), self.class_name.to_string()),
        ];
        if let Some(email) = self.customer_email {
            form.push(("customer_email".to_string(), email.to_string()));
        }
        form
    }
}

#[derive(Debug, Clone)]
pub struct StripeClient {
    http: reqwest::Client,
    secret_key: String,
    api_url: String,
}

impl StripeClient {
    pub fn new(http: reqwest::Client, secret_key: impl Into<String>) -> Self {
        Self {
            http,
            secret_key: secret_key.into(),
            api_url: STRIPE_API_URL.to_string(),
        }
    }

    /// Create a Checkout Session and return its redirect URL.
    pub async fn create_checkout_session(&self, request: &CheckoutRequest<'_>) -> Result<CheckoutSession> {
        if self.secret_key.is_empty() {
            bail!("Stripe secret key is not configured");
        }
        info!(
            reservation_id = request.reservation_id,
            class = request.class_name,
            amount = request.amount,
            "Creating Stripe checkout session"
        );

        let resp = self
            .http
            .post(format!("{}/checkout/sessions", self.api_url))
            .basic_auth(&self.secret_key, None::<&str>)
            .form(&request.form())
            .send()
            .await
            .context("Stripe request failed")?;

        let status = resp.status();
        if !status.is_success() {
            let message = resp
                .json::<ApiErrorResponse>()
                .await
                .ok()
                .and_then(|e| e.error.message)
                .unwrap_or_else(|| status.to_string());
            bail!("Stripe rejected checkout session: {message}");
        }

        let session: CheckoutSession = resp.json().await?;
        if session.url.is_none() {
            bail!("Stripe checkout session {} has no redirect URL", session.id);
        }
        info!(session_id = %session.id, "Stripe checkout session created");
        Ok(session)
    }
}
