use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::Redirect;
use axum::routing::{get, post};
use axum::{Json, Router};
use fcb_booking::{
    AdmissionController, BookingError, IssuanceWorker, MatchWindow, PaymentReconciler, ReservationRequest,
    TicketIssuer,
};
use fcb_config::Config;
use fcb_models::{MatchOccupancy, ReservationStatus};
use fcb_payments::{CheckoutRequest, SignatureVerifier, StripeClient};
use serde::Deserialize;
use serde_json::json;
use sqlx::SqlitePool;
use tokio::sync::{Notify, watch};
use tower_http::services::ServeDir;
use tracing::{error, info, warn};

use crate::version_string;

type ApiError = (StatusCode, Json<serde_json::Value>);

#[derive(Clone)]
pub struct AppState {
    pool: SqlitePool,
    config: Arc<Config>,
    admission: AdmissionController,
    reconciler: PaymentReconciler,
    stripe: StripeClient,
}

fn api_error(status: StatusCode, message: impl Into<String>) -> ApiError {
    (status, Json(json!({ "ok": false, "error": message.into() })))
}

fn booking_error(e: BookingError) -> ApiError {
    let status = match &e {
        BookingError::Validation(_) | BookingError::SignatureVerification(_) => StatusCode::BAD_REQUEST,
        BookingError::MatchNotFound(_) | BookingError::ReservationNotFound(_) => StatusCode::NOT_FOUND,
        BookingError::CapacityExceeded { .. } => StatusCode::CONFLICT,
        BookingError::ExternalService(_) => StatusCode::BAD_GATEWAY,
        BookingError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    if status.is_server_error() {
        error!("Request failed: {e}");
        return api_error(status, "Internal error");
    }
    api_error(status, e.to_string())
}

// --- Handlers ---

async fn health() -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "message": "Hello, FCB!",
        "version": version_string()
    }))
}

#[derive(Deserialize)]
struct MatchesQuery {
    upcoming: Option<bool>,
    days: Option<u32>,
}

async fn api_list_matches(
    State(state): State<AppState>,
    Query(params): Query<MatchesQuery>,
) -> Result<Json<Vec<MatchOccupancy>>, ApiError> {
    let window = MatchWindow {
        upcoming: params.upcoming.unwrap_or(false),
        days: params.days,
    };
    fcb_booking::list_matches_with_occupancy(&state.pool, &state.config.classes, window)
        .await
        .map(Json)
        .map_err(booking_error)
}

async fn api_upcoming_matches(State(state): State<AppState>) -> Result<Json<serde_json::Value>, ApiError> {
    let window = MatchWindow { upcoming: true, days: None };
    let matches = fcb_booking::list_matches_with_occupancy(&state.pool, &state.config.classes, window)
        .await
        .map_err(booking_error)?;
    Ok(Json(json!({ "ok": true, "matches": matches })))
}

async fn api_book(
    State(state): State<AppState>,
    Json(body): Json<ReservationRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let reservation = state.admission.create_reservation(&body).await.map_err(booking_error)?;
    let pay_url = match state.config.class(&reservation.class) {
        Some(class) if reservation.status == ReservationStatus::Pending => {
            Some(format!("/pay/{}/{}", class.slug, reservation.id))
        }
        _ => None,
    };
    Ok(Json(json!({
        "ok": true,
        "id": reservation.id,
        "status": reservation.status,
        "pay_url": pay_url,
    })))
}

/// Takes the body as raw bytes: the signature is computed over them exactly
/// as received.
async fn api_stripe_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<serde_json::Value>, (StatusCode, String)> {
    let signature = headers.get("stripe-signature").and_then(|v| v.to_str().ok());
    match state.reconciler.handle_payment_event(&body, signature).await {
        Ok(outcome) => Ok(Json(json!({ "received": true, "result": outcome }))),
        Err(e @ (BookingError::SignatureVerification(_) | BookingError::Validation(_))) => {
            warn!("Webhook rejected: {e}");
            Err((StatusCode::BAD_REQUEST, format!("Webhook Error: {e}")))
        }
        Err(e) => {
            // Nothing was committed; the gateway will redeliver.
            error!("Webhook processing failed: {e}");
            Err((StatusCode::INTERNAL_SERVER_ERROR, "Webhook processing failed".to_string()))
        }
    }
}

#[derive(Deserialize)]
struct PayQuery {
    email: Option<String>,
}

async fn pay_redirect(
    State(state): State<AppState>,
    Path((slug, reservation_id)): Path<(String, i64)>,
    Query(params): Query<PayQuery>,
) -> Result<Redirect, (StatusCode, String)> {
    let class = state
        .config
        .class_by_slug(&slug)
        .ok_or((StatusCode::BAD_REQUEST, "Neplatná třída.".to_string()))?;
    let reservation = fcb_db::get_reservation(&state.pool, reservation_id)
        .await
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?
        .ok_or((StatusCode::NOT_FOUND, "Rezervace nenalezena.".to_string()))?;
    if reservation.class != class.name {
        return Err((StatusCode::BAD_REQUEST, "Rezervace je pro jinou třídu.".to_string()));
    }
    if reservation.status != ReservationStatus::Pending {
        return Err((StatusCode::BAD_REQUEST, "Už zaplaceno.".to_string()));
    }

    let base = state.config.base_url.trim_end_matches('/');
    let success_url = format!("{base}/?paid=ok");
    let cancel_url = format!("{base}/?paid=cancel");
    let email = params.email.as_deref().unwrap_or(&reservation.email);
    let request = CheckoutRequest {
        reservation_id,
        class_name: &class.name,
        amount: class.price,
        currency: &state.config.currency,
        customer_email: Some(email),
        success_url: &success_url,
        cancel_url: &cancel_url,
    };
    let session = state.stripe.create_checkout_session(&request).await.map_err(|e| {
        error!(reservation_id, "Checkout session failed: {e:#}");
        (StatusCode::BAD_GATEWAY, "Platbu nelze zahájit.".to_string())
    })?;
    let url = session
        .url
        .ok_or((StatusCode::BAD_GATEWAY, "Platbu nelze zahájit.".to_string()))?;
    Ok(Redirect::to(&url))
}

// --- Server ---

pub fn router(state: AppState, public_dir: &str) -> Router {
    let api_routes = Router::new()
        .route("/health", get(health))
        .route("/matches", get(api_list_matches))
        .route("/matches/upcoming", get(api_upcoming_matches))
        .route("/book", post(api_book))
        .route("/stripe/webhook", post(api_stripe_webhook));

    Router::new()
        .nest("/api", api_routes)
        .route("/pay/{slug}/{id}", get(pay_redirect))
        .fallback_service(ServeDir::new(public_dir))
        .with_state(state)
}

pub async fn run_server(
    config: Arc<Config>,
    pool: SqlitePool,
    issuer: Arc<TicketIssuer>,
    http: reqwest::Client,
) -> anyhow::Result<()> {
    info!("FCB v{}", version_string());

    let wake = Arc::new(Notify::new());
    let state = AppState {
        pool: pool.clone(),
        admission: AdmissionController::new(pool.clone(), config.classes.clone(), wake.clone()),
        reconciler: PaymentReconciler::new(
            pool.clone(),
            SignatureVerifier::new(config.stripe_webhook_secret.clone(), config.webhook_tolerance_secs),
            wake.clone(),
        ),
        stripe: StripeClient::new(http, config.stripe_secret_key.clone()),
        config: config.clone(),
    };
    if config.stripe_webhook_secret.is_empty() {
        warn!("STRIPE_WEBHOOK_SECRET is not set; every webhook will be rejected");
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let worker = IssuanceWorker::new(
        pool,
        issuer,
        wake,
        Duration::from_secs(config.worker_poll_secs),
        config.worker_max_attempts,
    );
    let worker_task = tokio::spawn(worker.run(shutdown_rx));

    let app = router(state, &config.public_dir);
    let addr = format!("0.0.0.0:{}", config.port);
    info!("Listening on http://{addr}");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Failed to listen for shutdown signal: {e}");
            }
            info!("Shutdown requested");
        })
        .await?;

    let _ = shutdown_tx.send(true);
    worker_task.await?;
    Ok(())
}
