//! HTTP surface wiring the outside world to the pipeline.
//!
//! Two routes only: the processor's payment webhook and a withdrawal
//! endpoint for the transport layer. Rendering outcome text is not done
//! here; callers get the structured result back.

use crate::config::ServerConfig;
use crate::errors::{DicepayError, DicepayResult, TransportError};
use crate::gateway::PaymentEvent;
use crate::ledger::UserId;
use crate::reconcile::{ReconciliationEngine, ReconciliationOutcome};
use crate::withdraw::{WithdrawalDestination, WithdrawalService};
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use log::{error, info};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<ReconciliationEngine>,
    pub withdrawals: Arc<WithdrawalService>,
}

#[derive(Debug, Deserialize)]
pub struct WithdrawalRequest {
    pub user_id: UserId,
    pub amount: Decimal,
    pub destination: WithdrawalDestination,
}

/// Acknowledgement returned to the webhook caller
#[derive(Debug, Serialize)]
pub struct WebhookAck {
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub missing: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl From<&ReconciliationOutcome> for WebhookAck {
    fn from(outcome: &ReconciliationOutcome) -> Self {
        match outcome {
            ReconciliationOutcome::Ignored { .. } => WebhookAck {
                status: "ignored",
                missing: None,
                detail: None,
            },
            ReconciliationOutcome::Rejected { missing } => WebhookAck {
                status: "rejected",
                missing: Some(missing.iter().map(|f| f.to_string()).collect()),
                detail: None,
            },
            ReconciliationOutcome::Settled(_) => WebhookAck {
                status: "settled",
                missing: None,
                detail: None,
            },
            ReconciliationOutcome::CreditedOnly { detail, .. } => WebhookAck {
                status: "credited_only",
                missing: None,
                detail: Some(detail.clone()),
            },
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/webhooks/payment", post(payment_webhook))
        .route("/withdrawals", post(create_withdrawal))
        .with_state(state)
}

pub async fn serve(config: &ServerConfig, state: AppState) -> DicepayResult<()> {
    let addr = format!("{}:{}", config.listen_address, config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| TransportError::Request(format!("failed to bind {}: {}", addr, e)))?;

    info!("listening on {}", addr);
    axum::serve(listener, router(state))
        .await
        .map_err(|e| TransportError::Request(e.to_string()))?;
    Ok(())
}

async fn health() -> &'static str {
    "ok"
}

async fn payment_webhook(
    State(state): State<AppState>,
    Json(event): Json<PaymentEvent>,
) -> (StatusCode, Json<serde_json::Value>) {
    match state.engine.handle_payment_event(&event).await {
        Ok(outcome) => {
            let ack = WebhookAck::from(&outcome);
            (StatusCode::OK, Json(json!(ack)))
        }
        Err(err) => {
            error!("payment event handling failed: {}", err);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "status": "error", "detail": err.to_string() })),
            )
        }
    }
}

async fn create_withdrawal(
    State(state): State<AppState>,
    Json(request): Json<WithdrawalRequest>,
) -> (StatusCode, Json<serde_json::Value>) {
    match state
        .withdrawals
        .withdraw(request.user_id, request.amount, request.destination)
        .await
    {
        Ok(receipt) => (StatusCode::OK, Json(json!(receipt))),
        Err(DicepayError::Validation(err)) => (
            StatusCode::BAD_REQUEST,
            Json(json!({ "status": "rejected", "detail": err.to_string() })),
        ),
        Err(err) => {
            error!("withdrawal failed: {}", err);
            (
                StatusCode::BAD_GATEWAY,
                Json(json!({ "status": "error", "detail": err.to_string() })),
            )
        }
    }
}
