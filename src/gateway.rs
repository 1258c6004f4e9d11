//! HTTP client for the custodial payment processor.
//!
//! The processor speaks a CryptoPay-style JSON API: every call is a POST
//! with a bearer token header, every response is an `{ok, result, error}`
//! envelope. Amounts travel as decimal strings. Each call is attempted
//! exactly once; failure handling is the caller's job (the withdrawal flow
//! compensates, everything else just reports).

use crate::config::GatewayConfig;
use crate::errors::{ConfigurationError, DicepayResult, ExternalApiError, TransportError};
use crate::ledger::UserId;
use log::{debug, warn};
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const DEFAULT_API_URL: &str = "https://pay.crypt.bot/api";

/// Update type that triggers reconciliation; everything else is a no-op
pub const UPDATE_INVOICE_PAID: &str = "invoice_paid";

const API_TOKEN_HEADER: &str = "Crypto-Pay-API-Token";

/// Inbound webhook/poll payload from the processor
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentEvent {
    pub update_type: String,
    #[serde(default)]
    pub payload: Option<InvoicePayload>,
}

/// Paid-invoice details carried by a `invoice_paid` update
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvoicePayload {
    #[serde(default)]
    pub hidden_message: String,
    #[serde(default)]
    pub comment: String,
    pub amount: Decimal,
    #[serde(default)]
    pub asset: String,
    #[serde(default)]
    pub invoice_id: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct CreateInvoiceRequest {
    pub asset: String,
    pub amount: Decimal,
    pub description: String,
    pub hidden_message: String,
    pub allow_anonymous: bool,
    pub allow_comments: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Invoice {
    pub invoice_id: i64,
    pub pay_url: String,
}

/// Outbound transfer. Exactly one of `user_id` / `wallet_address` is set:
/// internal transfers go to a processor account, external ones to a wallet.
#[derive(Debug, Clone, Serialize)]
pub struct CreateTransferRequest {
    pub asset: String,
    pub amount: Decimal,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wallet_address: Option<String>,
    /// Idempotency token; the processor drops duplicate spends
    #[serde(skip_serializing_if = "Option::is_none")]
    pub spend_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

impl CreateTransferRequest {
    pub fn to_processor_user(
        user_id: u64,
        asset: String,
        amount: Decimal,
        spend_id: String,
        comment: String,
    ) -> Self {
        Self {
            asset,
            amount,
            user_id: Some(user_id),
            wallet_address: None,
            spend_id: Some(spend_id),
            comment: Some(comment),
        }
    }

    pub fn to_wallet(address: String, asset: String, amount: Decimal, comment: String) -> Self {
        Self {
            asset,
            amount,
            user_id: None,
            wallet_address: Some(address),
            spend_id: None,
            comment: Some(comment),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Transfer {
    pub transfer_id: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InvoiceStatus {
    pub status: String,
    #[serde(default)]
    pub paid: Option<bool>,
    pub amount: Decimal,
    #[serde(default)]
    pub asset: String,
}

impl InvoiceStatus {
    pub fn is_paid(&self) -> bool {
        self.status == "paid" || self.paid.unwrap_or(false)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppInfo {
    pub app_id: i64,
    pub name: String,
    #[serde(default)]
    pub payment_processing_bot_username: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiEnvelope<T> {
    ok: bool,
    result: Option<T>,
    error: Option<ApiErrorBody>,
}

#[derive(Debug, Default, Deserialize)]
struct ApiErrorBody {
    code: Option<i64>,
    name: Option<String>,
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct InvoiceList {
    items: Vec<InvoiceStatus>,
}

#[derive(Serialize)]
struct GetInvoicesRequest<'a> {
    invoice_ids: [&'a str; 1],
}

#[derive(Serialize)]
struct Empty {}

/// Client for the processor's API. Construction fails without a token; no
/// request is ever attempted unauthenticated.
pub struct CryptoPayClient {
    http: reqwest::Client,
    base_url: String,
    token: String,
}

impl CryptoPayClient {
    pub fn new(config: &GatewayConfig) -> DicepayResult<Self> {
        let token = config
            .api_token
            .clone()
            .filter(|token| !token.is_empty())
            .ok_or_else(|| ConfigurationError::MissingCredential("gateway.api_token".into()))?;

        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .build()
            .map_err(TransportError::from)?;

        Ok(Self {
            http,
            base_url: config.api_url.trim_end_matches('/').to_string(),
            token,
        })
    }

    async fn call<B, T>(&self, method: &str, body: &B) -> DicepayResult<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let url = format!("{}/{}", self.base_url, method);
        debug!("calling payment processor: {}", method);

        let response = self
            .http
            .post(&url)
            .header(API_TOKEN_HEADER, &self.token)
            .json(body)
            .send()
            .await
            .map_err(TransportError::from)?;

        let envelope: ApiEnvelope<T> = response.json().await.map_err(TransportError::from)?;

        if !envelope.ok {
            let body = envelope.error.unwrap_or_default();
            let message = body
                .message
                .or(body.name)
                .unwrap_or_else(|| "unknown processor error".to_string());
            warn!("processor rejected {}: {} (code {:?})", method, message, body.code);
            return Err(ExternalApiError {
                code: body.code,
                message,
            }
            .into());
        }

        envelope.result.ok_or_else(|| {
            ExternalApiError {
                code: None,
                message: format!("{} returned ok with no result", method),
            }
            .into()
        })
    }

    /// Create an invoice and return the URL the payer follows
    pub async fn create_invoice(&self, request: &CreateInvoiceRequest) -> DicepayResult<Invoice> {
        self.call("createInvoice", request).await
    }

    /// Deposit invoice for a known user: the hidden message carries the
    /// user id back on payment confirmation.
    pub async fn create_deposit_invoice(
        &self,
        user_id: UserId,
        amount: Decimal,
        asset: &str,
    ) -> DicepayResult<Invoice> {
        let request = CreateInvoiceRequest {
            asset: asset.to_string(),
            amount,
            description: format!("Deposit for user {}", user_id),
            hidden_message: format!("user_id:{}", user_id),
            allow_anonymous: false,
            allow_comments: true,
        };
        self.create_invoice(&request).await
    }

    /// Submit an outbound transfer; attempted exactly once
    pub async fn create_transfer(&self, request: &CreateTransferRequest) -> DicepayResult<Transfer> {
        self.call("transfer", request).await
    }

    /// Poll the status of a previously created invoice
    pub async fn get_invoice_status(&self, invoice_id: &str) -> DicepayResult<InvoiceStatus> {
        let list: InvoiceList = self
            .call(
                "getInvoices",
                &GetInvoicesRequest {
                    invoice_ids: [invoice_id],
                },
            )
            .await?;

        list.items.into_iter().next().ok_or_else(|| {
            ExternalApiError {
                code: None,
                message: format!("invoice {} not found", invoice_id),
            }
            .into()
        })
    }

    /// Connectivity probe
    pub async fn get_app_info(&self) -> DicepayResult<AppInfo> {
        self.call("getMe", &Empty {}).await
    }
}
