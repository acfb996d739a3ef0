use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use chrono::{DateTime, Datelike, Utc};
use serde::{Deserialize, Serialize};
use shared::{
    valid_card_number, Card, Currency, Expiry, Money, Payment, PaymentAction, PaymentMethod,
    PaymentStatus,
};
use std::sync::Arc;
use uuid::Uuid;

use crate::error::{Error, ErrorKind};
use crate::processor::PaymentOperations;

#[derive(Clone)]
pub struct AppState {
    pub payments: Arc<dyn PaymentOperations>,
}

#[derive(Debug, Deserialize)]
pub struct AmountRequest {
    pub minor_units: u64,
    pub currency: String,
}

#[derive(Debug, Deserialize)]
pub struct ExpiryRequest {
    pub month: u32,
    pub year: i32,
}

#[derive(Debug, Deserialize)]
pub struct CardRequest {
    pub card_number: String,
    pub cvv: String,
    pub expiry: Option<ExpiryRequest>,
}

#[derive(Debug, Deserialize)]
pub struct AuthorizeRequest {
    pub amount: Option<AmountRequest>,
    pub card: Option<CardRequest>,
}

#[derive(Debug, Deserialize)]
pub struct PaymentAmountRequest {
    pub payment_id: Uuid,
    pub amount: u64,
}

#[derive(Debug, Deserialize)]
pub struct VoidRequest {
    pub payment_id: Uuid,
}

#[derive(Debug, Deserialize)]
pub struct OutcomeRequest {
    pub action_id: Uuid,
    pub response_code: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PaymentResponse {
    pub id: Uuid,
    pub amount: Money,
    pub status: PaymentStatus,
    pub card_number: String,
    pub expiry: Expiry,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actions: Option<Vec<PaymentAction>>,
}

impl From<Payment> for PaymentResponse {
    fn from(payment: Payment) -> Self {
        let PaymentMethod::Card(card) = payment.payment_method;
        Self {
            id: payment.id,
            amount: payment.amount,
            status: payment.status,
            card_number: card.masked(),
            expiry: card.expiry,
            created_at: payment.created_at,
            updated_at: payment.updated_at,
            actions: None,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

type ApiError = (StatusCode, Json<ErrorResponse>);
type ApiResult<T> = Result<Json<T>, ApiError>;

fn reject(message: impl Into<String>) -> ApiError {
    (
        StatusCode::UNPROCESSABLE_ENTITY,
        Json(ErrorResponse {
            error: message.into(),
        }),
    )
}

fn error_response(err: Error) -> ApiError {
    let status = match err.kind() {
        ErrorKind::Validation => StatusCode::UNPROCESSABLE_ENTITY,
        ErrorKind::NotPermitted => StatusCode::FORBIDDEN,
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::Dependency => StatusCode::BAD_GATEWAY,
        ErrorKind::OutcomeUpdateFailed => StatusCode::INTERNAL_SERVER_ERROR,
    };
    if status.is_server_error() {
        tracing::error!("Request failed: {}", err);
    } else {
        tracing::info!("Request rejected: {}", err);
    }
    (
        status,
        Json(ErrorResponse {
            error: err.to_string(),
        }),
    )
}

impl AuthorizeRequest {
    /// Checks the request shape and builds the domain values.
    fn validate(self, today_year: i32) -> Result<(Money, PaymentMethod), ApiError> {
        let amount = self.amount.ok_or_else(|| reject("amount is required"))?;
        if amount.minor_units == 0 {
            return Err(reject("amount must be greater than zero"));
        }
        let currency: Currency = amount
            .currency
            .parse()
            .map_err(|_| reject("currency must be a three-letter code"))?;

        let card = self.card.ok_or_else(|| reject("card is required"))?;
        if !valid_card_number(&card.card_number) {
            return Err(reject("card number is invalid"));
        }
        if card.cvv.len() != 3 || !card.cvv.chars().all(|c| c.is_ascii_digit()) {
            return Err(reject("cvv must be three digits"));
        }
        let expiry = card.expiry.ok_or_else(|| reject("card expiry is required"))?;
        if !(1..=12).contains(&expiry.month) {
            return Err(reject("expiry month must be between 1 and 12"));
        }
        if expiry.year < today_year {
            return Err(reject("card has expired"));
        }

        let payment_method = PaymentMethod::Card(Card {
            number: card.card_number.chars().filter(|c| !c.is_whitespace()).collect(),
            expiry: Expiry {
                month: expiry.month,
                year: expiry.year,
            },
        });
        Ok((Money::new(amount.minor_units, currency), payment_method))
    }
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/authorize", post(authorize))
        .route("/capture", post(capture))
        .route("/refund", post(refund))
        .route("/void", post(void))
        .route("/payments/:id", get(get_payment))
        .route("/reconciliation/pending", get(pending_actions))
        .route("/reconciliation/outcome", post(record_outcome))
        .route("/health", get(health_check))
        .with_state(state)
        .layer(
            tower_http::cors::CorsLayer::new()
                .allow_origin(tower_http::cors::Any)
                .allow_methods(tower_http::cors::Any)
                .allow_headers(tower_http::cors::Any),
        )
}

pub async fn authorize(
    State(state): State<AppState>,
    Json(request): Json<AuthorizeRequest>,
) -> ApiResult<PaymentResponse> {
    let (amount, payment_method) = request.validate(Utc::now().year())?;
    let payment = state
        .payments
        .authorize(amount, payment_method)
        .await
        .map_err(error_response)?;
    Ok(Json(payment.into()))
}

pub async fn capture(
    State(state): State<AppState>,
    Json(request): Json<PaymentAmountRequest>,
) -> ApiResult<PaymentResponse> {
    let payment = state
        .payments
        .capture(request.payment_id, request.amount)
        .await
        .map_err(error_response)?;
    Ok(Json(payment.into()))
}

pub async fn refund(
    State(state): State<AppState>,
    Json(request): Json<PaymentAmountRequest>,
) -> ApiResult<PaymentResponse> {
    let payment = state
        .payments
        .refund(request.payment_id, request.amount)
        .await
        .map_err(error_response)?;
    Ok(Json(payment.into()))
}

pub async fn void(
    State(state): State<AppState>,
    Json(request): Json<VoidRequest>,
) -> ApiResult<PaymentResponse> {
    let payment = state
        .payments
        .void(request.payment_id)
        .await
        .map_err(error_response)?;
    Ok(Json(payment.into()))
}

pub async fn get_payment(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<PaymentResponse> {
    let (payment, actions) = state
        .payments
        .payment_with_actions(id)
        .await
        .map_err(error_response)?;
    let mut response = PaymentResponse::from(payment);
    response.actions = Some(actions);
    Ok(Json(response))
}

pub async fn pending_actions(State(state): State<AppState>) -> ApiResult<Vec<PaymentAction>> {
    let actions = state
        .payments
        .list_incomplete_actions()
        .await
        .map_err(error_response)?;
    Ok(Json(actions))
}

pub async fn record_outcome(
    State(state): State<AppState>,
    Json(request): Json<OutcomeRequest>,
) -> ApiResult<PaymentResponse> {
    let payment = state
        .payments
        .record_outcome(request.action_id, request.response_code)
        .await
        .map_err(error_response)?;
    Ok(Json(payment.into()))
}

pub async fn health_check() -> &'static str {
    "OK"
}
