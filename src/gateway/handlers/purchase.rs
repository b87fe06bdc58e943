//! Purchase handlers (create, status, confirm, history)

use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, Query, State},
};

use super::super::identity::{AuthenticatedOwner, InternalCaller};
use super::super::state::AppState;
use super::super::types::{
    ApiError, ApiResult, ConfirmRequest, ConfirmResponse, CreatePurchaseRequest,
    CreatePurchaseResponse, HistoryQuery, InternalConfirmRequest, PurchaseView, StatusQuery, ok,
};
use crate::purchase::{SettleOutcome, TransactionId};

fn parse_transaction_id(raw: &str) -> Result<TransactionId, ApiError> {
    raw.trim()
        .parse()
        .map_err(|_| ApiError::bad_request("Invalid transaction id format"))
}

fn confirm_response(outcome: SettleOutcome) -> ConfirmResponse {
    ConfirmResponse {
        already_finalized: outcome.is_already_finalized(),
        transaction: PurchaseView::from(outcome.transaction()),
    }
}

/// Create purchase endpoint
///
/// POST /api/v1/purchases
///
/// Validates the quoted price against the catalog, persists a `pending`
/// transaction and returns rail payment instructions. Balance purchases
/// settle before the response.
#[utoipa::path(
    post,
    path = "/api/v1/purchases",
    request_body = CreatePurchaseRequest,
    responses(
        (status = 200, description = "Purchase created", body = CreatePurchaseResponse),
        (status = 400, description = "Validation failed (price mismatch, unknown product, ...)"),
        (status = 401, description = "Missing owner identity"),
        (status = 409, description = "Another purchase of the same item is in progress"),
        (status = 422, description = "Insufficient credits, item already owned, or provider rejected"),
        (status = 503, description = "Payment provider unavailable")
    ),
    security(("owner_header" = [])),
    tag = "Purchases"
)]
pub async fn create_purchase(
    State(state): State<Arc<AppState>>,
    AuthenticatedOwner(owner): AuthenticatedOwner,
    Json(req): Json<CreatePurchaseRequest>,
) -> ApiResult<CreatePurchaseResponse> {
    let request = req.into_domain(owner)?;
    let receipt = state.purchases.initiate_purchase(request).await?;
    ok(CreatePurchaseResponse::from(receipt))
}

/// Purchase status endpoint
///
/// GET /api/v1/purchases/status?id=
///
/// Read-only apart from lazy expiry and a pending grant retry.
#[utoipa::path(
    get,
    path = "/api/v1/purchases/status",
    params(StatusQuery),
    responses(
        (status = 200, description = "Current transaction state", body = PurchaseView),
        (status = 400, description = "Invalid transaction id"),
        (status = 403, description = "Transaction belongs to another owner"),
        (status = 404, description = "Transaction not found")
    ),
    security(("owner_header" = [])),
    tag = "Purchases"
)]
pub async fn get_purchase_status(
    State(state): State<Arc<AppState>>,
    AuthenticatedOwner(owner): AuthenticatedOwner,
    Query(query): Query<StatusQuery>,
) -> ApiResult<PurchaseView> {
    let id = parse_transaction_id(&query.id)?;
    let tx = state.coordinator.read(id, Some(&owner)).await?;
    ok(PurchaseView::from(&tx))
}

/// Confirm purchase endpoint (client polling)
///
/// POST /api/v1/purchases/{id}/confirm
///
/// Asks the rail once and settles. Safe to repeat: a transaction that is
/// already final is returned with `already_finalized: true`.
#[utoipa::path(
    post,
    path = "/api/v1/purchases/{id}/confirm",
    params(
        ("id" = String, Path, description = "Transaction id (ULID)")
    ),
    request_body(content = ConfirmRequest, description = "Optional crypto tx hash"),
    responses(
        (status = 200, description = "Settlement result", body = ConfirmResponse),
        (status = 400, description = "Invalid id or tx hash"),
        (status = 403, description = "Transaction belongs to another owner"),
        (status = 404, description = "Transaction not found"),
        (status = 422, description = "Tx hash already used by another purchase")
    ),
    security(("owner_header" = [])),
    tag = "Purchases"
)]
pub async fn confirm_purchase(
    State(state): State<Arc<AppState>>,
    AuthenticatedOwner(owner): AuthenticatedOwner,
    Path(id): Path<String>,
    body: Option<Json<ConfirmRequest>>,
) -> ApiResult<ConfirmResponse> {
    let id = parse_transaction_id(&id)?;
    let tx_hash = body.and_then(|Json(req)| req.tx_hash);
    let outcome = state
        .coordinator
        .confirm(id, Some(&owner), tx_hash.as_deref())
        .await?;
    ok(confirm_response(outcome))
}

/// Internal confirm endpoint (provider webhook glue)
///
/// POST /internal/purchases/confirm
#[utoipa::path(
    post,
    path = "/internal/purchases/confirm",
    request_body = InternalConfirmRequest,
    responses(
        (status = 200, description = "Settlement result", body = ConfirmResponse),
        (status = 401, description = "Bad internal secret"),
        (status = 404, description = "Transaction not found")
    ),
    security(("internal_secret" = [])),
    tag = "Internal"
)]
pub async fn internal_confirm(
    State(state): State<Arc<AppState>>,
    _caller: InternalCaller,
    Json(req): Json<InternalConfirmRequest>,
) -> ApiResult<ConfirmResponse> {
    let id = parse_transaction_id(&req.transaction_id)?;
    tracing::debug!(transaction_id = %id, "Internal confirm received");
    let outcome = state
        .coordinator
        .confirm(id, None, req.tx_hash.as_deref())
        .await?;
    ok(confirm_response(outcome))
}

/// Purchase history endpoint
///
/// GET /api/v1/purchases
#[utoipa::path(
    get,
    path = "/api/v1/purchases",
    params(HistoryQuery),
    responses(
        (status = 200, description = "Owner's transactions, newest first", body = [PurchaseView]),
        (status = 401, description = "Missing owner identity")
    ),
    security(("owner_header" = [])),
    tag = "Purchases"
)]
pub async fn list_purchases(
    State(state): State<Arc<AppState>>,
    AuthenticatedOwner(owner): AuthenticatedOwner,
    Query(query): Query<HistoryQuery>,
) -> ApiResult<Vec<PurchaseView>> {
    let txs = state.purchases.history(&owner, query.limit()).await?;
    ok(txs.iter().map(PurchaseView::from).collect())
}
