//! Account handlers (balance, inventory)

use std::sync::Arc;

use axum::extract::State;

use super::super::identity::AuthenticatedOwner;
use super::super::state::AppState;
use super::super::types::{ApiResult, BalanceResponse, InventoryItemView, ok};

/// Credit balance endpoint
///
/// GET /api/v1/account/balance
#[utoipa::path(
    get,
    path = "/api/v1/account/balance",
    responses(
        (status = 200, description = "Cached and ledger-derived balance", body = BalanceResponse),
        (status = 401, description = "Missing owner identity")
    ),
    security(("owner_header" = [])),
    tag = "Account"
)]
pub async fn get_balance(
    State(state): State<Arc<AppState>>,
    AuthenticatedOwner(owner): AuthenticatedOwner,
) -> ApiResult<BalanceResponse> {
    let view = state.purchases.balance(&owner).await?;
    ok(BalanceResponse::from(view))
}

/// Inventory endpoint
///
/// GET /api/v1/inventory
#[utoipa::path(
    get,
    path = "/api/v1/inventory",
    responses(
        (status = 200, description = "Owned items", body = [InventoryItemView]),
        (status = 401, description = "Missing owner identity")
    ),
    security(("owner_header" = [])),
    tag = "Account"
)]
pub async fn get_inventory(
    State(state): State<Arc<AppState>>,
    AuthenticatedOwner(owner): AuthenticatedOwner,
) -> ApiResult<Vec<InventoryItemView>> {
    let items = state.purchases.inventory(&owner).await?;
    ok(items.iter().map(InventoryItemView::from).collect())
}
