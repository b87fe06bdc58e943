//! OpenAPI / Swagger UI Documentation
//!
//! - Swagger UI: `http://localhost:8080/docs`
//! - OpenAPI JSON: `http://localhost:8080/api-docs/openapi.json`

use utoipa::openapi::security::{ApiKey, ApiKeyValue, SecurityScheme};
use utoipa::{Modify, OpenApi};

use crate::gateway::handlers::HealthResponse;
use crate::gateway::types::{
    BalanceResponse, ConfirmRequest, ConfirmResponse, CreatePurchaseRequest,
    CreatePurchaseResponse, InternalConfirmRequest, InventoryItemView, PurchaseView,
};

/// Header-based security schemes
struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "owner_header",
                SecurityScheme::ApiKey(ApiKey::Header(ApiKeyValue::with_description(
                    "X-Owner-Id",
                    "Account id injected by the upstream session layer",
                ))),
            );
            components.add_security_scheme(
                "internal_secret",
                SecurityScheme::ApiKey(ApiKey::Header(ApiKeyValue::with_description(
                    "X-Internal-Secret",
                    "Shared secret for provider webhook glue",
                ))),
            );
        }
    }
}

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Credit Ledger API",
        version = "1.0.0",
        description = "Purchase confirmation and credit-ledger reconciliation over QRIS, Base-chain and credit balance rails."
    ),
    servers(
        (url = "http://localhost:8080", description = "Development"),
    ),
    paths(
        crate::gateway::handlers::health::health_check,
        crate::gateway::handlers::purchase::create_purchase,
        crate::gateway::handlers::purchase::list_purchases,
        crate::gateway::handlers::purchase::get_purchase_status,
        crate::gateway::handlers::purchase::confirm_purchase,
        crate::gateway::handlers::purchase::internal_confirm,
        crate::gateway::handlers::account::get_balance,
        crate::gateway::handlers::account::get_inventory,
    ),
    components(
        schemas(
            HealthResponse,
            CreatePurchaseRequest,
            CreatePurchaseResponse,
            PurchaseView,
            ConfirmRequest,
            ConfirmResponse,
            InternalConfirmRequest,
            BalanceResponse,
            InventoryItemView,
        )
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "Purchases", description = "Create, poll and confirm purchases (X-Owner-Id required)"),
        (name = "Account", description = "Credit balance and inventory (X-Owner-Id required)"),
        (name = "Internal", description = "Webhook glue (X-Internal-Secret required)"),
        (name = "System", description = "Health checks")
    )
)]
pub struct ApiDoc;
