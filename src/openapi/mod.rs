use utoipa::openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme};
use utoipa::{Modify, OpenApi};
use utoipa_swagger_ui::SwaggerUi;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "EZFix API",
        version = "0.3.0",
        description = r#"
# EZFix Storefront API

Order intake and fulfilment backend for the EZFix repair and 3D-print shop.

## Features

- **Checkout**: Guest and signed-in order creation with server-side pricing
- **Tracking**: Public order lookup by order number and e-mail
- **Order Management**: Staff listing, status transitions, and deletion
- **Notifications**: Customer and owner e-mails queued through a durable outbox
- **Presence**: Live visitor count for the storefront

## Authentication

Protected endpoints take a JWT in the Authorization header:

```
Authorization: Bearer <your-jwt-token>
```

Checkout and tracking are open so guests can order and follow up without an
account.

## Error Handling

Errors share one envelope with appropriate HTTP status codes:

```json
{
  "success": false,
  "error": "Order not found"
}
```
        "#,
        contact(
            name = "EZFix",
            email = "info@ezfix.cz"
        )
    ),
    servers(
        (url = "https://api.ezfix.cz", description = "Production server"),
        (url = "http://localhost:8080", description = "Local development")
    ),
    tags(
        (name = "Orders", description = "Checkout, tracking, and order management"),
        (name = "Presence", description = "Storefront visitor presence"),
        (name = "Health", description = "Health check endpoints")
    ),
    paths(
        // Orders
        crate::handlers::orders::list_orders,
        crate::handlers::orders::create_order,
        crate::handlers::orders::track_order,
        crate::handlers::orders::get_order,
        crate::handlers::orders::update_order_status,
        crate::handlers::orders::delete_order,

        // Presence
        crate::presence::online_visitors,

        // Health intentionally omitted from OpenAPI paths for now
    ),
    components(
        schemas(
            // Order types
            crate::handlers::orders::OrderDetail,
            crate::handlers::orders::OrderItemDetail,
            crate::handlers::orders::TrackOrderRequest,
            crate::handlers::orders::UpdateStatusRequest,
            crate::handlers::orders::OrderListBody,
            crate::handlers::orders::OrderBody,
            crate::handlers::orders::CreatedBody,
            crate::handlers::orders::StatusChangedBody,
            crate::handlers::orders::OrderStatusView,
            crate::handlers::orders::MessageBody,
            crate::services::orders::CreateOrderInput,
            crate::services::orders::CartItemInput,
            crate::services::orders::CreatedOrder,
            crate::services::orders::OrderStatus,
            crate::repositories::order_repository::OrderSummary,
            crate::repositories::order_repository::StatusCounts,
            crate::pricing::ServiceType,

            // Presence types
            crate::presence::PresenceBody,

            // Error types
            crate::errors::ErrorBody
        )
    ),
    modifiers(&SecurityAddon)
)]
pub struct ApiDoc;

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "Bearer",
            SecurityScheme::Http(
                HttpBuilder::new()
                    .scheme(HttpAuthScheme::Bearer)
                    .bearer_format("JWT")
                    .build(),
            ),
        );
    }
}

pub fn swagger_ui() -> SwaggerUi {
    SwaggerUi::new("/swagger-ui")
        .url("/api-docs/openapi.json", ApiDoc::openapi())
        .config(utoipa_swagger_ui::Config::from("/api-docs/openapi.json").try_it_out_enabled(true))
}
