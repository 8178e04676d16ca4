//! Server setup for the calendar sync API.

use std::sync::Arc;

use axum::{
    Router,
    extract::Request,
    http::{HeaderValue, Method, header},
    middleware::{self, Next},
    response::Response,
    routing::{delete, get},
};
use sea_orm::DatabaseConnection;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::Level;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::aggregator::CalendarAggregator;
use crate::auth::auth_middleware;
use crate::config::AppConfig;
use crate::handlers;
use crate::lifecycle::TokenLifecycleManager;
use crate::store::TokenStore;
use crate::telemetry::{TraceContext, with_trace_context};

/// Application state containing shared resources.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub db: DatabaseConnection,
    pub store: Arc<dyn TokenStore>,
    pub lifecycle: TokenLifecycleManager,
    pub aggregator: CalendarAggregator,
}

/// Attach a trace context to the request, honoring a caller-supplied
/// `x-request-id` so cross-service correlation survives the hop.
async fn request_context_middleware(mut request: Request, next: Next) -> Response {
    let trace_id = request
        .headers()
        .get("x-request-id")
        .and_then(|value| value.to_str().ok())
        .filter(|value| !value.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| format!("req-{}", &uuid::Uuid::new_v4().to_string()[..8]));

    let context = TraceContext {
        trace_id: trace_id.clone(),
    };
    request.extensions_mut().insert(context.clone());

    let mut response = with_trace_context(context, next.run(request)).await;
    if let Ok(header_value) = HeaderValue::from_str(&trace_id) {
        response.headers_mut().insert("x-request-id", header_value);
    }
    response
}

/// Creates and configures the Axum application router.
pub fn create_app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::DELETE, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION]);

    let public_routes = Router::new()
        .route("/", get(handlers::root))
        .route("/health", get(handlers::health));

    let protected_routes = Router::new()
        .route(
            "/users/{user_id}/calendar/events",
            get(handlers::events::get_user_events),
        )
        .route(
            "/users/{user_id}/integrations",
            get(handlers::integrations::list_integrations),
        )
        .route(
            "/users/{user_id}/integrations/{provider}",
            delete(handlers::integrations::delete_integration),
        )
        .route_layer(middleware::from_fn_with_state(
            Arc::clone(&state.config),
            auth_middleware,
        ));

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .layer(middleware::from_fn(request_context_middleware))
        .layer(cors)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .with_state(state)
        .merge(SwaggerUi::new("/docs").url("/openapi.json", ApiDoc::openapi()))
}

/// Runs the HTTP server until the shutdown token fires.
pub async fn run_server(
    config: Arc<AppConfig>,
    state: AppState,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    let app = create_app(state);

    let addr = config.bind_addr()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, profile = %config.profile, "server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;

    tracing::info!("server stopped");
    Ok(())
}

/// OpenAPI documentation.
#[derive(OpenApi)]
#[openapi(
    paths(
        crate::handlers::root,
        crate::handlers::health,
        crate::handlers::events::get_user_events,
        crate::handlers::integrations::list_integrations,
        crate::handlers::integrations::delete_integration,
    ),
    components(
        schemas(
            crate::models::ServiceInfo,
            crate::models::CalendarEvent,
            crate::models::EventCategory,
            crate::models::EventPriority,
            crate::models::Provider,
            crate::aggregator::AggregateResult,
            crate::aggregator::ProviderFailure,
            crate::aggregator::FailureKind,
            crate::handlers::HealthResponse,
            crate::handlers::integrations::IntegrationInfo,
            crate::handlers::integrations::IntegrationStatus,
            crate::handlers::integrations::IntegrationsResponse,
            crate::error::ApiError,
        )
    ),
    info(
        title = "Calsync API",
        description = "OAuth token lifecycle and multi-provider calendar aggregation",
        version = env!("CARGO_PKG_VERSION"),
    )
)]
pub struct ApiDoc;
