//! The Trellis HTTP/WebSocket server: routing, authentication
//! extractors, and endpoint handlers over the catalog, security, and
//! streaming services.

pub mod auth;
pub mod extract;
pub mod resolve;
pub mod routers;
pub mod settings;

pub use settings::Settings;

use std::collections::HashSet;
use std::sync::Arc;

use axum::routing::{delete, get};
use axum::Router;
use tower_http::compression::CompressionLayer;
use tower_http::trace::TraceLayer;
use trellis_catalog::CatalogStore;
use trellis_core::media::SerializationRegistry;
use trellis_core::validation::ValidationRegistry;
use trellis_query::QueryRegistry;
use trellis_security::{AccessPolicy, AuthProvider, AuthnStore, TokenConfig};
use trellis_stream::StreamingDatastore;

/// Process-wide state: stores, registries, and policy. All registries
/// are populated before the router is built and read-only afterwards.
pub struct ServerState {
    pub catalog: CatalogStore,
    pub authn: AuthnStore,
    pub policy: Arc<dyn AccessPolicy>,
    pub stream: Arc<dyn StreamingDatastore>,
    pub serialization: SerializationRegistry,
    pub queries: QueryRegistry,
    pub validation: ValidationRegistry,
    pub tokens: TokenConfig,
    pub providers: Vec<Arc<dyn AuthProvider>>,
    pub settings: Settings,
}

#[derive(Clone)]
pub struct AppState(pub Arc<ServerState>);

impl std::ops::Deref for AppState {
    type Target = ServerState;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl AppState {
    /// The scopes an unauthenticated request holds: public read scopes
    /// when anonymous access is on, nothing otherwise.
    pub fn anonymous_scopes(&self) -> HashSet<String> {
        if self.settings.allow_anonymous_access {
            trellis_security::scopes::public_scopes()
        } else {
            HashSet::new()
        }
    }
}

/// Register a handler under both `/prefix/` (the root) and
/// `/prefix/{*path}`.
fn at_path(
    router: Router<AppState>,
    prefix: &str,
    method_router: axum::routing::MethodRouter<AppState>,
) -> Router<AppState> {
    router
        .route(&format!("{prefix}/"), method_router.clone())
        .route(&format!("{prefix}/{{*path}}"), method_router)
}

/// Assemble the full application router.
pub fn build_app(state: AppState) -> Router {
    let mut router = Router::new();

    router = at_path(
        router,
        "/metadata",
        get(routers::metadata::get_metadata)
            .post(routers::metadata::create_node)
            .patch(routers::metadata::patch_metadata)
            .put(routers::metadata::replace_metadata)
            .delete(routers::metadata::delete_node),
    );
    router = at_path(router, "/register", axum::routing::post(routers::metadata::register_node));
    router = at_path(router, "/search", get(routers::search::search));
    router = at_path(router, "/distinct", get(routers::search::distinct));
    router = at_path(
        router,
        "/container/full",
        get(routers::data::container_full).post(routers::data::container_full_post),
    );
    router = at_path(
        router,
        "/array/full",
        get(routers::data::array_full).put(routers::data::array_full_put),
    );
    router = at_path(
        router,
        "/array/block",
        get(routers::data::array_block).put(routers::data::array_block_put),
    );
    router = at_path(
        router,
        "/table/full",
        get(routers::data::table_full)
            .post(routers::data::table_full_put)
            .put(routers::data::table_full_put),
    );
    router = at_path(
        router,
        "/table/partition",
        get(routers::data::table_partition)
            .post(routers::data::table_partition_put)
            .put(routers::data::table_partition_put)
            .patch(routers::data::table_partition_append),
    );
    router = at_path(
        router,
        "/awkward/full",
        get(routers::data::awkward_full)
            .post(routers::data::awkward_put)
            .put(routers::data::awkward_put),
    );
    router = at_path(router, "/awkward/buffers", get(routers::data::awkward_buffers));
    router = at_path(router, "/sparse/full", get(routers::data::sparse_full));
    router = at_path(
        router,
        "/sparse/block",
        get(routers::data::sparse_block).put(routers::data::sparse_block_put),
    );
    // Deprecated combined alias; GET only.
    router = at_path(router, "/node/full", get(routers::data::node_full));
    router = at_path(
        router,
        "/revisions",
        get(routers::revisions::list_revisions).delete(routers::revisions::delete_revision),
    );
    router = at_path(router, "/asset/bytes", get(routers::assets::asset_bytes));
    router = at_path(router, "/asset/manifest", get(routers::assets::asset_manifest));
    router = at_path(router, "/stream/single", get(routers::stream::subscribe));
    router = at_path(
        router,
        "/stream/close",
        delete(routers::stream::close_stream),
    );

    router = router
        .nest("/auth", auth::router())
        .route("/metrics", get(routers::observe::metrics))
        .route("/healthz", get(routers::observe::healthz));

    // Layer order: trace and compression wrap correlation, which wraps
    // timing, so the timer sees the request ID and error bodies are
    // stamped before compression.
    router
        .layer(axum::middleware::from_fn(routers::observe::timing))
        .layer(axum::middleware::from_fn(trellis_core::request_id::correlation))
        // zstd is preferred over gzip when the client offers both.
        .layer(CompressionLayer::new().gzip(true).zstd(true))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Initialize the global tracing subscriber (once).
pub fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};
    let _ = fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("info,tower_http=debug")
        }))
        .try_init();
}
