use std::sync::Arc;

use trellis_catalog::CatalogStore;
use trellis_core::media::SerializationRegistry;
use trellis_core::validation::ValidationRegistry;
use trellis_query::QueryRegistry;
use trellis_security::{AuthnStore, OpenAccessPolicy, TagBasedPolicy, TagTable, TokenConfig, ToyPasswordProvider};
use trellis_server::{build_app, init_tracing, AppState, ServerState, Settings};
use trellis_stream::DatastoreRegistry;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let settings = match std::env::args().nth(1) {
        Some(path) => {
            let text = std::fs::read_to_string(&path)?;
            Settings::from_yaml(&text)?
        }
        None => Settings::default(),
    };

    let catalog = CatalogStore::connect(
        &settings.catalog_uri,
        settings.pool_size,
        &settings.data_dir,
    )
    .await?;
    catalog.migrate().await?;
    let authn = AuthnStore::connect(&settings.authn_uri, settings.pool_size).await?;
    authn.migrate().await?;

    let mut datastores = DatastoreRegistry::default();
    trellis_stream_redis::register(&mut datastores);
    let stream = datastores.build(&settings.streaming)?;

    // The tag table, when configured, enables tag-based access control;
    // otherwise the deployment is open (single-user).
    let policy: Arc<dyn trellis_security::AccessPolicy> =
        match std::env::var("TRELLIS_TAGS_FILE").ok() {
            Some(path) => {
                let text = std::fs::read_to_string(&path)?;
                let table = TagTable::from_json(&serde_json::from_str(&text)?)?;
                Arc::new(TagBasedPolicy::new("toy", table))
            }
            None => Arc::new(OpenAccessPolicy),
        };

    let mut validation = ValidationRegistry::new();
    if settings.reject_undeclared_specs {
        validation = validation.with_reject_undeclared_specs();
    }

    let secret_keys = if settings.secret_keys.is_empty() {
        // An ephemeral secret: tokens do not survive restarts.
        vec![trellis_security::generate_secret()]
    } else {
        settings.secret_keys.clone()
    };

    let toy_provider: Arc<dyn trellis_security::AuthProvider> =
        Arc::new(ToyPasswordProvider::new("toy").with_user("admin", "admin")?);

    let state = AppState(Arc::new(ServerState {
        catalog,
        authn,
        policy,
        stream,
        serialization: SerializationRegistry::default(),
        queries: QueryRegistry::default(),
        validation,
        tokens: TokenConfig::new(secret_keys),
        providers: vec![toy_provider],
        settings: settings.clone(),
    }));

    let app = build_app(state);
    let listener = tokio::net::TcpListener::bind(&settings.bind).await?;
    tracing::info!(bind = %settings.bind, "serving");
    axum::serve(listener, app).await?;
    Ok(())
}
