use std::{net::SocketAddr, sync::Arc, time::Duration};

use axum::{
    Router,
    extract::FromRef,
    routing::{get, post},
};
use epicfhir_auth::{
    AuthState, CredentialStorage, MemoryCredentialStorage, MemorySessionStore, SigningKeys,
    TokenService,
};
use epicfhir_auth_postgres::PostgresCredentialStorage;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

use crate::{
    config::{AppConfig, StorageBackend},
    fhir::FhirClient,
    handlers,
};

/// How often expired interactive sessions are swept.
const SESSION_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Clone)]
pub struct AppState {
    pub auth: AuthState,
    pub fhir: Arc<FhirClient>,
}

impl FromRef<AppState> for AuthState {
    fn from_ref(state: &AppState) -> Self {
        state.auth.clone()
    }
}

pub fn build_router(state: AppState) -> Router {
    let auth_routes = epicfhir_auth::http::router(state.auth.clone());

    Router::new()
        .route("/Epic/users", post(handlers::register_user))
        .route("/Epic/Callback", get(handlers::callback))
        .route("/Epic/{user_id}/{client_id}/List", get(handlers::list_search))
        .route(
            "/Epic/{user_id}/{client_id}/List/{list_id}",
            get(handlers::list_read),
        )
        .route(
            "/Epic/{user_id}/{client_id}/MyLists",
            get(handlers::my_list_search),
        )
        .route(
            "/Epic/{user_id}/{client_id}/Patient/summary",
            get(handlers::patient_summary),
        )
        .route(
            "/Epic/{user_id}/{client_id}/Patient",
            post(handlers::patient_create),
        )
        .with_state(state)
        .merge(auth_routes)
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
}

async fn credential_storage(cfg: &AppConfig) -> anyhow::Result<Arc<dyn CredentialStorage>> {
    match cfg.storage.backend {
        StorageBackend::Memory => {
            tracing::warn!("Using in-memory credential storage; registrations are lost on restart");
            Ok(Arc::new(MemoryCredentialStorage::new()))
        }
        StorageBackend::Postgres => {
            let pg = cfg
                .storage
                .postgres
                .as_ref()
                .ok_or_else(|| anyhow::anyhow!("storage.postgres config is required"))?;
            let pool =
                epicfhir_auth_postgres::create_pool(&pg.url, pg.pool_size, pg.connect_timeout())
                    .await?;
            if pg.run_migrations {
                epicfhir_auth_postgres::migrations::run(&pool).await?;
            }
            Ok(Arc::new(PostgresCredentialStorage::new(Arc::new(pool))))
        }
    }
}

/// Builds the shared handler state from configuration.
pub async fn build_state(
    cfg: &AppConfig,
    sessions: Arc<MemorySessionStore>,
) -> anyhow::Result<AppState> {
    let keys = Arc::new(SigningKeys::load(&cfg.epic)?);
    let storage = credential_storage(cfg).await?;
    let service = Arc::new(TokenService::new(cfg.epic.clone(), keys, storage)?);
    let fhir = FhirClient::new(&cfg.epic.fhir_base, cfg.fhir.clone(), cfg.epic.http_timeout)?;

    tracing::info!(
        backend = ?cfg.storage.backend,
        kid = %cfg.epic.jwt_kid,
        allowed_root = %cfg.epic.allowed_root,
        "Server initialized"
    );

    Ok(AppState {
        auth: AuthState::new(service, sessions, cfg.server.trust_proxy_headers),
        fhir: Arc::new(fhir),
    })
}

pub struct EpicFhirServer {
    addr: SocketAddr,
    app: Router,
    sessions: Arc<MemorySessionStore>,
    shutdown_timeout: Duration,
}

impl EpicFhirServer {
    /// Loads keys, connects storage and assembles the router.
    ///
    /// Any failure here is a startup error.
    pub async fn from_config(cfg: &AppConfig) -> anyhow::Result<Self> {
        let sessions = Arc::new(MemorySessionStore::new(cfg.epic.session_ttl));
        let state = build_state(cfg, sessions.clone()).await?;

        Ok(Self {
            addr: cfg.addr(),
            app: build_router(state),
            sessions,
            shutdown_timeout: cfg.server.shutdown_timeout,
        })
    }

    pub async fn run(self) -> anyhow::Result<()> {
        let listener = tokio::net::TcpListener::bind(self.addr).await?;
        tracing::info!("listening on {}", self.addr);

        let sweeper = tokio::spawn(sweep_sessions(self.sessions));

        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        let mut serve = tokio::spawn(async move {
            axum::serve(listener, self.app)
                .with_graceful_shutdown(async move {
                    let _ = rx.await;
                })
                .await
        });

        let result = tokio::select! {
            joined = &mut serve => joined?.map_err(anyhow::Error::from),
            _ = shutdown_signal() => {
                let _ = tx.send(());
                match tokio::time::timeout(self.shutdown_timeout, serve).await {
                    Ok(joined) => joined?.map_err(anyhow::Error::from),
                    Err(_) => {
                        tracing::warn!(timeout = ?self.shutdown_timeout, "graceful shutdown timed out");
                        Ok(())
                    }
                }
            }
        };

        sweeper.abort();
        result
    }
}

async fn sweep_sessions(sessions: Arc<MemorySessionStore>) {
    let mut interval = tokio::time::interval(SESSION_SWEEP_INTERVAL);
    loop {
        interval.tick().await;
        let removed = sessions.cleanup_expired();
        if removed > 0 {
            tracing::debug!(removed, "Expired sessions removed");
        }
    }
}

async fn shutdown_signal() {
    // Wait for Ctrl+C
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("shutdown signal received");
}
