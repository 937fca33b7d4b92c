use std::{
    net::{IpAddr, SocketAddr},
    sync::Arc,
    time::Duration,
};

use crate::{
    clock::{SystemTimeSource, TimeSource},
    config::{Config, DatabaseConfig},
    domain::events::AppEvent,
    engine::ReferralEngine,
    fraud::{FraudGate, SlidingWindowFraudGate},
    links::SecureLinkGenerator,
    repository::{PgStore, ReferralStore, UserStore},
    routes::{
        auth::{authenticate, check_auth},
        event::stream,
        health,
        referral::{
            accept_referral, cancel_referral, create_referral, get_deep_link, get_referral,
            get_stats, list_referrals, validate_referral,
        },
        user::get_authenticated_user,
    },
    stats::StatsAggregator,
};
use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use sqlx::{postgres::PgPoolOptions, PgPool};
use tokio::sync::broadcast;
use tower_http::{cors::CorsLayer, timeout::TimeoutLayer};
use tracing_subscriber::{layer::SubscriberExt, EnvFilter, Registry};

pub struct AppState {
    engine: ReferralEngine,
    stats: StatsAggregator,
    users: Arc<dyn UserStore>,
    clock: Arc<dyn TimeSource>,
    tx: broadcast::Sender<AppEvent>,
    pub config: Config,
}

impl AppState {
    pub fn new(
        config: Config,
        referrals: Arc<dyn ReferralStore>,
        users: Arc<dyn UserStore>,
        fraud: Arc<dyn FraudGate>,
        clock: Arc<dyn TimeSource>,
    ) -> Self {
        let links = Arc::new(SecureLinkGenerator::new(config.referral.base_url.clone()));
        let engine = ReferralEngine::new(
            fraud,
            referrals.clone(),
            users.clone(),
            links,
            clock.clone(),
            &config.referral,
        );
        let stats = StatsAggregator::new(referrals, clock.clone());
        let (tx, _rx) = broadcast::channel(100);

        Self {
            engine,
            stats,
            users,
            clock,
            tx,
            config,
        }
    }

    pub fn engine(&self) -> &ReferralEngine {
        &self.engine
    }

    pub fn stats(&self) -> &StatsAggregator {
        &self.stats
    }

    pub fn users(&self) -> Arc<dyn UserStore> {
        self.users.clone()
    }

    pub fn clock(&self) -> Arc<dyn TimeSource> {
        self.clock.clone()
    }

    pub fn get_sender(&self) -> broadcast::Sender<AppEvent> {
        self.tx.clone()
    }

    /// Broadcasts to stream subscribers; having none is not an error.
    pub fn publish(&self, event: AppEvent) {
        let _ = self.tx.send(event);
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    let timeout = Duration::from_secs(state.config.application.request_timeout_secs);

    Router::new()
        .route("/stream", get(stream))
        .route("/users/me", get(get_authenticated_user))
        .route("/api/referrals", get(list_referrals).post(create_referral))
        .route("/api/referrals/stats", get(get_stats))
        .route("/api/referrals/:id", get(get_referral))
        .route("/api/referrals/:id/cancel", post(cancel_referral))
        .route_layer(middleware::from_fn_with_state(state.clone(), check_auth))
        .route("/health", get(health))
        .route("/authenticate", post(authenticate))
        .route("/api/referrals/validate", post(validate_referral))
        .route("/api/referrals/deeplink/:slug", get(get_deep_link))
        .route("/api/referrals/:token/accept", post(accept_referral))
        .with_state(state)
        .layer(TimeoutLayer::new(timeout))
        .layer(CorsLayer::permissive())
}

pub struct Application;

impl Application {
    pub async fn build(config: Config) -> anyhow::Result<()> {
        Self::setup_tracing(&config.application.debug_mode);

        let pool = Self::get_pool(&config.database);
        sqlx::migrate!("./migrations").run(&pool).await?;

        let store = Arc::new(PgStore::new(pool));
        let clock: Arc<dyn TimeSource> = Arc::new(SystemTimeSource);
        let fraud = Arc::new(SlidingWindowFraudGate::new(&config.referral, clock.clone()));
        let app_state = Arc::new(AppState::new(
            config.clone(),
            store.clone(),
            store,
            fraud,
            clock,
        ));

        let app = router(app_state);

        let ip = config.application.host.parse::<IpAddr>()?;
        let addr = SocketAddr::new(ip, config.application.port);
        tracing::info!("listening on {}", addr);
        axum::Server::bind(&addr)
            .serve(app.into_make_service())
            .await?;

        Ok(())
    }

    fn setup_tracing(debug_mode: &str) {
        let subscriber = Registry::default()
            .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| debug_mode.into()))
            .with(tracing_subscriber::fmt::layer());

        // sqlx reports through `log`.
        if let Err(e) = tracing_log::LogTracer::init() {
            eprintln!("log bridge already installed: {}", e);
        }
        if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
            eprintln!("tracing subscriber already installed: {}", e);
        }
    }

    fn get_pool(db_config: &DatabaseConfig) -> PgPool {
        PgPoolOptions::new()
            .acquire_timeout(std::time::Duration::from_secs(2))
            .connect_lazy_with(db_config.get_connect_options())
    }
}
