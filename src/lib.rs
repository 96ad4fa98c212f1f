use std::sync::Arc;

use actix_web::web::{Data, JsonConfig};
use actix_web::{App, HttpServer};
use tracing::level_filters::LevelFilter;
use tracing_actix_web::TracingLogger;
use tracing_subscriber::{util::SubscriberInitExt, EnvFilter, FmtSubscriber};

use auth::BearerAuth;
use clock::{Clock, SystemClock};
use config::Config;
use error::Error;
use metrics::{MetricsSink, NoopMetrics, PrometheusMetrics};
use service::{MessageService, QueueService};
use store::MessageStore;

pub mod api;
pub mod auth;
pub mod clock;
pub mod config;
pub mod error;
pub mod id;
pub mod jobs;
pub mod message;
pub mod metrics;
pub mod queue;
pub mod service;
pub mod store;

/// Returns a builder for the main application.
///
/// Startup order: open store and run migrations, build services, start the
/// server, start the maintenance loops. Shutdown reverses it: the server
/// drains first, then the loops stop, then the store closes.
#[bon::builder(finish_fn = start)]
pub async fn run(config: Option<Config>) -> eyre::Result<()> {
    #[cfg(debug_assertions)]
    FmtSubscriber::builder()
        .pretty()
        .with_env_filter(
            EnvFilter::builder()
                .with_env_var("FORQ_LOG")
                .with_default_directive(LevelFilter::INFO.into())
                .from_env()?,
        )
        .finish()
        .try_init()?;

    #[cfg(not(debug_assertions))]
    FmtSubscriber::builder()
        .json()
        .with_env_filter(
            EnvFilter::builder()
                .with_env_var("FORQ_LOG")
                .with_default_directive(LevelFilter::INFO.into())
                .from_env()?,
        )
        .finish()
        .try_init()?;

    let config = match config {
        Some(config) => config,
        None => Config::load()?,
    };
    config.validate()?;
    let config = Arc::new(config);

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let prometheus = if config.metrics_enabled() {
        Some(Arc::new(PrometheusMetrics::install()?))
    } else {
        None
    };
    let metrics: Arc<dyn MetricsSink> = match &prometheus {
        Some(prometheus) => prometheus.clone(),
        None => Arc::new(NoopMetrics),
    };

    let store = Arc::new(MessageStore::connect(config.clone(), clock.clone()).await?);

    let message_service = Data::new(MessageService::new(
        store.clone(),
        metrics.clone(),
        clock.clone(),
        config.clone(),
    ));
    let queue_service = Data::new(QueueService::new(store.clone()));

    let auth = BearerAuth::new(config.auth_secret().clone());
    let metrics_auth = config.metrics_auth_secret().cloned().map(BearerAuth::new);

    // headroom over the content limit so oversized payloads still reach the
    // size validation instead of dying in the JSON extractor
    let json_limit = 4 * config.message_content_max_size_bytes();

    tracing::info!(addr = config.api_addr(), "starting API server");

    let server = HttpServer::new({
        let prometheus = prometheus.clone();
        move || {
            let json_cfg = JsonConfig::default()
                .content_type_required(false)
                .limit(json_limit)
                .error_handler(|err, _req| {
                    tracing::warn!("failed to decode request body: {err}");
                    Error::InvalidBody.into()
                });

            let mut app = App::new()
                .wrap(TracingLogger::default())
                .app_data(message_service.clone())
                .app_data(queue_service.clone())
                .app_data(json_cfg)
                .service(api::v1(auth.clone()))
                .service(api::health::healthcheck);

            if let (Some(prometheus), Some(metrics_auth)) = (&prometheus, &metrics_auth) {
                app = app
                    .app_data(Data::from(prometheus.clone()))
                    .service(api::metrics::service(metrics_auth.clone()));
            }

            app
        }
    })
    .keep_alive(config.server_idle_timeout())
    .client_request_timeout(config.server_request_timeout())
    .bind(config.api_addr())?
    .run();

    let jobs = jobs::start_all(&store, &metrics, &config);

    server.await?;

    tracing::info!("server stopped, shutting down maintenance loops");

    for job in jobs {
        job.close().await;
    }

    store.close().await;

    Ok(())
}
