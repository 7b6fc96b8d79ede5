use actix_web::{dev::Service, web, App, HttpServer};
use anyhow::Context;
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use std::time::Instant;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use feed_ranking_service::cache::RedisCounterStore;
use feed_ranking_service::config::Config;
use feed_ranking_service::db::{ContentRepo, SocialRepo, VisibilityRepo};
use feed_ranking_service::handlers::{
    get_feed, get_feed_stats, record_impression, record_interaction, FeedHandlerState,
};
use feed_ranking_service::middleware::GatewayIdentityMiddleware;
use feed_ranking_service::services::{DistributionController, EngagementAccumulator, FeedAssembler};

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    let default_filter = format!(
        "{},actix_web=info",
        std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string())
    );

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(true)
                .with_line_number(true)
                .with_file(true)
                .with_target(true),
        )
        .init();

    let config = match Config::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            tracing::error!("Configuration loading failed: {}", e);
            anyhow::bail!("failed to load configuration: {}", e);
        }
    };

    info!(
        "Starting feed-ranking-service v{}",
        env!("CARGO_PKG_VERSION")
    );
    info!("Environment: {}", config.app.env);
    info!(
        candidate_limit = config.ranking.candidate_limit,
        max_per_author = config.diversity.max_per_author,
        company_ratio = config.diversity.company_ratio,
        dampening = config.dampening.enabled,
        follower_feed_fraction = config.visibility.follower_feed_fraction,
        "Ranking configuration loaded"
    );

    let db_pool = PgPoolOptions::new()
        .max_connections(config.database.max_connections)
        .connect(&config.database.url)
        .await
        .context("failed to create database pool")?;

    sqlx::migrate!("./migrations")
        .run(&db_pool)
        .await
        .context("failed to run database migrations")?;
    info!("Database migrations completed");

    let counters = Arc::new(
        RedisCounterStore::new(&config.redis.url)
            .await
            .context("failed to connect to redis")?,
    );
    counters.ping().await.context("redis health check failed")?;

    let assembler = FeedAssembler::new(
        Arc::new(ContentRepo::new(db_pool.clone())),
        Arc::new(SocialRepo::new(db_pool.clone())),
        Arc::new(VisibilityRepo::new(db_pool.clone())),
        counters.clone(),
    )
    .with_config(config.ranking.assembler())
    .with_distribution(config.distribution.clone())
    .with_diversity(config.diversity.clone())
    .with_dampening(config.dampening.clone());

    let accumulator = EngagementAccumulator::new(
        counters,
        DistributionController::new(config.distribution.clone()),
    );

    let feed_handler_state = web::Data::new(FeedHandlerState {
        assembler: Arc::new(assembler),
        accumulator: Arc::new(accumulator),
        ranking: config.ranking.clone(),
    });

    let port = config.app.port;
    info!("HTTP server listening on 0.0.0.0:{}", port);

    HttpServer::new(move || {
        App::new()
            .app_data(feed_handler_state.clone())
            .route("/health", web::get().to(|| async { "OK" }))
            .route(
                "/metrics",
                web::get().to(feed_ranking_service::metrics::serve_metrics),
            )
            .wrap_fn(|req, srv| {
                let method = req.method().to_string();
                let path = req
                    .match_pattern()
                    .map(|p| p.to_string())
                    .unwrap_or_else(|| req.path().to_string());
                let start = Instant::now();

                let fut = srv.call(req);
                async move {
                    match fut.await {
                        Ok(res) => {
                            feed_ranking_service::metrics::observe_http_request(
                                &method,
                                &path,
                                res.status().as_u16(),
                                start.elapsed(),
                            );
                            Ok(res)
                        }
                        Err(err) => {
                            feed_ranking_service::metrics::observe_http_request(
                                &method,
                                &path,
                                err.as_response_error().status_code().as_u16(),
                                start.elapsed(),
                            );
                            Err(err)
                        }
                    }
                }
            })
            .service(
                web::scope("/api/v1/feed")
                    .wrap(GatewayIdentityMiddleware)
                    .service(get_feed)
                    .service(get_feed_stats)
                    .service(record_impression)
                    .service(record_interaction),
            )
    })
    .bind(("0.0.0.0", port))?
    .run()
    .await?;

    Ok(())
}
