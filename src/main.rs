use std::sync::Arc;

use actix_request_identifier::{IdReuse, RequestIdentifier};
use actix_web::web::Data;
use anyhow::Context;
use tracing::info;
use tracing_actix_web::TracingLogger;
use tracing_bunyan_formatter::{BunyanFormattingLayer, JsonStorageLayer};
use tracing_subscriber::filter::filter_fn;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::Registry;

use crate::config::Settings;
use crate::database::connect::{create_db_connection_pool, run_migrations};
use crate::pipeline::OrderPipeline;
use crate::provider::HttpProvider;
use crate::ratelimit::LocalRateLimiter;
use crate::reconcile::Reconciler;

mod config;
mod database;
mod domain;
mod errors;
mod gate;
mod permissions;
mod pipeline;
mod proto;
mod provider;
mod ratelimit;
mod reconcile;
mod responses;
mod routes;
mod schema;

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    let settings = Settings::from_env()?;

    // setup tracing and use bunyan formatter
    let formatting_layer = BunyanFormattingLayer::new("pointstock".into(), std::io::stdout);
    let subscriber = Registry::default()
        .with(filter_fn(|metadata| *metadata.level() <= tracing::Level::INFO))
        .with(JsonStorageLayer)
        .with(formatting_layer);
    tracing::subscriber::set_global_default(subscriber)?;

    let db = create_db_connection_pool(&settings.database_url).context("failed to create database pool")?;
    run_migrations(&db)?;

    let provider = HttpProvider::new(&settings.provider).context("failed to build provider client")?;
    let pipeline = OrderPipeline::new(db.clone(), Arc::new(provider));
    let reconciler = Reconciler::new(pipeline.clone(), settings.reconcile.clone());
    let limiter = Data::new(LocalRateLimiter::per_minute(settings.order_rate_limit_per_minute));
    let bind_address = settings.bind_address.clone();
    let settings = Data::new(settings);

    info!(bind_address = bind_address.as_str(), "starting server");
    let server = actix_web::HttpServer::new(move || {
        actix_web::App::new()
            .wrap(TracingLogger::default())
            .wrap(RequestIdentifier::with_uuid().use_incoming_id(IdReuse::UseIncoming))
            .app_data(Data::new(db.clone()))
            .app_data(Data::new(pipeline.clone()))
            .app_data(Data::new(reconciler.clone()))
            .app_data(limiter.clone())
            .app_data(settings.clone())
            .configure(routes::configure)
    });

    server.bind(&bind_address)?.run().await?;
    Ok(())
}
