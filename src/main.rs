mod api;
mod bus;
mod config;
mod consumer;
mod error;
mod etag;
mod graph;
mod schema_gate;
mod service;
mod store;
mod telemetry;

use std::sync::Arc;

use clap::Parser;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::bus::publisher::amqp::{declare_topology, AmqpPublisher};
use crate::config::{Config, Opts};
use crate::consumer::amqp::AmqpConsumer;
use crate::consumer::elasticsearch::ElasticsearchIndex;
use crate::consumer::index_writer::IndexWriterHandler;
use crate::consumer::HandlerRegistry;
use crate::etag::redis::RedisEtagCache;
use crate::service::PlanService;
use crate::store::mongo::MongoNodeStore;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    telemetry::init_logging();
    let metrics_handle = telemetry::init_metrics();

    let opts = Opts::parse();
    let config = Config::load(&opts)?;

    let mongo_client = mongodb::Client::with_uri_str(&config.mongo_uri).await?;
    let collection = mongo_client
        .database(&config.mongo_database)
        .collection::<mongodb::bson::Document>("nodes");
    let store = Arc::new(MongoNodeStore::new(collection, config.storage_timeout));

    let redis_cfg = deadpool_redis::Config::from_url(&config.redis_url);
    let redis_pool = redis_cfg.create_pool(Some(deadpool_redis::Runtime::Tokio1))?;
    let etags = Arc::new(RedisEtagCache::new(redis_pool));

    let amqp_conn = lapin::Connection::connect(&config.amqp_uri, lapin::ConnectionProperties::default()).await?;
    let publish_channel = amqp_conn.create_channel().await?;
    declare_topology(&publish_channel, &config.amqp_exchange, &config.amqp_queue).await?;
    let publisher = Arc::new(AmqpPublisher::new(publish_channel, config.amqp_exchange.clone()));

    let plan_service = Arc::new(PlanService::new(store, etags, publisher));

    let es_client = reqwest::Client::new();
    let search_index = ElasticsearchIndex::new(es_client, config.elasticsearch_url.clone());
    search_index.ensure_index(&config.elasticsearch_index).await?;

    let mut registry = HandlerRegistry::new();
    let index_handler: Arc<dyn consumer::Handler> = Arc::new(IndexWriterHandler::new(search_index));
    registry.register("plan.node.create", index_handler.clone());
    registry.register("plan.node.update", index_handler.clone());
    registry.register("plan.node.delete", index_handler);
    let registry = Arc::new(registry);

    let consume_channel = amqp_conn.create_channel().await?;
    let consumer = AmqpConsumer::new(consume_channel, config.amqp_queue.clone(), config.consumer_prefetch);
    tokio::spawn(async move {
        if let Err(e) = consumer.run(registry).await {
            tracing::error!(error = %e, "consumer task exited");
        }
    });

    let app = api::router(plan_service).merge(api::metrics_router(metrics_handle)).layer(TraceLayer::new_for_http());

    info!(addr = %config.http_addr, "plan graph service listening");
    axum::Server::bind(&config.http_addr)
        .serve(app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
