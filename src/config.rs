//! Process configuration: CLI flags layered over an optional TOML file and
//! environment variables, loaded once at startup and never hot-reloaded.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use serde::Deserialize;

#[derive(Debug, Parser)]
#[command(name = "plan-graph-service", about = "Plan document graph engine")]
pub struct Opts {
    /// Path to a TOML config file. CLI flags and env vars override its values.
    #[arg(long, env = "PLAN_SERVICE_CONFIG")]
    pub config: Option<PathBuf>,

    #[arg(long, env = "PLAN_SERVICE_HTTP_ADDR")]
    pub http_addr: Option<SocketAddr>,

    #[arg(long, env = "PLAN_SERVICE_MONGO_URI")]
    pub mongo_uri: Option<String>,

    #[arg(long, env = "PLAN_SERVICE_REDIS_URL")]
    pub redis_url: Option<String>,

    #[arg(long, env = "PLAN_SERVICE_AMQP_URI")]
    pub amqp_uri: Option<String>,

    #[arg(long, env = "PLAN_SERVICE_ELASTICSEARCH_URL")]
    pub elasticsearch_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub http_addr: SocketAddr,
    pub mongo_uri: String,
    pub mongo_database: String,
    pub redis_url: String,
    pub amqp_uri: String,
    pub amqp_exchange: String,
    pub amqp_queue: String,
    pub elasticsearch_url: String,
    pub elasticsearch_index: String,
    #[serde(with = "humantime_serde")]
    pub storage_timeout: Duration,
    pub consumer_prefetch: u16,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            http_addr: "0.0.0.0:8080".parse().expect("valid default address"),
            mongo_uri: "mongodb://localhost:27017".to_owned(),
            mongo_database: "plans".to_owned(),
            redis_url: "redis://localhost:6379".to_owned(),
            amqp_uri: "amqp://localhost:5672/%2f".to_owned(),
            amqp_exchange: "plan.events".to_owned(),
            amqp_queue: "plan.index.writer".to_owned(),
            elasticsearch_url: "http://localhost:9200".to_owned(),
            elasticsearch_index: "plans".to_owned(),
            storage_timeout: Duration::from_secs(5),
            consumer_prefetch: 1,
        }
    }
}

impl Config {
    /// Loads the base config from an optional TOML file, then overlays any
    /// CLI flags / env vars that were explicitly set.
    pub fn load(opts: &Opts) -> crate::error::Result<Config> {
        let mut config = match &opts.config {
            Some(path) => {
                let raw = std::fs::read_to_string(path).map_err(|e| crate::error::Error::StorageError {
                    message: format!("reading config file {}: {e}", path.display()),
                })?;
                toml::from_str(&raw).map_err(|e| crate::error::Error::StorageError {
                    message: format!("parsing config file {}: {e}", path.display()),
                })?
            }
            None => Config::default(),
        };

        if let Some(addr) = opts.http_addr {
            config.http_addr = addr;
        }
        if let Some(uri) = &opts.mongo_uri {
            config.mongo_uri = uri.clone();
        }
        if let Some(url) = &opts.redis_url {
            config.redis_url = url.clone();
        }
        if let Some(uri) = &opts.amqp_uri {
            config.amqp_uri = uri.clone();
        }
        if let Some(url) = &opts.elasticsearch_url {
            config.elasticsearch_url = url.clone();
        }

        Ok(config)
    }
}
