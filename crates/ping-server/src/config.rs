use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::Context;
use tracing::warn;

use ping_sync::feed::{DEFAULT_FEED_LIMIT, MAX_FEED_LIMIT};

const DEV_SECRET: &str = "dev-secret-change-me";

/// Server settings, read from the environment (and `.env` when present).
#[derive(Debug, Clone)]
pub struct Config {
    pub jwt_secret: String,
    pub db_path: PathBuf,
    pub blob_dir: PathBuf,
    pub host: String,
    pub port: u16,
    pub feed_limit: usize,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(var: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let jwt_secret = var("PING_JWT_SECRET").unwrap_or_else(|| {
            warn!("PING_JWT_SECRET not set, using the development secret");
            DEV_SECRET.into()
        });

        let port = match var("PING_PORT") {
            Some(port) => port.parse().with_context(|| format!("PING_PORT={:?}", port))?,
            None => 3000,
        };

        let feed_limit = match var("PING_FEED_LIMIT") {
            Some(limit) => limit
                .parse::<usize>()
                .with_context(|| format!("PING_FEED_LIMIT={:?}", limit))?
                .clamp(1, MAX_FEED_LIMIT),
            None => DEFAULT_FEED_LIMIT,
        };

        Ok(Self {
            jwt_secret,
            db_path: var("PING_DB_PATH").unwrap_or_else(|| "ping.db".into()).into(),
            blob_dir: var("PING_BLOB_DIR").unwrap_or_else(|| "./blobs".into()).into(),
            host: var("PING_HOST").unwrap_or_else(|| "0.0.0.0".into()),
            port,
            feed_limit,
        })
    }

    pub fn addr(&self) -> anyhow::Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("bad listen address {}:{}", self.host, self.port))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn config(vars: &[(&str, &str)]) -> anyhow::Result<Config> {
        let vars: HashMap<String, String> = vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults() {
        let config = config(&[]).unwrap();
        assert_eq!(config.port, 3000);
        assert_eq!(config.feed_limit, DEFAULT_FEED_LIMIT);
        assert_eq!(config.jwt_secret, DEV_SECRET);
        assert_eq!(config.addr().unwrap().port(), 3000);
    }

    #[test]
    fn overrides_and_bounds() {
        let config = config(&[("PING_PORT", "8080"), ("PING_FEED_LIMIT", "1000"), ("PING_HOST", "127.0.0.1")]).unwrap();
        assert_eq!(config.port, 8080);
        assert_eq!(config.feed_limit, MAX_FEED_LIMIT);
        assert_eq!(config.addr().unwrap().to_string(), "127.0.0.1:8080");

        assert!(super::Config::from_lookup(|k| (k == "PING_PORT").then(|| "http".to_string())).is_err());
    }
}
