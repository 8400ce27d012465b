use std::env;
use std::net::SocketAddr;

use anyhow::Context;

#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: SocketAddr,
    pub database_url: String,
    pub srs_policy: String,
    pub ai: Option<AiConfig>,
}

#[derive(Debug, Clone)]
pub struct AiConfig {
    pub api_url: String,
    pub api_key: String,
}

impl Config {
    /// Reads configuration from the environment; `main` loads `.env` first.
    /// The AI generator is optional; without `AI_API_KEY` the alternatives
    /// endpoint reports the upstream as unavailable.
    pub fn from_env() -> anyhow::Result<Self> {
        let bind_addr = env::var("BIND_ADDR")
            .unwrap_or_else(|_| "127.0.0.1:8080".to_string())
            .parse()
            .context("BIND_ADDR is not a valid socket address")?;

        let database_url = env::var("DATABASE_URL")
            .unwrap_or_else(|_| "sqlite://studyhall.db?mode=rwc".to_string());

        let srs_policy = env::var("SRS_POLICY").unwrap_or_else(|_| "sm2".to_string());

        let ai = match env::var("AI_API_KEY") {
            Ok(api_key) if !api_key.is_empty() => Some(AiConfig {
                api_url: env::var("AI_API_URL")
                    .unwrap_or_else(|_| "https://api.studyhall.dev/v1/alternatives".to_string()),
                api_key,
            }),
            _ => None,
        };

        Ok(Self {
            bind_addr,
            database_url,
            srs_policy,
            ai,
        })
    }
}
