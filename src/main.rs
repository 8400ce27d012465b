mod ai;
mod api;
mod config;
mod db;
mod error;
mod models;
mod srs;

use ai::AiClient;
use api::ApiState;
use config::Config;
use db::Db;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    env_logger::init();

    let config = Config::from_env()?;
    let db = Db::new(&config.database_url).await?;
    let policy = srs::policy_from_name(&config.srs_policy)?;
    let ai = config.ai.clone().map(AiClient::new);

    log::info!(
        "scheduling policy: {}, AI generator: {}",
        policy.name(),
        if ai.is_some() { "enabled" } else { "disabled" }
    );

    let state = ApiState { db, policy, ai };
    let app = api::app_router(state);

    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    log::info!("listening on {}", config.bind_addr);
    axum::serve(listener, app).await?;

    Ok(())
}
