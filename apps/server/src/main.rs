//! Nightscout MCP server entry point

use std::sync::Arc;

use anyhow::Context;
use nightscout_core::{CognitoConfig, CognitoUserDirectory, StaticUserDirectory, UserDirectory};
use nightscout_gateway::{
    GatewayConfig, GatewayServer, IssuerKeyCache, NightscoutSites, OperationRegistry,
    TokenVerifier,
};
use tracing::info;

const DEFAULT_FILTER: &str = "info,nightscout_gateway=debug,nightscout_core=debug";

fn init_tracing() {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let console_layer = fmt::layer()
        .with_ansi(true)
        .compact()
        .with_thread_names(false)
        .with_line_number(false)
        .with_file(false)
        .with_target(true);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .init();
}

/// A local JSON file when `NIGHTSCOUT_USERS_FILE` is set, the user pool otherwise
async fn user_directory(cognito: &CognitoConfig) -> anyhow::Result<Arc<dyn UserDirectory>> {
    match std::env::var("NIGHTSCOUT_USERS_FILE") {
        Ok(users_file) if !users_file.trim().is_empty() => {
            let directory = StaticUserDirectory::from_file(&users_file)
                .with_context(|| format!("Failed to load user directory {}", users_file))?;
            info!("[Directory] Loaded {} user(s) from {}", directory.len(), users_file);
            Ok(Arc::new(directory))
        }
        _ => {
            let directory = CognitoUserDirectory::from_config(cognito)
                .await
                .context("Cognito user directory is not configured")?;
            info!("[Directory] Reading Nightscout sites from Cognito user attributes");
            Ok(Arc::new(directory))
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let cognito = CognitoConfig::from_env();
    let issuer = cognito.issuer().context("Cognito issuer is not configured")?;
    info!("[Auth] Accepting tokens from {}", issuer);

    let directory = user_directory(&cognito).await?;

    let verifier = Arc::new(TokenVerifier::new(cognito, Arc::new(IssuerKeyCache::new())));
    let sites = Arc::new(NightscoutSites::new(directory));
    let operations = Arc::new(OperationRegistry::nightscout(sites));

    let config = GatewayConfig::from_env().context("Invalid gateway configuration")?;
    GatewayServer::new(config, verifier, operations).run().await
}
