#![cfg(not(tarpaulin_include))]

use ed_dash::app;
use ed_dash::config::Config;

/// Main entry point for the web application
///
/// Reads the backend settings from `SUPABASE_URL` and `SUPABASE_ANON_KEY`
/// and serves the dashboard on 127.0.0.1:3000. Logging follows `RUST_LOG`,
/// defaulting to `ed_dash=info`.
///
/// # Returns
/// * `Result<(), Box<dyn std::error::Error>>` - Success or error object
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("ed_dash=info"))
        .init();

    let config = Config::from_env()?;
    log::info!("using backend at {}", config.supabase_url);

    app::run(config).await
}
