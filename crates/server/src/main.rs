mod api;
mod router;
mod startup;
mod state;

use tracing::error;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_target(false)
        .with_level(true)
        .init();

    fahrplan_core::config::load_dotenv();
    let config = fahrplan_core::Config::from_env();
    config.log_summary();

    if let Err(err) = startup::run(&config).await {
        error!(error = %err, "scheduler service terminated with an error");
        std::process::exit(2);
    }
}
