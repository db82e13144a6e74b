use mortgage_default_risk::{config::Config, pipeline, BoxError};
use tracing::{debug, info, instrument};

#[instrument]
fn main() -> Result<(), BoxError> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    info!("Starting mortgage default risk pipeline");

    let config_path = "config.toml";
    debug!("Loading config from path: {}", config_path);
    let config = Config::load_or_default(config_path)?;
    debug!(?config, "Config loaded successfully");

    let summary = pipeline::run(&config)?;

    info!(
        accounts = summary.predicted_accounts,
        predictions = %summary.predictions_path.display(),
        chart = %summary.importance_chart_path.display(),
        "Pipeline complete"
    );
    Ok(())
}
