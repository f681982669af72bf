use frame_ingest::{config, init_tracing, start_app};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = config::get_configuration()?;
    init_tracing(&config.log_level);

    let summary = start_app(config).await?;
    if summary.failed > 0 {
        tracing::warn!(failed = summary.failed, "some frames were dropped");
    }

    Ok(())
}
