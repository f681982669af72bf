use detection_service::{config, init_tracing, start_server};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = config::get_configuration()?;
    init_tracing(&config.log_level);

    start_server(config).await
}
