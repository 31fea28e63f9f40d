use qvarn_server::{AppConfig, init_tracing, run};

#[tokio::main]
async fn main() {
    let config = match AppConfig::load() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("configuration error: {err}");
            std::process::exit(1);
        }
    };

    init_tracing(&config.logging.level);
    tracing::info!("qvarn backend starting");

    if let Err(err) = run(config).await {
        eprintln!("server error: {err}");
        std::process::exit(1);
    }
}
