use clap::Parser;
use wsgw_gateway::{GatewayConfig, Server, shutdown::shutdown_signal};

#[derive(Parser, Debug)]
#[command(name = "wsgw", version)]
#[command(about = "WebSocket gateway bridging clients to a plain HTTP backend")]
struct Cli {
    /// Interface to listen on
    #[arg(long, env = "WSGW_HOST", default_value = "127.0.0.1")]
    host: String,

    /// Port to listen on
    #[arg(long, env = "WSGW_PORT", default_value_t = 8080)]
    port: u16,

    /// Base URL of the backend application receiving lifecycle callbacks
    #[arg(long, env = "WSGW_APP_BASE_URL", default_value = "http://127.0.0.1:3000")]
    app_base_url: String,
}

#[tokio::main]
async fn main() {
    // Initialize JSON logging once.
    let env_filter = tracing_subscriber::EnvFilter::from_default_env();
    let env_filter = match "info".parse() {
        Ok(directive) => env_filter.add_directive(directive),
        Err(_) => env_filter, // fallback to default if parsing fails
    };

    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .json()
        .try_init();

    let cli = Cli::parse();
    let config = GatewayConfig {
        host: cli.host,
        port: cli.port,
        app_base_url: cli.app_base_url,
    };

    let server = match Server::bind(&config).await {
        Ok(server) => server,
        Err(e) => {
            tracing::error!(error = %e, addr = %config.bind_addr(), "failed to bind");
            std::process::exit(1);
        }
    };

    if let Err(e) = server.serve(shutdown_signal()).await {
        tracing::error!(error = %e, "gateway exited with error");
        std::process::exit(1);
    }
}
