use mcp_session_engine::{build_app, config::Config, logging, mcp::ServerHandle, AppState};
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::from_env()?;
    logging::init_logging(&config.log_filter);

    let bind_socket = config.bind_socket()?;
    let server = ServerHandle::start_with(config.server_info(), config.engine_options())?;
    let app = build_app(AppState::new(server));
    let listener = tokio::net::TcpListener::bind(bind_socket).await?;

    info!(
        target: "mcp::core",
        bind_addr = %config.bind_addr,
        bind_port = config.bind_port,
        server = %config.server_name,
        "server starting"
    );

    axum::serve(listener, app.into_make_service()).await?;
    Ok(())
}
