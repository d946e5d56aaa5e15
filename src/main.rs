use demo_server::{AppState, ConfigBuilder, Logger, ServiceError, Telemetry, server};

#[tokio::main]
async fn main() -> Result<(), ServiceError> {
    let config = ConfigBuilder::new()
        .with_file("demo-server.toml")
        .with_env("DEMO_")
        .with_standard_env()
        .extract()?;

    let telemetry = Telemetry::from_config(&config)?;
    telemetry.install_subscriber(&config.log_filter)?;
    telemetry.log_startup(&config);

    let logger = Logger::new(config.resource.service_name.as_str());
    let log = logger.scope(file!(), "main");
    log.debug("Telemetry ready");

    let state = AppState::new(&telemetry, logger.clone(), config.server.response_delay);
    state.metrics().record_uptime();
    log.info(&format!("Uptime: {:.3}s", state.metrics().uptime_secs()));

    let listener = server::bind(&config.server.listen_addr).await?;
    let app = server::router(state, config.server.request_timeout);
    let served = server::serve(listener, app, server::shutdown_signal()).await;

    if let Err(e) = &served {
        log.error(&format!("Server stopped with error: {e}"));
    }

    log.info("Shutting down telemetry");
    if let Err(e) = telemetry.shutdown().await {
        log.error(&format!("Telemetry shutdown failed: {e}"));
    }

    served
}
