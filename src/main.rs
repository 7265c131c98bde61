use std::net::SocketAddr;

use axum::{routing::get, Router};
use axum_prometheus::PrometheusMetricLayer;
use tracing_subscriber::{fmt, EnvFilter};

use hephaestus::config::{HephaestusConfig, LogFormat};
use hephaestus::state::AppState;
use hephaestus::{facade, grpc, rest};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    let config = HephaestusConfig::from_env();
    match config.log_format {
        LogFormat::Json => fmt().with_env_filter(EnvFilter::from_default_env()).json().init(),
        LogFormat::Text => fmt().with_env_filter(EnvFilter::from_default_env()).init(),
    }

    let state = AppState::new(config)?;
    facade::discover_plugins(&state)?;

    let rest_addr = state.config.rest_bind;
    let grpc_addr = state.config.grpc_bind;
    let prometheus_addr: SocketAddr =
        format!("{}:{}", state.config.prometheus_host, state.config.prometheus_port).parse()?;

    let (prometheus_layer, metrics_handle) = PrometheusMetricLayer::pair();
    let rest_app = rest::build_router(state.clone()).layer(prometheus_layer);
    let metrics_app = Router::new().route(
        "/metrics",
        get(move || async move { metrics_handle.render() }),
    );

    let grpc_router = grpc::build_router(state.clone());

    tracing::info!(%rest_addr, %grpc_addr, %prometheus_addr, "starting hephaestus");

    let rest_server = axum::Server::bind(&rest_addr).serve(rest_app.into_make_service());
    let metrics_server = axum::Server::bind(&prometheus_addr).serve(metrics_app.into_make_service());
    let grpc_server = grpc_router.serve(grpc_addr);

    tokio::try_join!(
        async { rest_server.await.map_err(|e| e.to_string()) },
        async { metrics_server.await.map_err(|e| e.to_string()) },
        async { grpc_server.await.map_err(|e| e.to_string()) },
    )
    .map_err(|e| -> Box<dyn std::error::Error> { e.into() })?;

    Ok(())
}
