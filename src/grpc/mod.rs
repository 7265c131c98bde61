pub mod analytics;
pub mod cleanup;
pub mod interceptor;
pub mod quality;

pub mod proto {
    tonic::include_proto!("hephaestus.v1");
}

use crate::state::AppState;

use proto::analytics_service_server::AnalyticsServiceServer;
use proto::cleanup_service_server::CleanupServiceServer;
use proto::quality_service_server::QualityServiceServer;

/// Encoded file descriptor set emitted by `build.rs`, backing gRPC server
/// reflection so `grpcurl`/`grpcui`-style clients can discover the schema
/// without a local copy of the `.proto`.
pub const FILE_DESCRIPTOR_SET: &[u8] =
    include_bytes!(concat!(env!("OUT_DIR"), "/hephaestus_descriptor.bin"));

pub fn build_router(state: AppState) -> tonic::transport::server::Router {
    let reflection = tonic_reflection::server::Builder::configure()
        .register_encoded_file_descriptor_set(FILE_DESCRIPTOR_SET)
        .build()
        .expect("failed to build gRPC reflection service");

    tonic::transport::Server::builder()
        .add_service(reflection)
        .add_service(QualityServiceServer::new(quality::QualityServiceImpl::new(
            state.clone(),
        )))
        .add_service(CleanupServiceServer::new(cleanup::CleanupServiceImpl::new(
            state.clone(),
        )))
        .add_service(AnalyticsServiceServer::new(
            analytics::AnalyticsServiceImpl::new(state),
        ))
}
