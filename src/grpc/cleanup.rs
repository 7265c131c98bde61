use tonic::{Request, Response, Status};

use crate::audit::{self, AuditStatus, Protocol};
use crate::cleanup::{CleanupOptions, CleanupSummary};
use crate::facade;
use crate::state::AppState;

use super::interceptor::authenticate;
use super::proto::cleanup_service_server::CleanupService;
use super::proto::{CleanupManifest, CleanupRequest, CleanupResponse};

pub struct CleanupServiceImpl {
    state: AppState,
}

impl CleanupServiceImpl {
    pub fn new(state: AppState) -> Self {
        Self { state }
    }
}

fn to_options(request: CleanupRequest, dry_run: bool) -> CleanupOptions {
    CleanupOptions {
        workspace_root: request.root,
        python_cache: true,
        build_artifacts: true,
        node_modules: true,
        include_git: false,
        include_venv: false,
        deep_clean: request.deep_clean,
        extra_roots: vec![],
        dry_run,
        audit_manifest_path: None,
        max_depth: None,
    }
}

fn to_proto_response(result: CleanupSummary) -> CleanupResponse {
    CleanupResponse {
        file_count: result.file_count as u32,
        byte_estimate: result.byte_estimate,
        manifest: Some(CleanupManifest {
            search_root_count: result.manifest.search_roots as u32,
            preview_count: result.manifest.preview as u32,
            removed_count: result.manifest.removed as u32,
            skipped_count: result.manifest.skipped as u32,
            error_count: result.manifest.errors as u32,
            audit_manifest_path: result.manifest.audit_manifest_path.unwrap_or_default(),
        }),
        preview_paths: result.preview_paths,
        removed_paths: result.removed_paths,
    }
}

#[tonic::async_trait]
impl CleanupService for CleanupServiceImpl {
    async fn clean(
        &self,
        request: Request<CleanupRequest>,
    ) -> Result<Response<CleanupResponse>, Status> {
        let principal = authenticate(&request, &self.state)?;
        let options = to_options(request.into_inner(), false);
        let params = serde_json::json!({ "root": options.workspace_root, "deep_clean": options.deep_clean });
        let result = facade::run_cleanup(&self.state, &principal, options).map_err(|e| {
            let _ = self.state.audit.record(
                &principal.principal,
                &principal.key_id,
                "grpc.cleanup.clean",
                Protocol::Grpc,
                audit::status_for_error(&e),
                params.clone(),
                serde_json::json!({ "error": e.to_string() }),
            );
            Status::from(&e)
        })?;
        let _ = self.state.audit.record(
            &principal.principal,
            &principal.key_id,
            "grpc.cleanup.clean",
            Protocol::Grpc,
            AuditStatus::Success,
            params,
            serde_json::json!({ "removed": result.manifest.removed }),
        );
        Ok(Response::new(to_proto_response(result)))
    }

    async fn preview_cleanup(
        &self,
        request: Request<CleanupRequest>,
    ) -> Result<Response<CleanupResponse>, Status> {
        let principal = authenticate(&request, &self.state)?;
        let options = to_options(request.into_inner(), true);
        let params = serde_json::json!({ "root": options.workspace_root, "deep_clean": options.deep_clean });
        let result = facade::run_cleanup(&self.state, &principal, options).map_err(|e| {
            let _ = self.state.audit.record(
                &principal.principal,
                &principal.key_id,
                "grpc.cleanup.preview",
                Protocol::Grpc,
                audit::status_for_error(&e),
                params.clone(),
                serde_json::json!({ "error": e.to_string() }),
            );
            Status::from(&e)
        })?;
        let _ = self.state.audit.record(
            &principal.principal,
            &principal.key_id,
            "grpc.cleanup.preview",
            Protocol::Grpc,
            AuditStatus::Success,
            params,
            serde_json::json!({ "preview": result.manifest.preview }),
        );
        Ok(Response::new(to_proto_response(result)))
    }
}
