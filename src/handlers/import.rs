//! CSV upload handler

use tracing::error;

use super::HandlerContext;
use crate::services::upload::UploadError;
use crate::types::{ErrorResponse, ImportCollaboratorsRequest, ImportSubmitResponse, Request};

/// Handle `collab.collaborator.import`: store the upload and queue the import job
pub async fn submit(
    ctx: &HandlerContext,
    request: Request<ImportCollaboratorsRequest>,
) -> Result<ImportSubmitResponse, ErrorResponse> {
    let auth_info = ctx.authorize(&request)?;
    ctx.uploads
        .submit(auth_info.user_id, &request.payload)
        .await
        .map_err(|e| upload_error(&request, e))
}

fn upload_error<T>(request: &Request<T>, err: UploadError) -> ErrorResponse {
    if err.is_validation() {
        return ErrorResponse::new(request.id, "VALIDATION_ERROR", "The given data was invalid.")
            .with_details(serde_json::json!({ "file": err.to_string() }));
    }

    error!("Failed to submit import: {}", err);
    ErrorResponse::new(request.id, "SUBMIT_ERROR", err.to_string())
}
