//! Collaborator message handlers

use tracing::info;

use super::{service_error, HandlerContext};
use crate::services::collaborator::ServiceError;
use crate::types::{
    CollaboratorIdRequest, CollaboratorPage, CollaboratorView, CreateCollaboratorRequest,
    DeletedResponse, ErrorResponse, ListCollaboratorsRequest, Request, UpdateCollaboratorRequest,
};

/// Handle `collab.collaborator.create`
pub async fn create(
    ctx: &HandlerContext,
    request: Request<CreateCollaboratorRequest>,
) -> Result<CollaboratorView, ErrorResponse> {
    let auth_info = ctx.authorize(&request)?;
    let fields = request
        .payload
        .validate()
        .map_err(|e| service_error(request.id, ServiceError::Validation(e)))?;

    let collaborator = ctx
        .collaborators
        .create(auth_info.user_id, fields)
        .await
        .map_err(|e| service_error(request.id, e))?;

    info!(user_id = %auth_info.user_id, collaborator_id = %collaborator.id, "Collaborator created");
    Ok(collaborator.into())
}

/// Handle `collab.collaborator.get`
pub async fn get(
    ctx: &HandlerContext,
    request: Request<CollaboratorIdRequest>,
) -> Result<CollaboratorView, ErrorResponse> {
    let auth_info = ctx.authorize(&request)?;
    ctx.collaborators
        .get(auth_info.user_id, request.payload.id)
        .await
        .map(CollaboratorView::from)
        .map_err(|e| service_error(request.id, e))
}

/// Handle `collab.collaborator.update`
pub async fn update(
    ctx: &HandlerContext,
    request: Request<UpdateCollaboratorRequest>,
) -> Result<CollaboratorView, ErrorResponse> {
    let auth_info = ctx.authorize(&request)?;
    let changes = request
        .payload
        .validate()
        .map_err(|e| service_error(request.id, ServiceError::Validation(e)))?;

    let collaborator = ctx
        .collaborators
        .update(auth_info.user_id, request.payload.id, changes)
        .await
        .map_err(|e| service_error(request.id, e))?;

    info!(user_id = %auth_info.user_id, collaborator_id = %collaborator.id, "Collaborator updated");
    Ok(collaborator.into())
}

/// Handle `collab.collaborator.delete`
pub async fn delete(
    ctx: &HandlerContext,
    request: Request<CollaboratorIdRequest>,
) -> Result<DeletedResponse, ErrorResponse> {
    let auth_info = ctx.authorize(&request)?;
    ctx.collaborators
        .delete(auth_info.user_id, request.payload.id)
        .await
        .map_err(|e| service_error(request.id, e))?;

    info!(user_id = %auth_info.user_id, collaborator_id = %request.payload.id, "Collaborator deleted");
    Ok(DeletedResponse { deleted: true })
}

/// Handle `collab.collaborator.list`
pub async fn list(
    ctx: &HandlerContext,
    request: Request<ListCollaboratorsRequest>,
) -> Result<CollaboratorPage, ErrorResponse> {
    let auth_info = ctx.authorize(&request)?;
    let search = request.payload.search_term();
    ctx.collaborators
        .search(auth_info.user_id, search.as_deref(), request.payload.page_request())
        .await
        .map_err(|e| service_error(request.id, e))
}
