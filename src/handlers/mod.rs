//! NATS message handlers

pub mod auth;
pub mod collaborator;
pub mod import;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_nats::{Client, Subscriber};
use futures::StreamExt;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::select;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::auth::{extract_auth, AuthInfo};
use crate::services::collaborator::{CollaboratorService, ServiceError};
use crate::services::rate_limiter::RateLimiter;
use crate::services::store::UserDirectory;
use crate::services::upload::UploadHandoff;
use crate::types::{ErrorResponse, Request, SuccessResponse};

/// Shared state of the request handlers
pub struct HandlerContext {
    pub collaborators: CollaboratorService,
    pub users: Arc<dyn UserDirectory>,
    pub uploads: UploadHandoff,
    pub login_limiter: RateLimiter,
    pub jwt_secret: String,
    pub jwt_ttl: Duration,
}

impl HandlerContext {
    /// Resolve the caller or answer `UNAUTHORIZED`
    pub fn authorize<T>(&self, request: &Request<T>) -> Result<AuthInfo, ErrorResponse> {
        extract_auth(request, &self.jwt_secret).map_err(|e| {
            debug!("Rejected request {}: {}", request.id, e);
            ErrorResponse::new(request.id, "UNAUTHORIZED", "Unauthenticated.")
        })
    }
}

/// Map a service failure onto the reply envelope
pub fn service_error(request_id: Uuid, err: ServiceError) -> ErrorResponse {
    match err {
        ServiceError::Validation(errors) => {
            let details = serde_json::to_value(&errors).unwrap_or_default();
            ErrorResponse::new(request_id, "VALIDATION_ERROR", "The given data was invalid.")
                .with_details(details)
        }
        ServiceError::Unauthorized => {
            ErrorResponse::new(request_id, "FORBIDDEN", "This action is unauthorized.")
        }
        ServiceError::NotFound => {
            ErrorResponse::new(request_id, "NOT_FOUND", "Collaborator not found.")
        }
        ServiceError::Store(e) => {
            error!("Database error: {:#}", e);
            ErrorResponse::new(request_id, "DATABASE_ERROR", e.to_string())
        }
    }
}

/// Request/reply loop shared by every subject.
///
/// Parses `Request<Req>`, runs `handler` and publishes either a `SuccessResponse` or the
/// returned `ErrorResponse` to the reply subject.
async fn serve<Req, Resp, F, Fut>(
    client: Client,
    mut subscriber: Subscriber,
    name: &'static str,
    handler: F,
) -> Result<()>
where
    Req: DeserializeOwned,
    Resp: Serialize,
    F: Fn(Request<Req>) -> Fut,
    Fut: Future<Output = Result<Resp, ErrorResponse>>,
{
    while let Some(msg) = subscriber.next().await {
        debug!("Received {} message", name);

        let reply = match msg.reply {
            Some(ref reply) => reply.clone(),
            None => {
                warn!("Message without reply subject");
                continue;
            }
        };

        let request: Request<Req> = match serde_json::from_slice(&msg.payload) {
            Ok(req) => req,
            Err(e) => {
                error!("Failed to parse {} request: {}", name, e);
                let error = ErrorResponse::new(Uuid::nil(), "INVALID_REQUEST", e.to_string());
                let _ = client.publish(reply, serde_json::to_vec(&error)?.into()).await;
                continue;
            }
        };

        let request_id = request.id;
        let body = match handler(request).await {
            Ok(payload) => serde_json::to_vec(&SuccessResponse::new(request_id, payload))?,
            Err(error) => serde_json::to_vec(&error)?,
        };
        let _ = client.publish(reply, body.into()).await;
    }

    Ok(())
}

/// Subscribe every subject and run until one handler stops
pub async fn start_handlers(client: Client, ctx: Arc<HandlerContext>) -> Result<()> {
    info!("Starting message handlers...");

    let login_sub = client.subscribe("collab.auth.login").await?;
    let refresh_sub = client.subscribe("collab.auth.refresh").await?;
    let me_sub = client.subscribe("collab.auth.me").await?;
    let create_sub = client.subscribe("collab.collaborator.create").await?;
    let get_sub = client.subscribe("collab.collaborator.get").await?;
    let update_sub = client.subscribe("collab.collaborator.update").await?;
    let delete_sub = client.subscribe("collab.collaborator.delete").await?;
    let list_sub = client.subscribe("collab.collaborator.list").await?;
    let import_sub = client.subscribe("collab.collaborator.import").await?;

    info!("Subscribed to NATS subjects");

    macro_rules! spawn_handler {
        ($sub:expr, $name:literal, $op:path) => {{
            let client = client.clone();
            let ctx = Arc::clone(&ctx);
            tokio::spawn(async move {
                serve(client, $sub, $name, move |request| {
                    let ctx = Arc::clone(&ctx);
                    async move { $op(&ctx, request).await }
                })
                .await
            })
        }};
    }

    let login_handle = spawn_handler!(login_sub, "auth.login", auth::login);
    let refresh_handle = spawn_handler!(refresh_sub, "auth.refresh", auth::refresh);
    let me_handle = spawn_handler!(me_sub, "auth.me", auth::me);
    let create_handle = spawn_handler!(create_sub, "collaborator.create", collaborator::create);
    let get_handle = spawn_handler!(get_sub, "collaborator.get", collaborator::get);
    let update_handle = spawn_handler!(update_sub, "collaborator.update", collaborator::update);
    let delete_handle = spawn_handler!(delete_sub, "collaborator.delete", collaborator::delete);
    let list_handle = spawn_handler!(list_sub, "collaborator.list", collaborator::list);
    let import_handle = spawn_handler!(import_sub, "collaborator.import", import::submit);

    let limiter_ctx = Arc::clone(&ctx);
    let cleanup_handle = tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(300));
        loop {
            interval.tick().await;
            limiter_ctx.login_limiter.cleanup();
        }
    });

    info!("All handlers started, waiting for messages...");

    select! {
        result = login_handle => error!("Login handler finished: {:?}", result),
        result = refresh_handle => error!("Refresh handler finished: {:?}", result),
        result = me_handle => error!("Me handler finished: {:?}", result),
        result = create_handle => error!("Create handler finished: {:?}", result),
        result = get_handle => error!("Get handler finished: {:?}", result),
        result = update_handle => error!("Update handler finished: {:?}", result),
        result = delete_handle => error!("Delete handler finished: {:?}", result),
        result = list_handle => error!("List handler finished: {:?}", result),
        result = import_handle => error!("Import handler finished: {:?}", result),
        _ = cleanup_handle => error!("Rate limiter cleanup finished"),
    }

    Ok(())
}
