//! Collaborator create/update/delete rules shared by the API handlers and the importer.

use std::sync::Arc;

use tracing::debug;
use uuid::Uuid;

use super::cache::CollaboratorsCache;
use super::store::{CollaboratorStore, CollaboratorTx, UniqueViolation};
use crate::types::{
    Collaborator, CollaboratorChanges, CollaboratorFields, CollaboratorPage, CollaboratorView,
    PageRequest, ValidationErrors,
};

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("validation failed: {0}")]
    Validation(ValidationErrors),

    #[error("this action is unauthorized")]
    Unauthorized,

    #[error("collaborator not found")]
    NotFound,

    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

pub struct CollaboratorService {
    store: Arc<dyn CollaboratorStore>,
    cache: Arc<CollaboratorsCache>,
}

impl CollaboratorService {
    pub fn new(store: Arc<dyn CollaboratorStore>, cache: Arc<CollaboratorsCache>) -> Self {
        Self { store, cache }
    }

    pub async fn create(
        &self,
        owner_id: Uuid,
        fields: CollaboratorFields,
    ) -> Result<Collaborator, ServiceError> {
        let mut tx = self.store.begin().await?;
        let created = Self::create_in(tx.as_mut(), owner_id, fields).await?;
        tx.commit().await?;

        self.cache.flush_for_user(owner_id);
        Ok(created)
    }

    /// Insert inside a caller-owned transaction
    pub async fn create_in(
        tx: &mut dyn CollaboratorTx,
        owner_id: Uuid,
        fields: CollaboratorFields,
    ) -> Result<Collaborator, ServiceError> {
        let fields = fields.normalized();
        ensure_unique(tx, owner_id, Some(&fields.email), Some(fields.cpf.value()), None).await?;

        tx.insert(owner_id, &fields).await.map_err(write_error)
    }

    pub async fn update(
        &self,
        owner_id: Uuid,
        id: Uuid,
        changes: CollaboratorChanges,
    ) -> Result<Collaborator, ServiceError> {
        let existing = self.store.find(id).await?.ok_or(ServiceError::NotFound)?;

        let mut tx = self.store.begin().await?;
        let updated = Self::update_in(tx.as_mut(), owner_id, &existing, changes).await?;
        tx.commit().await?;

        self.cache.flush_for_user(owner_id);
        Ok(updated)
    }

    /// Merge the provided fields into `existing` inside a caller-owned transaction
    pub async fn update_in(
        tx: &mut dyn CollaboratorTx,
        owner_id: Uuid,
        existing: &Collaborator,
        changes: CollaboratorChanges,
    ) -> Result<Collaborator, ServiceError> {
        if existing.user_id != owner_id {
            return Err(ServiceError::Unauthorized);
        }

        let changes = changes.normalized();
        ensure_unique(
            tx,
            owner_id,
            changes.email.as_deref(),
            changes.cpf.as_ref().map(|d| d.value()),
            Some(existing.id),
        )
        .await?;

        tx.update(existing.id, &changes)
            .await
            .map_err(write_error)?
            .ok_or(ServiceError::NotFound)
    }

    pub async fn delete(&self, owner_id: Uuid, id: Uuid) -> Result<(), ServiceError> {
        let existing = self.get(owner_id, id).await?;

        let mut tx = self.store.begin().await?;
        if !tx.delete(existing.id).await? {
            return Err(ServiceError::NotFound);
        }
        tx.commit().await?;

        self.cache.flush_for_user(owner_id);
        Ok(())
    }

    /// Fetch a collaborator the caller owns
    pub async fn get(&self, owner_id: Uuid, id: Uuid) -> Result<Collaborator, ServiceError> {
        let collaborator = self.store.find(id).await?.ok_or(ServiceError::NotFound)?;
        if collaborator.user_id != owner_id {
            return Err(ServiceError::Unauthorized);
        }
        Ok(collaborator)
    }

    /// Newest-first page of the owner's collaborators, served through the cache
    pub async fn search(
        &self,
        owner_id: Uuid,
        search: Option<&str>,
        page: PageRequest,
    ) -> Result<CollaboratorPage, ServiceError> {
        let store = Arc::clone(&self.store);
        let result = self
            .cache
            .remember(owner_id, search, page, || async move {
                debug!(user_id = %owner_id, page = page.page, "Loading collaborators page");
                let (items, total) = store.search(owner_id, search, page).await?;
                Ok(CollaboratorPage {
                    items: items.into_iter().map(CollaboratorView::from).collect(),
                    total,
                    page: page.page,
                    per_page: page.per_page,
                })
            })
            .await?;
        Ok(result)
    }
}

/// Reject values already used by another collaborator of the owner, naming every conflict
async fn ensure_unique(
    tx: &mut dyn CollaboratorTx,
    owner_id: Uuid,
    email: Option<&str>,
    cpf: Option<&str>,
    except: Option<Uuid>,
) -> Result<(), ServiceError> {
    let taken = tx.taken_fields(owner_id, email, cpf, except).await?;
    if taken.is_empty() {
        return Ok(());
    }

    let mut errors = ValidationErrors::new();
    for field in taken {
        errors.add(field.as_str(), field.taken_message());
    }
    Err(ServiceError::Validation(errors))
}

fn write_error(err: anyhow::Error) -> ServiceError {
    match err.downcast_ref::<UniqueViolation>() {
        Some(violation) => ServiceError::Validation(ValidationErrors::taken(violation.field)),
        None => ServiceError::Store(err),
    }
}
