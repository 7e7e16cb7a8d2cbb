//! Persistence seams for collaborators and their owners.
//!
//! The PostgreSQL implementations live in `db::store`; tests run against the in-memory
//! implementations in `store::memory`.

use anyhow::Result;
use async_trait::async_trait;
use uuid::Uuid;

use crate::types::{
    Collaborator, CollaboratorChanges, CollaboratorFields, PageRequest, UniqueField, User,
};

#[cfg(test)]
pub mod memory;

/// Raised by a store when the storage-level unique constraint rejects a write
#[derive(Debug, thiserror::Error)]
#[error("unique constraint violated on {}", field.as_str())]
pub struct UniqueViolation {
    pub field: UniqueField,
}

/// Collaborator persistence
#[async_trait]
pub trait CollaboratorStore: Send + Sync {
    /// Open a transaction. Dropping it without `commit` rolls it back.
    async fn begin(&self) -> Result<Box<dyn CollaboratorTx>>;

    /// Find by id regardless of owner
    async fn find(&self, id: Uuid) -> Result<Option<Collaborator>>;

    /// Owner's collaborators, newest first, optionally filtered by a case-insensitive
    /// name fragment. Returns the page and the total match count.
    async fn search(
        &self,
        owner_id: Uuid,
        name: Option<&str>,
        page: PageRequest,
    ) -> Result<(Vec<Collaborator>, i64)>;
}

/// Operations inside one transaction
#[async_trait]
pub trait CollaboratorTx: Send {
    /// Select the owner's collaborator with this document and hold a write lock on it
    /// until the transaction ends.
    async fn lock_by_document(&mut self, owner_id: Uuid, cpf: &str) -> Result<Option<Collaborator>>;

    /// Which of the given values already belong to another collaborator of the owner
    async fn taken_fields(
        &mut self,
        owner_id: Uuid,
        email: Option<&str>,
        cpf: Option<&str>,
        except: Option<Uuid>,
    ) -> Result<Vec<UniqueField>>;

    async fn insert(&mut self, owner_id: Uuid, fields: &CollaboratorFields) -> Result<Collaborator>;

    async fn update(&mut self, id: Uuid, changes: &CollaboratorChanges) -> Result<Option<Collaborator>>;

    async fn delete(&mut self, id: Uuid) -> Result<bool>;

    async fn commit(self: Box<Self>) -> Result<()>;
}

/// Account lookup
#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn find(&self, id: Uuid) -> Result<Option<User>>;

    async fn find_by_email(&self, email: &str) -> Result<Option<User>>;

    /// Create the account, or reset name and password of an existing one
    async fn upsert(&self, email: &str, name: &str, password_hash: &str) -> Result<User>;
}
