//! In-memory stores for tests.
//!
//! A transaction takes the store-wide lock for its whole lifetime and works on a staged
//! copy that replaces the shared state on commit. That serializes transactions more
//! strictly than row locks do, which keeps the same observable guarantees.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

use super::{CollaboratorStore, CollaboratorTx, UniqueViolation, UserDirectory};
use crate::types::{
    Collaborator, CollaboratorChanges, CollaboratorFields, PageRequest, UniqueField, User,
};

#[derive(Debug, Clone, Default)]
struct MemoryState {
    collaborators: Vec<Collaborator>,
}

#[derive(Clone, Default)]
pub struct MemoryCollaboratorStore {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryCollaboratorStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every committed collaborator
    pub async fn all(&self) -> Vec<Collaborator> {
        self.state.lock().await.collaborators.clone()
    }

    pub async fn for_owner(&self, owner_id: Uuid) -> Vec<Collaborator> {
        self.all()
            .await
            .into_iter()
            .filter(|c| c.user_id == owner_id)
            .collect()
    }

    /// Insert and commit in one step
    pub async fn seed(&self, owner_id: Uuid, fields: CollaboratorFields) -> Collaborator {
        let mut tx = self.begin().await.unwrap();
        let created = tx.insert(owner_id, &fields).await.unwrap();
        tx.commit().await.unwrap();
        created
    }
}

#[async_trait]
impl CollaboratorStore for MemoryCollaboratorStore {
    async fn begin(&self) -> Result<Box<dyn CollaboratorTx>> {
        let guard = Arc::clone(&self.state).lock_owned().await;
        let staged = (*guard).clone();
        Ok(Box::new(MemoryTx { guard, staged }))
    }

    async fn find(&self, id: Uuid) -> Result<Option<Collaborator>> {
        let state = self.state.lock().await;
        Ok(state.collaborators.iter().find(|c| c.id == id).cloned())
    }

    async fn search(
        &self,
        owner_id: Uuid,
        name: Option<&str>,
        page: PageRequest,
    ) -> Result<(Vec<Collaborator>, i64)> {
        let state = self.state.lock().await;
        let needle = name.map(str::to_lowercase);

        let mut matches: Vec<Collaborator> = state
            .collaborators
            .iter()
            .rev()
            .filter(|c| c.user_id == owner_id)
            .filter(|c| match needle {
                Some(ref n) => c.name.to_lowercase().contains(n.as_str()),
                None => true,
            })
            .cloned()
            .collect();
        // Stable sort keeps the reverse insertion order for equal timestamps
        matches.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        let total = matches.len() as i64;
        let items = matches
            .into_iter()
            .skip(page.offset() as usize)
            .take(page.limit() as usize)
            .collect();
        Ok((items, total))
    }
}

pub struct MemoryTx {
    guard: OwnedMutexGuard<MemoryState>,
    staged: MemoryState,
}

#[async_trait]
impl CollaboratorTx for MemoryTx {
    async fn lock_by_document(&mut self, owner_id: Uuid, cpf: &str) -> Result<Option<Collaborator>> {
        Ok(self
            .staged
            .collaborators
            .iter()
            .find(|c| c.user_id == owner_id && c.cpf == cpf)
            .cloned())
    }

    async fn taken_fields(
        &mut self,
        owner_id: Uuid,
        email: Option<&str>,
        cpf: Option<&str>,
        except: Option<Uuid>,
    ) -> Result<Vec<UniqueField>> {
        let others: Vec<&Collaborator> = self
            .staged
            .collaborators
            .iter()
            .filter(|c| c.user_id == owner_id && Some(c.id) != except)
            .collect();

        let mut taken = Vec::new();
        if let Some(email) = email {
            if others.iter().any(|c| c.email == email) {
                taken.push(UniqueField::Email);
            }
        }
        if let Some(cpf) = cpf {
            if others.iter().any(|c| c.cpf == cpf) {
                taken.push(UniqueField::Cpf);
            }
        }
        Ok(taken)
    }

    async fn insert(&mut self, owner_id: Uuid, fields: &CollaboratorFields) -> Result<Collaborator> {
        let cpf = fields.cpf.value();
        if self
            .staged
            .collaborators
            .iter()
            .any(|c| c.user_id == owner_id && c.cpf == cpf)
        {
            return Err(UniqueViolation {
                field: UniqueField::Cpf,
            }
            .into());
        }

        let now = Utc::now();
        let collaborator = Collaborator {
            id: Uuid::new_v4(),
            user_id: owner_id,
            name: fields.name.clone(),
            email: fields.email.clone(),
            cpf: cpf.to_string(),
            city: fields.city.clone(),
            state: fields.state.clone(),
            created_at: now,
            updated_at: now,
        };
        self.staged.collaborators.push(collaborator.clone());
        Ok(collaborator)
    }

    async fn update(&mut self, id: Uuid, changes: &CollaboratorChanges) -> Result<Option<Collaborator>> {
        let Some(index) = self.staged.collaborators.iter().position(|c| c.id == id) else {
            return Ok(None);
        };

        let mut updated = self.staged.collaborators[index].clone();
        changes.apply_to(&mut updated);
        let clash = self
            .staged
            .collaborators
            .iter()
            .any(|c| c.id != id && c.user_id == updated.user_id && c.cpf == updated.cpf);
        if clash {
            return Err(UniqueViolation {
                field: UniqueField::Cpf,
            }
            .into());
        }

        updated.updated_at = Utc::now();
        self.staged.collaborators[index] = updated.clone();
        Ok(Some(updated))
    }

    async fn delete(&mut self, id: Uuid) -> Result<bool> {
        let before = self.staged.collaborators.len();
        self.staged.collaborators.retain(|c| c.id != id);
        Ok(self.staged.collaborators.len() != before)
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let MemoryTx { mut guard, staged } = *self;
        *guard = staged;
        Ok(())
    }
}

/// Accounts kept in a vector
#[derive(Default)]
pub struct MemoryUserDirectory {
    users: parking_lot::Mutex<Vec<User>>,
}

impl MemoryUserDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_user(&self, email: &str, name: &str) -> User {
        self.push(email, name, "not-set")
    }

    fn push(&self, email: &str, name: &str, password_hash: &str) -> User {
        let now = Utc::now();
        let user = User {
            id: Uuid::new_v4(),
            email: email.to_string(),
            password_hash: password_hash.to_string(),
            name: name.to_string(),
            created_at: now,
            updated_at: now,
        };
        self.users.lock().push(user.clone());
        user
    }
}

#[async_trait]
impl UserDirectory for MemoryUserDirectory {
    async fn find(&self, id: Uuid) -> Result<Option<User>> {
        Ok(self.users.lock().iter().find(|u| u.id == id).cloned())
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>> {
        Ok(self.users.lock().iter().find(|u| u.email == email).cloned())
    }

    async fn upsert(&self, email: &str, name: &str, password_hash: &str) -> Result<User> {
        {
            let mut users = self.users.lock();
            if let Some(existing) = users.iter_mut().find(|u| u.email == email) {
                existing.name = name.to_string();
                existing.password_hash = password_hash.to_string();
                existing.updated_at = Utc::now();
                return Ok(existing.clone());
            }
        }
        Ok(self.push(email, name, password_hash))
    }
}
