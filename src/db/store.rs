//! PostgreSQL-backed stores

use anyhow::Result;
use async_trait::async_trait;
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use super::queries;
use crate::services::store::{CollaboratorStore, CollaboratorTx, UniqueViolation, UserDirectory};
use crate::types::{
    Collaborator, CollaboratorChanges, CollaboratorFields, PageRequest, UniqueField, User,
};

const UNIQUE_VIOLATION: &str = "23505";
const CPF_CONSTRAINT: &str = "collaborators_user_id_cpf_unique";

#[derive(Clone)]
pub struct PgCollaboratorStore {
    pool: PgPool,
}

impl PgCollaboratorStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CollaboratorStore for PgCollaboratorStore {
    async fn begin(&self) -> Result<Box<dyn CollaboratorTx>> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgCollaboratorTx { tx }))
    }

    async fn find(&self, id: Uuid) -> Result<Option<Collaborator>> {
        let mut conn = self.pool.acquire().await?;
        queries::collaborator::get_collaborator(&mut conn, id).await
    }

    async fn search(
        &self,
        owner_id: Uuid,
        name: Option<&str>,
        page: PageRequest,
    ) -> Result<(Vec<Collaborator>, i64)> {
        let mut conn = self.pool.acquire().await?;
        queries::collaborator::search_collaborators(&mut conn, owner_id, name, page).await
    }
}

pub struct PgCollaboratorTx {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl CollaboratorTx for PgCollaboratorTx {
    async fn lock_by_document(&mut self, owner_id: Uuid, cpf: &str) -> Result<Option<Collaborator>> {
        queries::collaborator::lock_collaborator_by_cpf(&mut self.tx, owner_id, cpf).await
    }

    async fn taken_fields(
        &mut self,
        owner_id: Uuid,
        email: Option<&str>,
        cpf: Option<&str>,
        except: Option<Uuid>,
    ) -> Result<Vec<UniqueField>> {
        let mut taken = Vec::new();
        if let Some(email) = email {
            if queries::collaborator::email_taken(&mut self.tx, owner_id, email, except).await? {
                taken.push(UniqueField::Email);
            }
        }
        if let Some(cpf) = cpf {
            if queries::collaborator::cpf_taken(&mut self.tx, owner_id, cpf, except).await? {
                taken.push(UniqueField::Cpf);
            }
        }
        Ok(taken)
    }

    async fn insert(&mut self, owner_id: Uuid, fields: &CollaboratorFields) -> Result<Collaborator> {
        queries::collaborator::create_collaborator(&mut self.tx, owner_id, fields)
            .await
            .map_err(map_write_error)
    }

    async fn update(&mut self, id: Uuid, changes: &CollaboratorChanges) -> Result<Option<Collaborator>> {
        queries::collaborator::update_collaborator(&mut self.tx, id, changes)
            .await
            .map_err(map_write_error)
    }

    async fn delete(&mut self, id: Uuid) -> Result<bool> {
        queries::collaborator::delete_collaborator(&mut self.tx, id).await
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        self.tx.commit().await?;
        Ok(())
    }
}

/// Turn the (owner, cpf) constraint violation into a typed error
fn map_write_error(err: sqlx::Error) -> anyhow::Error {
    if let sqlx::Error::Database(ref db) = err {
        if db.code().as_deref() == Some(UNIQUE_VIOLATION) && db.constraint() == Some(CPF_CONSTRAINT) {
            return UniqueViolation {
                field: UniqueField::Cpf,
            }
            .into();
        }
    }
    err.into()
}

#[derive(Clone)]
pub struct PgUserDirectory {
    pool: PgPool,
}

impl PgUserDirectory {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UserDirectory for PgUserDirectory {
    async fn find(&self, id: Uuid) -> Result<Option<User>> {
        queries::user::get_user(&self.pool, id).await
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>> {
        queries::user::get_user_by_email(&self.pool, email).await
    }

    async fn upsert(&self, email: &str, name: &str, password_hash: &str) -> Result<User> {
        queries::user::upsert_user(&self.pool, email, name, password_hash).await
    }
}
