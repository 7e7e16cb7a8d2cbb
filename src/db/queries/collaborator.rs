//! Collaborator database queries

use anyhow::Result;
use sqlx::PgConnection;
use uuid::Uuid;

use crate::types::{Collaborator, CollaboratorChanges, CollaboratorFields, PageRequest};

/// Get collaborator by ID
pub async fn get_collaborator(conn: &mut PgConnection, id: Uuid) -> Result<Option<Collaborator>> {
    let collaborator = sqlx::query_as::<_, Collaborator>(
        r#"
        SELECT id, user_id, name, email, cpf, city, state, created_at, updated_at
        FROM collaborators
        WHERE id = $1
        "#
    )
    .bind(id)
    .fetch_optional(&mut *conn)
    .await?;

    Ok(collaborator)
}

/// Select the owner's collaborator with this CPF, locking the row for the
/// rest of the transaction
pub async fn lock_collaborator_by_cpf(
    conn: &mut PgConnection,
    user_id: Uuid,
    cpf: &str,
) -> Result<Option<Collaborator>> {
    let collaborator = sqlx::query_as::<_, Collaborator>(
        r#"
        SELECT id, user_id, name, email, cpf, city, state, created_at, updated_at
        FROM collaborators
        WHERE user_id = $1 AND cpf = $2
        FOR UPDATE
        "#
    )
    .bind(user_id)
    .bind(cpf)
    .fetch_optional(&mut *conn)
    .await?;

    Ok(collaborator)
}

/// Whether another collaborator of the owner already uses this value
pub async fn email_taken(
    conn: &mut PgConnection,
    user_id: Uuid,
    email: &str,
    except: Option<Uuid>,
) -> Result<bool> {
    let exists: bool = sqlx::query_scalar(
        r#"
        SELECT EXISTS (
            SELECT 1 FROM collaborators
            WHERE user_id = $1 AND email = $2 AND ($3::uuid IS NULL OR id <> $3)
        )
        "#
    )
    .bind(user_id)
    .bind(email)
    .bind(except)
    .fetch_one(&mut *conn)
    .await?;

    Ok(exists)
}

pub async fn cpf_taken(
    conn: &mut PgConnection,
    user_id: Uuid,
    cpf: &str,
    except: Option<Uuid>,
) -> Result<bool> {
    let exists: bool = sqlx::query_scalar(
        r#"
        SELECT EXISTS (
            SELECT 1 FROM collaborators
            WHERE user_id = $1 AND cpf = $2 AND ($3::uuid IS NULL OR id <> $3)
        )
        "#
    )
    .bind(user_id)
    .bind(cpf)
    .bind(except)
    .fetch_one(&mut *conn)
    .await?;

    Ok(exists)
}

/// Create a new collaborator
///
/// Returns the raw `sqlx` error so callers can tell constraint violations apart.
pub async fn create_collaborator(
    conn: &mut PgConnection,
    user_id: Uuid,
    fields: &CollaboratorFields,
) -> std::result::Result<Collaborator, sqlx::Error> {
    sqlx::query_as::<_, Collaborator>(
        r#"
        INSERT INTO collaborators (
            id, user_id, name, email, cpf, city, state, created_at, updated_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, NOW(), NOW())
        RETURNING id, user_id, name, email, cpf, city, state, created_at, updated_at
        "#
    )
    .bind(Uuid::new_v4())
    .bind(user_id)
    .bind(&fields.name)
    .bind(&fields.email)
    .bind(fields.cpf.value())
    .bind(&fields.city)
    .bind(&fields.state)
    .fetch_one(&mut *conn)
    .await
}

/// Update the provided fields of a collaborator
pub async fn update_collaborator(
    conn: &mut PgConnection,
    id: Uuid,
    changes: &CollaboratorChanges,
) -> std::result::Result<Option<Collaborator>, sqlx::Error> {
    sqlx::query_as::<_, Collaborator>(
        r#"
        UPDATE collaborators
        SET
            name = COALESCE($2, name),
            email = COALESCE($3, email),
            cpf = COALESCE($4, cpf),
            city = COALESCE($5, city),
            state = COALESCE($6, state),
            updated_at = NOW()
        WHERE id = $1
        RETURNING id, user_id, name, email, cpf, city, state, created_at, updated_at
        "#
    )
    .bind(id)
    .bind(&changes.name)
    .bind(&changes.email)
    .bind(changes.cpf.as_ref().map(|d| d.value()))
    .bind(&changes.city)
    .bind(&changes.state)
    .fetch_optional(&mut *conn)
    .await
}

/// Delete a collaborator
pub async fn delete_collaborator(conn: &mut PgConnection, id: Uuid) -> Result<bool> {
    let result = sqlx::query("DELETE FROM collaborators WHERE id = $1")
        .bind(id)
        .execute(&mut *conn)
        .await?;

    Ok(result.rows_affected() > 0)
}

/// Owner's collaborators, newest first, with an optional name filter
pub async fn search_collaborators(
    conn: &mut PgConnection,
    user_id: Uuid,
    name: Option<&str>,
    page: PageRequest,
) -> Result<(Vec<Collaborator>, i64)> {
    let pattern = name.map(|n| format!("%{}%", escape_like(n)));

    let items = sqlx::query_as::<_, Collaborator>(
        r#"
        SELECT id, user_id, name, email, cpf, city, state, created_at, updated_at
        FROM collaborators
        WHERE user_id = $1 AND ($2::text IS NULL OR name ILIKE $2)
        ORDER BY created_at DESC, id DESC
        LIMIT $3 OFFSET $4
        "#
    )
    .bind(user_id)
    .bind(&pattern)
    .bind(page.limit())
    .bind(page.offset())
    .fetch_all(&mut *conn)
    .await?;

    let total: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM collaborators WHERE user_id = $1 AND ($2::text IS NULL OR name ILIKE $2)"
    )
    .bind(user_id)
    .bind(&pattern)
    .fetch_one(&mut *conn)
    .await?;

    Ok((items, total))
}

fn escape_like(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for c in raw.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}
