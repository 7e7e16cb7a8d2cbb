//! Interactive account management for the `create-user` command.

use anyhow::{bail, Context, Result};
use tracing::info;

use crate::services::store::UserDirectory;
use crate::types::User;

const MIN_PASSWORD_LENGTH: usize = 8;

/// Prompt for a password (hidden input), confirm it and store the account
pub async fn create_user_interactive(
    users: &dyn UserDirectory,
    email: &str,
    name: &str,
) -> Result<User> {
    let password = prompt_password()?;
    let user = create_user(users, email, name, &password).await?;

    println!("Account ready: {}", user.email);
    Ok(user)
}

/// Validate, hash and upsert an account
pub async fn create_user(
    users: &dyn UserDirectory,
    email: &str,
    name: &str,
    password: &str,
) -> Result<User> {
    let email = email.trim().to_lowercase();
    let name = name.trim();
    validate_email(&email)?;
    if name.is_empty() {
        bail!("Name must not be empty");
    }
    validate_password(password)?;

    let hash = crate::auth::hash_password(password)?;
    let user = users
        .upsert(&email, name, &hash)
        .await
        .context("Failed to store account")?;

    info!(user_id = %user.id, "Account stored for {}", user.email);
    Ok(user)
}

fn prompt_password() -> Result<String> {
    let pass = rpassword::prompt_password("Enter password: ").context("Failed to read password")?;
    let confirm = rpassword::prompt_password("Confirm password: ")
        .context("Failed to read password confirmation")?;

    if pass != confirm {
        bail!("Passwords do not match");
    }
    Ok(pass)
}

fn validate_email(email: &str) -> Result<()> {
    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() && domain.contains('.') => Ok(()),
        _ => bail!("Invalid email address: {email}"),
    }
}

fn validate_password(password: &str) -> Result<()> {
    if password.chars().count() < MIN_PASSWORD_LENGTH {
        bail!(
            "Password must be at least {MIN_PASSWORD_LENGTH} characters (got {})",
            password.chars().count()
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::store::memory::MemoryUserDirectory;

    #[test]
    fn invalid_email_fails() {
        assert!(validate_email("not-an-email").is_err());
        assert!(validate_email("@example.com").is_err());
        assert!(validate_email("owner@example.com").is_ok());
    }

    #[test]
    fn short_password_rejected() {
        assert!(validate_password("short").is_err());
        assert!(validate_password("long-enough").is_ok());
    }

    #[tokio::test]
    async fn create_user_normalizes_and_hashes() {
        let users = MemoryUserDirectory::new();

        let user = create_user(&users, " Owner@Example.com ", " Owner ", "long-enough")
            .await
            .unwrap();

        assert_eq!(user.email, "owner@example.com");
        assert_eq!(user.name, "Owner");
        assert!(crate::auth::verify_password("long-enough", &user.password_hash).unwrap());
    }

    #[tokio::test]
    async fn create_user_resets_existing_password() {
        let users = MemoryUserDirectory::new();
        let first = create_user(&users, "owner@example.com", "Owner", "first-password")
            .await
            .unwrap();

        let second = create_user(&users, "owner@example.com", "Renamed", "second-password")
            .await
            .unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(second.name, "Renamed");
        assert!(crate::auth::verify_password("second-password", &second.password_hash).unwrap());
    }

    #[tokio::test]
    async fn create_user_rejects_blank_name() {
        let users = MemoryUserDirectory::new();
        assert!(create_user(&users, "owner@example.com", "  ", "long-enough").await.is_err());
        assert!(users.find_by_email("owner@example.com").await.unwrap().is_none());
    }
}
