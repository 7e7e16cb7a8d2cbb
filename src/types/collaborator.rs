//! Collaborator types

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use super::document::Document;

const MAX_TEXT_LENGTH: usize = 255;
const MAX_STATE_LENGTH: usize = 100;

/// Collaborator entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Collaborator {
    pub id: Uuid,
    pub user_id: Uuid,
    pub name: String,
    pub email: String,
    pub cpf: String,
    pub city: String,
    pub state: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Collaborator {
    pub fn document(&self) -> Document {
        Document::from_raw(&self.cpf)
    }
}

/// Collaborator as returned to clients
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CollaboratorView {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub cpf: String,
    pub cpf_formatted: String,
    pub city: String,
    pub state: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<Collaborator> for CollaboratorView {
    fn from(c: Collaborator) -> Self {
        let cpf_formatted = c.document().formatted();
        Self {
            id: c.id,
            name: c.name,
            email: c.email,
            cpf: c.cpf,
            cpf_formatted,
            city: c.city,
            state: c.state,
            created_at: c.created_at,
            updated_at: c.updated_at,
        }
    }
}

/// The complete field set of a collaborator
#[derive(Debug, Clone, PartialEq)]
pub struct CollaboratorFields {
    pub name: String,
    pub email: String,
    pub cpf: Document,
    pub city: String,
    pub state: String,
}

impl CollaboratorFields {
    /// Lowercases the email. Safe to call on already normalized input.
    pub fn normalized(mut self) -> Self {
        self.email = self.email.to_lowercase();
        self
    }
}

/// Partial replacement of collaborator fields; `None` keeps the stored value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CollaboratorChanges {
    pub name: Option<String>,
    pub email: Option<String>,
    pub cpf: Option<Document>,
    pub city: Option<String>,
    pub state: Option<String>,
}

impl CollaboratorChanges {
    pub fn normalized(mut self) -> Self {
        self.email = self.email.map(|e| e.to_lowercase());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.email.is_none()
            && self.cpf.is_none()
            && self.city.is_none()
            && self.state.is_none()
    }

    /// Apply the changes on top of an existing record
    pub fn apply_to(&self, collaborator: &mut Collaborator) {
        if let Some(ref name) = self.name {
            collaborator.name = name.clone();
        }
        if let Some(ref email) = self.email {
            collaborator.email = email.clone();
        }
        if let Some(ref cpf) = self.cpf {
            collaborator.cpf = cpf.value().to_string();
        }
        if let Some(ref city) = self.city {
            collaborator.city = city.clone();
        }
        if let Some(ref state) = self.state {
            collaborator.state = state.clone();
        }
    }
}

impl From<CollaboratorFields> for CollaboratorChanges {
    fn from(fields: CollaboratorFields) -> Self {
        Self {
            name: Some(fields.name),
            email: Some(fields.email),
            cpf: Some(fields.cpf),
            city: Some(fields.city),
            state: Some(fields.state),
        }
    }
}

/// Unique keys of a collaborator within one owner
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum UniqueField {
    Email,
    Cpf,
}

impl UniqueField {
    pub fn as_str(&self) -> &'static str {
        match self {
            UniqueField::Email => "email",
            UniqueField::Cpf => "cpf",
        }
    }

    pub fn taken_message(&self) -> String {
        format!("The {} has already been taken.", self.as_str())
    }
}

/// Field-level validation failures, keyed by field name
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct ValidationErrors(BTreeMap<String, String>);

impl ValidationErrors {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keeps the first message recorded for a field
    pub fn add(&mut self, field: &str, message: impl Into<String>) {
        self.0.entry(field.to_string()).or_insert_with(|| message.into());
    }

    pub fn taken(field: UniqueField) -> Self {
        let mut errors = Self::new();
        errors.add(field.as_str(), field.taken_message());
        errors
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn contains(&self, field: &str) -> bool {
        self.0.contains_key(field)
    }

    pub fn get(&self, field: &str) -> Option<&str> {
        self.0.get(field).map(String::as_str)
    }

    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn into_result<T>(self, value: T) -> Result<T, Self> {
        if self.is_empty() {
            Ok(value)
        } else {
            Err(self)
        }
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.0.iter().map(|(k, v)| format!("{}: {}", k, v)).collect();
        write!(f, "{}", parts.join("; "))
    }
}

impl std::error::Error for ValidationErrors {}

// ============================================================================
// Requests
// ============================================================================

/// Request to create a collaborator
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateCollaboratorRequest {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub cpf: String,
    #[serde(default)]
    pub city: String,
    #[serde(default)]
    pub state: String,
}

impl CreateCollaboratorRequest {
    /// Trim, normalize and validate into a complete field set
    pub fn validate(&self) -> Result<CollaboratorFields, ValidationErrors> {
        let mut errors = ValidationErrors::new();

        let name = required_text(&mut errors, "name", &self.name, MAX_TEXT_LENGTH);
        let email = required_email(&mut errors, &self.email);
        let cpf = required_document(&mut errors, &self.cpf);
        let city = required_text(&mut errors, "city", &self.city, MAX_TEXT_LENGTH);
        let state = required_text(&mut errors, "state", &self.state, MAX_STATE_LENGTH);

        errors.into_result(CollaboratorFields {
            name,
            email,
            cpf,
            city,
            state,
        })
    }
}

/// Request to update a collaborator; absent fields are left untouched
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateCollaboratorRequest {
    pub id: Uuid,
    pub name: Option<String>,
    pub email: Option<String>,
    pub cpf: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
}

impl UpdateCollaboratorRequest {
    pub fn validate(&self) -> Result<CollaboratorChanges, ValidationErrors> {
        let mut errors = ValidationErrors::new();

        let changes = CollaboratorChanges {
            name: self
                .name
                .as_deref()
                .map(|v| required_text(&mut errors, "name", v, MAX_TEXT_LENGTH)),
            email: self.email.as_deref().map(|v| required_email(&mut errors, v)),
            cpf: self.cpf.as_deref().map(|v| required_document(&mut errors, v)),
            city: self
                .city
                .as_deref()
                .map(|v| required_text(&mut errors, "city", v, MAX_TEXT_LENGTH)),
            state: self
                .state
                .as_deref()
                .map(|v| required_text(&mut errors, "state", v, MAX_STATE_LENGTH)),
        };

        errors.into_result(changes)
    }
}

/// Request addressing one collaborator
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollaboratorIdRequest {
    pub id: Uuid,
}

/// Request for listing collaborators
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListCollaboratorsRequest {
    pub search: Option<String>,
    pub page: Option<u32>,
}

impl ListCollaboratorsRequest {
    /// Blank searches mean "no filter"
    pub fn search_term(&self) -> Option<String> {
        self.search
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| s.chars().take(MAX_TEXT_LENGTH).collect())
    }

    pub fn page_request(&self) -> PageRequest {
        PageRequest::new(self.page.unwrap_or(1))
    }
}

/// A 1-based page of fixed size
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PageRequest {
    pub page: u32,
    pub per_page: u32,
}

impl PageRequest {
    pub const DEFAULT_PER_PAGE: u32 = 15;

    pub fn new(page: u32) -> Self {
        Self {
            page: page.max(1),
            per_page: Self::DEFAULT_PER_PAGE,
        }
    }

    pub fn offset(&self) -> i64 {
        (self.page as i64 - 1) * self.per_page as i64
    }

    pub fn limit(&self) -> i64 {
        self.per_page as i64
    }
}

impl Default for PageRequest {
    fn default() -> Self {
        Self::new(1)
    }
}

/// One page of an owner's collaborators
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CollaboratorPage {
    pub items: Vec<CollaboratorView>,
    pub total: i64,
    pub page: u32,
    pub per_page: u32,
}

// ============================================================================
// Field validation helpers
// ============================================================================

fn required_text(errors: &mut ValidationErrors, field: &str, raw: &str, max: usize) -> String {
    let value = raw.trim().to_string();
    if value.is_empty() {
        errors.add(field, format!("The {} field is required.", field));
    } else if value.chars().count() > max {
        errors.add(
            field,
            format!("The {} field must not be greater than {} characters.", field, max),
        );
    }
    value
}

fn required_email(errors: &mut ValidationErrors, raw: &str) -> String {
    let value = required_text(errors, "email", raw, MAX_TEXT_LENGTH).to_lowercase();
    if !value.is_empty() && !looks_like_email(&value) {
        errors.add("email", "The email field must be a valid email address.");
    }
    value
}

fn required_document(errors: &mut ValidationErrors, raw: &str) -> Document {
    let document = Document::from_raw(raw);
    if document.is_empty() {
        errors.add("cpf", "The cpf field is required.");
    } else if !document.has_valid_length() {
        errors.add(
            "cpf",
            format!("The cpf field must be {} characters.", Document::LENGTH),
        );
    }
    document
}

fn looks_like_email(value: &str) -> bool {
    if value.chars().any(char::is_whitespace) {
        return false;
    }
    match value.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && !domain.contains('@')
                && domain.contains('.')
                && !domain.starts_with('.')
                && !domain.ends_with('.')
        }
        None => false,
    }
}
