//! Database queries

pub mod collaborator;
pub mod user;
