//! Business logic services

pub mod cache;
pub mod cache_sync;
pub mod collaborator;
pub mod email_sender;
pub mod email_templates;
pub mod import_job;
pub mod import_processor;
pub mod importer;
pub mod mail_queue;
pub mod rate_limiter;
pub mod storage;
pub mod store;
pub mod upload;
