//! Type definitions

pub mod collaborator;
pub mod document;
pub mod import;
pub mod messages;
pub mod user;

pub use collaborator::*;
pub use document::*;
pub use import::*;
pub use messages::*;
pub use user::*;
