//! Database models split into domain-specific modules.

pub mod asset;
pub mod job;
pub mod project;
pub mod user;

pub use asset::*;
pub use job::*;
pub use project::*;
pub use user::*;
