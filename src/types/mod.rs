//! Request types shared by the provider profiles.

mod message;

pub use message::{ChatMessage, Role, RoleMapper};
