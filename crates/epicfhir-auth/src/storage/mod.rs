//! Storage traits for registered credentials.
//!
//! # Implementations
//!
//! - [`MemoryCredentialStorage`] - in-process, for tests and single instances
//! - `epicfhir-auth-postgres` - PostgreSQL storage backend (`epic_users`)

pub mod credential;
pub mod memory;

pub use credential::{CredentialStorage, NewCredential, SessionBinding, UserCredential, short_hash};
pub use memory::MemoryCredentialStorage;
