//! # agrimarket-shared
//!
//! Types shared by every AgriMarket crate: user and message identifiers,
//! the message and profile models, validation errors, and the identity
//! provider adapter through which the current session is observed.

pub mod constants;
pub mod error;
pub mod identity;
pub mod types;

pub use error::ValidationError;
pub use identity::{IdentityProvider, IdentityWatch};
pub use types::{AppRole, Message, MessageId, NewMessage, Profile, UserId};
