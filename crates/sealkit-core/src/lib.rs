//! Core library for `sealkit`.
//!
//! Envelope encryption for per-tenant integration secrets. Each integration
//! row and each account row owns a random 256-bit data encryption key (DEK);
//! the DEK is stored wrapped under a process-wide key encryption key (KEK)
//! and encrypts every value of the row's config map individually.
//!
//! Layers, bottom up:
//!
//! - [`cipher`] — AES-256-GCM primitives and the scrypt-wrapped DEK format.
//! - [`codec`] — whole config maps encrypted field by field.
//! - [`context`] — cached access to one row through the storage trait.
//! - [`manager`] — DEK lifecycle and typed field accessors per auth type.
//! - [`factory`] — the configured [`KeyManagerHandle`] that hands out managers.
//!
//! Storage lives in `sealkit-storage`; this crate only sees the
//! [`IntegrationStore`](sealkit_storage::IntegrationStore) trait.

pub mod cipher;
pub mod codec;
pub mod context;
pub mod error;
pub mod factory;
pub mod manager;
pub mod schema;

pub use cipher::{Dek, Kek};
pub use context::{AccountContext, IntegrationContext, RecordContext, RecordTarget};
pub use error::{CipherError, KeyManagerError, SchemaError};
pub use factory::{
    AccountKeyManager, IntegrationKeyManager, KeyManagerHandle, KeyManagerSettings,
    create_account_key_manager, create_integration_key_manager, initialize_account_dek,
    initialize_integration_dek,
};
pub use manager::{
    ApiKeyAccountKeyManager, ApiKeyIntegrationKeyManager, BotTokenAccountKeyManager,
    BotTokenIntegrationKeyManager, FromKeyCore, IntegrationCredentials, KeyCore, ManagerOptions,
    OAuth2AccountKeyManager, OAuth2IntegrationKeyManager,
};
pub use schema::{AuthType, FieldSchema, ManagedFields, Scope};
