//! Error types for `sealkit-core`.
//!
//! Each error variant carries enough context to diagnose the problem without
//! a debugger. Errors never include key material or secret values, only
//! integration names, tenant ids, field names, or operation descriptions.

use sealkit_storage::StorageError;

use crate::schema::{AuthType, Scope};

/// Errors from the envelope cipher and config codec.
#[derive(Debug, thiserror::Error)]
pub enum CipherError {
    /// A stored ciphertext does not have the expected shape.
    #[error("malformed ciphertext: {reason}")]
    MalformedCiphertext { reason: String },

    /// AEAD authentication failed (wrong key, corrupted or foreign ciphertext).
    #[error("decryption failed")]
    DecryptionFailed,

    /// AES-256-GCM encryption failed.
    #[error("encryption failed: {reason}")]
    Encryption { reason: String },

    /// scrypt key derivation failed.
    #[error("key derivation failed: {reason}")]
    KeyDerivation { reason: String },

    /// A DEK is not a base64-encoded 256-bit key.
    #[error("invalid data encryption key: {reason}")]
    InvalidKey { reason: String },

    /// One field of a config map failed; the whole map is rejected.
    #[error("config field '{field}': {source}")]
    Field {
        field: String,
        #[source]
        source: Box<CipherError>,
    },
}

impl CipherError {
    /// The underlying failure, unwrapping any per-field context.
    #[must_use]
    pub fn root(&self) -> &CipherError {
        match self {
            Self::Field { source, .. } => source.root(),
            other => other,
        }
    }
}

/// Errors from the capability/field schema.
#[derive(Debug, thiserror::Error)]
pub enum SchemaError {
    /// The auth type string is not one of `oauth_2`, `api_key`, `bot_token`.
    #[error("unknown auth type '{auth_type}'")]
    UnknownAuthType { auth_type: String },

    /// The scope string is not `integration` or `account`.
    #[error("unknown scope '{scope}'")]
    UnknownScope { scope: String },

    /// A plugin tried to declare a field that is already a base field.
    #[error("field '{field}' is a base field of {auth_type} {scope} managers and cannot be redefined")]
    RedefinesBaseField {
        auth_type: AuthType,
        scope: Scope,
        field: String,
    },

    /// A plugin tried to declare an empty or non-identifier field name.
    #[error("invalid field name '{field}': expected lowercase letters, digits and '_'")]
    InvalidFieldName { field: String },

    /// A manager type does not expose every base field of its auth type/scope.
    #[error("{manager} is missing base field '{field}' of {auth_type} {scope} managers")]
    MissingBaseField {
        manager: &'static str,
        auth_type: AuthType,
        scope: Scope,
        field: &'static str,
    },

    /// A manager type has an accessor for a field the schema never declared.
    #[error("{manager} exposes field '{field}' which is not declared for {auth_type} {scope} managers")]
    UndeclaredField {
        manager: &'static str,
        auth_type: AuthType,
        scope: Scope,
        field: &'static str,
    },
}

/// Errors surfaced by key managers, record contexts, and initializers.
#[derive(Debug, thiserror::Error)]
pub enum KeyManagerError {
    /// No integration row has this name.
    #[error("integration '{name}' not found")]
    IntegrationNotFound { name: String },

    /// No account row exists for this tenant on the integration.
    #[error("account for tenant '{tenant_id}' on integration '{integration}' not found")]
    AccountNotFound {
        tenant_id: String,
        integration: String,
    },

    /// The record exists but has never been initialized for encryption.
    #[error("DEK not initialized for {target}; call issue_new_dek() or an initializer first")]
    DekNotInitialized { target: String },

    /// The handle was built without a store or KEK.
    #[error("key manager configuration incomplete, missing: {}", missing.join(", "))]
    MissingConfiguration { missing: Vec<&'static str> },

    /// The row kept changing underneath us; retries are exhausted.
    #[error("{target} was modified concurrently {attempts} times; giving up")]
    Conflict { target: String, attempts: u32 },

    /// Cipher or codec failure.
    #[error(transparent)]
    Cipher(#[from] CipherError),

    /// Schema failure (unknown auth type, additive-only violation).
    #[error(transparent)]
    Schema(#[from] SchemaError),

    /// The storage collaborator failed.
    #[error("key manager storage error: {0}")]
    Storage(#[from] StorageError),

    /// A blocking KDF task panicked or was cancelled.
    #[error("key manager internal error: {reason}")]
    Internal { reason: String },
}

impl KeyManagerError {
    /// Whether this is [`CipherError::DecryptionFailed`], possibly behind field context.
    #[must_use]
    pub fn is_decryption_failure(&self) -> bool {
        matches!(self, Self::Cipher(e) if matches!(e.root(), CipherError::DecryptionFailed))
    }
}
