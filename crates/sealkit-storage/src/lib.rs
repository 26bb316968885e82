//! Storage contract for `sealkit`.
//!
//! This crate defines the [`IntegrationStore`] trait, the only interface the
//! key-lifecycle engine in `sealkit-core` uses to reach persisted rows. It
//! knows nothing about encryption: `config` values and the `dek` column are
//! opaque strings by the time they reach this layer.
//!
//! Two logical tables exist:
//!
//! - `integrations` — one row per third-party provider, shared by all tenants.
//! - `accounts` — one row per `(tenant, integration)` pair.
//!
//! Two implementations are provided:
//!
//! - [`PostgresStore`] — backed by `PostgreSQL` via sqlx (feature `postgres-backend`)
//! - [`MemoryStore`] — in-memory, for tests and local development

mod error;
mod memory;
#[cfg(feature = "postgres-backend")]
mod postgres;
mod record;

pub use error::StorageError;
pub use memory::MemoryStore;
#[cfg(feature = "postgres-backend")]
pub use postgres::PostgresStore;
pub use record::{AccountRecord, ConfigMap, IntegrationRecord, RecordPatch, StoredRecord};

use uuid::Uuid;

/// Read and partial-update access to integration and account rows.
///
/// Rows are created and deleted by provisioning logic outside this crate.
/// Implementations must be safe to share across async tasks (`Send + Sync`).
///
/// Every successful update bumps the row's `version` and `updated_at`. When a
/// [`RecordPatch`] carries an `expected_version`, the update is applied only
/// if the stored version still matches; otherwise nothing is written and
/// [`StorageError::VersionConflict`] is returned.
#[async_trait::async_trait]
pub trait IntegrationStore: Send + Sync + 'static {
    /// Look up an integration by its unique name.
    ///
    /// Returns `Ok(None)` if no row matches.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Read`] if the underlying backend fails.
    async fn find_integration_by_name(
        &self,
        name: &str,
    ) -> Result<Option<StoredRecord>, StorageError>;

    /// Write the provided fields of `patch` to the integration row `id`.
    ///
    /// `config` and `dek` are written together in a single row update.
    ///
    /// # Errors
    ///
    /// - [`StorageError::NotFound`] if no row has this id.
    /// - [`StorageError::VersionConflict`] if `expected_version` is stale.
    /// - [`StorageError::Write`] if the underlying backend fails.
    async fn update_integration(&self, id: Uuid, patch: RecordPatch) -> Result<(), StorageError>;

    /// Look up the account row for a tenant on a given integration.
    ///
    /// Returns `Ok(None)` if no row matches.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Read`] if the underlying backend fails.
    async fn find_account_by_tenant_and_integration(
        &self,
        tenant_id: &str,
        integration_id: Uuid,
    ) -> Result<Option<StoredRecord>, StorageError>;

    /// Write the provided fields of `patch` to the account row `id`.
    ///
    /// # Errors
    ///
    /// Same as [`update_integration`](IntegrationStore::update_integration).
    async fn update_account(&self, id: Uuid, patch: RecordPatch) -> Result<(), StorageError>;
}
