//! Record contexts: the only code that talks to the storage collaborator.
//!
//! A context is bound to exactly one row (an integration by name, or a
//! tenant's account on an integration) and caches that row after the first
//! read. Every write through the context invalidates the cache, so the next
//! read sees what was stored. Writes made through *other* contexts are not
//! observed until [`RecordContext::invalidate`] is called; contexts are meant
//! to live for one request or session.

use std::fmt;
use std::sync::Arc;

use sealkit_storage::{IntegrationStore, RecordPatch, StoredRecord};
use tokio::sync::RwLock;
use tracing::debug;

use crate::cipher::Kek;
use crate::error::KeyManagerError;
use crate::schema::Scope;

/// The row a context is bound to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordTarget {
    Integration {
        name: String,
    },
    Account {
        integration: String,
        tenant_id: String,
    },
}

impl fmt::Display for RecordTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Integration { name } => write!(f, "integration '{name}'"),
            Self::Account {
                integration,
                tenant_id,
            } => write!(
                f,
                "account for tenant '{tenant_id}' on integration '{integration}'"
            ),
        }
    }
}

/// Cached read and partial update of one row.
#[async_trait::async_trait]
pub trait RecordContext: Send + Sync {
    /// Which kind of row this context reads.
    const SCOPE: Scope;

    /// The row this context is bound to.
    fn target(&self) -> &RecordTarget;

    /// The master key DEKs of this row are wrapped with.
    fn kek(&self) -> &Kek;

    /// Return the cached row, fetching it on first use.
    ///
    /// # Errors
    ///
    /// - [`KeyManagerError::IntegrationNotFound`] / [`KeyManagerError::AccountNotFound`]
    ///   if the row does not exist.
    /// - [`KeyManagerError::Storage`] if the store fails.
    async fn fetch(&self) -> Result<StoredRecord, KeyManagerError>;

    /// Write `patch` to the row and drop the cached copy.
    ///
    /// # Errors
    ///
    /// Same as [`fetch`](RecordContext::fetch), plus
    /// [`KeyManagerError::Storage`] wrapping a version conflict.
    async fn update(&self, patch: RecordPatch) -> Result<(), KeyManagerError>;

    /// Drop the cached row.
    async fn invalidate(&self);
}

#[async_trait::async_trait]
impl<T: RecordContext> RecordContext for Arc<T> {
    const SCOPE: Scope = T::SCOPE;

    fn target(&self) -> &RecordTarget {
        (**self).target()
    }

    fn kek(&self) -> &Kek {
        (**self).kek()
    }

    async fn fetch(&self) -> Result<StoredRecord, KeyManagerError> {
        (**self).fetch().await
    }

    async fn update(&self, patch: RecordPatch) -> Result<(), KeyManagerError> {
        (**self).update(patch).await
    }

    async fn invalidate(&self) {
        (**self).invalidate().await;
    }
}

/// Context bound to an integration row, looked up by unique name.
pub struct IntegrationContext {
    store: Arc<dyn IntegrationStore>,
    kek: Kek,
    target: RecordTarget,
    cache: RwLock<Option<StoredRecord>>,
}

impl IntegrationContext {
    #[must_use]
    pub fn new(store: Arc<dyn IntegrationStore>, kek: Kek, integration_name: &str) -> Self {
        Self {
            store,
            kek,
            target: RecordTarget::Integration {
                name: integration_name.to_owned(),
            },
            cache: RwLock::new(None),
        }
    }

    /// The integration name this context looks up.
    #[must_use]
    pub fn integration_name(&self) -> &str {
        match &self.target {
            RecordTarget::Integration { name } | RecordTarget::Account { integration: name, .. } => {
                name
            }
        }
    }

    /// Return the cached integration row, fetching it on first use.
    ///
    /// # Errors
    ///
    /// - [`KeyManagerError::IntegrationNotFound`] if no row has this name.
    /// - [`KeyManagerError::Storage`] if the store fails.
    pub async fn get_integration(&self) -> Result<StoredRecord, KeyManagerError> {
        if let Some(record) = self.cache.read().await.as_ref() {
            return Ok(record.clone());
        }

        let name = self.integration_name();
        let record = self
            .store
            .find_integration_by_name(name)
            .await?
            .ok_or_else(|| KeyManagerError::IntegrationNotFound {
                name: name.to_owned(),
            })?;
        debug!(integration = %name, version = record.version, "fetched integration record");

        *self.cache.write().await = Some(record.clone());
        Ok(record)
    }

    /// Write the provided fields to the integration row, then drop the cache.
    ///
    /// # Errors
    ///
    /// - [`KeyManagerError::IntegrationNotFound`] if no row has this name.
    /// - [`KeyManagerError::Storage`] if the store fails or the version is stale.
    pub async fn update_integration(&self, patch: RecordPatch) -> Result<(), KeyManagerError> {
        let id = self.get_integration().await?.id;
        let result = self.store.update_integration(id, patch).await;
        // Invalidate even on failure: a conflict means the cached row is stale.
        self.invalidate().await;
        result?;
        debug!(integration = %self.integration_name(), "updated integration record");
        Ok(())
    }
}

impl fmt::Debug for IntegrationContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IntegrationContext")
            .field("target", &self.target)
            .finish_non_exhaustive()
    }
}

#[async_trait::async_trait]
impl RecordContext for IntegrationContext {
    const SCOPE: Scope = Scope::Integration;

    fn target(&self) -> &RecordTarget {
        &self.target
    }

    fn kek(&self) -> &Kek {
        &self.kek
    }

    async fn fetch(&self) -> Result<StoredRecord, KeyManagerError> {
        self.get_integration().await
    }

    async fn update(&self, patch: RecordPatch) -> Result<(), KeyManagerError> {
        self.update_integration(patch).await
    }

    async fn invalidate(&self) {
        *self.cache.write().await = None;
    }
}

/// Context bound to one tenant's account row on an integration.
///
/// Resolves the integration by name first, then the account by
/// `(tenant_id, integration_id)`. The integration context is shared so
/// account-level managers can read integration-level secrets.
pub struct AccountContext {
    store: Arc<dyn IntegrationStore>,
    kek: Kek,
    integration: Arc<IntegrationContext>,
    target: RecordTarget,
    cache: RwLock<Option<StoredRecord>>,
}

impl AccountContext {
    #[must_use]
    pub fn new(
        store: Arc<dyn IntegrationStore>,
        kek: Kek,
        tenant_id: &str,
        integration_name: &str,
    ) -> Self {
        let integration = Arc::new(IntegrationContext::new(
            Arc::clone(&store),
            kek.clone(),
            integration_name,
        ));
        Self {
            store,
            kek,
            integration,
            target: RecordTarget::Account {
                integration: integration_name.to_owned(),
                tenant_id: tenant_id.to_owned(),
            },
            cache: RwLock::new(None),
        }
    }

    /// The tenant this context is scoped to.
    #[must_use]
    pub fn tenant_id(&self) -> &str {
        match &self.target {
            RecordTarget::Account { tenant_id, .. } => tenant_id,
            RecordTarget::Integration { .. } => "",
        }
    }

    /// The context of the integration this account belongs to.
    #[must_use]
    pub fn integration_context(&self) -> Arc<IntegrationContext> {
        Arc::clone(&self.integration)
    }

    /// Return the integration row (cached), for cross-reading shared secrets.
    ///
    /// # Errors
    ///
    /// Same as [`IntegrationContext::get_integration`].
    pub async fn get_integration(&self) -> Result<StoredRecord, KeyManagerError> {
        self.integration.get_integration().await
    }

    /// Return the cached account row, fetching it on first use.
    ///
    /// # Errors
    ///
    /// - [`KeyManagerError::IntegrationNotFound`] if the integration does not exist.
    /// - [`KeyManagerError::AccountNotFound`] if the tenant has no account on it.
    /// - [`KeyManagerError::Storage`] if the store fails.
    pub async fn get_account(&self) -> Result<StoredRecord, KeyManagerError> {
        if let Some(record) = self.cache.read().await.as_ref() {
            return Ok(record.clone());
        }

        let integration = self.integration.get_integration().await?;
        let tenant_id = self.tenant_id();
        let record = self
            .store
            .find_account_by_tenant_and_integration(tenant_id, integration.id)
            .await?
            .ok_or_else(|| KeyManagerError::AccountNotFound {
                tenant_id: tenant_id.to_owned(),
                integration: self.integration.integration_name().to_owned(),
            })?;
        debug!(
            integration = %self.integration.integration_name(),
            tenant_id = %tenant_id,
            version = record.version,
            "fetched account record"
        );

        *self.cache.write().await = Some(record.clone());
        Ok(record)
    }

    /// Write the provided fields to the account row, then drop the cache.
    ///
    /// # Errors
    ///
    /// Same as [`get_account`](AccountContext::get_account), plus
    /// [`KeyManagerError::Storage`] if the write fails or the version is stale.
    pub async fn update_account(&self, patch: RecordPatch) -> Result<(), KeyManagerError> {
        let id = self.get_account().await?.id;
        let result = self.store.update_account(id, patch).await;
        self.invalidate().await;
        result?;
        debug!(
            integration = %self.integration.integration_name(),
            tenant_id = %self.tenant_id(),
            "updated account record"
        );
        Ok(())
    }
}

impl fmt::Debug for AccountContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccountContext")
            .field("target", &self.target)
            .finish_non_exhaustive()
    }
}

#[async_trait::async_trait]
impl RecordContext for AccountContext {
    const SCOPE: Scope = Scope::Account;

    fn target(&self) -> &RecordTarget {
        &self.target
    }

    fn kek(&self) -> &Kek {
        &self.kek
    }

    async fn fetch(&self) -> Result<StoredRecord, KeyManagerError> {
        self.get_account().await
    }

    async fn update(&self, patch: RecordPatch) -> Result<(), KeyManagerError> {
        self.update_account(patch).await
    }

    async fn invalidate(&self) {
        *self.cache.write().await = None;
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use sealkit_storage::{ConfigMap, MemoryStore, StorageError};

    fn kek() -> Kek {
        Kek::new("test-kek")
    }

    #[tokio::test]
    async fn missing_integration_is_reported_by_name() {
        let store = Arc::new(MemoryStore::new());
        let context = IntegrationContext::new(store, kek(), "github");

        let result = context.get_integration().await;
        assert!(matches!(
            result,
            Err(KeyManagerError::IntegrationNotFound { name }) if name == "github"
        ));
    }

    #[tokio::test]
    async fn integration_row_is_cached_until_update() {
        let store = MemoryStore::new();
        let slack = store.create_integration("slack").await.unwrap();
        let context = IntegrationContext::new(Arc::new(store.clone()), kek(), "slack");

        let first = context.get_integration().await.unwrap();
        assert_eq!(first.id, slack.id);

        // A write that bypasses the context is not observed while cached.
        store
            .update_integration(slack.id, RecordPatch::dek("outside".to_owned()))
            .await
            .unwrap();
        assert_eq!(context.get_integration().await.unwrap().dek, None);

        context
            .update_integration(RecordPatch::config(ConfigMap::new()))
            .await
            .unwrap();
        let refreshed = context.get_integration().await.unwrap();
        assert_eq!(refreshed.dek.as_deref(), Some("outside"));
        assert_eq!(refreshed.version, 2);
    }

    #[tokio::test]
    async fn explicit_invalidate_refetches() {
        let store = MemoryStore::new();
        let slack = store.create_integration("slack").await.unwrap();
        let context = IntegrationContext::new(Arc::new(store.clone()), kek(), "slack");
        context.get_integration().await.unwrap();

        store
            .update_integration(slack.id, RecordPatch::dek("outside".to_owned()))
            .await
            .unwrap();
        context.invalidate().await;

        assert_eq!(
            context.get_integration().await.unwrap().dek.as_deref(),
            Some("outside")
        );
    }

    #[tokio::test]
    async fn stale_update_invalidates_cache() {
        let store = MemoryStore::new();
        let slack = store.create_integration("slack").await.unwrap();
        let context = IntegrationContext::new(Arc::new(store.clone()), kek(), "slack");
        let cached = context.get_integration().await.unwrap();

        store
            .update_integration(slack.id, RecordPatch::dek("outside".to_owned()))
            .await
            .unwrap();
        let result = context
            .update_integration(RecordPatch::dek("mine".to_owned()).expecting(cached.version))
            .await;

        assert!(matches!(
            result,
            Err(KeyManagerError::Storage(StorageError::VersionConflict { .. }))
        ));
        assert_eq!(context.get_integration().await.unwrap().version, 1);
    }

    #[tokio::test]
    async fn account_lookup_requires_integration() {
        let store = Arc::new(MemoryStore::new());
        let context = AccountContext::new(store, kek(), "tenant-1", "slack");

        let result = context.get_account().await;
        assert!(matches!(
            result,
            Err(KeyManagerError::IntegrationNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn missing_account_is_reported_with_tenant() {
        let store = MemoryStore::new();
        store.create_integration("slack").await.unwrap();
        let context = AccountContext::new(Arc::new(store), kek(), "tenant-1", "slack");

        let result = context.get_account().await;
        assert!(matches!(
            result,
            Err(KeyManagerError::AccountNotFound { tenant_id, integration })
                if tenant_id == "tenant-1" && integration == "slack"
        ));
    }

    #[tokio::test]
    async fn account_update_targets_the_tenant_row() {
        let store = MemoryStore::new();
        let slack = store.create_integration("slack").await.unwrap();
        let mine = store.create_account("tenant-1", slack.id).await.unwrap();
        let theirs = store.create_account("tenant-2", slack.id).await.unwrap();
        let context = AccountContext::new(Arc::new(store.clone()), kek(), "tenant-1", "slack");

        context
            .update_account(RecordPatch::dek("wrapped".to_owned()))
            .await
            .unwrap();

        assert_eq!(
            store.account(mine.id).await.unwrap().dek.as_deref(),
            Some("wrapped")
        );
        assert_eq!(store.account(theirs.id).await.unwrap().dek, None);
        assert_eq!(context.get_integration().await.unwrap().id, slack.id);
    }

    #[test]
    fn target_display_names_the_row() {
        let account = RecordTarget::Account {
            integration: "slack".to_owned(),
            tenant_id: "t1".to_owned(),
        };
        assert_eq!(
            account.to_string(),
            "account for tenant 't1' on integration 'slack'"
        );
    }
}
