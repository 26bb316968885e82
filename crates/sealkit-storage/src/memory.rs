//! In-memory store for testing and local development.
//!
//! Both tables live in `BTreeMap`s behind a single `RwLock`, so every update
//! (including the version check) is atomic. Nothing is persisted; all data
//! is lost when the process exits.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::record::apply_patch;
use crate::{
    AccountRecord, ConfigMap, IntegrationRecord, IntegrationStore, RecordPatch, StorageError,
    StoredRecord,
};

const INTEGRATIONS: &str = "integrations";
const ACCOUNTS: &str = "accounts";

#[derive(Debug, Default)]
struct Tables {
    integrations: BTreeMap<Uuid, IntegrationRecord>,
    accounts: BTreeMap<Uuid, AccountRecord>,
}

/// An in-memory [`IntegrationStore`].
///
/// Cloning is cheap and clones share state, which lets a test keep a handle
/// for inspection while the same store is passed to key managers.
///
/// # Examples
///
/// ```
/// # use sealkit_storage::{IntegrationStore, MemoryStore};
/// # #[tokio::main]
/// # async fn main() {
/// let store = MemoryStore::new();
/// let slack = store.create_integration("slack").await.unwrap();
/// let found = store.find_integration_by_name("slack").await.unwrap();
/// assert_eq!(found.map(|r| r.id), Some(slack.id));
/// # }
/// ```
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    tables: Arc<RwLock<Tables>>,
}

impl MemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Provision an integration row with an empty config and no DEK.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Duplicate`] if the name is already taken.
    pub async fn create_integration(&self, name: &str) -> Result<IntegrationRecord, StorageError> {
        let mut tables = self.tables.write().await;
        if tables.integrations.values().any(|r| r.name == name) {
            return Err(StorageError::Duplicate {
                table: INTEGRATIONS,
                reason: format!("name '{name}' already exists"),
            });
        }

        let now = Utc::now();
        let record = IntegrationRecord {
            id: Uuid::new_v4(),
            name: name.to_owned(),
            config: ConfigMap::new(),
            dek: None,
            version: 0,
            created_at: now,
            updated_at: now,
        };
        tables.integrations.insert(record.id, record.clone());
        Ok(record)
    }

    /// Provision an account row for `tenant_id` on an existing integration.
    ///
    /// # Errors
    ///
    /// - [`StorageError::NotFound`] if the integration does not exist.
    /// - [`StorageError::Duplicate`] if the tenant already has an account on it.
    pub async fn create_account(
        &self,
        tenant_id: &str,
        integration_id: Uuid,
    ) -> Result<AccountRecord, StorageError> {
        let mut tables = self.tables.write().await;
        if !tables.integrations.contains_key(&integration_id) {
            return Err(StorageError::NotFound {
                table: INTEGRATIONS,
                id: integration_id,
            });
        }
        if tables
            .accounts
            .values()
            .any(|r| r.tenant_id == tenant_id && r.integration_id == integration_id)
        {
            return Err(StorageError::Duplicate {
                table: ACCOUNTS,
                reason: format!("tenant '{tenant_id}' already has an account on {integration_id}"),
            });
        }

        let now = Utc::now();
        let record = AccountRecord {
            id: Uuid::new_v4(),
            tenant_id: tenant_id.to_owned(),
            integration_id,
            config: ConfigMap::new(),
            dek: None,
            version: 0,
            created_at: now,
            updated_at: now,
        };
        tables.accounts.insert(record.id, record.clone());
        Ok(record)
    }

    /// Snapshot of a full integration row.
    pub async fn integration(&self, id: Uuid) -> Option<IntegrationRecord> {
        self.tables.read().await.integrations.get(&id).cloned()
    }

    /// Snapshot of a full account row.
    pub async fn account(&self, id: Uuid) -> Option<AccountRecord> {
        self.tables.read().await.accounts.get(&id).cloned()
    }
}

fn check_version(
    table: &'static str,
    id: Uuid,
    expected: Option<i64>,
    actual: i64,
) -> Result<(), StorageError> {
    match expected {
        Some(expected) if expected != actual => Err(StorageError::VersionConflict {
            table,
            id,
            expected,
            actual,
        }),
        _ => Ok(()),
    }
}

#[async_trait::async_trait]
impl IntegrationStore for MemoryStore {
    async fn find_integration_by_name(
        &self,
        name: &str,
    ) -> Result<Option<StoredRecord>, StorageError> {
        let tables = self.tables.read().await;
        Ok(tables
            .integrations
            .values()
            .find(|r| r.name == name)
            .map(IntegrationRecord::to_stored))
    }

    async fn update_integration(&self, id: Uuid, patch: RecordPatch) -> Result<(), StorageError> {
        let mut tables = self.tables.write().await;
        let row = tables
            .integrations
            .get_mut(&id)
            .ok_or(StorageError::NotFound {
                table: INTEGRATIONS,
                id,
            })?;
        check_version(INTEGRATIONS, id, patch.expected_version, row.version)?;
        apply_patch(
            &mut row.config,
            &mut row.dek,
            &mut row.version,
            &mut row.updated_at,
            patch,
        );
        Ok(())
    }

    async fn find_account_by_tenant_and_integration(
        &self,
        tenant_id: &str,
        integration_id: Uuid,
    ) -> Result<Option<StoredRecord>, StorageError> {
        let tables = self.tables.read().await;
        Ok(tables
            .accounts
            .values()
            .find(|r| r.tenant_id == tenant_id && r.integration_id == integration_id)
            .map(AccountRecord::to_stored))
    }

    async fn update_account(&self, id: Uuid, patch: RecordPatch) -> Result<(), StorageError> {
        let mut tables = self.tables.write().await;
        let row = tables.accounts.get_mut(&id).ok_or(StorageError::NotFound {
            table: ACCOUNTS,
            id,
        })?;
        check_version(ACCOUNTS, id, patch.expected_version, row.version)?;
        apply_patch(
            &mut row.config,
            &mut row.dek,
            &mut row.version,
            &mut row.updated_at,
            patch,
        );
        Ok(())
    }
}
