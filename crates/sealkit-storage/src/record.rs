//! Row types shared by every store implementation.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Field name → encrypted field value. Persisted as a JSON object.
pub type ConfigMap = BTreeMap<String, String>;

/// The slice of a row the key-lifecycle engine reads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredRecord {
    /// Row id.
    pub id: Uuid,
    /// Encrypted config fields (`iv:tag:ciphertext` per value).
    pub config: ConfigMap,
    /// KEK-wrapped DEK (`salt:iv:tag:ciphertext`), `None` if never initialized.
    pub dek: Option<String>,
    /// Optimistic concurrency token, bumped on every update.
    pub version: i64,
}

/// Partial update of a row. `None` fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordPatch {
    /// Replacement config map.
    pub config: Option<ConfigMap>,
    /// Replacement wrapped DEK.
    pub dek: Option<String>,
    /// Apply only if the stored version still equals this value.
    pub expected_version: Option<i64>,
}

impl RecordPatch {
    /// Patch that replaces only `config`.
    #[must_use]
    pub fn config(config: ConfigMap) -> Self {
        Self {
            config: Some(config),
            ..Self::default()
        }
    }

    /// Patch that replaces `config` and `dek` together.
    #[must_use]
    pub fn config_and_dek(config: ConfigMap, dek: String) -> Self {
        Self {
            config: Some(config),
            dek: Some(dek),
            expected_version: None,
        }
    }

    /// Patch that replaces only `dek`.
    #[must_use]
    pub fn dek(dek: String) -> Self {
        Self {
            dek: Some(dek),
            ..Self::default()
        }
    }

    /// Guard the patch with an optimistic version check.
    #[must_use]
    pub fn expecting(mut self, version: i64) -> Self {
        self.expected_version = Some(version);
        self
    }

    /// Whether the patch writes nothing besides the timestamps.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.config.is_none() && self.dek.is_none()
    }
}

/// A full `integrations` row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntegrationRecord {
    pub id: Uuid,
    /// Unique provider name (e.g. `slack`).
    pub name: String,
    pub config: ConfigMap,
    pub dek: Option<String>,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl IntegrationRecord {
    /// Project the columns the key-lifecycle engine reads.
    #[must_use]
    pub fn to_stored(&self) -> StoredRecord {
        StoredRecord {
            id: self.id,
            config: self.config.clone(),
            dek: self.dek.clone(),
            version: self.version,
        }
    }
}

/// A full `accounts` row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountRecord {
    pub id: Uuid,
    /// Application-defined tenant identifier.
    pub tenant_id: String,
    /// The integration this account belongs to.
    pub integration_id: Uuid,
    pub config: ConfigMap,
    pub dek: Option<String>,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl AccountRecord {
    /// Project the columns the key-lifecycle engine reads.
    #[must_use]
    pub fn to_stored(&self) -> StoredRecord {
        StoredRecord {
            id: self.id,
            config: self.config.clone(),
            dek: self.dek.clone(),
            version: self.version,
        }
    }
}

/// Apply a patch in place. Shared by the in-memory backend.
pub(crate) fn apply_patch(
    config: &mut ConfigMap,
    dek: &mut Option<String>,
    version: &mut i64,
    updated_at: &mut DateTime<Utc>,
    patch: RecordPatch,
) {
    if let Some(new_config) = patch.config {
        *config = new_config;
    }
    if let Some(new_dek) = patch.dek {
        *dek = Some(new_dek);
    }
    *version = version.saturating_add(1);
    *updated_at = Utc::now();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_patch_is_empty() {
        assert!(RecordPatch::default().is_empty());
        assert!(RecordPatch::default().expecting(3).is_empty());
        assert!(!RecordPatch::dek("x".to_owned()).is_empty());
    }

    #[test]
    fn apply_patch_leaves_absent_fields_untouched() {
        let mut config = ConfigMap::from([("a".to_owned(), "1".to_owned())]);
        let mut dek = Some("wrapped".to_owned());
        let mut version = 4;
        let mut updated_at = DateTime::<Utc>::MIN_UTC;

        apply_patch(
            &mut config,
            &mut dek,
            &mut version,
            &mut updated_at,
            RecordPatch::dek("rewrapped".to_owned()),
        );

        assert_eq!(config.get("a").map(String::as_str), Some("1"));
        assert_eq!(dek.as_deref(), Some("rewrapped"));
        assert_eq!(version, 5);
        assert!(updated_at > DateTime::<Utc>::MIN_UTC);
    }
}
