//! Entry point: a configured handle that hands out key managers.
//!
//! A [`KeyManagerHandle`] holds the storage collaborator, the KEK, the field
//! schema, and manager options. It is built once at startup; managers it
//! creates are cheap and meant to be short-lived (one request or session),
//! because each one caches its row.
//!
//! Creating a manager does no I/O. Missing rows surface on first use.

use std::sync::Arc;

use sealkit_storage::IntegrationStore;
use tracing::info;

use crate::cipher::{Dek, Kek};
use crate::context::{AccountContext, IntegrationContext};
use crate::error::{KeyManagerError, SchemaError};
use crate::manager::{
    ApiKeyAccountKeyManager, ApiKeyIntegrationKeyManager, BotTokenAccountKeyManager,
    BotTokenIntegrationKeyManager, FromKeyCore, KeyCore, ManagerOptions, OAuth2AccountKeyManager,
    OAuth2IntegrationKeyManager,
};
use crate::schema::{AuthType, FieldSchema, ManagedFields};

/// Builder for [`KeyManagerHandle`].
#[derive(Default)]
pub struct KeyManagerSettings {
    store: Option<Arc<dyn IntegrationStore>>,
    kek: Option<Kek>,
    schema: FieldSchema,
    options: ManagerOptions,
}

impl KeyManagerSettings {
    #[must_use]
    pub fn store(mut self, store: Arc<dyn IntegrationStore>) -> Self {
        self.store = Some(store);
        self
    }

    #[must_use]
    pub fn kek(mut self, kek: Kek) -> Self {
        self.kek = Some(kek);
        self
    }

    /// Field schema used to validate plugin managers.
    #[must_use]
    pub fn schema(mut self, schema: FieldSchema) -> Self {
        self.schema = schema;
        self
    }

    #[must_use]
    pub fn options(mut self, options: ManagerOptions) -> Self {
        self.options = options;
        self
    }

    /// Finish configuration.
    ///
    /// # Errors
    ///
    /// Returns [`KeyManagerError::MissingConfiguration`] listing `"storage"`
    /// and/or `"kek"` if either was not provided (an empty KEK counts as
    /// missing).
    pub fn build(self) -> Result<KeyManagerHandle, KeyManagerError> {
        let kek = self.kek.filter(|kek| !kek.is_empty());
        match (self.store, kek) {
            (Some(store), Some(kek)) => Ok(KeyManagerHandle {
                store,
                kek,
                schema: self.schema,
                options: self.options,
            }),
            (store, kek) => {
                let mut missing = Vec::new();
                if store.is_none() {
                    missing.push("storage");
                }
                if kek.is_none() {
                    missing.push("kek");
                }
                Err(KeyManagerError::MissingConfiguration { missing })
            }
        }
    }
}

impl std::fmt::Debug for KeyManagerSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyManagerSettings")
            .field("store", &self.store.as_ref().map(|_| "..."))
            .field("kek", &self.kek)
            .field("schema", &self.schema)
            .field("options", &self.options)
            .finish()
    }
}

/// Configured factory for key managers and DEK initializers.
#[derive(Clone)]
pub struct KeyManagerHandle {
    store: Arc<dyn IntegrationStore>,
    kek: Kek,
    schema: FieldSchema,
    options: ManagerOptions,
}

impl KeyManagerHandle {
    #[must_use]
    pub fn builder() -> KeyManagerSettings {
        KeyManagerSettings::default()
    }

    #[must_use]
    pub fn schema(&self) -> &FieldSchema {
        &self.schema
    }

    /// The integration-level manager for `auth_type`.
    #[must_use]
    pub fn integration(&self, auth_type: AuthType, integration_name: &str) -> IntegrationKeyManager {
        let core = self.integration_core(integration_name);
        match auth_type {
            AuthType::OAuth2 => {
                IntegrationKeyManager::OAuth2(OAuth2IntegrationKeyManager::from_core(core))
            }
            AuthType::ApiKey => {
                IntegrationKeyManager::ApiKey(ApiKeyIntegrationKeyManager::from_core(core))
            }
            AuthType::BotToken => {
                IntegrationKeyManager::BotToken(BotTokenIntegrationKeyManager::from_core(core))
            }
        }
    }

    /// The account-level manager for `auth_type`.
    #[must_use]
    pub fn account(
        &self,
        auth_type: AuthType,
        integration_name: &str,
        tenant_id: &str,
    ) -> AccountKeyManager {
        let core = self.account_core(integration_name, tenant_id);
        match auth_type {
            AuthType::OAuth2 => AccountKeyManager::OAuth2(OAuth2AccountKeyManager::from_core(core)),
            AuthType::ApiKey => AccountKeyManager::ApiKey(ApiKeyAccountKeyManager::from_core(core)),
            AuthType::BotToken => {
                AccountKeyManager::BotToken(BotTokenAccountKeyManager::from_core(core))
            }
        }
    }

    /// Build a plugin manager over an integration row.
    ///
    /// # Errors
    ///
    /// Returns a [`SchemaError`] if `M` does not expose exactly the effective
    /// fields of its auth type at integration scope.
    pub fn build_integration<M>(&self, integration_name: &str) -> Result<M, SchemaError>
    where
        M: ManagedFields + FromKeyCore<Context = IntegrationContext>,
    {
        self.schema.validate::<M>()?;
        Ok(M::from_core(self.integration_core(integration_name)))
    }

    /// Build a plugin manager over a tenant's account row.
    ///
    /// # Errors
    ///
    /// Same as [`build_integration`](KeyManagerHandle::build_integration).
    pub fn build_account<M>(&self, integration_name: &str, tenant_id: &str) -> Result<M, SchemaError>
    where
        M: ManagedFields + FromKeyCore<Context = AccountContext>,
    {
        self.schema.validate::<M>()?;
        Ok(M::from_core(self.account_core(integration_name, tenant_id)))
    }

    /// Give an existing integration its first DEK (or rotate an existing one).
    ///
    /// # Errors
    ///
    /// [`KeyManagerError::IntegrationNotFound`] if the row does not exist,
    /// otherwise as [`KeyCore::issue_new_dek`].
    pub async fn initialize_integration_dek(
        &self,
        integration_name: &str,
    ) -> Result<Dek, KeyManagerError> {
        let dek = self.integration_core(integration_name).issue_new_dek().await?;
        info!(integration = %integration_name, "initialized integration DEK");
        Ok(dek)
    }

    /// Give an existing account its first DEK (or rotate an existing one).
    ///
    /// # Errors
    ///
    /// [`KeyManagerError::IntegrationNotFound`] or
    /// [`KeyManagerError::AccountNotFound`] if either row does not exist,
    /// otherwise as [`KeyCore::issue_new_dek`].
    pub async fn initialize_account_dek(
        &self,
        integration_name: &str,
        tenant_id: &str,
    ) -> Result<Dek, KeyManagerError> {
        let dek = self
            .account_core(integration_name, tenant_id)
            .issue_new_dek()
            .await?;
        info!(integration = %integration_name, tenant_id = %tenant_id, "initialized account DEK");
        Ok(dek)
    }

    /// Re-wrap an integration's DEK under `new_kek` without touching its config.
    ///
    /// # Errors
    ///
    /// As [`KeyCore::rewrap_kek`].
    pub async fn rewrap_integration_kek(
        &self,
        integration_name: &str,
        new_kek: &Kek,
    ) -> Result<(), KeyManagerError> {
        self.integration_core(integration_name)
            .rewrap_kek(new_kek)
            .await
    }

    /// Re-wrap an account's DEK under `new_kek` without touching its config.
    ///
    /// # Errors
    ///
    /// As [`KeyCore::rewrap_kek`].
    pub async fn rewrap_account_kek(
        &self,
        integration_name: &str,
        tenant_id: &str,
        new_kek: &Kek,
    ) -> Result<(), KeyManagerError> {
        self.account_core(integration_name, tenant_id)
            .rewrap_kek(new_kek)
            .await
    }

    fn integration_core(&self, integration_name: &str) -> KeyCore<IntegrationContext> {
        KeyCore::new(
            IntegrationContext::new(Arc::clone(&self.store), self.kek.clone(), integration_name),
            self.options.clone(),
        )
    }

    fn account_core(&self, integration_name: &str, tenant_id: &str) -> KeyCore<AccountContext> {
        KeyCore::new(
            AccountContext::new(
                Arc::clone(&self.store),
                self.kek.clone(),
                tenant_id,
                integration_name,
            ),
            self.options.clone(),
        )
    }
}

impl std::fmt::Debug for KeyManagerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyManagerHandle")
            .field("kek", &self.kek)
            .field("schema", &self.schema)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

/// An integration-level manager of any built-in auth type.
#[derive(Debug)]
pub enum IntegrationKeyManager {
    OAuth2(OAuth2IntegrationKeyManager),
    ApiKey(ApiKeyIntegrationKeyManager),
    BotToken(BotTokenIntegrationKeyManager),
}

/// An account-level manager of any built-in auth type.
#[derive(Debug)]
pub enum AccountKeyManager {
    OAuth2(OAuth2AccountKeyManager),
    ApiKey(ApiKeyAccountKeyManager),
    BotToken(BotTokenAccountKeyManager),
}

/// Run the same call on whichever variant is inside.
macro_rules! dispatch {
    ($value:expr, $manager:ident => $body:expr) => {
        match $value {
            Self::OAuth2($manager) => $body,
            Self::ApiKey($manager) => $body,
            Self::BotToken($manager) => $body,
        }
    };
}

impl IntegrationKeyManager {
    #[must_use]
    pub fn auth_type(&self) -> AuthType {
        match self {
            Self::OAuth2(_) => AuthType::OAuth2,
            Self::ApiKey(_) => AuthType::ApiKey,
            Self::BotToken(_) => AuthType::BotToken,
        }
    }

    /// # Errors
    ///
    /// As [`KeyCore::get_dek`].
    pub async fn get_dek(&self) -> Result<Dek, KeyManagerError> {
        dispatch!(self, m => m.get_dek().await)
    }

    /// # Errors
    ///
    /// As [`KeyCore::issue_new_dek`].
    pub async fn issue_new_dek(&self) -> Result<Dek, KeyManagerError> {
        dispatch!(self, m => m.issue_new_dek().await)
    }

    #[must_use]
    pub fn as_oauth2(&self) -> Option<&OAuth2IntegrationKeyManager> {
        match self {
            Self::OAuth2(m) => Some(m),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_api_key(&self) -> Option<&ApiKeyIntegrationKeyManager> {
        match self {
            Self::ApiKey(m) => Some(m),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_bot_token(&self) -> Option<&BotTokenIntegrationKeyManager> {
        match self {
            Self::BotToken(m) => Some(m),
            _ => None,
        }
    }
}

impl AccountKeyManager {
    #[must_use]
    pub fn auth_type(&self) -> AuthType {
        match self {
            Self::OAuth2(_) => AuthType::OAuth2,
            Self::ApiKey(_) => AuthType::ApiKey,
            Self::BotToken(_) => AuthType::BotToken,
        }
    }

    /// # Errors
    ///
    /// As [`KeyCore::get_dek`].
    pub async fn get_dek(&self) -> Result<Dek, KeyManagerError> {
        dispatch!(self, m => m.get_dek().await)
    }

    /// # Errors
    ///
    /// As [`KeyCore::issue_new_dek`].
    pub async fn issue_new_dek(&self) -> Result<Dek, KeyManagerError> {
        dispatch!(self, m => m.issue_new_dek().await)
    }

    /// Decrypt `webhook_signature`, which every account type carries.
    ///
    /// # Errors
    ///
    /// As [`KeyCore::get_field`].
    pub async fn get_webhook_signature(&self) -> Result<Option<String>, KeyManagerError> {
        dispatch!(self, m => m.get_webhook_signature().await)
    }

    /// Set or clear `webhook_signature`.
    ///
    /// # Errors
    ///
    /// As [`KeyCore::set_field`].
    pub async fn set_webhook_signature(&self, value: Option<&str>) -> Result<(), KeyManagerError> {
        dispatch!(self, m => m.set_webhook_signature(value).await)
    }

    #[must_use]
    pub fn as_oauth2(&self) -> Option<&OAuth2AccountKeyManager> {
        match self {
            Self::OAuth2(m) => Some(m),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_api_key(&self) -> Option<&ApiKeyAccountKeyManager> {
        match self {
            Self::ApiKey(m) => Some(m),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_bot_token(&self) -> Option<&BotTokenAccountKeyManager> {
        match self {
            Self::BotToken(m) => Some(m),
            _ => None,
        }
    }
}

fn handle(store: Arc<dyn IntegrationStore>, kek: Kek) -> Result<KeyManagerHandle, KeyManagerError> {
    KeyManagerHandle::builder().store(store).kek(kek).build()
}

/// Create an integration-level manager for an auth type given by name.
///
/// # Errors
///
/// - [`SchemaError::UnknownAuthType`] (as [`KeyManagerError::Schema`]).
/// - [`KeyManagerError::MissingConfiguration`] if `kek` is empty.
pub fn create_integration_key_manager(
    auth_type: &str,
    integration_name: &str,
    kek: Kek,
    store: Arc<dyn IntegrationStore>,
) -> Result<IntegrationKeyManager, KeyManagerError> {
    let auth_type: AuthType = auth_type.parse()?;
    Ok(handle(store, kek)?.integration(auth_type, integration_name))
}

/// Create an account-level manager for an auth type given by name.
///
/// # Errors
///
/// Same as [`create_integration_key_manager`].
pub fn create_account_key_manager(
    auth_type: &str,
    integration_name: &str,
    tenant_id: &str,
    kek: Kek,
    store: Arc<dyn IntegrationStore>,
) -> Result<AccountKeyManager, KeyManagerError> {
    let auth_type: AuthType = auth_type.parse()?;
    Ok(handle(store, kek)?.account(auth_type, integration_name, tenant_id))
}

/// Give an existing integration its first DEK.
///
/// # Errors
///
/// As [`KeyManagerHandle::initialize_integration_dek`].
pub async fn initialize_integration_dek(
    store: Arc<dyn IntegrationStore>,
    integration_name: &str,
    kek: Kek,
) -> Result<Dek, KeyManagerError> {
    handle(store, kek)?
        .initialize_integration_dek(integration_name)
        .await
}

/// Give an existing account its first DEK.
///
/// # Errors
///
/// As [`KeyManagerHandle::initialize_account_dek`].
pub async fn initialize_account_dek(
    store: Arc<dyn IntegrationStore>,
    integration_name: &str,
    tenant_id: &str,
    kek: Kek,
) -> Result<Dek, KeyManagerError> {
    handle(store, kek)?
        .initialize_account_dek(integration_name, tenant_id)
        .await
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use sealkit_storage::MemoryStore;

    use super::*;

    fn store() -> Arc<dyn IntegrationStore> {
        Arc::new(MemoryStore::new())
    }

    #[test]
    fn build_reports_everything_missing() {
        let err = KeyManagerHandle::builder().build().unwrap_err();
        assert!(matches!(
            err,
            KeyManagerError::MissingConfiguration { ref missing } if missing == &["storage", "kek"]
        ));

        let err = KeyManagerHandle::builder()
            .store(store())
            .kek(Kek::new(""))
            .build()
            .unwrap_err();
        assert!(matches!(
            err,
            KeyManagerError::MissingConfiguration { ref missing } if missing == &["kek"]
        ));
    }

    #[test]
    fn manager_variant_follows_auth_type() {
        let handle = KeyManagerHandle::builder()
            .store(store())
            .kek(Kek::new("k"))
            .build()
            .unwrap();

        for auth_type in AuthType::ALL {
            assert_eq!(handle.integration(auth_type, "x").auth_type(), auth_type);
            assert_eq!(handle.account(auth_type, "x", "t").auth_type(), auth_type);
        }
        assert!(handle.account(AuthType::ApiKey, "x", "t").as_api_key().is_some());
        assert!(handle.account(AuthType::ApiKey, "x", "t").as_oauth2().is_none());
        assert!(handle.integration(AuthType::OAuth2, "x").as_oauth2().is_some());
        assert!(handle.integration(AuthType::BotToken, "x").as_bot_token().is_some());
    }

    #[test]
    fn unknown_auth_type_is_rejected() {
        let err = create_integration_key_manager("saml", "x", Kek::new("k"), store()).unwrap_err();
        assert!(matches!(
            err,
            KeyManagerError::Schema(SchemaError::UnknownAuthType { ref auth_type }) if auth_type == "saml"
        ));
    }

    #[tokio::test]
    async fn initializing_missing_rows_fails() {
        let err = initialize_integration_dek(store(), "ghost", Kek::new("k"))
            .await
            .unwrap_err();
        assert!(matches!(err, KeyManagerError::IntegrationNotFound { .. }));

        let memory = MemoryStore::new();
        memory.create_integration("slack").await.unwrap();
        let err = initialize_account_dek(Arc::new(memory), "slack", "t1", Kek::new("k"))
            .await
            .unwrap_err();
        assert!(matches!(err, KeyManagerError::AccountNotFound { .. }));
    }
}
