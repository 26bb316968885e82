//! Key managers: typed secret accessors over one encrypted row.
//!
//! [`KeyCore`] owns the DEK lifecycle of a single record context: lazy DEK
//! unwrap, rotation, and per-field read-modify-write. Concrete managers are
//! thin wrappers generated by [`key_manager!`](crate::key_manager), one per
//! (auth type, scope) pair, with a `get_`/`set_` pair per field.
//!
//! # Concurrency
//!
//! Every write carries the version of the row it was computed from. If
//! another writer got there first the store rejects the write; the core then
//! drops its caches, re-reads, and re-applies the single change, up to
//! [`ManagerOptions::max_update_retries`] times. Two managers setting
//! different fields on the same row therefore never lose each other's
//! writes, and a rotation never strands config under a discarded DEK.
//!
//! # Security model
//!
//! - The plaintext DEK is cached in memory only, keyed by the wrapped value
//!   it came from, and zeroized on drop.
//! - scrypt runs on the blocking pool so a rotation or first read does not
//!   stall the async runtime.
//! - Field values never appear in logs or errors; only field names do.

mod variants;

pub use variants::{
    ApiKeyAccountKeyManager, ApiKeyIntegrationKeyManager, BotTokenAccountKeyManager,
    BotTokenIntegrationKeyManager, IntegrationCredentials, OAuth2AccountKeyManager,
    OAuth2IntegrationKeyManager,
};

use sealkit_storage::{ConfigMap, RecordPatch, StorageError, StoredRecord};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::cipher::{self, Dek, Kek};
use crate::codec::{decrypt_config, encrypt_config, re_encrypt_config};
use crate::context::RecordContext;
use crate::error::KeyManagerError;

/// Default number of re-read/re-apply attempts after a version conflict.
pub const DEFAULT_UPDATE_RETRIES: u32 = 3;

/// Tunables shared by every manager a handle creates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagerOptions {
    /// Retries after the first attempt when a write hits a version conflict.
    pub max_update_retries: u32,
}

impl Default for ManagerOptions {
    fn default() -> Self {
        Self {
            max_update_retries: DEFAULT_UPDATE_RETRIES,
        }
    }
}

/// Construction hook used by the handle to build typed managers.
pub trait FromKeyCore: Sized {
    type Context: RecordContext;

    fn from_core(core: KeyCore<Self::Context>) -> Self;
}

/// DEK lifecycle and field access for one record context.
pub struct KeyCore<C> {
    context: C,
    options: ManagerOptions,
    /// `(wrapped, plaintext)`; valid only while the row still stores `wrapped`.
    dek: RwLock<Option<(String, Dek)>>,
}

impl<C: RecordContext> KeyCore<C> {
    #[must_use]
    pub fn new(context: C, options: ManagerOptions) -> Self {
        Self {
            context,
            options,
            dek: RwLock::new(None),
        }
    }

    #[must_use]
    pub fn context(&self) -> &C {
        &self.context
    }

    #[must_use]
    pub fn options(&self) -> &ManagerOptions {
        &self.options
    }

    /// Return the plaintext DEK of the row.
    ///
    /// # Errors
    ///
    /// - [`KeyManagerError::DekNotInitialized`] if the row has no DEK yet.
    /// - [`KeyManagerError::Cipher`] if the stored DEK cannot be unwrapped
    ///   with this KEK.
    /// - Any lookup error of the context.
    pub async fn get_dek(&self) -> Result<Dek, KeyManagerError> {
        let record = self.context.fetch().await?;
        self.dek_for(&record).await
    }

    /// Generate a fresh DEK, move the row's config onto it, and store both.
    ///
    /// A row without a DEK starts from an empty config. Config and wrapped
    /// DEK are written in one update.
    ///
    /// # Errors
    ///
    /// - [`KeyManagerError::Conflict`] if the row kept changing.
    /// - [`KeyManagerError::Cipher`] if the current config cannot be
    ///   decrypted with the current DEK.
    /// - Any lookup or storage error of the context.
    pub async fn issue_new_dek(&self) -> Result<Dek, KeyManagerError> {
        for attempt in 0..=self.options.max_update_retries {
            let record = self.context.fetch().await?;
            let new_dek = cipher::generate_dek();

            let config = if record.dek.is_some() {
                let old_dek = self.dek_for(&record).await?;
                re_encrypt_config(&record.config, &old_dek, &new_dek)?
            } else {
                ConfigMap::new()
            };
            let wrapped = wrap_dek(&new_dek, self.context.kek()).await?;

            let patch = RecordPatch::config_and_dek(config, wrapped.clone()).expecting(record.version);
            match self.context.update(patch).await {
                Ok(()) => {
                    *self.dek.write().await = Some((wrapped, new_dek.clone()));
                    info!(
                        target_row = %self.context.target(),
                        rotated = record.dek.is_some(),
                        fields = record.config.len(),
                        "issued new data encryption key"
                    );
                    return Ok(new_dek);
                }
                Err(e) if is_version_conflict(&e) => self.retrying(attempt).await,
                Err(e) => return Err(e),
            }
        }
        Err(self.conflict())
    }

    /// Replace the stored wrapped DEK with one wrapped under `new_kek`.
    ///
    /// The DEK itself and the encrypted config are unchanged.
    ///
    /// # Errors
    ///
    /// - [`KeyManagerError::DekNotInitialized`] if the row has no DEK.
    /// - [`KeyManagerError::Cipher`] if the current KEK cannot unwrap it.
    /// - [`KeyManagerError::Conflict`] if the row kept changing.
    pub async fn rewrap_kek(&self, new_kek: &Kek) -> Result<(), KeyManagerError> {
        for attempt in 0..=self.options.max_update_retries {
            let record = self.context.fetch().await?;
            let dek = self.dek_for(&record).await?;
            let wrapped = wrap_dek(&dek, new_kek).await?;

            match self
                .context
                .update(RecordPatch::dek(wrapped).expecting(record.version))
                .await
            {
                Ok(()) => {
                    // The cached DEK is still right but no longer matches the row.
                    *self.dek.write().await = None;
                    info!(target_row = %self.context.target(), "re-wrapped data encryption key");
                    return Ok(());
                }
                Err(e) if is_version_conflict(&e) => self.retrying(attempt).await,
                Err(e) => return Err(e),
            }
        }
        Err(self.conflict())
    }

    /// Decrypt and return the whole config of the row.
    ///
    /// # Errors
    ///
    /// Same as [`get_dek`](KeyCore::get_dek), plus [`KeyManagerError::Cipher`]
    /// if any field fails to decrypt.
    pub async fn read_config(&self) -> Result<ConfigMap, KeyManagerError> {
        let record = self.context.fetch().await?;
        let dek = self.dek_for(&record).await?;
        Ok(decrypt_config(&record.config, &dek)?)
    }

    /// Decrypt one field, `None` if it is not set.
    ///
    /// # Errors
    ///
    /// Same as [`read_config`](KeyCore::read_config).
    pub async fn get_field(&self, field: &str) -> Result<Option<String>, KeyManagerError> {
        let mut config = self.read_config().await?;
        Ok(config.remove(field))
    }

    /// Set one field, or remove it with `None`, leaving all others intact.
    ///
    /// # Errors
    ///
    /// Same as [`read_config`](KeyCore::read_config), plus
    /// [`KeyManagerError::Conflict`] if the row kept changing.
    pub async fn set_field(&self, field: &str, value: Option<&str>) -> Result<(), KeyManagerError> {
        for attempt in 0..=self.options.max_update_retries {
            let record = self.context.fetch().await?;
            let dek = self.dek_for(&record).await?;
            let mut config = decrypt_config(&record.config, &dek)?;

            match value {
                Some(value) => {
                    config.insert(field.to_owned(), value.to_owned());
                }
                None => {
                    if config.remove(field).is_none() {
                        return Ok(());
                    }
                }
            }

            let patch = RecordPatch::config(encrypt_config(&config, &dek)?).expecting(record.version);
            match self.context.update(patch).await {
                Ok(()) => {
                    debug!(
                        target_row = %self.context.target(),
                        field,
                        cleared = value.is_none(),
                        "updated config field"
                    );
                    return Ok(());
                }
                Err(e) if is_version_conflict(&e) => self.retrying(attempt).await,
                Err(e) => return Err(e),
            }
        }
        Err(self.conflict())
    }

    /// Drop the cached row and DEK so the next call re-reads storage.
    pub async fn invalidate(&self) {
        self.context.invalidate().await;
        *self.dek.write().await = None;
    }

    async fn dek_for(&self, record: &StoredRecord) -> Result<Dek, KeyManagerError> {
        let wrapped = record
            .dek
            .as_deref()
            .ok_or_else(|| KeyManagerError::DekNotInitialized {
                target: self.context.target().to_string(),
            })?;

        if let Some((cached_wrapped, dek)) = self.dek.read().await.as_ref() {
            if cached_wrapped == wrapped {
                return Ok(dek.clone());
            }
        }

        let dek = unwrap_dek(wrapped, self.context.kek()).await?;
        *self.dek.write().await = Some((wrapped.to_owned(), dek.clone()));
        Ok(dek)
    }

    async fn retrying(&self, attempt: u32) {
        warn!(
            target_row = %self.context.target(),
            attempt = attempt + 1,
            "row changed concurrently, re-reading"
        );
        self.invalidate().await;
    }

    fn conflict(&self) -> KeyManagerError {
        KeyManagerError::Conflict {
            target: self.context.target().to_string(),
            attempts: self.options.max_update_retries + 1,
        }
    }
}

impl<C: RecordContext> std::fmt::Debug for KeyCore<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyCore")
            .field("target", self.context.target())
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

fn is_version_conflict(err: &KeyManagerError) -> bool {
    matches!(
        err,
        KeyManagerError::Storage(StorageError::VersionConflict { .. })
    )
}

/// Wrap `dek` under `kek` on the blocking pool.
pub(crate) async fn wrap_dek(dek: &Dek, kek: &Kek) -> Result<String, KeyManagerError> {
    let (dek, kek) = (dek.clone(), kek.clone());
    tokio::task::spawn_blocking(move || cipher::encrypt_dek(&dek, &kek))
        .await
        .map_err(|e| KeyManagerError::Internal {
            reason: format!("DEK wrap task failed: {e}"),
        })?
        .map_err(KeyManagerError::from)
}

/// Unwrap a stored DEK on the blocking pool.
pub(crate) async fn unwrap_dek(wrapped: &str, kek: &Kek) -> Result<Dek, KeyManagerError> {
    let (wrapped, kek) = (wrapped.to_owned(), kek.clone());
    tokio::task::spawn_blocking(move || cipher::decrypt_dek(&wrapped, &kek))
        .await
        .map_err(|e| KeyManagerError::Internal {
            reason: format!("DEK unwrap task failed: {e}"),
        })?
        .map_err(KeyManagerError::from)
}

/// Define a key manager type over a [`KeyCore`].
///
/// Each `field => getter / setter` entry becomes an async
/// `getter(&self) -> Result<Option<String>, KeyManagerError>` and
/// `setter(&self, Option<&str>) -> Result<(), KeyManagerError>` pair. The
/// generated type also implements [`ManagedFields`](crate::schema::ManagedFields),
/// which [`KeyManagerHandle`](crate::KeyManagerHandle) checks against the
/// field schema before handing out plugin managers.
///
/// ```ignore
/// sealkit_core::key_manager! {
///     /// Slack accounts with an extra team id.
///     pub struct SlackAccountKeyManager(BotToken, sealkit_core::AccountContext) {
///         bot_token => get_bot_token / set_bot_token,
///         webhook_signature => get_webhook_signature / set_webhook_signature,
///         team_id => get_team_id / set_team_id,
///     }
/// }
/// ```
///
/// The `@accessors` form adds the methods to a hand-written struct that has
/// a `core: KeyCore<_>` field.
#[macro_export]
macro_rules! key_manager {
    (
        @accessors $name:ident($auth:ident, $ctx:ty) {
            $( $field:ident => $getter:ident / $setter:ident ),* $(,)?
        }
    ) => {
        impl $crate::schema::ManagedFields for $name {
            const NAME: &'static str = stringify!($name);
            const AUTH_TYPE: $crate::schema::AuthType = $crate::schema::AuthType::$auth;
            const SCOPE: $crate::schema::Scope =
                <$ctx as $crate::context::RecordContext>::SCOPE;
            const FIELDS: &'static [&'static str] = &[$(stringify!($field)),*];
        }

        impl $name {
            /// The underlying key core.
            #[must_use]
            pub fn core(&self) -> &$crate::manager::KeyCore<$ctx> {
                &self.core
            }

            /// Return the plaintext DEK of the row.
            ///
            /// # Errors
            ///
            /// See `KeyCore::get_dek`.
            pub async fn get_dek(&self) -> Result<$crate::cipher::Dek, $crate::error::KeyManagerError> {
                self.core.get_dek().await
            }

            /// Rotate to a fresh DEK, re-encrypting the row's config.
            ///
            /// # Errors
            ///
            /// See `KeyCore::issue_new_dek`.
            pub async fn issue_new_dek(&self) -> Result<$crate::cipher::Dek, $crate::error::KeyManagerError> {
                self.core.issue_new_dek().await
            }

            $(
                #[doc = concat!("Decrypt `", stringify!($field), "`, `None` if unset.")]
                ///
                /// # Errors
                ///
                /// See `KeyCore::get_field`.
                pub async fn $getter(&self) -> Result<Option<String>, $crate::error::KeyManagerError> {
                    self.core.get_field(stringify!($field)).await
                }

                #[doc = concat!("Set `", stringify!($field), "`, or clear it with `None`.")]
                ///
                /// # Errors
                ///
                /// See `KeyCore::set_field`.
                pub async fn $setter(&self, value: Option<&str>) -> Result<(), $crate::error::KeyManagerError> {
                    self.core.set_field(stringify!($field), value).await
                }
            )*
        }
    };

    (
        $(#[$meta:meta])*
        $vis:vis struct $name:ident($auth:ident, $ctx:ty) {
            $( $field:ident => $getter:ident / $setter:ident ),* $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug)]
        $vis struct $name {
            core: $crate::manager::KeyCore<$ctx>,
        }

        impl $crate::manager::FromKeyCore for $name {
            type Context = $ctx;

            fn from_core(core: $crate::manager::KeyCore<$ctx>) -> Self {
                Self { core }
            }
        }

        $crate::key_manager! {
            @accessors $name($auth, $ctx) {
                $( $field => $getter / $setter ),*
            }
        }
    };
}
