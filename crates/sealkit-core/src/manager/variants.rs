//! The built-in managers, one per auth type and scope.

use std::fmt;
use std::sync::Arc;

use crate::context::{AccountContext, IntegrationContext};
use crate::error::KeyManagerError;
use crate::key_manager;
use crate::manager::{FromKeyCore, KeyCore};

key_manager! {
    /// Integration-level OAuth 2.0 client credentials.
    pub struct OAuth2IntegrationKeyManager(OAuth2, IntegrationContext) {
        client_id => get_client_id / set_client_id,
        client_secret => get_client_secret / set_client_secret,
        redirect_url => get_redirect_url / set_redirect_url,
    }
}

key_manager! {
    /// API key integrations keep no integration-level secrets; this only
    /// manages the DEK.
    pub struct ApiKeyIntegrationKeyManager(ApiKey, IntegrationContext) {}
}

key_manager! {
    /// Bot token integrations keep no integration-level secrets.
    pub struct BotTokenIntegrationKeyManager(BotToken, IntegrationContext) {}
}

key_manager! {
    /// A tenant's API key and webhook signing secret.
    pub struct ApiKeyAccountKeyManager(ApiKey, AccountContext) {
        api_key => get_api_key / set_api_key,
        webhook_signature => get_webhook_signature / set_webhook_signature,
    }
}

key_manager! {
    /// A tenant's bot token and webhook signing secret.
    pub struct BotTokenAccountKeyManager(BotToken, AccountContext) {
        bot_token => get_bot_token / set_bot_token,
        webhook_signature => get_webhook_signature / set_webhook_signature,
    }
}

/// A tenant's OAuth 2.0 tokens, with read access to the integration's
/// client credentials.
#[derive(Debug)]
pub struct OAuth2AccountKeyManager {
    core: KeyCore<AccountContext>,
    /// Shares the account context's integration cache.
    integration: KeyCore<Arc<IntegrationContext>>,
}

impl FromKeyCore for OAuth2AccountKeyManager {
    type Context = AccountContext;

    fn from_core(core: KeyCore<AccountContext>) -> Self {
        let integration = KeyCore::new(
            core.context().integration_context(),
            core.options().clone(),
        );
        Self { core, integration }
    }
}

key_manager! {
    @accessors OAuth2AccountKeyManager(OAuth2, AccountContext) {
        access_token => get_access_token / set_access_token,
        refresh_token => get_refresh_token / set_refresh_token,
        expires_at => get_expires_at / set_expires_at,
        scope => get_scope / set_scope,
        webhook_signature => get_webhook_signature / set_webhook_signature,
    }
}

impl OAuth2AccountKeyManager {
    /// Decrypt the integration's client credentials with the integration's DEK.
    ///
    /// # Errors
    ///
    /// - [`KeyManagerError::IntegrationNotFound`] if the integration is gone.
    /// - [`KeyManagerError::DekNotInitialized`] naming the integration if it
    ///   was never initialized.
    /// - [`KeyManagerError::Cipher`] if its config cannot be decrypted.
    pub async fn get_integration_credentials(
        &self,
    ) -> Result<IntegrationCredentials, KeyManagerError> {
        let mut config = self.integration.read_config().await?;
        Ok(IntegrationCredentials {
            client_id: config.remove("client_id"),
            client_secret: config.remove("client_secret"),
            redirect_url: config.remove("redirect_url"),
        })
    }
}

/// OAuth 2.0 client credentials of an integration. Absent fields are `None`.
#[derive(Clone, PartialEq, Eq, Default)]
pub struct IntegrationCredentials {
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub redirect_url: Option<String>,
}

impl fmt::Debug for IntegrationCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IntegrationCredentials")
            .field("client_id", &self.client_id)
            .field(
                "client_secret",
                &self.client_secret.as_ref().map(|_| "[REDACTED]"),
            )
            .field("redirect_url", &self.redirect_url)
            .finish()
    }
}
