//! Capability/field schema.
//!
//! Declares which named secret fields exist for each `(auth type, scope)`
//! pair. The base table is fixed:
//!
//! | auth type   | integration fields                         | account fields |
//! |-------------|--------------------------------------------|----------------|
//! | `oauth_2`   | client_id, client_secret, redirect_url     | access_token, refresh_token, expires_at, scope, webhook_signature |
//! | `api_key`   | —                                          | api_key, webhook_signature |
//! | `bot_token` | —                                          | bot_token, webhook_signature |
//!
//! Plugins may add field names through [`FieldSchema::extend`], never
//! redefine or remove base ones. Typed accessors are generated at compile
//! time by [`key_manager!`](crate::key_manager); the schema is what a
//! generated manager is checked against when it is built.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::SchemaError;

/// How an integration authenticates against its provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum AuthType {
    #[serde(rename = "oauth_2")]
    OAuth2,
    #[serde(rename = "api_key")]
    ApiKey,
    #[serde(rename = "bot_token")]
    BotToken,
}

impl AuthType {
    /// Every supported auth type.
    pub const ALL: [AuthType; 3] = [AuthType::OAuth2, AuthType::ApiKey, AuthType::BotToken];

    /// Wire name (`oauth_2`, `api_key`, `bot_token`).
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::OAuth2 => "oauth_2",
            Self::ApiKey => "api_key",
            Self::BotToken => "bot_token",
        }
    }
}

impl fmt::Display for AuthType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AuthType {
    type Err = SchemaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "oauth_2" => Ok(Self::OAuth2),
            "api_key" => Ok(Self::ApiKey),
            "bot_token" => Ok(Self::BotToken),
            other => Err(SchemaError::UnknownAuthType {
                auth_type: other.to_owned(),
            }),
        }
    }
}

/// Which record a manager is bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scope {
    /// The integration row, shared by all tenants.
    Integration,
    /// One tenant's account row.
    Account,
}

impl Scope {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Integration => "integration",
            Self::Account => "account",
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Scope {
    type Err = SchemaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "integration" => Ok(Self::Integration),
            "account" => Ok(Self::Account),
            other => Err(SchemaError::UnknownScope {
                scope: other.to_owned(),
            }),
        }
    }
}

const OAUTH2_INTEGRATION: &[&str] = &["client_id", "client_secret", "redirect_url"];
const OAUTH2_ACCOUNT: &[&str] = &[
    "access_token",
    "refresh_token",
    "expires_at",
    "scope",
    "webhook_signature",
];
const API_KEY_ACCOUNT: &[&str] = &["api_key", "webhook_signature"];
const BOT_TOKEN_ACCOUNT: &[&str] = &["bot_token", "webhook_signature"];

/// The fixed base field names for an auth type at a scope.
#[must_use]
pub fn base_fields(auth_type: AuthType, scope: Scope) -> &'static [&'static str] {
    match (auth_type, scope) {
        (AuthType::OAuth2, Scope::Integration) => OAUTH2_INTEGRATION,
        (AuthType::OAuth2, Scope::Account) => OAUTH2_ACCOUNT,
        (AuthType::ApiKey | AuthType::BotToken, Scope::Integration) => &[],
        (AuthType::ApiKey, Scope::Account) => API_KEY_ACCOUNT,
        (AuthType::BotToken, Scope::Account) => BOT_TOKEN_ACCOUNT,
    }
}

/// Static description of a key manager type's accessors.
///
/// Implemented by every type generated with [`key_manager!`](crate::key_manager).
pub trait ManagedFields {
    /// Type name, for error messages.
    const NAME: &'static str;
    const AUTH_TYPE: AuthType;
    const SCOPE: Scope;
    /// Every field the type has a `get_`/`set_` pair for.
    const FIELDS: &'static [&'static str];
}

/// Base fields plus plugin-declared additions.
#[derive(Debug, Clone, Default)]
pub struct FieldSchema {
    extensions: BTreeMap<(AuthType, Scope), Vec<String>>,
}

impl FieldSchema {
    /// A schema holding only the base table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare additional fields for `(auth_type, scope)`.
    ///
    /// Declaring a plugin field twice is a no-op.
    ///
    /// # Errors
    ///
    /// - [`SchemaError::InvalidFieldName`] if a name is empty or not a
    ///   lowercase identifier.
    /// - [`SchemaError::RedefinesBaseField`] if a name is already a base field.
    ///
    /// Nothing is added when an error is returned.
    pub fn extend<I, S>(
        &mut self,
        auth_type: AuthType,
        scope: Scope,
        fields: I,
    ) -> Result<&mut Self, SchemaError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let base = base_fields(auth_type, scope);
        let mut additions = Vec::new();
        for field in fields {
            let field = field.into();
            if !is_field_name(&field) {
                return Err(SchemaError::InvalidFieldName { field });
            }
            if base.contains(&field.as_str()) {
                return Err(SchemaError::RedefinesBaseField {
                    auth_type,
                    scope,
                    field,
                });
            }
            additions.push(field);
        }

        let declared = self.extensions.entry((auth_type, scope)).or_default();
        for field in additions {
            if !declared.contains(&field) {
                declared.push(field);
            }
        }
        Ok(self)
    }

    /// The effective field set, base fields first, in declaration order.
    #[must_use]
    pub fn fields(&self, auth_type: AuthType, scope: Scope) -> Vec<&str> {
        let mut fields: Vec<&str> = base_fields(auth_type, scope).to_vec();
        if let Some(extra) = self.extensions.get(&(auth_type, scope)) {
            fields.extend(extra.iter().map(String::as_str));
        }
        fields
    }

    /// Whether `field` is in the effective set.
    #[must_use]
    pub fn contains(&self, auth_type: AuthType, scope: Scope, field: &str) -> bool {
        base_fields(auth_type, scope).contains(&field)
            || self
                .extensions
                .get(&(auth_type, scope))
                .is_some_and(|extra| extra.iter().any(|f| f == field))
    }

    /// Check that a manager type exposes every base field of its auth type and
    /// scope, and nothing outside the effective set.
    ///
    /// # Errors
    ///
    /// - [`SchemaError::MissingBaseField`] if a base accessor is absent.
    /// - [`SchemaError::UndeclaredField`] if the type has an accessor for a
    ///   field nobody declared.
    pub fn validate<M: ManagedFields>(&self) -> Result<(), SchemaError> {
        if let Some(missing) = base_fields(M::AUTH_TYPE, M::SCOPE)
            .iter()
            .copied()
            .find(|base| !M::FIELDS.contains(base))
        {
            return Err(SchemaError::MissingBaseField {
                manager: M::NAME,
                auth_type: M::AUTH_TYPE,
                scope: M::SCOPE,
                field: missing,
            });
        }
        if let Some(extra) = M::FIELDS
            .iter()
            .copied()
            .find(|field| !self.contains(M::AUTH_TYPE, M::SCOPE, field))
        {
            return Err(SchemaError::UndeclaredField {
                manager: M::NAME,
                auth_type: M::AUTH_TYPE,
                scope: M::SCOPE,
                field: extra,
            });
        }
        Ok(())
    }
}

fn is_field_name(name: &str) -> bool {
    let mut chars = name.chars();
    chars.next().is_some_and(|c| c.is_ascii_lowercase())
        && chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    struct SlackAccount;

    impl ManagedFields for SlackAccount {
        const NAME: &'static str = "SlackAccount";
        const AUTH_TYPE: AuthType = AuthType::BotToken;
        const SCOPE: Scope = Scope::Account;
        const FIELDS: &'static [&'static str] = &["bot_token", "webhook_signature", "team_id"];
    }

    struct BrokenAccount;

    impl ManagedFields for BrokenAccount {
        const NAME: &'static str = "BrokenAccount";
        const AUTH_TYPE: AuthType = AuthType::ApiKey;
        const SCOPE: Scope = Scope::Account;
        const FIELDS: &'static [&'static str] = &["api_key"];
    }

    #[test]
    fn auth_type_parses_wire_names() {
        for auth in AuthType::ALL {
            assert_eq!(auth.as_str().parse::<AuthType>().unwrap(), auth);
        }
    }

    #[test]
    fn unknown_auth_type_rejected() {
        let result = "basic_auth".parse::<AuthType>();
        assert!(matches!(
            result,
            Err(SchemaError::UnknownAuthType { auth_type }) if auth_type == "basic_auth"
        ));
    }

    #[test]
    fn auth_type_serde_uses_wire_names() {
        let json = serde_json::to_string(&AuthType::OAuth2).unwrap();
        assert_eq!(json, "\"oauth_2\"");
        let parsed: AuthType = serde_json::from_str("\"bot_token\"").unwrap();
        assert_eq!(parsed, AuthType::BotToken);
    }

    #[test]
    fn base_table_matches_auth_types() {
        assert_eq!(
            base_fields(AuthType::OAuth2, Scope::Integration),
            ["client_id", "client_secret", "redirect_url"]
        );
        assert!(base_fields(AuthType::ApiKey, Scope::Integration).is_empty());
        assert!(base_fields(AuthType::BotToken, Scope::Integration).is_empty());
        assert_eq!(
            base_fields(AuthType::ApiKey, Scope::Account),
            ["api_key", "webhook_signature"]
        );
        assert_eq!(base_fields(AuthType::OAuth2, Scope::Account).len(), 5);
    }

    #[test]
    fn extension_is_union_with_base() {
        let mut schema = FieldSchema::new();
        schema
            .extend(AuthType::BotToken, Scope::Account, ["team_id", "app_token"])
            .unwrap()
            .extend(AuthType::BotToken, Scope::Account, ["team_id"])
            .unwrap();

        assert_eq!(
            schema.fields(AuthType::BotToken, Scope::Account),
            ["bot_token", "webhook_signature", "team_id", "app_token"]
        );
        assert_eq!(
            schema.fields(AuthType::ApiKey, Scope::Account),
            ["api_key", "webhook_signature"]
        );
    }

    #[test]
    fn extension_cannot_redefine_base_field() {
        let mut schema = FieldSchema::new();
        let result = schema.extend(AuthType::OAuth2, Scope::Account, ["tenant_hint", "access_token"]);

        assert!(matches!(
            result,
            Err(SchemaError::RedefinesBaseField { field, .. }) if field == "access_token"
        ));
        // Rejected as a batch.
        assert!(!schema.contains(AuthType::OAuth2, Scope::Account, "tenant_hint"));
    }

    #[test]
    fn extension_rejects_bad_names() {
        let mut schema = FieldSchema::new();
        for bad in ["", "Team", "team-id", "1st"] {
            let result = schema.extend(AuthType::ApiKey, Scope::Account, [bad]);
            assert!(
                matches!(result, Err(SchemaError::InvalidFieldName { .. })),
                "{bad:?} accepted"
            );
        }
    }

    #[test]
    fn validate_accepts_declared_extension() {
        let mut schema = FieldSchema::new();
        schema
            .extend(AuthType::BotToken, Scope::Account, ["team_id"])
            .unwrap();
        schema.validate::<SlackAccount>().unwrap();
    }

    #[test]
    fn validate_rejects_undeclared_extension() {
        let result = FieldSchema::new().validate::<SlackAccount>();
        assert!(matches!(
            result,
            Err(SchemaError::UndeclaredField { field: "team_id", .. })
        ));
    }

    #[test]
    fn validate_rejects_missing_base_field() {
        let result = FieldSchema::new().validate::<BrokenAccount>();
        assert!(matches!(
            result,
            Err(SchemaError::MissingBaseField {
                field: "webhook_signature",
                ..
            })
        ));
    }
}
