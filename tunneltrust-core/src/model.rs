//! Domain model types for Tunneltrust.
//!
//! This module defines the types shared across the discovery and credential
//! subsystems:
//! - [`Provider`] / [`Organization`] - entries of the remote discovery lists
//! - [`AuthorizationType`] - the authorization category of a provider
//! - [`VersionedList`] - a discovery list with its monotonic version marker
//! - [`DiscoveredApi`] - per-provider API endpoints resolved at runtime
//! - [`AuthState`] / [`SavedAuthState`] - cached OAuth authorization state
//! - [`SavedProfile`] / [`SavedKeyPair`] - locally issued VPN artifacts
//! - [`CredentialGrouping`] - the policy deciding which cached credentials a
//!   provider identity shares

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use url::Url;
use uuid::Uuid;

use crate::store::Secret;

/// Authorization category of a provider.
///
/// `Local` credentials are valid for a single institution only. `Distributed`
/// credentials are federated: one authorization is shared by every provider
/// in the distributed category.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthorizationType {
    #[default]
    Local,
    Distributed,
}

/// A display string that is either plain or translated per language tag.
///
/// Discovery lists publish display names both as bare strings and as
/// `{"en": "...", "nl": "..."}` maps; both forms are accepted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TranslatableString {
    Plain(String),
    Translated(BTreeMap<String, String>),
}

impl TranslatableString {
    pub fn new(value: impl Into<String>) -> Self {
        Self::Plain(value.into())
    }

    /// Returns the best available translation: the plain value, the English
    /// translation, or the first translation in language-tag order.
    pub fn preferred(&self) -> &str {
        match self {
            Self::Plain(value) => value,
            Self::Translated(map) => map
                .get("en")
                .or_else(|| map.values().next())
                .map(String::as_str)
                .unwrap_or(""),
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Self::Plain(value) => value.is_empty(),
            Self::Translated(map) => map.is_empty(),
        }
    }
}

impl Default for TranslatableString {
    fn default() -> Self {
        Self::Plain(String::new())
    }
}

impl fmt::Display for TranslatableString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.preferred())
    }
}

impl From<&str> for TranslatableString {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Discovery lists publish display strings as plain values, translation maps
/// or explicit `null`; `null` reads as the empty default.
fn nullable_translatable<'de, D>(deserializer: D) -> Result<TranslatableString, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(Option::<TranslatableString>::deserialize(deserializer)?.unwrap_or_default())
}

/// A VPN provider entry from a discovery list.
///
/// The authorization category is not part of the wire format; discovery lists
/// are segregated per category server-side and every entry is tagged with the
/// category it was fetched under.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Provider {
    // Serialized as base_url; older lists use base_uri.
    #[serde(rename = "base_url", alias = "base_uri")]
    pub base_uri: String,

    #[serde(default, deserialize_with = "nullable_translatable")]
    pub display_name: TranslatableString,

    #[serde(default, rename = "logo", skip_serializing_if = "Option::is_none")]
    pub logo_uri: Option<String>,

    #[serde(default)]
    pub authorization_type: AuthorizationType,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub country_code: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub support_contact: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authentication_url_template: Option<String>,
}

impl Provider {
    /// Create a provider with just a base URI and category, the form used for
    /// custom user-entered servers.
    pub fn new(base_uri: impl Into<String>, authorization_type: AuthorizationType) -> Self {
        Self {
            base_uri: base_uri.into(),
            display_name: TranslatableString::default(),
            logo_uri: None,
            authorization_type,
            country_code: None,
            support_contact: Vec::new(),
            authentication_url_template: None,
        }
    }

    /// The canonical join key for this provider: the base URI with exactly
    /// one trailing slash stripped.
    pub fn sanitized_base_uri(&self) -> &str {
        self.base_uri.strip_suffix('/').unwrap_or(&self.base_uri)
    }

    /// The credential grouping this provider identity belongs to.
    pub fn grouping(&self) -> CredentialGrouping {
        match self.authorization_type {
            AuthorizationType::Local => {
                CredentialGrouping::ExactUri(self.sanitized_base_uri().to_string())
            }
            AuthorizationType::Distributed => CredentialGrouping::Federation,
        }
    }
}

/// An organization entry from the organization discovery list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Organization {
    pub org_id: String,

    #[serde(default, deserialize_with = "nullable_translatable")]
    pub display_name: TranslatableString,

    #[serde(default, deserialize_with = "nullable_translatable")]
    pub keyword_list: TranslatableString,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secure_internet_home: Option<String>,
}

/// A discovery list together with its monotonic version marker.
///
/// A persisted list is only ever replaced by a fetched list with a strictly
/// greater version, which rejects replayed or stale data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionedList<T> {
    #[serde(rename = "v")]
    pub version: u64,
    pub entries: Vec<T>,
}

/// API endpoints discovered for a single provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscoveredApi {
    pub api_base_uri: String,
    pub authorization_endpoint: Url,
    pub token_endpoint: Url,
}

impl DiscoveredApi {
    /// The authorization service configuration derived from these endpoints.
    pub fn authorization_config(&self) -> AuthorizationServiceConfig {
        AuthorizationServiceConfig {
            authorization_endpoint: self.authorization_endpoint.clone(),
            token_endpoint: self.token_endpoint.clone(),
        }
    }
}

/// The endpoint pair identifying an authorization service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorizationServiceConfig {
    pub authorization_endpoint: Url,
    pub token_endpoint: Url,
}

/// Opaque authorization state issued by the OAuth collaborator.
///
/// The payload is never inspected here; only the service configuration it was
/// issued against is used, to locate the stored entry to update after a
/// silent token refresh.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthState {
    pub config: AuthorizationServiceConfig,
    pub payload: Secret,
}

impl AuthState {
    pub fn new(config: AuthorizationServiceConfig, payload: impl Into<String>) -> Self {
        Self {
            config,
            payload: Secret::new(payload),
        }
    }
}

/// A cached authorization state for one provider identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SavedAuthState {
    pub provider: Provider,
    pub auth_state: AuthState,
    pub authenticated_at: Option<DateTime<Utc>>,
}

impl SavedAuthState {
    pub fn new(provider: Provider, auth_state: AuthState) -> Self {
        Self {
            provider,
            auth_state,
            authenticated_at: Some(Utc::now()),
        }
    }
}

/// A VPN profile as published by a provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub profile_id: String,

    #[serde(default)]
    pub display_name: TranslatableString,
}

impl Profile {
    pub fn new(profile_id: impl Into<String>, display_name: impl Into<TranslatableString>) -> Self {
        Self {
            profile_id: profile_id.into(),
            display_name: display_name.into(),
        }
    }
}

/// Handle of a locally materialized VPN profile.
///
/// Minted when a profile configuration is first imported into the tunneling
/// library; opaque everywhere else.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProfileHandle(Uuid);

impl ProfileHandle {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for ProfileHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ProfileHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A profile the user has materialized before, kept so it can be offered
/// again without a new provider round-trip.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SavedProfile {
    pub provider: Provider,
    pub profile: Profile,
    pub handle: ProfileHandle,
}

impl SavedProfile {
    pub fn new(provider: Provider, profile: Profile, handle: ProfileHandle) -> Self {
        Self {
            provider,
            profile,
            handle,
        }
    }
}

/// A certificate and private key issued by a provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyPair {
    pub certificate: String,
    pub private_key: Secret,
    pub is_usable: bool,
}

impl KeyPair {
    pub fn new(certificate: impl Into<String>, private_key: impl Into<String>, is_usable: bool) -> Self {
        Self {
            certificate: certificate.into(),
            private_key: Secret::new(private_key),
            is_usable,
        }
    }
}

/// A key pair stored for one provider. At most one entry exists per
/// sanitized base URI.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SavedKeyPair {
    pub provider: Provider,
    pub key_pair: KeyPair,
}

impl SavedKeyPair {
    pub fn new(provider: Provider, key_pair: KeyPair) -> Self {
        Self { provider, key_pair }
    }
}

/// The policy deciding which cached credentials a provider identity shares.
///
/// Both the cache-write path (which existing entries conflict) and the
/// cache-read path (which entries may be reused) dispatch on this enum, so
/// the two can never disagree: a `Local` identity owns exactly the entry
/// with its own sanitized base URI, while every `Distributed` identity shares
/// one federation-wide credential.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CredentialGrouping {
    ExactUri(String),
    Federation,
}

impl CredentialGrouping {
    pub fn for_provider(provider: &Provider) -> Self {
        provider.grouping()
    }

    /// Whether a stored entry for `provider` belongs to this grouping.
    pub fn matches(&self, provider: &Provider) -> bool {
        match self {
            Self::ExactUri(uri) => provider.sanitized_base_uri() == uri,
            Self::Federation => provider.authorization_type == AuthorizationType::Distributed,
        }
    }
}
