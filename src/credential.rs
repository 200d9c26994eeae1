use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Duration, TimeZone, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::AuthError;
use crate::oauth::{ClientId, OAuth2Client, TokenGrant};

/// Callback invoked after a credential's access token has been refreshed.
pub type RefreshListener = Arc<dyn Fn(&Credential) + Send + Sync>;

/// Normalize scope input into an ordered, deduplicated sequence.
///
/// Each element may itself be a space-separated list (a single
/// `"read write"` string yields two scopes). Original ordering is kept.
pub fn normalize_scopes<I, S>(scopes: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut normalized: Vec<String> = Vec::new();
    for entry in scopes {
        for scope in entry.as_ref().split_whitespace() {
            if !normalized.iter().any(|existing| existing == scope) {
                normalized.push(scope.to_owned());
            }
        }
    }
    normalized
}

/// A live, user-granted credential obtained from code exchange or storage.
///
/// Refresh listeners are invoked synchronously after every applied refresh;
/// they are never persisted and must be re-registered after a reload.
#[derive(Clone)]
pub struct Credential {
    pub client: ClientId,
    pub scope: Vec<String>,
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    refresh_listeners: Vec<RefreshListener>,
}

impl Credential {
    pub fn new(
        client: ClientId,
        scope: Vec<String>,
        access_token: String,
        refresh_token: Option<String>,
        expires_at: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            client,
            scope,
            access_token,
            refresh_token,
            expires_at,
            refresh_listeners: Vec::new(),
        }
    }

    pub fn from_grant(client: ClientId, scope: Vec<String>, grant: TokenGrant) -> Self {
        Self::new(
            client,
            scope,
            grant.access_token,
            grant.refresh_token,
            grant.expires_at,
        )
    }

    /// Whether this credential's scope is a superset of `requested`.
    pub fn covers_scope(&self, requested: &[String]) -> bool {
        let held: HashSet<&str> = self.scope.iter().map(String::as_str).collect();
        requested.iter().all(|scope| held.contains(scope.as_str()))
    }

    pub fn is_expired(&self) -> bool {
        match self.expires_at {
            Some(ts) => Utc::now() >= ts,
            None => false,
        }
    }

    pub fn will_expire_within(&self, window: Duration) -> bool {
        match self.expires_at {
            Some(ts) => Utc::now() + window >= ts,
            None => false,
        }
    }

    /// Register a listener fired after every applied token refresh.
    pub fn on_refresh<F>(&mut self, listener: F)
    where
        F: Fn(&Credential) + Send + Sync + 'static,
    {
        self.refresh_listeners.push(Arc::new(listener));
    }

    /// Apply a refreshed grant to this credential and notify listeners.
    ///
    /// A grant without a refresh token keeps the existing one; refresh
    /// responses routinely omit it.
    pub fn apply_refresh(&mut self, grant: TokenGrant) {
        self.access_token = grant.access_token;
        if grant.refresh_token.is_some() {
            self.refresh_token = grant.refresh_token;
        }
        self.expires_at = grant.expires_at;
        self.notify_refresh_listeners();
    }

    /// Obtain a fresh access token through the given client.
    pub async fn refresh<C: OAuth2Client>(&mut self, oauth: &C) -> Result<(), AuthError> {
        let refresh_token = self
            .refresh_token
            .clone()
            .ok_or(AuthError::RefreshUnavailable)?;
        let grant = oauth.refresh(&self.client, &refresh_token).await?;
        self.apply_refresh(grant);
        Ok(())
    }

    fn notify_refresh_listeners(&self) {
        for listener in &self.refresh_listeners {
            listener(self);
        }
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("client", &self.client)
            .field("scope", &self.scope)
            .field("access_token", &"<redacted>")
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "<redacted>"))
            .field("expires_at", &self.expires_at)
            .field("refresh_listeners", &self.refresh_listeners.len())
            .finish()
    }
}

/// The persisted record shape. Field names are the wire contract and must
/// round-trip with records written by prior versions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredCredential {
    pub client_id: String,
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(deserialize_with = "scope_field")]
    pub scope: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiration_time_millis: Option<i64>,
}

impl StoredCredential {
    pub fn from_credential(credential: &Credential) -> Self {
        Self {
            client_id: credential.client.id.clone(),
            access_token: credential.access_token.clone(),
            refresh_token: credential.refresh_token.clone(),
            scope: credential.scope.clone(),
            expiration_time_millis: credential.expires_at.map(|ts| ts.timestamp_millis()),
        }
    }

    /// Absolute expiry, treating an absent or zero timestamp as unknown.
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        match self.expiration_time_millis {
            Some(millis) if millis > 0 => Utc.timestamp_millis_opt(millis).single(),
            _ => None,
        }
    }
}

// Accepts either a JSON array of scopes or a single (possibly
// space-separated) string; always serializes back as an array.
fn scope_field<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum ScopeField {
        One(String),
        Many(Vec<String>),
    }

    Ok(match ScopeField::deserialize(deserializer)? {
        ScopeField::One(value) => normalize_scopes([value]),
        ScopeField::Many(values) => normalize_scopes(values),
    })
}
