use std::sync::Arc;

use tracing::{debug, warn};
use url::Url;

use crate::credential::{normalize_scopes, Credential, StoredCredential};
use crate::error::AuthError;
use crate::oauth::{AuthorizationRequest, ClientId, OAuth2Client};
use crate::pkce::PkcePair;
use crate::store::TokenStore;

/// Callback path used when no explicit callback URI is configured.
pub const DEFAULT_CALLBACK_URI: &str = "/oauth2callback";

/// Options for [`UserAuthorizer::authorization_url`].
#[derive(Debug, Clone, Default)]
pub struct AuthorizationUrlOptions<'a> {
    pub login_hint: Option<&'a str>,
    /// Opaque value round-tripped to the callback.
    pub state: Option<&'a str>,
    /// Required when the configured callback URI is relative.
    pub base_url: Option<&'a str>,
    /// Overrides the default scope for this URL only.
    pub scope: Option<&'a [String]>,
}

/// Options for the code-exchange operations.
#[derive(Debug, Clone, Default)]
pub struct CodeExchangeOptions<'a> {
    pub scope: Option<&'a [String]>,
    pub base_url: Option<&'a str>,
}

/// Manages the three-legged OAuth2 credential lifecycle for end users:
/// consent URLs, code exchange, persistence, refresh monitoring, and
/// revocation.
///
/// The authorizer never talks to the network or disk directly; it
/// sequences calls into the [`OAuth2Client`] and [`TokenStore`]
/// capabilities.
pub struct UserAuthorizer<C> {
    oauth: C,
    client_id: ClientId,
    scope: Vec<String>,
    store: Option<Arc<dyn TokenStore>>,
    callback_uri: String,
    code_verifier: Option<String>,
}

impl<C> std::fmt::Debug for UserAuthorizer<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UserAuthorizer")
            .field("scope", &self.scope)
            .field("callback_uri", &self.callback_uri)
            .finish_non_exhaustive()
    }
}

impl<C: OAuth2Client> UserAuthorizer<C> {
    /// Pure value construction; fails on an empty client id/secret or an
    /// empty normalized scope.
    pub fn new<I, S>(oauth: C, client_id: ClientId, scopes: I) -> Result<Self, AuthError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        if client_id.id.is_empty() {
            return Err(AuthError::InvalidConfig("client id must not be empty"));
        }
        if client_id.secret.is_empty() {
            return Err(AuthError::InvalidConfig("client secret must not be empty"));
        }
        let scope = normalize_scopes(scopes);
        if scope.is_empty() {
            return Err(AuthError::InvalidConfig("at least one scope is required"));
        }
        Ok(Self {
            oauth,
            client_id,
            scope,
            store: None,
            callback_uri: DEFAULT_CALLBACK_URI.to_owned(),
            code_verifier: None,
        })
    }

    pub fn with_token_store<S: TokenStore + 'static>(mut self, store: S) -> Self {
        self.store = Some(Arc::new(store));
        self
    }

    pub fn with_callback_uri(mut self, uri: impl Into<String>) -> Self {
        self.callback_uri = uri.into();
        self
    }

    /// Enable PKCE: the consent URL carries the derived S256 challenge and
    /// code exchanges carry this verifier.
    pub fn with_code_verifier(mut self, verifier: impl Into<String>) -> Self {
        self.code_verifier = Some(verifier.into());
        self
    }

    pub fn default_scope(&self) -> &[String] {
        &self.scope
    }

    /// Build the consent URL. Stateless; no network call is made.
    pub fn authorization_url(
        &self,
        options: &AuthorizationUrlOptions<'_>,
    ) -> Result<Url, AuthError> {
        let redirect_uri = self.redirect_uri_for(options.base_url)?;
        let scope = options.scope.unwrap_or(&self.scope);
        let pkce = self.code_verifier.as_deref().map(PkcePair::from_verifier);
        self.oauth.authorization_url(
            &self.client_id,
            &AuthorizationRequest {
                scope,
                redirect_uri: &redirect_uri,
                state: options.state,
                login_hint: options.login_hint,
                code_challenge: pkce.as_ref().map(PkcePair::challenge),
            },
        )
    }

    /// Load stored credentials for `user_id`, requiring the default scope.
    pub fn credentials(&self, user_id: &str) -> Result<Option<Credential>, AuthError> {
        self.credentials_with_scope(user_id, &self.scope)
    }

    /// Load stored credentials for `user_id`, requiring `scope`.
    ///
    /// Absence and an insufficient stored scope both return `Ok(None)`;
    /// the caller is expected to re-run the consent flow. A record bound
    /// to a different client id is a hard error.
    pub fn credentials_with_scope(
        &self,
        user_id: &str,
        scope: &[String],
    ) -> Result<Option<Credential>, AuthError> {
        ensure_user_id(user_id)?;
        let store = self.token_store()?;
        let Some(raw) = store.load(user_id)? else {
            return Ok(None);
        };
        let record: StoredCredential =
            serde_json::from_str(&raw).map_err(|source| AuthError::CorruptStorage {
                user_id: user_id.to_owned(),
                source,
            })?;
        if record.client_id != self.client_id.id {
            return Err(AuthError::ClientIdMismatch {
                stored: record.client_id,
                expected: self.client_id.id.clone(),
            });
        }
        let expires_at = record.expires_at();
        let mut credential = Credential::new(
            self.client_id.clone(),
            record.scope,
            record.access_token,
            record.refresh_token,
            expires_at,
        );
        if !credential.covers_scope(scope) {
            return Ok(None);
        }
        self.monitor(user_id, &mut credential);
        Ok(Some(credential))
    }

    /// Exchange an authorization code for a credential without persisting
    /// it. The refresh monitor is registered before returning.
    pub async fn credentials_from_code(
        &self,
        user_id: &str,
        code: &str,
        options: &CodeExchangeOptions<'_>,
    ) -> Result<Credential, AuthError> {
        ensure_user_id(user_id)?;
        if code.is_empty() {
            return Err(AuthError::InvalidArgument(
                "authorization code must not be empty",
            ));
        }
        let scope = options.scope.unwrap_or(&self.scope);
        let redirect_uri = self.redirect_uri_for(options.base_url)?;
        let grant = self
            .oauth
            .exchange_code(
                &self.client_id,
                code,
                scope,
                &redirect_uri,
                self.code_verifier.as_deref(),
            )
            .await?;
        let mut credential = Credential::from_grant(self.client_id.clone(), scope.to_vec(), grant);
        self.monitor(user_id, &mut credential);
        Ok(credential)
    }

    /// Exchange an authorization code and persist the resulting credential.
    pub async fn store_credentials_from_code(
        &self,
        user_id: &str,
        code: &str,
        options: &CodeExchangeOptions<'_>,
    ) -> Result<Credential, AuthError> {
        let credential = self.credentials_from_code(user_id, code, options).await?;
        self.store_credentials(user_id, &credential)?;
        Ok(credential)
    }

    /// Serialize `credential` to the wire record and write it through the
    /// token store. Single source of truth for the on-disk record shape.
    pub fn store_credentials(
        &self,
        user_id: &str,
        credential: &Credential,
    ) -> Result<(), AuthError> {
        ensure_user_id(user_id)?;
        let store = self.token_store()?;
        let record = StoredCredential::from_credential(credential);
        let raw = serde_json::to_string(&record)?;
        store.store(user_id, &raw)
    }

    /// Remove the stored record and revoke the remote grant.
    ///
    /// A user without stored credentials is a no-op. The remote revoke is
    /// attempted even when the local delete fails; a delete error still
    /// propagates after the attempt.
    pub async fn revoke_authorization(&self, user_id: &str) -> Result<(), AuthError> {
        let Some(credential) = self.credentials(user_id)? else {
            debug!(user_id, "no stored credential to revoke");
            return Ok(());
        };
        let store = self.token_store()?;
        let deleted = store.delete(user_id);
        let token = credential
            .refresh_token
            .as_deref()
            .unwrap_or(&credential.access_token);
        let revoked = self.oauth.revoke(token).await;
        deleted?;
        revoked
    }

    /// Resolve the effective redirect URI.
    ///
    /// An absolute configured callback is returned unchanged; a relative
    /// one is resolved against `base_url` per RFC 3986 reference rules.
    pub fn redirect_uri_for(&self, base_url: Option<&str>) -> Result<String, AuthError> {
        match Url::parse(&self.callback_uri) {
            Ok(absolute) => Ok(absolute.into()),
            Err(url::ParseError::RelativeUrlWithoutBase) => {
                let base = base_url
                    .ok_or_else(|| AuthError::MissingAbsoluteUrl(self.callback_uri.clone()))?;
                let base = Url::parse(base)
                    .map_err(|_| AuthError::MissingAbsoluteUrl(self.callback_uri.clone()))?;
                Ok(base.join(&self.callback_uri)?.into())
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Keep the token store in sync with out-of-band token refreshes by
    /// re-persisting the record whenever the credential is refreshed.
    /// Re-registered on every (re)load; never persisted itself.
    fn monitor(&self, user_id: &str, credential: &mut Credential) {
        let Some(store) = &self.store else {
            return;
        };
        let store = Arc::clone(store);
        let user_id = user_id.to_owned();
        credential.on_refresh(move |refreshed| {
            let record = StoredCredential::from_credential(refreshed);
            let persisted = serde_json::to_string(&record)
                .map_err(AuthError::from)
                .and_then(|raw| store.store(&user_id, &raw));
            if let Err(error) = persisted {
                // The listener has no error channel; surface via logs.
                warn!(%user_id, %error, "failed to persist refreshed credential");
            }
        });
    }

    fn token_store(&self) -> Result<&Arc<dyn TokenStore>, AuthError> {
        self.store
            .as_ref()
            .ok_or(AuthError::InvalidConfig("no token store configured"))
    }
}

fn ensure_user_id(user_id: &str) -> Result<(), AuthError> {
    if user_id.is_empty() {
        return Err(AuthError::InvalidArgument("user id must not be empty"));
    }
    Ok(())
}
