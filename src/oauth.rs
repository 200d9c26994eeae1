use std::fmt;
use std::future::Future;

use chrono::{DateTime, Duration, Utc};
use reqwest::Client;
use serde::Deserialize;
use url::Url;

use crate::error::AuthError;

const DEFAULT_USER_AGENT: &str = "user-authorizer/0.1.0";

/// OAuth2 client id/secret pair, supplied once and never mutated.
#[derive(Clone, PartialEq, Eq)]
pub struct ClientId {
    pub id: String,
    pub secret: String,
}

impl ClientId {
    pub fn new<I: Into<String>, S: Into<String>>(id: I, secret: S) -> Self {
        Self {
            id: id.into(),
            secret: secret.into(),
        }
    }
}

impl fmt::Debug for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientId")
            .field("id", &self.id)
            .field("secret", &"<redacted>")
            .finish()
    }
}

/// Tokens granted by a code exchange or refresh.
#[derive(Debug, Clone)]
pub struct TokenGrant {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
}

/// Parameters for building a consent URL.
#[derive(Debug, Clone, Default)]
pub struct AuthorizationRequest<'a> {
    pub scope: &'a [String],
    pub redirect_uri: &'a str,
    pub state: Option<&'a str>,
    pub login_hint: Option<&'a str>,
    pub code_challenge: Option<&'a str>,
}

/// The delegated OAuth2 protocol capability.
///
/// Implementations own the wire protocol; the authorizer only sequences
/// calls and never touches the network itself.
pub trait OAuth2Client: Send + Sync {
    /// Build the consent URL. Pure request construction, no network call.
    fn authorization_url(
        &self,
        client: &ClientId,
        request: &AuthorizationRequest<'_>,
    ) -> Result<Url, AuthError>;

    /// Exchange an authorization code for tokens. Single attempt; retry
    /// policy belongs to the caller.
    fn exchange_code(
        &self,
        client: &ClientId,
        code: &str,
        scope: &[String],
        redirect_uri: &str,
        code_verifier: Option<&str>,
    ) -> impl Future<Output = Result<TokenGrant, AuthError>> + Send;

    /// Obtain a fresh access token from a refresh token.
    fn refresh(
        &self,
        client: &ClientId,
        refresh_token: &str,
    ) -> impl Future<Output = Result<TokenGrant, AuthError>> + Send;

    /// Revoke a granted token.
    fn revoke(&self, token: &str) -> impl Future<Output = Result<(), AuthError>> + Send;
}

/// Authorization-server endpoints used by [`HttpOAuth2Client`].
#[derive(Debug, Clone)]
pub struct OAuth2Endpoints {
    pub authorization_url: Url,
    pub token_url: Url,
    pub revocation_url: Url,
}

impl Default for OAuth2Endpoints {
    fn default() -> Self {
        Self {
            authorization_url: Url::parse("https://accounts.google.com/o/oauth2/auth").unwrap(),
            token_url: Url::parse("https://oauth2.googleapis.com/token").unwrap(),
            revocation_url: Url::parse("https://oauth2.googleapis.com/revoke").unwrap(),
        }
    }
}

/// Performs OAuth2 exchanges against a real authorization server.
#[derive(Debug, Clone)]
pub struct HttpOAuth2Client {
    http: Client,
    endpoints: OAuth2Endpoints,
}

impl HttpOAuth2Client {
    pub fn new() -> Result<Self, AuthError> {
        Self::with_endpoints(OAuth2Endpoints::default())
    }

    pub fn with_endpoints(endpoints: OAuth2Endpoints) -> Result<Self, AuthError> {
        let http = Client::builder().user_agent(DEFAULT_USER_AGENT).build()?;
        Ok(Self { http, endpoints })
    }

    pub fn endpoints(&self) -> &OAuth2Endpoints {
        &self.endpoints
    }

    async fn token_request(&self, form: &[(String, String)]) -> Result<TokenGrant, AuthError> {
        let response = self
            .http
            .post(self.endpoints.token_url.clone())
            .form(form)
            .send()
            .await?;

        let status = response.status();
        let received_at = Utc::now();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_else(|_| "".into());
            return Err(AuthError::ExchangeFailed { status, body });
        }

        let payload: TokenResponse = response.json().await?;
        Ok(payload.into_grant(received_at))
    }
}

impl OAuth2Client for HttpOAuth2Client {
    fn authorization_url(
        &self,
        client: &ClientId,
        request: &AuthorizationRequest<'_>,
    ) -> Result<Url, AuthError> {
        let mut url = self.endpoints.authorization_url.clone();
        {
            let mut pairs = url.query_pairs_mut();
            pairs.append_pair("response_type", "code");
            pairs.append_pair("client_id", &client.id);
            pairs.append_pair("redirect_uri", request.redirect_uri);
            if !request.scope.is_empty() {
                pairs.append_pair("scope", &request.scope.join(" "));
            }
            pairs.append_pair("access_type", "offline");
            pairs.append_pair("approval_prompt", "force");
            pairs.append_pair("include_granted_scopes", "true");
            if let Some(state) = request.state {
                pairs.append_pair("state", state);
            }
            if let Some(login_hint) = request.login_hint {
                pairs.append_pair("login_hint", login_hint);
            }
            if let Some(challenge) = request.code_challenge {
                pairs.append_pair("code_challenge", challenge);
                pairs.append_pair("code_challenge_method", "S256");
            }
        }
        Ok(url)
    }

    async fn exchange_code(
        &self,
        client: &ClientId,
        code: &str,
        scope: &[String],
        redirect_uri: &str,
        code_verifier: Option<&str>,
    ) -> Result<TokenGrant, AuthError> {
        let mut form = vec![
            ("grant_type".to_string(), "authorization_code".to_string()),
            ("code".to_string(), code.to_owned()),
            ("redirect_uri".to_string(), redirect_uri.to_owned()),
            ("client_id".to_string(), client.id.clone()),
        ];

        if !client.secret.is_empty() {
            form.push(("client_secret".to_string(), client.secret.clone()));
        }

        if !scope.is_empty() {
            form.push(("scope".to_string(), scope.join(" ")));
        }

        if let Some(verifier) = code_verifier {
            form.push(("code_verifier".to_string(), verifier.to_owned()));
        }

        self.token_request(&form).await
    }

    async fn refresh(
        &self,
        client: &ClientId,
        refresh_token: &str,
    ) -> Result<TokenGrant, AuthError> {
        let mut form = vec![
            ("grant_type".to_string(), "refresh_token".to_string()),
            ("refresh_token".to_string(), refresh_token.to_owned()),
            ("client_id".to_string(), client.id.clone()),
        ];

        if !client.secret.is_empty() {
            form.push(("client_secret".to_string(), client.secret.clone()));
        }

        self.token_request(&form).await
    }

    async fn revoke(&self, token: &str) -> Result<(), AuthError> {
        let response = self
            .http
            .post(self.endpoints.revocation_url.clone())
            .form(&[("token", token)])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_else(|_| "".into());
            return Err(AuthError::RevokeFailed { status, body });
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: Option<String>,
    expires_in: Option<i64>,
}

impl TokenResponse {
    fn into_grant(self, received_at: DateTime<Utc>) -> TokenGrant {
        TokenGrant {
            access_token: self.access_token,
            refresh_token: self.refresh_token,
            expires_at: self
                .expires_in
                .map(|seconds| received_at + Duration::seconds(seconds)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;
    use reqwest::StatusCode;

    fn client_for(server: &MockServer) -> HttpOAuth2Client {
        let endpoints = OAuth2Endpoints {
            authorization_url: Url::parse("https://auth.example.com/authorize").unwrap(),
            token_url: Url::parse(&format!("{}{}", server.base_url(), "/token")).unwrap(),
            revocation_url: Url::parse(&format!("{}{}", server.base_url(), "/revoke")).unwrap(),
        };
        HttpOAuth2Client::with_endpoints(endpoints).unwrap()
    }

    fn query_contains(url: &Url, key: &str, value: &str) -> bool {
        url.query_pairs().any(|(k, v)| k == key && v == value)
    }

    #[test]
    fn authorization_url_carries_offline_consent_parameters() {
        let client = HttpOAuth2Client::new().unwrap();
        let scope = vec!["read".to_string(), "write".to_string()];
        let url = client
            .authorization_url(
                &ClientId::new("id1", "secret1"),
                &AuthorizationRequest {
                    scope: &scope,
                    redirect_uri: "https://example.com/oauth2callback",
                    state: Some("opaque"),
                    login_hint: Some("user@example.com"),
                    code_challenge: None,
                },
            )
            .unwrap();

        assert!(query_contains(&url, "response_type", "code"));
        assert!(query_contains(&url, "client_id", "id1"));
        assert!(query_contains(&url, "scope", "read write"));
        assert!(query_contains(&url, "access_type", "offline"));
        assert!(query_contains(&url, "approval_prompt", "force"));
        assert!(query_contains(&url, "include_granted_scopes", "true"));
        assert!(query_contains(&url, "state", "opaque"));
        assert!(query_contains(&url, "login_hint", "user@example.com"));
        assert!(!url.query_pairs().any(|(k, _)| k == "code_challenge"));
    }

    #[test]
    fn authorization_url_includes_pkce_challenge_when_supplied() {
        let client = HttpOAuth2Client::new().unwrap();
        let url = client
            .authorization_url(
                &ClientId::new("id1", "secret1"),
                &AuthorizationRequest {
                    scope: &[],
                    redirect_uri: "https://example.com/cb",
                    code_challenge: Some("challenge123"),
                    ..Default::default()
                },
            )
            .unwrap();
        assert!(query_contains(&url, "code_challenge", "challenge123"));
        assert!(query_contains(&url, "code_challenge_method", "S256"));
    }

    #[tokio::test]
    async fn exchange_code_success() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(POST)
                .path("/token")
                .header("content-type", "application/x-www-form-urlencoded")
                .body_contains("grant_type=authorization_code")
                .body_contains("code=abc");
            then.status(200).json_body_obj(&serde_json::json!({
                "access_token": "AT",
                "refresh_token": "RT",
                "expires_in": 3600,
            }));
        });

        let client = client_for(&server);
        let grant = client
            .exchange_code(
                &ClientId::new("id1", "secret1"),
                "abc",
                &["read".to_string()],
                "https://example.com/cb",
                None,
            )
            .await
            .unwrap();
        mock.assert();
        assert_eq!(grant.access_token, "AT");
        assert_eq!(grant.refresh_token.as_deref(), Some("RT"));
        assert!(grant.expires_at.is_some());
    }

    #[tokio::test]
    async fn exchange_code_failure_carries_status_and_body() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(POST).path("/token");
            then.status(400).body("invalid_grant");
        });

        let client = client_for(&server);
        let err = client
            .exchange_code(
                &ClientId::new("id1", "secret1"),
                "bad",
                &[],
                "https://example.com/cb",
                None,
            )
            .await
            .unwrap_err();
        mock.assert();
        match err {
            AuthError::ExchangeFailed { status, body } => {
                assert_eq!(status, StatusCode::BAD_REQUEST);
                assert_eq!(body, "invalid_grant");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn refresh_may_omit_refresh_token() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(POST)
                .path("/token")
                .body_contains("grant_type=refresh_token")
                .body_contains("refresh_token=RT");
            then.status(200).json_body_obj(&serde_json::json!({
                "access_token": "AT2",
                "expires_in": 7200,
            }));
        });

        let client = client_for(&server);
        let grant = client
            .refresh(&ClientId::new("id1", "secret1"), "RT")
            .await
            .unwrap();
        mock.assert();
        assert_eq!(grant.access_token, "AT2");
        assert!(grant.refresh_token.is_none());
    }

    #[tokio::test]
    async fn revoke_success_and_failure() {
        let server = MockServer::start();
        let ok = server.mock(|when, then| {
            when.method(POST).path("/revoke").body_contains("token=RT");
            then.status(200);
        });
        let client = client_for(&server);
        client.revoke("RT").await.unwrap();
        ok.assert();

        let server = MockServer::start();
        let denied = server.mock(|when, then| {
            when.method(POST).path("/revoke");
            then.status(400).body("invalid_token");
        });
        let client = client_for(&server);
        let err = client.revoke("RT").await.unwrap_err();
        denied.assert();
        assert!(matches!(err, AuthError::RevokeFailed { .. }));
    }
}
