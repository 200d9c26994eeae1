//! Interactive three-legged OAuth2 user authorization.
//!
//! [`UserAuthorizer`] manages the credential lifecycle for end users:
//! building consent URLs, exchanging authorization codes, persisting and
//! refresh-monitoring per-user credentials, and revoking grants. The wire
//! protocol and the persistence medium stay behind the [`OAuth2Client`]
//! and [`TokenStore`] capabilities.

mod authorizer;
mod config;
mod credential;
mod error;
mod oauth;
mod pkce;
mod store;

pub use authorizer::{
    AuthorizationUrlOptions, CodeExchangeOptions, UserAuthorizer, DEFAULT_CALLBACK_URI,
};
pub use config::{ConfigError, StoreLocator};
pub use credential::{normalize_scopes, Credential, RefreshListener, StoredCredential};
pub use error::AuthError;
pub use oauth::{
    AuthorizationRequest, ClientId, HttpOAuth2Client, OAuth2Client, OAuth2Endpoints, TokenGrant,
};
pub use pkce::{random_state, PkcePair};
pub use store::{FileTokenStore, MemoryTokenStore, TokenStore};
