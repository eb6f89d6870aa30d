//! GitHub and Google sign-in via the authorization-code flow.
//!
//! Providers are configured entirely from env vars; a provider with no
//! client credentials is treated as disabled rather than a startup error.
//! Endpoint base URLs can be overridden so tests can stand in a local
//! server for the real provider.

use base64::Engine as _;
use dashmap::DashMap;
use rand::RngCore;
use serde::Deserialize;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::auth::Role;
use crate::error::ApiError;
use crate::models::{NewUser, User};
use crate::repo::{Repo, RepoError};

/// How long an issued state token stays redeemable.
const STATE_TTL: Duration = Duration::from_secs(600);

pub const PROVIDERS: &[&str] = &["github", "google"];

pub fn is_supported(name: &str) -> bool {
    PROVIDERS.contains(&name)
}

/// Anti-forgery state tokens, process local like the rate limiter.
/// Issued on login redirect, redeemed exactly once by the callback.
#[derive(Clone, Default)]
pub struct OauthStateStore {
    states: Arc<DashMap<String, (String, Instant)>>,
}

impl OauthStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn issue(&self, provider: &str) -> String {
        // drop expired entries while we are here
        self.states
            .retain(|_, (_, created)| created.elapsed() < STATE_TTL);
        let mut bytes = [0u8; 24];
        rand::thread_rng().fill_bytes(&mut bytes);
        let state = base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes);
        self.states
            .insert(state.clone(), (provider.to_string(), Instant::now()));
        state
    }

    /// One-shot redemption; a state is gone after its first use.
    pub fn consume(&self, provider: &str, state: &str) -> bool {
        match self.states.remove(state) {
            Some((_, (p, created))) => p == provider && created.elapsed() < STATE_TTL,
            None => false,
        }
    }
}

#[derive(Clone)]
pub struct Provider {
    pub name: &'static str,
    pub client_id: String,
    pub client_secret: String,
    pub authorize_url: String,
    pub token_url: String,
    pub userinfo_url: String,
    pub scope: &'static str,
}

/// Identity details fetched from a provider after the code exchange.
#[derive(Debug, Clone)]
pub struct ProviderIdentity {
    pub provider_account_id: String,
    pub email: String,
    pub name: String,
    pub image: Option<String>,
}

fn env_or(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

/// Resolve a supported provider; `None` means it is not configured.
pub fn configured(name: &str) -> Option<Provider> {
    match name {
        "github" => {
            let client_id = std::env::var("GITHUB_CLIENT_ID").ok()?;
            let client_secret = std::env::var("GITHUB_CLIENT_SECRET").ok()?;
            let oauth_base = env_or("GITHUB_OAUTH_BASE", "https://github.com");
            let api_base = env_or("GITHUB_API_BASE", "https://api.github.com");
            Some(Provider {
                name: "github",
                client_id,
                client_secret,
                authorize_url: format!("{oauth_base}/login/oauth/authorize"),
                token_url: format!("{oauth_base}/login/oauth/access_token"),
                userinfo_url: format!("{api_base}/user"),
                scope: "user:email",
            })
        }
        "google" => {
            let client_id = std::env::var("GOOGLE_CLIENT_ID").ok()?;
            let client_secret = std::env::var("GOOGLE_CLIENT_SECRET").ok()?;
            Some(Provider {
                name: "google",
                client_id,
                client_secret,
                authorize_url: format!(
                    "{}/o/oauth2/v2/auth",
                    env_or("GOOGLE_AUTH_BASE", "https://accounts.google.com")
                ),
                token_url: env_or("GOOGLE_TOKEN_URL", "https://oauth2.googleapis.com/token"),
                userinfo_url: env_or(
                    "GOOGLE_USERINFO_URL",
                    "https://www.googleapis.com/oauth2/v2/userinfo",
                ),
                scope: "openid email profile",
            })
        }
        _ => None,
    }
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
}

#[derive(Deserialize)]
struct GithubUser {
    id: i64,
    login: String,
    name: Option<String>,
    email: Option<String>,
    avatar_url: Option<String>,
}

#[derive(Deserialize)]
struct GoogleUser {
    id: String,
    email: String,
    name: Option<String>,
    picture: Option<String>,
}

impl Provider {
    fn redirect_uri(&self) -> String {
        let base = env_or("PUBLIC_BASE_URL", "http://localhost:8080");
        format!("{}/api/auth/{}/callback", base, self.name)
    }

    /// Where to send the browser to start the flow.
    pub fn authorize_redirect(&self, state: &str) -> String {
        format!(
            "{}?client_id={}&redirect_uri={}&response_type=code&scope={}&state={}",
            self.authorize_url,
            self.client_id,
            urlencoding::encode(&self.redirect_uri()),
            urlencoding::encode(self.scope),
            state
        )
    }

    /// Exchange the callback code for a token, then fetch the profile.
    pub async fn fetch_identity(&self, code: &str) -> Result<ProviderIdentity, ApiError> {
        let client = reqwest::Client::new();
        let redirect_uri = self.redirect_uri();
        let token = client
            .post(&self.token_url)
            // GitHub answers form-encoded unless JSON is requested
            .header(reqwest::header::ACCEPT, "application/json")
            .form(&[
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
                ("grant_type", "authorization_code"),
                ("code", code),
                ("redirect_uri", redirect_uri.as_str()),
            ])
            .send()
            .await
            .map_err(|e| ApiError::Internal(format!("{} token exchange failed: {e}", self.name)))?
            .json::<TokenResponse>()
            .await
            .map_err(|e| ApiError::Internal(format!("{} token response invalid: {e}", self.name)))?;

        let response = client
            .get(&self.userinfo_url)
            .header(
                reqwest::header::AUTHORIZATION,
                format!("Bearer {}", token.access_token),
            )
            // GitHub's API rejects requests without a user agent
            .header(reqwest::header::USER_AGENT, "blh")
            .send()
            .await
            .map_err(|e| ApiError::Internal(format!("{} profile fetch failed: {e}", self.name)))?;

        match self.name {
            "github" => {
                let u: GithubUser = response.json().await.map_err(|e| {
                    ApiError::Internal(format!("github profile invalid: {e}"))
                })?;
                // private-email accounts return a null email
                let email = u
                    .email
                    .unwrap_or_else(|| format!("{}+{}@users.noreply.github.com", u.id, u.login))
                    .to_lowercase();
                Ok(ProviderIdentity {
                    provider_account_id: u.id.to_string(),
                    email,
                    name: u.name.unwrap_or(u.login),
                    image: u.avatar_url,
                })
            }
            _ => {
                let u: GoogleUser = response.json().await.map_err(|e| {
                    ApiError::Internal(format!("google profile invalid: {e}"))
                })?;
                let email = u.email.to_lowercase();
                let name = u
                    .name
                    .unwrap_or_else(|| email.split('@').next().unwrap_or("user").to_string());
                Ok(ProviderIdentity {
                    provider_account_id: u.id,
                    email,
                    name,
                    image: u.picture,
                })
            }
        }
    }
}

/// Match the identity to a local account: linked provider account first,
/// then an existing account with the same email, else a fresh one.
pub async fn resolve_user(
    repo: &dyn Repo,
    provider: &str,
    identity: ProviderIdentity,
) -> Result<User, ApiError> {
    if let Some(user) = repo
        .find_user_by_oauth(provider, &identity.provider_account_id)
        .await?
    {
        return Ok(user);
    }
    match repo.get_user_by_email(&identity.email).await {
        Ok(user) => {
            repo.link_oauth_account(user.id, provider, &identity.provider_account_id)
                .await?;
            Ok(user)
        }
        Err(RepoError::NotFound) => {
            let role = if crate::auth::is_bootstrap_admin(&identity.email) {
                Role::Admin
            } else {
                Role::User
            };
            let user = repo
                .create_user(NewUser {
                    email: identity.email,
                    name: identity.name,
                    password_hash: None,
                    role,
                    image: identity.image,
                })
                .await?;
            repo.link_oauth_account(user.id, provider, &identity.provider_account_id)
                .await?;
            log::info!("created account {} via {}", user.id, provider);
            Ok(user)
        }
        Err(e) => Err(e.into()),
    }
}
