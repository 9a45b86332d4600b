// Credentials: where the token comes from, how it is sent, and the
// `login` flow that produces it.
//
// Resolution order:
//   1. `LGP_API_KEY` (with `LGP_USER_ID` for `lgp_` keys)
//   2. `~/.leadgenius_auth.json`, preferring `api_key` over `token`

use crate::api::{endpoint, ApiError, ApiRequest, Transport};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION};
use serde::{Deserialize, Serialize};
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const AUTH_FILE_NAME: &str = ".leadgenius_auth.json";
pub const ENV_API_KEY: &str = "LGP_API_KEY";
pub const ENV_USER_ID: &str = "LGP_USER_ID";

const API_KEY_PREFIX: &str = "lgp_";

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("no credentials found: set LGP_API_KEY or run `lgp-import login` (looked in {path})")]
    NotConfigured { path: String },

    #[error("API keys require a user id: set LGP_USER_ID or add \"user_id\" to the auth file")]
    MissingUserId,

    #[error("credential contains characters not allowed in an HTTP header")]
    InvalidHeader,

    #[error("cannot access {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("auth file {path} is not valid JSON: {source}")]
    Json {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("authentication failed (status {status}): {body}")]
    Rejected { status: u16, body: String },

    #[error("authentication succeeded but no token was returned")]
    MissingToken,

    #[error(transparent)]
    Api(#[from] ApiError),
}

/// Contents of the auth file. Unknown keys are ignored on read.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredAuth {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
}

#[derive(Clone, PartialEq, Eq)]
pub enum Credentials {
    /// JWT from `login`, sent as `Authorization: Bearer`.
    Bearer(String),
    /// `lgp_` key, sent as `x-api-key` with `x-user-id`.
    ApiKey { key: String, user_id: String },
}

// Keep secrets out of logs and panic messages.
impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Credentials::Bearer(_) => f.write_str("Credentials::Bearer(..)"),
            Credentials::ApiKey { user_id, .. } => f
                .debug_struct("Credentials::ApiKey")
                .field("user_id", user_id)
                .finish_non_exhaustive(),
        }
    }
}

impl Credentials {
    pub fn from_key(key: String, user_id: Option<String>) -> Result<Self, AuthError> {
        if key.starts_with(API_KEY_PREFIX) {
            let user_id = user_id.ok_or(AuthError::MissingUserId)?;
            Ok(Credentials::ApiKey { key, user_id })
        } else {
            Ok(Credentials::Bearer(key))
        }
    }

    /// Resolve from the process environment and the auth file.
    pub fn resolve() -> Result<Self, AuthError> {
        let path = auth_file_path();
        let stored = load_stored_auth(&path)?;
        Self::resolve_from(
            std::env::var(ENV_API_KEY).ok(),
            std::env::var(ENV_USER_ID).ok(),
            stored,
        )
        .map_err(|e| match e {
            AuthError::NotConfigured { .. } => AuthError::NotConfigured {
                path: path.display().to_string(),
            },
            other => other,
        })
    }

    pub fn resolve_from(
        env_key: Option<String>,
        env_user_id: Option<String>,
        stored: Option<StoredAuth>,
    ) -> Result<Self, AuthError> {
        let stored = stored.unwrap_or_default();
        let user_id = env_user_id.or(stored.user_id);

        if let Some(key) = env_key.filter(|k| !k.is_empty()) {
            return Self::from_key(key, user_id);
        }
        if let Some(key) = stored.api_key.or(stored.token) {
            if let Some(email) = &stored.email {
                tracing::info!(email = %email, "Using saved credentials");
            }
            return Self::from_key(key, user_id);
        }
        Err(AuthError::NotConfigured {
            path: AUTH_FILE_NAME.to_string(),
        })
    }

    pub fn headers(&self) -> Result<HeaderMap, AuthError> {
        let mut headers = HeaderMap::new();
        match self {
            Credentials::Bearer(token) => {
                let val = HeaderValue::from_str(&format!("Bearer {}", token))
                    .map_err(|_| AuthError::InvalidHeader)?;
                headers.insert(AUTHORIZATION, val);
            }
            Credentials::ApiKey { key, user_id } => {
                headers.insert(
                    HeaderName::from_static("x-api-key"),
                    HeaderValue::from_str(key).map_err(|_| AuthError::InvalidHeader)?,
                );
                headers.insert(
                    HeaderName::from_static("x-user-id"),
                    HeaderValue::from_str(user_id).map_err(|_| AuthError::InvalidHeader)?,
                );
            }
        }
        Ok(headers)
    }
}

/// Auth file in the user's home directory (or the current directory
/// when there is no home).
pub fn auth_file_path() -> PathBuf {
    let dir = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
    dir.join(AUTH_FILE_NAME)
}

/// `Ok(None)` when the file does not exist.
pub fn load_stored_auth(path: &Path) -> Result<Option<StoredAuth>, AuthError> {
    let data = match std::fs::read_to_string(path) {
        Ok(data) => data,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(source) => {
            return Err(AuthError::Io {
                path: path.display().to_string(),
                source,
            })
        }
    };
    serde_json::from_str(&data)
        .map(Some)
        .map_err(|source| AuthError::Json {
            path: path.display().to_string(),
            source,
        })
}

pub fn save_stored_auth(path: &Path, auth: &StoredAuth) -> Result<(), AuthError> {
    let json = serde_json::to_string_pretty(auth).map_err(|source| AuthError::Json {
        path: path.display().to_string(),
        source,
    })?;
    std::fs::write(path, json).map_err(|source| AuthError::Io {
        path: path.display().to_string(),
        source,
    })
}

#[derive(Debug, Serialize)]
struct LoginRequest<'a> {
    username: &'a str,
    password: &'a str,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct LoginResponse {
    tokens: LoginTokensBody,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct LoginTokensBody {
    access_token: Option<String>,
    refresh_token: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginTokens {
    pub access_token: String,
    pub refresh_token: Option<String>,
}

/// Exchange email and password for tokens. One attempt, no retry: a
/// wrong password will not get better by waiting.
pub fn login<T: Transport>(
    transport: &T,
    base_url: &str,
    email: &str,
    password: &str,
) -> Result<LoginTokens, AuthError> {
    let url = endpoint(base_url, "api/auth");
    tracing::info!(url = %url, "Authenticating");

    let body = serde_json::to_value(LoginRequest {
        username: email,
        password,
    })
    .map_err(ApiError::from)?;
    let res = transport.send(&ApiRequest::post(url, body))?;
    if res.status != 200 {
        return Err(AuthError::Rejected {
            status: res.status,
            body: res.body.to_string(),
        });
    }

    let parsed: LoginResponse = res.json()?;
    let access_token = parsed
        .tokens
        .access_token
        .filter(|t| !t.is_empty())
        .ok_or(AuthError::MissingToken)?;
    Ok(LoginTokens {
        access_token,
        refresh_token: parsed.tokens.refresh_token,
    })
}
