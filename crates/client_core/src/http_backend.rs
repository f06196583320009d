//! HTTP adapter for the hosted auth, rows, storage and functions endpoints.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use reqwest::{Client, RequestBuilder, Response};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{json, Value};
use shared::{
    domain::Identity,
    error::{ErrorCode, RemoteError, ServiceErrorBody},
};
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, info, warn};
use url::Url;

use crate::{
    config::{ServiceCredentials, Settings},
    services::{
        AuthChange, AuthChangeKind, AuthProvider, BlobStore, FileUpload, FunctionInvoker,
        RecordQuery, RecordStore, RemoteResult, Services, SortDirection, UploadOptions,
    },
    session_file::{SessionFile, StoredSession},
};

const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    expires_at: Option<i64>,
    user: Identity,
}

#[derive(Debug, Serialize)]
struct OtpRequest<'a> {
    email: &'a str,
    create_user: bool,
}

#[derive(Debug, Serialize)]
struct VerifyRequest<'a> {
    #[serde(rename = "type")]
    kind: &'a str,
    email: &'a str,
    token: &'a str,
}

#[derive(Debug, Serialize)]
struct RefreshRequest<'a> {
    refresh_token: &'a str,
}

#[derive(Debug, Deserialize)]
struct UploadResponse {
    #[serde(rename = "Key", default)]
    key: Option<String>,
}

pub struct HttpBackend {
    http: Client,
    service_url: String,
    anon_key: String,
    bucket: String,
    redirect_url: Option<String>,
    session_file: SessionFile,
    session: Mutex<Option<StoredSession>>,
    changes: broadcast::Sender<AuthChange>,
}

impl HttpBackend {
    pub fn new(credentials: ServiceCredentials, settings: &Settings) -> Arc<Self> {
        let (changes, _) = broadcast::channel(64);
        Arc::new(Self {
            http: Client::new(),
            service_url: credentials.service_url,
            anon_key: credentials.anon_key,
            bucket: settings.storage_bucket.clone(),
            redirect_url: settings.redirect_url.clone(),
            session_file: SessionFile::new(settings.session_path.clone()),
            session: Mutex::new(None),
            changes,
        })
    }

    /// `None` when the endpoint or key is missing.
    pub fn from_settings(settings: &Settings) -> Option<Arc<Self>> {
        settings
            .credentials()
            .map(|credentials| Self::new(credentials, settings))
    }

    pub fn services(self: &Arc<Self>, digest_function: impl Into<String>) -> Services {
        Services::new(
            Arc::clone(self) as Arc<dyn AuthProvider>,
            Arc::clone(self) as Arc<dyn RecordStore>,
            Arc::clone(self) as Arc<dyn BlobStore>,
            Arc::clone(self) as Arc<dyn FunctionInvoker>,
        )
        .with_digest_function(digest_function)
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{path}", self.service_url)
    }

    fn authorized(&self, request: RequestBuilder, bearer: &str) -> RequestBuilder {
        request.header("apikey", &self.anon_key).bearer_auth(bearer)
    }

    /// The signed-in user's access token (refreshed if stale), else the public key.
    async fn bearer(&self) -> RemoteResult<String> {
        match self.active_session().await? {
            Some(session) => Ok(session.access_token),
            None => Ok(self.anon_key.clone()),
        }
    }

    async fn active_session(&self) -> RemoteResult<Option<StoredSession>> {
        let mut guard = self.session.lock().await;
        if guard.is_none() {
            *guard = self.session_file.load().await.map_err(|err| {
                RemoteError::new(ErrorCode::Internal, format!("{err:#}"))
            })?;
        }
        let Some(current) = guard.clone() else {
            return Ok(None);
        };
        if !current.is_expired(Utc::now()) {
            return Ok(Some(current));
        }

        debug!(user_id = %current.user.user_id, "auth: refreshing expired session");
        match self.refresh(&current.refresh_token).await {
            Ok(refreshed) => {
                self.persist(&refreshed).await;
                *guard = Some(refreshed.clone());
                drop(guard);
                // The refresh response carries the latest user record.
                let kind = if refreshed.user == current.user {
                    AuthChangeKind::TokenRefreshed
                } else {
                    info!(user_id = %refreshed.user.user_id, "auth: user record changed");
                    AuthChangeKind::UserUpdated
                };
                let _ = self.changes.send(AuthChange {
                    kind,
                    identity: Some(refreshed.user.clone()),
                });
                Ok(Some(refreshed))
            }
            Err(err) => {
                warn!("auth: session refresh failed: {err}");
                *guard = None;
                drop(guard);
                self.forget_persisted().await;
                let _ = self.changes.send(AuthChange {
                    kind: AuthChangeKind::SignedOut,
                    identity: None,
                });
                Err(err)
            }
        }
    }

    async fn refresh(&self, refresh_token: &str) -> RemoteResult<StoredSession> {
        let request = self
            .http
            .post(self.endpoint("/auth/v1/token"))
            .query(&[("grant_type", "refresh_token")])
            .json(&RefreshRequest { refresh_token });
        let token: TokenResponse =
            send_json(self.authorized(request, &self.anon_key)).await?;
        Ok(stored_session(token, Utc::now()))
    }

    async fn persist(&self, session: &StoredSession) {
        if let Err(err) = self.session_file.save(session).await {
            warn!("auth: failed to persist session: {err:#}");
        }
    }

    async fn forget_persisted(&self) {
        if let Err(err) = self.session_file.clear().await {
            warn!("auth: failed to clear persisted session: {err:#}");
        }
    }

    async fn establish(&self, session: StoredSession) -> Identity {
        self.persist(&session).await;
        let identity = session.user.clone();
        *self.session.lock().await = Some(session);
        info!(user_id = %identity.user_id, "auth: session established");
        let _ = self.changes.send(AuthChange {
            kind: AuthChangeKind::SignedIn,
            identity: Some(identity.clone()),
        });
        identity
    }

    /// Finishes a magic-link sign-in from the URL the link redirected to.
    pub async fn complete_sign_in_from_redirect(&self, link: &str) -> RemoteResult<Identity> {
        let params = RedirectParams::parse(link)?;
        let user: Identity = send_json(self.authorized(
            self.http.get(self.endpoint("/auth/v1/user")),
            &params.access_token,
        ))
        .await?;

        let session = StoredSession {
            expires_at: expiry(params.expires_at, params.expires_in, Utc::now()),
            access_token: params.access_token,
            refresh_token: params.refresh_token,
            user,
        };
        Ok(self.establish(session).await)
    }

    /// Finishes a sign-in with the one-time code from the email.
    pub async fn verify_email_code(&self, email: &str, code: &str) -> RemoteResult<Identity> {
        let request = self
            .http
            .post(self.endpoint("/auth/v1/verify"))
            .json(&VerifyRequest {
                kind: "email",
                email: email.trim(),
                token: code.trim(),
            });
        let token: TokenResponse =
            send_json(self.authorized(request, &self.anon_key)).await?;
        Ok(self.establish(stored_session(token, Utc::now())).await)
    }
}

#[async_trait]
impl AuthProvider for HttpBackend {
    async fn current_session(&self) -> RemoteResult<Option<Identity>> {
        Ok(self.active_session().await?.map(|session| session.user))
    }

    async fn send_magic_link(&self, email: &str) -> RemoteResult<()> {
        let mut request = self.http.post(self.endpoint("/auth/v1/otp")).json(&OtpRequest {
            email,
            create_user: true,
        });
        if let Some(redirect_url) = &self.redirect_url {
            request = request.query(&[("redirect_to", redirect_url.as_str())]);
        }
        send_empty(self.authorized(request, &self.anon_key)).await
    }

    async fn sign_out(&self) -> RemoteResult<()> {
        let current = self.session.lock().await.clone();
        let current = match current {
            Some(session) => Some(session),
            None => self
                .session_file
                .load()
                .await
                .map_err(|err| RemoteError::new(ErrorCode::Internal, format!("{err:#}")))?,
        };

        if let Some(session) = current {
            let request = self.http.post(self.endpoint("/auth/v1/logout"));
            match send_empty(self.authorized(request, &session.access_token)).await {
                Ok(()) => {}
                // The token is already dead server-side; finish locally.
                Err(err) if matches!(err.code, ErrorCode::Unauthorized | ErrorCode::NotFound) => {
                    debug!("auth: logout reported stale session: {err}");
                }
                Err(err) => return Err(err),
            }
        }

        *self.session.lock().await = None;
        self.forget_persisted().await;
        let _ = self.changes.send(AuthChange {
            kind: AuthChangeKind::SignedOut,
            identity: None,
        });
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<AuthChange> {
        self.changes.subscribe()
    }
}

#[async_trait]
impl RecordStore for HttpBackend {
    async fn select(&self, query: &RecordQuery) -> RemoteResult<Vec<Value>> {
        let bearer = self.bearer().await?;
        let request = self
            .http
            .get(self.endpoint(&format!("/rest/v1/{}", query.table)))
            .query(&record_query_params(query));
        send_json(self.authorized(request, &bearer)).await
    }

    async fn insert(&self, table: &str, row: Value) -> RemoteResult<()> {
        let bearer = self.bearer().await?;
        let request = self
            .http
            .post(self.endpoint(&format!("/rest/v1/{table}")))
            .header("Prefer", "return=minimal")
            .json(&row);
        send_empty(self.authorized(request, &bearer)).await
    }
}

#[async_trait]
impl BlobStore for HttpBackend {
    async fn upload(
        &self,
        path: &str,
        file: &FileUpload,
        options: UploadOptions,
    ) -> RemoteResult<String> {
        let bearer = self.bearer().await?;
        let content_type = file
            .content_type
            .clone()
            .unwrap_or_else(|| DEFAULT_CONTENT_TYPE.to_string());
        let request = self
            .http
            .post(self.endpoint(&format!("/storage/v1/object/{}/{path}", self.bucket)))
            .header("x-upsert", if options.upsert { "true" } else { "false" })
            .header(reqwest::header::CONTENT_TYPE, content_type)
            .body(file.bytes.clone());
        let response: UploadResponse = send_json(self.authorized(request, &bearer)).await?;

        let bucket_prefix = format!("{}/", self.bucket);
        Ok(response
            .key
            .map(|key| {
                key.strip_prefix(&bucket_prefix)
                    .map(str::to_string)
                    .unwrap_or(key)
            })
            .unwrap_or_else(|| path.to_string()))
    }

    fn public_url(&self, stored_path: &str) -> String {
        self.endpoint(&format!(
            "/storage/v1/object/public/{}/{stored_path}",
            self.bucket
        ))
    }
}

#[async_trait]
impl FunctionInvoker for HttpBackend {
    async fn invoke(&self, name: &str, body: Value) -> RemoteResult<Value> {
        let bearer = self.bearer().await?;
        let request = self
            .http
            .post(self.endpoint(&format!("/functions/v1/{name}")))
            .json(&body);
        let response = send(self.authorized(request, &bearer)).await?;
        let bytes = response
            .bytes()
            .await
            .map_err(|err| RemoteError::new(ErrorCode::Transport, err.to_string()))?;
        if bytes.is_empty() {
            return Ok(json!({}));
        }
        serde_json::from_slice(&bytes).map_err(|err| {
            RemoteError::new(ErrorCode::Decode, format!("invalid function response: {err}"))
        })
    }
}

fn record_query_params(query: &RecordQuery) -> Vec<(String, String)> {
    let mut params = vec![("select".to_string(), "*".to_string())];
    if let Some((column, value)) = &query.eq {
        params.push((column.clone(), format!("eq.{value}")));
    }
    if let Some((column, direction)) = &query.order {
        let direction = match direction {
            SortDirection::Ascending => "asc",
            SortDirection::Descending => "desc",
        };
        params.push(("order".to_string(), format!("{column}.{direction}")));
    }
    if let Some(limit) = query.limit {
        params.push(("limit".to_string(), limit.to_string()));
    }
    params
}

const DEFAULT_TOKEN_LIFETIME_SECS: i64 = 3600;

/// Absolute expiry wins over a relative lifetime.
fn expiry(expires_at: Option<i64>, expires_in: Option<i64>, now: DateTime<Utc>) -> DateTime<Utc> {
    expires_at
        .and_then(|secs| DateTime::from_timestamp(secs, 0))
        .unwrap_or_else(|| {
            now + Duration::seconds(expires_in.unwrap_or(DEFAULT_TOKEN_LIFETIME_SECS))
        })
}

fn stored_session(token: TokenResponse, now: DateTime<Utc>) -> StoredSession {
    StoredSession {
        expires_at: expiry(token.expires_at, token.expires_in, now),
        access_token: token.access_token,
        refresh_token: token.refresh_token,
        user: token.user,
    }
}

/// Tokens carried in a magic-link redirect, from the fragment or the query.
#[derive(Debug, Clone, PartialEq, Eq)]
struct RedirectParams {
    access_token: String,
    refresh_token: String,
    expires_in: Option<i64>,
    expires_at: Option<i64>,
}

impl RedirectParams {
    fn parse(link: &str) -> RemoteResult<Self> {
        let url = Url::parse(link.trim()).map_err(|err| {
            RemoteError::new(ErrorCode::Validation, format!("invalid sign-in link: {err}"))
        })?;

        let mut pairs: Vec<(String, String)> = url
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        if let Some(fragment) = url.fragment() {
            pairs.extend(
                url::form_urlencoded::parse(fragment.as_bytes())
                    .map(|(k, v)| (k.into_owned(), v.into_owned())),
            );
        }
        let get = |key: &str| {
            pairs
                .iter()
                .rev()
                .find(|(k, _)| k == key)
                .map(|(_, v)| v.clone())
                .filter(|v| !v.is_empty())
        };

        if let Some(description) = get("error_description").or_else(|| get("error")) {
            return Err(RemoteError::new(ErrorCode::Unauthorized, description));
        }

        let (Some(access_token), Some(refresh_token)) = (get("access_token"), get("refresh_token"))
        else {
            return Err(RemoteError::new(
                ErrorCode::Validation,
                "sign-in link is missing its access or refresh token",
            ));
        };

        Ok(Self {
            access_token,
            refresh_token,
            expires_in: get("expires_in").and_then(|v| v.parse().ok()),
            expires_at: get("expires_at").and_then(|v| v.parse().ok()),
        })
    }
}

async fn send(request: RequestBuilder) -> RemoteResult<Response> {
    let response = request
        .send()
        .await
        .map_err(|err| RemoteError::new(ErrorCode::Transport, err.to_string()))?;
    if response.status().is_success() {
        return Ok(response);
    }
    Err(read_error(response).await)
}

async fn send_json<T: DeserializeOwned>(request: RequestBuilder) -> RemoteResult<T> {
    send(request)
        .await?
        .json()
        .await
        .map_err(|err| RemoteError::new(ErrorCode::Decode, err.to_string()))
}

async fn send_empty(request: RequestBuilder) -> RemoteResult<()> {
    send(request).await.map(|_| ())
}

async fn read_error(response: Response) -> RemoteError {
    let code = ErrorCode::from_status(response.status().as_u16());
    let message = match response.json::<ServiceErrorBody>().await {
        Ok(body) => body.into_message(),
        Err(_) => None,
    };
    RemoteError { code, message }
}

#[cfg(test)]
#[path = "tests/http_backend_tests.rs"]
mod tests;
