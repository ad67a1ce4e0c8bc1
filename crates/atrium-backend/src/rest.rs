//! REST adapter for the hosted Postgres generation of the hub.
//!
//! Rows travel over PostgREST-style endpoints (`/rest/v1/<table>` with
//! `column=eq.value` filters), blobs over the storage API, and auth over the
//! password grant. The hosted push channel itself is an external
//! collaborator; this adapter reproduces its insert/update/delete event
//! contract by polling and diffing snapshots, so the synchronizer sees the
//! same [`ChangeEvent`] stream either way.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use atrium_shared::constants::MAX_IMAGE_SIZE;
use atrium_shared::{Message, MessageId, Profile, ReplyRef, Role, TargetKey, TypingFact, UserId};

use crate::adapter::{Backend, ChangeEvent, Identity, NewMessage, ProfileUpdate, Subscription};
use crate::error::{BackendError, Result};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// REST backend configuration.
#[derive(Debug, Clone)]
pub struct RestConfig {
    /// Base URL of the hosted project, without a trailing slash.
    /// Env: `ATRIUM_BASE_URL`
    pub base_url: String,

    /// Project API key sent as the `apikey` header on every request.
    /// Env: `ATRIUM_API_KEY`
    pub api_key: String,

    /// Storage bucket for image uploads.
    /// Env: `ATRIUM_BUCKET`
    /// Default: `"chat-images"`
    pub bucket: String,

    /// Change-feed poll interval.
    /// Env: `ATRIUM_POLL_MS`
    /// Default: 1500 ms
    pub poll_interval: Duration,
}

impl Default for RestConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:54321".to_string(),
            api_key: String::new(),
            bucket: "chat-images".to_string(),
            poll_interval: Duration::from_millis(1500),
        }
    }
}

impl RestConfig {
    /// Load configuration from environment variables, falling back to
    /// defaults.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(url) = std::env::var("ATRIUM_BASE_URL") {
            config.base_url = url.trim_end_matches('/').to_string();
        }
        if let Ok(key) = std::env::var("ATRIUM_API_KEY") {
            config.api_key = key;
        }
        if let Ok(bucket) = std::env::var("ATRIUM_BUCKET") {
            if !bucket.is_empty() {
                config.bucket = bucket;
            }
        }
        if let Ok(ms) = std::env::var("ATRIUM_POLL_MS") {
            match ms.parse::<u64>() {
                Ok(n) if n > 0 => config.poll_interval = Duration::from_millis(n),
                _ => warn!(value = %ms, "Invalid ATRIUM_POLL_MS, using default"),
            }
        }

        config
    }
}

// ---------------------------------------------------------------------------
// Wire rows
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
struct MessageRow {
    id: String,
    sender: String,
    target: String,
    text: Option<String>,
    image_url: Option<String>,
    reply_to: Option<ReplyRef>,
    created_at: DateTime<Utc>,
    edited_at: Option<DateTime<Utc>>,
}

impl MessageRow {
    fn into_message(self) -> Option<Message> {
        let target = TargetKey::from_filter_key(&self.target)?;
        Some(Message {
            id: MessageId(self.id),
            sender: UserId::new(self.sender),
            target,
            text: self.text,
            image_url: self.image_url,
            reply_to: self.reply_to,
            created_at: self.created_at,
            edited_at: self.edited_at,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProfileRow {
    id: String,
    display_name: String,
    avatar_url: Option<String>,
    avatar_color: Option<String>,
    role: String,
    online: bool,
    last_seen: DateTime<Utc>,
}

impl ProfileRow {
    fn into_profile(self) -> Profile {
        let role = Role::parse(&self.role).unwrap_or_else(|| {
            warn!(id = %self.id, role = %self.role, "Unknown role in profile row");
            Role::User
        });
        Profile {
            id: UserId::new(self.id),
            display_name: self.display_name,
            avatar_url: self.avatar_url,
            avatar_color: self.avatar_color,
            role,
            online: self.online,
            last_seen: self.last_seen,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct MarkerRow {
    #[serde(rename = "user")]
    user_id: String,
    target: String,
    at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct TypingRow {
    #[serde(rename = "user")]
    user_id: String,
    target: String,
    is_typing: bool,
    at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
struct AuthUser {
    id: String,
    email: String,
}

#[derive(Debug, Deserialize)]
struct AuthSession {
    access_token: String,
    user: AuthUser,
}

struct AuthState {
    identity: Identity,
    access_token: String,
}

// ---------------------------------------------------------------------------
// Adapter
// ---------------------------------------------------------------------------

pub struct RestBackend {
    http: reqwest::Client,
    config: RestConfig,
    auth: Arc<Mutex<Option<AuthState>>>,
}

impl RestBackend {
    pub fn new(config: RestConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            config,
            auth: Arc::new(Mutex::new(None)),
        }
    }

    fn auth_slot(&self) -> MutexGuard<'_, Option<AuthState>> {
        self.auth.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn table_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{}", self.config.base_url, table)
    }

    fn headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        if let Ok(v) = HeaderValue::from_str(&self.config.api_key) {
            headers.insert("apikey", v);
        }
        if let Some(state) = self.auth_slot().as_ref() {
            if let Ok(v) = HeaderValue::from_str(&format!("Bearer {}", state.access_token)) {
                headers.insert(reqwest::header::AUTHORIZATION, v);
            }
        }
        headers
    }

    async fn check(resp: reqwest::Response) -> Result<reqwest::Response> {
        match resp.status() {
            s if s.is_success() => Ok(resp),
            StatusCode::NOT_FOUND => Err(BackendError::NotFound),
            StatusCode::CONFLICT => Err(BackendError::DuplicateIdentifier),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                Err(BackendError::Rejected("Not authorized".to_string()))
            }
            s => {
                let body = resp.text().await.unwrap_or_default();
                Err(BackendError::Rejected(format!("{s}: {body}")))
            }
        }
    }

    async fn fetch_message_rows(&self, target: &TargetKey) -> Result<Vec<Message>> {
        let resp = self
            .http
            .get(self.table_url("messages"))
            .headers(self.headers())
            .query(&[
                ("target", format!("eq.{}", target.filter_key())),
                ("order", "created_at.asc,id.asc".to_string()),
            ])
            .send()
            .await?;
        let rows: Vec<MessageRow> = Self::check(resp).await?.json().await?;
        Ok(rows.into_iter().filter_map(MessageRow::into_message).collect())
    }

    fn row_of(&self, new: &NewMessage) -> serde_json::Value {
        serde_json::json!({
            "sender": new.sender.as_str(),
            "target": new.target.filter_key(),
            "text": new.text,
            "image_url": new.image_url,
            "reply_to": new.reply_to,
        })
    }
}

impl Backend for RestBackend {
    // -- Auth --

    async fn sign_up(&self, email: &str, password: &str, display_name: &str) -> Result<Identity> {
        let resp = self
            .http
            .post(format!("{}/auth/v1/signup", self.config.base_url))
            .headers(self.headers())
            .json(&serde_json::json!({ "email": email, "password": password }))
            .send()
            .await?;
        if resp.status() == StatusCode::UNPROCESSABLE_ENTITY {
            return Err(BackendError::DuplicateIdentifier);
        }
        let session: AuthSession = Self::check(resp).await?.json().await?;

        let identity = Identity {
            user_id: UserId::new(session.user.id.clone()),
            email: session.user.email.clone(),
        };
        *self.auth_slot() = Some(AuthState {
            identity: identity.clone(),
            access_token: session.access_token,
        });

        // The profile row is created after the account so the directory can
        // list the user immediately.
        let row = ProfileRow {
            id: session.user.id,
            display_name: display_name.to_string(),
            avatar_url: None,
            avatar_color: None,
            role: Role::User.as_str().to_string(),
            online: false,
            last_seen: Utc::now(),
        };
        let resp = self
            .http
            .post(self.table_url("profiles"))
            .headers(self.headers())
            .json(&row)
            .send()
            .await?;
        Self::check(resp).await?;

        debug!(user = %identity.user_id, "Account registered");
        Ok(identity)
    }

    async fn sign_in(&self, email: &str, password: &str) -> Result<Identity> {
        let resp = self
            .http
            .post(format!(
                "{}/auth/v1/token?grant_type=password",
                self.config.base_url
            ))
            .headers(self.headers())
            .json(&serde_json::json!({ "email": email, "password": password }))
            .send()
            .await?;
        if resp.status() == StatusCode::BAD_REQUEST || resp.status() == StatusCode::UNAUTHORIZED {
            return Err(BackendError::InvalidCredentials);
        }
        let session: AuthSession = Self::check(resp).await?.json().await?;

        let identity = Identity {
            user_id: UserId::new(session.user.id),
            email: session.user.email,
        };
        *self.auth_slot() = Some(AuthState {
            identity: identity.clone(),
            access_token: session.access_token,
        });
        Ok(identity)
    }

    async fn sign_out(&self) -> Result<()> {
        let headers = self.headers();
        *self.auth_slot() = None;
        let resp = self
            .http
            .post(format!("{}/auth/v1/logout", self.config.base_url))
            .headers(headers)
            .send()
            .await?;
        Self::check(resp).await?;
        Ok(())
    }

    async fn current_identity(&self) -> Result<Option<Identity>> {
        Ok(self.auth_slot().as_ref().map(|s| s.identity.clone()))
    }

    // -- Profiles --

    async fn fetch_profiles(&self) -> Result<Vec<Profile>> {
        let resp = self
            .http
            .get(self.table_url("profiles"))
            .headers(self.headers())
            .send()
            .await?;
        let rows: Vec<ProfileRow> = Self::check(resp).await?.json().await?;
        Ok(rows.into_iter().map(ProfileRow::into_profile).collect())
    }

    async fn fetch_profile(&self, id: &UserId) -> Result<Profile> {
        let resp = self
            .http
            .get(self.table_url("profiles"))
            .headers(self.headers())
            .query(&[("id", format!("eq.{id}"))])
            .send()
            .await?;
        let rows: Vec<ProfileRow> = Self::check(resp).await?.json().await?;
        rows.into_iter()
            .next()
            .map(ProfileRow::into_profile)
            .ok_or(BackendError::NotFound)
    }

    async fn update_profile(&self, id: &UserId, update: ProfileUpdate) -> Result<()> {
        let mut patch = serde_json::Map::new();
        if let Some(name) = update.display_name {
            patch.insert("displayName".into(), name.into());
        }
        if let Some(url) = update.avatar_url {
            patch.insert("avatarUrl".into(), url.into());
        }
        if let Some(color) = update.avatar_color {
            patch.insert("avatarColor".into(), color.into());
        }
        if patch.is_empty() {
            return Ok(());
        }

        let resp = self
            .http
            .patch(self.table_url("profiles"))
            .headers(self.headers())
            .query(&[("id", format!("eq.{id}"))])
            .json(&serde_json::Value::Object(patch))
            .send()
            .await?;
        Self::check(resp).await?;
        Ok(())
    }

    async fn set_role(&self, id: &UserId, role: Role) -> Result<()> {
        let resp = self
            .http
            .patch(self.table_url("profiles"))
            .headers(self.headers())
            .query(&[("id", format!("eq.{id}"))])
            .json(&serde_json::json!({ "role": role.as_str() }))
            .send()
            .await?;
        Self::check(resp).await?;
        Ok(())
    }

    async fn set_presence(
        &self,
        id: &UserId,
        online: bool,
        last_seen: DateTime<Utc>,
    ) -> Result<()> {
        let resp = self
            .http
            .patch(self.table_url("profiles"))
            .headers(self.headers())
            .query(&[("id", format!("eq.{id}"))])
            .json(&serde_json::json!({ "online": online, "lastSeen": last_seen }))
            .send()
            .await?;
        Self::check(resp).await?;
        Ok(())
    }

    // -- Messages --

    async fn fetch_messages(&self, target: &TargetKey) -> Result<Vec<Message>> {
        self.fetch_message_rows(target).await
    }

    async fn count_messages_since(
        &self,
        target: &TargetKey,
        since: DateTime<Utc>,
        exclude_sender: &UserId,
    ) -> Result<u64> {
        let mut headers = self.headers();
        headers.insert("Prefer", HeaderValue::from_static("count=exact"));
        headers.insert("Range", HeaderValue::from_static("0-0"));

        let resp = self
            .http
            .get(self.table_url("messages"))
            .headers(headers)
            .query(&[
                ("select", "id".to_string()),
                ("target", format!("eq.{}", target.filter_key())),
                ("created_at", format!("gt.{}", since.to_rfc3339())),
                ("sender", format!("neq.{exclude_sender}")),
            ])
            .send()
            .await?;
        let resp = Self::check(resp).await?;

        // Total arrives as `Content-Range: 0-0/<total>`.
        let total = resp
            .headers()
            .get(reqwest::header::CONTENT_RANGE)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.rsplit('/').next())
            .and_then(|n| n.parse::<u64>().ok())
            .unwrap_or(0);
        Ok(total)
    }

    async fn insert_message(&self, new: NewMessage) -> Result<Message> {
        let mut headers = self.headers();
        headers.insert("Prefer", HeaderValue::from_static("return=representation"));

        let resp = self
            .http
            .post(self.table_url("messages"))
            .headers(headers)
            .json(&self.row_of(&new))
            .send()
            .await?;
        let rows: Vec<MessageRow> = Self::check(resp).await?.json().await?;
        rows.into_iter()
            .next()
            .and_then(MessageRow::into_message)
            .ok_or_else(|| BackendError::Rejected("Insert returned no row".to_string()))
    }

    async fn update_message_text(
        &self,
        id: &MessageId,
        text: &str,
        edited_at: DateTime<Utc>,
    ) -> Result<()> {
        let resp = self
            .http
            .patch(self.table_url("messages"))
            .headers(self.headers())
            .query(&[("id", format!("eq.{id}"))])
            .json(&serde_json::json!({ "text": text, "edited_at": edited_at }))
            .send()
            .await?;
        Self::check(resp).await?;
        Ok(())
    }

    async fn delete_message(&self, id: &MessageId) -> Result<()> {
        let resp = self
            .http
            .delete(self.table_url("messages"))
            .headers(self.headers())
            .query(&[("id", format!("eq.{id}"))])
            .send()
            .await?;
        Self::check(resp).await?;
        Ok(())
    }

    async fn subscribe_messages(&self, target: &TargetKey) -> Result<Subscription<ChangeEvent>> {
        // Seed the diff baseline before the first tick so the subscription
        // only reports changes after its creation.
        let mut known: HashMap<MessageId, Message> = self
            .fetch_message_rows(target)
            .await?
            .into_iter()
            .map(|m| (m.id.clone(), m))
            .collect();

        let (tx, rx) = mpsc::unbounded_channel();
        let backend = Self {
            http: self.http.clone(),
            config: self.config.clone(),
            auth: Arc::clone(&self.auth),
        };
        let target = target.clone();
        let interval = self.config.poll_interval;

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                if tx.is_closed() {
                    break;
                }
                let snapshot = match backend.fetch_message_rows(&target).await {
                    Ok(rows) => rows,
                    Err(e) => {
                        // Transient poll failures keep the feed alive.
                        warn!(key = %target, error = %e, "Change-feed poll failed");
                        continue;
                    }
                };

                let mut fresh: HashMap<MessageId, Message> = HashMap::new();
                let mut events = Vec::new();
                for m in snapshot {
                    match known.get(&m.id) {
                        None => events.push(ChangeEvent::Inserted(m.clone())),
                        Some(prev) if prev != &m => events.push(ChangeEvent::Updated(m.clone())),
                        Some(_) => {}
                    }
                    fresh.insert(m.id.clone(), m);
                }
                for id in known.keys() {
                    if !fresh.contains_key(id) {
                        events.push(ChangeEvent::Deleted(id.clone()));
                    }
                }
                known = fresh;

                for event in events {
                    if tx.send(event).is_err() {
                        return;
                    }
                }
            }
        });

        Ok(Subscription::new(rx, move || handle.abort()))
    }

    // -- Read markers --

    async fn advance_read_marker(
        &self,
        user: &UserId,
        target: &TargetKey,
        at: DateTime<Utc>,
    ) -> Result<()> {
        // Guarded update first: only rows with an older marker match.
        let mut headers = self.headers();
        headers.insert("Prefer", HeaderValue::from_static("return=representation"));
        let resp = self
            .http
            .patch(self.table_url("read_markers"))
            .headers(headers)
            .query(&[
                ("user", format!("eq.{user}")),
                ("target", format!("eq.{}", target.filter_key())),
                ("at", format!("lt.{}", at.to_rfc3339())),
            ])
            .json(&serde_json::json!({ "at": at }))
            .send()
            .await?;
        let updated: Vec<MarkerRow> = Self::check(resp).await?.json().await?;
        if !updated.is_empty() {
            return Ok(());
        }

        // Nothing matched: either the stored marker is already newer (done)
        // or no row exists yet (insert one).
        if self.fetch_read_marker(user, target).await?.is_some() {
            return Ok(());
        }
        let row = MarkerRow {
            user_id: user.as_str().to_string(),
            target: target.filter_key(),
            at,
        };
        let resp = self
            .http
            .post(self.table_url("read_markers"))
            .headers(self.headers())
            .json(&row)
            .send()
            .await?;
        Self::check(resp).await?;
        Ok(())
    }

    async fn fetch_read_marker(
        &self,
        user: &UserId,
        target: &TargetKey,
    ) -> Result<Option<DateTime<Utc>>> {
        let resp = self
            .http
            .get(self.table_url("read_markers"))
            .headers(self.headers())
            .query(&[
                ("user", format!("eq.{user}")),
                ("target", format!("eq.{}", target.filter_key())),
            ])
            .send()
            .await?;
        let rows: Vec<MarkerRow> = Self::check(resp).await?.json().await?;
        Ok(rows.into_iter().next().map(|r| r.at))
    }

    // -- Typing --

    async fn publish_typing(&self, fact: TypingFact) -> Result<()> {
        let mut headers = self.headers();
        headers.insert(
            "Prefer",
            HeaderValue::from_static("resolution=merge-duplicates"),
        );
        let row = TypingRow {
            user_id: fact.user.as_str().to_string(),
            target: fact.target.filter_key(),
            is_typing: fact.is_typing,
            at: fact.at,
        };
        let resp = self
            .http
            .post(self.table_url("typing"))
            .headers(headers)
            .query(&[("on_conflict", "user,target")])
            .json(&row)
            .send()
            .await?;
        Self::check(resp).await?;
        Ok(())
    }

    async fn subscribe_typing(&self, target: &TargetKey) -> Result<Subscription<TypingFact>> {
        let (tx, rx) = mpsc::unbounded_channel();
        let http = self.http.clone();
        let config = self.config.clone();
        let auth = Arc::clone(&self.auth);
        let filter = target.filter_key();
        let target = target.clone();
        let interval = self.config.poll_interval;

        let handle = tokio::spawn(async move {
            let backend = RestBackend { http, config, auth };
            let mut last_seen: HashMap<String, DateTime<Utc>> = HashMap::new();
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                if tx.is_closed() {
                    break;
                }
                let resp = backend
                    .http
                    .get(backend.table_url("typing"))
                    .headers(backend.headers())
                    .query(&[("target", format!("eq.{filter}"))])
                    .send()
                    .await;
                let checked = match resp {
                    Ok(r) => Self::check(r).await,
                    Err(e) => Err(BackendError::from(e)),
                };
                let rows: Vec<TypingRow> = match checked {
                    Ok(r) => match r.json().await {
                        Ok(rows) => rows,
                        Err(_) => continue,
                    },
                    Err(e) => {
                        warn!(key = %target, error = %e, "Typing poll failed");
                        continue;
                    }
                };

                for row in rows {
                    let is_new = last_seen
                        .get(&row.user_id)
                        .map(|prev| *prev < row.at)
                        .unwrap_or(true);
                    if !is_new {
                        continue;
                    }
                    last_seen.insert(row.user_id.clone(), row.at);
                    let fact = TypingFact {
                        user: UserId::new(row.user_id.clone()),
                        target: target.clone(),
                        is_typing: row.is_typing,
                        at: row.at,
                    };
                    if tx.send(fact).is_err() {
                        return;
                    }
                }
            }
        });

        Ok(Subscription::new(rx, move || handle.abort()))
    }

    // -- Object storage --

    async fn upload_image(&self, name: &str, data: Bytes, content_type: &str) -> Result<String> {
        if data.len() > MAX_IMAGE_SIZE {
            return Err(BackendError::BlobTooLarge {
                size: data.len(),
                max: MAX_IMAGE_SIZE,
            });
        }

        let bucket = &self.config.bucket;
        let resp = self
            .http
            .post(format!(
                "{}/storage/v1/object/{bucket}/{name}",
                self.config.base_url
            ))
            .headers(self.headers())
            .header(reqwest::header::CONTENT_TYPE, content_type)
            .body(data)
            .send()
            .await?;
        Self::check(resp).await?;

        Ok(format!(
            "{}/storage/v1/object/public/{bucket}/{name}",
            self.config.base_url
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = RestConfig::default();
        assert_eq!(config.bucket, "chat-images");
        assert_eq!(config.poll_interval, Duration::from_millis(1500));
    }

    #[test]
    fn test_message_row_round_trip() {
        let row = MessageRow {
            id: "0001".to_string(),
            sender: "alice".to_string(),
            target: "ch:general".to_string(),
            text: Some("hello".to_string()),
            image_url: None,
            reply_to: None,
            created_at: Utc::now(),
            edited_at: None,
        };
        let msg = row.into_message().unwrap();
        assert_eq!(msg.target, TargetKey::channel("general"));
        assert_eq!(msg.sender, UserId::new("alice"));
    }

    #[test]
    fn test_message_row_unknown_target_dropped() {
        let row = MessageRow {
            id: "0001".to_string(),
            sender: "alice".to_string(),
            target: "future-kind:x".to_string(),
            text: Some("hello".to_string()),
            image_url: None,
            reply_to: None,
            created_at: Utc::now(),
            edited_at: None,
        };
        assert!(row.into_message().is_none());
    }
}
