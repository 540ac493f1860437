//! HTTP adapter for a PostgREST-style hosted backend.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock, Weak};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde_json::{Map, Value};
use tokio::task::JoinHandle;

use super::{ChangeCallback, ChangeEvent, ChangeKind, RemoteResult, RemoteStore, SubscriptionHandle};
use crate::error::{Error, RemoteError, Result};
use crate::models::{Filter, Record, RecordId, TableName};
use crate::util::{compact_text, is_http_url, normalize_text_option};

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(15);

/// Remote store talking to `{base}/rest/v1/{table}`.
///
/// Cheap to clone; clones share the HTTP client, the session token and the
/// subscription tasks.
#[derive(Clone)]
pub struct RestRemoteStore {
    inner: Arc<RestInner>,
}

struct RestInner {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    access_token: RwLock<Option<String>>,
    poll_interval: Duration,
    next_handle: AtomicU64,
    subscriptions: Mutex<HashMap<u64, JoinHandle<()>>>,
}

impl std::fmt::Debug for RestRemoteStore {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("RestRemoteStore")
            .field("base_url", &self.inner.base_url)
            .field("api_key", &self.inner.api_key.as_ref().map(|_| "[REDACTED]"))
            .field("poll_interval", &self.inner.poll_interval)
            .finish_non_exhaustive()
    }
}

impl RestRemoteStore {
    pub fn new(
        base_url: impl Into<String>,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let base_url = normalize_endpoint(base_url.into())?;
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|error| Error::Config(format!("failed to build HTTP client: {error}")))?;

        Ok(Self {
            inner: Arc::new(RestInner {
                client,
                base_url,
                api_key: normalize_text_option(api_key),
                access_token: RwLock::new(None),
                poll_interval: DEFAULT_POLL_INTERVAL,
                next_handle: AtomicU64::new(1),
                subscriptions: Mutex::new(HashMap::new()),
            }),
        })
    }

    /// How often subscriptions poll for changes. Only affects later subscriptions.
    #[must_use]
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        if let Some(inner) = Arc::get_mut(&mut self.inner) {
            inner.poll_interval = poll_interval;
        }
        self
    }

    /// Install (or clear) the user's session token.
    pub fn set_access_token(&self, token: Option<String>) {
        *self
            .inner
            .access_token
            .write()
            .unwrap_or_else(PoisonError::into_inner) = normalize_text_option(token);
    }

    pub fn base_url(&self) -> &str {
        &self.inner.base_url
    }
}

impl RestInner {
    fn table_url(&self, table: TableName, query: &str) -> String {
        format!("{}/rest/v1/{table}{query}", self.base_url)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        let token = self
            .access_token
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .or_else(|| self.api_key.clone());

        let mut request = request.header("Accept", "application/json");
        if let Some(api_key) = &self.api_key {
            request = request.header("apikey", api_key);
        }
        if let Some(token) = token {
            request = request.bearer_auth(token);
        }
        request
    }

    async fn send(&self, request: RequestBuilder) -> RemoteResult<Response> {
        let response = self
            .authorize(request)
            .send()
            .await
            .map_err(|error| RemoteError::Network(error.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(map_status(status, &parse_api_error(status, &body)))
    }

    async fn records(&self, request: RequestBuilder) -> RemoteResult<Vec<Record>> {
        let rows = self
            .send(request)
            .await?
            .json::<Vec<Value>>()
            .await
            .map_err(|error| RemoteError::Network(format!("invalid response body: {error}")))?;

        rows.into_iter()
            .map(|row| {
                Record::from_value(row)
                    .map_err(|error| RemoteError::Rejected(format!("invalid record: {error}")))
            })
            .collect()
    }

    async fn read(&self, table: TableName, filter: &Filter) -> RemoteResult<Vec<Record>> {
        let url = self.table_url(table, &filter_query(filter));
        self.records(self.client.get(url)).await
    }

    async fn write(&self, request: RequestBuilder, not_found: String) -> RemoteResult<Record> {
        let request = request.header("Prefer", "return=representation");
        self.records(request)
            .await?
            .into_iter()
            .next()
            .ok_or(RemoteError::NotFound(not_found))
    }
}

impl Drop for RestInner {
    fn drop(&mut self) {
        let subscriptions = self
            .subscriptions
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner);
        for (_, task) in subscriptions.drain() {
            task.abort();
        }
    }
}

#[async_trait]
impl RemoteStore for RestRemoteStore {
    async fn create(&self, table: TableName, data: Map<String, Value>) -> RemoteResult<Record> {
        let inner = &self.inner;
        let request = inner.client.post(inner.table_url(table, "")).json(&data);
        inner.write(request, format!("{table} insert returned no rows")).await
    }

    async fn read(&self, table: TableName, filter: &Filter) -> RemoteResult<Vec<Record>> {
        self.inner.read(table, filter).await
    }

    async fn update(
        &self,
        table: TableName,
        id: &RecordId,
        updates: Map<String, Value>,
    ) -> RemoteResult<Record> {
        let inner = &self.inner;
        let url = inner.table_url(table, &filter_query(&Filter::new().eq("id", id.as_str())));
        let request = inner.client.patch(url).json(&updates);
        inner.write(request, format!("{table}/{id}")).await
    }

    async fn delete(&self, table: TableName, id: &RecordId) -> RemoteResult<()> {
        let inner = &self.inner;
        let url = inner.table_url(table, &filter_query(&Filter::new().eq("id", id.as_str())));
        inner
            .write(inner.client.delete(url), format!("{table}/{id}"))
            .await
            .map(|_| ())
    }

    async fn subscribe(
        &self,
        table: TableName,
        on_change: ChangeCallback,
    ) -> RemoteResult<SubscriptionHandle> {
        let baseline = self.inner.read(table, &Filter::new()).await?;
        let id = self.inner.next_handle.fetch_add(1, Ordering::Relaxed);
        let task = tokio::spawn(poll_changes(
            Arc::downgrade(&self.inner),
            table,
            baseline,
            self.inner.poll_interval,
            on_change,
        ));

        self.inner
            .subscriptions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, task);
        Ok(SubscriptionHandle::new(id))
    }

    async fn unsubscribe(&self, handle: SubscriptionHandle) -> RemoteResult<()> {
        let task = self
            .inner
            .subscriptions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&handle.id());
        if let Some(task) = task {
            task.abort();
        }
        Ok(())
    }
}

async fn poll_changes(
    inner: Weak<RestInner>,
    table: TableName,
    mut previous: Vec<Record>,
    poll_interval: Duration,
    on_change: ChangeCallback,
) {
    let mut ticker = tokio::time::interval(poll_interval);
    ticker.tick().await;

    loop {
        ticker.tick().await;
        let Some(inner) = inner.upgrade() else {
            return;
        };
        match inner.read(table, &Filter::new()).await {
            Ok(current) => {
                for event in diff_snapshots(table, &previous, &current) {
                    on_change(event);
                }
                previous = current;
            }
            Err(error) => tracing::debug!("Polling {table} for changes failed: {error}"),
        }
    }
}

/// Change events that turn `previous` into `current`.
fn diff_snapshots(table: TableName, previous: &[Record], current: &[Record]) -> Vec<ChangeEvent> {
    let before: HashMap<&RecordId, &Record> =
        previous.iter().map(|record| (&record.id, record)).collect();
    let after: HashMap<&RecordId, &Record> =
        current.iter().map(|record| (&record.id, record)).collect();

    let mut events = Vec::new();
    for record in current {
        let kind = match before.get(&record.id) {
            None => ChangeKind::Insert,
            Some(old) if *old != record => ChangeKind::Update,
            Some(_) => continue,
        };
        events.push(ChangeEvent {
            table,
            kind,
            record: record.clone(),
        });
    }
    events.extend(
        previous
            .iter()
            .filter(|record| !after.contains_key(&record.id))
            .map(|record| ChangeEvent {
                table,
                kind: ChangeKind::Delete,
                record: record.clone(),
            }),
    );
    events
}

/// `?select=*&field=eq.value...` for an exact-match filter.
///
/// `null` compares with `is.null`; `eq.null` would match the text "null".
fn filter_query(filter: &Filter) -> String {
    let mut query = String::from("?select=*");
    for (field, value) in filter.iter() {
        let (operator, text) = match value {
            Value::Null => ("is", "null".to_string()),
            Value::String(text) => ("eq", text.clone()),
            other => ("eq", other.to_string()),
        };
        query.push('&');
        query.push_str(&urlencoding::encode(field));
        query.push('=');
        query.push_str(operator);
        query.push('.');
        query.push_str(&urlencoding::encode(&text));
    }
    query
}

fn map_status(status: StatusCode, message: &str) -> RemoteError {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => RemoteError::Unauthenticated,
        StatusCode::NOT_FOUND => RemoteError::NotFound(message.to_string()),
        status if status.is_client_error() => RemoteError::Rejected(message.to_string()),
        _ => RemoteError::Network(message.to_string()),
    }
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    message: Option<String>,
    error: Option<String>,
    hint: Option<String>,
}

fn parse_api_error(status: StatusCode, body: &str) -> String {
    if let Ok(payload) = serde_json::from_str::<ApiErrorBody>(body) {
        if let Some(message) = payload.message.or(payload.error) {
            let hint = payload
                .hint
                .map(|hint| format!("; {}", hint.trim()))
                .unwrap_or_default();
            return format!("{}{hint} ({})", message.trim(), status.as_u16());
        }
    }

    let trimmed = compact_text(body);
    if trimmed.is_empty() {
        format!("HTTP {}", status.as_u16())
    } else {
        format!("{trimmed} ({})", status.as_u16())
    }
}

fn normalize_endpoint(raw: String) -> Result<String> {
    let endpoint = normalize_text_option(Some(raw))
        .ok_or_else(|| Error::Config("API URL must not be empty".to_string()))?;
    if is_http_url(&endpoint) {
        Ok(endpoint.trim_end_matches('/').to_string())
    } else {
        Err(Error::Config(
            "API URL must include http:// or https://".to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn record(id: &str, updated_at: i64, title: &str) -> Record {
        Record::from_value(json!({"id": id, "updated_at": updated_at, "title": title})).unwrap()
    }

    #[test]
    fn normalize_endpoint_rejects_invalid_values() {
        assert!(normalize_endpoint(String::new()).is_err());
        assert!(normalize_endpoint("api.example.com".to_string()).is_err());
        assert_eq!(
            normalize_endpoint(" https://db.example.com/ ".to_string()).unwrap(),
            "https://db.example.com"
        );
    }

    #[test]
    fn filter_query_encodes_exact_matches() {
        assert_eq!(filter_query(&Filter::new()), "?select=*");
        assert_eq!(
            filter_query(&Filter::new().eq("title", "a&b").eq("done", false)),
            "?select=*&done=eq.false&title=eq.a%26b"
        );
    }

    #[test]
    fn filter_query_uses_is_for_null() {
        assert_eq!(
            filter_query(&Filter::new().eq("project_id", Value::Null).eq("title", "null")),
            "?select=*&project_id=is.null&title=eq.null"
        );
    }

    #[test]
    fn map_status_classifies_failures() {
        assert_eq!(
            map_status(StatusCode::UNAUTHORIZED, "jwt expired"),
            RemoteError::Unauthenticated
        );
        assert_eq!(
            map_status(StatusCode::NOT_FOUND, "missing"),
            RemoteError::NotFound("missing".into())
        );
        assert_eq!(
            map_status(StatusCode::CONFLICT, "duplicate"),
            RemoteError::Rejected("duplicate".into())
        );
        assert!(map_status(StatusCode::BAD_GATEWAY, "down").is_transient());
    }

    #[test]
    fn parse_api_error_prefers_structured_message() {
        let body = r#"{"code":"23505","message":"duplicate key","hint":"use upsert"}"#;
        assert_eq!(
            parse_api_error(StatusCode::CONFLICT, body),
            "duplicate key; use upsert (409)"
        );
        assert_eq!(parse_api_error(StatusCode::BAD_GATEWAY, ""), "HTTP 502");
        assert_eq!(
            parse_api_error(StatusCode::BAD_GATEWAY, "upstream down"),
            "upstream down (502)"
        );
    }

    #[test]
    fn diff_snapshots_reports_inserts_updates_and_deletes() {
        let previous = vec![record("a", 1, "A"), record("b", 1, "B")];
        let current = vec![record("a", 2, "A2"), record("c", 1, "C")];

        let events: Vec<_> = diff_snapshots(TableName::Tasks, &previous, &current)
            .into_iter()
            .map(|event| (event.kind, event.record.id.to_string()))
            .collect();

        assert_eq!(
            events,
            vec![
                (ChangeKind::Update, "a".to_string()),
                (ChangeKind::Insert, "c".to_string()),
                (ChangeKind::Delete, "b".to_string()),
            ]
        );
        assert!(diff_snapshots(TableName::Tasks, &current, &current).is_empty());
    }

    #[test]
    fn debug_redacts_api_key() {
        let store = RestRemoteStore::new(
            "https://db.example.com",
            Some("anon-secret".into()),
            Duration::from_secs(5),
        )
        .unwrap();
        let debug = format!("{store:?}");
        assert!(!debug.contains("anon-secret"));
        assert!(debug.contains("[REDACTED]"));
        assert_eq!(store.base_url(), "https://db.example.com");
    }
}
