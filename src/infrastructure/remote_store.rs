use crate::domain::models::{AuthSession, NewTodo, SessionRecord, Settings, TimerPhase, Todo, TodoPatch, TodoPriority};
use crate::domain::timer::NowProvider;
use crate::infrastructure::config::RemoteConfig;
use crate::infrastructure::credential_store::CredentialStore;
use crate::infrastructure::error::InfraError;
use crate::infrastructure::record_store::{next_id, require_id, RecordStore, StoreKind};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::{Client, Method, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use url::Url;

const TODOS_TABLE: &str = "todos";
const SESSIONS_TABLE: &str = "sessions";
const SETTINGS_TABLE: &str = "user_settings";
const TOKEN_LEEWAY_SECONDS: i64 = 30;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
struct TodoRow {
    id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    user_id: Option<String>,
    title: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    is_completed: bool,
    created_at: DateTime<Utc>,
    #[serde(default)]
    completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    category: Option<String>,
    #[serde(default)]
    priority: Option<TodoPriority>,
    #[serde(default)]
    estimated_minutes: Option<u32>,
}

impl TodoRow {
    fn into_todo(self) -> Todo {
        Todo {
            id: self.id,
            title: self.title,
            description: self.description.unwrap_or_default(),
            is_completed: self.is_completed,
            created_at: self.created_at,
            completed_at: self.completed_at,
            category: self.category,
            priority: self.priority,
            estimated_minutes: self.estimated_minutes,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SessionRow {
    id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    user_id: Option<String>,
    phase: TimerPhase,
    duration_seconds: u32,
    completed_at: DateTime<Utc>,
    #[serde(default)]
    todo_id: Option<String>,
    #[serde(default)]
    todo_title: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SettingsRow {
    user_id: String,
    payload: Settings,
    updated_at: DateTime<Utc>,
}

fn patch_body(patch: &TodoPatch) -> serde_json::Map<String, serde_json::Value> {
    let mut body = serde_json::Map::new();
    if let Some(title) = &patch.title {
        body.insert("title".to_string(), serde_json::json!(title));
    }
    if let Some(description) = &patch.description {
        body.insert("description".to_string(), serde_json::json!(description));
    }
    if let Some(is_completed) = patch.is_completed {
        body.insert("is_completed".to_string(), serde_json::json!(is_completed));
    }
    if let Some(completed_at) = patch.completed_at {
        body.insert("completed_at".to_string(), serde_json::json!(completed_at));
    }
    if let Some(category) = &patch.category {
        body.insert("category".to_string(), serde_json::json!(category));
    }
    if let Some(priority) = patch.priority {
        body.insert("priority".to_string(), serde_json::json!(priority));
    }
    if let Some(estimated_minutes) = patch.estimated_minutes {
        body.insert("estimated_minutes".to_string(), serde_json::json!(estimated_minutes));
    }
    body
}

#[derive(Clone)]
pub struct RestRecordStore {
    client: Client,
    config: RemoteConfig,
    credentials: Arc<dyn CredentialStore>,
    now_provider: NowProvider,
}

impl RestRecordStore {
    pub fn new(config: RemoteConfig, credentials: Arc<dyn CredentialStore>) -> Self {
        Self {
            client: Client::new(),
            config,
            credentials,
            now_provider: Arc::new(Utc::now),
        }
    }

    pub fn with_now_provider(mut self, now_provider: NowProvider) -> Self {
        self.now_provider = now_provider;
        self
    }

    fn table_endpoint(&self, table: &str) -> Result<Url, InfraError> {
        if !self.config.is_configured() {
            return Err(InfraError::InvalidConfig(
                "remote store is not configured".to_string(),
            ));
        }
        let mut url = Url::parse(&self.config.base_url).map_err(|error| {
            InfraError::InvalidConfig(format!("invalid remote base url: {error}"))
        })?;
        {
            let mut segments = url.path_segments_mut().map_err(|_| {
                InfraError::InvalidConfig("remote base URL cannot be a base".to_string())
            })?;
            segments.pop_if_empty();
            segments.push("rest");
            segments.push("v1");
            segments.push(table);
        }
        Ok(url)
    }

    fn session(&self) -> Result<AuthSession, InfraError> {
        let session = self
            .credentials
            .load_session()?
            .ok_or(InfraError::Unauthenticated)?;
        if !session.is_valid_at((self.now_provider)(), TOKEN_LEEWAY_SECONDS) {
            return Err(InfraError::Unauthenticated);
        }
        Ok(session)
    }

    fn request(
        &self,
        method: Method,
        table: &str,
        session: &AuthSession,
    ) -> Result<RequestBuilder, InfraError> {
        let endpoint = self.table_endpoint(table)?;
        Ok(self
            .client
            .request(method, endpoint)
            .header("apikey", &self.config.anon_key)
            .bearer_auth(&session.access_token))
    }

    async fn send<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
        action: &str,
    ) -> Result<T, InfraError> {
        let response = request
            .send()
            .await
            .map_err(|error| InfraError::Remote(format!("network error while {action}: {error}")))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|error| InfraError::Remote(format!("failed reading response while {action}: {error}")))?;

        if status == StatusCode::UNAUTHORIZED {
            return Err(InfraError::Unauthenticated);
        }
        if !status.is_success() {
            return Err(InfraError::Http {
                status: status.as_u16(),
                body,
            });
        }

        let body = if body.trim().is_empty() { "[]" } else { body.as_str() };
        serde_json::from_str(body).map_err(|error| {
            InfraError::Remote(format!("invalid payload while {action}: {error}; body={body}"))
        })
    }
}

#[async_trait]
impl RecordStore for RestRecordStore {
    fn kind(&self) -> StoreKind {
        StoreKind::Remote
    }

    async fn list_todos(&self) -> Result<Vec<Todo>, InfraError> {
        let session = self.session()?;
        let request = self
            .request(Method::GET, TODOS_TABLE, &session)?
            .query(&[("select", "*"), ("order", "created_at.asc,id.asc")]);
        let rows: Vec<TodoRow> = self.send(request, "listing todos").await?;
        Ok(rows.into_iter().map(TodoRow::into_todo).collect())
    }

    async fn get_todo(&self, id: &str) -> Result<Option<Todo>, InfraError> {
        let id = require_id(id, "todo.id")?;
        let session = self.session()?;
        let request = self
            .request(Method::GET, TODOS_TABLE, &session)?
            .query(&[("select", "*".to_string()), ("id", format!("eq.{id}"))]);
        let rows: Vec<TodoRow> = self.send(request, "reading todo").await?;
        Ok(rows.into_iter().next().map(TodoRow::into_todo))
    }

    async fn create_todo(&self, fields: NewTodo) -> Result<String, InfraError> {
        fields.validate().map_err(InfraError::InvalidInput)?;
        let session = self.session()?;
        let id = fields.id.clone().unwrap_or_else(|| next_id("todo"));
        let todo = fields.into_todo(id, (self.now_provider)());
        let row = TodoRow {
            id: todo.id,
            user_id: Some(session.user_id.clone()),
            title: todo.title,
            description: Some(todo.description),
            is_completed: false,
            created_at: todo.created_at,
            completed_at: None,
            category: todo.category,
            priority: todo.priority,
            estimated_minutes: todo.estimated_minutes,
        };

        let request = self
            .request(Method::POST, TODOS_TABLE, &session)?
            .header("Prefer", "return=representation")
            .json(&row);
        let created: Vec<TodoRow> = self.send(request, "creating todo").await?;
        created
            .into_iter()
            .next()
            .map(|row| row.id)
            .ok_or_else(|| InfraError::Remote("todo create response did not include a row".to_string()))
    }

    async fn update_todo(&self, id: &str, patch: &TodoPatch) -> Result<(), InfraError> {
        let id = require_id(id, "todo.id")?;
        patch.validate().map_err(InfraError::InvalidInput)?;
        let session = self.session()?;
        let request = self
            .request(Method::PATCH, TODOS_TABLE, &session)?
            .query(&[("id", format!("eq.{id}"))])
            .header("Prefer", "return=representation")
            .json(&patch_body(patch));
        let updated: Vec<TodoRow> = self.send(request, "updating todo").await?;
        if updated.is_empty() {
            return Err(InfraError::NotFound(format!("todo {id}")));
        }
        Ok(())
    }

    async fn delete_todo(&self, id: &str) -> Result<(), InfraError> {
        let id = require_id(id, "todo.id")?;
        let session = self.session()?;
        let request = self
            .request(Method::DELETE, TODOS_TABLE, &session)?
            .query(&[("id", format!("eq.{id}"))])
            .header("Prefer", "return=representation");
        let deleted: Vec<TodoRow> = self.send(request, "deleting todo").await?;
        if deleted.is_empty() {
            return Err(InfraError::NotFound(format!("todo {id}")));
        }
        Ok(())
    }

    async fn record_session(&self, record: &SessionRecord) -> Result<(), InfraError> {
        record.validate().map_err(InfraError::InvalidInput)?;
        let session = self.session()?;
        let row = SessionRow {
            id: record.id.clone(),
            user_id: Some(session.user_id.clone()),
            phase: record.phase,
            duration_seconds: record.duration_seconds,
            completed_at: record.completed_at,
            todo_id: record.todo_id.clone(),
            todo_title: record.todo_title.clone(),
        };
        let request = self
            .request(Method::POST, SESSIONS_TABLE, &session)?
            .header("Prefer", "return=representation")
            .json(&row);
        let _: Vec<SessionRow> = self.send(request, "recording session").await?;
        Ok(())
    }

    async fn list_sessions(
        &self,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<SessionRecord>, InfraError> {
        let session = self.session()?;
        let mut request = self
            .request(Method::GET, SESSIONS_TABLE, &session)?
            .query(&[("select", "*"), ("order", "completed_at.asc")]);
        if let Some(since) = since {
            request = request.query(&[(
                "completed_at",
                format!("gte.{}", since.to_rfc3339_opts(SecondsFormat::Millis, true)),
            )]);
        }
        let rows: Vec<SessionRow> = self.send(request, "listing sessions").await?;
        Ok(rows
            .into_iter()
            .map(|row| SessionRecord {
                id: row.id,
                phase: row.phase,
                duration_seconds: row.duration_seconds,
                completed_at: row.completed_at,
                todo_id: row.todo_id,
                todo_title: row.todo_title,
            })
            .collect())
    }

    async fn load_settings(&self) -> Result<Option<Settings>, InfraError> {
        let session = self.session()?;
        let request = self
            .request(Method::GET, SETTINGS_TABLE, &session)?
            .query(&[
                ("select", "*".to_string()),
                ("user_id", format!("eq.{}", session.user_id)),
            ]);
        let rows: Vec<SettingsRow> = self.send(request, "loading settings").await?;
        Ok(rows.into_iter().next().map(|row| row.payload))
    }

    async fn save_settings(&self, settings: &Settings) -> Result<(), InfraError> {
        settings.validate().map_err(InfraError::InvalidInput)?;
        let session = self.session()?;
        let row = SettingsRow {
            user_id: session.user_id.clone(),
            payload: settings.clone(),
            updated_at: (self.now_provider)(),
        };
        let request = self
            .request(Method::POST, SETTINGS_TABLE, &session)?
            .query(&[("on_conflict", "user_id")])
            .header("Prefer", "resolution=merge-duplicates,return=representation")
            .json(&row);
        let _: Vec<SettingsRow> = self.send(request, "saving settings").await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::credential_store::InMemoryCredentialStore;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn fixed_time(value: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(value)
            .expect("valid datetime")
            .with_timezone(&Utc)
    }

    fn signed_in_store(server: &MockServer) -> RestRecordStore {
        let credentials = Arc::new(InMemoryCredentialStore::default());
        credentials
            .save_session(&AuthSession {
                access_token: "access-1".to_string(),
                user_id: "user-1".to_string(),
                expires_at: fixed_time("2026-02-16T12:00:00Z"),
            })
            .expect("save session");
        RestRecordStore::new(
            RemoteConfig {
                base_url: format!("{}/", server.uri()),
                anon_key: "anon-key".to_string(),
            },
            credentials,
        )
        .with_now_provider(Arc::new(|| fixed_time("2026-02-16T09:00:00Z")))
    }

    fn todo_json(id: &str, is_completed: bool) -> serde_json::Value {
        let completed_at = is_completed.then_some("2026-02-16T08:30:00Z");
        json!({
            "id": id,
            "user_id": "user-1",
            "title": format!("Task {id}"),
            "description": null,
            "is_completed": is_completed,
            "created_at": "2026-02-16T08:00:00Z",
            "completed_at": completed_at,
            "priority": "high"
        })
    }

    #[tokio::test]
    async fn list_todos_sends_auth_headers_and_maps_rows() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/rest/v1/todos"))
            .and(header("apikey", "anon-key"))
            .and(header("authorization", "Bearer access-1"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!([todo_json("todo-1", false), todo_json("todo-2", true)])),
            )
            .expect(1)
            .mount(&server)
            .await;

        let todos = signed_in_store(&server).list_todos().await.expect("list");

        assert_eq!(todos.len(), 2);
        assert_eq!(todos[0].description, "");
        assert_eq!(todos[0].priority, Some(TodoPriority::High));
        assert!(todos[1].is_completed);
        assert_eq!(todos[1].completed_at, Some(fixed_time("2026-02-16T08:30:00Z")));
    }

    #[tokio::test]
    async fn create_todo_posts_row_without_completion_state() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/rest/v1/todos"))
            .and(header("prefer", "return=representation"))
            .and(body_partial_json(json!({
                "id": "todo-9",
                "user_id": "user-1",
                "is_completed": false,
                "completed_at": null
            })))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!([todo_json("todo-9", false)])))
            .expect(1)
            .mount(&server)
            .await;

        let mut fields = NewTodo::titled("Task todo-9");
        fields.id = Some("todo-9".to_string());
        let id = signed_in_store(&server).create_todo(fields).await.expect("create");

        assert_eq!(id, "todo-9");
    }

    #[tokio::test]
    async fn update_todo_with_no_matching_row_is_not_found() {
        let server = MockServer::start().await;
        Mock::given(method("PATCH"))
            .and(path("/rest/v1/todos"))
            .and(query_param("id", "eq.missing"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
            .mount(&server)
            .await;

        let result = signed_in_store(&server)
            .update_todo(
                "missing",
                &TodoPatch {
                    is_completed: Some(true),
                    ..TodoPatch::default()
                },
            )
            .await;

        assert!(matches!(result, Err(InfraError::NotFound(_))));
    }

    #[tokio::test]
    async fn server_errors_surface_as_transient_http_errors() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/rest/v1/todos"))
            .respond_with(ResponseTemplate::new(503).set_body_string("upstream unavailable"))
            .mount(&server)
            .await;

        let error = signed_in_store(&server)
            .delete_todo("todo-1")
            .await
            .expect_err("delete should fail");

        assert!(matches!(error, InfraError::Http { status: 503, .. }));
        assert!(error.is_transient());
    }

    #[tokio::test]
    async fn missing_or_expired_session_is_unauthenticated() {
        let server = MockServer::start().await;
        let store = RestRecordStore::new(
            RemoteConfig {
                base_url: server.uri(),
                anon_key: "anon-key".to_string(),
            },
            Arc::new(InMemoryCredentialStore::default()),
        );
        assert!(matches!(store.list_todos().await, Err(InfraError::Unauthenticated)));

        let expired = signed_in_store(&server)
            .with_now_provider(Arc::new(|| fixed_time("2026-02-16T13:00:00Z")));
        assert!(matches!(expired.list_todos().await, Err(InfraError::Unauthenticated)));
    }

    #[tokio::test]
    async fn load_settings_reads_payload_for_current_user() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/rest/v1/user_settings"))
            .and(query_param("user_id", "eq.user-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([{
                "user_id": "user-1",
                "payload": serde_json::to_value(Settings { focus_minutes: 45, ..Settings::default() })
                    .expect("settings json"),
                "updated_at": "2026-02-16T08:00:00Z"
            }])))
            .mount(&server)
            .await;

        let settings = signed_in_store(&server)
            .load_settings()
            .await
            .expect("load")
            .expect("settings present");

        assert_eq!(settings.focus_minutes, 45);
    }
}
