//! Thin client over the Evo discovery, workspace and geoscience-object APIs.

use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Method;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use url::Url;

use crate::session::Session;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instance {
    pub org_id: String,
    pub display_name: String,
    pub hub_url: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workspace {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub labels: Vec<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default, alias = "current_user_role")]
    pub user_role: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectMetadata {
    #[serde(alias = "object_id")]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default, alias = "object_path")]
    pub path: String,
    #[serde(default)]
    pub schema_id: String,
    #[serde(default)]
    pub version_id: Option<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub modified_at: Option<DateTime<Utc>>,
}

/// Metadata plus the full JSON definition of one object version.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ObjectDocument {
    pub metadata: ObjectMetadata,
    pub definition: Value,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectReference {
    pub object_id: String,
    pub path: String,
    pub version_id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkspaceFilter {
    pub name: Option<String>,
    pub deleted: bool,
    pub limit: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ObjectFilter {
    pub schema: Option<String>,
    pub deleted: bool,
    pub limit: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ObjectLocator {
    Id(String),
    Path(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NewWorkspace {
    pub name: String,
    pub description: Option<String>,
    pub labels: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServiceHealth {
    pub service: String,
    pub status: u16,
    pub healthy: bool,
    pub body: Value,
}

/// Remote error categories surfaced unchanged to the dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RemoteCategory {
    NotFound,
    Forbidden,
    Conflict,
    Unauthorized,
    Transient,
    InvalidResponse,
}

impl RemoteCategory {
    pub fn from_status(status: u16) -> Self {
        match status {
            401 => RemoteCategory::Unauthorized,
            403 => RemoteCategory::Forbidden,
            404 => RemoteCategory::NotFound,
            409 => RemoteCategory::Conflict,
            408 | 429 | 500..=599 => RemoteCategory::Transient,
            _ => RemoteCategory::InvalidResponse,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RemoteCategory::NotFound => "not_found",
            RemoteCategory::Forbidden => "forbidden",
            RemoteCategory::Conflict => "conflict",
            RemoteCategory::Unauthorized => "unauthorized",
            RemoteCategory::Transient => "transient",
            RemoteCategory::InvalidResponse => "invalid_response",
        }
    }
}

impl fmt::Display for RemoteCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PlatformError {
    #[error("{operation} failed ({category}): {message}")]
    Remote {
        category: RemoteCategory,
        status: Option<u16>,
        operation: String,
        message: String,
    },
    #[error("no Evo instance is selected")]
    NoInstance,
}

impl PlatformError {
    pub fn remote(
        category: RemoteCategory,
        status: Option<u16>,
        operation: &str,
        message: impl Into<String>,
    ) -> Self {
        PlatformError::Remote {
            category,
            status,
            operation: operation.to_string(),
            message: message.into(),
        }
    }

    pub fn category(&self) -> Option<RemoteCategory> {
        match self {
            PlatformError::Remote { category, .. } => Some(*category),
            PlatformError::NoInstance => None,
        }
    }

    pub fn is_transient(&self) -> bool {
        self.category() == Some(RemoteCategory::Transient)
    }

    fn invalid_response(operation: &str, message: impl Into<String>) -> Self {
        Self::remote(RemoteCategory::InvalidResponse, None, operation, message)
    }
}

/// Operations the tools need from the platform. Every call authenticates with
/// the given session and targets its selected instance.
#[async_trait]
pub trait PlatformApi: Send + Sync {
    async fn list_instances(&self, session: &Session) -> Result<Vec<Instance>, PlatformError>;

    async fn service_health(
        &self,
        session: &Session,
        service: &str,
    ) -> Result<ServiceHealth, PlatformError>;

    async fn list_workspaces(
        &self,
        session: &Session,
        filter: &WorkspaceFilter,
    ) -> Result<Vec<Workspace>, PlatformError>;

    async fn get_workspace(&self, session: &Session, id: &str) -> Result<Workspace, PlatformError>;

    async fn create_workspace(
        &self,
        session: &Session,
        workspace: &NewWorkspace,
    ) -> Result<Workspace, PlatformError>;

    async fn list_objects(
        &self,
        session: &Session,
        workspace_id: &str,
        filter: &ObjectFilter,
    ) -> Result<Vec<ObjectMetadata>, PlatformError>;

    async fn get_object(
        &self,
        session: &Session,
        workspace_id: &str,
        locator: &ObjectLocator,
        version: Option<&str>,
    ) -> Result<ObjectDocument, PlatformError>;

    async fn create_object(
        &self,
        session: &Session,
        workspace_id: &str,
        path: &str,
        payload: &Value,
    ) -> Result<ObjectReference, PlatformError>;
}

/// [`PlatformApi`] over HTTPS.
pub struct HttpPlatformClient {
    http: reqwest::Client,
    discovery_url: Url,
}

impl HttpPlatformClient {
    pub fn new(http: reqwest::Client, discovery_url: &Url) -> Self {
        Self {
            http,
            discovery_url: discovery_url.clone(),
        }
    }

    fn instance(session: &Session) -> Result<&Instance, PlatformError> {
        session.instance.as_ref().ok_or(PlatformError::NoInstance)
    }

    fn workspaces_url<'a>(
        instance: &'a Instance,
        operation: &str,
        tail: impl IntoIterator<Item = &'a str>,
    ) -> Result<Url, PlatformError> {
        endpoint(
            &instance.hub_url,
            operation,
            ["workspace", "orgs", instance.org_id.as_str(), "workspaces"]
                .into_iter()
                .chain(tail),
        )
    }

    fn objects_url<'a>(
        instance: &'a Instance,
        workspace_id: &'a str,
        operation: &str,
        tail: impl IntoIterator<Item = &'a str>,
    ) -> Result<Url, PlatformError> {
        endpoint(
            &instance.hub_url,
            operation,
            [
                "geoscience-object",
                "orgs",
                instance.org_id.as_str(),
                "workspaces",
                workspace_id,
                "objects",
            ]
            .into_iter()
            .chain(tail),
        )
    }

    async fn send(
        &self,
        operation: &str,
        session: &Session,
        method: Method,
        url: Url,
        query: &[(&str, String)],
        body: Option<&Value>,
    ) -> Result<(u16, Value), PlatformError> {
        let mut request = self
            .http
            .request(method.clone(), url.clone())
            .bearer_auth(&session.access_token);
        if !query.is_empty() {
            request = request.query(query);
        }
        if let Some(body) = body {
            request = request.json(body);
        }

        tracing::debug!(operation, %method, %url, "platform request");
        let response = request.send().await.map_err(|e| {
            PlatformError::remote(
                RemoteCategory::Transient,
                None,
                operation,
                format!("failed to reach {url}: {e}"),
            )
        })?;

        let status = response.status().as_u16();
        let bytes = response.bytes().await.map_err(|e| {
            PlatformError::remote(
                RemoteCategory::Transient,
                Some(status),
                operation,
                format!("failed to read response body: {e}"),
            )
        })?;
        let body = parse_response_body(&bytes);

        if !(200..=299).contains(&status) {
            let message = error_message(&body).unwrap_or_else(|| format!("HTTP {status}"));
            tracing::debug!(operation, status, "platform request failed");
            return Err(PlatformError::remote(
                RemoteCategory::from_status(status),
                Some(status),
                operation,
                message,
            ));
        }
        Ok((status, body))
    }
}

#[async_trait]
impl PlatformApi for HttpPlatformClient {
    async fn list_instances(&self, session: &Session) -> Result<Vec<Instance>, PlatformError> {
        let url = endpoint(
            self.discovery_url.as_str(),
            "list_instances",
            ["evo", "identity", "v2", "discovery"],
        )?;
        let (_, body) = self
            .send("list_instances", session, Method::GET, url, &[], None)
            .await?;
        parse_discovery(&body)
    }

    async fn service_health(
        &self,
        session: &Session,
        service: &str,
    ) -> Result<ServiceHealth, PlatformError> {
        let instance = Self::instance(session)?;
        let url = endpoint(&instance.hub_url, "service_health", [service, "health_check"])?;
        match self
            .send("service_health", session, Method::GET, url, &[], None)
            .await
        {
            Ok((status, body)) => Ok(ServiceHealth {
                service: service.to_string(),
                status,
                healthy: true,
                body,
            }),
            Err(PlatformError::Remote {
                category: RemoteCategory::Transient,
                status: Some(status),
                message,
                ..
            }) => Ok(ServiceHealth {
                service: service.to_string(),
                status,
                healthy: false,
                body: json!({ "message": message }),
            }),
            Err(err) => Err(err),
        }
    }

    async fn list_workspaces(
        &self,
        session: &Session,
        filter: &WorkspaceFilter,
    ) -> Result<Vec<Workspace>, PlatformError> {
        let instance = Self::instance(session)?;
        let mut query = vec![("deleted", filter.deleted.to_string())];
        if let Some(name) = &filter.name {
            query.push(("name", name.clone()));
        }
        if let Some(limit) = filter.limit {
            query.push(("limit", limit.to_string()));
        }
        let (_, body) = self
            .send(
                "list_workspaces",
                session,
                Method::GET,
                Self::workspaces_url(instance, "list_workspaces", [])?,
                &query,
                None,
            )
            .await?;
        decode_list(&body, "results", "list_workspaces")
    }

    async fn get_workspace(&self, session: &Session, id: &str) -> Result<Workspace, PlatformError> {
        let instance = Self::instance(session)?;
        let url = Self::workspaces_url(instance, "get_workspace", [id])?;
        let (_, body) = self
            .send("get_workspace", session, Method::GET, url, &[], None)
            .await?;
        serde_json::from_value(body)
            .map_err(|e| PlatformError::invalid_response("get_workspace", e.to_string()))
    }

    async fn create_workspace(
        &self,
        session: &Session,
        workspace: &NewWorkspace,
    ) -> Result<Workspace, PlatformError> {
        let instance = Self::instance(session)?;
        let payload = json!({
            "name": workspace.name,
            "description": workspace.description.clone().unwrap_or_default(),
            "labels": workspace.labels,
        });
        let (_, body) = self
            .send(
                "create_workspace",
                session,
                Method::POST,
                Self::workspaces_url(instance, "create_workspace", [])?,
                &[],
                Some(&payload),
            )
            .await?;
        serde_json::from_value(body)
            .map_err(|e| PlatformError::invalid_response("create_workspace", e.to_string()))
    }

    async fn list_objects(
        &self,
        session: &Session,
        workspace_id: &str,
        filter: &ObjectFilter,
    ) -> Result<Vec<ObjectMetadata>, PlatformError> {
        let instance = Self::instance(session)?;
        let mut query = vec![("deleted", filter.deleted.to_string())];
        if let Some(schema) = &filter.schema {
            query.push(("schema_id", schema.clone()));
        }
        if let Some(limit) = filter.limit {
            query.push(("limit", limit.to_string()));
        }
        let (_, body) = self
            .send(
                "list_objects",
                session,
                Method::GET,
                Self::objects_url(instance, workspace_id, "list_objects", [])?,
                &query,
                None,
            )
            .await?;
        decode_list(&body, "objects", "list_objects")
    }

    async fn get_object(
        &self,
        session: &Session,
        workspace_id: &str,
        locator: &ObjectLocator,
        version: Option<&str>,
    ) -> Result<ObjectDocument, PlatformError> {
        let instance = Self::instance(session)?;
        let url = match locator {
            ObjectLocator::Id(id) => {
                Self::objects_url(instance, workspace_id, "get_object", [id.as_str()])?
            }
            ObjectLocator::Path(path) => Self::objects_url(
                instance,
                workspace_id,
                "get_object",
                std::iter::once("path").chain(path_segments(path)),
            )?,
        };
        let query: Vec<(&str, String)> = version
            .map(|v| vec![("version", v.to_string())])
            .unwrap_or_default();
        let (_, body) = self
            .send("get_object", session, Method::GET, url, &query, None)
            .await?;
        parse_object_document(body)
    }

    async fn create_object(
        &self,
        session: &Session,
        workspace_id: &str,
        path: &str,
        payload: &Value,
    ) -> Result<ObjectReference, PlatformError> {
        let instance = Self::instance(session)?;
        let url = Self::objects_url(
            instance,
            workspace_id,
            "create_object",
            std::iter::once("path").chain(path_segments(path)),
        )?;
        let (_, body) = self
            .send("create_object", session, Method::POST, url, &[], Some(payload))
            .await?;
        let object_id = str_field(&body, &["object_id", "id"]).ok_or_else(|| {
            PlatformError::invalid_response("create_object", "response has no object id")
        })?;
        Ok(ObjectReference {
            object_id,
            path: str_field(&body, &["object_path", "path"]).unwrap_or_else(|| path.to_string()),
            version_id: str_field(&body, &["version_id"]),
        })
    }
}

/// `base` with `segments` appended, each percent-encoded as a single segment.
fn endpoint<'a>(
    base: &str,
    operation: &str,
    segments: impl IntoIterator<Item = &'a str>,
) -> Result<Url, PlatformError> {
    let mut url = Url::parse(base).map_err(|e| {
        PlatformError::invalid_response(operation, format!("invalid base url '{base}': {e}"))
    })?;
    url.path_segments_mut()
        .map_err(|()| {
            PlatformError::invalid_response(operation, format!("'{base}' cannot carry a path"))
        })?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

/// Object paths are slash-separated; empty components are dropped.
fn path_segments(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|segment| !segment.is_empty())
}

fn parse_response_body(bytes: &[u8]) -> Value {
    if bytes.is_empty() {
        return Value::Null;
    }
    serde_json::from_slice(bytes)
        .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(bytes).to_string()))
}

fn error_message(body: &Value) -> Option<String> {
    match body {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Object(_) => str_field(body, &["detail", "message", "title", "error"]),
        _ => None,
    }
}

fn str_field(body: &Value, keys: &[&str]) -> Option<String> {
    keys.iter()
        .find_map(|k| body.get(*k))
        .and_then(|v| match v {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        })
}

fn decode_list<T: serde::de::DeserializeOwned>(
    body: &Value,
    key: &str,
    operation: &str,
) -> Result<Vec<T>, PlatformError> {
    let items = match body {
        Value::Array(items) => items.clone(),
        Value::Object(map) => map
            .get(key)
            .and_then(Value::as_array)
            .cloned()
            .ok_or_else(|| {
                PlatformError::invalid_response(operation, format!("response has no '{key}' array"))
            })?,
        _ => {
            return Err(PlatformError::invalid_response(
                operation,
                "response is not a JSON list",
            ));
        }
    };
    items
        .into_iter()
        .map(|item| {
            serde_json::from_value(item)
                .map_err(|e| PlatformError::invalid_response(operation, e.to_string()))
        })
        .collect()
}

fn parse_discovery(body: &Value) -> Result<Vec<Instance>, PlatformError> {
    let orgs = body
        .pointer("/discovery/organizations")
        .or_else(|| body.get("organizations"))
        .and_then(Value::as_array)
        .ok_or_else(|| {
            PlatformError::invalid_response("list_instances", "response has no organizations")
        })?;
    Ok(orgs
        .iter()
        .filter_map(|org| {
            let org_id = str_field(org, &["id"])?;
            let display_name = str_field(org, &["display_name", "name"]).unwrap_or_else(|| org_id.clone());
            let hub_url = org
                .get("hubs")
                .and_then(Value::as_array)
                .and_then(|hubs| hubs.first())
                .and_then(|hub| str_field(hub, &["url"]))?;
            Some(Instance {
                org_id,
                display_name,
                hub_url,
            })
        })
        .collect())
}

fn parse_object_document(body: Value) -> Result<ObjectDocument, PlatformError> {
    let definition = body.get("object").cloned().unwrap_or(Value::Null);
    let metadata = ObjectMetadata {
        id: str_field(&body, &["object_id", "id"]).ok_or_else(|| {
            PlatformError::invalid_response("get_object", "response has no object id")
        })?,
        name: str_field(&definition, &["name"]).unwrap_or_default(),
        path: str_field(&body, &["object_path", "path"]).unwrap_or_default(),
        schema_id: str_field(&definition, &["schema"]).unwrap_or_default(),
        version_id: str_field(&body, &["version_id"]),
        created_at: body
            .get("created_at")
            .and_then(|v| serde_json::from_value(v.clone()).ok()),
        modified_at: body
            .get("modified_at")
            .and_then(|v| serde_json::from_value(v.clone()).ok()),
    };
    Ok(ObjectDocument {
        metadata,
        definition,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_map_to_categories() {
        assert_eq!(RemoteCategory::from_status(404), RemoteCategory::NotFound);
        assert_eq!(RemoteCategory::from_status(401), RemoteCategory::Unauthorized);
        assert_eq!(RemoteCategory::from_status(403), RemoteCategory::Forbidden);
        assert_eq!(RemoteCategory::from_status(409), RemoteCategory::Conflict);
        for transient in [408, 429, 500, 502, 503] {
            assert_eq!(RemoteCategory::from_status(transient), RemoteCategory::Transient);
        }
        assert_eq!(RemoteCategory::from_status(400), RemoteCategory::InvalidResponse);
    }

    #[test]
    fn discovery_takes_first_hub_and_skips_hubless_orgs() {
        let body = json!({
            "discovery": {
                "organizations": [
                    { "id": "org-1", "display_name": "Acme", "hubs": [
                        { "url": "https://350mt.api.seequent.com", "code": "350mt" },
                        { "url": "https://other.example" }
                    ]},
                    { "id": "org-2", "display_name": "Empty", "hubs": [] }
                ]
            }
        });
        let instances = parse_discovery(&body).unwrap();
        assert_eq!(instances.len(), 1);
        assert_eq!(instances[0].hub_url, "https://350mt.api.seequent.com");
    }

    #[test]
    fn list_decoding_accepts_wrapped_and_bare_arrays() {
        let wrapped = json!({ "results": [{ "id": "w1", "name": "Alpha" }] });
        let bare = json!([{ "id": "w2", "name": "Beta", "current_user_role": "owner" }]);
        let a: Vec<Workspace> = decode_list(&wrapped, "results", "t").unwrap();
        let b: Vec<Workspace> = decode_list(&bare, "results", "t").unwrap();
        assert_eq!(a[0].name, "Alpha");
        assert_eq!(b[0].user_role.as_deref(), Some("owner"));
        let err = decode_list::<Workspace>(&json!({}), "results", "t").unwrap_err();
        assert_eq!(err.category(), Some(RemoteCategory::InvalidResponse));
    }

    #[test]
    fn object_document_reads_definition_fields() {
        let doc = parse_object_document(json!({
            "object_id": "o1",
            "object_path": "/a/b.json",
            "version_id": "7",
            "object": { "name": "b", "schema": "/objects/pointset/1.3.0/pointset.schema.json" }
        }))
        .unwrap();
        assert_eq!(doc.metadata.id, "o1");
        assert_eq!(doc.metadata.version_id.as_deref(), Some("7"));
        assert!(doc.metadata.schema_id.contains("pointset"));
    }

    fn instance_at(hub_url: &str) -> Instance {
        Instance {
            org_id: "org".into(),
            display_name: "Org".into(),
            hub_url: hub_url.into(),
        }
    }

    #[test]
    fn reserved_characters_stay_inside_their_path_segment() {
        let instance = instance_at("https://hub.example/");
        let url = HttpPlatformClient::objects_url(
            &instance,
            "ws 1",
            "create_object",
            std::iter::once("path").chain(path_segments("/assays/intervals/DH#1?.json")),
        )
        .unwrap();
        assert_eq!(
            url.as_str(),
            "https://hub.example/geoscience-object/orgs/org/workspaces/ws%201/objects/path/assays/intervals/DH%231%3F.json"
        );
        assert!(url.fragment().is_none());
        assert!(url.query().is_none());

        let id_url =
            HttpPlatformClient::workspaces_url(&instance, "get_workspace", ["a/b"]).unwrap();
        assert!(id_url.as_str().ends_with("/workspaces/a%2Fb"));
    }

    #[test]
    fn unusable_hub_url_is_an_invalid_response() {
        let err = endpoint("not a url", "list_workspaces", ["x"]).unwrap_err();
        assert_eq!(err.category(), Some(RemoteCategory::InvalidResponse));
    }

    #[tokio::test]
    async fn grouped_object_paths_reach_the_server_intact() {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 16 * 1024];
            let n = stream.read(&mut buf).await.unwrap();
            let request = String::from_utf8_lossy(&buf[..n]).to_string();
            let body = r#"{"object_id":"o-1","version_id":"v-1"}"#;
            let response = format!(
                "HTTP/1.1 201 Created\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                body.len()
            );
            stream.write_all(response.as_bytes()).await.unwrap();
            request.lines().next().unwrap_or_default().to_string()
        });

        let discovery = Url::parse("http://127.0.0.1:1/").unwrap();
        let client = HttpPlatformClient::new(reqwest::Client::new(), &discovery);
        let session = Session {
            access_token: "token".into(),
            refresh_token: None,
            expires_at: None,
            instance: Some(instance_at(&format!("http://{addr}"))),
        };
        let reference = client
            .create_object(&session, "ws", "assays/intervals/DH#1.json", &json!({}))
            .await
            .unwrap();

        let request_line = server.await.unwrap();
        assert_eq!(
            request_line,
            "POST /geoscience-object/orgs/org/workspaces/ws/objects/path/assays/intervals/DH%231.json HTTP/1.1"
        );
        assert_eq!(reference.object_id, "o-1");
        assert_eq!(reference.path, "assays/intervals/DH#1.json");
    }

    #[test]
    fn error_message_prefers_detail() {
        assert_eq!(
            error_message(&json!({ "detail": "Workspace not found", "title": "Not Found" })),
            Some("Workspace not found".to_string())
        );
        assert_eq!(error_message(&Value::Null), None);
    }
}
