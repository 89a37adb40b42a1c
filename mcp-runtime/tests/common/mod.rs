//! In-memory stand-ins for the identity provider and the Evo platform.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use evo_core::auth::TokenResponse;
use evo_mcp_runtime::config::{RuntimeSettings, ToolFilter};
use evo_mcp_runtime::credentials::MemoryCredentialStore;
use evo_mcp_runtime::dispatcher::Dispatcher;
use evo_mcp_runtime::platform::{
    Instance, NewWorkspace, ObjectDocument, ObjectFilter, ObjectLocator, ObjectMetadata,
    ObjectReference, PlatformApi, PlatformError, RemoteCategory, ServiceHealth, Workspace,
    WorkspaceFilter,
};
use evo_mcp_runtime::registry::ToolRegistry;
use evo_mcp_runtime::session::{AuthError, IdentityProvider, Session, SessionManager};
use evo_mcp_runtime::tools::default_registry;
use serde_json::{Value, json};

pub const CLIENT_ID: &str = "test-client";

/// Identity provider that hands out numbered tokens after a short delay.
#[derive(Default)]
pub struct FakeIdentity {
    pub logins: AtomicU64,
    pub refreshes: AtomicU64,
    pub reject_refresh: bool,
    pub unreachable: bool,
    pub delay: Duration,
}

impl FakeIdentity {
    pub fn slow(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }

    pub fn rejecting() -> Self {
        Self {
            reject_refresh: true,
            ..Self::default()
        }
    }

    pub fn unreachable() -> Self {
        Self {
            unreachable: true,
            ..Self::default()
        }
    }

    fn tokens(prefix: &str, n: u64) -> TokenResponse {
        TokenResponse {
            access_token: format!("{prefix}-access-{n}"),
            refresh_token: Some(format!("{prefix}-refresh-{n}")),
            expires_in: Some(3600),
            token_type: Some("Bearer".into()),
        }
    }
}

#[async_trait]
impl IdentityProvider for FakeIdentity {
    async fn login(&self) -> Result<TokenResponse, AuthError> {
        let n = self.logins.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(Self::tokens("login", n))
    }

    async fn refresh(&self, _refresh_token: &str) -> Result<TokenResponse, AuthError> {
        tokio::time::sleep(self.delay).await;
        let n = self.refreshes.fetch_add(1, Ordering::SeqCst) + 1;
        if self.unreachable {
            return Err(AuthError::Transport("connection reset".into()));
        }
        if self.reject_refresh {
            return Err(AuthError::RefreshRejected("invalid_grant".into()));
        }
        Ok(Self::tokens("refreshed", n))
    }
}

pub fn instance(org_id: &str, name: &str) -> Instance {
    Instance {
        org_id: org_id.into(),
        display_name: name.into(),
        hub_url: format!("https://{org_id}.api.example.test"),
    }
}

pub fn workspace(id: &str, name: &str) -> Workspace {
    Workspace {
        id: id.into(),
        name: name.into(),
        description: None,
        labels: Vec::new(),
        created_at: None,
        updated_at: None,
        user_role: Some("owner".into()),
    }
}

/// Platform double. Object creation can be delayed or failed per path and
/// records the order in which creations completed.
pub struct FakePlatform {
    pub instances: Vec<Instance>,
    pub workspaces: Vec<Workspace>,
    delays: HashMap<String, Duration>,
    failures: HashMap<String, PlatformError>,
    completed: Mutex<Vec<String>>,
    create_calls: AtomicU64,
    instance_lookups: AtomicU64,
}

impl Default for FakePlatform {
    fn default() -> Self {
        Self {
            instances: vec![instance("org-1", "Acme Mining"), instance("org-2", "Beta Survey")],
            workspaces: vec![workspace("ws-1", "Exploration"), workspace("ws-2", "Resources")],
            delays: HashMap::new(),
            failures: HashMap::new(),
            completed: Mutex::new(Vec::new()),
            create_calls: AtomicU64::new(0),
            instance_lookups: AtomicU64::new(0),
        }
    }
}

impl FakePlatform {
    pub fn with_delay(mut self, path: &str, millis: u64) -> Self {
        self.delays.insert(path.into(), Duration::from_millis(millis));
        self
    }

    pub fn failing(mut self, path: &str, category: RemoteCategory) -> Self {
        self.failures.insert(
            path.into(),
            PlatformError::remote(category, None, "create_object", format!("{category} for {path}")),
        );
        self
    }

    pub fn completed_paths(&self) -> Vec<String> {
        self.completed.lock().unwrap().clone()
    }

    pub fn create_calls(&self) -> u64 {
        self.create_calls.load(Ordering::SeqCst)
    }

    pub fn instance_lookups(&self) -> u64 {
        self.instance_lookups.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PlatformApi for FakePlatform {
    async fn list_instances(&self, _session: &Session) -> Result<Vec<Instance>, PlatformError> {
        self.instance_lookups.fetch_add(1, Ordering::SeqCst);
        Ok(self.instances.clone())
    }

    async fn service_health(
        &self,
        _session: &Session,
        service: &str,
    ) -> Result<ServiceHealth, PlatformError> {
        Ok(ServiceHealth {
            service: service.into(),
            status: 200,
            healthy: true,
            body: json!({ "status": "ok" }),
        })
    }

    async fn list_workspaces(
        &self,
        _session: &Session,
        filter: &WorkspaceFilter,
    ) -> Result<Vec<Workspace>, PlatformError> {
        Ok(self
            .workspaces
            .iter()
            .filter(|ws| filter.name.as_ref().is_none_or(|name| &ws.name == name))
            .cloned()
            .collect())
    }

    async fn get_workspace(&self, _session: &Session, id: &str) -> Result<Workspace, PlatformError> {
        self.workspaces
            .iter()
            .find(|ws| ws.id == id)
            .cloned()
            .ok_or_else(|| {
                PlatformError::remote(RemoteCategory::NotFound, Some(404), "get_workspace", "no such workspace")
            })
    }

    async fn create_workspace(
        &self,
        _session: &Session,
        new: &NewWorkspace,
    ) -> Result<Workspace, PlatformError> {
        let mut created = workspace("ws-new", &new.name);
        created.description = new.description.clone();
        created.labels = new.labels.clone();
        Ok(created)
    }

    async fn list_objects(
        &self,
        _session: &Session,
        _workspace_id: &str,
        _filter: &ObjectFilter,
    ) -> Result<Vec<ObjectMetadata>, PlatformError> {
        Ok(Vec::new())
    }

    async fn get_object(
        &self,
        _session: &Session,
        _workspace_id: &str,
        _locator: &ObjectLocator,
        _version: Option<&str>,
    ) -> Result<ObjectDocument, PlatformError> {
        Err(PlatformError::remote(
            RemoteCategory::NotFound,
            Some(404),
            "get_object",
            "no such object",
        ))
    }

    async fn create_object(
        &self,
        _session: &Session,
        _workspace_id: &str,
        path: &str,
        _payload: &Value,
    ) -> Result<ObjectReference, PlatformError> {
        let n = self.create_calls.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(delay) = self.delays.get(path) {
            tokio::time::sleep(*delay).await;
        }
        if let Some(err) = self.failures.get(path) {
            return Err(err.clone());
        }
        self.completed.lock().unwrap().push(path.to_string());
        Ok(ObjectReference {
            object_id: format!("obj-{n}"),
            path: path.to_string(),
            version_id: Some(format!("v-{n}")),
        })
    }
}

/// Session seeded from a non-JWT token, so it never expires.
pub fn static_sessions() -> Arc<SessionManager> {
    Arc::new(SessionManager::with_token(
        "static-token".into(),
        Arc::new(FakeIdentity::default()),
        Arc::new(MemoryCredentialStore::default()),
        CLIENT_ID,
    ))
}

pub fn settings(filter: ToolFilter) -> RuntimeSettings {
    let mut settings = RuntimeSettings::new(CLIENT_ID).unwrap();
    settings.tool_filter = filter;
    settings.import_max_parallel = 2;
    settings
}

pub fn dispatcher_with(
    registry: ToolRegistry,
    filter: ToolFilter,
    platform: Arc<FakePlatform>,
) -> Dispatcher {
    Dispatcher::new(
        Arc::new(registry),
        static_sessions(),
        platform,
        Arc::new(settings(filter)),
    )
}

pub fn dispatcher(filter: ToolFilter, platform: Arc<FakePlatform>) -> Dispatcher {
    dispatcher_with(default_registry().unwrap(), filter, platform)
}

pub fn args(value: Value) -> serde_json::Map<String, Value> {
    match value {
        Value::Object(map) => map,
        other => panic!("expected an object, got {other}"),
    }
}
