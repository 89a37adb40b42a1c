//! Routes a tool call to its handler with a valid session, honouring the
//! process tool filter and client cancellation.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use evo_core::error::ErrorKind;
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::config::{RuntimeSettings, ToolFilter};
use crate::error::ToolError;
use crate::platform::{Instance, PlatformApi};
use crate::registry::{ToolDescriptor, ToolRegistry};
use crate::session::{Session, SessionManager};

/// Everything a handler may touch. Built per call.
pub struct ToolContext {
    /// Valid at the time the handler started.
    pub session: Session,
    pub sessions: Arc<SessionManager>,
    pub platform: Arc<dyn PlatformApi>,
    pub settings: Arc<RuntimeSettings>,
    pub cancel: CancellationToken,
}

impl ToolContext {
    /// The session bound to an instance. When none is selected yet, the
    /// first instance visible to the user is selected and persisted.
    pub async fn scoped_session(&self) -> Result<Session, ToolError> {
        if self.session.instance.is_some() {
            return Ok(self.session.clone());
        }
        let instances = self.platform.list_instances(&self.session).await?;
        let Some(first) = instances.into_iter().next() else {
            return Err(ToolError::new(
                ErrorKind::RemotePermanent,
                "The signed-in user does not have access to any Evo instances",
            )
            .with_docs_hint("Ask an Evo administrator to grant access to an organisation."));
        };
        tracing::info!(instance = %first.display_name, org_id = %first.org_id, "selecting default instance");
        Ok(self.sessions.select_instance(first).await?)
    }

    pub async fn select_instance(&self, instance: Instance) -> Result<Session, ToolError> {
        Ok(self.sessions.select_instance(instance).await?)
    }
}

/// Tool registry bound to the process filter and collaborators.
pub struct Dispatcher {
    registry: Arc<ToolRegistry>,
    filter: ToolFilter,
    sessions: Arc<SessionManager>,
    platform: Arc<dyn PlatformApi>,
    settings: Arc<RuntimeSettings>,
}

impl Dispatcher {
    pub fn new(
        registry: Arc<ToolRegistry>,
        sessions: Arc<SessionManager>,
        platform: Arc<dyn PlatformApi>,
        settings: Arc<RuntimeSettings>,
    ) -> Self {
        Self {
            filter: settings.tool_filter,
            registry,
            sessions,
            platform,
            settings,
        }
    }

    pub fn filter(&self) -> ToolFilter {
        self.filter
    }

    pub fn visible_tools(&self) -> Vec<&ToolDescriptor> {
        self.registry.list_visible(self.filter)
    }

    pub fn sessions(&self) -> &Arc<SessionManager> {
        &self.sessions
    }

    /// Invoke `name` with `args`.
    ///
    /// A tool outside the active filter is reported exactly like one that
    /// does not exist. When `cancel` fires the handler future is dropped and
    /// a `cancelled` error is returned; for mutating tools that had already
    /// started, it is flagged as possibly partially applied.
    pub async fn dispatch(
        &self,
        name: &str,
        args: Map<String, Value>,
        cancel: CancellationToken,
    ) -> Result<Value, ToolError> {
        let tool = self
            .registry
            .resolve(name)
            .ok()
            .filter(|tool| self.filter.includes(tool.category))
            .ok_or_else(|| ToolError::unknown_tool(name))?;
        tool.validate_arguments(&args)?;

        let span = tracing::info_span!("tool_call", tool = tool.name, category = tool.category.as_str());
        let started_at = Instant::now();
        let handler_started = AtomicBool::new(false);

        let outcome = async {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    let partial = !tool.read_only && handler_started.load(Ordering::SeqCst);
                    Err(ToolError::cancelled(partial))
                }
                result = self.invoke(tool, &args, cancel.clone(), &handler_started) => result,
            }
        }
        .instrument(span.clone())
        .await;

        let elapsed_ms = started_at.elapsed().as_millis() as u64;
        span.in_scope(|| match &outcome {
            Ok(_) => tracing::info!(elapsed_ms, "tool call completed"),
            Err(err) if err.kind == ErrorKind::Cancelled => {
                tracing::warn!(elapsed_ms, details = ?err.details, "tool call cancelled")
            }
            Err(err) => {
                tracing::warn!(elapsed_ms, kind = err.kind.as_str(), error = %err.message, "tool call failed")
            }
        });
        outcome
    }

    async fn invoke(
        &self,
        tool: &ToolDescriptor,
        args: &Map<String, Value>,
        cancel: CancellationToken,
        handler_started: &AtomicBool,
    ) -> Result<Value, ToolError> {
        let session = self.sessions.acquire().await?;
        let session = self.sessions.ensure_valid(&session).await?;
        let ctx = ToolContext {
            session,
            sessions: self.sessions.clone(),
            platform: self.platform.clone(),
            settings: self.settings.clone(),
            cancel,
        };
        handler_started.store(true, Ordering::SeqCst);
        tracing::debug!("handler started");
        (tool.handler)(&ctx, args).await
    }
}
