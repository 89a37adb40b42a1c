//! Model Context Protocol server for the Seequent Evo platform.

use std::sync::Arc;

use clap::Subcommand;
use serde_json::{Value, json};

mod args;
pub mod config;
pub mod credentials;
pub mod dispatcher;
pub mod error;
pub mod import;
pub mod platform;
pub mod prompts;
pub mod registry;
pub mod server;
pub mod session;
pub mod tools;

use config::{ConfigError, ConnectionArgs, RuntimeSettings};
use credentials::{CredentialStore, FileCredentialStore, MemoryCredentialStore};
use dispatcher::Dispatcher;
use platform::{HttpPlatformClient, PlatformApi};
use registry::RegistryError;
use server::{McpServer, to_pretty_json};
use session::{AuthError, OAuthIdentityProvider, SessionManager};

#[derive(Subcommand)]
pub enum McpCommands {
    /// Run the Evo MCP server over stdio
    Serve(ConnectionArgs),
    /// Sign in through the browser and cache the credentials
    Login(ConnectionArgs),
    /// Forget cached credentials
    Logout(ConnectionArgs),
    /// Show the cached session without contacting the platform
    Status(ConnectionArgs),
    /// List the tools exposed under the configured tool filter
    Tools(ConnectionArgs),
}

#[derive(Debug, thiserror::Error)]
enum CommandError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error("{0}")]
    Server(String),
}

impl CommandError {
    fn code(&self) -> &'static str {
        match self {
            CommandError::Config(_) => "config_error",
            CommandError::Auth(_) => "auth_error",
            CommandError::Registry(_) => "internal",
            CommandError::Server(_) => "mcp_server_error",
        }
    }

    fn exit_code(&self) -> i32 {
        match self {
            CommandError::Auth(_) => 2,
            _ => 1,
        }
    }
}

pub async fn run(command: McpCommands) -> i32 {
    let result = match command {
        McpCommands::Serve(args) => serve(args).await,
        McpCommands::Login(args) => login(args).await,
        McpCommands::Logout(args) => logout(args).await,
        McpCommands::Status(args) => status(args).await,
        McpCommands::Tools(args) => list_tools(args),
    };
    match result {
        Ok(()) => 0,
        Err(err) => {
            let payload = json!({
                "error": err.code(),
                "message": err.to_string(),
            });
            eprintln!("{}", to_pretty_json(&payload));
            err.exit_code()
        }
    }
}

/// Collaborators shared by every subcommand.
pub struct Runtime {
    pub settings: Arc<RuntimeSettings>,
    pub sessions: Arc<SessionManager>,
    pub platform: Arc<dyn PlatformApi>,
}

impl Runtime {
    pub fn from_settings(settings: RuntimeSettings) -> Self {
        let http = reqwest::Client::builder()
            .user_agent(concat!("evo-mcp/", env!("CARGO_PKG_VERSION")))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        let provider = Arc::new(OAuthIdentityProvider::new(http.clone(), &settings));
        let sessions = match &settings.explicit_token {
            Some(token) => SessionManager::with_token(
                token.clone(),
                provider,
                Arc::new(MemoryCredentialStore::default()),
                settings.client_id.clone(),
            ),
            None => {
                let store: Arc<dyn CredentialStore> =
                    Arc::new(FileCredentialStore::new(&settings.config_dir));
                SessionManager::new(
                    provider,
                    store,
                    settings.client_id.clone(),
                    settings.refresh_margin,
                )
            }
        };
        let platform = Arc::new(HttpPlatformClient::new(http, &settings.discovery_url));
        Self {
            settings: Arc::new(settings),
            sessions: Arc::new(sessions),
            platform,
        }
    }

    pub fn dispatcher(&self) -> Result<Dispatcher, RegistryError> {
        Ok(Dispatcher::new(
            Arc::new(tools::default_registry()?),
            self.sessions.clone(),
            self.platform.clone(),
            self.settings.clone(),
        ))
    }
}

async fn serve(args: ConnectionArgs) -> Result<(), CommandError> {
    let runtime = Runtime::from_settings(args.into_settings()?);
    let dispatcher = runtime.dispatcher()?;
    tracing::info!(
        tool_filter = %runtime.settings.tool_filter,
        tools = dispatcher.visible_tools().len(),
        credentials = %runtime.sessions.store_location(),
        explicit_token = runtime.settings.explicit_token.is_some(),
        "serving MCP over stdio"
    );
    McpServer::new(Arc::new(dispatcher))
        .serve_stdio()
        .await
        .map_err(CommandError::Server)
}

async fn login(args: ConnectionArgs) -> Result<(), CommandError> {
    let runtime = Runtime::from_settings(args.into_settings()?);
    if runtime.settings.explicit_token.is_none() {
        runtime.sessions.logout().await?;
    }
    let session = runtime.sessions.acquire().await?;
    println!(
        "{}",
        to_pretty_json(&json!({
            "signed_in": true,
            "expires_at": session.expires_at,
            "instance": session.instance,
            "credentials": runtime.sessions.store_location(),
        }))
    );
    Ok(())
}

async fn logout(args: ConnectionArgs) -> Result<(), CommandError> {
    let runtime = Runtime::from_settings(args.into_settings()?);
    runtime.sessions.logout().await?;
    println!(
        "{}",
        to_pretty_json(&json!({
            "signed_in": false,
            "credentials": runtime.sessions.store_location(),
        }))
    );
    Ok(())
}

async fn status(args: ConnectionArgs) -> Result<(), CommandError> {
    let runtime = Runtime::from_settings(args.into_settings()?);
    let session = runtime.sessions.current().await;
    let now = chrono::Utc::now();
    let payload = match session {
        Some(session) => json!({
            "signed_in": true,
            "expired": session.expires_within(chrono::Duration::zero(), now),
            "expires_at": session.expires_at,
            "has_refresh_token": session.refresh_token.is_some(),
            "instance": session.instance,
        }),
        None => json!({ "signed_in": false }),
    };
    let mut payload = payload;
    payload["credentials"] = Value::String(runtime.sessions.store_location());
    payload["tool_filter"] = Value::String(runtime.settings.tool_filter.to_string());
    println!("{}", to_pretty_json(&payload));
    Ok(())
}

fn list_tools(args: ConnectionArgs) -> Result<(), CommandError> {
    let settings = args.into_settings()?;
    let registry = tools::default_registry()?;
    let tools: Vec<Value> = registry
        .list_visible(settings.tool_filter)
        .iter()
        .map(|tool| {
            json!({
                "name": tool.name,
                "category": tool.category.as_str(),
                "read_only": tool.read_only,
                "description": tool.description,
            })
        })
        .collect();
    println!(
        "{}",
        to_pretty_json(&json!({
            "tool_filter": settings.tool_filter.as_str(),
            "tools": tools,
        }))
    );
    Ok(())
}
