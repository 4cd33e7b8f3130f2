//! The MCP tool-router surface (§4.9, §4.10): `GatewayServer` dispatches each
//! `#[tool]` method to `vault_tools`/`sync_tools`, resolving the caller's
//! identity from [`crate::context`] before touching any per-user state.

use rmcp::handler::server::{router::tool::ToolRouter, wrapper::Parameters};
use rmcp::model::*;
use rmcp::{tool, tool_handler, tool_router};
use schemars::JsonSchema;
use serde::Deserialize;

use crate::context;
use crate::state::AppState;
use crate::{sync_tools, vault_tools};

#[derive(Debug, Deserialize, JsonSchema)]
pub struct UploadFileParams {
    /// Vault-relative path to create, e.g. "notes/idea.md"
    pub filename: String,
    /// File contents
    pub content: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct CreateNoteParams {
    /// Note title; sanitized into the filename
    pub title: String,
    /// Body content placed under the "# title" heading
    #[serde(default)]
    pub content: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct ReadFileParams {
    /// Vault-relative path to read
    pub filename: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct ModifyFileParams {
    /// Vault-relative path to overwrite
    pub filename: String,
    /// New file contents
    pub content: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct DeleteFileParams {
    /// Vault-relative path to delete
    pub filename: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct ListFilesParams {
    /// Vault-relative directory to list; empty for the vault root
    #[serde(default)]
    pub directory: String,
}

fn default_k() -> usize {
    5
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct SearchFilesParams {
    /// Free-text semantic search query
    pub query: String,
    /// Number of results to return
    #[serde(default = "default_k")]
    pub k: usize,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct ConfigureParams {
    /// Git remote URL for the vault repository
    #[serde(default)]
    pub repo_url: Option<String>,
    /// Access token/password for the repository
    #[serde(default)]
    pub token: Option<String>,
    /// Branch to track
    #[serde(default = "default_branch")]
    pub branch: String,
}

fn default_branch() -> String {
    "main".to_string()
}

#[derive(Clone)]
pub struct GatewayServer {
    state: AppState,
    tool_router: ToolRouter<Self>,
}

#[tool_router]
impl GatewayServer {
    pub fn new(state: AppState) -> Self {
        Self {
            state,
            tool_router: Self::tool_router(),
        }
    }

    fn user(&self) -> Result<String, ErrorData> {
        context::current_user()
    }

    #[tool(description = "Upload a new file to the vault. Fails if the file already exists.")]
    async fn upload_file(&self, params: Parameters<UploadFileParams>) -> Result<CallToolResult, ErrorData> {
        let user = self.user()?;
        vault_tools::upload_file(&self.state, &user, &params.0.filename, &params.0.content).await
    }

    #[tool(description = "Create a new note from a title and body. The title is sanitized into a filename.")]
    async fn create_note(&self, params: Parameters<CreateNoteParams>) -> Result<CallToolResult, ErrorData> {
        let user = self.user()?;
        vault_tools::create_note(&self.state, &user, &params.0.title, &params.0.content).await
    }

    #[tool(description = "Read the complete contents of a file in the vault.")]
    async fn read_file(&self, params: Parameters<ReadFileParams>) -> Result<CallToolResult, ErrorData> {
        let user = self.user()?;
        vault_tools::read_file(&self.state, &user, &params.0.filename).await
    }

    #[tool(description = "Overwrite an existing file's contents. Fails if the file does not exist.")]
    async fn modify_file(&self, params: Parameters<ModifyFileParams>) -> Result<CallToolResult, ErrorData> {
        let user = self.user()?;
        vault_tools::modify_file(&self.state, &user, &params.0.filename, &params.0.content).await
    }

    #[tool(description = "Permanently delete a file from the vault.")]
    async fn delete_file(&self, params: Parameters<DeleteFileParams>) -> Result<CallToolResult, ErrorData> {
        let user = self.user()?;
        vault_tools::delete_file(&self.state, &user, &params.0.filename).await
    }

    #[tool(description = "List files and subdirectories under a vault directory.")]
    async fn list_files(&self, params: Parameters<ListFilesParams>) -> Result<CallToolResult, ErrorData> {
        let user = self.user()?;
        vault_tools::list_files(&self.state, &user, &params.0.directory).await
    }

    #[tool(description = "Search the vault by semantic similarity to a free-text query.")]
    async fn search_files(&self, params: Parameters<SearchFilesParams>) -> Result<CallToolResult, ErrorData> {
        let user = self.user()?;
        vault_tools::search_files(&self.state, &user, &params.0.query, params.0.k).await
    }

    #[tool(description = "Configure or inspect Git sync for this vault. Omit repo_url/token to get the current sync status instead.")]
    async fn configure(&self, params: Parameters<ConfigureParams>) -> Result<CallToolResult, ErrorData> {
        let user = self.user()?;
        sync_tools::configure(
            &self.state,
            &user,
            params.0.repo_url.as_deref(),
            params.0.token.as_deref(),
            &params.0.branch,
        )
        .await
    }

    #[tool(description = "Report the current Git sync status: repository, branch, progress, and state.")]
    async fn status(&self) -> Result<CallToolResult, ErrorData> {
        let user = self.user()?;
        sync_tools::status(&self.state, &user).await
    }

    #[tool(description = "Clear the sync circuit breaker without requiring a successful sync first.")]
    async fn reset_failures(&self) -> Result<CallToolResult, ErrorData> {
        let user = self.user()?;
        sync_tools::reset_failures(&self.state, &user).await
    }

    #[tool(description = "Force a full reindex of the vault on the next sync cycle.")]
    async fn force_reindex(&self) -> Result<CallToolResult, ErrorData> {
        let user = self.user()?;
        sync_tools::force_reindex(&self.state, &user).await
    }
}

#[tool_handler]
impl rmcp::ServerHandler for GatewayServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::LATEST,
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation {
                name: "obsidian-sync-mcp".into(),
                version: env!("CARGO_PKG_VERSION").into(),
                ..Default::default()
            },
            instructions: Some(
                "Obsidian Sync MCP gateway - read, write, and search a per-user Obsidian vault that is mirrored to a Git repository."
                    .into(),
            ),
        }
    }
}
