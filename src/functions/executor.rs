//! Function executor
//!
//! Receives (name, arguments) from a backend and either performs the side
//! effect or fails with a typed error. Three gates run in order:
//!
//! 1. Policy    — blocked set, then catalog membership
//! 2. Validation — schema check plus per-function safety checks
//! 3. Confirmation — names in the confirmation set go to the external
//!    channel; no channel registered means deny
//!
//! Failures are returned to the model as tool-result errors; the session
//! continues.

use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use tokio::sync::oneshot;
use tracing::{info, warn};

use crate::clock::Clock;
use crate::functions::host::{ToolHost, WindowAction, MAX_FILE_SIZE};
use crate::functions::{catalog, ExecError};
use crate::security::{validate_command, validate_url, PathPolicy};
use crate::types::{ToolCall, ToolResult};

/// A confirmation prompt delivered to the external channel
#[derive(Debug, Clone)]
pub struct ConfirmationRequest {
    /// Unique id; resolve with `FunctionExecutor::resolve_confirmation`
    pub id: String,
    pub function: String,
    pub arguments: Value,
    pub description: String,
}

/// Callback that surfaces a confirmation request to the user. The answer
/// comes back asynchronously through `resolve_confirmation`.
pub type ConfirmationHandler = Arc<dyn Fn(ConfirmationRequest) + Send + Sync>;

/// Policy configuration for the executor
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Function names that always fail with Blocked
    pub blocked: Vec<String>,
    /// Function names that must pass the confirmation channel
    pub require_confirmation: Vec<String>,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            blocked: vec![
                "access_credentials".to_string(),
                "modify_admin_protected".to_string(),
                "run_arbitrary_powershell".to_string(),
            ],
            require_confirmation: vec![
                "delete_file".to_string(),
                "modify_system_settings".to_string(),
                "uninstall_application".to_string(),
                "modify_registry".to_string(),
            ],
        }
    }
}

/// Validates, authorizes, and performs tool calls
#[derive(Clone)]
pub struct FunctionExecutor {
    blocked: HashSet<String>,
    require_confirmation: HashSet<String>,
    host: ToolHost,
    paths: PathPolicy,
    clock: Arc<dyn Clock>,
    handler: Arc<Mutex<Option<ConfirmationHandler>>>,
    /// Pending confirmations keyed by request id; each resolved at most once
    pending: Arc<Mutex<HashMap<String, oneshot::Sender<bool>>>>,
}

impl FunctionExecutor {
    pub fn new(config: ExecutorConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            blocked: config.blocked.into_iter().collect(),
            require_confirmation: config.require_confirmation.into_iter().collect(),
            host: ToolHost::new(),
            paths: PathPolicy::default(),
            clock,
            handler: Arc::new(Mutex::new(None)),
            pending: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn with_path_policy(mut self, paths: PathPolicy) -> Self {
        self.paths = paths;
        self
    }

    /// Register the external confirmation channel
    pub fn set_confirmation_handler(&self, handler: ConfirmationHandler) {
        *self.handler.lock().unwrap() = Some(handler);
    }

    /// Answer a pending confirmation. Returns false if the id is unknown or
    /// was already resolved.
    pub fn resolve_confirmation(&self, id: &str, approved: bool) -> bool {
        let sender = self.pending.lock().unwrap().remove(id);
        match sender {
            Some(tx) => tx.send(approved).is_ok(),
            None => false,
        }
    }

    /// Run a tool call to a terminal result, measuring execution time
    pub async fn execute_call(&self, call: &ToolCall) -> ToolResult {
        let start = std::time::Instant::now();
        let outcome = self.execute(&call.name, &call.arguments).await;
        let elapsed = start.elapsed().as_millis() as u64;

        match outcome {
            Ok(result) => ToolResult::ok(&call.call_id, result, elapsed),
            Err(err) => {
                warn!(function = %call.name, error = %err, "tool call failed");
                ToolResult::failed(&call.call_id, err.to_string(), elapsed)
            }
        }
    }

    /// Apply the three gates, then perform the side effect
    pub async fn execute(&self, name: &str, args: &Value) -> Result<Value, ExecError> {
        // Gate 1: policy
        if self.blocked.contains(name) {
            return Err(ExecError::Blocked(format!("function '{}' is blocked", name)));
        }
        let def = catalog::find(name)
            .ok_or_else(|| ExecError::UnknownFunction(format!("unknown function '{}'", name)))?;

        // Gate 2: validation — schema first, then the per-function safety
        // checks. A denied call must never reach the confirmation channel.
        catalog::validate_args(&def, args).map_err(ExecError::InvalidArguments)?;
        self.validate_safety(name, args)?;

        // Gate 3: confirmation
        if self.require_confirmation.contains(name) {
            let approved = self.request_confirmation(name, args).await?;
            if !approved {
                return Err(ExecError::NotApproved(format!(
                    "user declined '{}'",
                    name
                )));
            }
        }

        info!(function = %name, args = %sanitize_args(args), "executing function");
        self.dispatch(name, args).await
    }

    /// Per-function safety checks: path sandbox, URL policy, command
    /// policy, app whitelist, window action. Resolution is repeated in
    /// `dispatch` (it is pure and cheap); this pass only decides
    /// allow/deny.
    fn validate_safety(&self, name: &str, args: &Value) -> Result<(), ExecError> {
        match name {
            "launch_application" => {
                let app = str_arg(args, "app_name");
                ToolHost::resolve_app(app).ok_or_else(|| {
                    ExecError::AppDenied(format!("application '{}' is not whitelisted", app))
                })?;
            }
            "open_file" | "list_files" | "read_file" | "delete_file" => {
                self.checked_path(args, "path")?;
            }
            "create_file" => {
                self.checked_path(args, "path")?;
                let content = args["content"].as_str().unwrap_or("");
                if content.len() as u64 > MAX_FILE_SIZE {
                    return Err(ExecError::InvalidArguments(format!(
                        "content is {} bytes, over the {} MiB limit",
                        content.len(),
                        MAX_FILE_SIZE / 1024 / 1024
                    )));
                }
            }
            "move_file" => {
                self.checked_path(args, "source")?;
                self.checked_path(args, "destination")?;
            }
            "search_files" => {
                if let Some(dir) = args["directory"].as_str() {
                    self.paths.validate(dir).map_err(ExecError::PathDenied)?;
                }
            }
            "open_url" => {
                validate_url(str_arg(args, "url")).map_err(ExecError::UrlDenied)?;
            }
            "run_command" => {
                validate_command(str_arg(args, "command")).map_err(ExecError::CommandDenied)?;
            }
            "manage_window" => {
                WindowAction::from_str(str_arg(args, "action")).ok_or_else(|| {
                    ExecError::InvalidArguments("unsupported window action".to_string())
                })?;
            }
            _ => {}
        }
        Ok(())
    }

    async fn request_confirmation(&self, name: &str, args: &Value) -> Result<bool, ExecError> {
        let handler = self.handler.lock().unwrap().clone();
        let handler = handler.ok_or_else(|| {
            ExecError::NotApproved("no confirmation channel registered".to_string())
        })?;

        let id = uuid::Uuid::new_v4().to_string();
        let (tx, rx) = oneshot::channel();
        self.pending.lock().unwrap().insert(id.clone(), tx);

        handler(ConfirmationRequest {
            id: id.clone(),
            function: name.to_string(),
            arguments: args.clone(),
            description: describe(name, args),
        });

        // A dropped channel counts as a denial
        let approved = rx.await.unwrap_or(false);
        self.pending.lock().unwrap().remove(&id);
        Ok(approved)
    }

    async fn dispatch(&self, name: &str, args: &Value) -> Result<Value, ExecError> {
        match name {
            "launch_application" => {
                let app = str_arg(args, "app_name");
                let executable = ToolHost::resolve_app(app).ok_or_else(|| {
                    ExecError::AppDenied(format!("application '{}' is not whitelisted", app))
                })?;
                let launch_args: Vec<String> = args["arguments"]
                    .as_array()
                    .map(|arr| {
                        arr.iter()
                            .filter_map(|v| v.as_str().map(String::from))
                            .collect()
                    })
                    .unwrap_or_default();
                self.host
                    .launch_app(executable, &launch_args)
                    .await
                    .map_err(failed)?;
                Ok(json!({ "success": true, "app_name": app, "executable": executable }))
            }

            "open_file" => {
                let path = self.checked_path(args, "path")?;
                self.host.open_path(&path).await.map_err(failed)?;
                Ok(json!({ "success": true, "path": path.display().to_string() }))
            }

            "open_url" => {
                let url = validate_url(str_arg(args, "url")).map_err(ExecError::UrlDenied)?;
                self.host.open_url(&url).await.map_err(failed)?;
                Ok(json!({ "success": true, "url": url.to_string() }))
            }

            "run_command" => {
                let command = str_arg(args, "command");
                validate_command(command).map_err(ExecError::CommandDenied)?;
                let output = self.host.run_shell(command).await.map_err(failed)?;
                Ok(json!({
                    "success": output.exit_code == Some(0) && !output.timed_out,
                    "exit_code": output.exit_code,
                    "stdout": output.stdout,
                    "stderr": output.stderr,
                    "timed_out": output.timed_out,
                    "duration_ms": output.duration_ms,
                }))
            }

            "get_system_info" => self.host.system_info().await.map_err(failed),

            "get_time" => {
                let now = self.clock.now();
                Ok(json!({
                    "success": true,
                    "time": now.format("%I:%M %p").to_string(),
                    "time_24h": now.format("%H:%M").to_string(),
                }))
            }

            "get_date" => {
                let now = self.clock.now();
                Ok(json!({
                    "success": true,
                    "date": now.format("%B %d, %Y").to_string(),
                    "day_of_week": now.format("%A").to_string(),
                }))
            }

            "list_files" => {
                let path = self.checked_path(args, "path")?;
                let entries = self.host.list_files(&path).await.map_err(failed)?;
                Ok(json!({
                    "success": true,
                    "count": entries.len(),
                    "entries": entries,
                }))
            }

            "create_file" => {
                let path = self.checked_path(args, "path")?;
                let content = args["content"].as_str().unwrap_or("");
                if content.len() as u64 > MAX_FILE_SIZE {
                    return Err(ExecError::InvalidArguments(format!(
                        "content is {} bytes, over the {} MiB limit",
                        content.len(),
                        MAX_FILE_SIZE / 1024 / 1024
                    )));
                }
                self.host.create_file(&path, content).await.map_err(failed)?;
                Ok(json!({
                    "success": true,
                    "path": path.display().to_string(),
                    "bytes": content.len(),
                }))
            }

            "read_file" => {
                let path = self.checked_path(args, "path")?;
                let meta = tokio::fs::metadata(&path).await.map_err(|e| {
                    ExecError::Failed(format!("cannot read '{}': {}", path.display(), e))
                })?;
                if meta.len() > MAX_FILE_SIZE {
                    return Err(ExecError::InvalidArguments(format!(
                        "file is {} bytes, over the {} MiB limit",
                        meta.len(),
                        MAX_FILE_SIZE / 1024 / 1024
                    )));
                }
                let (content, size, truncated) =
                    self.host.read_file(&path).await.map_err(failed)?;
                Ok(json!({
                    "success": true,
                    "content": content,
                    "size": size,
                    "truncated": truncated,
                }))
            }

            "delete_file" => {
                let path = self.checked_path(args, "path")?;
                self.host.delete_file(&path).await.map_err(failed)?;
                Ok(json!({ "success": true, "path": path.display().to_string() }))
            }

            "move_file" => {
                let source = self.checked_path(args, "source")?;
                let destination = self.checked_path(args, "destination")?;
                self.host
                    .move_file(&source, &destination)
                    .await
                    .map_err(failed)?;
                Ok(json!({
                    "success": true,
                    "source": source.display().to_string(),
                    "destination": destination.display().to_string(),
                }))
            }

            "search_files" => {
                let query = str_arg(args, "query").to_string();
                let dir = match args["directory"].as_str() {
                    Some(d) => self
                        .paths
                        .validate(d)
                        .map_err(ExecError::PathDenied)?,
                    None => dirs::home_dir().ok_or_else(|| {
                        ExecError::Failed("no home directory to search".to_string())
                    })?,
                };
                let results = self
                    .host
                    .search_files(dir, query)
                    .await
                    .map_err(failed)?;
                Ok(json!({
                    "success": true,
                    "count": results.len(),
                    "results": results,
                }))
            }

            "manage_window" => {
                let action = WindowAction::from_str(str_arg(args, "action")).ok_or_else(|| {
                    ExecError::InvalidArguments("unsupported window action".to_string())
                })?;
                let title = args["title"].as_str();
                self.host
                    .manage_window(action, title)
                    .await
                    .map_err(failed)?;
                Ok(json!({ "success": true, "action": str_arg(args, "action") }))
            }

            "set_volume" => {
                let level = args["level"].as_i64().unwrap_or(50);
                let achieved = self.host.set_volume(level).await.map_err(failed)?;
                Ok(json!({ "success": true, "level": achieved }))
            }

            "get_volume" => {
                let level = self.host.get_volume().await.map_err(failed)?;
                Ok(json!({ "success": true, "level": level }))
            }

            "copy_to_clipboard" => {
                let text = str_arg(args, "text");
                self.host.copy_to_clipboard(text).await.map_err(failed)?;
                Ok(json!({ "success": true, "length": text.len() }))
            }

            "get_clipboard" => {
                let text = self.host.get_clipboard().await.map_err(failed)?;
                Ok(json!({ "success": true, "text": text }))
            }

            "get_running_applications" => {
                let apps = self.host.running_applications().await.map_err(failed)?;
                Ok(json!({ "success": true, "applications": apps }))
            }

            // Catalog membership was checked at gate 1
            other => Err(ExecError::UnknownFunction(format!(
                "unknown function '{}'",
                other
            ))),
        }
    }

    fn checked_path(&self, args: &Value, key: &str) -> Result<std::path::PathBuf, ExecError> {
        self.paths
            .validate(str_arg(args, key))
            .map_err(ExecError::PathDenied)
    }
}

fn failed(err: anyhow::Error) -> ExecError {
    ExecError::Failed(err.to_string())
}

fn str_arg<'a>(args: &'a Value, key: &str) -> &'a str {
    args[key].as_str().unwrap_or("")
}

/// Human-readable description for the confirmation prompt
fn describe(name: &str, args: &Value) -> String {
    match name {
        "delete_file" => format!("Delete file {}", str_arg(args, "path")),
        "modify_system_settings" => "Modify system settings".to_string(),
        "uninstall_application" => format!("Uninstall {}", str_arg(args, "app_name")),
        "modify_registry" => "Modify the registry".to_string(),
        other => format!("Run {}", other),
    }
}

/// Clone arguments with long string values truncated for logging
fn sanitize_args(args: &Value) -> String {
    const MAX: usize = 80;
    let sanitized = match args {
        Value::Object(map) => {
            let clipped: serde_json::Map<String, Value> = map
                .iter()
                .map(|(k, v)| {
                    let v = match v {
                        Value::String(s) if s.len() > MAX => {
                            let mut cut = MAX;
                            while cut > 0 && !s.is_char_boundary(cut) {
                                cut -= 1;
                            }
                            Value::String(format!("{}...({} chars)", &s[..cut], s.len()))
                        }
                        other => other.clone(),
                    };
                    (k.clone(), v)
                })
                .collect();
            Value::Object(clipped)
        }
        other => other.clone(),
    };
    sanitized.to_string()
}
