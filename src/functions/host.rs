//! Tool host
//!
//! Performs the actual side effects behind validated tool calls: child
//! processes, file system access, window management, volume, clipboard.
//! Recipes are PowerShell-flavoured on Windows with best-effort fallbacks
//! elsewhere. All child processes run under a wall-clock timeout.

use anyhow::{bail, Context, Result};
use serde::Serialize;
use serde_json::json;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// Wall-clock timeout for external processes
pub const PROCESS_TIMEOUT: Duration = Duration::from_secs(30);

/// Shell output truncation limits
pub const STDOUT_LIMIT: usize = 5_000;
pub const STDERR_LIMIT: usize = 1_000;

/// Files larger than this are rejected for read/create
pub const MAX_FILE_SIZE: u64 = 10 * 1024 * 1024;

/// Read payloads are truncated to this many bytes (true size still reported)
pub const READ_PREVIEW_BYTES: usize = 1_000;

/// Cap on search results
const MAX_SEARCH_RESULTS: usize = 50;

/// Applications that may be launched, name -> executable
pub const APP_WHITELIST: &[(&str, &str)] = &[
    ("chrome", "chrome.exe"),
    ("firefox", "firefox.exe"),
    ("edge", "msedge.exe"),
    ("vscode", "code.cmd"),
    ("notepad", "notepad.exe"),
    ("calculator", "calc.exe"),
    ("explorer", "explorer.exe"),
];

/// Window actions supported by manage_window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowAction {
    Minimize,
    Maximize,
    Close,
    Focus,
}

impl WindowAction {
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "minimize" => Some(WindowAction::Minimize),
            "maximize" => Some(WindowAction::Maximize),
            "close" => Some(WindowAction::Close),
            "focus" => Some(WindowAction::Focus),
            _ => None,
        }
    }
}

/// Captured output of a shell command
#[derive(Debug, Clone, Serialize)]
pub struct ShellOutput {
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub timed_out: bool,
    pub duration_ms: u64,
}

/// One entry from list_files
#[derive(Debug, Clone, Serialize)]
pub struct FileEntry {
    pub name: String,
    pub is_dir: bool,
    pub size: u64,
}

/// Host-OS side effect runner
#[derive(Clone)]
pub struct ToolHost {
    process_timeout: Duration,
    /// Last level applied via set_volume; queried when the platform has no
    /// cheap way to read the mixer back
    volume_cache: Arc<Mutex<Option<u8>>>,
}

impl Default for ToolHost {
    fn default() -> Self {
        Self::new()
    }
}

impl ToolHost {
    pub fn new() -> Self {
        Self {
            process_timeout: PROCESS_TIMEOUT,
            volume_cache: Arc::new(Mutex::new(None)),
        }
    }

    #[cfg(test)]
    pub fn with_timeout(process_timeout: Duration) -> Self {
        Self {
            process_timeout,
            volume_cache: Arc::new(Mutex::new(None)),
        }
    }

    /// Resolve an app name through the whitelist
    pub fn resolve_app(name: &str) -> Option<&'static str> {
        let lower = name.trim().to_lowercase();
        APP_WHITELIST
            .iter()
            .find(|(alias, _)| *alias == lower)
            .map(|(_, exe)| *exe)
    }

    /// Run a shell command, capturing truncated output
    pub async fn run_shell(&self, command: &str) -> Result<ShellOutput> {
        let start = std::time::Instant::now();

        let mut cmd = if cfg!(target_os = "windows") {
            let mut c = Command::new("powershell");
            c.arg("-NoProfile").arg("-Command").arg(command);
            c
        } else {
            let mut c = Command::new("sh");
            c.arg("-c").arg(command);
            c
        };
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd.stdin(Stdio::null());

        let child = cmd.spawn().context("failed to spawn command")?;

        let result = timeout(self.process_timeout, child.wait_with_output()).await;
        let duration_ms = start.elapsed().as_millis() as u64;

        match result {
            Ok(output) => {
                let output = output.context("failed to collect command output")?;
                let stdout = truncate_output(&String::from_utf8_lossy(&output.stdout), STDOUT_LIMIT);
                let stderr = truncate_output(&String::from_utf8_lossy(&output.stderr), STDERR_LIMIT);
                info!(
                    exit_code = ?output.status.code(),
                    duration_ms = duration_ms,
                    "command finished"
                );
                Ok(ShellOutput {
                    exit_code: output.status.code(),
                    stdout,
                    stderr,
                    timed_out: false,
                    duration_ms,
                })
            }
            Err(_) => {
                warn!(timeout = ?self.process_timeout, "command timed out, process killed");
                Ok(ShellOutput {
                    exit_code: None,
                    stdout: String::new(),
                    stderr: format!("command timed out after {:?}", self.process_timeout),
                    timed_out: true,
                    duration_ms,
                })
            }
        }
    }

    /// Launch a whitelisted executable, detached
    pub async fn launch_app(&self, executable: &str, args: &[String]) -> Result<()> {
        info!(app = %executable, "launching application");
        let mut cmd = Command::new(executable);
        cmd.args(args);
        cmd.stdout(Stdio::null()).stderr(Stdio::null()).stdin(Stdio::null());
        cmd.spawn().with_context(|| format!("failed to launch '{}'", executable))?;
        Ok(())
    }

    /// Open a file or folder with the platform opener
    pub async fn open_path(&self, path: &Path) -> Result<()> {
        let target = path.to_string_lossy().to_string();
        let (program, args): (&str, Vec<String>) = if cfg!(target_os = "windows") {
            ("explorer", vec![target])
        } else if cfg!(target_os = "macos") {
            ("open", vec![target])
        } else {
            ("xdg-open", vec![target])
        };
        let status = timeout(
            self.process_timeout,
            Command::new(program).args(&args).status(),
        )
        .await
        .context("opener timed out")?
        .context("failed to run opener")?;
        // explorer.exe reports nonzero even on success; trust the spawn
        debug!(program = program, code = ?status.code(), "opener finished");
        Ok(())
    }

    /// Open a URL with the platform opener
    pub async fn open_url(&self, url: &url::Url) -> Result<()> {
        let target = url.to_string();
        let program = if cfg!(target_os = "windows") {
            "rundll32"
        } else if cfg!(target_os = "macos") {
            "open"
        } else {
            "xdg-open"
        };
        let mut cmd = Command::new(program);
        if cfg!(target_os = "windows") {
            cmd.arg("url.dll,FileProtocolHandler");
        }
        cmd.arg(&target);
        timeout(self.process_timeout, cmd.status())
            .await
            .context("browser launch timed out")?
            .context("failed to open URL")?;
        info!(url = %target, "opened URL");
        Ok(())
    }

    /// Apply a window action via a PowerShell recipe (wmctrl elsewhere)
    pub async fn manage_window(&self, action: WindowAction, title: Option<&str>) -> Result<()> {
        let script = if cfg!(target_os = "windows") {
            windows_recipe(action, title)
        } else {
            unix_recipe(action, title)
        };
        let output = self.run_shell(&script).await?;
        if output.timed_out {
            bail!("window action timed out");
        }
        if output.exit_code != Some(0) && !output.stderr.is_empty() {
            bail!("window action failed: {}", output.stderr.trim());
        }
        Ok(())
    }

    /// Set master volume, clamped to [0, 100].
    ///
    /// Uses the volume key-press loop (reset to zero, then step up in 2%
    /// increments), so the achieved level is accurate to about +/-2%.
    pub async fn set_volume(&self, level: i64) -> Result<u8> {
        let clamped = level.clamp(0, 100) as u8;

        let script = if cfg!(target_os = "windows") {
            // [char]174 = volume down, [char]175 = volume up; each press is 2%
            format!(
                "$sh = New-Object -ComObject WScript.Shell; \
                 1..50 | ForEach-Object {{ $sh.SendKeys([char]174) }}; \
                 1..{} | ForEach-Object {{ $sh.SendKeys([char]175) }}",
                clamped / 2
            )
        } else {
            format!("pactl set-sink-volume @DEFAULT_SINK@ {}%", clamped)
        };

        let output = self.run_shell(&script).await?;
        if output.timed_out {
            bail!("volume adjustment timed out");
        }
        *self.volume_cache.lock().unwrap() = Some(clamped);
        info!(level = clamped, "volume set");
        Ok(clamped)
    }

    /// Read the current master volume where the platform allows it,
    /// otherwise the last level this host applied.
    pub async fn get_volume(&self) -> Result<u8> {
        if !cfg!(target_os = "windows") {
            let output = self
                .run_shell("pactl get-sink-volume @DEFAULT_SINK@")
                .await?;
            if let Some(pct) = output
                .stdout
                .split_whitespace()
                .find(|tok| tok.ends_with('%'))
                .and_then(|tok| tok.trim_end_matches('%').parse::<u8>().ok())
            {
                return Ok(pct.min(100));
            }
        }
        self.volume_cache
            .lock()
            .unwrap()
            .ok_or_else(|| anyhow::anyhow!("current volume is not readable on this host"))
    }

    pub async fn copy_to_clipboard(&self, text: &str) -> Result<()> {
        let script = if cfg!(target_os = "windows") {
            format!("Set-Clipboard -Value '{}'", powershell_escape(text))
        } else if cfg!(target_os = "macos") {
            format!("printf %s '{}' | pbcopy", shell_escape(text))
        } else {
            format!("printf %s '{}' | xclip -selection clipboard", shell_escape(text))
        };
        let output = self.run_shell(&script).await?;
        if output.exit_code != Some(0) {
            bail!("clipboard copy failed: {}", output.stderr.trim());
        }
        Ok(())
    }

    pub async fn get_clipboard(&self) -> Result<String> {
        let script = if cfg!(target_os = "windows") {
            "Get-Clipboard"
        } else if cfg!(target_os = "macos") {
            "pbpaste"
        } else {
            "xclip -selection clipboard -o"
        };
        let output = self.run_shell(script).await?;
        if output.exit_code != Some(0) {
            bail!("clipboard read failed: {}", output.stderr.trim());
        }
        Ok(output.stdout.trim_end().to_string())
    }

    /// Applications with visible windows, at most 20
    pub async fn running_applications(&self) -> Result<Vec<String>> {
        let script = if cfg!(target_os = "windows") {
            "Get-Process | Where-Object { $_.MainWindowTitle } | \
             Select-Object -ExpandProperty MainWindowTitle"
        } else {
            "ps -eo comm= | sort -u"
        };
        let output = self.run_shell(script).await?;
        Ok(output
            .stdout
            .lines()
            .map(|l| l.trim().to_string())
            .filter(|l| !l.is_empty())
            .take(20)
            .collect())
    }

    /// CPU / memory / disk snapshot
    pub async fn system_info(&self) -> Result<serde_json::Value> {
        let script = if cfg!(target_os = "windows") {
            "Get-CimInstance Win32_OperatingSystem | \
             Select-Object FreePhysicalMemory,TotalVisibleMemorySize | Format-List; \
             Get-CimInstance Win32_Processor | Select-Object LoadPercentage | Format-List"
        } else {
            "uptime; free -m 2>/dev/null || vm_stat; df -h / | tail -1"
        };
        let output = self.run_shell(script).await?;
        Ok(json!({
            "success": output.exit_code == Some(0),
            "report": output.stdout.trim(),
        }))
    }

    // ---- file system ----

    pub async fn list_files(&self, dir: &Path) -> Result<Vec<FileEntry>> {
        let mut entries = Vec::new();
        let mut read_dir = tokio::fs::read_dir(dir)
            .await
            .with_context(|| format!("cannot list '{}'", dir.display()))?;
        while let Some(entry) = read_dir.next_entry().await? {
            let meta = entry.metadata().await?;
            entries.push(FileEntry {
                name: entry.file_name().to_string_lossy().to_string(),
                is_dir: meta.is_dir(),
                size: meta.len(),
            });
        }
        // Directories first, then by name
        entries.sort_by(|a, b| b.is_dir.cmp(&a.is_dir).then(a.name.cmp(&b.name)));
        Ok(entries)
    }

    pub async fn create_file(&self, path: &Path, content: &str) -> Result<()> {
        if content.len() as u64 > MAX_FILE_SIZE {
            bail!("content exceeds the {} MiB limit", MAX_FILE_SIZE / 1024 / 1024);
        }
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.ok();
        }
        tokio::fs::write(path, content)
            .await
            .with_context(|| format!("cannot create '{}'", path.display()))?;
        info!(path = %path.display(), bytes = content.len(), "file created");
        Ok(())
    }

    /// Read a file, returning (preview, true_size, truncated)
    pub async fn read_file(&self, path: &Path) -> Result<(String, u64, bool)> {
        let meta = tokio::fs::metadata(path)
            .await
            .with_context(|| format!("cannot read '{}'", path.display()))?;
        if meta.len() > MAX_FILE_SIZE {
            bail!(
                "file is {} bytes, over the {} MiB limit",
                meta.len(),
                MAX_FILE_SIZE / 1024 / 1024
            );
        }
        let bytes = tokio::fs::read(path).await?;
        let size = bytes.len() as u64;
        if bytes.len() <= READ_PREVIEW_BYTES {
            Ok((String::from_utf8_lossy(&bytes).to_string(), size, false))
        } else {
            let mut cut = READ_PREVIEW_BYTES;
            // Back off UTF-8 continuation bytes so the preview stays valid
            while cut > 0 && bytes[cut] & 0xC0 == 0x80 {
                cut -= 1;
            }
            let preview = format!("{}...", String::from_utf8_lossy(&bytes[..cut]));
            Ok((preview, size, true))
        }
    }

    pub async fn delete_file(&self, path: &Path) -> Result<()> {
        tokio::fs::remove_file(path)
            .await
            .with_context(|| format!("cannot delete '{}'", path.display()))?;
        info!(path = %path.display(), "file deleted");
        Ok(())
    }

    pub async fn move_file(&self, source: &Path, destination: &Path) -> Result<()> {
        if let Some(parent) = destination.parent() {
            tokio::fs::create_dir_all(parent).await.ok();
        }
        tokio::fs::rename(source, destination)
            .await
            .with_context(|| {
                format!(
                    "cannot move '{}' to '{}'",
                    source.display(),
                    destination.display()
                )
            })?;
        Ok(())
    }

    /// Case-insensitive filename substring search, breadth-first
    pub async fn search_files(&self, root: PathBuf, query: String) -> Result<Vec<String>> {
        tokio::task::spawn_blocking(move || {
            let needle = query.to_lowercase();
            let mut results = Vec::new();
            let mut queue = std::collections::VecDeque::from([root]);

            while let Some(dir) = queue.pop_front() {
                if results.len() >= MAX_SEARCH_RESULTS {
                    break;
                }
                let entries = match std::fs::read_dir(&dir) {
                    Ok(e) => e,
                    Err(_) => continue,
                };
                for entry in entries.flatten() {
                    let path = entry.path();
                    let name = entry.file_name().to_string_lossy().to_lowercase();
                    // Skip hidden directories to keep the walk bounded
                    if path.is_dir() && !name.starts_with('.') {
                        queue.push_back(path.clone());
                    }
                    if name.contains(&needle) {
                        results.push(path.to_string_lossy().to_string());
                        if results.len() >= MAX_SEARCH_RESULTS {
                            break;
                        }
                    }
                }
            }
            Ok(results)
        })
        .await
        .context("search task failed")?
    }
}

fn truncate_output(s: &str, limit: usize) -> String {
    if s.len() <= limit {
        return s.to_string();
    }
    let mut cut = limit;
    while cut > 0 && !s.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}...[truncated, total: {} bytes]", &s[..cut], s.len())
}

fn powershell_escape(s: &str) -> String {
    s.replace('\'', "''")
}

fn shell_escape(s: &str) -> String {
    s.replace('\'', "'\\''")
}

fn windows_recipe(action: WindowAction, title: Option<&str>) -> String {
    let activate = title
        .map(|t| {
            format!(
                "$sh = New-Object -ComObject WScript.Shell; \
                 $null = $sh.AppActivate('{}'); Start-Sleep -Milliseconds 150; ",
                powershell_escape(t)
            )
        })
        .unwrap_or_default();
    match action {
        // % = Alt; space opens the system menu, n/x minimize/maximize
        WindowAction::Minimize => format!(
            "{}$sh = New-Object -ComObject WScript.Shell; $sh.SendKeys('% n')",
            activate
        ),
        WindowAction::Maximize => format!(
            "{}$sh = New-Object -ComObject WScript.Shell; $sh.SendKeys('% x')",
            activate
        ),
        WindowAction::Close => format!(
            "{}$sh = New-Object -ComObject WScript.Shell; $sh.SendKeys('%{{F4}}')",
            activate
        ),
        WindowAction::Focus => {
            let t = powershell_escape(title.unwrap_or(""));
            format!(
                "$sh = New-Object -ComObject WScript.Shell; $null = $sh.AppActivate('{}')",
                t
            )
        }
    }
}

fn unix_recipe(action: WindowAction, title: Option<&str>) -> String {
    let target = shell_escape(title.unwrap_or(":ACTIVE:"));
    match action {
        WindowAction::Minimize => format!("wmctrl -r '{}' -b add,hidden", target),
        WindowAction::Maximize => format!("wmctrl -r '{}' -b add,maximized_vert,maximized_horz", target),
        WindowAction::Close => format!("wmctrl -c '{}'", target),
        WindowAction::Focus => format!("wmctrl -a '{}'", target),
    }
}
