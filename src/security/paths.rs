//! File system path sandbox
//!
//! Restricts file operations to a small set of base directories and rejects
//! traversal out of them.

use std::path::{Component, Path, PathBuf};

/// Allowed base directories for path-taking functions
#[derive(Debug, Clone)]
pub struct PathPolicy {
    allowed_roots: Vec<PathBuf>,
}

impl Default for PathPolicy {
    fn default() -> Self {
        let mut allowed_roots = Vec::new();
        if let Some(home) = dirs::home_dir() {
            allowed_roots.push(home);
        }
        allowed_roots.push(std::env::temp_dir());
        if let Ok(cwd) = std::env::current_dir() {
            allowed_roots.push(cwd);
        }
        Self { allowed_roots }
    }
}

impl PathPolicy {
    pub fn new(allowed_roots: Vec<PathBuf>) -> Self {
        Self { allowed_roots }
    }

    pub fn allowed_roots(&self) -> &[PathBuf] {
        &self.allowed_roots
    }

    /// Expand `~`, make the path absolute, and normalize `.`/`..`
    /// lexically. `..` components that climb above the filesystem root are
    /// rejected during normalization.
    pub fn resolve(&self, raw: &str) -> Result<PathBuf, String> {
        if raw.trim().is_empty() {
            return Err("empty path".to_string());
        }

        let expanded = if raw == "~" {
            dirs::home_dir().ok_or("no home directory")?
        } else if let Some(rest) = raw.strip_prefix("~/").or_else(|| raw.strip_prefix("~\\")) {
            dirs::home_dir().ok_or("no home directory")?.join(rest)
        } else {
            PathBuf::from(raw)
        };

        let absolute = if expanded.is_absolute() {
            expanded
        } else {
            std::env::current_dir()
                .map_err(|e| format!("cannot resolve relative path: {}", e))?
                .join(expanded)
        };

        normalize(&absolute)
    }

    /// Resolve and require the result to sit under an allowed base
    pub fn validate(&self, raw: &str) -> Result<PathBuf, String> {
        let resolved = self.resolve(raw)?;

        let allowed = self.allowed_roots.iter().any(|root| {
            // Compare against the normalized root so symlinked temp dirs
            // (macOS /var -> /private/var) still prefix-match
            let root = normalize(root).unwrap_or_else(|_| root.clone());
            resolved.starts_with(&root)
        });

        if allowed {
            Ok(resolved)
        } else {
            Err(format!(
                "path '{}' is outside the allowed directories",
                resolved.display()
            ))
        }
    }
}

/// Lexical normalization: fold `.` and `..` without touching the filesystem
fn normalize(path: &Path) -> Result<PathBuf, String> {
    let mut stack: Vec<std::ffi::OsString> = Vec::new();
    let mut prefix = PathBuf::new();

    for component in path.components() {
        match component {
            Component::Prefix(p) => prefix.push(p.as_os_str()),
            Component::RootDir => prefix.push(Component::RootDir.as_os_str()),
            Component::CurDir => {}
            Component::ParentDir => {
                if stack.pop().is_none() {
                    return Err(format!(
                        "path '{}' escapes the filesystem root",
                        path.display()
                    ));
                }
            }
            Component::Normal(part) => stack.push(part.to_os_string()),
        }
    }

    let mut out = prefix;
    for part in stack {
        out.push(part);
    }
    Ok(out)
}
