//! Shell command policy
//!
//! The `run_command` function only exists for read-only queries, so the
//! gate is an allow-list of query verbs on top of a deny-list of anything
//! destructive. The verb list is PowerShell-flavoured to match the host
//! recipes.

/// Maximum accepted command length
pub const MAX_COMMAND_LENGTH: usize = 500;

/// Substrings that mark a command as destructive regardless of context
const DANGEROUS_PATTERNS: &[&str] = &[
    // Recursive / forced deletion
    "rm -rf",
    "rm -r ",
    "rm -f",
    "del /s",
    "del /f",
    "del /q",
    "rd /s",
    "rmdir /s",
    "remove-item -recurse",
    "remove-item -force",
    // Disk and volume destruction
    "format ",
    "format-volume",
    "mkfs",
    "clear-disk",
    "diskpart",
    // Registry mutation
    "reg add",
    "reg delete",
    "reg import",
    "set-itemproperty",
    "new-itemproperty",
    "remove-itemproperty",
    // Users, groups, ownership
    "net user",
    "net localgroup",
    "new-localuser",
    "add-localgroupmember",
    "takeown",
    "icacls",
    // Power state and boot configuration
    "shutdown",
    "stop-computer",
    "restart-computer",
    "bcdedit",
    // System file and attribute tampering
    "sfc /scannow",
    "cipher /w",
    "attrib +",
    "attrib -",
];

/// Deletion verbs that are also denied when reached through a pipeline,
/// subexpression, or backtick escape
const PIPED_DELETION: &[&str] = &["remove-item", "del ", "rm ", "rd ", "erase ", "unlink"];

/// Read-only verbs the trimmed lowercase command must start with
const ALLOWED_PREFIXES: &[&str] = &[
    "get-",
    "dir",
    "ls",
    "echo",
    "write-output",
    "select-",
    "where-object",
    "measure-object",
    "sort-object",
    "format-",
    "out-string",
    "test-path",
    "get-content",
    "get-childitem",
    "get-process",
    "get-service",
    "get-date",
    "get-location",
    "[datetime]",
    "[math]",
];

/// Validate a shell command against the read-only policy
pub fn validate_command(command: &str) -> Result<(), String> {
    if command.len() > MAX_COMMAND_LENGTH {
        return Err(format!(
            "command too long ({} chars, max {})",
            command.len(),
            MAX_COMMAND_LENGTH
        ));
    }

    let trimmed = command.trim().to_lowercase();
    if trimmed.is_empty() {
        return Err("empty command".to_string());
    }

    for pattern in DANGEROUS_PATTERNS {
        if trimmed.contains(pattern) {
            return Err(format!("command matches dangerous pattern '{}'", pattern));
        }
    }

    // A pipeline, subexpression, or backtick that reaches a deletion verb
    let has_indirection = trimmed.contains('|') || trimmed.contains("$(") || trimmed.contains('`');
    if has_indirection && PIPED_DELETION.iter().any(|verb| trimmed.contains(verb)) {
        return Err("deletion through a pipeline or substitution is not allowed".to_string());
    }

    if !ALLOWED_PREFIXES.iter().any(|prefix| trimmed.starts_with(prefix)) {
        return Err(format!(
            "command must start with a read-only verb ({} ...)",
            &ALLOWED_PREFIXES[..4].join(", ")
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_only_commands_pass() {
        assert!(validate_command("Get-Process | Sort-Object CPU").is_ok());
        assert!(validate_command("dir C:\\Users").is_ok());
        assert!(validate_command("ls -la").is_ok());
        assert!(validate_command("echo hello").is_ok());
        assert!(validate_command("Get-Date").is_ok());
        assert!(validate_command("Test-Path C:\\temp\\x.txt").is_ok());
        assert!(validate_command("[DateTime]::Now").is_ok());
    }

    #[test]
    fn test_destructive_commands_denied() {
        assert!(validate_command("rm -rf /").is_err());
        assert!(validate_command("Remove-Item -Recurse C:\\").is_err());
        assert!(validate_command("format C:").is_err());
        assert!(validate_command("reg add HKLM\\Software").is_err());
        assert!(validate_command("net user admin password").is_err());
        assert!(validate_command("shutdown /s").is_err());
        assert!(validate_command("bcdedit /set testsigning on").is_err());
        assert!(validate_command("cipher /w:C").is_err());
        assert!(validate_command("takeown /f C:\\Windows").is_err());
    }

    #[test]
    fn test_piped_deletion_denied() {
        assert!(validate_command("Get-ChildItem | Remove-Item").is_err());
        assert!(validate_command("ls $(rm x)").is_err());
        assert!(validate_command("echo `rm -r foo`").is_err());
    }

    #[test]
    fn test_unlisted_verb_denied() {
        assert!(validate_command("cat /etc/passwd").is_err());
        assert!(validate_command("curl https://example.com").is_err());
        assert!(validate_command("Start-Process notepad").is_err());
    }

    #[test]
    fn test_length_limit() {
        let long = format!("echo {}", "a".repeat(MAX_COMMAND_LENGTH));
        assert!(validate_command(&long).is_err());
        assert!(validate_command("").is_err());
    }
}
