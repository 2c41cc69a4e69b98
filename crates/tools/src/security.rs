//! Command and path screening applied before any sandbox or filesystem
//! delegation.

use std::path::{Component, Path, PathBuf};

/// Commands that are never executed, matched as substrings of the lowered
/// command line.
const BLOCKED_COMMANDS: &[&str] = &[
    "rm -rf /",
    "rm -rf /*",
    "mkfs",
    "dd if=/dev/zero",
    ":(){:|:&};:",
    "chmod -r 777 /",
    "chown -r",
];

/// Patterns that are allowed but logged loudly.
const DANGEROUS_PATTERNS: &[&str] = &[
    "rm -rf", "rm -r", "shutdown", "reboot", "halt", "init 0", "init 6",
];

/// Returns the matched deny-list entry when the command must be refused.
pub fn blocked_command(command: &str) -> Option<&'static str> {
    let lowered = command.to_lowercase();
    BLOCKED_COMMANDS
        .iter()
        .find(|blocked| lowered.contains(*blocked))
        .copied()
}

/// Whether the command matches a pattern worth a warning log.
pub fn is_dangerous_command(command: &str) -> bool {
    let lowered = command.to_lowercase();
    DANGEROUS_PATTERNS
        .iter()
        .any(|pattern| lowered.contains(pattern))
}

/// Single-quote a string for safe interpolation into a shell command line.
pub fn shell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', r"'\''"))
}

/// Resolve a tool-supplied path against the allowed roots.
///
/// Relative paths resolve against the first root (the data dir). The result
/// is lexically normalized (no filesystem access, targets may not exist
/// yet) and must stay under one of the roots.
pub fn resolve_allowed(path: &str, roots: &[PathBuf]) -> Option<PathBuf> {
    let first_root = roots.first()?;
    let candidate = if Path::new(path).is_absolute() {
        PathBuf::from(path)
    } else {
        first_root.join(path)
    };
    let normalized = normalize(&candidate);
    let allowed = roots
        .iter()
        .any(|root| normalized.starts_with(normalize(root)));
    allowed.then_some(normalized)
}

/// Lexical normalization: resolves `.` and `..` without touching the
/// filesystem.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wiping_root_is_blocked() {
        assert_eq!(blocked_command("rm -rf / --no-preserve-root"), Some("rm -rf /"));
        assert_eq!(blocked_command("sudo MKFS.ext4 /dev/sda"), Some("mkfs"));
        assert!(blocked_command("ls -la").is_none());
    }

    #[test]
    fn fork_bomb_is_blocked() {
        assert!(blocked_command(":(){:|:&};:").is_some());
    }

    #[test]
    fn dangerous_patterns_are_flagged_not_blocked() {
        assert!(is_dangerous_command("rm -rf ./build"));
        assert!(blocked_command("rm -rf ./build").is_none());
    }

    #[test]
    fn shell_quote_wraps_and_escapes() {
        assert_eq!(shell_quote("plain"), "'plain'");
        assert_eq!(shell_quote("it's"), r"'it'\''s'");
    }

    #[test]
    fn relative_paths_resolve_under_first_root() {
        let roots = vec![PathBuf::from("/app/data"), PathBuf::from("/app/data/uploads")];
        assert_eq!(
            resolve_allowed("report.txt", &roots).unwrap(),
            PathBuf::from("/app/data/report.txt")
        );
    }

    #[test]
    fn escaping_the_roots_is_rejected() {
        let roots = vec![PathBuf::from("/app/data")];
        assert!(resolve_allowed("/etc/passwd", &roots).is_none());
        assert!(resolve_allowed("../../etc/passwd", &roots).is_none());
        assert!(resolve_allowed("/app/data/../secrets", &roots).is_none());
    }

    #[test]
    fn dot_segments_are_normalized() {
        let roots = vec![PathBuf::from("/app/data")];
        assert_eq!(
            resolve_allowed("/app/data/./sub/../file.txt", &roots).unwrap(),
            PathBuf::from("/app/data/file.txt")
        );
    }
}
