//! Command security validation.
//!
//! Check commands come from repository configuration that a pull request can
//! itself modify, so every command is screened before it is handed to the
//! worker. The screen is a denylist evaluated in a fixed order; the first
//! stage that rejects wins and its reason is reported back on the pull
//! request.
//!
//! This is not a shell parser. Obfuscations the patterns below do not
//! describe (quoting tricks, encoded payloads, aliases defined by the
//! project's own tooling) are accepted residual risk. The worker executes the
//! validated string as an argv vector without a shell, which is the primary
//! containment; new patterns belong here only together with a test.

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;

pub const MAX_COMMAND_LENGTH: usize = 4096;

/// Outcome of validating one command string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSecurityVerdict {
    pub is_safe: bool,
    pub reason: Option<String>,
}

impl CommandSecurityVerdict {
    fn safe() -> Self {
        Self {
            is_safe: true,
            reason: None,
        }
    }

    fn rejected(reason: impl Into<String>) -> Self {
        Self {
            is_safe: false,
            reason: Some(reason.into()),
        }
    }
}

impl fmt::Display for CommandSecurityVerdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.reason {
            None => write!(f, "safe"),
            Some(reason) => write!(f, "unsafe: {reason}"),
        }
    }
}

/// Shell constructs, evaluated in order.
static SHELL_PATTERNS: LazyLock<Vec<(Regex, &'static str)>> = LazyLock::new(|| {
    vec![
        (Regex::new(r"[;&|]").unwrap(), "Shell operators (;, &, |, &&, ||) are not allowed"),
        (Regex::new(r"\$\(").unwrap(), "Command substitution $(...) is not allowed"),
        (Regex::new(r"`").unwrap(), "Backtick command substitution is not allowed"),
        (Regex::new(r"\$\{").unwrap(), "Variable expansion ${...} is not allowed"),
        (Regex::new(r"\$[A-Za-z_]").unwrap(), "Variable expansion $VAR is not allowed"),
        (Regex::new(r"[<>]").unwrap(), "Redirection (<, >) is not allowed"),
        (Regex::new(r"\\[nr]").unwrap(), "Newline or carriage return escape sequences are not allowed"),
        (Regex::new(r"(?i)\b(eval|exec|source)\b").unwrap(), "Shell builtins (eval, exec, source) are not allowed"),
        (Regex::new(r"(?i)\b(sh|bash|zsh)\b").unwrap(), "Spawning a shell (sh, bash, zsh) is not allowed"),
        (Regex::new(r"(?i)\b(curl|wget|nc|netcat)\b").unwrap(), "Network tools (curl, wget, nc, netcat) are not allowed"),
        (Regex::new(r"(?i)\brm\s+-(rf|fr)\b").unwrap(), "Destructive command rm -rf is not allowed"),
        (Regex::new(r"(?i)\b(sudo|su)\b").unwrap(), "Privilege escalation (sudo, su) is not allowed"),
        (Regex::new(r"(?i)\b(chmod|chown)\b").unwrap(), "Permission changes (chmod, chown) are not allowed"),
        (Regex::new(r"(?i)\bmkdir\s+-p\s+/").unwrap(), "Creating directories from the filesystem root is not allowed"),
    ]
});

/// Substrings that point at secrets or system state, matched case-insensitively.
const SENSITIVE_PATHS: &[&str] = &[
    "/etc/",
    "/root/",
    "~/.ssh",
    "/proc/",
    "/sys/",
    "/dev/",
    "/var/log/",
    "/boot/",
    "../",
    ".env",
    "config.yaml",
    "credentials",
    ".pem",
    ".key",
    "id_rsa",
    "id_ed25519",
];

/// Validate a check command before it is executed.
///
/// Pure and deterministic: the same input always yields the same verdict.
/// An empty or whitespace-only command is safe and runs as a no-op.
pub fn validate(command: &str) -> CommandSecurityVerdict {
    check_length(command)
        .or_else(|| check_shell_patterns(command))
        .or_else(|| check_sensitive_paths(command))
        .or_else(|| check_null_bytes(command))
        .or_else(|| check_printable(command))
        .unwrap_or_else(CommandSecurityVerdict::safe)
}

fn check_length(command: &str) -> Option<CommandSecurityVerdict> {
    let length = command.chars().count();
    (length > MAX_COMMAND_LENGTH).then(|| {
        CommandSecurityVerdict::rejected(format!(
            "Command length {length} exceeds maximum length of {MAX_COMMAND_LENGTH}"
        ))
    })
}

fn check_shell_patterns(command: &str) -> Option<CommandSecurityVerdict> {
    SHELL_PATTERNS
        .iter()
        .find(|(pattern, _)| pattern.is_match(command))
        .map(|(_, reason)| CommandSecurityVerdict::rejected(*reason))
}

fn check_sensitive_paths(command: &str) -> Option<CommandSecurityVerdict> {
    let lowered = command.to_lowercase();
    SENSITIVE_PATHS
        .iter()
        .find(|path| lowered.contains(*path))
        .map(|path| CommandSecurityVerdict::rejected(format!("Access to sensitive path '{path}' is not allowed")))
}

fn check_null_bytes(command: &str) -> Option<CommandSecurityVerdict> {
    command
        .contains('\0')
        .then(|| CommandSecurityVerdict::rejected("Null bytes are not allowed"))
}

fn check_printable(command: &str) -> Option<CommandSecurityVerdict> {
    command
        .chars()
        .find(|c| !matches!(c, ' '..='~' | '\t' | '\n' | '\r'))
        .map(|c| {
            CommandSecurityVerdict::rejected(format!(
                "Non-printable character U+{:04X} is not allowed",
                c as u32
            ))
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reason(command: &str) -> String {
        validate(command).reason.unwrap_or_default()
    }

    #[test]
    fn test_pytest_command_is_safe() {
        let verdict = validate("uv tool run --from pytest pytest tests/ -v");
        assert!(verdict.is_safe);
        assert_eq!(verdict.reason, None);
    }

    #[test]
    fn test_chained_rm_is_rejected_as_shell_operator() {
        let verdict = validate("pytest tests/; rm -rf /");
        assert!(!verdict.is_safe);
        assert!(reason("pytest tests/; rm -rf /").contains("Shell operators"));
    }

    #[test]
    fn test_every_metacharacter_is_rejected() {
        for command in [
            "pytest ; ls",
            "pytest & ls",
            "pytest | tee",
            "pytest && ls",
            "pytest || ls",
            "echo $(whoami)",
            "echo `whoami`",
            "echo ${HOME}",
            "echo $HOME",
            "pytest > out.txt",
            "pytest < in.txt",
        ] {
            let verdict = validate(command);
            assert!(!verdict.is_safe, "{command} should be unsafe");
            assert!(verdict.reason.is_some(), "{command} should carry a reason");
        }
    }

    #[test]
    fn test_length_is_checked_first() {
        let command = format!("{};", "a".repeat(MAX_COMMAND_LENGTH));
        assert!(reason(&command).contains("exceeds maximum length of 4096"));
        assert!(validate(&"a".repeat(MAX_COMMAND_LENGTH)).is_safe);
    }

    #[test]
    fn test_shell_patterns_precede_sensitive_paths() {
        assert!(reason("cat /etc/passwd; ls").contains("Shell operators"));
        assert!(reason("cat /etc/passwd").contains("/etc/"));
    }

    #[test]
    fn test_blocked_programs() {
        assert!(reason("bash -c pytest").contains("Spawning a shell"));
        assert!(reason("curl http://example.com").contains("Network tools"));
        assert!(reason("NC example.com 80").contains("Network tools"));
        assert!(reason("rm -rf build").contains("rm -rf"));
        assert!(reason("sudo pytest").contains("Privilege escalation"));
        assert!(reason("chmod 777 run.py").contains("Permission changes"));
        assert!(reason("mkdir -p /opt/x").contains("filesystem root"));
        assert!(reason("EVAL pytest").contains("Shell builtins"));
    }

    #[test]
    fn test_blocked_words_need_word_boundaries() {
        assert!(validate("tox -e lint").is_safe);
        assert!(validate("pytest tests/test_shell.py").is_safe);
        assert!(validate("ssh-agent-free check").is_safe);
    }

    #[test]
    fn test_escape_sequences_are_rejected() {
        assert!(reason(r"pytest\nls").contains("escape sequences"));
    }

    #[test]
    fn test_sensitive_paths() {
        assert!(reason("cat ~/.ssh/config").contains("~/.ssh"));
        assert!(reason("python ../outside.py").contains("../"));
        assert!(reason("cat deploy.PEM").contains(".pem"));
        assert!(reason("cat Credentials.json").contains("credentials"));
    }

    #[test]
    fn test_null_byte_and_non_printable() {
        assert!(reason("pytest\0").contains("Null bytes"));
        assert!(reason("pytest\u{7f}").contains("Non-printable"));
        assert!(reason("pytest é").contains("Non-printable"));
    }

    #[test]
    fn test_whitespace_is_allowed() {
        assert!(validate("").is_safe);
        assert!(validate("   \t").is_safe);
        assert!(validate("tox\n").is_safe);
    }

    #[test]
    fn test_validate_is_deterministic() {
        for command in ["tox -e py312", "pytest; ls", "cat /etc/hosts", ""] {
            assert_eq!(validate(command), validate(command));
        }
    }
}
