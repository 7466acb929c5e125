//! Shell command classification, allowance, and audit logging.
//!
//! Classification first tests the critical blacklist (destructive
//! patterns), then matches ordered pattern sets for READ, WRITE, SYSTEM,
//! and NETWORK commands; the first match wins and anything else is
//! EXECUTE. Every allow/deny decision appends an audit entry; execution
//! outcomes are attached to their entry exactly once.

use std::collections::HashSet;
use std::sync::Mutex;

use chrono::Utc;
use regex::Regex;
use thiserror::Error;
use uuid::Uuid;

use crate::config::CommandPolicy;
use crate::types::{AuditLogEntry, CommandClassification, CommandType, RiskLevel};

/// Patterns that make a command critically dangerous regardless of type.
const CRITICAL_PATTERNS: &[&str] = &[
    r"rm\s+-rf",
    r"\bdd\b",
    r"\bmkfs",
    r"\bformat\b",
    r":\(\)\s*\{",
    r"chmod\s+777",
];

const READ_PATTERNS: &[&str] = &[
    r"^(?:ls|cat|head|tail|less|more|pwd|find|grep|rg|wc|file|stat|du|df|which|env|printenv)\b",
];

const WRITE_PATTERNS: &[&str] = &[
    r"^(?:touch|mkdir|cp|mv|rm|rmdir|echo|tee|sed|ln|truncate)\b",
];

const SYSTEM_PATTERNS: &[&str] = &[
    r"^(?:sudo|su)\b",
    r"^(?:systemctl|service|reboot|shutdown|kill|killall|mount|umount|chown|chmod|useradd|passwd)\b",
    r"\b(?:apt|apt-get|yum|dnf|brew)\s+install\b",
    r"\bnpm\s+install\s+-g\b",
    r"\bpip3?\s+install\b",
];

const NETWORK_PATTERNS: &[&str] = &[
    r"^(?:curl|wget|ping|ssh|scp|rsync|nc|netstat|dig|nslookup|telnet)\b",
];

/// Risk-gated permission names, keyed by command type.
///
/// The mapping is a pure function of the classification.
pub fn required_permission(command_type: CommandType) -> &'static str {
    match command_type {
        CommandType::Read => "shell:read",
        CommandType::Write | CommandType::Execute => "shell:execute",
        CommandType::System => "system:admin",
        CommandType::Network => "network:execute",
    }
}

/// Regex-table shell command classifier.
pub struct CommandClassifier {
    critical: Vec<Regex>,
    read: Vec<Regex>,
    write: Vec<Regex>,
    system: Vec<Regex>,
    network: Vec<Regex>,
}

impl Default for CommandClassifier {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandClassifier {
    /// Build the classifier with the default pattern sets.
    pub fn new() -> Self {
        Self {
            critical: compile_all(CRITICAL_PATTERNS),
            read: compile_all(READ_PATTERNS),
            write: compile_all(WRITE_PATTERNS),
            system: compile_all(SYSTEM_PATTERNS),
            network: compile_all(NETWORK_PATTERNS),
        }
    }

    /// Classify a command. Critical patterns dominate; otherwise the
    /// ordered READ → WRITE → SYSTEM → NETWORK sets decide, first match
    /// wins, and anything unmatched is EXECUTE.
    pub fn classify(&self, command: &str) -> CommandClassification {
        let trimmed = command.trim();

        if self.critical.iter().any(|r| r.is_match(trimmed)) {
            return CommandClassification {
                command_type: CommandType::System,
                risk: RiskLevel::Critical,
                dangerous: true,
                requires_confirmation: true,
            };
        }

        let (command_type, risk) = if self.read.iter().any(|r| r.is_match(trimmed)) {
            (CommandType::Read, RiskLevel::Safe)
        } else if self.write.iter().any(|r| r.is_match(trimmed)) {
            (CommandType::Write, RiskLevel::Low)
        } else if self.system.iter().any(|r| r.is_match(trimmed)) {
            (CommandType::System, RiskLevel::High)
        } else if self.network.iter().any(|r| r.is_match(trimmed)) {
            (CommandType::Network, RiskLevel::Medium)
        } else {
            (CommandType::Execute, RiskLevel::Medium)
        };

        CommandClassification {
            command_type,
            risk,
            dangerous: false,
            requires_confirmation: risk == RiskLevel::High,
        }
    }
}

/// Why a command was denied.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DenialReason {
    /// The command matched a blacklist pattern.
    #[error("command matches blacklist")]
    Blacklisted,
    /// A whitelist is configured and the command matched none of it.
    #[error("command not on whitelist")]
    NotWhitelisted,
    /// The command matched the critical blacklist.
    #[error("command is dangerous")]
    Dangerous,
    /// The user lacks the permission the classification requires.
    #[error("missing permission {0}")]
    MissingPermission(String),
}

/// One validated decision, always backed by an audit entry.
#[derive(Debug, Clone)]
pub struct CommandDecision {
    /// Audit entry id for [`CommandValidator::record_execution`].
    pub audit_id: Uuid,
    /// Classification of the command.
    pub classification: CommandClassification,
    /// Whether execution is permitted.
    pub allowed: bool,
    /// Denial reason when not allowed.
    pub denial: Option<DenialReason>,
}

/// Validates commands against lists and permissions, and owns the
/// append-only audit log.
pub struct CommandValidator {
    classifier: CommandClassifier,
    whitelist: Vec<Regex>,
    blacklist: Vec<Regex>,
    audit: Mutex<Vec<AuditLogEntry>>,
}

impl Default for CommandValidator {
    fn default() -> Self {
        Self::new(&CommandPolicy::default())
    }
}

impl CommandValidator {
    /// Build a validator from the configured whitelist/blacklist.
    /// Invalid patterns are skipped with a warning.
    pub fn new(policy: &CommandPolicy) -> Self {
        Self {
            classifier: CommandClassifier::new(),
            whitelist: compile_user(&policy.whitelist),
            blacklist: compile_user(&policy.blacklist),
            audit: Mutex::new(Vec::new()),
        }
    }

    /// Classify without deciding; no audit entry is written.
    pub fn classify(&self, command: &str) -> CommandClassification {
        self.classifier.classify(command)
    }

    /// Decide allowance from the lists and danger flag alone, without a
    /// permission check. Used by the safety engine, which runs before
    /// any user permission set is known. Audit-logged.
    pub fn assess(&self, command: &str, user_id: &str) -> CommandDecision {
        let classification = self.classifier.classify(command);
        let denial = self.list_denial(command, &classification);
        self.log_decision(command, user_id, classification, denial)
    }

    /// Full validation for execution: lists, danger flag, and the
    /// permission the classification requires. Audit-logged.
    pub fn validate(
        &self,
        command: &str,
        user_id: &str,
        permissions: &HashSet<String>,
    ) -> CommandDecision {
        let classification = self.classifier.classify(command);
        let denial = self.list_denial(command, &classification).or_else(|| {
            let required = required_permission(classification.command_type);
            if permissions.contains(required) {
                None
            } else {
                Some(DenialReason::MissingPermission(required.to_owned()))
            }
        });
        self.log_decision(command, user_id, classification, denial)
    }

    /// Attach an execution outcome to an existing audit entry.
    ///
    /// The attachment is one-shot: a second call for the same id is
    /// ignored. Returns whether the outcome was recorded.
    pub fn record_execution(&self, audit_id: Uuid, result: &str) -> bool {
        let Ok(mut entries) = self.audit.lock() else {
            return false;
        };
        match entries
            .iter_mut()
            .find(|e| e.id == audit_id && !e.executed)
        {
            Some(entry) => {
                entry.executed = true;
                entry.result = Some(result.to_owned());
                true
            }
            None => false,
        }
    }

    /// Snapshot of the audit log, oldest first.
    pub fn audit_entries(&self) -> Vec<AuditLogEntry> {
        self.audit.lock().map(|e| e.clone()).unwrap_or_default()
    }

    fn list_denial(
        &self,
        command: &str,
        classification: &CommandClassification,
    ) -> Option<DenialReason> {
        if self.blacklist.iter().any(|r| r.is_match(command)) {
            return Some(DenialReason::Blacklisted);
        }
        if !self.whitelist.is_empty() && !self.whitelist.iter().any(|r| r.is_match(command)) {
            return Some(DenialReason::NotWhitelisted);
        }
        if classification.dangerous {
            return Some(DenialReason::Dangerous);
        }
        None
    }

    fn log_decision(
        &self,
        command: &str,
        user_id: &str,
        classification: CommandClassification,
        denial: Option<DenialReason>,
    ) -> CommandDecision {
        let allowed = denial.is_none();
        let entry = AuditLogEntry {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            user_id: user_id.to_owned(),
            command: command.to_owned(),
            classification: classification.clone(),
            allowed,
            executed: false,
            result: None,
        };
        let audit_id = entry.id;
        if let Ok(mut entries) = self.audit.lock() {
            entries.push(entry);
        }
        tracing::debug!(
            %audit_id,
            user = user_id,
            allowed,
            risk = %classification.risk,
            "command decision"
        );
        CommandDecision {
            audit_id,
            classification,
            allowed,
            denial,
        }
    }
}

fn compile_all(patterns: &[&str]) -> Vec<Regex> {
    patterns.iter().filter_map(|p| Regex::new(p).ok()).collect()
}

fn compile_user(patterns: &[String]) -> Vec<Regex> {
    patterns
        .iter()
        .filter_map(|p| match Regex::new(p) {
            Ok(r) => Some(r),
            Err(e) => {
                tracing::warn!(pattern = %p, error = %e, "skipping invalid command pattern");
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn validator() -> CommandValidator {
        CommandValidator::default()
    }

    fn perms(names: &[&str]) -> HashSet<String> {
        names.iter().map(|n| (*n).to_owned()).collect()
    }

    #[test]
    fn test_classify_read() {
        let c = CommandClassifier::new();
        let classification = c.classify("ls -la /tmp");
        assert_eq!(classification.command_type, CommandType::Read);
        assert_eq!(classification.risk, RiskLevel::Safe);
        assert!(!classification.requires_confirmation);
    }

    #[test]
    fn test_classify_write() {
        let c = CommandClassifier::new();
        let classification = c.classify("mkdir -p build");
        assert_eq!(classification.command_type, CommandType::Write);
        assert_eq!(classification.risk, RiskLevel::Low);
    }

    #[test]
    fn test_classify_system() {
        let c = CommandClassifier::new();
        let classification = c.classify("sudo systemctl restart nginx");
        assert_eq!(classification.command_type, CommandType::System);
        assert_eq!(classification.risk, RiskLevel::High);
        assert!(classification.requires_confirmation);
    }

    #[test]
    fn test_classify_network() {
        let c = CommandClassifier::new();
        let classification = c.classify("curl https://example.com");
        assert_eq!(classification.command_type, CommandType::Network);
        assert_eq!(classification.risk, RiskLevel::Medium);
    }

    #[test]
    fn test_classify_default_execute() {
        let c = CommandClassifier::new();
        let classification = c.classify("./run-benchmarks");
        assert_eq!(classification.command_type, CommandType::Execute);
        assert_eq!(classification.risk, RiskLevel::Medium);
    }

    #[test]
    fn test_classify_critical_patterns() {
        let c = CommandClassifier::new();
        for command in [
            "rm -rf /",
            "dd if=/dev/zero of=/dev/sda",
            "mkfs.ext4 /dev/sda1",
            ":(){ :|:& };:",
            "chmod 777 /etc/passwd",
        ] {
            let classification = c.classify(command);
            assert!(classification.dangerous, "{command} must be dangerous");
            assert_eq!(classification.risk, RiskLevel::Critical);
            assert_eq!(classification.command_type, CommandType::System);
            assert!(classification.requires_confirmation);
        }
    }

    #[test]
    fn test_permission_mapping_is_deterministic() {
        assert_eq!(required_permission(CommandType::Read), "shell:read");
        assert_eq!(required_permission(CommandType::Write), "shell:execute");
        assert_eq!(required_permission(CommandType::Execute), "shell:execute");
        assert_eq!(required_permission(CommandType::System), "system:admin");
        assert_eq!(required_permission(CommandType::Network), "network:execute");
    }

    #[test]
    fn test_validate_allows_with_permission() {
        let v = validator();
        let decision = v.validate("cat notes.txt", "alice", &perms(&["shell:read"]));
        assert!(decision.allowed);
        assert!(decision.denial.is_none());
    }

    #[test]
    fn test_validate_denies_missing_permission() {
        let v = validator();
        let decision = v.validate("cat notes.txt", "alice", &perms(&[]));
        assert!(!decision.allowed);
        assert_eq!(
            decision.denial,
            Some(DenialReason::MissingPermission("shell:read".to_owned()))
        );
    }

    #[test]
    fn test_validate_denies_dangerous_before_permissions() {
        let v = validator();
        let decision = v.validate("rm -rf /", "alice", &perms(&["system:admin"]));
        assert!(!decision.allowed);
        assert_eq!(decision.denial, Some(DenialReason::Dangerous));
    }

    #[test]
    fn test_blacklist_denies() {
        let v = CommandValidator::new(&CommandPolicy {
            whitelist: vec![],
            blacklist: vec![r"evil\.sh".to_owned()],
        });
        let decision = v.validate("sh evil.sh", "alice", &perms(&["shell:execute"]));
        assert_eq!(decision.denial, Some(DenialReason::Blacklisted));
    }

    #[test]
    fn test_whitelist_must_match() {
        let v = CommandValidator::new(&CommandPolicy {
            whitelist: vec![r"^git\b".to_owned()],
            blacklist: vec![],
        });
        let ok = v.validate("git status", "alice", &perms(&["shell:execute"]));
        assert!(ok.allowed);
        let denied = v.validate("cat x", "alice", &perms(&["shell:read"]));
        assert_eq!(denied.denial, Some(DenialReason::NotWhitelisted));
    }

    #[test]
    fn test_audit_log_appends_every_decision() {
        let v = validator();
        v.assess("ls", "alice");
        v.validate("cat x", "bob", &perms(&["shell:read"]));
        let entries = v.audit_entries();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].user_id, "alice");
        assert_eq!(entries[1].user_id, "bob");
        assert!(entries.iter().all(|e| !e.executed));
    }

    #[test]
    fn test_record_execution_is_one_shot() {
        let v = validator();
        let decision = v.assess("ls", "alice");

        assert!(v.record_execution(decision.audit_id, "ok"));
        assert!(
            !v.record_execution(decision.audit_id, "again"),
            "second attachment must be rejected"
        );

        let entries = v.audit_entries();
        assert!(entries[0].executed);
        assert_eq!(entries[0].result.as_deref(), Some("ok"));
    }

    #[test]
    fn test_record_execution_unknown_id() {
        let v = validator();
        assert!(!v.record_execution(Uuid::new_v4(), "ok"));
    }

    #[test]
    fn test_invalid_user_pattern_skipped() {
        let v = CommandValidator::new(&CommandPolicy {
            whitelist: vec![],
            blacklist: vec!["([unclosed".to_owned()],
        });
        let decision = v.assess("ls", "alice");
        assert!(decision.allowed, "invalid blacklist pattern must not deny");
    }
}
