//! Safety engine — validates a plan against the risk policy.
//!
//! Every step is checked individually; the plan verdict aggregates the
//! per-step results: plan risk is the maximum step risk, the plan is
//! allowed only when every step is, and confirmation is required when
//! any step demands it or the plan risk reaches the configured
//! threshold. Shell steps are delegated to the command validator, so
//! each one leaves an audit trail.

use std::sync::Arc;

use crate::config::SafetyPolicy;
use crate::kernel::command::CommandValidator;
use crate::types::{ExecutionPlan, RiskLevel, SafetyCheck, StepParams, TaskStep};

/// Verdict for a single step.
#[derive(Debug, Clone)]
struct StepVerdict {
    allowed: bool,
    risk: RiskLevel,
    requires_confirmation: bool,
    risks: Vec<String>,
    blocked_reasons: Vec<String>,
}

impl StepVerdict {
    fn safe() -> Self {
        Self {
            allowed: true,
            risk: RiskLevel::Safe,
            requires_confirmation: false,
            risks: Vec::new(),
            blocked_reasons: Vec::new(),
        }
    }

    fn raise(&mut self, risk: RiskLevel, reason: impl Into<String>) {
        self.risk = self.risk.max(risk);
        self.risks.push(reason.into());
    }

    fn block(&mut self, risk: RiskLevel, reason: impl Into<String>) {
        let reason = reason.into();
        self.allowed = false;
        self.risk = self.risk.max(risk);
        self.risks.push(reason.clone());
        self.blocked_reasons.push(reason);
    }
}

/// Plan-level risk policy enforcement.
pub struct SafetyEngine {
    policy: SafetyPolicy,
    commands: Arc<CommandValidator>,
}

impl SafetyEngine {
    /// Create an engine from the policy knobs and the shared command
    /// validator.
    pub fn new(policy: SafetyPolicy, commands: Arc<CommandValidator>) -> Self {
        Self { policy, commands }
    }

    /// Validate every step and aggregate the plan verdict.
    pub fn check(&self, plan: &ExecutionPlan, user_id: Option<&str>) -> SafetyCheck {
        let mut allowed = true;
        let mut risk_level = RiskLevel::Safe;
        let mut requires_confirmation = false;
        let mut risks = Vec::new();
        let mut blocked_reasons = Vec::new();

        for step in &plan.steps {
            let verdict = self.check_step(step, user_id);
            allowed = allowed && verdict.allowed;
            risk_level = risk_level.max(verdict.risk);
            requires_confirmation = requires_confirmation || verdict.requires_confirmation;
            risks.extend(verdict.risks);
            blocked_reasons.extend(verdict.blocked_reasons);
        }

        if risk_level >= self.policy.require_confirmation_threshold {
            requires_confirmation = true;
        }

        let confirmation_message = if requires_confirmation || !allowed {
            Some(confirmation_message(plan, risk_level, &risks))
        } else {
            None
        };

        SafetyCheck {
            allowed,
            risk_level,
            risks,
            requires_confirmation,
            confirmation_message,
            blocked_reasons,
        }
    }

    fn check_step(&self, step: &TaskStep, user_id: Option<&str>) -> StepVerdict {
        let mut verdict = StepVerdict::safe();

        let tool_name = step.tool.to_string();
        if self.policy.blocked_tools.iter().any(|t| t == &tool_name) {
            verdict.block(
                RiskLevel::Critical,
                format!("step '{}' uses blocked tool '{tool_name}'", step.id),
            );
            return verdict;
        }

        self.check_params(step, &step.params, user_id, &mut verdict);
        verdict
    }

    /// Recursive so merged batch steps keep full per-operation coverage.
    fn check_params(
        &self,
        step: &TaskStep,
        params: &StepParams,
        user_id: Option<&str>,
        verdict: &mut StepVerdict,
    ) {
        match params {
            StepParams::FsRead { path } => self.check_fs_path(step, path, false, verdict),
            StepParams::FsWrite { path, .. } => {
                verdict.raise(RiskLevel::Medium, format!("step '{}' writes a file", step.id));
                self.check_fs_path(step, path, false, verdict);
            }
            StepParams::FsDelete { path } => {
                if self.policy.allow_destructive_ops {
                    verdict.raise(
                        RiskLevel::Medium,
                        format!("step '{}' deletes a file", step.id),
                    );
                } else {
                    verdict.block(
                        RiskLevel::High,
                        format!("step '{}' deletes '{path}' but destructive ops are disabled", step.id),
                    );
                }
                self.check_fs_path(step, path, true, verdict);
            }
            StepParams::FsSearch { .. } => {}
            StepParams::ShellExec { command, .. } => {
                verdict.raise(
                    RiskLevel::Medium,
                    format!("step '{}' runs a shell command", step.id),
                );
                let decision = self.commands.assess(command, user_id.unwrap_or("anonymous"));
                if decision.classification.dangerous {
                    verdict.block(
                        RiskLevel::Critical,
                        format!("step '{}' runs a destructive command: {command}", step.id),
                    );
                } else if !decision.allowed {
                    verdict.block(
                        RiskLevel::High,
                        format!("step '{}' command rejected by policy lists", step.id),
                    );
                } else if decision.classification.risk >= RiskLevel::High {
                    verdict.raise(
                        RiskLevel::High,
                        format!("step '{}' runs a privileged command", step.id),
                    );
                }
                verdict.requires_confirmation = true;
            }
            StepParams::HttpGet { url, .. } => {
                if let Some(reason) = insecure_url_reason(url) {
                    verdict.raise(RiskLevel::Medium, format!("step '{}' {reason}", step.id));
                }
            }
            StepParams::GithubQuery { .. } => {}
            StepParams::PeerExecute { .. } => {
                verdict.raise(
                    RiskLevel::High,
                    format!("step '{}' executes on a remote peer", step.id),
                );
                verdict.requires_confirmation = true;
            }
            StepParams::AutomationRun { .. } => {
                verdict.raise(
                    RiskLevel::Medium,
                    format!("step '{}' drives host automation", step.id),
                );
                verdict.requires_confirmation = true;
            }
            StepParams::AiGenerate { .. }
            | StepParams::CodeAnalysis { .. }
            | StepParams::MemoryRecall { .. }
            | StepParams::MemorySave { .. } => {}
            StepParams::Batch { batch } => {
                for inner in batch {
                    self.check_params(step, inner, user_id, verdict);
                }
            }
            StepParams::Unroutable { reason } => {
                verdict.block(
                    RiskLevel::High,
                    format!("step '{}' is unroutable: {reason}", step.id),
                );
            }
        }
    }

    fn check_fs_path(
        &self,
        step: &TaskStep,
        path: &str,
        already_blocked: bool,
        verdict: &mut StepVerdict,
    ) {
        if self
            .policy
            .blocked_paths
            .iter()
            .any(|blocked| path.starts_with(blocked.as_str()))
        {
            verdict.block(
                RiskLevel::Critical,
                format!("step '{}' touches blocked path '{path}'", step.id),
            );
            return;
        }
        if !already_blocked && (path.contains('*') || path.contains('?')) {
            verdict.raise(
                RiskLevel::High,
                format!("step '{}' uses a wildcard path '{path}'", step.id),
            );
        }
    }
}

/// Internal hosts and plain-http non-localhost targets carry risk.
fn insecure_url_reason(raw: &str) -> Option<String> {
    let parsed = url::Url::parse(raw).ok()?;
    let host = parsed.host_str().unwrap_or_default().to_lowercase();
    let localhost = host == "localhost" || host == "127.0.0.1" || host == "::1";

    let internal = host.ends_with(".local")
        || host.ends_with(".internal")
        || host.starts_with("10.")
        || host.starts_with("192.168.")
        || is_rfc1918_172(&host);
    if internal {
        return Some(format!("targets internal host '{host}'"));
    }
    if parsed.scheme() == "http" && !localhost {
        return Some(format!("uses plain http to '{host}'"));
    }
    None
}

fn is_rfc1918_172(host: &str) -> bool {
    let Some(rest) = host.strip_prefix("172.") else {
        return false;
    };
    let Some((octet, _)) = rest.split_once('.') else {
        return false;
    };
    matches!(octet.parse::<u8>(), Ok(n) if (16..=31).contains(&n))
}

/// Deterministic confirmation text listing risks and steps.
fn confirmation_message(plan: &ExecutionPlan, risk: RiskLevel, risks: &[String]) -> String {
    let mut message = format!("This request carries {risk} risk.\n\nSteps:\n");
    for step in &plan.steps {
        message.push_str(&format!("- {} ({})\n", step.description, step.tool));
    }
    if !risks.is_empty() {
        message.push_str("\nRisks:\n");
        for risk in risks {
            message.push_str(&format!("- {risk}\n"));
        }
    }
    message.push_str("\nProceed?");
    message
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CommandPolicy;
    use crate::types::ToolType;

    fn engine(policy: SafetyPolicy) -> SafetyEngine {
        SafetyEngine::new(
            policy,
            Arc::new(CommandValidator::new(&CommandPolicy::default())),
        )
    }

    fn step(id: &str, tool: ToolType, params: StepParams) -> TaskStep {
        TaskStep {
            id: id.to_owned(),
            description: format!("{tool} step"),
            tool,
            params,
            dependencies: Vec::new(),
            estimated_duration_ms: 100,
            can_parallelize: false,
            priority: 5,
            use_cache: false,
        }
    }

    fn plan(steps: Vec<TaskStep>) -> ExecutionPlan {
        ExecutionPlan {
            plan_id: "p1".to_owned(),
            steps,
            total_estimated_duration_ms: 0,
            parallel_groups: Vec::new(),
        }
    }

    #[test]
    fn test_plain_read_is_safe() {
        let check = engine(SafetyPolicy::default()).check(
            &plan(vec![step(
                "s1",
                ToolType::Fs,
                StepParams::FsRead {
                    path: "/tmp/a.txt".to_owned(),
                },
            )]),
            None,
        );
        assert!(check.allowed);
        assert!(check.risk_level <= RiskLevel::Low);
        assert!(!check.requires_confirmation);
        assert!(check.confirmation_message.is_none());
    }

    #[test]
    fn test_blocked_path_is_critical() {
        let check = engine(SafetyPolicy::default()).check(
            &plan(vec![step(
                "s1",
                ToolType::Fs,
                StepParams::FsRead {
                    path: "/usr/bin/env".to_owned(),
                },
            )]),
            None,
        );
        assert!(!check.allowed);
        assert_eq!(check.risk_level, RiskLevel::Critical);
        assert!(!check.blocked_reasons.is_empty());
    }

    #[test]
    fn test_write_is_medium_and_needs_confirmation() {
        let check = engine(SafetyPolicy::default()).check(
            &plan(vec![step(
                "s1",
                ToolType::Fs,
                StepParams::FsWrite {
                    path: "notes.txt".to_owned(),
                    content: "x".to_owned(),
                },
            )]),
            None,
        );
        assert!(check.allowed);
        assert_eq!(check.risk_level, RiskLevel::Medium);
        // Medium meets the default confirmation threshold.
        assert!(check.requires_confirmation);
        assert!(check.confirmation_message.is_some());
    }

    #[test]
    fn test_delete_blocked_without_destructive_ops() {
        let check = engine(SafetyPolicy::default()).check(
            &plan(vec![step(
                "s1",
                ToolType::Fs,
                StepParams::FsDelete {
                    path: "old.log".to_owned(),
                },
            )]),
            None,
        );
        assert!(!check.allowed);
        assert_eq!(check.risk_level, RiskLevel::High);
    }

    #[test]
    fn test_delete_allowed_with_destructive_ops() {
        let policy = SafetyPolicy {
            allow_destructive_ops: true,
            ..SafetyPolicy::default()
        };
        let check = engine(policy).check(
            &plan(vec![step(
                "s1",
                ToolType::Fs,
                StepParams::FsDelete {
                    path: "old.log".to_owned(),
                },
            )]),
            None,
        );
        assert!(check.allowed);
        assert_eq!(check.risk_level, RiskLevel::Medium);
    }

    #[test]
    fn test_wildcard_path_is_high() {
        let check = engine(SafetyPolicy::default()).check(
            &plan(vec![step(
                "s1",
                ToolType::Fs,
                StepParams::FsRead {
                    path: "/tmp/*.txt".to_owned(),
                },
            )]),
            None,
        );
        assert!(check.allowed);
        assert_eq!(check.risk_level, RiskLevel::High);
    }

    #[test]
    fn test_destructive_shell_command_blocks_plan() {
        let check = engine(SafetyPolicy::default()).check(
            &plan(vec![step(
                "s1",
                ToolType::Shell,
                StepParams::ShellExec {
                    command: "rm -rf /".to_owned(),
                    cwd: None,
                    timeout_ms: None,
                },
            )]),
            Some("alice"),
        );
        assert!(!check.allowed);
        assert_eq!(check.risk_level, RiskLevel::Critical);
        assert!(check
            .blocked_reasons
            .iter()
            .any(|r| r.contains("destructive command")));
        assert!(check.confirmation_message.is_some());
    }

    #[test]
    fn test_shell_always_requires_confirmation() {
        let check = engine(SafetyPolicy::default()).check(
            &plan(vec![step(
                "s1",
                ToolType::Shell,
                StepParams::ShellExec {
                    command: "ls".to_owned(),
                    cwd: None,
                    timeout_ms: None,
                },
            )]),
            None,
        );
        assert!(check.allowed);
        assert!(check.requires_confirmation);
    }

    #[test]
    fn test_privileged_shell_is_high() {
        let check = engine(SafetyPolicy::default()).check(
            &plan(vec![step(
                "s1",
                ToolType::Shell,
                StepParams::ShellExec {
                    command: "sudo reboot".to_owned(),
                    cwd: None,
                    timeout_ms: None,
                },
            )]),
            None,
        );
        assert!(check.allowed);
        assert_eq!(check.risk_level, RiskLevel::High);
    }

    #[test]
    fn test_blocked_tool_is_critical() {
        let policy = SafetyPolicy {
            blocked_tools: vec!["automation".to_owned()],
            ..SafetyPolicy::default()
        };
        let check = engine(policy).check(
            &plan(vec![step(
                "s1",
                ToolType::Automation,
                StepParams::AutomationRun {
                    instruction: "x".to_owned(),
                },
            )]),
            None,
        );
        assert!(!check.allowed);
        assert_eq!(check.risk_level, RiskLevel::Critical);
    }

    #[test]
    fn test_peer_step_is_high_with_confirmation() {
        let check = engine(SafetyPolicy::default()).check(
            &plan(vec![step(
                "s1",
                ToolType::Peer,
                StepParams::PeerExecute {
                    command: "uname -a".to_owned(),
                },
            )]),
            None,
        );
        assert!(check.allowed);
        assert_eq!(check.risk_level, RiskLevel::High);
        assert!(check.requires_confirmation);
    }

    #[test]
    fn test_plain_http_is_medium() {
        let check = engine(SafetyPolicy::default()).check(
            &plan(vec![step(
                "s1",
                ToolType::Networking,
                StepParams::HttpGet {
                    url: "http://example.com/feed".to_owned(),
                    service: None,
                },
            )]),
            None,
        );
        assert!(check.allowed);
        assert_eq!(check.risk_level, RiskLevel::Medium);
    }

    #[test]
    fn test_localhost_http_is_safe() {
        let check = engine(SafetyPolicy::default()).check(
            &plan(vec![step(
                "s1",
                ToolType::Networking,
                StepParams::HttpGet {
                    url: "http://localhost:8080/health".to_owned(),
                    service: None,
                },
            )]),
            None,
        );
        assert_eq!(check.risk_level, RiskLevel::Safe);
    }

    #[test]
    fn test_internal_host_is_medium() {
        let check = engine(SafetyPolicy::default()).check(
            &plan(vec![step(
                "s1",
                ToolType::Networking,
                StepParams::HttpGet {
                    url: "https://ci.internal/status".to_owned(),
                    service: None,
                },
            )]),
            None,
        );
        assert_eq!(check.risk_level, RiskLevel::Medium);
    }

    #[test]
    fn test_plan_risk_is_max_of_steps() {
        let check = engine(SafetyPolicy::default()).check(
            &plan(vec![
                step(
                    "s1",
                    ToolType::Fs,
                    StepParams::FsRead {
                        path: "a.txt".to_owned(),
                    },
                ),
                step(
                    "s2",
                    ToolType::Peer,
                    StepParams::PeerExecute {
                        command: "df -h".to_owned(),
                    },
                ),
            ]),
            None,
        );
        assert_eq!(check.risk_level, RiskLevel::High);
        assert!(check.allowed);
    }

    #[test]
    fn test_batch_params_are_checked_recursively() {
        let check = engine(SafetyPolicy::default()).check(
            &plan(vec![step(
                "s1",
                ToolType::Fs,
                StepParams::Batch {
                    batch: vec![
                        StepParams::FsRead {
                            path: "ok.txt".to_owned(),
                        },
                        StepParams::FsRead {
                            path: "/usr/bin/tool".to_owned(),
                        },
                    ],
                },
            )]),
            None,
        );
        assert!(!check.allowed, "a blocked path inside a batch must block");
        assert_eq!(check.risk_level, RiskLevel::Critical);
    }

    #[test]
    fn test_confirmation_message_lists_steps_and_risks() {
        let check = engine(SafetyPolicy::default()).check(
            &plan(vec![step(
                "s1",
                ToolType::Shell,
                StepParams::ShellExec {
                    command: "make build".to_owned(),
                    cwd: None,
                    timeout_ms: None,
                },
            )]),
            None,
        );
        let message = check.confirmation_message.expect("has message");
        assert!(message.contains("shell step"));
        assert!(message.contains("Risks:"));
        assert!(message.contains("Proceed?"));
    }
}
