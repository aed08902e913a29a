//! Risk assessment for requested tool calls.
//!
//! Every tool call is classified as [`RiskLevel::Low`] (run without asking)
//! or [`RiskLevel::High`] (show the action and ask first). The decision is
//! made by an ordered chain of [`RiskRule`]s where the first definitive
//! answer wins:
//!
//! 1. [`ExplicitHintRule`]: the `risk_level` argument, if present.
//! 2. [`ToolPolicyRule`]: the tool's own read-only allow-list
//!    ([`Tool::assess_risk`]), built from the helpers in this module.
//! 3. Fallback: High.
//!
//! Each decision is written to the [`AuditSink`].

use super::audit::AuditSink;
use crate::exec::shellwords::segments;
use crate::tools::core::{Tool, ToolArgs};
use serde::Serialize;
use tracing::debug;

/// Binary safety classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    High,
}

impl std::fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RiskLevel::Low => write!(f, "low"),
            RiskLevel::High => write!(f, "high"),
        }
    }
}

/// A rule's answer: the level plus a short rationale for the audit log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RiskVerdict {
    pub level: RiskLevel,
    pub reason: String,
}

impl RiskVerdict {
    pub fn low(reason: impl Into<String>) -> Self {
        Self {
            level: RiskLevel::Low,
            reason: reason.into(),
        }
    }

    pub fn high(reason: impl Into<String>) -> Self {
        Self {
            level: RiskLevel::High,
            reason: reason.into(),
        }
    }
}

/// The call being assessed.
pub struct RiskQuery<'a> {
    pub tool_name: &'a str,
    pub args: &'a ToolArgs,
    /// The registered tool, if the name is known.
    pub tool: Option<&'a dyn Tool>,
}

/// One link of the assessment chain. `None` means "no opinion".
pub trait RiskRule: Send + Sync {
    fn name(&self) -> &'static str;
    fn evaluate(&self, query: &RiskQuery<'_>) -> Option<RiskVerdict>;
}

/// Honours a `risk_level` argument: `"low"` is Low, any other value is High.
pub struct ExplicitHintRule;

impl RiskRule for ExplicitHintRule {
    fn name(&self) -> &'static str {
        "explicit_hint"
    }

    fn evaluate(&self, query: &RiskQuery<'_>) -> Option<RiskVerdict> {
        let hint = query.args.get("risk_level")?;
        let text = hint
            .as_str()
            .map(|s| s.trim().to_ascii_lowercase())
            .unwrap_or_else(|| hint.to_string());
        if text == "low" {
            Some(RiskVerdict::low("caller marked the call low risk"))
        } else {
            Some(RiskVerdict::high(format!("caller marked the call '{text}'")))
        }
    }
}

/// Defers to the tool's static allow-list.
pub struct ToolPolicyRule;

impl RiskRule for ToolPolicyRule {
    fn name(&self) -> &'static str {
        "tool_policy"
    }

    fn evaluate(&self, query: &RiskQuery<'_>) -> Option<RiskVerdict> {
        query.tool?.assess_risk(query.args)
    }
}

/// The outcome of [`RiskAssessor::assess`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RiskDecision {
    pub level: RiskLevel,
    /// Name of the rule that decided, or `"default"`.
    pub rule: &'static str,
    pub reason: String,
}

/// Ordered rule chain with audit logging.
pub struct RiskAssessor<'a> {
    rules: Vec<Box<dyn RiskRule>>,
    audit: &'a dyn AuditSink,
}

impl<'a> RiskAssessor<'a> {
    /// The standard chain: explicit hint, then tool policy, then High.
    pub fn new(audit: &'a dyn AuditSink) -> Self {
        Self {
            rules: vec![Box::new(ExplicitHintRule), Box::new(ToolPolicyRule)],
            audit,
        }
    }

    /// Replace the rule chain.
    pub fn with_rules(mut self, rules: Vec<Box<dyn RiskRule>>) -> Self {
        self.rules = rules;
        self
    }

    pub fn assess(&self, query: &RiskQuery<'_>) -> RiskDecision {
        let decision = self
            .rules
            .iter()
            .find_map(|rule| {
                rule.evaluate(query).map(|v| RiskDecision {
                    level: v.level,
                    rule: rule.name(),
                    reason: v.reason,
                })
            })
            .unwrap_or_else(|| RiskDecision {
                level: RiskLevel::High,
                rule: "default",
                reason: "not on the read-only allow-list".into(),
            });

        debug!(
            "[risk] {} → {} ({}: {})",
            query.tool_name, decision.level, decision.rule, decision.reason
        );
        // Name and reason can carry model text; escaping keeps one line per decision.
        self.audit.record(&format!(
            "tool={} decision={} rule={} reason=\"{}\"",
            query.tool_name.escape_debug(),
            decision.level,
            decision.rule,
            decision.reason.escape_debug()
        ));
        decision
    }
}

// ── Allow-list helpers ─────────────────────────────────────────────

/// Shell programs treated as read-only.
pub const READ_ONLY_SHELL_COMMANDS: &[&str] = &[
    "ls", "cat", "pwd", "echo", "grep", "egrep", "fgrep", "rg", "head", "tail", "wc", "find",
    "which", "stat", "file", "date", "whoami", "id", "env", "printenv", "uname", "hostname",
    "df", "du", "ps", "tree", "sort", "uniq", "cut", "diff", "basename", "dirname", "realpath",
    "true",
];

/// `find` actions that modify or execute.
const FIND_MUTATING_FLAGS: &[&str] = &[
    "-delete", "-exec", "-execdir", "-ok", "-okdir", "-fprint", "-fprintf", "-fls",
];

/// Whether every statement of `sql` starts with a read-only verb.
///
/// Verbs are matched at the start of each `;`-separated statement after
/// leading whitespace and comments, never by substring, so
/// `DELETE FROM t WHERE note = 'SELECT'` is not read-only.
pub fn sql_is_read_only(sql: &str) -> bool {
    let statements: Vec<&str> = sql
        .split(';')
        .map(strip_sql_comments)
        .filter(|s| !s.is_empty())
        .collect();
    !statements.is_empty() && statements.iter().all(|s| statement_is_read_only(s))
}

fn statement_is_read_only(statement: &str) -> bool {
    let mut words = statement.split_whitespace().map(str::to_ascii_uppercase);
    match words.next().as_deref() {
        Some("SELECT" | "SHOW" | "DESCRIBE" | "DESC" | "EXPLAIN") => true,
        Some("CREATE") => words.next().as_deref() == Some("TABLE"),
        _ => false,
    }
}

fn strip_sql_comments(statement: &str) -> &str {
    let mut s = statement.trim_start();
    loop {
        if let Some(rest) = s.strip_prefix("--") {
            s = rest.split_once('\n').map_or("", |(_, after)| after).trim_start();
        } else if let Some(rest) = s.strip_prefix("/*") {
            s = rest.split_once("*/").map_or("", |(_, after)| after).trim_start();
        } else {
            return s.trim_end();
        }
    }
}

/// Whether every simple command in `command` runs an allow-listed program
/// without writing files.
pub fn shell_is_read_only(command: &str) -> bool {
    if ["$(", "`", "<(", ">("].iter().any(|p| command.contains(p)) {
        return false;
    }
    let segs = segments(command);
    if segs.is_empty() {
        return false;
    }
    segs.iter().all(|seg| {
        let Some(program) = seg.program() else {
            return false;
        };
        if seg.writes_output || !READ_ONLY_SHELL_COMMANDS.contains(&program) {
            return false;
        }
        match program {
            "find" => !seg
                .args()
                .iter()
                .any(|a| FIND_MUTATING_FLAGS.contains(&a.as_str())),
            // `env CMD` runs CMD; only a bare listing is read-only.
            "env" => seg.args().iter().all(|a| a.starts_with('-')),
            _ => true,
        }
    })
}

/// Whether a file operation name only reads.
pub fn file_op_is_read_only(operation: &str) -> bool {
    matches!(
        operation.trim().to_ascii_lowercase().as_str(),
        "read" | "list" | "exists"
    )
}

/// Whether an HTTP method is safe.
pub fn http_method_is_safe(method: &str) -> bool {
    matches!(
        method.trim().to_ascii_uppercase().as_str(),
        "GET" | "HEAD" | "OPTIONS"
    )
}
