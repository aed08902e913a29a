//! Safety policy: risk classification and its audit trail.

pub mod audit;
pub mod risk;

pub use audit::{AuditSink, FileAuditLog, MemoryAudit, NoAudit};
pub use risk::{
    ExplicitHintRule, RiskAssessor, RiskDecision, RiskLevel, RiskQuery, RiskRule, RiskVerdict,
    ToolPolicyRule, file_op_is_read_only, http_method_is_safe, shell_is_read_only,
    sql_is_read_only,
};
