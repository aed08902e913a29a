//! Tool system: the [`Tool`] trait, the [`ToolRegistry`], the result
//! contract and the built-in tools.
//!
//! | Tool | Name | Safe without confirmation |
//! |------|------|---------------------------|
//! | [`ExecuteSql`] | `execute_sql` | SELECT, SHOW, DESCRIBE, DESC, EXPLAIN, CREATE TABLE |
//! | [`RunCommand`] | `run_command` | read-only programs without redirection |
//! | [`HttpRequest`] | `http_request` | GET, HEAD, OPTIONS |
//! | [`FileTool`] | `file` | read, list, exists |
//! | [`RenderTable`] | `render_table` | always |
//! | [`RenderChart`] | `render_chart` | always |

pub mod core;
pub mod file;
pub mod http;
pub mod render;
pub mod result;
pub mod shell;
pub mod sql;

pub use self::core::{
    CROSS_CUTTING_KEYS, DEFAULT_MAX_RESULT_BYTES, Tool, ToolArgs, ToolContext, ToolError,
    ToolFuture, ToolRegistry, ToolSuccess, parse_arguments, tool_parameters, typed_args,
    validate_tool_arguments,
};
pub use file::FileTool;
pub use http::HttpRequest;
pub use render::{BarChart, ChartRenderer, RenderChart, RenderTable, format_table};
pub use result::{ARTIFACT_ACK, ToolOutcome, ToolStatus};
pub use shell::{OutputMode, RunCommand};
pub use sql::{CommandSqlBackend, ExecuteSql, SqlBackend, SqlOutput};
