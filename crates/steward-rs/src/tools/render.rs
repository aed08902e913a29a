//! Final-artifact tools: tables and charts shown straight to the user.
//!
//! Both tools return their rendering as an artifact, so the model only
//! sees an acknowledgement and never echoes the data back.

use crate::ToolDef;
use crate::safety::RiskVerdict;
use crate::tools::core::{
    Tool, ToolArgs, ToolContext, ToolError, ToolFuture, ToolSuccess, tool_parameters, typed_args,
};
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::{Value, json};

/// Longest cell rendered before it is cut with an ellipsis.
const MAX_CELL_CHARS: usize = 60;

// ── Table formatting ───────────────────────────────────────────────

/// Render a value as table cell text.
pub fn cell_text(value: &Value) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn clip(cell: &str) -> String {
    let flat = cell.replace(['\n', '\r', '\t'], " ");
    if flat.chars().count() <= MAX_CELL_CHARS {
        return flat;
    }
    let mut cut: String = flat.chars().take(MAX_CELL_CHARS - 1).collect();
    cut.push('…');
    cut
}

/// Format rows as a boxed ASCII table.
///
/// Short rows are padded with empty cells; extra cells are dropped.
pub fn format_table(columns: &[String], rows: &[Vec<String>]) -> String {
    let header: Vec<String> = columns.iter().map(|c| clip(c)).collect();
    let body: Vec<Vec<String>> = rows
        .iter()
        .map(|row| {
            (0..header.len())
                .map(|i| row.get(i).map(|c| clip(c)).unwrap_or_default())
                .collect()
        })
        .collect();

    let mut widths: Vec<usize> = header.iter().map(|h| h.chars().count()).collect();
    for row in &body {
        for (w, cell) in widths.iter_mut().zip(row) {
            *w = (*w).max(cell.chars().count());
        }
    }

    let border = {
        let mut line = String::from("+");
        for w in &widths {
            line.push_str(&"-".repeat(w + 2));
            line.push('+');
        }
        line
    };
    let render_row = |cells: &[String]| {
        let mut line = String::from("|");
        for (cell, w) in cells.iter().zip(&widths) {
            let pad = w - cell.chars().count();
            line.push(' ');
            line.push_str(cell);
            line.push_str(&" ".repeat(pad + 1));
            line.push('|');
        }
        line
    };

    let mut out = vec![border.clone(), render_row(&header), border.clone()];
    for row in &body {
        out.push(render_row(row));
    }
    if !body.is_empty() {
        out.push(border);
    }
    let noun = if rows.len() == 1 { "row" } else { "rows" };
    out.push(format!("({} {noun})", rows.len()));
    out.join("\n")
}

// ── RenderTable ────────────────────────────────────────────────────

#[derive(Deserialize, JsonSchema)]
pub struct RenderTableArgs {
    /// Column headers.
    pub columns: Vec<String>,
    /// Row values, one array per row, in column order.
    pub rows: Vec<Vec<Value>>,
}

/// Shows a table to the user.
#[derive(Debug, Default)]
pub struct RenderTable;

impl RenderTable {
    pub fn new() -> Self {
        Self
    }
}

impl Tool for RenderTable {
    fn definition(&self) -> ToolDef {
        ToolDef::new(
            "render_table",
            "Display tabular data to the user as a formatted table. The table is shown \
             directly; do not repeat its contents in your reply.",
            tool_parameters::<RenderTableArgs>(),
        )
    }

    fn assess_risk(&self, _args: &ToolArgs) -> Option<RiskVerdict> {
        Some(RiskVerdict::low("rendering only"))
    }

    fn execute<'a>(&'a self, args: ToolArgs, _ctx: ToolContext<'a>) -> ToolFuture<'a> {
        Box::pin(async move {
            let args: RenderTableArgs = typed_args(args)?;
            let rows: Vec<Vec<String>> = args
                .rows
                .iter()
                .map(|r| r.iter().map(cell_text).collect())
                .collect();
            let table = format_table(&args.columns, &rows);
            Ok(ToolSuccess::with_artifact(
                json!({ "row_count": rows.len() }),
                table,
            ))
        })
    }
}

// ── Charts ─────────────────────────────────────────────────────────

/// Draws a labelled series as text.
pub trait ChartRenderer: Send + Sync {
    fn render(&self, title: Option<&str>, labels: &[String], values: &[f64]) -> String;
}

/// Horizontal bar chart scaled to the largest absolute value.
#[derive(Debug, Clone)]
pub struct BarChart {
    width: usize,
}

impl BarChart {
    pub fn new(width: usize) -> Self {
        Self {
            width: width.max(1),
        }
    }
}

impl Default for BarChart {
    fn default() -> Self {
        Self::new(40)
    }
}

impl ChartRenderer for BarChart {
    fn render(&self, title: Option<&str>, labels: &[String], values: &[f64]) -> String {
        let mut out = Vec::new();
        if let Some(t) = title.filter(|t| !t.is_empty()) {
            out.push(t.to_string());
            out.push("=".repeat(t.chars().count()));
        }
        let label_width = labels.iter().map(|l| l.chars().count()).max().unwrap_or(0);
        let peak = values.iter().fold(0.0_f64, |m, v| m.max(v.abs()));

        for (label, value) in labels.iter().zip(values) {
            let len = if peak > 0.0 {
                ((value.abs() / peak) * self.width as f64).round() as usize
            } else {
                0
            };
            let bar = if *value < 0.0 { "░" } else { "█" }.repeat(len);
            let pad = label_width - label.chars().count();
            out.push(format!(
                "{label}{} │ {bar} {}",
                " ".repeat(pad),
                format_number(*value)
            ));
        }
        out.join("\n")
    }
}

fn format_number(v: f64) -> String {
    if v.fract() == 0.0 && v.abs() < 1e15 {
        format!("{}", v as i64)
    } else {
        format!("{v:.2}")
    }
}

#[derive(Deserialize, JsonSchema)]
pub struct RenderChartArgs {
    /// Optional chart title.
    #[serde(default)]
    pub title: Option<String>,
    /// Category labels, one per value.
    pub labels: Vec<String>,
    /// Numeric values, one per label.
    pub values: Vec<f64>,
}

/// Shows a chart to the user.
pub struct RenderChart {
    renderer: Box<dyn ChartRenderer>,
}

impl RenderChart {
    pub fn new() -> Self {
        Self::with_renderer(BarChart::default())
    }

    pub fn with_renderer(renderer: impl ChartRenderer + 'static) -> Self {
        Self {
            renderer: Box::new(renderer),
        }
    }
}

impl Default for RenderChart {
    fn default() -> Self {
        Self::new()
    }
}

impl Tool for RenderChart {
    fn definition(&self) -> ToolDef {
        ToolDef::new(
            "render_chart",
            "Display a bar chart of labelled numeric values to the user. The chart is \
             shown directly; do not describe it again in your reply.",
            tool_parameters::<RenderChartArgs>(),
        )
    }

    fn assess_risk(&self, _args: &ToolArgs) -> Option<RiskVerdict> {
        Some(RiskVerdict::low("rendering only"))
    }

    fn execute<'a>(&'a self, args: ToolArgs, _ctx: ToolContext<'a>) -> ToolFuture<'a> {
        Box::pin(async move {
            let args: RenderChartArgs = typed_args(args)?;
            if args.labels.len() != args.values.len() {
                return Err(ToolError::InvalidArguments(format!(
                    "{} labels but {} values",
                    args.labels.len(),
                    args.values.len()
                )));
            }
            let chart = self
                .renderer
                .render(args.title.as_deref(), &args.labels, &args.values);
            Ok(ToolSuccess::with_artifact(
                json!({ "points": args.values.len() }),
                chart,
            ))
        })
    }
}
