//! Output formatting for CLI commands.
//!
//! Text output uses colored tables; JSON output is meant for scripts and
//! carries the same information.

use colored::Colorize;
use serde::Serialize;
use std::fmt::Write;
use tabled::{Table, Tabled};

use crate::config::{ConfigHasher, ValidationResult};
use crate::planner::{PlanAction, StagePlan};
use crate::reconciler::{BatchResult, DriftStatus, StageDrift};
use crate::state::ReconcileState;

use super::commands::OutputFormat;

/// Output formatter for CLI.
#[derive(Debug)]
pub struct OutputFormatter {
    /// Output format.
    format: OutputFormat,
}

/// Planning result for one manifest entry.
#[derive(Debug, Serialize)]
pub struct PlanEntry {
    /// Logical id.
    pub logical_id: String,
    /// Plan, if planning succeeded.
    pub plan: Option<StagePlan>,
    /// Planning error otherwise.
    pub error: Option<String>,
    /// Whether the entry was edited since it was last applied; `None` if never applied.
    pub edited: Option<bool>,
}

#[derive(Tabled)]
struct PlanRow {
    #[tabled(rename = "Stage")]
    stage: String,
    #[tabled(rename = "Action")]
    action: String,
    #[tabled(rename = "Operations")]
    operations: String,
}

#[derive(Tabled)]
struct ApplyRow {
    #[tabled(rename = "Stage")]
    stage: String,
    #[tabled(rename = "Result")]
    result: String,
    #[tabled(rename = "Object")]
    object: String,
}

#[derive(Tabled)]
struct DriftRow {
    #[tabled(rename = "Stage")]
    stage: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Changes")]
    changes: String,
}

#[derive(Tabled)]
struct StateRow {
    #[tabled(rename = "Logical id")]
    logical_id: String,
    #[tabled(rename = "Stage")]
    stage: String,
    #[tabled(rename = "Object")]
    object: String,
    #[tabled(rename = "Last action")]
    last_action: String,
    #[tabled(rename = "Hash")]
    hash: String,
    #[tabled(rename = "Updated")]
    updated: String,
}

impl OutputFormatter {
    /// Creates a new output formatter.
    #[must_use]
    pub const fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    /// Formats manifest validation results.
    #[must_use]
    pub fn format_validation(
        &self,
        result: &ValidationResult,
        stage_count: usize,
        show_warnings: bool,
    ) -> String {
        match self.format {
            OutputFormat::Json => to_json(&serde_json::json!({
                "valid": true,
                "stages": stage_count,
                "warnings": result.warnings,
            })),
            OutputFormat::Text => {
                let mut output = format!(
                    "{} Manifest is valid ({stage_count} stage(s))\n",
                    "✓".green()
                );
                if show_warnings && !result.warnings.is_empty() {
                    let _ = write!(output, "\n{} Warnings:\n", "⚠".yellow());
                    for warning in &result.warnings {
                        let _ = writeln!(output, "   - {warning}");
                    }
                }
                output
            }
        }
    }

    /// Formats plans for every manifest entry plus stages to prune.
    #[must_use]
    pub fn format_plans(&self, entries: &[PlanEntry], orphans: &[String], detailed: bool) -> String {
        match self.format {
            OutputFormat::Json => to_json(&serde_json::json!({
                "stages": entries,
                "prune": orphans,
            })),
            OutputFormat::Text => Self::format_plans_text(entries, orphans, detailed),
        }
    }

    fn format_plans_text(entries: &[PlanEntry], orphans: &[String], detailed: bool) -> String {
        let pending = entries
            .iter()
            .filter(|e| e.error.is_some() || e.plan.as_ref().is_some_and(StagePlan::has_changes))
            .count();
        if pending == 0 && orphans.is_empty() {
            return format!("{} No changes. Stages match the manifest.\n", "✓".green());
        }

        let mut output = String::from("\nStage Plan\n\n");
        let rows: Vec<PlanRow> = entries
            .iter()
            .map(|e| match (&e.plan, &e.error) {
                (Some(plan), _) => PlanRow {
                    stage: if e.edited == Some(true) {
                        format!("{} {}", plan.stage, "(edited)".dimmed())
                    } else {
                        plan.stage.to_string()
                    },
                    action: Self::format_action(plan.action),
                    operations: plan
                        .operations
                        .iter()
                        .map(ToString::to_string)
                        .collect::<Vec<_>>()
                        .join("; "),
                },
                (None, error) => PlanRow {
                    stage: e.logical_id.clone(),
                    action: "error".red().to_string(),
                    operations: truncate(error.as_deref().unwrap_or_default(), 60),
                },
            })
            .collect();
        output.push_str(&Table::new(rows).to_string());
        output.push('\n');

        if detailed {
            for plan in entries.iter().filter_map(|e| e.plan.as_ref()) {
                if plan.changes.is_empty() {
                    continue;
                }
                let _ = writeln!(output, "\n{}:", plan.stage.to_string().bold());
                for change in &plan.changes {
                    let _ = writeln!(output, "   {change}");
                }
            }
        }

        if !orphans.is_empty() {
            let _ = write!(output, "\n{} To prune:\n", "-".red());
            for id in orphans {
                let _ = writeln!(output, "   - {id}");
            }
        }

        let count = |action: PlanAction| {
            entries
                .iter()
                .filter(|e| e.plan.as_ref().is_some_and(|p| p.action == action))
                .count()
        };
        let _ = write!(
            output,
            "\nPlan: {} to create, {} to update, {} to replace, {} to prune\n",
            count(PlanAction::Create).to_string().green(),
            count(PlanAction::Update).to_string().yellow(),
            count(PlanAction::Replace).to_string().red(),
            orphans.len().to_string().red()
        );
        output
    }

    /// Formats the results of an apply run.
    #[must_use]
    pub fn format_apply(&self, results: &[BatchResult], pruned: &[String]) -> String {
        match self.format {
            OutputFormat::Json => {
                let stages: Vec<serde_json::Value> = results
                    .iter()
                    .map(|r| match &r.result {
                        Ok(outcome) => serde_json::json!({
                            "logical_id": r.logical_id,
                            "stage": r.stage,
                            "success": true,
                            "outcome": outcome,
                        }),
                        Err(e) => serde_json::json!({
                            "logical_id": r.logical_id,
                            "stage": r.stage,
                            "success": false,
                            "error": e.to_string(),
                        }),
                    })
                    .collect();
                to_json(&serde_json::json!({ "stages": stages, "pruned": pruned }))
            }
            OutputFormat::Text => {
                let rows: Vec<ApplyRow> = results
                    .iter()
                    .map(|r| match &r.result {
                        Ok(outcome) => ApplyRow {
                            stage: r.stage.clone(),
                            result: Self::format_action(outcome.plan.action),
                            object: outcome.identity.short_id().to_string(),
                        },
                        Err(e) => ApplyRow {
                            stage: r.stage.clone(),
                            result: "failed".red().to_string(),
                            object: truncate(&e.to_string(), 60),
                        },
                    })
                    .collect();

                let mut output = String::new();
                if !rows.is_empty() {
                    output.push_str(&Table::new(rows).to_string());
                    output.push('\n');
                }
                for id in pruned {
                    let _ = writeln!(output, "{} pruned {id}", "-".red());
                }

                let failed = results.iter().filter(|r| r.result.is_err()).count();
                if failed == 0 {
                    let _ = write!(output, "\n{} Apply complete\n", "✓".green());
                } else {
                    let _ = write!(output, "\n{} {failed} stage(s) failed\n", "✗".red());
                }
                output
            }
        }
    }

    /// Formats drift reports.
    #[must_use]
    pub fn format_drift(&self, reports: &[StageDrift]) -> String {
        match self.format {
            OutputFormat::Json => to_json(&reports),
            OutputFormat::Text => {
                if reports.iter().all(StageDrift::is_converged) {
                    return format!("{} No drift detected.\n", "✓".green());
                }
                let rows: Vec<DriftRow> = reports
                    .iter()
                    .map(|r| DriftRow {
                        stage: r.stage.clone(),
                        status: Self::format_drift_status(r.status),
                        changes: r
                            .changes
                            .iter()
                            .map(|c| c.path.to_string())
                            .collect::<Vec<_>>()
                            .join(", "),
                    })
                    .collect();
                let drifted = reports.iter().filter(|r| !r.is_converged()).count();
                format!(
                    "{} Drift detected:\n\n{}\n\n{drifted}/{} stage(s) differ from the manifest.\n",
                    "⚠".yellow(),
                    Table::new(rows),
                    reports.len()
                )
            }
        }
    }

    /// Formats the reconcile state.
    #[must_use]
    pub fn format_state(&self, state: &ReconcileState) -> String {
        match self.format {
            OutputFormat::Json => to_json(state),
            OutputFormat::Text => {
                let mut output = String::new();
                let _ = writeln!(output, "\nState v{}", state.version);
                let _ = writeln!(output, "   Last updated: {}", state.last_updated);
                let _ = writeln!(output, "   Stages: {}\n", state.stages.len());

                if !state.stages.is_empty() {
                    let hasher = ConfigHasher::new();
                    let rows: Vec<StateRow> = state
                        .stages
                        .iter()
                        .map(|(id, record)| StateRow {
                            logical_id: id.clone(),
                            stage: record.identity.name.to_string(),
                            object: record.identity.short_id().to_string(),
                            last_action: record.last_action.to_string(),
                            hash: hasher.short_hash(&record.config_hash),
                            updated: record.updated_at.format("%Y-%m-%d %H:%M").to_string(),
                        })
                        .collect();
                    output.push_str(&Table::new(rows).to_string());
                    output.push('\n');
                }

                if !state.history.is_empty() {
                    let _ = writeln!(output, "\n   Recent history ({}):", state.history.len());
                    for entry in state.history.iter().rev().take(5) {
                        let status = if entry.success { "✓".green() } else { "✗".red() };
                        let _ = writeln!(
                            output,
                            "     {status} {} - {} ({})",
                            entry.timestamp.format("%Y-%m-%d %H:%M"),
                            entry.operation,
                            entry.stages.join(", ")
                        );
                    }
                }
                output
            }
        }
    }

    fn format_action(action: PlanAction) -> String {
        match action {
            PlanAction::Create => "+create".green().to_string(),
            PlanAction::Update => "~update".yellow().to_string(),
            PlanAction::Replace => "-/+replace".red().to_string(),
            PlanAction::NoOp => "no-op".dimmed().to_string(),
        }
    }

    fn format_drift_status(status: DriftStatus) -> String {
        match status {
            DriftStatus::InSync => status.to_string().green().to_string(),
            DriftStatus::Drifted => status.to_string().yellow().to_string(),
            DriftStatus::Missing => status.to_string().red().to_string(),
            DriftStatus::NotCreated => status.to_string().dimmed().to_string(),
        }
    }
}

fn to_json<T: Serialize + ?Sized>(value: &T) -> String {
    serde_json::to_string_pretty(value).unwrap_or_default()
}

/// Truncates a string to at most `max_len` characters.
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let head: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{head}...")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::QualifiedName;

    #[test]
    fn test_truncate_is_char_safe() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("ééééééééééé", 6), "ééé...");
    }

    #[test]
    fn test_plan_json_contains_operations() {
        let formatter = OutputFormatter::new(OutputFormat::Json);
        let entries = vec![PlanEntry {
            logical_id: String::from("db.sc.st"),
            plan: Some(StagePlan::create(QualifiedName::new("DB", "SC", "ST"))),
            error: None,
            edited: None,
        }];
        let json: serde_json::Value =
            serde_json::from_str(&formatter.format_plans(&entries, &[], false)).unwrap();
        assert_eq!(json["stages"][0]["plan"]["action"], "create");
        assert_eq!(json["stages"][0]["plan"]["operations"][0]["op"], "create");
    }

    #[test]
    fn test_empty_plan_text() {
        colored::control::set_override(false);
        let formatter = OutputFormatter::new(OutputFormat::Text);
        let out = formatter.format_plans(&[], &[], false);
        assert!(out.contains("No changes"));
    }
}
