//! Output formatting for CLI commands.
//!
//! This module provides formatting utilities for displaying
//! information to the user in various formats.

use colored::Colorize;
use serde::Serialize;
use std::fmt::Write;
use tabled::{Table, Tabled};

use crate::config::{ConfigHasher, SyncConfig, ValidationResult};
use crate::model::{format_members, MemberSet};
use crate::planner::{AssignmentPlan, Phase};
use crate::reconciler::{DriftReport, ReconcileSummary};
use crate::state::{LockInfo, SyncState};

use super::commands::OutputFormat;

/// Output formatter for CLI.
#[derive(Debug)]
pub struct OutputFormatter {
    /// Output format.
    format: OutputFormat,
}

/// Plan step row for table display.
#[derive(Tabled)]
struct PlanStepRow {
    #[tabled(rename = "Grouping")]
    grouping: String,
    #[tabled(rename = "#")]
    index: usize,
    #[tabled(rename = "Action")]
    action: String,
    #[tabled(rename = "Members")]
    members: String,
}

/// Recorded grouping row for table display.
#[derive(Tabled)]
struct StatusRow {
    #[tabled(rename = "Grouping")]
    name: String,
    #[tabled(rename = "Kind")]
    kind: String,
    #[tabled(rename = "Members")]
    members: usize,
    #[tabled(rename = "Hash")]
    hash: String,
    #[tabled(rename = "Last reconciled")]
    last_reconciled: String,
    #[tabled(rename = "Last run")]
    last_run: String,
}

/// Drift row for table display.
#[derive(Tabled)]
struct DriftRow {
    #[tabled(rename = "Grouping")]
    grouping: String,
    #[tabled(rename = "Missing")]
    missing: String,
    #[tabled(rename = "Unexpected")]
    unexpected: String,
    #[tabled(rename = "Declaration")]
    declaration: String,
}

impl OutputFormatter {
    /// Creates a new output formatter.
    #[must_use]
    pub const fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    /// Formats assignment plans for display.
    #[must_use]
    pub fn format_plans(&self, plans: &[AssignmentPlan]) -> String {
        match self.format {
            OutputFormat::Json => to_json(&plans),
            OutputFormat::Text => Self::format_plans_text(plans),
        }
    }

    fn format_plans_text(plans: &[AssignmentPlan]) -> String {
        if plans.iter().all(AssignmentPlan::is_empty) {
            return format!(
                "{} No changes required - every grouping matches its declaration.\n",
                "✓".green()
            );
        }

        let mut output = String::from("\nMembership Plan\n\n");

        let rows: Vec<PlanStepRow> = plans
            .iter()
            .flat_map(|plan| {
                plan.effective_steps().enumerate().map(|(i, step)| PlanStepRow {
                    grouping: plan.grouping.name.clone(),
                    index: i + 1,
                    action: Self::format_phase(step.phase),
                    members: Self::truncate(&format_members(&step.members), 60),
                })
            })
            .collect();

        output.push_str(&Table::new(rows).to_string());
        output.push('\n');

        let to_add: usize = plans.iter().map(|p| p.diff.to_add.len()).sum();
        let to_remove: usize = plans.iter().map(|p| p.diff.to_remove.len()).sum();
        let calls: usize = plans.iter().map(AssignmentPlan::call_count).sum();
        let unchanged = plans.iter().filter(|p| p.is_empty()).count();

        let _ = writeln!(
            output,
            "\nPlan: {} to add, {} to remove in {} call(s); {} grouping(s) unchanged",
            to_add.to_string().green(),
            to_remove.to_string().red(),
            calls,
            unchanged
        );

        output
    }

    /// Formats the outcome of an apply or destroy run.
    #[must_use]
    pub fn format_summary(&self, summary: &ReconcileSummary) -> String {
        match self.format {
            OutputFormat::Json => to_json(summary),
            OutputFormat::Text => {
                let mut output = String::new();

                for result in &summary.results {
                    let mark = if result.changed() { "✓".green() } else { "=".dimmed() };
                    let _ = writeln!(output, "{mark} {result}");
                }

                for failure in &summary.failures {
                    let hint = if failure.retryable { " (retryable)" } else { "" };
                    let _ = writeln!(output, "{} {}: {}{hint}", "✗".red(), failure.grouping, failure.error);
                }

                for skipped in &summary.skipped {
                    let _ = writeln!(output, "{} {skipped}: skipped", "-".dimmed());
                }

                let status = if summary.is_success() {
                    "converged".green().to_string()
                } else {
                    "incomplete".red().to_string()
                };
                let _ = writeln!(
                    output,
                    "\nReconciliation {status}: {} converged, {} failed, {} skipped",
                    summary.results.len(),
                    summary.failures.len(),
                    summary.skipped.len()
                );

                output
            }
        }
    }

    /// Formats a drift report.
    #[must_use]
    pub fn format_drift(&self, report: &DriftReport) -> String {
        match self.format {
            OutputFormat::Json => to_json(report),
            OutputFormat::Text => {
                if report.is_converged() {
                    return format!("{} No drift detected - state is converged.\n", "✓".green());
                }

                let rows: Vec<DriftRow> = report
                    .groupings
                    .iter()
                    .filter(|d| d.has_drift())
                    .map(|d| DriftRow {
                        grouping: d.grouping.clone(),
                        missing: Self::format_set(&d.missing),
                        unexpected: Self::format_set(&d.unexpected),
                        declaration: if d.never_applied {
                            String::from("never applied")
                        } else if d.desired_changed {
                            String::from("changed")
                        } else {
                            String::from("unchanged")
                        },
                    })
                    .collect();

                let drifted = rows.len();
                let mut output = format!("{} Drift detected:\n\n", "⚠".yellow());
                output.push_str(&Table::new(rows).to_string());
                let _ = writeln!(
                    output,
                    "\n\n{drifted}/{} grouping(s) have drifted.",
                    report.groupings.len()
                );
                output
            }
        }
    }

    /// Formats the recorded membership of each grouping.
    #[must_use]
    pub fn format_status(&self, state: &SyncState) -> String {
        match self.format {
            OutputFormat::Json => to_json(state),
            OutputFormat::Text => {
                if state.groupings.is_empty() {
                    return String::from("No groupings have been reconciled yet.\n");
                }

                let hasher = ConfigHasher::new();
                let rows: Vec<StatusRow> = state
                    .groupings
                    .iter()
                    .map(|(name, record)| StatusRow {
                        name: name.clone(),
                        kind: record.kind.to_string(),
                        members: record.members.len(),
                        hash: hasher.short_hash(&record.membership_hash),
                        last_reconciled: record.last_reconciled.map_or_else(
                            || String::from("never"),
                            |t| t.format("%Y-%m-%d %H:%M").to_string(),
                        ),
                        last_run: match record.last_entry() {
                            Some(entry) if entry.success => "ok".green().to_string(),
                            Some(_) => "failed".red().to_string(),
                            None => String::from("-"),
                        },
                    })
                    .collect();

                let mut output = Table::new(rows).to_string();
                output.push('\n');
                output
            }
        }
    }

    /// Formats the full local state, including history.
    #[must_use]
    pub fn format_state(&self, state: &SyncState) -> String {
        match self.format {
            OutputFormat::Json => to_json(state),
            OutputFormat::Text => {
                let mut output = String::from("\nState\n\n");

                let _ = writeln!(output, "   Version: {}", state.version);
                let _ = writeln!(output, "   Last updated: {}", state.last_updated);
                let _ = writeln!(output, "   Groupings: {}", state.groupings.len());

                for (name, record) in &state.groupings {
                    let _ = writeln!(output, "\n   {name} ({} {})", record.kind, record.id);
                    let _ = writeln!(output, "     Members: {}", Self::format_set(&record.members));

                    if !record.history.is_empty() {
                        let _ = writeln!(output, "     Recent history ({}):", record.history.len());
                        for entry in record.history.iter().rev().take(5) {
                            let status = if entry.success { "✓".green() } else { "✗".red() };
                            let _ = write!(
                                output,
                                "       {status} {} +{} -{}",
                                entry.timestamp.format("%Y-%m-%d %H:%M"),
                                entry.added,
                                entry.removed
                            );
                            if let Some(error) = &entry.error {
                                let _ = write!(output, " {}", Self::truncate(error, 80));
                            }
                            output.push('\n');
                        }
                    }
                }

                output
            }
        }
    }

    /// Formats a validation result.
    #[must_use]
    pub fn format_validation(
        &self,
        config: &SyncConfig,
        result: &ValidationResult,
        show_warnings: bool,
    ) -> String {
        match self.format {
            OutputFormat::Json => to_json(&ValidationJson {
                valid: result.is_valid(),
                errors: result.errors.iter().map(ToString::to_string).collect(),
                warnings: result.warnings.clone(),
                groupings: config.grouping_names().into_iter().map(String::from).collect(),
            }),
            OutputFormat::Text => {
                let mut output = String::new();

                if result.is_valid() {
                    let _ = writeln!(output, "{} Configuration is valid!", "✓".green());
                } else {
                    let _ = writeln!(
                        output,
                        "{} Configuration has {} error(s):",
                        "✗".red(),
                        result.error_count()
                    );
                    for error in &result.errors {
                        let _ = writeln!(output, "  - {error}");
                    }
                }

                if show_warnings && result.warning_count() > 0 {
                    let _ = writeln!(output, "\n{} Warnings:", "⚠".yellow());
                    for warning in &result.warnings {
                        let _ = writeln!(output, "  - {warning}");
                    }
                }

                let _ = writeln!(output, "\nConfiguration summary:");
                let _ = writeln!(output, "  Endpoint: {}", config.service.endpoint);
                let _ = writeln!(output, "  Groupings: {}", config.groupings.len());
                let members: usize = config.groupings.iter().map(|g| g.desired_members().len()).sum();
                let _ = writeln!(output, "  Declared members: {members}");

                output
            }
        }
    }

    /// Formats lock information.
    #[must_use]
    pub fn format_lock(&self, lock: &LockInfo) -> String {
        match self.format {
            OutputFormat::Json => to_json(lock),
            OutputFormat::Text => format!("State locked: {lock}\n"),
        }
    }

    /// Formats a success message.
    #[must_use]
    pub fn success(&self, message: &str) -> String {
        self.message("success", &"✓".green(), message)
    }

    /// Formats a warning message.
    #[must_use]
    pub fn warning(&self, message: &str) -> String {
        self.message("warning", &"⚠".yellow(), message)
    }

    fn message(&self, status: &str, mark: &colored::ColoredString, message: &str) -> String {
        match self.format {
            OutputFormat::Json => to_json(&serde_json::json!({ "status": status, "message": message })),
            OutputFormat::Text => format!("{mark} {message}\n"),
        }
    }

    /// Formats a plan phase with color.
    fn format_phase(phase: Phase) -> String {
        match phase {
            Phase::Add => "+add".green().to_string(),
            Phase::Remove => "-remove".red().to_string(),
        }
    }

    fn format_set(members: &MemberSet) -> String {
        if members.is_empty() {
            String::from("-")
        } else {
            Self::truncate(&format_members(members), 60)
        }
    }

    /// Truncates a string to a maximum number of characters.
    fn truncate(s: &str, max_len: usize) -> String {
        if s.chars().count() <= max_len {
            s.to_string()
        } else {
            let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
            format!("{kept}...")
        }
    }
}

fn to_json<T: Serialize + ?Sized>(value: &T) -> String {
    let mut json = serde_json::to_string_pretty(value).unwrap_or_default();
    json.push('\n');
    json
}

// JSON serialization helpers

#[derive(Serialize)]
struct ValidationJson {
    valid: bool,
    errors: Vec<String>,
    warnings: Vec<String>,
    groupings: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{member_set, Grouping, GroupingKind};
    use crate::planner::{MembershipDiff, OrderingPolicy};
    use crate::state::HistoryEntry;
    use std::collections::BTreeMap;

    fn plan() -> AssignmentPlan {
        let grouping = Grouping::new("gold", GroupingKind::SlaDomain, "sla-1");
        let diff = MembershipDiff::compute(&member_set(["B", "C"]), &member_set(["A", "B"]));
        OrderingPolicy::for_kind(grouping.kind, &BTreeMap::new())
            .order(&grouping, diff)
            .unwrap()
    }

    #[test]
    fn test_plan_text_lists_steps() {
        let output = OutputFormatter::new(OutputFormat::Text).format_plans(&[plan()]);
        assert!(output.contains("gold"));
        assert!(output.contains("in 2 call(s)"));
    }

    #[test]
    fn test_plan_json() {
        let output = OutputFormatter::new(OutputFormat::Json).format_plans(&[plan()]);
        let value: serde_json::Value = serde_json::from_str(&output).unwrap();
        assert_eq!(value[0]["steps"][0]["phase"], "ADD");
        assert_eq!(value[0]["steps"][1]["members"][0], "C");
    }

    #[test]
    fn test_status_text() {
        let mut state = SyncState::new();
        state.record_success(
            &Grouping::new("gold", GroupingKind::SlaDomain, "sla-1"),
            member_set(["A"]),
            String::from("abcdef1234567890"),
            HistoryEntry::success(1, 0),
        );

        let output = OutputFormatter::new(OutputFormat::Text).format_status(&state);
        assert!(output.contains("abcdef12"));
        assert!(output.contains("SLA_DOMAIN"));
    }

    #[test]
    fn test_truncate_is_char_safe() {
        assert_eq!(OutputFormatter::truncate("short", 10), "short");
        assert_eq!(OutputFormatter::truncate("ééééééé", 5), "éé...");
    }
}
