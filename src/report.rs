//! Result/Report Aggregator
//!
//! Collects one outcome per identifier across every resource type and scope,
//! plus the type-level errors (client init, listing, collective wait) that do
//! not belong to any single identifier.

use crate::error::NukeError;
use crate::resource::{NukeOutcome, Scope};
use std::fmt::Write as _;

/// Appended to failures that are likely to succeed on a rerun
const TRANSIENT_HINT: &str = " [transient, rerun to retry]";

/// Final state of one identifier
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Deleted,
    Failed(NukeError),
    SkippedPermission(NukeError),
    SkippedFiltered,
    /// Would be deleted; produced by inspect / dry-run
    Planned,
}

impl Outcome {
    pub fn label(&self) -> &'static str {
        match self {
            Outcome::Deleted => "deleted",
            Outcome::Failed(_) => "failed",
            Outcome::SkippedPermission(_) => "skipped-permission",
            Outcome::SkippedFiltered => "skipped-filtered",
            Outcome::Planned => "planned",
        }
    }

    fn reason(&self) -> Option<&NukeError> {
        match self {
            Outcome::Failed(e) | Outcome::SkippedPermission(e) => Some(e),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportEntry {
    pub type_name: String,
    pub region: String,
    pub identifier: String,
    pub outcome: Outcome,
}

/// Failure affecting a whole resource type in one scope
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeError {
    pub type_name: String,
    pub region: String,
    pub error: NukeError,
}

/// Per-outcome counts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Summary {
    pub deleted: usize,
    pub failed: usize,
    pub skipped_permission: usize,
    pub skipped_filtered: usize,
    pub planned: usize,
    pub type_errors: usize,
}

#[derive(Debug, Clone, Default)]
pub struct Report {
    entries: Vec<ReportEntry>,
    type_errors: Vec<TypeError>,
}

impl Report {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, type_name: &str, scope: &Scope, identifier: &str, outcome: Outcome) {
        self.entries.push(ReportEntry {
            type_name: type_name.to_string(),
            region: scope.region.clone(),
            identifier: identifier.to_string(),
            outcome,
        });
    }

    /// Record everything a nuker returned
    pub fn record_outcome(&mut self, type_name: &str, scope: &Scope, outcome: NukeOutcome) {
        for result in outcome.results {
            let state = match result.error {
                None => Outcome::Deleted,
                Some(e) => Outcome::Failed(e),
            };
            self.record(type_name, scope, &result.identifier, state);
        }
        if let Some(error) = outcome.error {
            self.record_type_error(type_name, scope, error);
        }
    }

    pub fn record_type_error(&mut self, type_name: &str, scope: &Scope, error: NukeError) {
        self.type_errors.push(TypeError {
            type_name: type_name.to_string(),
            region: scope.region.clone(),
            error,
        });
    }

    pub fn entries(&self) -> &[ReportEntry] {
        &self.entries
    }

    pub fn type_errors(&self) -> &[TypeError] {
        &self.type_errors
    }

    /// Latest outcome recorded for an identifier
    pub fn outcome_for(&self, type_name: &str, identifier: &str) -> Option<&Outcome> {
        self.entries
            .iter()
            .rev()
            .find(|e| e.type_name == type_name && e.identifier == identifier)
            .map(|e| &e.outcome)
    }

    pub fn summary(&self) -> Summary {
        let mut summary = Summary {
            type_errors: self.type_errors.len(),
            ..Default::default()
        };
        for entry in &self.entries {
            match entry.outcome {
                Outcome::Deleted => summary.deleted += 1,
                Outcome::Failed(_) => summary.failed += 1,
                Outcome::SkippedPermission(_) => summary.skipped_permission += 1,
                Outcome::SkippedFiltered => summary.skipped_filtered += 1,
                Outcome::Planned => summary.planned += 1,
            }
        }
        summary
    }

    /// Failures decide the exit status; skips never do.
    pub fn has_failures(&self) -> bool {
        let summary = self.summary();
        summary.failed > 0 || summary.type_errors > 0
    }

    /// Plain-text table for the terminal. Filtered-out identifiers are
    /// counted in the summary but only listed when `verbose` is set.
    pub fn render(&self, verbose: bool) -> String {
        let rows: Vec<&ReportEntry> = self
            .entries
            .iter()
            .filter(|e| verbose || e.outcome != Outcome::SkippedFiltered)
            .collect();

        let mut out = String::new();

        if !rows.is_empty() {
            let type_width = column_width("TYPE", rows.iter().map(|e| e.type_name.as_str()));
            let region_width = column_width("REGION", rows.iter().map(|e| e.region.as_str()));
            let id_width = column_width("IDENTIFIER", rows.iter().map(|e| e.identifier.as_str()));

            let _ = writeln!(
                out,
                "{:<type_width$}  {:<region_width$}  {:<id_width$}  STATUS",
                "TYPE", "REGION", "IDENTIFIER"
            );
            for entry in rows {
                let _ = write!(
                    out,
                    "{:<type_width$}  {:<region_width$}  {:<id_width$}  {}",
                    entry.type_name,
                    entry.region,
                    entry.identifier,
                    entry.outcome.label()
                );
                if let Some(reason) = entry.outcome.reason() {
                    let _ = write!(out, " ({reason})");
                    if reason.is_transient() {
                        out.push_str(TRANSIENT_HINT);
                    }
                }
                out.push('\n');
            }
        }

        for error in &self.type_errors {
            let _ = write!(
                out,
                "error: {} in {}: {}",
                error.type_name, error.region, error.error
            );
            if error.error.is_transient() {
                out.push_str(TRANSIENT_HINT);
            }
            out.push('\n');
        }

        let s = self.summary();
        let _ = writeln!(
            out,
            "{} deleted, {} failed, {} skipped (permission), {} skipped (filtered), {} planned, {} type errors",
            s.deleted, s.failed, s.skipped_permission, s.skipped_filtered, s.planned, s.type_errors
        );
        out
    }
}

fn column_width<'a>(header: &str, values: impl Iterator<Item = &'a str>) -> usize {
    values.map(str::len).max().unwrap_or(0).max(header.len())
}
