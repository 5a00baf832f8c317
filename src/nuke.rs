//! Run orchestration
//!
//! A run has two phases. [`inspect`] walks every selected resource type in
//! every scope (registry order, regions first, the global scope once at the
//! end), lists candidates, resolves first-seen times, applies the filter and
//! the permission verifier. [`execute`] then hands the surviving identifiers of
//! each type to its deletion strategy, one type at a time, in the same order.

use crate::config::NukeConfig;
use crate::error::NukeError;
use crate::filter::FilterRule;
use crate::report::{Outcome, Report};
use crate::resource::{Candidate, Registry, ResourceType, Scope};
use futures::stream::{self, StreamExt};
use std::collections::HashSet;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Identifiers of one resource type in one scope that passed every check
pub struct PlanEntry {
    pub resource: Box<dyn ResourceType>,
    pub targets: Vec<String>,
}

impl PlanEntry {
    pub fn type_name(&self) -> &str {
        self.resource.type_name()
    }

    pub fn scope(&self) -> Scope {
        self.resource.scope().cloned().unwrap_or_else(Scope::global)
    }
}

/// Outcome of the inspection phase
pub struct Plan {
    pub entries: Vec<PlanEntry>,
    /// Skips and type-level errors found while inspecting
    pub report: Report,
}

impl Plan {
    pub fn target_count(&self) -> usize {
        self.entries.iter().map(|e| e.targets.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.target_count() == 0
    }

    /// Report of what a real run would delete
    pub fn planned_report(&self) -> Report {
        let mut report = self.report.clone();
        for entry in &self.entries {
            let scope = entry.scope();
            for id in &entry.targets {
                report.record(entry.type_name(), &scope, id, Outcome::Planned);
            }
        }
        report
    }
}

/// Regions in the order given (duplicates dropped), then the global scope.
pub fn build_scopes(regions: &[String]) -> Vec<Scope> {
    let mut seen = HashSet::new();
    regions
        .iter()
        .filter(|r| seen.insert(r.as_str()))
        .map(Scope::region)
        .chain(std::iter::once(Scope::global()))
        .collect()
}

/// List, filter and permission-check every selected resource type.
pub async fn inspect(
    registry: &Registry,
    scopes: &[Scope],
    config: &NukeConfig,
    cancel: &CancellationToken,
) -> Plan {
    let mut plan = Plan {
        entries: Vec::new(),
        report: Report::new(),
    };

    for scope in scopes {
        for resource in registry.instantiate(scope) {
            if cancel.is_cancelled() {
                plan.report
                    .record_type_error(resource.type_name(), scope, NukeError::Cancelled);
                continue;
            }
            if let Some(entry) =
                inspect_type(resource, scope, config, cancel, &mut plan.report).await
            {
                plan.entries.push(entry);
            }
        }
    }

    info!(
        types = plan.entries.len(),
        targets = plan.target_count(),
        "Inspection complete"
    );
    plan
}

async fn inspect_type(
    resource: Box<dyn ResourceType>,
    scope: &Scope,
    config: &NukeConfig,
    cancel: &CancellationToken,
    report: &mut Report,
) -> Option<PlanEntry> {
    let type_name = resource.type_name().to_string();

    if let Err(e) = resource.init(scope.clone(), cancel.clone()).await {
        warn!(type_name = %type_name, region = %scope, error = %e, "Failed to initialize client");
        report.record_type_error(&type_name, scope, e);
        return None;
    }

    let filter = Arc::new(resource.filter_rule(config));

    let candidates = match resource.list(filter.clone()).await {
        Ok(candidates) => candidates,
        Err(e) => {
            warn!(type_name = %type_name, region = %scope, error = %e, "Failed to list resources");
            report.record_type_error(&type_name, scope, e);
            return None;
        }
    };
    debug!(type_name = %type_name, region = %scope, count = candidates.len(), "Listed candidates");

    let parallelism = resource.batch_size().max(1);
    let included = filter_candidates(resource.as_ref(), &filter, candidates, parallelism, scope, report).await;
    let targets = verify_permissions(resource.as_ref(), included, parallelism, scope, report).await;

    if !targets.is_empty() {
        info!(type_name = %type_name, region = %scope, count = targets.len(), "Found resources to nuke");
    }

    Some(PlanEntry { resource, targets })
}

/// Resolve first-seen times and apply the filter. Candidates whose first-seen
/// marker cannot be established are left out of the run entirely.
async fn filter_candidates(
    resource: &dyn ResourceType,
    filter: &FilterRule,
    candidates: Vec<Candidate>,
    parallelism: usize,
    scope: &Scope,
    report: &mut Report,
) -> Vec<String> {
    let resolved: Vec<_> = stream::iter(candidates)
        .map(|candidate| async move {
            let first_seen = resource.first_seen(&candidate).await;
            (candidate, first_seen)
        })
        .buffered(parallelism)
        .collect()
        .await;

    let mut included = Vec::new();
    for (candidate, first_seen) in resolved {
        let time = match first_seen {
            None => None,
            Some(Ok(time)) => Some(time),
            Some(Err(e)) => {
                warn!(
                    type_name = %resource.type_name(),
                    identifier = %candidate.identifier,
                    error = %e,
                    "Skipping resource, first-seen time unavailable"
                );
                continue;
            }
        };

        if filter.should_include(&candidate.to_value(time)) {
            included.push(candidate.identifier);
        } else {
            report.record(
                resource.type_name(),
                scope,
                &candidate.identifier,
                Outcome::SkippedFiltered,
            );
        }
    }
    included
}

async fn verify_permissions(
    resource: &dyn ResourceType,
    identifiers: Vec<String>,
    parallelism: usize,
    scope: &Scope,
    report: &mut Report,
) -> Vec<String> {
    let checked: Vec<_> = stream::iter(identifiers)
        .map(|id| async move {
            let verdict = resource.verify_permission(&id).await;
            (id, verdict)
        })
        .buffered(parallelism)
        .collect()
        .await;

    let mut allowed = Vec::new();
    for (id, verdict) in checked {
        match verdict {
            None | Some(Ok(())) => allowed.push(id),
            Some(Err(e)) => {
                debug!(type_name = %resource.type_name(), identifier = %id, error = %e, "Permission check failed");
                report.record(resource.type_name(), scope, &id, Outcome::SkippedPermission(e));
            }
        }
    }
    allowed
}

/// Delete every planned identifier, one resource type at a time.
pub async fn execute(plan: Plan, cancel: &CancellationToken) -> Report {
    let Plan {
        entries,
        mut report,
    } = plan;

    for entry in entries {
        if entry.targets.is_empty() {
            continue;
        }

        let type_name = entry.type_name().to_string();
        let scope = entry.scope();
        if cancel.is_cancelled() {
            warn!(type_name = %type_name, region = %scope, "Run cancelled, not nuking");
        } else {
            info!(type_name = %type_name, region = %scope, count = entry.targets.len(), "Nuking resources");
        }

        let outcome = entry.resource.nuke(&entry.targets).await;
        let failed = outcome.results.iter().filter(|r| !r.is_ok()).count();
        info!(
            type_name = %type_name,
            region = %scope,
            deleted = outcome.results.len() - failed,
            failed,
            "Finished nuking"
        );
        report.record_outcome(&type_name, &scope, outcome);
    }

    report
}

/// Inspect then, unless `dry_run`, execute.
pub async fn run(
    registry: &Registry,
    scopes: &[Scope],
    config: &NukeConfig,
    cancel: &CancellationToken,
    dry_run: bool,
) -> Report {
    let plan = inspect(registry, scopes, config, cancel).await;
    if dry_run {
        plan.planned_report()
    } else {
        execute(plan, cancel).await
    }
}
