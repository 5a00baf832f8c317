//! Engine tests against an in-memory cloud
//!
//! Resource types here are built from the same `Resource` descriptor the GCP
//! bindings use, backed by a shared fake instead of HTTP calls.

use cloud_nuke::config::NukeConfig;
use cloud_nuke::error::NukeError;
use cloud_nuke::nuke::{self, build_scopes};
use cloud_nuke::report::Outcome;
use cloud_nuke::resource::{
    CallContext, Candidate, DeletionStrategy, Registry, Resource, ResourceType, Scope,
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;

#[derive(Default)]
struct State {
    /// (type, region) -> identifiers present
    resources: HashMap<(String, String), Vec<String>>,
    /// (type, region) in call order
    listed: Vec<(String, String)>,
    /// (type, identifier) in delete order
    deleted: Vec<(String, String)>,
}

#[derive(Clone, Default)]
struct Cloud(Arc<Mutex<State>>);

impl Cloud {
    fn with(self, type_name: &str, region: &str, ids: &[&str]) -> Self {
        self.0.lock().unwrap().resources.insert(
            (type_name.to_string(), region.to_string()),
            ids.iter().map(|s| s.to_string()).collect(),
        );
        self
    }

    fn list(&self, type_name: &str, scope: &Scope) -> anyhow::Result<Vec<Candidate>> {
        let mut state = self.0.lock().unwrap();
        state.listed.push((type_name.to_string(), scope.region.clone()));
        if type_name == "broken" {
            anyhow::bail!("listing unavailable");
        }
        Ok(state
            .resources
            .get(&(type_name.to_string(), scope.region.clone()))
            .map(|ids| ids.iter().map(Candidate::new).collect())
            .unwrap_or_default())
    }

    fn delete(&self, type_name: &str, id: &str) -> anyhow::Result<()> {
        if id.starts_with("stuck-") {
            return Err(NukeError::Api {
                status: 400,
                message: "resource in use".to_string(),
            }
            .into());
        }
        self.0
            .lock()
            .unwrap()
            .deleted
            .push((type_name.to_string(), id.to_string()));
        Ok(())
    }

    fn listed(&self) -> Vec<(String, String)> {
        self.0.lock().unwrap().listed.clone()
    }

    fn deleted(&self) -> Vec<(String, String)> {
        self.0.lock().unwrap().deleted.clone()
    }
}

fn fake_type(cloud: Cloud, type_name: &'static str, global: bool) -> Resource<Cloud> {
    let resource = Resource::new(
        type_name,
        move |_scope: Scope| {
            let cloud = cloud.clone();
            async move { Ok::<_, anyhow::Error>(cloud) }
        },
        |ctx: CallContext<Cloud>, _filter| async move { ctx.client.list(&ctx.type_name, &ctx.scope) },
        DeletionStrategy::simple_batch(|ctx: CallContext<Cloud>, id: String| async move {
            ctx.client.delete(&ctx.type_name, &id)
        }),
    );
    if global {
        resource.global()
    } else {
        resource
    }
}

/// Denies ids starting with `locked-`
fn with_verifier(resource: Resource<Cloud>) -> Resource<Cloud> {
    resource.with_permission_verifier(|_ctx: CallContext<Cloud>, id: String| async move {
        if id.starts_with("locked-") {
            Err(anyhow::Error::from(NukeError::PermissionDenied(format!(
                "cannot delete {}",
                id
            ))))
        } else {
            Ok(())
        }
    })
}

fn registry(cloud: &Cloud, types: &[(&'static str, bool)]) -> Registry {
    let mut registry = Registry::new();
    for &(type_name, global) in types {
        let cloud = cloud.clone();
        registry
            .register(move || Box::new(fake_type(cloud.clone(), type_name, global)) as Box<dyn ResourceType>)
            .unwrap();
    }
    registry
}

fn regions(names: &[&str]) -> Vec<Scope> {
    build_scopes(&names.iter().map(|s| s.to_string()).collect::<Vec<_>>())
}

#[tokio::test]
async fn global_types_listed_once_after_regions() {
    let cloud = Cloud::default();
    let registry = registry(&cloud, &[("disks", false), ("buckets", true)]);

    nuke::run(
        &registry,
        &regions(&["us-east1", "europe-west1"]),
        &NukeConfig::default(),
        &CancellationToken::new(),
        true,
    )
    .await;

    let listed = cloud.listed();
    assert_eq!(
        listed,
        vec![
            ("disks".to_string(), "us-east1".to_string()),
            ("disks".to_string(), "europe-west1".to_string()),
            ("buckets".to_string(), "global".to_string()),
        ]
    );
}

#[tokio::test]
async fn types_are_nuked_in_registry_order() {
    let cloud = Cloud::default()
        .with("instances", "us-east1", &["vm-1", "vm-2"])
        .with("disks", "us-east1", &["disk-1"])
        .with("networks", "global", &["net-1"]);
    let registry = registry(
        &cloud,
        &[("instances", false), ("disks", false), ("networks", true)],
    );

    let report = nuke::run(
        &registry,
        &regions(&["us-east1"]),
        &NukeConfig::default(),
        &CancellationToken::new(),
        false,
    )
    .await;

    let types: Vec<String> = cloud.deleted().into_iter().map(|(t, _)| t).collect();
    assert_eq!(types, vec!["instances", "instances", "disks", "networks"]);
    assert_eq!(report.summary().deleted, 4);
    assert!(!report.has_failures());
}

#[tokio::test]
async fn selection_keeps_registry_order() {
    let cloud = Cloud::default();
    let registry = registry(
        &cloud,
        &[("instances", false), ("disks", false), ("networks", true)],
    );

    let selected = registry
        .select(&["networks".to_string(), "instances".to_string()], &[])
        .unwrap();
    assert_eq!(selected.type_names(), vec!["instances", "networks"]);

    let err = registry.select(&["vms".to_string()], &[]).unwrap_err();
    assert!(err.to_string().contains("vms"));
}

#[tokio::test]
async fn permission_denied_is_skipped_not_deleted() {
    let cloud = Cloud::default().with("instances", "us-east1", &["vm-1", "locked-vm"]);
    let c = cloud.clone();
    let mut registry = Registry::new();
    registry
        .register(move || Box::new(with_verifier(fake_type(c.clone(), "instances", false))) as Box<dyn ResourceType>)
        .unwrap();

    let report = nuke::run(
        &registry,
        &regions(&["us-east1"]),
        &NukeConfig::default(),
        &CancellationToken::new(),
        false,
    )
    .await;

    assert_eq!(cloud.deleted(), vec![("instances".to_string(), "vm-1".to_string())]);
    assert!(matches!(
        report.outcome_for("instances", "locked-vm"),
        Some(Outcome::SkippedPermission(NukeError::PermissionDenied(_)))
    ));
    assert!(!report.has_failures());
}

#[tokio::test]
async fn filtered_candidates_are_reported_and_kept() {
    let cloud = Cloud::default().with("disks", "us-east1", &["keep-disk", "ci-disk"]);
    let registry = registry(&cloud, &[("disks", false)]);
    let config = NukeConfig::from_yaml_str("disks:\n  exclude:\n    names_regex: [\"^keep-\"]\n").unwrap();

    let report = nuke::run(
        &registry,
        &regions(&["us-east1"]),
        &config,
        &CancellationToken::new(),
        false,
    )
    .await;

    assert_eq!(cloud.deleted(), vec![("disks".to_string(), "ci-disk".to_string())]);
    assert_eq!(report.outcome_for("disks", "keep-disk"), Some(&Outcome::SkippedFiltered));
    assert_eq!(report.outcome_for("disks", "ci-disk"), Some(&Outcome::Deleted));

    // Filtered rows only show up in verbose output
    assert!(!report.render(false).contains("keep-disk"));
    assert!(report.render(true).contains("keep-disk"));
}

#[tokio::test]
async fn listing_failure_does_not_stop_other_types() {
    let cloud = Cloud::default().with("disks", "us-east1", &["disk-1"]);
    let registry = registry(&cloud, &[("broken", false), ("disks", false)]);

    let report = nuke::run(
        &registry,
        &regions(&["us-east1"]),
        &NukeConfig::default(),
        &CancellationToken::new(),
        false,
    )
    .await;

    assert_eq!(cloud.deleted(), vec![("disks".to_string(), "disk-1".to_string())]);
    assert_eq!(report.type_errors().len(), 1);
    assert_eq!(report.type_errors()[0].type_name, "broken");
    assert!(report.has_failures());
}

#[tokio::test]
async fn dry_run_plans_without_deleting() {
    let cloud = Cloud::default()
        .with("disks", "us-east1", &["disk-1", "disk-2"])
        .with("buckets", "global", &["bucket-1"]);
    let registry = registry(&cloud, &[("disks", false), ("buckets", true)]);

    let report = nuke::run(
        &registry,
        &regions(&["us-east1"]),
        &NukeConfig::default(),
        &CancellationToken::new(),
        true,
    )
    .await;

    assert!(cloud.deleted().is_empty());
    assert_eq!(report.summary().planned, 3);
    assert_eq!(report.outcome_for("buckets", "bucket-1"), Some(&Outcome::Planned));
    assert!(!report.has_failures());
}

#[tokio::test]
async fn delete_failure_is_recorded_per_identifier() {
    let cloud = Cloud::default().with("disks", "us-east1", &["disk-1", "stuck-disk"]);
    let registry = registry(&cloud, &[("disks", false)]);

    let report = nuke::run(
        &registry,
        &regions(&["us-east1"]),
        &NukeConfig::default(),
        &CancellationToken::new(),
        false,
    )
    .await;

    assert_eq!(report.outcome_for("disks", "disk-1"), Some(&Outcome::Deleted));
    assert!(matches!(
        report.outcome_for("disks", "stuck-disk"),
        Some(Outcome::Failed(NukeError::Api { status: 400, .. }))
    ));
    assert_eq!(report.summary().failed, 1);
    assert!(report.has_failures());
}

#[tokio::test]
async fn untaggable_candidate_is_left_out_of_the_run() {
    let cloud = Cloud::default().with("topics", "global", &["topic-1", "untaggable-topic"]);
    let c = cloud.clone();
    let mut registry = Registry::new();
    registry
        .register(move || {
            let resource = fake_type(c.clone(), "topics", true).with_first_seen(
                |_ctx: CallContext<Cloud>, id: String, _tags| async move {
                    if id.starts_with("untaggable-") {
                        anyhow::bail!("labels are read-only");
                    }
                    Ok(())
                },
            );
            Box::new(resource) as Box<dyn ResourceType>
        })
        .unwrap();

    let report = nuke::run(
        &registry,
        &regions(&[]),
        &NukeConfig::default(),
        &CancellationToken::new(),
        false,
    )
    .await;

    assert_eq!(cloud.deleted(), vec![("topics".to_string(), "topic-1".to_string())]);
    assert!(report.entries().iter().all(|e| e.identifier != "untaggable-topic"));
    assert!(!report.has_failures());
}

#[tokio::test]
async fn cancelled_run_deletes_nothing() {
    let cloud = Cloud::default().with("disks", "us-east1", &["disk-1"]);
    let registry = registry(&cloud, &[("disks", false)]);
    let cancel = CancellationToken::new();

    let plan = nuke::inspect(&registry, &regions(&["us-east1"]), &NukeConfig::default(), &cancel).await;
    assert_eq!(plan.target_count(), 1);

    cancel.cancel();
    let report = nuke::execute(plan, &cancel).await;

    assert!(cloud.deleted().is_empty());
    assert!(matches!(
        report.outcome_for("disks", "disk-1"),
        Some(Outcome::Failed(NukeError::Cancelled))
    ));
}

#[tokio::test]
async fn empty_project_is_a_clean_run() {
    let cloud = Cloud::default();
    let registry = registry(&cloud, &[("disks", false), ("buckets", true)]);

    let plan = nuke::inspect(
        &registry,
        &regions(&["us-east1"]),
        &NukeConfig::default(),
        &CancellationToken::new(),
    )
    .await;

    assert!(plan.is_empty());
    assert!(!plan.planned_report().has_failures());
}
