//! Executor: stage runner for deploy and destroy.
//!
//! Stages run strictly in file order:
//! filter → pre-hooks → reconcile (plan → per-resource handler) → post-hooks
//!
//! A failing resource is logged and counted; it never stops its siblings or
//! later stages. Only a hook failure under `stopOnError` aborts the run.

use super::error::{Error, Result};
use super::hooks::{self, HookPhase};
use super::planner;
use super::refs::RefStore;
use super::types::*;
use crate::provider::CloudProvider;
use crate::resources::{bucket, function, gateway, identity_pool, role, ResourceContext};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, error, info, warn};

pub use super::planner::DeployMode;

/// Wait after an access-role stage so new roles are usable by later stages.
pub const DEFAULT_PROPAGATION_WAIT: Duration = Duration::from_secs(30);

/// Stage types a run acts on. Empty means every stage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StageFilter {
    types: HashSet<StageType>,
}

impl StageFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn contains(&self, stage_type: StageType) -> bool {
        self.types.is_empty() || self.types.contains(&stage_type)
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }
}

impl FromStr for StageFilter {
    type Err = Error;

    /// Comma-separated stage types, e.g. `lambda,s3`.
    fn from_str(s: &str) -> Result<Self> {
        let mut types = HashSet::new();
        for part in s.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            types.insert(part.parse::<StageType>().map_err(Error::Usage)?);
        }
        Ok(Self { types })
    }
}

impl FromIterator<StageType> for StageFilter {
    fn from_iter<I: IntoIterator<Item = StageType>>(iter: I) -> Self {
        Self {
            types: iter.into_iter().collect(),
        }
    }
}

/// Names of resources already present in the account, per kind and region.
/// Buckets and roles are account-wide and keyed under the empty region.
#[derive(Debug, Clone, Default)]
pub struct ExistingResources {
    by_kind: HashMap<(StageType, String), HashSet<String>>,
}

impl ExistingResources {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot every kind that has an active stage, once per run, in each
    /// region the desired resources use.
    pub fn query(provider: &dyn CloudProvider, project: &Project, filter: &StageFilter) -> Result<Self> {
        let mut regions: HashMap<StageType, BTreeSet<String>> = HashMap::new();
        for stage in project.stages.iter().filter(|s| is_active(s, filter)) {
            regions
                .entry(stage.stage_type)
                .or_default()
                .extend(stage_regions(stage.stage_type, &stage.resources));
        }

        let mut existing = Self::new();
        for (kind, regions) in regions {
            debug!("Querying existing {} resources in {:?}", kind, regions);
            for region in regions {
                let names = match kind {
                    StageType::Bucket => provider.list_buckets()?,
                    StageType::Role => provider.list_roles()?,
                    StageType::Function => provider.list_functions(&region)?,
                    StageType::Gateway => provider.list_gateways(&region)?,
                    StageType::IdentityPool => provider.list_identity_pools(&region)?,
                    StageType::Unknown => continue,
                };
                existing
                    .by_kind
                    .entry((kind, region))
                    .or_default()
                    .extend(names);
            }
        }
        Ok(existing)
    }

    pub fn insert(&mut self, kind: StageType, region: &str, name: &str) {
        self.by_kind
            .entry((kind, snapshot_region(kind, region).to_string()))
            .or_default()
            .insert(name.to_string());
    }

    pub fn contains(&self, kind: StageType, region: &str, name: &str) -> bool {
        self.by_kind
            .get(&(kind, snapshot_region(kind, region).to_string()))
            .is_some_and(|names| names.contains(name))
    }

    /// Names of a stage's resources that already exist in their own region.
    pub fn present_in(&self, stage: &Stage) -> HashSet<String> {
        let kind = stage.stage_type;
        stage
            .resources
            .names()
            .into_iter()
            .zip(stage_regions(kind, &stage.resources))
            .filter(|(name, region)| self.contains(kind, region, name))
            .map(|(name, _)| name.to_string())
            .collect()
    }
}

fn snapshot_region(kind: StageType, region: &str) -> &str {
    match kind {
        StageType::Bucket | StageType::Role => "",
        _ => region,
    }
}

/// Snapshot region of each resource, in resource order.
fn stage_regions(kind: StageType, resources: &StageResources) -> Vec<String> {
    fn regions<'a, I: Iterator<Item = &'a Option<String>>>(kind: StageType, iter: I) -> Vec<String> {
        iter.map(|r| snapshot_region(kind, r.as_deref().unwrap_or_default()).to_string())
            .collect()
    }
    match resources {
        StageResources::Unloaded => Vec::new(),
        StageResources::Functions(v) => regions(kind, v.iter().map(|r| &r.region)),
        StageResources::Buckets(v) => regions(kind, v.iter().map(|r| &r.region)),
        StageResources::Gateways(v) => regions(kind, v.iter().map(|r| &r.region)),
        StageResources::Roles(v) => vec![String::new(); v.len()],
        StageResources::IdentityPools(v) => regions(kind, v.iter().map(|r| &r.region)),
    }
}

/// Stage passes the type filter, is enabled and has a known type.
pub fn is_active(stage: &Stage, filter: &StageFilter) -> bool {
    stage.enabled && stage.stage_type != StageType::Unknown && filter.contains(stage.stage_type)
}

/// Log why a stage is not run; true when it should run.
fn should_run(stage: &Stage, filter: &StageFilter) -> bool {
    if stage.stage_type == StageType::Unknown {
        warn!("Unknown stage type for stage {}, skipping", stage.name);
        return false;
    }
    if !filter.contains(stage.stage_type) {
        info!("Skipping stage {} ({}): not in stage filter", stage.name, stage.stage_type);
        return false;
    }
    if !stage.enabled {
        info!("Skipping stage {}: disabled", stage.name);
        return false;
    }
    true
}

/// Configuration for a deploy run.
pub struct DeployConfig<'a> {
    pub project: &'a Project,
    pub provider: &'a dyn CloudProvider,
    pub refs: &'a RefStore,
    pub existing: &'a ExistingResources,
    pub filter: &'a StageFilter,
    pub mode: DeployMode,
    pub propagation_wait: Duration,
    pub settle_delay: Duration,
}

/// Configuration for a destroy run.
pub struct DestroyConfig<'a> {
    pub project: &'a Project,
    pub provider: &'a dyn CloudProvider,
    pub refs: &'a RefStore,
    pub filter: &'a StageFilter,
    pub dry_run: bool,
    pub force: bool,
}

/// Deploy every active stage.
pub fn reconcile_deploy(cfg: &DeployConfig) -> Result<Vec<StageReport>> {
    let ctx = ResourceContext::new(cfg.provider, cfg.refs).with_settle_delay(cfg.settle_delay);
    let mut reports = Vec::new();

    for stage in &cfg.project.stages {
        if !should_run(stage, cfg.filter) {
            continue;
        }
        info!("Deploying stage {} ({})", stage.name, stage.stage_type);
        hooks::run_phase(stage.hooks.as_ref(), HookPhase::PreDeploy)?;

        let existing = cfg.existing.present_in(stage);
        let report = deploy_stage(&ctx, stage, &existing, cfg.mode);
        info!(
            "Stage {}: {} created, {} updated, {} skipped, {} failed",
            stage.name, report.created, report.updated, report.skipped, report.failed
        );
        reports.push(report);

        if stage.stage_type == StageType::Role && !cfg.propagation_wait.is_zero() {
            info!("Waiting {:?} to let changes propagate", cfg.propagation_wait);
            std::thread::sleep(cfg.propagation_wait);
        }

        hooks::run_phase(stage.hooks.as_ref(), HookPhase::PostDeploy)?;
    }

    Ok(reports)
}

/// Plan one stage and hand every non-skipped resource to its handler.
fn deploy_stage(
    ctx: &ResourceContext,
    stage: &Stage,
    existing: &HashSet<String>,
    mode: DeployMode,
) -> StageReport {
    let mut report = StageReport::new(stage);
    let changes = planner::plan_deploy(&stage.resources.names(), existing, mode);

    match &stage.resources {
        StageResources::Unloaded => warn!("Stage {} has no resources loaded", stage.name),
        StageResources::Functions(v) => apply_changes(
            ctx, &mut report, &changes, v, function::deploy_create, function::deploy_update,
        ),
        StageResources::Buckets(v) => apply_changes(
            ctx, &mut report, &changes, v, bucket::deploy_create, bucket::deploy_update,
        ),
        StageResources::Gateways(v) => apply_changes(
            ctx, &mut report, &changes, v, gateway::deploy_create, gateway::deploy_update,
        ),
        StageResources::Roles(v) => apply_changes(
            ctx, &mut report, &changes, v, role::deploy_create, role::deploy_update,
        ),
        StageResources::IdentityPools(v) => apply_changes(
            ctx,
            &mut report,
            &changes,
            v,
            identity_pool::deploy_create,
            identity_pool::deploy_update,
        ),
    }
    report
}

fn apply_changes<T, C, U>(
    ctx: &ResourceContext,
    report: &mut StageReport,
    changes: &[PlannedChange],
    items: &[T],
    create: C,
    update: U,
) where
    C: Fn(&ResourceContext, &T) -> Result<()>,
    U: Fn(&ResourceContext, &T) -> Result<()>,
{
    for change in changes {
        let Some(item) = items.get(change.index) else {
            continue;
        };
        let outcome = match change.action {
            PlanAction::Create => create(ctx, item),
            PlanAction::Update => update(ctx, item),
            PlanAction::Skip | PlanAction::Delete => {
                debug!(
                    "Skipping {} ({})",
                    change.resource,
                    change.reason.unwrap_or("no action")
                );
                report.skipped += 1;
                continue;
            }
        };

        match (outcome, change.action) {
            (Ok(()), PlanAction::Create) => report.created += 1,
            (Ok(()), _) => report.updated += 1,
            (Err(e), action) => {
                error!("{} {} failed: {}", action, change.resource, e);
                report.failed += 1;
            }
        }
    }
}

/// Destroy every active stage (or report what would be destroyed).
pub fn reconcile_destroy(cfg: &DestroyConfig) -> Result<Vec<StageReport>> {
    let ctx = ResourceContext::new(cfg.provider, cfg.refs);
    let mut reports = Vec::new();

    for stage in &cfg.project.stages {
        if !should_run(stage, cfg.filter) {
            continue;
        }
        let mut report = StageReport::new(stage);
        let plan = planner::plan_destroy(stage);
        report.skipped = count(plan.skipped.len());

        hooks::run_phase(stage.hooks.as_ref(), HookPhase::PreDestroy)?;

        if cfg.dry_run {
            debug!(
                "Dry run for stage {}: {} deletable, {} skipped",
                stage.name,
                plan.deletable.len(),
                plan.skipped.len()
            );
            report.dry_run = Some(plan);
            reports.push(report);
            hooks::run_phase(stage.hooks.as_ref(), HookPhase::PostDestroy)?;
            continue;
        }

        info!("Destroying stage {} ({})", stage.name, stage.stage_type);
        for resource in &plan.deletable {
            match destroy_resource(&ctx, resource, cfg.force) {
                Ok(()) => report.deleted += 1,
                Err(e) => {
                    error!("DELETE {} failed: {}", resource.name, e);
                    report.failed += 1;
                }
            }
        }
        for resource in &plan.skipped {
            info!("Skipping delete of {} (onDelete: skip)", resource.name);
        }
        info!(
            "Stage {}: {} deleted, {} skipped, {} failed",
            stage.name, report.deleted, report.skipped, report.failed
        );
        reports.push(report);

        hooks::run_phase(stage.hooks.as_ref(), HookPhase::PostDestroy)?;
    }

    Ok(reports)
}

fn count(n: usize) -> u32 {
    u32::try_from(n).unwrap_or(u32::MAX)
}

fn destroy_resource(ctx: &ResourceContext, resource: &UniversalResourceDefinition, force: bool) -> Result<()> {
    match resource.resource_type {
        StageType::Function => function::destroy(ctx, resource),
        StageType::Bucket => bucket::destroy(ctx, resource, force),
        StageType::Gateway => gateway::destroy(ctx, resource),
        StageType::Role => role::destroy(ctx, resource),
        StageType::IdentityPool => identity_pool::destroy(ctx, resource),
        StageType::Unknown => Err(Error::Config(format!(
            "cannot destroy {}: unknown resource type",
            resource.name
        ))),
    }
}

/// True when any stage reported a failed resource.
pub fn has_failures(reports: &[StageReport]) -> bool {
    reports.iter().any(|r| r.failed > 0)
}
