//! Plan generation: diff desired resources against the live snapshot.
//!
//! Deploy planning classifies each desired resource as create, update or
//! skip by name membership in the existing-resource snapshot. Destroy
//! planning partitions a stage's resources by their own `onDelete` policy.

use super::error::{Error, Result};
use super::types::*;
use crate::provider::bucket_arn;
use std::collections::HashSet;

/// Which half of reconciliation a deploy may perform.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DeployMode {
    #[default]
    All,
    /// Never touch resources that already exist
    OnlyCreate,
    /// Never create resources that do not exist yet
    OnlyUpdate,
}

impl DeployMode {
    /// Build from the two command-line flags; both set is a usage error.
    pub fn from_flags(only_create: bool, only_update: bool) -> Result<Self> {
        match (only_create, only_update) {
            (true, true) => Err(Error::Usage(
                "--only-create and --only-update are mutually exclusive".to_string(),
            )),
            (true, false) => Ok(Self::OnlyCreate),
            (false, true) => Ok(Self::OnlyUpdate),
            (false, false) => Ok(Self::All),
        }
    }
}

/// Classify every desired resource against the existing-name snapshot.
pub fn plan_deploy(desired: &[&str], existing: &HashSet<String>, mode: DeployMode) -> Vec<PlannedChange> {
    desired
        .iter()
        .enumerate()
        .map(|(index, name)| {
            let (action, reason) = determine_action(existing.contains(*name), mode);
            PlannedChange {
                index,
                resource: name.to_string(),
                action,
                reason,
            }
        })
        .collect()
}

fn determine_action(exists: bool, mode: DeployMode) -> (PlanAction, Option<&'static str>) {
    match (exists, mode) {
        (true, DeployMode::OnlyCreate) => (PlanAction::Skip, Some("exists, only-create")),
        (true, _) => (PlanAction::Update, None),
        (false, DeployMode::OnlyUpdate) => (PlanAction::Skip, Some("missing, only-update")),
        (false, _) => (PlanAction::Create, None),
    }
}

/// Kind-agnostic views of a stage's resources, paired with their deletability.
pub fn destroy_candidates(stage: &Stage) -> Vec<(UniversalResourceDefinition, bool)> {
    let urd = |name: &str, arn: String, region: &Option<String>| UniversalResourceDefinition {
        stage_name: stage.name.clone(),
        name: name.to_string(),
        arn,
        resource_type: stage.stage_type,
        region: region.clone().unwrap_or_default(),
    };

    match &stage.resources {
        StageResources::Unloaded => Vec::new(),
        StageResources::Functions(v) => v
            .iter()
            .map(|r| (urd(r.name(), String::new(), &r.region), r.is_deletable()))
            .collect(),
        StageResources::Buckets(v) => v
            .iter()
            .map(|r| (urd(r.name(), bucket_arn(r.name()), &r.region), r.is_deletable()))
            .collect(),
        StageResources::Gateways(v) => v
            .iter()
            .map(|r| (urd(r.name(), String::new(), &r.region), r.is_deletable()))
            .collect(),
        StageResources::Roles(v) => v
            .iter()
            .map(|r| (urd(r.name(), String::new(), &None), r.is_deletable()))
            .collect(),
        StageResources::IdentityPools(v) => v
            .iter()
            .map(|r| (urd(r.name(), String::new(), &r.region), r.is_deletable()))
            .collect(),
    }
}

/// Partition a stage's resources into deletable and skipped.
pub fn plan_destroy(stage: &Stage) -> DestroyPlan {
    let mut plan = DestroyPlan::default();
    for (resource, deletable) in destroy_candidates(stage) {
        if deletable {
            plan.deletable.push(resource);
        } else {
            plan.skipped.push(resource);
        }
    }
    plan
}
