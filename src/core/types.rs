//! Project, stage and resource-settings types.
//!
//! Defines the on-disk schema for project files and the per-kind resource
//! files they point at, plus the plan and report types produced by a run.
//! All config types derive Serialize/Deserialize/JsonSchema.

use indexmap::IndexMap;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Flat string→string map used for `{{name}}` substitution and for tags.
pub type Variables = IndexMap<String, String>;

// ============================================================================
// Project file
// ============================================================================

/// Root configuration: the desired deployment.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    /// Project name (templatable)
    pub name: String,

    /// Target environment, e.g. "dev" or "prod" (templatable)
    #[serde(default)]
    pub environment: String,

    /// Stages, executed in declaration order
    #[serde(default)]
    pub stages: Vec<Stage>,

    /// Variables available to `{{name}}` placeholders. Never interpolated itself.
    #[serde(default)]
    pub variables: Variables,
}

/// A named unit of a project declaring one resource kind.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Stage {
    /// Stage name
    pub name: String,

    /// Resource kind this stage manages
    #[serde(rename = "type")]
    pub stage_type: StageType,

    /// Disabled stages are skipped entirely
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// What to do when a declared resource already exists
    #[serde(default)]
    pub on_conflict: ConflictPolicy,

    /// What to do when a resource operation fails
    #[serde(default)]
    pub on_error: ErrorPolicy,

    /// Path to the kind-specific resource file
    #[serde(rename = "config")]
    pub config_file: PathBuf,

    /// Advisory list of stage names this stage expects to run after
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,

    /// Commands run around this stage
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hooks: Option<Hooks>,

    /// Resources loaded from `config_file`, defaults merged in
    #[serde(skip)]
    #[schemars(skip)]
    pub resources: StageResources,
}

fn default_true() -> bool {
    true
}

/// Resource kind enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub enum StageType {
    #[serde(rename = "lambda")]
    Function,
    #[serde(rename = "s3")]
    Bucket,
    #[serde(rename = "api")]
    Gateway,
    #[serde(rename = "iam-role")]
    Role,
    #[serde(rename = "cognito")]
    IdentityPool,
    #[serde(other)]
    #[schemars(skip)]
    Unknown,
}

impl StageType {
    /// Every kind a stage can manage.
    pub const KNOWN: [StageType; 5] = [
        Self::Function,
        Self::Bucket,
        Self::Gateway,
        Self::Role,
        Self::IdentityPool,
    ];
}

impl fmt::Display for StageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Function => write!(f, "lambda"),
            Self::Bucket => write!(f, "s3"),
            Self::Gateway => write!(f, "api"),
            Self::Role => write!(f, "iam-role"),
            Self::IdentityPool => write!(f, "cognito"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

impl FromStr for StageType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "lambda" => Ok(Self::Function),
            "s3" => Ok(Self::Bucket),
            "api" => Ok(Self::Gateway),
            "iam-role" => Ok(Self::Role),
            "cognito" => Ok(Self::IdentityPool),
            other => Err(format!(
                "unknown stage type '{}' (expected one of: lambda, s3, api, iam-role, cognito)",
                other
            )),
        }
    }
}

/// Conflict policy declared on a stage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ConflictPolicy {
    #[default]
    Stop,
    Update,
    #[serde(other)]
    #[schemars(skip)]
    Invalid,
}

/// Error policy declared on a stage. `Rollback` is accepted but has no effect.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ErrorPolicy {
    #[default]
    Stop,
    Skip,
    Rollback,
    #[serde(other)]
    #[schemars(skip)]
    Invalid,
}

/// External commands run before and after a stage.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Hooks {
    /// Working directory for every command (default: current directory)
    #[serde(default)]
    pub working_dir: Option<PathBuf>,

    #[serde(default)]
    pub suppress_stdout: bool,

    #[serde(default)]
    pub suppress_stderr: bool,

    /// Abort the whole run when a command fails
    #[serde(default)]
    pub stop_on_error: bool,

    #[serde(default)]
    pub pre_deploy: Vec<String>,

    #[serde(default)]
    pub post_deploy: Vec<String>,

    #[serde(default)]
    pub pre_destroy: Vec<String>,

    #[serde(default)]
    pub post_destroy: Vec<String>,
}

/// Resources a stage manages, one variant per kind.
#[derive(Debug, Clone, Default)]
pub enum StageResources {
    /// Resource file not read yet (or stage type unrecognized)
    #[default]
    Unloaded,
    Functions(Vec<FunctionSettings>),
    Buckets(Vec<BucketSettings>),
    Gateways(Vec<GatewaySettings>),
    Roles(Vec<RoleSettings>),
    IdentityPools(Vec<IdentityPoolSettings>),
}

impl StageResources {
    /// Names of the declared resources, in declaration order.
    pub fn names(&self) -> Vec<&str> {
        match self {
            Self::Unloaded => Vec::new(),
            Self::Functions(v) => v.iter().map(|r| r.name()).collect(),
            Self::Buckets(v) => v.iter().map(|r| r.name()).collect(),
            Self::Gateways(v) => v.iter().map(|r| r.name()).collect(),
            Self::Roles(v) => v.iter().map(|r| r.name()).collect(),
            Self::IdentityPools(v) => v.iter().map(|r| r.name()).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.names().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ============================================================================
// Targets
// ============================================================================

/// A pointer at another resource: by reference, static identifier, or lookup.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ResourceTarget {
    /// Reference name registered by another resource
    #[serde(rename = "ref", default, skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external: Option<ExternalReference>,
}

/// A resource not managed through the reference store.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ExternalReference {
    /// Static provider identifier
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arn: Option<String>,

    /// Look the resource up by name at resolution time
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dynamic: Option<DynamicTarget>,
}

/// Lookup descriptor for a dynamic target.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct DynamicTarget {
    pub name: String,

    #[serde(default)]
    pub region: String,

    /// Stage type name of the target ("lambda", "s3", ...)
    #[serde(rename = "type")]
    pub target_type: String,
}

// ============================================================================
// Resource files
// ============================================================================

/// Resource file for a `lambda` stage.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct FunctionFile {
    #[serde(default)]
    pub defaults: Option<FunctionSettings>,
    #[serde(default)]
    pub functions: Vec<FunctionSettings>,
}

/// Resource file for an `s3` stage.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct BucketFile {
    #[serde(default)]
    pub defaults: Option<BucketSettings>,
    #[serde(default)]
    pub buckets: Vec<BucketSettings>,
}

/// Resource file for an `api` stage.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct GatewayFile {
    #[serde(default)]
    pub defaults: Option<GatewaySettings>,
    #[serde(default)]
    pub gateways: Vec<GatewaySettings>,
}

/// Resource file for an `iam-role` stage.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct RoleFile {
    #[serde(default)]
    pub defaults: Option<RoleSettings>,
    #[serde(default)]
    pub roles: Vec<RoleSettings>,
}

/// Resource file for a `cognito` stage.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct IdentityPoolFile {
    #[serde(default)]
    pub defaults: Option<IdentityPoolSettings>,
    #[serde(default)]
    pub pools: Vec<IdentityPoolSettings>,
}

// -- Functions --

/// A serverless function.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct FunctionSettings {
    #[serde(default)]
    pub name: Option<String>,

    /// Register the function ARN under this reference
    #[serde(rename = "ref", default)]
    pub reference: Option<String>,

    #[serde(default)]
    pub region: Option<String>,

    /// Execution role ARN, or a `[[ref]]` to a role deployed earlier
    #[serde(default)]
    pub role_arn: Option<String>,

    #[serde(default)]
    pub handler: Option<String>,

    #[serde(default)]
    pub runtime: Option<String>,

    /// Path to the zipped code archive
    #[serde(default)]
    pub code: Option<String>,

    /// Memory in MB
    #[serde(rename = "memory", default)]
    pub memory_size: Option<u32>,

    /// Timeout in seconds
    #[serde(default)]
    pub timeout: Option<u32>,

    #[serde(default)]
    pub description: Option<String>,

    /// "skip" keeps the function on destroy
    #[serde(default)]
    pub on_delete: Option<String>,

    #[serde(default)]
    pub tags: Variables,

    #[serde(default)]
    pub environment: Variables,
}

// -- Buckets --

/// An object-storage bucket.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct BucketSettings {
    #[serde(default)]
    pub name: Option<String>,

    #[serde(rename = "ref", default)]
    pub reference: Option<String>,

    #[serde(default)]
    pub region: Option<String>,

    #[serde(default)]
    pub versioning: Option<bool>,

    #[serde(default)]
    pub on_delete: Option<String>,

    #[serde(default)]
    pub block_public_access: Option<bool>,

    #[serde(default)]
    pub static_hosting: Option<StaticHosting>,

    #[serde(default)]
    pub tags: Variables,
}

/// Static website hosting for a bucket.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct StaticHosting {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub index_document: Option<String>,
    #[serde(default)]
    pub error_document: Option<String>,
}

// -- Gateways --

/// An HTTP gateway with its stages, integrations and routes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct GatewaySettings {
    #[serde(default)]
    pub name: Option<String>,

    #[serde(default)]
    pub on_delete: Option<String>,

    #[serde(default)]
    pub description: Option<String>,

    #[serde(default)]
    pub region: Option<String>,

    /// Only "HTTP" is supported by the provider adapters
    #[serde(default)]
    pub protocol: Option<String>,

    #[serde(default)]
    pub stages: Option<Vec<ApiStage>>,

    #[serde(default)]
    pub integrations: Vec<Integration>,

    #[serde(default)]
    pub routes: Vec<Route>,

    #[serde(default)]
    pub tags: Variables,
}

/// A deployment stage of a gateway (not a project stage).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ApiStage {
    pub name: String,

    #[serde(default)]
    pub description: String,

    #[serde(rename = "automaticDeployment", default)]
    pub auto_deploy: bool,

    #[serde(default)]
    pub tags: Variables,
}

/// Backend integration of a gateway.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Integration {
    /// Integration type (default AWS_PROXY)
    #[serde(rename = "type", default)]
    pub integration_type: Option<String>,

    /// Payload format version (default 2.0)
    #[serde(default)]
    pub payload_version: Option<String>,

    /// Method used to call the backend (default POST)
    #[serde(default)]
    pub integration_method: Option<String>,

    /// Routes in the same gateway target this integration through its ref
    #[serde(rename = "ref", default)]
    pub reference: Option<String>,

    pub target: ResourceTarget,
}

/// A `METHOD PATH` route of a gateway.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Route {
    pub method: String,
    pub route: String,
    pub target: ResourceTarget,
}

impl Route {
    /// Provider route key, e.g. `GET /users`.
    pub fn key(&self) -> String {
        format!("{} {}", self.method, self.route)
    }
}

// -- Roles --

/// An access role with its trust policy and permissions.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RoleSettings {
    #[serde(default)]
    pub name: Option<String>,

    #[serde(rename = "ref", default)]
    pub reference: Option<String>,

    #[serde(default)]
    pub description: Option<String>,

    #[serde(default)]
    pub on_delete: Option<String>,

    #[serde(default)]
    pub trust_policy: Option<TrustPolicy>,

    /// Managed policies to attach
    #[serde(default)]
    pub policy_arns: Vec<String>,

    #[serde(default)]
    pub inline_policies: Vec<InlinePolicy>,

    #[serde(default)]
    pub tags: Variables,
}

/// Who may assume a role: generated from principals, or read from a file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct TrustPolicy {
    #[serde(default)]
    pub principals: Option<Principals>,

    /// Path to a complete trust policy document
    #[serde(default)]
    pub file: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Principals {
    #[serde(default)]
    pub services: Vec<String>,

    /// Account principals
    #[serde(rename = "aws", default)]
    pub accounts: Vec<String>,
}

/// An inline policy: generated from actions/resources, or read from a file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct InlinePolicy {
    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub actions: Vec<String>,

    #[serde(default)]
    pub resources: Vec<String>,

    /// "Allow" or "Deny" (default Allow)
    #[serde(default)]
    pub effect: Option<String>,

    #[serde(default)]
    pub file: Option<String>,
}

// -- Identity pools --

/// A user identity pool with its app clients and hosted domain.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct IdentityPoolSettings {
    #[serde(rename = "applicationName", alias = "name", default)]
    pub name: Option<String>,

    #[serde(rename = "ref", default)]
    pub reference: Option<String>,

    #[serde(default)]
    pub region: Option<String>,

    #[serde(default)]
    pub on_delete: Option<String>,

    /// Hosted domain prefix (default: the pool id)
    #[serde(default)]
    pub domain_prefix: Option<String>,

    #[serde(default)]
    pub sign_in_identifiers: Vec<String>,

    #[serde(default)]
    pub sign_up_attributes: Vec<String>,

    #[serde(rename = "passwordPolicy", default)]
    pub password_policy: Option<PasswordPolicy>,

    #[serde(default)]
    pub app_clients: Vec<AppClient>,

    #[serde(default)]
    pub tags: Variables,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PasswordPolicy {
    #[serde(default = "default_min_length")]
    pub min_length: u32,
    #[serde(default)]
    pub require_symbols: bool,
    #[serde(default)]
    pub require_numbers: bool,
    #[serde(default)]
    pub require_uppercase: bool,
    #[serde(default)]
    pub require_lowercase: bool,
}

fn default_min_length() -> u32 {
    8
}

impl Default for PasswordPolicy {
    fn default() -> Self {
        Self {
            min_length: default_min_length(),
            require_symbols: false,
            require_numbers: false,
            require_uppercase: false,
            require_lowercase: false,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AppClient {
    pub name: String,

    #[serde(rename = "type", default)]
    pub client_type: String,

    #[serde(default)]
    pub return_urls: Vec<String>,

    #[serde(default)]
    pub logout_urls: Vec<String>,
}

// -- Common accessors --

macro_rules! settings_accessors {
    ($($ty:ty),* $(,)?) => {
        $(
            impl $ty {
                /// Resource name; empty only before required-field validation.
                pub fn name(&self) -> &str {
                    self.name.as_deref().unwrap_or_default()
                }

                /// True unless `onDelete` is exactly "skip".
                pub fn is_deletable(&self) -> bool {
                    self.on_delete.as_deref() != Some("skip")
                }
            }
        )*
    };
}

settings_accessors!(
    FunctionSettings,
    BucketSettings,
    GatewaySettings,
    RoleSettings,
    IdentityPoolSettings,
);

// ============================================================================
// Plan
// ============================================================================

/// Kind-agnostic view of a resource, used to unify destroy logic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UniversalResourceDefinition {
    pub stage_name: String,
    pub name: String,
    pub arn: String,
    pub resource_type: StageType,
    pub region: String,
}

/// Action to take on a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanAction {
    Create,
    Update,
    Skip,
    Delete,
}

impl fmt::Display for PlanAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Create => write!(f, "CREATE"),
            Self::Update => write!(f, "UPDATE"),
            Self::Skip => write!(f, "SKIP"),
            Self::Delete => write!(f, "DELETE"),
        }
    }
}

/// A single planned deploy change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedChange {
    /// Position of the resource in its stage's list
    pub index: usize,

    pub resource: String,

    pub action: PlanAction,

    /// Why a resource is skipped
    pub reason: Option<&'static str>,
}

/// Destroy partition of one stage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DestroyPlan {
    pub deletable: Vec<UniversalResourceDefinition>,
    pub skipped: Vec<UniversalResourceDefinition>,
}

// ============================================================================
// Reports
// ============================================================================

/// Outcome counts for one stage of a run.
#[derive(Debug, Clone, Default)]
pub struct StageReport {
    pub stage: String,
    pub kind: Option<StageType>,
    pub created: u32,
    pub updated: u32,
    pub deleted: u32,
    pub skipped: u32,
    pub failed: u32,
    /// Set for dry-run destroys
    pub dry_run: Option<DestroyPlan>,
}

impl StageReport {
    pub fn new(stage: &Stage) -> Self {
        Self {
            stage: stage.name.clone(),
            kind: Some(stage.stage_type),
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_types_stage_type_roundtrip_names() {
        for kind in StageType::KNOWN {
            let parsed: StageType = kind.to_string().parse().unwrap();
            assert_eq!(parsed, kind);
        }
        assert!("dynamo".parse::<StageType>().is_err());
    }

    #[test]
    fn test_types_unknown_stage_type_deserializes() {
        let stage: Stage = serde_json::from_str(
            r#"{"name": "x", "type": "dynamo", "config": "x.json"}"#,
        )
        .unwrap();
        assert_eq!(stage.stage_type, StageType::Unknown);
        assert!(stage.enabled);
        assert_eq!(stage.on_conflict, ConflictPolicy::Stop);
    }

    #[test]
    fn test_types_resource_target_shapes() {
        let t: ResourceTarget = serde_json::from_str(
            r#"{"external": {"dynamic": {"name": "fn", "region": "us-east-1", "type": "lambda"}}}"#,
        )
        .unwrap();
        assert!(t.reference.is_none());
        let dynamic = t.external.unwrap().dynamic.unwrap();
        assert_eq!(dynamic.target_type, "lambda");

        let t: ResourceTarget = serde_json::from_str(r#"{"ref": "api-int"}"#).unwrap();
        assert_eq!(t.reference.as_deref(), Some("api-int"));
    }

    #[test]
    fn test_types_is_deletable() {
        let mut f = FunctionSettings::default();
        assert!(f.is_deletable());
        f.on_delete = Some("delete".to_string());
        assert!(f.is_deletable());
        f.on_delete = Some("skip".to_string());
        assert!(!f.is_deletable());
    }

    #[test]
    fn test_types_route_key() {
        let r = Route {
            method: "GET".to_string(),
            route: "/users".to_string(),
            target: ResourceTarget::default(),
        };
        assert_eq!(r.key(), "GET /users");
    }

    #[test]
    fn test_types_identity_pool_name_alias() {
        let p: IdentityPoolSettings =
            serde_json::from_str(r#"{"applicationName": "portal"}"#).unwrap();
        assert_eq!(p.name(), "portal");
        let p: IdentityPoolSettings = serde_json::from_str(r#"{"name": "portal"}"#).unwrap();
        assert_eq!(p.name(), "portal");
    }
}
