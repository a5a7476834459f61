//! Cloud provider seam.
//!
//! Resource handlers talk to the account only through [`CloudProvider`].
//! Two implementations ship with the crate:
//! - [`MemoryProvider`]: in-process account, records every call (tests, `--simulate`)
//! - [`AwsProvider`]: the AWS SDK, driven synchronously
//!
//! All calls are synchronous. An empty `region` means "the provider's
//! default region".

pub mod aws;
pub mod memory;

pub use aws::AwsProvider;
pub use memory::MemoryProvider;

use crate::core::error::ProviderError;
use crate::core::types::{ApiStage, AppClient, BucketSettings, FunctionSettings, IdentityPoolSettings};

pub type ProviderResult<T> = std::result::Result<T, ProviderError>;

/// Provider-side limit on keys per batch object delete.
pub const MAX_DELETE_BATCH: usize = 1000;

/// One page of a paginated listing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Page<T> {
    pub items: Vec<T>,
    /// Token/marker for the next page, `None` on the last one
    pub next: Option<String>,
}

/// Gateway-level attributes for create/update.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ApiSpec {
    pub name: String,
    pub region: String,
    pub protocol: String,
    pub description: Option<String>,
    pub tags: Vec<(String, String)>,
}

/// A resolved gateway integration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntegrationSpec {
    pub integration_type: String,
    pub method: String,
    pub payload_version: String,
    /// Backend identifier (function ARN)
    pub uri: String,
}

/// An existing gateway route.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteInfo {
    pub id: String,
    pub key: String,
}

/// Permission grant letting a gateway invoke a function.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvokeGrant {
    pub function: String,
    pub region: String,
    pub statement_id: String,
    pub source_arn: String,
}

/// Role attributes for create/update.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RoleSpec {
    pub name: String,
    pub description: Option<String>,
    /// Assume-role policy document (JSON)
    pub trust_policy: String,
    pub tags: Vec<(String, String)>,
}

/// Deterministic bucket identifier, derivable without a provider call.
pub fn bucket_arn(name: &str) -> String {
    format!("arn:aws:s3:::{}", name)
}

/// Cloud provider abstraction.
pub trait CloudProvider {
    /// Provider name for logs ("aws", "memory")
    fn name(&self) -> &str;

    /// Account identifier, used to build gateway source ARNs
    fn account_id(&self) -> ProviderResult<String>;

    // -- Snapshots --

    fn list_functions(&self, region: &str) -> ProviderResult<Vec<String>>;
    fn list_buckets(&self) -> ProviderResult<Vec<String>>;
    fn list_gateways(&self, region: &str) -> ProviderResult<Vec<String>>;
    fn list_roles(&self) -> ProviderResult<Vec<String>>;
    fn list_identity_pools(&self, region: &str) -> ProviderResult<Vec<String>>;

    // -- Functions --

    /// Returns the function ARN.
    fn create_function(&self, function: &FunctionSettings) -> ProviderResult<String>;
    fn update_function_code(&self, name: &str, region: &str, code: &str) -> ProviderResult<()>;
    /// Returns the function ARN.
    fn update_function_configuration(&self, function: &FunctionSettings) -> ProviderResult<String>;
    fn delete_function(&self, name: &str, region: &str) -> ProviderResult<()>;
    fn get_function_arn(&self, name: &str, region: &str) -> ProviderResult<String>;

    // -- Buckets --

    fn create_bucket(&self, name: &str, region: &str) -> ProviderResult<()>;
    /// Apply tags, versioning, public access block and website hosting.
    fn configure_bucket(&self, bucket: &BucketSettings) -> ProviderResult<()>;
    fn list_objects(
        &self,
        bucket: &str,
        region: &str,
        continuation: Option<&str>,
    ) -> ProviderResult<Page<String>>;
    /// At most [`MAX_DELETE_BATCH`] keys per call.
    fn delete_objects(&self, bucket: &str, region: &str, keys: &[String]) -> ProviderResult<()>;
    fn delete_bucket(&self, bucket: &str, region: &str) -> ProviderResult<()>;

    // -- Gateways --

    /// Returns the api id.
    fn create_api(&self, api: &ApiSpec) -> ProviderResult<String>;
    fn update_api(&self, api_id: &str, api: &ApiSpec) -> ProviderResult<()>;
    /// `NotFound` when no gateway has this display name.
    fn find_api_id(&self, name: &str, region: &str) -> ProviderResult<String>;
    fn delete_api(&self, api_id: &str, region: &str) -> ProviderResult<()>;
    fn create_api_stage(&self, api_id: &str, region: &str, stage: &ApiStage) -> ProviderResult<()>;
    /// Returns the integration id.
    fn create_integration(
        &self,
        api_id: &str,
        region: &str,
        integration: &IntegrationSpec,
    ) -> ProviderResult<String>;
    fn list_integrations(&self, api_id: &str, region: &str) -> ProviderResult<Vec<String>>;
    fn delete_integration(&self, api_id: &str, region: &str, integration_id: &str) -> ProviderResult<()>;
    /// Returns the route id. `target` is `integrations/<id>`.
    fn create_route(&self, api_id: &str, region: &str, key: &str, target: &str) -> ProviderResult<String>;
    fn list_routes(&self, api_id: &str, region: &str) -> ProviderResult<Vec<RouteInfo>>;
    fn delete_route(&self, api_id: &str, region: &str, route_id: &str) -> ProviderResult<()>;
    /// `AlreadyExists` when the statement id is already granted.
    fn grant_invoke_permission(&self, grant: &InvokeGrant) -> ProviderResult<()>;

    // -- Roles --

    /// Returns the role ARN. `AlreadyExists` when the role exists.
    fn create_role(&self, role: &RoleSpec) -> ProviderResult<String>;
    fn update_role(&self, role: &RoleSpec) -> ProviderResult<()>;
    fn get_role_arn(&self, name: &str) -> ProviderResult<String>;
    fn attach_role_policy(&self, role: &str, policy_arn: &str) -> ProviderResult<()>;
    fn put_role_policy(&self, role: &str, policy_name: &str, document: &str) -> ProviderResult<()>;
    fn list_attached_role_policies(&self, role: &str, marker: Option<&str>) -> ProviderResult<Page<String>>;
    fn detach_role_policy(&self, role: &str, policy_arn: &str) -> ProviderResult<()>;
    fn list_role_policies(&self, role: &str, marker: Option<&str>) -> ProviderResult<Page<String>>;
    fn delete_role_policy(&self, role: &str, policy_name: &str) -> ProviderResult<()>;
    fn delete_role(&self, role: &str) -> ProviderResult<()>;

    // -- Identity pools --

    /// Returns the pool id.
    fn create_user_pool(&self, pool: &IdentityPoolSettings) -> ProviderResult<String>;
    fn update_user_pool(&self, pool_id: &str, pool: &IdentityPoolSettings) -> ProviderResult<()>;
    /// `NotFound` when no pool has this name.
    fn find_user_pool_id(&self, name: &str, region: &str) -> ProviderResult<String>;
    /// Returns the client id.
    fn create_user_pool_client(&self, pool_id: &str, region: &str, client: &AppClient) -> ProviderResult<String>;
    fn create_user_pool_domain(&self, pool_id: &str, region: &str, domain: &str) -> ProviderResult<()>;
    fn get_user_pool_domain(&self, pool_id: &str, region: &str) -> ProviderResult<Option<String>>;
    fn delete_user_pool_domain(&self, pool_id: &str, region: &str, domain: &str) -> ProviderResult<()>;
    fn delete_user_pool(&self, pool_id: &str, region: &str) -> ProviderResult<()>;
}
