//! In-process provider.
//!
//! Keeps a small model of an account in memory and records every call as a
//! `"<operation> <args>"` line, in order. Individual calls can be made to fail
//! with [`MemoryProvider::fail_on`].

use super::*;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

const DEFAULT_ACCOUNT: &str = "123456789012";
const DEFAULT_REGION: &str = "us-east-1";

#[derive(Debug, Default)]
struct Account {
    functions: BTreeMap<String, FunctionSettings>,
    buckets: BTreeMap<String, Vec<String>>,
    apis: BTreeMap<String, MemApi>,
    roles: BTreeMap<String, MemRole>,
    pools: BTreeMap<String, MemPool>,
    grants: HashSet<(String, String)>,
    next_id: u64,
}

impl Account {
    fn next_id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{}-{}", prefix, self.next_id)
    }
}

#[derive(Debug, Default)]
struct MemApi {
    name: String,
    stages: Vec<String>,
    integrations: Vec<(String, IntegrationSpec)>,
    routes: Vec<(RouteInfo, String)>,
}

#[derive(Debug, Default)]
struct MemRole {
    attached: Vec<String>,
    inline: Vec<String>,
}

#[derive(Debug, Default)]
struct MemPool {
    name: String,
    domain: Option<String>,
    clients: Vec<String>,
}

/// Failure injected into one call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Injected {
    Failed,
    Conflict,
}

/// In-memory [`CloudProvider`].
#[derive(Debug)]
pub struct MemoryProvider {
    account_id: String,
    page_size: usize,
    state: Mutex<Account>,
    calls: Mutex<Vec<String>>,
    failures: Mutex<HashMap<String, Injected>>,
}

impl Default for MemoryProvider {
    fn default() -> Self {
        Self::new()
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

fn paginate(items: &[String], token: Option<&str>, size: usize) -> Page<String> {
    let start = token.and_then(|t| t.parse::<usize>().ok()).unwrap_or(0);
    let start = start.min(items.len());
    let end = (start + size.max(1)).min(items.len());
    Page {
        items: items[start..end].to_vec(),
        next: (end < items.len()).then(|| end.to_string()),
    }
}

fn region_or_default(region: &str) -> &str {
    if region.is_empty() {
        DEFAULT_REGION
    } else {
        region
    }
}

impl MemoryProvider {
    pub fn new() -> Self {
        Self {
            account_id: DEFAULT_ACCOUNT.to_string(),
            page_size: 100,
            state: Mutex::new(Account::default()),
            calls: Mutex::new(Vec::new()),
            failures: Mutex::new(HashMap::new()),
        }
    }

    /// Page size for every paginated listing.
    pub fn with_page_size(mut self, size: usize) -> Self {
        self.page_size = size;
        self
    }

    /// Make the call with exactly this log line fail.
    pub fn fail_on(&self, call: &str) {
        lock(&self.failures).insert(call.to_string(), Injected::Failed);
    }

    /// Make the call with exactly this log line report a conflict.
    pub fn conflict_on(&self, call: &str) {
        lock(&self.failures).insert(call.to_string(), Injected::Conflict);
    }

    /// Every call so far, in order.
    pub fn calls(&self) -> Vec<String> {
        lock(&self.calls).clone()
    }

    /// Position of the first call starting with `prefix`.
    pub fn call_index(&self, prefix: &str) -> Option<usize> {
        lock(&self.calls).iter().position(|c| c.starts_with(prefix))
    }

    pub fn clear_calls(&self) {
        lock(&self.calls).clear();
    }

    fn record(&self, call: String) -> ProviderResult<()> {
        let injected = lock(&self.failures).get(&call).copied();
        lock(&self.calls).push(call.clone());
        match injected {
            Some(Injected::Failed) => Err(ProviderError::CommandFailed(format!(
                "injected failure: {}",
                call
            ))),
            Some(Injected::Conflict) => Err(ProviderError::Conflict(format!(
                "injected conflict: {}",
                call
            ))),
            None => Ok(()),
        }
    }

    fn function_arn(&self, name: &str, region: &str) -> String {
        format!(
            "arn:aws:lambda:{}:{}:function:{}",
            region_or_default(region),
            self.account_id,
            name
        )
    }

    fn role_arn(&self, name: &str) -> String {
        format!("arn:aws:iam::{}:role/{}", self.account_id, name)
    }

    // -- Seeding --

    pub fn add_function(&self, name: &str) {
        self.add_function_in(name, DEFAULT_REGION);
    }

    pub fn add_function_in(&self, name: &str, region: &str) {
        let settings = FunctionSettings {
            name: Some(name.to_string()),
            region: Some(region.to_string()),
            ..FunctionSettings::default()
        };
        lock(&self.state).functions.insert(name.to_string(), settings);
    }

    pub fn add_bucket(&self, name: &str, keys: &[&str]) {
        let keys = keys.iter().map(|k| k.to_string()).collect();
        lock(&self.state).buckets.insert(name.to_string(), keys);
    }

    /// Returns the api id.
    pub fn add_api(&self, name: &str) -> String {
        let mut state = lock(&self.state);
        let id = state.next_id("api");
        state.apis.insert(
            id.clone(),
            MemApi {
                name: name.to_string(),
                ..MemApi::default()
            },
        );
        id
    }

    pub fn add_role(&self, name: &str, attached: &[&str], inline: &[&str]) {
        let role = MemRole {
            attached: attached.iter().map(|s| s.to_string()).collect(),
            inline: inline.iter().map(|s| s.to_string()).collect(),
        };
        lock(&self.state).roles.insert(name.to_string(), role);
    }

    /// Returns the pool id.
    pub fn add_user_pool(&self, name: &str, domain: Option<&str>) -> String {
        let mut state = lock(&self.state);
        let id = state.next_id("pool");
        state.pools.insert(
            id.clone(),
            MemPool {
                name: name.to_string(),
                domain: domain.map(String::from),
                clients: Vec::new(),
            },
        );
        id
    }

    // -- Inspection --

    pub fn has_function(&self, name: &str) -> bool {
        lock(&self.state).functions.contains_key(name)
    }

    pub fn function(&self, name: &str) -> Option<FunctionSettings> {
        lock(&self.state).functions.get(name).cloned()
    }

    pub fn bucket_objects(&self, name: &str) -> Option<Vec<String>> {
        lock(&self.state).buckets.get(name).cloned()
    }

    pub fn has_role(&self, name: &str) -> bool {
        lock(&self.state).roles.contains_key(name)
    }

    /// Attached policy ARNs and inline policy names of a role.
    pub fn role_policies(&self, name: &str) -> Option<(Vec<String>, Vec<String>)> {
        lock(&self.state)
            .roles
            .get(name)
            .map(|r| (r.attached.clone(), r.inline.clone()))
    }

    /// Route keys and targets of a gateway, in creation order.
    pub fn routes(&self, api_id: &str) -> Vec<(String, String)> {
        lock(&self.state)
            .apis
            .get(api_id)
            .map(|api| {
                api.routes
                    .iter()
                    .map(|(r, target)| (r.key.clone(), target.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Integration ids and backend URIs of a gateway.
    pub fn integrations(&self, api_id: &str) -> Vec<(String, String)> {
        lock(&self.state)
            .apis
            .get(api_id)
            .map(|api| {
                api.integrations
                    .iter()
                    .map(|(id, spec)| (id.clone(), spec.uri.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// App client names and hosted domain of a user pool.
    pub fn pool_clients(&self, pool_id: &str) -> Option<(Vec<String>, Option<String>)> {
        lock(&self.state)
            .pools
            .get(pool_id)
            .map(|p| (p.clients.clone(), p.domain.clone()))
    }

    pub fn api_names(&self) -> Vec<String> {
        lock(&self.state).apis.values().map(|a| a.name.clone()).collect()
    }

    pub fn pool_names(&self) -> Vec<String> {
        lock(&self.state).pools.values().map(|p| p.name.clone()).collect()
    }
}

impl CloudProvider for MemoryProvider {
    fn name(&self) -> &str {
        "memory"
    }

    fn account_id(&self) -> ProviderResult<String> {
        Ok(self.account_id.clone())
    }

    fn list_functions(&self, region: &str) -> ProviderResult<Vec<String>> {
        self.record(format!("list_functions {}", region))?;
        let region = region_or_default(region);
        Ok(lock(&self.state)
            .functions
            .iter()
            .filter(|(_, f)| region_or_default(f.region.as_deref().unwrap_or_default()) == region)
            .map(|(name, _)| name.clone())
            .collect())
    }

    fn list_buckets(&self) -> ProviderResult<Vec<String>> {
        self.record("list_buckets".to_string())?;
        Ok(lock(&self.state).buckets.keys().cloned().collect())
    }

    fn list_gateways(&self, region: &str) -> ProviderResult<Vec<String>> {
        self.record(format!("list_gateways {}", region))?;
        Ok(self.api_names())
    }

    fn list_roles(&self) -> ProviderResult<Vec<String>> {
        self.record("list_roles".to_string())?;
        Ok(lock(&self.state).roles.keys().cloned().collect())
    }

    fn list_identity_pools(&self, region: &str) -> ProviderResult<Vec<String>> {
        self.record(format!("list_identity_pools {}", region))?;
        Ok(self.pool_names())
    }

    // -- Functions --

    fn create_function(&self, function: &FunctionSettings) -> ProviderResult<String> {
        let name = function.name();
        self.record(format!("create_function {}", name))?;
        let mut state = lock(&self.state);
        if state.functions.contains_key(name) {
            return Err(ProviderError::AlreadyExists(format!("function {}", name)));
        }
        state.functions.insert(name.to_string(), function.clone());
        Ok(self.function_arn(name, function.region.as_deref().unwrap_or_default()))
    }

    fn update_function_code(&self, name: &str, _region: &str, code: &str) -> ProviderResult<()> {
        self.record(format!("update_function_code {}", name))?;
        let mut state = lock(&self.state);
        let f = state
            .functions
            .get_mut(name)
            .ok_or_else(|| ProviderError::NotFound(format!("function {}", name)))?;
        f.code = Some(code.to_string());
        Ok(())
    }

    fn update_function_configuration(&self, function: &FunctionSettings) -> ProviderResult<String> {
        let name = function.name();
        self.record(format!("update_function_configuration {}", name))?;
        let mut state = lock(&self.state);
        let existing = state
            .functions
            .get_mut(name)
            .ok_or_else(|| ProviderError::NotFound(format!("function {}", name)))?;
        let code = existing.code.take();
        *existing = function.clone();
        existing.code = code.or_else(|| function.code.clone());
        Ok(self.function_arn(name, function.region.as_deref().unwrap_or_default()))
    }

    fn delete_function(&self, name: &str, _region: &str) -> ProviderResult<()> {
        self.record(format!("delete_function {}", name))?;
        lock(&self.state)
            .functions
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| ProviderError::NotFound(format!("function {}", name)))
    }

    fn get_function_arn(&self, name: &str, region: &str) -> ProviderResult<String> {
        self.record(format!("get_function_arn {}", name))?;
        if lock(&self.state).functions.contains_key(name) {
            Ok(self.function_arn(name, region))
        } else {
            Err(ProviderError::NotFound(format!("function {}", name)))
        }
    }

    // -- Buckets --

    fn create_bucket(&self, name: &str, _region: &str) -> ProviderResult<()> {
        self.record(format!("create_bucket {}", name))?;
        let mut state = lock(&self.state);
        if state.buckets.contains_key(name) {
            return Err(ProviderError::AlreadyExists(format!("bucket {}", name)));
        }
        state.buckets.insert(name.to_string(), Vec::new());
        Ok(())
    }

    fn configure_bucket(&self, bucket: &BucketSettings) -> ProviderResult<()> {
        let name = bucket.name();
        self.record(format!("configure_bucket {}", name))?;
        if lock(&self.state).buckets.contains_key(name) {
            Ok(())
        } else {
            Err(ProviderError::NotFound(format!("bucket {}", name)))
        }
    }

    fn list_objects(
        &self,
        bucket: &str,
        _region: &str,
        continuation: Option<&str>,
    ) -> ProviderResult<Page<String>> {
        self.record(format!("list_objects {}", bucket))?;
        let state = lock(&self.state);
        let objects = state
            .buckets
            .get(bucket)
            .ok_or_else(|| ProviderError::NotFound(format!("bucket {}", bucket)))?;
        Ok(paginate(objects, continuation, self.page_size))
    }

    fn delete_objects(&self, bucket: &str, _region: &str, keys: &[String]) -> ProviderResult<()> {
        self.record(format!("delete_objects {} {}", bucket, keys.len()))?;
        if keys.len() > MAX_DELETE_BATCH {
            return Err(ProviderError::CommandFailed(format!(
                "too many keys in one request: {}",
                keys.len()
            )));
        }
        let mut state = lock(&self.state);
        let objects = state
            .buckets
            .get_mut(bucket)
            .ok_or_else(|| ProviderError::NotFound(format!("bucket {}", bucket)))?;
        objects.retain(|k| !keys.contains(k));
        Ok(())
    }

    fn delete_bucket(&self, bucket: &str, _region: &str) -> ProviderResult<()> {
        self.record(format!("delete_bucket {}", bucket))?;
        let mut state = lock(&self.state);
        match state.buckets.get(bucket).map(Vec::len) {
            None => Err(ProviderError::NotFound(format!("bucket {}", bucket))),
            Some(count) if count > 0 => Err(ProviderError::CommandFailed(format!(
                "BucketNotEmpty: bucket {} still holds {} objects",
                bucket, count
            ))),
            Some(_) => {
                state.buckets.remove(bucket);
                Ok(())
            }
        }
    }

    // -- Gateways --

    fn create_api(&self, api: &ApiSpec) -> ProviderResult<String> {
        self.record(format!("create_api {}", api.name))?;
        let mut state = lock(&self.state);
        let id = state.next_id("api");
        state.apis.insert(
            id.clone(),
            MemApi {
                name: api.name.clone(),
                ..MemApi::default()
            },
        );
        Ok(id)
    }

    fn update_api(&self, api_id: &str, api: &ApiSpec) -> ProviderResult<()> {
        self.record(format!("update_api {}", api_id))?;
        let mut state = lock(&self.state);
        let existing = state
            .apis
            .get_mut(api_id)
            .ok_or_else(|| ProviderError::NotFound(format!("api {}", api_id)))?;
        existing.name = api.name.clone();
        Ok(())
    }

    fn find_api_id(&self, name: &str, _region: &str) -> ProviderResult<String> {
        self.record(format!("find_api_id {}", name))?;
        lock(&self.state)
            .apis
            .iter()
            .find(|(_, api)| api.name == name)
            .map(|(id, _)| id.clone())
            .ok_or_else(|| ProviderError::NotFound(format!("api {}", name)))
    }

    fn delete_api(&self, api_id: &str, _region: &str) -> ProviderResult<()> {
        self.record(format!("delete_api {}", api_id))?;
        lock(&self.state)
            .apis
            .remove(api_id)
            .map(|_| ())
            .ok_or_else(|| ProviderError::NotFound(format!("api {}", api_id)))
    }

    fn create_api_stage(&self, api_id: &str, _region: &str, stage: &ApiStage) -> ProviderResult<()> {
        self.record(format!("create_api_stage {} {}", api_id, stage.name))?;
        let mut state = lock(&self.state);
        let api = state
            .apis
            .get_mut(api_id)
            .ok_or_else(|| ProviderError::NotFound(format!("api {}", api_id)))?;
        if api.stages.contains(&stage.name) {
            return Err(ProviderError::AlreadyExists(format!("stage {}", stage.name)));
        }
        api.stages.push(stage.name.clone());
        Ok(())
    }

    fn create_integration(
        &self,
        api_id: &str,
        _region: &str,
        integration: &IntegrationSpec,
    ) -> ProviderResult<String> {
        self.record(format!("create_integration {} {}", api_id, integration.uri))?;
        let mut state = lock(&self.state);
        let id = state.next_id("int");
        let api = state
            .apis
            .get_mut(api_id)
            .ok_or_else(|| ProviderError::NotFound(format!("api {}", api_id)))?;
        api.integrations.push((id.clone(), integration.clone()));
        Ok(id)
    }

    fn list_integrations(&self, api_id: &str, _region: &str) -> ProviderResult<Vec<String>> {
        self.record(format!("list_integrations {}", api_id))?;
        Ok(self.integrations(api_id).into_iter().map(|(id, _)| id).collect())
    }

    fn delete_integration(&self, api_id: &str, _region: &str, integration_id: &str) -> ProviderResult<()> {
        self.record(format!("delete_integration {} {}", api_id, integration_id))?;
        let mut state = lock(&self.state);
        let api = state
            .apis
            .get_mut(api_id)
            .ok_or_else(|| ProviderError::NotFound(format!("api {}", api_id)))?;
        let before = api.integrations.len();
        api.integrations.retain(|(id, _)| id != integration_id);
        if api.integrations.len() == before {
            return Err(ProviderError::NotFound(format!("integration {}", integration_id)));
        }
        Ok(())
    }

    fn create_route(&self, api_id: &str, _region: &str, key: &str, target: &str) -> ProviderResult<String> {
        self.record(format!("create_route {} {} -> {}", api_id, key, target))?;
        let mut state = lock(&self.state);
        let id = state.next_id("route");
        let api = state
            .apis
            .get_mut(api_id)
            .ok_or_else(|| ProviderError::NotFound(format!("api {}", api_id)))?;
        if api.routes.iter().any(|(r, _)| r.key == key) {
            return Err(ProviderError::AlreadyExists(format!("route {}", key)));
        }
        let info = RouteInfo {
            id: id.clone(),
            key: key.to_string(),
        };
        api.routes.push((info, target.to_string()));
        Ok(id)
    }

    fn list_routes(&self, api_id: &str, _region: &str) -> ProviderResult<Vec<RouteInfo>> {
        self.record(format!("list_routes {}", api_id))?;
        Ok(lock(&self.state)
            .apis
            .get(api_id)
            .map(|api| api.routes.iter().map(|(r, _)| r.clone()).collect())
            .unwrap_or_default())
    }

    fn delete_route(&self, api_id: &str, _region: &str, route_id: &str) -> ProviderResult<()> {
        self.record(format!("delete_route {} {}", api_id, route_id))?;
        let mut state = lock(&self.state);
        let api = state
            .apis
            .get_mut(api_id)
            .ok_or_else(|| ProviderError::NotFound(format!("api {}", api_id)))?;
        api.routes.retain(|(r, _)| r.id != route_id);
        Ok(())
    }

    fn grant_invoke_permission(&self, grant: &InvokeGrant) -> ProviderResult<()> {
        self.record(format!(
            "grant_invoke_permission {} {}",
            grant.function, grant.statement_id
        ))?;
        let key = (grant.function.clone(), grant.statement_id.clone());
        if !lock(&self.state).grants.insert(key) {
            return Err(ProviderError::AlreadyExists(format!(
                "statement {} already exists",
                grant.statement_id
            )));
        }
        Ok(())
    }

    // -- Roles --

    fn create_role(&self, role: &RoleSpec) -> ProviderResult<String> {
        self.record(format!("create_role {}", role.name))?;
        let mut state = lock(&self.state);
        if state.roles.contains_key(&role.name) {
            return Err(ProviderError::AlreadyExists(format!("role {}", role.name)));
        }
        state.roles.insert(role.name.clone(), MemRole::default());
        Ok(self.role_arn(&role.name))
    }

    fn update_role(&self, role: &RoleSpec) -> ProviderResult<()> {
        self.record(format!("update_role {}", role.name))?;
        if lock(&self.state).roles.contains_key(&role.name) {
            Ok(())
        } else {
            Err(ProviderError::NotFound(format!("role {}", role.name)))
        }
    }

    fn get_role_arn(&self, name: &str) -> ProviderResult<String> {
        self.record(format!("get_role_arn {}", name))?;
        if lock(&self.state).roles.contains_key(name) {
            Ok(self.role_arn(name))
        } else {
            Err(ProviderError::NotFound(format!("role {}", name)))
        }
    }

    fn attach_role_policy(&self, role: &str, policy_arn: &str) -> ProviderResult<()> {
        self.record(format!("attach_role_policy {} {}", role, policy_arn))?;
        let mut state = lock(&self.state);
        let r = state
            .roles
            .get_mut(role)
            .ok_or_else(|| ProviderError::NotFound(format!("role {}", role)))?;
        if !r.attached.iter().any(|a| a == policy_arn) {
            r.attached.push(policy_arn.to_string());
        }
        Ok(())
    }

    fn put_role_policy(&self, role: &str, policy_name: &str, _document: &str) -> ProviderResult<()> {
        self.record(format!("put_role_policy {} {}", role, policy_name))?;
        let mut state = lock(&self.state);
        let r = state
            .roles
            .get_mut(role)
            .ok_or_else(|| ProviderError::NotFound(format!("role {}", role)))?;
        if !r.inline.iter().any(|p| p == policy_name) {
            r.inline.push(policy_name.to_string());
        }
        Ok(())
    }

    fn list_attached_role_policies(&self, role: &str, marker: Option<&str>) -> ProviderResult<Page<String>> {
        self.record(format!("list_attached_role_policies {}", role))?;
        let state = lock(&self.state);
        let r = state
            .roles
            .get(role)
            .ok_or_else(|| ProviderError::NotFound(format!("role {}", role)))?;
        Ok(paginate(&r.attached, marker, self.page_size))
    }

    fn detach_role_policy(&self, role: &str, policy_arn: &str) -> ProviderResult<()> {
        self.record(format!("detach_role_policy {} {}", role, policy_arn))?;
        let mut state = lock(&self.state);
        let r = state
            .roles
            .get_mut(role)
            .ok_or_else(|| ProviderError::NotFound(format!("role {}", role)))?;
        let before = r.attached.len();
        r.attached.retain(|a| a != policy_arn);
        if r.attached.len() == before {
            return Err(ProviderError::NotFound(format!("policy {}", policy_arn)));
        }
        Ok(())
    }

    fn list_role_policies(&self, role: &str, marker: Option<&str>) -> ProviderResult<Page<String>> {
        self.record(format!("list_role_policies {}", role))?;
        let state = lock(&self.state);
        let r = state
            .roles
            .get(role)
            .ok_or_else(|| ProviderError::NotFound(format!("role {}", role)))?;
        Ok(paginate(&r.inline, marker, self.page_size))
    }

    fn delete_role_policy(&self, role: &str, policy_name: &str) -> ProviderResult<()> {
        self.record(format!("delete_role_policy {} {}", role, policy_name))?;
        let mut state = lock(&self.state);
        let r = state
            .roles
            .get_mut(role)
            .ok_or_else(|| ProviderError::NotFound(format!("role {}", role)))?;
        let before = r.inline.len();
        r.inline.retain(|p| p != policy_name);
        if r.inline.len() == before {
            return Err(ProviderError::NotFound(format!("policy {}", policy_name)));
        }
        Ok(())
    }

    fn delete_role(&self, role: &str) -> ProviderResult<()> {
        self.record(format!("delete_role {}", role))?;
        let mut state = lock(&self.state);
        let has_policies = state
            .roles
            .get(role)
            .map(|r| !r.attached.is_empty() || !r.inline.is_empty());
        match has_policies {
            None => Err(ProviderError::NotFound(format!("role {}", role))),
            Some(true) => {
                Err(ProviderError::Conflict(format!(
                    "DeleteConflict: role {} still has policies",
                    role
                )))
            }
            Some(false) => {
                state.roles.remove(role);
                Ok(())
            }
        }
    }

    // -- Identity pools --

    fn create_user_pool(&self, pool: &IdentityPoolSettings) -> ProviderResult<String> {
        self.record(format!("create_user_pool {}", pool.name()))?;
        let mut state = lock(&self.state);
        let id = state.next_id("pool");
        state.pools.insert(
            id.clone(),
            MemPool {
                name: pool.name().to_string(),
                ..MemPool::default()
            },
        );
        Ok(id)
    }

    fn update_user_pool(&self, pool_id: &str, _pool: &IdentityPoolSettings) -> ProviderResult<()> {
        self.record(format!("update_user_pool {}", pool_id))?;
        if lock(&self.state).pools.contains_key(pool_id) {
            Ok(())
        } else {
            Err(ProviderError::NotFound(format!("user pool {}", pool_id)))
        }
    }

    fn find_user_pool_id(&self, name: &str, _region: &str) -> ProviderResult<String> {
        self.record(format!("find_user_pool_id {}", name))?;
        lock(&self.state)
            .pools
            .iter()
            .find(|(_, p)| p.name == name)
            .map(|(id, _)| id.clone())
            .ok_or_else(|| ProviderError::NotFound(format!("user pool {}", name)))
    }

    fn create_user_pool_client(&self, pool_id: &str, _region: &str, client: &AppClient) -> ProviderResult<String> {
        self.record(format!("create_user_pool_client {} {}", pool_id, client.name))?;
        let mut state = lock(&self.state);
        let id = state.next_id("client");
        let pool = state
            .pools
            .get_mut(pool_id)
            .ok_or_else(|| ProviderError::NotFound(format!("user pool {}", pool_id)))?;
        pool.clients.push(client.name.clone());
        Ok(id)
    }

    fn create_user_pool_domain(&self, pool_id: &str, _region: &str, domain: &str) -> ProviderResult<()> {
        self.record(format!("create_user_pool_domain {} {}", pool_id, domain))?;
        let mut state = lock(&self.state);
        let pool = state
            .pools
            .get_mut(pool_id)
            .ok_or_else(|| ProviderError::NotFound(format!("user pool {}", pool_id)))?;
        pool.domain = Some(domain.to_string());
        Ok(())
    }

    fn get_user_pool_domain(&self, pool_id: &str, _region: &str) -> ProviderResult<Option<String>> {
        self.record(format!("get_user_pool_domain {}", pool_id))?;
        lock(&self.state)
            .pools
            .get(pool_id)
            .map(|p| p.domain.clone())
            .ok_or_else(|| ProviderError::NotFound(format!("user pool {}", pool_id)))
    }

    fn delete_user_pool_domain(&self, pool_id: &str, _region: &str, domain: &str) -> ProviderResult<()> {
        self.record(format!("delete_user_pool_domain {} {}", pool_id, domain))?;
        let mut state = lock(&self.state);
        let pool = state
            .pools
            .get_mut(pool_id)
            .ok_or_else(|| ProviderError::NotFound(format!("user pool {}", pool_id)))?;
        pool.domain = None;
        Ok(())
    }

    fn delete_user_pool(&self, pool_id: &str, _region: &str) -> ProviderResult<()> {
        self.record(format!("delete_user_pool {}", pool_id))?;
        let mut state = lock(&self.state);
        match state.pools.get(pool_id).map(|p| p.domain.is_some()) {
            None => Err(ProviderError::NotFound(format!("user pool {}", pool_id))),
            Some(true) => Err(ProviderError::CommandFailed(format!(
                "user pool {} still has a domain",
                pool_id
            ))),
            Some(false) => {
                state.pools.remove(pool_id);
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_records_calls_in_order() {
        let p = MemoryProvider::new();
        p.create_bucket("a", "").unwrap();
        p.delete_bucket("a", "").unwrap();
        assert_eq!(p.calls(), vec!["create_bucket a", "delete_bucket a"]);
    }

    #[test]
    fn test_memory_injected_failure() {
        let p = MemoryProvider::new();
        p.fail_on("create_bucket b");
        assert!(p.create_bucket("a", "").is_ok());
        assert!(matches!(
            p.create_bucket("b", ""),
            Err(ProviderError::CommandFailed(_))
        ));
        assert_eq!(p.calls().len(), 2);
        assert!(p.bucket_objects("b").is_none());
    }

    #[test]
    fn test_memory_paginated_objects() {
        let p = MemoryProvider::new().with_page_size(2);
        p.add_bucket("b", &["k1", "k2", "k3"]);
        let first = p.list_objects("b", "", None).unwrap();
        assert_eq!(first.items, vec!["k1", "k2"]);
        let second = p.list_objects("b", "", first.next.as_deref()).unwrap();
        assert_eq!(second.items, vec!["k3"]);
        assert!(second.next.is_none());
    }

    #[test]
    fn test_memory_non_empty_bucket_delete_fails() {
        let p = MemoryProvider::new();
        p.add_bucket("b", &["k"]);
        assert!(p.delete_bucket("b", "").is_err());
        assert!(p.bucket_objects("b").is_some());
    }

    #[test]
    fn test_memory_duplicate_grant_already_exists() {
        let p = MemoryProvider::new();
        let grant = InvokeGrant {
            function: "fn".into(),
            region: "us-east-1".into(),
            statement_id: "apigateway-api-1-invoke".into(),
            source_arn: "arn".into(),
        };
        assert!(p.grant_invoke_permission(&grant).is_ok());
        let err = p.grant_invoke_permission(&grant).unwrap_err();
        assert!(matches!(err, ProviderError::AlreadyExists(_)));
    }

    #[test]
    fn test_memory_role_delete_requires_no_policies() {
        let p = MemoryProvider::new();
        p.add_role("r", &["arn:policy"], &[]);
        assert!(matches!(p.delete_role("r"), Err(ProviderError::Conflict(_))));
        p.detach_role_policy("r", "arn:policy").unwrap();
        assert!(p.delete_role("r").is_ok());
        assert!(p.delete_role("r").unwrap_err().is_not_found());
    }
}
