//! Resource handlers: one module per resource kind.
//!
//! Each handler exposes:
//! 1. `deploy_create` / `deploy_update`: converge one desired resource
//! 2. `destroy`: remove one resource, including any cascade it needs
//! 3. `missing_required_fields`: fields that must be set after defaults merge
//!
//! Handlers return `Err` for the single resource they act on; the executor
//! logs it and moves on to the next resource.

pub mod bucket;
pub mod function;
pub mod gateway;
pub mod identity_pool;
pub mod role;

use crate::core::error::{Error, ProviderError, Result};
use crate::core::refs::RefStore;
use crate::core::types::StageResources;
use crate::provider::CloudProvider;
use std::time::Duration;
use tracing::debug;

/// Delay between a function's code update and its configuration update.
pub const DEFAULT_SETTLE_DELAY: Duration = Duration::from_secs(5);

/// Everything a handler needs to talk to the account.
pub struct ResourceContext<'a> {
    pub provider: &'a dyn CloudProvider,
    pub refs: &'a RefStore,
    pub settle_delay: Duration,
}

impl<'a> ResourceContext<'a> {
    pub fn new(provider: &'a dyn CloudProvider, refs: &'a RefStore) -> Self {
        Self {
            provider,
            refs,
            settle_delay: DEFAULT_SETTLE_DELAY,
        }
    }

    pub fn with_settle_delay(mut self, delay: Duration) -> Self {
        self.settle_delay = delay;
        self
    }
}

/// Region of a resource, empty for the provider default.
pub(crate) fn region(region: &Option<String>) -> &str {
    region.as_deref().unwrap_or_default()
}

/// Register `id` under the resource's declared ref, if any.
pub(crate) fn register_ref(refs: &RefStore, reference: &Option<String>, id: &str) {
    if let Some(r) = reference.as_deref().filter(|r| !r.is_empty()) {
        refs.set(r, id);
    }
}

/// Push `field` when an optional string is unset or empty.
pub(crate) fn require(missing: &mut Vec<&'static str>, field: &'static str, value: &Option<String>) {
    if value.as_deref().map_or(true, str::is_empty) {
        missing.push(field);
    }
}

/// Turn a "not found" provider error into a logged no-op.
pub(crate) fn ignore_not_found(
    result: std::result::Result<(), ProviderError>,
    what: &str,
) -> Result<()> {
    match result {
        Err(e) if e.is_not_found() => {
            debug!("{} did not exist, no action taken", what);
            Ok(())
        }
        other => other.map_err(Error::from),
    }
}

/// `(resource name, field)` for every required field left unset after the
/// defaults merge.
pub fn missing_fields(resources: &StageResources) -> Vec<(String, &'static str)> {
    fn collect<T>(
        items: &[T],
        name: impl Fn(&T) -> &str,
        check: impl Fn(&T) -> Vec<&'static str>,
    ) -> Vec<(String, &'static str)> {
        items
            .iter()
            .flat_map(|item| {
                let n = name(item).to_string();
                check(item).into_iter().map(move |field| (n.clone(), field))
            })
            .collect()
    }

    match resources {
        StageResources::Unloaded => Vec::new(),
        StageResources::Functions(v) => collect(v, |r| r.name(), function::missing_required_fields),
        StageResources::Buckets(v) => collect(v, |r| r.name(), bucket::missing_required_fields),
        StageResources::Gateways(v) => collect(v, |r| r.name(), gateway::missing_required_fields),
        StageResources::Roles(v) => collect(v, |r| r.name(), role::missing_required_fields),
        StageResources::IdentityPools(v) => {
            collect(v, |r| r.name(), identity_pool::missing_required_fields)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resources_require() {
        let mut missing = Vec::new();
        require(&mut missing, "a", &None);
        require(&mut missing, "b", &Some(String::new()));
        require(&mut missing, "c", &Some("x".into()));
        assert_eq!(missing, vec!["a", "b"]);
    }

    #[test]
    fn test_resources_register_ref_skips_empty() {
        let refs = RefStore::new();
        register_ref(&refs, &Some(String::new()), "id");
        register_ref(&refs, &None, "id");
        assert!(refs.snapshot().is_empty());
        register_ref(&refs, &Some("r".into()), "id");
        assert_eq!(refs.snapshot().get("r").map(String::as_str), Some("id"));
    }

    #[test]
    fn test_resources_missing_fields_by_resource() {
        use crate::core::types::FunctionSettings;
        let resources = StageResources::Functions(vec![FunctionSettings {
            name: Some("api".into()),
            handler: Some("h".into()),
            runtime: Some("r".into()),
            code: Some("c".into()),
            ..FunctionSettings::default()
        }]);
        assert_eq!(missing_fields(&resources), vec![("api".to_string(), "roleArn")]);
        assert!(missing_fields(&StageResources::Unloaded).is_empty());
    }

    #[test]
    fn test_resources_ignore_not_found() {
        assert!(ignore_not_found(Err(ProviderError::NotFound("x".into())), "x").is_ok());
        assert!(ignore_not_found(Err(ProviderError::CommandFailed("x".into())), "x").is_err());
        assert!(ignore_not_found(Ok(()), "x").is_ok());
    }
}
