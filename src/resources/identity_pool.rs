//! Identity (user) pool handler.

use super::{region, register_ref, require, ResourceContext};
use crate::core::error::Result;
use crate::core::types::{IdentityPoolSettings, UniversalResourceDefinition};
use tracing::{debug, info, warn};

pub fn missing_required_fields(pool: &IdentityPoolSettings) -> Vec<&'static str> {
    let mut missing = Vec::new();
    require(&mut missing, "applicationName", &pool.name);
    missing
}

/// Pool, then app clients, then the hosted domain.
///
/// A domain failure only warns: the pool and its clients are usable without it.
pub fn deploy_create(ctx: &ResourceContext, pool: &IdentityPoolSettings) -> Result<()> {
    info!("Creating identity pool {}", pool.name());
    let region = region(&pool.region);
    let pool_id = ctx.provider.create_user_pool(pool)?;

    for client in &pool.app_clients {
        let client_id = ctx.provider.create_user_pool_client(&pool_id, region, client)?;
        debug!("Created app client {} ({})", client.name, client_id);
    }

    let domain = pool
        .domain_prefix
        .as_deref()
        .filter(|d| !d.is_empty())
        .unwrap_or(&pool_id);
    if let Err(e) = ctx.provider.create_user_pool_domain(&pool_id, region, domain) {
        warn!("Could not create domain {} for {}: {}", domain, pool.name(), e);
    }

    register_ref(ctx.refs, &pool.reference, &pool_id);
    info!("Created identity pool {} ({})", pool.name(), pool_id);
    Ok(())
}

pub fn deploy_update(ctx: &ResourceContext, pool: &IdentityPoolSettings) -> Result<()> {
    info!("Updating identity pool {}", pool.name());
    let pool_id = ctx.provider.find_user_pool_id(pool.name(), region(&pool.region))?;
    ctx.provider.update_user_pool(&pool_id, pool)?;
    register_ref(ctx.refs, &pool.reference, &pool_id);
    info!("Updated identity pool {}", pool.name());
    Ok(())
}

/// Delete the hosted domain (if any), then the pool. Absent is a no-op.
pub fn destroy(ctx: &ResourceContext, resource: &UniversalResourceDefinition) -> Result<()> {
    info!("Deleting identity pool {}", resource.name);
    let pool_id = match ctx.provider.find_user_pool_id(&resource.name, &resource.region) {
        Ok(id) => id,
        Err(e) if e.is_not_found() => {
            debug!("Identity pool {} did not exist, no action taken", resource.name);
            return Ok(());
        }
        Err(e) => return Err(e.into()),
    };

    if let Some(domain) = ctx.provider.get_user_pool_domain(&pool_id, &resource.region)? {
        debug!("Deleting domain {} of {}", domain, resource.name);
        ctx.provider
            .delete_user_pool_domain(&pool_id, &resource.region, &domain)?;
    }
    ctx.provider.delete_user_pool(&pool_id, &resource.region)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::refs::{RefLookup, RefStore};
    use crate::core::types::{AppClient, StageType};
    use crate::provider::MemoryProvider;

    fn pool(name: &str) -> IdentityPoolSettings {
        IdentityPoolSettings {
            name: Some(name.into()),
            reference: Some("users-pool".into()),
            app_clients: vec![AppClient {
                name: "web".into(),
                client_type: "public".into(),
                return_urls: vec!["https://example.com/callback".into()],
                logout_urls: vec![],
            }],
            ..IdentityPoolSettings::default()
        }
    }

    fn urd(name: &str) -> UniversalResourceDefinition {
        UniversalResourceDefinition {
            stage_name: "auth".into(),
            name: name.into(),
            arn: String::new(),
            resource_type: StageType::IdentityPool,
            region: String::new(),
        }
    }

    #[test]
    fn test_identity_pool_create_clients_and_default_domain() {
        let provider = MemoryProvider::new();
        let refs = RefStore::new();
        let ctx = ResourceContext::new(&provider, &refs);
        deploy_create(&ctx, &pool("users")).unwrap();

        let pool_id = refs.resolve("users-pool").unwrap();
        let (clients, domain) = provider.pool_clients(&pool_id).unwrap();
        assert_eq!(clients, vec!["web"]);
        assert_eq!(domain.as_deref(), Some(pool_id.as_str()));
    }

    #[test]
    fn test_identity_pool_domain_failure_is_warning() {
        let provider = MemoryProvider::new();
        provider.fail_on("create_user_pool_domain pool-1 custom");
        let refs = RefStore::new();
        let ctx = ResourceContext::new(&provider, &refs);
        let mut p = pool("users");
        p.domain_prefix = Some("custom".into());
        assert!(deploy_create(&ctx, &p).is_ok());
    }

    #[test]
    fn test_identity_pool_update_requires_existing() {
        let provider = MemoryProvider::new();
        let refs = RefStore::new();
        let ctx = ResourceContext::new(&provider, &refs);
        assert!(deploy_update(&ctx, &pool("users")).is_err());

        let id = provider.add_user_pool("users", None);
        deploy_update(&ctx, &pool("users")).unwrap();
        assert_eq!(refs.resolve("users-pool").unwrap(), id);
    }

    #[test]
    fn test_identity_pool_destroy_removes_domain_first() {
        let provider = MemoryProvider::new();
        let id = provider.add_user_pool("users", Some("users-auth"));
        let refs = RefStore::new();
        let ctx = ResourceContext::new(&provider, &refs);

        destroy(&ctx, &urd("users")).unwrap();

        let domain_at = provider
            .call_index(&format!("delete_user_pool_domain {}", id))
            .unwrap();
        let pool_at = provider.call_index(&format!("delete_user_pool {}", id)).unwrap();
        assert!(domain_at < pool_at);
        assert!(provider.pool_names().is_empty());
    }

    #[test]
    fn test_identity_pool_destroy_absent_is_noop() {
        let provider = MemoryProvider::new();
        let refs = RefStore::new();
        let ctx = ResourceContext::new(&provider, &refs);
        assert!(destroy(&ctx, &urd("ghost")).is_ok());
    }
}
