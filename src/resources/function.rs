//! Serverless function handler.

use super::{ignore_not_found, region, register_ref, require, ResourceContext};
use crate::core::error::Result;
use crate::core::refs::{self, RefLookup};
use crate::core::types::{FunctionSettings, UniversalResourceDefinition};
use tracing::{debug, info};

pub fn missing_required_fields(function: &FunctionSettings) -> Vec<&'static str> {
    let mut missing = Vec::new();
    require(&mut missing, "name", &function.name);
    require(&mut missing, "roleArn", &function.role_arn);
    require(&mut missing, "handler", &function.handler);
    require(&mut missing, "runtime", &function.runtime);
    require(&mut missing, "code", &function.code);
    missing
}

/// Copy of the settings with a `[[ref]]` role resolved to its ARN.
fn with_resolved_role(ctx: &ResourceContext, function: &FunctionSettings) -> Result<FunctionSettings> {
    let mut resolved = function.clone();
    if let Some(role) = function.role_arn.as_deref().filter(|r| refs::is_ref(r)) {
        resolved.role_arn = Some(ctx.refs.resolve(role)?);
    }
    Ok(resolved)
}

pub fn deploy_create(ctx: &ResourceContext, function: &FunctionSettings) -> Result<()> {
    info!("Creating function {}", function.name());
    let resolved = with_resolved_role(ctx, function)?;
    let arn = ctx.provider.create_function(&resolved)?;
    register_ref(ctx.refs, &function.reference, &arn);
    info!("Created function {}", function.name());
    Ok(())
}

/// Code update, settle delay, then configuration update.
pub fn deploy_update(ctx: &ResourceContext, function: &FunctionSettings) -> Result<()> {
    info!("Updating function {}", function.name());
    let resolved = with_resolved_role(ctx, function)?;
    let code = function.code.as_deref().unwrap_or_default();

    ctx.provider
        .update_function_code(function.name(), region(&function.region), code)?;

    if !ctx.settle_delay.is_zero() {
        debug!("Waiting {:?} before updating configuration", ctx.settle_delay);
        std::thread::sleep(ctx.settle_delay);
    }

    let arn = ctx.provider.update_function_configuration(&resolved)?;
    register_ref(ctx.refs, &function.reference, &arn);
    info!("Updated function {}", function.name());
    Ok(())
}

pub fn destroy(ctx: &ResourceContext, resource: &UniversalResourceDefinition) -> Result<()> {
    info!("Deleting function {}", resource.name);
    ignore_not_found(
        ctx.provider.delete_function(&resource.name, &resource.region),
        &format!("function {}", resource.name),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::Error;
    use crate::core::refs::RefStore;
    use crate::core::types::StageType;
    use crate::provider::MemoryProvider;
    use std::time::Duration;

    fn sample(name: &str) -> FunctionSettings {
        FunctionSettings {
            name: Some(name.into()),
            reference: Some(format!("{}-fn", name)),
            region: Some("us-east-1".into()),
            role_arn: Some("arn:aws:iam::1:role/exec".into()),
            handler: Some("index.handler".into()),
            runtime: Some("nodejs20.x".into()),
            code: Some("dist/app.zip".into()),
            ..FunctionSettings::default()
        }
    }

    fn urd(name: &str) -> UniversalResourceDefinition {
        UniversalResourceDefinition {
            stage_name: "fns".into(),
            name: name.into(),
            arn: String::new(),
            resource_type: StageType::Function,
            region: "us-east-1".into(),
        }
    }

    #[test]
    fn test_function_missing_fields() {
        let missing = missing_required_fields(&FunctionSettings {
            name: Some("a".into()),
            ..FunctionSettings::default()
        });
        assert_eq!(missing, vec!["roleArn", "handler", "runtime", "code"]);
        assert!(missing_required_fields(&sample("a")).is_empty());
    }

    #[test]
    fn test_function_create_registers_ref() {
        let provider = MemoryProvider::new();
        let refs = RefStore::new();
        let ctx = ResourceContext::new(&provider, &refs);
        deploy_create(&ctx, &sample("api")).unwrap();
        assert!(provider.has_function("api"));
        assert_eq!(
            refs.resolve("api-fn").unwrap(),
            "arn:aws:lambda:us-east-1:123456789012:function:api"
        );
    }

    #[test]
    fn test_function_role_ref_resolved() {
        let provider = MemoryProvider::new();
        let refs = RefStore::new();
        refs.set("exec-role", "arn:aws:iam::1:role/from-ref");
        let ctx = ResourceContext::new(&provider, &refs);
        let mut f = sample("api");
        f.role_arn = Some("[[exec-role]]".into());
        deploy_create(&ctx, &f).unwrap();
        assert_eq!(
            provider.function("api").unwrap().role_arn.as_deref(),
            Some("arn:aws:iam::1:role/from-ref")
        );
    }

    #[test]
    fn test_function_unresolved_role_ref_fails_without_create() {
        let provider = MemoryProvider::new();
        let refs = RefStore::new();
        let ctx = ResourceContext::new(&provider, &refs);
        let mut f = sample("api");
        f.role_arn = Some("[[missing]]".into());
        assert!(matches!(deploy_create(&ctx, &f), Err(Error::UndefinedRef(_))));
        assert!(provider.calls().is_empty());
    }

    #[test]
    fn test_function_update_code_then_configuration() {
        let provider = MemoryProvider::new();
        provider.add_function("api");
        let refs = RefStore::new();
        let ctx = ResourceContext::new(&provider, &refs).with_settle_delay(Duration::ZERO);
        deploy_update(&ctx, &sample("api")).unwrap();
        assert_eq!(
            provider.calls(),
            vec!["update_function_code api", "update_function_configuration api"]
        );
        assert!(refs.resolve("api-fn").is_ok());
    }

    #[test]
    fn test_function_failed_create_registers_nothing() {
        let provider = MemoryProvider::new();
        provider.fail_on("create_function api");
        let refs = RefStore::new();
        let ctx = ResourceContext::new(&provider, &refs);
        assert!(deploy_create(&ctx, &sample("api")).is_err());
        assert!(refs.snapshot().is_empty());
    }

    #[test]
    fn test_function_destroy_missing_is_noop() {
        let provider = MemoryProvider::new();
        let refs = RefStore::new();
        let ctx = ResourceContext::new(&provider, &refs);
        assert!(destroy(&ctx, &urd("ghost")).is_ok());
        provider.add_function("real");
        destroy(&ctx, &urd("real")).unwrap();
        assert!(!provider.has_function("real"));
    }
}
