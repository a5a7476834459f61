//! HTTP gateway handler.
//!
//! A gateway is built in four steps: api, stages, integrations, routes.
//! Integrations may declare a `ref`; routes in the same gateway target an
//! integration through it. Those refs live in a scratch map while the
//! gateway is being built and reach the global store only once every step
//! has succeeded.

use super::{region, require, ResourceContext};
use crate::core::error::{Error, Result};
use crate::core::refs::ScopedRefs;
use crate::core::target::{function_name, resolve_target};
use crate::core::types::{GatewaySettings, Integration, Route, UniversalResourceDefinition};
use crate::provider::{ApiSpec, IntegrationSpec, InvokeGrant};
use std::collections::HashMap;
use tracing::{debug, info, warn};

const DEFAULT_PROTOCOL: &str = "HTTP";
const DEFAULT_INTEGRATION_TYPE: &str = "AWS_PROXY";
const DEFAULT_INTEGRATION_METHOD: &str = "POST";
const DEFAULT_PAYLOAD_VERSION: &str = "2.0";

pub fn missing_required_fields(gateway: &GatewaySettings) -> Vec<&'static str> {
    let mut missing = Vec::new();
    require(&mut missing, "name", &gateway.name);
    missing
}

fn api_spec(gateway: &GatewaySettings) -> ApiSpec {
    ApiSpec {
        name: gateway.name().to_string(),
        region: region(&gateway.region).to_string(),
        protocol: gateway
            .protocol
            .as_deref()
            .filter(|p| !p.is_empty())
            .unwrap_or(DEFAULT_PROTOCOL)
            .to_uppercase(),
        description: gateway.description.clone(),
        tags: gateway
            .tags
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect(),
    }
}

/// Provider spelling of an integration type.
fn integration_type(value: Option<&str>) -> String {
    match value.map(str::trim).filter(|v| !v.is_empty()) {
        None => DEFAULT_INTEGRATION_TYPE.to_string(),
        Some(v) => match v.to_ascii_lowercase().as_str() {
            "proxy" | "aws_proxy" | "lambda" => DEFAULT_INTEGRATION_TYPE.to_string(),
            "http" | "http_proxy" => "HTTP_PROXY".to_string(),
            _ => v.to_uppercase(),
        },
    }
}

pub fn deploy_create(ctx: &ResourceContext, gateway: &GatewaySettings) -> Result<()> {
    info!("Creating gateway {}", gateway.name());
    let spec = api_spec(gateway);
    let api_id = ctx.provider.create_api(&spec)?;
    info!("Created gateway {} ({})", gateway.name(), api_id);

    for stage in gateway.stages.iter().flatten() {
        debug!("Creating stage {} on {}", stage.name, api_id);
        ctx.provider.create_api_stage(&api_id, &spec.region, stage)?;
    }

    let scratch = add_integrations(ctx, gateway, &api_id)?;
    add_routes(ctx, &gateway.routes, &scratch, &api_id, &spec.region)?;
    commit_refs(ctx, scratch);
    Ok(())
}

/// Routes and integrations have no update operation: matching routes and
/// every integration are deleted, then both are recreated.
pub fn deploy_update(ctx: &ResourceContext, gateway: &GatewaySettings) -> Result<()> {
    info!("Updating gateway {}", gateway.name());
    let spec = api_spec(gateway);
    let api_id = ctx.provider.find_api_id(gateway.name(), &spec.region)?;
    ctx.provider.update_api(&api_id, &spec)?;

    let existing_integrations = ctx.provider.list_integrations(&api_id, &spec.region)?;
    let existing_routes: HashMap<String, String> = ctx
        .provider
        .list_routes(&api_id, &spec.region)?
        .into_iter()
        .map(|r| (r.key, r.id))
        .collect();

    for route in &gateway.routes {
        let key = route.key();
        match existing_routes.get(&key) {
            Some(route_id) => {
                debug!("Deleting route {}", key);
                ctx.provider.delete_route(&api_id, &spec.region, route_id)?;
            }
            None => warn!("Route {} not found on {}, skipping delete", key, gateway.name()),
        }
    }

    for integration_id in &existing_integrations {
        debug!("Deleting integration {}", integration_id);
        if let Err(e) = ctx
            .provider
            .delete_integration(&api_id, &spec.region, integration_id)
        {
            warn!("Could not delete integration {}: {}", integration_id, e);
        }
    }

    let scratch = add_integrations(ctx, gateway, &api_id)?;
    add_routes(ctx, &gateway.routes, &scratch, &api_id, &spec.region)?;
    commit_refs(ctx, scratch);
    info!("Updated gateway {}", gateway.name());
    Ok(())
}

/// Create every integration; returns the `ref -> integration id` scratch map.
fn add_integrations(
    ctx: &ResourceContext,
    gateway: &GatewaySettings,
    api_id: &str,
) -> Result<HashMap<String, String>> {
    let region = region(&gateway.region);
    let mut scratch = HashMap::new();

    for integration in &gateway.integrations {
        let backend = {
            let lookup = ScopedRefs {
                local: &scratch,
                global: ctx.refs,
            };
            resolve_target(&integration.target, &lookup, ctx.provider)?
        };

        let integration_id = ctx.provider.create_integration(
            api_id,
            region,
            &IntegrationSpec {
                integration_type: integration_type(integration.integration_type.as_deref()),
                method: integration
                    .integration_method
                    .clone()
                    .unwrap_or_else(|| DEFAULT_INTEGRATION_METHOD.to_string()),
                payload_version: integration
                    .payload_version
                    .clone()
                    .unwrap_or_else(|| DEFAULT_PAYLOAD_VERSION.to_string()),
                uri: backend.clone(),
            },
        )?;
        debug!("Created integration {} -> {}", integration_id, backend);

        if let Some(reference) = integration.reference.as_deref().filter(|r| !r.is_empty()) {
            scratch.insert(reference.to_string(), integration_id);
        }

        grant_invoke(ctx, integration, &backend, api_id, region)?;
    }

    info!("Finished creating integrations for {}", gateway.name());
    Ok(scratch)
}

/// Let the gateway invoke the integration's backing function.
fn grant_invoke(
    ctx: &ResourceContext,
    integration: &Integration,
    backend: &str,
    api_id: &str,
    region: &str,
) -> Result<()> {
    let Some(function) = function_name(&integration.target, backend) else {
        debug!("Integration target {} is not a function, no grant needed", backend);
        return Ok(());
    };

    let account = ctx.provider.account_id()?;
    let grant = InvokeGrant {
        function,
        region: region.to_string(),
        statement_id: format!("apigateway-{}-invoke", api_id),
        source_arn: format!("arn:aws:execute-api:{}:{}:{}/*/*/*", region, account, api_id),
    };

    match ctx.provider.grant_invoke_permission(&grant) {
        Err(e) if e.is_already_exists() => {
            debug!("Permission already exists for target {}", backend);
            Ok(())
        }
        other => other.map_err(Error::from),
    }
}

fn add_routes(
    ctx: &ResourceContext,
    routes: &[Route],
    scratch: &HashMap<String, String>,
    api_id: &str,
    region: &str,
) -> Result<()> {
    let lookup = ScopedRefs {
        local: scratch,
        global: ctx.refs,
    };
    for route in routes {
        let key = route.key();
        let integration_id = resolve_target(&route.target, &lookup, ctx.provider)?;
        ctx.provider
            .create_route(api_id, region, &key, &format!("integrations/{}", integration_id))?;
        debug!("Created route {}", key);
    }
    Ok(())
}

fn commit_refs(ctx: &ResourceContext, scratch: HashMap<String, String>) {
    for (reference, id) in scratch {
        ctx.refs.set(&reference, &id);
    }
}

/// Delete by display name; an absent gateway is a no-op.
pub fn destroy(ctx: &ResourceContext, resource: &UniversalResourceDefinition) -> Result<()> {
    info!("Deleting gateway {}", resource.name);
    let api_id = match ctx.provider.find_api_id(&resource.name, &resource.region) {
        Ok(id) => id,
        Err(e) if e.is_not_found() => {
            debug!("Gateway {} did not exist, no action taken", resource.name);
            return Ok(());
        }
        Err(e) => return Err(e.into()),
    };
    super::ignore_not_found(
        ctx.provider.delete_api(&api_id, &resource.region),
        &format!("gateway {}", resource.name),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::ProviderError;
    use crate::core::refs::{RefLookup, RefStore};
    use crate::core::types::{ApiStage, DynamicTarget, ExternalReference, ResourceTarget, StageType};
    use crate::provider::{CloudProvider, MemoryProvider};

    fn lambda_target(name: &str) -> ResourceTarget {
        ResourceTarget {
            reference: None,
            external: Some(ExternalReference {
                arn: None,
                dynamic: Some(DynamicTarget {
                    name: name.into(),
                    region: "us-east-1".into(),
                    target_type: "lambda".into(),
                }),
            }),
        }
    }

    fn ref_target(reference: &str) -> ResourceTarget {
        ResourceTarget {
            reference: Some(reference.into()),
            external: None,
        }
    }

    fn users_api(integration_ref: Option<&str>) -> GatewaySettings {
        GatewaySettings {
            name: Some("users-api".into()),
            region: Some("us-east-1".into()),
            integrations: vec![Integration {
                reference: integration_ref.map(String::from),
                target: lambda_target("users"),
                ..Integration::default()
            }],
            routes: vec![Route {
                method: "GET".into(),
                route: "/users".into(),
                target: ref_target("api-int"),
            }],
            ..GatewaySettings::default()
        }
    }

    #[test]
    fn test_gateway_integration_ref_feeds_route() {
        let provider = MemoryProvider::new();
        provider.add_function("users");
        let refs = RefStore::new();
        let ctx = ResourceContext::new(&provider, &refs);

        deploy_create(&ctx, &users_api(Some("api-int"))).unwrap();

        let api_id = provider.find_api_id("users-api", "").unwrap();
        let integrations = provider.integrations(&api_id);
        assert_eq!(integrations.len(), 1);
        let (integration_id, uri) = &integrations[0];
        assert_eq!(uri, "arn:aws:lambda:us-east-1:123456789012:function:users");
        assert_eq!(
            provider.routes(&api_id),
            vec![("GET /users".to_string(), format!("integrations/{}", integration_id))]
        );
        assert_eq!(refs.resolve("api-int").unwrap(), *integration_id);

        let calls = provider.calls();
        let integration_at = calls.iter().position(|c| c.starts_with("create_integration")).unwrap();
        let route_at = calls.iter().position(|c| c.starts_with("create_route")).unwrap();
        assert!(integration_at < route_at);
    }

    #[test]
    fn test_gateway_route_fails_without_integration_ref() {
        let provider = MemoryProvider::new();
        provider.add_function("users");
        let refs = RefStore::new();
        let ctx = ResourceContext::new(&provider, &refs);

        let err = deploy_create(&ctx, &users_api(None)).unwrap_err();
        assert!(matches!(err, Error::UndefinedRef(r) if r == "api-int"));

        let api_id = provider.find_api_id("users-api", "").unwrap();
        assert_eq!(provider.integrations(&api_id).len(), 1);
        assert!(provider.routes(&api_id).is_empty());
        assert!(refs.snapshot().is_empty());
    }

    #[test]
    fn test_gateway_refs_not_committed_on_failure() {
        let provider = MemoryProvider::new();
        provider.add_function("users");
        let refs = RefStore::new();
        let ctx = ResourceContext::new(&provider, &refs);

        let mut gateway = users_api(Some("api-int"));
        gateway.routes.push(Route {
            method: "POST".into(),
            route: "/users".into(),
            target: ref_target("missing"),
        });
        assert!(deploy_create(&ctx, &gateway).is_err());
        assert!(refs.resolve("api-int").is_err());
    }

    #[test]
    fn test_gateway_grant_already_exists_is_success() {
        let provider = MemoryProvider::new();
        provider.add_function("users");
        let refs = RefStore::new();
        let ctx = ResourceContext::new(&provider, &refs);

        let mut gateway = users_api(Some("api-int"));
        gateway.integrations.push(Integration {
            reference: Some("second".into()),
            target: lambda_target("users"),
            ..Integration::default()
        });
        gateway.routes.clear();
        deploy_create(&ctx, &gateway).unwrap();

        let grants = provider
            .calls()
            .into_iter()
            .filter(|c| c.starts_with("grant_invoke_permission users apigateway-"))
            .count();
        assert_eq!(grants, 2);
    }

    #[test]
    fn test_gateway_grant_failure_fails_gateway() {
        let provider = MemoryProvider::new();
        provider.add_function("users");
        let api_id_after_create = "api-1";
        provider.fail_on(&format!(
            "grant_invoke_permission users apigateway-{}-invoke",
            api_id_after_create
        ));
        let refs = RefStore::new();
        let ctx = ResourceContext::new(&provider, &refs);
        assert!(deploy_create(&ctx, &users_api(Some("api-int"))).is_err());
        assert!(provider.call_index("create_route").is_none());
    }

    #[test]
    fn test_gateway_grant_conflict_fails_gateway() {
        let provider = MemoryProvider::new();
        provider.add_function("users");
        provider.conflict_on("grant_invoke_permission users apigateway-api-1-invoke");
        let refs = RefStore::new();
        let ctx = ResourceContext::new(&provider, &refs);

        let err = deploy_create(&ctx, &users_api(Some("api-int"))).unwrap_err();
        assert!(matches!(err, Error::Provider(ProviderError::Conflict(_))));
        assert!(provider.call_index("create_route").is_none());
        assert!(refs.resolve("api-int").is_err());
    }

    #[test]
    fn test_gateway_creates_stages_before_integrations() {
        let provider = MemoryProvider::new();
        provider.add_function("users");
        let refs = RefStore::new();
        let ctx = ResourceContext::new(&provider, &refs);

        let mut gateway = users_api(Some("api-int"));
        gateway.stages = Some(vec![ApiStage {
            name: "$default".into(),
            auto_deploy: true,
            ..ApiStage::default()
        }]);
        deploy_create(&ctx, &gateway).unwrap();
        let stage_at = provider.call_index("create_api_stage").unwrap();
        let integration_at = provider.call_index("create_integration").unwrap();
        assert!(stage_at < integration_at);
    }

    #[test]
    fn test_gateway_update_recreates_routes_and_integrations() {
        let provider = MemoryProvider::new();
        provider.add_function("users");
        let refs = RefStore::new();
        let ctx = ResourceContext::new(&provider, &refs);
        deploy_create(&ctx, &users_api(Some("api-int"))).unwrap();
        let api_id = provider.find_api_id("users-api", "").unwrap();
        let (old_integration, _) = provider.integrations(&api_id)[0].clone();
        provider.clear_calls();

        deploy_update(&ctx, &users_api(Some("api-int"))).unwrap();

        let calls = provider.calls();
        let route_delete = calls.iter().position(|c| c.starts_with("delete_route")).unwrap();
        let integration_delete = calls
            .iter()
            .position(|c| c == &format!("delete_integration {} {}", api_id, old_integration))
            .unwrap();
        let integration_create = calls.iter().position(|c| c.starts_with("create_integration")).unwrap();
        let route_create = calls.iter().position(|c| c.starts_with("create_route")).unwrap();
        assert!(route_delete < integration_delete);
        assert!(integration_delete < integration_create);
        assert!(integration_create < route_create);

        let integrations = provider.integrations(&api_id);
        assert_eq!(integrations.len(), 1);
        assert_ne!(integrations[0].0, old_integration);
        assert_eq!(provider.routes(&api_id).len(), 1);
        assert_eq!(refs.resolve("api-int").unwrap(), integrations[0].0);
    }

    #[test]
    fn test_gateway_update_missing_route_is_not_an_error() {
        let provider = MemoryProvider::new();
        provider.add_function("users");
        provider.add_api("users-api");
        let refs = RefStore::new();
        let ctx = ResourceContext::new(&provider, &refs);
        deploy_update(&ctx, &users_api(Some("api-int"))).unwrap();
        assert!(provider.call_index("delete_route").is_none());
    }

    #[test]
    fn test_gateway_integration_type_normalized() {
        assert_eq!(integration_type(None), "AWS_PROXY");
        assert_eq!(integration_type(Some("proxy")), "AWS_PROXY");
        assert_eq!(integration_type(Some("http")), "HTTP_PROXY");
        assert_eq!(integration_type(Some("mock")), "MOCK");
    }

    #[test]
    fn test_gateway_destroy_absent_is_noop() {
        let provider = MemoryProvider::new();
        let refs = RefStore::new();
        let ctx = ResourceContext::new(&provider, &refs);
        let resource = UniversalResourceDefinition {
            stage_name: "api".into(),
            name: "ghost".into(),
            arn: String::new(),
            resource_type: StageType::Gateway,
            region: String::new(),
        };
        assert!(destroy(&ctx, &resource).is_ok());
        assert!(provider.call_index("delete_api").is_none());

        provider.add_api("ghost");
        destroy(&ctx, &resource).unwrap();
        assert!(provider.api_names().is_empty());
    }
}
