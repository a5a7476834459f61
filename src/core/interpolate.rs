//! Variable interpolation over configuration trees.
//!
//! Every string leaf reachable from a value gets two passes:
//! 1. literal `{{name}}` placeholders are replaced from the variable map
//!    (unmatched placeholders are kept verbatim)
//! 2. `$NAME` / `${NAME}` are expanded from the process environment
//!    (unset variables expand to the empty string)
//!
//! The literal value `$default` is a provider passthrough marker and is never
//! environment-expanded.
//!
//! Config types opt in through the [`Interpolate`] trait. Records list their
//! string-bearing fields once in `interpolate_fields!`; options, lists, boxes
//! and string maps recurse generically.

use super::types::*;
use indexmap::IndexMap;
use regex::Regex;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::LazyLock;

/// Provider-default marker, left untouched by environment expansion.
pub const DEFAULT_SENTINEL: &str = "$default";

static ENV_REF: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$(?:\{([^}]*)\}|([A-Za-z0-9_]+))").unwrap());

/// A value whose string leaves can be rewritten in place.
pub trait Interpolate {
    fn interpolate(&mut self, vars: &Variables);
}

/// Resolve a single string: placeholders first, then the environment.
pub fn resolve_variable(value: &str, vars: &Variables) -> String {
    let substituted = replace_placeholders(value, vars);
    expand_env(&substituted)
}

/// Replace every `{{name}}` whose name is in `vars`, scanning left to right.
/// Substituted text is not rescanned.
fn replace_placeholders(input: &str, vars: &Variables) -> String {
    if !input.contains("{{") {
        return input.to_string();
    }

    let mut out = String::with_capacity(input.len());
    let mut rest = input;
    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let resolved = after
            .find("}}")
            .and_then(|end| vars.get(&after[..end]).map(|v| (v, end)));
        match resolved {
            Some((value, end)) => {
                out.push_str(value);
                rest = &after[end + 2..];
            }
            None => {
                out.push_str("{{");
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}

fn expand_env(input: &str) -> String {
    if input == DEFAULT_SENTINEL || !input.contains('$') {
        return input.to_string();
    }
    ENV_REF
        .replace_all(input, |caps: &regex::Captures| {
            let name = caps
                .get(1)
                .or_else(|| caps.get(2))
                .map(|m| m.as_str())
                .unwrap_or_default();
            std::env::var(name).unwrap_or_default()
        })
        .into_owned()
}

/// Interpolate the project's own fields and stages.
///
/// Name and environment are resolved first, then `project_name` and `env`
/// are injected into the variable map before the stages are visited. The
/// variable map itself is never interpolated.
pub fn interpolate_project_variables(project: &mut Project) {
    project.name.interpolate(&project.variables);
    project.environment.interpolate(&project.variables);

    project
        .variables
        .insert("project_name".to_string(), project.name.clone());
    project
        .variables
        .insert("env".to_string(), project.environment.clone());

    let vars = &project.variables;
    for stage in &mut project.stages {
        stage.interpolate(vars);
    }
}

// -- Leaves and containers --

impl Interpolate for String {
    fn interpolate(&mut self, vars: &Variables) {
        *self = resolve_variable(self, vars);
    }
}

impl Interpolate for PathBuf {
    fn interpolate(&mut self, vars: &Variables) {
        let resolved = resolve_variable(&self.to_string_lossy(), vars);
        *self = PathBuf::from(resolved);
    }
}

impl<T: Interpolate> Interpolate for Option<T> {
    fn interpolate(&mut self, vars: &Variables) {
        if let Some(inner) = self {
            inner.interpolate(vars);
        }
    }
}

impl<T: Interpolate> Interpolate for Box<T> {
    fn interpolate(&mut self, vars: &Variables) {
        (**self).interpolate(vars);
    }
}

impl<T: Interpolate> Interpolate for Vec<T> {
    fn interpolate(&mut self, vars: &Variables) {
        for item in self.iter_mut() {
            item.interpolate(vars);
        }
    }
}

impl Interpolate for IndexMap<String, String> {
    fn interpolate(&mut self, vars: &Variables) {
        for value in self.values_mut() {
            value.interpolate(vars);
        }
    }
}

impl Interpolate for HashMap<String, String> {
    fn interpolate(&mut self, vars: &Variables) {
        for value in self.values_mut() {
            value.interpolate(vars);
        }
    }
}

// -- Records --

macro_rules! interpolate_fields {
    ($($ty:ty { $($field:ident),* $(,)? })*) => {
        $(
            impl Interpolate for $ty {
                fn interpolate(&mut self, vars: &Variables) {
                    $( self.$field.interpolate(vars); )*
                }
            }
        )*
    };
}

interpolate_fields! {
    Stage { name, config_file, depends_on, hooks, resources }
    Hooks { working_dir, pre_deploy, post_deploy, pre_destroy, post_destroy }
    ResourceTarget { reference, external }
    ExternalReference { arn, dynamic }
    DynamicTarget { name, region, target_type }
    FunctionSettings {
        name, reference, region, role_arn, handler, runtime, code,
        description, on_delete, tags, environment,
    }
    BucketSettings { name, reference, region, on_delete, static_hosting, tags }
    StaticHosting { index_document, error_document }
    GatewaySettings {
        name, on_delete, description, region, protocol, stages,
        integrations, routes, tags,
    }
    ApiStage { name, description, tags }
    Integration { integration_type, payload_version, integration_method, reference, target }
    Route { method, route, target }
    RoleSettings {
        name, reference, description, on_delete, trust_policy, policy_arns,
        inline_policies, tags,
    }
    TrustPolicy { principals, file }
    Principals { services, accounts }
    InlinePolicy { name, actions, resources, effect, file }
    IdentityPoolSettings {
        name, reference, region, on_delete, domain_prefix, sign_in_identifiers,
        sign_up_attributes, app_clients, tags,
    }
    AppClient { name, client_type, return_urls, logout_urls }
    FunctionFile { defaults, functions }
    BucketFile { defaults, buckets }
    GatewayFile { defaults, gateways }
    RoleFile { defaults, roles }
    IdentityPoolFile { defaults, pools }
}

impl Interpolate for StageResources {
    fn interpolate(&mut self, vars: &Variables) {
        match self {
            Self::Unloaded => {}
            Self::Functions(v) => v.interpolate(vars),
            Self::Buckets(v) => v.interpolate(vars),
            Self::Gateways(v) => v.interpolate(vars),
            Self::Roles(v) => v.interpolate(vars),
            Self::IdentityPools(v) => v.interpolate(vars),
        }
    }
}
