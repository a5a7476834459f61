//! Access role handler.

use super::{ignore_not_found, register_ref, require, ResourceContext};
use crate::core::error::{Error, Result};
use crate::core::types::{InlinePolicy, RoleSettings, TrustPolicy, UniversalResourceDefinition};
use crate::provider::{Page, ProviderResult, RoleSpec};
use serde_json::{json, Map, Value};
use std::path::Path;
use tracing::{debug, info};

const POLICY_VERSION: &str = "2012-10-17";

pub fn missing_required_fields(role: &RoleSettings) -> Vec<&'static str> {
    let mut missing = Vec::new();
    require(&mut missing, "name", &role.name);
    if role.trust_policy.is_none() {
        missing.push("trustPolicy");
    }
    missing
}

fn read_document(path: &str) -> Result<String> {
    std::fs::read_to_string(Path::new(path))
        .map_err(|e| Error::Config(format!("cannot read policy file {}: {}", path, e)))
}

/// Assume-role document: the file's content, or one generated from principals.
pub fn trust_policy_document(trust: &TrustPolicy) -> Result<String> {
    if let Some(file) = trust.file.as_deref().filter(|f| !f.is_empty()) {
        return read_document(file);
    }

    let mut principal = Map::new();
    if let Some(principals) = &trust.principals {
        if !principals.services.is_empty() {
            principal.insert("Service".into(), json!(principals.services));
        }
        if !principals.accounts.is_empty() {
            principal.insert("AWS".into(), json!(principals.accounts));
        }
    }

    let document = json!({
        "Version": POLICY_VERSION,
        "Statement": [{
            "Effect": "Allow",
            "Principal": Value::Object(principal),
            "Action": "sts:AssumeRole",
        }],
    });
    Ok(serde_json::to_string(&document)?)
}

/// Inline policy document: the file's content, or one generated statement.
pub fn inline_policy_document(policy: &InlinePolicy) -> Result<String> {
    if let Some(file) = policy.file.as_deref().filter(|f| !f.is_empty()) {
        return read_document(file);
    }

    let document = json!({
        "Version": POLICY_VERSION,
        "Statement": [{
            "Effect": policy.effect.as_deref().filter(|e| !e.is_empty()).unwrap_or("Allow"),
            "Action": policy.actions,
            "Resource": policy.resources,
        }],
    });
    Ok(serde_json::to_string(&document)?)
}

fn role_spec(role: &RoleSettings) -> Result<RoleSpec> {
    let trust = role.trust_policy.as_ref().ok_or_else(|| Error::MissingField {
        kind: "role",
        name: role.name().to_string(),
        field: "trustPolicy",
    })?;
    Ok(RoleSpec {
        name: role.name().to_string(),
        description: role.description.clone(),
        trust_policy: trust_policy_document(trust)?,
        tags: role.tags.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
    })
}

fn apply_policies(ctx: &ResourceContext, role: &RoleSettings) -> Result<()> {
    for arn in &role.policy_arns {
        debug!("Attaching policy {} to {}", arn, role.name());
        ctx.provider.attach_role_policy(role.name(), arn)?;
    }
    for policy in &role.inline_policies {
        debug!("Putting inline policy {} on {}", policy.name, role.name());
        let document = inline_policy_document(policy)?;
        ctx.provider.put_role_policy(role.name(), &policy.name, &document)?;
    }
    Ok(())
}

/// Create on an existing role is a no-op success; its ARN still feeds refs.
pub fn deploy_create(ctx: &ResourceContext, role: &RoleSettings) -> Result<()> {
    info!("Creating role {}", role.name());
    let spec = role_spec(role)?;
    let arn = match ctx.provider.create_role(&spec) {
        Ok(arn) => arn,
        Err(e) if e.is_already_exists() => {
            info!("Role {} already exists", role.name());
            let arn = ctx.provider.get_role_arn(role.name())?;
            register_ref(ctx.refs, &role.reference, &arn);
            return Ok(());
        }
        Err(e) => return Err(e.into()),
    };

    apply_policies(ctx, role)?;
    register_ref(ctx.refs, &role.reference, &arn);
    info!("Created role {}", role.name());
    Ok(())
}

pub fn deploy_update(ctx: &ResourceContext, role: &RoleSettings) -> Result<()> {
    info!("Updating role {}", role.name());
    let spec = role_spec(role)?;
    ctx.provider.update_role(&spec)?;
    apply_policies(ctx, role)?;
    let arn = ctx.provider.get_role_arn(role.name())?;
    register_ref(ctx.refs, &role.reference, &arn);
    info!("Updated role {}", role.name());
    Ok(())
}

/// Drain a paginated listing.
fn collect_pages<F>(mut list: F) -> ProviderResult<Vec<String>>
where
    F: FnMut(Option<&str>) -> ProviderResult<Page<String>>,
{
    let mut items = Vec::new();
    let mut marker: Option<String> = None;
    loop {
        let page = list(marker.as_deref())?;
        items.extend(page.items);
        match page.next {
            Some(next) => marker = Some(next),
            None => return Ok(items),
        }
    }
}

/// Detach managed policies, delete inline policies, then delete the role.
/// "Not found" at any step is a no-op.
pub fn destroy(ctx: &ResourceContext, resource: &UniversalResourceDefinition) -> Result<()> {
    let role = resource.name.as_str();
    info!("Deleting role {}", role);

    let attached = match collect_pages(|m| ctx.provider.list_attached_role_policies(role, m)) {
        Err(e) if e.is_not_found() => {
            debug!("Role {} did not exist, no action taken", role);
            return Ok(());
        }
        other => other?,
    };
    for arn in &attached {
        debug!("Detaching policy {} from {}", arn, role);
        ignore_not_found(
            ctx.provider.detach_role_policy(role, arn),
            &format!("policy {}", arn),
        )?;
    }

    let inline = match collect_pages(|m| ctx.provider.list_role_policies(role, m)) {
        Err(e) if e.is_not_found() => Vec::new(),
        other => other?,
    };
    for name in &inline {
        debug!("Deleting inline policy {} from {}", name, role);
        ignore_not_found(
            ctx.provider.delete_role_policy(role, name),
            &format!("inline policy {}", name),
        )?;
    }

    ignore_not_found(ctx.provider.delete_role(role), &format!("role {}", role))
}
