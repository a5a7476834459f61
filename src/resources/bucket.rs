//! Object-storage bucket handler.

use super::{region, register_ref, require, ResourceContext};
use crate::core::error::Result;
use crate::core::types::{BucketSettings, UniversalResourceDefinition};
use crate::provider::{bucket_arn, MAX_DELETE_BATCH};
use tracing::{debug, info};

pub fn missing_required_fields(bucket: &BucketSettings) -> Vec<&'static str> {
    let mut missing = Vec::new();
    require(&mut missing, "name", &bucket.name);
    missing
}

pub fn deploy_create(ctx: &ResourceContext, bucket: &BucketSettings) -> Result<()> {
    info!("Creating bucket {}", bucket.name());
    ctx.provider.create_bucket(bucket.name(), region(&bucket.region))?;
    ctx.provider.configure_bucket(bucket)?;
    register_ref(ctx.refs, &bucket.reference, &bucket_arn(bucket.name()));
    info!("Created bucket {}", bucket.name());
    Ok(())
}

pub fn deploy_update(ctx: &ResourceContext, bucket: &BucketSettings) -> Result<()> {
    info!("Updating bucket {}", bucket.name());
    ctx.provider.configure_bucket(bucket)?;
    register_ref(ctx.refs, &bucket.reference, &bucket_arn(bucket.name()));
    info!("Updated bucket {}", bucket.name());
    Ok(())
}

/// Delete a bucket; with `force`, every object is deleted first.
pub fn destroy(ctx: &ResourceContext, resource: &UniversalResourceDefinition, force: bool) -> Result<()> {
    info!("Deleting bucket {}", resource.name);
    if force {
        empty_bucket(ctx, &resource.name, &resource.region)?;
    }
    ctx.provider.delete_bucket(&resource.name, &resource.region)?;
    info!("Deleted bucket {}", resource.name);
    Ok(())
}

/// List every object (all pages), then delete in provider-sized batches.
fn empty_bucket(ctx: &ResourceContext, bucket: &str, region: &str) -> Result<()> {
    let mut keys = Vec::new();
    let mut token: Option<String> = None;
    loop {
        let page = ctx.provider.list_objects(bucket, region, token.as_deref())?;
        keys.extend(page.items);
        match page.next {
            Some(next) => token = Some(next),
            None => break,
        }
    }

    debug!("Deleting {} objects from bucket {}", keys.len(), bucket);
    for batch in keys.chunks(MAX_DELETE_BATCH) {
        ctx.provider.delete_objects(bucket, region, batch)?;
    }
    Ok(())
}
