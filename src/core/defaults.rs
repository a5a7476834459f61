//! Defaults merge for resource settings.
//!
//! A concrete record inherits every field it leaves unset from its file's
//! `defaults` record. Options inherit when `None`, lists and maps when empty.
//! Names and refs identify a single resource and are never inherited.

use super::types::*;
use indexmap::IndexMap;

pub trait MergeDefaults {
    fn merge_defaults(&mut self, defaults: &Self);
}

trait MergeField {
    fn merge_field(&mut self, default: &Self);
}

impl<T: Clone> MergeField for Option<T> {
    fn merge_field(&mut self, default: &Self) {
        if self.is_none() {
            self.clone_from(default);
        }
    }
}

impl<T: Clone> MergeField for Vec<T> {
    fn merge_field(&mut self, default: &Self) {
        if self.is_empty() {
            self.clone_from(default);
        }
    }
}

impl MergeField for IndexMap<String, String> {
    fn merge_field(&mut self, default: &Self) {
        if self.is_empty() {
            self.clone_from(default);
        }
    }
}

macro_rules! merge_fields {
    ($($ty:ty { $($field:ident),* $(,)? })*) => {
        $(
            impl MergeDefaults for $ty {
                fn merge_defaults(&mut self, defaults: &Self) {
                    $( self.$field.merge_field(&defaults.$field); )*
                }
            }
        )*
    };
}

merge_fields! {
    FunctionSettings {
        region, role_arn, handler, runtime, code, memory_size, timeout,
        description, on_delete, tags, environment,
    }
    BucketSettings {
        region, versioning, on_delete, block_public_access, static_hosting, tags,
    }
    GatewaySettings {
        on_delete, description, region, protocol, stages, integrations, routes, tags,
    }
    RoleSettings {
        description, on_delete, trust_policy, policy_arns, inline_policies, tags,
    }
    IdentityPoolSettings {
        region, on_delete, domain_prefix, sign_in_identifiers, sign_up_attributes,
        password_policy, app_clients, tags,
    }
}

/// Merge `defaults` (if any) into every record.
pub fn apply_defaults<T: MergeDefaults>(records: &mut [T], defaults: Option<&T>) {
    if let Some(defaults) = defaults {
        for record in records.iter_mut() {
            record.merge_defaults(defaults);
        }
    }
}
