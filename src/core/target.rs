//! Target resolution: turn a `ResourceTarget` into a provider identifier.
//!
//! Priority: `ref` → `external.arn` → `external.dynamic`. A set `ref` always
//! wins, even when a static ARN is present too.

use super::error::{Error, Result};
use super::refs::RefLookup;
use super::types::{DynamicTarget, ResourceTarget, StageType};
use crate::provider::{bucket_arn, CloudProvider};
use tracing::debug;

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.is_empty())
}

/// Resolve a target against a reference map (global store or scratch map).
pub fn resolve_target(
    target: &ResourceTarget,
    refs: &dyn RefLookup,
    provider: &dyn CloudProvider,
) -> Result<String> {
    if let Some(reference) = non_empty(&target.reference) {
        return refs.resolve(reference);
    }

    if let Some(external) = &target.external {
        if let Some(arn) = non_empty(&external.arn) {
            return Ok(arn.to_string());
        }
        if let Some(dynamic) = &external.dynamic {
            return lookup_dynamic(dynamic, provider);
        }
    }

    Err(Error::NoValidTarget)
}

fn lookup_dynamic(target: &DynamicTarget, provider: &dyn CloudProvider) -> Result<String> {
    debug!(
        "Looking up {} '{}' in region '{}'",
        target.target_type, target.name, target.region
    );
    match target.target_type.parse::<StageType>() {
        Ok(StageType::Bucket) => Ok(bucket_arn(&target.name)),
        Ok(StageType::Function) => Ok(provider.get_function_arn(&target.name, &target.region)?),
        _ => Err(Error::UnsupportedDynamicType(target.target_type.clone())),
    }
}

fn is_function(target: &DynamicTarget) -> bool {
    target.target_type.parse::<StageType>() == Ok(StageType::Function)
}

/// Function name a target points at, for permission grants.
///
/// Uses the dynamic descriptor's name when present, otherwise the part of a
/// function ARN after `function:`.
pub fn function_name(target: &ResourceTarget, resolved: &str) -> Option<String> {
    if let Some(dynamic) = target.external.as_ref().and_then(|e| e.dynamic.as_ref()) {
        if is_function(dynamic) && !dynamic.name.is_empty() {
            return Some(dynamic.name.clone());
        }
    }
    resolved
        .split_once(":function:")
        .map(|(_, rest)| rest.split(':').next().unwrap_or(rest).to_string())
        .filter(|name| !name.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::refs::RefStore;
    use crate::core::types::ExternalReference;
    use crate::provider::MemoryProvider;

    fn dynamic(name: &str, kind: &str) -> ResourceTarget {
        ResourceTarget {
            reference: None,
            external: Some(ExternalReference {
                arn: None,
                dynamic: Some(DynamicTarget {
                    name: name.into(),
                    region: "us-east-1".into(),
                    target_type: kind.into(),
                }),
            }),
        }
    }

    #[test]
    fn test_target_ref_wins_over_arn() {
        let refs = RefStore::new();
        refs.set("db", "from-ref");
        let provider = MemoryProvider::new();
        let target = ResourceTarget {
            reference: Some("db".into()),
            external: Some(ExternalReference {
                arn: Some("static-arn".into()),
                dynamic: None,
            }),
        };
        assert_eq!(resolve_target(&target, &refs, &provider).unwrap(), "from-ref");
    }

    #[test]
    fn test_target_missing_ref_is_error_not_fallback() {
        let refs = RefStore::new();
        let provider = MemoryProvider::new();
        let target = ResourceTarget {
            reference: Some("db".into()),
            external: Some(ExternalReference {
                arn: Some("static-arn".into()),
                dynamic: None,
            }),
        };
        assert!(matches!(
            resolve_target(&target, &refs, &provider),
            Err(Error::UndefinedRef(_))
        ));
    }

    #[test]
    fn test_target_empty_ref_falls_through_to_arn() {
        let refs = RefStore::new();
        let provider = MemoryProvider::new();
        let target = ResourceTarget {
            reference: Some(String::new()),
            external: Some(ExternalReference {
                arn: Some("static-arn".into()),
                dynamic: None,
            }),
        };
        assert_eq!(resolve_target(&target, &refs, &provider).unwrap(), "static-arn");
    }

    #[test]
    fn test_target_dynamic_bucket_needs_no_provider_call() {
        let refs = RefStore::new();
        let provider = MemoryProvider::new();
        let arn = resolve_target(&dynamic("assets", "s3"), &refs, &provider).unwrap();
        assert_eq!(arn, "arn:aws:s3:::assets");
        assert!(provider.calls().is_empty());
    }

    #[test]
    fn test_target_dynamic_function_lookup() {
        let refs = RefStore::new();
        let provider = MemoryProvider::new();
        provider.add_function("users");
        let arn = resolve_target(&dynamic("users", "lambda"), &refs, &provider).unwrap();
        assert_eq!(arn, "arn:aws:lambda:us-east-1:123456789012:function:users");

        let err = resolve_target(&dynamic("ghost", "lambda"), &refs, &provider).unwrap_err();
        assert!(matches!(err, Error::Provider(_)));
    }

    #[test]
    fn test_target_dynamic_unsupported_type() {
        let refs = RefStore::new();
        let provider = MemoryProvider::new();
        let err = resolve_target(&dynamic("x", "api"), &refs, &provider).unwrap_err();
        assert!(matches!(err, Error::UnsupportedDynamicType(t) if t == "api"));
    }

    #[test]
    fn test_target_nothing_set() {
        let refs = RefStore::new();
        let provider = MemoryProvider::new();
        let err = resolve_target(&ResourceTarget::default(), &refs, &provider).unwrap_err();
        assert_eq!(err.to_string(), "no valid target found");
    }

    #[test]
    fn test_target_function_name() {
        let target = dynamic("users", "lambda");
        assert_eq!(function_name(&target, "ignored").as_deref(), Some("users"));

        let by_arn = ResourceTarget::default();
        assert_eq!(
            function_name(&by_arn, "arn:aws:lambda:us-east-1:1:function:orders:live").as_deref(),
            Some("orders")
        );
        assert!(function_name(&by_arn, "arn:aws:s3:::bucket").is_none());
    }

    #[test]
    fn test_target_padded_function_type() {
        let refs = RefStore::new();
        let provider = MemoryProvider::new();
        provider.add_function("users");
        let target = dynamic("users", " lambda ");

        let arn = resolve_target(&target, &refs, &provider).unwrap();
        assert_eq!(arn, "arn:aws:lambda:us-east-1:123456789012:function:users");
        assert_eq!(function_name(&target, "not-an-arn").as_deref(), Some("users"));
    }
}
