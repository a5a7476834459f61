//! AWS adapter built on the AWS SDK for Rust.
//!
//! The SDK is async; [`AwsProvider`] owns a current-thread tokio runtime and
//! blocks on every call so the [`CloudProvider`] seam stays synchronous.
//! Clients are built per call from one loaded `SdkConfig`, with the region
//! overridden when the resource names one.
//!
//! Failures are classified from the modeled service errors of each operation
//! (`is_resource_not_found_exception()` and friends). Operations whose model
//! has no error shape for the case fall back to the error code.

use super::*;
use crate::core::types::{PasswordPolicy, Variables};
use aws_config::{BehaviorVersion, Region, SdkConfig};
use aws_sdk_sts::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use std::collections::HashMap;
use std::future::Future;
use tracing::debug;

/// Classification of a modeled service error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    NotFound,
    AlreadyExists,
    Conflict,
    Other,
}

impl Kind {
    fn when(condition: bool, kind: Kind) -> Kind {
        if condition {
            kind
        } else {
            Kind::Other
        }
    }
}

/// Map an SDK failure to a provider error. `kind` classifies the service
/// error of the operation; transport failures are `Unavailable`.
fn sdk_error<E, R>(op: &str, err: SdkError<E, R>, kind: impl FnOnce(&E) -> Kind) -> ProviderError
where
    E: std::error::Error + Send + Sync + 'static,
    R: std::fmt::Debug,
{
    let message = format!("{}: {}", op, DisplayErrorContext(&err));
    if let Some(service) = err.as_service_error() {
        return match kind(service) {
            Kind::NotFound => ProviderError::NotFound(message),
            Kind::AlreadyExists => ProviderError::AlreadyExists(message),
            Kind::Conflict => ProviderError::Conflict(message),
            Kind::Other => ProviderError::CommandFailed(message),
        };
    }
    match err {
        SdkError::DispatchFailure(_) | SdkError::TimeoutError(_) => ProviderError::Unavailable(message),
        _ => ProviderError::CommandFailed(message),
    }
}

/// Service error with no modeled case of interest.
fn other<E>(_: &E) -> Kind {
    Kind::Other
}

fn build_error(e: impl std::fmt::Display) -> ProviderError {
    ProviderError::CommandFailed(format!("invalid request: {}", e))
}

fn missing(what: &str) -> ProviderError {
    ProviderError::CommandFailed(format!("unexpected response: missing {}", what))
}

/// Getters return `&T` for required members and `Option<&T>` for optional
/// ones; this reads both the same way.
trait Present<'a, T: ?Sized> {
    fn present(self) -> Option<&'a T>;
}

impl<'a, T: ?Sized> Present<'a, T> for &'a T {
    fn present(self) -> Option<&'a T> {
        Some(self)
    }
}

impl<'a, T: ?Sized> Present<'a, T> for Option<&'a T> {
    fn present(self) -> Option<&'a T> {
        self
    }
}

fn owned<'a>(value: impl Present<'a, str>, what: &str) -> ProviderResult<String> {
    value.present().map(String::from).ok_or_else(|| missing(what))
}

fn token<'a>(value: impl Present<'a, str>) -> Option<String> {
    value.present().filter(|t| !t.is_empty()).map(String::from)
}

fn tag_map(tags: &Variables) -> Option<HashMap<String, String>> {
    if tags.is_empty() {
        return None;
    }
    Some(tags.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
}

fn region_of(region: &Option<String>) -> &str {
    region.as_deref().unwrap_or_default()
}

fn to_i32(value: Option<u32>) -> Option<i32> {
    value.and_then(|v| i32::try_from(v).ok())
}

fn read_code(path: &str) -> ProviderResult<Vec<u8>> {
    std::fs::read(path).map_err(|e| {
        ProviderError::CommandFailed(format!("cannot read function code {}: {}", path, e))
    })
}

/// True when a resource policy document already carries `sid`.
fn statement_exists(policy: &str, sid: &str) -> bool {
    serde_json::from_str::<serde_json::Value>(policy)
        .ok()
        .and_then(|doc| doc.get("Statement").and_then(|s| s.as_array()).cloned())
        .map(|statements| {
            statements
                .iter()
                .any(|s| s.get("Sid").and_then(|v| v.as_str()) == Some(sid))
        })
        .unwrap_or(false)
}

fn password_policy(policy: &Option<PasswordPolicy>) -> aws_sdk_cognitoidentityprovider::types::UserPoolPolicyType {
    use aws_sdk_cognitoidentityprovider::types::{PasswordPolicyType, UserPoolPolicyType};
    let policy = policy.clone().unwrap_or_default();
    UserPoolPolicyType::builder()
        .password_policy(
            PasswordPolicyType::builder()
                .minimum_length(i32::try_from(policy.min_length).unwrap_or(i32::MAX))
                .require_symbols(policy.require_symbols)
                .require_numbers(policy.require_numbers)
                .require_uppercase(policy.require_uppercase)
                .require_lowercase(policy.require_lowercase)
                .build(),
        )
        .build()
}

macro_rules! clients {
    ($($fn_name:ident => $sdk:ident),* $(,)?) => {
        $(
            fn $fn_name(&self, region: &str) -> $sdk::Client {
                let mut conf = $sdk::config::Builder::from(&self.config);
                if !region.is_empty() {
                    conf = conf.region(Region::new(region.to_string()));
                }
                $sdk::Client::from_conf(conf.build())
            }
        )*
    };
}

/// [`CloudProvider`] backed by the AWS SDK.
pub struct AwsProvider {
    runtime: tokio::runtime::Runtime,
    config: SdkConfig,
}

impl AwsProvider {
    /// Load credentials and region from the default chain, optionally from a
    /// named profile.
    pub fn new(profile: Option<String>) -> ProviderResult<Self> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        let mut loader = aws_config::defaults(BehaviorVersion::latest());
        if let Some(profile) = profile.filter(|p| !p.is_empty()) {
            debug!("Using credential profile {}", profile);
            loader = loader.profile_name(profile);
        }
        let config = runtime.block_on(loader.load());
        Ok(Self { runtime, config })
    }

    fn block<F: Future>(&self, future: F) -> F::Output {
        self.runtime.block_on(future)
    }

    clients! {
        lambda => aws_sdk_lambda,
        s3 => aws_sdk_s3,
        apigw => aws_sdk_apigatewayv2,
        iam => aws_sdk_iam,
        cognito => aws_sdk_cognitoidentityprovider,
        sts => aws_sdk_sts,
    }

    fn function_environment(function: &FunctionSettings) -> Option<aws_sdk_lambda::types::Environment> {
        tag_map(&function.environment).map(|vars| {
            aws_sdk_lambda::types::Environment::builder()
                .set_variables(Some(vars))
                .build()
        })
    }

    fn function_runtime(function: &FunctionSettings) -> Option<aws_sdk_lambda::types::Runtime> {
        function
            .runtime
            .as_deref()
            .filter(|r| !r.is_empty())
            .map(aws_sdk_lambda::types::Runtime::from)
    }
}

impl CloudProvider for AwsProvider {
    fn name(&self) -> &str {
        "aws"
    }

    fn account_id(&self) -> ProviderResult<String> {
        let out = self
            .block(self.sts("").get_caller_identity().send())
            .map_err(|e| sdk_error("GetCallerIdentity", e, other))?;
        owned(out.account(), "Account")
    }

    fn list_functions(&self, region: &str) -> ProviderResult<Vec<String>> {
        let client = self.lambda(region);
        let mut names = Vec::new();
        let mut marker = None;
        loop {
            let out = self
                .block(client.list_functions().set_marker(marker).send())
                .map_err(|e| sdk_error("ListFunctions", e, other))?;
            names.extend(
                out.functions()
                    .iter()
                    .filter_map(|f| f.function_name().present().map(String::from)),
            );
            marker = token(out.next_marker());
            if marker.is_none() {
                return Ok(names);
            }
        }
    }

    fn list_buckets(&self) -> ProviderResult<Vec<String>> {
        let out = self
            .block(self.s3("").list_buckets().send())
            .map_err(|e| sdk_error("ListBuckets", e, other))?;
        Ok(out
            .buckets()
            .iter()
            .filter_map(|b| b.name().present().map(String::from))
            .collect())
    }

    fn list_gateways(&self, region: &str) -> ProviderResult<Vec<String>> {
        let client = self.apigw(region);
        let mut names = Vec::new();
        let mut next = None;
        loop {
            let out = self
                .block(client.get_apis().set_next_token(next).send())
                .map_err(|e| sdk_error("GetApis", e, other))?;
            names.extend(
                out.items()
                    .iter()
                    .filter_map(|api| api.name().present().map(String::from)),
            );
            next = token(out.next_token());
            if next.is_none() {
                return Ok(names);
            }
        }
    }

    fn list_roles(&self) -> ProviderResult<Vec<String>> {
        let client = self.iam("");
        let mut names = Vec::new();
        let mut marker = None;
        loop {
            let out = self
                .block(client.list_roles().set_marker(marker).send())
                .map_err(|e| sdk_error("ListRoles", e, other))?;
            names.extend(
                out.roles()
                    .iter()
                    .filter_map(|r| r.role_name().present().map(String::from)),
            );
            marker = token(out.marker());
            if marker.is_none() {
                return Ok(names);
            }
        }
    }

    fn list_identity_pools(&self, region: &str) -> ProviderResult<Vec<String>> {
        Ok(self
            .user_pools(region)?
            .into_iter()
            .map(|(name, _)| name)
            .collect())
    }

    // -- Functions --

    fn create_function(&self, function: &FunctionSettings) -> ProviderResult<String> {
        use aws_sdk_lambda::primitives::Blob;
        use aws_sdk_lambda::types::FunctionCode;

        let zip = read_code(function.code.as_deref().unwrap_or_default())?;
        let request = self
            .lambda(region_of(&function.region))
            .create_function()
            .function_name(function.name())
            .set_role(function.role_arn.clone())
            .set_handler(function.handler.clone())
            .set_runtime(Self::function_runtime(function))
            .set_description(function.description.clone())
            .set_memory_size(to_i32(function.memory_size))
            .set_timeout(to_i32(function.timeout))
            .set_environment(Self::function_environment(function))
            .set_tags(tag_map(&function.tags))
            .code(FunctionCode::builder().zip_file(Blob::new(zip)).build());
        let out = self.block(request.send()).map_err(|e| {
            sdk_error("CreateFunction", e, |e| {
                Kind::when(e.is_resource_conflict_exception(), Kind::AlreadyExists)
            })
        })?;
        owned(out.function_arn(), "FunctionArn")
    }

    fn update_function_code(&self, name: &str, region: &str, code: &str) -> ProviderResult<()> {
        use aws_sdk_lambda::primitives::Blob;

        let zip = read_code(code)?;
        let request = self
            .lambda(region)
            .update_function_code()
            .function_name(name)
            .zip_file(Blob::new(zip));
        self.block(request.send()).map_err(|e| {
            sdk_error("UpdateFunctionCode", e, |e| {
                if e.is_resource_not_found_exception() {
                    Kind::NotFound
                } else {
                    Kind::when(e.is_resource_conflict_exception(), Kind::Conflict)
                }
            })
        })?;
        Ok(())
    }

    fn update_function_configuration(&self, function: &FunctionSettings) -> ProviderResult<String> {
        let request = self
            .lambda(region_of(&function.region))
            .update_function_configuration()
            .function_name(function.name())
            .set_role(function.role_arn.clone())
            .set_handler(function.handler.clone())
            .set_runtime(Self::function_runtime(function))
            .set_description(function.description.clone())
            .set_memory_size(to_i32(function.memory_size))
            .set_timeout(to_i32(function.timeout))
            .set_environment(Self::function_environment(function));
        let out = self.block(request.send()).map_err(|e| {
            sdk_error("UpdateFunctionConfiguration", e, |e| {
                if e.is_resource_not_found_exception() {
                    Kind::NotFound
                } else {
                    Kind::when(e.is_resource_conflict_exception(), Kind::Conflict)
                }
            })
        })?;
        owned(out.function_arn(), "FunctionArn")
    }

    fn delete_function(&self, name: &str, region: &str) -> ProviderResult<()> {
        let request = self.lambda(region).delete_function().function_name(name);
        self.block(request.send()).map_err(|e| {
            sdk_error("DeleteFunction", e, |e| {
                Kind::when(e.is_resource_not_found_exception(), Kind::NotFound)
            })
        })?;
        Ok(())
    }

    fn get_function_arn(&self, name: &str, region: &str) -> ProviderResult<String> {
        let request = self.lambda(region).get_function().function_name(name);
        let out = self.block(request.send()).map_err(|e| {
            sdk_error("GetFunction", e, |e| {
                Kind::when(e.is_resource_not_found_exception(), Kind::NotFound)
            })
        })?;
        owned(
            out.configuration().and_then(|c| c.function_arn()),
            "Configuration.FunctionArn",
        )
    }

    // -- Buckets --

    fn create_bucket(&self, name: &str, region: &str) -> ProviderResult<()> {
        use aws_sdk_s3::types::{BucketLocationConstraint, CreateBucketConfiguration};

        let mut request = self.s3(region).create_bucket().bucket(name);
        if !region.is_empty() && region != "us-east-1" {
            request = request.create_bucket_configuration(
                CreateBucketConfiguration::builder()
                    .location_constraint(BucketLocationConstraint::from(region))
                    .build(),
            );
        }
        self.block(request.send()).map_err(|e| {
            sdk_error("CreateBucket", e, |e| {
                Kind::when(
                    e.is_bucket_already_exists() || e.is_bucket_already_owned_by_you(),
                    Kind::AlreadyExists,
                )
            })
        })?;
        Ok(())
    }

    fn configure_bucket(&self, bucket: &BucketSettings) -> ProviderResult<()> {
        use aws_sdk_s3::types::{
            BucketVersioningStatus, ErrorDocument, IndexDocument, PublicAccessBlockConfiguration,
            Tag, Tagging, VersioningConfiguration, WebsiteConfiguration,
        };

        let name = bucket.name();
        let client = self.s3(region_of(&bucket.region));

        if !bucket.tags.is_empty() {
            let tags = bucket
                .tags
                .iter()
                .map(|(k, v)| Tag::builder().key(k).value(v).build().map_err(build_error))
                .collect::<ProviderResult<Vec<_>>>()?;
            let tagging = Tagging::builder()
                .set_tag_set(Some(tags))
                .build()
                .map_err(build_error)?;
            self.block(client.put_bucket_tagging().bucket(name).tagging(tagging).send())
                .map_err(|e| sdk_error("PutBucketTagging", e, other))?;
        }

        if let Some(enabled) = bucket.versioning {
            let status = if enabled {
                BucketVersioningStatus::Enabled
            } else {
                BucketVersioningStatus::Suspended
            };
            let versioning = VersioningConfiguration::builder().status(status).build();
            self.block(
                client
                    .put_bucket_versioning()
                    .bucket(name)
                    .versioning_configuration(versioning)
                    .send(),
            )
            .map_err(|e| sdk_error("PutBucketVersioning", e, other))?;
        }

        if let Some(block) = bucket.block_public_access {
            let config = PublicAccessBlockConfiguration::builder()
                .block_public_acls(block)
                .ignore_public_acls(block)
                .block_public_policy(block)
                .restrict_public_buckets(block)
                .build();
            self.block(
                client
                    .put_public_access_block()
                    .bucket(name)
                    .public_access_block_configuration(config)
                    .send(),
            )
            .map_err(|e| sdk_error("PutPublicAccessBlock", e, other))?;
        }

        if let Some(hosting) = bucket.static_hosting.as_ref().filter(|h| h.enabled) {
            let index = IndexDocument::builder()
                .suffix(hosting.index_document.as_deref().unwrap_or("index.html"))
                .build()
                .map_err(build_error)?;
            let error = match hosting.error_document.as_deref() {
                Some(key) => Some(ErrorDocument::builder().key(key).build().map_err(build_error)?),
                None => None,
            };
            let website = WebsiteConfiguration::builder()
                .index_document(index)
                .set_error_document(error)
                .build();
            self.block(
                client
                    .put_bucket_website()
                    .bucket(name)
                    .website_configuration(website)
                    .send(),
            )
            .map_err(|e| sdk_error("PutBucketWebsite", e, other))?;
        }

        Ok(())
    }

    fn list_objects(
        &self,
        bucket: &str,
        region: &str,
        continuation: Option<&str>,
    ) -> ProviderResult<Page<String>> {
        let request = self
            .s3(region)
            .list_objects_v2()
            .bucket(bucket)
            .max_keys(i32::try_from(MAX_DELETE_BATCH).unwrap_or(i32::MAX))
            .set_continuation_token(continuation.map(String::from));
        let out = self.block(request.send()).map_err(|e| {
            sdk_error("ListObjectsV2", e, |e| {
                Kind::when(e.is_no_such_bucket(), Kind::NotFound)
            })
        })?;
        Ok(Page {
            items: out
                .contents()
                .iter()
                .filter_map(|o| o.key().present().map(String::from))
                .collect(),
            next: token(out.next_continuation_token()),
        })
    }

    fn delete_objects(&self, bucket: &str, region: &str, keys: &[String]) -> ProviderResult<()> {
        use aws_sdk_s3::types::{Delete, ObjectIdentifier};

        let objects = keys
            .iter()
            .map(|k| ObjectIdentifier::builder().key(k).build().map_err(build_error))
            .collect::<ProviderResult<Vec<_>>>()?;
        let delete = Delete::builder()
            .set_objects(Some(objects))
            .quiet(true)
            .build()
            .map_err(build_error)?;
        let request = self.s3(region).delete_objects().bucket(bucket).delete(delete);
        self.block(request.send())
            .map_err(|e| sdk_error("DeleteObjects", e, other))?;
        Ok(())
    }

    fn delete_bucket(&self, bucket: &str, region: &str) -> ProviderResult<()> {
        let request = self.s3(region).delete_bucket().bucket(bucket);
        // DeleteBucket models no errors; a missing bucket arrives as a bare code.
        self.block(request.send()).map_err(|e| {
            sdk_error("DeleteBucket", e, |e| {
                Kind::when(e.code() == Some("NoSuchBucket"), Kind::NotFound)
            })
        })?;
        Ok(())
    }

    // -- Gateways --

    fn create_api(&self, api: &ApiSpec) -> ProviderResult<String> {
        use aws_sdk_apigatewayv2::types::ProtocolType;

        let tags: Variables = api.tags.iter().cloned().collect();
        let request = self
            .apigw(&api.region)
            .create_api()
            .name(&api.name)
            .protocol_type(ProtocolType::from(api.protocol.to_uppercase().as_str()))
            .set_description(api.description.clone())
            .set_tags(tag_map(&tags));
        let out = self.block(request.send()).map_err(|e| {
            sdk_error("CreateApi", e, |e| {
                Kind::when(e.is_conflict_exception(), Kind::Conflict)
            })
        })?;
        owned(out.api_id(), "ApiId")
    }

    fn update_api(&self, api_id: &str, api: &ApiSpec) -> ProviderResult<()> {
        let request = self
            .apigw(&api.region)
            .update_api()
            .api_id(api_id)
            .name(&api.name)
            .set_description(api.description.clone());
        self.block(request.send()).map_err(|e| {
            sdk_error("UpdateApi", e, |e| {
                Kind::when(e.is_not_found_exception(), Kind::NotFound)
            })
        })?;
        Ok(())
    }

    fn find_api_id(&self, name: &str, region: &str) -> ProviderResult<String> {
        let client = self.apigw(region);
        let mut next = None;
        loop {
            let out = self
                .block(client.get_apis().set_next_token(next).send())
                .map_err(|e| sdk_error("GetApis", e, other))?;
            let found = out
                .items()
                .iter()
                .find(|api| api.name().present() == Some(name))
                .and_then(|api| api.api_id().present().map(String::from));
            if let Some(id) = found {
                return Ok(id);
            }
            next = token(out.next_token());
            if next.is_none() {
                return Err(ProviderError::NotFound(format!("api {} not found", name)));
            }
        }
    }

    fn delete_api(&self, api_id: &str, region: &str) -> ProviderResult<()> {
        let request = self.apigw(region).delete_api().api_id(api_id);
        self.block(request.send()).map_err(|e| {
            sdk_error("DeleteApi", e, |e| {
                Kind::when(e.is_not_found_exception(), Kind::NotFound)
            })
        })?;
        Ok(())
    }

    fn create_api_stage(&self, api_id: &str, region: &str, stage: &ApiStage) -> ProviderResult<()> {
        let request = self
            .apigw(region)
            .create_stage()
            .api_id(api_id)
            .stage_name(&stage.name)
            .set_description(Some(stage.description.clone()).filter(|d| !d.is_empty()))
            .auto_deploy(stage.auto_deploy)
            .set_tags(tag_map(&stage.tags));
        self.block(request.send()).map_err(|e| {
            sdk_error("CreateStage", e, |e| {
                Kind::when(e.is_conflict_exception(), Kind::AlreadyExists)
            })
        })?;
        Ok(())
    }

    fn create_integration(
        &self,
        api_id: &str,
        region: &str,
        integration: &IntegrationSpec,
    ) -> ProviderResult<String> {
        use aws_sdk_apigatewayv2::types::IntegrationType;

        let request = self
            .apigw(region)
            .create_integration()
            .api_id(api_id)
            .integration_type(IntegrationType::from(integration.integration_type.as_str()))
            .integration_method(&integration.method)
            .integration_uri(&integration.uri)
            .payload_format_version(&integration.payload_version);
        let out = self.block(request.send()).map_err(|e| {
            sdk_error("CreateIntegration", e, |e| {
                Kind::when(e.is_not_found_exception(), Kind::NotFound)
            })
        })?;
        owned(out.integration_id(), "IntegrationId")
    }

    fn list_integrations(&self, api_id: &str, region: &str) -> ProviderResult<Vec<String>> {
        let client = self.apigw(region);
        let mut ids = Vec::new();
        let mut next = None;
        loop {
            let out = self
                .block(client.get_integrations().api_id(api_id).set_next_token(next).send())
                .map_err(|e| {
                    sdk_error("GetIntegrations", e, |e| {
                        Kind::when(e.is_not_found_exception(), Kind::NotFound)
                    })
                })?;
            ids.extend(
                out.items()
                    .iter()
                    .filter_map(|i| i.integration_id().present().map(String::from)),
            );
            next = token(out.next_token());
            if next.is_none() {
                return Ok(ids);
            }
        }
    }

    fn delete_integration(&self, api_id: &str, region: &str, integration_id: &str) -> ProviderResult<()> {
        let request = self
            .apigw(region)
            .delete_integration()
            .api_id(api_id)
            .integration_id(integration_id);
        self.block(request.send()).map_err(|e| {
            sdk_error("DeleteIntegration", e, |e| {
                Kind::when(e.is_not_found_exception(), Kind::NotFound)
            })
        })?;
        Ok(())
    }

    fn create_route(&self, api_id: &str, region: &str, key: &str, target: &str) -> ProviderResult<String> {
        let request = self
            .apigw(region)
            .create_route()
            .api_id(api_id)
            .route_key(key)
            .target(target);
        let out = self.block(request.send()).map_err(|e| {
            sdk_error("CreateRoute", e, |e| {
                Kind::when(e.is_conflict_exception(), Kind::AlreadyExists)
            })
        })?;
        owned(out.route_id(), "RouteId")
    }

    fn list_routes(&self, api_id: &str, region: &str) -> ProviderResult<Vec<RouteInfo>> {
        let client = self.apigw(region);
        let mut routes = Vec::new();
        let mut next = None;
        loop {
            let out = self
                .block(client.get_routes().api_id(api_id).set_next_token(next).send())
                .map_err(|e| {
                    sdk_error("GetRoutes", e, |e| {
                        Kind::when(e.is_not_found_exception(), Kind::NotFound)
                    })
                })?;
            routes.extend(out.items().iter().filter_map(|r| {
                Some(RouteInfo {
                    id: r.route_id().present()?.to_string(),
                    key: r.route_key().present()?.to_string(),
                })
            }));
            next = token(out.next_token());
            if next.is_none() {
                return Ok(routes);
            }
        }
    }

    fn delete_route(&self, api_id: &str, region: &str, route_id: &str) -> ProviderResult<()> {
        let request = self.apigw(region).delete_route().api_id(api_id).route_id(route_id);
        self.block(request.send()).map_err(|e| {
            sdk_error("DeleteRoute", e, |e| {
                Kind::when(e.is_not_found_exception(), Kind::NotFound)
            })
        })?;
        Ok(())
    }

    /// A statement id already present in the function policy is reported as
    /// `AlreadyExists`; a conflict from `AddPermission` itself stays a
    /// `Conflict` (e.g. a concurrent update).
    fn grant_invoke_permission(&self, grant: &InvokeGrant) -> ProviderResult<()> {
        let client = self.lambda(&grant.region);

        let policy = self
            .block(client.get_policy().function_name(&grant.function).send())
            .map_err(|e| {
                sdk_error("GetPolicy", e, |e| {
                    Kind::when(e.is_resource_not_found_exception(), Kind::NotFound)
                })
            });
        match policy {
            Ok(out) => {
                if out.policy().is_some_and(|p| statement_exists(p, &grant.statement_id)) {
                    return Err(ProviderError::AlreadyExists(format!(
                        "statement {} on {}",
                        grant.statement_id, grant.function
                    )));
                }
            }
            // No resource policy yet.
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e),
        }

        let request = client
            .add_permission()
            .function_name(&grant.function)
            .statement_id(&grant.statement_id)
            .action("lambda:InvokeFunction")
            .principal("apigateway.amazonaws.com")
            .source_arn(&grant.source_arn);
        self.block(request.send()).map_err(|e| {
            sdk_error("AddPermission", e, |e| {
                if e.is_resource_not_found_exception() {
                    Kind::NotFound
                } else {
                    Kind::when(e.is_resource_conflict_exception(), Kind::Conflict)
                }
            })
        })?;
        Ok(())
    }

    // -- Roles --

    fn create_role(&self, role: &RoleSpec) -> ProviderResult<String> {
        use aws_sdk_iam::types::Tag;

        let tags = role
            .tags
            .iter()
            .map(|(k, v)| Tag::builder().key(k).value(v).build().map_err(build_error))
            .collect::<ProviderResult<Vec<_>>>()?;
        let request = self
            .iam("")
            .create_role()
            .role_name(&role.name)
            .assume_role_policy_document(&role.trust_policy)
            .set_description(role.description.clone())
            .set_tags(Some(tags).filter(|t| !t.is_empty()));
        let out = self.block(request.send()).map_err(|e| {
            sdk_error("CreateRole", e, |e| {
                Kind::when(e.is_entity_already_exists_exception(), Kind::AlreadyExists)
            })
        })?;
        owned(out.role().present().and_then(|r| r.arn().present()), "Role.Arn")
    }

    fn update_role(&self, role: &RoleSpec) -> ProviderResult<()> {
        let client = self.iam("");
        let not_found = |e: &aws_sdk_iam::operation::update_role::UpdateRoleError| {
            Kind::when(e.is_no_such_entity_exception(), Kind::NotFound)
        };
        self.block(
            client
                .update_role()
                .role_name(&role.name)
                .set_description(role.description.clone())
                .send(),
        )
        .map_err(|e| sdk_error("UpdateRole", e, not_found))?;
        self.block(
            client
                .update_assume_role_policy()
                .role_name(&role.name)
                .policy_document(&role.trust_policy)
                .send(),
        )
        .map_err(|e| {
            sdk_error("UpdateAssumeRolePolicy", e, |e| {
                Kind::when(e.is_no_such_entity_exception(), Kind::NotFound)
            })
        })?;
        Ok(())
    }

    fn get_role_arn(&self, name: &str) -> ProviderResult<String> {
        let out = self
            .block(self.iam("").get_role().role_name(name).send())
            .map_err(|e| {
                sdk_error("GetRole", e, |e| {
                    Kind::when(e.is_no_such_entity_exception(), Kind::NotFound)
                })
            })?;
        owned(out.role().present().and_then(|r| r.arn().present()), "Role.Arn")
    }

    fn attach_role_policy(&self, role: &str, policy_arn: &str) -> ProviderResult<()> {
        let request = self
            .iam("")
            .attach_role_policy()
            .role_name(role)
            .policy_arn(policy_arn);
        self.block(request.send()).map_err(|e| {
            sdk_error("AttachRolePolicy", e, |e| {
                Kind::when(e.is_no_such_entity_exception(), Kind::NotFound)
            })
        })?;
        Ok(())
    }

    fn put_role_policy(&self, role: &str, policy_name: &str, document: &str) -> ProviderResult<()> {
        let request = self
            .iam("")
            .put_role_policy()
            .role_name(role)
            .policy_name(policy_name)
            .policy_document(document);
        self.block(request.send()).map_err(|e| {
            sdk_error("PutRolePolicy", e, |e| {
                Kind::when(e.is_no_such_entity_exception(), Kind::NotFound)
            })
        })?;
        Ok(())
    }

    fn list_attached_role_policies(&self, role: &str, marker: Option<&str>) -> ProviderResult<Page<String>> {
        let request = self
            .iam("")
            .list_attached_role_policies()
            .role_name(role)
            .set_marker(marker.map(String::from));
        let out = self.block(request.send()).map_err(|e| {
            sdk_error("ListAttachedRolePolicies", e, |e| {
                Kind::when(e.is_no_such_entity_exception(), Kind::NotFound)
            })
        })?;
        Ok(Page {
            items: out
                .attached_policies()
                .iter()
                .filter_map(|p| p.policy_arn().present().map(String::from))
                .collect(),
            next: token(out.marker()),
        })
    }

    fn detach_role_policy(&self, role: &str, policy_arn: &str) -> ProviderResult<()> {
        let request = self
            .iam("")
            .detach_role_policy()
            .role_name(role)
            .policy_arn(policy_arn);
        self.block(request.send()).map_err(|e| {
            sdk_error("DetachRolePolicy", e, |e| {
                Kind::when(e.is_no_such_entity_exception(), Kind::NotFound)
            })
        })?;
        Ok(())
    }

    fn list_role_policies(&self, role: &str, marker: Option<&str>) -> ProviderResult<Page<String>> {
        let request = self
            .iam("")
            .list_role_policies()
            .role_name(role)
            .set_marker(marker.map(String::from));
        let out = self.block(request.send()).map_err(|e| {
            sdk_error("ListRolePolicies", e, |e| {
                Kind::when(e.is_no_such_entity_exception(), Kind::NotFound)
            })
        })?;
        Ok(Page {
            items: out.policy_names().to_vec(),
            next: token(out.marker()),
        })
    }

    fn delete_role_policy(&self, role: &str, policy_name: &str) -> ProviderResult<()> {
        let request = self
            .iam("")
            .delete_role_policy()
            .role_name(role)
            .policy_name(policy_name);
        self.block(request.send()).map_err(|e| {
            sdk_error("DeleteRolePolicy", e, |e| {
                Kind::when(e.is_no_such_entity_exception(), Kind::NotFound)
            })
        })?;
        Ok(())
    }

    fn delete_role(&self, role: &str) -> ProviderResult<()> {
        let request = self.iam("").delete_role().role_name(role);
        self.block(request.send()).map_err(|e| {
            sdk_error("DeleteRole", e, |e| {
                if e.is_no_such_entity_exception() {
                    Kind::NotFound
                } else {
                    Kind::when(e.is_delete_conflict_exception(), Kind::Conflict)
                }
            })
        })?;
        Ok(())
    }

    // -- Identity pools --

    fn create_user_pool(&self, pool: &IdentityPoolSettings) -> ProviderResult<String> {
        use aws_sdk_cognitoidentityprovider::types::{
            AttributeDataType, SchemaAttributeType, UsernameAttributeType,
        };

        let schema: Vec<SchemaAttributeType> = pool
            .sign_up_attributes
            .iter()
            .map(|attr| {
                SchemaAttributeType::builder()
                    .name(attr)
                    .attribute_data_type(AttributeDataType::String)
                    .required(true)
                    .mutable(true)
                    .build()
            })
            .collect();
        let username_attributes: Vec<UsernameAttributeType> = pool
            .sign_in_identifiers
            .iter()
            .map(|id| UsernameAttributeType::from(id.as_str()))
            .collect();

        let request = self
            .cognito(region_of(&pool.region))
            .create_user_pool()
            .pool_name(pool.name())
            .policies(password_policy(&pool.password_policy))
            .set_username_attributes(Some(username_attributes).filter(|u| !u.is_empty()))
            .set_schema(Some(schema).filter(|s| !s.is_empty()))
            .set_user_pool_tags(tag_map(&pool.tags));
        let out = self
            .block(request.send())
            .map_err(|e| sdk_error("CreateUserPool", e, other))?;
        owned(out.user_pool().and_then(|p| p.id()), "UserPool.Id")
    }

    fn update_user_pool(&self, pool_id: &str, pool: &IdentityPoolSettings) -> ProviderResult<()> {
        let request = self
            .cognito(region_of(&pool.region))
            .update_user_pool()
            .user_pool_id(pool_id)
            .policies(password_policy(&pool.password_policy))
            .set_user_pool_tags(tag_map(&pool.tags));
        self.block(request.send()).map_err(|e| {
            sdk_error("UpdateUserPool", e, |e| {
                Kind::when(e.is_resource_not_found_exception(), Kind::NotFound)
            })
        })?;
        Ok(())
    }

    fn find_user_pool_id(&self, name: &str, region: &str) -> ProviderResult<String> {
        self.user_pools(region)?
            .into_iter()
            .find(|(pool_name, _)| pool_name == name)
            .map(|(_, id)| id)
            .ok_or_else(|| ProviderError::NotFound(format!("user pool {} not found", name)))
    }

    fn create_user_pool_client(&self, pool_id: &str, region: &str, client: &AppClient) -> ProviderResult<String> {
        use aws_sdk_cognitoidentityprovider::types::OAuthFlowType;

        let mut request = self
            .cognito(region)
            .create_user_pool_client()
            .user_pool_id(pool_id)
            .client_name(&client.name)
            .generate_secret(client.client_type == "confidential");
        if !client.return_urls.is_empty() {
            request = request
                .allowed_o_auth_flows_user_pool_client(true)
                .allowed_o_auth_flows(OAuthFlowType::Code)
                .allowed_o_auth_scopes("openid")
                .allowed_o_auth_scopes("email")
                .allowed_o_auth_scopes("profile")
                .supported_identity_providers("COGNITO")
                .set_callback_urls(Some(client.return_urls.clone()));
        }
        if !client.logout_urls.is_empty() {
            request = request.set_logout_urls(Some(client.logout_urls.clone()));
        }
        let out = self.block(request.send()).map_err(|e| {
            sdk_error("CreateUserPoolClient", e, |e| {
                Kind::when(e.is_resource_not_found_exception(), Kind::NotFound)
            })
        })?;
        owned(
            out.user_pool_client().and_then(|c| c.client_id()),
            "UserPoolClient.ClientId",
        )
    }

    fn create_user_pool_domain(&self, pool_id: &str, region: &str, domain: &str) -> ProviderResult<()> {
        let request = self
            .cognito(region)
            .create_user_pool_domain()
            .user_pool_id(pool_id)
            .domain(domain);
        self.block(request.send()).map_err(|e| {
            sdk_error("CreateUserPoolDomain", e, |e| {
                Kind::when(e.is_resource_not_found_exception(), Kind::NotFound)
            })
        })?;
        Ok(())
    }

    fn get_user_pool_domain(&self, pool_id: &str, region: &str) -> ProviderResult<Option<String>> {
        let request = self.cognito(region).describe_user_pool().user_pool_id(pool_id);
        let out = self.block(request.send()).map_err(|e| {
            sdk_error("DescribeUserPool", e, |e| {
                Kind::when(e.is_resource_not_found_exception(), Kind::NotFound)
            })
        })?;
        Ok(token(out.user_pool().and_then(|p| p.domain())))
    }

    fn delete_user_pool_domain(&self, pool_id: &str, region: &str, domain: &str) -> ProviderResult<()> {
        let request = self
            .cognito(region)
            .delete_user_pool_domain()
            .user_pool_id(pool_id)
            .domain(domain);
        self.block(request.send())
            .map_err(|e| sdk_error("DeleteUserPoolDomain", e, other))?;
        Ok(())
    }

    fn delete_user_pool(&self, pool_id: &str, region: &str) -> ProviderResult<()> {
        let request = self.cognito(region).delete_user_pool().user_pool_id(pool_id);
        self.block(request.send()).map_err(|e| {
            sdk_error("DeleteUserPool", e, |e| {
                Kind::when(e.is_resource_not_found_exception(), Kind::NotFound)
            })
        })?;
        Ok(())
    }
}

impl AwsProvider {
    /// Every `(name, id)` user pool in a region.
    fn user_pools(&self, region: &str) -> ProviderResult<Vec<(String, String)>> {
        let client = self.cognito(region);
        let mut pools = Vec::new();
        let mut next = None;
        loop {
            let out = self
                .block(client.list_user_pools().max_results(60).set_next_token(next).send())
                .map_err(|e| sdk_error("ListUserPools", e, other))?;
            pools.extend(out.user_pools().iter().filter_map(|p| {
                Some((p.name().present()?.to_string(), p.id().present()?.to_string()))
            }));
            next = token(out.next_token());
            if next.is_none() {
                return Ok(pools);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aws_sdk_lambda::operation::delete_function::DeleteFunctionError;
    use aws_sdk_lambda::types::error::ResourceNotFoundException;
    use aws_sdk_s3::error::ErrorMetadata;
    use aws_sdk_s3::operation::delete_bucket::DeleteBucketError;

    #[test]
    fn test_aws_modeled_not_found() {
        let err: SdkError<DeleteFunctionError, ()> = SdkError::service_error(
            DeleteFunctionError::ResourceNotFoundException(
                ResourceNotFoundException::builder().message("gone").build(),
            ),
            (),
        );
        let classified = sdk_error("DeleteFunction", err, |e| {
            Kind::when(e.is_resource_not_found_exception(), Kind::NotFound)
        });
        assert!(classified.is_not_found());
    }

    #[test]
    fn test_aws_error_code_fallback() {
        let missing: SdkError<DeleteBucketError, ()> = SdkError::service_error(
            DeleteBucketError::generic(ErrorMetadata::builder().code("NoSuchBucket").build()),
            (),
        );
        let not_empty: SdkError<DeleteBucketError, ()> = SdkError::service_error(
            DeleteBucketError::generic(ErrorMetadata::builder().code("BucketNotEmpty").build()),
            (),
        );
        let kind = |e: &DeleteBucketError| Kind::when(e.code() == Some("NoSuchBucket"), Kind::NotFound);
        assert!(sdk_error("DeleteBucket", missing, kind).is_not_found());
        assert!(matches!(
            sdk_error("DeleteBucket", not_empty, kind),
            ProviderError::CommandFailed(_)
        ));
    }

    #[test]
    fn test_aws_transport_failures_are_unavailable() {
        let err: SdkError<DeleteBucketError, ()> = SdkError::timeout_error("timed out");
        assert!(matches!(
            sdk_error("DeleteBucket", err, other),
            ProviderError::Unavailable(_)
        ));
        let err: SdkError<DeleteBucketError, ()> = SdkError::construction_failure("bad input");
        assert!(matches!(
            sdk_error("DeleteBucket", err, other),
            ProviderError::CommandFailed(_)
        ));
    }

    #[test]
    fn test_aws_statement_lookup() {
        let policy = r#"{"Version":"2012-10-17","Statement":[
            {"Sid":"apigateway-abc-invoke","Effect":"Allow"},
            {"Sid":"other","Effect":"Allow"}]}"#;
        assert!(statement_exists(policy, "apigateway-abc-invoke"));
        assert!(!statement_exists(policy, "apigateway-xyz-invoke"));
        assert!(!statement_exists("not json", "other"));
    }

    #[test]
    fn test_aws_present_reads_both_getter_shapes() {
        let required: &str = "name";
        let optional: Option<&str> = None;
        assert_eq!(token(required).as_deref(), Some("name"));
        assert_eq!(token(optional), None);
        assert_eq!(token(Some("")), None);
        assert!(owned(optional, "Name").is_err());
    }

    #[test]
    fn test_aws_request_helpers() {
        assert!(tag_map(&Variables::new()).is_none());
        let mut tags = Variables::new();
        tags.insert("env".into(), "dev".into());
        assert_eq!(tag_map(&tags).unwrap()["env"], "dev");
        assert_eq!(to_i32(Some(512)), Some(512));
        assert_eq!(to_i32(Some(u32::MAX)), None);
        assert!(matches!(
            read_code("/nonexistent/stagecraft.zip"),
            Err(ProviderError::CommandFailed(_))
        ));
    }

    #[test]
    fn test_aws_password_policy_defaults() {
        let policy = password_policy(&None);
        let password = policy.password_policy().unwrap();
        assert_eq!(password.minimum_length(), Some(8));
    }
}
