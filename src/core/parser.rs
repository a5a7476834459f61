//! Project loading and validation.
//!
//! Loads a project file and every stage's resource file:
//! - format by extension: `.json`, `.toml`, anything else is YAML
//! - structural validation reports every problem, not just the first
//! - project variables are interpolated, then each resource file
//! - defaults are merged into every record, which is then re-interpolated
//!   with its own `name` bound
//! - required fields are checked per kind after the merge

use super::defaults::{apply_defaults, MergeDefaults};
use super::error::{Error, Result};
use super::interpolate::{interpolate_project_variables, Interpolate};
use super::types::*;
use crate::resources;
use serde::de::DeserializeOwned;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// On-disk format of a project or resource file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Json,
    Toml,
    Yaml,
}

impl Format {
    pub fn from_path(path: &Path) -> Self {
        match path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)
            .as_deref()
        {
            Some("json") => Self::Json,
            Some("toml") => Self::Toml,
            _ => Self::Yaml,
        }
    }
}

/// Deserialize a document in the given format.
pub fn parse_str<T: DeserializeOwned>(content: &str, format: Format) -> Result<T> {
    Ok(match format {
        Format::Json => serde_json::from_str(content)?,
        Format::Toml => toml::from_str(content)?,
        Format::Yaml => serde_yaml_ng::from_str(content)?,
    })
}

fn read_file<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("failed to read {}: {}", path.display(), e)))?;
    parse_str(&content, Format::from_path(path))
        .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))
}

/// Validate a parsed project. Returns a list of errors (empty = valid).
pub fn validate_project(project: &Project) -> Vec<String> {
    let mut errors = Vec::new();

    if project.name.trim().is_empty() {
        errors.push("project name must not be empty".to_string());
    }

    let names: HashSet<&str> = project.stages.iter().map(|s| s.name.as_str()).collect();
    let mut seen = HashSet::new();

    for stage in &project.stages {
        if stage.name.trim().is_empty() {
            errors.push("stage name must not be empty".to_string());
        } else if !seen.insert(stage.name.as_str()) {
            errors.push(format!("duplicate stage name '{}'", stage.name));
        }

        if stage.stage_type == StageType::Unknown {
            errors.push(format!(
                "stage '{}' has an unknown type (expected one of: lambda, s3, api, iam-role, cognito)",
                stage.name
            ));
        }
        if stage.on_conflict == ConflictPolicy::Invalid {
            errors.push(format!(
                "stage '{}': onConflict must be one of: stop, update",
                stage.name
            ));
        }
        if stage.on_error == ErrorPolicy::Invalid {
            errors.push(format!(
                "stage '{}': onError must be one of: stop, skip, rollback",
                stage.name
            ));
        }
        if stage.config_file.as_os_str().is_empty() {
            errors.push(format!("stage '{}' has no config file", stage.name));
        }

        for dep in &stage.depends_on {
            if dep == &stage.name {
                errors.push(format!("stage '{}' depends on itself", stage.name));
            } else if !names.contains(dep.as_str()) {
                errors.push(format!(
                    "stage '{}' depends on unknown stage '{}'",
                    stage.name, dep
                ));
            }
        }
    }

    errors
}

/// Load, validate and fully prepare a project.
///
/// `env_override` replaces the file's `environment` before interpolation.
pub fn load_project(path: &Path, env_override: Option<&str>) -> Result<Project> {
    info!("Loading project {}", path.display());
    let mut project: Project = read_file(path)?;

    let errors = validate_project(&project);
    if !errors.is_empty() {
        return Err(Error::Validation(errors));
    }

    if let Some(env) = env_override.filter(|e| !e.is_empty()) {
        debug!("Overriding environment with {}", env);
        project.environment = env.to_string();
    }

    interpolate_project_variables(&mut project);

    let base_dir = path.parent().map(Path::to_path_buf).unwrap_or_default();
    let mut missing = Vec::new();
    for stage in &mut project.stages {
        if stage.stage_type == StageType::Unknown {
            continue;
        }
        let file = resolve_path(&base_dir, &stage.config_file);
        stage.resources = load_stage_resources(stage.stage_type, &file, &project.variables)?;
        debug!(
            "Stage {}: {} resource(s) from {}",
            stage.name,
            stage.resources.len(),
            file.display()
        );

        for (resource, field) in resources::missing_fields(&stage.resources) {
            missing.push(format!(
                "stage '{}': {} '{}' is missing required field '{}'",
                stage.name, stage.stage_type, resource, field
            ));
        }
    }

    if !missing.is_empty() {
        return Err(Error::Validation(missing));
    }
    Ok(project)
}

fn resolve_path(base_dir: &Path, file: &Path) -> PathBuf {
    if file.is_absolute() {
        file.to_path_buf()
    } else {
        base_dir.join(file)
    }
}

/// Read one stage's resource file into its typed variant.
pub fn load_stage_resources(kind: StageType, file: &Path, vars: &Variables) -> Result<StageResources> {
    Ok(match kind {
        StageType::Function => {
            let parsed: FunctionFile = read_file(file)?;
            StageResources::Functions(prepare(parsed, vars, |f| (f.defaults, f.functions)))
        }
        StageType::Bucket => {
            let parsed: BucketFile = read_file(file)?;
            StageResources::Buckets(prepare(parsed, vars, |f| (f.defaults, f.buckets)))
        }
        StageType::Gateway => {
            let parsed: GatewayFile = read_file(file)?;
            StageResources::Gateways(prepare(parsed, vars, |f| (f.defaults, f.gateways)))
        }
        StageType::Role => {
            let parsed: RoleFile = read_file(file)?;
            StageResources::Roles(prepare(parsed, vars, |f| (f.defaults, f.roles)))
        }
        StageType::IdentityPool => {
            let parsed: IdentityPoolFile = read_file(file)?;
            StageResources::IdentityPools(prepare(parsed, vars, |f| (f.defaults, f.pools)))
        }
        StageType::Unknown => StageResources::Unloaded,
    })
}

/// Interpolate a resource file, merge its defaults into each record, then
/// re-interpolate every record with `name` bound to its own name.
fn prepare<F, T>(mut file: F, vars: &Variables, split: impl FnOnce(F) -> (Option<T>, Vec<T>)) -> Vec<T>
where
    F: Interpolate,
    T: Interpolate + MergeDefaults + Named,
{
    file.interpolate(vars);
    let (defaults, mut records) = split(file);
    apply_defaults(&mut records, defaults.as_ref());

    for record in &mut records {
        let mut scoped = vars.clone();
        scoped.insert("name".to_string(), record.record_name().to_string());
        record.interpolate(&scoped);
    }
    records
}

/// Access to a record's name without knowing its kind.
trait Named {
    fn record_name(&self) -> &str;
}

macro_rules! named {
    ($($ty:ty),* $(,)?) => {
        $( impl Named for $ty {
            fn record_name(&self) -> &str {
                self.name()
            }
        } )*
    };
}

named!(FunctionSettings, BucketSettings, GatewaySettings, RoleSettings, IdentityPoolSettings);

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn write(dir: &Path, name: &str, content: &str) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, content).unwrap();
        path
    }

    const FUNCTIONS: &str = r#"{
        "defaults": {
            "region": "us-east-1",
            "runtime": "nodejs20.x",
            "handler": "index.handler",
            "roleArn": "[[exec-role]]",
            "code": "dist/{{name}}.zip",
            "tags": { "env": "{{env}}" }
        },
        "functions": [
            { "name": "{{project_name}}-users", "ref": "users-fn" },
            { "name": "orders", "memory": 512, "code": "build/orders.zip" }
        ]
    }"#;

    #[test]
    fn test_parser_load_json_project_with_defaults() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "functions.json", FUNCTIONS);
        let project_path = write(
            dir.path(),
            "project.json",
            r#"{
                "name": "shop",
                "environment": "dev",
                "stages": [
                    { "name": "fns", "type": "lambda", "config": "functions.json" }
                ]
            }"#,
        );

        let project = load_project(&project_path, None).unwrap();
        let StageResources::Functions(functions) = &project.stages[0].resources else {
            panic!("expected functions");
        };
        assert_eq!(functions.len(), 2);
        assert_eq!(functions[0].name(), "shop-users");
        assert_eq!(functions[0].code.as_deref(), Some("dist/shop-users.zip"));
        assert_eq!(functions[0].tags["env"], "dev");
        assert_eq!(functions[0].reference.as_deref(), Some("users-fn"));
        assert_eq!(functions[1].code.as_deref(), Some("build/orders.zip"));
        assert_eq!(functions[1].memory_size, Some(512));
        assert!(functions[1].reference.is_none());
        assert_eq!(project.variables["project_name"], "shop");
    }

    #[test]
    fn test_parser_env_override() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "functions.json", FUNCTIONS);
        let project_path = write(
            dir.path(),
            "project.json",
            r#"{"name":"shop","environment":"dev","stages":[{"name":"fns","type":"lambda","config":"functions.json"}]}"#,
        );
        let project = load_project(&project_path, Some("prod")).unwrap();
        assert_eq!(project.environment, "prod");
        let StageResources::Functions(functions) = &project.stages[0].resources else {
            panic!("expected functions");
        };
        assert_eq!(functions[0].tags["env"], "prod");
    }

    #[test]
    fn test_parser_yaml_and_toml_projects() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "buckets.yaml", "buckets:\n  - name: \"{{env}}-assets\"\n");
        let yaml = write(
            dir.path(),
            "project.yaml",
            "name: shop\nenvironment: dev\nstages:\n  - name: storage\n    type: s3\n    config: buckets.yaml\n",
        );
        let project = load_project(&yaml, None).unwrap();
        assert_eq!(project.stages[0].resources.names(), vec!["dev-assets"]);

        let toml = write(
            dir.path(),
            "project.toml",
            "name = \"shop\"\nenvironment = \"qa\"\n\n[[stages]]\nname = \"storage\"\ntype = \"s3\"\nconfig = \"buckets.yaml\"\n",
        );
        let project = load_project(&toml, None).unwrap();
        assert_eq!(project.stages[0].resources.names(), vec!["qa-assets"]);
    }

    #[test]
    fn test_parser_validation_collects_every_error() {
        let project: Project = parse_str(
            r#"{
                "name": "",
                "stages": [
                    { "name": "a", "type": "ec2", "config": "a.json", "onError": "explode" },
                    { "name": "a", "type": "s3", "config": "b.json", "dependsOn": ["ghost"] },
                    { "name": "c", "type": "s3", "config": "c.json", "onConflict": "merge" }
                ]
            }"#,
            Format::Json,
        )
        .unwrap();
        let errors = validate_project(&project);
        assert_eq!(errors.len(), 6, "{errors:#?}");
        assert!(errors.iter().any(|e| e.contains("duplicate stage name 'a'")));
        assert!(errors.iter().any(|e| e.contains("unknown stage 'ghost'")));
        assert!(errors.iter().any(|e| e.contains("onConflict")));
        assert!(errors.iter().any(|e| e.contains("onError")));
    }

    #[test]
    fn test_parser_rollback_policy_is_accepted() {
        let project: Project = parse_str(
            r#"{"name":"p","stages":[{"name":"a","type":"s3","config":"a.json","onError":"rollback","onConflict":"update"}]}"#,
            Format::Json,
        )
        .unwrap();
        assert!(validate_project(&project).is_empty());
        assert_eq!(project.stages[0].on_error, ErrorPolicy::Rollback);
        assert!(project.stages[0].enabled);
    }

    #[test]
    fn test_parser_missing_required_fields() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "functions.json", r#"{"functions":[{"name":"bare"}]}"#);
        let project_path = write(
            dir.path(),
            "project.json",
            r#"{"name":"p","stages":[{"name":"fns","type":"lambda","config":"functions.json"}]}"#,
        );
        let Err(Error::Validation(errors)) = load_project(&project_path, None) else {
            panic!("expected validation error");
        };
        assert_eq!(errors.len(), 4);
        assert!(errors[0].contains("lambda 'bare' is missing required field 'roleArn'"));
    }

    #[test]
    fn test_parser_missing_resource_file_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let project_path = write(
            dir.path(),
            "project.json",
            r#"{"name":"p","stages":[{"name":"fns","type":"s3","config":"nope.json"}]}"#,
        );
        assert!(matches!(load_project(&project_path, None), Err(Error::Config(_))));
    }

    #[test]
    fn test_parser_format_from_path() {
        assert_eq!(Format::from_path(Path::new("p.JSON")), Format::Json);
        assert_eq!(Format::from_path(Path::new("p.toml")), Format::Toml);
        assert_eq!(Format::from_path(Path::new("p.yml")), Format::Yaml);
        assert_eq!(Format::from_path(Path::new("project")), Format::Yaml);
    }
}
