//! CLI subcommands: init, validate, plan, deploy, destroy, schema, completions.

use crate::core::error::{Error, Result};
use crate::core::executor::{self, DeployConfig, DeployMode, DestroyConfig, ExistingResources, StageFilter};
use crate::core::refs::RefStore;
use crate::core::types::{PlanAction, Project, StageReport};
use crate::core::{parser, planner};
use crate::provider::{AwsProvider, CloudProvider, MemoryProvider};
use crate::resources::DEFAULT_SETTLE_DELAY;
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

#[derive(Parser, Debug)]
#[command(
    name = "stagecraft",
    version,
    about = "Declarative stage-driven cloud deployment"
)]
pub struct Cli {
    /// Verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Debug logging (implies --verbose)
    #[arg(long, global = true)]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Write a starter project into a directory
    Init {
        /// Directory to initialize (default: current)
        #[arg(default_value = ".")]
        path: PathBuf,
    },

    /// Load and validate a project and every stage resource file
    Validate {
        /// Path to the project file
        #[arg(short, long, default_value = "project.json", env = "PROJECT_PATH")]
        project: PathBuf,

        /// Override the project's environment
        #[arg(short, long)]
        env: Option<String>,
    },

    /// Show what a deploy would create, update or skip
    Plan {
        /// Path to the project file
        #[arg(short, long, default_value = "project.json", env = "PROJECT_PATH")]
        project: PathBuf,

        /// Override the project's environment
        #[arg(short, long)]
        env: Option<String>,

        /// Comma-separated stage types to include (default: all)
        #[arg(long, env = "DEPLOY_STAGES")]
        stage_types: Option<String>,

        /// Only plan resources that do not exist yet
        #[arg(long)]
        only_create: bool,

        /// Only plan resources that already exist
        #[arg(long)]
        only_update: bool,

        /// Use the in-memory provider instead of the cloud account
        #[arg(long)]
        simulate: bool,

        /// Named credential profile for the cloud account
        #[arg(long, env = "AWS_PROFILE")]
        profile: Option<String>,
    },

    /// Reconcile the account with the project
    Deploy {
        /// Path to the project file
        #[arg(short, long, default_value = "project.json", env = "PROJECT_PATH")]
        project: PathBuf,

        /// Override the project's environment
        #[arg(short, long)]
        env: Option<String>,

        /// KEY=VALUE file loaded into the environment before any provider call
        #[arg(long, env = "ENV_FILE")]
        env_file: Option<PathBuf>,

        /// Comma-separated stage types to deploy (default: all)
        #[arg(long, env = "DEPLOY_STAGES")]
        stage_types: Option<String>,

        /// Only create resources that do not exist yet
        #[arg(long)]
        only_create: bool,

        /// Only update resources that already exist
        #[arg(long)]
        only_update: bool,

        /// Seconds to wait after an access-role stage (0 = default)
        #[arg(long, default_value_t = 0, allow_negative_numbers = true)]
        wait_time: i64,

        /// Do not wait after access-role stages
        #[arg(long)]
        no_wait: bool,

        /// Use the in-memory provider instead of the cloud account
        #[arg(long)]
        simulate: bool,

        /// Named credential profile for the cloud account
        #[arg(long, env = "AWS_PROFILE")]
        profile: Option<String>,
    },

    /// Delete the project's resources
    Destroy {
        /// Path to the project file
        #[arg(short, long, default_value = "project.json", env = "PROJECT_PATH")]
        project: PathBuf,

        /// Override the project's environment
        #[arg(short, long)]
        env: Option<String>,

        /// KEY=VALUE file loaded into the environment before any provider call
        #[arg(long, env = "ENV_FILE")]
        env_file: Option<PathBuf>,

        /// Comma-separated stage types to destroy (default: all)
        #[arg(long, env = "STAGE_TYPES")]
        stage_types: Option<String>,

        /// List what would be deleted without deleting anything
        #[arg(long, env = "DRY_RUN")]
        dry_run: bool,

        /// Empty buckets before deleting them
        #[arg(long)]
        force: bool,

        /// Use the in-memory provider instead of the cloud account
        #[arg(long)]
        simulate: bool,

        /// Named credential profile for the cloud account
        #[arg(long, env = "AWS_PROFILE")]
        profile: Option<String>,
    },

    /// Print the JSON Schema of the project file
    Schema,

    /// Generate shell completions
    Completions {
        /// Target shell
        shell: Shell,
    },
}

/// Dispatch a CLI command.
pub fn dispatch(cmd: Commands) -> Result<()> {
    match cmd {
        Commands::Init { path } => cmd_init(&path),
        Commands::Validate { project, env } => cmd_validate(&project, env.as_deref()),
        Commands::Plan {
            project,
            env,
            stage_types,
            only_create,
            only_update,
            simulate,
            profile,
        } => {
            let filter = parse_filter(stage_types.as_deref())?;
            let mode = DeployMode::from_flags(only_create, only_update)?;
            let provider = make_provider(simulate, profile)?;
            cmd_plan(&project, env.as_deref(), &filter, mode, provider.as_ref())
        }
        Commands::Deploy {
            project,
            env,
            env_file,
            stage_types,
            only_create,
            only_update,
            wait_time,
            no_wait,
            simulate,
            profile,
        } => {
            let filter = parse_filter(stage_types.as_deref())?;
            let mode = DeployMode::from_flags(only_create, only_update)?;
            let wait = propagation_wait(wait_time, no_wait)?;
            if let Some(path) = &env_file {
                load_env_file(path)?;
            }
            let provider = make_provider(simulate, profile)?;
            cmd_deploy(&project, env.as_deref(), &filter, mode, wait, provider.as_ref())
        }
        Commands::Destroy {
            project,
            env,
            env_file,
            stage_types,
            dry_run,
            force,
            simulate,
            profile,
        } => {
            let filter = parse_filter(stage_types.as_deref())?;
            if let Some(path) = &env_file {
                load_env_file(path)?;
            }
            let provider = make_provider(simulate, profile)?;
            cmd_destroy(&project, env.as_deref(), &filter, dry_run, force, provider.as_ref())
        }
        Commands::Schema => cmd_schema(),
        Commands::Completions { shell } => {
            clap_complete::generate(shell, &mut Cli::command(), "stagecraft", &mut std::io::stdout());
            Ok(())
        }
    }
}

fn make_provider(simulate: bool, profile: Option<String>) -> Result<Box<dyn CloudProvider>> {
    if simulate {
        info!("Simulating against the in-memory provider");
        return Ok(Box::new(MemoryProvider::new()));
    }
    Ok(Box::new(AwsProvider::new(profile)?))
}

fn parse_filter(stage_types: Option<&str>) -> Result<StageFilter> {
    match stage_types {
        Some(list) => list.parse(),
        None => Ok(StageFilter::all()),
    }
}

/// `--no-wait` wins; `0` selects the default.
fn propagation_wait(wait_time: i64, no_wait: bool) -> Result<Duration> {
    if no_wait {
        return Ok(Duration::ZERO);
    }
    match wait_time {
        0 => Ok(executor::DEFAULT_PROPAGATION_WAIT),
        n if n < 0 => Err(Error::Usage(format!("--wait-time must not be negative, got {}", n))),
        n => Ok(Duration::from_secs(n.unsigned_abs())),
    }
}

/// Load a dotenv file into the process environment. Variables that are
/// already set keep their value.
pub fn load_env_file(path: &Path) -> Result<()> {
    dotenvy::from_path(path).map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
    debug!("Loaded environment from {}", path.display());
    Ok(())
}

fn cmd_init(path: &Path) -> Result<()> {
    let project_path = path.join("project.json");
    if project_path.exists() {
        return Err(Error::Usage(format!("{} already exists", project_path.display())));
    }

    let stages_dir = path.join("stages");
    std::fs::create_dir_all(&stages_dir)
        .map_err(|e| Error::Config(format!("cannot create {}: {}", stages_dir.display(), e)))?;

    let project = r#"{
  "name": "my-project",
  "environment": "dev",
  "variables": {},
  "stages": [
    {
      "name": "storage",
      "type": "s3",
      "config": "stages/buckets.json"
    }
  ]
}
"#;
    let buckets = r#"{
  "defaults": {
    "region": "us-east-1",
    "versioning": true
  },
  "buckets": [
    {
      "name": "{{project_name}}-{{env}}-assets"
    }
  ]
}
"#;
    let buckets_path = stages_dir.join("buckets.json");
    for (file, content) in [(&project_path, project), (&buckets_path, buckets)] {
        std::fs::write(file, content)
            .map_err(|e| Error::Config(format!("cannot write {}: {}", file.display(), e)))?;
    }

    println!("Initialized stagecraft project at {}", path.display());
    println!("  Created: {}", project_path.display());
    println!("  Created: {}", buckets_path.display());
    Ok(())
}

fn cmd_validate(path: &Path, env: Option<&str>) -> Result<()> {
    match parser::load_project(path, env) {
        Ok(project) => {
            let resources: usize = project.stages.iter().map(|s| s.resources.len()).sum();
            println!(
                "OK: {} ({} stages, {} resources)",
                project.name,
                project.stages.len(),
                resources
            );
            Ok(())
        }
        Err(Error::Validation(errors)) => {
            for e in &errors {
                eprintln!("  ERROR: {}", e);
            }
            Err(Error::Usage(format!("{} validation error(s)", errors.len())))
        }
        Err(e) => Err(e),
    }
}

fn cmd_plan(
    path: &Path,
    env: Option<&str>,
    filter: &StageFilter,
    mode: DeployMode,
    provider: &dyn CloudProvider,
) -> Result<()> {
    let project = parser::load_project(path, env)?;
    let existing = ExistingResources::query(provider, &project, filter)?;

    println!("Plan for {} ({}):", project.name, project.environment);
    let (mut to_create, mut to_update, mut to_skip) = (0, 0, 0);
    for stage in project.stages.iter().filter(|s| executor::is_active(s, filter)) {
        println!("\n  {} ({}):", stage.name, stage.stage_type);
        let changes = planner::plan_deploy(
            &stage.resources.names(),
            &existing.present_in(stage),
            mode,
        );
        for change in &changes {
            match change.reason {
                Some(reason) => println!("    {} {} ({})", change.action, change.resource, reason),
                None => println!("    {} {}", change.action, change.resource),
            }
            match change.action {
                PlanAction::Create => to_create += 1,
                PlanAction::Update => to_update += 1,
                _ => to_skip += 1,
            }
        }
    }
    println!(
        "\nPlan: {} to create, {} to update, {} skipped.",
        to_create, to_update, to_skip
    );
    Ok(())
}

fn cmd_deploy(
    path: &Path,
    env: Option<&str>,
    filter: &StageFilter,
    mode: DeployMode,
    propagation_wait: Duration,
    provider: &dyn CloudProvider,
) -> Result<()> {
    let project = parser::load_project(path, env)?;
    let existing = ExistingResources::query(provider, &project, filter)?;
    let refs = RefStore::new();

    let cfg = DeployConfig {
        project: &project,
        provider,
        refs: &refs,
        existing: &existing,
        filter,
        mode,
        propagation_wait,
        settle_delay: DEFAULT_SETTLE_DELAY,
    };
    let reports = executor::reconcile_deploy(&cfg)?;
    print_summary(&project, "Deploy", &reports);
    finish(&reports)
}

fn cmd_destroy(
    path: &Path,
    env: Option<&str>,
    filter: &StageFilter,
    dry_run: bool,
    force: bool,
    provider: &dyn CloudProvider,
) -> Result<()> {
    let project = parser::load_project(path, env)?;
    let refs = RefStore::new();

    let cfg = DestroyConfig {
        project: &project,
        provider,
        refs: &refs,
        filter,
        dry_run,
        force,
    };
    let reports = executor::reconcile_destroy(&cfg)?;

    if dry_run {
        println!("Dry run for {} ({}):", project.name, project.environment);
        for report in &reports {
            let Some(plan) = &report.dry_run else { continue };
            println!("\n  {}:", report.stage);
            for r in &plan.deletable {
                println!("    DELETE {}", r.name);
            }
            for r in &plan.skipped {
                println!("    SKIP {} (onDelete)", r.name);
            }
        }
        return Ok(());
    }

    print_summary(&project, "Destroy", &reports);
    finish(&reports)
}

fn print_summary(project: &Project, verb: &str, reports: &[StageReport]) {
    println!("{} of {} ({}):", verb, project.name, project.environment);
    for r in reports {
        println!(
            "  {}: {} created, {} updated, {} deleted, {} skipped, {} failed",
            r.stage, r.created, r.updated, r.deleted, r.skipped, r.failed
        );
    }
}

fn finish(reports: &[StageReport]) -> Result<()> {
    let failed: u32 = reports.iter().map(|r| r.failed).sum();
    if executor::has_failures(reports) {
        return Err(Error::Usage(format!("{} resource operation(s) failed", failed)));
    }
    Ok(())
}

fn cmd_schema() -> Result<()> {
    let schema = schemars::schema_for!(Project);
    println!("{}", serde_json::to_string_pretty(&schema)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(dir: &Path, name: &str, content: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, content).unwrap();
        path
    }

    fn sample_project(dir: &Path) -> PathBuf {
        write(
            dir,
            "buckets.json",
            r#"{"buckets": [{"name": "{{env}}-assets"}, {"name": "{{env}}-logs", "onDelete": "skip"}]}"#,
        );
        write(
            dir,
            "project.json",
            r#"{"name": "shop", "environment": "dev",
                "stages": [{"name": "storage", "type": "s3", "config": "buckets.json"}]}"#,
        )
    }

    #[test]
    fn test_cli_init_writes_valid_project() {
        let dir = tempfile::tempdir().unwrap();
        let sub = dir.path().join("app");
        std::fs::create_dir_all(&sub).unwrap();
        cmd_init(&sub).unwrap();
        assert!(sub.join("project.json").exists());
        assert!(sub.join("stages/buckets.json").exists());
        cmd_validate(&sub.join("project.json"), None).unwrap();
    }

    #[test]
    fn test_cli_init_refuses_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "project.json", "{}");
        assert!(cmd_init(dir.path()).is_err());
    }

    #[test]
    fn test_cli_validate_valid_and_invalid() {
        let dir = tempfile::tempdir().unwrap();
        let project = sample_project(dir.path());
        cmd_validate(&project, None).unwrap();

        let broken = write(
            dir.path(),
            "broken.json",
            r#"{"name": "", "stages": [{"name": "x", "type": "s3", "config": ""}]}"#,
        );
        assert!(cmd_validate(&broken, None).is_err());
    }

    #[test]
    fn test_cli_plan_simulated() {
        let dir = tempfile::tempdir().unwrap();
        let project = sample_project(dir.path());
        let provider = MemoryProvider::new();
        provider.add_bucket("dev-assets", &[]);
        cmd_plan(&project, None, &StageFilter::all(), DeployMode::All, &provider).unwrap();
        assert!(provider.calls().iter().all(|c| c.starts_with("list_")));
    }

    #[test]
    fn test_cli_deploy_simulated() {
        let dir = tempfile::tempdir().unwrap();
        let project = sample_project(dir.path());
        let provider = MemoryProvider::new();
        cmd_deploy(
            &project,
            Some("qa"),
            &StageFilter::all(),
            DeployMode::All,
            Duration::ZERO,
            &provider,
        )
        .unwrap();
        assert!(provider.bucket_objects("qa-assets").is_some());
        assert!(provider.bucket_objects("qa-logs").is_some());
    }

    #[test]
    fn test_cli_deploy_failure_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let project = sample_project(dir.path());
        let provider = MemoryProvider::new();
        provider.fail_on("create_bucket dev-logs");
        let result = cmd_deploy(
            &project,
            None,
            &StageFilter::all(),
            DeployMode::All,
            Duration::ZERO,
            &provider,
        );
        assert!(result.is_err());
        assert!(provider.bucket_objects("dev-assets").is_some());
    }

    #[test]
    fn test_cli_destroy_dry_run_makes_no_calls() {
        let dir = tempfile::tempdir().unwrap();
        let project = sample_project(dir.path());
        let provider = MemoryProvider::new();
        provider.add_bucket("dev-assets", &[]);
        cmd_destroy(&project, None, &StageFilter::all(), true, false, &provider).unwrap();
        assert!(provider.calls().is_empty());
        assert!(provider.bucket_objects("dev-assets").is_some());
    }

    #[test]
    fn test_cli_destroy_honours_on_delete() {
        let dir = tempfile::tempdir().unwrap();
        let project = sample_project(dir.path());
        let provider = MemoryProvider::new();
        provider.add_bucket("dev-assets", &[]);
        provider.add_bucket("dev-logs", &[]);
        cmd_destroy(&project, None, &StageFilter::all(), false, false, &provider).unwrap();
        assert!(provider.bucket_objects("dev-assets").is_none());
        assert!(provider.bucket_objects("dev-logs").is_some());
    }

    #[test]
    fn test_cli_propagation_wait() {
        assert_eq!(propagation_wait(0, false).unwrap(), executor::DEFAULT_PROPAGATION_WAIT);
        assert_eq!(propagation_wait(5, false).unwrap(), Duration::from_secs(5));
        assert_eq!(propagation_wait(5, true).unwrap(), Duration::ZERO);
        assert!(matches!(propagation_wait(-1, false), Err(Error::Usage(_))));
    }

    #[test]
    fn test_cli_env_file_dotenv_syntax() {
        let dir = tempfile::tempdir().unwrap();
        let file = write(
            dir.path(),
            ".env",
            "# credentials\n\
             STAGECRAFT_TEST_DOTENV_REGION=us-east-1 # default region\n\
             export STAGECRAFT_TEST_TOKEN=\"a b\"\n\
             STAGECRAFT_TEST_MULTI=\"line1\\nline2\"\n\
             STAGECRAFT_TEST_QUOTED='x # y'\n",
        );
        load_env_file(&file).unwrap();
        assert_eq!(std::env::var("STAGECRAFT_TEST_DOTENV_REGION").unwrap(), "us-east-1");
        assert_eq!(std::env::var("STAGECRAFT_TEST_TOKEN").unwrap(), "a b");
        assert_eq!(std::env::var("STAGECRAFT_TEST_MULTI").unwrap(), "line1\nline2");
        assert_eq!(std::env::var("STAGECRAFT_TEST_QUOTED").unwrap(), "x # y");
    }

    #[test]
    fn test_cli_env_file_keeps_existing() {
        let dir = tempfile::tempdir().unwrap();
        let file = write(
            dir.path(),
            ".env",
            "STAGECRAFT_TEST_FRESH=1\nSTAGECRAFT_TEST_KEPT=new\n",
        );
        std::env::set_var("STAGECRAFT_TEST_KEPT", "old");
        load_env_file(&file).unwrap();
        assert_eq!(std::env::var("STAGECRAFT_TEST_FRESH").unwrap(), "1");
        assert_eq!(std::env::var("STAGECRAFT_TEST_KEPT").unwrap(), "old");
        assert!(matches!(
            load_env_file(&dir.path().join("missing.env")),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_cli_parses_deploy_flags() {
        let cli = Cli::try_parse_from([
            "stagecraft", "deploy", "--project", "p.json", "--stage-types", "lambda,s3",
            "--wait-time", "-3",
        ])
        .unwrap();
        let Commands::Deploy { project, stage_types, wait_time, .. } = cli.command else {
            panic!("expected deploy");
        };
        assert_eq!(project, PathBuf::from("p.json"));
        assert_eq!(stage_types.as_deref(), Some("lambda,s3"));
        assert_eq!(wait_time, -3);
    }

    #[test]
    fn test_cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }
}
