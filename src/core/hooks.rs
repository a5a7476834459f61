//! Hook runner: external commands bracketing a stage.

use super::error::{Error, Result};
use super::types::Hooks;
use crate::transport::{exec_shell, Stream};
use std::fmt;
use std::path::Path;
use tracing::{debug, info, warn};

/// Point in a stage's lifecycle a hook list belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookPhase {
    PreDeploy,
    PostDeploy,
    PreDestroy,
    PostDestroy,
}

impl fmt::Display for HookPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PreDeploy => write!(f, "pre-deploy"),
            Self::PostDeploy => write!(f, "post-deploy"),
            Self::PreDestroy => write!(f, "pre-destroy"),
            Self::PostDestroy => write!(f, "post-destroy"),
        }
    }
}

impl Hooks {
    pub fn commands(&self, phase: HookPhase) -> &[String] {
        match phase {
            HookPhase::PreDeploy => &self.pre_deploy,
            HookPhase::PostDeploy => &self.post_deploy,
            HookPhase::PreDestroy => &self.pre_destroy,
            HookPhase::PostDestroy => &self.post_destroy,
        }
    }
}

/// Run one phase of a stage's hooks, if the stage declares any.
pub fn run_phase(hooks: Option<&Hooks>, phase: HookPhase) -> Result<()> {
    let Some(hooks) = hooks else {
        return Ok(());
    };
    let commands = hooks.commands(phase);
    if commands.is_empty() {
        return Ok(());
    }
    info!("Running {} {} hook(s)", commands.len(), phase);
    run_hooks(
        commands,
        hooks.working_dir.as_deref(),
        hooks.suppress_stdout,
        hooks.suppress_stderr,
        hooks.stop_on_error,
    )
}

/// Run each command in order. A failing command aborts the batch with
/// `Error::Hook` when `stop_on_error` is set, otherwise it is logged and
/// the batch continues.
pub fn run_hooks(
    commands: &[String],
    working_dir: Option<&Path>,
    suppress_stdout: bool,
    suppress_stderr: bool,
    stop_on_error: bool,
) -> Result<()> {
    let stdout = Stream::from_suppress(suppress_stdout);
    let stderr = Stream::from_suppress(suppress_stderr);

    for command in commands {
        debug!("Running hook: {}", command);
        let failure = match exec_shell(command, working_dir, stdout, stderr) {
            Ok(0) => None,
            Ok(code) => Some(format!("hook '{}' exited with status {}", command, code)),
            Err(e) => Some(format!("hook '{}' could not start: {}", command, e)),
        };

        if let Some(message) = failure {
            if stop_on_error {
                return Err(Error::Hook(message));
            }
            warn!("{}", message);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cmds(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_hooks_run_in_order_in_working_dir() {
        let dir = tempfile::tempdir().unwrap();
        let commands = cmds(&["echo one >> log", "echo two >> log"]);
        run_hooks(&commands, Some(dir.path()), true, true, true).unwrap();
        let log = std::fs::read_to_string(dir.path().join("log")).unwrap();
        assert_eq!(log, "one\ntwo\n");
    }

    #[test]
    fn test_hooks_stop_on_error_aborts_batch() {
        let dir = tempfile::tempdir().unwrap();
        let commands = cmds(&["exit 1", "touch after"]);
        let err = run_hooks(&commands, Some(dir.path()), true, true, true).unwrap_err();
        assert!(matches!(err, Error::Hook(_)));
        assert!(!dir.path().join("after").exists());
    }

    #[test]
    fn test_hooks_continue_on_error() {
        let dir = tempfile::tempdir().unwrap();
        let commands = cmds(&["exit 1", "touch after"]);
        run_hooks(&commands, Some(dir.path()), true, true, false).unwrap();
        assert!(dir.path().join("after").exists());
    }

    #[test]
    fn test_hooks_missing_working_dir_is_a_failure() {
        let commands = cmds(&["true"]);
        let missing = Path::new("/nonexistent/stagecraft-hooks");
        assert!(run_hooks(&commands, Some(missing), true, true, true).is_err());
        assert!(run_hooks(&commands, Some(missing), true, true, false).is_ok());
    }

    #[test]
    fn test_hooks_phase_selection() {
        let hooks = Hooks {
            pre_deploy: cmds(&["a"]),
            post_destroy: cmds(&["b", "c"]),
            ..Hooks::default()
        };
        assert_eq!(hooks.commands(HookPhase::PreDeploy).to_vec(), vec!["a"]);
        assert!(hooks.commands(HookPhase::PostDeploy).is_empty());
        assert_eq!(hooks.commands(HookPhase::PostDestroy).len(), 2);
        assert!(run_phase(None, HookPhase::PreDeploy).is_ok());
    }
}
