//! Local subprocess execution.

use super::Stream;
use std::path::Path;
use std::process::{Command, Stdio};
use tracing::trace;

/// Run a shell command line via `bash -c`, streaming or discarding its output.
/// Returns the exit code (-1 when killed by a signal).
pub fn exec_shell(
    command: &str,
    working_dir: Option<&Path>,
    stdout: Stream,
    stderr: Stream,
) -> std::io::Result<i32> {
    trace!("exec: bash -c {}", command);
    let mut cmd = Command::new("bash");
    cmd.arg("-c").arg(command).stdin(Stdio::null());
    if let Some(dir) = working_dir {
        cmd.current_dir(dir);
    }
    cmd.stdout(to_stdio(stdout));
    cmd.stderr(to_stdio(stderr));

    let status = cmd.status()?;
    Ok(status.code().unwrap_or(-1))
}

fn to_stdio(stream: Stream) -> Stdio {
    match stream {
        Stream::Forward => Stdio::inherit(),
        Stream::Suppress => Stdio::null(),
    }
}
