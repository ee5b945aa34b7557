//! Child processes that die with their context.

use crossbeam_channel::{self as chan, select};
use director_core::ctx::{Context, CtxError};
use director_io::thread::read_background;
use nix::{
    sys::signal::{killpg, Signal},
    unistd::{setsid, Pid},
};
use std::{
    io::{self, Write},
    os::unix::process::CommandExt,
    process::{Child, Command, ExitStatus, Stdio},
};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ToolError {
    /// The tool ran and reported failure.
    #[error("'{cmd}' failed ({status}): {}", .stderr.trim())]
    Exit {
        cmd: String,
        status: ExitStatus,
        stderr: String,
    },
    #[error("failed to start '{cmd}': {source}")]
    Spawn {
        cmd: String,
        #[source]
        source: io::Error,
    },
    #[error("failed to wait for '{cmd}': {source}")]
    Wait {
        cmd: String,
        #[source]
        source: io::Error,
    },
    #[error(transparent)]
    Interrupted(#[from] CtxError),
}

pub fn program_name(cmd: &Command) -> String {
    cmd.get_program().to_string_lossy().into_owned()
}

/// Start `cmd` as the leader of a new session, so that [`wait`] can kill it
/// along with anything it spawned.
pub fn spawn(cmd: &mut Command) -> Result<Child, ToolError> {
    unsafe {
        cmd.pre_exec(|| {
            let _ = setsid();
            Ok(())
        });
    }
    cmd.spawn().map_err(|source| ToolError::Spawn {
        cmd: program_name(cmd),
        source,
    })
}

/// Wait for `child` to exit. If `ctx` is done first, the child's process
/// group is killed and reaped and the context error returned.
pub fn wait(ctx: &Context, mut child: Child, name: &str) -> Result<ExitStatus, ToolError> {
    let pid = Pid::from_raw(child.id() as i32);
    let (tx, rx) = chan::bounded(1);
    let waiter = std::thread::spawn(move || {
        let _ = tx.send(child.wait());
    });
    let deadline = ctx.deadline_rx();
    let interrupted = select! {
        recv(rx) -> r => {
            let _ = waiter.join();
            return match r {
                Ok(Ok(status)) => Ok(status),
                Ok(Err(source)) => Err(ToolError::Wait { cmd: name.to_string(), source }),
                Err(_) => Err(ToolError::Wait {
                    cmd: name.to_string(),
                    source: io::Error::new(io::ErrorKind::Other, "waiter vanished"),
                }),
            };
        }
        recv(ctx.done()) -> _ => ctx.expired(),
        recv(deadline) -> _ => ctx.expired(),
    };

    log::trace!("killing '{}' ({}): {}", name, pid, interrupted);
    let _ = killpg(pid, Signal::SIGKILL);
    let _ = rx.recv();
    let _ = waiter.join();
    Err(interrupted.into())
}

/// Run a tool to completion and return its stdout.
///
/// Its stderr goes to `errw` if given and is also kept for the error report
/// on a non-zero exit.
pub fn run_tool(ctx: &Context, mut cmd: Command, errw: Option<&mut dyn Write>) -> Result<Vec<u8>, ToolError> {
    let name = program_name(&cmd);
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    let mut child = spawn(&mut cmd)?;
    let stdout = child.stdout.take().map(read_background);
    let stderr = child.stderr.take().map(read_background);

    let waited = wait(ctx, child, &name);
    let out = stdout.map(|h| h.wait_finish()).unwrap_or_default();
    let err = stderr.map(|h| h.wait_finish()).unwrap_or_default();
    if let Some(w) = errw {
        if let Err(e) = w.write_all(&err).and_then(|_| w.flush()) {
            log::warn!("failed to save stderr of '{}': {}", name, e);
        }
    }

    let status = waited?;
    if status.success() {
        Ok(out)
    } else {
        Err(ToolError::Exit {
            cmd: name,
            status,
            stderr: String::from_utf8_lossy(&err).into_owned(),
        })
    }
}
