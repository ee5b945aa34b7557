//! Stages run by another `director` process, on this machine or over ssh.
//!
//! The child reads the plan on stdin, writes the updated plan on stdout and
//! forwards its builder events as JSON lines on stderr, which are replayed
//! into the local observers. Paths inside the plan are passed through as
//! they are, so a remote machine must see the same file system layout.

use crate::{
    config::SshConfig,
    process::{self, program_name},
    stage::Stage,
};
use anyhow::Context as _;
use director_core::{
    builder::ObserverRef,
    ctx::Context,
    forward::{ReplayError, Replayer},
    plan::{self, Plan},
};
use director_io::thread::read_background;
use std::{
    io::{self, BufRead, BufReader, Read, Write},
    path::PathBuf,
    process::{Command, Stdio},
    thread,
};

/// How the child `director` is started.
#[derive(Debug, Clone)]
pub enum Invoker {
    Local { program: PathBuf, config: PathBuf },
    Ssh(SshConfig),
}

impl Invoker {
    /// Command running `stage` in forwarding mode on a plan read from stdin.
    pub fn command(&self, stage: plan::Stage) -> Command {
        let mut cmd = match self {
            Invoker::Local { program, config } => {
                let mut cmd = Command::new(program);
                cmd.arg("-c").arg(config);
                cmd
            }
            Invoker::Ssh(ssh) => {
                let mut cmd = ssh_basic_cmd(ssh);
                cmd.arg(&ssh.director).arg("-c").arg(&ssh.config);
                cmd
            }
        };
        cmd.arg(stage.name()).arg("--forward").arg("-");
        cmd
    }
}

pub fn ssh_basic_cmd(ssh: &SshConfig) -> Command {
    let mut ssh_cmd = Command::new("ssh");
    ssh_cmd
        .args(["-F", "/dev/null"]) // posix only
        .args(["-o", "BatchMode=yes"])
        .args(["-o", "IdentitiesOnly=yes"])
        .args(["-o", "StrictHostKeyChecking=no"])
        .args(["-o", "UserKnownHostsFile=/dev/null"])
        .args(["-o", "LogLevel=ERROR"])
        .args(["-o", "ConnectTimeout=10s"]);
    if let Some(key) = ssh.key.as_ref() {
        ssh_cmd.arg("-i").arg(key);
    }
    ssh_cmd
        .args(["-p", &ssh.port.to_string()])
        .arg(format!("{}@{}", ssh.user, ssh.host));
    ssh_cmd
}

pub struct RemoteStage {
    pub stage: plan::Stage,
    pub invoker: Invoker,
    pub observers: Vec<ObserverRef>,
}

impl Stage for RemoteStage {
    fn id(&self) -> plan::Stage {
        self.stage
    }

    fn run(&self, ctx: &Context, plan: Plan) -> anyhow::Result<Plan> {
        let mut input = Vec::new();
        plan.write(&mut input)?;

        let mut cmd = self.invoker.command(self.stage);
        cmd.stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        let name = program_name(&cmd);
        let mut child = process::spawn(&mut cmd)?;
        let stdin = child.stdin.take();
        let stdout = child.stdout.take().map(read_background);
        let stderr = child.stderr.take();

        let (waited, replayed) = thread::scope(|s| {
            s.spawn(move || {
                if let Some(mut w) = stdin {
                    if let Err(e) = w.write_all(&input) {
                        log::trace!("remote stage stopped reading its plan: {}", e);
                    }
                }
            });
            let replayer = s.spawn(|| -> Result<(), ReplayError> {
                let mut r = match stderr {
                    Some(r) => JsonLines::new(BufReader::new(r)),
                    None => return Ok(()),
                };
                let replayed = Replayer::new(&mut r, &self.observers).replay(ctx);
                let _ = io::copy(&mut r, &mut io::sink());
                replayed
            });
            let waited = process::wait(ctx, child, &name);
            let replayed = replayer
                .join()
                .unwrap_or_else(|_| Err(ReplayError::Remote("replayer panicked".to_string())));
            (waited, replayed)
        });
        let output = stdout.map(|h| h.wait_finish()).unwrap_or_default();

        let status = waited?;
        if !status.success() {
            let cause = match replayed {
                Err(e) => anyhow::Error::new(e),
                Ok(()) => anyhow::anyhow!("no error forwarded"),
            };
            return Err(cause.context(format!("remote {} stage exited with {}", self.stage, status)));
        }
        replayed.with_context(|| format!("bad event stream from remote {} stage", self.stage))?;
        Plan::read(&output[..]).with_context(|| format!("bad plan from remote {} stage", self.stage))
    }
}

/// Passes through the lines that may hold a forwarded message and logs the
/// rest, such as banners and warnings from ssh.
struct JsonLines<R> {
    r: R,
    line: Vec<u8>,
    pos: usize,
}

impl<R: BufRead> JsonLines<R> {
    fn new(r: R) -> Self {
        Self {
            r,
            line: Vec::new(),
            pos: 0,
        }
    }
}

impl<R: BufRead> Read for JsonLines<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        while self.pos >= self.line.len() {
            self.line.clear();
            self.pos = 0;
            if self.r.read_until(b'\n', &mut self.line)? == 0 {
                return Ok(0);
            }
            let first = self.line.iter().find(|b| !b.is_ascii_whitespace());
            if first != Some(&b'{') {
                if first.is_some() {
                    log::debug!("remote: {}", String::from_utf8_lossy(&self.line).trim_end());
                }
                self.line.clear();
            }
        }
        let n = (&self.line[self.pos..]).read(buf)?;
        self.pos += n;
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stats::Stats;
    use std::sync::Arc;

    /// `sh -c <script> <stage> --forward -`: the config path doubles as the
    /// script.
    fn scripted(script: &str, observers: Vec<ObserverRef>) -> RemoteStage {
        RemoteStage {
            stage: plan::Stage::Compile,
            invoker: Invoker::Local {
                program: PathBuf::from("sh"),
                config: PathBuf::from(script),
            },
            observers,
        }
    }

    fn plan() -> Plan {
        let mut p = Plan::new(3);
        p.record_stage(plan::Stage::Plan);
        p
    }

    #[test]
    fn plan_round_trips_through_the_child() {
        let p = plan();
        let out = scripted("cat", Vec::new())
            .run(&Context::background(), p.clone())
            .unwrap();
        assert_eq!(out.metadata.seed, p.metadata.seed);
        assert_eq!(out.metadata.stages.len(), 1);
    }

    #[test]
    fn forwarded_events_reach_local_observers() {
        let stats = Arc::new(Stats::new());
        let script = r#"printf '%s\n' '{"build":{"start":{"name":"compile","n_reqs":0}}}' '{"build":"end"}' >&2; cat"#;
        scripted(script, vec![stats.clone() as ObserverRef])
            .run(&Context::background(), plan())
            .unwrap();
        let s = stats.snapshot();
        assert_eq!((s.batches, s.finished), (1, 1));
    }

    #[test]
    fn transport_chatter_is_skipped() {
        let stats = Arc::new(Stats::new());
        let script = r#"echo "Warning: Permanently added 'pi.local' (ED25519) to the list of known hosts." >&2
printf '%s\n' '{"build":{"start":{"name":"run","n_reqs":0}}}' '' '{"build":"end"}' >&2; cat"#;
        let out = scripted(script, vec![stats.clone() as ObserverRef])
            .run(&Context::background(), plan())
            .unwrap();
        assert_eq!(out.metadata.seed, 3);
        let s = stats.snapshot();
        assert_eq!((s.batches, s.finished), (1, 1));
    }

    #[test]
    fn chatter_reads_in_small_pieces() {
        let input = "noise\n{\"error\":\"x\"}\n  \nmore noise\n{\"build\":\"end\"}\n";
        let mut r = JsonLines::new(input.as_bytes());
        let mut out = Vec::new();
        let mut buf = [0u8; 3];
        loop {
            let n = r.read(&mut buf).unwrap();
            if n == 0 {
                break;
            }
            out.extend_from_slice(&buf[..n]);
        }
        assert_eq!(String::from_utf8(out).unwrap(), "{\"error\":\"x\"}\n{\"build\":\"end\"}\n");
    }

    #[test]
    fn forwarded_error_explains_the_exit() {
        let script = r#"cat >/dev/null; printf '%s\n' '{"error":"no compilers"}' >&2; exit 1"#;
        let err = scripted(script, Vec::new())
            .run(&Context::background(), plan())
            .unwrap_err();
        let msg = format!("{:#}", err);
        assert!(msg.contains("remote error: no compilers"), "{}", msg);
    }

    #[test]
    fn garbage_plan_is_rejected() {
        let r = scripted("cat >/dev/null; echo garbage", Vec::new()).run(&Context::background(), plan());
        assert!(r.is_err());
    }

    #[test]
    fn ssh_command_line() {
        let ssh = SshConfig {
            host: "pi.local".to_string(),
            user: "root".to_string(),
            port: 2222,
            key: None,
            director: "/opt/director".to_string(),
            config: PathBuf::from("/etc/director.toml"),
        };
        let cmd = Invoker::Ssh(ssh).command(plan::Stage::Run);
        assert_eq!(cmd.get_program(), std::ffi::OsStr::new("ssh"));
        let args = cmd
            .get_args()
            .map(|a| a.to_string_lossy().into_owned())
            .collect::<Vec<_>>();
        let tail = &args[args.len() - 8..];
        assert_eq!(
            tail,
            ["2222", "root@pi.local", "/opt/director", "-c", "/etc/director.toml", "run", "--forward", "-"]
        );
        assert!(!args.contains(&"-i".to_string()));
        // Warnings on stderr would corrupt the forwarded event stream.
        assert!(args.contains(&"LogLevel=ERROR".to_string()));
    }
}
