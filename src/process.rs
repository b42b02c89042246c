//! Subprocess supervision for rclone invocations.
//!
//! Spawns rclone with piped output, pumps each stream on its own thread so
//! neither OS pipe buffer can stall the child, and guarantees the process is
//! gone by the time the guard is released.

use std::collections::BTreeMap;
use std::io::{self, BufRead, BufReader, Read};
use std::path::Path;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::error::RcloneError;

/// Windows-specific: CREATE_NO_WINDOW flag
#[cfg(windows)]
const CREATE_NO_WINDOW: u32 = 0x08000000;

/// Grace period between the polite signal and the forced kill.
const TERM_GRACE: Duration = Duration::from_secs(2);

/// Poll interval for bounded waits. std has no native timed wait on Child.
const WAIT_TICK: Duration = Duration::from_millis(25);

/// One captured line, tagged with the stream it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputLine {
    Stdout(String),
    Stderr(String),
}

/// A supervised rclone process.
///
/// Owns the `Child` for its lifetime. If the guard is dropped while the
/// process is still running, the termination procedure runs first, so every
/// exit path (return, error, panic unwind) releases the OS process.
pub struct ProcessGuard {
    child: Child,
    command_name: String,
    exit: Option<ExitStatus>,
}

impl ProcessGuard {
    /// Spawn the binary with the given arguments and environment overlay.
    ///
    /// The environment map is merged over the inherited process environment.
    /// `command_name` is used only for log correlation.
    pub fn spawn(
        binary: &Path,
        args: &[String],
        env: &BTreeMap<String, String>,
        command_name: &str,
    ) -> Result<Self, RcloneError> {
        let mut cmd = Command::new(binary);
        cmd.args(args)
            .envs(env)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .stdin(Stdio::null());

        // Own process group, so termination takes down any helpers rclone
        // spawns along with rclone itself.
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            cmd.process_group(0);
        }

        // Windows: hide console window
        #[cfg(windows)]
        {
            use std::os::windows::process::CommandExt;
            cmd.creation_flags(CREATE_NO_WINDOW);
        }

        let child = cmd.spawn().map_err(|source| RcloneError::Spawn {
            binary: binary.to_path_buf(),
            source,
        })?;

        tracing::debug!(command = command_name, pid = child.id(), "spawned rclone");

        Ok(Self {
            child,
            command_name: command_name.to_string(),
            exit: None,
        })
    }

    /// Process identifier.
    pub fn id(&self) -> u32 {
        self.child.id()
    }

    /// Exit code, if the process has been reaped.
    pub fn exit_code(&self) -> Option<i32> {
        self.exit.map(status_code)
    }

    /// Take both output pipes and pump them line-by-line into one channel.
    ///
    /// The receiver disconnects once both streams reach EOF. Lines keep
    /// their per-stream order; the two streams interleave as they arrive.
    pub fn pump_output(&mut self) -> (Receiver<OutputLine>, Vec<JoinHandle<()>>) {
        let stdout = self.child.stdout.take().expect("stdout piped");
        let stderr = self.child.stderr.take().expect("stderr piped");

        let (tx, rx) = mpsc::channel();
        let stderr_tx = tx.clone();

        let handles = vec![
            thread::spawn(move || pump_lines(stdout, tx, OutputLine::Stdout)),
            thread::spawn(move || pump_lines(stderr, stderr_tx, OutputLine::Stderr)),
        ];
        (rx, handles)
    }

    /// Two-phase termination: polite signal, bounded grace period, then
    /// forced kill. Idempotent; safe when the process already exited, even
    /// between the liveness check and the signal.
    pub fn terminate(&mut self) {
        if self.exit.is_some() {
            return;
        }
        if let Ok(Some(status)) = self.child.try_wait() {
            self.exit = Some(status);
            return;
        }

        tracing::debug!(command = %self.command_name, pid = self.child.id(), "terminating rclone");

        #[cfg(unix)]
        {
            use nix::sys::signal::{killpg, Signal};
            use nix::unistd::Pid;

            let pgid = Pid::from_raw(self.child.id() as i32);
            if killpg(pgid, Signal::SIGTERM).is_ok() {
                let deadline = Instant::now() + TERM_GRACE;
                while Instant::now() < deadline {
                    if let Ok(Some(status)) = self.child.try_wait() {
                        self.exit = Some(status);
                        return;
                    }
                    thread::sleep(WAIT_TICK);
                }
            }
            let _ = killpg(pgid, Signal::SIGKILL);
        }

        // The process may have exited between the check and the signal, in
        // which case kill reports an error we can ignore.
        let _ = self.child.kill();
        match self.child.wait() {
            Ok(status) => self.exit = Some(status),
            Err(err) => {
                tracing::warn!(command = %self.command_name, error = %err, "failed to reap terminated rclone");
            }
        }
    }

    /// Wait for exit, bounded by an optional deadline.
    ///
    /// Returns the exit code and whether the deadline expired (in which case
    /// the process was terminated). Backstops a process that closed its
    /// streams but never exits.
    pub fn wait_deadline(&mut self, deadline: Option<Instant>) -> io::Result<(i32, bool)> {
        if let Some(status) = self.exit {
            return Ok((status_code(status), false));
        }
        match deadline {
            None => {
                let status = self.child.wait()?;
                self.exit = Some(status);
                Ok((status_code(status), false))
            }
            Some(deadline) => loop {
                if let Some(status) = self.child.try_wait()? {
                    self.exit = Some(status);
                    return Ok((status_code(status), false));
                }
                if Instant::now() >= deadline {
                    self.terminate();
                    return Ok((self.exit.map(status_code).unwrap_or(-1), true));
                }
                thread::sleep(WAIT_TICK);
            },
        }
    }
}

impl Drop for ProcessGuard {
    fn drop(&mut self) {
        if self.exit.is_none() {
            tracing::debug!(command = %self.command_name, "guard dropped with process still running");
            self.terminate();
        }
    }
}

fn status_code(status: ExitStatus) -> i32 {
    status.code().unwrap_or(-1)
}

/// Pump a byte stream into the channel line by line until EOF or until the
/// receiver goes away.
fn pump_lines<R: Read>(reader: R, tx: Sender<OutputLine>, wrap: fn(String) -> OutputLine) {
    let reader = BufReader::new(reader);
    for line in reader.lines() {
        match line {
            Ok(line) => {
                if tx.send(wrap(line)).is_err() {
                    break;
                }
            }
            Err(_) => break,
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn sh() -> PathBuf {
        PathBuf::from("/bin/sh")
    }

    fn sh_args(script: &str) -> Vec<String> {
        vec!["-c".to_string(), script.to_string()]
    }

    #[test]
    fn test_spawn_missing_binary() {
        let result = ProcessGuard::spawn(
            Path::new("/nonexistent/rclone"),
            &[],
            &BTreeMap::new(),
            "copy",
        );
        assert!(matches!(result, Err(RcloneError::Spawn { .. })));
    }

    #[test]
    fn test_env_overlay_reaches_child() {
        let env = BTreeMap::from([("RCLONE_TEST_MARKER".to_string(), "hello".to_string())]);
        let mut guard =
            ProcessGuard::spawn(&sh(), &sh_args("echo $RCLONE_TEST_MARKER"), &env, "env").unwrap();

        let (rx, pumps) = guard.pump_output();
        let lines: Vec<OutputLine> = rx.iter().collect();
        for pump in pumps {
            pump.join().unwrap();
        }

        assert!(lines.contains(&OutputLine::Stdout("hello".to_string())));
        let (code, timed_out) = guard.wait_deadline(None).unwrap();
        assert_eq!(code, 0);
        assert!(!timed_out);
    }

    #[test]
    fn test_stderr_and_stdout_both_pumped() {
        let mut guard = ProcessGuard::spawn(
            &sh(),
            &sh_args("echo out; echo err >&2"),
            &BTreeMap::new(),
            "pump",
        )
        .unwrap();

        let (rx, pumps) = guard.pump_output();
        let lines: Vec<OutputLine> = rx.iter().collect();
        for pump in pumps {
            pump.join().unwrap();
        }
        guard.wait_deadline(None).unwrap();

        assert!(lines.contains(&OutputLine::Stdout("out".to_string())));
        assert!(lines.contains(&OutputLine::Stderr("err".to_string())));
    }

    #[test]
    fn test_exit_code_collected() {
        let mut guard =
            ProcessGuard::spawn(&sh(), &sh_args("exit 7"), &BTreeMap::new(), "exit").unwrap();
        let (rx, _pumps) = guard.pump_output();
        drop(rx);
        let (code, _) = guard.wait_deadline(None).unwrap();
        assert_eq!(code, 7);
    }

    #[test]
    fn test_terminate_is_idempotent() {
        let mut guard =
            ProcessGuard::spawn(&sh(), &sh_args("exec sleep 30"), &BTreeMap::new(), "term")
                .unwrap();
        guard.terminate();
        let code = guard.exit_code();
        assert!(code.is_some());

        // Second call on the already-reaped process is a no-op.
        guard.terminate();
        assert_eq!(guard.exit_code(), code);
    }

    #[test]
    fn test_terminate_after_natural_exit() {
        let mut guard =
            ProcessGuard::spawn(&sh(), &sh_args("exit 0"), &BTreeMap::new(), "done").unwrap();
        let (code, _) = guard.wait_deadline(None).unwrap();
        assert_eq!(code, 0);
        guard.terminate();
        assert_eq!(guard.exit_code(), Some(0));
    }

    #[test]
    fn test_wait_deadline_kills_hung_process() {
        let started = Instant::now();
        let mut guard =
            ProcessGuard::spawn(&sh(), &sh_args("exec sleep 30"), &BTreeMap::new(), "hang")
                .unwrap();

        let deadline = Instant::now() + Duration::from_millis(200);
        let (_code, timed_out) = guard.wait_deadline(Some(deadline)).unwrap();

        assert!(timed_out);
        assert!(started.elapsed() < Duration::from_secs(10));
        // Process is gone; a second wait returns the cached status.
        let (_, timed_out) = guard.wait_deadline(None).unwrap();
        assert!(!timed_out);
    }
}
