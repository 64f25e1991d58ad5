//! Child processes hosting a worker each.

use std::{
    path::Path,
    process::{Child, ChildStdin, ChildStdout, Command, Stdio},
    thread,
    time::{Duration, Instant},
};

use anyhow::{bail, Context};
use tracing::{trace, warn};

/// A worker process, killed when dropped if [`try_kill`](Self::try_kill) was not called.
#[derive(Debug)]
pub struct WorkerProcess {
    child: Child,
    cleaned_up: bool,
}

impl WorkerProcess {
    /// Starts `program` with `args`, stdin and stdout piped, stderr inherited.
    pub fn launch(program: &Path, args: &[String]) -> anyhow::Result<WorkerProcess> {
        let child = Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .with_context(|| format!("command '{}' not found", program.display()))?;
        trace!(pid = child.id(), "worker process launched");

        Ok(WorkerProcess {
            child,
            cleaned_up: false,
        })
    }

    /// OS identifier of the child.
    pub fn id(&self) -> u32 {
        self.child.id()
    }

    /// The write end of the child's stdin. Only available once.
    pub fn take_stdin(&mut self) -> Option<ChildStdin> {
        self.child.stdin.take()
    }

    /// The read end of the child's stdout. Only available once.
    pub fn take_stdout(&mut self) -> Option<ChildStdout> {
        self.child.stdout.take()
    }

    /// Kills the process and waits up to `max_duration` for it to be reaped.
    pub fn try_kill(&mut self, max_duration: Duration) -> anyhow::Result<()> {
        if self.cleaned_up {
            return Ok(());
        }
        if self.child.try_wait()?.is_none() {
            self.child.kill().context("could not kill process")?;
        }

        let start = Instant::now();
        loop {
            if self.child.try_wait()?.is_some() {
                self.cleaned_up = true;
                return Ok(());
            }
            if start.elapsed() >= max_duration {
                bail!(
                    "process {} still running after {:?}",
                    self.child.id(),
                    max_duration
                );
            }
            thread::sleep(Duration::from_millis(1));
        }
    }
}

impl Drop for WorkerProcess {
    fn drop(&mut self) {
        static CLEANUP_DURATION: Duration = Duration::from_secs(1);
        if !self.cleaned_up {
            if let Err(e) = self.try_kill(CLEANUP_DURATION) {
                warn!("could not kill worker process on drop: {e:#}");
            }
        }
    }
}

#[cfg(all(test, unix))]
mod process_tests {
    use std::io::{BufRead, BufReader, Write};

    use super::*;

    fn cat() -> WorkerProcess {
        WorkerProcess::launch(Path::new("cat"), &[]).unwrap()
    }

    #[test]
    fn pipes_are_connected() {
        let mut process = cat();
        let mut stdin = process.take_stdin().unwrap();
        let mut stdout = BufReader::new(process.take_stdout().unwrap());

        stdin.write_all(b"hello\n").unwrap();
        stdin.flush().unwrap();
        let mut line = String::new();
        stdout.read_line(&mut line).unwrap();
        assert_eq!(line, "hello\n");

        process.try_kill(Duration::from_secs(1)).unwrap();
    }

    #[test]
    fn kill_is_idempotent() {
        let mut process = cat();
        process.try_kill(Duration::from_secs(1)).unwrap();
        process.try_kill(Duration::from_secs(1)).unwrap();
    }

    #[test]
    fn unknown_program() {
        assert!(WorkerProcess::launch(Path::new("./definitely-not-a-program"), &[]).is_err());
    }
}
