use crate::grid::RunPair;
use crate::interrupt::InterruptFlag;
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus, Stdio};
use std::thread;
use std::time::Duration;

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// How a single external invocation ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvocationOutcome {
    Success,
    Exited(i32),
    Signaled,
}

impl InvocationOutcome {
    pub fn from_status(status: ExitStatus) -> Self {
        if status.success() {
            return InvocationOutcome::Success;
        }
        match status.code() {
            Some(code) => InvocationOutcome::Exited(code),
            None => InvocationOutcome::Signaled,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, InvocationOutcome::Success)
    }

    pub fn exit_code(&self) -> Option<i32> {
        match self {
            InvocationOutcome::Success => Some(0),
            InvocationOutcome::Exited(code) => Some(*code),
            InvocationOutcome::Signaled => None,
        }
    }

    pub fn describe(&self) -> String {
        match self {
            InvocationOutcome::Success => "0".to_string(),
            InvocationOutcome::Exited(code) => code.to_string(),
            InvocationOutcome::Signaled => "signal".to_string(),
        }
    }
}

/// Something that can execute one grid cell. The run loop only sees this trait,
/// so tests can drive it without spawning processes.
pub trait Invoker {
    fn invoke(&mut self, pair: &RunPair, label: &str) -> Result<InvocationOutcome>;
}

/// Runs `<executable> <generation> <label>` and waits for it to exit. With an
/// interrupt flag attached, a raised flag kills the child and the call returns
/// `Signaled`.
#[derive(Debug, Clone)]
pub struct ProcessInvoker {
    executable: PathBuf,
    working_dir: Option<PathBuf>,
    interrupt: Option<InterruptFlag>,
}

impl ProcessInvoker {
    pub fn new(executable: impl Into<PathBuf>) -> Self {
        Self {
            executable: executable.into(),
            working_dir: None,
            interrupt: None,
        }
    }

    pub fn with_working_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.working_dir = dir;
        self
    }

    pub fn with_interrupt(mut self, flag: InterruptFlag) -> Self {
        self.interrupt = Some(flag);
        self
    }

    pub fn executable(&self) -> &Path {
        &self.executable
    }

    fn command(&self, pair: &RunPair, label: &str) -> Command {
        let mut cmd = Command::new(&self.executable);
        cmd.arg(pair.generation.to_string());
        cmd.arg(label);
        if let Some(dir) = &self.working_dir {
            cmd.current_dir(dir);
        }
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::inherit());
        cmd.stderr(Stdio::inherit());
        cmd
    }
}

impl Invoker for ProcessInvoker {
    fn invoke(&mut self, pair: &RunPair, label: &str) -> Result<InvocationOutcome> {
        tracing::debug!(
            executable = %self.executable.display(),
            generation = pair.generation,
            label,
            "spawning external process"
        );
        let mut child = self
            .command(pair, label)
            .spawn()
            .with_context(|| format!("spawn_failed: {}", self.executable.display()))?;
        let wait_failed = || format!("wait_failed: {}", self.executable.display());
        loop {
            if let Some(status) = child.try_wait().with_context(wait_failed)? {
                return Ok(InvocationOutcome::from_status(status));
            }
            if self.interrupt.as_ref().is_some_and(InterruptFlag::is_set) {
                tracing::warn!(pid = child.id(), label, "interrupted, killing external process");
                // The child may already have exited between the poll and the kill.
                let _ = child.kill();
                child.wait().with_context(wait_failed)?;
                return Ok(InvocationOutcome::Signaled);
            }
            thread::sleep(POLL_INTERVAL);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_passes_generation_then_label() {
        let invoker = ProcessInvoker::new("target/release/hatetris-public");
        let cmd = invoker.command(&RunPair::new(13, 4), "w10_13_4");
        let args: Vec<String> = cmd
            .get_args()
            .map(|a| a.to_string_lossy().to_string())
            .collect();
        assert_eq!(args, vec!["13".to_string(), "w10_13_4".to_string()]);
        assert_eq!(
            cmd.get_program().to_string_lossy(),
            "target/release/hatetris-public"
        );
    }

    #[test]
    fn missing_executable_is_a_spawn_error() {
        let mut invoker = ProcessInvoker::new("/nonexistent/replay-lab/hatetris");
        let err = invoker
            .invoke(&RunPair::new(0, 0), "0_0")
            .expect_err("spawn must fail");
        assert!(err.to_string().contains("spawn_failed"));
    }

    #[cfg(unix)]
    #[test]
    fn exit_status_is_inspected() {
        let mut ok = ProcessInvoker::new("true");
        assert_eq!(
            ok.invoke(&RunPair::new(0, 0), "0_0").expect("true runs"),
            InvocationOutcome::Success
        );
        let mut bad = ProcessInvoker::new("false");
        let outcome = bad.invoke(&RunPair::new(0, 1), "0_1").expect("false runs");
        assert_eq!(outcome, InvocationOutcome::Exited(1));
        assert!(!outcome.is_success());
        assert_eq!(outcome.describe(), "1");
    }

    #[cfg(unix)]
    #[test]
    fn raised_interrupt_kills_running_child() {
        use std::time::Instant;

        // `sh 0 0_0` runs the script named after the generation argument.
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join("0"), "exec sleep 30\n").expect("write script");

        let flag = InterruptFlag::new();
        let trigger = flag.clone();
        let raiser = thread::spawn(move || {
            thread::sleep(Duration::from_millis(150));
            trigger.trigger();
        });

        let mut invoker = ProcessInvoker::new("sh")
            .with_working_dir(Some(dir.path().to_path_buf()))
            .with_interrupt(flag);
        let started = Instant::now();
        let outcome = invoker
            .invoke(&RunPair::new(0, 0), "0_0")
            .expect("child spawned");
        raiser.join().expect("raiser thread");

        assert_eq!(outcome, InvocationOutcome::Signaled);
        assert!(
            started.elapsed() < Duration::from_secs(10),
            "took {:?}",
            started.elapsed()
        );
    }
}
