//! Runs the API server and the UI as sibling processes and stops both
//! together.
use anyhow::{bail, Context, Result};
use futures::future::{join_all, select_all};
use std::future::Future;
use std::process::ExitStatus;
use std::time::Duration;
use tokio::process::{Child, Command};
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChildSpec {
    pub name: String,
    pub program: String,
    pub args: Vec<String>,
}

impl ChildSpec {
    pub fn new(name: impl Into<String>, program: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Whitespace-split command line such as `streamlit run main.py`.
    pub fn from_command_line(name: impl Into<String>, line: &str) -> Option<Self> {
        let mut parts = line.split_whitespace();
        let program = parts.next()?;
        Some(Self {
            name: name.into(),
            program: program.to_string(),
            args: parts.map(str::to_string).collect(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LaunchOutcome {
    Signal(&'static str),
    ChildExited { name: String, success: bool },
}

struct Managed {
    name: String,
    child: Child,
}

enum Trigger {
    Signal(&'static str),
    Exit(usize, std::io::Result<ExitStatus>),
}

pub struct Launcher {
    children: Vec<Managed>,
    grace: Duration,
}

impl Launcher {
    /// Spawn every child. If one fails to start, those already started are
    /// killed when the partial set is dropped.
    pub fn spawn(specs: &[ChildSpec], grace: Duration) -> Result<Self> {
        if specs.is_empty() {
            bail!("nothing to launch");
        }
        let mut children = Vec::with_capacity(specs.len());
        for spec in specs {
            let child = Command::new(&spec.program)
                .args(&spec.args)
                .kill_on_drop(true)
                .spawn()
                .with_context(|| format!("failed to start {} ({})", spec.name, spec.program))?;
            info!(name = %spec.name, pid = ?child.id(), "started process");
            children.push(Managed {
                name: spec.name.clone(),
                child,
            });
        }
        Ok(Self { children, grace })
    }

    /// Wait for `shutdown` or for any child to exit, then stop the rest.
    pub async fn run_until<F>(mut self, shutdown: F) -> Result<LaunchOutcome>
    where
        F: Future<Output = &'static str>,
    {
        let trigger = {
            let waits = self
                .children
                .iter_mut()
                .map(|m| Box::pin(m.child.wait()));
            tokio::select! {
                signal = shutdown => Trigger::Signal(signal),
                (status, index, _) = select_all(waits) => Trigger::Exit(index, status),
            }
        };

        let outcome = match trigger {
            Trigger::Signal(signal) => {
                info!(signal, "received signal; stopping processes");
                LaunchOutcome::Signal(signal)
            }
            Trigger::Exit(index, status) => {
                let name = self.children[index].name.clone();
                let status = status.with_context(|| format!("failed waiting on {}", name))?;
                warn!(%name, %status, "process exited; stopping the others");
                LaunchOutcome::ChildExited {
                    name,
                    success: status.success(),
                }
            }
        };

        for managed in &mut self.children {
            terminate(managed);
        }
        let grace = self.grace;
        join_all(self.children.iter_mut().map(|m| stop(m, grace))).await;
        Ok(outcome)
    }
}

/// Ask a child to exit. Children already reaped have no pid and are skipped.
fn terminate(managed: &mut Managed) {
    let Some(id) = managed.child.id() else {
        return;
    };
    #[cfg(unix)]
    {
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;

        match i32::try_from(id) {
            Ok(pid) => {
                if let Err(err) = kill(Pid::from_raw(pid), Signal::SIGTERM) {
                    warn!(name = %managed.name, pid, %err, "failed to send SIGTERM");
                }
            }
            Err(_) => warn!(name = %managed.name, id, "pid out of range"),
        }
    }
    #[cfg(not(unix))]
    {
        let _ = id;
        if let Err(err) = managed.child.start_kill() {
            warn!(name = %managed.name, ?err, "failed to kill process");
        }
    }
}

/// Reap a terminated child, killing it if it outlives `grace`.
async fn stop(managed: &mut Managed, grace: Duration) {
    let status = match tokio::time::timeout(grace, managed.child.wait()).await {
        Ok(status) => status,
        Err(_) => {
            if let Err(err) = managed.child.start_kill() {
                warn!(name = %managed.name, ?err, "failed to kill process");
            }
            managed.child.wait().await
        }
    };
    match status {
        Ok(status) => info!(name = %managed.name, %status, "process stopped"),
        Err(err) => warn!(name = %managed.name, ?err, "failed to reap process"),
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::time::Instant;

    fn sleeper(name: &str, secs: &str) -> ChildSpec {
        ChildSpec::new(name, "sleep").arg(secs)
    }

    #[test]
    fn parses_command_line() {
        let spec = ChildSpec::from_command_line("ui", "  streamlit run main.py ").unwrap();
        assert_eq!(spec.program, "streamlit");
        assert_eq!(spec.args, vec!["run", "main.py"]);
        assert!(ChildSpec::from_command_line("ui", "   ").is_none());
    }

    #[test]
    fn refuses_empty_set() {
        assert!(Launcher::spawn(&[], Duration::from_millis(10)).is_err());
    }

    #[tokio::test]
    async fn signal_stops_all_children() {
        let launcher = Launcher::spawn(
            &[sleeper("api", "30"), sleeper("ui", "30")],
            Duration::from_millis(100),
        )
        .unwrap();
        let started = Instant::now();
        let outcome = launcher.run_until(async { "SIGTERM" }).await.unwrap();
        assert_eq!(outcome, LaunchOutcome::Signal("SIGTERM"));
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn signal_reaches_children_as_sigterm() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("terminated");
        let script = format!(
            "trap 'touch {}; exit 0' TERM; sleep 30 & wait",
            marker.display()
        );
        let launcher = Launcher::spawn(
            &[ChildSpec::new("api", "sh").arg("-c").arg(script)],
            Duration::from_secs(5),
        )
        .unwrap();
        // let the shell install its trap
        tokio::time::sleep(Duration::from_millis(300)).await;

        let started = Instant::now();
        let outcome = launcher.run_until(async { "SIGTERM" }).await.unwrap();
        assert_eq!(outcome, LaunchOutcome::Signal("SIGTERM"));
        assert!(marker.exists());
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn stubborn_children_share_one_grace_period() {
        let stubborn = |name: &str| {
            ChildSpec::new(name, "sh")
                .arg("-c")
                .arg("trap '' TERM; while :; do sleep 0.1; done")
        };
        let launcher = Launcher::spawn(
            &[stubborn("api"), stubborn("ui")],
            Duration::from_millis(1500),
        )
        .unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;

        let started = Instant::now();
        let outcome = launcher.run_until(async { "SIGINT" }).await.unwrap();
        assert_eq!(outcome, LaunchOutcome::Signal("SIGINT"));
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(1500));
        assert!(elapsed < Duration::from_millis(2800));
    }

    #[tokio::test]
    async fn early_exit_stops_sibling() {
        let launcher = Launcher::spawn(
            &[ChildSpec::new("api", "false"), sleeper("ui", "30")],
            Duration::from_millis(100),
        )
        .unwrap();
        let started = Instant::now();
        let outcome = launcher
            .run_until(std::future::pending::<&'static str>())
            .await
            .unwrap();
        assert_eq!(
            outcome,
            LaunchOutcome::ChildExited {
                name: "api".into(),
                success: false
            }
        );
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn missing_program_fails_to_spawn() {
        let err = Launcher::spawn(
            &[ChildSpec::new("api", "/definitely/not/here")],
            Duration::from_millis(10),
        )
        .err()
        .unwrap();
        assert!(err.to_string().contains("failed to start api"));
    }
}
