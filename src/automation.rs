//! External automation seam and its process-backed implementation.
//!
//! The automation is opaque: it reads the hand-off files on startup, does its
//! work and exits. Its exit code is the only completion signal.

use std::fs;
use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::process::Stdio;

use chrono::Utc;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;

use crate::error::AutomationError;
use crate::state_machine::{Marker, TargetId};

/// What the automation needs to know about a run, written before launch.
#[derive(Debug, Clone, PartialEq)]
pub struct Handoff {
    pub target_id: TargetId,
    pub marker: Marker,
    pub hours_target: f64,
}

impl Handoff {
    /// `<target_id>|<marker>`
    pub fn request_line(&self) -> String {
        format!("{}|{}", self.target_id, self.marker)
    }
}

/// Well-known files the automation reads at startup.
#[derive(Debug, Clone)]
pub struct HandoffFiles {
    pub request_path: PathBuf,
    pub hours_path: PathBuf,
}

impl HandoffFiles {
    pub fn new(request_path: impl Into<PathBuf>, hours_path: impl Into<PathBuf>) -> Self {
        Self {
            request_path: request_path.into(),
            hours_path: hours_path.into(),
        }
    }

    /// Replaces both files. Each is written to a temp sibling and renamed so the
    /// automation never reads a partial line.
    pub fn write(&self, handoff: &Handoff) -> io::Result<()> {
        write_replacing(&self.request_path, &handoff.request_line())?;
        write_replacing(&self.hours_path, &handoff.hours_target.to_string())?;
        tracing::debug!(
            request = %self.request_path.display(),
            hours = %self.hours_path.display(),
            line = %handoff.request_line(),
            "hand-off written"
        );
        Ok(())
    }
}

fn write_replacing(path: &Path, contents: &str) -> io::Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)?;
    }
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    fs::write(&tmp, contents)?;
    fs::rename(&tmp, path)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AutomationOutcome {
    /// `None` when the process was killed by a signal.
    pub exit_code: Option<i32>,
}

impl AutomationOutcome {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

pub type AutomationFuture =
    Pin<Box<dyn Future<Output = Result<AutomationOutcome, AutomationError>> + Send>>;

pub trait Automation: Send + Sync {
    /// Starts the automation for `handoff` and resolves when it exits.
    /// Dropping the future stops waiting but does not stop the automation.
    fn launch(&self, handoff: &Handoff) -> AutomationFuture;
}

/// Runs the automation as a child process.
#[derive(Debug, Clone)]
pub struct ProcessAutomation {
    pub program: String,
    pub args: Vec<String>,
    pub working_dir: Option<PathBuf>,
    pub log_path: PathBuf,
}

impl ProcessAutomation {
    fn command_line(&self, marker: &Marker) -> String {
        let mut parts = vec![self.program.clone()];
        parts.extend(self.args.iter().cloned());
        parts.push("--exec-tag".into());
        parts.push(marker.to_string());
        parts.join(" ")
    }
}

async fn open_log(path: &Path) -> io::Result<File> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await
}

async fn append_log(log: &mut File, text: &str) -> Result<(), AutomationError> {
    log.write_all(text.as_bytes())
        .await
        .map_err(AutomationError::Log)?;
    log.flush().await.map_err(AutomationError::Log)
}

/// Child stdio handle sharing the log file.
async fn log_stdio(log: &File) -> Result<Stdio, AutomationError> {
    let handle = log.try_clone().await.map_err(AutomationError::Log)?;
    Ok(Stdio::from(handle.into_std().await))
}

impl Automation for ProcessAutomation {
    fn launch(&self, handoff: &Handoff) -> AutomationFuture {
        let this = self.clone();
        let marker = handoff.marker.clone();

        Box::pin(async move {
            let command_line = this.command_line(&marker);
            let mut log = open_log(&this.log_path)
                .await
                .map_err(AutomationError::Log)?;
            append_log(
                &mut log,
                &format!(
                    "\n===== {} START {} =====\nCMD: {}\n",
                    Utc::now().to_rfc3339(),
                    marker,
                    command_line
                ),
            )
            .await?;

            let mut cmd = tokio::process::Command::new(&this.program);
            cmd.args(&this.args)
                .arg("--exec-tag")
                .arg(marker.as_str())
                .env("NO_PROMPT", "1")
                .env("EXEC_TAG", marker.as_str())
                .stdin(Stdio::null())
                .stdout(log_stdio(&log).await?)
                .stderr(log_stdio(&log).await?);
            if let Some(dir) = &this.working_dir {
                cmd.current_dir(dir);
            }

            let mut child = cmd.spawn().map_err(|source| AutomationError::Spawn {
                program: this.program.clone(),
                source,
            })?;
            tracing::info!(
                marker = %marker,
                pid = ?child.id(),
                command = %command_line,
                "automation started"
            );

            let status = child.wait().await.map_err(AutomationError::Wait)?;
            let outcome = AutomationOutcome {
                exit_code: status.code(),
            };

            append_log(
                &mut log,
                &format!(
                    "===== {} END {} (exit={:?}) =====\n",
                    Utc::now().to_rfc3339(),
                    marker,
                    outcome.exit_code
                ),
            )
            .await?;
            tracing::info!(marker = %marker, exit_code = ?outcome.exit_code, "automation exited");
            Ok(outcome)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handoff() -> Handoff {
        Handoff {
            target_id: TargetId(540030),
            marker: Marker::new("AUTO_20250821_112332347"),
            hours_target: 7.5,
        }
    }

    #[test]
    fn request_line_joins_target_and_marker() {
        assert_eq!(handoff().request_line(), "540030|AUTO_20250821_112332347");
    }

    #[test]
    fn handoff_files_are_replaced() {
        let dir = tempfile::tempdir().unwrap();
        let files = HandoffFiles::new(
            dir.path().join("handoff/last_request.txt"),
            dir.path().join("handoff/last_hours.txt"),
        );
        fs::create_dir_all(dir.path().join("handoff")).unwrap();
        fs::write(&files.request_path, "old|value").unwrap();

        files.write(&handoff()).unwrap();

        assert_eq!(
            fs::read_to_string(&files.request_path).unwrap(),
            "540030|AUTO_20250821_112332347"
        );
        assert_eq!(fs::read_to_string(&files.hours_path).unwrap(), "7.5");
    }

    #[test]
    fn outcome_success_requires_zero() {
        assert!(AutomationOutcome { exit_code: Some(0) }.success());
        assert!(!AutomationOutcome { exit_code: Some(2) }.success());
        assert!(!AutomationOutcome { exit_code: None }.success());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn process_exit_code_and_log() {
        let dir = tempfile::tempdir().unwrap();
        let automation = ProcessAutomation {
            program: "sh".into(),
            args: vec!["-c".into(), "echo tag=$EXEC_TAG prompt=$NO_PROMPT; exit 3".into()],
            working_dir: Some(dir.path().to_path_buf()),
            log_path: dir.path().join("logs/automation.log"),
        };

        let outcome = automation.launch(&handoff()).await.unwrap();
        assert_eq!(outcome.exit_code, Some(3));

        let log = fs::read_to_string(&automation.log_path).unwrap();
        assert!(log.contains("START AUTO_20250821_112332347"));
        assert!(log.contains("tag=AUTO_20250821_112332347 prompt=1"));
        assert!(log.contains("exit=Some(3)"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn log_is_appended_in_order_across_launches() {
        let dir = tempfile::tempdir().unwrap();
        let automation = ProcessAutomation {
            program: "sh".into(),
            args: vec!["-c".into(), "echo working on $EXEC_TAG".into()],
            working_dir: None,
            log_path: dir.path().join("nested/logs/automation.log"),
        };
        let second = Handoff {
            marker: Marker::new("AUTO_20250821_112332348"),
            ..handoff()
        };

        assert!(automation.launch(&handoff()).await.unwrap().success());
        assert!(automation.launch(&second).await.unwrap().success());

        let log = fs::read_to_string(&automation.log_path).unwrap();
        let order = [
            "START AUTO_20250821_112332347",
            "working on AUTO_20250821_112332347",
            "END AUTO_20250821_112332347 (exit=Some(0))",
            "START AUTO_20250821_112332348",
            "working on AUTO_20250821_112332348",
            "END AUTO_20250821_112332348 (exit=Some(0))",
        ];
        let positions: Vec<usize> = order
            .iter()
            .map(|needle| log.find(needle).unwrap_or_else(|| panic!("missing {needle}")))
            .collect();
        assert!(positions.windows(2).all(|w| w[0] < w[1]), "{log}");
    }

    #[tokio::test]
    async fn missing_program_fails_to_spawn() {
        let dir = tempfile::tempdir().unwrap();
        let automation = ProcessAutomation {
            program: "definitely-not-a-real-automation-binary".into(),
            args: Vec::new(),
            working_dir: None,
            log_path: dir.path().join("automation.log"),
        };

        let err = automation.launch(&handoff()).await.unwrap_err();
        assert!(matches!(err, AutomationError::Spawn { .. }));
    }
}
