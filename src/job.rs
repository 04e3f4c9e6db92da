use crate::assemble::CompileOptions;
use crate::runtime::{RESULT_FILE_NAME, RUNTIME_FILE_NAME, RUNTIME_SOURCE};
use anyhow::{Context, Result};
use serde_json::{json, Value};
use std::fmt;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{info, warn};

pub const DOCUMENT_FILE: &str = "job.xml";
pub const PROGRAM_FILE: &str = "job.py";
pub const LOG_FILE: &str = "job.out";
pub const STATE_FILE: &str = "job.state";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Stopped,
    Running,
    Finished,
    Error,
}

impl JobState {
    pub fn as_str(self) -> &'static str {
        match self {
            JobState::Stopped => "stopped",
            JobState::Running => "running",
            JobState::Finished => "finished",
            JobState::Error => "error",
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug)]
pub struct Job {
    dir: PathBuf,
    state: JobState,
    started: Option<f64>,
    finished: Option<f64>,
    message: Option<String>,
}

impl Job {
    pub fn create(dir: &Path) -> Result<Self> {
        fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create job directory '{}'.", dir.display()))?;
        let dir = dir
            .canonicalize()
            .with_context(|| format!("Failed to resolve job directory '{}'.", dir.display()))?;
        Ok(Self {
            dir,
            state: JobState::Stopped,
            started: None,
            finished: None,
            message: None,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn state(&self) -> JobState {
        self.state
    }

    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    /// Compiles `document`, writes the program next to the runtime module
    /// and runs it with `python`. A document that fails to compile ends the
    /// job in `error` without running anything.
    pub fn start(&mut self, document: &str, options: &CompileOptions, python: &str) -> Result<JobState> {
        fs::write(self.dir.join(DOCUMENT_FILE), document)
            .context("Failed to write job document.")?;

        let program = match crate::compile_with_options(document, options) {
            Ok(program) => program,
            Err(e) => {
                warn!("Job in '{}' failed to compile: {}", self.dir.display(), e);
                self.message = Some(e.to_string());
                self.finish(JobState::Error)?;
                return Ok(self.state);
            }
        };
        let program_path = self.dir.join(PROGRAM_FILE);
        fs::write(&program_path, program).context("Failed to write compiled program.")?;
        fs::write(self.dir.join(RUNTIME_FILE_NAME), RUNTIME_SOURCE)
            .context("Failed to write runtime module.")?;

        let log = File::create(self.dir.join(LOG_FILE)).context("Failed to create job log.")?;
        let mut cmd = Command::new(python);
        cmd.current_dir(&self.dir)
            .arg(&program_path)
            .stdout(Stdio::from(log.try_clone()?))
            .stderr(Stdio::from(log));

        self.state = JobState::Running;
        self.started = Some(now());
        info!(dir = %self.dir.display(), "job running");

        let status = match cmd.status() {
            Ok(status) => status,
            Err(e) => {
                self.message = Some(e.to_string());
                self.finish(JobState::Error)?;
                return Err(e).with_context(|| {
                    format!(
                        "Failed to start '{}'. Ensure Python 3 is installed or pass --python.",
                        python
                    )
                });
            }
        };
        if status.success() {
            self.finish(JobState::Finished)?;
        } else {
            self.message = Some(format!("Interpreter exited with {}.", status));
            self.finish(JobState::Error)?;
        }
        Ok(self.state)
    }

    fn finish(&mut self, state: JobState) -> Result<()> {
        self.state = state;
        self.finished = Some(now());
        info!(dir = %self.dir.display(), state = %state, "job ended");
        let body = serde_json::to_string(&self.state_json())?;
        fs::write(self.dir.join(STATE_FILE), body).context("Failed to write job state.")?;
        Ok(())
    }

    pub fn state_json(&self) -> Value {
        json!({
            "state": self.state.as_str(),
            "started": self.started,
            "finished": self.finished,
            "message": self.message,
        })
    }

    pub fn result(&self) -> Result<Option<Value>> {
        let path = self.dir.join(RESULT_FILE_NAME);
        if !path.exists() {
            return Ok(None);
        }
        let raw = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read '{}'.", path.display()))?;
        let value = serde_json::from_str(&raw)
            .with_context(|| format!("Malformed result file '{}'.", path.display()))?;
        Ok(Some(value))
    }

    pub fn log(&self) -> Result<String> {
        let path = self.dir.join(LOG_FILE);
        if !path.exists() {
            return Ok(String::new());
        }
        fs::read_to_string(&path).with_context(|| format!("Failed to read '{}'.", path.display()))
    }
}

fn now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_job_is_stopped() {
        let tmp = tempfile::tempdir().unwrap();
        let job = Job::create(&tmp.path().join("job-1")).unwrap();
        assert_eq!(job.state(), JobState::Stopped);
        assert!(job.dir().is_dir());
        assert_eq!(job.result().unwrap(), None);
        assert_eq!(job.state_json()["state"], "stopped");
    }

    #[test]
    fn compile_failure_ends_in_error_without_running() {
        let tmp = tempfile::tempdir().unwrap();
        let mut job = Job::create(tmp.path()).unwrap();
        let state = job
            .start(
                r#"<project><stage><scripts><script><block s="forward"><l>1</l></block></script></scripts></stage></project>"#,
                &CompileOptions::default(),
                "definitely-not-a-python",
            )
            .unwrap();
        assert_eq!(state, JobState::Error);
        assert!(job.message().unwrap().contains("forward"));
        assert!(tmp.path().join(DOCUMENT_FILE).exists());
        assert!(!tmp.path().join(PROGRAM_FILE).exists());
        let saved: Value =
            serde_json::from_str(&fs::read_to_string(tmp.path().join(STATE_FILE)).unwrap()).unwrap();
        assert_eq!(saved["state"], "error");
    }

    #[test]
    fn missing_interpreter_is_an_error() {
        let tmp = tempfile::tempdir().unwrap();
        let mut job = Job::create(tmp.path()).unwrap();
        let err = job
            .start(
                "<project><stage><scripts><script/></scripts></stage></project>",
                &CompileOptions::default(),
                "definitely-not-a-python",
            )
            .unwrap_err();
        assert!(err.to_string().contains("definitely-not-a-python"));
        assert_eq!(job.state(), JobState::Error);
    }
}
