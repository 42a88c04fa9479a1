//! External AI engine invocation
//!
//! The engine is an independently versioned program reached only through its
//! process contract:
//!
//! ```text
//! <program> [<script>] <staged-file-path>
//! ```
//!
//! - exit code 0 and a single JSON document on stdout on success
//! - non-zero exit code and diagnostic text on stderr on failure
//!
//! [`AnalysisEngine`] is the seam the request pipeline depends on, so tests
//! can substitute a fake without spawning processes.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::config::EngineSettings;

/// Engine invocation errors
///
/// A non-zero exit is not an error at this level; it is reported through
/// [`EngineOutput::exit_code`] so the caller can surface stderr.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Executable missing, not executable, or fork failure
    #[error("Failed to launch AI engine '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// Reading the engine's output pipes failed
    #[error("Failed to collect AI engine output: {0}")]
    Output(#[source] std::io::Error),

    /// Engine exceeded its runtime bound and was killed
    #[error("AI engine timed out after {}s", .0.as_secs_f64())]
    Timeout(Duration),
}

/// Completed engine process
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineOutput {
    /// Process exit code; `None` when terminated by a signal
    pub exit_code: Option<i32>,
    /// Captured standard output (lossy UTF-8)
    pub stdout: String,
    /// Captured standard error (lossy UTF-8)
    pub stderr: String,
}

impl EngineOutput {
    pub fn is_success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Runs the analysis engine against one staged file
#[async_trait]
pub trait AnalysisEngine: Send + Sync {
    /// Human-readable engine description for logs and health output
    fn name(&self) -> String;

    /// Run the engine on `staged_path` and wait for it to finish
    async fn run(&self, staged_path: &Path) -> Result<EngineOutput, EngineError>;

    /// Whether the engine looks launchable
    async fn is_available(&self) -> bool {
        true
    }
}

/// Engine reached by spawning a local process
#[derive(Debug, Clone)]
pub struct ProcessEngine {
    program: String,
    script: Option<PathBuf>,
    timeout: Option<Duration>,
}

impl ProcessEngine {
    pub fn new(program: impl Into<String>, script: Option<PathBuf>) -> Self {
        Self {
            program: program.into(),
            script,
            timeout: None,
        }
    }

    pub fn from_settings(settings: &EngineSettings) -> Self {
        Self::new(settings.program.clone(), settings.script.clone()).with_timeout(settings.timeout)
    }

    /// Bound the engine runtime; `None` waits indefinitely
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    fn command(&self, staged_path: &Path) -> Command {
        let mut command = Command::new(&self.program);
        command
            .args(&self.script)
            .arg(staged_path)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            // Dropping the wait future (timeout, client disconnect) kills the child
            .kill_on_drop(true);
        command
    }
}

#[async_trait]
impl AnalysisEngine for ProcessEngine {
    fn name(&self) -> String {
        match &self.script {
            Some(script) => format!("{} {}", self.program, script.display()),
            None => self.program.clone(),
        }
    }

    async fn run(&self, staged_path: &Path) -> Result<EngineOutput, EngineError> {
        debug!(
            engine = %self.name(),
            staged_path = %staged_path.display(),
            "Launching AI engine"
        );

        let started = Instant::now();
        let child = self
            .command(staged_path)
            .spawn()
            .map_err(|source| EngineError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        let output = match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, child.wait_with_output()).await {
                Ok(result) => result,
                Err(_) => {
                    warn!(
                        staged_path = %staged_path.display(),
                        timeout_secs = limit.as_secs_f64(),
                        "AI engine timed out, process killed"
                    );
                    return Err(EngineError::Timeout(limit));
                }
            },
            None => child.wait_with_output().await,
        }
        .map_err(EngineError::Output)?;

        let output = EngineOutput {
            exit_code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        };

        info!(
            staged_path = %staged_path.display(),
            exit_code = ?output.exit_code,
            stdout_bytes = output.stdout.len(),
            stderr_bytes = output.stderr.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "AI engine finished"
        );

        Ok(output)
    }

    async fn is_available(&self) -> bool {
        if let Some(script) = &self.script {
            if tokio::fs::metadata(script).await.is_err() {
                debug!(script = %script.display(), "AI engine script not found");
                return false;
            }
        }

        // Resolve without launching; the engine only accepts a file path
        let program = self.program.clone();
        match tokio::task::spawn_blocking(move || which::which(&program)).await {
            Ok(Ok(path)) => {
                debug!(program = %self.program, resolved = %path.display(), "AI engine resolved");
                true
            }
            Ok(Err(e)) => {
                debug!(program = %self.program, error = %e, "AI engine not launchable");
                false
            }
            Err(e) => {
                warn!(program = %self.program, error = %e, "AI engine lookup task failed");
                false
            }
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::fs;

    fn write_script(dir: &Path, body: &str) -> PathBuf {
        let path = dir.join("engine.sh");
        fs::write(&path, body).unwrap();
        path
    }

    #[tokio::test]
    async fn test_success_captures_stdout() {
        let temp_dir = tempfile::tempdir().unwrap();
        let script = write_script(
            temp_dir.path(),
            "printf '{\"size\":%s}' \"$(wc -c < \"$1\" | tr -d ' ')\"\n",
        );
        let sample = temp_dir.path().join("sample.exe");
        fs::write(&sample, b"MZ\x90\x00").unwrap();

        let engine = ProcessEngine::new("sh", Some(script));
        let output = engine.run(&sample).await.unwrap();

        assert!(output.is_success());
        assert_eq!(output.stdout, "{\"size\":4}");
        assert_eq!(output.stderr, "");
    }

    #[tokio::test]
    async fn test_nonzero_exit_captures_stderr() {
        let temp_dir = tempfile::tempdir().unwrap();
        let script = write_script(
            temp_dir.path(),
            "printf 'partial' ; printf 'model load failed' >&2 ; exit 3\n",
        );

        let engine = ProcessEngine::new("sh", Some(script));
        let output = engine.run(Path::new("/dev/null")).await.unwrap();

        assert!(!output.is_success());
        assert_eq!(output.exit_code, Some(3));
        assert_eq!(output.stderr, "model load failed");
    }

    #[tokio::test]
    async fn test_staged_path_is_last_argument() {
        let temp_dir = tempfile::tempdir().unwrap();
        let script = write_script(temp_dir.path(), "printf '\"%s\"' \"$1\"\n");
        let staged = temp_dir.path().join("staged.bin");

        let engine = ProcessEngine::new("sh", Some(script));
        let output = engine.run(&staged).await.unwrap();

        assert_eq!(output.stdout, format!("\"{}\"", staged.display()));
    }

    #[tokio::test]
    async fn test_timeout_kills_engine() {
        let temp_dir = tempfile::tempdir().unwrap();
        let script = write_script(temp_dir.path(), "sleep 10\n");

        let engine = ProcessEngine::new("sh", Some(script))
            .with_timeout(Some(Duration::from_millis(200)));
        let started = Instant::now();
        let err = engine.run(Path::new("/dev/null")).await.unwrap_err();

        assert!(matches!(err, EngineError::Timeout(d) if d == Duration::from_millis(200)));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_missing_program_is_spawn_error() {
        let engine = ProcessEngine::new("malviz-no-such-engine-binary", None);
        let err = engine.run(Path::new("/dev/null")).await.unwrap_err();
        assert!(matches!(err, EngineError::Spawn { .. }));
        assert!(!engine.is_available().await);
    }

    #[tokio::test]
    async fn test_availability_check_does_not_run_engine() {
        use std::os::unix::fs::PermissionsExt;

        let temp_dir = tempfile::tempdir().unwrap();
        let marker = temp_dir.path().join("invoked");
        let engine_path = temp_dir.path().join("analyze");
        fs::write(
            &engine_path,
            format!("#!/bin/sh\necho \"$@\" >> '{}'\necho '{{}}'\n", marker.display()),
        )
        .unwrap();
        fs::set_permissions(&engine_path, fs::Permissions::from_mode(0o755)).unwrap();

        let engine = ProcessEngine::new(engine_path.display().to_string(), None);
        assert!(engine.is_available().await);
        assert!(engine.is_available().await);
        assert!(!marker.exists(), "availability check launched the engine");
    }

    #[tokio::test]
    async fn test_non_executable_program_not_available() {
        let temp_dir = tempfile::tempdir().unwrap();
        let engine_path = temp_dir.path().join("analyze");
        fs::write(&engine_path, "#!/bin/sh\n").unwrap();

        let engine = ProcessEngine::new(engine_path.display().to_string(), None);
        assert!(!engine.is_available().await);
    }

    #[tokio::test]
    async fn test_missing_script_not_available() {
        let engine = ProcessEngine::new("sh", Some(PathBuf::from("/nonexistent/ai_engine.py")));
        assert!(!engine.is_available().await);
    }

    #[test]
    fn test_name_includes_script() {
        let engine = ProcessEngine::new("python3", Some(PathBuf::from("ai_engine.py")));
        assert_eq!(engine.name(), "python3 ai_engine.py");
        assert_eq!(ProcessEngine::new("analyze", None).name(), "analyze");
    }
}
