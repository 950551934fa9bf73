//! Attaching and detaching buckets through the external FUSE helper.
//!
//! The helpers block until the FUSE daemon is up or torn down, so each run is
//! moved onto tokio's blocking pool and request tasks only await it.

use std::ffi::OsString;
use std::sync::Arc;

use camino::{Utf8Path, Utf8PathBuf};
use thiserror::Error;
use tracing::{info, warn};

use crate::command::{CommandError, CommandOutput, CommandRunner, render_command_line};

/// Default mount helper.
pub const DEFAULT_MOUNT_BIN: &str = "gcsfuse";
/// Default unmount helper.
pub const DEFAULT_UNMOUNT_BIN: &str = "fusermount";

/// Errors raised while running the mount or unmount helper.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum MountError {
    /// Raised when the helper cannot be started.
    #[error(transparent)]
    Spawn(#[from] CommandError),
    /// Raised when the helper exits non-zero or is killed.
    #[error("{program} exited with status {status_text}: {stderr}")]
    CommandFailure {
        /// Helper that failed.
        program: String,
        /// Exit code, if the process exited normally.
        status: Option<i32>,
        /// Exit code rendered for humans, `unknown` when killed.
        status_text: String,
        /// Trimmed standard error.
        stderr: String,
    },
    /// Raised when the blocking task running the helper panicked or was
    /// cancelled.
    #[error("{program} did not complete: {message}")]
    Interrupted {
        /// Helper that was running.
        program: String,
        /// Join error string.
        message: String,
    },
}

/// Runs the mount and unmount helpers. Performs no existence checks; the
/// caller guarantees the target path is present.
#[derive(Clone, Debug)]
pub struct MountExecutor<R> {
    runner: Arc<R>,
    mount_bin: String,
    unmount_bin: String,
    key_file: Utf8PathBuf,
}

impl<R: CommandRunner + 'static> MountExecutor<R> {
    /// Builds an executor using the default helper binaries.
    #[must_use]
    pub fn new(runner: R, key_file: impl Into<Utf8PathBuf>) -> Self {
        Self {
            runner: Arc::new(runner),
            mount_bin: DEFAULT_MOUNT_BIN.to_owned(),
            unmount_bin: DEFAULT_UNMOUNT_BIN.to_owned(),
            key_file: key_file.into(),
        }
    }

    /// Overrides the helper binaries.
    #[must_use]
    pub fn with_binaries(mut self, mount_bin: &str, unmount_bin: &str) -> Self {
        mount_bin.clone_into(&mut self.mount_bin);
        unmount_bin.clone_into(&mut self.unmount_bin);
        self
    }

    /// Mounts `bucket` at `path` with
    /// `<mount_bin> --key-file <key> <bucket> <path>`.
    ///
    /// # Errors
    ///
    /// Returns [`MountError`] when the helper cannot run or fails.
    pub async fn mount(&self, path: &Utf8Path, bucket: &str) -> Result<(), MountError> {
        let args = vec![
            OsString::from("--key-file"),
            OsString::from(self.key_file.as_str()),
            OsString::from(bucket),
            OsString::from(path.as_str()),
        ];
        self.invoke(&self.mount_bin, args).await?;
        info!(bucket, path = %path, "bucket mounted");
        Ok(())
    }

    /// Detaches whatever is mounted at `path` with `<unmount_bin> -u <path>`.
    ///
    /// # Errors
    ///
    /// Returns [`MountError`] when the helper cannot run or fails.
    pub async fn unmount(&self, path: &Utf8Path) -> Result<(), MountError> {
        let args = vec![OsString::from("-u"), OsString::from(path.as_str())];
        self.invoke(&self.unmount_bin, args).await?;
        info!(path = %path, "mountpoint detached");
        Ok(())
    }

    async fn invoke(
        &self,
        program: &str,
        args: Vec<OsString>,
    ) -> Result<CommandOutput, MountError> {
        info!(command = %render_command_line(program, &args), "running helper");
        let runner = Arc::clone(&self.runner);
        let owned_program = program.to_owned();
        let output = tokio::task::spawn_blocking(move || runner.run(&owned_program, &args))
            .await
            .map_err(|err| MountError::Interrupted {
                program: program.to_owned(),
                message: err.to_string(),
            })??;
        if output.is_success() {
            return Ok(output);
        }
        let stderr = output.stderr.trim().to_owned();
        warn!(program, status = %output.status_text(), stderr = %stderr, "helper failed");
        Err(MountError::CommandFailure {
            program: program.to_owned(),
            status: output.code,
            status_text: output.status_text(),
            stderr,
        })
    }
}
