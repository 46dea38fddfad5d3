//! Signing primitive.
//!
//! The pipeline treats code signing as one atomic step behind
//! [`BundleSigner`]. [`ZsignTool`] drives an external `zsign` binary.

use crate::{Error, Result};
use log::{debug, info};
use secrecy::{ExposeSecret, SecretString};
use std::path::{Path, PathBuf};
use std::process::Command;

/// Inputs for one signing invocation.
pub struct SigningJob<'a> {
    /// Bundle to sign in place
    pub bundle: &'a Path,
    pub profile: &'a Path,
    pub key_container: &'a Path,
    pub password: &'a SecretString,
}

/// Signs a staged bundle in place.
pub trait BundleSigner: Send + Sync {
    fn sign(&self, job: &SigningJob<'_>) -> Result<()>;
}

/// Runs `zsign -k <p12> -m <profile> -p <password> -o <app> <app>`.
#[derive(Debug, Clone)]
pub struct ZsignTool {
    program: PathBuf,
}

impl Default for ZsignTool {
    fn default() -> Self {
        Self::new("zsign")
    }
}

impl ZsignTool {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    // zsign only takes the key container password as an argument, so it is
    // visible in the process list for the duration of the call.
    fn command(&self, job: &SigningJob<'_>) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.arg("-k")
            .arg(job.key_container)
            .arg("-m")
            .arg(job.profile)
            .arg("-p")
            .arg(job.password.expose_secret())
            .arg("-o")
            .arg(job.bundle)
            .arg(job.bundle);
        cmd
    }
}

impl BundleSigner for ZsignTool {
    fn sign(&self, job: &SigningJob<'_>) -> Result<()> {
        debug!("Running {} on {}", self.program.display(), job.bundle.display());
        let output = self.command(job).output().map_err(|e| {
            Error::SigningToolFailed(format!("could not run {}: {}", self.program.display(), e))
        })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            let message = if stderr.is_empty() {
                format!("{} exited with {}", self.program.display(), output.status)
            } else {
                stderr
            };
            return Err(Error::SigningToolFailed(message));
        }

        info!("Signed {}", job.bundle.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::OsStr;

    fn job<'a>(password: &'a SecretString) -> SigningJob<'a> {
        SigningJob {
            bundle: Path::new("/tmp/App.app"),
            profile: Path::new("/tmp/p.mobileprovision"),
            key_container: Path::new("/tmp/c.p12"),
            password,
        }
    }

    #[test]
    fn test_command_arguments() {
        let password = SecretString::new("pw".into());
        let cmd = ZsignTool::default().command(&job(&password));
        let args: Vec<&OsStr> = cmd.get_args().collect();
        assert_eq!(
            args,
            [
                "-k",
                "/tmp/c.p12",
                "-m",
                "/tmp/p.mobileprovision",
                "-p",
                "pw",
                "-o",
                "/tmp/App.app",
                "/tmp/App.app"
            ]
            .map(OsStr::new)
        );
    }

    #[test]
    fn test_missing_tool() {
        let password = SecretString::new(String::new());
        let tool = ZsignTool::new("/nonexistent/zsign");
        let err = tool.sign(&job(&password)).unwrap_err();
        assert!(matches!(err, Error::SigningToolFailed(_)));
    }

    #[test]
    #[cfg(unix)]
    fn test_nonzero_exit_carries_stderr() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::TempDir::new().unwrap();
        let script = dir.path().join("zsign");
        std::fs::write(&script, "#!/bin/sh\necho 'bad password' >&2\nexit 3\n").unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let password = SecretString::new("pw".into());
        let err = ZsignTool::new(&script).sign(&job(&password)).unwrap_err();
        match err {
            Error::SigningToolFailed(msg) => assert_eq!(msg, "bad password"),
            other => panic!("unexpected error: {other}"),
        }
    }
}
