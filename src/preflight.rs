//! Checks that must pass before the companion process is spawned.
use crate::config::RuntimeConfig;
use crate::error::LaunchError;
use crate::process::Launcher;
use std::path::{Path, PathBuf};

/// Probe the runtime (e.g. `node --version`), discarding its output.
///
/// Succeeds only if the probe starts and exits with status 0 within
/// `runtime.probe_timeout_secs`. A probe that outlives the timeout is
/// dropped (which kills it) and reported as a missing runtime.
pub async fn verify_runtime_available(
    launcher: &dyn Launcher,
    runtime: &RuntimeConfig,
) -> Result<(), LaunchError> {
    let not_found = |detail: String| LaunchError::RuntimeNotFound {
        command: runtime.command.clone(),
        install_hint: runtime.install_hint.clone(),
        detail,
    };

    let timeout = runtime.probe_timeout();
    let probe = launcher.probe(&runtime.command, &runtime.probe_args);
    let Ok(result) = tokio::time::timeout(timeout, probe).await else {
        return Err(not_found(format!(
            "probe did not finish within {}s",
            timeout.as_secs()
        )));
    };

    match result {
        Ok(report) if report.success() => {
            tracing::info!(command = %runtime.command, "runtime found");
            Ok(())
        }
        Ok(report) => Err(not_found(format!("probe returned {}", report))),
        Err(e) => Err(not_found(e.to_string())),
    }
}

/// Confirm the companion script exists and can be opened for reading.
///
/// Returns the canonical path on success.
pub fn verify_script_exists(path: &Path) -> Result<PathBuf, LaunchError> {
    let metadata = std::fs::metadata(path).map_err(|e| LaunchError::ScriptMissing {
        path: path.to_path_buf(),
        source: match e.kind() {
            std::io::ErrorKind::NotFound => None,
            _ => Some(e),
        },
    })?;

    if !metadata.is_file() {
        return Err(LaunchError::ScriptMissing {
            path: path.to_path_buf(),
            source: None,
        });
    }

    std::fs::File::open(path).map_err(|e| LaunchError::ScriptMissing {
        path: path.to_path_buf(),
        source: Some(e),
    })?;

    Ok(path.canonicalize().unwrap_or_else(|_| path.to_path_buf()))
}
