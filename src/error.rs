use crate::process::ExitReport;
use std::path::PathBuf;

/// Terminal failures of a launcher invocation. None of these are retried.
#[derive(Debug)]
pub enum LaunchError {
    /// A required configuration field is empty, a placeholder, or unreadable.
    ConfigurationInvalid { reason: String },
    /// The runtime probe could not start or exited unsuccessfully.
    RuntimeNotFound {
        command: String,
        install_hint: String,
        detail: String,
    },
    /// The companion script is missing or unreadable.
    ScriptMissing {
        path: PathBuf,
        source: Option<std::io::Error>,
    },
    /// The OS refused to create the child process.
    Spawn {
        program: String,
        source: std::io::Error,
    },
    /// `launch` was called while a child is still live.
    AlreadyRunning { pid: Option<u32> },
    /// Waiting on the child failed.
    Wait { source: std::io::Error },
    /// SIGINT/SIGTERM handlers could not be registered.
    SignalSetup { source: std::io::Error },
    /// The child exited with a non-zero status or was killed by a signal.
    AbnormalExit { report: ExitReport },
}

impl LaunchError {
    /// Process exit code the launcher terminates with for this failure.
    pub fn exit_code(&self) -> i32 {
        match self {
            LaunchError::ConfigurationInvalid { .. } => 2,
            LaunchError::RuntimeNotFound { .. } => 3,
            LaunchError::ScriptMissing { .. } => 4,
            LaunchError::Spawn { .. } | LaunchError::AlreadyRunning { .. } => 5,
            LaunchError::Wait { .. } | LaunchError::SignalSetup { .. } => 5,
            LaunchError::AbnormalExit { report } => report.exit_code(),
        }
    }

    /// Follow-up text telling the user how to fix the failed precondition.
    pub fn remediation(&self) -> Option<String> {
        match self {
            LaunchError::ConfigurationInvalid { .. } => Some(
                "Edit warden.toml (or pass --endpoint / --group) and try again.".to_string(),
            ),
            LaunchError::RuntimeNotFound {
                command,
                install_hint,
                ..
            } => Some(format!(
                "Install {command} and make sure it is on your PATH: {install_hint}"
            )),
            LaunchError::ScriptMissing { path, .. } => Some(format!(
                "Place the companion script at {} or set [script].path.",
                path.display()
            )),
            _ => None,
        }
    }
}

impl std::fmt::Display for LaunchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LaunchError::ConfigurationInvalid { reason } => {
                write!(f, "invalid configuration: {}", reason)
            }
            LaunchError::RuntimeNotFound { command, detail, .. } => {
                write!(
                    f,
                    "runtime `{}` is not installed or not on PATH: {}",
                    command, detail
                )
            }
            LaunchError::ScriptMissing { path, source } => match source {
                Some(e) => write!(f, "cannot read companion script {}: {}", path.display(), e),
                None => write!(f, "companion script not found at {}", path.display()),
            },
            LaunchError::Spawn { program, source } => {
                write!(f, "failed to spawn `{}`: {}", program, source)
            }
            LaunchError::AlreadyRunning { pid } => match pid {
                Some(pid) => write!(f, "a child process is already running (pid {})", pid),
                None => write!(f, "a child process is already running"),
            },
            LaunchError::Wait { source } => {
                write!(f, "failed waiting for child process: {}", source)
            }
            LaunchError::SignalSetup { source } => {
                write!(f, "failed to install signal handlers: {}", source)
            }
            LaunchError::AbnormalExit { report } => {
                write!(f, "child process exited abnormally ({})", report)
            }
        }
    }
}

impl std::error::Error for LaunchError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            LaunchError::ScriptMissing {
                source: Some(source),
                ..
            } => Some(source),
            LaunchError::Spawn { source, .. } => Some(source),
            LaunchError::Wait { source } => Some(source),
            LaunchError::SignalSetup { source } => Some(source),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes_are_distinct_per_precondition() {
        let config = LaunchError::ConfigurationInvalid {
            reason: "x".to_string(),
        };
        let runtime = LaunchError::RuntimeNotFound {
            command: "node".to_string(),
            install_hint: "https://nodejs.org/".to_string(),
            detail: "not found".to_string(),
        };
        let script = LaunchError::ScriptMissing {
            path: PathBuf::from("/nope/bot.js"),
            source: None,
        };
        let codes = [config.exit_code(), runtime.exit_code(), script.exit_code()];
        assert_eq!(codes, [2, 3, 4]);
    }

    #[test]
    fn test_abnormal_exit_uses_child_code() {
        let err = LaunchError::AbnormalExit {
            report: ExitReport::exited(42),
        };
        assert_eq!(err.exit_code(), 42);
        assert!(err.to_string().contains("exit code 42"));
    }

    #[test]
    fn test_runtime_remediation_names_install_hint() {
        let err = LaunchError::RuntimeNotFound {
            command: "node".to_string(),
            install_hint: "https://nodejs.org/".to_string(),
            detail: "No such file or directory".to_string(),
        };
        let hint = err.remediation().unwrap();
        assert!(hint.contains("https://nodejs.org/"));
        assert!(err.to_string().contains("`node`"));
    }

    #[test]
    fn test_script_missing_names_path() {
        let err = LaunchError::ScriptMissing {
            path: PathBuf::from("/srv/bot/bot.js"),
            source: None,
        };
        assert!(err.to_string().contains("/srv/bot/bot.js"));
        assert!(std::error::Error::source(&err).is_none());
    }

    #[test]
    fn test_spawn_error_exposes_source() {
        let err = LaunchError::Spawn {
            program: "node".to_string(),
            source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        };
        assert!(std::error::Error::source(&err).is_some());
        assert_eq!(err.exit_code(), 5);
    }
}
