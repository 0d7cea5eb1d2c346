use crate::error::LaunchError;
use serde::Deserialize;
use std::io::BufRead;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Markers that mean a value was copied from the template and never edited.
const PLACEHOLDER_MARKERS: &[&str] = &[
    "CHANGE ME",
    "CHANGE_ME",
    "CAMBIA ESTO",
    "<endpoint>",
    "<group>",
    "Nombre Exacto Del Grupo",
];

/// Upper bound for `grace_period_secs` and `probe_timeout_secs`.
pub const MAX_WAIT_SECS: u64 = 3600;

/// Example endpoint shipped with the template. Accepted only after confirmation.
pub const EXAMPLE_ENDPOINT: &str = "https://httpbin.org/post";

/// Top-level configuration loaded from warden.toml.
#[derive(Debug, Deserialize, Default, Clone, PartialEq)]
#[serde(default)]
pub struct LauncherConfig {
    pub target: TargetConfig,
    pub runtime: RuntimeConfig,
    pub script: ScriptConfig,
    pub shutdown: ShutdownConfig,
}

#[derive(Debug, Deserialize, Default, Clone, PartialEq)]
#[serde(default)]
pub struct TargetConfig {
    pub endpoint: String,
    pub group: String,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct RuntimeConfig {
    pub command: String,
    pub probe_args: Vec<String>,
    pub install_hint: String,
    /// A probe still running after this long counts as a missing runtime.
    pub probe_timeout_secs: u64,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct ScriptConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct ShutdownConfig {
    pub grace_period_secs: u64,
}

// --- Default implementations ---

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            command: "node".to_string(),
            probe_args: vec!["--version".to_string()],
            install_hint: "https://nodejs.org/".to_string(),
            probe_timeout_secs: 10,
        }
    }
}

impl Default for ScriptConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("bot.js"),
        }
    }
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            grace_period_secs: 5,
        }
    }
}

/// Template written by `--init`. Values are placeholders on purpose so an
/// unedited file fails validation.
pub const DEFAULT_CONFIG: &str = "\
# warden configuration

[target]
# URL the companion script posts to.
endpoint = \"https://httpbin.org/post\"
# Exact name of the group the companion script watches.
group = \"CHANGE ME\"

[runtime]
command = \"node\"
probe_args = [\"--version\"]
install_hint = \"https://nodejs.org/\"
probe_timeout_secs = 10

[script]
# Relative paths are resolved against this file's directory.
path = \"bot.js\"

[shutdown]
grace_period_secs = 5
";

#[derive(Debug)]
pub enum ConfigError {
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Read { path, source } => {
                write!(f, "failed to read {}: {}", path.display(), source)
            }
            ConfigError::Parse { path, source } => {
                write!(f, "failed to parse {}: {}", path.display(), source)
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Read { source, .. } => Some(source),
            ConfigError::Parse { source, .. } => Some(source),
        }
    }
}

impl From<ConfigError> for LaunchError {
    fn from(e: ConfigError) -> Self {
        LaunchError::ConfigurationInvalid {
            reason: e.to_string(),
        }
    }
}

/// Overrides supplied on the command line. `None` keeps the file value.
///
/// A relative `script` is taken relative to the current directory, not the
/// config file's directory.
#[derive(Debug, Default, Clone)]
pub struct Overrides {
    pub endpoint: Option<String>,
    pub group: Option<String>,
    pub script: Option<PathBuf>,
    pub runtime: Option<String>,
    pub grace_period_secs: Option<u64>,
}

impl LauncherConfig {
    /// Load config from `path`, or defaults if the file doesn't exist.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = match std::fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "no config file, using defaults");
                return Ok(Self::default());
            }
            Err(e) => {
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source: e,
                })
            }
        };
        toml::from_str(&contents).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            source: e,
        })
    }

    pub fn apply_overrides(&mut self, overrides: Overrides) {
        if let Some(endpoint) = overrides.endpoint {
            self.target.endpoint = endpoint;
        }
        if let Some(group) = overrides.group {
            self.target.group = group;
        }
        if let Some(script) = overrides.script {
            self.script.path = absolute_from_cwd(script);
        }
        if let Some(runtime) = overrides.runtime {
            self.runtime.command = runtime;
        }
        if let Some(secs) = overrides.grace_period_secs {
            self.shutdown.grace_period_secs = secs;
        }
    }

    /// Script path, with relative paths resolved against `base_dir`.
    pub fn script_path(&self, base_dir: &Path) -> PathBuf {
        if self.script.path.is_absolute() {
            self.script.path.clone()
        } else {
            base_dir.join(&self.script.path)
        }
    }

    pub fn grace_period(&self) -> Duration {
        Duration::from_secs(self.shutdown.grace_period_secs)
    }

    /// Check required fields and produce the validated [`Configuration`].
    pub fn validate(&self) -> Result<Configuration, LaunchError> {
        let endpoint = require("endpoint", "[target].endpoint", &self.target.endpoint)?;
        let target_name = require("group", "[target].group", &self.target.group)?;

        if self.runtime.command.trim().is_empty() {
            return Err(invalid("[runtime].command is empty"));
        }
        check_wait_secs("[shutdown].grace_period_secs", self.shutdown.grace_period_secs)?;
        check_wait_secs("[runtime].probe_timeout_secs", self.runtime.probe_timeout_secs)?;

        Ok(Configuration {
            endpoint,
            target_name,
        })
    }
}

fn invalid(reason: impl Into<String>) -> LaunchError {
    LaunchError::ConfigurationInvalid {
        reason: reason.into(),
    }
}

fn check_wait_secs(key: &str, secs: u64) -> Result<(), LaunchError> {
    if secs == 0 || secs > MAX_WAIT_SECS {
        return Err(invalid(format!(
            "{key} must be between 1 and {MAX_WAIT_SECS}, got {secs}"
        )));
    }
    Ok(())
}

fn absolute_from_cwd(path: PathBuf) -> PathBuf {
    if path.is_absolute() {
        return path;
    }
    match std::env::current_dir() {
        Ok(cwd) => cwd.join(path),
        Err(_) => path,
    }
}

fn require(name: &str, key: &str, value: &str) -> Result<String, LaunchError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(invalid(format!("{name} is empty; set {key}")));
    }
    if let Some(marker) = PLACEHOLDER_MARKERS.iter().find(|m| trimmed.contains(**m)) {
        return Err(invalid(format!(
            "{name} still holds the placeholder {marker:?}; set {key}"
        )));
    }
    Ok(trimmed.to_string())
}

impl RuntimeConfig {
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }
}

/// The two values the companion script needs. Built once at startup and
/// passed by parameter from there on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Configuration {
    pub endpoint: String,
    pub target_name: String,
}

impl Configuration {
    pub fn uses_example_endpoint(&self) -> bool {
        self.endpoint.contains(EXAMPLE_ENDPOINT)
    }
}

/// Ask the user to confirm launching against the example endpoint.
///
/// Any line (including an empty one) confirms; end of input aborts.
pub fn confirm_example_endpoint(
    config: &Configuration,
    input: &mut impl BufRead,
) -> Result<(), LaunchError> {
    eprintln!("WARNING: the endpoint is still the example {EXAMPLE_ENDPOINT}.");
    eprintln!("The companion script will send data to {}.", config.endpoint);
    eprintln!("Press Enter to continue if you are sure (Ctrl+D to abort)...");

    let mut line = String::new();
    match input.read_line(&mut line) {
        Ok(0) => Err(invalid("example endpoint not confirmed")),
        Ok(_) => Ok(()),
        Err(e) => Err(invalid(format!("could not read confirmation: {e}"))),
    }
}

/// Write the template config to `path` unless a file is already there.
///
/// Returns Ok(true) if the file was created.
pub fn init_config(path: &Path) -> std::io::Result<bool> {
    if path.exists() {
        return Ok(false);
    }
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, DEFAULT_CONFIG)?;
    Ok(true)
}
