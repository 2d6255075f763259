//! Station configuration and command line handling.
//!
//! All tuning values load from a TOML file with per-section defaults, so a
//! partial file (or none at all) still yields a runnable configuration.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::protocol::{ANNOUNCE_PORT, DEFAULT_CONTROL_PORT};

/// Top-level station configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct StationConfig {
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default)]
    pub drive: DriveConfig,
    #[serde(default)]
    pub turret: TurretConfig,
    #[serde(default)]
    pub camera: CameraConfig,
    #[serde(default)]
    pub deploy: DeployConfig,
    #[serde(default)]
    pub display: DisplayConfig,
}

/// Ports and timing of the discovery and control channels
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// UDP port the robot launcher broadcasts announces on
    pub announce_port: u16,
    /// Control port used when an announce does not advertise one
    pub control_port: u16,
    /// Heartbeat interval in milliseconds
    pub send_interval_ms: u64,
}

/// Gait command scaling for the two input sources
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DriveConfig {
    /// Joystick axes below this magnitude read as centered
    pub joystick_deadzone: f64,
    /// Forward/back drive beyond this zeroes the sideways component
    pub forward_priority_threshold: f64,
    /// Full-stick sideways translation, mm/s
    pub joystick_x_mm_s: f64,
    /// Full-stick forward translation, mm/s
    pub joystick_y_mm_s: f64,
    /// Full-stick rotation, deg/s
    pub joystick_turn_deg_s: f64,
    /// Key-driven sideways translation, mm/s
    pub key_x_mm_s: f64,
    /// Key-driven forward translation, mm/s
    pub key_y_mm_s: f64,
    /// Key-driven rotation, deg/s
    pub key_turn_deg_s: f64,
}

/// Arrow-key turret stepping
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TurretConfig {
    /// Degrees per arrow-key press
    pub step_deg: f64,
    /// Degrees per shift-arrow press
    pub fast_step_deg: f64,
}

/// Pinhole model of the onboard camera, used to turn video clicks into
/// turret angles
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CameraConfig {
    /// Horizontal field of view, degrees
    pub fov_x_deg: f64,
    /// Vertical field of view, degrees
    pub fov_y_deg: f64,
}

/// Deploy action launched when discovery finds no running server
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DeployConfig {
    /// Script to run with argument `start`
    pub script: String,
    /// Remote user for the `RHOST` environment passed to the script
    pub remote_user: String,
}

/// Overlay display tuning
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DisplayConfig {
    /// Message panel depth, entries
    pub message_capacity: usize,
    /// Smallest allowed overlay font size
    pub min_font_size: u32,
    /// Reticle nudge per ctrl-arrow press, fractional image units
    pub reticle_step: f64,
    /// Reticle nudge per ctrl-shift-arrow press
    pub reticle_fast_step: f64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            announce_port: ANNOUNCE_PORT,
            control_port: DEFAULT_CONTROL_PORT,
            send_interval_ms: 250,
        }
    }
}

impl Default for DriveConfig {
    fn default() -> Self {
        Self {
            joystick_deadzone: 0.2,
            forward_priority_threshold: 0.1,
            joystick_x_mm_s: 40.0,
            joystick_y_mm_s: 100.0,
            joystick_turn_deg_s: 50.0,
            key_x_mm_s: 50.0,
            key_y_mm_s: 100.0,
            key_turn_deg_s: 30.0,
        }
    }
}

impl Default for TurretConfig {
    fn default() -> Self {
        Self {
            step_deg: 0.5,
            fast_step_deg: 5.0,
        }
    }
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            fov_x_deg: 90.0,
            fov_y_deg: 60.0,
        }
    }
}

impl Default for DeployConfig {
    fn default() -> Self {
        Self {
            script: "deploy-vserver.sh".to_string(),
            remote_user: "odroid".to_string(),
        }
    }
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            message_capacity: 30,
            min_font_size: 4,
            reticle_step: 0.002,
            reticle_fast_step: 0.010,
        }
    }
}

impl StationConfig {
    /// Load configuration from a TOML file. Missing sections and fields fall
    /// back to their defaults.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: StationConfig = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Save configuration to a TOML file.
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let contents = toml::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }
}

impl NetworkConfig {
    pub fn send_interval(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.send_interval_ms)
    }
}

pub const USAGE: &str = "\
Usage: sarathi-station [OPTIONS]

Options:
  --config <path>         TOML configuration file
  --addr <host[:port]>    skip discovery and connect to this control endpoint
  --no-deploy             never trigger the deploy action on discovery
  --log-dir <path>        directory for journal and log files
  --log-prefix <name>     filename prefix inside the log directory
  --restore-state <path>  restore display preferences from this snapshot
  --check                 construct everything, then exit before running
  -h, --help              print this help
";

/// Parsed command line options.
#[derive(Debug, Clone, Default)]
pub struct Options {
    pub config_path: Option<PathBuf>,
    pub addr: Option<String>,
    pub no_deploy: bool,
    pub log_dir: Option<PathBuf>,
    pub log_prefix: Option<String>,
    pub restore_state: Option<PathBuf>,
    pub check: bool,
    pub help: bool,
}

impl Options {
    /// Parse options from the argument list (program name already skipped).
    pub fn parse<I>(args: I) -> Result<Self>
    where
        I: IntoIterator<Item = String>,
    {
        let mut args = args.into_iter();
        let mut opts = Options::default();
        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--config" => opts.config_path = Some(value(&mut args, "--config")?.into()),
                "--addr" => opts.addr = Some(value(&mut args, "--addr")?),
                "--no-deploy" => opts.no_deploy = true,
                "--log-dir" => opts.log_dir = Some(value(&mut args, "--log-dir")?.into()),
                "--log-prefix" => opts.log_prefix = Some(value(&mut args, "--log-prefix")?),
                "--restore-state" => {
                    opts.restore_state = Some(value(&mut args, "--restore-state")?.into())
                }
                "--check" => opts.check = true,
                "-h" | "--help" => opts.help = true,
                other => {
                    return Err(Error::Config(format!("unknown argument {:?}", other)));
                }
            }
        }
        Ok(opts)
    }
}

fn value<I: Iterator<Item = String>>(args: &mut I, flag: &str) -> Result<String> {
    args.next()
        .ok_or_else(|| Error::Config(format!("{} requires a value", flag)))
}

/// Log directory candidates, probed in order; the last doubles as the
/// create-if-missing default.
const LOG_DIR_CANDIDATES: &[&str] = &["~/.sarathi-data", "~/sarathi-data", "./sarathi-data"];

/// Pick the log directory: an explicit override wins, otherwise the first
/// existing candidate, otherwise the final candidate (created later).
pub fn resolve_log_dir(explicit: Option<&Path>) -> PathBuf {
    if let Some(dir) = explicit {
        return dir.to_path_buf();
    }
    let mut fallback = PathBuf::from("sarathi-data");
    for candidate in LOG_DIR_CANDIDATES {
        let path = expand_home(candidate);
        if path.exists() {
            return path;
        }
        fallback = path;
    }
    fallback
}

fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Ok(home) = std::env::var("HOME") {
            return Path::new(&home).join(rest);
        }
    }
    PathBuf::from(path)
}

/// Timestamped default filename prefix for one run's journal and log files.
pub fn default_log_prefix() -> String {
    chrono::Local::now().format("sarathi-%Y%m%d-%H%M%S").to_string()
}

/// Resolve a `host[:port]` target string, filling in the default control
/// port when none is given.
pub fn resolve_target(spec: &str, default_port: u16) -> Result<std::net::SocketAddr> {
    use std::net::ToSocketAddrs;
    let mut candidates = if spec.contains(':') {
        spec.to_socket_addrs()
    } else {
        (spec, default_port).to_socket_addrs()
    }
    .map_err(|e| Error::Config(format!("cannot resolve {:?}: {}", spec, e)))?;
    candidates
        .next()
        .ok_or_else(|| Error::Config(format!("no address found for {:?}", spec)))
}
