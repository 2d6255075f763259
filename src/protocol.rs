//! Wire types for the announce and control channels.
//!
//! Every datagram is a JSON object. Field names are shared with the robot
//! side and with the offline replay tooling; do not rename them.

use std::net::{IpAddr, SocketAddr};
use std::time::{SystemTime, UNIX_EPOCH};

use chrono::{Local, TimeZone};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};

/// Port the robot launcher broadcasts announces on.
pub const ANNOUNCE_PORT: u16 = 13355;
/// Control port used when an announce carries no `cport`.
pub const DEFAULT_CONTROL_PORT: u16 = 13356;
/// Port the video pipeline listens on, advertised in every control packet.
pub const VIDEO_PORT: u16 = 13357;

/// Wall-clock time as fractional epoch seconds, the timestamp unit used in
/// every record and datagram.
pub fn wall_time() -> f64 {
    match SystemTime::now().duration_since(UNIX_EPOCH) {
        Ok(d) => d.as_secs_f64(),
        Err(_) => 0.0,
    }
}

/// Format an epoch-seconds timestamp in local time for log lines.
pub fn format_local_time(epoch: f64) -> String {
    match Local.timestamp_opt(epoch as i64, 0).single() {
        Some(t) => t.format("%F_%T").to_string(),
        None => format!("{:.0}", epoch),
    }
}

#[derive(Debug, Deserialize)]
struct AnnounceWire {
    host: String,
    start_time: f64,
    running_since: Option<f64>,
    #[serde(default)]
    cport: Option<u16>,
}

/// One announce datagram, with the sender address injected from the socket.
#[derive(Debug, Clone)]
pub struct Announce {
    /// Source address of the datagram
    pub addr: IpAddr,
    /// Source port of the datagram
    pub aport: u16,
    /// Hostname of the announcing launcher
    pub host: String,
    /// Launcher process start time, epoch seconds
    pub start_time: f64,
    /// How long the managed server has been up, epoch seconds, if running
    pub running_since: Option<f64>,
    /// Advertised control port
    pub cport: Option<u16>,
}

impl Announce {
    /// Decode an announce payload, injecting the datagram source address.
    pub fn decode(payload: &[u8], source: SocketAddr) -> Result<Self> {
        let wire: AnnounceWire = serde_json::from_slice(payload)
            .map_err(|e| Error::InvalidPacket(format!("announce: {}", e)))?;
        Ok(Self {
            addr: source.ip(),
            aport: source.port(),
            host: wire.host,
            start_time: wire.start_time,
            running_since: wire.running_since,
            cport: wire.cport,
        })
    }

    /// Address of the control endpoint this announce advertises.
    pub fn control_target(&self) -> SocketAddr {
        SocketAddr::new(self.addr, self.cport.unwrap_or(DEFAULT_CONTROL_PORT))
    }

    /// Launcher identity line for transition logging.
    pub fn identity_line(&self) -> String {
        format!(
            "Launcher is at {} (port {}, hostname {:?}, start_time {})",
            self.addr,
            self.aport,
            self.host,
            format_local_time(self.start_time)
        )
    }

    /// Run-state line for transition logging.
    pub fn run_line(&self) -> String {
        match self.running_since {
            Some(since) => format!("server running since {}", format_local_time(since)),
            None => "server not running".to_string(),
        }
    }
}

/// Outgoing gait selection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GaitCommand {
    Idle,
    Ripple {
        translate_x_mm_s: f64,
        translate_y_mm_s: f64,
        rotate_deg_s: f64,
    },
}

/// The absolute command state, retransmitted in full on every heartbeat.
///
/// Serializes as the `control-dict` record; the transmitted datagram and the
/// journaled line are the same bytes.
#[derive(Debug, Clone, Serialize)]
pub struct ControlCommand {
    #[serde(rename = "_type")]
    record_type: &'static str,
    /// Session construction time, constant for the session's lifetime
    pub boot_time: f64,
    /// Incremented on each packet TX
    pub seq: u64,
    /// Set before each packet TX
    pub cli_time: Option<f64>,
    pub video_port: u16,
    /// Turret angles in degrees, unset until explicitly centered
    #[serde(skip_serializing_if = "Option::is_none")]
    pub turret: Option<(f64, f64)>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gait: Option<GaitCommand>,
    pub laser_on: bool,
    pub agitator_on: bool,
    pub green_led_on: bool,
    /// PWM fraction in 0..1
    pub agitator_pwm: f64,
    /// PWM fraction in 0..1
    pub fire_motor_pwm: f64,
    /// Fire command duration, seconds
    pub fire_duration: f64,
    /// Fires a shot every time this changes; only ever increases
    pub fire_cmd_count: u64,
    /// Highest remote log sequence number accepted so far
    pub logs_from: u64,
}

impl ControlCommand {
    /// Fresh command state for a new session.
    pub fn new(boot_time: f64) -> Self {
        Self {
            record_type: "control-dict",
            boot_time,
            seq: 0,
            cli_time: None,
            video_port: VIDEO_PORT,
            turret: None,
            gait: None,
            laser_on: false,
            agitator_on: false,
            green_led_on: false,
            agitator_pwm: 0.5,
            fire_motor_pwm: 0.75,
            fire_duration: 0.5,
            fire_cmd_count: 0,
            logs_from: 1,
        }
    }
}

/// Operator display preferences, persisted across runs as the `ui-state`
/// record. Defaults apply field by field so older snapshots still restore.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OverlayPrefs {
    /// Overlay canvas size; the SVG is stretched onto the video afterwards,
    /// so this stays at the video resolution to keep line widths sane
    #[serde(default = "default_image_size")]
    pub image_size: (u32, u32),
    #[serde(default = "default_true")]
    pub reticle_on: bool,
    /// Reticle center offset in fractional image units
    #[serde(default)]
    pub reticle_offset: (f64, f64),
    /// Reticle rotation in degrees
    #[serde(default)]
    pub reticle_rotate: f64,
    #[serde(default = "default_true")]
    pub status_on: bool,
    #[serde(default = "default_font_size")]
    pub msg_font_size: u32,
}

fn default_image_size() -> (u32, u32) {
    (1920, 1080)
}

fn default_true() -> bool {
    true
}

fn default_font_size() -> u32 {
    20
}

impl Default for OverlayPrefs {
    fn default() -> Self {
        Self {
            image_size: default_image_size(),
            reticle_on: true,
            reticle_offset: (0.0, 0.0),
            reticle_rotate: 0.0,
            status_on: true,
            msg_font_size: default_font_size(),
        }
    }
}

impl OverlayPrefs {
    /// Restore preferences from snapshot text. Record stamps (`_type`,
    /// `cli_time`) and unknown fields are ignored; missing fields keep
    /// their defaults.
    pub fn from_snapshot(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(|e| Error::Serialization(format!("snapshot: {}", e)))
    }
}

/// One remote log entry piggy-backed on a telemetry packet:
/// `[seq, srv_time, level, message]`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RemoteLogEntry(u64, f64, String, String);

impl RemoteLogEntry {
    pub fn seq(&self) -> u64 {
        self.0
    }

    pub fn srv_time(&self) -> f64 {
        self.1
    }

    pub fn level_str(&self) -> &str {
        &self.2
    }

    pub fn message(&self) -> &str {
        &self.3
    }

    /// Parsed log level, defaulting to info for unknown strings.
    pub fn level(&self) -> log::Level {
        match self.2.as_str() {
            "trace" => log::Level::Trace,
            "debug" => log::Level::Debug,
            "warn" | "warning" => log::Level::Warn,
            "error" => log::Level::Error,
            _ => log::Level::Info,
        }
    }
}

/// A decoded telemetry packet: the server state map with any piggy-backed
/// log entries split out.
#[derive(Debug)]
pub struct Telemetry {
    /// Arbitrary server-defined state, logged and displayed wholesale
    pub state: serde_json::Map<String, Value>,
    /// Entries carried under `logs_data`, oldest first
    pub logs: Vec<RemoteLogEntry>,
}

impl Telemetry {
    /// Decode a telemetry payload, splitting out `logs_data`.
    pub fn decode(payload: &[u8]) -> Result<Self> {
        let value: Value = serde_json::from_slice(payload)
            .map_err(|e| Error::InvalidPacket(format!("telemetry: {}", e)))?;
        let mut state = match value {
            Value::Object(map) => map,
            _ => return Err(Error::InvalidPacket("telemetry is not an object".to_string())),
        };
        let logs = match state.remove("logs_data") {
            None | Some(Value::Null) => Vec::new(),
            Some(v) => serde_json::from_value(v)
                .map_err(|e| Error::InvalidPacket(format!("logs_data: {}", e)))?,
        };
        Ok(Self { state, logs })
    }
}
