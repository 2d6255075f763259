//! Control state machine: the single owner of outgoing command state,
//! display preferences, and the latest telemetry.
//!
//! Every operator intent lands here as a small mutation method. Mutations of
//! display preferences flow through [`ControlStation::state_updated`], which
//! journals a `ui-state` record (deduplicated against the last logged
//! serialization), rewrites the snapshot, and requests an overlay refresh.
//! Command-state mutations are picked up by the next heartbeat; telemetry
//! ingestion journals `srv-state` and `srv-log` records and advances the
//! remote log watermark.

use serde_json::{Map, Value};

use crate::config::StationConfig;
use crate::error::Result;
use crate::events::OverlayNotifier;
use crate::journal::{tag_record, Journal};
use crate::message_log::MessageLog;
use crate::overlay::OverlayScene;
use crate::protocol::{wall_time, ControlCommand, GaitCommand, OverlayPrefs, Telemetry};

/// Hooks into the video plumbing that hosts the overlay.
pub trait VideoSurface: Send {
    /// Replace the displayed overlay.
    fn set_overlay(&mut self, svg: &str);
    /// One-shot signal that the control link is established enough for
    /// video streaming to begin.
    fn video_start(&mut self);
}

pub struct ControlStation {
    pub command: ControlCommand,
    prefs: OverlayPrefs,
    server_state: Map<String, Value>,
    journal: Option<Journal>,
    /// Serialized preferences as of the last `ui-state` record
    logged_prefs: Option<String>,
    key_gait_active: bool,
    messages: MessageLog,
    notifier: OverlayNotifier,
    surface: Option<Box<dyn VideoSurface>>,
    config: StationConfig,
}

impl ControlStation {
    pub fn new(config: StationConfig, messages: MessageLog, notifier: OverlayNotifier) -> Self {
        Self {
            command: ControlCommand::new(wall_time()),
            prefs: OverlayPrefs::default(),
            server_state: Map::new(),
            journal: None,
            logged_prefs: None,
            key_gait_active: false,
            messages,
            notifier,
            surface: None,
            config,
        }
    }

    pub fn attach_journal(&mut self, journal: Journal) {
        self.journal = Some(journal);
    }

    pub fn attach_surface(&mut self, surface: Box<dyn VideoSurface>) {
        self.surface = Some(surface);
    }

    /// Replace display preferences from snapshot text.
    pub fn restore_prefs(&mut self, text: &str) -> Result<()> {
        self.prefs = OverlayPrefs::from_snapshot(text)?;
        Ok(())
    }

    pub fn config(&self) -> &StationConfig {
        &self.config
    }

    pub fn prefs(&self) -> &OverlayPrefs {
        &self.prefs
    }

    pub fn messages(&self) -> &MessageLog {
        &self.messages
    }

    pub fn turret(&self) -> Option<(f64, f64)> {
        self.command.turret
    }

    // --- command-state mutations -------------------------------------------

    pub fn center_turret(&mut self) {
        self.command.turret = Some((0.0, 0.0));
        self.messages.info("station", "Centered turret".to_string());
    }

    /// Disarm the turret; relative moves warn again until it is re-centered.
    pub fn clear_turret(&mut self) {
        self.command.turret = None;
        self.messages.info("station", "Cleared turret".to_string());
    }

    /// Relative turret move; refused with a warning until the turret has
    /// been centered once.
    pub fn move_turret_relative(&mut self, delta: (f64, f64)) -> bool {
        match self.command.turret {
            None => {
                self.messages
                    .warn("station", "Cannot move turret -- center it first".to_string());
                false
            }
            Some((x, y)) => {
                self.command.turret = Some((x + delta.0, y + delta.1));
                true
            }
        }
    }

    /// Key-driven gait: unit direction steps, fixed scaling, no deadzone.
    pub fn set_key_gait(&mut self, dx: i32, dy: i32, dr: i32) {
        let drive = &self.config.drive;
        self.command.gait = Some(GaitCommand::Ripple {
            translate_x_mm_s: f64::from(dx) * drive.key_x_mm_s,
            translate_y_mm_s: f64::from(dy) * drive.key_y_mm_s,
            rotate_deg_s: f64::from(dr) * drive.key_turn_deg_s,
        });
        self.key_gait_active = true;
    }

    /// Key released: drop back to idle, but only if a held key was driving
    /// the gait. Returns whether a transmit is warranted.
    pub fn release_key_gait(&mut self) -> bool {
        if !self.key_gait_active {
            return false;
        }
        self.key_gait_active = false;
        if self.command.gait.is_some() {
            self.command.gait = Some(GaitCommand::Idle);
        }
        true
    }

    /// Continuous joystick sample. Centered axes collapse an active gait to
    /// idle; a never-driven gait stays unset. Forward drive beyond the
    /// priority threshold suppresses sideways translation. Stick-forward is
    /// negative `dy`, so the y axis is negated into robot coordinates.
    pub fn apply_axes(&mut self, dx: f64, dy: f64, dr: f64) {
        let drive = &self.config.drive;
        let dz = drive.joystick_deadzone;
        if dx.abs() < dz && dy.abs() < dz && dr.abs() < dz {
            if self.command.gait.is_some() {
                self.command.gait = Some(GaitCommand::Idle);
            }
            return;
        }
        let dx = if dy.abs() > drive.forward_priority_threshold {
            0.0
        } else {
            dx
        };
        self.command.gait = Some(GaitCommand::Ripple {
            translate_x_mm_s: dx * drive.joystick_x_mm_s,
            translate_y_mm_s: -dy * drive.joystick_y_mm_s,
            rotate_deg_s: dr * drive.joystick_turn_deg_s,
        });
    }

    pub fn toggle_laser(&mut self) {
        self.command.laser_on = !self.command.laser_on;
        self.messages
            .info("station", format!("Laser set to {}", self.command.laser_on));
    }

    pub fn toggle_agitator(&mut self) {
        self.command.agitator_on = !self.command.agitator_on;
        self.messages.info(
            "station",
            format!(
                "Agitator set to {} (pwm {:.3})",
                self.command.agitator_on, self.command.agitator_pwm
            ),
        );
    }

    pub fn toggle_green_led(&mut self) {
        self.command.green_led_on = !self.command.green_led_on;
        self.messages.info(
            "station",
            format!("Green LED set to {}", self.command.green_led_on),
        );
    }

    /// Bumping the count is the fire signal; the robot edge-detects it.
    pub fn fire(&mut self) {
        self.command.fire_cmd_count += 1;
        self.messages.info("station", "Sent fire command".to_string());
    }

    // --- display-preference mutations --------------------------------------

    pub fn nudge_reticle(&mut self, delta: (f64, f64)) {
        let (x, y) = self.prefs.reticle_offset;
        self.prefs.reticle_offset = (x + delta.0, y + delta.1);
    }

    pub fn rotate_reticle(&mut self, delta_deg: f64) {
        self.prefs.reticle_rotate += delta_deg;
    }

    pub fn toggle_reticle(&mut self) {
        self.prefs.reticle_on = !self.prefs.reticle_on;
        self.messages.info(
            "station",
            format!("Set reticle_on={}", self.prefs.reticle_on),
        );
    }

    pub fn adjust_font(&mut self, delta: i32) {
        let floor = self.config.display.min_font_size;
        let next = self.prefs.msg_font_size.saturating_add_signed(delta);
        self.prefs.msg_font_size = next.max(floor);
    }

    /// First press clears the message panel, a press on an empty panel
    /// toggles the status panel instead.
    pub fn clear_messages_or_toggle_status(&mut self) {
        if !self.messages.is_empty() {
            let count = self.messages.len();
            self.messages.info(
                "station",
                format!("Cleared on-screen display ({} lines)", count),
            );
            self.messages.clear();
        } else {
            self.prefs.status_on = !self.prefs.status_on;
            self.messages
                .debug("station", format!("Set status_on={}", self.prefs.status_on));
        }
    }

    pub fn print_help(&self) {
        let help = "\
Help on keys:
  w/s, a/d - move
  q/e      - rotate
  l        - laser on/off
  m        - agitator on/off
  S-G      - green LED on/off
  c        - center turret (enables turret moves)
  click    - point turret at this spot (center it first)
  Return   - fire
  arrows   - move turret (shift: bigger steps)
  C-arrows - move reticle center (shift: bigger steps)
  r        - toggle reticle
  Escape   - clear messages, then toggle status panel
  KP +/-   - change overlay font size
  h        - this help";
        for line in help.lines() {
            self.messages.info("help", format!("| {}", line));
        }
    }

    // --- journaling and telemetry ------------------------------------------

    /// Request an overlay recompute, then journal a `ui-state` record and
    /// rewrite the snapshot, unless the preferences are unchanged since the
    /// last record and `force` is off. The recompute is unconditional: the
    /// overlay also shows command state, which the record does not cover.
    pub fn state_updated(&mut self, force: bool) -> Result<()> {
        self.notifier.request();
        let plain = serde_json::to_string(&serde_json::to_value(&self.prefs)?)?;
        if !force && self.logged_prefs.as_deref() == Some(plain.as_str()) {
            return Ok(());
        }
        let record = tag_record(serde_json::to_value(&self.prefs)?, "ui-state", wall_time())?;
        let line = serde_json::to_string(&record)?;
        self.journal_append(&line)?;
        if let Some(journal) = &self.journal {
            journal.snapshot(&line)?;
        }
        self.logged_prefs = Some(plain);
        Ok(())
    }

    /// Ingest one telemetry packet: accept new remote log entries past the
    /// watermark, journal the packet, replace the displayed server state.
    pub fn ingest_telemetry(&mut self, telemetry: Telemetry) -> Result<()> {
        let Telemetry { mut state, logs } = telemetry;
        let cli_time = wall_time();

        for entry in &logs {
            if entry.seq() <= self.command.logs_from {
                continue;
            }
            self.command.logs_from = entry.seq();
            let record = serde_json::json!({
                "_type": "srv-log",
                "cli_time": cli_time,
                "seq": entry.seq(),
                "srv_time": entry.srv_time(),
                "level": entry.level_str(),
                "message": entry.message(),
            });
            self.journal_append(&serde_json::to_string(&record)?)?;
            // Relay into the panel so robot-side logs appear inline.
            self.messages
                .push(entry.level(), "srv.remote", entry.message().to_string());
        }

        state.insert("_type".to_string(), Value::from("srv-state"));
        state.insert("cli_time".to_string(), Value::from(cli_time));
        self.journal_append(&serde_json::to_string(&state)?)?;
        self.server_state = state;
        self.notifier.request();
        Ok(())
    }

    pub fn journal_append(&mut self, line: &str) -> Result<()> {
        match &mut self.journal {
            Some(journal) => journal.append_line(line),
            None => Ok(()),
        }
    }

    /// Render the overlay from current state, export it next to the
    /// journal, and hand it to the video surface.
    pub fn render_overlay_now(&mut self) -> Result<()> {
        let lines = self.messages.panel_lines();
        let svg = OverlayScene {
            prefs: &self.prefs,
            command: &self.command,
            server_state: &self.server_state,
            messages: &lines,
        }
        .render();
        if let Some(journal) = &self.journal {
            journal.export_overlay(&svg)?;
        }
        if let Some(surface) = self.surface.as_mut() {
            surface.set_overlay(&svg);
        }
        Ok(())
    }

    pub fn video_start(&mut self) {
        if let Some(surface) = self.surface.as_mut() {
            surface.video_start();
        }
    }
}
