//! Input mapping: key names, video clicks, and joystick axis samples
//! translated into station mutations.
//!
//! Key names arrive from the host windowing layer as GDK-style base names
//! (`w`, `Return`, `KP_Add`, `Left`...). Modifiers are composed into the
//! lookup name as `C-` and `S-` prefixes, arrows collapse to `Arrows`, so
//! the dispatch table reads like the help text.

use std::thread;

use crate::config::CameraConfig;
use crate::error::Result;
use crate::events::StationHandle;
use crate::station::ControlStation;

/// Pinhole camera model for click-to-aim: fractional frame positions map
/// to tangent-plane coordinates, then to view angles.
#[derive(Debug, Clone, Copy)]
pub struct CameraModel {
    half_tan_x: f64,
    half_tan_y: f64,
}

impl CameraModel {
    pub fn new(config: &CameraConfig) -> Self {
        Self {
            half_tan_x: (config.fov_x_deg.to_radians() / 2.0).tan(),
            half_tan_y: (config.fov_y_deg.to_radians() / 2.0).tan(),
        }
    }

    /// Fractional frame position (0..1 per axis) to tangent-plane
    /// coordinates centered on the optical axis.
    pub fn to_world2d(&self, pos: (f64, f64)) -> (f64, f64) {
        (
            (pos.0 - 0.5) * 2.0 * self.half_tan_x,
            (pos.1 - 0.5) * 2.0 * self.half_tan_y,
        )
    }

    /// Tangent-plane coordinates to view angles in degrees.
    pub fn to_angles(w2d: (f64, f64)) -> (f64, f64) {
        (w2d.0.atan().to_degrees(), w2d.1.atan().to_degrees())
    }
}

fn compose_name(base: &str, shift: bool, ctrl: bool) -> String {
    let mut name = String::new();
    if ctrl {
        name.push_str("C-");
    }
    if shift {
        name.push_str("S-");
    }
    name.push_str(base);
    name
}

fn gait_step(name: &str) -> Option<(i32, i32, i32)> {
    match name {
        "w" => Some((0, 1, 0)),
        "s" => Some((0, -1, 0)),
        "a" => Some((-1, 0, 0)),
        "d" => Some((1, 0, 0)),
        "q" => Some((0, 0, -1)),
        "e" => Some((0, 0, 1)),
        _ => None,
    }
}

fn arrow_step(base: &str) -> Option<(f64, f64)> {
    match base {
        "Left" => Some((-1.0, 0.0)),
        "Right" => Some((1.0, 0.0)),
        "Up" => Some((0.0, -1.0)),
        "Down" => Some((0.0, 1.0)),
        _ => None,
    }
}

fn is_modifier(base: &str) -> bool {
    matches!(
        base,
        "Shift_L" | "Shift_R" | "Control_L" | "Control_R" | "Alt_L" | "Alt_R"
    )
}

/// Dispatch one key press. Returns whether the key was handled; handled
/// keys warrant a state notification and an immediate transmit.
pub fn handle_key_down(
    station: &mut ControlStation,
    base: &str,
    shift: bool,
    ctrl: bool,
) -> bool {
    let arrow = arrow_step(base);
    let lookup = if arrow.is_some() { "Arrows" } else { base };
    let name = compose_name(lookup, shift, ctrl);

    if let Some((dx, dy, dr)) = gait_step(&name) {
        station.set_key_gait(dx, dy, dr);
        return true;
    }
    match name.as_str() {
        "h" => station.print_help(),
        "l" => station.toggle_laser(),
        "m" => station.toggle_agitator(),
        "S-G" => station.toggle_green_led(),
        "Return" => station.fire(),
        "c" => station.center_turret(),
        "Arrows" | "S-Arrows" => {
            let step = if shift {
                station.config().turret.fast_step_deg
            } else {
                station.config().turret.step_deg
            };
            if let Some((ax, ay)) = arrow {
                // A refused move still counts as handled; the warning is
                // the visible outcome.
                station.move_turret_relative((ax * step, ay * step));
            }
        }
        "C-Arrows" | "C-S-Arrows" => {
            let step = if shift {
                station.config().display.reticle_fast_step
            } else {
                station.config().display.reticle_step
            };
            if let Some((ax, ay)) = arrow {
                station.nudge_reticle((ax * step, ay * step));
            }
        }
        "r" => station.toggle_reticle(),
        "KP_Add" => station.adjust_font(1),
        "KP_Subtract" => station.adjust_font(-1),
        "Escape" => station.clear_messages_or_toggle_status(),
        _ => {
            if !is_modifier(base) {
                station
                    .messages()
                    .debug("input", format!("Unknown key {:?}", name));
            }
            return false;
        }
    }
    true
}

/// Key released. Returns whether a transmit is warranted (a held gait key
/// was dropped back to idle).
pub fn handle_key_up(station: &mut ControlStation) -> bool {
    station.release_key_gait()
}

/// Dispatch a video-surface click. Returns whether a transmit is warranted.
pub fn handle_click(
    station: &mut ControlStation,
    camera: &CameraModel,
    pos: (f64, f64),
    button: u8,
    moved: bool,
) -> bool {
    // Only the initial press aims; drag updates are ignored.
    if moved {
        return false;
    }
    let w2d = camera.to_world2d(pos);
    let (ang_x, ang_y) = CameraModel::to_angles(w2d);

    if button != 1 {
        station.messages().info(
            "input",
            format!(
                "Click with B{} at (w2d {:.3},{:.3}, w2a {:.1},{:.1})",
                button, w2d.0, w2d.1, ang_x, ang_y
            ),
        );
        return false;
    }
    if station.turret().is_none() {
        station.messages().warn(
            "input",
            format!(
                "Cannot move turret -- center it first (w2d {:.3},{:.3}, w2a {:.1},{:.1})",
                w2d.0, w2d.1, ang_x, ang_y
            ),
        );
        return false;
    }
    station.messages().debug(
        "input",
        format!(
            "Moving turret by ({:+.1}, {:+.1}) deg for click at ({:+.4}, {:+.4})",
            ang_x, ang_y, w2d.0, w2d.1
        ),
    );
    station.move_turret_relative((ang_x, ang_y));
    true
}

/// Joystick axis sampler. `read` blocks until the next `(dx, dy, dr)`
/// sample; an error ends the source for good.
pub trait AxisSource: Send {
    fn read(&mut self) -> Result<(f64, f64, f64)>;
}

/// Forward axis samples onto the event loop until the device errors.
/// Termination is posted exactly once and the source is never retried.
pub fn spawn_axis_reader(
    mut source: Box<dyn AxisSource>,
    handle: StationHandle,
) -> thread::JoinHandle<()> {
    thread::spawn(move || loop {
        match source.read() {
            Ok((dx, dy, dr)) => handle.axes(dx, dy, dr),
            Err(e) => {
                handle.joystick_ended(&e.to_string());
                return;
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StationConfig;
    use crate::events::{event_channel, Event, OverlayNotifier};
    use crate::message_log::MessageLog;
    use crate::protocol::GaitCommand;

    fn station() -> ControlStation {
        let (tx, _rx) = event_channel();
        ControlStation::new(
            StationConfig::default(),
            MessageLog::new(30),
            OverlayNotifier::new(tx),
        )
    }

    fn panel_contains(station: &ControlStation, needle: &str) -> bool {
        station
            .messages()
            .panel_lines()
            .iter()
            .any(|l| l.contains(needle))
    }

    #[test]
    fn test_compose_name() {
        assert_eq!(compose_name("x", false, false), "x");
        assert_eq!(compose_name("x", true, false), "S-x");
        assert_eq!(compose_name("x", false, true), "C-x");
        assert_eq!(compose_name("Arrows", true, true), "C-S-Arrows");
    }

    #[test]
    fn test_gait_keys() {
        let mut station = station();
        assert!(handle_key_down(&mut station, "w", false, false));
        assert_eq!(
            station.command.gait,
            Some(GaitCommand::Ripple {
                translate_x_mm_s: 0.0,
                translate_y_mm_s: 100.0,
                rotate_deg_s: 0.0,
            })
        );
        assert!(handle_key_down(&mut station, "q", false, false));
        assert_eq!(
            station.command.gait,
            Some(GaitCommand::Ripple {
                translate_x_mm_s: 0.0,
                translate_y_mm_s: 0.0,
                rotate_deg_s: -30.0,
            })
        );
    }

    #[test]
    fn test_shifted_gait_key_is_not_gait() {
        let mut station = station();
        assert!(!handle_key_down(&mut station, "w", true, false));
        assert_eq!(station.command.gait, None);
    }

    #[test]
    fn test_key_release_idles_gait() {
        let mut station = station();
        handle_key_down(&mut station, "d", false, false);
        assert!(handle_key_up(&mut station));
        assert_eq!(station.command.gait, Some(GaitCommand::Idle));
        assert!(!handle_key_up(&mut station));
    }

    #[test]
    fn test_arrow_turret_steps() {
        let mut station = station();
        handle_key_down(&mut station, "c", false, false);
        assert!(handle_key_down(&mut station, "Right", false, false));
        assert_eq!(station.turret(), Some((0.5, 0.0)));
        assert!(handle_key_down(&mut station, "Up", true, false));
        assert_eq!(station.turret(), Some((0.5, -5.0)));
    }

    #[test]
    fn test_arrow_without_center_warns() {
        let mut station = station();
        assert!(handle_key_down(&mut station, "Left", false, false));
        assert_eq!(station.turret(), None);
        assert!(panel_contains(&station, "center it first"));
    }

    #[test]
    fn test_ctrl_arrows_nudge_reticle() {
        let mut station = station();
        assert!(handle_key_down(&mut station, "Left", false, true));
        assert_eq!(station.prefs().reticle_offset, (-0.002, 0.0));
        assert!(handle_key_down(&mut station, "Down", true, true));
        let (dx, dy) = station.prefs().reticle_offset;
        assert!((dx + 0.002).abs() < 1e-12);
        assert!((dy - 0.010).abs() < 1e-12);
    }

    #[test]
    fn test_actuator_and_fire_keys() {
        let mut station = station();
        assert!(handle_key_down(&mut station, "Return", false, false));
        assert_eq!(station.command.fire_cmd_count, 1);
        assert!(handle_key_down(&mut station, "l", false, false));
        assert!(station.command.laser_on);
        assert!(handle_key_down(&mut station, "G", true, false));
        assert!(station.command.green_led_on);
    }

    #[test]
    fn test_modifier_keys_ignored() {
        let mut station = station();
        assert!(!handle_key_down(&mut station, "Shift_L", false, false));
        assert!(!handle_key_down(&mut station, "Control_R", false, true));
        assert!(station.messages().is_empty());
    }

    #[test]
    fn test_unknown_key_not_handled() {
        let mut station = station();
        assert!(!handle_key_down(&mut station, "z", false, false));
        // Logged at debug only, so nothing lands on the panel.
        assert!(station.messages().is_empty());
    }

    #[test]
    fn test_help_key() {
        let mut station = station();
        assert!(handle_key_down(&mut station, "h", false, false));
        assert!(panel_contains(&station, "laser on/off"));
    }

    #[test]
    fn test_camera_model() {
        let camera = CameraModel::new(&CameraConfig {
            fov_x_deg: 90.0,
            fov_y_deg: 60.0,
        });
        assert_eq!(camera.to_world2d((0.5, 0.5)), (0.0, 0.0));

        let w2d = camera.to_world2d((0.75, 0.5));
        assert!((w2d.0 - 0.5).abs() < 1e-9);
        let (ang_x, ang_y) = CameraModel::to_angles(w2d);
        assert!((ang_x - 26.565).abs() < 0.01);
        assert_eq!(ang_y, 0.0);
    }

    #[test]
    fn test_click_aims_turret() {
        let mut station = station();
        let camera = CameraModel::new(&station.config().camera);

        // Ignored until the turret is centered.
        assert!(!handle_click(&mut station, &camera, (0.75, 0.5), 1, false));
        assert_eq!(station.turret(), None);
        assert!(panel_contains(&station, "center it first"));

        handle_key_down(&mut station, "c", false, false);
        assert!(handle_click(&mut station, &camera, (0.75, 0.5), 1, false));
        let (ang_x, ang_y) = station.turret().unwrap();
        assert!((ang_x - 26.565).abs() < 0.01);
        assert_eq!(ang_y, 0.0);
    }

    #[test]
    fn test_click_other_button_only_logs() {
        let mut station = station();
        let camera = CameraModel::new(&station.config().camera);
        handle_key_down(&mut station, "c", false, false);
        assert!(!handle_click(&mut station, &camera, (0.25, 0.25), 3, false));
        assert_eq!(station.turret(), Some((0.0, 0.0)));
        assert!(panel_contains(&station, "Click with B3"));
    }

    #[test]
    fn test_click_drag_ignored() {
        let mut station = station();
        let camera = CameraModel::new(&station.config().camera);
        handle_key_down(&mut station, "c", false, false);
        assert!(!handle_click(&mut station, &camera, (0.9, 0.9), 1, true));
        assert_eq!(station.turret(), Some((0.0, 0.0)));
    }

    struct ScriptedAxes {
        samples: Vec<(f64, f64, f64)>,
    }

    impl AxisSource for ScriptedAxes {
        fn read(&mut self) -> Result<(f64, f64, f64)> {
            if self.samples.is_empty() {
                Err(crate::error::Error::Other("device gone".to_string()))
            } else {
                Ok(self.samples.remove(0))
            }
        }
    }

    #[test]
    fn test_axis_reader_forwards_then_ends() {
        let (tx, rx) = event_channel();
        let handle = StationHandle::new(tx.clone(), OverlayNotifier::new(tx));
        let source = ScriptedAxes {
            samples: vec![(0.3, 0.0, 0.0), (0.0, -0.5, 0.0)],
        };
        let reader = spawn_axis_reader(Box::new(source), handle);
        reader.join().unwrap();

        let mut axes = 0;
        let mut ended = 0;
        while let Ok(event) = rx.try_recv() {
            match event {
                Event::Axes { .. } => axes += 1,
                Event::JoystickEnded { reason } => {
                    assert!(reason.contains("device gone"));
                    ended += 1;
                }
                other => panic!("unexpected event {:?}", other),
            }
        }
        assert_eq!(axes, 2);
        assert_eq!(ended, 1);
    }
}
