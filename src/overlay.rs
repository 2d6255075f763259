//! SVG overlay rendering.
//!
//! The overlay is rebuilt as a whole on every refresh: a reticle anchored
//! near the image center, a status panel in the top-right corner, and the
//! recent message ring in the bottom-left. Rendering is a pure function of
//! an [`OverlayScene`], so offline replay of journal records reproduces the
//! exact overlay bytes the operator saw live.

use std::collections::BTreeSet;
use std::fmt::Write;

use serde_json::{Map, Value};

use crate::protocol::{ControlCommand, OverlayPrefs};

/// Reticle line segments relative to the reticle center:
/// `(x1, y1, x2, y2, stroke_width)`. Heavy arms surround a thin crosshair,
/// with range rungs below it narrowing toward the bottom.
const RETICLE_LINES: &[(i32, i32, i32, i32, u32)] = &[
    (100, 0, 500, 0, 4),
    (-500, 0, -100, 0, 4),
    (-100, 0, 100, 0, 1),
    (0, 100, 0, 500, 4),
    (0, -500, 0, -100, 4),
    (0, -100, 0, 100, 1),
    (-80, -20, 80, -20, 1),
    (-80, 20, 80, 20, 1),
    (-60, 40, 60, 40, 1),
    (-40, 60, 40, 60, 1),
    (-20, 80, 20, 80, 1),
];

const OUTLINE_PAINT: &str = r#"stroke="black" fill="black""#;

/// Everything the overlay shows, borrowed from the owning station (or, in
/// replay, reconstructed from journal records).
pub struct OverlayScene<'a> {
    pub prefs: &'a OverlayPrefs,
    pub command: &'a ControlCommand,
    /// Most recent telemetry state, displayed wholesale
    pub server_state: &'a Map<String, Value>,
    /// Formatted message panel lines, oldest first
    pub messages: &'a [String],
}

impl OverlayScene<'_> {
    /// Render the scene to an SVG document.
    pub fn render(&self) -> String {
        let (width, height) = self.prefs.image_size;
        let mut out = String::new();
        writeln!(out, r#"<svg width="{}" height="{}">"#, width, height).unwrap();

        if self.prefs.reticle_on {
            self.render_reticle(&mut out);
        }

        // Each text block is drawn twice: a black outline pass first, then
        // the bright fill, so text stays readable over any video content.
        let status = self.status_lines();
        for fill_pass in [false, true] {
            let message_paint = if fill_pass { r#"fill="lime""# } else { OUTLINE_PAINT };
            let status_paint = if fill_pass { r#"fill="white""# } else { OUTLINE_PAINT };
            self.render_messages(&mut out, message_paint);
            self.render_status(&mut out, &status, status_paint);
        }

        writeln!(out, "</svg>").unwrap();
        out
    }

    fn render_reticle(&self, out: &mut String) {
        let (width, height) = self.prefs.image_size;
        let (dx, dy) = self.prefs.reticle_offset;
        let center_x = f64::from(width) * (0.5 + dx);
        let center_y = f64::from(height) * (0.5 + dy);
        writeln!(
            out,
            r#"<g transform="translate({} {}) rotate({})" stroke="rgb(255,128,0)">"#,
            center_x, center_y, self.prefs.reticle_rotate
        )
        .unwrap();
        for &(x1, y1, x2, y2, stroke_width) in RETICLE_LINES {
            if stroke_width == 1 {
                writeln!(
                    out,
                    r#"  <line x1="{}" y1="{}" x2="{}" y2="{}" />"#,
                    x1, y1, x2, y2
                )
                .unwrap();
            } else {
                writeln!(
                    out,
                    r#"  <line x1="{}" y1="{}" x2="{}" y2="{}" stroke-width="{}" />"#,
                    x1, y1, x2, y2, stroke_width
                )
                .unwrap();
            }
        }
        writeln!(out, "</g>").unwrap();
    }

    fn render_messages(&self, out: &mut String, paint: &str) {
        let (_, height) = self.prefs.image_size;
        let font = self.prefs.msg_font_size;
        writeln!(
            out,
            r#"<text transform="translate(10 {})" {} font-family="Helvetica,sans-serif" font-size="{}" dominant-baseline="text-before-edge">"#,
            height - 15,
            paint,
            font
        )
        .unwrap();
        // Newest line sits closest to the bottom edge; older lines stack up.
        for (row, line) in self.messages.iter().rev().enumerate() {
            let y = -((row as i64 + 1) * i64::from(font));
            writeln!(out, r#"<tspan x="0" y="{}">{}</tspan>"#, y, cdata(line)).unwrap();
        }
        writeln!(out, "</text>").unwrap();
    }

    fn render_status(&self, out: &mut String, lines: &[String], paint: &str) {
        let (width, _) = self.prefs.image_size;
        let font = self.prefs.msg_font_size;
        writeln!(
            out,
            r#"<text transform="translate({} 15)" {} font-family="Courier,fixed" font-weight="bold" font-size="{}" text-anchor="end" dominant-baseline="text-before-edge">"#,
            width - 10,
            paint,
            font
        )
        .unwrap();
        for (row, line) in lines.iter().enumerate() {
            let y = row as i64 * i64::from(font);
            writeln!(out, r#"<tspan x="0" y="{}">{}</tspan>"#, y, cdata(line)).unwrap();
        }
        writeln!(out, "</text>").unwrap();
    }

    fn status_lines(&self) -> Vec<String> {
        if !self.prefs.status_on {
            return vec!["[OFF]".to_string()];
        }
        let mut lines = Vec::new();

        match self.command.turret {
            Some((x, y)) => lines.push(format!("Turret: ({:+5.1}, {:+5.1})", x, y)),
            None => lines.push("Turret OFF".to_string()),
        }

        let mut tags = Vec::new();
        if self.command.laser_on {
            tags.push("LAS");
        }
        if self.command.agitator_on {
            tags.push("AGT");
        }
        if self.command.green_led_on {
            tags.push("GRN");
        }
        if tags.is_empty() {
            lines.push("(all off)".to_string());
        } else {
            lines.push(tags.join(","));
        }

        lines.extend(self.servo_lines());
        lines
    }

    /// One line per servo that reported anything, `status voltage id`.
    fn servo_lines(&self) -> Vec<String> {
        let empty = Map::new();
        let voltage = self
            .server_state
            .get("servo_voltage")
            .and_then(Value::as_object)
            .unwrap_or(&empty);
        let status = self
            .server_state
            .get("servo_status")
            .and_then(Value::as_object)
            .unwrap_or(&empty);

        let ids: BTreeSet<&str> = voltage
            .keys()
            .chain(status.keys())
            .map(String::as_str)
            .collect();
        let mut ids: Vec<&str> = ids.into_iter().collect();
        ids.sort_by_key(|id| id.parse::<i64>().unwrap_or(i64::MAX));

        let mut lines = Vec::new();
        for id in ids {
            let mut tags = Vec::new();
            if let Some(text) = status.get(id).and_then(display_value) {
                tags.push(text);
            }
            if let Some(volts) = voltage.get(id).and_then(Value::as_f64).filter(|v| *v != 0.0) {
                tags.push(format!("{:.2}V", volts));
            }
            if tags.is_empty() {
                continue;
            }
            tags.push(format!("{:<2}", id));
            lines.push(tags.join(" "));
        }
        if lines.is_empty() {
            lines.push("No servo status available".to_string());
        }
        lines
    }
}

/// Displayable text of a status value; empty and zero values read as absent.
fn display_value(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) if n.as_f64().unwrap_or(0.0) != 0.0 => Some(n.to_string()),
        Value::Bool(true) => Some("true".to_string()),
        _ => None,
    }
}

fn cdata(text: &str) -> String {
    format!("<![CDATA[{}]]>", text.replace("]]>", "]]]]><![CDATA[>"))
}
