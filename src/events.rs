//! Cross-thread event plumbing for the station loop.
//!
//! All protocol state lives on the loop thread. Host event sources (video
//! window callbacks, the joystick reader, a video-decode thread asking for
//! an overlay refresh) post events through a `StationHandle`; the loop
//! drains them in order. The overlay notifier is the one debounced path:
//! at most one refresh event is in flight at a time.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crossbeam_channel::{bounded, Receiver, Sender};

/// Events marshalled onto the station loop.
#[derive(Debug, Clone)]
pub enum Event {
    /// Key pressed on the video surface.
    KeyDown {
        base: String,
        shift: bool,
        ctrl: bool,
    },
    /// Any key released.
    KeyUp,
    /// Pointer click on the video surface, position in 0..1 image units.
    Click {
        pos: (f64, f64),
        button: u8,
        moved: bool,
    },
    /// Joystick axis sample in -1..1 units.
    Axes { dx: f64, dy: f64, dr: f64 },
    /// The joystick reader ended and will not be retried.
    JoystickEnded { reason: String },
    /// Debounced overlay recompute request.
    RefreshOverlay,
    /// Video pipeline produced its first frame; force a ui-state record.
    VideoReady,
    Shutdown,
}

/// Bounded event channel for one station loop.
pub fn event_channel() -> (Sender<Event>, Receiver<Event>) {
    bounded(256)
}

/// Debounced overlay recompute requests, callable from any thread.
///
/// `request` posts a single `RefreshOverlay` event; further requests are
/// dropped until the loop acknowledges the pending one.
#[derive(Clone)]
pub struct OverlayNotifier {
    pending: Arc<AtomicBool>,
    tx: Sender<Event>,
}

impl OverlayNotifier {
    pub fn new(tx: Sender<Event>) -> Self {
        Self {
            pending: Arc::new(AtomicBool::new(false)),
            tx,
        }
    }

    pub fn request(&self) {
        if !self.pending.swap(true, Ordering::SeqCst)
            && self.tx.try_send(Event::RefreshOverlay).is_err()
        {
            self.pending.store(false, Ordering::SeqCst);
        }
    }

    /// Called by the loop when it handles the pending refresh.
    pub fn acknowledge(&self) {
        self.pending.store(false, Ordering::SeqCst);
    }
}

/// Cross-thread handle host event sources use to feed the station.
#[derive(Clone)]
pub struct StationHandle {
    tx: Sender<Event>,
    notifier: OverlayNotifier,
}

impl StationHandle {
    pub fn new(tx: Sender<Event>, notifier: OverlayNotifier) -> Self {
        Self { tx, notifier }
    }

    pub fn key_down(&self, base: &str, shift: bool, ctrl: bool) {
        self.send(Event::KeyDown {
            base: base.to_string(),
            shift,
            ctrl,
        });
    }

    pub fn key_up(&self) {
        self.send(Event::KeyUp);
    }

    pub fn click(&self, pos: (f64, f64), button: u8, moved: bool) {
        self.send(Event::Click { pos, button, moved });
    }

    pub fn axes(&self, dx: f64, dy: f64, dr: f64) {
        self.send(Event::Axes { dx, dy, dr });
    }

    pub fn joystick_ended(&self, reason: &str) {
        self.send(Event::JoystickEnded {
            reason: reason.to_string(),
        });
    }

    /// Ask for an overlay recompute; safe to call from any thread, dropped
    /// if one is already pending.
    pub fn request_overlay_refresh(&self) {
        self.notifier.request();
    }

    pub fn video_ready(&self) {
        self.send(Event::VideoReady);
    }

    pub fn shutdown(&self) {
        self.send(Event::Shutdown);
    }

    fn send(&self, event: Event) {
        self.tx.send(event).ok();
    }
}
