//! Application wiring: one event loop owning all protocol state.
//!
//! The loop thread drains host events, announce datagrams, and telemetry,
//! and drives the heartbeat deadline. Host integrations (video window,
//! joystick reader) talk to it only through a `StationHandle`.

use std::fs;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError};

use crate::config::{resolve_target, Options, StationConfig};
use crate::deploy::{DeployAction, ScriptDeploy};
use crate::discovery::AnnounceListener;
use crate::error::Result;
use crate::events::{event_channel, Event, OverlayNotifier, StationHandle};
use crate::input::{self, AxisSource, CameraModel};
use crate::journal::Journal;
use crate::message_log::MessageLog;
use crate::session::Session;
use crate::station::{ControlStation, VideoSurface};

/// Ceiling on one loop iteration's sleep, so announce and telemetry sockets
/// are drained promptly even while waiting on host events.
const IDLE_POLL: Duration = Duration::from_millis(10);

pub struct StationApp {
    station: ControlStation,
    camera: CameraModel,
    events: Receiver<Event>,
    handle: StationHandle,
    notifier: OverlayNotifier,
    listener: Option<AnnounceListener>,
    session: Option<Session>,
    interval: Duration,
    messages: MessageLog,
    running: Arc<AtomicBool>,
    axis_reader: Option<thread::JoinHandle<()>>,
}

impl StationApp {
    /// Assemble the station: journal, preference restore, the initial
    /// ui-state record, host integrations, and either a direct session
    /// (`--addr`) or the announce listener.
    pub fn new(
        config: StationConfig,
        options: &Options,
        journal: Option<Journal>,
        surface: Option<Box<dyn VideoSurface>>,
        axis_source: Option<Box<dyn AxisSource>>,
        messages: MessageLog,
        running: Arc<AtomicBool>,
    ) -> Result<Self> {
        let (tx, events) = event_channel();
        let notifier = OverlayNotifier::new(tx.clone());
        let handle = StationHandle::new(tx, notifier.clone());
        // Every new panel message redraws the overlay, debounced.
        messages.set_notifier(notifier.clone());
        let camera = CameraModel::new(&config.camera);
        let interval = config.network.send_interval();

        let mut station =
            ControlStation::new(config.clone(), messages.clone(), notifier.clone());

        let restore_path: Option<PathBuf> = match &options.restore_state {
            Some(path) => Some(path.clone()),
            None => journal
                .as_ref()
                .map(|j| j.snapshot_path().to_path_buf())
                .filter(|p| p.exists()),
        };
        if let Some(journal) = journal {
            station.attach_journal(journal);
        }
        if let Some(path) = restore_path {
            messages.info("control", format!("Loading saved state from {:?}", path));
            let text = fs::read_to_string(&path)?;
            station.restore_prefs(&text)?;
        }
        if let Some(surface) = surface {
            station.attach_surface(surface);
        }
        station.state_updated(false)?;

        let axis_reader = match axis_source {
            Some(source) => Some(input::spawn_axis_reader(source, handle.clone())),
            None => {
                messages.warn("input", "No joysticks found!".to_string());
                None
            }
        };

        let mut app = Self {
            station,
            camera,
            events,
            handle,
            notifier,
            listener: None,
            session: None,
            interval,
            messages: messages.clone(),
            running,
            axis_reader,
        };
        match &options.addr {
            Some(spec) => {
                let target = resolve_target(spec, config.network.control_port)?;
                app.start_session(target)?;
            }
            None => {
                let deploy: Option<Box<dyn DeployAction>> = if options.no_deploy {
                    None
                } else {
                    Some(Box::new(ScriptDeploy::new(
                        config.deploy.clone(),
                        messages.clone(),
                    )))
                };
                app.listener = Some(AnnounceListener::bind(
                    config.network.announce_port,
                    messages,
                    deploy,
                )?);
            }
        }
        Ok(app)
    }

    /// Handle for host event sources (video window callbacks, joystick
    /// readers, shutdown hooks).
    pub fn handle(&self) -> StationHandle {
        self.handle.clone()
    }

    /// Port the announce listener actually bound, if discovery is active.
    pub fn announce_port(&self) -> Option<u16> {
        self.listener.as_ref().and_then(|l| l.local_port().ok())
    }

    pub fn session_target(&self) -> Option<SocketAddr> {
        self.session.as_ref().map(|s| s.target())
    }

    /// Run until shutdown. Session-consistency and persistence errors
    /// propagate out; everything else is handled in place.
    pub fn run(&mut self) -> Result<()> {
        while self.running.load(Ordering::SeqCst) {
            self.pump()?;
        }
        Ok(())
    }

    /// One loop iteration: drain sockets, fire the heartbeat if due, then
    /// block on host events until the next deadline.
    fn pump(&mut self) -> Result<()> {
        if let Some(listener) = &mut self.listener {
            if let Some(target) = listener.poll(self.session.is_some())? {
                self.start_session(target)?;
            }
        }
        if let Some(session) = &mut self.session {
            session.poll(&mut self.station)?;
            session.tick(&mut self.station, Instant::now())?;
        }

        let timeout = match &self.session {
            Some(session) => session.time_to_next(Instant::now()).min(IDLE_POLL),
            None => IDLE_POLL,
        };
        match self.events.recv_timeout(timeout) {
            Ok(event) => {
                self.handle_event(event)?;
                while let Ok(event) = self.events.try_recv() {
                    self.handle_event(event)?;
                }
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => {
                self.running.store(false, Ordering::SeqCst);
            }
        }
        Ok(())
    }

    fn handle_event(&mut self, event: Event) -> Result<()> {
        match event {
            Event::KeyDown { base, shift, ctrl } => {
                if input::handle_key_down(&mut self.station, &base, shift, ctrl) {
                    self.transmit_state()?;
                }
            }
            Event::KeyUp => {
                if input::handle_key_up(&mut self.station) {
                    self.transmit_state()?;
                }
            }
            Event::Click { pos, button, moved } => {
                if input::handle_click(&mut self.station, &self.camera, pos, button, moved) {
                    self.transmit_state()?;
                }
            }
            Event::Axes { dx, dy, dr } => self.station.apply_axes(dx, dy, dr),
            Event::JoystickEnded { reason } => {
                self.messages
                    .warn("input", format!("Joystick input ended: {}", reason));
                // The reader posted this on its way out; reap it.
                if let Some(reader) = self.axis_reader.take() {
                    reader.join().ok();
                }
            }
            Event::RefreshOverlay => {
                self.notifier.acknowledge();
                self.station.render_overlay_now()?;
            }
            Event::VideoReady => self.station.state_updated(true)?,
            Event::Shutdown => self.running.store(false, Ordering::SeqCst),
        }
        Ok(())
    }

    /// Record any preference change, then push the command state out
    /// immediately instead of waiting for the heartbeat.
    fn transmit_state(&mut self) -> Result<()> {
        self.station.state_updated(false)?;
        if let Some(session) = &mut self.session {
            session.send_control(&mut self.station)?;
        }
        Ok(())
    }

    fn start_session(&mut self, target: SocketAddr) -> Result<()> {
        self.session = Some(Session::connect(
            target,
            self.interval,
            self.messages.clone(),
        )?);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;
    use std::net::UdpSocket;
    use tempfile::TempDir;

    fn direct_options(target: SocketAddr) -> Options {
        Options {
            addr: Some(target.to_string()),
            no_deploy: true,
            ..Options::default()
        }
    }

    fn robot_socket() -> (UdpSocket, SocketAddr) {
        let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
        socket.set_nonblocking(true).unwrap();
        let addr = socket.local_addr().unwrap();
        (socket, addr)
    }

    fn pump_until_datagram(app: &mut StationApp, robot: &UdpSocket) -> (Value, SocketAddr) {
        let mut buf = [0u8; 65536];
        let deadline = Instant::now() + Duration::from_secs(2);
        loop {
            app.pump().unwrap();
            match robot.recv_from(&mut buf) {
                Ok((len, from)) => return (serde_json::from_slice(&buf[..len]).unwrap(), from),
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {}
                Err(e) => panic!("robot socket: {}", e),
            }
            assert!(Instant::now() < deadline, "no control datagram arrived");
        }
    }

    #[test]
    fn test_direct_session_heartbeats_and_key_transmit() {
        let (robot, target) = robot_socket();
        let mut app = StationApp::new(
            StationConfig::default(),
            &direct_options(target),
            None,
            None,
            None,
            MessageLog::new(30),
            Arc::new(AtomicBool::new(true)),
        )
        .unwrap();

        let (first, _) = pump_until_datagram(&mut app, &robot);
        assert_eq!(first["_type"], "control-dict");
        assert_eq!(first["seq"], 1);
        assert_eq!(first["laser_on"], false);

        app.handle().key_down("l", false, false);
        let (next, _) = pump_until_datagram(&mut app, &robot);
        assert_eq!(next["laser_on"], true);
    }

    #[test]
    fn test_discovery_promotes_to_session() {
        let mut config = StationConfig::default();
        config.network.announce_port = 0;
        let options = Options {
            no_deploy: true,
            ..Options::default()
        };
        let mut app = StationApp::new(
            config,
            &options,
            None,
            None,
            None,
            MessageLog::new(30),
            Arc::new(AtomicBool::new(true)),
        )
        .unwrap();
        let announce_port = app.announce_port().unwrap();

        let (robot, robot_addr) = robot_socket();
        let announce = format!(
            r#"{{"host": "robot", "start_time": 100.0,
                "running_since": 123.0, "cport": {}}}"#,
            robot_addr.port()
        );
        robot
            .send_to(announce.as_bytes(), ("127.0.0.1", announce_port))
            .unwrap();

        let (packet, _) = pump_until_datagram(&mut app, &robot);
        assert_eq!(packet["_type"], "control-dict");
        assert_eq!(app.session_target(), Some(robot_addr));
    }

    #[test]
    fn test_restore_and_initial_state_record() {
        let (_robot, target) = robot_socket();
        let dir = TempDir::new().unwrap();
        let journal = Journal::create(&dir.path().join("run-1")).unwrap();
        let snapshot = dir.path().join("saved.jsonlist");
        std::fs::write(
            &snapshot,
            r#"{"_type": "ui-state", "cli_time": 1.0, "msg_font_size": 17}"#,
        )
        .unwrap();

        let options = Options {
            restore_state: Some(snapshot),
            ..direct_options(target)
        };
        let messages = MessageLog::new(30);
        let app = StationApp::new(
            StationConfig::default(),
            &options,
            Some(journal),
            None,
            None,
            messages.clone(),
            Arc::new(AtomicBool::new(true)),
        )
        .unwrap();
        drop(app);

        let journal_text = std::fs::read_to_string(dir.path().join("run-1.jsonlist")).unwrap();
        let first: Value = serde_json::from_str(journal_text.lines().next().unwrap()).unwrap();
        assert_eq!(first["_type"], "ui-state");
        assert_eq!(first["msg_font_size"], 17);
        assert!(messages
            .panel_lines()
            .iter()
            .any(|l| l.contains("Loading saved state from")));
    }

    #[test]
    fn test_video_ready_forces_fresh_state_record() {
        let (_robot, target) = robot_socket();
        let dir = TempDir::new().unwrap();
        let journal = Journal::create(&dir.path().join("run-1")).unwrap();
        let mut app = StationApp::new(
            StationConfig::default(),
            &direct_options(target),
            Some(journal),
            None,
            None,
            MessageLog::new(30),
            Arc::new(AtomicBool::new(true)),
        )
        .unwrap();

        app.handle().video_ready();
        app.pump().unwrap();

        let journal_text = std::fs::read_to_string(dir.path().join("run-1.jsonlist")).unwrap();
        let ui_states = journal_text
            .lines()
            .filter(|l| l.contains(r#""_type":"ui-state""#))
            .count();
        assert_eq!(ui_states, 2);
    }

    #[test]
    fn test_shutdown_event_stops_loop() {
        let (_robot, target) = robot_socket();
        let running = Arc::new(AtomicBool::new(true));
        let mut app = StationApp::new(
            StationConfig::default(),
            &direct_options(target),
            None,
            None,
            None,
            MessageLog::new(30),
            running.clone(),
        )
        .unwrap();

        app.handle().shutdown();
        app.run().unwrap();
        assert!(!running.load(Ordering::SeqCst));
    }

    #[test]
    fn test_refresh_event_exports_overlay() {
        let (_robot, target) = robot_socket();
        let dir = TempDir::new().unwrap();
        let journal = Journal::create(&dir.path().join("run-1")).unwrap();
        let overlay_path = journal.overlay_path().to_path_buf();
        let mut app = StationApp::new(
            StationConfig::default(),
            &direct_options(target),
            Some(journal),
            None,
            None,
            MessageLog::new(30),
            Arc::new(AtomicBool::new(true)),
        )
        .unwrap();

        app.handle().request_overlay_refresh();
        app.pump().unwrap();

        let svg = std::fs::read_to_string(overlay_path).unwrap();
        assert!(svg.starts_with("<svg"));
    }
}
