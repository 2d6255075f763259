//! Announce listener: discovers the robot and decides when to connect.
//!
//! The robot launcher broadcasts announce datagrams periodically. The
//! listener logs identity and run-state transitions, optionally triggers a
//! one-shot deploy, and promotes to a control session exactly once, when the
//! announced server is demonstrably up.

use std::io;
use std::net::{SocketAddr, UdpSocket};

use crate::deploy::DeployAction;
use crate::error::Result;
use crate::message_log::MessageLog;
use crate::protocol::Announce;

pub struct AnnounceListener {
    socket: UdpSocket,
    messages: MessageLog,
    deploy: Option<Box<dyn DeployAction>>,
    deploying: bool,
    /// `running_since` seen when deploy was triggered; the restarted server
    /// must announce something newer before we connect
    baseline_running_since: Option<f64>,
    last_identity: Option<String>,
    last_run_state: Option<String>,
    buf: Vec<u8>,
}

impl AnnounceListener {
    /// Bind the broadcast-receive socket. Pass `deploy: None` to connect
    /// without ever triggering the deploy action.
    pub fn bind(
        port: u16,
        messages: MessageLog,
        deploy: Option<Box<dyn DeployAction>>,
    ) -> Result<Self> {
        messages.info("announce", format!("Binding to port {}", port));
        let socket = UdpSocket::bind(("0.0.0.0", port))?;
        socket.set_broadcast(true)?;
        socket.set_nonblocking(true)?;
        messages.info("announce", "Waiting for address broadcast".to_string());
        Ok(Self {
            socket,
            messages,
            deploy,
            deploying: false,
            baseline_running_since: None,
            last_identity: None,
            last_run_state: None,
            buf: vec![0; 65536],
        })
    }

    pub fn local_port(&self) -> Result<u16> {
        Ok(self.socket.local_addr()?.port())
    }

    /// Drain pending announces. Returns the control endpoint to connect to
    /// once promotion conditions hold; malformed datagrams are dropped with
    /// a warning.
    pub fn poll(&mut self, session_active: bool) -> Result<Option<SocketAddr>> {
        loop {
            let (len, source) = match self.socket.recv_from(&mut self.buf) {
                Ok(pair) => pair,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(None),
                Err(e) => return Err(e.into()),
            };
            let announce = match Announce::decode(&self.buf[..len], source) {
                Ok(announce) => announce,
                Err(e) => {
                    self.messages.warn(
                        "announce",
                        format!("Dropping malformed announce from {}: {}", source, e),
                    );
                    continue;
                }
            };
            if let Some(target) = self.handle_announce(&announce, session_active) {
                return Ok(Some(target));
            }
        }
    }

    fn handle_announce(&mut self, announce: &Announce, session_active: bool) -> Option<SocketAddr> {
        let identity = announce.identity_line();
        if self.last_identity.as_deref() != Some(identity.as_str()) {
            self.messages.info("announce", identity.clone());
            self.last_identity = Some(identity);
        }
        let run_state = announce.run_line();
        if self.last_run_state.as_deref() != Some(run_state.as_str()) {
            self.messages.info("announce", run_state.clone());
            self.last_run_state = Some(run_state);
        }

        // One session per listener lifetime; later announces only feed the
        // transition log above.
        if session_active {
            return None;
        }

        if let Some(deploy) = self.deploy.as_mut() {
            if !self.deploying {
                // Deploy restarts the server, so hold off connecting while
                // the announces still describe the old instance.
                self.baseline_running_since = announce.running_since;
                self.deploying = true;
                if let Err(e) = deploy.trigger(announce.addr) {
                    self.messages.error("announce", format!("Deploy failed: {}", e));
                }
            }
            if announce.running_since.is_none()
                || announce.running_since == self.baseline_running_since
            {
                return None;
            }
        }

        Some(announce.control_target())
    }
}
