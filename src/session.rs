//! Control session: the UDP link to one discovered robot.
//!
//! The channel is stateless-refresh: every heartbeat retransmits the whole
//! absolute command state, and the robot re-derives its behavior from the
//! latest packet. The journaled `control-dict` line and the transmitted
//! datagram are the same bytes.

use std::io;
use std::net::{SocketAddr, UdpSocket};
use std::time::{Duration, Instant};

use crate::error::{Error, Result};
use crate::message_log::MessageLog;
use crate::protocol::{wall_time, Telemetry};
use crate::station::ControlStation;

pub struct Session {
    socket: UdpSocket,
    target: SocketAddr,
    interval: Duration,
    next_send: Instant,
    messages: MessageLog,
    buf: Vec<u8>,
}

impl Session {
    /// Open the control socket toward `target`. The first heartbeat goes
    /// out on the next tick.
    pub fn connect(target: SocketAddr, interval: Duration, messages: MessageLog) -> Result<Self> {
        let socket = UdpSocket::bind(("0.0.0.0", 0))?;
        socket.set_nonblocking(true)?;
        messages.info("control", format!("Connecting to {}", target));
        Ok(Self {
            socket,
            target,
            interval,
            next_send: Instant::now(),
            messages,
            buf: vec![0; 65536],
        })
    }

    pub fn target(&self) -> SocketAddr {
        self.target
    }

    pub fn local_port(&self) -> Result<u16> {
        Ok(self.socket.local_addr()?.port())
    }

    /// How long the event loop may sleep before the next heartbeat is due.
    pub fn time_to_next(&self, now: Instant) -> Duration {
        self.next_send.saturating_duration_since(now)
    }

    /// Send the heartbeat if it is due.
    pub fn tick(&mut self, station: &mut ControlStation, now: Instant) -> Result<()> {
        if now >= self.next_send {
            self.send_control(station)?;
            self.next_send = now + self.interval;
        }
        Ok(())
    }

    /// Transmit the current command state: bump `seq`, stamp the send time,
    /// journal the exact line, send it. Fires the one-shot `video_start`
    /// hook once the link has carried a few heartbeats.
    pub fn send_control(&mut self, station: &mut ControlStation) -> Result<()> {
        station.command.seq += 1;
        station.command.cli_time = Some(wall_time());
        let value = serde_json::to_value(&station.command)?;
        let line = serde_json::to_string(&value)?;
        station.journal_append(&line)?;
        if let Err(e) = self.socket.send_to(line.as_bytes(), self.target) {
            self.messages
                .warn("control", format!("Control send failed: {}", e));
        }
        if station.command.seq == 3 {
            station.video_start();
        }
        Ok(())
    }

    /// Drain pending telemetry into the station. A datagram from anywhere
    /// but the connected peer is a session-consistency violation and fatal;
    /// malformed telemetry from the right peer is dropped with a warning.
    pub fn poll(&mut self, station: &mut ControlStation) -> Result<()> {
        loop {
            let (len, source) = match self.socket.recv_from(&mut self.buf) {
                Ok(pair) => pair,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(()),
                Err(e) => {
                    self.messages
                        .error("control", format!("Cannot read response: {}", e));
                    return Ok(());
                }
            };
            if source != self.target {
                return Err(Error::PeerMismatch {
                    got: source,
                    expected: self.target,
                });
            }
            match Telemetry::decode(&self.buf[..len]) {
                Ok(telemetry) => station.ingest_telemetry(telemetry)?,
                Err(e) => self
                    .messages
                    .warn("control", format!("Dropping malformed telemetry: {}", e)),
            }
        }
    }
}
