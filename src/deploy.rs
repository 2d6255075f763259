//! Deploy action for robots discovered without a running server.
//!
//! Fire-and-forget: the script is spawned, a waiter thread logs its exit
//! status, and nothing else feeds back into protocol state.

use std::net::IpAddr;
use std::process::Command;
use std::thread;

use crate::config::DeployConfig;
use crate::error::{Error, Result};
use crate::message_log::MessageLog;

/// One-shot deploy trigger, fired by the discovery listener at most once.
pub trait DeployAction: Send {
    fn trigger(&mut self, target: IpAddr) -> Result<()>;
}

/// Runs the configured deploy script with argument `start` and the target
/// host in its `RHOST` environment.
pub struct ScriptDeploy {
    config: DeployConfig,
    messages: MessageLog,
}

impl ScriptDeploy {
    pub fn new(config: DeployConfig, messages: MessageLog) -> Self {
        Self { config, messages }
    }
}

impl DeployAction for ScriptDeploy {
    fn trigger(&mut self, target: IpAddr) -> Result<()> {
        let rhost = format!("{}@{}", self.config.remote_user, target);
        self.messages.warn(
            "deploy",
            format!("Running: RHOST={} {} start", rhost, self.config.script),
        );
        let child = Command::new(&self.config.script)
            .arg("start")
            .env("RHOST", &rhost)
            .spawn()
            .map_err(|e| Error::Deploy(format!("cannot launch {}: {}", self.config.script, e)))?;

        let messages = self.messages.clone();
        thread::spawn(move || {
            let mut child = child;
            match child.wait() {
                Ok(status) => messages.warn("deploy", format!("Process exited, {}", status)),
                Err(e) => messages.error("deploy", format!("Process wait failed: {}", e)),
            }
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};

    #[test]
    fn test_missing_script_is_an_error() {
        let messages = MessageLog::new(8);
        let mut deploy = ScriptDeploy::new(
            DeployConfig {
                script: "/nonexistent/deploy-script".to_string(),
                remote_user: "odroid".to_string(),
            },
            messages.clone(),
        );
        let err = deploy.trigger("10.0.0.9".parse().unwrap()).unwrap_err();
        assert!(matches!(err, Error::Deploy(_)));
        // The launch announcement still lands before the failure.
        assert!(messages
            .panel_lines()
            .iter()
            .any(|l| l.contains("RHOST=odroid@10.0.0.9")));
    }

    #[test]
    fn test_waiter_logs_exit_status() {
        let messages = MessageLog::new(8);
        let mut deploy = ScriptDeploy::new(
            DeployConfig {
                script: "true".to_string(),
                remote_user: "odroid".to_string(),
            },
            messages.clone(),
        );
        deploy.trigger("127.0.0.1".parse().unwrap()).unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            if messages
                .panel_lines()
                .iter()
                .any(|l| l.contains("Process exited"))
            {
                break;
            }
            assert!(Instant::now() < deadline, "waiter never reported exit");
            thread::sleep(Duration::from_millis(10));
        }
    }
}
