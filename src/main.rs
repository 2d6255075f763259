//! sarathi-station: operator console for the walking robot.
//!
//! Listens for the robot launcher's announce broadcasts (or connects
//! directly with `--addr`), keeps the control link refreshed at a fixed
//! cadence, and journals every state change alongside the rendered overlay.

use std::env;
use std::fs;
use std::path::PathBuf;
use std::process;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use sarathi_station::config::{self, Options, StationConfig, USAGE};
use sarathi_station::journal::Journal;
use sarathi_station::message_log::MessageLog;
use sarathi_station::{Error, Result, StationApp};

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let options = match Options::parse(env::args().skip(1)) {
        Ok(options) => options,
        Err(e) => {
            eprintln!("{}", e);
            eprint!("{}", USAGE);
            process::exit(2);
        }
    };
    if options.help {
        print!("{}", USAGE);
        return;
    }

    if let Err(e) = run(&options) {
        log::error!("Fatal: {}", e);
        process::exit(1);
    }
}

fn run(options: &Options) -> Result<()> {
    let config = match &options.config_path {
        Some(path) => StationConfig::from_file(path)?,
        None => StationConfig::default(),
    };

    let log_dir = config::resolve_log_dir(options.log_dir.as_deref());
    if options.log_dir.is_none() {
        log::info!("Auto-detected logdir as {:?}", log_dir);
    }
    fs::create_dir_all(&log_dir)?;

    let prefix = log_dir.join(
        options
            .log_prefix
            .clone()
            .unwrap_or_else(config::default_log_prefix),
    );
    log::info!("Saving logs to {}.*", prefix.display());

    let messages = MessageLog::new(config.display.message_capacity);
    let mut text_log = prefix.clone().into_os_string();
    text_log.push(".log");
    messages.attach_file(PathBuf::from(text_log))?;
    let journal = Journal::create(&prefix)?;

    if options.check {
        log::info!("Check passed");
        return Ok(());
    }

    let running = Arc::new(AtomicBool::new(true));
    let r = Arc::clone(&running);
    ctrlc::set_handler(move || {
        log::info!("Received shutdown signal");
        r.store(false, Ordering::SeqCst);
    })
    .map_err(|e| Error::Other(format!("Error setting Ctrl-C handler: {}", e)))?;

    let mut app = StationApp::new(config, options, Some(journal), None, None, messages, running)?;
    log::info!("Running");
    app.run()
}
