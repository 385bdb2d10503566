// Lagcam - laggy virtual camera replay
// Main library entry point

pub mod camera;
pub mod cancel;
pub mod commands;
pub mod config;
pub mod control;
pub mod gstreamer_init;
pub mod notifications;
pub mod playback;
pub mod session;
pub mod video;

#[cfg(test)]
mod testing;

use anyhow::Context;
use std::io::BufRead;
use std::path::PathBuf;
use std::sync::Arc;

use crate::commands::Command;
use crate::control::ControlPlane;
use crate::notifications::ChannelNotifier;
use crate::session::SessionController;

/// Progress events buffered for the printer thread
const NOTIFICATION_CAPACITY: usize = 256;

/// Exit status after an interrupt (128 + SIGINT)
const INTERRUPTED_EXIT_CODE: i32 = 130;

/// Command line options
#[derive(Debug, Default)]
struct Args {
    config_path: Option<PathBuf>,
    verbose: bool,
    write_config: bool,
}

impl Args {
    fn parse() -> anyhow::Result<Self> {
        let mut args = Self::default();
        let mut iter = std::env::args().skip(1);
        while let Some(arg) = iter.next() {
            match arg.as_str() {
                "--config" => {
                    let path = iter.next().context("--config needs a path")?;
                    args.config_path = Some(PathBuf::from(path));
                }
                "-v" | "--verbose" => args.verbose = true,
                "--write-config" => args.write_config = true,
                other => anyhow::bail!("Unknown argument: {}", other),
            }
        }
        Ok(args)
    }
}

/// Run the lagcam control loop on stdin until `quit` or end of input
pub fn run() -> anyhow::Result<()> {
    let args = Args::parse()?;

    let default_level = if args.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .init();

    let config_path = args
        .config_path
        .unwrap_or_else(config::default_config_path);
    let config = config::Config::load_or_default(&config_path);

    if args.write_config {
        config
            .save(&config_path)
            .with_context(|| format!("Failed to write config to {:?}", config_path))?;
        println!("Wrote {}", config_path.display());
        return Ok(());
    }

    gstreamer_init::init_gstreamer();
    if !gstreamer_init::is_gstreamer_available() {
        anyhow::bail!("GStreamer is not available");
    }

    let control: Arc<dyn ControlPlane> = Arc::new(control::GstRecorder::new(
        config.clip_path.clone(),
        config.capture_device.clone(),
    ));
    let backend = Arc::new(playback::GstMediaBackend::new(
        config.camera_device.clone(),
        config.playback.default_fps,
    ));

    let (notifier, events) = ChannelNotifier::bounded(NOTIFICATION_CAPACITY);
    std::thread::Builder::new()
        .name("lagcam-events".into())
        .spawn(move || {
            for event in events {
                match serde_json::to_string(&event) {
                    Ok(line) => println!("{}", line),
                    Err(e) => log::warn!("Failed to serialize event: {}", e),
                }
            }
        })
        .context("Failed to spawn event printer")?;

    if let Err(e) = control.switch_to_record() {
        log::warn!("Failed to set initial record routing: {}", e);
    }

    let controller = Arc::new(SessionController::new(
        config,
        control,
        backend,
        Arc::new(notifier),
    ));
    install_signal_cleanup(controller.clone())?;
    log::info!("Lagcam ready (commands: start, stop, status, quit)");

    let result = command_loop(&controller);
    controller.shutdown();
    result
}

/// Stop the session and restore routing on Ctrl+C or SIGTERM, then exit
fn install_signal_cleanup(controller: Arc<SessionController>) -> anyhow::Result<()> {
    ctrlc::set_handler(move || {
        log::info!("Interrupted, shutting down");
        controller.shutdown();
        std::process::exit(INTERRUPTED_EXIT_CODE);
    })
    .context("Failed to install signal handler")
}

/// Read commands from stdin until `quit` or end of input
fn command_loop(controller: &SessionController) -> anyhow::Result<()> {
    let stdin = std::io::stdin();
    for line in stdin.lock().lines() {
        let line = line.context("Failed to read stdin")?;
        if line.trim().is_empty() {
            continue;
        }

        let Some(command) = Command::parse(&line) else {
            eprintln!("Unknown command: {}", line.trim());
            continue;
        };

        if command == Command::Quit {
            return Ok(());
        }
        match commands::execute(controller, command) {
            Ok(reply) => println!("{}", reply),
            Err(e) => eprintln!("{}", e),
        }
    }
    Ok(())
}
