use anyhow::Result;
use rxtune_sys::XdpProgram;
use rxtuned::FileLock;
use signal_hook::{
    consts::{SIGINT, SIGTERM},
    iterator::Signals,
};
use tracing::level_filters::LevelFilter;
use tracing::{error, info, warn};

/// Configure a highly detailed logging system.
pub fn set_console_logging() -> anyhow::Result<()> {
    // install global collector configured based on RUST_LOG env var.
    let level = if let Ok(level) = std::env::var("RUST_LOG") {
        match level.to_lowercase().as_str() {
            "trace" => LevelFilter::TRACE,
            "debug" => LevelFilter::DEBUG,
            "info" => LevelFilter::INFO,
            "warn" => LevelFilter::WARN,
            "error" => LevelFilter::ERROR,
            _ => LevelFilter::INFO,
        }
    } else {
        LevelFilter::INFO
    };

    let subscriber = tracing_subscriber::fmt()
        .with_max_level(level)
        // Use a more compact, abbreviated log format
        .compact()
        // Display source code file paths
        .with_file(true)
        // Display source code line numbers
        .with_line_number(true)
        // Display the thread ID an event was recorded on
        .with_thread_ids(false)
        // Don't display the event's target (module path)
        .with_target(false)
        // Build the subscriber
        .finish();

    // Set the subscriber as the default
    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}

fn main() -> Result<()> {
    // Set up logging
    set_console_logging()?;

    // Check that the file lock is available. Bail out if it isn't.
    let file_lock = FileLock::new().inspect_err(|e| {
        error!("Unable to acquire file lock: {:?}", e);
        std::process::exit(0);
    })?;

    // Announce startup
    info!("rxtune daemon starting");

    let (config, settings) = rxtuned::configure()?;
    let interface = config.interface.clone();

    // Handle signals before the tuner touches the interface, so an early
    // SIGTERM still detaches XDP and releases the lock.
    let mut signals = Signals::new([SIGINT, SIGTERM])?;
    let signal_interface = interface.clone();
    std::thread::Builder::new()
        .name("Signal Handler".to_string())
        .spawn(move || {
            if let Some(sig) = signals.forever().next() {
                match sig {
                    SIGINT => warn!("Terminating on SIGINT"),
                    SIGTERM => warn!("Terminating on SIGTERM"),
                    _ => warn!("Terminating on signal {sig}"),
                }
                if let Err(e) = XdpProgram::detach(&signal_interface) {
                    warn!("{e}");
                }
                FileLock::remove_lock();
                std::process::exit(0);
            }
        })?;

    let tuner = rxtuned::start_tuner(config, settings)?;

    // The tuner only comes back on a fatal error. Its platform detaches
    // XDP as it drops.
    match tuner.join() {
        Ok(Ok(never)) => match never {},
        Ok(Err(e)) => error!("Tuner stopped: {e}"),
        Err(_) => {
            error!("Tuner thread panicked");
            if let Err(e) = XdpProgram::detach(&interface) {
                warn!("{e}");
            }
        }
    }
    std::mem::drop(file_lock);
    std::process::exit(1);
}
