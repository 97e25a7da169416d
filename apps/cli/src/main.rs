mod console;

use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use candy_core::{
    CandyConfig, CandyEvent, Controller, DeviceBackend, DeviceDescriptor, DeviceSession,
    DeviceWatcher, LookupTable, NusbBackend, OpenContext, Rgb, TransferExecutor, VideoFrame,
};
use clap::{Parser, Subcommand, ValueEnum};
use tracing::{error, info, warn};

use crate::console::{ConsoleObserver, StdinPrompt};

#[derive(Parser, Debug)]
#[command(author, version, about = "Fadecandy USB tool (Pure Rust)", long_about = None)]
struct Args {
    /// Path to a TOML config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Extra open attempts after a retryable failure
    #[arg(long, global = true)]
    open_retries: Option<u32>,

    /// Pause between open attempts
    #[arg(long, global = true)]
    retry_delay_ms: Option<u64>,

    /// Ask on stdin before opening the device
    #[arg(long, global = true)]
    ask: bool,

    /// How long to wait for a device to show up
    #[arg(long, global = true, default_value_t = 0)]
    wait_ms: u64,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List attached devices and whether they match the filter
    List,
    /// Print attach/detach events until interrupted
    Watch {
        /// Stop after this many seconds
        #[arg(long)]
        seconds: Option<u64>,

        /// Open the device when it appears and reopen it after a replug
        #[arg(long)]
        connect: bool,
    },
    /// Switch the status LED
    Led {
        #[arg(value_enum)]
        state: LedState,
    },
    /// Upload a color look-up table
    Lut {
        /// Gamma exponent; linear when omitted
        #[arg(long)]
        gamma: Option<f64>,
    },
    /// Paint every LED one color
    Fill { r: u8, g: u8, b: u8 },
    /// Turn every LED off
    Clear,
    /// Manage the config file
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum LedState {
    On,
    Off,
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    /// Write a config file with default values
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
    /// Print the effective configuration
    Show,
}

fn main() {
    let args = Args::parse();

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::builder()
                .with_default_directive(if args.verbose {
                    tracing::Level::DEBUG.into()
                } else {
                    tracing::Level::INFO.into()
                })
                .from_env_lossy(),
        )
        .with_writer(std::io::stderr)
        .finish();

    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    if let Err(e) = run(&args) {
        error!("Error: {:#}", e);
        std::process::exit(1);
    }
}

fn run(args: &Args) -> Result<()> {
    let mut config = load_config(args)?;
    if let Some(retries) = args.open_retries {
        config.open_retries = retries;
    }
    if let Some(delay) = args.retry_delay_ms {
        config.retry_delay_ms = delay;
    }

    let backend: Arc<dyn DeviceBackend> =
        Arc::new(NusbBackend::with_instance_tag(config.instance_tag));

    match &args.command {
        Command::List => list(&backend, &config),
        Command::Watch { seconds, connect } => watch(
            args,
            &backend,
            &config,
            seconds.map(Duration::from_secs),
            *connect,
        ),
        Command::Led { state } => with_controller(args, &backend, &config, |controller| {
            match state {
                LedState::On => controller.led_on(),
                LedState::Off => controller.led_off(),
            }
        }),
        Command::Lut { gamma } => {
            let lut = match gamma {
                Some(g) => LookupTable::with_gamma(*g)?,
                None => LookupTable::linear(),
            };
            with_controller(args, &backend, &config, |controller| controller.send_lut(&lut))
        }
        Command::Fill { r, g, b } => {
            let mut video = VideoFrame::blank();
            video.fill(Rgb::new(*r, *g, *b));
            with_controller(args, &backend, &config, |controller| {
                controller.send_video(&video)
            })
        }
        Command::Clear => with_controller(args, &backend, &config, |controller| {
            controller.send_video(&VideoFrame::blank())
        }),
        Command::Config { action } => config_command(args, &config, action),
    }
}

fn load_config(args: &Args) -> Result<CandyConfig> {
    match &args.config {
        Some(path) if path.exists() => CandyConfig::load_from_file(path)
            .with_context(|| format!("loading {}", path.display())),
        _ => Ok(CandyConfig::default()),
    }
}

fn list(backend: &Arc<dyn DeviceBackend>, config: &CandyConfig) -> Result<()> {
    let devices = backend.enumerate()?;
    if devices.is_empty() {
        println!("No USB devices found");
        return Ok(());
    }

    for device in devices {
        let marker = if config.filter.matches(&device) { "*" } else { " " };
        println!("{} {}", marker, device);
    }
    Ok(())
}

fn watch(
    args: &Args,
    backend: &Arc<dyn DeviceBackend>,
    config: &CandyConfig,
    duration: Option<Duration>,
    connect: bool,
) -> Result<()> {
    info!(selector = %config.filter.selector(), "Watching for devices");

    let session = DeviceSession::new(Arc::clone(backend));
    session.subscribe(Arc::new(ConsoleObserver));
    let prompt = StdinPrompt;
    let context = open_context(args, &prompt);

    let handle = DeviceWatcher::new(Arc::clone(backend), config.filter.clone())
        .with_poll_interval(config.poll_interval())
        .spawn();

    let deadline = duration.map(|d| std::time::Instant::now() + d);
    loop {
        let event = match deadline {
            Some(deadline) => {
                let remaining = deadline.saturating_duration_since(std::time::Instant::now());
                if remaining.is_zero() {
                    break;
                }
                handle.recv_timeout(remaining)
            }
            None => handle.recv(),
        };

        match event {
            Some(CandyEvent::DeviceAdded(device)) => {
                println!("+ {}", device);
                if connect {
                    let outcome = match session.reconnect(&device, context) {
                        Some(result) => result.map_err(|e| anyhow!("{} ({})", e, e.reason())),
                        None if !session.is_open() => {
                            open_with_retry(&session, &device, context, config)
                        }
                        None => Ok(()),
                    };
                    if let Err(e) = outcome {
                        warn!("{:#}", e);
                    }
                }
            }
            Some(CandyEvent::DeviceRemoved { id }) => {
                println!("- {}", id);
                session.device_removed(&id);
            }
            Some(_) => {}
            None if deadline.is_some() => {}
            None => bail!("Device watcher stopped unexpectedly"),
        }
    }

    handle.stop();
    session.close();
    Ok(())
}

fn open_context<'a>(args: &Args, prompt: &'a StdinPrompt) -> OpenContext<'a> {
    if args.ask {
        OpenContext::with_consent(prompt)
    } else {
        OpenContext::unattended()
    }
}

/// Find a device, open it, run `action`, close.
fn with_controller<F>(
    args: &Args,
    backend: &Arc<dyn DeviceBackend>,
    config: &CandyConfig,
    action: F,
) -> Result<()>
where
    F: FnOnce(&Controller) -> candy_core::TransferResult,
{
    let mut watcher = DeviceWatcher::new(Arc::clone(backend), config.filter.clone())
        .with_poll_interval(config.poll_interval());
    let device = watcher
        .wait_for_device(Duration::from_millis(args.wait_ms))
        .ok_or_else(|| anyhow!("No device matching {} found", config.filter.selector()))?;

    let session = Arc::new(DeviceSession::new(Arc::clone(backend)));
    session.subscribe(Arc::new(ConsoleObserver));

    let prompt = StdinPrompt;
    let context = open_context(args, &prompt);
    open_with_retry(&session, &device, context, config)?;

    let controller = Controller::new(
        Arc::clone(&session),
        TransferExecutor::new(config.packet_timeout()),
    );
    let result = action(&controller);
    session.close();

    let written = result?;
    info!(bytes_written = written, "Done");
    Ok(())
}

fn open_with_retry(
    session: &DeviceSession,
    device: &DeviceDescriptor,
    context: OpenContext<'_>,
    config: &CandyConfig,
) -> Result<()> {
    let mut attempt = 0;
    loop {
        match session.open(device, context) {
            Ok(()) => return Ok(()),
            Err(e) if e.is_retryable() && attempt < config.open_retries => {
                attempt += 1;
                warn!(attempt, max = config.open_retries, error = %e, "Open failed, retrying");
                thread::sleep(config.retry_delay());
            }
            Err(e) => {
                return Err(anyhow!(
                    "Failed to open {}: {} ({})",
                    device.id(),
                    e,
                    e.reason()
                ));
            }
        }
    }
}

fn config_command(args: &Args, config: &CandyConfig, action: &ConfigAction) -> Result<()> {
    match action {
        ConfigAction::Init { force } => {
            let path = args
                .config
                .clone()
                .unwrap_or_else(|| PathBuf::from("candy.toml"));
            if path.exists() && !force {
                bail!("{} already exists (use --force to overwrite)", path.display());
            }
            CandyConfig::default()
                .save_to_file(&path)
                .with_context(|| format!("writing {}", path.display()))?;
            println!("Wrote {}", path.display());
        }
        ConfigAction::Show => {
            print!("{}", toml::to_string_pretty(config)?);
        }
    }
    Ok(())
}
