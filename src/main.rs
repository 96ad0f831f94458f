//! RingRemap - Ring Controller Remapping Engine
//!
//! Turns raw events from a ring-style Bluetooth pointing controller into
//! high-level intents (tap, hold, double-tap, gesture combos, smooth scroll)
//! and injects them as synthetic input through a uinput virtual device.

mod actions;
mod buttons;
mod config;
mod dispatch;
mod error;
mod gesture;
mod monitor;
mod scroll;
mod sink;
mod source;
mod timer;

use anyhow::{Context, Result, bail};
use config::Config;
use dispatch::{Engine, LogNotifier, collect_actions};
use monitor::{DeviceMonitor, MonitorEvent};
use sink::UinputSink;
use source::{EvdevSource, InputSource};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};
use tracing::info;

const USAGE: &str = "\
ringremap - ring controller remapping engine

USAGE:
    ringremap [OPTIONS]

OPTIONS:
    --config <path>    Use this config file instead of the default location
    --list-devices     Print enumerated input devices and exit
    --check-config     Validate the config file and exit
    --init-config      Write a default config file and exit
    --help             Show this help
";

struct CliArgs {
    config: Option<PathBuf>,
    list_devices: bool,
    check_config: bool,
    init_config: bool,
    help: bool,
}

impl CliArgs {
    fn parse(mut args: impl Iterator<Item = String>) -> Result<Self> {
        let mut parsed = CliArgs {
            config: None,
            list_devices: false,
            check_config: false,
            init_config: false,
            help: false,
        };

        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--config" => {
                    let path = args.next().context("--config requires a path")?;
                    parsed.config = Some(PathBuf::from(path));
                }
                "--list-devices" => parsed.list_devices = true,
                "--check-config" => parsed.check_config = true,
                "--init-config" => parsed.init_config = true,
                "--help" | "-h" => parsed.help = true,
                other => bail!("unknown argument '{other}' (try --help)"),
            }
        }

        Ok(parsed)
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();

    let args = CliArgs::parse(std::env::args().skip(1))?;
    if args.help {
        print!("{USAGE}");
        return Ok(());
    }

    if args.init_config {
        let config = Config::default();
        config.save(args.config.as_deref())?;
        return Ok(());
    }

    let config = Config::load(args.config.as_deref())?;

    if args.check_config {
        config.validate()?;
        println!("config OK");
        return Ok(());
    }

    if args.list_devices {
        return list_devices(&config);
    }

    run(config)
}

fn list_devices(config: &Config) -> Result<()> {
    let mut source = EvdevSource::new(config.buttons.codes.clone());
    let mut devices = source.enumerate();
    devices.sort_by_key(|caps| caps.id);

    for caps in devices {
        let candidate = caps.is_pointing && caps.id.0 >= config.device.min_device_id;
        println!(
            "{}: '{}' pointing={}{}",
            caps.id,
            caps.name,
            caps.is_pointing,
            if candidate { "  <- candidate" } else { "" }
        );
    }
    Ok(())
}

fn run(config: Config) -> Result<()> {
    info!("ringremap starting...");

    let stop = Arc::new(AtomicBool::new(false));
    {
        let stop = stop.clone();
        ctrlc::set_handler(move || stop.store(true, Ordering::Relaxed))
            .context("Failed to install signal handler")?;
    }

    let actions = collect_actions(&config);
    let sink = UinputSink::from_actions(actions.iter())
        .context("Failed to create virtual output device")?;
    let source = EvdevSource::new(config.buttons.codes.clone());

    // All timeouts run on this monotonic millisecond tick
    let start = Instant::now();
    let mut monitor = DeviceMonitor::new(source, config.device.clone(), 0);
    let mut engine = Engine::new(&config, sink, LogNotifier);
    let mut events = Vec::new();

    while !stop.load(Ordering::Relaxed) {
        let now = start.elapsed().as_millis() as u64;

        match monitor.poll(now, &mut events) {
            Ok(MonitorEvent::Quiet) => {}
            Ok(MonitorEvent::Bound(id)) => engine.device_bound(id),
            Ok(MonitorEvent::Lost(id)) => engine.device_lost(id),
            Err(e) => return Err(e).context("device binding failed"),
        }

        let had_events = !events.is_empty();
        for event in events.drain(..) {
            engine.handle_event(event, now);
        }
        engine.advance(now);

        if !had_events {
            // Sleep toward the next timer deadline, capped so hardware
            // events stay responsive
            let sleep_ms = engine
                .next_deadline()
                .map(|deadline| deadline.saturating_sub(now).clamp(1, 5))
                .unwrap_or(5);
            thread::sleep(Duration::from_millis(sleep_ms));
        }
    }

    if let Some(id) = monitor.bound_device() {
        info!("Releasing {}", id);
    }
    info!("ringremap shutting down");
    Ok(())
}
