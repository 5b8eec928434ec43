//! iPM controller
//!
//! Power-cycles the iPM, verifies the configured addresses and then polls
//! them, forwarding decoded lines over UDP. With `--command` it sends a
//! single command to one address and exits; `--interactive` reads commands
//! from stdin instead.

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use ipmctl_cli::interactive::{print_response, run_session};
use ipmctl_cli::{exit, exit_code, init_logging};
use ipmctl_core::prelude::*;
use ipmctl_core::transport::list_ports;

/// Operate an intelligent power monitor
#[derive(Parser, Debug)]
#[command(name = "ipm_ctrl", version, about, long_about = None)]
struct Args {
    /// Serial port the iPM is connected to
    #[arg(long)]
    device: Option<String>,

    /// Baud rate
    #[arg(long)]
    baud: Option<u32>,

    /// JSON configuration file
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Address for --command
    #[arg(long, value_name = "N")]
    address: Option<Address>,

    /// Send one command (e.g. "STATUS?") to --address and exit
    #[arg(long, value_name = "CMD", conflicts_with = "interactive")]
    command: Option<String>,

    /// Type commands at a prompt instead of sampling
    #[arg(short, long)]
    interactive: bool,

    /// Interval between STATUS/MEASURE passes in milliseconds
    #[arg(long)]
    interval_ms: Option<u64>,

    /// Period of RECORD queries in minutes
    #[arg(long)]
    record_period_min: Option<u64>,

    /// Stop after this many passes instead of running until killed
    #[arg(long)]
    passes: Option<u64>,

    /// Send raw hex values downstream instead of scaled ones
    #[arg(long)]
    hex: bool,

    /// The other end is the emulator: allow slower replies and stop it on exit
    #[arg(long)]
    emulator: bool,

    /// List serial ports and exit
    #[arg(long)]
    list_ports: bool,

    /// Show debug log messages
    #[arg(short, long)]
    debug: bool,
}

fn main() -> ExitCode {
    let args = Args::parse();
    init_logging(args.debug);

    match run(args) {
        Ok(()) => ExitCode::from(exit::SUCCESS),
        Err(e) => {
            error!("{:#}", e);
            ExitCode::from(exit_code(&e))
        }
    }
}

fn run(args: Args) -> Result<()> {
    if args.list_ports {
        for port in list_ports() {
            match &port.product {
                Some(product) => println!("{}\t{}", port.name, product),
                None => println!("{}", port.name),
            }
        }
        return Ok(());
    }

    let config = load_config(&args)?;
    let table = Arc::new(ProtocolTable::standard()?);

    let mut policy = config.read_policy;
    if args.emulator {
        policy = policy.scaled(3);
    }

    let transport = Transport::open(&config.link)
        .with_context(|| format!("opening {}", config.link.port_name))?;
    let mut controller = DeviceController::new(transport, table, policy);

    let result = match &args.command {
        Some(command) => {
            let address = args.address.unwrap_or_default();
            single_command(&mut controller, address, command)
        }
        None if args.interactive => {
            run_session(&mut controller, std::io::stdin().lock(), std::io::stdout())
        }
        None => run_loop(&mut controller, &config, args.passes),
    };

    let (tx, rx) = controller.counters();
    debug!("Link traffic: {} bytes sent, {} received", tx, rx);
    if args.emulator {
        if let Err(e) = controller.stop_emulator() {
            warn!("Could not stop the emulator: {}", e);
        }
    }
    result
}

/// Config file (or defaults) with command line overrides applied
fn load_config(args: &Args) -> Result<ControllerConfig> {
    let mut config = match &args.config {
        Some(path) => ControllerConfig::from_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => ControllerConfig::default(),
    };

    if let Some(device) = &args.device {
        config.link.port_name = device.clone();
    }
    if let Some(baud) = args.baud {
        config.link.baud_rate = baud;
    }
    if let Some(interval) = args.interval_ms {
        config.measure_interval_ms = interval;
    }
    if let Some(period) = args.record_period_min {
        config.record_period_min = period;
    }
    if args.hex {
        config.value_format = ValueFormat::Hex;
    }

    if config.link.port_name.is_empty() {
        return Err(ConfigError::Validation(
            "no serial port given; use --device or set link.port_name".into(),
        )
        .into());
    }
    config.validate()?;
    Ok(config)
}

fn single_command(controller: &mut DeviceController, address: Address, text: &str) -> Result<()> {
    let command = Command::parse(text)?;

    if !matches!(command, Command::SelectAddress(_)) {
        controller.execute(&Command::SelectAddress(address))?;
    }
    let response = controller.execute(&command)?;
    print_response(controller.table(), &command, &response, &mut std::io::stdout())
}

fn run_loop(
    controller: &mut DeviceController,
    config: &ControllerConfig,
    passes: Option<u64>,
) -> Result<()> {
    let verified = controller.initialize(&config.candidates())?;
    if verified.is_empty() {
        anyhow::bail!("no address passed verification");
    }

    let mut sink = UdpSink::new(config.udp_host.clone(), config.udp_ports())
        .context("opening downstream socket")?;
    let interval = Duration::from_millis(config.measure_interval_ms);
    let record_period = Duration::from_secs(config.record_period_min.saturating_mul(60));
    let mut last_record: Option<Instant> = None;
    let mut pass = 0u64;

    info!(
        "Sampling {} address(es) every {} ms, RECORD every {} min",
        verified.len(),
        config.measure_interval_ms,
        config.record_period_min
    );

    loop {
        let started = Instant::now();
        let record_due = last_record.map_or(true, |at| at.elapsed() >= record_period);

        for &address in &verified {
            let queries = config
                .address(address)
                .map(|entry| entry.procqueries)
                .unwrap_or_default();
            for kind in queries.kinds() {
                if kind == FrameKind::Record && !record_due {
                    continue;
                }
                let Some(frame) = controller.poll(address, kind)? else {
                    continue;
                };
                let line = format_line(&frame, Utc::now(), config.value_format);
                info!("{}: {}", address, line.trim_end());
                if let Err(e) = sink.send_line(address, &line) {
                    warn!("Downstream send for address {} failed: {}", address, e);
                }
            }
        }

        if record_due {
            last_record = Some(started);
        }
        pass += 1;
        if passes.is_some_and(|limit| pass >= limit) {
            info!("Stopping after {} pass(es)", pass);
            return Ok(());
        }
        if let Some(rest) = interval.checked_sub(started.elapsed()) {
            std::thread::sleep(rest);
        }
    }
}
