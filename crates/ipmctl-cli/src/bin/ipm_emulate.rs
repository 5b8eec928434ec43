//! iPM emulator
//!
//! Answers the iPM protocol on a serial port. Without `--device` it creates
//! a virtual pty pair and prints the port a controller should open.

use anyhow::{Context, Result};
use clap::Parser;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info};

use ipmctl_cli::virtual_ports::VirtualPorts;
use ipmctl_cli::{exit, exit_code, init_logging};
use ipmctl_core::prelude::*;

/// Emulate an intelligent power monitor
#[derive(Parser, Debug)]
#[command(name = "ipm_emulate", version, about, long_about = None)]
struct Args {
    /// Serve on this port instead of a new virtual pair
    #[arg(long)]
    device: Option<String>,

    /// Address with no instrument behind it (repeatable)
    #[arg(long, value_name = "N")]
    absent: Vec<Address>,

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
    let table = Arc::new(ProtocolTable::standard()?);

    // The pair lives until the emulator stops
    let (device, _ports) = match args.device {
        Some(device) => (device, None),
        None => {
            let ports = VirtualPorts::start()?;
            println!(
                "Emulator connecting to virtual serial port: {}",
                ports.instrument_port().display()
            );
            println!(
                "User clients connect to virtual serial port: {}",
                ports.user_port().display()
            );
            (ports.instrument_port().display().to_string(), Some(ports))
        }
    };

    let transport = Transport::open(&LinkConfig::new(&device))
        .with_context(|| format!("opening {}", device))?;
    let mut emulator = DeviceEmulator::new(transport, table).with_absent(args.absent);
    let served = emulator.listen()?;
    info!("Emulator stopped after {} command(s)", served);
    Ok(())
}
