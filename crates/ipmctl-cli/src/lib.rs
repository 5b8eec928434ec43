//! Shared pieces of the `ipm_ctrl` and `ipm_emulate` binaries

pub mod interactive;
pub mod virtual_ports;

use ipmctl_core::config::ConfigError;
use ipmctl_core::protocol::ProtocolError;
use tracing_subscriber::EnvFilter;

/// Process exit codes
pub mod exit {
    /// Normal completion
    pub const SUCCESS: u8 = 0;
    /// Anything not classified below
    pub const FAILURE: u8 = 1;
    /// Bad configuration file, table or arguments
    pub const CONFIG: u8 = 2;
    /// The link could not be opened or broke
    pub const CONNECTION: u8 = 3;
    /// A fatal command was not acknowledged
    pub const PROTOCOL: u8 = 4;
}

/// Install the console subscriber.
///
/// `RUST_LOG` wins over the flag when it is set.
pub fn init_logging(debug: bool) {
    let default = if debug { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

/// Exit code for an error returned from `main`
pub fn exit_code(err: &anyhow::Error) -> u8 {
    for cause in err.chain() {
        if let Some(e) = cause.downcast_ref::<ProtocolError>() {
            return if e.is_link_failure() {
                exit::CONNECTION
            } else if e.is_configuration() {
                exit::CONFIG
            } else {
                exit::PROTOCOL
            };
        }
        if cause.downcast_ref::<ConfigError>().is_some() {
            return exit::CONFIG;
        }
    }
    exit::FAILURE
}
