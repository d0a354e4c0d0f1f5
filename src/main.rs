mod cli;

use anyhow::{Context, Result};
use clap::Parser;
use cli::Cli;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use usbvhcid::vhci::registry::Registry;

fn main() -> Result<()> {
    let args = Cli::parse();

    let subscriber = FmtSubscriber::builder()
        .with_max_level(match args.verbose {
            0 => Level::INFO,
            1 => Level::DEBUG,
            _ => Level::TRACE,
        })
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set global tracing subscriber")?;

    let registry = Registry::new();
    let controller = registry
        .register(args.ports)
        .context("Failed to register the initial controller")?;

    info!(
        "controller {} is up (usb bus {}, {} ports)",
        controller.bus_id(),
        controller.usb_busnum(),
        controller.port_count()
    );

    Ok(())
}
