//! LoRaWAN node: runs the MAC driver loop until Ctrl+C.
//!
//! - **Any host**: `cargo run --bin lmic-node` (simulated board)
//! - **Raspberry Pi**: `cargo run --release --features rpi --bin lmic-node -- node.json`
//!
//! The optional argument is a JSON configuration file (see
//! [`NodeConfig`]); without it the node sends "Hello, world!" over ABP on a
//! single 868.1 MHz channel every 120 seconds.
//!
//! Exit status is 0 after Ctrl+C and 1 when configuration or hardware
//! initialisation fails.

use lmic_raspi::config::NodeConfig;
use lmic_raspi::hal::{GpioBackend, SpiBackend};
use lmic_raspi::identity::{derive_device_eui, SysfsInterfaces};
use lmic_raspi::mac::SimulatedMacConfig;
use lmic_raspi::{
    HostClock, HostHal, LoopStats, MacDriver, SimulatedMac, StatsServer, ThreadSleeper,
};
use log::{error, info, warn};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

fn load_config() -> Result<NodeConfig, lmic_raspi::ConfigError> {
    match std::env::args().nth(1) {
        Some(path) => {
            info!("Loading configuration from {}", path);
            NodeConfig::load(path)
        }
        None => {
            info!("No configuration file, using defaults");
            Ok(NodeConfig::default())
        }
    }
}

#[cfg(feature = "rpi")]
fn open_backends(_config: &NodeConfig) -> Result<(lmic_raspi::hal::RpiGpio, lmic_raspi::hal::RpiSpi), String> {
    let gpio = lmic_raspi::hal::RpiGpio::new().map_err(|e| e.to_string())?;
    Ok((gpio, lmic_raspi::hal::RpiSpi::new()))
}

#[cfg(not(feature = "rpi"))]
fn open_backends(config: &NodeConfig) -> Result<(lmic_raspi::hal::SimGpio, lmic_raspi::hal::SimSpi), String> {
    let board = lmic_raspi::hal::SimBoard::with_radio(config.pins.nss);
    warn!("Built without the rpi feature: using a simulated board");
    Ok((board.gpio(), board.spi()))
}

/// Build, start and run the driver. Returns the process exit code.
async fn run_node<G, S>(config: NodeConfig, gpio: G, spi: S) -> i32
where
    G: GpioBackend + 'static,
    S: SpiBackend + 'static,
{
    let identity = derive_device_eui(&SysfsInterfaces::new());
    if identity.is_derived() {
        info!("DevEUI {}", identity.eui);
    } else if config.needs_device_eui() {
        warn!("No active network adapter: joining with fallback DevEUI {}", identity.eui);
    }

    let driver_config = match config.driver_config(identity.eui) {
        Ok(c) => c,
        Err(e) => {
            error!("Invalid configuration: {}", e);
            return 1;
        }
    };

    let stats = Arc::new(LoopStats::new());
    let _stats_server = config.stats_port.and_then(|port| {
        match StatsServer::start(None, port, stats.clone()) {
            Ok(server) => Some(server),
            Err(e) => {
                warn!("Failed to start stats server: {}", e);
                None
            }
        }
    });

    let hal = HostHal::new(
        HostClock::new(),
        gpio,
        spi,
        config.radio_pins(),
        config.chip_selects(),
    );
    let engine = SimulatedMac::new(SimulatedMacConfig {
        bus: config.bus_settings(),
        ..Default::default()
    });
    let mut driver = MacDriver::new(engine, hal, ThreadSleeper, driver_config, stats);

    if let Err(e) = driver.start() {
        error!("{}", e);
        return 1;
    }

    let cancel = CancellationToken::new();
    let loop_cancel = cancel.clone();
    let mut task = tokio::task::spawn_blocking(move || driver.run(&loop_cancel));

    let finished = tokio::select! {
        _ = tokio::signal::ctrl_c() => None,
        result = &mut task => Some(result),
    };
    let result = match finished {
        Some(result) => result,
        None => {
            info!("Shutting down...");
            cancel.cancel();
            task.await
        }
    };

    match result {
        Ok(summary) => {
            info!(
                "Sent {} uplinks ({} completed, {} dropped, {} rejected), {} I/O faults",
                summary.uplinks.submitted,
                summary.uplinks.tx_complete,
                summary.uplinks.dropped,
                summary.uplinks.rejected,
                summary.io_faults
            );
            0
        }
        Err(e) => {
            error!("Driver loop failed: {}", e);
            1
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    info!("=== LMIC node starting ===");

    let config = match load_config() {
        Ok(config) => config,
        Err(e) => {
            error!("{}", e);
            std::process::exit(1);
        }
    };

    let (gpio, spi) = match open_backends(&config) {
        Ok(backends) => backends,
        Err(e) => {
            error!("Hardware init failed: {}", e);
            std::process::exit(1);
        }
    };

    let code = run_node(config, gpio, spi).await;
    info!("Shutdown complete");
    std::process::exit(code);
}
