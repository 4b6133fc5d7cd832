mod codec;
mod command;
mod config;
mod demo;
mod drive;
mod error;
mod freshness;
mod ingress;
mod logging;
#[cfg(feature = "mqtt")]
mod mqtt;
mod publisher;
mod request_queue;
mod runtime;
mod signal;
mod station;
mod topics;
mod transport;
mod types;

use anyhow::{Context, Result};
use tracing::{error, info};

use crate::config::{CONFIG_PATH_ENV, CellConfig, DEFAULT_CONFIG_PATH};

fn print_usage(program: &str) {
    println!("Factory cell station controller");
    println!("Usage:");
    println!("  {program}              (run the station named in the config file)");
    println!("  {program} demo [stray] (run all four stations in-process)");
    println!("  {program} --help");
    println!();
    println!("Config is read from {DEFAULT_CONFIG_PATH}; override the path with {CONFIG_PATH_ENV}.");
    println!("A missing config file means defaults (station hbw, broker 192.168.0.10:1883).");
    println!("Flags:");
    println!("  stray  deliver a message on an unknown topic; the station must exit with status 1");
    println!("Exit status: 1 protocol error or startup failure, 2 usage, 3 demo scenario failed.");
    println!("Logging is controlled by RUST_LOG (default: info).");
}

fn exit_with_usage(program: &str, message: &str) -> ! {
    eprintln!("{message}");
    print_usage(program);
    std::process::exit(2);
}

#[cfg(feature = "mqtt")]
fn run_station(config: &CellConfig) -> Result<()> {
    use std::sync::Arc;

    use crate::drive::SimulatedDrive;
    use crate::mqtt::{MqttEndpoint, MqttTransport};
    use crate::runtime::{RuntimeOptions, StationRuntime};
    use crate::station::{Processing, Robot, Sorting, Warehouse};
    use crate::types::StationKind;

    let endpoint = MqttEndpoint {
        client_id: format!("factory-cell-{}", config.station),
        host: config.host.clone(),
        port: config.port,
        user: config.mqtt_user.clone(),
        password: config.mqtt_pass.clone(),
    };
    let runtime = StationRuntime::new(Arc::new(MqttTransport::new(endpoint)), RuntimeOptions::from(config));
    // The transfer area is driven through the simulated drive until a
    // hardware binding exists for this host.
    let drive = SimulatedDrive::new();
    let stats = match config.station {
        StationKind::Hbw => runtime.run(Warehouse::new(), drive)?.stats,
        StationKind::Vgr => runtime.run(Robot::new(), drive)?.stats,
        StationKind::Mpo => runtime.run(Processing::new(), drive)?.stats,
        StationKind::Sld => runtime.run(Sorting::new(), drive)?.stats,
    };
    info!(commands = stats.commands, notifies = stats.notifies, "station finished");
    Ok(())
}

#[cfg(not(feature = "mqtt"))]
fn run_station(config: &CellConfig) -> Result<()> {
    anyhow::bail!(
        "station {} needs a broker, but this build has no mqtt feature; try `demo`",
        config.station
    )
}

fn run_from_config() -> Result<()> {
    let path = CellConfig::path_from_env();
    let config = CellConfig::load(&path).with_context(|| format!("loading config {}", path.display()))?;
    info!(station = %config.station, host = %config.host, port = config.port, "starting station");
    run_station(&config).with_context(|| format!("running station {}", config.station))
}

fn main() {
    logging::init();
    let program = std::env::args()
        .next()
        .unwrap_or_else(|| "factory_cell".to_string());
    let mut args = std::env::args().skip(1);
    match args.next().as_deref() {
        Some("demo") => {
            let stray = match args.next().as_deref() {
                None => false,
                Some("stray") => true,
                Some(other) => exit_with_usage(&program, &format!("unknown demo flag: {other}")),
            };
            match demo::run_demo(stray) {
                Ok(summary) => summary.print(),
                Err(err) => {
                    error!("demo failed: {err:#}");
                    // Status 1 is reserved for a station terminating on a protocol error.
                    std::process::exit(3);
                }
            }
        }
        Some("--help") | Some("-h") => print_usage(&program),
        Some(other) => exit_with_usage(&program, &format!("unknown command: {other}")),
        None => {
            if let Err(err) = run_from_config() {
                error!("{err:#}");
                std::process::exit(1);
            }
        }
    }
}
