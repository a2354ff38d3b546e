//! DynTunes - publishes the active MPRIS player as named variables
//!
//! A background connector keeps a snapshot fresh; the host tick reads it and
//! writes whatever changed.

mod config;
mod variables;

use config::DynTunesConfig;
use log::{info, warn};
use std::error::Error;
use std::path::PathBuf;
use tunes_mpris::{MusicConnector, create_connector};
use variables::{VariableWriter, build_variables};

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .or_else(DynTunesConfig::default_path);
    let config = match &config_path {
        Some(path) => DynTunesConfig::load_or_default(path),
        None => DynTunesConfig::default(),
    };

    info!(
        "Starting DynTunes with {:?} connector, variables under '{}' in slot '{}'",
        config.connector, config.key_space, config.slot_name
    );

    let connector = create_connector(config.connector, &config.mpris)?;

    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    rt.block_on(host_loop(connector.as_ref(), &config));

    connector.shutdown();
    Ok(())
}

/// Stand-in for the host's update tick. Ctrl-C stops, SIGUSR1 reconnects.
async fn host_loop(connector: &dyn MusicConnector, config: &DynTunesConfig) {
    let mut ticker = tokio::time::interval(config.update_interval());
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    let mut writer = VariableWriter::default();

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    let mut reconnect_signal =
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::user_defined1()) {
            Ok(signal) => Some(signal),
            Err(e) => {
                warn!("SIGUSR1 reconnect trigger unavailable: {}", e);
                None
            }
        };

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let state = connector.get_state();
                for var in writer.write(build_variables(&state, config)) {
                    info!("{} = {}", var.name, var.value);
                }
            }
            Some(()) = recv_optional(&mut reconnect_signal) => {
                info!("Reconnect requested by signal");
                connector.reconnect();
            }
            _ = &mut ctrl_c => {
                info!("Shutting down");
                break;
            }
        }
    }
}

async fn recv_optional(signal: &mut Option<tokio::signal::unix::Signal>) -> Option<()> {
    match signal {
        Some(signal) => signal.recv().await,
        None => std::future::pending().await,
    }
}
