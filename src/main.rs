//! Hopdash Session Server
//!
//! Hosts a single race session: binds the listener, waits for two players,
//! runs the authoritative race, and exits when the session ends. The fleet
//! allocator points clients at this process; run with an open ledger it
//! also serves token-free local play.

use std::sync::Arc;

use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use hopdash::network::allocator::OpenLedger;
use hopdash::network::server::{HostConfig, SessionHost};
use hopdash::{TICK_RATE, VERSION};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .expect("Failed to set tracing subscriber");

    let config = HostConfig::from_env();

    info!("Hopdash Server v{}", VERSION);
    info!("Tick Rate: {} Hz", TICK_RATE);
    info!("Pool: {}", config.pool_id);
    info!(
        "Hop: {}s / {} of course, penalty {}s, idle timeout {}s",
        config.session.race.hop_time,
        config.session.race.hop_length,
        config.session.race.click_penalty,
        config.session.idle_timeout.as_secs()
    );

    // Local play accepts any self-picked token; a fleet deployment swaps
    // in the ledger its allocator issues reservations into.
    let ledger = Arc::new(OpenLedger::new());

    let host = SessionHost::new(config, ledger).bind().await?;
    info!("Ready to host a race on {}", host.local_addr());

    let reason = host.run().await?;
    info!("Session ended: {:?}", reason);

    Ok(())
}
