//! presence-bot binary
//!
//! A headless peer: joins a presence channel, walks in a circle, waves now
//! and then, and logs who else is around. Useful for exercising a server or
//! relay without a renderer.
//!
//! ## Configuration (env / TOML via `config` crate)
//!
//! | Key                              | Default    | Description                      |
//! |----------------------------------|------------|----------------------------------|
//! | `PRESENCE_PROVIDER`              | `socket`   | `socket` or `pubsub`             |
//! | `PRESENCE_ADDRESS`               | *(none)*   | WebSocket URL or relay URL       |
//! | `PRESENCE_CHANNEL_CREDENTIALS`   | *(none)*   | Relay token                      |
//! | `PRESENCE_CLUSTER_REGION`        | *(none)*   | Relay subject region             |
//! | `PRESENCE_CHANNEL_NAME`          | `presence` | Channel / room                   |
//! | `PRESENCE_DISPLAY_NAME`          | `Player`   | Advertised name                  |
//! | `PRESENCE_INACTIVITY_TIMEOUT_MS` | `60000`    | Silent-peer eviction             |
//!
//! Command-line flags override both.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use world_presence::{
    ActionKind, MovementFlags, PresenceClient, PresenceConfig, ProviderKind, Vec3,
};

// ---------------------------------------------------------------------------
// CLI
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(name = "presence-bot", about = "Headless presence peer", version)]
struct Args {
    /// TOML configuration file
    #[arg(long, env = "PRESENCE_CONFIG")]
    config: Option<PathBuf>,

    /// Override the provider (`socket` or `pubsub`)
    #[arg(long)]
    provider: Option<String>,

    /// Override the server or relay address
    #[arg(long)]
    address: Option<String>,

    /// Override the channel name
    #[arg(long)]
    channel: Option<String>,

    /// Override the display name
    #[arg(long)]
    name: Option<String>,

    /// Radius of the walked circle in world units
    #[arg(long, default_value_t = 4.0)]
    radius: f32,

    /// Simulation tick rate (Hz)
    #[arg(long, default_value_t = 20.0)]
    tick_rate_hz: f32,

    /// Seconds between waves (0 disables)
    #[arg(long, default_value_t = 15)]
    wave_every: u64,
}

fn apply_overrides(mut cfg: PresenceConfig, args: &Args) -> Result<PresenceConfig> {
    if let Some(p) = &args.provider {
        cfg.provider = match p.as_str() {
            "socket" => ProviderKind::Socket,
            "pubsub" => ProviderKind::Pubsub,
            other => anyhow::bail!("unknown provider '{}'", other),
        };
    }
    if let Some(a) = &args.address {
        cfg.address = Some(a.clone());
    }
    if let Some(c) = &args.channel {
        cfg.channel_name = c.clone();
    }
    if let Some(n) = &args.name {
        cfg.display_name = n.clone();
    }
    Ok(cfg)
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    // Initialise logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("world_presence=info".parse()?),
        )
        .init();

    let args = Args::parse();
    let config = apply_overrides(PresenceConfig::load(args.config.as_deref())?, &args)?;

    log::info!(
        "Starting presence-bot (provider={:?}, channel='{}', name='{}')",
        config.provider,
        config.channel_name,
        config.display_name,
    );

    let client = PresenceClient::new(config);

    let _roster = client.on_players_update(|snapshot| {
        let mut names: Vec<_> = snapshot.values().map(|p| p.display_name.as_str()).collect();
        names.sort_unstable();
        log::info!("{} peer(s): {}", names.len(), names.join(", "));
    });
    let _actions = client.on_action(|id, action| {
        log::info!("'{}' sent {:?}", id, action.kind);
    });
    let _link = client.on_connection_change(|up| {
        log::info!("Connection {}", if up { "up" } else { "down" });
    });

    if !client.connect().await {
        log::info!("Running offline; nothing to do");
        return Ok(());
    }

    let dt = Duration::from_secs_f32(1.0 / args.tick_rate_hz.max(1.0));
    let mut ticker = tokio::time::interval(dt);
    let mut angle = 0.0_f32;
    let mut ticks: u64 = 0;
    let ticks_per_wave = (args.wave_every as f32 * args.tick_rate_hz) as u64;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                angle = (angle + 0.5 * dt.as_secs_f32()) % std::f32::consts::TAU;
                let position = Vec3::new(args.radius * angle.cos(), 0.0, args.radius * angle.sin());
                client.broadcast_position(position, angle, MovementFlags::new(true, false));

                ticks += 1;
                if ticks_per_wave > 0 && ticks % ticks_per_wave == 0 {
                    client.send_action(ActionKind::Wave, None);
                }
            }
            _ = tokio::signal::ctrl_c() => {
                log::info!("Shutting down");
                break;
            }
        }
    }

    client.disconnect();
    // Let the transport task flush the goodbye.
    tokio::time::sleep(Duration::from_millis(200)).await;
    Ok(())
}
