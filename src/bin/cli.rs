//! Aria Runtime - device session and tool runtime for a phone assistant
//!
//! This is the CLI entry point. It lists the connected devices, keeps the
//! reconnect loop running and saves the session on Ctrl-C.
//! Run with: cargo run --bin aria-runtime

use aria_runtime::adb::AdbChannel;
use aria_runtime::{AgentRuntime, RuntimeSettings};
use std::env;
use tracing_subscriber::EnvFilter;

fn print_usage() {
    println!("Usage: aria-runtime [--list] [--save-settings] [--connect HOST[:PORT]] [--disconnect]");
    println!();
    println!("  --list            List devices and exit");
    println!("  --connect ADDR    Connect a device over TCP/IP before starting");
    println!("  --disconnect      Disconnect all TCP/IP devices and exit");
    println!("  --save-settings   Write the effective settings to the config file");
    println!();
    println!("Environment: ARIA_ADB_PATH, ARIA_RECONNECT_INTERVAL, ARIA_RATE_LIMIT,");
    println!("             ARIA_MAX_HISTORY, ARIA_MEMORY_PATH, ARIA_DEVICE_SERIAL, RUST_LOG");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present (ignore errors if file doesn't exist)
    let _ = dotenvy::dotenv();

    // Initialize tracing, defaulting to info
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args: Vec<String> = env::args().collect();
    if args.iter().any(|arg| arg == "--help" || arg == "-h") {
        print_usage();
        return Ok(());
    }
    let list_only = args.iter().any(|arg| arg == "--list");

    let mut settings = RuntimeSettings::load();
    settings.apply_env();

    if args.iter().any(|arg| arg == "--save-settings") {
        settings.save().map_err(anyhow::Error::msg)?;
        if let Some(path) = RuntimeSettings::settings_path() {
            println!("Settings saved to {}", path.display());
        }
    }

    println!("==================================================");
    println!("Aria Runtime");
    println!("==================================================");
    println!("ADB: {}", settings.adb_path);
    println!("Session: {}", settings.session_path);
    println!(
        "Rate limit: {}/min, history: {} messages",
        settings.default_rate_limit, settings.max_history
    );
    println!("==================================================");

    let adb = AdbChannel::with_path(settings.adb_path.clone())
        .with_timeout(settings.adb_command_timeout());
    if args.iter().any(|arg| arg == "--disconnect") {
        println!("{}", adb.disconnect(None).await?);
        return Ok(());
    }
    if let Some(address) = args
        .iter()
        .position(|arg| arg == "--connect")
        .and_then(|i| args.get(i + 1))
    {
        match adb.connect(address).await {
            Ok(message) => println!("{}", message),
            Err(e) => println!("Connect failed: {}", e),
        }
    }

    let mut runtime = AgentRuntime::from_settings(settings);

    match runtime.devices().list_devices().await {
        Ok(devices) if devices.is_empty() => println!("No devices attached"),
        Ok(devices) => {
            println!("Devices:");
            for device in &devices {
                println!("  {}", device);
            }
        }
        Err(e) => println!("Device discovery failed: {}", e),
    }

    if list_only {
        return Ok(());
    }

    println!("Tools: {}", runtime.dispatcher().registry().names().join(", "));

    runtime.devices().on_connect(|device| println!("Connected: {}", device));
    runtime.devices().on_disconnect(|device| println!("Disconnected: {}", device));
    runtime.start().await;

    println!("Running. Press Ctrl-C to stop.");
    tokio::signal::ctrl_c().await?;

    tracing::info!("Shutdown signal received, saving session memory");
    runtime.shutdown().await?;
    println!("Stopped.");
    Ok(())
}
