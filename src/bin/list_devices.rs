//! Prints the microphones and speakers the relay can use

use anyhow::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use media_relay::media::device::{list_input_devices, list_output_devices};

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "warn".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    println!("\n=== Microphones ===");
    let inputs = list_input_devices();
    if inputs.is_empty() {
        println!("  (none)");
    }
    for device in &inputs {
        let default_marker = if device.is_default { " [DEFAULT]" } else { "" };
        println!("  {}{}", device.name, default_marker);
        println!("    ID: {}", device.id);
    }

    println!("\n=== Speakers ===");
    for name in list_output_devices() {
        println!("  {}", name);
    }
    println!();

    Ok(())
}
