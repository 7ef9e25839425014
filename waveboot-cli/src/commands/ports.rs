//! Serial port listing.

use anyhow::{Context, Result};
use console::style;
use waveboot::{NativePortEnumerator, PortEnumerator, PortInfo};

fn port_json(port: &PortInfo) -> serde_json::Value {
    serde_json::json!({
        "name": port.name,
        "vid": port.vid,
        "pid": port.pid,
        "manufacturer": port.manufacturer,
        "product": port.product,
    })
}

/// List available serial ports.
pub(crate) fn cmd_list_ports(json: bool) -> Result<()> {
    let ports = NativePortEnumerator::list_ports().context("Failed to enumerate serial ports")?;

    if json {
        let output = serde_json::json!({
            "ok": true,
            "data": {
                "ports": ports.iter().map(port_json).collect::<Vec<_>>(),
            }
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    eprintln!("{}", style("Available serial ports:").bold().underlined());

    if ports.is_empty() {
        eprintln!("  {}", style("No serial ports found").dim());
        return Ok(());
    }

    for port in &ports {
        let vid_pid = if let (Some(vid), Some(pid)) = (port.vid, port.pid) {
            format!(" ({vid:04X}:{pid:04X})")
        } else {
            String::new()
        };
        let product = port.product.as_deref().unwrap_or("");

        eprintln!(
            "  {} {}{} {}",
            style("•").cyan(),
            style(&port.name).green(),
            style(vid_pid).dim(),
            product
        );
    }

    Ok(())
}
