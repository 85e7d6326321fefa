use anyhow::Result;
use console::style;

use helm_config::HelmConfig;
use helm_core::DeviceStatus;
use helm_runtime::Runtime;

pub(super) async fn cmd_status(config: HelmConfig) -> Result<()> {
    let runtime = Runtime::new(config)?;
    runtime.initialize().await;

    println!("📟 Devices");
    for (surface, state) in runtime.device_states() {
        let status = match state.status {
            DeviceStatus::Connected => style(state.status.to_string()).green(),
            DeviceStatus::Error => style(state.status.to_string()).red(),
            _ => style(state.status.to_string()).dim(),
        };
        let mode = if surface.is_transient() {
            "per operation"
        } else {
            "persistent"
        };
        println!("   {surface:<8} {status:<12} ({mode})");
        if let Some(ref e) = state.error {
            println!("            ↳ {e}");
        }
        if let Some(at) = state.last_action {
            println!("            last change {}", at.format("%Y-%m-%d %H:%M:%S UTC"));
        }
    }

    runtime.teardown().await;
    Ok(())
}
