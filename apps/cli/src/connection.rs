//! 总线连接

use anyhow::Result;
use flex_driver::{CanMessenger, MotionConfig};

/// 打开 CAN-FD 接口并启动 messenger
#[cfg(target_os = "linux")]
pub fn open_messenger(interface: &str, config: &MotionConfig) -> Result<CanMessenger> {
    use anyhow::Context;
    use flex_can::{CanAdapter, SocketCanFdAdapter};

    let mut adapter = SocketCanFdAdapter::new(interface)
        .with_context(|| format!("Failed to open CAN interface '{}'", interface))?;
    adapter.set_receive_timeout(config.messenger.receive_timeout());
    tracing::info!("Connected to {}", interface);
    Ok(CanMessenger::new(adapter)?)
}

#[cfg(not(target_os = "linux"))]
pub fn open_messenger(interface: &str, _config: &MotionConfig) -> Result<CanMessenger> {
    anyhow::bail!(
        "CAN interface '{}' unavailable: SocketCAN is only supported on Linux",
        interface
    )
}
