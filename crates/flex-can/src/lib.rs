//! # Flex CAN Adapter Layer
//!
//! CAN-FD 硬件抽象层，提供统一的收发接口。
//!
//! - Linux: [`SocketCanFdAdapter`]（内核 SocketCAN，CAN-FD 模式）
//! - `mock` feature: [`sim::SimBus`]（内存仿真总线，用于测试）

use std::time::Duration;
use thiserror::Error;

// 重新导出 flex-protocol 中的 FlexFrame
pub use flex_protocol::FlexFrame;

#[cfg(target_os = "linux")]
pub mod socketcan;

#[cfg(target_os = "linux")]
pub use socketcan::{SocketCanFdAdapter, SocketCanFdRxAdapter, SocketCanFdTxAdapter};

#[cfg(feature = "mock")]
pub mod sim;

/// CAN 适配层统一错误类型
#[derive(Error, Debug)]
pub enum CanError {
    #[error("IO Error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Device Error: {0}")]
    Device(#[from] CanDeviceError),
    #[error("Read timeout")]
    Timeout,
    #[error("Adapter disconnected")]
    Disconnected,
}

/// 设备/后端错误的结构化分类
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CanDeviceErrorKind {
    NotFound,
    AccessDenied,
    InvalidFrame,
    Backend,
}

/// 结构化设备错误
#[derive(Error, Debug, Clone)]
#[error("{kind:?}: {message}")]
pub struct CanDeviceError {
    pub kind: CanDeviceErrorKind,
    pub message: String,
}

impl CanDeviceError {
    pub fn new(kind: CanDeviceErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

/// 单线程收发接口
pub trait CanAdapter {
    fn send(&mut self, frame: FlexFrame) -> Result<(), CanError>;
    fn receive(&mut self) -> Result<FlexFrame, CanError>;
    fn set_receive_timeout(&mut self, _timeout: Duration) {}
    fn receive_timeout(&mut self, timeout: Duration) -> Result<FlexFrame, CanError> {
        self.set_receive_timeout(timeout);
        self.receive()
    }
    fn try_receive(&mut self) -> Result<Option<FlexFrame>, CanError> {
        match self.receive_timeout(Duration::ZERO) {
            Ok(frame) => Ok(Some(frame)),
            Err(CanError::Timeout) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

/// 接收半部
///
/// `receive` 必须在有限时间内返回（超时返回 `CanError::Timeout`），
/// 接收线程依赖它周期性地检查退出标志。
pub trait RxAdapter {
    fn receive(&mut self) -> Result<FlexFrame, CanError>;
}

/// 发送半部
pub trait TxAdapter {
    fn send(&mut self, frame: FlexFrame) -> Result<(), CanError>;
}

/// 可分离为独立收发半部的适配器
pub trait SplittableAdapter: CanAdapter {
    type RxAdapter: RxAdapter;
    type TxAdapter: TxAdapter;
    fn split(self) -> Result<(Self::RxAdapter, Self::TxAdapter), CanError>;
}
