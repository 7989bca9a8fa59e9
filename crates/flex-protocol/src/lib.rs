//! # Flex Protocol
//!
//! 运动控制节点 CAN-FD 总线协议定义（无硬件依赖）
//!
//! ## 模块
//!
//! - `ids`: 节点、消息、功能码与 29 位仲裁 ID
//! - `constants`: 协议枚举与中断频率常量
//! - `fixed_point`: 时长/速度/加速度的定点数换算
//! - `messages`: 请求/响应消息的编码与解码
//!
//! ## 字节序
//!
//! 所有载荷使用大端字节序，且都以 `u32` 的 `message_index` 开头。

pub mod constants;
pub mod fixed_point;
pub mod ids;
pub mod messages;

// 重新导出常用类型
pub use constants::*;
pub use fixed_point::*;
pub use ids::*;
pub use messages::*;

use thiserror::Error;

/// CAN-FD 帧最大数据长度
pub const MAX_FRAME_DATA_LEN: usize = 64;

/// CAN-FD 扩展帧的统一抽象
///
/// 协议层与硬件层之间的中间类型：
///
/// ```text
/// Protocol Layer (flex-protocol)
///     ↓ Message::to_frame() 构建 / Envelope::from_frame() 解析
/// FlexFrame (此类型)
///     ↓ 转换逻辑在 CAN 层实现
/// CAN Layer (flex-can)
///     ↓ SocketCAN-FD / 仿真总线
/// Hardware
/// ```
///
/// - **Copy**：固定 64 字节缓冲，无堆分配
/// - **仅扩展帧**：节点协议全部使用 29 位仲裁 ID
///
/// # 示例
///
/// ```rust
/// use flex_protocol::FlexFrame;
///
/// let frame = FlexFrame::new(0x1234, &[1, 2, 3, 4]);
/// assert_eq!(frame.id(), 0x1234);
/// assert_eq!(frame.data_slice(), &[1, 2, 3, 4]);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlexFrame {
    /// 29 位扩展 CAN ID
    pub id: u32,

    /// 帧数据（固定 64 字节，未使用部分为 0）
    pub data: [u8; MAX_FRAME_DATA_LEN],

    /// 有效数据长度 (0-64)
    pub len: u8,

    /// 接收时间戳（微秒），0 表示不可用
    pub timestamp_us: u64,
}

impl FlexFrame {
    /// 创建扩展帧，超过 64 字节的数据会被截断
    pub fn new(id: u32, data: &[u8]) -> Self {
        let mut fixed_data = [0u8; MAX_FRAME_DATA_LEN];
        let len = data.len().min(MAX_FRAME_DATA_LEN);
        fixed_data[..len].copy_from_slice(&data[..len]);

        Self {
            id,
            data: fixed_data,
            len: len as u8,
            timestamp_us: 0,
        }
    }

    /// 获取数据切片（只包含有效数据）
    pub fn data_slice(&self) -> &[u8] {
        &self.data[..self.len as usize]
    }

    /// 获取 CAN ID
    pub fn id(&self) -> u32 {
        self.id
    }
}

/// 协议解析错误类型
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProtocolError {
    #[error("Invalid payload length for {message}: expected at least {expected}, got {actual}")]
    InvalidLength {
        message: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("Invalid CAN ID: 0x{id:X}")]
    InvalidCanId { id: u32 },

    #[error("Unknown message id: 0x{id:X}")]
    UnknownMessageId { id: u16 },

    #[error("Unknown node id: 0x{id:X}")]
    UnknownNodeId { id: u8 },

    #[error("Invalid value for field {field}: {value}")]
    InvalidValue { field: &'static str, value: u32 },

    #[error("Value {value} for field {field} is outside the encodable range")]
    OutOfRange { field: &'static str, value: f64 },

    #[error("Parse error: {0}")]
    ParseError(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_truncates_to_fd_length() {
        let data = [0xAAu8; 80];
        let frame = FlexFrame::new(0x1, &data);
        assert_eq!(frame.len as usize, MAX_FRAME_DATA_LEN);
        assert_eq!(frame.data_slice().len(), MAX_FRAME_DATA_LEN);
    }

    #[test]
    fn test_frame_zero_fills_tail() {
        let frame = FlexFrame::new(0x1, &[1, 2, 3]);
        assert_eq!(frame.data_slice(), &[1, 2, 3]);
        assert!(frame.data[3..].iter().all(|b| *b == 0));
        assert_eq!(frame.timestamp_us, 0);
    }

    #[test]
    fn test_protocol_error_display() {
        let err = ProtocolError::InvalidLength {
            message: "MoveCompleted",
            expected: 16,
            actual: 4,
        };
        let msg = format!("{}", err);
        assert!(msg.contains("MoveCompleted"));
        assert!(msg.contains("16"));
    }
}
