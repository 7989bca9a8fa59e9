//! 驱动层错误类型定义
//!
//! - [`DriverError`]: 传输层错误（CAN、协议解析、监听通道）
//! - [`MotionError`]: 运动协调层对调用方暴露的错误分类

use flex_can::CanError;
use flex_protocol::{ErrorCode, ErrorMessage, ErrorSeverity, NodeId, ProtocolError};
use std::collections::BTreeMap;
use thiserror::Error;

/// 驱动层错误类型
#[derive(Error, Debug)]
pub enum DriverError {
    /// CAN 驱动错误
    #[error("CAN driver error: {0}")]
    Can(#[from] CanError),

    /// 协议解析错误
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// 监听通道已关闭（接收线程退出）
    #[error("Listener channel closed")]
    ChannelClosed,
}

/// 运动错误
///
/// 调度器与分发器产生的所有失败都归入这里。
/// 多个错误同时出现时按"急停优先"的规则合并，见 [`MotionError::is_estop`]。
#[derive(Error, Debug)]
pub enum MotionError {
    /// 运动没有按预期条件结束（如限位开关未触发）
    #[error("Move condition not met: {detail}")]
    MoveConditionNotMet {
        node: Option<NodeId>,
        group_id: Option<u8>,
        detail: String,
    },

    /// 急停被触发
    #[error("Estop activated (reported by {node})")]
    EStopActivated { node: NodeId },

    /// 运动失败（超时或多个错误合并）
    #[error("{message}{}", format_detail(.detail))]
    MotionFailed {
        message: String,
        detail: BTreeMap<String, String>,
        wrapping: Vec<MotionError>,
    },

    /// 一次性查询等待超时
    #[error("{message}: missing responses from {missing:?}")]
    CommandTimedOut {
        message: String,
        missing: Vec<NodeId>,
    },

    /// 节点报告的控制状态异常
    #[error("Robotics control error on {node}: {message}")]
    RoboticsControl { node: NodeId, message: String },

    /// 调用顺序或参数错误
    #[error("{0}")]
    General(String),

    /// 固件上报的其他错误码
    #[error("Firmware error on {node}: {code:?} (severity {severity:?})")]
    Firmware {
        node: NodeId,
        code: ErrorCode,
        severity: ErrorSeverity,
    },

    /// 添加运动时节点返回失败
    #[error("Failed to schedule move on {node} (group {group_id}, seq {seq_id}): {code:?}")]
    ScheduleFailed {
        node: NodeId,
        group_id: u8,
        seq_id: u8,
        code: ErrorCode,
    },

    /// 调用方取消
    #[error("Motion cancelled")]
    Cancelled,

    /// 传输层错误
    #[error(transparent)]
    Driver(#[from] DriverError),
}

fn format_detail(detail: &BTreeMap<String, String>) -> String {
    if detail.is_empty() {
        return String::new();
    }
    let parts: Vec<String> = detail.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
    format!(" ({})", parts.join(", "))
}

impl MotionError {
    /// 将固件错误上报映射为运动错误；`ok` 返回 `None`
    pub fn from_error_message(node: NodeId, message: &ErrorMessage) -> Option<Self> {
        match message.error_code {
            ErrorCode::Ok => None,
            ErrorCode::EstopDetected => Some(MotionError::EStopActivated { node }),
            code => Some(MotionError::Firmware {
                node,
                code,
                severity: message.severity,
            }),
        }
    }

    /// 是否为急停错误
    pub fn is_estop(&self) -> bool {
        matches!(self, MotionError::EStopActivated { .. })
    }

    /// 合并多个错误：有急停取急停，单个原样返回，多个包装为 `MotionFailed`
    ///
    /// 空列表返回 `None`。
    pub fn merge(mut errors: Vec<MotionError>) -> Option<MotionError> {
        if let Some(pos) = errors.iter().position(MotionError::is_estop) {
            return Some(errors.swap_remove(pos));
        }
        match errors.len() {
            0 => None,
            1 => errors.pop(),
            _ => Some(MotionError::MotionFailed {
                message: "Motion failed with multiple errors".to_string(),
                detail: BTreeMap::new(),
                wrapping: errors,
            }),
        }
    }
}

impl From<CanError> for MotionError {
    fn from(e: CanError) -> Self {
        MotionError::Driver(DriverError::Can(e))
    }
}

impl From<ProtocolError> for MotionError {
    fn from(e: ProtocolError) -> Self {
        MotionError::Driver(DriverError::Protocol(e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_driver_error_display() {
        let msg = format!("{}", DriverError::Can(CanError::Timeout));
        assert!(msg.contains("Read timeout"));
        assert_eq!(format!("{}", DriverError::ChannelClosed), "Listener channel closed");
    }

    #[test]
    fn test_from_error_message_mapping() {
        let estop = ErrorMessage {
            severity: ErrorSeverity::Unrecoverable,
            error_code: ErrorCode::EstopDetected,
        };
        assert!(matches!(
            MotionError::from_error_message(NodeId::HeadL, &estop),
            Some(MotionError::EStopActivated { node: NodeId::HeadL })
        ));

        let ok = ErrorMessage {
            severity: ErrorSeverity::None,
            error_code: ErrorCode::Ok,
        };
        assert!(MotionError::from_error_message(NodeId::HeadL, &ok).is_none());

        let busy = ErrorMessage {
            severity: ErrorSeverity::Recoverable,
            error_code: ErrorCode::MotorBusy,
        };
        assert!(matches!(
            MotionError::from_error_message(NodeId::GantryX, &busy),
            Some(MotionError::Firmware { code: ErrorCode::MotorBusy, .. })
        ));
    }

    #[test]
    fn test_merge_prefers_estop_regardless_of_order() {
        let failed = || MotionError::MotionFailed {
            message: "x".into(),
            detail: BTreeMap::new(),
            wrapping: vec![],
        };
        let estop = || MotionError::EStopActivated {
            node: NodeId::GantryY,
        };

        let merged = MotionError::merge(vec![failed(), estop()]).unwrap();
        assert!(merged.is_estop());
        let merged = MotionError::merge(vec![estop(), failed()]).unwrap();
        assert!(merged.is_estop());
    }

    #[test]
    fn test_merge_single_and_multiple() {
        assert!(MotionError::merge(vec![]).is_none());

        let single = MotionError::merge(vec![MotionError::General("a".into())]).unwrap();
        assert!(matches!(single, MotionError::General(_)));

        let multiple = MotionError::merge(vec![
            MotionError::General("a".into()),
            MotionError::General("b".into()),
        ])
        .unwrap();
        match multiple {
            MotionError::MotionFailed { message, wrapping, .. } => {
                assert_eq!(message, "Motion failed with multiple errors");
                assert_eq!(wrapping.len(), 2);
            },
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_motion_failed_display_includes_detail() {
        let mut detail = BTreeMap::new();
        detail.insert("missing-nodes".to_string(), "gantry_x".to_string());
        let err = MotionError::MotionFailed {
            message: "Command timed out".into(),
            detail,
            wrapping: vec![],
        };
        assert_eq!(format!("{}", err), "Command timed out (missing-nodes=gantry_x)");
    }
}
