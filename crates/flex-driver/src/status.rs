//! 电机位置状态

use flex_protocol::{
    MotorPositionFlags, MotorPositionResponse, MoveAckId, MoveCompleted, NodeId,
    TipActionResponse, um_to_mm,
};
use std::collections::BTreeMap;

/// 以节点为键的有序映射
pub type NodeMap<T> = BTreeMap<NodeId, T>;

/// 节点上报的电机位置（毫米）
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MotorPositionStatus {
    /// 步进计数位置
    pub motor_position: f64,
    /// 编码器位置
    pub encoder_position: f64,
    pub motor_ok: bool,
    pub encoder_ok: bool,
    /// 运动完成应答类型；位置查询结果为 `None`
    pub move_ack: Option<MoveAckId>,
}

impl MotorPositionStatus {
    fn new(
        current_position_um: u32,
        encoder_position_um: i32,
        flags: MotorPositionFlags,
        move_ack: Option<MoveAckId>,
    ) -> Self {
        Self {
            motor_position: um_to_mm(current_position_um as f64),
            encoder_position: um_to_mm(encoder_position_um as f64),
            motor_ok: flags.stepper_position_ok(),
            encoder_ok: flags.encoder_position_ok(),
            move_ack,
        }
    }
}

impl From<&MoveCompleted> for MotorPositionStatus {
    fn from(m: &MoveCompleted) -> Self {
        Self::new(
            m.current_position_um,
            m.encoder_position_um,
            m.position_flags,
            m.ack(),
        )
    }
}

impl From<&TipActionResponse> for MotorPositionStatus {
    fn from(m: &TipActionResponse) -> Self {
        Self::new(
            m.current_position_um,
            m.encoder_position_um,
            m.position_flags,
            m.ack(),
        )
    }
}

impl From<&MotorPositionResponse> for MotorPositionStatus {
    fn from(m: &MotorPositionResponse) -> Self {
        Self::new(m.current_position_um, m.encoder_position_um, m.position_flags, None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_move_completed_to_status() {
        let m = MoveCompleted {
            group_id: 0,
            seq_id: 0,
            current_position_um: 12_500,
            encoder_position_um: -250,
            position_flags: MotorPositionFlags::from_bits(0x01),
            ack_id: 2,
        };
        let status = MotorPositionStatus::from(&m);
        assert_eq!(status.motor_position, 12.5);
        assert_eq!(status.encoder_position, -0.25);
        assert!(status.motor_ok);
        assert!(!status.encoder_ok);
        assert_eq!(status.move_ack, Some(MoveAckId::StoppedByCondition));
    }

    #[test]
    fn test_position_response_has_no_ack() {
        let m = MotorPositionResponse {
            current_position_um: 1000,
            encoder_position_um: 1000,
            position_flags: MotorPositionFlags::from_bits(0x03),
        };
        let status = MotorPositionStatus::from(&m);
        assert_eq!(status.motor_position, 1.0);
        assert!(status.move_ack.is_none());
    }
}
