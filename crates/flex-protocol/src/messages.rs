//! 请求/响应消息定义
//!
//! 每条消息的载荷都以 `u32 message_index` 开头（大端），
//! 应答（`Acknowledgement` / `ErrorMessage`）携带被应答请求的 `message_index`。
//! 消息体内的数值字段全部是线上原始值（中断周期数、Q31 定点数、微米），
//! 物理量换算见 [`crate::fixed_point`]。

use crate::{
    ArbitrationId, ErrorCode, ErrorSeverity, FlexFrame, GearMotorId, MessageId, MoveAckId,
    MotorPositionFlags, MoveStopCondition, NodeId, PipetteTipActionType, ProtocolError,
};
use bytes::{Buf, BufMut, BytesMut};

// ============================================================================
// 消息体
// ============================================================================

/// 固件错误上报
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ErrorMessage {
    pub severity: ErrorSeverity,
    pub error_code: ErrorCode,
}

/// 添加一段步进电机直线运动
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddLinearMoveRequest {
    pub group_id: u8,
    pub seq_id: u8,
    /// 中断周期数
    pub duration: u32,
    /// Q31，µm / tick²
    pub acceleration_um: i32,
    /// Q31，mm / tick
    pub velocity_mm: i32,
    pub request_stop_condition: MoveStopCondition,
}

/// 添加一段回零运动
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HomeRequest {
    pub group_id: u8,
    pub seq_id: u8,
    pub duration: u32,
    pub velocity_mm: i32,
}

/// 添加一段枪头动作（齿轮电机）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TipActionRequest {
    pub group_id: u8,
    pub seq_id: u8,
    pub duration: u32,
    pub velocity: i32,
    pub action: PipetteTipActionType,
    pub request_stop_condition: MoveStopCondition,
    pub acceleration: i32,
}

/// 有刷电机（夹爪）运动，直线 / 回零 / 夹取共用同一载荷
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GripperMoveRequest {
    pub group_id: u8,
    pub seq_id: u8,
    pub duration: u32,
    pub duty_cycle: u32,
    pub encoder_position_um: i32,
    pub stay_engaged: bool,
}

/// 触发执行一个运动组
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecuteMoveGroupRequest {
    pub group_id: u8,
    pub start_trigger: u8,
    pub cancel_trigger: u8,
}

/// 运动完成上报
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MoveCompleted {
    pub group_id: u8,
    pub seq_id: u8,
    pub current_position_um: u32,
    pub encoder_position_um: i32,
    pub position_flags: MotorPositionFlags,
    pub ack_id: u8,
}

/// 枪头动作完成上报（每个齿轮电机各一条）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TipActionResponse {
    pub group_id: u8,
    pub seq_id: u8,
    pub current_position_um: u32,
    pub encoder_position_um: i32,
    pub position_flags: MotorPositionFlags,
    pub ack_id: u8,
    pub success: bool,
    pub gear_motor_id: GearMotorId,
}

/// 限位开关状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LimitSwitchResponse {
    pub switch_status: u8,
}

/// 电机位置（查询 / 编码器重估计共用）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MotorPositionResponse {
    pub current_position_um: u32,
    pub encoder_position_um: i32,
    pub position_flags: MotorPositionFlags,
}

impl MoveCompleted {
    /// 解析应答类型，未知值返回 `None`
    pub fn ack(&self) -> Option<MoveAckId> {
        MoveAckId::try_from(self.ack_id).ok()
    }
}

impl TipActionResponse {
    pub fn ack(&self) -> Option<MoveAckId> {
        MoveAckId::try_from(self.ack_id).ok()
    }
}

// ============================================================================
// 消息枚举
// ============================================================================

/// 总线消息（封闭集合）
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    StopRequest,
    Acknowledgement,
    ErrorMessage(ErrorMessage),
    ReadLimitSwitchRequest,
    ReadLimitSwitchResponse(LimitSwitchResponse),
    MotorPositionRequest,
    MotorPositionResponse(MotorPositionResponse),
    UpdateMotorPositionEstimationRequest,
    UpdateMotorPositionEstimationResponse(MotorPositionResponse),
    MoveCompleted(MoveCompleted),
    TipActionResponse(TipActionResponse),
    AddLinearMoveRequest(AddLinearMoveRequest),
    HomeRequest(HomeRequest),
    TipActionRequest(TipActionRequest),
    AddBrushedLinearMoveRequest(GripperMoveRequest),
    GripperHomeRequest(GripperMoveRequest),
    GripperGripRequest(GripperMoveRequest),
    ExecuteMoveGroupRequest(ExecuteMoveGroupRequest),
    ClearAllMoveGroupsRequest,
}

impl Message {
    /// 对应的消息 ID
    pub fn message_id(&self) -> MessageId {
        match self {
            Message::StopRequest => MessageId::StopRequest,
            Message::Acknowledgement => MessageId::Acknowledgement,
            Message::ErrorMessage(_) => MessageId::ErrorMessage,
            Message::ReadLimitSwitchRequest => MessageId::ReadLimitSwitchRequest,
            Message::ReadLimitSwitchResponse(_) => MessageId::ReadLimitSwitchResponse,
            Message::MotorPositionRequest => MessageId::MotorPositionRequest,
            Message::MotorPositionResponse(_) => MessageId::MotorPositionResponse,
            Message::UpdateMotorPositionEstimationRequest => {
                MessageId::UpdateMotorPositionEstimationRequest
            },
            Message::UpdateMotorPositionEstimationResponse(_) => {
                MessageId::UpdateMotorPositionEstimationResponse
            },
            Message::MoveCompleted(_) => MessageId::MoveCompleted,
            Message::TipActionResponse(_) => MessageId::TipActionResponse,
            Message::AddLinearMoveRequest(_) => MessageId::AddLinearMoveRequest,
            Message::HomeRequest(_) => MessageId::HomeRequest,
            Message::TipActionRequest(_) => MessageId::TipActionRequest,
            Message::AddBrushedLinearMoveRequest(_) => MessageId::AddBrushedLinearMoveRequest,
            Message::GripperHomeRequest(_) => MessageId::GripperHomeRequest,
            Message::GripperGripRequest(_) => MessageId::GripperGripRequest,
            Message::ExecuteMoveGroupRequest(_) => MessageId::ExecuteMoveGroupRequest,
            Message::ClearAllMoveGroupsRequest => MessageId::ClearAllMoveGroupsRequest,
        }
    }

    /// 编码载荷（含 `message_index` 前缀）
    pub fn encode(&self, message_index: u32) -> BytesMut {
        let mut buf = BytesMut::with_capacity(24);
        buf.put_u32(message_index);

        match self {
            Message::StopRequest
            | Message::Acknowledgement
            | Message::ReadLimitSwitchRequest
            | Message::MotorPositionRequest
            | Message::UpdateMotorPositionEstimationRequest
            | Message::ClearAllMoveGroupsRequest => {},
            Message::ErrorMessage(m) => {
                buf.put_u16(m.severity.into());
                buf.put_u16(m.error_code.into());
            },
            Message::ReadLimitSwitchResponse(m) => buf.put_u8(m.switch_status),
            Message::MotorPositionResponse(m) | Message::UpdateMotorPositionEstimationResponse(m) => {
                buf.put_u32(m.current_position_um);
                buf.put_i32(m.encoder_position_um);
                buf.put_u8(m.position_flags.bits());
            },
            Message::MoveCompleted(m) => {
                buf.put_u8(m.group_id);
                buf.put_u8(m.seq_id);
                buf.put_u32(m.current_position_um);
                buf.put_i32(m.encoder_position_um);
                buf.put_u8(m.position_flags.bits());
                buf.put_u8(m.ack_id);
            },
            Message::TipActionResponse(m) => {
                buf.put_u8(m.group_id);
                buf.put_u8(m.seq_id);
                buf.put_u32(m.current_position_um);
                buf.put_i32(m.encoder_position_um);
                buf.put_u8(m.position_flags.bits());
                buf.put_u8(m.ack_id);
                buf.put_u8(m.success as u8);
                buf.put_u8(m.gear_motor_id.into());
            },
            Message::AddLinearMoveRequest(m) => {
                buf.put_u8(m.group_id);
                buf.put_u8(m.seq_id);
                buf.put_u32(m.duration);
                buf.put_i32(m.acceleration_um);
                buf.put_i32(m.velocity_mm);
                buf.put_u8(m.request_stop_condition.bits());
            },
            Message::HomeRequest(m) => {
                buf.put_u8(m.group_id);
                buf.put_u8(m.seq_id);
                buf.put_u32(m.duration);
                buf.put_i32(m.velocity_mm);
            },
            Message::TipActionRequest(m) => {
                buf.put_u8(m.group_id);
                buf.put_u8(m.seq_id);
                buf.put_u32(m.duration);
                buf.put_i32(m.velocity);
                buf.put_u8(m.action.into());
                buf.put_u8(m.request_stop_condition.bits());
                buf.put_i32(m.acceleration);
            },
            Message::AddBrushedLinearMoveRequest(m)
            | Message::GripperHomeRequest(m)
            | Message::GripperGripRequest(m) => {
                buf.put_u8(m.group_id);
                buf.put_u8(m.seq_id);
                buf.put_u32(m.duration);
                buf.put_u32(m.duty_cycle);
                buf.put_i32(m.encoder_position_um);
                buf.put_u8(m.stay_engaged as u8);
            },
            Message::ExecuteMoveGroupRequest(m) => {
                buf.put_u8(m.group_id);
                buf.put_u8(m.start_trigger);
                buf.put_u8(m.cancel_trigger);
            },
        }
        buf
    }

    /// 构建完整的 CAN 帧
    pub fn to_frame(&self, arbitration_id: ArbitrationId, message_index: u32) -> FlexFrame {
        FlexFrame::new(arbitration_id.to_raw(), &self.encode(message_index))
    }

    /// 根据消息 ID 解码载荷（不含 `message_index` 前缀）
    pub fn decode(message_id: MessageId, mut payload: &[u8]) -> Result<Self, ProtocolError> {
        let name = message_name(message_id);
        let message = match message_id {
            MessageId::StopRequest => Message::StopRequest,
            MessageId::Acknowledgement => Message::Acknowledgement,
            MessageId::ReadLimitSwitchRequest => Message::ReadLimitSwitchRequest,
            MessageId::MotorPositionRequest => Message::MotorPositionRequest,
            MessageId::UpdateMotorPositionEstimationRequest => {
                Message::UpdateMotorPositionEstimationRequest
            },
            MessageId::ClearAllMoveGroupsRequest => Message::ClearAllMoveGroupsRequest,
            MessageId::ErrorMessage => {
                require(payload, 4, name)?;
                Message::ErrorMessage(ErrorMessage {
                    severity: ErrorSeverity::from(payload.get_u16()),
                    error_code: ErrorCode::from(payload.get_u16()),
                })
            },
            MessageId::ReadLimitSwitchResponse => {
                require(payload, 1, name)?;
                Message::ReadLimitSwitchResponse(LimitSwitchResponse {
                    switch_status: payload.get_u8(),
                })
            },
            MessageId::MotorPositionResponse => {
                Message::MotorPositionResponse(decode_position(&mut payload, name)?)
            },
            MessageId::UpdateMotorPositionEstimationResponse => {
                Message::UpdateMotorPositionEstimationResponse(decode_position(&mut payload, name)?)
            },
            MessageId::MoveCompleted => {
                require(payload, 12, name)?;
                Message::MoveCompleted(MoveCompleted {
                    group_id: payload.get_u8(),
                    seq_id: payload.get_u8(),
                    current_position_um: payload.get_u32(),
                    encoder_position_um: payload.get_i32(),
                    position_flags: MotorPositionFlags::from_bits(payload.get_u8()),
                    ack_id: payload.get_u8(),
                })
            },
            MessageId::TipActionResponse => {
                require(payload, 14, name)?;
                let group_id = payload.get_u8();
                let seq_id = payload.get_u8();
                let current_position_um = payload.get_u32();
                let encoder_position_um = payload.get_i32();
                let position_flags = MotorPositionFlags::from_bits(payload.get_u8());
                let ack_id = payload.get_u8();
                let success = payload.get_u8() != 0;
                let raw_gear = payload.get_u8();
                let gear_motor_id =
                    GearMotorId::try_from(raw_gear).map_err(|_| ProtocolError::InvalidValue {
                        field: "gear_motor_id",
                        value: raw_gear as u32,
                    })?;
                Message::TipActionResponse(TipActionResponse {
                    group_id,
                    seq_id,
                    current_position_um,
                    encoder_position_um,
                    position_flags,
                    ack_id,
                    success,
                    gear_motor_id,
                })
            },
            MessageId::AddLinearMoveRequest => {
                require(payload, 15, name)?;
                Message::AddLinearMoveRequest(AddLinearMoveRequest {
                    group_id: payload.get_u8(),
                    seq_id: payload.get_u8(),
                    duration: payload.get_u32(),
                    acceleration_um: payload.get_i32(),
                    velocity_mm: payload.get_i32(),
                    request_stop_condition: MoveStopCondition::from_bits(payload.get_u8()),
                })
            },
            MessageId::HomeRequest => {
                require(payload, 10, name)?;
                Message::HomeRequest(HomeRequest {
                    group_id: payload.get_u8(),
                    seq_id: payload.get_u8(),
                    duration: payload.get_u32(),
                    velocity_mm: payload.get_i32(),
                })
            },
            MessageId::TipActionRequest => {
                require(payload, 16, name)?;
                let group_id = payload.get_u8();
                let seq_id = payload.get_u8();
                let duration = payload.get_u32();
                let velocity = payload.get_i32();
                let raw_action = payload.get_u8();
                let action = PipetteTipActionType::try_from(raw_action).map_err(|_| {
                    ProtocolError::InvalidValue {
                        field: "action",
                        value: raw_action as u32,
                    }
                })?;
                Message::TipActionRequest(TipActionRequest {
                    group_id,
                    seq_id,
                    duration,
                    velocity,
                    action,
                    request_stop_condition: MoveStopCondition::from_bits(payload.get_u8()),
                    acceleration: payload.get_i32(),
                })
            },
            MessageId::AddBrushedLinearMoveRequest => {
                Message::AddBrushedLinearMoveRequest(decode_gripper(&mut payload, name)?)
            },
            MessageId::GripperHomeRequest => {
                Message::GripperHomeRequest(decode_gripper(&mut payload, name)?)
            },
            MessageId::GripperGripRequest => {
                Message::GripperGripRequest(decode_gripper(&mut payload, name)?)
            },
            MessageId::ExecuteMoveGroupRequest => {
                require(payload, 3, name)?;
                Message::ExecuteMoveGroupRequest(ExecuteMoveGroupRequest {
                    group_id: payload.get_u8(),
                    start_trigger: payload.get_u8(),
                    cancel_trigger: payload.get_u8(),
                })
            },
        };
        Ok(message)
    }
}

fn message_name(message_id: MessageId) -> &'static str {
    match message_id {
        MessageId::ErrorMessage => "ErrorMessage",
        MessageId::ReadLimitSwitchResponse => "ReadLimitSwitchResponse",
        MessageId::MotorPositionResponse => "MotorPositionResponse",
        MessageId::UpdateMotorPositionEstimationResponse => "UpdateMotorPositionEstimationResponse",
        MessageId::MoveCompleted => "MoveCompleted",
        MessageId::TipActionResponse => "TipActionResponse",
        MessageId::AddLinearMoveRequest => "AddLinearMoveRequest",
        MessageId::HomeRequest => "HomeRequest",
        MessageId::TipActionRequest => "TipActionRequest",
        MessageId::AddBrushedLinearMoveRequest => "AddBrushedLinearMoveRequest",
        MessageId::GripperHomeRequest => "GripperHomeRequest",
        MessageId::GripperGripRequest => "GripperGripRequest",
        MessageId::ExecuteMoveGroupRequest => "ExecuteMoveGroupRequest",
        _ => "message",
    }
}

fn require(payload: &[u8], expected: usize, message: &'static str) -> Result<(), ProtocolError> {
    if payload.len() < expected {
        return Err(ProtocolError::InvalidLength {
            message,
            expected,
            actual: payload.len(),
        });
    }
    Ok(())
}

fn decode_position(
    payload: &mut &[u8],
    name: &'static str,
) -> Result<MotorPositionResponse, ProtocolError> {
    require(*payload, 9, name)?;
    Ok(MotorPositionResponse {
        current_position_um: payload.get_u32(),
        encoder_position_um: payload.get_i32(),
        position_flags: MotorPositionFlags::from_bits(payload.get_u8()),
    })
}

fn decode_gripper(
    payload: &mut &[u8],
    name: &'static str,
) -> Result<GripperMoveRequest, ProtocolError> {
    require(*payload, 15, name)?;
    Ok(GripperMoveRequest {
        group_id: payload.get_u8(),
        seq_id: payload.get_u8(),
        duration: payload.get_u32(),
        duty_cycle: payload.get_u32(),
        encoder_position_um: payload.get_i32(),
        stay_engaged: payload.get_u8() != 0,
    })
}

// ============================================================================
// 帧 <-> 消息
// ============================================================================

/// 已解码的帧：仲裁 ID + 消息序号 + 消息体
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub arbitration_id: ArbitrationId,
    pub message_index: u32,
    pub message: Message,
}

impl Envelope {
    /// 发送节点
    pub fn origin(&self) -> NodeId {
        self.arbitration_id.originating_node_id
    }

    /// 解码一帧
    ///
    /// # 错误
    /// - `ProtocolError::InvalidCanId` 等：仲裁 ID 非法
    /// - `ProtocolError::InvalidLength`: 载荷不足
    pub fn from_frame(frame: &FlexFrame) -> Result<Self, ProtocolError> {
        let arbitration_id = ArbitrationId::from_raw(frame.id)?;
        let mut data = frame.data_slice();
        require(data, 4, "message_index")?;
        let message_index = data.get_u32();
        let message = Message::decode(arbitration_id.message_id, data)?;
        Ok(Self {
            arbitration_id,
            message_index,
            message,
        })
    }

    /// 编码为帧
    pub fn to_frame(&self) -> FlexFrame {
        self.message.to_frame(self.arbitration_id, self.message_index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_linear_move_layout() {
        let msg = Message::AddLinearMoveRequest(AddLinearMoveRequest {
            group_id: 2,
            seq_id: 1,
            duration: 0x0001_86A0,
            acceleration_um: -1,
            velocity_mm: 0x0102_0304,
            request_stop_condition: MoveStopCondition::from_bits(0x10),
        });
        let bytes = msg.encode(0xDEAD_BEEF);
        assert_eq!(
            &bytes[..],
            &[
                0xDE, 0xAD, 0xBE, 0xEF, // message_index
                2, 1, // group, seq
                0x00, 0x01, 0x86, 0xA0, // duration
                0xFF, 0xFF, 0xFF, 0xFF, // acceleration
                0x01, 0x02, 0x03, 0x04, // velocity
                0x10, // stop condition
            ]
        );
    }

    #[test]
    fn test_move_completed_from_frame() {
        let arb = ArbitrationId::new(NodeId::Host, NodeId::GantryX, MessageId::MoveCompleted);
        let payload = [
            0, 0, 0, 7, // index
            3, 0, // group 3, seq 0
            0, 0, 0x30, 0x39, // 12345 um
            0xFF, 0xFF, 0xFF, 0xF6, // -10 um
            0x03, 0x01,
        ];
        let frame = FlexFrame::new(arb.to_raw(), &payload);
        let envelope = Envelope::from_frame(&frame).unwrap();
        assert_eq!(envelope.message_index, 7);
        assert_eq!(envelope.origin(), NodeId::GantryX);
        match envelope.message {
            Message::MoveCompleted(m) => {
                assert_eq!(m.group_id, 3);
                assert_eq!(m.current_position_um, 12345);
                assert_eq!(m.encoder_position_um, -10);
                assert!(m.position_flags.encoder_position_ok());
                assert_eq!(m.ack(), Some(MoveAckId::CompleteWithoutCondition));
            },
            other => panic!("unexpected message {:?}", other),
        }
    }

    #[test]
    fn test_short_payload_is_rejected() {
        let arb = ArbitrationId::new(NodeId::Host, NodeId::GantryX, MessageId::MoveCompleted);
        let frame = FlexFrame::new(arb.to_raw(), &[0, 0, 0, 1, 3]);
        assert!(matches!(
            Envelope::from_frame(&frame),
            Err(ProtocolError::InvalidLength { message: "MoveCompleted", .. })
        ));
    }

    #[test]
    fn test_fd_padding_is_ignored() {
        let arb = ArbitrationId::new(NodeId::Host, NodeId::HeadL, MessageId::ErrorMessage);
        let msg = Message::ErrorMessage(ErrorMessage {
            severity: ErrorSeverity::Unrecoverable,
            error_code: ErrorCode::EstopDetected,
        });
        let mut padded = msg.encode(9).to_vec();
        padded.resize(12, 0);
        let envelope = Envelope::from_frame(&FlexFrame::new(arb.to_raw(), &padded)).unwrap();
        assert_eq!(envelope.message, msg);
    }

    #[test]
    fn test_tip_action_response_rejects_unknown_gear() {
        let arb = ArbitrationId::new(NodeId::Host, NodeId::PipetteLeft, MessageId::TipActionResponse);
        let mut payload = vec![0, 0, 0, 1, 0, 0];
        payload.extend_from_slice(&[0; 8]);
        payload.extend_from_slice(&[0x01, 0x01, 0x01, 0x05]);
        let frame = FlexFrame::new(arb.to_raw(), &payload);
        assert!(matches!(
            Envelope::from_frame(&frame),
            Err(ProtocolError::InvalidValue { field: "gear_motor_id", value: 5 })
        ));
    }
}
