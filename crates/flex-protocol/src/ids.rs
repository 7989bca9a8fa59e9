//! 节点、消息与仲裁 ID 定义
//!
//! 29 位扩展仲裁 ID 的位布局（LSB first）：
//!
//! | 位 | 字段 |
//! |----|------|
//! | 0-3 | function_code |
//! | 4-10 | node_id（目标节点） |
//! | 11-17 | originating_node_id（发送节点） |
//! | 18-28 | message_id |

use crate::ProtocolError;
use bilge::prelude::*;
use num_enum::{IntoPrimitive, TryFromPrimitive};
use std::fmt;
use std::str::FromStr;

// ============================================================================
// 节点 ID
// ============================================================================

/// 总线节点 ID
///
/// `Ord` 按数值排序，用作 `BTreeMap` 的键，保证结果映射的遍历顺序稳定。
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, TryFromPrimitive, IntoPrimitive,
)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
#[num_enum(error_type(name = ProtocolError, constructor = NodeId::unknown))]
#[repr(u8)]
pub enum NodeId {
    Broadcast = 0x00,
    Host = 0x10,
    Gripper = 0x20,
    GripperZ = 0x21,
    GripperG = 0x22,
    GantryX = 0x30,
    HepaUv = 0x32,
    GantryY = 0x40,
    Head = 0x50,
    HeadL = 0x51,
    HeadR = 0x52,
    PipetteLeft = 0x60,
    PipetteRight = 0x70,
}

impl NodeId {
    /// 全部节点（不含 broadcast / host）
    pub const MOTOR_NODES: [NodeId; 11] = [
        NodeId::Gripper,
        NodeId::GripperZ,
        NodeId::GripperG,
        NodeId::GantryX,
        NodeId::HepaUv,
        NodeId::GantryY,
        NodeId::Head,
        NodeId::HeadL,
        NodeId::HeadR,
        NodeId::PipetteLeft,
        NodeId::PipetteRight,
    ];

    fn unknown(id: u8) -> ProtocolError {
        ProtocolError::UnknownNodeId { id }
    }

    /// 该节点名下的子节点
    ///
    /// gripper 与 head 在总线上由两个独立的子控制器应答，
    /// 发往父节点的请求需要两个子节点都确认。
    pub fn subnodes(self) -> &'static [NodeId] {
        match self {
            NodeId::Gripper => &[NodeId::GripperZ, NodeId::GripperG],
            NodeId::Head => &[NodeId::HeadL, NodeId::HeadR],
            _ => &[],
        }
    }

    /// 子节点所属的父节点；非子节点返回 `None`
    pub fn parent(self) -> Option<NodeId> {
        match self {
            NodeId::GripperZ | NodeId::GripperG => Some(NodeId::Gripper),
            NodeId::HeadL | NodeId::HeadR => Some(NodeId::Head),
            _ => None,
        }
    }

    /// snake_case 名称（与配置文件、命令行参数一致）
    pub fn name(self) -> &'static str {
        match self {
            NodeId::Broadcast => "broadcast",
            NodeId::Host => "host",
            NodeId::Gripper => "gripper",
            NodeId::GripperZ => "gripper_z",
            NodeId::GripperG => "gripper_g",
            NodeId::GantryX => "gantry_x",
            NodeId::HepaUv => "hepa_uv",
            NodeId::GantryY => "gantry_y",
            NodeId::Head => "head",
            NodeId::HeadL => "head_l",
            NodeId::HeadR => "head_r",
            NodeId::PipetteLeft => "pipette_left",
            NodeId::PipetteRight => "pipette_right",
        }
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for NodeId {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        [NodeId::Broadcast, NodeId::Host]
            .into_iter()
            .chain(NodeId::MOTOR_NODES)
            .find(|node| node.name() == s)
            .ok_or_else(|| ProtocolError::ParseError(format!("unknown node name '{}'", s)))
    }
}

// ============================================================================
// 消息 ID
// ============================================================================

/// 消息 ID（11 位）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, TryFromPrimitive, IntoPrimitive)]
#[num_enum(error_type(name = ProtocolError, constructor = MessageId::unknown))]
#[repr(u16)]
pub enum MessageId {
    StopRequest = 0x00,
    Acknowledgement = 0x01,
    ErrorMessage = 0x02,
    ReadLimitSwitchRequest = 0x08,
    ReadLimitSwitchResponse = 0x09,
    MotorPositionRequest = 0x12,
    MoveCompleted = 0x13,
    MotorPositionResponse = 0x14,
    AddLinearMoveRequest = 0x15,
    ExecuteMoveGroupRequest = 0x18,
    ClearAllMoveGroupsRequest = 0x19,
    HomeRequest = 0x20,
    UpdateMotorPositionEstimationRequest = 0x21,
    UpdateMotorPositionEstimationResponse = 0x22,
    GripperGripRequest = 0x41,
    GripperHomeRequest = 0x42,
    AddBrushedLinearMoveRequest = 0x44,
    TipActionRequest = 0x501,
    TipActionResponse = 0x502,
}

impl MessageId {
    fn unknown(id: u16) -> ProtocolError {
        ProtocolError::UnknownMessageId { id }
    }
}

// ============================================================================
// 功能码
// ============================================================================

/// 功能码（4 位）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, num_enum::FromPrimitive, IntoPrimitive)]
#[repr(u8)]
pub enum FunctionCode {
    #[default]
    NetworkManagement = 0x0,
    Sync = 0x2,
    Error = 0x4,
    Command = 0x6,
    Status = 0x8,
    Parameters = 0xA,
    Bootloader = 0xC,
    Heartbeat = 0xE,
}

// ============================================================================
// 仲裁 ID
// ============================================================================

/// 仲裁 ID 位域（29 位，LSB first）
#[bitsize(29)]
#[derive(FromBits, DebugBits, Clone, Copy, PartialEq, Eq)]
pub struct ArbitrationIdParts {
    pub function_code: u4,
    pub node_id: u7,
    pub originating_node_id: u7,
    pub message_id: u11,
}

/// 已解码的仲裁 ID
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArbitrationId {
    pub function_code: FunctionCode,
    /// 目标节点
    pub node_id: NodeId,
    /// 发送节点
    pub originating_node_id: NodeId,
    pub message_id: MessageId,
}

impl ArbitrationId {
    /// 构建主机发出的仲裁 ID
    ///
    /// 错误消息使用 `Error` 功能码，其余使用 `NetworkManagement`。
    pub fn from_host(node_id: NodeId, message_id: MessageId) -> Self {
        Self::new(node_id, NodeId::Host, message_id)
    }

    /// 构建任意方向的仲裁 ID，功能码由消息类型决定
    pub fn new(node_id: NodeId, originating_node_id: NodeId, message_id: MessageId) -> Self {
        let function_code = if message_id == MessageId::ErrorMessage {
            FunctionCode::Error
        } else {
            FunctionCode::NetworkManagement
        };
        Self {
            function_code,
            node_id,
            originating_node_id,
            message_id,
        }
    }

    /// 打包为 29 位原始 ID
    pub fn to_raw(self) -> u32 {
        let parts = ArbitrationIdParts::new(
            u4::new(u8::from(self.function_code) & 0x0F),
            u7::new(u8::from(self.node_id)),
            u7::new(u8::from(self.originating_node_id)),
            u11::new(u16::from(self.message_id)),
        );
        u29::from(parts).value()
    }

    /// 从原始 ID 解码
    ///
    /// # 错误
    /// - `ProtocolError::InvalidCanId`: 超过 29 位
    /// - `ProtocolError::UnknownNodeId` / `UnknownMessageId`: 字段值未定义
    pub fn from_raw(raw: u32) -> Result<Self, ProtocolError> {
        if raw > 0x1FFF_FFFF {
            return Err(ProtocolError::InvalidCanId { id: raw });
        }
        let parts = ArbitrationIdParts::from(u29::new(raw));
        Ok(Self {
            function_code: FunctionCode::from(parts.function_code().value()),
            node_id: NodeId::try_from(parts.node_id().value())?,
            originating_node_id: NodeId::try_from(parts.originating_node_id().value())?,
            message_id: MessageId::try_from(parts.message_id().value())?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_arbitration_id_bit_layout() {
        let id = ArbitrationId::from_host(NodeId::GantryX, MessageId::AddLinearMoveRequest);
        let raw = id.to_raw();
        // function_code=0, node=0x30 @ bit4, origin=0x10 @ bit11, message=0x15 @ bit18
        let expected = (0x30u32 << 4) | (0x10u32 << 11) | (0x15u32 << 18);
        assert_eq!(raw, expected);
        assert_eq!(ArbitrationId::from_raw(raw).unwrap(), id);
    }

    #[test]
    fn test_error_message_uses_error_function_code() {
        let id = ArbitrationId::new(NodeId::Host, NodeId::HeadL, MessageId::ErrorMessage);
        assert_eq!(id.function_code, FunctionCode::Error);
        assert_eq!(id.to_raw() & 0x0F, 0x4);
    }

    #[test]
    fn test_tip_action_message_id_fits_eleven_bits() {
        let id = ArbitrationId::new(NodeId::Host, NodeId::PipetteLeft, MessageId::TipActionResponse);
        let decoded = ArbitrationId::from_raw(id.to_raw()).unwrap();
        assert_eq!(decoded.message_id, MessageId::TipActionResponse);
        assert_eq!(decoded.originating_node_id, NodeId::PipetteLeft);
    }

    #[test]
    fn test_from_raw_rejects_unknown_fields() {
        // node_id = 0x7F 未定义
        let raw = 0x7Fu32 << 4;
        assert!(matches!(
            ArbitrationId::from_raw(raw),
            Err(ProtocolError::UnknownNodeId { id: 0x7F })
        ));
        assert!(matches!(
            ArbitrationId::from_raw(0x2000_0000),
            Err(ProtocolError::InvalidCanId { .. })
        ));
    }

    #[test]
    fn test_node_subnodes_and_parent() {
        assert_eq!(NodeId::Head.subnodes(), &[NodeId::HeadL, NodeId::HeadR]);
        assert_eq!(NodeId::GripperG.parent(), Some(NodeId::Gripper));
        assert!(NodeId::GantryX.subnodes().is_empty());
        assert_eq!(NodeId::GantryY.parent(), None);
    }

    #[test]
    fn test_node_from_str() {
        assert_eq!("gantry_x".parse::<NodeId>().unwrap(), NodeId::GantryX);
        assert_eq!("pipette_right".parse::<NodeId>().unwrap(), NodeId::PipetteRight);
        assert!("gantry_z".parse::<NodeId>().is_err());
        assert_eq!(NodeId::HeadL.to_string(), "head_l");
    }
}
