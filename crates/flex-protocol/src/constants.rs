//! 协议常量与枚举
//!
//! 固件端定义的各类枚举值，以及定点数换算使用的中断频率。

use bilge::prelude::*;
use num_enum::{IntoPrimitive, TryFromPrimitive};

// ============================================================================
// 中断频率
// ============================================================================

/// 步进电机运动中断频率（Hz）
pub const INTERRUPTS_PER_SEC: u32 = 100_000;

/// 枪头动作（齿轮电机）中断频率（Hz）
pub const TIP_INTERRUPTS_PER_SEC: u32 = 100_000;

/// 有刷电机（夹爪）中断频率（Hz）
pub const BRUSHED_MOTOR_INTERRUPTS_PER_SEC: u32 = 32_000;

// ============================================================================
// 错误相关
// ============================================================================

/// 错误严重程度
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, num_enum::FromPrimitive, IntoPrimitive)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
#[repr(u16)]
pub enum ErrorSeverity {
    #[default]
    None = 0,
    Warning = 1,
    Recoverable = 2,
    Unrecoverable = 3,
}

/// 固件错误码
///
/// 未定义的值映射为 `Unknown`，避免新固件的错误码导致解析失败。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, num_enum::FromPrimitive, IntoPrimitive)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
#[repr(u16)]
pub enum ErrorCode {
    Ok = 0,
    InvalidSize = 1,
    BadChecksum = 2,
    InvalidByteCount = 3,
    InvalidInput = 4,
    Hardware = 5,
    Timeout = 6,
    EstopDetected = 7,
    CollisionDetected = 8,
    LabwareDropped = 9,
    EstopReleased = 10,
    MotorBusy = 11,
    StopRequested = 12,
    OverPressure = 13,
    DoorOpen = 14,
    ReedOpen = 15,
    MotorDriverErrorDetected = 16,
    SafetyRelayInactive = 17,
    #[default]
    Unknown = 0xFFFF,
}

// ============================================================================
// 运动相关
// ============================================================================

/// 运动完成应答类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive, IntoPrimitive)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
#[repr(u8)]
pub enum MoveAckId {
    CompleteWithoutCondition = 1,
    StoppedByCondition = 2,
    Timeout = 3,
    PositionError = 4,
}

/// 齿轮电机 ID（96 通道移液头的枪头动作电机）
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, TryFromPrimitive, IntoPrimitive)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
#[repr(u8)]
pub enum GearMotorId {
    Left = 0,
    Right = 1,
}

/// 枪头动作类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive, IntoPrimitive)]
#[repr(u8)]
pub enum PipetteTipActionType {
    Clamp = 0,
    Home = 1,
}

/// 运动停止条件位域
///
/// - Bit 0: 限位开关
/// - Bit 1: 同步线
/// - Bit 2: 编码器位置
/// - Bit 3: 夹爪力
/// - Bit 4: 堵转
/// - Bit 5: 忽略堵转
/// - Bit 6: 限位开关回退
/// - Bit 7: 保留
#[bitsize(8)]
#[derive(FromBits, DebugBits, Clone, Copy, PartialEq, Eq)]
pub struct MoveStopCondition {
    pub limit_switch: bool,
    pub sync_line: bool,
    pub encoder_position: bool,
    pub gripper_force: bool,
    pub stall: bool,
    pub ignore_stalls: bool,
    pub limit_switch_backoff: bool,
    pub reserved: u1,
}

impl MoveStopCondition {
    /// 无停止条件
    pub fn none() -> Self {
        Self::from_bits(0)
    }

    /// 从原始字节构建
    pub fn from_bits(bits: u8) -> Self {
        Self::from(u8::new(bits))
    }

    /// 原始字节
    pub fn bits(self) -> u8 {
        u8::from(self).value()
    }

    /// 是否要求以限位开关结束（含回退）
    pub fn requires_limit_switch(self) -> bool {
        self.limit_switch() || self.limit_switch_backoff()
    }
}

/// 位置有效性标志
///
/// - Bit 0: 步进计数位置有效
/// - Bit 1: 编码器位置有效
#[bitsize(8)]
#[derive(FromBits, DebugBits, Clone, Copy, PartialEq, Eq)]
pub struct MotorPositionFlags {
    pub stepper_position_ok: bool,
    pub encoder_position_ok: bool,
    pub reserved: u6,
}

impl MotorPositionFlags {
    pub fn from_bits(bits: u8) -> Self {
        Self::from(u8::new(bits))
    }

    pub fn bits(self) -> u8 {
        u8::from(self).value()
    }
}
