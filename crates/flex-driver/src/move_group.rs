//! 运动组数据模型
//!
//! ```text
//! MoveGroups  = [MoveGroup, ...]          按顺序逐组执行
//! MoveGroup   = [SequenceStep, ...]       组内按序号（seq_id）执行
//! SequenceStep = { NodeId => MoveGroupStep } 同一序号下各节点并行
//! ```

use crate::status::NodeMap;
use flex_protocol::{MoveStopCondition, NodeId, PipetteTipActionType};
use std::collections::BTreeSet;

/// 步进电机运动类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SingleAxisMoveType {
    Linear,
    Home,
}

/// 有刷电机（夹爪）运动类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GripperMoveType {
    Linear,
    Home,
    Grip,
}

/// 步进电机单轴运动
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SingleAxisStep {
    pub move_type: SingleAxisMoveType,
    pub duration_sec: f64,
    pub velocity_mm_sec: f64,
    pub acceleration_mm_sec_sq: f64,
    pub stop_condition: MoveStopCondition,
}

impl SingleAxisStep {
    /// 直线运动
    pub fn linear(duration_sec: f64, velocity_mm_sec: f64, acceleration_mm_sec_sq: f64) -> Self {
        Self {
            move_type: SingleAxisMoveType::Linear,
            duration_sec,
            velocity_mm_sec,
            acceleration_mm_sec_sq,
            stop_condition: MoveStopCondition::none(),
        }
    }

    /// 回零运动，以限位开关结束
    pub fn home(duration_sec: f64, velocity_mm_sec: f64) -> Self {
        let mut stop_condition = MoveStopCondition::none();
        stop_condition.set_limit_switch(true);
        Self {
            move_type: SingleAxisMoveType::Home,
            duration_sec,
            velocity_mm_sec,
            acceleration_mm_sec_sq: 0.0,
            stop_condition,
        }
    }

    pub fn with_stop_condition(mut self, stop_condition: MoveStopCondition) -> Self {
        self.stop_condition = stop_condition;
        self
    }
}

/// 枪头动作（齿轮电机）
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TipActionStep {
    pub action: PipetteTipActionType,
    pub duration_sec: f64,
    pub velocity_mm_sec: f64,
    pub acceleration_mm_sec_sq: f64,
    pub stop_condition: MoveStopCondition,
}

/// 有刷电机（夹爪）运动
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GripperStep {
    pub move_type: GripperMoveType,
    pub duration_sec: f64,
    pub duty_cycle: u32,
    pub encoder_position_um: i32,
    pub stay_engaged: bool,
    pub stop_condition: MoveStopCondition,
}

/// 单个节点在某个序号上的运动
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MoveGroupStep {
    SingleAxis(SingleAxisStep),
    TipAction(TipActionStep),
    Gripper(GripperStep),
}

impl MoveGroupStep {
    pub fn duration_sec(&self) -> f64 {
        match self {
            MoveGroupStep::SingleAxis(s) => s.duration_sec,
            MoveGroupStep::TipAction(s) => s.duration_sec,
            MoveGroupStep::Gripper(s) => s.duration_sec,
        }
    }

    pub fn stop_condition(&self) -> MoveStopCondition {
        match self {
            MoveGroupStep::SingleAxis(s) => s.stop_condition,
            MoveGroupStep::TipAction(s) => s.stop_condition,
            MoveGroupStep::Gripper(s) => s.stop_condition,
        }
    }

    pub fn is_tip_action(&self) -> bool {
        matches!(self, MoveGroupStep::TipAction(_))
    }
}

impl From<SingleAxisStep> for MoveGroupStep {
    fn from(step: SingleAxisStep) -> Self {
        MoveGroupStep::SingleAxis(step)
    }
}

impl From<TipActionStep> for MoveGroupStep {
    fn from(step: TipActionStep) -> Self {
        MoveGroupStep::TipAction(step)
    }
}

impl From<GripperStep> for MoveGroupStep {
    fn from(step: GripperStep) -> Self {
        MoveGroupStep::Gripper(step)
    }
}

/// 同一序号下各节点的运动
pub type SequenceStep = NodeMap<MoveGroupStep>;

/// 一个运动组
pub type MoveGroup = Vec<SequenceStep>;

/// 完整的运动计划
pub type MoveGroups = Vec<MoveGroup>;

/// 计划中是否包含任何运动
pub fn has_moves(move_groups: &MoveGroups) -> bool {
    move_groups
        .iter()
        .any(|group| group.iter().any(|sequence| !sequence.is_empty()))
}

/// 计划涉及的全部节点
pub fn plan_nodes(move_groups: &MoveGroups) -> BTreeSet<NodeId> {
    move_groups
        .iter()
        .flatten()
        .flat_map(|sequence| sequence.keys().copied())
        .collect()
}

/// 为多个节点构建同一序号的步骤
pub fn sequence_of<S>(steps: impl IntoIterator<Item = (NodeId, S)>) -> SequenceStep
where
    S: Into<MoveGroupStep>,
{
    steps.into_iter().map(|(node, step)| (node, step.into())).collect()
}
