//! 运动计划文件
//!
//! TOML 格式，每个运动组是一组按序号排列的步骤表，键为节点名：
//!
//! ```toml
//! [[groups]]
//! sequence = [
//!     { gantry_x = { type = "home", duration_sec = 5.0, velocity_mm_sec = -40.0 } },
//!     { gantry_x = { type = "linear", duration_sec = 1.0, velocity_mm_sec = 20.0 } },
//! ]
//!
//! [[groups]]
//! sequence = [{ gantry_y = { type = "linear", duration_sec = 0.5, velocity_mm_sec = 40.0 } }]
//! ```

use anyhow::{Context, Result};
use flex_driver::{
    GripperMoveType, GripperStep, MoveGroup, MoveGroupStep, MoveGroups, SequenceStep,
    SingleAxisStep, TipActionStep,
};
use flex_protocol::{MoveStopCondition, NodeId, PipetteTipActionType};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;

/// 计划文件
#[derive(Debug, Deserialize)]
pub struct PlanFile {
    #[serde(default)]
    pub groups: Vec<PlanGroup>,
}

/// 一个运动组
#[derive(Debug, Deserialize)]
pub struct PlanGroup {
    #[serde(default)]
    pub sequence: Vec<BTreeMap<String, PlanStep>>,
}

/// 枪头动作类型
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TipActionKind {
    Clamp,
    Home,
}

impl From<TipActionKind> for PipetteTipActionType {
    fn from(kind: TipActionKind) -> Self {
        match kind {
            TipActionKind::Clamp => PipetteTipActionType::Clamp,
            TipActionKind::Home => PipetteTipActionType::Home,
        }
    }
}

/// 单个节点的步骤
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PlanStep {
    Linear {
        duration_sec: f64,
        velocity_mm_sec: f64,
        #[serde(default)]
        acceleration_mm_sec_sq: f64,
        #[serde(default)]
        stop_condition: u8,
    },
    Home {
        duration_sec: f64,
        velocity_mm_sec: f64,
    },
    TipAction {
        action: TipActionKind,
        duration_sec: f64,
        velocity_mm_sec: f64,
        #[serde(default)]
        acceleration_mm_sec_sq: f64,
        #[serde(default)]
        stop_condition: u8,
    },
    GripperLinear {
        duration_sec: f64,
        duty_cycle: u32,
        #[serde(default)]
        encoder_position_um: i32,
        #[serde(default)]
        stay_engaged: bool,
    },
    GripperHome {
        duration_sec: f64,
        duty_cycle: u32,
    },
    Grip {
        duration_sec: f64,
        duty_cycle: u32,
        #[serde(default)]
        stay_engaged: bool,
    },
}

fn gripper(
    move_type: GripperMoveType,
    duration_sec: f64,
    duty_cycle: u32,
    encoder_position_um: i32,
    stay_engaged: bool,
) -> MoveGroupStep {
    // 夹取以占空比驱动，不设停止条件
    let mut stop_condition = MoveStopCondition::none();
    match move_type {
        GripperMoveType::Home => stop_condition.set_limit_switch(true),
        GripperMoveType::Linear => stop_condition.set_encoder_position(true),
        GripperMoveType::Grip => {},
    }
    GripperStep {
        move_type,
        duration_sec,
        duty_cycle,
        encoder_position_um,
        stay_engaged,
        stop_condition,
    }
    .into()
}

impl PlanStep {
    pub fn to_step(&self) -> MoveGroupStep {
        match *self {
            PlanStep::Linear {
                duration_sec,
                velocity_mm_sec,
                acceleration_mm_sec_sq,
                stop_condition,
            } => SingleAxisStep::linear(duration_sec, velocity_mm_sec, acceleration_mm_sec_sq)
                .with_stop_condition(MoveStopCondition::from_bits(stop_condition))
                .into(),
            PlanStep::Home {
                duration_sec,
                velocity_mm_sec,
            } => SingleAxisStep::home(duration_sec, velocity_mm_sec).into(),
            PlanStep::TipAction {
                action,
                duration_sec,
                velocity_mm_sec,
                acceleration_mm_sec_sq,
                stop_condition,
            } => TipActionStep {
                action: action.into(),
                duration_sec,
                velocity_mm_sec,
                acceleration_mm_sec_sq,
                stop_condition: MoveStopCondition::from_bits(stop_condition),
            }
            .into(),
            PlanStep::GripperLinear {
                duration_sec,
                duty_cycle,
                encoder_position_um,
                stay_engaged,
            } => gripper(
                GripperMoveType::Linear,
                duration_sec,
                duty_cycle,
                encoder_position_um,
                stay_engaged,
            ),
            PlanStep::GripperHome {
                duration_sec,
                duty_cycle,
            } => gripper(GripperMoveType::Home, duration_sec, duty_cycle, 0, false),
            PlanStep::Grip {
                duration_sec,
                duty_cycle,
                stay_engaged,
            } => gripper(GripperMoveType::Grip, duration_sec, duty_cycle, 0, stay_engaged),
        }
    }
}

impl PlanFile {
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Invalid move plan")
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read plan {}", path.display()))?;
        Self::parse(&content)
    }

    /// 转换为运动组，校验节点名
    pub fn to_move_groups(&self) -> Result<MoveGroups> {
        self.groups
            .iter()
            .enumerate()
            .map(|(group_index, group)| {
                group
                    .sequence
                    .iter()
                    .enumerate()
                    .map(|(seq_index, steps)| {
                        steps
                            .iter()
                            .map(|(name, spec)| {
                                let node: NodeId = name.parse().with_context(|| {
                                    format!("group {} seq {}", group_index, seq_index)
                                })?;
                                if node == NodeId::Broadcast || node == NodeId::Host {
                                    anyhow::bail!(
                                        "group {} seq {}: '{}' cannot execute moves",
                                        group_index,
                                        seq_index,
                                        name
                                    );
                                }
                                Ok((node, spec.to_step()))
                            })
                            .collect::<Result<SequenceStep>>()
                    })
                    .collect::<Result<MoveGroup>>()
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flex_driver::SingleAxisMoveType;
    use std::io::Write;

    fn single_axis_type(step: &MoveGroupStep) -> Option<SingleAxisMoveType> {
        match step {
            MoveGroupStep::SingleAxis(s) => Some(s.move_type),
            _ => None,
        }
    }

    const PLAN: &str = r#"
[[groups]]
sequence = [
    { gantry_x = { type = "home", duration_sec = 5.0, velocity_mm_sec = -40.0 } },
    { gantry_x = { type = "linear", duration_sec = 1.0, velocity_mm_sec = 20.0, stop_condition = 16 }, gantry_y = { type = "linear", duration_sec = 0.5, velocity_mm_sec = 40.0 } },
]

[[groups]]
sequence = [
    { pipette_left = { type = "tip_action", action = "clamp", duration_sec = 2.0, velocity_mm_sec = 5.5 } },
    { gripper_g = { type = "grip", duration_sec = 1.0, duty_cycle = 50 } },
]
"#;

    #[test]
    fn test_parse_plan() {
        let plan = PlanFile::parse(PLAN).unwrap();
        let groups = plan.to_move_groups().unwrap();
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].len(), 2);
        assert_eq!(
            single_axis_type(&groups[0][0][&NodeId::GantryX]),
            Some(SingleAxisMoveType::Home)
        );
        assert!(groups[0][1][&NodeId::GantryX].stop_condition().stall());
        assert!(groups[1][0][&NodeId::PipetteLeft].is_tip_action());
        assert_eq!(groups[1][1][&NodeId::GripperG].stop_condition().bits(), 0);
    }

    #[test]
    fn test_unknown_node_is_rejected() {
        let plan = PlanFile::parse(
            r#"
[[groups]]
sequence = [{ elbow = { type = "linear", duration_sec = 1.0, velocity_mm_sec = 1.0 } }]
"#,
        )
        .unwrap();
        assert!(plan.to_move_groups().is_err());
    }

    #[test]
    fn test_broadcast_cannot_move() {
        let plan = PlanFile::parse(
            r#"
[[groups]]
sequence = [{ broadcast = { type = "linear", duration_sec = 1.0, velocity_mm_sec = 1.0 } }]
"#,
        )
        .unwrap();
        assert!(plan.to_move_groups().is_err());
    }

    #[test]
    fn test_unknown_step_type_is_rejected() {
        assert!(
            PlanFile::parse(
                r#"
[[groups]]
sequence = [{ gantry_x = { type = "teleport", duration_sec = 1.0 } }]
"#,
            )
            .is_err()
        );
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(PLAN.as_bytes()).unwrap();
        let plan = PlanFile::load(file.path()).unwrap();
        assert_eq!(plan.groups.len(), 2);
    }
}
