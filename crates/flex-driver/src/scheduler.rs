//! 运动调度
//!
//! 把 [`MoveGroups`] 翻译为各节点的"添加运动"请求并逐条带确认发送，
//! 同时记录分发阶段需要的期望应答集合。
//!
//! 组号为 `group_index + start_index`，不同的 runner 使用互不重叠的
//! 组号区间即可共享同一条总线。

use crate::config::MotionConfig;
use crate::error::MotionError;
use crate::messenger::Messenger;
use crate::move_group::{
    GripperMoveType, MoveGroupStep, MoveGroups, SingleAxisMoveType,
};
use flex_protocol::{
    AddLinearMoveRequest, ErrorCode, GearMotorId, GripperMoveRequest, HomeRequest, Message,
    MoveStopCondition, NodeId, TipActionRequest, checked_acceleration_to_fixed,
    checked_duration_to_ticks, checked_velocity_to_fixed,
};
use smallvec::SmallVec;
use tracing::{debug, error};

/// 一个节点在某个序号上的期望应答
#[derive(Debug, Clone, PartialEq)]
pub struct ScheduledMove {
    pub node_id: NodeId,
    pub seq_id: u8,
    /// 实际下发的停止条件（已合并 ignore_stalls）
    pub stop_condition: MoveStopCondition,
    pub duration_sec: f64,
    /// 枪头动作需要等待的齿轮电机；普通运动为空
    pub gear_motors: SmallVec<[GearMotorId; 2]>,
}

/// 已下发到节点的运动组
#[derive(Debug, Clone, PartialEq)]
pub struct ScheduledGroup {
    /// 总线上的绝对组号
    pub group_id: u8,
    pub moves: Vec<ScheduledMove>,
    /// 计划时长：各序号最长步骤时长之和
    pub duration_sec: f64,
}

impl ScheduledGroup {
    /// 参与该组的节点（去重、有序）
    pub fn nodes(&self) -> Vec<NodeId> {
        let mut nodes: Vec<NodeId> = self.moves.iter().map(|m| m.node_id).collect();
        nodes.sort();
        nodes.dedup();
        nodes
    }
}

/// 运动调度器
pub struct MoveScheduler<'a> {
    config: &'a MotionConfig,
    start_index: u8,
    ignore_stalls: bool,
}

impl<'a> MoveScheduler<'a> {
    pub fn new(config: &'a MotionConfig, start_index: u8, ignore_stalls: bool) -> Self {
        Self {
            config,
            start_index,
            ignore_stalls,
        }
    }

    /// 计算绝对组号
    ///
    /// # 错误
    /// - `MotionError::General`: 超出 u8 范围
    pub fn group_id(&self, group_index: usize) -> Result<u8, MotionError> {
        u8::try_from(group_index)
            .ok()
            .and_then(|index| self.start_index.checked_add(index))
            .ok_or_else(|| {
                MotionError::General(format!(
                    "Group index {} with start index {} exceeds the group id range",
                    group_index, self.start_index
                ))
            })
    }

    /// 实际下发的停止条件
    fn effective_stop_condition(&self, step: &MoveGroupStep) -> MoveStopCondition {
        let mut stop_condition = step.stop_condition();
        if self.ignore_stalls
            && let MoveGroupStep::SingleAxis(s) = step
            && s.move_type == SingleAxisMoveType::Linear
        {
            stop_condition.set_ignore_stalls(true);
        }
        stop_condition
    }

    /// 把一个步骤编码为对应的请求消息
    ///
    /// # 错误
    /// - `MotionError::Driver`（`ProtocolError::OutOfRange`）: 时长、速度或加速度超出线上表示范围
    pub fn build_message(
        &self,
        group_id: u8,
        seq_id: u8,
        step: &MoveGroupStep,
    ) -> Result<Message, MotionError> {
        let rates = &self.config.interrupts;
        let message = match step {
            MoveGroupStep::SingleAxis(s) => match s.move_type {
                SingleAxisMoveType::Linear => Message::AddLinearMoveRequest(AddLinearMoveRequest {
                    group_id,
                    seq_id,
                    duration: checked_duration_to_ticks(s.duration_sec, rates.stepper)?,
                    acceleration_um: checked_acceleration_to_fixed(
                        s.acceleration_mm_sec_sq,
                        rates.stepper,
                    )?,
                    velocity_mm: checked_velocity_to_fixed(s.velocity_mm_sec, rates.stepper)?,
                    request_stop_condition: self.effective_stop_condition(step),
                }),
                SingleAxisMoveType::Home => Message::HomeRequest(HomeRequest {
                    group_id,
                    seq_id,
                    duration: checked_duration_to_ticks(s.duration_sec, rates.stepper)?,
                    velocity_mm: checked_velocity_to_fixed(s.velocity_mm_sec, rates.stepper)?,
                }),
            },
            MoveGroupStep::TipAction(s) => Message::TipActionRequest(TipActionRequest {
                group_id,
                seq_id,
                duration: checked_duration_to_ticks(s.duration_sec, rates.tip_action)?,
                velocity: checked_velocity_to_fixed(s.velocity_mm_sec, rates.tip_action)?,
                action: s.action,
                request_stop_condition: s.stop_condition,
                acceleration: checked_acceleration_to_fixed(
                    s.acceleration_mm_sec_sq,
                    rates.tip_action,
                )?,
            }),
            MoveGroupStep::Gripper(s) => {
                let request = GripperMoveRequest {
                    group_id,
                    seq_id,
                    duration: checked_duration_to_ticks(s.duration_sec, rates.brushed)?,
                    duty_cycle: s.duty_cycle,
                    encoder_position_um: s.encoder_position_um,
                    stay_engaged: s.stay_engaged,
                };
                match s.move_type {
                    GripperMoveType::Linear => Message::AddBrushedLinearMoveRequest(request),
                    GripperMoveType::Home => Message::GripperHomeRequest(request),
                    GripperMoveType::Grip => Message::GripperGripRequest(request),
                }
            },
        };
        Ok(message)
    }

    /// 逐条下发计划中的全部运动
    ///
    /// 任一节点对"添加运动"返回非 `ok` 时立即中止，不再发送后续请求。
    ///
    /// # 错误
    /// - `MotionError::General`: 组号或序号超出范围
    /// - `MotionError::ScheduleFailed`: 节点拒绝
    /// - `MotionError::Driver`: 传输失败，或步骤参数超出线上表示范围（该步骤不会发送）
    pub fn schedule<M: Messenger + ?Sized>(
        &self,
        messenger: &M,
        move_groups: &MoveGroups,
    ) -> Result<Vec<ScheduledGroup>, MotionError> {
        let ack_timeout = self.config.messenger.ack_timeout();
        let mut scheduled = Vec::with_capacity(move_groups.len());

        for (group_index, group) in move_groups.iter().enumerate() {
            let group_id = self.group_id(group_index)?;
            let mut moves = Vec::new();
            let mut duration_sec = 0.0;

            for (seq_index, sequence) in group.iter().enumerate() {
                let seq_id = u8::try_from(seq_index).map_err(|_| {
                    MotionError::General(format!(
                        "Group {} has more than 256 sequence steps",
                        group_id
                    ))
                })?;
                let mut longest = 0.0f64;

                for (node_id, step) in sequence {
                    let message = self.build_message(group_id, seq_id, step)?;
                    let code = messenger.ensure_send(*node_id, &message, &[*node_id], ack_timeout)?;
                    if code != ErrorCode::Ok {
                        error!(
                            "{} rejected {:?} for group {} seq {}: {:?}",
                            node_id,
                            message.message_id(),
                            group_id,
                            seq_id,
                            code
                        );
                        return Err(MotionError::ScheduleFailed {
                            node: *node_id,
                            group_id,
                            seq_id,
                            code,
                        });
                    }

                    let gear_motors = if step.is_tip_action() {
                        SmallVec::from_slice(&[GearMotorId::Left, GearMotorId::Right])
                    } else {
                        SmallVec::new()
                    };
                    moves.push(ScheduledMove {
                        node_id: *node_id,
                        seq_id,
                        stop_condition: self.effective_stop_condition(step),
                        duration_sec: step.duration_sec(),
                        gear_motors,
                    });
                    longest = longest.max(step.duration_sec());
                }
                duration_sec += longest;
            }

            debug!(
                "Scheduled group {} with {} moves ({:.3}s planned)",
                group_id,
                moves.len(),
                duration_sec
            );
            scheduled.push(ScheduledGroup {
                group_id,
                moves,
                duration_sec,
            });
        }
        Ok(scheduled)
    }
}
