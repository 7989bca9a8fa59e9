//! 运动组执行入口
//!
//! [`MoveGroupRunner`] 串起"清空 → 调度 → 分发 → 归约"：
//!
//! ```rust,ignore
//! let mut runner = MoveGroupRunner::new(move_groups, 0, false);
//! runner.schedule(&messenger)?;
//! let positions = runner.dispatch(&messenger)?;
//! ```

use crate::cancel::CancelToken;
use crate::config::MotionConfig;
use crate::dispatcher::{CompletionPacket, MoveDispatcher};
use crate::error::MotionError;
use crate::listener::{ChannelListener, ListenerGuard};
use crate::messenger::Messenger;
use crate::move_group::{MoveGroups, has_moves, plan_nodes};
use crate::scheduler::{MoveScheduler, ScheduledGroup};
use crate::status::{MotorPositionStatus, NodeMap};
use flex_protocol::{ErrorCode, Message, MessageId, NodeId};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// 运动组执行器
pub struct MoveGroupRunner {
    move_groups: MoveGroups,
    start_index: u8,
    ignore_stalls: bool,
    config: MotionConfig,
    scheduled: Option<Vec<ScheduledGroup>>,
}

impl MoveGroupRunner {
    /// 创建执行器
    ///
    /// `start_index` 是第一个运动组在总线上的组号；多个 runner 共享总线时
    /// 需使用互不重叠的区间。
    pub fn new(move_groups: MoveGroups, start_index: u8, ignore_stalls: bool) -> Self {
        Self {
            move_groups,
            start_index,
            ignore_stalls,
            config: MotionConfig::default(),
            scheduled: None,
        }
    }

    pub fn with_config(mut self, config: MotionConfig) -> Self {
        self.config = config;
        self
    }

    /// 是否已完成调度、等待分发
    pub fn is_scheduled(&self) -> bool {
        self.scheduled.is_some()
    }

    /// 下发全部运动
    ///
    /// 空计划不产生任何总线流量。`start_index == 0` 时先广播清空节点上的旧运动组。
    pub fn schedule<M: Messenger + ?Sized>(&mut self, messenger: &M) -> Result<(), MotionError> {
        if !has_moves(&self.move_groups) {
            debug!("No moves to schedule");
            self.scheduled = Some(Vec::new());
            return Ok(());
        }

        if self.start_index == 0 {
            self.clear_move_groups(messenger)?;
        }

        let scheduler = MoveScheduler::new(&self.config, self.start_index, self.ignore_stalls);
        let groups = scheduler.schedule(messenger, &self.move_groups)?;
        info!(
            "Scheduled {} move groups starting at {}",
            groups.len(),
            self.start_index
        );
        self.scheduled = Some(groups);
        Ok(())
    }

    fn clear_move_groups<M: Messenger + ?Sized>(&self, messenger: &M) -> Result<(), MotionError> {
        let nodes: Vec<NodeId> = plan_nodes(&self.move_groups).into_iter().collect();
        let code = messenger.ensure_send(
            NodeId::Broadcast,
            &Message::ClearAllMoveGroupsRequest,
            &nodes,
            self.config.messenger.ack_timeout(),
        )?;
        if code != ErrorCode::Ok {
            warn!("Clearing move groups on {:?} returned {:?}", nodes, code);
        }
        Ok(())
    }

    /// 执行已调度的运动组，返回各节点最终位置
    ///
    /// # 错误
    /// - `MotionError::General`: 尚未调度
    /// - 其余见 [`MoveDispatcher::run`]
    pub fn dispatch<M: Messenger + ?Sized>(
        &mut self,
        messenger: &M,
    ) -> Result<NodeMap<MotorPositionStatus>, MotionError> {
        self.dispatch_with_cancel(messenger, &CancelToken::never())
    }

    /// 同 [`dispatch`](Self::dispatch)，可被 `cancel` 中断
    pub fn dispatch_with_cancel<M: Messenger + ?Sized>(
        &mut self,
        messenger: &M,
        cancel: &CancelToken,
    ) -> Result<NodeMap<MotorPositionStatus>, MotionError> {
        // 节点执行后即清除运动组，已分发的调度结果不能复用
        let groups = self.scheduled.take().ok_or_else(|| {
            MotionError::General("Move groups must be scheduled before dispatch".to_string())
        })?;
        if groups.is_empty() {
            return Ok(NodeMap::new());
        }

        let (listener, messages) = ChannelListener::new(&[
            MessageId::MoveCompleted,
            MessageId::TipActionResponse,
            MessageId::ErrorMessage,
        ]);
        let _guard = ListenerGuard::new(messenger, Arc::new(listener));

        let mut dispatcher = MoveDispatcher::new(
            groups,
            self.start_index,
            self.config.dispatch.clone(),
            self.config.messenger.ack_timeout(),
        );
        let completions = dispatcher.run(messenger, &messages, cancel)?;
        Ok(accumulate_move_completions(&completions))
    }

    /// 调度并执行
    pub fn run<M: Messenger + ?Sized>(
        &mut self,
        messenger: &M,
    ) -> Result<NodeMap<MotorPositionStatus>, MotionError> {
        self.run_with_cancel(messenger, &CancelToken::never())
    }

    pub fn run_with_cancel<M: Messenger + ?Sized>(
        &mut self,
        messenger: &M,
        cancel: &CancelToken,
    ) -> Result<NodeMap<MotorPositionStatus>, MotionError> {
        self.schedule(messenger)?;
        self.dispatch_with_cancel(messenger, cancel)
    }
}

/// 将完成记录归约为各节点最终位置
///
/// 每个节点取 `(group_id, seq_id)` 最大的一条；同一节点同时有普通完成与
/// 齿轮电机完成时以普通完成为准。
pub fn accumulate_move_completions(
    completions: &[CompletionPacket],
) -> NodeMap<MotorPositionStatus> {
    let mut ordinary: NodeMap<((u8, u8), MotorPositionStatus)> = NodeMap::new();
    let mut gear: NodeMap<((u8, u8), MotorPositionStatus)> = NodeMap::new();

    for packet in completions {
        let key = (packet.response.group_id(), packet.response.seq_id());
        let table = if packet.response.is_gear_motor() {
            &mut gear
        } else {
            &mut ordinary
        };
        let newer = table
            .get(&packet.node())
            .is_none_or(|(existing, _)| key >= *existing);
        if newer {
            table.insert(packet.node(), (key, packet.response.status()));
        }
    }

    let mut positions: NodeMap<MotorPositionStatus> = ordinary
        .into_iter()
        .map(|(node, (_, status))| (node, status))
        .collect();
    for (node, (_, status)) in gear {
        positions.entry(node).or_insert(status);
    }
    positions
}

/// 一次性执行一份运动计划
pub fn run_move_groups<M: Messenger + ?Sized>(
    messenger: &M,
    move_groups: MoveGroups,
    start_index: u8,
    ignore_stalls: bool,
    config: &MotionConfig,
    cancel: &CancelToken,
) -> Result<NodeMap<MotorPositionStatus>, MotionError> {
    MoveGroupRunner::new(move_groups, start_index, ignore_stalls)
        .with_config(config.clone())
        .run_with_cancel(messenger, cancel)
}
