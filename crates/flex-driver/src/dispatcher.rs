//! 运动组分发
//!
//! 逐组触发执行并在屏障上等待所有期望应答：
//!
//! 1. 广播 `ExecuteMoveGroupRequest`（带确认）
//! 2. 在 {消息, 取消, 截止时间} 上等待，直到该组的期望集合清空、
//!    出现需要停止的错误，或超时
//! 3. 需要停止或超时时广播 `StopRequest`，按"急停优先"合并错误后返回
//!
//! 所有状态只在调用方线程上修改；监听器只负责把消息转发到 channel。

use crate::cancel::CancelToken;
use crate::config::DispatchConfig;
use crate::error::{DriverError, MotionError};
use crate::messenger::Messenger;
use crate::scheduler::{ScheduledGroup, ScheduledMove};
use crate::status::MotorPositionStatus;
use crossbeam_channel::{Receiver, at, select};
use flex_protocol::{
    ArbitrationId, Envelope, ErrorCode, ErrorMessage, ErrorSeverity, ExecuteMoveGroupRequest,
    Message, MoveAckId, MoveCompleted, NodeId, TipActionResponse,
};
use std::collections::{BTreeMap, BTreeSet};
use std::time::{Duration, Instant};
use tracing::{debug, error, trace, warn};

/// 运动组等待时间
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GroupTiming {
    /// 超过只告警
    pub expected_time: Duration,
    /// 超过判定失败
    pub full_timeout: Duration,
}

impl GroupTiming {
    /// 根据计划时长计算等待时间
    ///
    /// 默认配置下 2.0s → (3.0s, 5.0s)，10.0s → (11.0s, 20.0s)。
    pub fn for_duration(duration_sec: f64, config: &DispatchConfig) -> Self {
        let expected = (duration_sec * config.expected_time_factor).max(config.expected_time_floor_s);
        let full = (duration_sec * config.full_timeout_factor).max(config.full_timeout_floor_s);
        Self {
            expected_time: Duration::from_secs_f64(expected.max(0.0)),
            full_timeout: Duration::from_secs_f64(full.max(0.0)),
        }
    }
}

/// 运动完成上报（普通轴或齿轮电机）
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MoveResponse {
    Completed(MoveCompleted),
    TipAction(TipActionResponse),
}

impl MoveResponse {
    pub fn group_id(&self) -> u8 {
        match self {
            MoveResponse::Completed(m) => m.group_id,
            MoveResponse::TipAction(m) => m.group_id,
        }
    }

    pub fn seq_id(&self) -> u8 {
        match self {
            MoveResponse::Completed(m) => m.seq_id,
            MoveResponse::TipAction(m) => m.seq_id,
        }
    }

    pub fn ack(&self) -> Option<MoveAckId> {
        match self {
            MoveResponse::Completed(m) => m.ack(),
            MoveResponse::TipAction(m) => m.ack(),
        }
    }

    pub fn status(&self) -> MotorPositionStatus {
        match self {
            MoveResponse::Completed(m) => MotorPositionStatus::from(m),
            MoveResponse::TipAction(m) => MotorPositionStatus::from(m),
        }
    }

    pub fn is_gear_motor(&self) -> bool {
        matches!(self, MoveResponse::TipAction(_))
    }
}

/// 一条已接受的完成记录
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CompletionPacket {
    pub arbitration_id: ArbitrationId,
    pub response: MoveResponse,
}

impl CompletionPacket {
    /// 上报节点
    pub fn node(&self) -> NodeId {
        self.arbitration_id.originating_node_id
    }
}

enum Barrier {
    Resolved,
    TimedOut,
}

/// 运动组分发器
pub struct MoveDispatcher {
    groups: Vec<ScheduledGroup>,
    /// 每组尚未应答的 (节点, 序号)
    pending: Vec<BTreeMap<(NodeId, u8), ScheduledMove>>,
    start_index: u8,
    config: DispatchConfig,
    ack_timeout: Duration,
    current: usize,
    completions: Vec<CompletionPacket>,
    errors: Vec<MotionError>,
    should_stop: bool,
    resolved: bool,
}

impl MoveDispatcher {
    pub fn new(
        groups: Vec<ScheduledGroup>,
        start_index: u8,
        config: DispatchConfig,
        ack_timeout: Duration,
    ) -> Self {
        let pending = groups
            .iter()
            .map(|group| {
                group
                    .moves
                    .iter()
                    .map(|m| ((m.node_id, m.seq_id), m.clone()))
                    .collect()
            })
            .collect();
        Self {
            groups,
            pending,
            start_index,
            config,
            ack_timeout,
            current: 0,
            completions: Vec::new(),
            errors: Vec::new(),
            should_stop: false,
            resolved: false,
        }
    }

    /// 依次执行全部运动组，返回按接收顺序排列的完成记录
    ///
    /// `messages` 必须在第一次触发执行之前就已注册监听，
    /// 否则可能丢失快速完成的应答。
    ///
    /// # 错误
    /// - `MotionError::EStopActivated`: 任意时刻收到急停
    /// - `MotionError::MotionFailed`: 超时或多个错误
    /// - `MotionError::Cancelled`: 调用方取消
    pub fn run<M: Messenger + ?Sized>(
        &mut self,
        messenger: &M,
        messages: &Receiver<Envelope>,
        cancel: &CancelToken,
    ) -> Result<Vec<CompletionPacket>, MotionError> {
        for index in 0..self.groups.len() {
            self.run_one_group(messenger, messages, cancel, index)?;
        }
        Ok(std::mem::take(&mut self.completions))
    }

    fn run_one_group<M: Messenger + ?Sized>(
        &mut self,
        messenger: &M,
        messages: &Receiver<Envelope>,
        cancel: &CancelToken,
        index: usize,
    ) -> Result<(), MotionError> {
        self.current = index;
        self.should_stop = false;
        self.resolved = false;

        let group_id = self.groups[index].group_id;
        if self.groups[index].moves.is_empty() {
            debug!("Group {} has no moves, skipping", group_id);
            return Ok(());
        }
        let nodes = self.groups[index].nodes();
        let timing = GroupTiming::for_duration(self.groups[index].duration_sec, &self.config);

        let execute = Message::ExecuteMoveGroupRequest(ExecuteMoveGroupRequest {
            group_id,
            start_trigger: 0,
            cancel_trigger: 0,
        });
        let code = messenger.ensure_send(NodeId::Broadcast, &execute, &nodes, self.ack_timeout)?;
        if code != ErrorCode::Ok {
            error!("Execute of group {} was not acknowledged cleanly: {:?}", group_id, code);
        }

        debug!(
            "Executing group {} on {:?} (expected {:.3}s, timeout {:.3}s)",
            group_id,
            nodes,
            timing.expected_time.as_secs_f64(),
            timing.full_timeout.as_secs_f64()
        );
        let start = Instant::now();
        let outcome = match self.wait_for_group(messages, cancel, start + timing.full_timeout) {
            Ok(outcome) => outcome,
            Err(MotionError::Cancelled) => {
                warn!("Group {} cancelled, stopping motion", group_id);
                self.send_stop(messenger, &nodes);
                return Err(MotionError::Cancelled);
            },
            Err(e) => return Err(e),
        };
        let elapsed = start.elapsed();

        match outcome {
            Barrier::Resolved if !self.should_stop => {
                if elapsed >= timing.expected_time {
                    warn!(
                        "Group {} took {:.3}s, longer than the expected {:.3}s",
                        group_id,
                        elapsed.as_secs_f64(),
                        timing.expected_time.as_secs_f64()
                    );
                }
                let errors = std::mem::take(&mut self.errors);
                if !errors.is_empty() {
                    warn!("Group {} completed with recoverable errors: {:?}", group_id, errors);
                }
                Ok(())
            },
            Barrier::Resolved => {
                let remaining = self.missing_nodes(index);
                let targets = if remaining.is_empty() { nodes } else { remaining };
                self.send_stop(messenger, &targets);
                let errors = std::mem::take(&mut self.errors);
                Err(MotionError::merge(errors).unwrap_or_else(|| MotionError::MoveConditionNotMet {
                    node: None,
                    group_id: Some(group_id),
                    detail: format!("group {} stopped without a reported error", group_id),
                }))
            },
            Barrier::TimedOut => {
                let missing = self.missing_nodes(index);
                error!(
                    "Group {} timed out after {:.3}s, missing {:?}",
                    group_id,
                    elapsed.as_secs_f64(),
                    missing
                );
                self.send_stop(messenger, &missing);
                Err(self.timeout_error(&missing, timing, elapsed))
            },
        }
    }

    /// 在屏障上等待
    fn wait_for_group(
        &mut self,
        messages: &Receiver<Envelope>,
        cancel: &CancelToken,
        deadline: Instant,
    ) -> Result<Barrier, MotionError> {
        let timer = at(deadline);
        loop {
            if self.resolved {
                return Ok(Barrier::Resolved);
            }
            select! {
                recv(messages) -> msg => match msg {
                    Ok(envelope) => self.handle_envelope(&envelope),
                    Err(_) => return Err(DriverError::ChannelClosed.into()),
                },
                recv(cancel.receiver()) -> _ => return Err(MotionError::Cancelled),
                recv(timer) -> _ => return Ok(Barrier::TimedOut),
            }
        }
    }

    /// 处理一条消息（完成上报或错误上报），其余消息忽略
    pub(crate) fn handle_envelope(&mut self, envelope: &Envelope) {
        match &envelope.message {
            Message::MoveCompleted(m) => {
                self.handle_move_response(envelope.arbitration_id, MoveResponse::Completed(*m))
            },
            Message::TipActionResponse(m) => {
                self.handle_move_response(envelope.arbitration_id, MoveResponse::TipAction(*m))
            },
            Message::ErrorMessage(m) => self.handle_error(envelope.origin(), m),
            _ => {},
        }
    }

    fn group_index(&self, group_id: u8) -> Option<usize> {
        group_id
            .checked_sub(self.start_index)
            .map(usize::from)
            .filter(|index| *index < self.groups.len())
    }

    fn handle_move_response(&mut self, arbitration_id: ArbitrationId, response: MoveResponse) {
        let node = arbitration_id.originating_node_id;
        let group_id = response.group_id();
        let seq_id = response.seq_id();

        // 其他 runner 的组号区间
        let Some(index) = self.group_index(group_id) else {
            trace!("Ignoring completion for foreign group {} from {}", group_id, node);
            return;
        };
        // 只有正在执行的组能消耗期望应答，其他组的提前或滞后应答一律丢弃
        if index != self.current {
            warn!(
                "Ignoring completion from {} for group {} while group {} is running",
                node, group_id, self.groups[self.current].group_id
            );
            return;
        }

        let packet = CompletionPacket {
            arbitration_id,
            response,
        };
        let key = (node, seq_id);
        let Some(entry) = self.pending[index].get_mut(&key) else {
            warn!(
                "Unexpected completion from {} for group {} seq {}; it may have leaked from an earlier timed-out group",
                node, group_id, seq_id
            );
            return;
        };

        if let MoveResponse::TipAction(tip) = &response {
            let before = entry.gear_motors.len();
            entry.gear_motors.retain(|gear| *gear != tip.gear_motor_id);
            if entry.gear_motors.len() == before {
                warn!(
                    "Duplicate or unexpected gear motor {:?} from {} for group {} seq {}",
                    tip.gear_motor_id, node, group_id, seq_id
                );
                return;
            }
            self.completions.push(packet);
            if !entry.gear_motors.is_empty() {
                return;
            }
        } else {
            self.completions.push(packet);
        }

        let Some(scheduled) = self.pending[index].remove(&key) else {
            return;
        };
        let ack = response.ack();

        if scheduled.stop_condition.requires_limit_switch()
            && ack != Some(MoveAckId::StoppedByCondition)
        {
            error!(
                "{} finished group {} seq {} without reaching its limit switch (ack {:?})",
                node, group_id, seq_id, ack
            );
            self.errors.push(MotionError::MoveConditionNotMet {
                node: Some(node),
                group_id: Some(group_id),
                detail: format!(
                    "{} did not stop on limit switch (stop condition 0x{:02X}, ack {:?})",
                    node,
                    scheduled.stop_condition.bits(),
                    ack
                ),
            });
            self.should_stop = true;
            self.resolved = true;
        }

        if scheduled.stop_condition.stall() && ack == Some(MoveAckId::StoppedByCondition) {
            debug!(
                "{} stalled in group {} seq {}, dropping its remaining moves",
                node, group_id, seq_id
            );
            self.pending[index].retain(|(pending_node, _), _| *pending_node != node);
        }

        if self.pending[index].is_empty() {
            self.resolved = true;
        }
    }

    fn handle_error(&mut self, origin: NodeId, message: &ErrorMessage) {
        let Some(err) = MotionError::from_error_message(origin, message) else {
            return;
        };
        if message.severity == ErrorSeverity::Unrecoverable {
            error!("Unrecoverable error from {}: {}", origin, err);
            self.should_stop = true;
            self.resolved = true;
        } else {
            warn!("Error from {} ({:?}): {}", origin, message.severity, err);
        }
        self.errors.push(err);
    }

    fn missing_nodes(&self, index: usize) -> Vec<NodeId> {
        self.pending[index]
            .keys()
            .map(|(node, _)| *node)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    fn send_stop<M: Messenger + ?Sized>(&self, messenger: &M, nodes: &[NodeId]) {
        match messenger.ensure_send(NodeId::Broadcast, &Message::StopRequest, nodes, self.ack_timeout)
        {
            Ok(ErrorCode::StopRequested) => {},
            Ok(code) => warn!("Unexpected reply to stop request: {:?}", code),
            Err(e) => error!("Failed to send stop request: {}", e),
        }
    }

    fn timeout_error(
        &mut self,
        missing: &[NodeId],
        timing: GroupTiming,
        elapsed: Duration,
    ) -> MotionError {
        let mut errors = std::mem::take(&mut self.errors);
        if let Some(pos) = errors.iter().position(MotionError::is_estop) {
            return errors.swap_remove(pos);
        }
        let names: Vec<&str> = missing.iter().map(|node| node.name()).collect();
        let mut detail = BTreeMap::new();
        detail.insert("missing-nodes".to_string(), names.join(","));
        detail.insert(
            "full-timeout".to_string(),
            format!("{:.3}", timing.full_timeout.as_secs_f64()),
        );
        detail.insert(
            "expected-time".to_string(),
            format!("{:.3}", timing.expected_time.as_secs_f64()),
        );
        detail.insert("elapsed".to_string(), format!("{:.3}", elapsed.as_secs_f64()));
        MotionError::MotionFailed {
            message: "Command timed out".to_string(),
            detail,
            wrapping: errors,
        }
    }
}
