//! 一次性查询
//!
//! 发送请求，按节点收集第一条匹配的应答，超时列出缺失节点。
//! 调用期间只注册一个监听器，任何退出路径都会注销。

use crate::error::{DriverError, MotionError};
use crate::listener::{ChannelListener, ListenerGuard};
use crate::messenger::Messenger;
use crate::status::{MotorPositionStatus, NodeMap};
use crossbeam_channel::RecvTimeoutError;
use flex_protocol::{Message, MessageId, NodeId};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error};

/// 请求的寻址方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestTarget {
    /// 广播一次
    Broadcast,
    /// 逐个节点单播
    EachNode,
}

/// 发送请求并收集每个节点的第一条应答
///
/// 只接受 `response_id` 且来源属于 `nodes` 的消息；`extract` 返回 `None`
/// 的消息视为不匹配。
///
/// # 错误
/// - `MotionError::CommandTimedOut`: 超时，`missing` 为未应答节点
/// - `MotionError::Driver`: 发送失败或接收线程已退出
pub fn gather<M, T, F>(
    messenger: &M,
    request: &Message,
    target: RequestTarget,
    nodes: &[NodeId],
    response_id: MessageId,
    timeout: Duration,
    mut extract: F,
) -> Result<NodeMap<T>, MotionError>
where
    M: Messenger + ?Sized,
    F: FnMut(&Message) -> Option<T>,
{
    let expected: BTreeSet<NodeId> = nodes.iter().copied().collect();
    let mut responses = NodeMap::new();
    if expected.is_empty() {
        return Ok(responses);
    }

    let (listener, rx) = ChannelListener::new(&[response_id]);
    let _guard = ListenerGuard::new(messenger, Arc::new(listener));

    match target {
        RequestTarget::Broadcast => messenger.send(NodeId::Broadcast, request)?,
        RequestTarget::EachNode => {
            for node in &expected {
                messenger.send(*node, request)?;
            }
        },
    }

    let deadline = Instant::now() + timeout;
    while responses.len() < expected.len() {
        match rx.recv_deadline(deadline) {
            Ok(envelope) => {
                let origin = envelope.origin();
                if !expected.contains(&origin) || responses.contains_key(&origin) {
                    continue;
                }
                if let Some(value) = extract(&envelope.message) {
                    responses.insert(origin, value);
                }
            },
            Err(RecvTimeoutError::Timeout) => {
                let missing: Vec<NodeId> = expected
                    .iter()
                    .filter(|node| !responses.contains_key(*node))
                    .copied()
                    .collect();
                error!("Timed out waiting for {:?} from {:?}", response_id, missing);
                return Err(MotionError::CommandTimedOut {
                    message: format!("No {:?} received", response_id),
                    missing,
                });
            },
            Err(RecvTimeoutError::Disconnected) => {
                return Err(DriverError::ChannelClosed.into());
            },
        }
    }
    Ok(responses)
}

/// 读取限位开关状态（位图）
pub fn get_limit_switches<M: Messenger + ?Sized>(
    messenger: &M,
    nodes: &[NodeId],
    timeout: Duration,
) -> Result<NodeMap<u8>, MotionError> {
    gather(
        messenger,
        &Message::ReadLimitSwitchRequest,
        RequestTarget::EachNode,
        nodes,
        MessageId::ReadLimitSwitchResponse,
        timeout,
        |message| match message {
            Message::ReadLimitSwitchResponse(r) => Some(r.switch_status),
            _ => None,
        },
    )
}

/// 读取电机位置
pub fn get_motor_position<M: Messenger + ?Sized>(
    messenger: &M,
    nodes: &[NodeId],
    timeout: Duration,
) -> Result<NodeMap<MotorPositionStatus>, MotionError> {
    gather(
        messenger,
        &Message::MotorPositionRequest,
        RequestTarget::EachNode,
        nodes,
        MessageId::MotorPositionResponse,
        timeout,
        |message| match message {
            Message::MotorPositionResponse(r) => Some(MotorPositionStatus::from(r)),
            _ => None,
        },
    )
}

/// 用编码器重新估计步进位置
///
/// 电机未上电时节点无法刷新位置，返回 `RoboticsControl`。
pub fn update_motor_position_estimation<M: Messenger + ?Sized>(
    messenger: &M,
    nodes: &[NodeId],
    timeout: Duration,
) -> Result<NodeMap<MotorPositionStatus>, MotionError> {
    let positions = gather(
        messenger,
        &Message::UpdateMotorPositionEstimationRequest,
        RequestTarget::EachNode,
        nodes,
        MessageId::UpdateMotorPositionEstimationResponse,
        timeout,
        |message| match message {
            Message::UpdateMotorPositionEstimationResponse(r) => {
                Some(MotorPositionStatus::from(r))
            },
            _ => None,
        },
    )?;

    if let Some((node, _)) = positions.iter().find(|(_, status)| !status.motor_ok) {
        return Err(MotionError::RoboticsControl {
            node: *node,
            message: "Could not update motor position estimation; is the motor enabled?"
                .to_string(),
        });
    }
    debug!("Updated position estimation for {:?}", positions.keys());
    Ok(positions)
}
