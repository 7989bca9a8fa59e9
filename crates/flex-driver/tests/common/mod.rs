//! 集成测试公共设施：在仿真总线上运行的节点固件

#![allow(dead_code)]

use flex_can::FlexFrame;
use flex_can::sim::{SimBus, SimPeer};
use flex_driver::CanMessenger;
use flex_protocol::{
    ArbitrationId, Envelope, ErrorCode, ErrorMessage, ErrorSeverity, LimitSwitchResponse, Message,
    MotorPositionFlags, MotorPositionResponse, MoveAckId, MoveCompleted, NodeId,
};
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{JoinHandle, spawn};
use std::time::Duration;

/// 固件行为配置
#[derive(Debug, Clone, Default)]
pub struct FirmwareBehavior {
    /// 在线节点
    pub nodes: BTreeSet<NodeId>,
    /// 确认请求但从不上报运动完成
    pub silent: BTreeSet<NodeId>,
    /// 执行运动组时改为上报错误
    pub execute_errors: BTreeMap<NodeId, (ErrorSeverity, ErrorCode)>,
    /// 执行后上报的位置（µm）
    pub positions: BTreeMap<NodeId, u32>,
    pub limit_switches: BTreeMap<NodeId, u8>,
    /// 电机未上电的节点（位置重估计失败）
    pub disabled: BTreeSet<NodeId>,
}

impl FirmwareBehavior {
    pub fn with_nodes(nodes: &[NodeId]) -> Self {
        Self {
            nodes: nodes.iter().copied().collect(),
            ..Default::default()
        }
    }
}

/// 仿真固件
///
/// 在后台线程中读取主机发出的帧，并按 [`FirmwareBehavior`] 应答。
pub struct SimFirmware {
    /// 收到的全部主机消息（目标节点, 消息）
    pub received: Arc<Mutex<Vec<(NodeId, Message)>>>,
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl SimFirmware {
    pub fn received_messages(&self) -> Vec<(NodeId, Message)> {
        self.received.lock().clone()
    }

    pub fn stop_requests(&self) -> usize {
        self.received
            .lock()
            .iter()
            .filter(|(_, m)| *m == Message::StopRequest)
            .count()
    }
}

impl Drop for SimFirmware {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

/// 创建 messenger 与仿真固件
/// 测试日志，`RUST_LOG=flex_driver=debug` 时输出
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

pub fn setup(behavior: FirmwareBehavior) -> (CanMessenger, SimFirmware) {
    init_tracing();
    let (adapter, peer) = SimBus::new();
    let messenger = CanMessenger::new(adapter).expect("messenger");

    let received = Arc::new(Mutex::new(Vec::new()));
    let running = Arc::new(AtomicBool::new(true));
    let handle = {
        let received = received.clone();
        let running = running.clone();
        spawn(move || firmware_loop(peer, behavior, received, running))
    };

    (
        messenger,
        SimFirmware {
            received,
            running,
            handle: Some(handle),
        },
    )
}

fn reply(peer: &SimPeer, origin: NodeId, message: Message, message_index: u32) {
    let arbitration_id = ArbitrationId::new(NodeId::Host, origin, message.message_id());
    let frame: FlexFrame = message.to_frame(arbitration_id, message_index);
    peer.send(frame);
}

fn firmware_loop(
    peer: SimPeer,
    behavior: FirmwareBehavior,
    received: Arc<Mutex<Vec<(NodeId, Message)>>>,
    running: Arc<AtomicBool>,
) {
    // 每个节点已下发的 (group_id, seq_id)
    let mut moves: BTreeMap<NodeId, Vec<(u8, u8)>> = BTreeMap::new();

    while running.load(Ordering::Acquire) {
        let Some(frame) = peer.recv_timeout(Duration::from_millis(5)) else {
            continue;
        };
        let Ok(envelope) = Envelope::from_frame(&frame) else {
            continue;
        };
        let target = envelope.arbitration_id.node_id;
        received.lock().push((target, envelope.message.clone()));

        let targets: Vec<NodeId> = if target == NodeId::Broadcast {
            behavior.nodes.iter().copied().collect()
        } else if behavior.nodes.contains(&target) {
            vec![target]
        } else {
            Vec::new()
        };
        let index = envelope.message_index;

        for node in targets {
            match &envelope.message {
                Message::AddLinearMoveRequest(m) => {
                    moves.entry(node).or_default().push((m.group_id, m.seq_id));
                    reply(&peer, node, Message::Acknowledgement, index);
                },
                Message::HomeRequest(m) => {
                    moves.entry(node).or_default().push((m.group_id, m.seq_id));
                    reply(&peer, node, Message::Acknowledgement, index);
                },
                Message::AddBrushedLinearMoveRequest(m)
                | Message::GripperHomeRequest(m)
                | Message::GripperGripRequest(m) => {
                    moves.entry(node).or_default().push((m.group_id, m.seq_id));
                    reply(&peer, node, Message::Acknowledgement, index);
                },
                Message::ClearAllMoveGroupsRequest => {
                    moves.remove(&node);
                    reply(&peer, node, Message::Acknowledgement, index);
                },
                Message::ExecuteMoveGroupRequest(m) => {
                    reply(&peer, node, Message::Acknowledgement, index);
                    if behavior.silent.contains(&node) {
                        continue;
                    }
                    if let Some((severity, error_code)) = behavior.execute_errors.get(&node) {
                        let error = ErrorMessage {
                            severity: *severity,
                            error_code: *error_code,
                        };
                        reply(&peer, node, Message::ErrorMessage(error), 0);
                        continue;
                    }
                    let position = behavior.positions.get(&node).copied().unwrap_or(0);
                    let queued = moves.entry(node).or_default();
                    let (current, rest): (Vec<_>, Vec<_>) =
                        queued.drain(..).partition(|(group_id, _)| *group_id == m.group_id);
                    *queued = rest;
                    for (group_id, seq_id) in current {
                        let completed = MoveCompleted {
                            group_id,
                            seq_id,
                            current_position_um: position,
                            encoder_position_um: position as i32,
                            position_flags: MotorPositionFlags::from_bits(0x03),
                            ack_id: MoveAckId::CompleteWithoutCondition.into(),
                        };
                        reply(&peer, node, Message::MoveCompleted(completed), 0);
                    }
                },
                Message::StopRequest => {
                    if behavior.silent.contains(&node) {
                        continue;
                    }
                    let error = ErrorMessage {
                        severity: ErrorSeverity::Warning,
                        error_code: ErrorCode::StopRequested,
                    };
                    reply(&peer, node, Message::ErrorMessage(error), index);
                },
                Message::ReadLimitSwitchRequest => {
                    let switch_status = behavior.limit_switches.get(&node).copied().unwrap_or(0);
                    reply(
                        &peer,
                        node,
                        Message::ReadLimitSwitchResponse(LimitSwitchResponse { switch_status }),
                        index,
                    );
                },
                Message::MotorPositionRequest => {
                    let position = behavior.positions.get(&node).copied().unwrap_or(0);
                    reply(
                        &peer,
                        node,
                        Message::MotorPositionResponse(position_response(position, 0x03)),
                        index,
                    );
                },
                Message::UpdateMotorPositionEstimationRequest => {
                    let position = behavior.positions.get(&node).copied().unwrap_or(0);
                    let flags = if behavior.disabled.contains(&node) {
                        0x00
                    } else {
                        0x03
                    };
                    reply(
                        &peer,
                        node,
                        Message::UpdateMotorPositionEstimationResponse(position_response(
                            position, flags,
                        )),
                        index,
                    );
                },
                _ => {},
            }
        }
    }
}

fn position_response(position: u32, flags: u8) -> MotorPositionResponse {
    MotorPositionResponse {
        current_position_um: position,
        encoder_position_um: position as i32,
        position_flags: MotorPositionFlags::from_bits(flags),
    }
}
