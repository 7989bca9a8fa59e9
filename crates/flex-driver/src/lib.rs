//! # Flex Driver
//!
//! Flex 运动节点的主机侧协调层：
//! - 总线收发与带确认发送（[`CanMessenger`]）
//! - 运动组调度、分发与结果归约（[`MoveGroupRunner`]）
//! - 限位开关 / 电机位置等一次性查询
//!
//! 所有等待都在调用方线程上完成；接收线程只负责解码和转发。
//!
//! # 使用示例
//!
//! ```rust,ignore
//! use flex_driver::{CanMessenger, MoveGroupRunner};
//!
//! let messenger = CanMessenger::new(adapter)?;
//! let positions = MoveGroupRunner::new(move_groups, 0, false).run(&messenger)?;
//! for (node, status) in &positions {
//!     println!("{node}: {:.3} mm", status.motor_position);
//! }
//! ```

pub mod cancel;
pub mod config;
pub mod dispatcher;
mod error;
pub mod listener;
pub mod messenger;
pub mod move_group;
pub mod oneshot;
pub mod runner;
pub mod scheduler;
pub mod status;

#[cfg(test)]
mod testing;

pub use cancel::{CancelHandle, CancelToken};
pub use config::{
    ConfigError, DispatchConfig, InterruptConfig, MessengerConfig, MotionConfig, OneShotConfig,
};
pub use dispatcher::{CompletionPacket, GroupTiming, MoveDispatcher, MoveResponse};
pub use error::{DriverError, MotionError};
pub use listener::{ChannelListener, ListenerGuard, ListenerId, MessageListener};
pub use messenger::{CanMessenger, MIN_ACK_TIMEOUT, Messenger, resolve_expected_nodes};
pub use move_group::*;
pub use oneshot::{
    RequestTarget, gather, get_limit_switches, get_motor_position,
    update_motor_position_estimation,
};
pub use runner::{MoveGroupRunner, accumulate_move_completions, run_move_groups};
pub use scheduler::{MoveScheduler, ScheduledGroup, ScheduledMove};
pub use status::{MotorPositionStatus, NodeMap};
