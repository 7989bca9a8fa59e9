//! 位置查询命令

use anyhow::Result;
use clap::Args;
use flex_driver::{
    MotionConfig, MotorPositionStatus, NodeMap, get_motor_position,
    update_motor_position_estimation,
};
use flex_protocol::NodeId;

use crate::connection::open_messenger;

/// 位置查询命令参数
#[derive(Args, Debug)]
pub struct PositionCommand {
    /// 目标节点（逗号分隔）
    #[arg(short, long, value_delimiter = ',', required = true)]
    pub nodes: Vec<NodeId>,

    /// 先用编码器重新估计步进位置
    #[arg(long)]
    pub update: bool,
}

impl PositionCommand {
    /// 执行位置查询
    pub fn execute(&self, interface: &str, config: &MotionConfig) -> Result<()> {
        let messenger = open_messenger(interface, config)?;
        let timeout = config.oneshot.timeout();

        let positions = if self.update {
            println!("⏳ 正在重新估计电机位置...");
            update_motor_position_estimation(&messenger, &self.nodes, timeout)?
        } else {
            println!("⏳ 正在查询电机位置...");
            get_motor_position(&messenger, &self.nodes, timeout)?
        };

        print_positions(&positions);
        Ok(())
    }
}

/// 打印各节点位置
pub fn print_positions(positions: &NodeMap<MotorPositionStatus>) {
    println!("📊 电机位置:");
    for (node, status) in positions {
        println!(
            "  {:<14} motor {:>10.3} mm {}  encoder {:>10.3} mm {}{}",
            node.name(),
            status.motor_position,
            if status.motor_ok { "✓" } else { "✗" },
            status.encoder_position,
            if status.encoder_ok { "✓" } else { "✗" },
            status
                .move_ack
                .map(|ack| format!("  ({:?})", ack))
                .unwrap_or_default(),
        );
    }
}
