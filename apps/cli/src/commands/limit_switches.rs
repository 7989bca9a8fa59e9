//! 限位开关查询命令

use anyhow::Result;
use clap::Args;
use flex_driver::{MotionConfig, get_limit_switches};
use flex_protocol::NodeId;

use crate::connection::open_messenger;

/// 限位开关查询参数
#[derive(Args, Debug)]
pub struct LimitSwitchesCommand {
    /// 目标节点（逗号分隔）
    #[arg(short, long, value_delimiter = ',', required = true)]
    pub nodes: Vec<NodeId>,
}

impl LimitSwitchesCommand {
    pub fn execute(&self, interface: &str, config: &MotionConfig) -> Result<()> {
        let messenger = open_messenger(interface, config)?;

        println!("⏳ 正在读取限位开关...");
        let switches = get_limit_switches(&messenger, &self.nodes, config.oneshot.timeout())?;

        println!("📊 限位开关:");
        for (node, status) in &switches {
            println!("  {:<14} 0b{:08b}", node.name(), status);
        }
        Ok(())
    }
}
