//! 运动协调配置
//!
//! 所有字段都有默认值，TOML 文件只需写出要覆盖的部分：
//!
//! ```toml
//! [dispatch]
//! full_timeout_floor_s = 8.0
//!
//! [messenger]
//! ack_timeout_ms = 5000
//! ```

use flex_protocol::{BRUSHED_MOTOR_INTERRUPTS_PER_SEC, INTERRUPTS_PER_SEC, TIP_INTERRUPTS_PER_SEC};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// 配置加载错误
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
}

/// 顶层配置
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MotionConfig {
    pub interrupts: InterruptConfig,
    pub dispatch: DispatchConfig,
    pub messenger: MessengerConfig,
    pub oneshot: OneShotConfig,
}

impl MotionConfig {
    /// 从 TOML 字符串解析
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(s)?)
    }

    /// 从 TOML 文件加载
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }
}

/// 各类电机的中断频率（Hz）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InterruptConfig {
    pub stepper: u32,
    pub tip_action: u32,
    pub brushed: u32,
}

impl Default for InterruptConfig {
    fn default() -> Self {
        Self {
            stepper: INTERRUPTS_PER_SEC,
            tip_action: TIP_INTERRUPTS_PER_SEC,
            brushed: BRUSHED_MOTOR_INTERRUPTS_PER_SEC,
        }
    }
}

/// 运动组等待时间
///
/// - 预期时间 `max(expected_time_floor_s, d * expected_time_factor)`，超过只告警
/// - 完整超时 `max(full_timeout_floor_s, d * full_timeout_factor)`，超过判定失败
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    pub expected_time_floor_s: f64,
    pub expected_time_factor: f64,
    pub full_timeout_floor_s: f64,
    pub full_timeout_factor: f64,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            expected_time_floor_s: 3.0,
            expected_time_factor: 1.1,
            full_timeout_floor_s: 5.0,
            full_timeout_factor: 2.0,
        }
    }
}

/// 收发参数
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MessengerConfig {
    /// 带确认发送的等待时间
    pub ack_timeout_ms: u64,
    /// 适配器单次读取超时，决定接收线程响应退出的速度
    pub receive_timeout_ms: u64,
}

impl MessengerConfig {
    pub fn ack_timeout(&self) -> Duration {
        Duration::from_millis(self.ack_timeout_ms)
    }

    pub fn receive_timeout(&self) -> Duration {
        Duration::from_millis(self.receive_timeout_ms)
    }
}

impl Default for MessengerConfig {
    fn default() -> Self {
        Self {
            ack_timeout_ms: 3000,
            receive_timeout_ms: 2,
        }
    }
}

/// 一次性查询的等待时间
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OneShotConfig {
    pub timeout_ms: u64,
}

impl OneShotConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Default for OneShotConfig {
    fn default() -> Self {
        Self { timeout_ms: 1000 }
    }
}
