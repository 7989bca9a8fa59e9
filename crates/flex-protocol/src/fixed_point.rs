//! 定点数换算
//!
//! 固件以中断周期为时间单位。速度与加速度使用 Q31 定点数表示
//! "每个中断周期移动的毫米数"（加速度字段以微米为单位）。
//! 所有编码都是截断取整，与固件期望的一致。
//! 调度路径使用 `checked_*` 版本，超出线上表示范围的输入直接报错。

use crate::ProtocolError;

/// 2^31，Q31 定点数的缩放系数
const RADIX: f64 = 2_147_483_648.0;

/// 时长（秒）转换为中断周期数
pub fn duration_to_ticks(duration_sec: f64, interrupts_per_sec: u32) -> u32 {
    (duration_sec * interrupts_per_sec as f64) as u32
}

/// 中断周期数转换为时长（秒）
pub fn ticks_to_duration(ticks: u32, interrupts_per_sec: u32) -> f64 {
    ticks as f64 / interrupts_per_sec as f64
}

/// 速度（mm/s）编码为 Q31 定点数
pub fn velocity_to_fixed(mm_per_sec: f64, interrupts_per_sec: u32) -> i32 {
    ((mm_per_sec / interrupts_per_sec as f64) * RADIX) as i32
}

/// Q31 定点数解码为速度（mm/s）
pub fn fixed_to_velocity(raw: i32, interrupts_per_sec: u32) -> f64 {
    raw as f64 / RADIX * interrupts_per_sec as f64
}

/// 加速度（mm/s²）编码为 Q31 定点数（µm / tick²）
pub fn acceleration_to_fixed(mm_per_sec_sq: f64, interrupts_per_sec: u32) -> i32 {
    let ips = interrupts_per_sec as f64;
    ((mm_per_sec_sq * 1000.0 / (ips * ips)) * RADIX) as i32
}

/// Q31 定点数解码为加速度（mm/s²）
pub fn fixed_to_acceleration(raw: i32, interrupts_per_sec: u32) -> f64 {
    let ips = interrupts_per_sec as f64;
    raw as f64 / RADIX * ips * ips / 1000.0
}

// ============================================================================
// 带范围检查的编码
// ============================================================================

fn out_of_range(field: &'static str, value: f64) -> ProtocolError {
    ProtocolError::OutOfRange { field, value }
}

/// 截断后必须落在 `[min, max]` 内，NaN / 无穷大一律拒绝
fn check_scaled(
    field: &'static str,
    value: f64,
    scaled: f64,
    min: f64,
    max: f64,
) -> Result<f64, ProtocolError> {
    let truncated = scaled.trunc();
    if !truncated.is_finite() || truncated < min || truncated > max {
        return Err(out_of_range(field, value));
    }
    Ok(truncated)
}

/// 同 [`duration_to_ticks`]，负数、NaN 或超出 u32 的时长返回错误
///
/// # 错误
/// - `ProtocolError::OutOfRange`
pub fn checked_duration_to_ticks(
    duration_sec: f64,
    interrupts_per_sec: u32,
) -> Result<u32, ProtocolError> {
    let scaled = duration_sec * interrupts_per_sec as f64;
    check_scaled("duration", duration_sec, scaled, 0.0, u32::MAX as f64).map(|t| t as u32)
}

/// 同 [`velocity_to_fixed`]，超出 Q31 表示范围（|v| ≥ 中断频率）时返回错误
///
/// # 错误
/// - `ProtocolError::OutOfRange`
pub fn checked_velocity_to_fixed(
    mm_per_sec: f64,
    interrupts_per_sec: u32,
) -> Result<i32, ProtocolError> {
    let scaled = (mm_per_sec / interrupts_per_sec as f64) * RADIX;
    check_scaled("velocity", mm_per_sec, scaled, i32::MIN as f64, i32::MAX as f64)
        .map(|v| v as i32)
}

/// 同 [`acceleration_to_fixed`]，超出 Q31 表示范围时返回错误
///
/// # 错误
/// - `ProtocolError::OutOfRange`
pub fn checked_acceleration_to_fixed(
    mm_per_sec_sq: f64,
    interrupts_per_sec: u32,
) -> Result<i32, ProtocolError> {
    let ips = interrupts_per_sec as f64;
    let scaled = (mm_per_sec_sq * 1000.0 / (ips * ips)) * RADIX;
    check_scaled("acceleration", mm_per_sec_sq, scaled, i32::MIN as f64, i32::MAX as f64)
        .map(|a| a as i32)
}

/// 微米转换为毫米（位置反馈）
pub fn um_to_mm(um: f64) -> f64 {
    um / 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::INTERRUPTS_PER_SEC;
    use proptest::prelude::*;

    #[test]
    fn test_duration_truncates() {
        assert_eq!(duration_to_ticks(1.0, INTERRUPTS_PER_SEC), 100_000);
        assert_eq!(duration_to_ticks(0.000_015, INTERRUPTS_PER_SEC), 1);
        assert_eq!(duration_to_ticks(0.5, 32_000), 16_000);
    }

    #[test]
    fn test_velocity_known_value() {
        // 100 mm/s @ 100kHz = 0.001 mm/tick
        let raw = velocity_to_fixed(100.0, INTERRUPTS_PER_SEC);
        assert_eq!(raw, (0.001 * RADIX) as i32);
        assert!(velocity_to_fixed(-100.0, INTERRUPTS_PER_SEC) < 0);
    }

    #[test]
    fn test_acceleration_known_value() {
        // 1000 mm/s² @ 100kHz = 1e-4 µm/tick²
        let raw = acceleration_to_fixed(1000.0, INTERRUPTS_PER_SEC);
        assert_eq!(raw, (1e-4 * RADIX) as i32);
    }

    #[test]
    fn test_checked_encoders_match_truncating_ones() {
        assert_eq!(checked_duration_to_ticks(0.5, 32_000), Ok(16_000));
        assert_eq!(
            checked_velocity_to_fixed(-100.0, INTERRUPTS_PER_SEC),
            Ok(velocity_to_fixed(-100.0, INTERRUPTS_PER_SEC))
        );
        assert_eq!(
            checked_acceleration_to_fixed(1000.0, INTERRUPTS_PER_SEC),
            Ok(acceleration_to_fixed(1000.0, INTERRUPTS_PER_SEC))
        );
        // 截断到零的极小负时长仍然合法
        assert_eq!(checked_duration_to_ticks(-1e-9, INTERRUPTS_PER_SEC), Ok(0));
    }

    #[test]
    fn test_checked_encoders_reject_out_of_range() {
        assert!(matches!(
            checked_duration_to_ticks(-1.0, INTERRUPTS_PER_SEC),
            Err(ProtocolError::OutOfRange { field: "duration", .. })
        ));
        assert!(checked_duration_to_ticks(f64::NAN, INTERRUPTS_PER_SEC).is_err());
        assert!(checked_duration_to_ticks(1e6, INTERRUPTS_PER_SEC).is_err());

        // |v| 达到中断频率即超出 Q31
        assert!(matches!(
            checked_velocity_to_fixed(100_000.0, INTERRUPTS_PER_SEC),
            Err(ProtocolError::OutOfRange { field: "velocity", .. })
        ));
        assert!(checked_velocity_to_fixed(f64::INFINITY, INTERRUPTS_PER_SEC).is_err());
        assert!(checked_velocity_to_fixed(99_999.0, INTERRUPTS_PER_SEC).is_ok());

        assert!(matches!(
            checked_acceleration_to_fixed(1e8, INTERRUPTS_PER_SEC),
            Err(ProtocolError::OutOfRange { field: "acceleration", .. })
        ));
    }

    proptest! {
        #[test]
        fn prop_velocity_within_one_unit(v in -2000.0f64..2000.0) {
            let raw = velocity_to_fixed(v, INTERRUPTS_PER_SEC);
            let unit = INTERRUPTS_PER_SEC as f64 / RADIX;
            prop_assert!((fixed_to_velocity(raw, INTERRUPTS_PER_SEC) - v).abs() <= unit);
        }

        #[test]
        fn prop_acceleration_within_one_unit(a in -10_000.0f64..10_000.0) {
            let raw = acceleration_to_fixed(a, INTERRUPTS_PER_SEC);
            let ips = INTERRUPTS_PER_SEC as f64;
            let unit = ips * ips / 1000.0 / RADIX;
            prop_assert!((fixed_to_acceleration(raw, INTERRUPTS_PER_SEC) - a).abs() <= unit);
        }

        #[test]
        fn prop_duration_within_one_tick(d in 0.0f64..30.0) {
            let ticks = duration_to_ticks(d, INTERRUPTS_PER_SEC);
            let back = ticks_to_duration(ticks, INTERRUPTS_PER_SEC);
            prop_assert!(d - back >= -1e-9);
            prop_assert!(d - back <= 1.0 / INTERRUPTS_PER_SEC as f64 + 1e-9);
        }
    }
}
