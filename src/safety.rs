//! Robot safety status and its human-readable labels

use serde::{Deserialize, Serialize};

use crate::driver::RobotDriver;
use crate::Result;

/// Robot mode labels, indexed by mode + 1 (modes start at -1).
pub const ROBOT_MODE_LABELS: [&str; 10] = [
    "ROBOT_MODE_NO_CONTROLLER",
    "ROBOT_MODE_DISCONNECTED",
    "ROBOT_MODE_CONFIRM_SAFETY",
    "ROBOT_MODE_BOOTING",
    "ROBOT_MODE_POWER_OFF",
    "ROBOT_MODE_POWER_ON",
    "ROBOT_MODE_IDLE",
    "ROBOT_MODE_BACKDRIVE",
    "ROBOT_MODE_RUNNING",
    "ROBOT_MODE_UPDATING_FIRMWARE",
];

/// Safety mode labels, indexed by mode.
pub const SAFETY_MODE_LABELS: [&str; 9] = [
    "NORMAL",
    "REDUCED",
    "PROTECTIVE_STOP",
    "RECOVERY",
    "SAFEGUARD_STOP",
    "SYSTEM_EMERGENCY_STOP",
    "ROBOT_EMERGENCY_STOP",
    "VIOLATION",
    "FAULT",
];

/// Safety status flag labels, indexed by bit position.
pub const SAFETY_STATUS_BIT_LABELS: [&str; 11] = [
    "Is normal mode",
    "Is reduced mode",
    "Is protective stopped",
    "Is recovery mode",
    "Is safeguard stopped",
    "Is system emergency stopped",
    "Is robot emergency stopped",
    "Is emergency stopped",
    "Is violation",
    "Is fault",
    "Is stopped due to safety",
];

fn label_at(table: &[&str], index: i64, code: i64) -> String {
    usize::try_from(index)
        .ok()
        .and_then(|i| table.get(i))
        .map(|label| label.to_string())
        .unwrap_or_else(|| format!("UNKNOWN({})", code))
}

pub fn robot_mode_label(mode: i32) -> String {
    label_at(&ROBOT_MODE_LABELS, mode as i64 + 1, mode as i64)
}

pub fn safety_mode_label(mode: i32) -> String {
    label_at(&SAFETY_MODE_LABELS, mode as i64, mode as i64)
}

/// Labels of every set flag, lowest bit first. Bits without a label are ignored.
pub fn safety_status_bit_labels(bits: u32) -> Vec<String> {
    SAFETY_STATUS_BIT_LABELS
        .iter()
        .enumerate()
        .filter(|(bit, _)| bits & (1u32 << bit) != 0)
        .map(|(_, label)| label.to_string())
        .collect()
}

/// Safety snapshot returned by the safety-status query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SafetyStatus {
    pub robot_mode: i32,
    pub robot_mode_label: String,
    pub safety_mode: i32,
    pub safety_mode_label: String,
    pub safety_status_bits: u32,
    pub safety_status_labels: Vec<String>,
}

impl SafetyStatus {
    pub fn from_codes(robot_mode: i32, safety_mode: i32, safety_status_bits: u32) -> Self {
        Self {
            robot_mode,
            robot_mode_label: robot_mode_label(robot_mode),
            safety_mode,
            safety_mode_label: safety_mode_label(safety_mode),
            safety_status_bits,
            safety_status_labels: safety_status_bit_labels(safety_status_bits),
        }
    }

    pub fn read(driver: &dyn RobotDriver) -> Result<Self> {
        Ok(Self::from_codes(
            driver.get_robot_mode()?,
            driver.get_safety_mode()?,
            driver.get_safety_status_bits()?,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn robot_mode_is_offset_by_one() {
        assert_eq!(robot_mode_label(-1), "ROBOT_MODE_NO_CONTROLLER");
        assert_eq!(robot_mode_label(0), "ROBOT_MODE_DISCONNECTED");
        assert_eq!(robot_mode_label(7), "ROBOT_MODE_RUNNING");
        assert_eq!(robot_mode_label(8), "ROBOT_MODE_UPDATING_FIRMWARE");
    }

    #[test]
    fn violation_and_fault_are_distinct() {
        assert_eq!(safety_mode_label(0), "NORMAL");
        assert_eq!(safety_mode_label(7), "VIOLATION");
        assert_eq!(safety_mode_label(8), "FAULT");
    }

    #[test]
    fn out_of_range_codes_are_unknown() {
        assert_eq!(robot_mode_label(-2), "UNKNOWN(-2)");
        assert_eq!(robot_mode_label(9), "UNKNOWN(9)");
        assert_eq!(safety_mode_label(9), "UNKNOWN(9)");
        assert_eq!(safety_mode_label(-1), "UNKNOWN(-1)");
        assert_eq!(robot_mode_label(i32::MIN), format!("UNKNOWN({})", i32::MIN));
    }

    #[test]
    fn status_bits_decode_as_flags() {
        assert!(safety_status_bit_labels(0).is_empty());
        assert_eq!(safety_status_bit_labels(1), vec!["Is normal mode"]);
        assert_eq!(
            safety_status_bit_labels(0b100_0000_0100),
            vec!["Is protective stopped", "Is stopped due to safety"]
        );
        // Bits past the table are ignored.
        assert_eq!(safety_status_bit_labels(1 << 12), Vec::<String>::new());
    }

    #[test]
    fn status_from_codes() {
        let status = SafetyStatus::from_codes(7, 0, 1);
        assert_eq!(status.robot_mode_label, "ROBOT_MODE_RUNNING");
        assert_eq!(status.safety_mode_label, "NORMAL");
        assert_eq!(status.safety_status_labels, vec!["Is normal mode".to_string()]);
    }
}
