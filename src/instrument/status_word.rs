//! Pump status word and fault mask tables
//!
//! The controller reports three bit fields on `?V802`:
//!
//! - a 32-bit status word (fields 1 and 2 of the reply, low and high halves)
//! - a 16-bit warning mask (field 3)
//! - a 16-bit error mask (field 4)
//!
//! Each table is indexed by bit position. Undocumented positions keep a
//! `"bit N"` label so a set bit is never silently dropped.

use serde::{Serialize, Serializer};
use std::fmt;

/// Status word flags, bit 0 first.
pub const STATUS_FLAGS: [&str; 32] = [
    "Decelerating",
    "Running/Accelerating",
    "Standby speed",
    "Normal speed",
    "Above ramp speed",
    "Above overload speed",
    "Control mode bit 0",
    "Control mode bit 1",
    "bit 8",
    "bit 9",
    "Serial enable",
    "bit 11",
    "bit 12",
    "Control mode bit 2",
    "bit 14",
    "bit 15",
    "Power limit active",
    "Acceleration limited",
    "Deceleration limited",
    "bit 19",
    "Service due!",
    "bit 21",
    "Warning active",
    "Alarm active",
    "bit 24",
    "bit 25",
    "bit 26",
    "bit 27",
    "bit 28",
    "bit 29",
    "bit 30",
    "bit 31",
];

/// Warning mask flags, bit 0 first.
pub const WARNING_FLAGS: [&str; 16] = [
    "bit 0",
    "Pump temperature low",
    "bit 2",
    "bit 3",
    "bit 4",
    "bit 5",
    "Pump temperature high",
    "bit 7",
    "bit 8",
    "bit 9",
    "Pump temperature above max",
    "bit 11",
    "bit 12",
    "bit 13",
    "bit 14",
    "Self-test warning",
];

/// Error mask flags, bit 0 first.
pub const ERROR_FLAGS: [&str; 16] = [
    "bit 0",
    "Over voltage trip",
    "Over current trip",
    "Over temperature trip",
    "Under temperature trip",
    "Power stage fault",
    "bit 6",
    "bit 7",
    "H/W fault latched",
    "EEPROM fault",
    "bit 10",
    "Parameters not loaded",
    "Self test fault",
    "Serial mode interlock",
    "Overload timeout",
    "Acceleration timeout",
];

/// Names of the set bits of `mask`, in increasing bit order.
///
/// Bits beyond the end of `table` are ignored.
pub fn decode_flags(mask: u32, table: &[&'static str]) -> Vec<&'static str> {
    table
        .iter()
        .enumerate()
        .take(32)
        .filter(|(bit, _)| mask & (1 << bit) != 0)
        .map(|(_, name)| *name)
        .collect()
}

/// Decode the 32-bit status word.
pub fn status_flags(word: u32) -> Vec<&'static str> {
    decode_flags(word, &STATUS_FLAGS)
}

/// Decode a warning mask into a summary.
pub fn warning_summary(mask: u16) -> FlagSummary {
    FlagSummary::from_flags(decode_flags(u32::from(mask), &WARNING_FLAGS))
}

/// Decode an error mask into a summary.
pub fn error_summary(mask: u16) -> FlagSummary {
    FlagSummary::from_flags(decode_flags(u32::from(mask), &ERROR_FLAGS))
}

/// A decoded warning or error mask: either nothing set, or the set names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlagSummary {
    /// No bits set.
    Ok,
    /// The names of the set bits, never empty.
    Flags(Vec<&'static str>),
}

impl FlagSummary {
    /// An empty list becomes [`FlagSummary::Ok`].
    pub fn from_flags(flags: Vec<&'static str>) -> Self {
        if flags.is_empty() {
            FlagSummary::Ok
        } else {
            FlagSummary::Flags(flags)
        }
    }

    /// True when no bit was set.
    pub fn is_ok(&self) -> bool {
        matches!(self, FlagSummary::Ok)
    }

    /// Set names; empty for [`FlagSummary::Ok`].
    pub fn flags(&self) -> &[&'static str] {
        match self {
            FlagSummary::Ok => &[],
            FlagSummary::Flags(flags) => flags,
        }
    }
}

impl fmt::Display for FlagSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FlagSummary::Ok => f.write_str("OK"),
            FlagSummary::Flags(flags) => f.write_str(&flags.join(",")),
        }
    }
}

impl Serialize for FlagSummary {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            FlagSummary::Ok => serializer.serialize_str("OK"),
            FlagSummary::Flags(flags) => flags.serialize(serializer),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_status_bit_maps_to_its_name() {
        for bit in 0..32 {
            assert_eq!(status_flags(1 << bit), vec![STATUS_FLAGS[bit]]);
        }
    }

    #[test]
    fn test_every_warning_and_error_bit_maps_to_its_name() {
        for bit in 0..16 {
            let mask = 1u16 << bit;
            assert_eq!(
                warning_summary(mask),
                FlagSummary::Flags(vec![WARNING_FLAGS[bit]])
            );
            assert_eq!(error_summary(mask), FlagSummary::Flags(vec![ERROR_FLAGS[bit]]));
        }
    }

    #[test]
    fn test_undocumented_bits_keep_position() {
        assert_eq!(status_flags(1 << 29), vec!["bit 29"]);
        assert_eq!(error_summary(1 << 10).flags(), &["bit 10"]);
        assert_eq!(warning_summary(1).flags(), &["bit 0"]);
    }

    #[test]
    fn test_zero_masks_are_ok() {
        assert_eq!(error_summary(0), FlagSummary::Ok);
        assert_eq!(warning_summary(0).to_string(), "OK");
        assert!(status_flags(0).is_empty());
    }

    #[test]
    fn test_flags_in_bit_order() {
        // Running/Accelerating + Normal speed + Serial enable
        let flags = status_flags(0x0000_040A);
        assert_eq!(
            flags,
            vec!["Running/Accelerating", "Normal speed", "Serial enable"]
        );

        let summary = error_summary(0x0006);
        assert_eq!(summary.to_string(), "Over voltage trip,Over current trip");
        assert!(!summary.is_ok());
    }

    #[test]
    fn test_decode_ignores_bits_past_table() {
        assert!(decode_flags(1 << 20, &ERROR_FLAGS).is_empty());
    }
}
