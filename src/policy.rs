//! When to roll over to a new file.

use crate::config::FileFormat;
use tracing::warn;

/// Why a file was rolled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RollReason {
    Size,
    Count,
}

/// Bytes and rows written since the last roll. Header bytes are not counted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RollAccumulator {
    pub bytes: u64,
    pub rows: u64,
}

impl RollAccumulator {
    pub const fn add_row(&mut self, bytes: u64) {
        self.bytes = self.bytes.saturating_add(bytes);
        self.rows = self.rows.saturating_add(1);
    }

    pub const fn reset(&mut self) {
        self.bytes = 0;
        self.rows = 0;
    }
}

/// Size and count thresholds. Zero disables a threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RollPolicy {
    size: u64,
    count: u64,
}

impl RollPolicy {
    /// Size-based rolling is not available for quoted CSV and is switched off
    /// for that format.
    #[must_use]
    pub fn new(size: u64, count: u64, format: FileFormat) -> Self {
        let size = if format == FileFormat::Csv && size > 0 {
            warn!(size, "size-based rolling is disabled for csv output");
            0
        } else {
            size
        };
        Self { size, count }
    }

    #[must_use]
    pub const fn size(&self) -> u64 {
        self.size
    }

    #[must_use]
    pub const fn count(&self) -> u64 {
        self.count
    }

    /// Whether the file should roll after reaching `acc`. Size wins when both
    /// thresholds are met.
    #[must_use]
    pub const fn check(&self, acc: &RollAccumulator) -> Option<RollReason> {
        if self.size > 0 && acc.bytes >= self.size {
            Some(RollReason::Size)
        } else if self.count > 0 && acc.rows >= self.count {
            Some(RollReason::Count)
        } else {
            None
        }
    }

    /// Record one row of `bytes` and report whether to roll. The accumulator
    /// is reset when a roll is due.
    pub fn record(&self, acc: &mut RollAccumulator, bytes: u64) -> Option<RollReason> {
        acc.add_row(bytes);
        let reason = self.check(acc);
        if reason.is_some() {
            acc.reset();
        }
        reason
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn count_threshold() {
        let p = RollPolicy::new(0, 3, FileFormat::Text);
        let mut acc = RollAccumulator::default();
        let rolls: Vec<_> = (0..7).map(|_| p.record(&mut acc, 10)).collect();
        assert_eq!(
            rolls,
            vec![
                None,
                None,
                Some(RollReason::Count),
                None,
                None,
                Some(RollReason::Count),
                None
            ]
        );
        assert_eq!(acc, RollAccumulator { bytes: 10, rows: 1 });
    }

    #[test]
    fn size_threshold_rolls_once_reached() {
        let p = RollPolicy::new(50, 0, FileFormat::Text);
        let mut acc = RollAccumulator::default();
        assert_eq!(p.record(&mut acc, 20), None);
        assert_eq!(p.record(&mut acc, 20), None);
        assert_eq!(p.record(&mut acc, 20), Some(RollReason::Size));
        assert_eq!(acc, RollAccumulator::default());
    }

    #[test]
    fn size_wins_ties() {
        let p = RollPolicy::new(20, 2, FileFormat::Text);
        let mut acc = RollAccumulator::default();
        assert_eq!(p.record(&mut acc, 10), None);
        assert_eq!(p.record(&mut acc, 10), Some(RollReason::Size));
    }

    #[test]
    fn disabled_thresholds_never_roll() {
        let p = RollPolicy::new(0, 0, FileFormat::Text);
        let mut acc = RollAccumulator::default();
        assert!((0..1000).all(|_| p.record(&mut acc, 1 << 20).is_none()));
    }

    #[test]
    fn csv_forces_size_off() {
        let p = RollPolicy::new(100, 5, FileFormat::Csv);
        assert_eq!((p.size(), p.count()), (0, 5));
    }
}
