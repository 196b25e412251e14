//! Attendance tallies and the percentage formula.

use crate::types::AttendanceStatus;
use serde::Serialize;

/// Attendance percentage: `round(100 * attended / total, 1)`, 0 when empty.
pub fn attendance_percentage(attended: u32, total: u32) -> f64 {
    if total == 0 {
        return 0.0;
    }
    let raw = 100.0 * f64::from(attended) / f64::from(total);
    (raw * 10.0).round() / 10.0
}

/// Per-status counts over a set of attendance records.
///
/// `total` counts every record, excused included.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Tally {
    pub total: u32,
    pub present: u32,
    pub absent: u32,
    pub late: u32,
    pub excused: u32,
}

impl Tally {
    pub fn record(&mut self, status: AttendanceStatus) {
        self.total += 1;
        match status {
            AttendanceStatus::Present => self.present += 1,
            AttendanceStatus::Absent => self.absent += 1,
            AttendanceStatus::Late => self.late += 1,
            AttendanceStatus::Excused => self.excused += 1,
        }
    }

    pub fn merge(&mut self, other: &Tally) {
        self.total += other.total;
        self.present += other.present;
        self.absent += other.absent;
        self.late += other.late;
        self.excused += other.excused;
    }

    pub fn attended(&self) -> u32 {
        self.present + self.late
    }

    pub fn percentage(&self) -> f64 {
        attendance_percentage(self.attended(), self.total)
    }
}

impl FromIterator<AttendanceStatus> for Tally {
    fn from_iter<I: IntoIterator<Item = AttendanceStatus>>(iter: I) -> Self {
        let mut tally = Tally::default();
        for status in iter {
            tally.record(status);
        }
        tally
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use AttendanceStatus::*;

    #[test]
    fn test_percentage_rounds_to_one_decimal() {
        // 40 / 45 = 88.888...
        assert_eq!(attendance_percentage(40, 45), 88.9);
        assert_eq!(attendance_percentage(1, 3), 33.3);
        assert_eq!(attendance_percentage(2, 3), 66.7);
    }

    #[test]
    fn test_empty_total_reports_zero() {
        assert_eq!(attendance_percentage(0, 0), 0.0);
        assert_eq!(Tally::default().percentage(), 0.0);
    }

    #[test]
    fn test_tally_counts_excused_in_total() {
        let tally: Tally = [Present, Late, Excused, Absent].into_iter().collect();
        assert_eq!(tally.total, 4);
        assert_eq!(tally.attended(), 2);
        assert_eq!(tally.percentage(), 50.0);
    }

    #[test]
    fn test_stats_formula_scenario() {
        let statuses = std::iter::repeat(Present)
            .take(38)
            .chain(std::iter::repeat(Late).take(2))
            .chain(std::iter::repeat(Absent).take(5));
        let tally: Tally = statuses.collect();
        assert_eq!(tally.total, 45);
        assert_eq!(tally.percentage(), 88.9);
    }

    #[test]
    fn test_merge() {
        let mut a: Tally = [Present, Absent].into_iter().collect();
        let b: Tally = [Late].into_iter().collect();
        a.merge(&b);
        assert_eq!(a, Tally { total: 3, present: 1, absent: 1, late: 1, excused: 0 });
    }
}
