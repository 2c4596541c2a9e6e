//! End-of-run consistency checks on P&L snapshots.

use std::collections::BTreeMap;

use crate::position::PnlSnapshot;

/// Absolute tolerance for floating-point comparisons.
pub const TOLERANCE: f64 = 1e-9;

/// Check every snapshot. Returns one message per violation, instruments in
/// lexicographic order.
///
/// A flat instrument must have zero average price and zero unrealized P&L;
/// an open one needs a positive average price. Total P&L must equal realized
/// plus unrealized.
pub fn validate_snapshots(snapshots: &BTreeMap<String, PnlSnapshot>) -> Vec<String> {
    let mut violations = Vec::new();
    for (instrument, snap) in snapshots {
        if snap.net_position == 0 {
            if snap.avg_open_price.abs() > TOLERANCE {
                violations.push(format!(
                    "{instrument}: flat position has avg_open_price {}",
                    snap.avg_open_price
                ));
            }
            if snap.unrealized_pnl.abs() > TOLERANCE {
                violations.push(format!(
                    "{instrument}: flat position has unrealized_pnl {}",
                    snap.unrealized_pnl
                ));
            }
        } else if !(snap.avg_open_price > 0.0) {
            violations.push(format!(
                "{instrument}: open position {} has non-positive avg_open_price {}",
                snap.net_position, snap.avg_open_price
            ));
        }
        let expected = snap.realized_pnl + snap.unrealized_pnl;
        if (snap.total_pnl - expected).abs() > TOLERANCE {
            violations.push(format!(
                "{instrument}: total_pnl {} != realized {} + unrealized {}",
                snap.total_pnl, snap.realized_pnl, snap.unrealized_pnl
            ));
        }
    }
    violations
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snap(net: i64, avg: f64, realized: f64, unrealized: f64, total: f64) -> PnlSnapshot {
        PnlSnapshot {
            net_position: net,
            avg_open_price: avg,
            realized_pnl: realized,
            unrealized_pnl: unrealized,
            mark_price: 100.0,
            total_pnl: total,
        }
    }

    #[test]
    fn test_clean_snapshots() {
        let mut snaps = BTreeMap::new();
        snaps.insert("rb2405".to_string(), snap(0, 0.0, 5.0, 0.0, 5.0));
        snaps.insert("rb2410".to_string(), snap(2, 101.0, 0.0, -2.0, -2.0));
        assert!(validate_snapshots(&snaps).is_empty());
    }

    #[test]
    fn test_flat_with_residue() {
        let mut snaps = BTreeMap::new();
        snaps.insert("rb2405".to_string(), snap(0, 100.0, 0.0, 1.0, 1.0));
        let violations = validate_snapshots(&snaps);
        assert_eq!(violations.len(), 2);
        assert!(violations[0].contains("avg_open_price"));
        assert!(violations[1].contains("unrealized_pnl"));
    }

    #[test]
    fn test_open_without_price() {
        let mut snaps = BTreeMap::new();
        snaps.insert("rb2405".to_string(), snap(-1, 0.0, 0.0, 0.0, 0.0));
        let violations = validate_snapshots(&snaps);
        assert_eq!(violations.len(), 1);
        assert!(violations[0].contains("non-positive"));
    }

    #[test]
    fn test_total_mismatch_and_order() {
        let mut snaps = BTreeMap::new();
        snaps.insert("zn2407".to_string(), snap(1, 10.0, 1.0, 1.0, 3.0));
        snaps.insert("ag2406".to_string(), snap(1, 10.0, 1.0, 1.0, 2.5));
        let violations = validate_snapshots(&snaps);
        assert_eq!(violations.len(), 2);
        assert!(violations[0].starts_with("ag2406"));
        assert!(violations[1].starts_with("zn2407"));
    }

    #[test]
    fn test_within_tolerance() {
        let mut snaps = BTreeMap::new();
        snaps.insert("rb2405".to_string(), snap(0, 1e-12, 0.0, -1e-12, 1e-12));
        assert!(validate_snapshots(&snaps).is_empty());
    }
}
