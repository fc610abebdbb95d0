use chrono::Duration;

use super::sample::CalibrationSample;

/// A center→leaf measurement and the leaf→center measurement closest to it in time.
#[derive(Debug, Clone, Copy)]
pub struct MatchedPair<'a> {
    pub forward: &'a CalibrationSample,
    pub reverse: &'a CalibrationSample,
}

impl MatchedPair<'_> {
    pub fn gap(&self) -> Duration {
        let gap = self.forward.timestamp - self.reverse.timestamp;
        if gap < Duration::zero() {
            -gap
        } else {
            gap
        }
    }
}

/// Split samples into the two directions of a link, each sorted by time.
pub fn partition_link<'a>(
    samples: &'a [CalibrationSample],
    center: &str,
    leaf: &str,
) -> (Vec<&'a CalibrationSample>, Vec<&'a CalibrationSample>) {
    let mut forward: Vec<_> = samples.iter().filter(|s| s.is_link(center, leaf)).collect();
    let mut reverse: Vec<_> = samples.iter().filter(|s| s.is_link(leaf, center)).collect();
    forward.sort_by_key(|s| s.timestamp);
    reverse.sort_by_key(|s| s.timestamp);
    (forward, reverse)
}

/// Nearest-in-time as-of join of forward onto reverse samples.
///
/// Both slices must be sorted by timestamp. Every forward sample takes the
/// closest reverse sample no further than `tolerance` away (ties go to the
/// earlier one); a reverse sample may serve several forward samples. Forward
/// samples without a partner are dropped.
pub fn pair_nearest<'a>(
    forward: &[&'a CalibrationSample],
    reverse: &[&'a CalibrationSample],
    tolerance: Duration,
) -> Vec<MatchedPair<'a>> {
    if reverse.is_empty() {
        return Vec::new();
    }

    forward
        .iter()
        .filter_map(|&fwd| {
            let after = reverse.partition_point(|rev| rev.timestamp < fwd.timestamp);
            let before = after.checked_sub(1).map(|i| reverse[i]);
            let at_or_after = reverse.get(after).copied();

            let nearest = match (before, at_or_after) {
                (Some(b), Some(a)) => {
                    let gap_before = fwd.timestamp - b.timestamp;
                    let gap_after = a.timestamp - fwd.timestamp;
                    if gap_before <= gap_after {
                        b
                    } else {
                        a
                    }
                }
                (Some(b), None) => b,
                (None, Some(a)) => a,
                (None, None) => return None,
            };

            let pair = MatchedPair {
                forward: fwd,
                reverse: nearest,
            };
            (pair.gap() <= tolerance).then_some(pair)
        })
        .collect()
}
