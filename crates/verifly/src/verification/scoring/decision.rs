use crate::verification::domain::Decision;
use crate::verification::policy::Thresholds;

/// Map a total score onto the policy bands.
///
/// `not_clear` is checked first, then `clear`; anything else, including a gap
/// left by a misconfigured band, lands in review.
pub fn decide(score: f64, thresholds: &Thresholds) -> Decision {
    if score >= thresholds.not_clear.min {
        Decision::NotClear
    } else if score <= thresholds.clear.max {
        Decision::Clear
    } else {
        Decision::Review
    }
}
