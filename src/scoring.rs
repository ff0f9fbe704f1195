//! Pure scoring function
//!
//! Points for a question are computed from correctness and answer speed
//! alone, which keeps the function deterministic and testable in isolation.
//! A correct answer earns a fixed base plus a speed bonus that decreases
//! linearly from the full bonus (instant answer) to zero (answer at the
//! deadline).

use crate::constants::scoring::{BASE_POINTS, MAX_SPEED_BONUS};

/// Computes the points earned for a single answer.
///
/// Returns 0 for an incorrect answer. For a correct answer, returns
/// `BASE_POINTS + floor(((time_limit - elapsed) / time_limit) * MAX_SPEED_BONUS)`.
///
/// `elapsed_seconds` is client-reported and therefore untrusted; it is
/// clamped to `[0, time_limit]` before the formula is applied, so a
/// negative or over-limit value can neither inflate the bonus nor produce
/// a negative score.
///
/// # Arguments
///
/// * `is_correct` - Whether the chosen option was the correct one
/// * `elapsed_seconds` - Client-reported time taken to answer, in seconds
/// * `time_limit_seconds` - The question's time limit in whole seconds (> 0)
pub fn score(is_correct: bool, elapsed_seconds: f64, time_limit_seconds: u64) -> u64 {
    if !is_correct {
        return 0;
    }

    let limit = time_limit_seconds.max(1) as f64;
    let elapsed = elapsed_seconds.clamp(0.0, limit);

    let speed_bonus = (((limit - elapsed) / limit) * MAX_SPEED_BONUS as f64).floor() as u64;

    BASE_POINTS + speed_bonus
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_incorrect_answer_scores_zero() {
        assert_eq!(score(false, 0.0, 20), 0);
        assert_eq!(score(false, 10.0, 20), 0);
        assert_eq!(score(false, -5.0, 20), 0);
    }

    #[test]
    fn test_instant_answer_earns_full_bonus() {
        assert_eq!(score(true, 0.0, 20), BASE_POINTS + MAX_SPEED_BONUS);
    }

    #[test]
    fn test_deadline_answer_earns_base_only() {
        assert_eq!(score(true, 20.0, 20), BASE_POINTS);
    }

    #[test]
    fn test_midpoint_answer_earns_half_bonus() {
        assert_eq!(score(true, 10.0, 20), BASE_POINTS + MAX_SPEED_BONUS / 2);
    }

    #[test]
    fn test_bonus_uses_floor() {
        // (15 - 5) / 15 * 500 = 333.33..., floored
        assert_eq!(score(true, 5.0, 15), BASE_POINTS + 333);
    }

    #[test]
    fn test_score_within_bounds_for_valid_elapsed() {
        for time_limit in [1u64, 10, 20, 240] {
            let mut elapsed = 0.0;
            while elapsed <= time_limit as f64 {
                let points = score(true, elapsed, time_limit);
                assert!(points >= BASE_POINTS);
                assert!(points <= BASE_POINTS + MAX_SPEED_BONUS);
                elapsed += 0.25;
            }
        }
    }

    #[test]
    fn test_score_non_increasing_in_elapsed() {
        let time_limit = 30;
        let mut previous = u64::MAX;
        let mut elapsed = 0.0;
        while elapsed <= 30.0 {
            let points = score(true, elapsed, time_limit);
            assert!(points <= previous);
            previous = points;
            elapsed += 0.1;
        }
    }

    #[test]
    fn test_negative_elapsed_clamped_to_zero() {
        assert_eq!(score(true, -3.0, 20), score(true, 0.0, 20));
    }

    #[test]
    fn test_over_limit_elapsed_clamped_to_limit() {
        assert_eq!(score(true, 45.0, 20), score(true, 20.0, 20));
        assert_eq!(score(true, f64::MAX, 20), BASE_POINTS);
    }
}
