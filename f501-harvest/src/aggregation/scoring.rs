//! Three-dart score classification
//!
//! A score is reachable with three darts when it lies in 1..=180 and is not
//! one of the totals no combination of three darts produces.

/// Highest three-dart total
pub const MAX_THREE_DART_SCORE: i64 = 180;

/// Totals below 180 that three darts cannot make
pub const UNREACHABLE_SCORES: [i64; 9] = [163, 166, 169, 172, 173, 175, 176, 178, 179];

/// Validity of one score
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScoreClass {
    pub is_valid: bool,
    pub is_bust: bool,
}

pub fn is_bust(score: i64) -> bool {
    score > MAX_THREE_DART_SCORE
}

pub fn is_valid(score: i64) -> bool {
    (1..=MAX_THREE_DART_SCORE).contains(&score) && !UNREACHABLE_SCORES.contains(&score)
}

pub fn classify(score: i64) -> ScoreClass {
    ScoreClass {
        is_valid: is_valid(score),
        is_bust: is_bust(score),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ordinary_score_is_valid() {
        assert_eq!(
            classify(34),
            ScoreClass {
                is_valid: true,
                is_bust: false
            }
        );
        assert!(is_valid(1));
        assert!(is_valid(180));
    }

    #[test]
    fn test_unreachable_scores_invalid_but_not_bust() {
        for score in UNREACHABLE_SCORES {
            let class = classify(score);
            assert!(!class.is_valid, "{} must be invalid", score);
            assert!(!class.is_bust, "{} must not be bust", score);
        }
        assert!(is_valid(174));
        assert!(is_valid(177));
    }

    #[test]
    fn test_over_180_is_bust_and_invalid() {
        let class = classify(200);
        assert!(class.is_bust);
        assert!(!class.is_valid);
        assert!(!is_bust(180));
    }

    #[test]
    fn test_zero_is_invalid() {
        assert!(!is_valid(0));
        assert!(!is_bust(0));
    }
}
