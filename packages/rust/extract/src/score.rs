//! Score extraction.
//!
//! The value is read from a `score`/`rating` label's inline content, or from
//! the next non-empty line under a bare heading. Strategies, in order:
//! 1. `score_fraction`: `Score: 7/10`, `Rating: 4 out of 5`
//! 2. `score_percent`: `Score: 85%`
//! 3. `score_plain`: `Score: 8.5`, rescaled per [`RescalePolicy`]
//!
//! A score is never invented: without a label the field is absent.

use std::sync::LazyLock;

use regex::Regex;
use researchflow_shared::{Field, RescalePolicy};

use crate::labels::parse_label;
use crate::strategy::Strategy;

/// A labeled number before normalization.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RawScore {
    /// Explicit denominator.
    Fraction { value: f64, out_of: f64 },
    Percent(f64),
    /// Bare number; its scale has to be inferred.
    Plain(f64),
}

macro_rules! number {
    () => {
        r"(-?(?:\d+(?:\.\d+)?|\.\d+))(?:\*\*|__)?"
    };
}

static FRACTION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(concat!(r"(?i)^", number!(), r" ?(?:/|out of) ?", number!()))
        .expect("score fraction regex")
});

static PERCENT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(concat!(r"^", number!(), r" ?%")).expect("score percent regex"));

static PLAIN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(concat!(r"^", number!())).expect("score plain regex"));

/// Score strategies in priority order.
pub static SCORE_STRATEGIES: [Strategy<RawScore>; 3] = [
    Strategy {
        name: "score_fraction",
        run: score_fraction,
    },
    Strategy {
        name: "score_percent",
        run: score_percent,
    },
    Strategy {
        name: "score_plain",
        run: score_plain,
    },
];

/// Value text of every score label, in order.
fn labeled_values(text: &str) -> Vec<&str> {
    let lines: Vec<&str> = text.lines().collect();
    let mut values = Vec::new();
    for (i, &line) in lines.iter().enumerate() {
        let Some(label) = parse_label(line) else {
            continue;
        };
        if label.field != Field::Score {
            continue;
        }
        if !label.rest.is_empty() {
            values.push(label.rest);
        } else if let Some(next) = lines[i + 1..]
            .iter()
            .copied()
            .map(str::trim)
            .find(|l| !l.is_empty())
        {
            values.push(next);
        }
    }
    values
}

fn score_fraction(text: &str) -> Option<RawScore> {
    labeled_values(text).into_iter().find_map(|value| {
        let caps = FRACTION_RE.captures(value)?;
        let value = caps[1].parse().ok()?;
        let out_of = caps[2].parse().ok()?;
        Some(RawScore::Fraction { value, out_of })
    })
}

fn score_percent(text: &str) -> Option<RawScore> {
    labeled_values(text).into_iter().find_map(|value| {
        let caps = PERCENT_RE.captures(value)?;
        caps[1].parse().ok().map(RawScore::Percent)
    })
}

fn score_plain(text: &str) -> Option<RawScore> {
    labeled_values(text).into_iter().find_map(|value| {
        let caps = PLAIN_RE.captures(value)?;
        caps[1].parse().ok().map(RawScore::Plain)
    })
}

/// Map a raw score into `[0, 1]`. `None` means the labeled value is malformed.
///
/// Fractions and percentages carry their own scale and are accepted under
/// either policy. Plain numbers under [`RescalePolicy::SmallestFit`] try
/// `[0, 1]`, then `(1, 10]`, then `(10, 100]`, so `5` reads as `0.5` and
/// `1` stays `1.0`.
pub fn normalize(raw: RawScore, policy: RescalePolicy) -> Option<f64> {
    let value = match raw {
        RawScore::Fraction { value, out_of } => {
            if out_of <= 0.0 || value < 0.0 || value > out_of {
                return None;
            }
            value / out_of
        }
        RawScore::Percent(value) => {
            if !(0.0..=100.0).contains(&value) {
                return None;
            }
            value / 100.0
        }
        RawScore::Plain(value) => match policy {
            RescalePolicy::Strict => value,
            RescalePolicy::SmallestFit => {
                if (0.0..=1.0).contains(&value) {
                    value
                } else if value > 1.0 && value <= 10.0 {
                    value / 10.0
                } else if value > 10.0 && value <= 100.0 {
                    value / 100.0
                } else {
                    return None;
                }
            }
        },
    };
    (0.0..=1.0).contains(&value).then_some(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::first_match;

    fn extract(text: &str) -> Option<f64> {
        let hit = first_match(&SCORE_STRATEGIES, text)?;
        normalize(hit.value, RescalePolicy::SmallestFit)
    }

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn ten_point_scale_is_rescaled() {
        assert!(approx(extract("Score: 8.5").unwrap(), 0.85));
    }

    #[test]
    fn unit_scale_is_unchanged() {
        assert!(approx(extract("Score: 0.85").unwrap(), 0.85));
    }

    #[test]
    fn hundred_point_scale_is_rescaled() {
        assert!(approx(extract("Overall score: 72").unwrap(), 0.72));
    }

    #[test]
    fn missing_label_is_absent() {
        assert!(first_match(&SCORE_STRATEGIES, "I'd give it 8 out of 10.").is_none());
    }

    #[test]
    fn fraction_wins_over_plain() {
        let hit = first_match(&SCORE_STRATEGIES, "Score: 4/5").unwrap();
        assert_eq!(hit.strategy, "score_fraction");
        assert!(approx(normalize(hit.value, RescalePolicy::Strict).unwrap(), 0.8));

        let hit = first_match(&SCORE_STRATEGIES, "Rating: 7 out of 10").unwrap();
        assert!(approx(
            normalize(hit.value, RescalePolicy::SmallestFit).unwrap(),
            0.7
        ));
    }

    #[test]
    fn percent_strategy() {
        let hit = first_match(&SCORE_STRATEGIES, "score:85%").unwrap();
        assert_eq!(hit.strategy, "score_percent");
        assert!(approx(
            normalize(hit.value, RescalePolicy::SmallestFit).unwrap(),
            0.85
        ));
    }

    #[test]
    fn markdown_emphasis_is_tolerated() {
        assert!(approx(extract("**Score:** 9").unwrap(), 0.9));
    }

    #[test]
    fn spacing_tolerance_is_bounded() {
        assert!(extract("Score : 0.5").is_some());
        assert!(extract("Score  :  0.5").is_none());
        assert!(extract("Score:  0.5").is_none());
    }

    #[test]
    fn score_under_a_bare_heading() {
        let hit = first_match(&SCORE_STRATEGIES, "## Score\n\n8/10\n\n## Summary\nFine.").unwrap();
        assert_eq!(hit.strategy, "score_fraction");
        assert!(approx(normalize(hit.value, RescalePolicy::Strict).unwrap(), 0.8));

        assert!(approx(extract("**Overall rating**\n7").unwrap(), 0.7));
    }

    #[test]
    fn prose_mentioning_a_score_is_not_a_label() {
        assert!(first_match(&SCORE_STRATEGIES, "The final score: 8 out of 10").is_none());
    }

    #[test]
    fn out_of_every_range_is_malformed() {
        assert_eq!(extract("Score: 250"), None);
        assert_eq!(extract("Score: -3"), None);
        assert_eq!(
            normalize(RawScore::Fraction { value: 12.0, out_of: 10.0 }, RescalePolicy::SmallestFit),
            None
        );
        assert_eq!(
            normalize(RawScore::Fraction { value: 1.0, out_of: 0.0 }, RescalePolicy::SmallestFit),
            None
        );
    }

    #[test]
    fn rescale_precedence() {
        let policy = RescalePolicy::SmallestFit;
        assert_eq!(normalize(RawScore::Plain(1.0), policy), Some(1.0));
        assert_eq!(normalize(RawScore::Plain(5.0), policy), Some(0.5));
        assert_eq!(normalize(RawScore::Plain(10.0), policy), Some(1.0));
        assert_eq!(normalize(RawScore::Plain(50.0), policy), Some(0.5));
        assert_eq!(normalize(RawScore::Plain(100.0), policy), Some(1.0));
    }

    #[test]
    fn strict_policy_rejects_plain_rescale() {
        assert_eq!(normalize(RawScore::Plain(8.5), RescalePolicy::Strict), None);
        assert_eq!(normalize(RawScore::Plain(0.4), RescalePolicy::Strict), Some(0.4));
        assert_eq!(normalize(RawScore::Percent(40.0), RescalePolicy::Strict), Some(0.4));
    }
}
