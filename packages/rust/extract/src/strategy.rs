//! Ordered, named extraction strategies.
//!
//! Each field owns a fixed list of strategies. They are tried in order and
//! the first one that returns a value wins, even if a later strategy would
//! have found something "better".

/// A named way of recovering a value from text.
pub struct Strategy<T> {
    /// Stable name reported in [`Extraction::matched_by`](crate::Extraction).
    pub name: &'static str,
    /// Returns `None` when this strategy does not apply to the text.
    pub run: fn(&str) -> Option<T>,
}

/// A value and the strategy that produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct Hit<T> {
    pub value: T,
    pub strategy: &'static str,
}

/// Run strategies in order and keep the first match.
pub fn first_match<T>(strategies: &[Strategy<T>], text: &str) -> Option<Hit<T>> {
    strategies.iter().find_map(|s| {
        (s.run)(text).map(|value| Hit {
            value,
            strategy: s.name,
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn digits(text: &str) -> Option<u32> {
        text.split_whitespace().find_map(|w| w.parse().ok())
    }

    fn length(text: &str) -> Option<u32> {
        u32::try_from(text.len()).ok()
    }

    fn never(_: &str) -> Option<u32> {
        None
    }

    #[test]
    fn first_successful_strategy_wins() {
        let strategies = [
            Strategy { name: "never", run: never },
            Strategy { name: "digits", run: digits },
            Strategy { name: "length", run: length },
        ];
        let hit = first_match(&strategies, "take 7 apples").unwrap();
        assert_eq!(hit.value, 7);
        assert_eq!(hit.strategy, "digits");

        let hit = first_match(&strategies, "no numbers").unwrap();
        assert_eq!(hit.strategy, "length");
    }

    #[test]
    fn no_strategy_matches() {
        let strategies = [Strategy { name: "never", run: never }];
        assert!(first_match(&strategies, "anything").is_none());
    }
}
