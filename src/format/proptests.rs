//! Property-based tests for chunking

use super::*;
use proptest::prelude::*;

fn arb_line() -> impl Strategy<Value = String> {
    proptest::collection::vec("[a-zA-Z0-9()\\-.,]{1,12}", 0..12).prop_map(|w| w.join(" "))
}

fn arb_text() -> impl Strategy<Value = String> {
    proptest::collection::vec(arb_line(), 1..6).prop_map(|lines| lines.join("\n"))
}

/// Words of each line, reassembled from fragments
fn rejoin(fragments: &[Fragment]) -> Vec<Vec<String>> {
    let mut lines = vec![Vec::new()];
    for fragment in fragments {
        match fragment {
            Fragment::Text(text) => {
                if let Some(line) = lines.last_mut() {
                    line.extend(text.split(' ').map(str::to_string));
                }
            }
            Fragment::Break => lines.push(Vec::new()),
        }
    }
    lines
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(500))]

    // Rejoining word fragments reproduces every line's words in order
    #[test]
    fn prop_chunk_preserves_words(text in arb_text()) {
        let fragments = chunk(&normalize(&text));
        let expected: Vec<Vec<String>> = text
            .split('\n')
            .map(|line| line.split_whitespace().map(str::to_string).collect())
            .collect();
        prop_assert_eq!(rejoin(&fragments), expected);
    }

    #[test]
    fn prop_break_count_matches_lines(text in arb_text()) {
        let fragments = chunk(&text);
        let breaks = fragments.iter().filter(|f| **f == Fragment::Break).count();
        prop_assert_eq!(breaks, text.split('\n').count() - 1);
    }

    // Every fragment but a line's last is past the threshold
    #[test]
    fn prop_groups_respect_threshold(line in arb_line()) {
        let fragments = chunk(&line);
        if let Some((_, init)) = fragments.split_last() {
            for fragment in init {
                let text = fragment.text().unwrap_or_default();
                prop_assert!(text.chars().count() > CHUNK_THRESHOLD);
            }
        }
        for fragment in &fragments {
            prop_assert!(!fragment.text().unwrap_or("x").is_empty());
        }
    }

    #[test]
    fn prop_chunk_is_deterministic(text in arb_text()) {
        prop_assert_eq!(chunk(&text), chunk(&text));
    }
}
