//! Yes/no classification for confirmation replies
//!
//! Matching is done on normalised word sequences, so "y" never matches inside
//! "yesterday". A positive indicator only counts when it is not part of a
//! matched negative phrase: "not correct" is negative even though it contains
//! "correct".

/// Classified polarity of a confirmation reply
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Polarity {
    Positive,
    Negative,
    /// Both a standalone positive and a negative indicator
    Ambiguous,
    /// No indicator at all
    Unmatched,
}

pub const POSITIVE_INDICATORS: &[&str] = &[
    "yes",
    "y",
    "yeah",
    "yep",
    "yup",
    "sure",
    "correct",
    "true",
    "confirm",
    "confirmed",
    "right",
    "accurate",
    "that's right",
    "looks good",
];

/// Phrases are listed alongside single words; longer phrases win over the
/// positive words they contain.
pub const NEGATIVE_INDICATORS: &[&str] = &[
    "no",
    "n",
    "nope",
    "nah",
    "not",
    "incorrect",
    "false",
    "wrong",
    "isn't",
    "aren't",
    "don't",
    "not correct",
    "not right",
    "not true",
    "not accurate",
    "that's wrong",
];

/// Lowercase, strip punctuation other than apostrophes, collapse whitespace
pub fn normalize_reply(text: &str) -> Vec<String> {
    text.to_lowercase()
        .replace('\u{2019}', "'")
        .split(|c: char| c.is_whitespace() || (c.is_ascii_punctuation() && c != '\''))
        .map(|w| w.trim_matches('\''))
        .filter(|w| !w.is_empty())
        .map(str::to_string)
        .collect()
}

pub fn classify(text: &str) -> Polarity {
    let words = normalize_reply(text);

    let negative_spans = find_spans(&words, NEGATIVE_INDICATORS);
    let positive_spans = find_spans(&words, POSITIVE_INDICATORS);

    // Positive matches swallowed by a negative phrase do not count
    let standalone_positive = positive_spans.iter().any(|&(start, end)| {
        !negative_spans.iter().any(|&(n_start, n_end)| {
            n_start <= start && end <= n_end && n_end - n_start > end - start
        })
    });

    match (standalone_positive, !negative_spans.is_empty()) {
        (true, true) => Polarity::Ambiguous,
        (true, false) => Polarity::Positive,
        (false, true) => Polarity::Negative,
        (false, false) => Polarity::Unmatched,
    }
}

/// Word spans `[start, end)` where any indicator occurs
fn find_spans(words: &[String], indicators: &[&str]) -> Vec<(usize, usize)> {
    let mut spans = Vec::new();
    for indicator in indicators {
        let phrase: Vec<&str> = indicator.split_whitespace().collect();
        if phrase.is_empty() || phrase.len() > words.len() {
            continue;
        }
        for start in 0..=words.len() - phrase.len() {
            let matches = words
                .iter()
                .skip(start)
                .zip(&phrase)
                .all(|(word, expected)| word == expected);
            if matches {
                spans.push((start, start + phrase.len()));
            }
        }
    }
    spans
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_answers() {
        assert_eq!(classify("yes"), Polarity::Positive);
        assert_eq!(classify("Yes!"), Polarity::Positive);
        assert_eq!(classify("  YEP  "), Polarity::Positive);
        assert_eq!(classify("no"), Polarity::Negative);
        assert_eq!(classify("Nope."), Polarity::Negative);
    }

    #[test]
    fn test_negative_phrase_wins_over_contained_positive() {
        assert_eq!(classify("not correct"), Polarity::Negative);
        assert_eq!(classify("That is not right"), Polarity::Negative);
        assert_eq!(classify("not true at all"), Polarity::Negative);
        assert_eq!(classify("that's wrong"), Polarity::Negative);
    }

    #[test]
    fn test_both_polarities_are_ambiguous() {
        assert_eq!(classify("yes no"), Polarity::Ambiguous);
        assert_eq!(classify("yes, but the phone is wrong"), Polarity::Ambiguous);
        assert_eq!(classify("right, not correct"), Polarity::Ambiguous);
    }

    #[test]
    fn test_single_letters_match_whole_words_only() {
        assert_eq!(classify("yesterday"), Polarity::Unmatched);
        assert_eq!(classify("nothing"), Polarity::Unmatched);
        assert_eq!(classify("y"), Polarity::Positive);
        assert_eq!(classify("n"), Polarity::Negative);
    }

    #[test]
    fn test_unmatched_and_empty() {
        assert_eq!(classify(""), Polarity::Unmatched);
        assert_eq!(classify("maybe later"), Polarity::Unmatched);
    }

    #[test]
    fn test_curly_apostrophe_normalised() {
        assert_eq!(classify("that\u{2019}s right"), Polarity::Positive);
        assert_eq!(classify("it isn\u{2019}t"), Polarity::Negative);
    }
}
