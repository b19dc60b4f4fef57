//! Reply formatting and chunking for paced display

#[cfg(test)]
mod proptests;

/// A word-group is emitted once it grows past this many characters
pub const CHUNK_THRESHOLD: usize = 20;

/// One unit of paced output
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fragment {
    /// Whitespace-joined words from a single line, no leading or trailing space
    Text(String),
    /// Line boundary
    Break,
}

impl Fragment {
    #[allow(dead_code)] // Used by tests
    pub fn text(&self) -> Option<&str> {
        match self {
            Fragment::Text(text) => Some(text),
            Fragment::Break => None,
        }
    }
}

/// Turn escaped `\n` sequences into real line breaks
pub fn normalize(raw: &str) -> String {
    if raw.is_empty() {
        return String::new();
    }
    raw.replace("\\n", "\n")
}

/// Split normalised text into fragments.
///
/// Lines are separated by [`Fragment::Break`] (none after the last line).
/// Within a line, words accumulate until the group exceeds
/// [`CHUNK_THRESHOLD`] characters or the line runs out.
pub fn chunk(text: &str) -> Vec<Fragment> {
    let lines: Vec<&str> = text.split('\n').collect();
    let last_line = lines.len().saturating_sub(1);
    let mut fragments = Vec::new();

    for (index, line) in lines.iter().enumerate() {
        let words: Vec<&str> = line.split_whitespace().collect();
        let mut current = String::new();

        for (position, word) in words.iter().enumerate() {
            if !current.is_empty() {
                current.push(' ');
            }
            current.push_str(word);

            if current.chars().count() > CHUNK_THRESHOLD || position + 1 == words.len() {
                fragments.push(Fragment::Text(std::mem::take(&mut current)));
            }
        }

        if index < last_line {
            fragments.push(Fragment::Break);
        }
    }

    fragments
}
