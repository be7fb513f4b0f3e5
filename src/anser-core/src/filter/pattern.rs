//! `*` wildcard patterns for tag keys and values.

/// A glob-like pattern where `*` matches any run of characters (including
/// the empty run). Runs of consecutive stars collapse to one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pattern {
    raw: String,
    parts: Vec<String>,
    anchored_start: bool,
    anchored_end: bool,
}

impl Pattern {
    /// Compile a pattern string.
    pub fn new(raw: &str) -> Self {
        let mut collapsed = raw.to_string();
        while collapsed.contains("**") {
            collapsed = collapsed.replace("**", "*");
        }

        let anchored_start = !collapsed.starts_with('*');
        let anchored_end = !collapsed.ends_with('*');
        let parts = collapsed
            .split('*')
            .filter(|part| !part.is_empty())
            .map(str::to_string)
            .collect();

        Self {
            raw: raw.to_string(),
            parts,
            anchored_start,
            anchored_end,
        }
    }

    /// The pattern as written by the caller.
    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// Match a candidate string against the pattern.
    pub fn matches(&self, candidate: &str) -> bool {
        if self.parts.is_empty() {
            // Pattern was all stars (or empty): "*" matches anything, ""
            // matches only "".
            return !self.anchored_start || candidate.is_empty();
        }

        let mut rest = candidate;
        let mut idx = 0;

        if self.anchored_start {
            match rest.strip_prefix(self.parts[0].as_str()) {
                Some(stripped) => rest = stripped,
                None => return false,
            }
            idx = 1;
            if idx == self.parts.len() {
                return !self.anchored_end || rest.is_empty();
            }
        }

        let last = self.parts.len() - 1;
        while idx < last {
            match rest.find(self.parts[idx].as_str()) {
                Some(pos) => rest = &rest[pos + self.parts[idx].len()..],
                None => return false,
            }
            idx += 1;
        }

        let tail = self.parts[last].as_str();
        if self.anchored_end {
            rest.ends_with(tail)
        } else {
            rest.contains(tail)
        }
    }
}
