//! Textual SPIR-V line primitives.

/// Marker left in place of a line that has been fused away. Lines carrying
/// this marker count as non-code and are swept by the non-code removal
/// passes.
pub const EMPTY_MARKER: &str = "; <<empty>>";

/// A single line of textual SPIR-V assembly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpirvLine {
    text: String,
}

/// Finds the next identifier in `s` at or after byte offset `start`.
///
/// An identifier is a maximal run starting with `%` and ending at the next
/// ASCII whitespace or the end of the line.
fn find_ident(s: &str, start: usize) -> Option<(usize, usize)> {
    let begin = start + s.get(start..)?.find('%')?;
    let bytes = s.as_bytes();
    let mut end = begin + 1;
    while end < bytes.len() && !bytes[end].is_ascii_whitespace() {
        end += 1;
    }
    Some((begin, end))
}

impl SpirvLine {
    pub fn new(text: impl Into<String>) -> Self {
        SpirvLine { text: text.into() }
    }

    /// Builds a line with surrounding whitespace stripped on ingress.
    pub fn trimmed(text: &str) -> Self {
        SpirvLine {
            text: text.trim().to_owned(),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    pub fn trim(&mut self) {
        self.text = self.text.trim().to_owned();
    }

    /// A line is code iff it is neither blank nor a `;` comment.
    pub fn has_code(&self) -> bool {
        let trimmed = self.text.trim();
        !trimmed.is_empty() && !trimmed.starts_with(';')
    }

    pub fn contains(&self, pat: &str) -> bool {
        self.text.contains(pat)
    }

    /// Replaces the line with the fused-away marker.
    pub fn mark_empty(&mut self) {
        self.text = EMPTY_MARKER.to_owned();
    }

    /// Enumerates every identifier on the line, left to right.
    pub fn idents(&self) -> impl Iterator<Item = &str> {
        let mut pos = 0;
        std::iter::from_fn(move || {
            let (begin, end) = find_ident(&self.text, pos)?;
            pos = end;
            Some(&self.text[begin..end])
        })
    }

    /// The defined identifier, present only on lines with an `=`.
    pub fn lhs_ident(&self) -> Option<&str> {
        if !self.text.contains('=') {
            return None;
        }
        let (begin, end) = find_ident(&self.text, 0)?;
        Some(&self.text[begin..end])
    }

    /// The substring after the first `=`, trimmed.
    pub fn rhs(&self) -> Option<&str> {
        let eq = self.text.find('=')?;
        Some(self.text[eq + 1..].trim())
    }

    /// Enumerates the identifiers to the right of the first `=`.
    pub fn rhs_idents(&self) -> impl Iterator<Item = &str> {
        let offset = self.text.find('=').map(|eq| eq + 1);
        let mut pos = offset.unwrap_or_else(|| self.text.len());
        std::iter::from_fn(move || {
            offset?;
            let (begin, end) = find_ident(&self.text, pos)?;
            pos = end;
            Some(&self.text[begin..end])
        })
    }

    /// Replaces the first occurrence of `old` with `new`, boundary-blind.
    pub fn replace_str(&mut self, old: &str, new: &str) -> bool {
        match self.text.find(old) {
            Some(pos) => {
                self.text.replace_range(pos..pos + old.len(), new);
                true
            }
            None => false,
        }
    }

    /// Replaces the first occurrence of identifier `old` whose right boundary
    /// is whitespace or the end of the line. Prefix matches such as `%foo`
    /// inside `%foobar` are skipped.
    pub fn replace_id(&mut self, old: &str, new: &str) -> bool {
        let mut from = 0;
        while let Some(found) = self.text[from..].find(old) {
            let begin = from + found;
            let end = begin + old.len();
            let bounded = match self.text.as_bytes().get(end) {
                Some(b) => b.is_ascii_whitespace(),
                None => true,
            };
            if bounded {
                self.text.replace_range(begin..end, new);
                return true;
            }
            from = end;
        }
        false
    }
}

impl From<&str> for SpirvLine {
    fn from(text: &str) -> Self {
        SpirvLine::new(text)
    }
}

impl std::fmt::Display for SpirvLine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.text)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_has_code() {
        assert!(SpirvLine::new("%a = OpTypeVoid").has_code());
        assert!(SpirvLine::new("      OpReturn").has_code());
        assert!(!SpirvLine::new("").has_code());
        assert!(!SpirvLine::new("   ").has_code());
        assert!(!SpirvLine::new("; SPIR-V").has_code());
        let mut line = SpirvLine::new("%a = OpTypeVoid");
        line.mark_empty();
        assert!(!line.has_code());
        assert_eq!(line.as_str(), EMPTY_MARKER);
    }

    #[test]
    fn test_idents() {
        let line = SpirvLine::new("%gep = OpAccessChain %ptr %buf %uint_zero %idx");
        let ids = line.idents().collect::<Vec<_>>();
        assert_eq!(ids, ["%gep", "%ptr", "%buf", "%uint_zero", "%idx"]);
    }

    #[test]
    fn test_lhs_and_rhs() {
        let line = SpirvLine::new("%v4uint = OpTypeVector %uint 4");
        assert_eq!(line.lhs_ident(), Some("%v4uint"));
        assert_eq!(line.rhs(), Some("OpTypeVector %uint 4"));
        assert_eq!(line.rhs_idents().collect::<Vec<_>>(), ["%uint"]);

        let line = SpirvLine::new("OpStore %ptr %value");
        assert_eq!(line.lhs_ident(), None);
        assert_eq!(line.rhs(), None);
        assert_eq!(line.rhs_idents().count(), 0);
    }

    // LHS, " = " and RHS reproduce the line up to interior whitespace.
    #[test]
    fn test_lhs_rhs_round_trip() {
        let line = SpirvLine::new("%res   =   OpIAdd %uint %a %b");
        let rebuilt = format!("{} = {}", line.lhs_ident().unwrap(), line.rhs().unwrap());
        assert_eq!(rebuilt, "%res = OpIAdd %uint %a %b");
    }

    #[test]
    fn test_replace_id_skips_prefix_matches() {
        let mut line = SpirvLine::new("%r = OpIAdd %uint %foobar %foo");
        assert!(line.replace_id("%foo", "%bar"));
        assert_eq!(line.as_str(), "%r = OpIAdd %uint %foobar %bar");
        assert!(!line.replace_id("%foo", "%bar"));
    }

    #[test]
    fn test_replace_id_at_end_of_line() {
        let mut line = SpirvLine::new("OpReturnValue %foo");
        assert!(line.replace_id("%foo", "%bar"));
        assert_eq!(line.as_str(), "OpReturnValue %bar");
    }

    #[test]
    fn test_replace_str() {
        let mut line = SpirvLine::new("%p = OpTypePointer Function %uint");
        assert!(line.replace_str(" Function", " Uniform"));
        assert_eq!(line.as_str(), "%p = OpTypePointer Uniform %uint");
        assert!(!line.replace_str(" Function", " Uniform"));
    }
}
