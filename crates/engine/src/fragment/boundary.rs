//! Natural breakpoint detection for fragment cuts.

/// Kinds of natural breakpoints, weakest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Breakpoint {
    /// End of a word (next char is whitespace)
    Word,
    /// End of a sentence
    Sentence,
    /// End of a line
    Line,
    /// End of a paragraph (blank line)
    Paragraph,
}

const SENTENCE_TERMINATORS: [char; 3] = ['.', '!', '?'];
const CJK_TERMINATORS: [char; 3] = ['。', '！', '？'];

/// Classify a cut placed before `chars[pos]`.
///
/// `pos` must be in `1..chars.len()`; cuts at the very end of the text are
/// never searched for.
pub fn classify(chars: &[char], pos: usize) -> Option<Breakpoint> {
    if pos == 0 || pos >= chars.len() {
        return None;
    }

    let prev = chars[pos - 1];
    let next = chars[pos];

    if prev == '\n' {
        if ends_blank_line(chars, pos) {
            return Some(Breakpoint::Paragraph);
        }
        return Some(Breakpoint::Line);
    }

    if CJK_TERMINATORS.contains(&prev)
        || (SENTENCE_TERMINATORS.contains(&prev) && next.is_whitespace())
    {
        return Some(Breakpoint::Sentence);
    }

    if next.is_whitespace() && !prev.is_whitespace() {
        return Some(Breakpoint::Word);
    }

    None
}

/// Whether the newline at `pos - 1` closes a blank line (`\n\n` or `\n\r\n`).
fn ends_blank_line(chars: &[char], pos: usize) -> bool {
    match pos {
        0 | 1 => false,
        _ if chars[pos - 2] == '\n' => true,
        _ => pos >= 3 && chars[pos - 2] == '\r' && chars[pos - 3] == '\n',
    }
}

/// Pick the strongest breakpoint in `lower..=upper`, the latest within a class.
pub fn best_cut(chars: &[char], lower: usize, upper: usize) -> Option<usize> {
    let mut best: Option<(Breakpoint, usize)> = None;

    for pos in lower..=upper {
        if let Some(kind) = classify(chars, pos) {
            if best.map_or(true, |(current, _)| kind >= current) {
                best = Some((kind, pos));
            }
        }
    }

    best.map(|(_, pos)| pos)
}
