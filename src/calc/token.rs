//! logos-based scanner for `{{CALC:<id>}}` tokens.
//!
//! The lexer only distinguishes braces from everything else, so every input
//! lexes without error and no backtracking is needed. [`scan`] then looks for
//! the exact five-token shape `{ { CALC:<id> } }` and leaves every other brace
//! as literal text.

use std::ops::Range;

use logos::Logos;

/// Prefix inside the braces that marks a calculation reference.
pub const CALC_PREFIX: &str = "CALC:";

/// Raw lexer token.
#[derive(Logos, Debug, Clone, Copy, PartialEq, Eq)]
enum RawToken {
    #[token("{")]
    Open,

    #[token("}")]
    Close,

    /// Any run of non-brace characters.
    #[regex(r"[^{}]+")]
    Text,
}

/// A piece of scanned text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment<'a> {
    Literal(&'a str),
    Calc {
        /// Calculation id between `CALC:` and the closing braces.
        id: &'a str,
        /// Byte range of the whole token in the input.
        span: Range<usize>,
    },
}

/// Split `input` into literal runs and calculation references, left to right.
pub fn scan(input: &str) -> Vec<Segment<'_>> {
    let tokens: Vec<(RawToken, Range<usize>)> = RawToken::lexer(input)
        .spanned()
        .filter_map(|(result, span)| result.ok().map(|token| (token, span)))
        .collect();

    let mut segments = Vec::new();
    let mut literal_start: Option<usize> = None;
    let mut i = 0;

    while i < tokens.len() {
        if let Some((id, span)) = match_reference(input, &tokens[i..]) {
            if let Some(start) = literal_start.take() {
                segments.push(Segment::Literal(&input[start..span.start]));
            }
            segments.push(Segment::Calc { id, span });
            i += 5;
            continue;
        }
        if literal_start.is_none() {
            literal_start = Some(tokens[i].1.start);
        }
        i += 1;
    }

    if let Some(start) = literal_start {
        segments.push(Segment::Literal(&input[start..]));
    }
    segments
}

/// Match `{ { CALC:<id> } }` at the head of `tokens`.
fn match_reference<'a>(
    input: &'a str,
    tokens: &[(RawToken, Range<usize>)],
) -> Option<(&'a str, Range<usize>)> {
    let [(RawToken::Open, open), (RawToken::Open, _), (RawToken::Text, body), (RawToken::Close, _), (RawToken::Close, close), ..] =
        tokens
    else {
        return None;
    };
    let id = input[body.clone()].strip_prefix(CALC_PREFIX)?;
    if id.is_empty() {
        return None;
    }
    Some((id, open.start..close.end))
}

/// Ids of every calculation referenced in `input`, in order.
pub fn references(input: &str) -> Vec<&str> {
    scan(input)
        .into_iter()
        .filter_map(|segment| match segment {
            Segment::Calc { id, .. } => Some(id),
            Segment::Literal(_) => None,
        })
        .collect()
}

/// Whether `input` contains at least one calculation reference.
pub fn has_references(input: &str) -> bool {
    input.contains("{{") && !references(input).is_empty()
}
