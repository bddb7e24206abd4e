//! Message chunking & formatting (spec §4.4).
//!
//! Splits outbound text to fit a channel's length limit. Two modes:
//! length-based greedy windows with break-priority fallback, and
//! newline-based splitting (BlueBubbles only) that recurses into
//! length-mode for any resulting line that's still too long.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkMode {
    Length,
    Newline,
}

pub const DEFAULT_CHUNK_LIMIT: usize = 4000;

/// Resolve the effective chunk limit: per-account override, else
/// per-channel override, else the caller's fallback, else the hardcoded
/// default.
pub fn resolve_limit(
    account_limit: Option<usize>,
    channel_limit: Option<usize>,
    caller_fallback: Option<usize>,
) -> usize {
    account_limit
        .or(channel_limit)
        .or(caller_fallback)
        .unwrap_or(DEFAULT_CHUNK_LIMIT)
}

/// Split `text` into chunks no longer than `limit`, in `mode`.
///
/// Fenced code blocks (` ``` `) are never split across a chunk boundary
/// mid-fence: a break is pushed forward to the next newline inside the
/// fence, or, if the fence itself exceeds `limit`, hard-broken with the
/// fence reopened on the next chunk.
pub fn chunk(text: &str, limit: usize, mode: ChunkMode) -> Vec<String> {
    if text.len() <= limit {
        return vec![text.to_string()];
    }

    match mode {
        ChunkMode::Length => chunk_length(text, limit),
        ChunkMode::Newline => chunk_newline(text, limit),
    }
}

fn chunk_newline(text: &str, limit: usize) -> Vec<String> {
    let mut out = Vec::new();
    for line in text.split('\n') {
        if line.len() <= limit {
            out.push(line.to_string());
        } else {
            out.extend(chunk_length(line, limit));
        }
    }
    out
}

/// Greedy window over `text`, preferring to break at (in priority
/// order): the last newline outside an unclosed `(`, the last
/// whitespace outside an unclosed `(`, or a hard break at `limit`. The
/// separator character that caused the break is consumed once (not
/// duplicated into the next chunk).
///
/// A chunk that leaves a fenced code block open gets a synthetic
/// closing ` ``` ` appended so it renders standalone; the next chunk
/// gets the fence reopened with a ` ```\n ` prefix so the two halves of
/// the original block still read as one when viewed in sequence.
fn chunk_length(text: &str, limit: usize) -> Vec<String> {
    let mut out = Vec::new();
    let mut fence_open = false;
    let mut remaining = text;

    while !remaining.is_empty() {
        let prefix = if fence_open { "```\n" } else { "" };
        let budget = limit.saturating_sub(prefix.len()).max(1);

        if remaining.len() <= budget {
            out.push(format!("{prefix}{remaining}"));
            break;
        }

        let boundary = floor_char_boundary(remaining, budget);
        let window = &remaining[..boundary];
        let break_at = find_break_point(window, fence_open);

        match break_at {
            Some((break_idx, consume_len)) => {
                let chunk_fence_toggles = window[..break_idx].matches("```").count();
                let reopen = fence_open ^ (chunk_fence_toggles % 2 == 1);

                let mut piece = format!("{prefix}{}", &window[..break_idx]);
                if reopen && !piece.trim_end().ends_with("```") {
                    piece.push_str("\n```");
                }
                out.push(piece);

                fence_open = reopen;
                remaining = &remaining[break_idx + consume_len..];
            }
            None => {
                // Hard break: no usable separator in window.
                let toggles = window.matches("```").count();
                let reopen = fence_open ^ (toggles % 2 == 1);
                let mut piece = format!("{prefix}{window}");
                if reopen && !piece.trim_end().ends_with("```") {
                    piece.push_str("\n```");
                }
                out.push(piece);
                fence_open = reopen;
                remaining = &remaining[boundary..];
            }
        }
    }

    out
}

/// Largest byte index `<= idx` that lands on a UTF-8 char boundary of
/// `s`, so windowed slicing never panics on multi-byte input.
fn floor_char_boundary(s: &str, idx: usize) -> usize {
    if idx >= s.len() {
        return s.len();
    }
    let mut i = idx;
    while i > 0 && !s.is_char_boundary(i) {
        i -= 1;
    }
    i
}

/// Find a break point within `window`, respecting unclosed parens.
/// Returns `(index, separator_len)` where `index` is where the chunk
/// ends (exclusive) and `separator_len` is how many bytes of separator
/// to skip before the next chunk starts.
fn find_break_point(window: &str, _fence_open: bool) -> Option<(usize, usize)> {
    let paren_depth_at = |upto: usize| -> i32 {
        let mut depth = 0;
        for c in window[..upto].chars() {
            match c {
                '(' => depth += 1,
                ')' => depth -= 1,
                _ => {}
            }
        }
        depth
    };

    if let Some(idx) = window.rfind('\n') {
        if paren_depth_at(idx) <= 0 {
            return Some((idx, 1));
        }
    }

    if let Some(idx) = window.rfind(char::is_whitespace) {
        if paren_depth_at(idx) <= 0 {
            return Some((idx, 1));
        }
    }

    None
}
