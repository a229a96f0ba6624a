use std::collections::VecDeque;
use std::ops::Range;
use std::sync::LazyLock;

use regex::Regex;

/// Markdown structure boundaries, strongest first. Anything that still does
/// not fit after the last one is cut into single characters.
const MARKDOWN_SEPARATORS: &[&str] = &[
    r"\n#{1,6} ",
    r"```\n",
    r"\n\*\*\*+\n",
    r"\n---+\n",
    r"\n___+\n",
    r"\n\n",
    r"\n",
    r" ",
];

static SEPARATORS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    MARKDOWN_SEPARATORS
        .iter()
        .map(|p| Regex::new(p).expect("valid separator pattern"))
        .collect()
});

/// A trimmed slice of the source document.
///
/// `start..end` are byte offsets into the source, so `content` is always
/// `&source[start..end]`.
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    pub content: String,
    pub position: usize,
    pub start: usize,
    pub end: usize,
}

/// Recursive markdown splitter producing overlapping chunks.
///
/// Sizes are counted in `char`s. Every chunk holds at most `chunk_size`
/// characters and shares at most `chunk_overlap` characters with its
/// predecessor.
#[derive(Debug, Clone, Copy)]
pub struct MarkdownSplitter {
    chunk_size: usize,
    chunk_overlap: usize,
}

impl MarkdownSplitter {
    #[must_use]
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Self {
        let chunk_size = chunk_size.max(1);
        Self {
            chunk_size,
            chunk_overlap: chunk_overlap.min(chunk_size - 1),
        }
    }

    /// Split `text` into ordered chunks.
    pub fn split(&self, text: &str) -> Vec<Chunk> {
        let mut spans = Vec::new();
        self.split_range(text, 0..text.len(), 0, &mut spans);

        spans
            .into_iter()
            .enumerate()
            .map(|(position, span)| Chunk {
                content: text[span.clone()].to_string(),
                position,
                start: span.start,
                end: span.end,
            })
            .collect()
    }

    fn split_range(
        &self,
        text: &str,
        range: Range<usize>,
        level: usize,
        out: &mut Vec<Range<usize>>,
    ) {
        let slice = &text[range.clone()];

        let (pieces, next_level) = match SEPARATORS[level..]
            .iter()
            .position(|re| re.is_match(slice))
        {
            Some(offset) => {
                let idx = level + offset;
                (split_keep_start(&SEPARATORS[idx], slice, range.start), idx + 1)
            }
            None => (split_chars(slice, range.start), SEPARATORS.len()),
        };

        let mut fitting: Vec<Range<usize>> = Vec::new();
        for piece in pieces {
            if char_len(text, &piece) <= self.chunk_size {
                fitting.push(piece);
            } else {
                if !fitting.is_empty() {
                    self.merge(text, &fitting, out);
                    fitting.clear();
                }
                self.split_range(text, piece, next_level, out);
            }
        }

        if !fitting.is_empty() {
            self.merge(text, &fitting, out);
        }
    }

    /// Greedily pack contiguous pieces into chunks, carrying a tail of at
    /// most `chunk_overlap` characters into the next chunk.
    fn merge(&self, text: &str, pieces: &[Range<usize>], out: &mut Vec<Range<usize>>) {
        let mut window: VecDeque<(Range<usize>, usize)> = VecDeque::new();
        let mut total = 0usize;

        for piece in pieces {
            let len = char_len(text, piece);

            if total + len > self.chunk_size && !window.is_empty() {
                emit(text, &window, out);
                while total > self.chunk_overlap || (total + len > self.chunk_size && total > 0) {
                    match window.pop_front() {
                        Some((_, dropped)) => total -= dropped,
                        None => break,
                    }
                }
            }

            window.push_back((piece.clone(), len));
            total += len;
        }

        emit(text, &window, out);
    }
}

impl Default for MarkdownSplitter {
    fn default() -> Self {
        Self::new(1000, 200)
    }
}

/// Convenience wrapper around [`MarkdownSplitter`].
pub fn split_into_chunks(content: &str, chunk_size: usize, chunk_overlap: usize) -> Vec<Chunk> {
    MarkdownSplitter::new(chunk_size, chunk_overlap).split(content)
}

fn emit(text: &str, window: &VecDeque<(Range<usize>, usize)>, out: &mut Vec<Range<usize>>) {
    let (Some((first, _)), Some((last, _))) = (window.front(), window.back()) else {
        return;
    };
    let span = trim_range(text, first.start..last.end);
    if span.is_empty() {
        return;
    }
    // Trimming can leave one chunk nested inside its neighbour; keep only the
    // outer one.
    while let Some(prev) = out.last() {
        if prev.start <= span.start && span.end <= prev.end {
            return;
        }
        if span.start <= prev.start && prev.end <= span.end {
            out.pop();
            continue;
        }
        break;
    }
    out.push(span);
}

/// Split at every separator match, keeping the separator at the start of the
/// following piece so the pieces stay contiguous.
fn split_keep_start(re: &Regex, slice: &str, base: usize) -> Vec<Range<usize>> {
    let mut pieces = Vec::new();
    let mut last = 0;
    for m in re.find_iter(slice) {
        if m.start() > last {
            pieces.push(base + last..base + m.start());
            last = m.start();
        }
    }
    if last < slice.len() {
        pieces.push(base + last..base + slice.len());
    }
    pieces
}

fn split_chars(slice: &str, base: usize) -> Vec<Range<usize>> {
    slice
        .char_indices()
        .map(|(i, c)| base + i..base + i + c.len_utf8())
        .collect()
}

fn char_len(text: &str, range: &Range<usize>) -> usize {
    text[range.clone()].chars().count()
}

fn trim_range(text: &str, range: Range<usize>) -> Range<usize> {
    let slice = &text[range.clone()];
    let lead = slice.len() - slice.trim_start().len();
    let trimmed = slice.trim();
    let start = range.start + lead;
    start..start + trimmed.len()
}
