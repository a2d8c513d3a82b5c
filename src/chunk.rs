//! Sentence- and paragraph-aware text chunker.
//!
//! Text is first cut into *units*: whole sentences, or pieces of a sentence
//! when that sentence alone exceeds `max_chars`. Units are then packed
//! greedily into chunks of at most `max_chars` bytes, so a chunk boundary
//! only ever falls between sentences unless a single sentence is longer
//! than the window.
//!
//! Inside a chunk, sentences are joined by a single space and paragraphs by
//! a blank line; runs of whitespace inside a sentence collapse to one space.
//! Units that followed their predecessor with no whitespace in the source
//! (after a full-width `。` / `！` / `？`, or at a hard cut through a token
//! longer than `max_chars`) are *glued*: they are joined with nothing in
//! between, and a chunk that starts with one carries [`ChunkSpan::glued`].
//! Every unit lands in exactly one chunk, in order, so joining the chunk
//! texts (with a space, or nothing when glued) and normalizing whitespace
//! reproduces the normalized input.
//!
//! Two packing modes share the same units:
//!
//! - **structural**: [`Chunker::chunk`]: flush only when the next unit
//!   would overflow the window.
//! - **semantic**: [`Chunker::pack`] with breaks from
//!   [`semantic_breakpoints`]: additionally flush wherever adjacent sentence
//!   embeddings diverge beyond a percentile threshold.
//!
//! `overlap_chars` never changes chunk text; it selects trailing sentences
//! of the previous chunk as [`ChunkSpan::context`], which is prepended to
//! the text that gets embedded.

use crate::config::ChunkingConfig;
use crate::embedding::cosine_similarity;

/// A sentence (or piece of an over-long sentence).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Unit {
    pub text: String,
    /// First unit of a paragraph.
    pub starts_paragraph: bool,
    /// Directly followed the previous unit, with no whitespace between.
    pub glued: bool,
}

/// One chunk produced by the chunker, before embedding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkSpan {
    /// The chunk's own text. Disjoint from every other span's text.
    pub text: String,
    /// Trailing sentences of the previous chunk (empty without overlap).
    pub context: String,
    /// Continues the previous chunk's text with no whitespace between.
    pub glued: bool,
}

impl ChunkSpan {
    /// Text handed to the embedder: context followed by the chunk text.
    pub fn embedding_input(&self) -> String {
        if self.context.is_empty() {
            self.text.clone()
        } else {
            format!("{} {}", self.context, self.text)
        }
    }
}

#[derive(Debug, Clone)]
pub struct Chunker {
    max_chars: usize,
    overlap_chars: usize,
}

impl Chunker {
    pub fn new(config: &ChunkingConfig) -> Self {
        Self {
            max_chars: config.max_chars.max(1),
            overlap_chars: config.overlap_chars,
        }
    }

    /// Structural chunking. Empty or whitespace-only input yields no chunks.
    pub fn chunk(&self, text: &str) -> Vec<ChunkSpan> {
        self.pack(&self.units(text), &[])
    }

    /// Cut text into sentence units, splitting any unit over `max_chars`.
    pub fn units(&self, text: &str) -> Vec<Unit> {
        let mut units = Vec::new();
        for paragraph in paragraphs(text) {
            let mut first = true;
            for (sentence, sentence_glued) in split_sentences(&paragraph) {
                for (n, (piece, cut_glued)) in split_long(sentence, self.max_chars).into_iter().enumerate() {
                    units.push(Unit {
                        text: piece.to_string(),
                        starts_paragraph: first,
                        glued: !first && if n == 0 { sentence_glued } else { cut_glued },
                    });
                    first = false;
                }
            }
        }
        units
    }

    /// Pack units into chunks. `breaks` lists unit indices that must start
    /// a new chunk (in addition to size-driven flushes).
    pub fn pack(&self, units: &[Unit], breaks: &[usize]) -> Vec<ChunkSpan> {
        let mut ranges: Vec<(usize, usize)> = Vec::new();
        let mut start = 0usize;
        let mut len = 0usize;

        for (i, unit) in units.iter().enumerate() {
            if i > start {
                let sep = separator(unit).len();
                let overflow = len + sep + unit.text.len() > self.max_chars;
                if overflow || breaks.contains(&i) {
                    ranges.push((start, i));
                    start = i;
                    len = 0;
                } else {
                    len += sep;
                }
            }
            len += unit.text.len();
        }
        if start < units.len() {
            ranges.push((start, units.len()));
        }

        let mut spans = Vec::with_capacity(ranges.len());
        for (n, &(from, to)) in ranges.iter().enumerate() {
            let context = if n == 0 {
                String::new()
            } else {
                let (prev_from, prev_to) = ranges[n - 1];
                self.overlap_context(&units[prev_from..prev_to])
            };
            spans.push(ChunkSpan {
                text: join_units(&units[from..to]),
                context,
                glued: units[from].glued,
            });
        }
        spans
    }

    fn overlap_context(&self, previous: &[Unit]) -> String {
        if self.overlap_chars == 0 {
            return String::new();
        }
        let mut start = previous.len();
        let mut used = 0usize;
        while start > 0 {
            let unit = &previous[start - 1];
            let extra = unit.text.len() + if start < previous.len() { separator(&previous[start]).len() } else { 0 };
            if used + extra > self.overlap_chars {
                break;
            }
            used += extra;
            start -= 1;
        }
        join_units(&previous[start..]).replace("\n\n", " ")
    }
}

/// What goes between `unit` and the unit before it.
fn separator(unit: &Unit) -> &'static str {
    if unit.starts_paragraph {
        "\n\n"
    } else if unit.glued {
        ""
    } else {
        " "
    }
}

fn join_units(units: &[Unit]) -> String {
    let mut out = String::new();
    for (i, unit) in units.iter().enumerate() {
        if i > 0 {
            out.push_str(separator(unit));
        }
        out.push_str(&unit.text);
    }
    out
}

/// Collapse every whitespace run to one space and trim.
pub fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Paragraphs are separated by blank lines; each comes back normalized.
fn paragraphs(text: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut current: Vec<&str> = Vec::new();
    for line in text.lines() {
        if line.trim().is_empty() {
            if !current.is_empty() {
                out.push(normalize_whitespace(&current.join(" ")));
                current.clear();
            }
        } else {
            current.push(line);
        }
    }
    if !current.is_empty() {
        out.push(normalize_whitespace(&current.join(" ")));
    }
    out
}

/// Sentence enders that need a following space.
const TERMINATORS: [char; 3] = ['.', '!', '?'];
/// Full-width enders; CJK text puts no space after them.
const WIDE_TERMINATORS: [char; 5] = ['。', '！', '？', '｡', '．'];
const CLOSERS: [char; 13] = [
    '"', '\'', ')', ']', '\u{201d}', '\u{2019}', '*', '」', '』', '）', '】', '》', '〉',
];

fn is_terminator(c: char) -> bool {
    TERMINATORS.contains(&c) || WIDE_TERMINATORS.contains(&c)
}

/// Split a normalized paragraph into sentences. A sentence ends after a
/// run of terminators (plus closing quotes or brackets) that is followed
/// by a space, or by anything at all when the run holds a full-width
/// terminator. The flag marks sentences that follow with no space.
fn split_sentences(paragraph: &str) -> Vec<(&str, bool)> {
    let mut out = Vec::new();
    let mut start = 0usize;
    let mut glued = false;
    let mut chars = paragraph.char_indices().peekable();

    while let Some((_, c)) = chars.next() {
        if !is_terminator(c) {
            continue;
        }
        let mut wide = WIDE_TERMINATORS.contains(&c);
        while let Some(&(_, next)) = chars.peek() {
            if is_terminator(next) || CLOSERS.contains(&next) {
                wide |= WIDE_TERMINATORS.contains(&next);
                chars.next();
            } else {
                break;
            }
        }
        match chars.peek() {
            Some(&(pos, ' ')) => {
                out.push((&paragraph[start..pos], glued));
                start = pos + 1;
                glued = false;
            }
            Some(&(pos, _)) if wide => {
                out.push((&paragraph[start..pos], glued));
                start = pos;
                glued = true;
            }
            _ => {}
        }
    }
    if start < paragraph.len() {
        out.push((&paragraph[start..], glued));
    }
    out.into_iter().filter(|(s, _)| !s.is_empty()).collect()
}

/// Split `sentence` into pieces of at most `max` bytes, preferring the last
/// space inside each window. The flag marks pieces cut from the previous
/// one mid-token.
fn split_long(sentence: &str, max: usize) -> Vec<(&str, bool)> {
    let mut pieces = Vec::new();
    let mut remaining = sentence;
    let mut glued = false;
    while remaining.len() > max {
        let window = floor_char_boundary(remaining, max);
        let (cut, at_space) = match remaining[..window].rfind(' ') {
            Some(pos) if pos > 0 => (pos, true),
            _ => (window.max(next_char_boundary(remaining, 0)), false),
        };
        pieces.push((remaining[..cut].trim_end(), glued));
        remaining = remaining[cut..].trim_start();
        glued = !at_space;
    }
    if !remaining.is_empty() {
        pieces.push((remaining, glued));
    }
    pieces
}

fn floor_char_boundary(s: &str, mut idx: usize) -> usize {
    while idx > 0 && !s.is_char_boundary(idx) {
        idx -= 1;
    }
    idx
}

fn next_char_boundary(s: &str, idx: usize) -> usize {
    let mut i = idx + 1;
    while i < s.len() && !s.is_char_boundary(i) {
        i += 1;
    }
    i
}

/// Unit indices where a semantic chunk should start.
///
/// Computes the cosine distance between each pair of adjacent unit
/// embeddings and returns `i + 1` for every distance strictly above the
/// `percentile`-th percentile (linear interpolation) of all distances.
pub fn semantic_breakpoints(embeddings: &[Vec<f32>], percentile: f64) -> Vec<usize> {
    if embeddings.len() < 2 {
        return Vec::new();
    }
    let distances: Vec<f64> = embeddings
        .windows(2)
        .map(|pair| 1.0 - cosine_similarity(&pair[0], &pair[1]) as f64)
        .collect();
    let threshold = percentile_of(&distances, percentile);
    distances
        .iter()
        .enumerate()
        .filter(|(_, d)| **d > threshold)
        .map(|(i, _)| i + 1)
        .collect()
}

fn percentile_of(values: &[f64], percentile: f64) -> f64 {
    let mut sorted: Vec<f64> = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let rank = (percentile.clamp(0.0, 100.0) / 100.0) * (sorted.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    sorted[lo] + (sorted[hi] - sorted[lo]) * (rank - lo as f64)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunker(max_chars: usize, overlap_chars: usize) -> Chunker {
        Chunker::new(&ChunkingConfig {
            max_chars,
            overlap_chars,
            ..ChunkingConfig::default()
        })
    }

    fn joined(spans: &[ChunkSpan]) -> String {
        let mut out = String::new();
        for (i, span) in spans.iter().enumerate() {
            if i > 0 && !span.glued {
                out.push(' ');
            }
            out.push_str(&span.text);
        }
        normalize_whitespace(&out)
    }

    #[test]
    fn empty_text_yields_no_chunks() {
        assert!(chunker(100, 0).chunk("").is_empty());
        assert!(chunker(100, 0).chunk("  \n\n \t ").is_empty());
    }

    #[test]
    fn small_text_single_chunk() {
        let spans = chunker(700, 0).chunk("Hello, world!");
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].text, "Hello, world!");
        assert!(spans[0].context.is_empty());
    }

    #[test]
    fn paragraphs_under_limit_are_merged() {
        let text = "First paragraph.\n\nSecond paragraph.\n\nThird paragraph.";
        let spans = chunker(700, 0).chunk(text);
        assert_eq!(spans.len(), 1);
        assert_eq!(
            spans[0].text,
            "First paragraph.\n\nSecond paragraph.\n\nThird paragraph."
        );
    }

    #[test]
    fn boundaries_fall_between_sentences() {
        let text = (0..40)
            .map(|i| format!("Sentence number {} talks about topic {}.", i, i % 7))
            .collect::<Vec<_>>()
            .join(" ");
        let spans = chunker(120, 0).chunk(&text);
        assert!(spans.len() > 1);
        for span in &spans {
            assert!(span.text.len() <= 120, "chunk too long: {}", span.text.len());
            assert!(span.text.ends_with('.'), "chunk ends mid-sentence: {:?}", span.text);
            assert!(span.text.starts_with("Sentence"));
        }
    }

    #[test]
    fn coverage_no_loss_no_duplication() {
        let text = "Rust is a systems language.  It has\nownership!\n\n\
                    Is it fast? Yes.\"Quoted end.\" Done\n\n\n   Last   paragraph here";
        for max in [12, 25, 60, 1000] {
            let spans = chunker(max, 0).chunk(text);
            assert!(!spans.is_empty());
            assert_eq!(joined(&spans), normalize_whitespace(text), "max={}", max);
        }
    }

    #[test]
    fn oversized_tokens_are_hard_split_without_loss() {
        let text = "aaaaaaaaaaaaaaaaaaaaaaaaa bbbbbbbbbb ccccé";
        let spans = chunker(8, 0).chunk(text);
        for span in &spans {
            assert!(span.text.len() <= 8);
        }
        assert!(spans[1].glued);
        assert_eq!(joined(&spans), text);
    }

    #[test]
    fn long_url_is_cut_without_inserting_spaces() {
        let url = format!("See https://example.com/{} for details.", "x".repeat(300));
        let spans = chunker(100, 0).chunk(&url);
        assert!(spans.len() > 1);
        assert!(spans[1..].iter().any(|s| s.glued));
        assert_eq!(joined(&spans), url);
    }

    #[test]
    fn cjk_sentences_end_chunks_at_default_size() {
        let sentence = "这是一个关于文档检索的句子用于测试分块器的行为。";
        let text = sentence.repeat(60);
        let spans = Chunker::new(&ChunkingConfig::default()).chunk(&text);
        assert_eq!(spans.len(), 4);
        for span in &spans {
            assert!(span.text.len() <= 1200);
            assert!(span.text.ends_with('。'), "chunk ends mid-sentence: {:?}", span.text);
            assert!(span.text.starts_with("这是"));
        }
        assert!(spans[1..].iter().all(|s| s.glued));
        assert_eq!(joined(&spans), text);
    }

    #[test]
    fn cjk_and_latin_sentences_split() {
        assert_eq!(
            split_sentences("第一句。第二句！「引用。」Then English. End"),
            vec![
                ("第一句。", false),
                ("第二句！", true),
                ("「引用。」", true),
                ("Then English.", true),
                ("End", false),
            ]
        );
    }

    #[test]
    fn sentence_splitting_keeps_closers() {
        let parts: Vec<&str> = split_sentences("He said \"stop.\" Then left! Why? (Unknown.) end")
            .into_iter()
            .map(|(s, _)| s)
            .collect();
        assert_eq!(
            parts,
            vec!["He said \"stop.\"", "Then left!", "Why?", "(Unknown.)", "end"]
        );
        assert_eq!(split_sentences("Version 1.2 is out."), vec![("Version 1.2 is out.", false)]);
    }

    #[test]
    fn overlap_only_affects_context() {
        let text = "One fish. Two fish. Red fish. Blue fish. Old fish. New fish.";
        let plain = chunker(20, 0).chunk(text);
        let overlapped = chunker(20, 10).chunk(text);
        assert_eq!(
            plain.iter().map(|s| &s.text).collect::<Vec<_>>(),
            overlapped.iter().map(|s| &s.text).collect::<Vec<_>>()
        );
        assert!(overlapped[0].context.is_empty());
        assert_eq!(overlapped[1].context, "Two fish.");
        assert!(overlapped[1].embedding_input().starts_with("Two fish. "));
    }

    #[test]
    fn forced_breaks_split_chunks() {
        let c = chunker(1000, 0);
        let units = c.units("A one. B two. C three. D four.");
        assert_eq!(units.len(), 4);
        let spans = c.pack(&units, &[2]);
        assert_eq!(spans.len(), 2);
        assert_eq!(spans[0].text, "A one. B two.");
        assert_eq!(spans[1].text, "C three. D four.");
    }

    #[test]
    fn semantic_breakpoints_follow_topic_shift() {
        let embeddings = vec![
            vec![1.0, 0.0],
            vec![0.99, 0.1],
            vec![0.98, 0.12],
            vec![0.0, 1.0],
            vec![0.1, 0.99],
        ];
        assert_eq!(semantic_breakpoints(&embeddings, 75.0), vec![3]);
        assert!(semantic_breakpoints(&embeddings[..1], 95.0).is_empty());
    }

    #[test]
    fn percentile_interpolates() {
        let v = [0.0, 1.0, 2.0, 3.0];
        assert!((percentile_of(&v, 50.0) - 1.5).abs() < 1e-9);
        assert!((percentile_of(&v, 100.0) - 3.0).abs() < 1e-9);
    }

    #[test]
    fn deterministic() {
        let text = "Alpha one.\n\nBeta two.\n\nGamma three.\n\nDelta four.";
        assert_eq!(chunker(15, 0).chunk(text), chunker(15, 0).chunk(text));
    }
}
