
use fancy_regex::Regex;
use std::sync::LazyLock;
use tracing::debug;

use crate::config::ChunkingSettings;

static PARAGRAPH_BREAK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\n\s*\n").expect("paragraph pattern is valid"));

// Lookbehind keeps the terminator attached to its sentence.
static SENTENCE_BREAK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?<=[.!?])\s+").expect("sentence pattern is valid"));

/// Pluggable token estimator. The default character-ratio heuristic is only
/// valid for the script it was calibrated against, so the chunker never
/// assumes a fixed ratio itself.
pub trait TokenEstimator: Send + Sync {
    fn estimate(&self, text: &str) -> usize;
}

/// Rough estimate from a characters-per-token ratio (~4.0 for English).
#[derive(Debug, Clone, Copy)]
pub struct CharsPerToken(pub f32);

impl CharsPerToken {
    #[inline]
    pub fn from_settings(settings: &ChunkingSettings) -> Self {
        Self(settings.chars_per_token)
    }
}

impl TokenEstimator for CharsPerToken {
    #[inline]
    fn estimate(&self, text: &str) -> usize {
        (text.chars().count() as f32 / self.0) as usize
    }
}

/// A bounded-size retrieval unit cut from one knowledge entry.
///
/// `body` is the raw slice of the source text; concatenating the bodies of
/// all chunks reproduces the source word sequence. `overlap_prefix` carries
/// the tail of the previous chunk and only ever appears in the embedded
/// form, never in the reconstruction.
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    pub ordinal: usize,
    pub body: String,
    pub overlap_prefix: String,
    pub token_count: usize,
}

impl Chunk {
    /// The text that gets embedded: overlap context plus the body.
    #[inline]
    pub fn full_text(&self) -> String {
        if self.overlap_prefix.is_empty() {
            self.body.clone()
        } else {
            format!("{} {}", self.overlap_prefix, self.body)
        }
    }
}

/// The embedded form is prefixed with category and title so the vector
/// captures where the information comes from.
#[inline]
pub fn contextual_text(chunk: &Chunk, category: &str, title: &str) -> String {
    format!("[{} — {}]\n{}", category, title, chunk.full_text())
}

/// Split text into chunks that fit within the token budget.
///
/// Splits on paragraph boundaries first, then sentence boundaries, then
/// words as a last resort. Empty input yields an empty sequence; input
/// under the budget yields a single chunk. Output is deterministic and
/// preserves source order.
#[inline]
pub fn chunk_text(
    text: &str,
    settings: &ChunkingSettings,
    estimator: &dyn TokenEstimator,
) -> Vec<Chunk> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Vec::new();
    }

    let max_tokens = settings.max_tokens;

    let bodies = if estimator.estimate(trimmed) <= max_tokens {
        vec![trimmed.to_string()]
    } else {
        split_into_bodies(text, max_tokens, estimator)
    };

    let chunks = attach_overlap(bodies, settings.overlap_tokens, estimator);

    debug!(
        "Chunked {} chars into {} chunks (budget {} tokens)",
        text.len(),
        chunks.len(),
        max_tokens
    );

    chunks
}

fn split_into_bodies(text: &str, max_tokens: usize, estimator: &dyn TokenEstimator) -> Vec<String> {
    let mut bodies = Vec::new();
    let mut current = String::new();

    for paragraph in split_on(&PARAGRAPH_BREAK, text) {
        let paragraph = paragraph.trim();
        if paragraph.is_empty() {
            continue;
        }

        if fits(&current, paragraph, "\n\n", max_tokens, estimator) {
            push_piece(&mut current, paragraph, "\n\n");
        } else {
            flush(&mut current, &mut bodies);

            if estimator.estimate(paragraph) > max_tokens {
                split_oversized_paragraph(paragraph, max_tokens, estimator, &mut current, &mut bodies);
            } else {
                current = paragraph.to_string();
            }
        }
    }

    flush(&mut current, &mut bodies);
    bodies
}

fn split_oversized_paragraph(
    paragraph: &str,
    max_tokens: usize,
    estimator: &dyn TokenEstimator,
    current: &mut String,
    bodies: &mut Vec<String>,
) {
    for sentence in split_on(&SENTENCE_BREAK, paragraph) {
        let sentence = sentence.trim();
        if sentence.is_empty() {
            continue;
        }

        if fits(current, sentence, " ", max_tokens, estimator) {
            push_piece(current, sentence, " ");
            continue;
        }

        flush(current, bodies);

        if estimator.estimate(sentence) > max_tokens {
            // A single runaway sentence: hard cut on word boundaries.
            for word in sentence.split_whitespace() {
                if fits(current, word, " ", max_tokens, estimator) {
                    push_piece(current, word, " ");
                } else {
                    flush(current, bodies);
                    current.push_str(word);
                }
            }
        } else {
            *current = sentence.to_string();
        }
    }
}

fn attach_overlap(
    bodies: Vec<String>,
    overlap_tokens: usize,
    estimator: &dyn TokenEstimator,
) -> Vec<Chunk> {
    let mut chunks: Vec<Chunk> = Vec::with_capacity(bodies.len());

    for (ordinal, body) in bodies.into_iter().enumerate() {
        let overlap_prefix = if ordinal == 0 || overlap_tokens == 0 {
            String::new()
        } else {
            chunks
                .last()
                .map(|prev| tail_words(&prev.body, overlap_tokens, estimator))
                .unwrap_or_default()
        };

        let token_count = estimator.estimate(&body);
        chunks.push(Chunk {
            ordinal,
            body,
            overlap_prefix,
            token_count,
        });
    }

    chunks
}

/// Take words from the end of `text` until the overlap budget is spent.
/// Returns nothing when the whole text would be consumed, since a full copy
/// is a duplicate rather than overlap context.
fn tail_words(text: &str, overlap_tokens: usize, estimator: &dyn TokenEstimator) -> String {
    let words: Vec<&str> = text.split_whitespace().collect();
    let mut taken = 0;

    for count in 1..words.len() {
        let candidate = words[words.len() - count..].join(" ");
        if estimator.estimate(&candidate) > overlap_tokens {
            break;
        }
        taken = count;
    }

    if taken == 0 {
        String::new()
    } else {
        words[words.len() - taken..].join(" ")
    }
}

// Estimates the joined text rather than summing parts, since estimators are
// not required to be additive.
fn fits(
    current: &str,
    piece: &str,
    separator: &str,
    max_tokens: usize,
    estimator: &dyn TokenEstimator,
) -> bool {
    if current.is_empty() {
        return estimator.estimate(piece) <= max_tokens;
    }
    estimator.estimate(&format!("{current}{separator}{piece}")) <= max_tokens
}

fn push_piece(current: &mut String, piece: &str, separator: &str) {
    if !current.is_empty() {
        current.push_str(separator);
    }
    current.push_str(piece);
}

fn flush(current: &mut String, bodies: &mut Vec<String>) {
    if !current.trim().is_empty() {
        bodies.push(std::mem::take(current).trim().to_string());
    } else {
        current.clear();
    }
}

fn split_on<'t>(pattern: &Regex, text: &'t str) -> Vec<&'t str> {
    let mut pieces = Vec::new();
    let mut last = 0;

    for found in pattern.find_iter(text).flatten() {
        pieces.push(&text[last..found.start()]);
        last = found.end();
    }
    pieces.push(&text[last..]);

    pieces
}
