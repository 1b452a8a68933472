//! Transcript model and SRT conversion.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::sync::LazyLock;

use crate::errors::{DigestError, Result};

/// Marks machine-generated subtitles, usually on the first cue.
#[allow(clippy::expect_used)]
static AUTO_GENERATED_MARKER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<该字幕由算法自动生成>\s*").expect("valid regex"));

const SENTENCE_END: &[char] = &['。', '！', '？', '.', '!', '?'];
const SOFT_BREAK: &[char] = &['，', '、', '；', ';'];
/// Short filler cues glued onto the previous cue without a comma.
const PARTICLES: &[&str] = &["啊", "呢", "吧", "的", "了", "着", "过", "呃", "嗯", "哦"];
/// Phrases that open a new topic; a sentence containing one closes its paragraph.
const TOPIC_MARKERS: &[&str] = &["那么", "接下来", "首先", "其次", "最后", "总之", "因此"];
const SENTENCES_PER_PARAGRAPH: usize = 4;

#[allow(clippy::expect_used)]
static TIME_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\d{2}):(\d{2}):(\d{2}),(\d{3})\s*-->\s*(\d{2}):(\d{2}):(\d{2}),(\d{3})")
        .expect("valid regex")
});

#[allow(clippy::expect_used)]
static BLOCK_SEPARATOR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\r?\n\s*\r?\n").expect("valid regex"));

/// One subtitle cue. Times are in seconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubtitleLine {
    /// Start time.
    pub from: f64,
    /// End time.
    pub to: f64,
    /// Cue text.
    pub content: String,
}

/// A unit's transcript.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Transcript {
    /// Language tag (e.g. `zh-CN`, `ai-zh`).
    pub language: String,
    /// Cues in playback order.
    pub lines: Vec<SubtitleLine>,
}

impl Transcript {
    /// Creates a transcript.
    #[must_use]
    pub fn new(language: impl Into<String>, lines: Vec<SubtitleLine>) -> Self {
        Self {
            language: language.into(),
            lines,
        }
    }

    /// Returns true if there is no non-blank cue.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lines.iter().all(|l| l.content.trim().is_empty())
    }

    /// Renders the transcript as an SRT document.
    #[must_use]
    pub fn to_srt(&self) -> String {
        let mut out = String::new();
        for (i, line) in self.lines.iter().enumerate() {
            let _ = write!(
                out,
                "{}\n{} --> {}\n{}\n\n",
                i + 1,
                format_srt_time(line.from),
                format_srt_time(line.to),
                line.content
            );
        }
        out
    }

    /// Parses an SRT document. Malformed blocks are skipped.
    pub fn from_srt(language: impl Into<String>, srt: &str) -> Result<Self> {
        let mut lines = Vec::new();

        for block in BLOCK_SEPARATOR.split(srt.trim()) {
            let rows: Vec<&str> = block.trim().lines().collect();
            if rows.len() < 3 {
                continue;
            }
            let Some(caps) = TIME_LINE.captures(rows[1].trim()) else {
                continue;
            };
            let field = |i: usize| caps.get(i).map_or(0, |m| m.as_str().parse::<u32>().unwrap_or(0));
            let from = to_seconds(field(1), field(2), field(3), field(4));
            let to = to_seconds(field(5), field(6), field(7), field(8));

            lines.push(SubtitleLine {
                from,
                to,
                content: rows[2..].join("\n"),
            });
        }

        if lines.is_empty() && !srt.trim().is_empty() {
            return Err(DigestError::Serialization(
                "no valid SRT blocks found".to_string(),
            ));
        }
        Ok(Self::new(language, lines))
    }

    /// One `[HH:MM:SS,mmm] text` line per cue, used for time-anchored prompts.
    #[must_use]
    pub fn timestamped_text(&self) -> String {
        self.lines
            .iter()
            .map(|l| format!("[{}] {}", format_srt_time(l.from), l.content))
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Readable prose for the enrichment prompts.
    ///
    /// Timing, the auto-generated marker, blank cues and cues repeating (or
    /// contained in) the previous one are dropped. The remaining cues are
    /// merged into punctuated sentences, and sentences are grouped into
    /// paragraphs separated by a blank line.
    #[must_use]
    pub fn plain_text(&self) -> String {
        let mut kept: Vec<String> = Vec::new();
        for line in &self.lines {
            let text = AUTO_GENERATED_MARKER.replace_all(line.content.trim(), "");
            let text = text.trim();
            if text.is_empty() {
                continue;
            }
            if kept.last().is_some_and(|prev| prev.contains(text)) {
                continue;
            }
            kept.push(text.to_string());
        }
        paragraphs(&merge_sentences(&kept))
    }
}

fn ends_with_any(text: &str, set: &[char]) -> bool {
    text.chars().last().is_some_and(|c| set.contains(&c))
}

fn has_cjk(text: &str) -> bool {
    text.chars().any(|c| ('\u{4e00}'..='\u{9fff}').contains(&c))
}

/// Joins cues into sentences. Latin cues are joined with a space, filler
/// particles are glued on, other Chinese cues get a `，`, and the last
/// sentence is closed with `。` if it has no terminal punctuation.
fn merge_sentences(cues: &[String]) -> Vec<String> {
    let mut sentences = Vec::new();
    let mut current = String::new();

    for text in cues {
        if current.is_empty() {
            current.push_str(text);
        } else if ends_with_any(&current, SENTENCE_END) {
            sentences.push(std::mem::take(&mut current));
            current.push_str(text);
        } else if text.chars().next().is_some_and(char::is_uppercase) || !has_cjk(text) {
            current.push(' ');
            current.push_str(text);
        } else if PARTICLES.contains(&text.as_str()) || ends_with_any(&current, SOFT_BREAK) {
            current.push_str(text);
        } else {
            current.push('，');
            current.push_str(text);
        }

        if ends_with_any(text, SENTENCE_END) {
            sentences.push(std::mem::take(&mut current));
        }
    }

    if !current.is_empty() {
        if !ends_with_any(&current, SENTENCE_END) {
            current.push('。');
        }
        sentences.push(current);
    }
    sentences
}

fn paragraphs(sentences: &[String]) -> String {
    let mut out: Vec<String> = Vec::new();
    let mut para = String::new();
    let mut count = 0usize;

    for sentence in sentences {
        para.push_str(sentence);
        count += 1;
        if count >= SENTENCES_PER_PARAGRAPH || TOPIC_MARKERS.iter().any(|m| sentence.contains(m)) {
            out.push(std::mem::take(&mut para));
            count = 0;
        }
    }
    if !para.is_empty() {
        out.push(para);
    }
    out.join("\n\n")
}

fn to_seconds(h: u32, m: u32, s: u32, ms: u32) -> f64 {
    f64::from(h * 3600 + m * 60 + s) + f64::from(ms) / 1000.0
}

/// Formats seconds as `HH:MM:SS,mmm`. Negative input clamps to zero.
#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn format_srt_time(seconds: f64) -> String {
    let total_ms = (seconds.max(0.0) * 1000.0).round() as u64;
    let ms = total_ms % 1000;
    let total_secs = total_ms / 1000;
    format!(
        "{:02}:{:02}:{:02},{:03}",
        total_secs / 3600,
        (total_secs % 3600) / 60,
        total_secs % 60,
        ms
    )
}
