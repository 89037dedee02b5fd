//! Candidate scoring and selection.
//!
//! Every candidate that survives the marker filter gets a composite score in
//! `[0, 1]` built from the fixed coefficients in [`weights`]. The highest score
//! wins; ties go to the more trusted provider, then the closer duration, then
//! whichever candidate came first. Nothing here looks at the clock or at a
//! random source, so the same inputs always give the same answer.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use strsim::normalized_levenshtein;
use crate::api::Track;
use crate::search::query::{contains_phrase, normalize_text, normalize_title, SearchQuery};
use crate::search::{Candidate, Provider};

/// Scoring coefficients. Changing any of these changes which candidate wins.
pub mod weights {
    pub const TITLE: f64 = 0.55;
    pub const ARTIST: f64 = 0.25;
    pub const DURATION: f64 = 0.15;
    /// Scaled by `trust_rank / MAX_TRUST_RANK`.
    pub const PROVIDER: f64 = 0.05;
    /// Subtracted when both durations are known and differ by more than the tolerance.
    pub const DURATION_MISMATCH_PENALTY: f64 = 0.10;
}

/// Words video hosts add to titles that say nothing about the recording.
const TITLE_NOISE: &[&str] = &[
    "official", "video", "audio", "music", "lyrics", "lyric", "hd", "hq", "4k",
    "visualizer", "visualiser", "mv", "explicit", "clean",
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatcherConfig {
    pub duration_tolerance_secs: u64,
    pub min_score: f64,
    pub disqualifying_markers: Vec<String>,
}

impl Default for MatcherConfig {
    fn default() -> Self {
        Self {
            duration_tolerance_secs: 15,
            min_score: 0.6,
            disqualifying_markers: [
                "live", "remix", "cover", "8d", "nightcore", "sped up", "slowed",
                "karaoke", "instrumental",
            ]
            .iter()
            .map(|m| m.to_string())
            .collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum NoMatchReason {
    NoCandidates,
    BelowThreshold { best_score: Option<f64> },
}

impl fmt::Display for NoMatchReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NoMatchReason::NoCandidates => f.write_str("no candidates"),
            NoMatchReason::BelowThreshold { best_score: Some(score) } => {
                write!(f, "no candidate above threshold (best {:.2})", score)
            }
            NoMatchReason::BelowThreshold { best_score: None } => {
                f.write_str("no candidate above threshold")
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum MatchResult {
    Matched { candidate: Candidate, score: f64 },
    NoMatch { reason: NoMatchReason },
}

impl MatchResult {
    pub fn is_match(&self) -> bool {
        matches!(self, MatchResult::Matched { .. })
    }

    pub fn candidate(&self) -> Option<&Candidate> {
        match self {
            MatchResult::Matched { candidate, .. } => Some(candidate),
            MatchResult::NoMatch { .. } => None,
        }
    }

    pub fn score(&self) -> Option<f64> {
        match self {
            MatchResult::Matched { score, .. } => Some(*score),
            MatchResult::NoMatch { .. } => None,
        }
    }
}

struct Scored<'a> {
    candidate: &'a Candidate,
    score: f64,
    duration_diff: Option<u64>,
}

impl Scored<'_> {
    /// `Greater` means `self` should replace `other` as the current best.
    /// Equal keeps the earlier candidate.
    fn rank_against(&self, other: &Scored<'_>) -> Ordering {
        self.score
            .total_cmp(&other.score)
            .then_with(|| {
                self.candidate
                    .provider
                    .trust_rank()
                    .cmp(&other.candidate.provider.trust_rank())
            })
            .then_with(|| {
                // closer is better, unknown is worst
                let mine = self.duration_diff.unwrap_or(u64::MAX);
                let theirs = other.duration_diff.unwrap_or(u64::MAX);
                theirs.cmp(&mine)
            })
    }
}

#[derive(Debug, Clone)]
pub struct Matcher {
    config: MatcherConfig,
    markers: Vec<String>,
}

impl Matcher {
    pub fn new(config: MatcherConfig) -> Self {
        let markers = config
            .disqualifying_markers
            .iter()
            .map(|m| normalize_text(m))
            .filter(|m| !m.is_empty())
            .collect();
        Self { config, markers }
    }

    pub fn config(&self) -> &MatcherConfig {
        &self.config
    }

    pub fn find_best_match(&self, track: &Track, candidates: &[Candidate]) -> MatchResult {
        self.match_query(&SearchQuery::normalized(track), candidates)
    }

    /// Same as `find_best_match` for a query that was already normalized.
    pub fn match_query(&self, query: &SearchQuery, candidates: &[Candidate]) -> MatchResult {
        if candidates.is_empty() {
            return MatchResult::NoMatch { reason: NoMatchReason::NoCandidates };
        }

        let mut best: Option<Scored<'_>> = None;
        for candidate in candidates {
            let Some(scored) = self.score(query, candidate) else {
                continue;
            };
            log::debug!(
                "[MATCH] '{}' by '{}' on {} scored {:.3}",
                candidate.title, candidate.uploader, candidate.provider, scored.score
            );
            best = match best {
                Some(current) if scored.rank_against(&current) != Ordering::Greater => {
                    Some(current)
                }
                _ => Some(scored),
            };
        }

        match best {
            Some(best) if best.score >= self.config.min_score => MatchResult::Matched {
                candidate: best.candidate.clone(),
                score: best.score,
            },
            best => MatchResult::NoMatch {
                reason: NoMatchReason::BelowThreshold {
                    best_score: best.map(|b| b.score),
                },
            },
        }
    }

    /// Composite score, or `None` when a marker disqualifies the candidate.
    fn score<'a>(&self, query: &SearchQuery, candidate: &'a Candidate) -> Option<Scored<'a>> {
        if self.is_disqualified(query, &normalize_text(&candidate.title)) {
            log::debug!(
                "[MATCH] dropping '{}': variant marker not in track title",
                candidate.title
            );
            return None;
        }

        let title = normalize_title(&candidate.title);
        let title_score = title_similarity(query, &title);
        let artist_score = artist_similarity(query, &normalize_text(&candidate.uploader), &title);
        let duration_diff = match (query.duration, candidate.duration.filter(|d| *d > 0)) {
            (Some(wanted), Some(got)) => Some(wanted.abs_diff(got)),
            _ => None,
        };
        let (duration_score, penalty) = self.duration_closeness(duration_diff);
        let provider_bonus = weights::PROVIDER * f64::from(candidate.provider.trust_rank())
            / f64::from(Provider::MAX_TRUST_RANK);

        let score = weights::TITLE * title_score
            + weights::ARTIST * artist_score
            + weights::DURATION * duration_score
            + provider_bonus
            - penalty;

        Some(Scored {
            candidate,
            score: score.clamp(0.0, 1.0),
            duration_diff,
        })
    }

    fn is_disqualified(&self, query: &SearchQuery, candidate_title: &str) -> bool {
        self.markers
            .iter()
            .any(|m| contains_phrase(candidate_title, m) && !contains_phrase(&query.title, m))
    }

    /// Returns `(closeness, penalty)`. Closeness is `1 - (diff / tolerance)^2`,
    /// reaching zero at the tolerance; past it the penalty applies instead.
    fn duration_closeness(&self, diff: Option<u64>) -> (f64, f64) {
        let Some(diff) = diff else {
            return (0.0, 0.0);
        };
        let tolerance = self.config.duration_tolerance_secs;
        if diff > tolerance {
            return (0.0, weights::DURATION_MISMATCH_PENALTY);
        }
        if tolerance == 0 {
            return (1.0, 0.0);
        }
        let ratio = diff as f64 / tolerance as f64;
        (1.0 - ratio * ratio, 0.0)
    }
}

impl Default for Matcher {
    fn default() -> Self {
        Self::new(MatcherConfig::default())
    }
}

fn sorted_tokens(text: &str) -> String {
    let mut tokens: Vec<&str> = text.split_whitespace().collect();
    tokens.sort_unstable();
    tokens.join(" ")
}

/// Levenshtein similarity that also forgives word order.
fn similarity(a: &str, b: &str) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    normalized_levenshtein(a, b).max(normalized_levenshtein(&sorted_tokens(a), &sorted_tokens(b)))
}

fn remove_phrase(text: &str, phrase: &str) -> String {
    let padded = format!(" {} ", text).replace(&format!(" {} ", phrase), " ");
    padded.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Compares titles as-is and again with artist names and host noise removed
/// from the candidate, since uploads are often titled "Artist - Song (Official Video)".
fn title_similarity(query: &SearchQuery, candidate_title: &str) -> f64 {
    if query.title.is_empty() || candidate_title.is_empty() {
        return 0.0;
    }

    let mut cleaned = candidate_title.to_string();
    for artist in &query.artists {
        if !contains_phrase(&query.title, artist) {
            cleaned = remove_phrase(&cleaned, artist);
        }
    }
    let cleaned: Vec<&str> = cleaned
        .split_whitespace()
        .filter(|token| !TITLE_NOISE.contains(token) || contains_phrase(&query.title, token))
        .collect();

    similarity(&query.title, candidate_title).max(similarity(&query.title, &cleaned.join(" ")))
}

fn clean_uploader(uploader: &str) -> String {
    let trimmed = uploader.strip_suffix(" topic").unwrap_or(uploader);
    let trimmed = trimmed.strip_suffix("vevo").unwrap_or(trimmed);
    remove_phrase(trimmed, "official")
}

/// Best similarity between the uploader and any track artist. An artist named
/// in the candidate title counts as a full match.
fn artist_similarity(query: &SearchQuery, uploader: &str, candidate_title: &str) -> f64 {
    let uploader = clean_uploader(uploader);
    let squashed_uploader = uploader.replace(' ', "");

    query
        .artists
        .iter()
        .map(|artist| {
            if contains_phrase(&uploader, artist) || contains_phrase(candidate_title, artist) {
                return 1.0;
            }
            similarity(&uploader, artist)
                .max(similarity(&squashed_uploader, &artist.replace(' ', "")))
        })
        .fold(0.0, f64::max)
}
