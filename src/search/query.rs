use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;
use crate::api::Track;
use crate::errors::SearchError;

/// Search string plus the normalized fields the matcher compares against.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchQuery {
    pub text: String,
    pub title: String,
    pub artists: Vec<String>,
    pub album: Option<String>,
    pub duration: Option<u64>,
    pub explicit: bool,
}

impl SearchQuery {
    /// Fails permanently when the track has no title or no named artist, since
    /// no amount of retrying fixes bad catalogue data.
    pub fn from_track(track: &Track) -> Result<Self, SearchError> {
        if track.title.trim().is_empty() {
            return Err(SearchError::Permanent(format!("track {} has no title", track.id)));
        }

        let query = Self::normalized(track);
        if query.artists.is_empty() {
            return Err(SearchError::Permanent(format!("track {} has no artist", track.id)));
        }

        Ok(query)
    }

    /// Same as `from_track` without validation; empty fields stay empty.
    pub fn normalized(track: &Track) -> Self {
        let artists: Vec<String> = track
            .artists
            .iter()
            .map(|a| normalize_text(a))
            .filter(|a| !a.is_empty())
            .collect();

        let primary_artist = track
            .artists
            .iter()
            .map(|a| a.trim())
            .find(|a| !a.is_empty())
            .unwrap_or_default();

        Self {
            text: format!("{} - {}", primary_artist, strip_featuring(track.title.trim())),
            title: normalize_title(&track.title),
            artists,
            album: track.album.as_deref().map(normalize_text).filter(|a| !a.is_empty()),
            duration: track.duration.filter(|d| *d > 0),
            explicit: track.explicit,
        }
    }
}

fn featuring_patterns() -> &'static [Regex; 2] {
    static PATTERNS: OnceLock<[Regex; 2]> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            // "(feat. Someone)", "[with Someone]"
            Regex::new(r"(?i)\s*[\(\[]\s*(?:feat\.?|ft\.?|featuring|with)\s[^\)\]]*[\)\]]")
                .expect("valid featuring regex"),
            // trailing "feat. Someone" without brackets
            Regex::new(r"(?i)\s+(?:feat\.|ft\.|feat|featuring)\s.*$")
                .expect("valid featuring regex"),
        ]
    })
}

/// Removes featured-artist credits, keeping the rest untouched.
pub fn strip_featuring(text: &str) -> String {
    let [bracketed, trailing] = featuring_patterns();
    let stripped = bracketed.replace_all(text, "");
    trailing.replace(&stripped, "").trim().to_string()
}

/// Lowercase, apostrophes dropped, other punctuation replaced by spaces,
/// whitespace collapsed.
pub fn normalize_text(text: &str) -> String {
    let lowered: String = text
        .to_lowercase()
        .chars()
        .filter(|c| !matches!(c, '\'' | '\u{2019}'))
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect();
    lowered.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Title form used for comparisons: featuring credits dropped, then normalized.
pub fn normalize_title(title: &str) -> String {
    normalize_text(&strip_featuring(title))
}

/// Whole-word (or whole-phrase) containment on normalized text.
pub fn contains_phrase(haystack: &str, phrase: &str) -> bool {
    if phrase.is_empty() {
        return false;
    }
    format!(" {} ", haystack).contains(&format!(" {} ", phrase))
}
