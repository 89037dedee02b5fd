use url::Url;

/// Normalizes a track URL into the key used for duplicate detection.
///
/// Query string, fragment and trailing slashes are dropped, so share links
/// like `.../track/abc?si=123` and `.../track/abc/` map to the same task.
/// Input that is not a URL (a bare catalogue id, say) is only trimmed.
pub fn task_id_from_url(input: &str) -> Option<String> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return None;
    }

    match Url::parse(trimmed) {
        Ok(mut url) if url.has_host() => {
            url.set_query(None);
            url.set_fragment(None);
            let normalized = url.as_str().trim_end_matches('/').to_string();
            Some(normalized)
        }
        _ => Some(trimmed.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_share_parameters() {
        assert_eq!(
            task_id_from_url("https://open.spotify.com/track/4uLU6hMCjMI75M1A2tKUQC?si=abc#x")
                .as_deref(),
            Some("https://open.spotify.com/track/4uLU6hMCjMI75M1A2tKUQC")
        );
    }

    #[test]
    fn trailing_slash_and_whitespace_do_not_matter() {
        assert_eq!(
            task_id_from_url("  https://open.spotify.com/track/abc/ "),
            task_id_from_url("https://open.spotify.com/track/abc")
        );
    }

    #[test]
    fn non_urls_are_kept_verbatim() {
        assert_eq!(task_id_from_url(" spotify:track:abc ").as_deref(), Some("spotify:track:abc"));
        assert_eq!(
            task_id_from_url("4uLU6hMCjMI75M1A2tKUQC").as_deref(),
            Some("4uLU6hMCjMI75M1A2tKUQC")
        );
    }

    #[test]
    fn blank_input_has_no_id() {
        assert_eq!(task_id_from_url("   "), None);
    }
}
