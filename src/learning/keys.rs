//! Key normalization for the learning store.

use url::Url;

/// Longest title fragment kept in a page-context key.
pub const MAX_TITLE_FRAGMENT: usize = 40;

/// Longest normalized target key.
pub const MAX_TARGET_KEY_LEN: usize = 64;

/// Substrings that mark a label as an internal step signature rather than
/// something a human sees on the page.
const SIGNATURE_MARKERS: &[&str] = &["click_", "wait_"];

/// Identify "the same logical screen" across runs: host, path, and a
/// short normalized title fragment.
///
/// # Example
///
/// ```
/// use pagepilot::learning::state_key;
///
/// let key = state_key("https://player.example.com/room/42?t=9", "  Now   Playing | Radio ");
/// assert_eq!(key, "player.example.com/room/42|now playing | radio");
/// ```
#[must_use]
pub fn state_key(url: &str, title: &str) -> String {
    let location = match Url::parse(url) {
        Ok(parsed) => {
            let host = parsed.host_str().unwrap_or("local").to_ascii_lowercase();
            let path = parsed.path();
            let path = if path.len() > 1 {
                path.trim_end_matches('/')
            } else {
                ""
            };
            format!("{host}{path}")
        }
        Err(_) => url
            .split(['?', '#'])
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase(),
    };

    let title = title
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase();
    let fragment: String = title.chars().take(MAX_TITLE_FRAGMENT).collect();

    format!("{location}|{}", fragment.trim_end())
}

/// Project a target label onto a stable key.
///
/// Keeps lower-cased alphanumerics only, capped at [`MAX_TARGET_KEY_LEN`].
/// Returns `None` for empty projections and for labels that look like
/// internal step signatures, which would otherwise poison the store.
#[must_use]
pub fn target_key(label: &str) -> Option<String> {
    let lowered = label.to_lowercase();
    if SIGNATURE_MARKERS.iter().any(|m| lowered.contains(m)) {
        return None;
    }
    let key: String = lowered
        .chars()
        .filter(|c| c.is_alphanumeric())
        .take(MAX_TARGET_KEY_LEN)
        .collect();
    if key.is_empty() {
        None
    } else {
        Some(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_key_ignores_query_and_fragment() {
        assert_eq!(
            state_key("https://Example.com/a/b/?x=1#top", "Home"),
            state_key("https://example.com/a/b", "home")
        );
    }

    #[test]
    fn test_state_key_root_path() {
        assert_eq!(state_key("https://example.com/", "Hi"), "example.com|hi");
    }

    #[test]
    fn test_state_key_truncates_title() {
        let title = "a".repeat(200);
        let key = state_key("https://example.com/x", &title);
        assert_eq!(key.len(), "example.com/x|".len() + MAX_TITLE_FRAGMENT);
    }

    #[test]
    fn test_state_key_unparseable_url() {
        assert_eq!(state_key("about-blank?x", "T"), "about-blank|t");
    }

    #[test]
    fn test_target_key_normalizes() {
        assert_eq!(target_key("Stop Playback!").as_deref(), Some("stopplayback"));
        assert_eq!(target_key("#transport-stop").as_deref(), Some("transportstop"));
        assert_eq!(target_key("  ").as_deref(), None);
    }

    #[test]
    fn test_target_key_rejects_signatures() {
        assert!(target_key("3:click_text:Stop").is_none());
        assert!(target_key("wait_selector").is_none());
    }

    #[test]
    fn test_target_key_is_capped() {
        let key = target_key(&"x".repeat(500)).unwrap();
        assert_eq!(key.len(), MAX_TARGET_KEY_LEN);
    }
}
