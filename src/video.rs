use regex::Regex;
use std::sync::LazyLock;

const THUMBNAIL_TEMPLATE: &str = "https://img.youtube.com/vi/{id}/hqdefault.jpg";

/// Video-ID patterns, tried in order. The first covers `watch?v=<id>`,
/// `/embed/<id>` and `/shorts/<id>`; the second covers `youtu.be/<id>`
/// links carrying extra text after the ID.
static VIDEO_ID_PATTERNS: LazyLock<[Regex; 2]> = LazyLock::new(|| {
    [
        Regex::new(r"(?:v=|/)([0-9A-Za-z_-]{11})(?:\?|&|/|$)")
            .expect("video id regex must compile"),
        Regex::new(r"youtu\.be/([0-9A-Za-z_-]{11})").expect("short link regex must compile"),
    ]
});

pub fn video_id(url: &str) -> Option<&str> {
    if url.is_empty() {
        return None;
    }
    VIDEO_ID_PATTERNS.iter().find_map(|pattern| {
        pattern
            .captures(url)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str())
    })
}

/// Preview image for a video link, or `None` when the link is not recognized
/// and should be shown as a plain anchor instead.
pub fn thumbnail_url(url: &str) -> Option<String> {
    video_id(url).map(|id| THUMBNAIL_TEMPLATE.replace("{id}", id))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_watch_url() {
        assert_eq!(
            thumbnail_url("https://www.youtube.com/watch?v=dQw4w9WgXcQ").as_deref(),
            Some("https://img.youtube.com/vi/dQw4w9WgXcQ/hqdefault.jpg")
        );
    }

    #[test]
    fn test_watch_url_with_extra_params() {
        assert_eq!(
            video_id("https://www.youtube.com/watch?v=dQw4w9WgXcQ&t=42s"),
            Some("dQw4w9WgXcQ")
        );
    }

    #[test]
    fn test_short_link() {
        assert_eq!(video_id("https://youtu.be/dQw4w9WgXcQ"), Some("dQw4w9WgXcQ"));
        assert_eq!(
            video_id("https://youtu.be/dQw4w9WgXcQ?si=abc123"),
            Some("dQw4w9WgXcQ")
        );
    }

    #[test]
    fn test_short_link_with_trailing_text_uses_second_pattern() {
        // No boundary after the ID, so only the short-link pattern applies.
        assert_eq!(video_id("youtu.be/dQw4w9WgXcQ#t=1"), Some("dQw4w9WgXcQ"));
    }

    #[test]
    fn test_shorts_url() {
        let url = "https://www.youtube.com/shorts/7S7-3U2AoeE";
        assert_eq!(video_id(url), Some("7S7-3U2AoeE"));
        assert!(thumbnail_url(url).unwrap().contains("7S7-3U2AoeE"));
    }

    #[test]
    fn test_unrecognized_urls() {
        assert_eq!(thumbnail_url(""), None);
        assert_eq!(thumbnail_url("not a video link"), None);
        assert_eq!(thumbnail_url("https://vimeo.com/123456"), None);
        // Ten characters is one short of an ID.
        assert_eq!(thumbnail_url("https://youtu.be/abcdefghij"), None);
    }
}
