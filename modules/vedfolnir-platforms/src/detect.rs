use vedfolnir_common::types::PlatformType;

/// Heuristic detection of a platform from its instance URL: cheap string
/// checks tried in a fixed order, with an explicit fallback rather than
/// returning `None`. Callers needing certainty for ambiguous hosts should
/// layer an authoritative `/api/v1/instance`-style probe on top of this.
pub fn detect_from_url(instance_url: &str) -> PlatformType {
    let lower = instance_url.to_lowercase();
    if lower.contains("pixelfed") {
        return PlatformType::Pixelfed;
    }
    if lower.contains("mastodon") {
        return PlatformType::Mastodon;
    }
    if lower.contains("pleroma") || lower.contains("akkoma") {
        return PlatformType::Pleroma;
    }
    // Ambiguous: falls back to Pixelfed.
    PlatformType::Pixelfed
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_known_platforms() {
        assert_eq!(detect_from_url("https://pixelfed.social"), PlatformType::Pixelfed);
        assert_eq!(detect_from_url("https://mastodon.social"), PlatformType::Mastodon);
        assert_eq!(detect_from_url("https://pleroma.example"), PlatformType::Pleroma);
        assert_eq!(detect_from_url("https://akkoma.example"), PlatformType::Pleroma);
    }

    #[test]
    fn falls_back_to_pixelfed_on_ambiguous_url() {
        assert_eq!(detect_from_url("https://example.social"), PlatformType::Pixelfed);
    }

    #[test]
    fn detecting_an_already_detected_url_is_stable() {
        let url = "https://mastodon.example";
        assert_eq!(detect_from_url(url), detect_from_url(url));
    }
}
