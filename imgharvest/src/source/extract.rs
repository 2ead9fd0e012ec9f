//! Image reference extraction from HTML pages
//!
//! Pulls `<img>` references out of raw HTML, including the common lazy-load
//! attribute variants, resolves them against the page URL, and filters out
//! things that are clearly not content images (icons, logos, non-image
//! extensions).

use regex::Regex;
use std::collections::HashSet;
use std::sync::OnceLock;
use url::Url;

/// An image reference found on a page
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedImage {
    /// Absolute URL of the image
    pub url: String,
    /// Alt text, empty if absent
    pub alt: String,
    /// Declared pixel width, when the tag carries a plain numeric attribute
    pub width: Option<i64>,
    /// Declared pixel height
    pub height: Option<i64>,
}

/// Extensions accepted as image URLs. URLs with no extension are allowed
/// through; the download stage validates the actual content type.
const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "webp", "bmp", "gif"];

fn img_tag_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?is)<img\b[^>]*>").expect("static regex"))
}

fn attr_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(?i)\b(src|data-src|data-original|alt|width|height)\s*=\s*["']([^"']*)["']"#)
            .expect("static regex")
    })
}

/// Check whether a URL's path extension is plausibly an image.
///
/// URLs without an extension pass, matching the original crawler behavior:
/// many image CDNs serve extension-less URLs, and the post-download
/// content-type check is authoritative.
pub fn is_probable_image_url(url: &str) -> bool {
    let path = match Url::parse(url) {
        Ok(parsed) => parsed.path().to_string(),
        Err(_) => return false,
    };

    match path.rsplit_once('.') {
        Some((_, ext)) if ext.len() <= 4 && !ext.contains('/') => {
            IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str())
        }
        _ => true,
    }
}

/// Heuristic filter for page chrome that pollutes results
fn looks_like_chrome(url: &str) -> bool {
    let lower = url.to_ascii_lowercase();
    lower.contains("logo") || lower.contains("icon") || lower.contains("sprite")
}

/// Extract candidate image references from an HTML document.
///
/// Order follows document order; duplicates within the page are dropped.
pub fn extract_images(html: &str, base: &Url) -> Vec<ExtractedImage> {
    let mut seen: HashSet<String> = HashSet::new();
    let mut images = Vec::new();

    for tag in img_tag_regex().find_iter(html) {
        let mut src = None;
        let mut lazy_src = None;
        let mut alt = String::new();
        let mut width = None;
        let mut height = None;

        for capture in attr_regex().captures_iter(tag.as_str()) {
            let value = capture[2].trim().to_string();
            match capture[1].to_ascii_lowercase().as_str() {
                "src" => src = Some(value),
                "data-src" | "data-original" => lazy_src = Some(value),
                "alt" => alt = value,
                "width" => width = parse_dimension(&value),
                "height" => height = parse_dimension(&value),
                _ => {}
            }
        }

        // Lazy-load attributes hold the real URL when src is a placeholder
        let raw = match src.filter(|s| !s.is_empty()).or(lazy_src) {
            Some(raw) => raw,
            None => continue,
        };

        let absolute = match base.join(&raw) {
            Ok(resolved) => resolved.to_string(),
            Err(_) => continue,
        };

        if !is_probable_image_url(&absolute) || looks_like_chrome(&absolute) {
            continue;
        }

        if seen.insert(absolute.clone()) {
            images.push(ExtractedImage {
                url: absolute,
                alt,
                width,
                height,
            });
        }
    }

    images
}

/// Parse a numeric width/height attribute; percentages and CSS units are
/// ignored rather than guessed at
fn parse_dimension(value: &str) -> Option<i64> {
    value.parse::<i64>().ok().filter(|n| *n > 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> Url {
        Url::parse("https://example.org/gallery/").unwrap()
    }

    #[test]
    fn test_extract_basic_and_relative() {
        let html = r#"
            <html><body>
            <img src="https://cdn.example.org/a.jpg" alt="first">
            <img src="../images/b.png" alt="second">
            </body></html>
        "#;

        let images = extract_images(html, &base());
        assert_eq!(images.len(), 2);
        assert_eq!(images[0].url, "https://cdn.example.org/a.jpg");
        assert_eq!(images[0].alt, "first");
        assert_eq!(images[1].url, "https://example.org/images/b.png");
    }

    #[test]
    fn test_extract_lazy_load_attributes() {
        let html = r#"
            <img data-src="/lazy/c.webp" alt="lazy one">
            <img src="" data-original="/lazy/d.jpg">
        "#;

        let images = extract_images(html, &base());
        assert_eq!(images.len(), 2);
        assert_eq!(images[0].url, "https://example.org/lazy/c.webp");
        assert_eq!(images[1].url, "https://example.org/lazy/d.jpg");
        assert_eq!(images[1].alt, "");
    }

    #[test]
    fn test_extract_skips_non_images_and_chrome() {
        let html = r#"
            <img src="/assets/site-logo.png" alt="logo">
            <img src="/favicon-32.ico" alt="icon">
            <img src="/docs/manual.pdf" alt="pdf">
            <img src="/photos/real.jpeg" alt="keep">
        "#;

        let images = extract_images(html, &base());
        assert_eq!(images.len(), 1);
        assert_eq!(images[0].url, "https://example.org/photos/real.jpeg");
    }

    #[test]
    fn test_extract_declared_dimensions() {
        let html = r#"
            <img src="/a.jpg" width="1024" height="768">
            <img src="/b.jpg" width="100%" height="auto">
            <img src="/c.jpg">
        "#;

        let images = extract_images(html, &base());
        assert_eq!(images.len(), 3);
        assert_eq!(images[0].width, Some(1024));
        assert_eq!(images[0].height, Some(768));
        // Non-numeric values are dropped, not guessed at
        assert_eq!(images[1].width, None);
        assert_eq!(images[1].height, None);
        assert_eq!(images[2].width, None);
    }

    #[test]
    fn test_extract_dedups_within_page() {
        let html = r#"
            <img src="/a.jpg">
            <img src="/a.jpg">
        "#;

        let images = extract_images(html, &base());
        assert_eq!(images.len(), 1);
    }

    #[test]
    fn test_extensionless_urls_pass() {
        assert!(is_probable_image_url("https://cdn.example.org/render/abc123"));
        assert!(is_probable_image_url("https://example.org/x.JPG"));
        assert!(!is_probable_image_url("https://example.org/x.html"));
        assert!(!is_probable_image_url("not a url"));
    }
}
