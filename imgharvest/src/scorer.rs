//! Candidate scoring
//!
//! Scores are a pure, deterministic function of candidate metadata. Any
//! network probing happens upstream in the pipeline, which merges probe
//! headers into the metadata before scoring; the scorer itself never touches
//! the network.

use crate::manifest::{meta, Candidate};
use url::Url;

/// Domains suppressed outright: aggregator and social-media hosts whose
/// images are rehosted thumbnails
const BLOCKED_DOMAINS: &[&str] = &["pinterest", "facebook", "twitter", "instagram", "tiktok"];

/// Scoring policy seam; implementations must be deterministic for
/// identical metadata
pub trait CandidateScorer: Send + Sync {
    /// Score a candidate into [0, 1]
    fn score(&self, candidate: &Candidate) -> f64;
}

/// Weights for [`MetadataScorer`]. All bonuses are additive on top of
/// `base`, the result is clamped to [0, 1].
#[derive(Debug, Clone)]
pub struct ScoreWeights {
    /// Neutral starting score
    pub base: f64,
    /// Penalty per provider rank position
    pub rank_decay: f64,
    /// Bonus when the query keyword appears in the URL or alt text
    pub keyword_bonus: f64,
    /// Bonus for .edu hosts
    pub edu_bonus: f64,
    /// Bonus when declared resolution meets `min_pixels`
    pub resolution_bonus: f64,
    /// Bonus when a probe confirmed an image/* content type
    pub content_type_bonus: f64,
    /// Minimum width*height for the resolution bonus
    pub min_pixels: i64,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        ScoreWeights {
            base: 0.5,
            rank_decay: 0.05,
            keyword_bonus: 0.15,
            edu_bonus: 0.1,
            resolution_bonus: 0.15,
            content_type_bonus: 0.05,
            min_pixels: 512 * 512,
        }
    }
}

/// Default scorer: neutral base, provider-rank decay, domain blocklist,
/// and metadata bonuses
#[derive(Debug, Clone, Default)]
pub struct MetadataScorer {
    weights: ScoreWeights,
}

impl MetadataScorer {
    pub fn new(weights: ScoreWeights) -> Self {
        MetadataScorer { weights }
    }
}

impl CandidateScorer for MetadataScorer {
    fn score(&self, candidate: &Candidate) -> f64 {
        let host = Url::parse(&candidate.source_url)
            .ok()
            .and_then(|u| u.host_str().map(|h| h.to_ascii_lowercase()));

        let host = match host {
            Some(host) => host,
            // Unparsable URL: nothing to download from anyway
            None => return 0.0,
        };

        if is_blocked(&host) {
            return 0.0;
        }

        let w = &self.weights;
        let mut score = w.base;

        if let Some(rank) = candidate.meta_i64(meta::RANK) {
            score -= rank.max(0) as f64 * w.rank_decay;
        }

        if host.ends_with(".edu") || host.contains(".edu.") {
            score += w.edu_bonus;
        }

        if keyword_matches(candidate) {
            score += w.keyword_bonus;
        }

        // Declared dimensions are untrusted page markup
        let width = candidate.meta_i64(meta::WIDTH).unwrap_or(0);
        let height = candidate.meta_i64(meta::HEIGHT).unwrap_or(0);
        if width > 0 && height > 0 && width.saturating_mul(height) >= w.min_pixels {
            score += w.resolution_bonus;
        }

        if candidate
            .meta_str(meta::CONTENT_TYPE)
            .map(|ct| ct.starts_with("image/"))
            .unwrap_or(false)
        {
            score += w.content_type_bonus;
        }

        score.clamp(0.0, 1.0)
    }
}

fn is_blocked(host: &str) -> bool {
    host.split('.')
        .any(|label| BLOCKED_DOMAINS.contains(&label))
}

fn keyword_matches(candidate: &Candidate) -> bool {
    let token = match candidate.origin_query.split_whitespace().next() {
        Some(token) => token.to_ascii_lowercase(),
        None => return false,
    };
    if token.is_empty() {
        return false;
    }

    let url = candidate.source_url.to_ascii_lowercase();
    let alt = candidate
        .meta_str(meta::ALT)
        .unwrap_or("")
        .to_ascii_lowercase();

    url.contains(&token) || alt.contains(&token)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scorer() -> MetadataScorer {
        MetadataScorer::default()
    }

    #[test]
    fn test_score_in_range() {
        let candidate = Candidate::new("https://example.org/x.jpg", "cats")
            .with_meta(meta::RANK, 0)
            .with_meta(meta::ALT, "cats everywhere")
            .with_meta(meta::WIDTH, 2000)
            .with_meta(meta::HEIGHT, 2000)
            .with_meta(meta::CONTENT_TYPE, "image/jpeg");

        let score = scorer().score(&candidate);
        assert!((0.0..=1.0).contains(&score));
    }

    #[test]
    fn test_score_deterministic() {
        let candidate = Candidate::new("https://example.org/x.jpg", "cats")
            .with_meta(meta::RANK, 2)
            .with_meta(meta::ALT, "a cat");

        let s = scorer();
        assert_eq!(s.score(&candidate), s.score(&candidate));
        assert_eq!(s.score(&candidate.clone()), s.score(&candidate));
    }

    #[test]
    fn test_blocked_domain_scores_zero() {
        for url in [
            "https://www.pinterest.com/pin/1.jpg",
            "https://pbs.twitter.com/media/2.png",
            "https://instagram.com/p/3.jpg",
        ] {
            let candidate = Candidate::new(url, "cats").with_meta(meta::ALT, "cats");
            assert_eq!(scorer().score(&candidate), 0.0, "url: {}", url);
        }
    }

    #[test]
    fn test_rank_decay_orders_candidates() {
        let first = Candidate::new("https://example.org/a.jpg", "cats").with_meta(meta::RANK, 0);
        let later = Candidate::new("https://example.org/b.jpg", "cats").with_meta(meta::RANK, 4);

        let s = scorer();
        assert!(s.score(&first) > s.score(&later));
    }

    #[test]
    fn test_edu_bonus() {
        let edu = Candidate::new("https://pathology.university.edu/slide.jpg", "slide");
        let com = Candidate::new("https://pathology.example.com/slide.jpg", "slide");

        let s = scorer();
        assert!(s.score(&edu) > s.score(&com));
    }

    #[test]
    fn test_keyword_in_alt_text_bonus() {
        let matching = Candidate::new("https://example.org/1.jpg", "radiograph")
            .with_meta(meta::ALT, "chest radiograph, PA view");
        let unrelated =
            Candidate::new("https://example.org/2.jpg", "radiograph").with_meta(meta::ALT, "boat");

        let s = scorer();
        assert!(s.score(&matching) > s.score(&unrelated));
    }

    #[test]
    fn test_unparsable_url_scores_zero() {
        let candidate = Candidate::new("not a url at all", "cats");
        assert_eq!(scorer().score(&candidate), 0.0);
    }

    #[test]
    fn test_huge_declared_resolution_does_not_overflow() {
        let candidate = Candidate::new("https://example.org/big.jpg", "cats")
            .with_meta(meta::WIDTH, i64::MAX)
            .with_meta(meta::HEIGHT, i64::MAX);

        let score = scorer().score(&candidate);
        assert!((0.0..=1.0).contains(&score));
    }

    #[test]
    fn test_resolution_bonus_requires_both_dimensions() {
        let full = Candidate::new("https://example.org/big.jpg", "cats")
            .with_meta(meta::WIDTH, 1024)
            .with_meta(meta::HEIGHT, 1024);
        let partial =
            Candidate::new("https://example.org/odd.jpg", "cats").with_meta(meta::WIDTH, 4096);

        let s = scorer();
        assert!(s.score(&full) > s.score(&partial));
    }
}
