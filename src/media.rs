use serde::Deserialize;

use crate::manifest::{self, ManifestError};

/// Estimated container/audio overhead subtracted from the measured
/// progressive bitrate, in kbit/s.
const OVERHEAD_KBPS: f64 = 90.0;
/// The adaptive ladder must beat the progressive estimate by this factor
/// before it is worth offering.
const UPGRADE_THRESHOLD: f64 = 1.1;

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum ResolveError {
    #[error("no carousel entry matches the clicked thumbnail")]
    NoMatchingCarouselItem,
    #[error("no playable rendition for this media")]
    NoPlayableRendition,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct PictureCandidate {
    #[serde(default)]
    pub width: i64,
    #[serde(default)]
    pub height: i64,
    pub url: String,
}

/// One concrete progressive encode at a given resolution.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct Rendition {
    #[serde(default)]
    pub width: i64,
    pub url: String,
}

#[derive(Debug, Clone)]
pub enum MediaItem {
    Image {
        candidates: Vec<PictureCandidate>,
    },
    Video {
        renditions: Vec<Rendition>,
        manifest: Option<String>,
        duration_secs: f64,
    },
}

impl MediaItem {
    pub fn is_video(&self) -> bool {
        matches!(self, MediaItem::Video { .. })
    }

    /// Best image candidate by width.
    pub fn best_picture(&self) -> Option<&PictureCandidate> {
        match self {
            MediaItem::Image { candidates } => candidates.iter().max_by_key(|c| c.width),
            MediaItem::Video { .. } => None,
        }
    }
}

/// An optional higher-quality download discovered in the adaptive ladder.
/// Never replaces the progressive stream that is already playing.
#[derive(Debug, Clone, PartialEq)]
pub struct QualityOffer {
    pub width: i64,
    pub frame_rate: f64,
    pub bandwidth_kbps: f64,
    pub url: Option<String>,
}

/// A fully-resolved, downloaded media payload handed to the viewing
/// surface.
#[derive(Debug, Clone)]
pub struct Playback {
    pub url: String,
    pub data: Vec<u8>,
    pub duration_secs: f64,
    pub upgrade: Option<QualityOffer>,
}

/// Path component of a thumbnail URL before any query string. An empty
/// source yields an empty stem, which never matches.
pub fn thumbnail_stem(src: &str) -> &str {
    src.split('?').next().unwrap_or("")
}

/// Finds the carousel entry whose display URL contains the clicked
/// placeholder's thumbnail stem, restricted to entries of the clicked
/// kind. First match wins.
pub fn match_carousel_index<'a, I>(
    entries: I,
    thumb_src: &str,
    want_video: bool,
) -> Result<usize, ResolveError>
where
    I: IntoIterator<Item = (&'a str, bool)>,
{
    let stem = thumbnail_stem(thumb_src);
    if stem.is_empty() {
        return Err(ResolveError::NoMatchingCarouselItem);
    }
    entries
        .into_iter()
        .position(|(display_url, is_video)| is_video == want_video && display_url.contains(stem))
        .ok_or(ResolveError::NoMatchingCarouselItem)
}

/// Renditions arrive pre-sorted by descending width. Several entries can
/// share the top width at different bitrates, highest first; the last
/// entry of that equal-width run is the lowest-bitrate encode at full
/// resolution, which is what gets played.
pub fn select_progressive(renditions: &[Rendition]) -> Result<&Rendition, ResolveError> {
    let first = renditions.first().ok_or(ResolveError::NoPlayableRendition)?;
    let run_end = renditions
        .iter()
        .take_while(|r| r.width == first.width)
        .count();
    Ok(&renditions[run_end - 1])
}

/// Effective bitrate of an already-downloaded progressive stream, in
/// kbit/s, corrected for container overhead.
pub fn progressive_bitrate_kbps(byte_count: usize, duration_secs: f64) -> Option<f64> {
    if duration_secs <= 0.0 {
        return None;
    }
    Some((byte_count as f64 * 8.0 / 1024.0) / duration_secs - OVERHEAD_KBPS)
}

/// Compares the adaptive ladder against the downloaded progressive stream
/// and returns an upgrade offer when the ladder's top bandwidth exceeds
/// the measured bitrate by more than 10%.
pub fn adaptive_upgrade(
    manifest_xml: &str,
    byte_count: usize,
    duration_secs: f64,
) -> Result<Option<QualityOffer>, ManifestError> {
    let representations = manifest::parse(manifest_xml)?;
    let Some(best) = representations.iter().max_by_key(|r| r.bandwidth) else {
        return Ok(None);
    };
    let Some(estimate) = progressive_bitrate_kbps(byte_count, duration_secs) else {
        return Ok(None);
    };
    let best_kbps = best.bandwidth as f64 / 1024.0;
    if best_kbps <= estimate * UPGRADE_THRESHOLD {
        return Ok(None);
    }
    Ok(Some(QualityOffer {
        width: best.width,
        frame_rate: best.frame_rate,
        bandwidth_kbps: best_kbps,
        url: best.base_url.clone(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rendition(width: i64, url: &str) -> Rendition {
        Rendition {
            width,
            url: url.to_string(),
        }
    }

    #[test]
    fn picks_last_entry_of_top_width_run() {
        let renditions = vec![
            rendition(1080, "https://cdn.test/1080-high.mp4"),
            rendition(1080, "https://cdn.test/1080-low.mp4"),
            rendition(720, "https://cdn.test/720.mp4"),
        ];
        let selected = select_progressive(&renditions).unwrap();
        assert_eq!(selected.url, "https://cdn.test/1080-low.mp4");
    }

    #[test]
    fn single_rendition_is_selected_as_is() {
        let renditions = vec![rendition(720, "https://cdn.test/only.mp4")];
        assert_eq!(
            select_progressive(&renditions).unwrap().url,
            "https://cdn.test/only.mp4"
        );
    }

    #[test]
    fn empty_rendition_list_is_unplayable() {
        assert_eq!(
            select_progressive(&[]).unwrap_err(),
            ResolveError::NoPlayableRendition
        );
    }

    #[test]
    fn carousel_matches_by_thumbnail_stem() {
        let entries = [
            ("https://cdn.test/imgA.jpg", false),
            ("https://cdn.test/imgB.jpg", false),
        ];
        let index = match_carousel_index(
            entries.iter().copied(),
            "https://cdn.test/imgB.jpg?sig=1",
            false,
        )
        .unwrap();
        assert_eq!(index, 1);
    }

    #[test]
    fn carousel_filters_by_kind() {
        let entries = [
            ("https://cdn.test/poster.jpg", false),
            ("https://cdn.test/poster.jpg", true),
        ];
        let index =
            match_carousel_index(entries.iter().copied(), "https://cdn.test/poster.jpg", true)
                .unwrap();
        assert_eq!(index, 1);
    }

    #[test]
    fn unmatched_thumbnail_fails() {
        let entries = [("https://cdn.test/imgA.jpg", false)];
        assert_eq!(
            match_carousel_index(entries.iter().copied(), "https://cdn.test/other.jpg", false)
                .unwrap_err(),
            ResolveError::NoMatchingCarouselItem
        );
        assert_eq!(
            match_carousel_index(entries.iter().copied(), "", false).unwrap_err(),
            ResolveError::NoMatchingCarouselItem
        );
    }

    #[test]
    fn bitrate_estimate_subtracts_overhead() {
        // 10s at exactly 1024 kbit/s before correction.
        let bytes = 1024 * 1024 * 10 / 8;
        let estimate = progressive_bitrate_kbps(bytes, 10.0).unwrap();
        assert!((estimate - (1024.0 - 90.0)).abs() < 0.001);
        assert!(progressive_bitrate_kbps(bytes, 0.0).is_none());
    }

    #[test]
    fn upgrade_offered_only_beyond_threshold() {
        let xml = |bandwidth: i64| {
            format!(
                r#"<Representation width="1080" frameRate="30" bandwidth="{}">
                     <BaseURL>https://cdn.test/adaptive.mp4</BaseURL>
                   </Representation>"#,
                bandwidth
            )
        };
        // ~934 kbps progressive estimate.
        let bytes = 1024 * 1024 * 10 / 8;

        let offer = adaptive_upgrade(&xml(2_000_000), bytes, 10.0).unwrap();
        let offer = offer.expect("high ladder should be offered");
        assert_eq!(offer.url.as_deref(), Some("https://cdn.test/adaptive.mp4"));

        // Barely above the estimate: inside the 10% band, no offer.
        let none = adaptive_upgrade(&xml(980_000), bytes, 10.0).unwrap();
        assert!(none.is_none());
    }
}
