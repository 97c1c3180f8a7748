use once_cell::sync::Lazy;
use regex::Regex;

/// One encoding ladder rung from the adaptive manifest.
#[derive(Debug, Clone, PartialEq)]
pub struct Representation {
    pub width: i64,
    pub frame_rate: f64,
    pub bandwidth: i64,
    pub base_url: Option<String>,
}

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum ManifestError {
    #[error("representation missing {0} attribute")]
    MissingAttribute(&'static str),
    #[error("malformed {name} attribute: {value:?}")]
    MalformedAttribute { name: &'static str, value: String },
}

static REPRESENTATION_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)<Representation\b([^>]*?)(?:/>|>(.*?)</Representation>)").unwrap()
});
static WIDTH_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r#"width="(\d+)""#).unwrap());
static BANDWIDTH_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r#"bandwidth="(\d+)""#).unwrap());
static FRAME_RATE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r#"frameRate="([^"]+)""#).unwrap());
static BASE_URL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"<BaseURL>\s*([^<]*?)\s*</BaseURL>").unwrap());

/// Extracts the video representations from an XML ladder description.
/// Only the attributes the rendition comparison needs are read; anything
/// else in the document is ignored.
pub fn parse(xml: &str) -> Result<Vec<Representation>, ManifestError> {
    let mut representations = Vec::new();
    for captures in REPRESENTATION_RE.captures_iter(xml) {
        let attrs = captures.get(1).map(|m| m.as_str()).unwrap_or("");
        let body = captures.get(2).map(|m| m.as_str()).unwrap_or("");

        // Audio representations carry no width; skip them.
        let Some(width_raw) = WIDTH_RE.captures(attrs).map(|c| c[1].to_string()) else {
            continue;
        };
        let width = width_raw
            .parse::<i64>()
            .map_err(|_| ManifestError::MalformedAttribute {
                name: "width",
                value: width_raw.clone(),
            })?;

        let bandwidth_raw = BANDWIDTH_RE
            .captures(attrs)
            .map(|c| c[1].to_string())
            .ok_or(ManifestError::MissingAttribute("bandwidth"))?;
        let bandwidth =
            bandwidth_raw
                .parse::<i64>()
                .map_err(|_| ManifestError::MalformedAttribute {
                    name: "bandwidth",
                    value: bandwidth_raw.clone(),
                })?;

        let frame_rate = match FRAME_RATE_RE.captures(attrs) {
            Some(c) => parse_frame_rate(&c[1])?,
            None => 0.0,
        };

        let base_url = BASE_URL_RE
            .captures(body)
            .map(|c| c[1].to_string())
            .filter(|url| !url.is_empty());

        representations.push(Representation {
            width,
            frame_rate,
            bandwidth,
            base_url,
        });
    }
    Ok(representations)
}

/// Frame rates appear either as a plain integer ("30") or as an "N/D"
/// rational ("30000/1001").
pub fn parse_frame_rate(raw: &str) -> Result<f64, ManifestError> {
    let malformed = || ManifestError::MalformedAttribute {
        name: "frameRate",
        value: raw.to_string(),
    };
    match raw.split_once('/') {
        Some((numerator, denominator)) => {
            let numerator: f64 = numerator.trim().parse().map_err(|_| malformed())?;
            let denominator: f64 = denominator.trim().parse().map_err(|_| malformed())?;
            if denominator == 0.0 {
                return Err(malformed());
            }
            Ok(numerator / denominator)
        }
        None => raw.trim().parse().map_err(|_| malformed()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"<?xml version="1.0"?>
<MPD>
  <Period>
    <AdaptationSet>
      <Representation id="v0" width="1080" height="1920" frameRate="30" bandwidth="2500000">
        <BaseURL>https://cdn.test/v1080.mp4</BaseURL>
      </Representation>
      <Representation id="v1" width="720" height="1280" frameRate="30000/1001" bandwidth="1200000">
        <BaseURL>https://cdn.test/v720.mp4</BaseURL>
      </Representation>
      <Representation id="a0" bandwidth="64000" audioSamplingRate="44100"/>
    </AdaptationSet>
  </Period>
</MPD>"#;

    #[test]
    fn parses_video_representations() {
        let reps = parse(SAMPLE).unwrap();
        assert_eq!(reps.len(), 2);
        assert_eq!(reps[0].width, 1080);
        assert_eq!(reps[0].bandwidth, 2_500_000);
        assert_eq!(reps[0].base_url.as_deref(), Some("https://cdn.test/v1080.mp4"));
        assert!((reps[1].frame_rate - 29.97).abs() < 0.01);
    }

    #[test]
    fn integer_and_rational_frame_rates() {
        assert_eq!(parse_frame_rate("30").unwrap(), 30.0);
        let rational = parse_frame_rate("30000/1001").unwrap();
        assert!((rational - 29.970_029).abs() < 1e-4);
    }

    #[test]
    fn malformed_frame_rate_is_an_error() {
        assert!(matches!(
            parse_frame_rate("fast"),
            Err(ManifestError::MalformedAttribute { name: "frameRate", .. })
        ));
        assert!(parse_frame_rate("30/0").is_err());
    }

    #[test]
    fn video_representation_without_bandwidth_is_an_error() {
        let xml = r#"<Representation width="1080" frameRate="30"/>"#;
        assert_eq!(
            parse(xml).unwrap_err(),
            ManifestError::MissingAttribute("bandwidth")
        );
    }
}
