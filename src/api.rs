use std::sync::Arc;

use anyhow::{bail, Context, Result};
use parking_lot::RwLock;
use percent_encoding::{utf8_percent_encode, NON_ALPHANUMERIC};
use serde::{Deserialize, Deserializer};
use serde_json::json;
use url::Url;

use crate::config::Config;
use crate::media::{MediaItem, PictureCandidate, Rendition, ResolveError};
use crate::net::{Client, RequestScope};

/// Typed client for the private JSON backend. All calls are idempotent
/// GETs; header profiles are handled by the network layer per scope.
pub struct Api {
    net: Arc<Client>,
    web_base: String,
    api_base: String,
    query_hash: RwLock<String>,
    meta_retries: u32,
}

impl Api {
    pub fn new(net: Arc<Client>, config: &Config) -> Self {
        Self {
            net,
            web_base: config.api.web_base.trim_end_matches('/').to_string(),
            api_base: config.api.api_base.trim_end_matches('/').to_string(),
            query_hash: RwLock::new(config.api.query_hash.clone()),
            meta_retries: config.fetch.meta_retries,
        }
    }

    pub fn network(&self) -> &Client {
        &self.net
    }

    pub fn set_query_hash(&self, hash: &str) {
        *self.query_hash.write() = hash.to_string();
    }

    /// Profile page lookup, the network fallback for username resolution.
    pub fn profile_user_id(&self, username: &str) -> Result<String> {
        let url = format!("{}/{}/?__a=1", self.web_base, username);
        let resp: ProfilePageResponse = self
            .net
            .fetch_json(&url, self.meta_retries, RequestScope::Plain)
            .with_context(|| format!("look up profile for {}", username))?;
        let id = resp.graphql.user.id;
        if id.is_empty() {
            bail!("profile payload for {} carries no user id", username);
        }
        Ok(id)
    }

    pub fn user_info(&self, user_id: &str) -> Result<UserInfo> {
        let url = format!("{}/users/{}/info/", self.api_base, user_id);
        let resp: UserInfoResponse = self
            .net
            .fetch_json(&url, self.meta_retries, RequestScope::Claim)
            .with_context(|| format!("fetch user info for {}", user_id))?;
        Ok(resp.user)
    }

    /// Batched story bundle retrieval. Accepts plain author ids and
    /// `highlight:<id>` pseudo-ids.
    pub fn reels_media(&self, reel_ids: &[String]) -> Result<Vec<Reel>> {
        let query = reel_ids
            .iter()
            .map(|id| format!("reel_ids={}", utf8_percent_encode(id, NON_ALPHANUMERIC)))
            .collect::<Vec<_>>()
            .join("&");
        let url = format!("{}/feed/reels_media/?{}", self.api_base, query);
        let resp: ReelsMediaResponse = self
            .net
            .fetch_json(&url, self.meta_retries, RequestScope::Claim)
            .context("fetch story bundles")?;
        Ok(resp.reels_media)
    }

    pub fn reels_tray(&self) -> Result<Vec<TrayEntry>> {
        let url = format!("{}/feed/reels_tray/", self.api_base);
        let resp: TrayResponse = self
            .net
            .fetch_json(&url, self.meta_retries, RequestScope::Claim)
            .context("fetch stories tray")?;
        Ok(resp.tray)
    }

    /// Highlight tray for a profile. Write-adjacent: needs the csrf
    /// profile and the discovered query hash.
    pub fn highlight_tray(&self, user_id: &str) -> Result<Vec<HighlightReel>> {
        let hash = self.query_hash.read().clone();
        if hash.is_empty() {
            bail!("highlight query hash not discovered yet");
        }
        let variables = json!({
            "user_id": user_id,
            "include_chaining": true,
            "include_reel": true,
            "include_suggested_users": false,
            "include_logged_out_extras": false,
            "include_highlight_reels": true,
            "include_live_status": true,
        });
        let encoded = utf8_percent_encode(&variables.to_string(), NON_ALPHANUMERIC).to_string();
        let url = format!(
            "{}/graphql/query/?query_hash={}&variables={}",
            self.web_base, hash, encoded
        );
        let resp: HighlightTrayResponse = self
            .net
            .fetch_json(&url, self.meta_retries, RequestScope::Csrf)
            .with_context(|| format!("fetch highlight tray for {}", user_id))?;
        Ok(resp
            .data
            .user
            .edge_highlight_reels
            .edges
            .into_iter()
            .map(|edge| edge.node)
            .collect())
    }

    /// Single-post payload by its canonical URL.
    pub fn post_info(&self, post_url: &str) -> Result<ShortcodeMedia> {
        let url = format!("{}?__a=1", post_url.trim_end_matches('?'));
        let resp: PostResponse = self
            .net
            .fetch_json(&url, self.meta_retries, RequestScope::Plain)
            .with_context(|| format!("fetch post payload for {}", post_url))?;
        resp.graphql
            .shortcode_media
            .context("post payload carries no media")
    }
}

pub fn highlight_reel_id(highlight_id: &str) -> String {
    format!("highlight:{}", highlight_id)
}

/// Narrow seam for the timeline paginator; `Api` is the production
/// implementation, tests substitute fixtures.
pub trait StoryService: Send + Sync {
    fn reels_tray(&self) -> Result<Vec<TrayEntry>>;
    fn reels_media(&self, reel_ids: &[String]) -> Result<Vec<Reel>>;
}

impl StoryService for Api {
    fn reels_tray(&self) -> Result<Vec<TrayEntry>> {
        Api::reels_tray(self)
    }

    fn reels_media(&self, reel_ids: &[String]) -> Result<Vec<Reel>> {
        Api::reels_media(self, reel_ids)
    }
}

fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    match value {
        serde_json::Value::String(s) => Ok(s),
        serde_json::Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "expected string or number id, got {}",
            other
        ))),
    }
}

#[derive(Debug, Clone, Deserialize)]
struct TrayResponse {
    #[serde(default)]
    tray: Vec<TrayEntry>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TrayEntry {
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    /// Timestamp of the author's most recent story activity.
    #[serde(default)]
    pub latest_reel_media: i64,
    pub user: ReelUser,
}

#[derive(Debug, Clone, Deserialize)]
struct ReelsMediaResponse {
    #[serde(default)]
    reels_media: Vec<Reel>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Reel {
    pub user: ReelUser,
    #[serde(default)]
    pub items: Vec<ReelItem>,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct ReelUser {
    #[serde(default, deserialize_with = "string_or_number")]
    pub pk: String,
    pub username: String,
    #[serde(default)]
    pub full_name: String,
    #[serde(default)]
    pub profile_pic_url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReelItem {
    pub taken_at: i64,
    #[serde(default)]
    pub media_type: i64,
    #[serde(default)]
    pub image_versions2: Option<ImageVersions>,
    #[serde(default)]
    pub video_versions: Vec<Rendition>,
    #[serde(default)]
    pub video_duration: Option<f64>,
    #[serde(default)]
    pub video_dash_manifest: Option<String>,
    #[serde(default)]
    pub reel_mentions: Vec<MentionSticker>,
    #[serde(default)]
    pub story_feed_media: Vec<FeedMediaSticker>,
    #[serde(default)]
    pub story_link_stickers: Vec<LinkSticker>,
}

pub const MEDIA_TYPE_IMAGE: i64 = 1;
pub const MEDIA_TYPE_VIDEO: i64 = 2;

impl ReelItem {
    pub fn is_video(&self) -> bool {
        self.media_type == MEDIA_TYPE_VIDEO
    }

    /// Validated media variant for this item. Loose backend payloads turn
    /// into explicit failures here instead of surprising the renderer.
    pub fn media(&self) -> Result<MediaItem, ResolveError> {
        if self.media_type == MEDIA_TYPE_IMAGE {
            let candidates = self
                .image_versions2
                .as_ref()
                .map(|v| v.candidates.clone())
                .unwrap_or_default();
            if candidates.is_empty() {
                return Err(ResolveError::NoPlayableRendition);
            }
            return Ok(MediaItem::Image { candidates });
        }
        if self.video_versions.is_empty() && self.video_dash_manifest.is_none() {
            return Err(ResolveError::NoPlayableRendition);
        }
        Ok(MediaItem::Video {
            renditions: self.video_versions.clone(),
            manifest: self.video_dash_manifest.clone(),
            duration_secs: self.video_duration.unwrap_or(0.0),
        })
    }

    /// Overlay regions in normalized page coordinates, with their link
    /// targets where the sticker carries one.
    pub fn annotations(&self) -> Vec<Annotation> {
        let mut annotations = Vec::new();
        for mention in &self.reel_mentions {
            annotations.push(Annotation {
                x: mention.x,
                y: mention.y,
                width: mention.width,
                height: mention.height,
                rotation: mention.rotation,
                link: Some(format!(
                    "https://www.instagram.com/{}/",
                    mention.user.username
                )),
                label: Some(format!("@{}", mention.user.username)),
            });
        }
        for feed_media in &self.story_feed_media {
            annotations.push(Annotation {
                x: feed_media.x,
                y: feed_media.y,
                width: feed_media.width,
                height: feed_media.height,
                rotation: feed_media.rotation,
                link: Some(format!(
                    "https://www.instagram.com/p/{}/",
                    feed_media.media_code
                )),
                label: None,
            });
        }
        for sticker in &self.story_link_stickers {
            annotations.push(Annotation {
                x: sticker.x,
                y: sticker.y,
                width: sticker.width,
                height: sticker.height,
                rotation: sticker.rotation,
                link: link_target(&sticker.story_link.url),
                label: None,
            });
        }
        annotations
    }
}

/// Link stickers wrap their destination in a redirect URL; the real
/// target sits in the `u` query parameter.
fn link_target(raw: &str) -> Option<String> {
    let parsed = Url::parse(raw).ok()?;
    parsed
        .query_pairs()
        .find(|(key, _)| key == "u")
        .map(|(_, value)| value.to_string())
        .or_else(|| Some(raw.to_string()))
}

#[derive(Debug, Clone, Deserialize)]
pub struct ImageVersions {
    #[serde(default)]
    pub candidates: Vec<PictureCandidate>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Annotation {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
    pub rotation: f64,
    pub link: Option<String>,
    pub label: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MentionSticker {
    #[serde(default)]
    pub x: f64,
    #[serde(default)]
    pub y: f64,
    #[serde(default)]
    pub width: f64,
    #[serde(default)]
    pub height: f64,
    #[serde(default)]
    pub rotation: f64,
    pub user: ReelUser,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FeedMediaSticker {
    #[serde(default)]
    pub x: f64,
    #[serde(default)]
    pub y: f64,
    #[serde(default)]
    pub width: f64,
    #[serde(default)]
    pub height: f64,
    #[serde(default)]
    pub rotation: f64,
    #[serde(default)]
    pub media_code: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LinkSticker {
    #[serde(default)]
    pub x: f64,
    #[serde(default)]
    pub y: f64,
    #[serde(default)]
    pub width: f64,
    #[serde(default)]
    pub height: f64,
    #[serde(default)]
    pub rotation: f64,
    pub story_link: StoryLink,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoryLink {
    pub url: String,
}

#[derive(Debug, Clone, Deserialize)]
struct UserInfoResponse {
    user: UserInfo,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UserInfo {
    #[serde(default, deserialize_with = "string_or_number")]
    pub pk: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub hd_profile_pic_url_info: Option<PictureCandidate>,
}

#[derive(Debug, Clone, Deserialize)]
struct ProfilePageResponse {
    graphql: ProfileGraphql,
}

#[derive(Debug, Clone, Deserialize)]
struct ProfileGraphql {
    user: ProfileUser,
}

#[derive(Debug, Clone, Deserialize)]
struct ProfileUser {
    #[serde(default, deserialize_with = "string_or_number")]
    id: String,
}

#[derive(Debug, Clone, Deserialize)]
struct HighlightTrayResponse {
    data: HighlightData,
}

#[derive(Debug, Clone, Deserialize)]
struct HighlightData {
    user: HighlightUser,
}

#[derive(Debug, Clone, Deserialize)]
struct HighlightUser {
    edge_highlight_reels: EdgeList<HighlightReel>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EdgeList<T> {
    #[serde(default = "Vec::new")]
    pub edges: Vec<Edge<T>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Edge<T> {
    pub node: T,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HighlightReel {
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub cover_media_cropped_thumbnail: Option<CoverThumbnail>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CoverThumbnail {
    pub url: String,
}

#[derive(Debug, Clone, Deserialize)]
struct PostResponse {
    graphql: PostGraphql,
}

#[derive(Debug, Clone, Deserialize)]
struct PostGraphql {
    shortcode_media: Option<ShortcodeMedia>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ShortcodeMedia {
    #[serde(default)]
    pub is_video: bool,
    #[serde(default)]
    pub display_url: String,
    #[serde(default)]
    pub video_url: Option<String>,
    #[serde(default)]
    pub video_duration: Option<f64>,
    #[serde(default)]
    pub dash_info: Option<DashInfo>,
    #[serde(default, rename = "edge_sidecar_to_children")]
    pub sidecar: Option<EdgeList<SidecarNode>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DashInfo {
    #[serde(default)]
    pub video_dash_manifest: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SidecarNode {
    #[serde(default)]
    pub is_video: bool,
    #[serde(default)]
    pub display_url: String,
    #[serde(default)]
    pub video_url: Option<String>,
    #[serde(default)]
    pub video_duration: Option<f64>,
    #[serde(default)]
    pub dash_info: Option<DashInfo>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tray_entry_accepts_numeric_and_string_ids() {
        let numeric: TrayEntry = serde_json::from_str(
            r#"{"id": 123, "latest_reel_media": 1700000000, "user": {"pk": 123, "username": "alice"}}"#,
        )
        .unwrap();
        assert_eq!(numeric.id, "123");
        assert_eq!(numeric.user.pk, "123");

        let string: TrayEntry = serde_json::from_str(
            r#"{"id": "highlight:99", "user": {"pk": "7", "username": "bob"}}"#,
        )
        .unwrap();
        assert_eq!(string.id, "highlight:99");
        assert_eq!(string.latest_reel_media, 0);
    }

    #[test]
    fn reel_item_media_variants() {
        let image: ReelItem = serde_json::from_str(
            r#"{"taken_at": 1, "media_type": 1,
                "image_versions2": {"candidates": [{"width": 320, "height": 480, "url": "https://cdn.test/a.jpg"}]}}"#,
        )
        .unwrap();
        assert!(matches!(image.media().unwrap(), MediaItem::Image { .. }));

        let video: ReelItem = serde_json::from_str(
            r#"{"taken_at": 2, "media_type": 2,
                "video_versions": [{"width": 720, "url": "https://cdn.test/v.mp4"}],
                "video_duration": 6.5}"#,
        )
        .unwrap();
        match video.media().unwrap() {
            MediaItem::Video { duration_secs, .. } => assert_eq!(duration_secs, 6.5),
            other => panic!("unexpected media: {:?}", other),
        }

        let bare: ReelItem =
            serde_json::from_str(r#"{"taken_at": 3, "media_type": 2}"#).unwrap();
        assert_eq!(bare.media().unwrap_err(), ResolveError::NoPlayableRendition);
    }

    #[test]
    fn annotations_carry_links_and_geometry() {
        let item: ReelItem = serde_json::from_str(
            r#"{"taken_at": 1, "media_type": 1,
                "image_versions2": {"candidates": [{"url": "https://cdn.test/a.jpg"}]},
                "reel_mentions": [{"x": 0.5, "y": 0.25, "width": 0.2, "height": 0.1,
                                    "rotation": 0.05, "user": {"pk": 1, "username": "carol"}}],
                "story_link_stickers": [{"x": 0.1, "y": 0.9, "width": 0.3, "height": 0.08,
                                          "rotation": 0.0,
                                          "story_link": {"url": "https://l.test/redirect?u=https%3A%2F%2Fexample.com%2F"}}]}"#,
        )
        .unwrap();
        let annotations = item.annotations();
        assert_eq!(annotations.len(), 2);
        assert_eq!(
            annotations[0].link.as_deref(),
            Some("https://www.instagram.com/carol/")
        );
        assert_eq!(annotations[0].label.as_deref(), Some("@carol"));
        assert_eq!(annotations[1].link.as_deref(), Some("https://example.com/"));
        assert_eq!(annotations[1].y, 0.9);
    }

    #[test]
    fn sidecar_post_decodes() {
        let media: ShortcodeMedia = serde_json::from_str(
            r#"{"is_video": false, "display_url": "https://cdn.test/cover.jpg",
                "edge_sidecar_to_children": {"edges": [
                    {"node": {"is_video": false, "display_url": "https://cdn.test/imgA.jpg"}},
                    {"node": {"is_video": true, "display_url": "https://cdn.test/imgB.jpg",
                              "video_url": "https://cdn.test/clipB.mp4"}}]}}"#,
        )
        .unwrap();
        let children = media.sidecar.unwrap().edges;
        assert_eq!(children.len(), 2);
        assert!(children[1].node.is_video);
    }

    #[test]
    fn highlight_pseudo_id() {
        assert_eq!(highlight_reel_id("17900"), "highlight:17900");
    }
}
