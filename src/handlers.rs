use std::thread;

use anyhow::{anyhow, Context, Result};

use crate::api::{self, Reel, ShortcodeMedia, SidecarNode};
use crate::dispatch::{InteractionRule, Matcher, PointerEvent, Propagation};
use crate::media::{self, Playback, ResolveError};
use crate::session::SessionContext;
use crate::surface::Surface;
use crate::timeline::{TimelineItem, TimelineSlot};

/// Obfuscated class names from the platform's current frontend build.
/// These churn with deployments; the bootstrap warning about a changed
/// application id is usually the first sign they have rotated.
pub mod selectors {
    /// Click shield overlaying a feed post's image.
    pub const POST_IMAGE: &str = ".ZyFrc ._9AhH0";
    pub const POST_IMAGE_SHIELD: &str = "._9AhH0";
    pub const POST_FRAME: &str = ".ZyFrc";
    /// Feed post root article and its permalink anchor.
    pub const POST_ROOT: &str = ".ePUX4";
    pub const POST_PERMALINK: &str = ".c-Yi7";
    /// Video elements, in-feed and in-viewer variants.
    pub const POST_VIDEO: &str = ".fXIG0, .tWeCl, .Q9bIO";
    pub const VIDEO_ELEMENT: &str = ".tWeCl, .Q9bIO";
    /// Highlight tray cell on a profile page.
    pub const HIGHLIGHT_ITEM: &str = "._3D7yK, ._3D7yK *";
    pub const HIGHLIGHT_ROOT: &str = "._3D7yK";
    pub const HIGHLIGHT_TITLE: &str = ".eXle2";
    pub const HIGHLIGHT_THUMB: &str = ".NCYx-";
    /// Stories tray avatar, cell and username label.
    pub const TRAY_AVATAR: &str = ".QN629, .QN629 *";
    pub const TRAY_CELL: &str = ".Fd_fQ";
    pub const TRAY_USERNAME: &str = ".eebAO";
    pub const TRAY_BAR: &str = ".zGtbP";
    /// Small avatar next to a feed post header.
    pub const SMALL_AVATAR: &str = ".pZp3x, .pZp3x *";
    pub const SMALL_AVATAR_ROOT: &str = ".pZp3x";
    pub const FEED_USERNAME: &str = ".ZIAjV";
    /// Profile page avatar and username heading.
    pub const PROFILE_AVATAR: &str = ".eC4Dz, .eC4Dz *";
    pub const PROFILE_AVATAR_ROOT: &str = ".eC4Dz";
    pub const PROFILE_USERNAME: &str = ".fKFbl";
}

/// Rules for primary clicks, most specific first.
pub fn click_rules() -> Vec<InteractionRule> {
    vec![
        InteractionRule::new(
            "post image",
            Matcher::predicate(is_post_image_shield),
            Propagation::Stop,
            open_post_image,
        ),
        InteractionRule::new(
            "highlight item",
            Matcher::selector(selectors::HIGHLIGHT_ITEM),
            Propagation::Stop,
            open_highlight,
        ),
        InteractionRule::new(
            "tray avatar",
            Matcher::selector(selectors::TRAY_AVATAR),
            Propagation::Stop,
            open_tray_story,
        ),
        InteractionRule::new(
            "tray username",
            Matcher::selector(selectors::TRAY_USERNAME),
            Propagation::Stop,
            open_profile_page,
        ),
        InteractionRule::new(
            "feed avatar",
            Matcher::selector(selectors::SMALL_AVATAR),
            Propagation::Stop,
            open_feed_story,
        ),
        InteractionRule::new(
            "profile avatar",
            Matcher::selector(selectors::PROFILE_AVATAR),
            Propagation::Stop,
            open_hd_avatar,
        ),
        InteractionRule::new(
            "profile username",
            Matcher::selector(selectors::PROFILE_USERNAME),
            Propagation::Stop,
            open_profile_story,
        ),
        InteractionRule::new(
            "tray bar",
            Matcher::selector(selectors::TRAY_BAR),
            Propagation::Continue,
            |ctx, _event| ctx.open_timeline(),
        ),
    ]
}

/// Rules for middle clicks: full-quality media extraction from a post.
pub fn middle_click_rules() -> Vec<InteractionRule> {
    vec![
        InteractionRule::new(
            "post video",
            Matcher::selector(selectors::POST_VIDEO),
            Propagation::Stop,
            open_post_video,
        ),
        InteractionRule::new(
            "post image",
            Matcher::selector(selectors::POST_IMAGE),
            Propagation::Stop,
            open_post_image,
        ),
    ]
}

/// The click shield is recognized structurally rather than by selector:
/// it must sit inside a post frame, and tiny shields (comment-thread
/// thumbnails reuse the class) are excluded by their rendered width.
fn is_post_image_shield(el: &crate::page::PageElement) -> bool {
    if !el.matches_compound(selectors::POST_IMAGE_SHIELD)
        || el.closest(selectors::POST_FRAME).is_none()
    {
        return false;
    }
    el.attr("width")
        .and_then(|w| w.parse::<i64>().ok())
        .map_or(true, |w| w >= 300)
}

/// The shield covers the real img element; the source sits two levels
/// down on the shield's previous subtree.
fn open_post_image(ctx: &SessionContext, event: &PointerEvent) -> Result<()> {
    let src = event
        .target
        .parent()
        .and_then(|p| p.first_child())
        .and_then(|c| c.first_child())
        .and_then(|img| img.attr("src"));
    let Some(src) = src else {
        return Ok(());
    };
    let mut surface = ctx.surfaces().open()?;
    surface.open_url(&src);
    Ok(())
}

fn open_post_video(ctx: &SessionContext, event: &PointerEvent) -> Result<()> {
    let video = event
        .target
        .parent()
        .and_then(|p| p.query(selectors::VIDEO_ELEMENT))
        .or_else(|| event.target.closest(selectors::VIDEO_ELEMENT));
    let Some(video) = video else {
        return Ok(());
    };

    let src = video.attr("src").unwrap_or_default();
    if !src.is_empty() && !src.starts_with("blob:") {
        // Directly-addressable source, no post payload needed.
        let mut surface = ctx.surfaces().open()?;
        surface.set_title("Video");
        return play_progressive(ctx, surface.as_mut(), &src, None, 0.0);
    }

    // Media-source playback hides the real URL; resolve it through the
    // post payload, matching the carousel entry by the poster thumbnail.
    let post_url = event
        .target
        .closest(selectors::POST_ROOT)
        .and_then(|root| root.query(selectors::POST_PERMALINK))
        .and_then(|a| a.attr("href"));
    let Some(post_url) = post_url else {
        return Ok(());
    };

    // Let the click finish propagating before the surface appears, or the
    // host counts it against the popup budget.
    thread::yield_now();
    let mut surface = ctx.surfaces().open()?;
    surface.set_title("Video");

    let post = ctx
        .posts
        .get_or_resolve(&post_url, || ctx.api().post_info(&post_url))?;
    let poster = video.attr("poster").unwrap_or_default();
    let (url, manifest, duration) = resolve_post_video(&post, &poster)?;
    play_progressive(ctx, surface.as_mut(), &url, manifest.as_deref(), duration)
}

fn resolve_post_video(
    post: &ShortcodeMedia,
    poster: &str,
) -> Result<(String, Option<String>, f64)> {
    if let Some(sidecar) = &post.sidecar {
        let entries = sidecar
            .edges
            .iter()
            .map(|edge| (edge.node.display_url.as_str(), edge.node.is_video));
        let index = media::match_carousel_index(entries, poster, true)?;
        return sidecar_video(&sidecar.edges[index].node);
    }
    if !post.is_video {
        return Err(ResolveError::NoPlayableRendition.into());
    }
    let url = post
        .video_url
        .clone()
        .ok_or(ResolveError::NoPlayableRendition)?;
    let manifest = post
        .dash_info
        .as_ref()
        .and_then(|d| d.video_dash_manifest.clone());
    Ok((url, manifest, post.video_duration.unwrap_or(0.0)))
}

fn sidecar_video(node: &SidecarNode) -> Result<(String, Option<String>, f64)> {
    let url = node
        .video_url
        .clone()
        .ok_or(ResolveError::NoPlayableRendition)?;
    let manifest = node
        .dash_info
        .as_ref()
        .and_then(|d| d.video_dash_manifest.clone());
    Ok((url, manifest, node.video_duration.unwrap_or(0.0)))
}

/// Downloads the progressive stream, then checks the adaptive ladder for
/// a meaningfully better encode to offer alongside it.
fn play_progressive(
    ctx: &SessionContext,
    surface: &mut dyn Surface,
    url: &str,
    manifest: Option<&str>,
    duration_secs: f64,
) -> Result<()> {
    let data = ctx
        .api()
        .network()
        .fetch_bytes(url, ctx.config().fetch.media_retries)
        .context("download progressive stream")?;
    let upgrade = match manifest {
        Some(xml) => media::adaptive_upgrade(xml, data.len(), duration_secs)?,
        None => None,
    };
    surface.show_playback(&Playback {
        url: url.to_string(),
        data,
        duration_secs,
        upgrade,
    });
    Ok(())
}

fn open_highlight(ctx: &SessionContext, event: &PointerEvent) -> Result<()> {
    let Some(root) = event.target.closest(selectors::HIGHLIGHT_ROOT) else {
        return Ok(());
    };
    let title = root
        .query(selectors::HIGHLIGHT_TITLE)
        .map(|el| el.text().to_string())
        .unwrap_or_default();
    let mut surface = ctx.surfaces().open()?;
    surface.set_title(&format!("\u{201c}{}\u{201d}", title));

    // Highlights live on profile pages, so the path is the username.
    let username = event.page_path.trim_matches('/').to_string();
    let highlights = ctx.highlights.get_or_resolve(&username, || {
        let user_id = ctx.user_id(&username)?;
        ctx.api().highlight_tray(&user_id)
    })?;

    let thumb = root
        .query(selectors::HIGHLIGHT_THUMB)
        .and_then(|el| el.attr("src"))
        .unwrap_or_default();
    let stem = media::thumbnail_stem(&thumb);
    let reel = highlights
        .iter()
        .find(|h| {
            !stem.is_empty()
                && h.cover_media_cropped_thumbnail
                    .as_ref()
                    .map(|cover| cover.url.contains(stem))
                    .unwrap_or(false)
        })
        .ok_or_else(|| anyhow!("no highlight reel matches the clicked cover"))?;

    let reels = ctx.api().reels_media(&[api::highlight_reel_id(&reel.id)])?;
    show_single_reel(surface, reels)
}

fn open_tray_story(ctx: &SessionContext, event: &PointerEvent) -> Result<()> {
    let username = event
        .target
        .closest(selectors::TRAY_CELL)
        .and_then(|cell| cell.query(selectors::TRAY_USERNAME))
        .map(|el| el.text().to_string());
    let Some(username) = username else {
        return Ok(());
    };
    open_user_story(ctx, &username)
}

fn open_feed_story(ctx: &SessionContext, event: &PointerEvent) -> Result<()> {
    let username = event
        .target
        .closest(selectors::SMALL_AVATAR_ROOT)
        .and_then(|root| root.next_sibling())
        .and_then(|header| header.query(selectors::FEED_USERNAME))
        .map(|el| el.text().to_string());
    let Some(username) = username else {
        return Ok(());
    };
    open_user_story(ctx, &username)
}

fn open_profile_story(ctx: &SessionContext, event: &PointerEvent) -> Result<()> {
    let username = event.target.text().trim().to_string();
    if username.is_empty() {
        return Ok(());
    }
    open_user_story(ctx, &username)
}

fn open_user_story(ctx: &SessionContext, username: &str) -> Result<()> {
    let mut surface = ctx.surfaces().open()?;
    surface.set_title(&format!("{}'s story", username));
    let user_id = ctx.user_id(username)?;
    let reels = ctx.api().reels_media(&[user_id])?;
    show_single_reel(surface, reels)
}

/// Renders one author's bundle newest-first, or closes the surface when
/// the author has nothing live.
fn show_single_reel(mut surface: Box<dyn Surface>, reels: Vec<Reel>) -> Result<()> {
    let Some(reel) = reels.into_iter().next() else {
        surface.close();
        return Ok(());
    };
    if reel.items.is_empty() {
        surface.close();
        return Ok(());
    }
    surface.show_reel(&reel_slots(reel));
    Ok(())
}

fn reel_slots(reel: Reel) -> Vec<TimelineSlot> {
    let author = reel.user.clone();
    let mut items: Vec<TimelineItem> = reel
        .items
        .into_iter()
        .map(|item| TimelineItem {
            author: author.clone(),
            item,
        })
        .collect();
    items.sort_by(|a, b| b.taken_at().cmp(&a.taken_at()));
    items.into_iter().map(TimelineSlot::Item).collect()
}

fn open_hd_avatar(ctx: &SessionContext, event: &PointerEvent) -> Result<()> {
    let username = event
        .target
        .closest(selectors::PROFILE_AVATAR_ROOT)
        .and_then(|root| root.next_sibling())
        .and_then(|header| header.query(selectors::PROFILE_USERNAME))
        .map(|el| el.text().to_string())
        .unwrap_or_else(|| event.page_path.trim_matches('/').to_string());
    if username.is_empty() {
        return Ok(());
    }
    let user_id = ctx.user_id(&username)?;
    let info = ctx.api().user_info(&user_id)?;
    let picture = info
        .hd_profile_pic_url_info
        .context("profile carries no full-size avatar")?;
    let mut surface = ctx.surfaces().open()?;
    surface.open_url(&picture.url);
    Ok(())
}

fn open_profile_page(ctx: &SessionContext, event: &PointerEvent) -> Result<()> {
    let username = event.target.text().trim().to_string();
    if username.is_empty() {
        return Ok(());
    }
    let mut surface = ctx.surfaces().open()?;
    let base = ctx.config().api.web_base.trim_end_matches('/');
    surface.open_url(&format!("{}/{}/", base, username));
    Ok(())
}
