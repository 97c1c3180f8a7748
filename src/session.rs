use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use parking_lot::{Mutex, RwLock};
use reqwest::blocking::Client as HttpClient;

use crate::api::{Api, HighlightReel, ShortcodeMedia, StoryService};
use crate::cache::Cache;
use crate::config::Config;
use crate::net::Client;
use crate::storage::{UserDirectory, WatermarkStore};
use crate::surface::{ErrorSink, Surface, SurfaceError, SurfaceHost};
use crate::timeline::Timeline;

/// Everything a handler needs for one user interaction: the typed backend
/// client, the per-session response caches, persistence, and the surface
/// host. One context lives for the whole page session.
pub struct SessionContext {
    config: Config,
    api: Arc<Api>,
    /// Post payloads keyed by canonical post URL.
    pub posts: Cache<ShortcodeMedia>,
    /// Highlight trays keyed by profile username.
    pub highlights: Cache<Vec<HighlightReel>>,
    busy: AtomicBool,
    profile_hint: RwLock<Option<ProfileHint>>,
    watermark: Arc<dyn WatermarkStore>,
    directory: Arc<dyn UserDirectory>,
    surfaces: Arc<dyn SurfaceHost>,
    sink: Arc<dyn ErrorSink>,
    active_timeline: Mutex<Option<ActiveTimeline>>,
}

struct ActiveTimeline {
    timeline: Timeline,
    surface: Box<dyn Surface>,
}

/// The profile the host page is currently showing. Its shared data block
/// already carries the owner's id, so interactions on that profile skip
/// both the local index and the network.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfileHint {
    pub username: String,
    pub user_id: String,
}

impl SessionContext {
    pub fn new(
        config: Config,
        surfaces: Arc<dyn SurfaceHost>,
        sink: Arc<dyn ErrorSink>,
        watermark: Arc<dyn WatermarkStore>,
        directory: Arc<dyn UserDirectory>,
    ) -> Result<Self> {
        Self::with_http_client(config, None, surfaces, sink, watermark, directory)
    }

    pub fn with_http_client(
        config: Config,
        http_client: Option<HttpClient>,
        surfaces: Arc<dyn SurfaceHost>,
        sink: Arc<dyn ErrorSink>,
        watermark: Arc<dyn WatermarkStore>,
        directory: Arc<dyn UserDirectory>,
    ) -> Result<Self> {
        let net = Arc::new(Client::new(&config, http_client).context("build network client")?);
        let api = Arc::new(Api::new(net, &config));
        Ok(Self {
            config,
            api,
            posts: Cache::new(),
            highlights: Cache::new(),
            busy: AtomicBool::new(false),
            profile_hint: RwLock::new(None),
            watermark,
            directory,
            surfaces,
            sink,
            active_timeline: Mutex::new(None),
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn api(&self) -> &Api {
        &self.api
    }

    pub fn surfaces(&self) -> &dyn SurfaceHost {
        self.surfaces.as_ref()
    }

    pub fn sink(&self) -> &dyn ErrorSink {
        self.sink.as_ref()
    }

    /// Claims the single handler slot. Returns false while another handler
    /// is still running; the caller drops the event in that case.
    pub fn begin_interaction(&self) -> bool {
        !self.busy.swap(true, Ordering::AcqRel)
    }

    pub fn end_interaction(&self) {
        self.busy.store(false, Ordering::Release);
    }

    /// Installs the current page's profile hint; the host refreshes it on
    /// navigation.
    pub fn set_profile_hint(&self, username: &str, user_id: &str) {
        *self.profile_hint.write() = Some(ProfileHint {
            username: username.to_string(),
            user_id: user_id.to_string(),
        });
    }

    /// Username to id: the page hint first, then the local index, then
    /// the profile lookup over the network. Successful network lookups
    /// are recorded so repeat interactions stay local.
    pub fn user_id(&self, username: &str) -> Result<String> {
        if let Some(hint) = self.profile_hint.read().as_ref() {
            if hint.username == username {
                return Ok(hint.user_id.clone());
            }
        }
        if let Some(id) = self.directory.lookup(username)? {
            return Ok(id);
        }
        let id = self.api.profile_user_id(username)?;
        self.directory.record(username, &id)?;
        Ok(id)
    }

    /// Routes a failed interaction. A blocked pop-up is the one condition
    /// the user can actually fix, so it alone reaches the sink; everything
    /// else goes to the log.
    pub fn report(&self, rule: &str, err: &anyhow::Error) {
        if matches!(
            err.downcast_ref::<SurfaceError>(),
            Some(SurfaceError::PopupBlocked)
        ) {
            self.sink
                .warn("Allow pop-ups for this site to open the story viewer");
        }
        tracing::warn!(rule, error = %err, "interaction failed");
    }

    /// Opens the cross-author stories timeline and renders its first page.
    /// The paginator is retained only while more pages remain, so
    /// `load_more` has something to drive.
    pub fn open_timeline(&self) -> Result<()> {
        let mut surface = self.surfaces.open()?;
        surface.set_title("Stories timeline");

        let service: Arc<dyn StoryService> = self.api.clone();
        let mut timeline = Timeline::open(
            service,
            self.watermark.as_ref(),
            self.config.timeline.reel_batch_size,
        )?;
        match timeline.next_page()? {
            Some(page) => {
                surface.show_reel(&page.slots);
                if page.has_more() {
                    *self.active_timeline.lock() = Some(ActiveTimeline { timeline, surface });
                }
            }
            None => surface.close(),
        }
        Ok(())
    }

    /// Renders the next timeline page onto the retained surface. Returns
    /// whether more pages remain; false when no timeline is active.
    pub fn load_more(&self) -> Result<bool> {
        let mut guard = self.active_timeline.lock();
        let Some(active) = guard.as_mut() else {
            return Ok(false);
        };
        match active.timeline.next_page()? {
            Some(page) => {
                active.surface.show_reel(&page.slots);
                if page.has_more() {
                    Ok(true)
                } else {
                    *guard = None;
                    Ok(false)
                }
            }
            None => {
                *guard = None;
                Ok(false)
            }
        }
    }
}
