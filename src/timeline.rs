use std::cmp::min;
use std::sync::Arc;

use anyhow::Result;
use chrono::{TimeZone, Utc};

use crate::api::{ReelItem, ReelUser, StoryService, TrayEntry};
use crate::storage::WatermarkStore;

/// Where the paginator sits between operations. `Rendered { more: false }`
/// is the terminal state: the load-more control is gone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Idle,
    FetchingPage,
    Merging,
    Rendered { more: bool },
}

/// A story item tagged with its author for cross-author display.
#[derive(Debug, Clone)]
pub struct TimelineItem {
    pub author: ReelUser,
    pub item: ReelItem,
}

impl TimelineItem {
    pub fn taken_at(&self) -> i64 {
        self.item.taken_at
    }
}

#[derive(Debug, Clone)]
pub enum TimelineSlot {
    Item(TimelineItem),
    /// Inserted once per session, immediately before the first item at or
    /// below the watermark read at open time.
    SeenDivider { last_seen: i64 },
}

#[derive(Debug, Clone)]
pub struct TimelinePage {
    pub slots: Vec<TimelineSlot>,
    /// Activity cutoff of the next page, shown on the load-more control.
    /// `None` means the timeline is exhausted.
    pub next_cutoff: Option<i64>,
}

impl TimelinePage {
    pub fn has_more(&self) -> bool {
        self.next_cutoff.is_some()
    }
}

/// HH:MM label for divider and load-more controls.
pub fn time_label(timestamp: i64) -> String {
    match Utc.timestamp_opt(timestamp, 0) {
        chrono::LocalResult::Single(dt) => dt.format("%H:%M").to_string(),
        _ => String::new(),
    }
}

/// Cross-author chronological paginator over the stories tray.
///
/// Page population order follows each author's most recent activity,
/// descending. Within a page, items merge with leftovers from the prior
/// page and sort by descending capture time; items older than the next
/// page's activity cutoff are held back so chronological order stays
/// strict across page boundaries.
pub struct Timeline {
    service: Arc<dyn StoryService>,
    batch: usize,
    tray: Vec<TrayEntry>,
    cursor: usize,
    leftovers: Vec<TimelineItem>,
    last_seen: i64,
    seen_marked: bool,
    state: State,
}

impl Timeline {
    /// Fetches and orders the tray, then advances the persisted watermark
    /// to the newest activity before anything renders. Items are marked
    /// seen at open time, not at view time; the watermark never moves
    /// backwards.
    pub fn open(
        service: Arc<dyn StoryService>,
        watermark: &dyn WatermarkStore,
        batch: usize,
    ) -> Result<Self> {
        let mut tray = service.reels_tray()?;
        tray.sort_by(|a, b| b.latest_reel_media.cmp(&a.latest_reel_media));

        let last_seen = watermark.last_seen()?.unwrap_or(0);
        let newest = tray.first().map(|t| t.latest_reel_media).unwrap_or(0);
        if newest > last_seen {
            watermark.set_last_seen(newest)?;
        }
        tracing::debug!(last_seen, newest, authors = tray.len(), "timeline opened");

        Ok(Self {
            service,
            batch: batch.max(1),
            tray,
            cursor: 0,
            leftovers: Vec::new(),
            last_seen,
            seen_marked: false,
            state: State::Idle,
        })
    }

    pub fn state(&self) -> State {
        self.state
    }

    /// Watermark value read at open; the boundary items are compared
    /// against.
    pub fn last_seen(&self) -> i64 {
        self.last_seen
    }

    pub fn has_more(&self) -> bool {
        self.cursor < self.tray.len()
    }

    /// Produces the next rendered page, or `None` once the tray is
    /// exhausted or a page resolves to no items.
    pub fn next_page(&mut self) -> Result<Option<TimelinePage>> {
        if !self.has_more() {
            self.state = State::Rendered { more: false };
            return Ok(None);
        }

        self.state = State::FetchingPage;
        let end = min(self.cursor + self.batch, self.tray.len());
        let reel_ids: Vec<String> = self.tray[self.cursor..end]
            .iter()
            .map(|entry| entry.id.clone())
            .collect();
        let reels = self.service.reels_media(&reel_ids)?;

        self.state = State::Merging;
        let mut items = std::mem::take(&mut self.leftovers);
        for reel in reels {
            let author = reel.user.clone();
            for item in reel.items {
                items.push(TimelineItem {
                    author: author.clone(),
                    item,
                });
            }
        }
        if items.is_empty() {
            self.cursor = end;
            self.state = State::Rendered { more: false };
            return Ok(None);
        }
        items.sort_by(|a, b| b.taken_at().cmp(&a.taken_at()));

        // Items older than the next page's most recent activity belong to
        // a later page; rendering them now would break chronological
        // order across the boundary.
        let next_cutoff = self
            .tray
            .get(end)
            .map(|entry| entry.latest_reel_media)
            .unwrap_or(0);

        let mut slots = Vec::new();
        for entry in items {
            if entry.taken_at() < next_cutoff {
                self.leftovers.push(entry);
                continue;
            }
            if !self.seen_marked && entry.taken_at() <= self.last_seen {
                self.seen_marked = true;
                slots.push(TimelineSlot::SeenDivider {
                    last_seen: self.last_seen,
                });
            }
            slots.push(TimelineSlot::Item(entry));
        }

        self.cursor = end;
        let more = self.has_more();
        self.state = State::Rendered { more };
        Ok(Some(TimelinePage {
            slots,
            next_cutoff: if more { Some(next_cutoff) } else { None },
        }))
    }
}
