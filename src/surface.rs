use crate::media::Playback;
use crate::timeline::TimelineSlot;

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum SurfaceError {
    #[error("pop-up blocked by the host browser")]
    PopupBlocked,
}

/// Opens viewing surfaces on the host page. A surface opened by a handler
/// that later fails is left unpopulated rather than closed.
pub trait SurfaceHost: Send + Sync {
    fn open(&self) -> Result<Box<dyn Surface>, SurfaceError>;
}

/// A dedicated viewing surface. Markup, styling and playback controls are
/// the host's business; the core only hands over resolved values.
pub trait Surface: Send {
    fn set_title(&mut self, title: &str);
    fn show_playback(&mut self, playback: &Playback);
    fn show_reel(&mut self, slots: &[TimelineSlot]);
    fn open_url(&mut self, url: &str);
    fn close(&mut self);
}

/// Surfaces the rare user-visible warning; everything else is logged.
pub trait ErrorSink: Send + Sync {
    fn warn(&self, message: &str);
}

pub struct NullSink;

impl ErrorSink for NullSink {
    fn warn(&self, _message: &str) {}
}

pub mod doubles {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::Arc;

    #[derive(Debug, Clone, PartialEq)]
    pub enum SurfaceCall {
        Opened,
        Title(String),
        Playback { url: String, upgraded: bool },
        Reel { items: usize, dividers: usize },
        Url(String),
        Closed,
    }

    /// Records every surface interaction for assertions.
    #[derive(Default)]
    pub struct RecordingHost {
        pub calls: Arc<Mutex<Vec<SurfaceCall>>>,
    }

    impl RecordingHost {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn calls(&self) -> Vec<SurfaceCall> {
            self.calls.lock().clone()
        }
    }

    impl SurfaceHost for RecordingHost {
        fn open(&self) -> Result<Box<dyn Surface>, SurfaceError> {
            self.calls.lock().push(SurfaceCall::Opened);
            Ok(Box::new(RecordingSurface {
                calls: self.calls.clone(),
            }))
        }
    }

    struct RecordingSurface {
        calls: Arc<Mutex<Vec<SurfaceCall>>>,
    }

    impl Surface for RecordingSurface {
        fn set_title(&mut self, title: &str) {
            self.calls.lock().push(SurfaceCall::Title(title.to_string()));
        }

        fn show_playback(&mut self, playback: &Playback) {
            self.calls.lock().push(SurfaceCall::Playback {
                url: playback.url.clone(),
                upgraded: playback.upgrade.is_some(),
            });
        }

        fn show_reel(&mut self, slots: &[TimelineSlot]) {
            let dividers = slots
                .iter()
                .filter(|slot| matches!(slot, TimelineSlot::SeenDivider { .. }))
                .count();
            self.calls.lock().push(SurfaceCall::Reel {
                items: slots.len() - dividers,
                dividers,
            });
        }

        fn open_url(&mut self, url: &str) {
            self.calls.lock().push(SurfaceCall::Url(url.to_string()));
        }

        fn close(&mut self) {
            self.calls.lock().push(SurfaceCall::Closed);
        }
    }

    /// Host with pop-ups disabled.
    pub struct BlockedHost;

    impl SurfaceHost for BlockedHost {
        fn open(&self) -> Result<Box<dyn Surface>, SurfaceError> {
            Err(SurfaceError::PopupBlocked)
        }
    }

    /// Collects user-visible warnings.
    #[derive(Default)]
    pub struct RecordingSink {
        pub warnings: Mutex<Vec<String>>,
    }

    impl RecordingSink {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn warnings(&self) -> Vec<String> {
            self.warnings.lock().clone()
        }
    }

    impl ErrorSink for RecordingSink {
        fn warn(&self, message: &str) {
            self.warnings.lock().push(message.to_string());
        }
    }
}
