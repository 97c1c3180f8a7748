#![allow(clippy::uninlined_format_args)]

pub mod api;
pub mod bootstrap;
pub mod cache;
pub mod config;
pub mod dispatch;
pub mod handlers;
pub mod manifest;
pub mod media;
pub mod net;
pub mod page;
pub mod session;
pub mod storage;
pub mod surface;
pub mod timeline;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
