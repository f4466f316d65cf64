#![allow(clippy::uninlined_format_args)]

pub mod app;
pub mod backref;
pub mod config;
pub mod context;
pub mod dom;
pub mod expand;
pub mod fileinfo;
pub mod forms;
pub mod hashid;
pub mod location;
pub mod media;
pub mod menu;
pub mod net;
pub mod overlay;
pub mod page;
pub mod preview;
pub mod storage;
pub mod sync;

#[cfg(test)]
mod testutil;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub use app::run;
