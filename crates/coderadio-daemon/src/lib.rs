//! Now-playing sync engine for Code Radio, plus the collaborators it drives:
//! snapshot fetcher, progress clock, mpv transport, artwork downloader and
//! the HTTP control API.

pub mod artwork;
pub mod clock;
pub mod core;
pub mod error;
pub mod fetcher;
pub mod http;
pub mod mpv;
pub mod sinks;
pub mod transport;
