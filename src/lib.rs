//! trailerfin: keeps backdrop trailer links for a media library fresh.
//!
//! Title folders tagged `{imdb-tt…}`, `{tmdb-…}` or `{tvdb-…}` get a small
//! reference file pointing at a signed, time-limited trailer URL. Links are
//! tracked on disk and refetched shortly before they expire.

pub mod app_mode;
pub mod cli;
pub mod config;
pub mod jobs;
pub mod services;
