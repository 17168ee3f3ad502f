//! subfinder - subtitle finder
//!
//! Walks a directory tree for video files that lack subtitles, asks a
//! prioritized list of subtitle backends for each of them and downloads the
//! first non-empty result next to the video.

pub mod archive;
pub mod backend;
pub mod cli;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod executor;
pub mod ledger;
pub mod scanner;
pub mod store;
pub mod workflow;
