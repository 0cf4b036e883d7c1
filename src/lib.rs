//! Continuous RTSP-to-file segment recorder.
//!
//! Supervises an external ffmpeg subprocess that captures a network stream
//! into fixed-duration segment files, with disk-space gating, an escalating
//! retry loop, and log housekeeping.

pub mod config;
pub mod error;
pub mod logging;
pub mod preflight;
pub mod recorder;
pub mod resource;
pub mod supervisor;

pub use error::{Error, Result};
