//! Bead segmentation, smoothing and gap-compressed time alignment for
//! process-monitoring traces.

pub mod config;
pub mod data;
pub mod pipeline;
pub mod signal;
pub mod state;
pub mod timeline;
