//! Track descriptors
//!
//! A track descriptor is the immutable identity + metadata for one queued or
//! playing item. The `link` field is the unique key used throughout the
//! scheduler (slot matching, URL cache, prefetch idempotence).

use serde::{Deserialize, Serialize};

/// Immutable identity and display metadata for one track.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackDescriptor {
    /// Display title
    pub title: String,

    /// Source page link; unique key for this track
    pub link: String,

    /// Human-readable duration label (e.g. "3:33"); display only
    pub duration: String,
}

impl TrackDescriptor {
    pub fn new(
        title: impl Into<String>,
        link: impl Into<String>,
        duration: impl Into<String>,
    ) -> Self {
        Self {
            title: title.into(),
            link: link.into(),
            duration: duration.into(),
        }
    }

    /// Build a descriptor from a bare link, for callers that have no metadata
    /// (the CLI). The link doubles as the title.
    pub fn from_link(link: impl Into<String>) -> Self {
        let link = link.into();
        Self {
            title: link.clone(),
            link,
            duration: "--:--".to_string(),
        }
    }
}

impl std::fmt::Display for TrackDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} [{}]", self.title, self.duration)
    }
}
