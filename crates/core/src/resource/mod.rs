use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{catalog::TrackId, Result};

/// Identity of one resource instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceId(pub u64);

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "resource#{}", self.0)
    }
}

/// Tags every event belonging to one `assign_source` call. The generation
/// distinguishes two loads of the same track.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LoadTicket {
    pub track: TrackId,
    pub generation: u64,
}

impl fmt::Display for LoadTicket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.track, self.generation)
    }
}

/// Why a load attempt failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadFailureKind {
    /// No source, or a placeholder source, was assigned. Never an error.
    EmptySource,
    Network,
    Decode,
    Unsupported,
    Aborted,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoadFailure {
    pub kind: LoadFailureKind,
    pub message: String,
}

impl LoadFailure {
    pub fn new(kind: LoadFailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn empty_source() -> Self {
        Self::new(LoadFailureKind::EmptySource, "no source assigned")
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(LoadFailureKind::Network, message)
    }

    pub fn is_empty_source(&self) -> bool {
        self.kind == LoadFailureKind::EmptySource
    }
}

/// Raw notifications a resource emits while loading and playing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResourceEvent {
    MetadataLoaded { duration_seconds: f64 },
    CanPlay,
    TimeUpdate { position_seconds: f64 },
    Ended,
    Error(LoadFailure),
}

/// One playback output owned by the resource controller.
pub trait PlaybackResource {
    fn id(&self) -> ResourceId;

    /// Points the resource at a new locator. Events for this load must be
    /// reported with `ticket`.
    fn set_source(&mut self, source: &str, ticket: LoadTicket);

    /// Cross-origin mode: whether the signal of the current source may be
    /// read back for analysis.
    fn set_analysis_permitted(&mut self, permitted: bool);

    /// Starts (or restarts) loading the current source. Completion is
    /// reported asynchronously.
    fn load(&mut self);

    /// Fails with [`crate::EngineError::PlaybackRejected`] when the platform
    /// refuses to start.
    fn play(&mut self) -> Result<()>;

    fn pause(&mut self);

    /// Pauses and rewinds.
    fn stop(&mut self);

    fn seek(&mut self, seconds: f64);

    fn set_volume(&mut self, volume: f32);

    fn set_muted(&mut self, muted: bool);

    /// Routes the output through an analysis node. Called at most once per
    /// instance.
    fn connect_tap(&mut self) -> Result<()>;

    /// Copies the most recent output samples into `out`, returning how many
    /// were written.
    fn read_time_domain(&mut self, out: &mut [f32]) -> usize;

    /// Whether `set_source` can be called again on this instance. Platforms
    /// that answer `false` get a fresh instance for every track.
    fn supports_source_swap(&self) -> bool {
        true
    }

    /// Frees platform handles. The instance is dropped right after.
    fn release(&mut self) {}
}

/// Creates playback resources on demand.
pub trait ResourceFactory {
    fn create(&mut self) -> Result<Box<dyn PlaybackResource>>;
}

impl<F> ResourceFactory for F
where
    F: FnMut() -> Result<Box<dyn PlaybackResource>>,
{
    fn create(&mut self) -> Result<Box<dyn PlaybackResource>> {
        self()
    }
}
