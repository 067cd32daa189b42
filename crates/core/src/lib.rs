//! Core library for the Music Sanctuary playback engine.
//!
//! The engine owns one playback resource at a time, loads tracks into it with
//! a bounded retry policy, taps its output for analysis when the track's
//! origin allows it, and reduces each spectrum snapshot to a handful of
//! perceptual metrics for the visual layer. Everything runs on the caller's
//! thread: the host forwards media callbacks through
//! [`PlaybackSynchronizer::handle_resource_event`] and drives the analysis
//! loop from its render callback with [`PlaybackSynchronizer::tick`].

pub mod analysis;
pub mod catalog;
pub mod config;
pub mod controller;
pub mod error;
pub mod playback;
pub mod resource;
pub mod sim;
pub mod spectrum;
pub mod tap;
pub mod timeline;

pub use analysis::{AnalysisFrame, FrequencyAnalyzer};
pub use catalog::{TrackCatalog, TrackDescriptor, TrackId};
pub use config::{AnalysisConfig, AppConfig, BandSplit, EngineConfig};
pub use controller::{Lifecycle, ResourceController, RetryState};
pub use error::{EngineError, Result};
pub use playback::{
    EngineEvent, EventLog, EventSink, PlaybackPhase, PlaybackState, PlaybackSynchronizer,
};
pub use resource::{
    LoadFailure, LoadFailureKind, LoadTicket, PlaybackResource, ResourceEvent, ResourceFactory,
    ResourceId,
};
pub use sim::{SimulatedDevice, SwapMode};
pub use spectrum::SpectrumAnalyser;
pub use tap::{AttachOutcome, ConnectionState, SignalTap};
pub use timeline::{AnalysisLoop, PlaybackClock};
