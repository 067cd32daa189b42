use std::{fmt, time::Duration};

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::{
    analysis::{AnalysisFrame, FrequencyAnalyzer},
    catalog::{TrackDescriptor, TrackId},
    config::AppConfig,
    controller::{Lifecycle, ResourceController},
    resource::{LoadTicket, ResourceEvent, ResourceFactory},
    spectrum::SpectrumAnalyser,
    tap::{ConnectionState, SignalTap},
    timeline::{AnalysisLoop, PlaybackClock},
    Result,
};

/// Message surfaced when the resource refuses to start.
pub const PLAYBACK_REJECTED_MESSAGE: &str =
    "Playback failed. Please interact with the page first.";

/// Message surfaced when no playback resource can be created.
pub const ENGINE_UNAVAILABLE_MESSAGE: &str = "Failed to initialize audio engine";

/// Notifications delivered to the transport controller and the presentation
/// layer.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum EngineEvent {
    DurationChange { seconds: f64 },
    TimeUpdate { seconds: f64 },
    Ended,
    Error { message: String },
    Ready,
    AnalysisFrame(AnalysisFrame),
}

/// Receiver of [`EngineEvent`]s.
pub trait EventSink {
    fn emit(&mut self, event: EngineEvent);
}

impl<F> EventSink for F
where
    F: FnMut(EngineEvent),
{
    fn emit(&mut self, event: EngineEvent) {
        self(event)
    }
}

/// Sink that keeps every event, in order.
#[derive(Debug, Clone, Default)]
pub struct EventLog {
    events: Vec<EngineEvent>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> &[EngineEvent] {
        &self.events
    }

    pub fn take(&mut self) -> Vec<EngineEvent> {
        std::mem::take(&mut self.events)
    }

    pub fn count(&self, predicate: impl Fn(&EngineEvent) -> bool) -> usize {
        self.events.iter().filter(|event| predicate(event)).count()
    }

    pub fn frames(&self) -> impl Iterator<Item = &AnalysisFrame> {
        self.events.iter().filter_map(|event| match event {
            EngineEvent::AnalysisFrame(frame) => Some(frame),
            _ => None,
        })
    }
}

impl EventSink for EventLog {
    fn emit(&mut self, event: EngineEvent) {
        self.events.push(event);
    }
}

/// Where the state machine currently stands.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "phase", content = "track", rename_all = "snake_case")]
pub enum PlaybackPhase {
    Idle,
    Loading(TrackId),
    Ready(TrackId),
    Playing(TrackId),
    Paused(TrackId),
    Error(TrackId),
}

impl PlaybackPhase {
    pub fn track(&self) -> Option<&TrackId> {
        match self {
            PlaybackPhase::Idle => None,
            PlaybackPhase::Loading(id)
            | PlaybackPhase::Ready(id)
            | PlaybackPhase::Playing(id)
            | PlaybackPhase::Paused(id)
            | PlaybackPhase::Error(id) => Some(id),
        }
    }
}

impl fmt::Display for PlaybackPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlaybackPhase::Idle => write!(f, "idle"),
            PlaybackPhase::Loading(id) => write!(f, "loading({id})"),
            PlaybackPhase::Ready(id) => write!(f, "ready({id})"),
            PlaybackPhase::Playing(id) => write!(f, "playing({id})"),
            PlaybackPhase::Paused(id) => write!(f, "paused({id})"),
            PlaybackPhase::Error(id) => write!(f, "error({id})"),
        }
    }
}

/// Observable playback state. Only the synchronizer writes it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlaybackState {
    pub loading_track_id: Option<TrackId>,
    pub ready_track_id: Option<TrackId>,
    /// What the user asked for, independent of readiness.
    pub is_playing: bool,
    pub volume: f32,
    pub is_muted: bool,
    pub position_seconds: f64,
    pub duration_seconds: f64,
    /// The resource reached its end and is waiting for a command.
    pub ended: bool,
}

impl PlaybackState {
    fn new(volume: f32) -> Self {
        Self {
            loading_track_id: None,
            ready_track_id: None,
            is_playing: false,
            volume,
            is_muted: false,
            position_seconds: 0.0,
            duration_seconds: 0.0,
            ended: false,
        }
    }
}

/// Orchestrates the resource controller, the signal tap and the analysis
/// loop for one engine instance.
pub struct PlaybackSynchronizer<S> {
    controller: ResourceController,
    tap: SignalTap,
    spectrum: SpectrumAnalyser,
    analyzer: FrequencyAnalyzer,
    analysis_loop: AnalysisLoop,
    clock: PlaybackClock,
    phase: PlaybackPhase,
    state: PlaybackState,
    track: Option<TrackDescriptor>,
    /// Whether the resource was started and has not since been paused,
    /// stopped or run to its end.
    running: bool,
    last_frame: AnalysisFrame,
    sink: S,
}

impl<S: EventSink> PlaybackSynchronizer<S> {
    pub fn new(config: &AppConfig, factory: Box<dyn ResourceFactory>, sink: S) -> Result<Self> {
        config.validate()?;
        let spectrum = SpectrumAnalyser::new(&config.analysis)?;
        let controller = ResourceController::new(factory, &config.engine);
        let state = PlaybackState::new(controller.volume());

        Ok(Self {
            tap: SignalTap::new(spectrum.fft_size()),
            analyzer: FrequencyAnalyzer::new(config.analysis.bands),
            analysis_loop: AnalysisLoop::new(config.engine.tick_interval()),
            clock: PlaybackClock::default(),
            phase: PlaybackPhase::Idle,
            track: None,
            running: false,
            last_frame: AnalysisFrame::default(),
            controller,
            spectrum,
            state,
            sink,
        })
    }

    /// Starts loading `track`, abandoning whatever was loading or playing.
    /// The play intent carries over so a playing engine keeps playing once
    /// the new track is ready.
    pub fn load_track(&mut self, track: TrackDescriptor) -> Result<()> {
        self.analysis_loop.stop();
        self.running = false;
        let id = track.id().clone();
        let previous_resource = self.controller.resource_id();

        self.state.loading_track_id = Some(id.clone());
        self.state.ready_track_id = None;
        self.state.position_seconds = 0.0;
        self.state.duration_seconds = track.known_duration_seconds().unwrap_or(0.0);
        self.state.ended = false;
        self.spectrum.reset();

        let ticket = match self.controller.assign_source(&track) {
            Ok(ticket) => ticket,
            Err(err) => {
                warn!(track = %id, error = %err, "no playback resource available");
                self.tap.detach();
                self.track = Some(track);
                self.phase = PlaybackPhase::Error(id);
                self.sink.emit(EngineEvent::Error {
                    message: ENGINE_UNAVAILABLE_MESSAGE.to_string(),
                });
                return Err(err);
            }
        };

        if self.controller.resource_id() != previous_resource {
            self.tap.detach();
        }
        debug!(%ticket, title = track.title(), artist = track.artist(), "track assigned");
        self.track = Some(track);
        self.transition(PlaybackPhase::Loading(id));
        Ok(())
    }

    pub fn play(&mut self) {
        self.state.is_playing = true;
        let start = match &self.phase {
            PlaybackPhase::Ready(_) | PlaybackPhase::Paused(_) => true,
            PlaybackPhase::Playing(_) => !self.running,
            PlaybackPhase::Loading(id) => {
                debug!(track = %id, "play deferred until ready");
                false
            }
            PlaybackPhase::Error(id) => {
                debug!(track = %id, "play ignored, track failed to load");
                false
            }
            PlaybackPhase::Idle => {
                debug!("play requested with no track loaded");
                false
            }
        };
        if start {
            self.start_playback();
        }
    }

    pub fn pause(&mut self) {
        self.state.is_playing = false;
        if let PlaybackPhase::Playing(id) = &self.phase {
            let id = id.clone();
            self.controller.pause();
            self.running = false;
            self.analysis_loop.stop();
            self.transition(PlaybackPhase::Paused(id));
        }
    }

    /// Seeks within the current track. Before the track is ready the position
    /// is queued and dropped if another track takes over.
    pub fn seek(&mut self, seconds: f64) {
        if !seconds.is_finite() {
            warn!(seconds, "ignoring non-finite seek");
            return;
        }
        let mut target = seconds.max(0.0);
        if self.state.duration_seconds > 0.0 {
            target = target.min(self.state.duration_seconds);
        }
        if self.controller.seek(target) {
            self.state.position_seconds = target;
            self.state.ended = false;
        }
    }

    pub fn set_volume(&mut self, volume: f32) {
        if !volume.is_finite() {
            warn!(volume, "ignoring non-finite volume");
            return;
        }
        self.controller.set_volume(volume);
        self.state.volume = self.controller.volume();
    }

    pub fn set_muted(&mut self, muted: bool) {
        self.controller.set_muted(muted);
        self.state.is_muted = muted;
    }

    /// Entry point for media callbacks delivered by the host.
    pub fn handle_resource_event(&mut self, ticket: &LoadTicket, event: ResourceEvent) {
        let Some(lifecycle) = self.controller.handle_event(ticket, event, self.clock.now()) else {
            return;
        };
        if self.state.loading_track_id.as_ref() != Some(&ticket.track) {
            debug!(%ticket, "discarding lifecycle event for another track");
            return;
        }

        match lifecycle {
            Lifecycle::DurationKnown(seconds) => {
                if seconds.is_finite() && seconds >= 0.0 {
                    self.state.duration_seconds = seconds;
                    self.sink.emit(EngineEvent::DurationChange { seconds });
                }
            }
            Lifecycle::CanPlay => self.on_can_play(ticket.track.clone()),
            Lifecycle::PositionChanged(seconds) => {
                self.state.position_seconds = seconds;
                self.sink.emit(EngineEvent::TimeUpdate { seconds });
            }
            Lifecycle::Ended => self.on_ended(),
            Lifecycle::LoadError(message) => self.on_load_error(message),
        }
    }

    /// Render-cadence callback. Fires due retry timers and, while playing,
    /// produces at most one analysis frame.
    pub fn tick(&mut self, now: Duration) {
        self.clock.advance_to(now);
        self.controller.poll_timers(self.clock.now());

        if !self.analysis_loop.poll(self.clock.now()) {
            return;
        }
        if !matches!(self.phase, PlaybackPhase::Playing(_)) || !self.running {
            self.analysis_loop.stop();
            return;
        }

        let frame = self.analyze_current();
        self.last_frame = frame;
        self.sink.emit(EngineEvent::AnalysisFrame(frame));
    }

    /// Cancels the analysis loop and releases the resource and the tap.
    /// Volume and mute survive for a later `load_track`. The FFT plan and
    /// sample buffers are only zeroed here; their memory is freed when the
    /// synchronizer is dropped.
    pub fn shutdown(&mut self) {
        self.analysis_loop.stop();
        self.running = false;
        self.controller.release();
        self.tap.detach();
        self.spectrum.reset();
        self.track = None;
        self.last_frame = AnalysisFrame::default();
        self.state = PlaybackState {
            volume: self.state.volume,
            is_muted: self.state.is_muted,
            ..PlaybackState::new(self.state.volume)
        };
        self.transition(PlaybackPhase::Idle);
    }

    pub fn phase(&self) -> &PlaybackPhase {
        &self.phase
    }

    pub fn state(&self) -> &PlaybackState {
        &self.state
    }

    pub fn current_track(&self) -> Option<&TrackDescriptor> {
        self.track.as_ref()
    }

    pub fn last_frame(&self) -> AnalysisFrame {
        self.last_frame
    }

    pub fn is_analysing(&self) -> bool {
        self.analysis_loop.is_running()
    }

    pub fn tap_connection(&self) -> ConnectionState {
        self.tap.connection()
    }

    pub fn controller(&self) -> &ResourceController {
        &self.controller
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }

    fn on_can_play(&mut self, id: TrackId) {
        if !matches!(&self.phase, PlaybackPhase::Loading(loading) if *loading == id) {
            // a second can-play (after a seek, say) does not re-enter Ready
            return;
        }
        self.state.ready_track_id = Some(id.clone());
        self.transition(PlaybackPhase::Ready(id));
        self.wire_tap();
        self.sink.emit(EngineEvent::Ready);

        if self.state.is_playing {
            self.start_playback();
        }
    }

    fn on_ended(&mut self) {
        if !matches!(self.phase, PlaybackPhase::Playing(_)) {
            return;
        }
        self.state.ended = true;
        self.running = false;
        self.analysis_loop.stop();
        info!(phase = %self.phase, "track ended");
        self.sink.emit(EngineEvent::Ended);
    }

    fn on_load_error(&mut self, message: String) {
        let Some(id) = self.state.loading_track_id.clone() else {
            return;
        };
        self.state.ready_track_id = None;
        self.running = false;
        self.analysis_loop.stop();
        self.transition(PlaybackPhase::Error(id));
        self.sink.emit(EngineEvent::Error { message });
    }

    /// Physically starts the resource, but only when the ready track is the
    /// one the controller is loading.
    fn start_playback(&mut self) {
        let ready = match (&self.state.ready_track_id, &self.state.loading_track_id) {
            (Some(ready), Some(loading)) if ready == loading => ready.clone(),
            _ => return,
        };
        if self.controller.current_track() != Some(&ready) {
            return;
        }

        match self.controller.play() {
            Ok(()) => {
                self.state.ended = false;
                self.running = true;
                self.analysis_loop.start(self.clock.now());
                self.transition(PlaybackPhase::Playing(ready));
            }
            Err(err) => {
                warn!(track = %ready, error = %err, "resource refused to start");
                self.sink.emit(EngineEvent::Error {
                    message: PLAYBACK_REJECTED_MESSAGE.to_string(),
                });
            }
        }
    }

    fn wire_tap(&mut self) {
        let permitted = self
            .track
            .as_ref()
            .map(TrackDescriptor::analysis_permitted)
            .unwrap_or(false);
        if let Some(resource) = self.controller.resource_mut() {
            self.tap.attach(resource, permitted);
        }
    }

    fn analyze_current(&mut self) -> AnalysisFrame {
        let permitted = self
            .track
            .as_ref()
            .map(TrackDescriptor::analysis_permitted)
            .unwrap_or(false);
        let samples = match self.controller.resource_mut() {
            Some(resource) if permitted => self.tap.read(resource),
            _ => None,
        };
        let spectrum = match samples {
            Some(samples) => self.spectrum.process(samples),
            None => self.spectrum.process_silence(),
        };

        match spectrum {
            Ok(bins) => self.analyzer.analyze(bins),
            Err(err) => {
                warn!(error = %err, "spectrum analysis failed");
                AnalysisFrame::default()
            }
        }
    }

    fn transition(&mut self, next: PlaybackPhase) {
        if self.phase != next {
            info!(from = %self.phase, to = %next, "playback phase changed");
            self.phase = next;
        }
    }
}

impl<S> fmt::Debug for PlaybackSynchronizer<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PlaybackSynchronizer")
            .field("phase", &self.phase)
            .field("state", &self.state)
            .field("controller", &self.controller)
            .field("tap", &self.tap.connection())
            .field("analysis_loop", &self.analysis_loop)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        controller::LOAD_FAILED_MESSAGE,
        sim::{SimulatedDevice, SwapMode},
    };

    const FRAME: Duration = Duration::from_micros(16_667);

    struct Harness {
        device: SimulatedDevice,
        engine: PlaybackSynchronizer<EventLog>,
        now: Duration,
    }

    impl Harness {
        fn new() -> Self {
            Self::with_device(SimulatedDevice::new())
        }

        fn with_device(device: SimulatedDevice) -> Self {
            let engine = PlaybackSynchronizer::new(
                &AppConfig::default(),
                Box::new(device.factory()),
                EventLog::new(),
            )
            .unwrap();
            Self {
                device,
                engine,
                now: Duration::ZERO,
            }
        }

        /// Runs the host loop for `frames` render callbacks.
        fn run(&mut self, frames: u32) {
            for _ in 0..frames {
                self.now += FRAME;
                for (ticket, event) in self.device.advance(self.now) {
                    self.engine.handle_resource_event(&ticket, event);
                }
                self.engine.tick(self.now);
            }
        }

        fn ticket(&self) -> LoadTicket {
            self.engine.controller().current_ticket().cloned().unwrap()
        }

        fn log(&self) -> &EventLog {
            self.engine.sink()
        }

        fn errors(&self) -> Vec<String> {
            self.log()
                .events()
                .iter()
                .filter_map(|event| match event {
                    EngineEvent::Error { message } => Some(message.clone()),
                    _ => None,
                })
                .collect()
        }
    }

    fn local(id: &str) -> TrackDescriptor {
        TrackDescriptor::new(id, format!("/music/{id}.mp3"))
    }

    fn remote(id: &str) -> TrackDescriptor {
        TrackDescriptor::new(id, format!("https://cdn.example.com/{id}.mp3"))
    }

    fn playing(id: &str) -> PlaybackPhase {
        PlaybackPhase::Playing(TrackId::from(id))
    }

    #[test]
    fn local_track_plays_and_emits_frames() {
        let mut h = Harness::new();
        h.device.set_duration("/music/t1.mp3", 180.0);
        h.engine.load_track(local("t1")).unwrap();
        h.run(5);

        assert!(h
            .log()
            .events()
            .contains(&EngineEvent::DurationChange { seconds: 180.0 }));
        assert_eq!(h.log().count(|event| *event == EngineEvent::Ready), 1);
        assert_eq!(h.engine.phase(), &PlaybackPhase::Ready("t1".into()));
        assert!(h.engine.tap_connection().is_attached());

        h.engine.play();
        assert_eq!(h.engine.phase(), &playing("t1"));
        h.run(1);

        let frames: Vec<_> = h.log().frames().copied().collect();
        assert_eq!(frames.len(), 1);
        assert!(frames[0].energy > 0.0);
    }

    #[test]
    fn stale_can_play_is_discarded_after_switch() {
        let mut h = Harness::new();
        h.engine.load_track(local("t1")).unwrap();
        let stale = h.ticket();
        h.engine.play();
        h.engine.load_track(local("t2")).unwrap();

        h.engine.handle_resource_event(&stale, ResourceEvent::CanPlay);
        assert_eq!(h.engine.phase(), &PlaybackPhase::Loading("t2".into()));
        assert_eq!(h.engine.state().ready_track_id, None);
        assert_eq!(h.device.stats().play_calls, 0);
        assert_eq!(h.log().count(|event| *event == EngineEvent::Ready), 0);

        h.run(5);
        assert_eq!(h.engine.phase(), &playing("t2"));
        assert_eq!(h.engine.state().ready_track_id, Some("t2".into()));
        assert_eq!(h.log().count(|event| *event == EngineEvent::Ready), 1);
        assert_eq!(h.device.stats().play_calls, 1);
    }

    #[test]
    fn rapid_switches_only_honour_the_last_track() {
        let mut h = Harness::new();
        h.engine.play();
        for id in ["a", "b", "c"] {
            h.engine.load_track(local(id)).unwrap();
        }
        h.run(10);

        assert_eq!(h.engine.phase(), &playing("c"));
        assert_eq!(h.log().count(|event| *event == EngineEvent::Ready), 1);
        let source = h.device.source_of(h.engine.controller().resource_id().unwrap());
        assert_eq!(source.as_deref(), Some("/music/c.mp3"));
    }

    #[test]
    fn failing_track_errors_once_after_three_attempts() {
        let mut h = Harness::new();
        h.device.fail_source("/music/t3.mp3");
        h.engine.load_track(local("t3")).unwrap();
        h.engine.play();
        h.run(150);

        assert_eq!(h.device.stats().load_calls, 3);
        assert_eq!(h.errors(), vec![LOAD_FAILED_MESSAGE.to_string()]);
        assert!(h.errors()[0].starts_with("Failed to load audio file"));
        assert_eq!(h.engine.phase(), &PlaybackPhase::Error("t3".into()));
        assert!(!h.engine.is_analysing());

        h.engine.play();
        assert_eq!(h.device.stats().play_calls, 0);
    }

    #[test]
    fn error_state_recovers_with_a_new_load() {
        let mut h = Harness::new();
        h.device.fail_source("/music/bad.mp3");
        h.engine.load_track(local("bad")).unwrap();
        h.run(150);
        assert_eq!(h.engine.phase(), &PlaybackPhase::Error("bad".into()));

        h.engine.load_track(local("good")).unwrap();
        h.engine.play();
        h.run(5);
        assert_eq!(h.engine.phase(), &playing("good"));
    }

    #[test]
    fn play_while_loading_starts_once_ready() {
        let mut h = Harness::new();
        h.engine.load_track(local("t4")).unwrap();
        h.engine.play();
        assert_eq!(h.engine.phase(), &PlaybackPhase::Loading("t4".into()));
        assert!(h.engine.state().is_playing);
        assert_eq!(h.device.stats().play_calls, 0);

        h.run(5);
        assert_eq!(h.engine.phase(), &playing("t4"));
        assert_eq!(h.device.stats().play_calls, 1);
        assert!(h.log().frames().count() > 0);
    }

    #[test]
    fn volume_persists_across_replaced_instances() {
        let mut h = Harness::with_device(SimulatedDevice::with_swap_mode(SwapMode::ReplaceInstance));
        h.engine.set_volume(0.35);
        h.engine.set_muted(true);
        h.engine.load_track(local("a")).unwrap();
        let first = h.engine.controller().resource_id().unwrap();
        h.engine.load_track(local("b")).unwrap();
        let second = h.engine.controller().resource_id().unwrap();

        assert_ne!(first, second);
        assert_eq!(h.device.volume_of(second), Some(0.35));
        assert_eq!(h.device.muted_of(second), Some(true));
        assert_eq!(h.engine.state().volume, 0.35);
    }

    #[test]
    fn volume_is_clamped_and_applied_live() {
        let mut h = Harness::new();
        h.engine.load_track(local("a")).unwrap();
        let id = h.engine.controller().resource_id().unwrap();

        h.engine.set_volume(1.7);
        assert_eq!(h.device.volume_of(id), Some(1.0));
        h.engine.set_volume(f32::NAN);
        assert_eq!(h.engine.state().volume, 1.0);
    }

    #[test]
    fn tap_attaches_once_and_reads_once_per_tick() {
        let mut h = Harness::new();
        h.engine.play();
        h.engine.load_track(local("a")).unwrap();
        h.run(5);
        h.engine.load_track(local("b")).unwrap();
        h.run(5);

        assert_eq!(h.engine.phase(), &playing("b"));
        assert!(h.engine.tap_connection().is_attached());
        assert_eq!(h.device.stats().tap_connections, 1);

        let reads = h.device.stats().tap_reads;
        let frames = h.log().frames().count();
        h.run(10);
        assert_eq!(h.device.stats().tap_reads - reads, 10);
        assert_eq!(h.log().frames().count() - frames, 10);
    }

    #[test]
    fn replaced_instance_gets_a_fresh_tap() {
        let mut h = Harness::with_device(SimulatedDevice::with_swap_mode(SwapMode::ReplaceInstance));
        h.engine.load_track(local("a")).unwrap();
        h.run(5);
        h.engine.load_track(local("b")).unwrap();
        h.run(5);

        let id = h.engine.controller().resource_id().unwrap();
        assert!(h.engine.tap_connection().is_attached_to(id));
        assert_eq!(h.device.stats().tap_connections, 2);
    }

    #[test]
    fn remote_track_plays_without_tap_and_reports_silence() {
        let mut h = Harness::new();
        h.engine.load_track(remote("r")).unwrap();
        h.engine.play();
        h.run(5);

        assert_eq!(h.engine.phase(), &playing("r"));
        assert!(!h.engine.tap_connection().is_attached());
        assert_eq!(h.device.stats().tap_connections, 0);
        assert_eq!(h.device.stats().tap_reads, 0);
        assert!(h.log().frames().count() > 0);
        assert!(h.log().frames().all(|frame| *frame == AnalysisFrame::default()));
    }

    #[test]
    fn remote_track_on_tapped_instance_is_not_read() {
        let mut h = Harness::new();
        h.engine.play();
        h.engine.load_track(local("l")).unwrap();
        h.run(5);
        h.engine.load_track(remote("r")).unwrap();
        h.run(3);
        let reads = h.device.stats().tap_reads;
        h.run(5);

        assert_eq!(h.engine.phase(), &playing("r"));
        assert_eq!(h.device.stats().tap_reads, reads);
    }

    #[test]
    fn pause_stops_analysis_and_play_resumes() {
        let mut h = Harness::new();
        h.engine.load_track(local("a")).unwrap();
        h.engine.play();
        h.run(5);

        h.engine.pause();
        assert_eq!(h.engine.phase(), &PlaybackPhase::Paused("a".into()));
        assert!(!h.engine.is_analysing());
        let frames = h.log().frames().count();
        h.run(5);
        assert_eq!(h.log().frames().count(), frames);

        h.engine.play();
        assert_eq!(h.engine.phase(), &playing("a"));
        h.run(1);
        assert_eq!(h.log().frames().count(), frames + 1);
    }

    #[test]
    fn rejected_play_keeps_intent_for_a_later_retry() {
        let mut h = Harness::new();
        h.device.reject_play(true);
        h.engine.load_track(local("a")).unwrap();
        h.engine.play();
        h.run(5);

        assert_eq!(h.errors(), vec![PLAYBACK_REJECTED_MESSAGE.to_string()]);
        assert_eq!(h.engine.phase(), &PlaybackPhase::Ready("a".into()));
        assert!(h.engine.state().is_playing);

        h.device.reject_play(false);
        h.engine.play();
        assert_eq!(h.engine.phase(), &playing("a"));
    }

    #[test]
    fn ended_waits_for_an_explicit_command() {
        let mut h = Harness::new();
        h.device.set_duration("/music/short.mp3", 0.5);
        h.engine.load_track(local("short")).unwrap();
        h.engine.play();
        h.run(60);

        assert_eq!(h.log().count(|event| *event == EngineEvent::Ended), 1);
        assert!(h.engine.state().ended);
        assert!(!h.engine.is_analysing());
        assert_eq!(h.engine.phase(), &playing("short"));
        assert_eq!(h.engine.state().loading_track_id, Some("short".into()));

        h.engine.pause();
        assert_eq!(h.engine.phase(), &PlaybackPhase::Paused("short".into()));
        h.engine.play();
        assert!(!h.engine.state().ended);
        assert!(h.engine.is_analysing());
    }

    #[test]
    fn play_after_seeking_an_ended_track_restarts_it() {
        let mut h = Harness::new();
        h.device.set_duration("/music/short.mp3", 0.5);
        h.engine.load_track(local("short")).unwrap();
        h.engine.play();
        h.run(60);
        assert!(h.engine.state().ended);

        h.engine.seek(0.1);
        assert!(!h.engine.state().ended);
        h.engine.play();

        let id = h.engine.controller().resource_id().unwrap();
        assert_eq!(h.engine.phase(), &playing("short"));
        assert!(h.device.is_playing(id));
        assert!(h.engine.is_analysing());

        let frames = h.log().frames().count();
        h.run(1);
        assert_eq!(h.log().frames().count(), frames + 1);
    }

    #[test]
    fn play_while_running_does_not_restart() {
        let mut h = Harness::new();
        h.engine.load_track(local("a")).unwrap();
        h.engine.play();
        h.run(5);
        let calls = h.device.stats().play_calls;

        h.engine.play();
        assert_eq!(h.device.stats().play_calls, calls);
    }

    #[test]
    fn seek_before_ready_is_applied_on_ready() {
        let mut h = Harness::new();
        h.engine.load_track(local("a")).unwrap();
        h.engine.seek(42.0);
        h.run(5);

        let id = h.engine.controller().resource_id().unwrap();
        assert_eq!(h.device.position_of(id), Some(42.0));

        h.engine.seek(-5.0);
        assert_eq!(h.device.position_of(id), Some(0.0));
        assert_eq!(h.engine.state().position_seconds, 0.0);
    }

    #[test]
    fn empty_source_is_silently_ignored() {
        let mut h = Harness::new();
        h.engine.load_track(TrackDescriptor::new("placeholder", "")).unwrap();
        h.run(60);

        assert!(h.errors().is_empty());
        assert_eq!(h.device.stats().load_calls, 1);
        assert_eq!(h.engine.phase(), &PlaybackPhase::Loading("placeholder".into()));
    }

    #[test]
    fn switching_mid_retry_does_not_reload_the_new_track_early() {
        let mut h = Harness::new();
        h.device.fail_source("/music/flaky.mp3");
        h.engine.load_track(local("flaky")).unwrap();
        h.run(5);
        assert!(h.engine.controller().has_pending_retry());

        h.engine.load_track(local("next")).unwrap();
        h.run(60);

        assert_eq!(h.device.stats().load_calls, 2);
        assert!(h.errors().is_empty());
        assert_eq!(h.engine.phase(), &PlaybackPhase::Ready("next".into()));
    }

    #[test]
    fn shutdown_releases_everything() {
        let mut h = Harness::new();
        h.engine.set_volume(0.5);
        h.engine.load_track(local("a")).unwrap();
        h.engine.play();
        h.run(5);
        let id = h.engine.controller().resource_id().unwrap();

        h.engine.shutdown();
        assert_eq!(h.engine.phase(), &PlaybackPhase::Idle);
        assert!(!h.engine.is_analysing());
        assert!(!h.engine.tap_connection().is_attached());
        assert!(h.device.is_released(id));
        assert_eq!(h.engine.state().volume, 0.5);

        let frames = h.log().frames().count();
        h.run(5);
        assert_eq!(h.log().frames().count(), frames);

        h.engine.load_track(local("b")).unwrap();
        h.engine.play();
        h.run(5);
        assert_eq!(h.engine.phase(), &playing("b"));
        assert!(h.log().frames().count() > frames);
    }

    #[test]
    fn closures_can_act_as_sinks() {
        let device = SimulatedDevice::new();
        let mut seen = Vec::new();
        {
            let mut engine = PlaybackSynchronizer::new(
                &AppConfig::default(),
                Box::new(device.factory()),
                |event: EngineEvent| seen.push(event),
            )
            .unwrap();
            engine.load_track(local("a")).unwrap();
            for (ticket, event) in device.advance(Duration::from_secs(1)) {
                engine.handle_resource_event(&ticket, event);
            }
        }
        assert!(seen.contains(&EngineEvent::Ready));
    }

    #[test]
    fn events_serialize_with_a_tag() {
        let json = serde_json::to_string(&EngineEvent::TimeUpdate { seconds: 1.5 }).unwrap();
        assert_eq!(json, r#"{"event":"time_update","seconds":1.5}"#);
    }
}
