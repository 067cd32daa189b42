use std::{fmt, time::Duration};

use tracing::{debug, info, warn};

use crate::{
    catalog::{TrackDescriptor, TrackId},
    config::EngineConfig,
    resource::{LoadTicket, PlaybackResource, ResourceEvent, ResourceFactory, ResourceId},
    Result,
};

/// Message surfaced once every load attempt for a track has failed.
pub const LOAD_FAILED_MESSAGE: &str = "Failed to load audio file. Please try another track.";

/// Attempt bookkeeping for the active load.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetryState {
    pub attempt_count: u32,
}

/// Lifecycle notifications that survived ticket filtering and retry handling.
#[derive(Debug, Clone, PartialEq)]
pub enum Lifecycle {
    DurationKnown(f64),
    CanPlay,
    PositionChanged(f64),
    Ended,
    LoadError(String),
}

#[derive(Debug, Clone)]
struct PendingRetry {
    ticket: LoadTicket,
    due: Duration,
}

#[derive(Debug, Clone)]
struct PendingSeek {
    ticket: LoadTicket,
    seconds: f64,
}

/// Owns the single playback resource and mediates every interaction with it.
pub struct ResourceController {
    factory: Box<dyn ResourceFactory>,
    resource: Option<Box<dyn PlaybackResource>>,
    ticket: Option<LoadTicket>,
    generation: u64,
    loaded: bool,
    retry: RetryState,
    max_retries: u32,
    retry_backoff: Duration,
    pending_retry: Option<PendingRetry>,
    pending_seek: Option<PendingSeek>,
    volume: f32,
    muted: bool,
}

impl ResourceController {
    pub fn new(factory: Box<dyn ResourceFactory>, config: &EngineConfig) -> Self {
        Self {
            factory,
            resource: None,
            ticket: None,
            generation: 0,
            loaded: false,
            retry: RetryState::default(),
            max_retries: config.max_retries,
            retry_backoff: config.retry_backoff(),
            pending_retry: None,
            pending_seek: None,
            volume: config.default_volume.clamp(0.0, 1.0),
            muted: false,
        }
    }

    /// Points the resource at `track` and starts loading it. Any previous
    /// load, its retry timer and its queued seek are abandoned.
    pub fn assign_source(&mut self, track: &TrackDescriptor) -> Result<LoadTicket> {
        if let Some(resource) = self.resource.as_mut() {
            resource.stop();
        }
        let reusable = self
            .resource
            .as_ref()
            .map(|resource| resource.supports_source_swap())
            .unwrap_or(false);
        if !reusable {
            self.release();
            let resource = self.create_resource()?;
            self.resource = Some(resource);
        }

        self.generation += 1;
        let ticket = LoadTicket {
            track: track.id().clone(),
            generation: self.generation,
        };
        self.retry = RetryState::default();
        self.pending_retry = None;
        self.pending_seek = None;
        self.loaded = false;
        self.ticket = Some(ticket.clone());

        if let Some(resource) = self.resource.as_mut() {
            resource.set_analysis_permitted(track.analysis_permitted());
            resource.set_source(track.source(), ticket.clone());
            resource.load();
            info!(
                track = %track.id(),
                source = track.source(),
                local = track.is_local_origin(),
                resource = %resource.id(),
                "loading track"
            );
        }

        Ok(ticket)
    }

    /// Filters and interprets a raw resource event. Returns `None` for events
    /// that belong to another load or that were absorbed by the retry policy.
    pub fn handle_event(
        &mut self,
        ticket: &LoadTicket,
        event: ResourceEvent,
        now: Duration,
    ) -> Option<Lifecycle> {
        if self.ticket.as_ref() != Some(ticket) {
            debug!(%ticket, ?event, "discarding event for superseded load");
            return None;
        }

        match event {
            ResourceEvent::MetadataLoaded { duration_seconds } => {
                Some(Lifecycle::DurationKnown(duration_seconds))
            }
            ResourceEvent::CanPlay => {
                self.retry = RetryState::default();
                self.pending_retry = None;
                self.loaded = true;
                if let Some(seek) = self.pending_seek.take() {
                    if &seek.ticket == ticket {
                        if let Some(resource) = self.resource.as_mut() {
                            resource.seek(seek.seconds);
                        }
                    }
                }
                Some(Lifecycle::CanPlay)
            }
            ResourceEvent::TimeUpdate { position_seconds } => {
                Some(Lifecycle::PositionChanged(position_seconds))
            }
            ResourceEvent::Ended => Some(Lifecycle::Ended),
            ResourceEvent::Error(failure) if failure.is_empty_source() => {
                debug!(%ticket, "ignoring error for empty source");
                None
            }
            ResourceEvent::Error(failure)
                if matches!(&self.pending_retry, Some(retry) if &retry.ticket == ticket) =>
            {
                debug!(%ticket, reason = %failure.message, "reload already scheduled, ignoring error");
                None
            }
            ResourceEvent::Error(failure) => {
                if self.retry.attempt_count < self.max_retries {
                    self.retry.attempt_count += 1;
                    self.pending_retry = Some(PendingRetry {
                        ticket: ticket.clone(),
                        due: now + self.retry_backoff,
                    });
                    info!(
                        %ticket,
                        attempt = self.retry.attempt_count,
                        max_retries = self.max_retries,
                        reason = %failure.message,
                        "load failed, retrying"
                    );
                    None
                } else {
                    self.pending_retry = None;
                    warn!(%ticket, kind = ?failure.kind, reason = %failure.message, "giving up on track");
                    Some(Lifecycle::LoadError(LOAD_FAILED_MESSAGE.to_string()))
                }
            }
        }
    }

    /// Fires the retry timer once it is due. Timers belonging to a superseded
    /// load are dropped.
    pub fn poll_timers(&mut self, now: Duration) {
        let due = matches!(&self.pending_retry, Some(retry) if retry.due <= now);
        if !due {
            return;
        }
        let Some(retry) = self.pending_retry.take() else {
            return;
        };
        if self.ticket.as_ref() != Some(&retry.ticket) {
            debug!(ticket = %retry.ticket, "dropping retry timer for superseded load");
            return;
        }
        if let Some(resource) = self.resource.as_mut() {
            debug!(ticket = %retry.ticket, attempt = self.retry.attempt_count, "reloading");
            resource.load();
        }
    }

    /// Starts the resource. A no-op before any source has been assigned.
    pub fn play(&mut self) -> Result<()> {
        match (self.resource.as_mut(), self.ticket.as_ref()) {
            (Some(resource), Some(_)) => resource.play(),
            _ => {
                debug!("play requested with no source assigned");
                Ok(())
            }
        }
    }

    pub fn pause(&mut self) {
        if let (Some(resource), Some(_)) = (self.resource.as_mut(), self.ticket.as_ref()) {
            resource.pause();
        }
    }

    /// Seeks now if the resource is loaded, otherwise remembers the position
    /// for the current load only. Returns whether the seek was applied.
    pub fn seek(&mut self, seconds: f64) -> bool {
        let Some(ticket) = self.ticket.clone() else {
            return false;
        };
        match self.resource.as_mut() {
            Some(resource) if self.loaded => {
                resource.seek(seconds);
                true
            }
            _ => {
                self.pending_seek = Some(PendingSeek { ticket, seconds });
                false
            }
        }
    }

    pub fn set_volume(&mut self, volume: f32) {
        self.volume = volume.clamp(0.0, 1.0);
        if let Some(resource) = self.resource.as_mut() {
            resource.set_volume(self.volume);
        }
    }

    pub fn set_muted(&mut self, muted: bool) {
        self.muted = muted;
        if let Some(resource) = self.resource.as_mut() {
            resource.set_muted(muted);
        }
    }

    pub fn volume(&self) -> f32 {
        self.volume
    }

    pub fn is_muted(&self) -> bool {
        self.muted
    }

    pub fn retry_state(&self) -> RetryState {
        self.retry
    }

    pub fn has_pending_retry(&self) -> bool {
        self.pending_retry.is_some()
    }

    pub fn current_ticket(&self) -> Option<&LoadTicket> {
        self.ticket.as_ref()
    }

    pub fn current_track(&self) -> Option<&TrackId> {
        self.ticket.as_ref().map(|ticket| &ticket.track)
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    pub fn resource_id(&self) -> Option<ResourceId> {
        self.resource.as_ref().map(|resource| resource.id())
    }

    pub fn resource_mut(&mut self) -> Option<&mut (dyn PlaybackResource + 'static)> {
        self.resource.as_deref_mut()
    }

    /// Tears the resource down and cancels everything pending on it. Volume
    /// and mute stay cached for the next resource.
    pub fn release(&mut self) {
        self.release_resource();
        self.ticket = None;
        self.loaded = false;
        self.pending_retry = None;
        self.pending_seek = None;
        self.retry = RetryState::default();
    }

    fn create_resource(&mut self) -> Result<Box<dyn PlaybackResource>> {
        let mut resource = self.factory.create()?;
        resource.set_volume(self.volume);
        resource.set_muted(self.muted);
        debug!(resource = %resource.id(), volume = self.volume, muted = self.muted, "created playback resource");
        Ok(resource)
    }

    fn release_resource(&mut self) {
        if let Some(mut resource) = self.resource.take() {
            resource.stop();
            resource.release();
            debug!(resource = %resource.id(), "released playback resource");
        }
    }
}

impl Drop for ResourceController {
    fn drop(&mut self) {
        self.release_resource();
    }
}

impl fmt::Debug for ResourceController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceController")
            .field("resource", &self.resource_id())
            .field("ticket", &self.ticket)
            .field("loaded", &self.loaded)
            .field("retry", &self.retry)
            .field("pending_retry", &self.pending_retry)
            .field("volume", &self.volume)
            .field("muted", &self.muted)
            .finish()
    }
}
