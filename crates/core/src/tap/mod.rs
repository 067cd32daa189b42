use tracing::{debug, warn};

use crate::resource::{PlaybackResource, ResourceId};

/// Which resource instance, if any, the tap is wired into.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConnectionState {
    attached_to: Option<ResourceId>,
}

impl ConnectionState {
    pub fn is_attached(&self) -> bool {
        self.attached_to.is_some()
    }

    pub fn is_attached_to(&self, id: ResourceId) -> bool {
        self.attached_to == Some(id)
    }
}

/// Outcome of [`SignalTap::attach`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachOutcome {
    Attached,
    AlreadyAttached,
    /// The track's origin does not allow reading its signal.
    NotPermitted,
    /// The platform refused the connection; playback continues without
    /// analysis.
    Refused,
}

/// Duplicates the playback signal into the analysis path.
///
/// The tap connects to a resource instance at most once and pulls exactly one
/// window of samples per analysis tick into a buffer sized at construction.
#[derive(Debug)]
pub struct SignalTap {
    connection: ConnectionState,
    /// Instances that refused a connection are not asked again.
    refused: Option<ResourceId>,
    samples: Vec<f32>,
}

impl SignalTap {
    pub fn new(window: usize) -> Self {
        Self {
            connection: ConnectionState::default(),
            refused: None,
            samples: vec![0.0; window],
        }
    }

    pub fn connection(&self) -> ConnectionState {
        self.connection
    }

    /// Wires the tap into `resource` when `permitted`. Calling it again for
    /// the same instance has no effect. A different instance replaces the
    /// previous connection, since that connection died with its resource.
    pub fn attach(&mut self, resource: &mut dyn PlaybackResource, permitted: bool) -> AttachOutcome {
        let id = resource.id();
        if self.connection.is_attached_to(id) {
            return AttachOutcome::AlreadyAttached;
        }
        if self.connection.is_attached() {
            self.detach();
        }
        if !permitted {
            debug!(resource = %id, "analysis not permitted for this origin");
            return AttachOutcome::NotPermitted;
        }
        if self.refused == Some(id) {
            return AttachOutcome::Refused;
        }

        match resource.connect_tap() {
            Ok(()) => {
                self.connection.attached_to = Some(id);
                debug!(resource = %id, "signal tap attached");
                AttachOutcome::Attached
            }
            Err(err) => {
                self.refused = Some(id);
                warn!(resource = %id, error = %err, "could not attach signal tap");
                AttachOutcome::Refused
            }
        }
    }

    pub fn detach(&mut self) {
        if let Some(id) = self.connection.attached_to.take() {
            debug!(resource = %id, "signal tap detached");
        }
        self.refused = None;
    }

    /// Pulls the latest window from `resource`. Returns `None` when the tap
    /// is not wired into this instance.
    pub fn read(&mut self, resource: &mut dyn PlaybackResource) -> Option<&[f32]> {
        if !self.connection.is_attached_to(resource.id()) {
            return None;
        }
        let written = resource.read_time_domain(&mut self.samples).min(self.samples.len());
        self.samples[written..].fill(0.0);
        Some(&self.samples)
    }
}
