use std::{
    cell::RefCell,
    collections::{HashMap, HashSet},
    f32::consts::PI,
    rc::Rc,
    time::Duration,
};

use crate::{
    resource::{
        LoadFailure, LoadTicket, PlaybackResource, ResourceEvent, ResourceFactory, ResourceId,
    },
    EngineError, Result,
};

const SAMPLE_RATE: f32 = 48_000.0;
const TIME_UPDATE_INTERVAL: Duration = Duration::from_millis(250);

/// How the simulated platform handles a new source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwapMode {
    /// One instance is reused and only its source changes.
    InPlace,
    /// Every track needs a fresh instance.
    ReplaceInstance,
}

/// Call counters, useful for asserting on engine behaviour.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeviceStats {
    pub resources_created: usize,
    pub load_calls: usize,
    pub play_calls: usize,
    pub tap_connections: usize,
    pub tap_reads: usize,
}

#[derive(Debug)]
struct InstanceState {
    source: Option<String>,
    ticket: Option<LoadTicket>,
    analysis_permitted: bool,
    loaded: bool,
    playing: bool,
    position: f64,
    duration: f64,
    since_time_update: Duration,
    volume: f32,
    muted: bool,
    tap_connected: bool,
    released: bool,
}

impl InstanceState {
    fn new() -> Self {
        Self {
            source: None,
            ticket: None,
            analysis_permitted: false,
            loaded: false,
            playing: false,
            position: 0.0,
            duration: 0.0,
            since_time_update: Duration::ZERO,
            volume: 1.0,
            muted: false,
            tap_connected: false,
            released: false,
        }
    }

    fn effective_volume(&self) -> f32 {
        if self.muted {
            0.0
        } else {
            self.volume
        }
    }
}

#[derive(Debug)]
struct Scheduled {
    due: Duration,
    ticket: LoadTicket,
    event: ResourceEvent,
}

#[derive(Debug)]
struct DeviceState {
    swap_mode: SwapMode,
    instances: Vec<InstanceState>,
    failing_sources: HashSet<String>,
    durations: HashMap<String, f64>,
    default_duration: f64,
    reject_play: bool,
    load_latency: Duration,
    outbox: Vec<Scheduled>,
    now: Duration,
    stats: DeviceStats,
}

impl DeviceState {
    fn instance(&self, id: ResourceId) -> Option<&InstanceState> {
        self.instances.get(id.0 as usize)
    }

    fn instance_mut(&mut self, id: ResourceId) -> Option<&mut InstanceState> {
        self.instances.get_mut(id.0 as usize)
    }

    fn schedule(&mut self, ticket: LoadTicket, event: ResourceEvent) {
        let due = self.now + self.load_latency;
        self.outbox.push(Scheduled { due, ticket, event });
    }
}

/// Shared handle to the simulated platform. Clones refer to the same device.
#[derive(Debug, Clone)]
pub struct SimulatedDevice {
    inner: Rc<RefCell<DeviceState>>,
}

impl Default for SimulatedDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedDevice {
    pub fn new() -> Self {
        Self::with_swap_mode(SwapMode::InPlace)
    }

    pub fn with_swap_mode(swap_mode: SwapMode) -> Self {
        Self {
            inner: Rc::new(RefCell::new(DeviceState {
                swap_mode,
                instances: Vec::new(),
                failing_sources: HashSet::new(),
                durations: HashMap::new(),
                default_duration: 180.0,
                reject_play: false,
                load_latency: Duration::from_millis(50),
                outbox: Vec::new(),
                now: Duration::ZERO,
                stats: DeviceStats::default(),
            })),
        }
    }

    pub fn factory(&self) -> SimulatedFactory {
        SimulatedFactory {
            device: self.clone(),
        }
    }

    /// Every load of `source` fails with a network error.
    pub fn fail_source(&self, source: impl Into<String>) {
        self.inner.borrow_mut().failing_sources.insert(source.into());
    }

    pub fn set_duration(&self, source: impl Into<String>, seconds: f64) {
        self.inner.borrow_mut().durations.insert(source.into(), seconds);
    }

    pub fn set_default_duration(&self, seconds: f64) {
        self.inner.borrow_mut().default_duration = seconds;
    }

    pub fn set_load_latency(&self, latency: Duration) {
        self.inner.borrow_mut().load_latency = latency;
    }

    /// Makes `play` fail the way a browser does before any user gesture.
    pub fn reject_play(&self, reject: bool) {
        self.inner.borrow_mut().reject_play = reject;
    }

    pub fn stats(&self) -> DeviceStats {
        self.inner.borrow().stats
    }

    pub fn now(&self) -> Duration {
        self.inner.borrow().now
    }

    /// Moves the device clock to `now`, advancing playing instances, and
    /// returns every event that became due, oldest first.
    pub fn advance(&self, now: Duration) -> Vec<(LoadTicket, ResourceEvent)> {
        let mut state = self.inner.borrow_mut();
        let elapsed = now.saturating_sub(state.now);
        state.now = state.now.max(now);

        let mut events = Vec::new();
        for instance in state.instances.iter_mut() {
            if !instance.playing || instance.released {
                continue;
            }
            let Some(ticket) = instance.ticket.clone() else {
                continue;
            };
            instance.position = (instance.position + elapsed.as_secs_f64()).min(instance.duration);
            instance.since_time_update += elapsed;
            if instance.since_time_update >= TIME_UPDATE_INTERVAL {
                instance.since_time_update = Duration::ZERO;
                events.push((
                    ticket.clone(),
                    ResourceEvent::TimeUpdate {
                        position_seconds: instance.position,
                    },
                ));
            }
            if instance.position >= instance.duration {
                instance.playing = false;
                events.push((ticket, ResourceEvent::Ended));
            }
        }

        let current = state.now;
        let mut due = Vec::new();
        let mut index = 0;
        while index < state.outbox.len() {
            if state.outbox[index].due <= current {
                due.push(state.outbox.remove(index));
            } else {
                index += 1;
            }
        }
        due.sort_by_key(|scheduled| scheduled.due);
        events.extend(due.into_iter().map(|scheduled| (scheduled.ticket, scheduled.event)));
        events
    }

    pub fn source_of(&self, id: ResourceId) -> Option<String> {
        self.inner.borrow().instance(id)?.source.clone()
    }

    pub fn position_of(&self, id: ResourceId) -> Option<f64> {
        self.inner.borrow().instance(id).map(|instance| instance.position)
    }

    pub fn volume_of(&self, id: ResourceId) -> Option<f32> {
        self.inner.borrow().instance(id).map(|instance| instance.volume)
    }

    pub fn muted_of(&self, id: ResourceId) -> Option<bool> {
        self.inner.borrow().instance(id).map(|instance| instance.muted)
    }

    pub fn is_playing(&self, id: ResourceId) -> bool {
        self.inner
            .borrow()
            .instance(id)
            .map(|instance| instance.playing)
            .unwrap_or(false)
    }

    pub fn is_tap_connected(&self, id: ResourceId) -> bool {
        self.inner
            .borrow()
            .instance(id)
            .map(|instance| instance.tap_connected)
            .unwrap_or(false)
    }

    pub fn is_released(&self, id: ResourceId) -> bool {
        self.inner
            .borrow()
            .instance(id)
            .map(|instance| instance.released)
            .unwrap_or(false)
    }

    fn create_resource(&self) -> SimulatedResource {
        let mut state = self.inner.borrow_mut();
        let id = ResourceId(state.instances.len() as u64);
        state.instances.push(InstanceState::new());
        state.stats.resources_created += 1;
        SimulatedResource {
            id,
            device: self.inner.clone(),
        }
    }
}

/// [`ResourceFactory`] handing out resources of one [`SimulatedDevice`].
#[derive(Debug, Clone)]
pub struct SimulatedFactory {
    device: SimulatedDevice,
}

impl ResourceFactory for SimulatedFactory {
    fn create(&mut self) -> Result<Box<dyn PlaybackResource>> {
        Ok(Box::new(self.device.create_resource()))
    }
}

/// One simulated output instance.
#[derive(Debug)]
pub struct SimulatedResource {
    id: ResourceId,
    device: Rc<RefCell<DeviceState>>,
}

impl SimulatedResource {
    fn with_instance<T>(&self, f: impl FnOnce(&mut InstanceState) -> T) -> Option<T> {
        let mut state = self.device.borrow_mut();
        state.instance_mut(self.id).map(f)
    }
}

impl PlaybackResource for SimulatedResource {
    fn id(&self) -> ResourceId {
        self.id
    }

    fn set_source(&mut self, source: &str, ticket: LoadTicket) {
        self.with_instance(|instance| {
            instance.source = Some(source.to_string());
            instance.ticket = Some(ticket);
            instance.loaded = false;
            instance.playing = false;
            instance.position = 0.0;
            instance.since_time_update = Duration::ZERO;
        });
    }

    fn set_analysis_permitted(&mut self, permitted: bool) {
        self.with_instance(|instance| instance.analysis_permitted = permitted);
    }

    fn load(&mut self) {
        let mut state = self.device.borrow_mut();
        state.stats.load_calls += 1;
        let Some(instance) = state.instance(self.id) else {
            return;
        };
        let (Some(ticket), source) = (instance.ticket.clone(), instance.source.clone()) else {
            return;
        };
        let source = source.unwrap_or_default();

        if source.trim().is_empty() {
            state.schedule(ticket, ResourceEvent::Error(LoadFailure::empty_source()));
        } else if state.failing_sources.contains(&source) {
            let failure = LoadFailure::network(format!("could not fetch {source}"));
            state.schedule(ticket, ResourceEvent::Error(failure));
        } else {
            let duration = state
                .durations
                .get(&source)
                .copied()
                .unwrap_or(state.default_duration);
            if let Some(instance) = state.instance_mut(self.id) {
                instance.duration = duration;
                instance.loaded = true;
            }
            state.schedule(
                ticket.clone(),
                ResourceEvent::MetadataLoaded {
                    duration_seconds: duration,
                },
            );
            state.schedule(ticket, ResourceEvent::CanPlay);
        }
    }

    fn play(&mut self) -> Result<()> {
        let mut state = self.device.borrow_mut();
        state.stats.play_calls += 1;
        if state.reject_play {
            return Err(EngineError::PlaybackRejected(
                "play() requires a user gesture".to_string(),
            ));
        }
        if let Some(instance) = state.instance_mut(self.id) {
            if instance.position >= instance.duration {
                instance.position = 0.0;
            }
            instance.playing = instance.loaded;
        }
        Ok(())
    }

    fn pause(&mut self) {
        self.with_instance(|instance| instance.playing = false);
    }

    fn stop(&mut self) {
        self.with_instance(|instance| {
            instance.playing = false;
            instance.position = 0.0;
        });
    }

    fn seek(&mut self, seconds: f64) {
        self.with_instance(|instance| {
            instance.position = seconds.clamp(0.0, instance.duration.max(0.0));
        });
    }

    fn set_volume(&mut self, volume: f32) {
        self.with_instance(|instance| instance.volume = volume);
    }

    fn set_muted(&mut self, muted: bool) {
        self.with_instance(|instance| instance.muted = muted);
    }

    fn connect_tap(&mut self) -> Result<()> {
        let mut state = self.device.borrow_mut();
        state.stats.tap_connections += 1;
        let instance = state
            .instance_mut(self.id)
            .ok_or_else(|| EngineError::msg("resource no longer exists"))?;
        if instance.tap_connected {
            return Err(EngineError::msg("resource is already connected to a tap"));
        }
        if !instance.analysis_permitted {
            return Err(EngineError::msg("cross-origin source cannot be analysed"));
        }
        instance.tap_connected = true;
        Ok(())
    }

    fn read_time_domain(&mut self, out: &mut [f32]) -> usize {
        let mut state = self.device.borrow_mut();
        state.stats.tap_reads += 1;
        let Some(instance) = state.instance(self.id) else {
            out.fill(0.0);
            return out.len();
        };
        let audible = instance.tap_connected && instance.playing && instance.analysis_permitted;
        if !audible {
            out.fill(0.0);
            return out.len();
        }

        let base = tone_for(instance.source.as_deref().unwrap_or_default());
        let amplitude = 0.4 * instance.effective_volume();
        let start = (instance.position * f64::from(SAMPLE_RATE)) as usize;
        for (offset, sample) in out.iter_mut().enumerate() {
            let t = (start + offset) as f32 / SAMPLE_RATE;
            let fundamental = (2.0 * PI * base * t).sin();
            let overtone = 0.5 * (2.0 * PI * base * 3.0 * t).sin();
            *sample = amplitude * (fundamental + overtone) / 1.5;
        }
        out.len()
    }

    fn supports_source_swap(&self) -> bool {
        self.device.borrow().swap_mode == SwapMode::InPlace
    }

    fn release(&mut self) {
        self.with_instance(|instance| {
            instance.released = true;
            instance.playing = false;
            instance.tap_connected = false;
        });
    }
}

/// Picks a stable fundamental between 55 Hz and 880 Hz for a locator.
fn tone_for(source: &str) -> f32 {
    let hash = source
        .bytes()
        .fold(0u32, |acc, byte| acc.wrapping_mul(31).wrapping_add(u32::from(byte)));
    55.0 * 2f32.powi((hash % 5) as i32)
}
