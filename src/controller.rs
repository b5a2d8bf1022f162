//! Metronome controller: the single serial context that owns all mutable
//! application state.
//!
//! UI intents, decoded peer commands and scheduler beat events are all
//! funnelled into one task ([`Metronome::run`]), so no state here needs a
//! lock. The scheduler and sync coordinator are the only things that act on
//! their own time.

use std::sync::Arc;
use std::time::Instant;

use futures::stream::{self, BoxStream, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::runtime::Handle;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::{BroadcastStream, UnboundedReceiverStream};

use crate::audio::{AudioSink, SoundLibrary, SoundRole};
use crate::clock::{HardwareClock, WallClock};
use crate::config::AppConfig;
use crate::error::{log_audio_error, log_protocol_error, log_transport_error};
use crate::managers::BroadcastChannelManager;
use crate::net::{PeerEvent, PeerTransport};
use crate::protocol::{pick_start_time, Action, Inbound, Role, RoleCoordinator, SyncCommand};
use crate::scheduler::{BeatEvent, TransportScheduler};
use crate::sync::{StartPlan, SyncCoordinator, SyncEvent};
use crate::telemetry::{self, CommandDirection, DiagnosticError};
use crate::tempo::{
    CueBoard, CueId, Denominator, TapTempoEstimator, TempoChange, TempoCue, TempoRange, TimeSignature,
};

/// Everything a display needs to render the metronome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetronomeState {
    pub playing: bool,
    /// Quarter-note tempo as chosen by the user
    pub bpm: f64,
    /// Tick rate after the denominator is applied
    pub effective_bpm: f64,
    pub numerator: u32,
    pub denominator: u32,
    pub accents: Vec<u32>,
    pub current_beat: u32,
    pub pending_bpm: Option<f64>,
    pub queued_cue: Option<CueId>,
    pub queue_cues: bool,
    pub cues: Vec<TempoCue>,
    pub role: Role,
    pub peers: Vec<String>,
    pub sound: Option<String>,
    pub hi_volume: f32,
    pub lo_volume: f32,
}

/// User actions accepted by the controller loop.
#[derive(Debug, Clone, PartialEq)]
pub enum Intent {
    TogglePlay,
    SetBpm(f64),
    TriggerCue(CueId),
    AddCue { label: String, bpm: f64 },
    UpdateCue { id: CueId, label: String, bpm: f64 },
    RemoveCue(CueId),
    SetQueueCues(bool),
    Tap(Instant),
    SetTimeSignature {
        numerator: Option<u32>,
        denominator: Option<u32>,
    },
    ToggleAccent(u32),
    SetRole(Role),
    SelectSound(String),
    SetVolume { role: SoundRole, level: f32 },
    ResetVolume,
    Shutdown,
}

/// Cloneable sender side of a running controller.
#[derive(Clone)]
pub struct MetronomeHandle {
    intents: mpsc::UnboundedSender<Intent>,
    channels: Arc<BroadcastChannelManager>,
}

impl MetronomeHandle {
    /// Queues an intent. Returns false once the controller has shut down.
    pub fn send(&self, intent: Intent) -> bool {
        self.intents.send(intent).is_ok()
    }

    pub fn toggle_play(&self) -> bool {
        self.send(Intent::TogglePlay)
    }

    pub fn set_bpm(&self, bpm: f64) -> bool {
        self.send(Intent::SetBpm(bpm))
    }

    pub fn tap(&self) -> bool {
        self.send(Intent::Tap(Instant::now()))
    }

    pub fn shutdown(&self) -> bool {
        self.send(Intent::Shutdown)
    }

    pub fn subscribe_beats(&self) -> Option<tokio::sync::broadcast::Receiver<BeatEvent>> {
        self.channels.subscribe_beats()
    }

    pub fn subscribe_state(&self) -> Option<tokio::sync::broadcast::Receiver<MetronomeState>> {
        self.channels.subscribe_state()
    }

    // ========================================================================
    // ASYNC STREAM ADAPTERS
    // ========================================================================

    /// Beats as a stream; a lagging consumer silently skips what it missed.
    pub fn beat_stream(&self) -> BoxStream<'static, BeatEvent> {
        match self.channels.subscribe_beats() {
            Some(rx) => BroadcastStream::new(rx)
                .filter_map(|event| async move { event.ok() })
                .boxed(),
            None => stream::empty().boxed(),
        }
    }

    pub fn state_stream(&self) -> BoxStream<'static, MetronomeState> {
        match self.channels.subscribe_state() {
            Some(rx) => BroadcastStream::new(rx)
                .filter_map(|state| async move { state.ok() })
                .boxed(),
            None => stream::empty().boxed(),
        }
    }

    /// Telemetry from the global hub. Must be called inside a tokio runtime.
    pub fn telemetry_stream(&self) -> BoxStream<'static, telemetry::MetricEvent> {
        UnboundedReceiverStream::new(telemetry::hub().collector().subscribe_unbounded()).boxed()
    }
}

pub struct Metronome {
    config: AppConfig,
    scheduler: Arc<TransportScheduler>,
    sync: SyncCoordinator,
    sync_events: broadcast::Receiver<SyncEvent>,
    wall: Arc<dyn WallClock>,
    transport: Option<Arc<dyn PeerTransport>>,
    roles: RoleCoordinator,
    channels: Arc<BroadcastChannelManager>,

    range: TempoRange,
    bpm: f64,
    signature: TimeSignature,
    cues: CueBoard,
    queue_cues: bool,
    tap: TapTempoEstimator,

    sounds: SoundLibrary,
    sound: Option<String>,
    hi_volume: f32,
    lo_volume: f32,

    playing: bool,
    current_beat: u32,
}

impl Metronome {
    /// Builds a stopped metronome and returns the scheduler's beat receiver,
    /// which must be fed back through [`Metronome::handle_beat`] (or handed
    /// to [`Metronome::run`]).
    pub fn new(
        config: AppConfig,
        clock: Arc<dyn HardwareClock>,
        wall: Arc<dyn WallClock>,
        sink: Arc<dyn AudioSink>,
        sounds: SoundLibrary,
        runtime: Handle,
    ) -> (Self, mpsc::UnboundedReceiver<BeatEvent>) {
        let range = TempoRange::from(&config.tempo);
        let bpm = range.clamp(config.tempo.default_bpm).unwrap_or(120.0);
        let signature = TimeSignature::default();

        let (scheduler, beats) = TransportScheduler::new(
            clock,
            sink,
            config.scheduler.clone(),
            signature.effective_bpm(bpm),
            runtime.clone(),
        );
        let scheduler = Arc::new(scheduler);
        let sync = SyncCoordinator::new(
            Arc::clone(&scheduler),
            Arc::clone(&wall),
            config.sync.clone(),
            config.scheduler.poll_interval(),
            runtime,
        );

        let sync_events = sync.subscribe();

        let channels = Arc::new(BroadcastChannelManager::new());
        channels.init_beats();
        channels.init_state();

        let mut metronome = Self {
            tap: TapTempoEstimator::new(&config.tap),
            queue_cues: config.tempo.queue_cues,
            config,
            scheduler,
            sync,
            sync_events,
            wall,
            transport: None,
            roles: RoleCoordinator::new(),
            channels,
            range,
            bpm,
            signature,
            cues: CueBoard::default(),
            sounds,
            sound: None,
            hi_volume: 1.0,
            lo_volume: 1.0,
            playing: false,
            current_beat: 0,
        };

        if let Some(first) = metronome.sounds.names().into_iter().next() {
            metronome.select_sound(&first);
        }
        (metronome, beats)
    }

    /// Connects a peer transport. Its event receiver goes to [`Metronome::run`].
    pub fn attach_transport(&mut self, transport: Arc<dyn PeerTransport>) {
        tracing::info!(name = transport.local_name(), "peer transport attached");
        self.transport = Some(transport);
    }

    // ========================================================================
    // TRANSPORT INTENTS
    // ========================================================================

    /// Play/stop.
    ///
    /// Solo devices (and clients) start right away. A master with connected
    /// peers picks a shared start instant, broadcasts it and schedules its
    /// own start for the same instant.
    pub fn toggle_play(&mut self) -> Option<StartPlan> {
        if self.playing {
            self.stop_local();
            self.broadcast(SyncCommand::stop(Role::Master));
            return None;
        }

        if self.roles.can_originate() {
            let start_at = pick_start_time(self.wall.now_unix(), self.config.sync.start_margin_secs);
            match SyncCommand::start(Role::Master, start_at) {
                Ok(command) => self.broadcast(command),
                Err(err) => log_protocol_error(&err, "Metronome::toggle_play"),
            }
            let plan = self.sync.schedule_start(start_at);
            self.playing = true;
            self.publish_state();
            return Some(plan);
        }

        if self.scheduler.start_now().is_some() {
            self.playing = true;
        } else {
            tracing::warn!("hardware clock unavailable, play request ignored");
            telemetry::hub().record_error(DiagnosticError::ClockUnavailable, "toggle_play");
        }
        self.publish_state();
        None
    }

    fn stop_local(&mut self) {
        self.sync.cancel();
        self.cues.clear_pending();
        self.playing = false;
        self.current_beat = 0;
        self.publish_state();
    }

    // ========================================================================
    // TEMPO INTENTS
    // ========================================================================

    /// Sets the tempo immediately and (as master) tells the peers.
    pub fn set_bpm(&mut self, bpm: f64) -> bool {
        let Some(bpm) = self.apply_tempo(bpm) else {
            return false;
        };
        if let Ok(command) = SyncCommand::set_tempo(Role::Master, bpm) {
            self.broadcast(command);
        }
        true
    }

    /// Requests a cue's tempo; queued to the bar line while playing.
    pub fn trigger_cue(&mut self, id: CueId) -> Option<TempoChange> {
        let Some(cue) = self.cues.get(id) else {
            tracing::debug!(cue = id.0, "unknown tempo cue");
            return None;
        };
        let Some(bpm) = self.range.clamp(cue.bpm) else {
            return None;
        };

        let change = self.cues.request(bpm, Some(id), self.playing, self.queue_cues);
        if let TempoChange::Immediate(bpm) = change {
            self.apply_tempo(bpm);
        } else {
            tracing::debug!(cue = id.0, bpm, "tempo cue queued to bar line");
            self.publish_state();
        }
        if let Ok(command) = SyncCommand::cue_tempo(Role::Master, bpm) {
            self.broadcast(command);
        }
        Some(change)
    }

    pub fn add_cue(&mut self, label: impl Into<String>, bpm: f64) -> Option<CueId> {
        let bpm = self.range.clamp(bpm)?;
        let id = self.cues.add(label, bpm);
        self.publish_state();
        Some(id)
    }

    pub fn update_cue(&mut self, id: CueId, label: impl Into<String>, bpm: f64) -> bool {
        let Some(bpm) = self.range.clamp(bpm) else {
            return false;
        };
        let updated = self.cues.update(id, label, bpm);
        self.publish_state();
        updated
    }

    pub fn remove_cue(&mut self, id: CueId) -> bool {
        let removed = self.cues.remove(id);
        self.publish_state();
        removed
    }

    pub fn set_queue_cues(&mut self, enabled: bool) {
        self.queue_cues = enabled;
        self.publish_state();
    }

    /// Feeds one tap; a recognised tempo is applied like [`Metronome::set_bpm`].
    pub fn tap(&mut self, at: Instant) -> Option<f64> {
        let bpm = self.tap.record_tap(at)?;
        self.set_bpm(bpm);
        Some(self.bpm)
    }

    /// Clamps and applies a quarter-note tempo locally. Clears any queued cue.
    fn apply_tempo(&mut self, bpm: f64) -> Option<f64> {
        let Some(bpm) = self.range.clamp(bpm) else {
            tracing::warn!(bpm, "ignoring non-finite tempo");
            return None;
        };
        self.bpm = bpm;
        self.cues.clear_pending();
        self.scheduler.set_tempo(self.signature.effective_bpm(bpm));
        self.publish_state();
        Some(bpm)
    }

    // ========================================================================
    // TIME SIGNATURE & ACCENTS
    // ========================================================================

    /// Updates numerator and/or denominator. An unsupported denominator
    /// rejects the whole update. A running transport restarts from beat 0.
    pub fn update_time_signature(&mut self, numerator: Option<u32>, denominator: Option<u32>) -> bool {
        let mut signature = self.signature;
        if let Some(value) = denominator {
            let Some(denominator) = Denominator::from_value(value) else {
                tracing::warn!(denominator = value, "unsupported time signature denominator");
                return false;
            };
            signature = signature.with_denominator(denominator);
        }
        if let Some(numerator) = numerator {
            signature = signature.with_numerator(numerator, self.config.tempo.max_numerator);
        }

        self.signature = signature;
        self.cues.clear_pending();
        self.scheduler.set_tempo(signature.effective_bpm(self.bpm));
        self.scheduler.set_numerator(signature.numerator(), true);
        self.current_beat = 0;
        self.publish_state();
        true
    }

    pub fn toggle_accent(&mut self, beat: u32) -> bool {
        let toggled = self.scheduler.toggle_accent(beat);
        self.publish_state();
        toggled
    }

    // ========================================================================
    // SOUND & VOLUME
    // ========================================================================

    /// Loads the named sound pair into the sink. Unknown names are ignored.
    pub fn select_sound(&mut self, name: &str) -> bool {
        let Some(pair) = self.sounds.get(name).cloned() else {
            tracing::debug!(name, "unknown sound");
            return false;
        };
        let sink = self.scheduler.sink();
        for (role, identifier) in [(SoundRole::Hi, &pair.hi), (SoundRole::Lo, &pair.lo)] {
            if let Err(err) = sink.load_sample(role, identifier) {
                log_audio_error(&err, "Metronome::select_sound");
                telemetry::hub().record_error(DiagnosticError::SampleLoad, identifier.clone());
                return false;
            }
        }
        self.sound = Some(name.to_string());
        self.publish_state();
        true
    }

    pub fn set_volume(&mut self, role: SoundRole, level: f32) {
        let level = if level.is_finite() { level.clamp(0.0, 1.0) } else { 1.0 };
        match role {
            SoundRole::Hi => self.hi_volume = level,
            SoundRole::Lo => self.lo_volume = level,
        }
        self.scheduler.sink().set_volume(role, level);
        self.publish_state();
    }

    pub fn reset_volume(&mut self) {
        self.set_volume(SoundRole::Hi, 1.0);
        self.set_volume(SoundRole::Lo, 1.0);
    }

    // ========================================================================
    // NETWORK
    // ========================================================================

    pub fn set_role(&mut self, role: Role) {
        self.roles.set_role(role);
        tracing::info!(?role, "network role changed");
        self.announce_tempo();
        self.publish_state();
    }

    /// Applies a new peer list; a master with peers re-announces its tempo
    /// so late joiners start in step.
    pub fn peers_changed(&mut self, peers: Vec<String>) {
        if !self.roles.peers_changed(peers) {
            return;
        }
        let count = self.roles.peers().len();
        tracing::info!(count, "connected peers changed");
        telemetry::hub().record_peers(count);
        self.announce_tempo();
        self.publish_state();
    }

    pub fn handle_peer_event(&mut self, event: PeerEvent) {
        match event {
            PeerEvent::PeersChanged(peers) => self.peers_changed(peers),
            PeerEvent::Received { from, bytes } => {
                let command = match SyncCommand::decode(&bytes) {
                    Ok(command) => command,
                    Err(err) => {
                        log_protocol_error(&err, "Metronome::handle_peer_event");
                        telemetry::hub().record_error(DiagnosticError::DecodeFailed, from);
                        return;
                    }
                };

                let verdict = self.roles.accepts(&command);
                let followed = verdict == Inbound::Follow;
                telemetry::hub().record_command(command.action(), CommandDirection::Received, followed);
                if !followed {
                    tracing::debug!(%from, action = command.action().as_str(), ?verdict, "ignoring command");
                    return;
                }
                tracing::info!(%from, action = command.action().as_str(), "following command");
                self.follow(command);
            }
        }
    }

    fn follow(&mut self, command: SyncCommand) {
        match command.action() {
            Action::Start => {
                if let Some(start_at) = command.start_at_wall_clock() {
                    self.sync.schedule_start(start_at);
                    self.playing = true;
                    self.publish_state();
                }
            }
            Action::Stop => self.stop_local(),
            Action::SetTempo => {
                if let Some(bpm) = command.tempo() {
                    self.apply_tempo(bpm);
                }
            }
            Action::CueTempo => {
                if let Some(bpm) = command.tempo().and_then(|bpm| self.range.clamp(bpm)) {
                    if let TempoChange::Immediate(bpm) =
                        self.cues.request(bpm, None, self.playing, self.queue_cues)
                    {
                        self.apply_tempo(bpm);
                    } else {
                        self.publish_state();
                    }
                }
            }
        }
    }

    fn announce_tempo(&self) {
        if let Ok(command) = SyncCommand::set_tempo(Role::Master, self.bpm) {
            self.broadcast(command);
        }
    }

    /// Sends `command` to all peers when this device may originate.
    fn broadcast(&self, command: SyncCommand) {
        if !self.roles.can_originate() {
            return;
        }
        let Some(transport) = &self.transport else {
            return;
        };
        let bytes = match command.encode() {
            Ok(bytes) => bytes,
            Err(err) => {
                log_protocol_error(&err, "Metronome::broadcast");
                return;
            }
        };
        match transport.broadcast(&bytes) {
            Ok(delivered) => {
                tracing::debug!(action = command.action().as_str(), delivered, "command broadcast");
                telemetry::hub().record_command(command.action(), CommandDirection::Sent, true);
            }
            Err(err) => {
                log_transport_error(&err, "Metronome::broadcast");
                telemetry::hub().record_error(DiagnosticError::BroadcastFailed, command.action().as_str());
            }
        }
    }

    // ========================================================================
    // BEATS
    // ========================================================================

    /// Consumes one scheduler beat event. Events from superseded runs are
    /// dropped; the last beat of a bar releases a queued tempo.
    pub fn handle_beat(&mut self, event: BeatEvent) {
        if event.run_id != self.scheduler.run_id() {
            return;
        }
        self.current_beat = event.beat;
        if let Some(tx) = self.channels.get_beat_sender() {
            let _ = tx.send(event);
        }

        if event.reset {
            return;
        }
        if let Some(bpm) = self.cues.take_due(event.beat, self.signature.numerator()) {
            tracing::info!(bpm, "applying queued tempo at bar line");
            self.apply_tempo(bpm);
        }
    }

    /// A start this device committed to was dropped by the sync coordinator.
    /// Events for a start that has since been superseded are ignored.
    pub fn handle_sync_event(&mut self, event: SyncEvent) {
        match event {
            SyncEvent::Abandoned { token } => {
                if token != self.sync.token() || !self.playing {
                    return;
                }
                tracing::warn!(token = token.0, "synchronized start abandoned, back to stopped");
                self.cues.clear_pending();
                self.playing = false;
                self.current_beat = 0;
                self.publish_state();
            }
        }
    }

    /// Applies sync events queued since the last call. [`Metronome::run`]
    /// does this on its own.
    pub fn drain_sync_events(&mut self) {
        loop {
            match self.sync_events.try_recv() {
                Ok(event) => self.handle_sync_event(event),
                Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "sync events lagged");
                }
                Err(_) => break,
            }
        }
    }

    // ========================================================================
    // STATE
    // ========================================================================

    pub fn state(&self) -> MetronomeState {
        let pattern = self.scheduler.pattern();
        MetronomeState {
            playing: self.playing,
            bpm: self.bpm,
            effective_bpm: self.signature.effective_bpm(self.bpm),
            numerator: self.signature.numerator(),
            denominator: self.signature.denominator().value(),
            accents: pattern.accents().iter().copied().collect(),
            current_beat: self.current_beat,
            pending_bpm: self.cues.pending_bpm(),
            queued_cue: self.cues.queued_cue(),
            queue_cues: self.queue_cues,
            cues: self.cues.cues().to_vec(),
            role: self.roles.role(),
            peers: self.roles.peers().to_vec(),
            sound: self.sound.clone(),
            hi_volume: self.hi_volume,
            lo_volume: self.lo_volume,
        }
    }

    fn publish_state(&self) {
        if let Some(tx) = self.channels.get_state_sender() {
            let _ = tx.send(self.state());
        }
    }

    pub fn scheduler(&self) -> &Arc<TransportScheduler> {
        &self.scheduler
    }

    pub fn sync(&self) -> &SyncCoordinator {
        &self.sync
    }

    pub fn sound_names(&self) -> Vec<String> {
        self.sounds.names()
    }

    // ========================================================================
    // SERIAL LOOP
    // ========================================================================

    fn apply_intent(&mut self, intent: Intent) -> bool {
        match intent {
            Intent::TogglePlay => {
                self.toggle_play();
            }
            Intent::SetBpm(bpm) => {
                self.set_bpm(bpm);
            }
            Intent::TriggerCue(id) => {
                self.trigger_cue(id);
            }
            Intent::AddCue { label, bpm } => {
                self.add_cue(label, bpm);
            }
            Intent::UpdateCue { id, label, bpm } => {
                self.update_cue(id, label, bpm);
            }
            Intent::RemoveCue(id) => {
                self.remove_cue(id);
            }
            Intent::SetQueueCues(enabled) => self.set_queue_cues(enabled),
            Intent::Tap(at) => {
                self.tap(at);
            }
            Intent::SetTimeSignature {
                numerator,
                denominator,
            } => {
                self.update_time_signature(numerator, denominator);
            }
            Intent::ToggleAccent(beat) => {
                self.toggle_accent(beat);
            }
            Intent::SetRole(role) => self.set_role(role),
            Intent::SelectSound(name) => {
                self.select_sound(&name);
            }
            Intent::SetVolume { role, level } => self.set_volume(role, level),
            Intent::ResetVolume => self.reset_volume(),
            Intent::Shutdown => return false,
        }
        true
    }

    /// Runs the controller on its own task until [`Intent::Shutdown`] or
    /// until every handle is dropped. Returns the controller afterwards.
    pub fn spawn(
        self,
        runtime: &Handle,
        beats: mpsc::UnboundedReceiver<BeatEvent>,
        peer_events: Option<mpsc::UnboundedReceiver<PeerEvent>>,
    ) -> (MetronomeHandle, JoinHandle<Metronome>) {
        let (intent_tx, intent_rx) = mpsc::unbounded_channel();
        let handle = MetronomeHandle {
            intents: intent_tx,
            channels: Arc::clone(&self.channels),
        };
        let task = runtime.spawn(self.run(intent_rx, beats, peer_events));
        (handle, task)
    }

    pub async fn run(
        mut self,
        mut intents: mpsc::UnboundedReceiver<Intent>,
        mut beats: mpsc::UnboundedReceiver<BeatEvent>,
        mut peer_events: Option<mpsc::UnboundedReceiver<PeerEvent>>,
    ) -> Self {
        self.publish_state();
        let mut sync_events = std::mem::replace(&mut self.sync_events, self.sync.subscribe());
        loop {
            tokio::select! {
                intent = intents.recv() => match intent {
                    Some(intent) => {
                        if !self.apply_intent(intent) {
                            break;
                        }
                    }
                    None => break,
                },
                Some(event) = beats.recv() => self.handle_beat(event),
                Ok(event) = sync_events.recv() => self.handle_sync_event(event),
                event = next_peer_event(&mut peer_events) => match event {
                    Some(event) => self.handle_peer_event(event),
                    None => {
                        tracing::warn!("peer transport closed");
                        peer_events = None;
                    }
                },
            }
        }

        if self.playing {
            self.stop_local();
        }
        tracing::info!("metronome controller stopped");
        self
    }
}

async fn next_peer_event(rx: &mut Option<mpsc::UnboundedReceiver<PeerEvent>>) -> Option<PeerEvent> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests;
