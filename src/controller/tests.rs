use super::*;
use crate::audio::RecordingSink;
use crate::clock::{HostTime, ManualClock};
use crate::net::LoopbackMesh;
use crate::scheduler::RunId;
use std::time::Duration;

const WALL: f64 = 1_767_225_600.5;

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .unwrap()
}

struct Rig {
    metronome: Metronome,
    beats: mpsc::UnboundedReceiver<BeatEvent>,
    sink: Arc<RecordingSink>,
    clock: Arc<ManualClock>,
}

fn rig() -> Rig {
    let clock = Arc::new(ManualClock::new(HostTime(0), WALL));
    let sink = Arc::new(RecordingSink::new(clock.clone()));
    let sounds = SoundLibrary::from_identifiers(["Glass_hi", "Glass_lo", "Wood_hi", "Wood_lo"]);
    let (metronome, beats) = Metronome::new(
        AppConfig::default(),
        clock.clone(),
        clock.clone(),
        sink.clone(),
        sounds,
        Handle::current(),
    );
    Rig {
        metronome,
        beats,
        sink,
        clock,
    }
}

fn tick(run_id: RunId, beat_index: u64, numerator: u32) -> BeatEvent {
    BeatEvent {
        run_id,
        beat_index,
        beat: (beat_index % numerator as u64) as u32,
        accented: beat_index % numerator as u64 == 0,
        host_time: Some(HostTime(beat_index)),
        reset: false,
    }
}

fn cue_id(metronome: &Metronome, label: &str) -> CueId {
    metronome
        .state()
        .cues
        .iter()
        .find(|cue| cue.label == label)
        .map(|cue| cue.id)
        .unwrap()
}

#[test]
fn test_initial_state_uses_config_defaults() {
    runtime().block_on(async {
        let rig = rig();
        let state = rig.metronome.state();
        assert!(!state.playing);
        assert_eq!(state.bpm, 120.0);
        assert_eq!((state.numerator, state.denominator), (4, 4));
        assert_eq!(state.accents, vec![0]);
        assert_eq!(state.role, Role::None);
        assert_eq!(state.sound.as_deref(), Some("Glass"));
        assert_eq!(state.cues.len(), 4);
        assert_eq!(rig.sink.loaded_samples().len(), 2);
    });
}

#[test]
fn test_bpm_is_clamped_and_non_finite_ignored() {
    runtime().block_on(async {
        let mut rig = rig();
        assert!(rig.metronome.set_bpm(500.0));
        assert_eq!(rig.metronome.state().bpm, 300.0);
        assert!(rig.metronome.set_bpm(10.0));
        assert_eq!(rig.metronome.state().bpm, 40.0);

        assert!(!rig.metronome.set_bpm(f64::NAN));
        assert_eq!(rig.metronome.state().bpm, 40.0);
        assert_eq!(rig.metronome.scheduler().tempo(), 40.0);
    });
}

#[test]
fn test_denominator_rescales_tick_rate() {
    runtime().block_on(async {
        let mut rig = rig();
        assert!(rig.metronome.update_time_signature(None, Some(8)));
        assert_eq!(rig.metronome.scheduler().tempo(), 240.0);
        assert!(rig.metronome.update_time_signature(None, Some(2)));
        assert_eq!(rig.metronome.scheduler().tempo(), 60.0);

        assert!(!rig.metronome.update_time_signature(Some(3), Some(3)));
        let state = rig.metronome.state();
        assert_eq!((state.numerator, state.denominator), (4, 2));
        assert_eq!(state.effective_bpm, 60.0);
    });
}

#[test]
fn test_numerator_is_clamped_and_filters_accents() {
    runtime().block_on(async {
        let mut rig = rig();
        rig.metronome.update_time_signature(Some(7), None);
        rig.metronome.toggle_accent(5);
        rig.metronome.toggle_accent(0);
        assert_eq!(rig.metronome.state().accents, vec![5]);

        rig.metronome.update_time_signature(Some(40), None);
        assert_eq!(rig.metronome.state().numerator, 16);

        rig.metronome.update_time_signature(Some(3), None);
        let state = rig.metronome.state();
        assert_eq!(state.numerator, 3);
        assert_eq!(state.accents, vec![0]);
    });
}

#[test]
fn test_cue_while_stopped_applies_immediately() {
    runtime().block_on(async {
        let mut rig = rig();
        let fast = cue_id(&rig.metronome, "Fast");
        assert_eq!(rig.metronome.trigger_cue(fast), Some(TempoChange::Immediate(180.0)));
        assert_eq!(rig.metronome.state().bpm, 180.0);
    });
}

#[test]
fn test_queued_cue_applies_on_last_beat_of_bar() {
    runtime().block_on(async {
        let mut rig = rig();
        rig.metronome.toggle_play();
        assert!(rig.metronome.state().playing);
        let run = rig.metronome.scheduler().run_id();

        let slow = cue_id(&rig.metronome, "Slow");
        assert_eq!(rig.metronome.trigger_cue(slow), Some(TempoChange::Queued(90.0)));
        let state = rig.metronome.state();
        assert_eq!(state.bpm, 120.0);
        assert_eq!(state.pending_bpm, Some(90.0));
        assert_eq!(state.queued_cue, Some(slow));

        for index in 1..3 {
            rig.metronome.handle_beat(tick(run, index, 4));
            assert_eq!(rig.metronome.state().bpm, 120.0);
        }
        rig.metronome.handle_beat(tick(run, 3, 4));
        let state = rig.metronome.state();
        assert_eq!(state.bpm, 90.0);
        assert_eq!(state.pending_bpm, None);
        assert_eq!(state.queued_cue, None);
        assert_eq!(rig.metronome.scheduler().tempo(), 90.0);
    });
}

#[test]
fn test_reset_event_never_releases_queued_cue() {
    runtime().block_on(async {
        let mut rig = rig();
        rig.metronome.update_time_signature(Some(1), None);
        rig.metronome.toggle_play();
        let run = rig.metronome.scheduler().run_id();
        let mid = cue_id(&rig.metronome, "Mid");
        rig.metronome.trigger_cue(mid);

        rig.metronome.handle_beat(BeatEvent {
            run_id: run,
            beat_index: 0,
            beat: 0,
            accented: false,
            host_time: None,
            reset: true,
        });
        assert_eq!(rig.metronome.state().pending_bpm, Some(110.0));
    });
}

#[test]
fn test_queueing_disabled_applies_immediately_while_playing() {
    runtime().block_on(async {
        let mut rig = rig();
        rig.metronome.set_queue_cues(false);
        rig.metronome.toggle_play();
        let fast = cue_id(&rig.metronome, "Fast");
        assert_eq!(rig.metronome.trigger_cue(fast), Some(TempoChange::Immediate(180.0)));
    });
}

#[test]
fn test_unknown_cue_is_noop() {
    runtime().block_on(async {
        let mut rig = rig();
        assert_eq!(rig.metronome.trigger_cue(CueId(999)), None);
        assert_eq!(rig.metronome.state().bpm, 120.0);
    });
}

#[test]
fn test_stale_run_beats_are_dropped() {
    runtime().block_on(async {
        let mut rig = rig();
        rig.metronome.toggle_play();
        let old_run = rig.metronome.scheduler().run_id();
        rig.metronome.toggle_play();
        assert!(!rig.metronome.state().playing);

        rig.metronome.handle_beat(tick(old_run, 2, 4));
        assert_eq!(rig.metronome.state().current_beat, 0);
    });
}

#[test]
fn test_tap_tempo_sets_bpm() {
    runtime().block_on(async {
        let mut rig = rig();
        let t0 = Instant::now();
        assert_eq!(rig.metronome.tap(t0), None);
        let bpm = rig.metronome.tap(t0 + Duration::from_millis(500)).unwrap();
        assert!((bpm - 120.0).abs() < 1e-9);
        let bpm = rig.metronome.tap(t0 + Duration::from_millis(1250)).unwrap();
        // Mean of 0.5s and 0.75s
        assert!((bpm - 96.0).abs() < 1e-9);
        assert_eq!(rig.metronome.state().bpm, bpm);
    });
}

#[test]
fn test_sound_selection_and_volume() {
    runtime().block_on(async {
        let mut rig = rig();
        assert!(rig.metronome.select_sound("Wood"));
        let loaded = rig.sink.loaded_samples();
        assert!(loaded.contains(&(SoundRole::Hi, "Wood_hi".to_string())));
        assert!(loaded.contains(&(SoundRole::Lo, "Wood_lo".to_string())));

        assert!(!rig.metronome.select_sound("Cowbell"));
        assert_eq!(rig.metronome.state().sound.as_deref(), Some("Wood"));

        rig.metronome.set_volume(SoundRole::Hi, 1.7);
        rig.metronome.set_volume(SoundRole::Lo, 0.25);
        assert_eq!(rig.sink.volume(SoundRole::Hi), 1.0);
        assert_eq!(rig.sink.volume(SoundRole::Lo), 0.25);

        rig.metronome.reset_volume();
        assert_eq!(rig.metronome.state().lo_volume, 1.0);
    });
}

#[test]
fn test_client_follows_master_commands_only() {
    runtime().block_on(async {
        let mut rig = rig();
        rig.metronome.set_role(Role::Client);

        let from_master = SyncCommand::set_tempo(Role::Master, 90.0).unwrap();
        rig.metronome.handle_peer_event(PeerEvent::Received {
            from: "conductor".into(),
            bytes: from_master.encode().unwrap(),
        });
        assert_eq!(rig.metronome.state().bpm, 90.0);

        let from_client = SyncCommand::set_tempo(Role::Client, 150.0).unwrap();
        rig.metronome.handle_peer_event(PeerEvent::Received {
            from: "other".into(),
            bytes: from_client.encode().unwrap(),
        });
        assert_eq!(rig.metronome.state().bpm, 90.0);

        rig.metronome.handle_peer_event(PeerEvent::Received {
            from: "noise".into(),
            bytes: b"{\"action\":".to_vec(),
        });
        assert_eq!(rig.metronome.state().bpm, 90.0);
    });
}

#[test]
fn test_solo_device_ignores_remote_commands() {
    runtime().block_on(async {
        let mut rig = rig();
        let command = SyncCommand::set_tempo(Role::Master, 60.0).unwrap();
        rig.metronome.handle_peer_event(PeerEvent::Received {
            from: "conductor".into(),
            bytes: command.encode().unwrap(),
        });
        assert_eq!(rig.metronome.state().bpm, 120.0);
    });
}

#[test]
fn test_client_remote_start_and_stop() {
    runtime().block_on(async {
        let mut rig = rig();
        rig.metronome.set_role(Role::Client);

        let start = SyncCommand::start(Role::Master, WALL + 0.5).unwrap();
        rig.metronome.handle_peer_event(PeerEvent::Received {
            from: "conductor".into(),
            bytes: start.encode().unwrap(),
        });
        assert!(rig.metronome.state().playing);

        rig.metronome.handle_peer_event(PeerEvent::Received {
            from: "conductor".into(),
            bytes: SyncCommand::stop(Role::Master).encode().unwrap(),
        });
        assert!(!rig.metronome.state().playing);

        tokio::time::sleep(Duration::from_millis(650)).await;
        assert!(!rig.metronome.scheduler().is_running(), "stop must cancel the pending start");
    });
}

#[test]
fn test_master_broadcasts_start_and_tempo() {
    runtime().block_on(async {
        let mesh = LoopbackMesh::new();
        let (master_link, _master_events) = mesh.join("master");
        let (_listener, mut heard) = mesh.join("listener");

        let mut rig = rig();
        rig.metronome.attach_transport(Arc::new(master_link));
        rig.metronome.set_role(Role::Master);
        rig.metronome.peers_changed(vec!["listener".into()]);

        let mut commands = Vec::new();
        while let Ok(event) = heard.try_recv() {
            if let PeerEvent::Received { bytes, .. } = event {
                commands.push(SyncCommand::decode(&bytes).unwrap());
            }
        }
        assert_eq!(commands, vec![SyncCommand::set_tempo(Role::Master, 120.0).unwrap()]);

        let plan = rig.metronome.toggle_play().unwrap();
        assert_eq!(plan.start_at_wall_clock, WALL.ceil() + 1.0);

        let start = loop {
            match heard.try_recv() {
                Ok(PeerEvent::Received { bytes, .. }) => break SyncCommand::decode(&bytes).unwrap(),
                Ok(_) => continue,
                Err(err) => panic!("no start command: {err:?}"),
            }
        };
        assert_eq!(start.action(), Action::Start);
        assert_eq!(start.start_at_wall_clock(), Some(WALL.ceil() + 1.0));

        rig.metronome.toggle_play();
        match heard.try_recv() {
            Ok(PeerEvent::Received { bytes, .. }) => {
                assert_eq!(SyncCommand::decode(&bytes).unwrap().action(), Action::Stop)
            }
            other => panic!("expected stop, got {other:?}"),
        }
    });
}

#[test]
fn test_master_without_peers_starts_solo() {
    runtime().block_on(async {
        let mut rig = rig();
        rig.metronome.set_role(Role::Master);
        assert!(rig.metronome.toggle_play().is_none());
        assert!(rig.metronome.scheduler().is_running());
    });
}

#[test]
fn test_play_with_absent_clock_stays_stopped() {
    runtime().block_on(async {
        let mut rig = rig();
        rig.clock.set_available(false);
        rig.metronome.toggle_play();
        assert!(!rig.metronome.state().playing);
    });
}

#[test]
fn test_abandoned_remote_start_returns_to_stopped() {
    runtime().block_on(async {
        let mut rig = rig();
        rig.metronome.set_role(Role::Client);
        rig.clock.set_available(false);

        let start = SyncCommand::start(Role::Master, WALL - 1.0).unwrap();
        rig.metronome.handle_peer_event(PeerEvent::Received {
            from: "conductor".into(),
            bytes: start.encode().unwrap(),
        });
        assert!(rig.metronome.state().playing);

        // Default retry budget is 25 polls of 20ms
        tokio::time::sleep(Duration::from_millis(800)).await;
        rig.metronome.drain_sync_events();
        assert!(!rig.metronome.state().playing);
        assert!(!rig.metronome.scheduler().is_running());

        rig.clock.set_available(true);
        rig.metronome.toggle_play();
        assert!(rig.metronome.state().playing, "next toggle must start, not stop");
        assert!(rig.metronome.scheduler().is_running());
    });
}

#[test]
fn test_abandonment_of_superseded_start_is_ignored() {
    runtime().block_on(async {
        let mut rig = rig();
        rig.metronome.set_role(Role::Client);
        rig.clock.set_available(false);

        let stale = rig.metronome.sync().token();
        let start = SyncCommand::start(Role::Master, WALL + 0.5).unwrap();
        rig.metronome.handle_peer_event(PeerEvent::Received {
            from: "conductor".into(),
            bytes: start.encode().unwrap(),
        });

        rig.metronome.handle_sync_event(SyncEvent::Abandoned { token: stale });
        assert!(rig.metronome.state().playing);
        rig.metronome.sync().cancel();
    });
}

#[test]
fn test_run_loop_processes_intents_and_beats() {
    runtime().block_on(async {
        let rig = rig();
        let Rig {
            metronome,
            beats,
            sink,
            ..
        } = rig;

        let (handle, task) = metronome.spawn(&Handle::current(), beats, None);
        let mut beat_rx = handle.subscribe_beats().unwrap();

        assert!(handle.set_bpm(100.0));
        assert!(handle.toggle_play());

        let first_tick = loop {
            let event = tokio::time::timeout(Duration::from_secs(2), beat_rx.recv())
                .await
                .unwrap()
                .unwrap();
            if !event.reset {
                break event;
            }
        };
        assert_eq!(first_tick.beat, 0);
        assert!(first_tick.accented);
        tokio::time::sleep(Duration::from_millis(30)).await;

        assert!(handle.shutdown());
        let metronome = task.await.unwrap();
        assert_eq!(metronome.state().bpm, 100.0);
        assert!(!metronome.state().playing);
        assert!(!sink.triggers().is_empty());
    });
}
