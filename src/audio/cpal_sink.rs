//! CPAL-based audio sink for desktop platforms (Linux, macOS, Windows)
//!
//! Trigger tasks push click voices through a lock-free SPSC queue; the output
//! callback mixes them into the device buffer. The callback's frame counter
//! is the render timeline, so the sink doubles as the [`HardwareClock`]:
//! host ticks are output frames, extrapolated between callbacks.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::thread;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use rtrb::{Consumer, Producer, RingBuffer};

use crate::clock::{HardwareClock, HostTime, SystemHostClock};
use crate::error::{log_audio_error, AudioError};

use super::metronome::{generate_click_sample, seed_for_identifier};
use super::{AudioSink, SoundRole};

/// Maximum simultaneously sounding clicks
const MAX_VOICES: usize = 32;

struct Voice {
    samples: Arc<[f32]>,
    gain: f32,
    position: usize,
}

/// State shared between the control side and the output callback
struct OutputShared {
    /// Frames rendered as of the last callback
    frames_rendered: AtomicU64,
    /// Host-clock nanos when the last callback ran
    last_callback_nanos: AtomicU64,
    /// Highest host time handed out, keeps extrapolation monotonic
    last_reported: AtomicU64,
    rendering: AtomicBool,
    muted: AtomicBool,
    hi_gain: AtomicU32,
    lo_gain: AtomicU32,
}

impl OutputShared {
    fn gain(&self, role: SoundRole) -> f32 {
        let bits = match role {
            SoundRole::Hi => self.hi_gain.load(Ordering::Relaxed),
            SoundRole::Lo => self.lo_gain.load(Ordering::Relaxed),
        };
        f32::from_bits(bits)
    }
}

pub struct CpalSink {
    shared: Arc<OutputShared>,
    voices: Mutex<Producer<Voice>>,
    hi_click: Mutex<Arc<[f32]>>,
    lo_click: Mutex<Arc<[f32]>>,
    sample_rate: u32,
    nanos: SystemHostClock,
    shutdown: Mutex<Option<mpsc::Sender<()>>>,
}

impl CpalSink {
    /// Open the default output device and start rendering silence.
    ///
    /// The stream lives on a dedicated thread because `cpal::Stream` is not
    /// `Send` on every platform; dropping the sink stops that thread.
    pub fn open() -> Result<Self, AudioError> {
        let shared = Arc::new(OutputShared {
            frames_rendered: AtomicU64::new(0),
            last_callback_nanos: AtomicU64::new(0),
            last_reported: AtomicU64::new(0),
            rendering: AtomicBool::new(false),
            muted: AtomicBool::new(false),
            hi_gain: AtomicU32::new(1.0_f32.to_bits()),
            lo_gain: AtomicU32::new(1.0_f32.to_bits()),
        });
        let (producer, consumer) = RingBuffer::<Voice>::new(MAX_VOICES * 4);
        let (ready_tx, ready_rx) = mpsc::channel::<Result<u32, AudioError>>();
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();

        let thread_shared = Arc::clone(&shared);
        thread::spawn(move || {
            match build_output_stream(thread_shared, consumer) {
                Ok((stream, sample_rate)) => {
                    if let Err(err) = stream.play() {
                        let _ = ready_tx.send(Err(AudioError::StreamOpenFailed {
                            reason: format!("{:?}", err),
                        }));
                        return;
                    }
                    let _ = ready_tx.send(Ok(sample_rate));
                    // Keep the stream alive until the sink is dropped
                    let _ = shutdown_rx.recv();
                    drop(stream);
                }
                Err(err) => {
                    let _ = ready_tx.send(Err(err));
                }
            }
        });

        let sample_rate = ready_rx
            .recv()
            .map_err(|_| AudioError::StreamOpenFailed {
                reason: "audio thread exited before reporting".to_string(),
            })?
            .map_err(|err| {
                log_audio_error(&err, "CpalSink::open");
                err
            })?;

        log::info!("[CpalSink] Output stream running at {} Hz", sample_rate);

        Ok(Self {
            shared,
            voices: Mutex::new(producer),
            hi_click: Mutex::new(generate_click_sample(sample_rate, SoundRole::Hi, 42).into()),
            lo_click: Mutex::new(generate_click_sample(sample_rate, SoundRole::Lo, 43).into()),
            sample_rate,
            nanos: SystemHostClock::default(),
            shutdown: Mutex::new(Some(shutdown_tx)),
        })
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn click_for(&self, role: SoundRole) -> Option<Arc<[f32]>> {
        let slot = match role {
            SoundRole::Hi => &self.hi_click,
            SoundRole::Lo => &self.lo_click,
        };
        slot.lock().ok().map(|guard| Arc::clone(&guard))
    }
}

impl Drop for CpalSink {
    fn drop(&mut self) {
        if let Ok(mut guard) = self.shutdown.lock() {
            if let Some(tx) = guard.take() {
                let _ = tx.send(());
            }
        }
    }
}

fn build_output_stream(
    shared: Arc<OutputShared>,
    mut consumer: Consumer<Voice>,
) -> Result<(cpal::Stream, u32), AudioError> {
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or(AudioError::NoOutputDevice)?;

    let config = device
        .default_output_config()
        .map_err(|e| AudioError::StreamOpenFailed {
            reason: format!("Failed to get default output config: {:?}", e),
        })?;

    if config.sample_format() != cpal::SampleFormat::F32 {
        return Err(AudioError::StreamOpenFailed {
            reason: "Only F32 sample format is currently supported for output".to_string(),
        });
    }

    let stream_config: cpal::StreamConfig = config.into();
    let channels = stream_config.channels as usize;
    let sample_rate = stream_config.sample_rate.0;
    let clock = SystemHostClock::default();
    let mut active: Vec<Voice> = Vec::with_capacity(MAX_VOICES);

    let err_fn = |err| tracing::error!("Output stream error: {}", err);

    let stream = device
        .build_output_stream(
            &stream_config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                while let Ok(voice) = consumer.pop() {
                    if active.len() < MAX_VOICES {
                        active.push(voice);
                    }
                }

                let muted = shared.muted.load(Ordering::Relaxed);
                for frame in data.chunks_mut(channels) {
                    let mut mix = 0.0_f32;
                    for voice in active.iter_mut() {
                        if let Some(sample) = voice.samples.get(voice.position) {
                            mix += sample * voice.gain;
                            voice.position += 1;
                        }
                    }
                    let value = if muted { 0.0 } else { mix.clamp(-1.0, 1.0) };
                    for out in frame.iter_mut() {
                        *out = value;
                    }
                }
                active.retain(|voice| voice.position < voice.samples.len());

                let frames = (data.len() / channels.max(1)) as u64;
                shared.frames_rendered.fetch_add(frames, Ordering::SeqCst);
                if let Some(now) = clock.current_host_time() {
                    shared.last_callback_nanos.store(now.0, Ordering::SeqCst);
                }
                shared.rendering.store(true, Ordering::SeqCst);
            },
            err_fn,
            None,
        )
        .map_err(|e| AudioError::StreamOpenFailed {
            reason: format!("{:?}", e),
        })?;

    Ok((stream, sample_rate))
}

impl HardwareClock for CpalSink {
    fn current_host_time(&self) -> Option<HostTime> {
        if !self.shared.rendering.load(Ordering::SeqCst) {
            return None;
        }
        let frames = self.shared.frames_rendered.load(Ordering::SeqCst);
        let last = self.shared.last_callback_nanos.load(Ordering::SeqCst);
        let now = self.nanos.current_host_time()?.0;
        let elapsed_frames =
            (now.saturating_sub(last) as f64 * self.sample_rate as f64 / 1e9) as u64;
        let candidate = frames + elapsed_frames;
        let previous = self
            .shared
            .last_reported
            .fetch_max(candidate, Ordering::SeqCst);
        Some(HostTime(previous.max(candidate)))
    }

    fn ticks_per_second(&self) -> f64 {
        self.sample_rate as f64
    }
}

impl AudioSink for CpalSink {
    fn load_sample(&self, role: SoundRole, identifier: &str) -> Result<(), AudioError> {
        if identifier.is_empty() {
            return Err(AudioError::SampleNotFound {
                identifier: identifier.to_string(),
            });
        }
        let click: Arc<[f32]> =
            generate_click_sample(self.sample_rate, role, seed_for_identifier(identifier)).into();
        let slot = match role {
            SoundRole::Hi => &self.hi_click,
            SoundRole::Lo => &self.lo_click,
        };
        let mut guard = slot.lock().map_err(|_| AudioError::LockPoisoned {
            component: "click_bank".to_string(),
        })?;
        *guard = click;
        Ok(())
    }

    fn trigger(&self, role: SoundRole, _at: HostTime) {
        let Some(samples) = self.click_for(role) else {
            return;
        };
        let voice = Voice {
            samples,
            gain: self.shared.gain(role),
            position: 0,
        };
        if let Ok(mut producer) = self.voices.lock() {
            if producer.push(voice).is_err() {
                tracing::warn!("[CpalSink] Voice queue full, dropping click");
            }
        }
    }

    fn set_volume(&self, role: SoundRole, level: f32) {
        let bits = level.clamp(0.0, 1.0).to_bits();
        match role {
            SoundRole::Hi => self.shared.hi_gain.store(bits, Ordering::Relaxed),
            SoundRole::Lo => self.shared.lo_gain.store(bits, Ordering::Relaxed),
        }
    }

    fn set_muted(&self, muted: bool) {
        self.shared.muted.store(muted, Ordering::Relaxed);
    }

    fn prime(&self) {
        // A silent voice wakes the mixer path before the first audible click
        let silent: Arc<[f32]> = vec![0.0; 64].into();
        if let Ok(mut producer) = self.voices.lock() {
            let _ = producer.push(Voice {
                samples: silent,
                gain: 0.0,
                position: 0,
            });
        }
    }
}
