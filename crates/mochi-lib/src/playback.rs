//! Audio playback controller — one rodio sink on a dedicated OS thread.
//!
//! Invariant: at most one audio resource is owned at a time. A new `play`
//! fully tears down the previous sink before the new clip is decoded, so
//! clips never overlap and no listener outlives its clip.
//!
//! Lifecycle events: `Started{duration}` → periodic `Time` → `Ended`, or
//! `Failed` from any state. The typing reveal and the avatar's speaking flag
//! derive their state solely from these events — nothing polls the sink.
//!
//! The full MP3 payload is decoded to PCM up front (it arrived as one base64
//! blob anyway), which also yields an exact duration; mp3 headers alone
//! often don't.

use std::io::Cursor;
use std::sync::Arc;
use std::time::Duration;

use rodio::buffer::SamplesBuffer;
use rodio::{Decoder, OutputStream, OutputStreamHandle, Sink, Source};
use serde::Serialize;
use tokio::sync::{broadcast, watch};
use tracing::{debug, error};

use mochi_core::types::{PlaybackState, PlaybackStatus};

/// Cadence of `Time` events while a clip is playing.
const TICK: Duration = Duration::from_millis(100);

/// Lifecycle events emitted by the playback thread.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase", tag = "type")]
pub enum PlaybackEvent {
    Started { duration_secs: f64 },
    Time { position_secs: f64, duration_secs: f64 },
    Ended,
    Failed,
}

enum PlayCmd {
    Play(Vec<u8>),
    Stop,
}

/// Cloneable handle to the playback thread. All methods are non-blocking.
#[derive(Clone)]
pub struct PlaybackHandle {
    cmd_tx: std::sync::mpsc::Sender<PlayCmd>,
    events: broadcast::Sender<PlaybackEvent>,
    status_tx: Arc<watch::Sender<PlaybackStatus>>,
    status_rx: watch::Receiver<PlaybackStatus>,
}

impl PlaybackHandle {
    /// Spawn the playback OS thread (rodio's OutputStream is !Send).
    pub fn new() -> Self {
        let (cmd_tx, cmd_rx) = std::sync::mpsc::channel();
        let (events, _) = broadcast::channel(64);
        let (status_tx, status_rx) = watch::channel(PlaybackStatus::default());
        let status_tx = Arc::new(status_tx);

        let thread_events = events.clone();
        let thread_status = status_tx.clone();
        std::thread::Builder::new()
            .name("mochi-playback".into())
            .spawn(move || playback_thread(cmd_rx, thread_events, thread_status))
            .expect("failed to spawn playback thread");

        Self {
            cmd_tx,
            events,
            status_tx,
            status_rx,
        }
    }

    /// Channels without a thread behind them — tests drive events by hand.
    #[cfg(test)]
    pub(crate) fn detached() -> Self {
        let (cmd_tx, _cmd_rx) = std::sync::mpsc::channel();
        let (events, _) = broadcast::channel(64);
        let (status_tx, status_rx) = watch::channel(PlaybackStatus::default());
        Self {
            cmd_tx,
            events,
            status_tx: Arc::new(status_tx),
            status_rx,
        }
    }

    /// Emit an event as the playback thread would, mirroring it into status.
    #[cfg(test)]
    pub(crate) fn emit(&self, event: PlaybackEvent) {
        self.status_tx.send_modify(|s| match &event {
            PlaybackEvent::Started { duration_secs } => {
                s.state = PlaybackState::Playing;
                s.position_secs = 0.0;
                s.duration_secs = *duration_secs;
            }
            PlaybackEvent::Time { position_secs, .. } => s.position_secs = *position_secs,
            PlaybackEvent::Ended => {
                s.state = PlaybackState::Idle;
                s.position_secs = s.duration_secs;
            }
            PlaybackEvent::Failed => *s = PlaybackStatus::default(),
        });
        let _ = self.events.send(event);
    }

    /// Decode and play a complete MP3 payload, stopping any current clip
    /// first (at-most-one-active-stream).
    pub fn play_mp3(&self, bytes: Vec<u8>) {
        self.status_tx.send_modify(|s| {
            s.state = PlaybackState::Loading;
            s.position_secs = 0.0;
            s.duration_secs = 0.0;
        });
        let _ = self.cmd_tx.send(PlayCmd::Play(bytes));
    }

    /// Stop and discard the current clip. Resets status without emitting
    /// `Ended` — an explicit stop is not a completed playback.
    pub fn stop(&self) {
        let _ = self.cmd_tx.send(PlayCmd::Stop);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PlaybackEvent> {
        self.events.subscribe()
    }

    pub fn status(&self) -> PlaybackStatus {
        self.status_rx.borrow().clone()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<PlaybackStatus> {
        self.status_rx.clone()
    }
}

impl Default for PlaybackHandle {
    fn default() -> Self {
        Self::new()
    }
}

// ─── Playback OS thread ────────────────────────────────────────────────────

/// The clip currently owned by the playback loop. Sink is the real
/// implementation; tests substitute a fake so the teardown path runs
/// without an audio device.
trait ActiveClip {
    fn stop(&self);
    fn empty(&self) -> bool;
    fn position(&self) -> Duration;
}

impl ActiveClip for Sink {
    fn stop(&self) {
        Sink::stop(self)
    }

    fn empty(&self) -> bool {
        Sink::empty(self)
    }

    fn position(&self) -> Duration {
        self.get_pos()
    }
}

fn playback_thread(
    cmd_rx: std::sync::mpsc::Receiver<PlayCmd>,
    events: broadcast::Sender<PlaybackEvent>,
    status_tx: Arc<watch::Sender<PlaybackStatus>>,
) {
    let output = match OutputStream::try_default() {
        Ok(pair) => Some(pair),
        Err(e) => {
            // Keep running: every play degrades to Failed instead of wedging
            // consumers in Loading.
            error!("playback: failed to open audio output: {e}");
            None
        }
    };

    run_loop(cmd_rx, events, status_tx, move |bytes| {
        let (_, handle) = output.as_ref().ok_or(ClipError::NoOutput)?;
        let (sink, duration) = begin_clip(handle, bytes)?;
        Ok((Box::new(sink) as Box<dyn ActiveClip>, duration))
    });
}

fn run_loop(
    cmd_rx: std::sync::mpsc::Receiver<PlayCmd>,
    events: broadcast::Sender<PlaybackEvent>,
    status_tx: Arc<watch::Sender<PlaybackStatus>>,
    mut open: impl FnMut(&[u8]) -> Result<(Box<dyn ActiveClip>, f64), ClipError>,
) {
    // The active clip and its duration. Option is the at-most-one invariant.
    let mut current: Option<(Box<dyn ActiveClip>, f64)> = None;

    loop {
        match cmd_rx.recv_timeout(TICK) {
            Ok(PlayCmd::Play(bytes)) => {
                // Tear down the previous clip before touching the new one.
                if let Some((clip, _)) = current.take() {
                    clip.stop();
                }

                match open(&bytes) {
                    Ok((clip, duration)) => {
                        status_tx.send_modify(|s| {
                            s.state = PlaybackState::Playing;
                            s.position_secs = 0.0;
                            s.duration_secs = duration;
                        });
                        let _ = events.send(PlaybackEvent::Started {
                            duration_secs: duration,
                        });
                        debug!("playback: started ({duration:.2}s clip)");
                        current = Some((clip, duration));
                    }
                    Err(e) => {
                        error!("playback: {e}");
                        fail(&events, &status_tx);
                    }
                }
            }
            Ok(PlayCmd::Stop) => {
                if let Some((clip, _)) = current.take() {
                    clip.stop();
                }
                status_tx.send_modify(|s| *s = PlaybackStatus::default());
            }
            Err(std::sync::mpsc::RecvTimeoutError::Timeout) => {
                if let Some((clip, duration)) = &current {
                    if clip.empty() {
                        let duration = *duration;
                        status_tx.send_modify(|s| {
                            s.state = PlaybackState::Idle;
                            s.position_secs = duration;
                        });
                        let _ = events.send(PlaybackEvent::Ended);
                        debug!("playback: clip ended");
                        current = None;
                    } else {
                        let position = clip.position().as_secs_f64().min(*duration);
                        status_tx.send_modify(|s| s.position_secs = position);
                        let _ = events.send(PlaybackEvent::Time {
                            position_secs: position,
                            duration_secs: *duration,
                        });
                    }
                }
            }
            Err(std::sync::mpsc::RecvTimeoutError::Disconnected) => {
                if let Some((clip, _)) = current.take() {
                    clip.stop();
                }
                break;
            }
        }
    }
}

#[derive(Debug, thiserror::Error)]
enum ClipError {
    #[error("no audio output device")]
    NoOutput,
    #[error("decode failed: {0}")]
    Decode(#[from] rodio::decoder::DecoderError),
    #[error("sink creation failed: {0}")]
    Sink(#[from] rodio::PlayError),
}

/// Decode the payload fully, compute its duration, and start a fresh sink.
fn begin_clip(handle: &OutputStreamHandle, bytes: &[u8]) -> Result<(Sink, f64), ClipError> {
    let decoder = Decoder::new(Cursor::new(bytes.to_vec()))?;
    let channels = decoder.channels();
    let sample_rate = decoder.sample_rate();
    let samples: Vec<i16> = decoder.collect();
    let duration = clip_duration(samples.len(), channels, sample_rate);

    let sink = Sink::try_new(handle)?;
    sink.append(SamplesBuffer::new(channels, sample_rate, samples));
    Ok((sink, duration))
}

fn fail(events: &broadcast::Sender<PlaybackEvent>, status_tx: &watch::Sender<PlaybackStatus>) {
    status_tx.send_modify(|s| *s = PlaybackStatus::default());
    let _ = events.send(PlaybackEvent::Failed);
}

/// Seconds of audio represented by `len` interleaved samples.
fn clip_duration(len: usize, channels: u16, sample_rate: u32) -> f64 {
    if channels == 0 || sample_rate == 0 {
        return 0.0;
    }
    len as f64 / (channels as f64 * sample_rate as f64)
}
