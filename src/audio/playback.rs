//! # Playback Scheduler
//!
//! Gap-free sequential playback of the audio frames streamed back by the
//! remote session.
//!
//! ## Scheduling rule:
//! Each frame starts at `max(cursor, output clock now)` and the cursor then
//! advances by the frame's duration. Frames arriving faster than real time
//! queue back to back; a frame arriving after the queue drained starts right
//! away instead of "in the past". Starts are therefore non-decreasing and no
//! two scheduled frames overlap.
//!
//! ## Failure handling:
//! A malformed envelope is a `DecodeError` for that frame only. The cursor is
//! not moved and later frames keep playing.

use crate::audio::codec::{self, AudioFrame, TransportEnvelope};
use crate::audio::platform::OutputContext;
use crate::error::{LiveError, LiveResult};
use tracing::{debug, info, warn};

/// Earliest clock time (seconds) at which the next frame may start.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PlaybackCursor(f64);

impl PlaybackCursor {
    pub fn value(&self) -> f64 {
        self.0
    }

    /// Start time for a frame arriving when the clock reads `now`.
    fn start_for(&self, now: f64) -> f64 {
        self.0.max(now)
    }

    fn advance(&mut self, start: f64, duration: f64) {
        self.0 = start + duration;
    }
}

/// Where a frame landed on the output timeline.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScheduledFrame {
    pub start: f64,
    pub duration: f64,
}

impl ScheduledFrame {
    pub fn end(&self) -> f64 {
        self.start + self.duration
    }
}

/// Owns the output context for the lifetime of a session.
pub struct PlaybackScheduler {
    output: Option<Box<dyn OutputContext>>,
    cursor: PlaybackCursor,
    sample_rate: u32,
    channels: u16,
    frames_played: u64,
    frames_dropped: u64,
}

impl PlaybackScheduler {
    /// Wrap an opened output context. `sample_rate`/`channels` describe the
    /// frames the remote sends when the envelope doesn't declare a rate.
    pub fn new(output: Box<dyn OutputContext>, sample_rate: u32, channels: u16) -> Self {
        Self {
            output: Some(output),
            cursor: PlaybackCursor::default(),
            sample_rate,
            channels,
            frames_played: 0,
            frames_dropped: 0,
        }
    }

    /// Resume the underlying device.
    pub async fn resume(&mut self) -> LiveResult<()> {
        match self.output.as_mut() {
            Some(output) => output.resume().await,
            None => Err(closed_error()),
        }
    }

    pub fn cursor(&self) -> f64 {
        self.cursor.value()
    }

    pub fn frames_played(&self) -> u64 {
        self.frames_played
    }

    pub fn frames_dropped(&self) -> u64 {
        self.frames_dropped
    }

    pub fn is_open(&self) -> bool {
        self.output.is_some()
    }

    /// Decode one base64 envelope at the configured rate and schedule it.
    pub fn enqueue(&mut self, data: &str) -> LiveResult<ScheduledFrame> {
        self.enqueue_at_rate(data, self.sample_rate)
    }

    /// Same as `enqueue`, honoring a `rate=` parameter in the envelope's mime type.
    pub fn enqueue_envelope(&mut self, envelope: &TransportEnvelope) -> LiveResult<ScheduledFrame> {
        let rate = envelope.declared_rate().unwrap_or(self.sample_rate);
        self.enqueue_at_rate(&envelope.data, rate)
    }

    fn enqueue_at_rate(&mut self, data: &str, sample_rate: u32) -> LiveResult<ScheduledFrame> {
        if self.output.is_none() {
            return Err(closed_error());
        }

        let frame = match codec::decode(data, sample_rate, self.channels) {
            Ok(frame) => frame,
            Err(e) => {
                self.frames_dropped += 1;
                warn!("Dropping incoming audio frame: {}", e);
                return Err(e);
            }
        };

        self.schedule(frame)
    }

    /// Place an already decoded frame on the output timeline.
    pub fn schedule(&mut self, frame: AudioFrame) -> LiveResult<ScheduledFrame> {
        let output = self.output.as_mut().ok_or_else(closed_error)?;

        let now = output.current_time();
        let start = self.cursor.start_for(now);
        let duration = frame.duration_secs();

        output.schedule(frame, start)?;
        self.cursor.advance(start, duration);
        self.frames_played += 1;

        debug!(
            "Scheduled frame at {:.3}s for {:.3}s (clock {:.3}s)",
            start, duration, now
        );

        Ok(ScheduledFrame { start, duration })
    }

    /// Close the output context. Safe to call more than once.
    pub async fn close(&mut self) -> LiveResult<()> {
        match self.output.take() {
            Some(mut output) => {
                info!(
                    "Closing playback ({} frames played, {} dropped)",
                    self.frames_played, self.frames_dropped
                );
                output.close().await
            }
            None => Ok(()),
        }
    }
}

fn closed_error() -> LiveError {
    LiveError::DeviceUnavailable("output context is closed".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::codec::encode_with_rate;
    use crate::testing::{FakeOutput, Probe};

    const RATE: u32 = 24000;

    fn scheduler(probe: &Probe) -> PlaybackScheduler {
        PlaybackScheduler::new(Box::new(FakeOutput::new(probe.clone())), RATE, 1)
    }

    fn envelope_of(samples: usize) -> String {
        encode_with_rate(&vec![0.1; samples], RATE).data
    }

    #[test]
    fn test_back_to_back_frames_are_contiguous() {
        let probe = Probe::shared();
        let mut playback = scheduler(&probe);

        probe.set_clock(0.0);
        let first = playback.enqueue(&envelope_of(12000)).unwrap();
        let second = playback.enqueue(&envelope_of(24000)).unwrap();

        assert_eq!(first.start, 0.0);
        assert!((first.duration - 0.5).abs() < 1e-9);
        assert!((second.start - 0.5).abs() < 1e-9);
        assert!((playback.cursor() - 1.5).abs() < 1e-9);
    }

    #[test]
    fn test_late_frame_starts_at_clock() {
        let probe = Probe::shared();
        let mut playback = scheduler(&probe);

        probe.set_clock(0.0);
        playback.enqueue(&envelope_of(12000)).unwrap();

        // Queue drained; frame arrives at 2.0s
        probe.set_clock(2.0);
        let late = playback.enqueue(&envelope_of(12000)).unwrap();
        assert!((late.start - 2.0).abs() < 1e-9);
        assert!((playback.cursor() - 2.5).abs() < 1e-9);
    }

    #[test]
    fn test_starts_never_decrease_and_never_overlap() {
        let probe = Probe::shared();
        let mut playback = scheduler(&probe);

        let mut previous: Option<ScheduledFrame> = None;
        for (i, clock) in [0.0, 0.1, 0.15, 3.0, 3.01, 3.02].iter().enumerate() {
            probe.set_clock(*clock);
            let frame = playback.enqueue(&envelope_of(2400 * (i + 1))).unwrap();
            if let Some(prev) = previous {
                assert!(frame.start >= prev.start);
                assert!(frame.start >= prev.end() - 1e-9);
            }
            previous = Some(frame);
        }

        assert_eq!(probe.snapshot().scheduled.len(), 6);
    }

    #[test]
    fn test_malformed_frame_is_dropped_without_moving_cursor() {
        let probe = Probe::shared();
        let mut playback = scheduler(&probe);

        playback.enqueue(&envelope_of(2400)).unwrap();
        let cursor = playback.cursor();

        let err = playback.enqueue("not base64 !!").unwrap_err();
        assert!(matches!(err, LiveError::DecodeError(_)));
        assert_eq!(playback.cursor(), cursor);
        assert_eq!(playback.frames_dropped(), 1);

        // Next good frame still plays
        let next = playback.enqueue(&envelope_of(2400)).unwrap();
        assert!((next.start - cursor).abs() < 1e-9);
        assert_eq!(playback.frames_played(), 2);
    }

    #[test]
    fn test_partial_sample_is_dropped_without_moving_cursor() {
        use base64::Engine as _;

        let probe = Probe::shared();
        let mut playback = scheduler(&probe);

        playback.enqueue(&envelope_of(4800)).unwrap();
        let cursor = playback.cursor();

        // Valid base64, but 3 bytes is not a whole number of 16-bit samples
        let odd = base64::engine::general_purpose::STANDARD.encode([1u8, 2, 3]);
        let err = playback.enqueue(&odd).unwrap_err();
        assert!(matches!(err, LiveError::DecodeError(_)));
        assert_eq!(playback.cursor(), cursor);
        assert_eq!(playback.frames_dropped(), 1);
        assert_eq!(probe.snapshot().scheduled.len(), 1);
    }

    #[test]
    fn test_declared_rate_overrides_default() {
        let probe = Probe::shared();
        let mut playback = scheduler(&probe);

        let envelope = encode_with_rate(&vec![0.0; 16000], 16000);
        let frame = playback.enqueue_envelope(&envelope).unwrap();
        assert!((frame.duration - 1.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_close_is_idempotent_and_rejects_later_frames() {
        let probe = Probe::shared();
        let mut playback = scheduler(&probe);

        playback.close().await.unwrap();
        playback.close().await.unwrap();
        assert_eq!(probe.snapshot().outputs_closed, 1);
        assert!(!playback.is_open());
        assert!(playback.enqueue(&envelope_of(10)).is_err());
    }
}
