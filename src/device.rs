//! # Audio Device Detection and Management
//!
//! cpal-backed implementation of the audio platform traits, plus device
//! enumeration for the health endpoint.
//!
//! ## Threading model:
//! A `cpal::Stream` is not `Send` on every host, so each stream is built,
//! played and dropped on a dedicated thread. The async side only holds a
//! stop channel and the join handle (`StreamThread`).
//!
//! ## Output clock:
//! The output context counts frames handed to the device; `current_time()` is
//! that count divided by the device rate. Scheduled frames are rendered at the
//! device's native rate with linear interpolation, so a 24 kHz reply plays
//! correctly on a 48 kHz card.
//!
//! ## Input:
//! The microphone is read at its native rate, reduced to channel 0 and
//! resampled to the capture rate with rubato before it reaches the framing sink.

use crate::audio::capture::FramingSink;
use crate::audio::codec::AudioFrame;
use crate::audio::platform::{AudioPlatform, InputContext, MicrophoneStream, OutputContext};
use crate::config::AudioConfig;
use crate::error::{LiveError, LiveResult};
use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, Sample, SampleFormat, SizedSample};
use rubato::{FftFixedIn, Resampler};
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{mpsc as std_mpsc, Arc, Mutex};
use std::thread::JoinHandle;
use tracing::{debug, error, info, warn};

/// Input chunk size fed to the capture resampler.
const RESAMPLER_CHUNK: usize = 1024;

/// Device selection utilities
pub struct DeviceManager;

impl DeviceManager {
    /// Find the input device called `name`, falling back to the host default.
    ///
    /// No microphone at all is reported as `PermissionDenied`; to the session
    /// that is the same as being refused one.
    pub fn input_device(host: &cpal::Host, name: Option<&str>) -> LiveResult<cpal::Device> {
        if let Some(wanted) = name {
            match host.input_devices() {
                Ok(mut devices) => {
                    if let Some(device) =
                        devices.find(|d| d.name().map(|n| n == wanted).unwrap_or(false))
                    {
                        return Ok(device);
                    }
                    warn!("Input device '{}' not found, using default", wanted);
                }
                Err(e) => warn!("Could not enumerate input devices: {}", e),
            }
        }

        host.default_input_device().ok_or(LiveError::PermissionDenied)
    }

    /// Find the output device called `name`, falling back to the host default.
    pub fn output_device(host: &cpal::Host, name: Option<&str>) -> LiveResult<cpal::Device> {
        if let Some(wanted) = name {
            match host.output_devices() {
                Ok(mut devices) => {
                    if let Some(device) =
                        devices.find(|d| d.name().map(|n| n == wanted).unwrap_or(false))
                    {
                        return Ok(device);
                    }
                    warn!("Output device '{}' not found, using default", wanted);
                }
                Err(e) => warn!("Could not enumerate output devices: {}", e),
            }
        }

        host.default_output_device()
            .ok_or_else(|| LiveError::DeviceUnavailable("no output device available".to_string()))
    }

    /// Get system audio device summary
    pub fn get_device_summary() -> AudioDeviceSummary {
        let host = cpal::default_host();

        AudioDeviceSummary {
            host: host.id().name().to_string(),
            default_input: host.default_input_device().and_then(|d| d.name().ok()),
            default_output: host.default_output_device().and_then(|d| d.name().ok()),
            inputs: device_names(host.input_devices()),
            outputs: device_names(host.output_devices()),
        }
    }
}

fn device_names<I>(devices: Result<I, cpal::DevicesError>) -> Vec<String>
where
    I: Iterator<Item = cpal::Device>,
{
    devices
        .map(|list| list.filter_map(|d| d.name().ok()).collect())
        .unwrap_or_default()
}

/// Audio device availability summary
#[derive(Debug, Clone, Serialize)]
pub struct AudioDeviceSummary {
    pub host: String,
    pub default_input: Option<String>,
    pub default_output: Option<String>,
    pub inputs: Vec<String>,
    pub outputs: Vec<String>,
}

/// A cpal stream parked on its own thread until told to stop.
struct StreamThread {
    stop_tx: Option<std_mpsc::Sender<()>>,
    join: Option<JoinHandle<()>>,
}

impl StreamThread {
    /// Build and play a stream on a new thread. Blocks until the stream is
    /// playing or setup failed.
    fn spawn<T, F>(name: &str, build: F) -> LiveResult<(Self, T)>
    where
        T: Send + 'static,
        F: FnOnce() -> LiveResult<(cpal::Stream, T)> + Send + 'static,
    {
        let (stop_tx, stop_rx) = std_mpsc::channel::<()>();
        let (ready_tx, ready_rx) = std_mpsc::channel::<LiveResult<T>>();

        let join = std::thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                let (stream, info) = match build() {
                    Ok(built) => built,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };

                if let Err(e) = stream.play() {
                    let _ = ready_tx.send(Err(LiveError::DeviceUnavailable(e.to_string())));
                    return;
                }

                let _ = ready_tx.send(Ok(info));
                // Returns on stop() or when the owner is dropped
                let _ = stop_rx.recv();
                drop(stream);
            })
            .map_err(|e| LiveError::DeviceUnavailable(format!("failed to spawn audio thread: {}", e)))?;

        match ready_rx.recv() {
            Ok(Ok(info)) => Ok((
                Self {
                    stop_tx: Some(stop_tx),
                    join: Some(join),
                },
                info,
            )),
            Ok(Err(e)) => {
                let _ = join.join();
                Err(e)
            }
            Err(_) => Err(LiveError::DeviceUnavailable(
                "audio thread exited during setup".to_string(),
            )),
        }
    }

    /// Signal the thread to drop its stream. Does not wait.
    fn signal_stop(&mut self) {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
        }
    }

    /// Signal and wait for the thread to finish.
    fn stop_and_join(&mut self) {
        self.signal_stop();
        if let Some(join) = self.join.take() {
            if join.join().is_err() {
                error!("Audio stream thread panicked");
            }
        }
    }
}

impl Drop for StreamThread {
    fn drop(&mut self) {
        self.signal_stop();
    }
}

fn map_stream_error(e: impl std::fmt::Display) -> LiveError {
    LiveError::DeviceUnavailable(e.to_string())
}

/// A frame waiting to be rendered, split per channel as floats.
struct ScheduledBuffer {
    start: f64,
    rate: f64,
    channels: Vec<Vec<f32>>,
    frames: usize,
}

impl ScheduledBuffer {
    fn from_frame(frame: &AudioFrame, start: f64) -> Self {
        let channels = (0..frame.channels())
            .map(|ch| frame.channel_data(ch))
            .collect();

        Self {
            start,
            rate: f64::from(frame.sample_rate()),
            channels,
            frames: frame.frame_count(),
        }
    }

    fn end(&self) -> f64 {
        self.start + self.frames as f64 / self.rate
    }

    /// Linearly interpolated sample at clock time `t` for device channel `channel`.
    fn sample_at(&self, t: f64, channel: usize) -> Option<f32> {
        if t < self.start || self.channels.is_empty() {
            return None;
        }

        let position = (t - self.start) * self.rate;
        let index = position.floor() as usize;
        if index >= self.frames {
            return None;
        }

        // Mono sources feed every device channel
        let data = &self.channels[channel.min(self.channels.len() - 1)];
        let frac = (position - index as f64) as f32;
        let current = data[index];
        let next = data.get(index + 1).copied().unwrap_or(current);

        Some(current + (next - current) * frac)
    }
}

/// Everything the output callback needs, shared with the controller side.
struct OutputTimeline {
    device_rate: u32,
    device_channels: u16,
    scheduled: VecDeque<ScheduledBuffer>,
}

impl OutputTimeline {
    fn new(device_rate: u32, device_channels: u16) -> Self {
        Self {
            device_rate,
            device_channels,
            scheduled: VecDeque::new(),
        }
    }

    /// Fill one interleaved device buffer starting at frame `first_frame`.
    /// Returns the number of frames written.
    fn render<T>(&mut self, data: &mut [T], first_frame: u64) -> u64
    where
        T: Sample + FromSample<f32>,
    {
        let channels = usize::from(self.device_channels.max(1));
        let rate = f64::from(self.device_rate);
        let mut frames = 0u64;

        for out_frame in data.chunks_mut(channels) {
            let t = (first_frame + frames) as f64 / rate;

            while self.scheduled.front().map_or(false, |b| b.end() <= t) {
                self.scheduled.pop_front();
            }

            for (channel, sample) in out_frame.iter_mut().enumerate() {
                let value = self
                    .scheduled
                    .front()
                    .and_then(|b| b.sample_at(t, channel))
                    .unwrap_or(0.0);
                *sample = T::from_sample(value);
            }

            frames += 1;
        }

        frames
    }
}

/// Playback context on the default (or configured) output device.
pub struct CpalOutput {
    timeline: Arc<Mutex<OutputTimeline>>,
    frames_rendered: Arc<AtomicU64>,
    device_rate: u32,
    thread: Option<StreamThread>,
}

impl CpalOutput {
    fn open(device_name: Option<String>) -> LiveResult<Self> {
        let frames_rendered = Arc::new(AtomicU64::new(0));
        let timeline = Arc::new(Mutex::new(OutputTimeline::new(0, 0)));

        let thread_timeline = Arc::clone(&timeline);
        let thread_frames = Arc::clone(&frames_rendered);

        let (thread, device_rate) = StreamThread::spawn("live-output", move || {
            let host = cpal::default_host();
            let device = DeviceManager::output_device(&host, device_name.as_deref())?;
            let supported = device.default_output_config().map_err(map_stream_error)?;
            let format = supported.sample_format();
            let config: cpal::StreamConfig = supported.into();

            info!(
                "Output device: {} ({} Hz, {} ch, {:?})",
                device.name().unwrap_or_else(|_| "unknown".to_string()),
                config.sample_rate.0,
                config.channels,
                format
            );

            if let Ok(mut timeline) = thread_timeline.lock() {
                timeline.device_rate = config.sample_rate.0;
                timeline.device_channels = config.channels;
            }

            let stream = match format {
                SampleFormat::F32 => build_output::<f32>(&device, &config, thread_timeline, thread_frames),
                SampleFormat::I16 => build_output::<i16>(&device, &config, thread_timeline, thread_frames),
                SampleFormat::U16 => build_output::<u16>(&device, &config, thread_timeline, thread_frames),
                other => Err(LiveError::DeviceUnavailable(format!(
                    "unsupported output sample format {:?}",
                    other
                ))),
            }?;

            Ok((stream, config.sample_rate.0))
        })?;

        Ok(Self {
            timeline,
            frames_rendered,
            device_rate,
            thread: Some(thread),
        })
    }
}

fn build_output<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    timeline: Arc<Mutex<OutputTimeline>>,
    frames_rendered: Arc<AtomicU64>,
) -> LiveResult<cpal::Stream>
where
    T: SizedSample + FromSample<f32>,
{
    let channels = usize::from(config.channels.max(1));

    device
        .build_output_stream(
            config,
            move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                let first_frame = frames_rendered.load(Ordering::Acquire);
                let written = match timeline.lock() {
                    Ok(mut timeline) => timeline.render(data, first_frame),
                    Err(_) => {
                        data.fill(T::EQUILIBRIUM);
                        (data.len() / channels) as u64
                    }
                };
                frames_rendered.fetch_add(written, Ordering::AcqRel);
            },
            |err| error!("Output stream error: {}", err),
            None,
        )
        .map_err(map_stream_error)
}

#[async_trait]
impl OutputContext for CpalOutput {
    async fn resume(&mut self) -> LiveResult<()> {
        // The stream is already playing once `open` returns
        match self.thread {
            Some(_) => Ok(()),
            None => Err(LiveError::DeviceUnavailable("output context is closed".to_string())),
        }
    }

    fn current_time(&self) -> f64 {
        if self.device_rate == 0 {
            return 0.0;
        }
        self.frames_rendered.load(Ordering::Acquire) as f64 / f64::from(self.device_rate)
    }

    fn schedule(&mut self, frame: AudioFrame, start_at: f64) -> LiveResult<()> {
        let mut timeline = self
            .timeline
            .lock()
            .map_err(|_| LiveError::DeviceUnavailable("output timeline poisoned".to_string()))?;
        timeline
            .scheduled
            .push_back(ScheduledBuffer::from_frame(&frame, start_at));
        Ok(())
    }

    async fn close(&mut self) -> LiveResult<()> {
        if let Some(mut thread) = self.thread.take() {
            tokio::task::spawn_blocking(move || thread.stop_and_join())
                .await
                .map_err(|e| LiveError::DeviceUnavailable(format!("output shutdown failed: {}", e)))?;
            debug!("Output stream closed");
        }
        Ok(())
    }
}

/// Reduces to channel 0 and converts to the capture rate.
struct CaptureResampler {
    resampler: Option<FftFixedIn<f32>>,
    pending: Vec<f32>,
}

impl CaptureResampler {
    fn new(from_rate: u32, to_rate: u32) -> LiveResult<Self> {
        let resampler = if from_rate == to_rate {
            None
        } else {
            let resampler =
                FftFixedIn::<f32>::new(from_rate as usize, to_rate as usize, RESAMPLER_CHUNK, 2, 1)
                    .map_err(|e| LiveError::DeviceUnavailable(format!("resampler setup failed: {}", e)))?;
            Some(resampler)
        };

        Ok(Self {
            resampler,
            pending: Vec::new(),
        })
    }

    fn process(&mut self, mono: &[f32]) -> Vec<f32> {
        let resampler = match self.resampler.as_mut() {
            Some(resampler) => resampler,
            None => return mono.to_vec(),
        };

        self.pending.extend_from_slice(mono);
        let mut output = Vec::new();

        loop {
            let needed = resampler.input_frames_next();
            if self.pending.len() < needed {
                break;
            }

            let chunk: Vec<f32> = self.pending.drain(..needed).collect();
            let waves = vec![chunk];
            match resampler.process(&waves, None) {
                Ok(resampled) => {
                    if let Some(channel) = resampled.into_iter().next() {
                        output.extend(channel);
                    }
                }
                Err(e) => {
                    warn!("Capture resampling failed: {}", e);
                    break;
                }
            }
        }

        output
    }
}

/// Capture context. The device itself is opened when the microphone is requested.
pub struct CpalInput {
    device_name: Option<String>,
    sample_rate: u32,
    closed: bool,
}

#[async_trait]
impl InputContext for CpalInput {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    async fn open_microphone(&mut self) -> LiveResult<Box<dyn MicrophoneStream>> {
        if self.closed {
            return Err(LiveError::DeviceUnavailable("input context is closed".to_string()));
        }

        let device_name = self.device_name.clone();
        let target_rate = self.sample_rate;

        let microphone = tokio::task::spawn_blocking(move || CpalMicrophone::open(device_name, target_rate))
            .await
            .map_err(|e| LiveError::DeviceUnavailable(format!("microphone setup failed: {}", e)))??;

        Ok(Box::new(microphone))
    }

    async fn close(&mut self) -> LiveResult<()> {
        self.closed = true;
        Ok(())
    }
}

type SinkSlot = Arc<Mutex<Option<FramingSink>>>;

/// Running microphone stream. Samples are dropped until a sink is connected.
pub struct CpalMicrophone {
    sink: SinkSlot,
    thread: Option<StreamThread>,
}

impl CpalMicrophone {
    fn open(device_name: Option<String>, target_rate: u32) -> LiveResult<Self> {
        let sink: SinkSlot = Arc::new(Mutex::new(None));
        let thread_sink = Arc::clone(&sink);

        let (thread, ()) = StreamThread::spawn("live-input", move || {
            let host = cpal::default_host();
            let device = DeviceManager::input_device(&host, device_name.as_deref())?;
            let supported = device.default_input_config().map_err(|e| match e {
                cpal::DefaultStreamConfigError::DeviceNotAvailable => LiveError::PermissionDenied,
                other => map_stream_error(other),
            })?;
            let format = supported.sample_format();
            let config: cpal::StreamConfig = supported.into();

            info!(
                "Input device: {} ({} Hz, {} ch, {:?}) → {} Hz",
                device.name().unwrap_or_else(|_| "unknown".to_string()),
                config.sample_rate.0,
                config.channels,
                format,
                target_rate
            );

            let resampler = CaptureResampler::new(config.sample_rate.0, target_rate)?;

            let stream = match format {
                SampleFormat::F32 => build_input::<f32>(&device, &config, resampler, thread_sink),
                SampleFormat::I16 => build_input::<i16>(&device, &config, resampler, thread_sink),
                SampleFormat::U16 => build_input::<u16>(&device, &config, resampler, thread_sink),
                other => Err(LiveError::DeviceUnavailable(format!(
                    "unsupported input sample format {:?}",
                    other
                ))),
            }?;

            Ok((stream, ()))
        })?;

        Ok(Self {
            sink,
            thread: Some(thread),
        })
    }
}

fn build_input<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    mut resampler: CaptureResampler,
    sink: SinkSlot,
) -> LiveResult<cpal::Stream>
where
    T: SizedSample,
    f32: FromSample<T>,
{
    let channels = usize::from(config.channels.max(1));
    let error_sink = Arc::clone(&sink);

    device
        .build_input_stream(
            config,
            move |data: &[T], _: &cpal::InputCallbackInfo| {
                let mono: Vec<f32> = data
                    .iter()
                    .step_by(channels)
                    .map(|s| f32::from_sample(*s))
                    .collect();
                let samples = resampler.process(&mono);
                if samples.is_empty() {
                    return;
                }
                if let Ok(mut slot) = sink.lock() {
                    if let Some(sink) = slot.as_mut() {
                        sink.push(&samples);
                    }
                }
            },
            move |err| {
                error!("Input stream error: {}", err);
                if let Ok(slot) = error_sink.lock() {
                    if let Some(sink) = slot.as_ref() {
                        sink.report_error(err.to_string());
                    }
                }
            },
            None,
        )
        .map_err(|e| match e {
            cpal::BuildStreamError::DeviceNotAvailable => LiveError::PermissionDenied,
            other => map_stream_error(other),
        })
}

impl MicrophoneStream for CpalMicrophone {
    fn connect(&mut self, sink: FramingSink) -> LiveResult<()> {
        if self.thread.is_none() {
            return Err(LiveError::DeviceUnavailable("microphone tracks are stopped".to_string()));
        }
        let mut slot = self
            .sink
            .lock()
            .map_err(|_| LiveError::DeviceUnavailable("microphone sink poisoned".to_string()))?;
        *slot = Some(sink);
        Ok(())
    }

    fn stop_tracks(&mut self) {
        if let Some(mut thread) = self.thread.take() {
            thread.signal_stop();
        }
        if let Ok(mut slot) = self.sink.lock() {
            slot.take();
        }
    }
}

/// Host audio system via cpal.
#[derive(Debug, Default, Clone, Copy)]
pub struct CpalPlatform;

#[async_trait]
impl AudioPlatform for CpalPlatform {
    async fn open_output(&self, config: &AudioConfig) -> LiveResult<Box<dyn OutputContext>> {
        let device_name = config.output_device.clone();
        let output = tokio::task::spawn_blocking(move || CpalOutput::open(device_name))
            .await
            .map_err(|e| LiveError::DeviceUnavailable(format!("output setup failed: {}", e)))??;
        Ok(Box::new(output))
    }

    async fn open_input(&self, config: &AudioConfig) -> LiveResult<Box<dyn InputContext>> {
        Ok(Box::new(CpalInput {
            device_name: config.input_device.clone(),
            sample_rate: config.input_sample_rate,
            closed: false,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mono_frame(samples: Vec<i16>, rate: u32) -> AudioFrame {
        AudioFrame::new(samples, rate, 1).unwrap()
    }

    #[test]
    fn test_render_plays_frame_at_its_start_time() {
        let mut timeline = OutputTimeline::new(4, 1);
        // 2 frames at 4 Hz starting at t = 0.5s → device frames 2 and 3
        let frame = mono_frame(vec![16384, 16384], 4);
        timeline.scheduled.push_back(ScheduledBuffer::from_frame(&frame, 0.5));

        let mut out = [1.0f32; 6];
        let written = timeline.render(&mut out, 0);

        assert_eq!(written, 6);
        assert_eq!(out, [0.0, 0.0, 0.5, 0.5, 0.0, 0.0]);
        assert!(timeline.scheduled.is_empty());
    }

    #[test]
    fn test_render_upsamples_and_fans_out_mono() {
        // 2 Hz source on a 4 Hz stereo device
        let mut timeline = OutputTimeline::new(4, 2);
        let frame = mono_frame(vec![0, 16384], 2);
        timeline.scheduled.push_back(ScheduledBuffer::from_frame(&frame, 0.0));

        let mut out = [0.0f32; 8];
        timeline.render(&mut out, 0);

        // Interpolated halfway between 0.0 and 0.5 on the second device frame
        assert_eq!(out[0], 0.0);
        assert_eq!(out[1], 0.0);
        assert!((out[2] - 0.25).abs() < 1e-6);
        assert_eq!(out[2], out[3]);
        assert!((out[4] - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_render_i16_output() {
        let mut timeline = OutputTimeline::new(1, 1);
        let frame = mono_frame(vec![-16384], 1);
        timeline.scheduled.push_back(ScheduledBuffer::from_frame(&frame, 0.0));

        let mut out = [0i16; 2];
        timeline.render(&mut out, 0);
        assert_eq!(out, [-16384, 0]);
    }

    #[test]
    fn test_capture_resampler_passthrough_at_same_rate() {
        let mut resampler = CaptureResampler::new(16000, 16000).unwrap();
        assert_eq!(resampler.process(&[0.1, 0.2]), vec![0.1, 0.2]);
    }

    #[test]
    fn test_capture_resampler_reduces_rate() {
        let mut resampler = CaptureResampler::new(48000, 16000).unwrap();
        let input = vec![0.0f32; 4800];
        let output = resampler.process(&input);
        assert!(!output.is_empty());
        assert!(output.len() <= 1600);
    }
}
