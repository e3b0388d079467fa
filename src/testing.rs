//! Scripted stand-ins for the audio devices and the remote session.
//!
//! Every fake records into a shared [`Probe`] so tests can assert what was
//! opened, scheduled, sent and released, and in which order.

use crate::audio::capture::FramingSink;
use crate::audio::codec::{AudioFrame, TransportEnvelope};
use crate::audio::platform::{AudioPlatform, InputContext, MicrophoneStream, OutputContext};
use crate::config::{AudioConfig, LiveConfig};
use crate::error::{LiveError, LiveResult};
use crate::live::events::{EventSender, SessionEvent};
use crate::live::transport::{LiveConnector, SessionHandle};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

/// Counters and recordings, copied out by [`Probe::snapshot`].
#[derive(Debug, Clone, Default)]
pub struct ProbeSnapshot {
    pub outputs_opened: u32,
    pub outputs_closed: u32,
    pub inputs_opened: u32,
    pub inputs_closed: u32,
    pub microphones_opened: u32,
    pub tracks_stopped: u32,
    pub sessions_opened: u32,
    pub sessions_closed: u32,
    /// (start, duration) of every scheduled frame
    pub scheduled: Vec<(f64, f64)>,
    pub sent: Vec<TransportEnvelope>,
    pub release_order: Vec<&'static str>,
}

#[derive(Default)]
struct ProbeState {
    record: ProbeSnapshot,
    clock: f64,
    sink: Option<FramingSink>,
    processor_noted: bool,
    remote_events: Option<EventSender>,
}

impl ProbeState {
    /// Record a release step. A framing processor disconnect seen for the first
    /// time is recorded as "processor" just before it.
    fn release(&mut self, step: &'static str) {
        let disconnected = self.sink.as_ref().map_or(false, |sink| !sink.is_connected());
        if disconnected && !self.processor_noted {
            self.processor_noted = true;
            self.record.release_order.push("processor");
        }
        self.record.release_order.push(step);
    }
}

#[derive(Clone, Default)]
pub struct Probe(Arc<Mutex<ProbeState>>);

impl Probe {
    pub fn shared() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> ProbeSnapshot {
        self.0.lock().unwrap().record.clone()
    }

    pub fn set_clock(&self, seconds: f64) {
        self.0.lock().unwrap().clock = seconds;
    }

    fn clock(&self) -> f64 {
        self.0.lock().unwrap().clock
    }

    /// Deliver samples as if the microphone produced them.
    pub fn push_microphone(&self, samples: &[f32]) {
        if let Some(sink) = self.0.lock().unwrap().sink.as_mut() {
            sink.push(samples);
        }
    }

    /// Whether the connected microphone's framing sink still delivers windows.
    pub fn capture_connected(&self) -> bool {
        self.with(|s| s.sink.as_ref().map_or(false, FramingSink::is_connected))
    }

    /// Inject an event on the channel handed to the last connected session.
    pub fn remote_event(&self, event: SessionEvent) {
        let state = self.0.lock().unwrap();
        let events = state.remote_events.as_ref().expect("no session connected");
        events.send(event).expect("controller dropped its event channel");
    }

    fn with<R>(&self, f: impl FnOnce(&mut ProbeState) -> R) -> R {
        f(&mut self.0.lock().unwrap())
    }
}

pub struct FakePlatform {
    probe: Probe,
    deny_microphone: bool,
}

impl FakePlatform {
    pub fn new(probe: Probe) -> Self {
        Self {
            probe,
            deny_microphone: false,
        }
    }

    pub fn deny_microphone(mut self) -> Self {
        self.deny_microphone = true;
        self
    }
}

#[async_trait]
impl AudioPlatform for FakePlatform {
    async fn open_output(&self, _config: &AudioConfig) -> LiveResult<Box<dyn OutputContext>> {
        Ok(Box::new(FakeOutput::new(self.probe.clone())))
    }

    async fn open_input(&self, config: &AudioConfig) -> LiveResult<Box<dyn InputContext>> {
        let mut input = FakeInput::new(self.probe.clone(), config.input_sample_rate);
        input.deny = self.deny_microphone;
        Ok(Box::new(input))
    }
}

/// Output whose clock is whatever the probe says.
pub struct FakeOutput {
    probe: Probe,
}

impl FakeOutput {
    pub fn new(probe: Probe) -> Self {
        probe.with(|s| s.record.outputs_opened += 1);
        Self { probe }
    }
}

#[async_trait]
impl OutputContext for FakeOutput {
    async fn resume(&mut self) -> LiveResult<()> {
        Ok(())
    }

    fn current_time(&self) -> f64 {
        self.probe.clock()
    }

    fn schedule(&mut self, frame: AudioFrame, start_at: f64) -> LiveResult<()> {
        self.probe
            .with(|s| s.record.scheduled.push((start_at, frame.duration_secs())));
        Ok(())
    }

    async fn close(&mut self) -> LiveResult<()> {
        self.probe.with(|s| {
            s.record.outputs_closed += 1;
            s.release("output");
        });
        Ok(())
    }
}

pub struct FakeInput {
    probe: Probe,
    sample_rate: u32,
    deny: bool,
}

impl FakeInput {
    pub fn new(probe: Probe, sample_rate: u32) -> Self {
        probe.with(|s| s.record.inputs_opened += 1);
        Self {
            probe,
            sample_rate,
            deny: false,
        }
    }

    pub fn deny_microphone(mut self) -> Self {
        self.deny = true;
        self
    }
}

#[async_trait]
impl InputContext for FakeInput {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    async fn open_microphone(&mut self) -> LiveResult<Box<dyn MicrophoneStream>> {
        if self.deny {
            return Err(LiveError::PermissionDenied);
        }
        self.probe.with(|s| s.record.microphones_opened += 1);
        Ok(Box::new(FakeMicrophone {
            probe: self.probe.clone(),
        }))
    }

    async fn close(&mut self) -> LiveResult<()> {
        self.probe.with(|s| {
            s.record.inputs_closed += 1;
            s.release("input");
        });
        Ok(())
    }
}

/// Hands its sink to the probe; tests push samples through the probe.
pub struct FakeMicrophone {
    probe: Probe,
}

impl MicrophoneStream for FakeMicrophone {
    fn connect(&mut self, sink: FramingSink) -> LiveResult<()> {
        self.probe.with(|s| {
            s.sink = Some(sink);
            s.processor_noted = false;
        });
        Ok(())
    }

    fn stop_tracks(&mut self) {
        self.probe.with(|s| {
            s.record.tracks_stopped += 1;
            s.release("tracks");
        });
    }
}

#[derive(Clone)]
pub struct FakeConnector {
    probe: Probe,
    fail: bool,
    gate: Option<Arc<Notify>>,
    raise_on_connect: Arc<Mutex<Option<Arc<AtomicBool>>>>,
}

impl FakeConnector {
    pub fn new(probe: Probe) -> Self {
        Self {
            probe,
            fail: false,
            gate: None,
            raise_on_connect: Arc::new(Mutex::new(None)),
        }
    }

    /// Every connect attempt fails.
    pub fn failing(mut self) -> Self {
        self.fail = true;
        self
    }

    /// Connect waits until `gate` is notified.
    pub fn gated(mut self, gate: Arc<Notify>) -> Self {
        self.gate = Some(gate);
        self
    }

    /// Set `flag` while connecting, as a concurrent stop would.
    pub fn raise_on_connect(&self, flag: Arc<AtomicBool>) {
        *self.raise_on_connect.lock().unwrap() = Some(flag);
    }
}

#[async_trait]
impl LiveConnector for FakeConnector {
    async fn connect(&self, _config: &LiveConfig, events: EventSender) -> LiveResult<Box<dyn SessionHandle>> {
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }

        if self.fail {
            return Err(LiveError::ConnectionFailed("remote refused".to_string()));
        }

        let flag = self.raise_on_connect.lock().unwrap().clone();
        if let Some(flag) = flag {
            flag.store(true, Ordering::Release);
        }

        self.probe.with(|s| {
            s.record.sessions_opened += 1;
            s.remote_events = Some(events);
        });

        Ok(Box::new(FakeSession {
            probe: self.probe.clone(),
            open: true,
        }))
    }
}

pub struct FakeSession {
    probe: Probe,
    open: bool,
}

#[async_trait]
impl SessionHandle for FakeSession {
    fn is_open(&self) -> bool {
        self.open
    }

    async fn send_realtime_input(&mut self, envelope: TransportEnvelope) -> LiveResult<()> {
        if !self.open {
            return Err(LiveError::RemoteClosed);
        }
        self.probe.with(|s| s.record.sent.push(envelope));
        Ok(())
    }

    async fn close(&mut self) -> LiveResult<()> {
        if self.open {
            self.open = false;
            self.probe.with(|s| {
                s.record.sessions_closed += 1;
                s.release("session");
            });
        }
        Ok(())
    }
}
