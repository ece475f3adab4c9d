// Shared fixtures for orchestrator integration tests: an in-memory media
// transport, a factory that records what it built, and a signaling sink
// that captures every outbound event.
#![allow(dead_code)]

use async_trait::async_trait;
use meshcall_lib::call::{CallOrchestrator, Input};
use meshcall_lib::peer::{
    Connectivity, IceCandidate, MediaTransport, SessionDescription, ToneSender, TransportFactory,
    TransportNotifier,
};
use meshcall_lib::signaling::{OutboundSignal, SignalingSink};
use meshcall_lib::{CallConfig, CallError, CallEvent, EventEmitter, Result};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

#[derive(Default)]
pub struct MockTone {
    pub tones: Mutex<Vec<String>>,
}

#[async_trait]
impl ToneSender for MockTone {
    async fn insert_tones(&self, tones: &str) -> Result<()> {
        self.tones.lock().unwrap().push(tones.to_string());
        Ok(())
    }
}

pub struct MockTransport {
    pub peer_id: String,
    pub notifier: TransportNotifier,
    pub ops: Mutex<Vec<String>>,
    pub connectivity: Mutex<Connectivity>,
    pub tone_capable: AtomicBool,
    pub tone: Arc<MockTone>,
    pub fail_answer: bool,
    offers: AtomicUsize,
}

impl MockTransport {
    fn new(peer_id: &str, notifier: TransportNotifier, fail_answer: bool) -> Self {
        Self {
            peer_id: peer_id.to_string(),
            notifier,
            ops: Mutex::new(Vec::new()),
            connectivity: Mutex::new(Connectivity::New),
            tone_capable: AtomicBool::new(true),
            tone: Arc::new(MockTone::default()),
            fail_answer,
            offers: AtomicUsize::new(0),
        }
    }

    fn record(&self, op: impl Into<String>) {
        self.ops.lock().unwrap().push(op.into());
    }

    pub fn ops(&self) -> Vec<String> {
        self.ops.lock().unwrap().clone()
    }

    pub fn count(&self, prefix: &str) -> usize {
        self.ops().iter().filter(|op| op.starts_with(prefix)).count()
    }

    /// Simulates the transport noticing a connectivity change.
    pub fn report(&self, state: Connectivity) {
        *self.connectivity.lock().unwrap() = state;
        self.notifier.connectivity_changed(state);
    }

    /// Changes connectivity without emitting a notification.
    pub fn set_silently(&self, state: Connectivity) {
        *self.connectivity.lock().unwrap() = state;
    }

    pub fn sent_tones(&self) -> Vec<String> {
        self.tone.tones.lock().unwrap().clone()
    }
}

#[async_trait]
impl MediaTransport for MockTransport {
    async fn attach_local_tracks(&self) -> Result<()> {
        self.record("attach");
        Ok(())
    }

    async fn create_offer(&self) -> Result<SessionDescription> {
        let n = self.offers.fetch_add(1, Ordering::SeqCst);
        self.record("create_offer");
        Ok(SessionDescription::offer(format!("offer-{}-{}", self.peer_id, n)))
    }

    async fn create_answer(&self) -> Result<SessionDescription> {
        self.record("create_answer");
        if self.fail_answer {
            return Err(CallError::Transport("answer refused".into()));
        }
        Ok(SessionDescription::answer(format!("answer-{}", self.peer_id)))
    }

    async fn set_local_description(&self, desc: SessionDescription) -> Result<()> {
        self.record(format!("set_local:{}", desc.sdp));
        Ok(())
    }

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<()> {
        self.record(format!("set_remote:{}", desc.sdp));
        Ok(())
    }

    async fn add_candidate(&self, candidate: IceCandidate) -> Result<()> {
        self.record(format!("add_candidate:{}", candidate.candidate));
        Ok(())
    }

    async fn regather_and_renegotiate(&self) -> Result<SessionDescription> {
        self.record("regather");
        Ok(SessionDescription::offer(format!("restart-{}", self.peer_id)))
    }

    async fn restrict_to_relay_paths(&self) -> Result<()> {
        self.record("relay_only");
        Ok(())
    }

    fn connectivity(&self) -> Connectivity {
        *self.connectivity.lock().unwrap()
    }

    fn tone_sender(&self) -> Option<Arc<dyn ToneSender>> {
        if self.tone_capable.load(Ordering::SeqCst) {
            Some(self.tone.clone() as Arc<dyn ToneSender>)
        } else {
            None
        }
    }

    async fn close(&self) -> Result<()> {
        self.record("close");
        Ok(())
    }
}

#[derive(Default)]
pub struct MockFactory {
    pub built: Mutex<Vec<Arc<MockTransport>>>,
    pub fail_create: AtomicBool,
    pub fail_answer: AtomicBool,
}

impl MockFactory {
    /// Most recent transport built for `peer`.
    pub fn latest(&self, peer: &str) -> Arc<MockTransport> {
        self.built
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|t| t.peer_id == peer)
            .cloned()
            .unwrap_or_else(|| panic!("no transport built for {peer}"))
    }

    pub fn built_for(&self, peer: &str) -> usize {
        self.built
            .lock()
            .unwrap()
            .iter()
            .filter(|t| t.peer_id == peer)
            .count()
    }

    pub fn total(&self) -> usize {
        self.built.lock().unwrap().len()
    }
}

#[async_trait]
impl TransportFactory for MockFactory {
    async fn create(
        &self,
        peer_id: &str,
        notifier: TransportNotifier,
    ) -> Result<Arc<dyn MediaTransport>> {
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(CallError::Transport("no media device".into()));
        }
        let transport = Arc::new(MockTransport::new(
            peer_id,
            notifier,
            self.fail_answer.load(Ordering::SeqCst),
        ));
        self.built.lock().unwrap().push(transport.clone());
        Ok(transport)
    }
}

#[derive(Default)]
pub struct RecordingSignaling {
    pub sent: Mutex<Vec<OutboundSignal>>,
}

impl RecordingSignaling {
    pub fn take(&self) -> Vec<OutboundSignal> {
        std::mem::take(&mut *self.sent.lock().unwrap())
    }
}

impl SignalingSink for RecordingSignaling {
    fn send(&self, signal: OutboundSignal) -> Result<()> {
        self.sent.lock().unwrap().push(signal);
        Ok(())
    }
}

pub struct Harness {
    pub orch: CallOrchestrator,
    pub factory: Arc<MockFactory>,
    pub signals: Arc<RecordingSignaling>,
    pub events: mpsc::UnboundedReceiver<CallEvent>,
    pub inputs: mpsc::UnboundedReceiver<Input>,
    pub config: CallConfig,
}

impl Harness {
    pub fn new(self_id: &str) -> Self {
        Self::with_config(self_id, CallConfig::default())
    }

    pub fn with_config(self_id: &str, config: CallConfig) -> Self {
        let factory = Arc::new(MockFactory::default());
        let signals = Arc::new(RecordingSignaling::default());
        let (events, events_rx) = EventEmitter::channel();
        let (input_tx, input_rx) = mpsc::unbounded_channel();
        let orch = CallOrchestrator::new(
            self_id,
            config.clone(),
            factory.clone(),
            signals.clone(),
            events,
            input_tx,
        );
        Self {
            orch,
            factory,
            signals,
            events: events_rx,
            inputs: input_rx,
            config,
        }
    }

    /// Feeds everything the transports and timers queued so far.
    pub async fn pump(&mut self) {
        for _ in 0..4 {
            tokio::task::yield_now().await;
        }
        while let Ok(input) = self.inputs.try_recv() {
            if let Err(e) = self.orch.handle(input).await {
                eprintln!("input failed: {e}");
            }
        }
    }

    /// Sleeps on the (paused) clock, then pumps.
    pub async fn advance(&mut self, by: Duration) {
        tokio::time::sleep(by).await;
        self.pump().await;
    }

    pub fn drain_events(&mut self) -> Vec<CallEvent> {
        let mut out = Vec::new();
        while let Ok(evt) = self.events.try_recv() {
            out.push(evt);
        }
        out
    }

    /// Places an outgoing call and completes the offer/answer exchange.
    pub async fn connect_to(&mut self, peer: &str) {
        self.orch.initiate_call(peer.into()).await.unwrap();
        self.orch
            .receive_answer(peer, SessionDescription::answer(format!("answer-from-{peer}")))
            .await
            .unwrap();
        self.factory.latest(peer).report(Connectivity::Connected);
        self.pump().await;
    }
}

pub fn candidate(n: u32) -> IceCandidate {
    IceCandidate {
        candidate: format!("candidate:{n} 1 udp 2122260223 10.0.0.{n} 5000{n} typ host"),
        sdp_mid: Some("0".into()),
        sdp_mline_index: Some(0),
        username_fragment: None,
    }
}

pub fn offers_to(signals: &[OutboundSignal]) -> Vec<String> {
    signals
        .iter()
        .filter_map(|s| match s {
            OutboundSignal::CallUser { to_user_id, .. } => Some(to_user_id.clone()),
            _ => None,
        })
        .collect()
}
