use super::pending::{PendingCall, PendingInvite, PendingQueue};
use super::{Command, Input, TimerEvent, TimerKind};
use crate::config::CallConfig;
use crate::error::{CallError, Result};
use crate::events::{CallEvent, CloseReason, EventEmitter, ToneEntry};
use crate::peer::state::{PeerSession, Role, SessionSnapshot};
use crate::peer::transport::{
    MediaTransport, TransportEvent, TransportEventKind, TransportFactory, TransportNotifier,
};
use crate::peer::types::{PeerId, SessionDescription};
use crate::signaling::{InboundSignal, OutboundSignal, SignalingSink};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::{interval_at, sleep, Instant};

/// Владелец всех сессий, ростера и очередей ожидания
pub struct CallOrchestrator {
    pub(super) self_id: PeerId,
    pub(super) config: CallConfig,
    factory: Arc<dyn TransportFactory>,
    signaling: Arc<dyn SignalingSink>,
    pub(super) events: EventEmitter,
    inputs: mpsc::UnboundedSender<Input>,
    pub(super) sessions: HashMap<PeerId, PeerSession>,
    pub(super) roster: BTreeSet<PeerId>,
    pub(super) pending_calls: PendingQueue<PendingCall>,
    pub(super) pending_invites: PendingQueue<PendingInvite>,
    pub(super) tones: Vec<ToneEntry>,
    next_epoch: u64,
}

impl CallOrchestrator {
    /// `inputs`: отправляющая сторона той же очереди, которую потом
    /// читает [`CallOrchestrator::run`]; таймеры и транспорт пишут в неё.
    pub fn new(
        self_id: impl Into<PeerId>,
        config: CallConfig,
        factory: Arc<dyn TransportFactory>,
        signaling: Arc<dyn SignalingSink>,
        events: EventEmitter,
        inputs: mpsc::UnboundedSender<Input>,
    ) -> Self {
        Self {
            self_id: self_id.into(),
            config,
            factory,
            signaling,
            events,
            inputs,
            sessions: HashMap::new(),
            roster: BTreeSet::new(),
            pending_calls: PendingQueue::default(),
            pending_invites: PendingQueue::default(),
            tones: Vec::new(),
            next_epoch: 1,
        }
    }

    /// Главный цикл: один вход за раз, до `Command::Quit` или закрытия очереди
    pub async fn run(mut self, mut inputs: mpsc::UnboundedReceiver<Input>) {
        log::info!("Call orchestrator for '{}' started", self.self_id);
        while let Some(input) = inputs.recv().await {
            if matches!(input, Input::Command(Command::Quit)) {
                break;
            }
            if let Err(e) = self.handle(input).await {
                log::warn!("{}", e);
            }
        }
        self.leave_call().await;
        log::info!("Call orchestrator for '{}' stopped", self.self_id);
    }

    pub async fn handle(&mut self, input: Input) -> Result<()> {
        match input {
            Input::Signal(signal) => self.handle_signal(signal).await,
            Input::Command(command) => self.handle_command(command).await,
            Input::Transport(evt) => self.handle_transport_event(evt).await,
            Input::Timer(TimerEvent {
                peer_id,
                epoch,
                kind,
            }) => match kind {
                TimerKind::Grace => self.on_grace_expired(&peer_id, epoch).await,
                TimerKind::Watchdog => self.on_watchdog_tick(&peer_id, epoch).await,
            },
            Input::Channel(status) => {
                log::info!("Signaling channel status: {:?}", status);
                self.events.emit(CallEvent::SignalingStatus(status));
                Ok(())
            }
        }
    }

    async fn handle_signal(&mut self, signal: InboundSignal) -> Result<()> {
        match signal {
            InboundSignal::OnlineUsers(users) => {
                let others = users.into_iter().filter(|u| *u != self.self_id).collect();
                self.events.emit(CallEvent::OnlineUsers(others));
                Ok(())
            }
            InboundSignal::IncomingCall {
                from_user_id,
                offer,
            } => self.receive_offer(from_user_id, offer).await,
            InboundSignal::CallAnswered {
                from_user_id,
                answer,
            } => self.receive_answer(&from_user_id, answer).await,
            InboundSignal::CallRejected { from_user_id } => {
                self.receive_call_rejected(&from_user_id).await;
                Ok(())
            }
            InboundSignal::IceCandidate {
                from_user_id,
                candidate,
            } => {
                self.receive_candidate(&from_user_id, candidate).await;
                Ok(())
            }
            InboundSignal::JoinCall { joining_user_id } => {
                self.receive_join_call(joining_user_id).await
            }
            InboundSignal::IncomingInvite { from_user_id } => {
                self.receive_invite(from_user_id);
                Ok(())
            }
            InboundSignal::InviteAccepted { from_user_id } => {
                self.receive_invite_accepted(&from_user_id);
                Ok(())
            }
            InboundSignal::InviteRejected { from_user_id } => {
                self.receive_invite_rejected(&from_user_id);
                Ok(())
            }
            InboundSignal::NewParticipantJoined { new_participant } => {
                self.receive_new_participant(new_participant).await
            }
            InboundSignal::ParticipantLeft { leaving_user_id } => {
                self.receive_participant_left(&leaving_user_id).await;
                Ok(())
            }
            InboundSignal::DtmfTone { digit, sender } => {
                self.receive_tone(digit, sender);
                Ok(())
            }
        }
    }

    async fn handle_command(&mut self, command: Command) -> Result<()> {
        match command {
            Command::Login => self.login(),
            Command::Call(peer) => self.initiate_call(peer).await,
            Command::Invite(peer) => self.invite_to_join(peer).await,
            Command::AcceptCall => self.accept_pending_call().await,
            Command::RejectCall => self.reject_pending_call(),
            Command::AcceptInvite => self.accept_pending_invite().await,
            Command::RejectInvite => self.reject_pending_invite(),
            Command::Leave => {
                self.leave_call().await;
                Ok(())
            }
            Command::Tone(digit) => self.send_tone(digit).await,
            Command::Quit => Ok(()),
        }
    }

    async fn handle_transport_event(&mut self, evt: TransportEvent) -> Result<()> {
        let TransportEvent {
            peer_id,
            epoch,
            kind,
        } = evt;
        if self.live_session(&peer_id, epoch).is_none() {
            log::debug!("Dropping transport event for stale session {}#{}", peer_id, epoch);
            return Ok(());
        }

        match kind {
            TransportEventKind::LocalCandidate(candidate) => {
                log::debug!("Sending ICE candidate to {}", peer_id);
                self.send(OutboundSignal::IceCandidate {
                    to_user_id: peer_id,
                    candidate,
                })
            }
            TransportEventKind::Connectivity(state) => {
                self.on_connectivity_change(&peer_id, epoch, state).await
            }
            TransportEventKind::RemoteMedia(stream_id) => {
                self.events.emit(CallEvent::RemoteMedia {
                    peer: peer_id,
                    stream_id,
                });
                Ok(())
            }
        }
    }

    // ========== READ-ONLY VIEW ==========

    pub fn self_id(&self) -> &str {
        &self.self_id
    }

    pub fn roster(&self) -> Vec<PeerId> {
        self.roster.iter().cloned().collect()
    }

    pub fn in_call(&self) -> bool {
        !self.roster.is_empty()
    }

    pub fn session(&self, peer_id: &str) -> Option<SessionSnapshot> {
        self.sessions.get(peer_id).map(SessionSnapshot::from)
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    pub fn pending_call(&self) -> Option<&PendingCall> {
        self.pending_calls.front()
    }

    pub fn queued_calls(&self) -> usize {
        self.pending_calls.len()
    }

    pub fn pending_invite(&self) -> Option<&PendingInvite> {
        self.pending_invites.front()
    }

    pub fn tone_display(&self) -> &[ToneEntry] {
        &self.tones
    }

    // ========== SESSION PLUMBING ==========

    pub(super) fn send(&self, signal: OutboundSignal) -> Result<()> {
        self.signaling.send(signal)
    }

    /// Сессия текущего воплощения; устаревшие продолжения получают None
    pub(super) fn live_session(&mut self, peer_id: &str, epoch: u64) -> Option<&mut PeerSession> {
        self.sessions
            .get_mut(peer_id)
            .filter(|s| s.epoch == epoch && s.is_live())
    }

    /// Создаёт сессию (Negotiating) и добавляет участника в ростер
    pub(super) async fn open_session(&mut self, peer_id: &str, role: Role) -> Result<()> {
        if self.sessions.contains_key(peer_id) {
            return Err(CallError::AlreadyInCall(peer_id.to_string()));
        }

        let epoch = self.next_epoch;
        self.next_epoch += 1;
        let notifier = TransportNotifier::new(peer_id.to_string(), epoch, self.inputs.clone());

        let transport = match self.factory.create(peer_id, notifier).await {
            Ok(t) => t,
            Err(e) => {
                self.events.emit_session_failed(peer_id, &e.to_string());
                // место могло остаться от заменённой сессии
                if self.roster.remove(peer_id) && self.roster.is_empty() {
                    self.on_roster_emptied();
                }
                return Err(CallError::setup(peer_id, e));
            }
        };

        let session = PeerSession::new(peer_id.to_string(), epoch, transport, role);
        log::info!(
            "Opened session with {} (epoch {}, connection {}, {:?})",
            peer_id,
            epoch,
            session.connection_id,
            role
        );
        self.sessions.insert(peer_id.to_string(), session);
        self.roster.insert(peer_id.to_string());
        self.start_watchdog(peer_id);

        // сессия появилась другим путём, ожидающий звонок этого участника больше не нужен
        if let Some((_, was_front)) = self.pending_calls.remove_peer(peer_id) {
            log::info!("Pending call from {} superseded by a live session", peer_id);
            if was_front {
                self.present_next_call();
            }
        }
        Ok(())
    }

    /// Offer на существующей сессии: треки, offer, local description, call-user
    pub(super) async fn send_offer(&mut self, peer_id: &str) -> Result<()> {
        let Some(session) = self.sessions.get(peer_id) else {
            return Err(CallError::setup(peer_id, "no session"));
        };
        let epoch = session.epoch;
        let transport = session.transport.clone();

        let offer = match Self::make_offer(transport.as_ref()).await {
            Ok(offer) => offer,
            Err(e) => return Err(self.fail_session(peer_id, e).await),
        };

        // продолжение после await: сессия могла смениться
        let Some(session) = self.live_session(peer_id, epoch) else {
            log::debug!("Session with {} went away while creating offer", peer_id);
            return Ok(());
        };
        session.role = Role::Offerer;
        session.awaiting_answer = true;

        log::info!("Sending offer to {}", peer_id);
        self.send(OutboundSignal::CallUser {
            to_user_id: peer_id.to_string(),
            offer,
        })
    }

    async fn make_offer(transport: &dyn MediaTransport) -> Result<SessionDescription> {
        transport.attach_local_tracks().await?;
        let offer = transport.create_offer().await?;
        transport.set_local_description(offer.clone()).await?;
        Ok(offer)
    }

    /// Ответ на offer: remote description, кандидаты, треки, answer, answer-call
    pub(super) async fn answer_offer(&mut self, peer_id: &str, offer: SessionDescription) -> Result<()> {
        let Some(epoch) = self.sessions.get(peer_id).map(|s| s.epoch) else {
            return Err(CallError::setup(peer_id, "no session"));
        };

        if let Err(e) = self.apply_remote_description(peer_id, epoch, offer).await {
            return Err(self.fail_session(peer_id, e).await);
        }

        let Some(transport) = self.live_session(peer_id, epoch).map(|s| s.transport.clone()) else {
            return Ok(());
        };
        let answer = async {
            transport.attach_local_tracks().await?;
            let answer = transport.create_answer().await?;
            transport.set_local_description(answer.clone()).await?;
            Ok::<_, CallError>(answer)
        }
        .await;
        let answer = match answer {
            Ok(answer) => answer,
            Err(e) => return Err(self.fail_session(peer_id, e).await),
        };

        let Some(session) = self.live_session(peer_id, epoch) else {
            return Ok(());
        };
        // ответившая сторона не перезапускает ICE сама
        session.role = Role::Answerer;
        session.awaiting_answer = false;
        log::info!("Sending answer to {}", peer_id);
        self.send(OutboundSignal::AnswerCall {
            to_user_id: peer_id.to_string(),
            answer,
        })
    }

    /// setRemoteDescription и сразу же, в том же ходе, отложенные кандидаты по порядку
    pub(super) async fn apply_remote_description(
        &mut self,
        peer_id: &str,
        epoch: u64,
        desc: SessionDescription,
    ) -> Result<()> {
        let Some(transport) = self.live_session(peer_id, epoch).map(|s| s.transport.clone()) else {
            return Ok(());
        };
        transport.set_remote_description(desc).await?;

        let Some(session) = self.live_session(peer_id, epoch) else {
            return Ok(());
        };
        let pending = session.take_pending_candidates();
        if !pending.is_empty() {
            log::info!("Applying {} pending candidates for {}", pending.len(), peer_id);
        }
        for candidate in pending {
            log::debug!("Applying pending candidate: {:?}", candidate);
            if let Err(e) = transport.add_candidate(candidate).await {
                log::warn!("Failed to apply pending candidate from {}: {}", peer_id, e);
            }
        }
        Ok(())
    }

    /// Локальная ошибка настройки: без повторов, сессия закрывается сразу
    pub(super) async fn fail_session(&mut self, peer_id: &str, err: CallError) -> CallError {
        self.events.emit_session_failed(peer_id, &err.to_string());
        self.close_session(peer_id, CloseReason::SetupFailed).await;
        CallError::setup(peer_id, err)
    }

    /// Единственный путь в Closed: таймеры, транспорт, ростер
    pub(super) async fn close_session(&mut self, peer_id: &str, reason: CloseReason) {
        let Some(mut session) = self.sessions.remove(peer_id) else {
            return;
        };
        session.mark_closed();
        log::info!(
            "Closing session with {} (epoch {}): {:?}",
            peer_id,
            session.epoch,
            reason
        );
        if let Err(e) = session.transport.close().await {
            log::warn!("Failed to close transport for {}: {}", peer_id, e);
        }

        // при замене сессии место в ростере переходит к новой
        if reason == CloseReason::Superseded {
            return;
        }

        // иначе у удалённой стороны остаётся наш offer в очереди или мёртвая сессия
        if matches!(reason, CloseReason::ConnectionLost | CloseReason::SetupFailed) {
            if let Err(e) = self.send(OutboundSignal::ParticipantLeft {
                to_user_id: peer_id.to_string(),
                leaving_user_id: self.self_id.clone(),
            }) {
                log::warn!("Failed to tell {} we dropped the session: {}", peer_id, e);
            }
        }

        let was_member = self.roster.remove(peer_id);
        if !matches!(reason, CloseReason::LocalLeave) {
            self.events.emit_removed(peer_id, reason);
        }
        if was_member && self.roster.is_empty() {
            self.on_roster_emptied();
        }
    }

    fn on_roster_emptied(&mut self) {
        log::info!("Call roster is empty, call ended");
        self.clear_tone_state();
        self.events.emit(CallEvent::CallEnded);
    }

    pub(super) fn present_next_call(&self) {
        if let Some(call) = self.pending_calls.front() {
            log::info!("Presenting incoming call from {}", call.peer_id);
            self.events.emit(CallEvent::IncomingCall {
                from: call.peer_id.clone(),
                offer: call.offer.clone(),
            });
        }
    }

    pub(super) fn present_next_invite(&self) {
        if let Some(invite) = self.pending_invites.front() {
            log::info!("Presenting invite from {}", invite.peer_id);
            self.events.emit(CallEvent::IncomingInvite {
                from: invite.peer_id.clone(),
            });
        }
    }

    // ========== TIMERS ==========

    fn start_watchdog(&mut self, peer_id: &str) {
        let period = self.config.watchdog_interval;
        let tx = self.inputs.clone();
        let Some(session) = self.sessions.get_mut(peer_id) else {
            return;
        };
        let tick = TimerEvent {
            peer_id: peer_id.to_string(),
            epoch: session.epoch,
            kind: TimerKind::Watchdog,
        };
        let handle = tokio::spawn(async move {
            let mut interval = interval_at(Instant::now() + period, period);
            loop {
                interval.tick().await;
                if tx.send(Input::Timer(tick.clone())).is_err() {
                    break;
                }
            }
        });
        if let Some(old) = session.timers.watchdog.replace(handle) {
            old.abort();
        }
    }

    /// Запускает grace таймер, если он ещё не запущен
    pub(super) fn arm_grace_timer(&mut self, peer_id: &str) {
        let grace = self.config.grace_period;
        let tx = self.inputs.clone();
        let Some(session) = self.sessions.get_mut(peer_id) else {
            return;
        };
        if session.timers.grace.is_some() {
            log::debug!("Grace timer for {} already pending, ignoring", peer_id);
            return;
        }
        let fired = TimerEvent {
            peer_id: peer_id.to_string(),
            epoch: session.epoch,
            kind: TimerKind::Grace,
        };
        log::info!("Grace period for {} started, waiting {:?}", peer_id, grace);
        session.timers.grace = Some(tokio::spawn(async move {
            sleep(grace).await;
            let _ = tx.send(Input::Timer(fired));
        }));
    }
}
