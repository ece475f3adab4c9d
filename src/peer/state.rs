use crate::peer::transport::{MediaTransport, ToneSender};
use crate::peer::types::{IceCandidate, PeerId};
use crate::utils::random_id;
use std::collections::VecDeque;
use std::sync::{Arc, Weak};
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Состояние сессии с одним участником
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Negotiating,
    Connected,
    Recovering,
    Closed,
}

/// Кто начал текущее согласование
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Offerer,
    Answerer,
}

/// Таймеры сессии. Отменяются при Drop, поэтому закрытая сессия
/// не может оставить живой таймер.
#[derive(Default)]
pub struct SessionTimers {
    pub grace: Option<JoinHandle<()>>,
    pub watchdog: Option<JoinHandle<()>>,
}

impl SessionTimers {
    pub fn cancel_grace(&mut self) {
        if let Some(handle) = self.grace.take() {
            handle.abort();
        }
    }

    pub fn cancel_all(&mut self) {
        self.cancel_grace();
        if let Some(handle) = self.watchdog.take() {
            handle.abort();
        }
    }
}

impl Drop for SessionTimers {
    fn drop(&mut self) {
        self.cancel_all();
    }
}

/// ========== PEER SESSION ==========

pub struct PeerSession {
    pub peer_id: PeerId,
    pub epoch: u64,
    /// ID соединения для сопоставления логов
    pub connection_id: String,
    pub transport: Arc<dyn MediaTransport>,
    pub state: SessionState,
    pub role: Role,
    pub reconnect_attempts: u32,
    pub using_relay_only: bool,
    pub tone_sender: Option<Weak<dyn ToneSender>>,
    /// Кандидаты, полученные до установки remote description
    pub pending_candidates: VecDeque<IceCandidate>,
    pub remote_applied: bool,
    pub awaiting_answer: bool,
    pub ever_connected: bool,
    pub negotiating_since: Instant,
    pub timers: SessionTimers,
}

impl PeerSession {
    pub fn new(peer_id: PeerId, epoch: u64, transport: Arc<dyn MediaTransport>, role: Role) -> Self {
        Self {
            peer_id,
            epoch,
            connection_id: random_id(),
            transport,
            state: SessionState::Negotiating,
            role,
            reconnect_attempts: 0,
            using_relay_only: false,
            tone_sender: None,
            pending_candidates: VecDeque::new(),
            remote_applied: false,
            awaiting_answer: false,
            ever_connected: false,
            negotiating_since: Instant::now(),
            timers: SessionTimers::default(),
        }
    }

    pub fn is_live(&self) -> bool {
        self.state != SessionState::Closed
    }

    /// Наш первый offer ещё ждёт ответа: у вызываемого звонок висит в очереди
    pub fn is_ringing(&self) -> bool {
        self.awaiting_answer && !self.remote_applied && !self.ever_connected
    }

    /// Отложить кандидата или сказать, что его можно применять сразу
    pub fn buffer_candidate(&mut self, candidate: IceCandidate) -> Option<IceCandidate> {
        if self.remote_applied {
            Some(candidate)
        } else {
            self.pending_candidates.push_back(candidate);
            None
        }
    }

    /// Достать отложенные кандидаты (в порядке получения) после установки remote description
    pub fn take_pending_candidates(&mut self) -> Vec<IceCandidate> {
        self.remote_applied = true;
        self.pending_candidates.drain(..).collect()
    }

    /// Кэшированный tone sender; при протухшей ссылке резолвим заново
    pub fn resolve_tone_sender(&mut self) -> Option<Arc<dyn ToneSender>> {
        if let Some(sender) = self.tone_sender.as_ref().and_then(Weak::upgrade) {
            return Some(sender);
        }
        let sender = self.transport.tone_sender()?;
        self.tone_sender = Some(Arc::downgrade(&sender));
        Some(sender)
    }

    pub fn mark_connected(&mut self) {
        self.state = SessionState::Connected;
        self.reconnect_attempts = 0;
        self.ever_connected = true;
        self.timers.cancel_grace();
    }

    pub fn mark_closed(&mut self) {
        self.state = SessionState::Closed;
        self.timers.cancel_all();
        self.pending_candidates.clear();
        self.tone_sender = None;
    }
}

impl std::fmt::Debug for PeerSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeerSession")
            .field("peer_id", &self.peer_id)
            .field("epoch", &self.epoch)
            .field("connection_id", &self.connection_id)
            .field("state", &self.state)
            .field("role", &self.role)
            .field("reconnect_attempts", &self.reconnect_attempts)
            .field("using_relay_only", &self.using_relay_only)
            .field("pending_candidates", &self.pending_candidates.len())
            .finish()
    }
}

/// Снимок сессии для UI и тестов
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub peer_id: PeerId,
    pub epoch: u64,
    pub state: SessionState,
    pub role: Role,
    pub reconnect_attempts: u32,
    pub using_relay_only: bool,
    pub pending_candidates: usize,
}

impl From<&PeerSession> for SessionSnapshot {
    fn from(s: &PeerSession) -> Self {
        SessionSnapshot {
            peer_id: s.peer_id.clone(),
            epoch: s.epoch,
            state: s.state,
            role: s.role,
            reconnect_attempts: s.reconnect_attempts,
            using_relay_only: s.using_relay_only,
            pending_candidates: s.pending_candidates.len(),
        }
    }
}
