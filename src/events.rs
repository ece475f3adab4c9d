//! События для пользовательского слоя (UI, CLI).

use crate::peer::types::{PeerId, SessionDescription};
use serde::Serialize;
use tokio::sync::mpsc;

/// Состояние канала сигнализации
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ChannelStatus {
    Connected,
    Disconnected,
    Error(String),
}

/// Почему участник убран из звонка
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum CloseReason {
    /// Участник сам вышел
    RemoteLeft,
    /// Мы вышли из звонка
    LocalLeave,
    /// Политика восстановления исчерпала попытки
    ConnectionLost,
    /// Ошибка настройки сессии
    SetupFailed,
    /// Удалённая сторона отклонила звонок
    Rejected,
    /// Заменена новой сессией (glare)
    Superseded,
}

/// Одна запись на табло тонов
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ToneEntry {
    pub sender: PeerId,
    pub digit: char,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum CallEvent {
    SignalingStatus(ChannelStatus),
    OnlineUsers(Vec<PeerId>),
    IncomingCall { from: PeerId, offer: SessionDescription },
    IncomingInvite { from: PeerId },
    PeerConnected { peer: PeerId },
    ConnectionProblem { peer: PeerId },
    PeerRecovered { peer: PeerId },
    PeerRemoved { peer: PeerId, reason: CloseReason },
    SessionFailed { peer: PeerId, reason: String },
    CallRejected { peer: PeerId },
    InviteAccepted { peer: PeerId },
    InviteDeclined { peer: PeerId },
    RemoteMedia { peer: PeerId, stream_id: String },
    ToneDisplay { entries: Vec<ToneEntry> },
    CallEnded,
}

/// Отправка событий наверх. Если получатель ушёл, события просто теряются.
#[derive(Debug, Clone)]
pub struct EventEmitter {
    tx: mpsc::UnboundedSender<CallEvent>,
}

impl EventEmitter {
    pub fn new(tx: mpsc::UnboundedSender<CallEvent>) -> Self {
        Self { tx }
    }

    pub fn channel() -> (Self, mpsc::UnboundedReceiver<CallEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx), rx)
    }

    pub fn emit(&self, evt: CallEvent) {
        log::debug!("emit called with event: {:?}", evt);
        if self.tx.send(evt).is_err() {
            log::debug!("event receiver dropped, event discarded");
        }
    }

    pub fn emit_connected(&self, peer: &str) {
        log::info!("Peer {} connected", peer);
        self.emit(CallEvent::PeerConnected { peer: peer.into() });
    }

    pub fn emit_connection_problem(&self, peer: &str) {
        log::warn!("Connection issues detected with {}", peer);
        self.emit(CallEvent::ConnectionProblem { peer: peer.into() });
    }

    pub fn emit_connection_recovered(&self, peer: &str) {
        log::info!("Connection with {} recovered", peer);
        self.emit(CallEvent::PeerRecovered { peer: peer.into() });
    }

    pub fn emit_removed(&self, peer: &str, reason: CloseReason) {
        log::info!("Peer {} removed from call: {:?}", peer, reason);
        self.emit(CallEvent::PeerRemoved {
            peer: peer.into(),
            reason,
        });
    }

    pub fn emit_session_failed(&self, peer: &str, reason: &str) {
        log::error!("Session with {} failed: {}", peer, reason);
        self.emit(CallEvent::SessionFailed {
            peer: peer.into(),
            reason: reason.into(),
        });
    }
}
