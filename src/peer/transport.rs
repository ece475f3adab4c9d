//! Граница медиа-транспорта: то, что оркестратор требует от peer connection.
//!
//! Реальная реализация живёт в [`crate::peer::connection`], в тестах
//! используется мок.

use crate::call::Input;
use crate::error::Result;
use crate::peer::types::{Connectivity, IceCandidate, PeerId, SessionDescription};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Вставка DTMF тонов в исходящий аудио путь
#[async_trait]
pub trait ToneSender: Send + Sync {
    async fn insert_tones(&self, tones: &str) -> Result<()>;
}

/// Peer connection к одному удалённому участнику
#[async_trait]
pub trait MediaTransport: Send + Sync {
    async fn attach_local_tracks(&self) -> Result<()>;

    async fn create_offer(&self) -> Result<SessionDescription>;

    async fn create_answer(&self) -> Result<SessionDescription>;

    async fn set_local_description(&self, desc: SessionDescription) -> Result<()>;

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<()>;

    async fn add_candidate(&self, candidate: IceCandidate) -> Result<()>;

    /// ICE restart: пересобрать кандидатов и вернуть новый offer (уже local description)
    async fn regather_and_renegotiate(&self) -> Result<SessionDescription>;

    /// Перевести ICE на relay-only (TURN)
    async fn restrict_to_relay_paths(&self) -> Result<()>;

    /// Текущее состояние связности, для сторожевой проверки
    fn connectivity(&self) -> Connectivity;

    /// Возможность вставки тонов, если транспорт её поддерживает
    fn tone_sender(&self) -> Option<Arc<dyn ToneSender>>;

    async fn close(&self) -> Result<()>;
}

/// Фабрика транспортов, по одному на участника
#[async_trait]
pub trait TransportFactory: Send + Sync {
    async fn create(
        &self,
        peer_id: &str,
        notifier: TransportNotifier,
    ) -> Result<Arc<dyn MediaTransport>>;
}

/// Уведомления транспорта
#[derive(Debug, Clone)]
pub enum TransportEventKind {
    LocalCandidate(IceCandidate),
    Connectivity(Connectivity),
    /// Удалённый трек доступен; строка: id потока
    RemoteMedia(String),
}

#[derive(Debug, Clone)]
pub struct TransportEvent {
    pub peer_id: PeerId,
    pub epoch: u64,
    pub kind: TransportEventKind,
}

/// Отправляет уведомления транспорта в очередь оркестратора,
/// помеченные peer_id и epoch сессии
#[derive(Debug, Clone)]
pub struct TransportNotifier {
    peer_id: PeerId,
    epoch: u64,
    tx: mpsc::UnboundedSender<Input>,
}

impl TransportNotifier {
    pub fn new(peer_id: PeerId, epoch: u64, tx: mpsc::UnboundedSender<Input>) -> Self {
        Self { peer_id, epoch, tx }
    }

    pub fn peer_id(&self) -> &str {
        &self.peer_id
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn local_candidate(&self, candidate: IceCandidate) {
        self.post(TransportEventKind::LocalCandidate(candidate));
    }

    pub fn connectivity_changed(&self, state: Connectivity) {
        self.post(TransportEventKind::Connectivity(state));
    }

    pub fn remote_media(&self, stream_id: String) {
        self.post(TransportEventKind::RemoteMedia(stream_id));
    }

    fn post(&self, kind: TransportEventKind) {
        let evt = TransportEvent {
            peer_id: self.peer_id.clone(),
            epoch: self.epoch,
            kind,
        };
        // оркестратор остановлен, уведомление больше никому не нужно
        let _ = self.tx.send(Input::Transport(evt));
    }
}
