//! Ошибки звонка.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CallError {
    #[error("peer already in call: {0}")]
    AlreadyInCall(String),

    #[error("no pending call")]
    NoPendingCall,

    #[error("no pending invite")]
    NoPendingInvite,

    #[error("invalid tone digit: {0:?}")]
    InvalidTone(char),

    /// Локальная ошибка настройки сессии (offer/answer/description), без повторов
    #[error("session setup failed for {peer}: {reason}")]
    Setup { peer: String, reason: String },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("signaling error: {0}")]
    Signaling(String),

    #[error("channel closed")]
    ChannelClosed,

    #[error("config error: {0}")]
    Config(String),

    #[error(transparent)]
    WebRtc(#[from] webrtc::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
}

impl CallError {
    pub fn setup(peer: &str, reason: impl std::fmt::Display) -> Self {
        Self::Setup {
            peer: peer.to_string(),
            reason: reason.to_string(),
        }
    }
}

pub type Result<T, E = CallError> = std::result::Result<T, E>;
