//! Канал сигнализации: именованные JSON события поверх WebSocket.
//!
//! Каждый кадр — `{"event": "<имя>", "data": <payload>}`.

use crate::call::Input;
use crate::error::{CallError, Result};
use crate::events::ChannelStatus;
use crate::peer::types::{IceCandidate, PeerId, SessionDescription};
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message};

/// События, которые клиент отправляет серверу
#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(
    tag = "event",
    content = "data",
    rename_all = "kebab-case",
    rename_all_fields = "camelCase"
)]
pub enum OutboundSignal {
    Login(PeerId),
    CallUser {
        to_user_id: PeerId,
        offer: SessionDescription,
    },
    AnswerCall {
        to_user_id: PeerId,
        answer: SessionDescription,
    },
    RejectCall {
        to_user_id: PeerId,
    },
    IceCandidate {
        to_user_id: PeerId,
        candidate: IceCandidate,
    },
    JoinCall {
        joining_user_id: PeerId,
    },
    AcceptInvite {
        from_user_id: PeerId,
    },
    RejectInvite {
        from_user_id: PeerId,
    },
    NewParticipantJoined {
        to_user_id: PeerId,
        new_participant: PeerId,
    },
    ParticipantLeft {
        to_user_id: PeerId,
        leaving_user_id: PeerId,
    },
    DtmfTone {
        to_user_id: PeerId,
        digit: char,
        sender: PeerId,
    },
}

impl OutboundSignal {
    /// Кому адресовано событие (None для login и join-call)
    pub fn recipient(&self) -> Option<&str> {
        match self {
            OutboundSignal::Login(_) | OutboundSignal::JoinCall { .. } => None,
            OutboundSignal::CallUser { to_user_id, .. }
            | OutboundSignal::AnswerCall { to_user_id, .. }
            | OutboundSignal::RejectCall { to_user_id }
            | OutboundSignal::IceCandidate { to_user_id, .. }
            | OutboundSignal::NewParticipantJoined { to_user_id, .. }
            | OutboundSignal::ParticipantLeft { to_user_id, .. }
            | OutboundSignal::DtmfTone { to_user_id, .. } => Some(to_user_id),
            OutboundSignal::AcceptInvite { from_user_id }
            | OutboundSignal::RejectInvite { from_user_id } => Some(from_user_id),
        }
    }
}

/// События, которые сервер пересылает клиенту
#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(
    tag = "event",
    content = "data",
    rename_all = "kebab-case",
    rename_all_fields = "camelCase"
)]
pub enum InboundSignal {
    OnlineUsers(Vec<PeerId>),
    IncomingCall {
        from_user_id: PeerId,
        offer: SessionDescription,
    },
    CallAnswered {
        from_user_id: PeerId,
        answer: SessionDescription,
    },
    CallRejected {
        from_user_id: PeerId,
    },
    IceCandidate {
        from_user_id: PeerId,
        candidate: IceCandidate,
    },
    JoinCall {
        joining_user_id: PeerId,
    },
    IncomingInvite {
        from_user_id: PeerId,
    },
    InviteAccepted {
        from_user_id: PeerId,
    },
    InviteRejected {
        from_user_id: PeerId,
    },
    NewParticipantJoined {
        new_participant: PeerId,
    },
    ParticipantLeft {
        leaving_user_id: PeerId,
    },
    DtmfTone {
        digit: char,
        sender: PeerId,
    },
}

/// Исходящая сторона канала сигнализации
pub trait SignalingSink: Send + Sync {
    fn send(&self, signal: OutboundSignal) -> Result<()>;
}

/// Клиент сигнализации поверх WebSocket
pub struct WsSignaling {
    send_tx: mpsc::UnboundedSender<OutboundSignal>,
    tasks: Vec<JoinHandle<()>>,
}

impl WsSignaling {
    /// Подключается к серверу; входящие события уходят в очередь оркестратора
    pub async fn connect(url: &str, inputs: mpsc::UnboundedSender<Input>) -> Result<Self> {
        let (ws_stream, _) = match connect_async(url).await {
            Ok(pair) => pair,
            Err(e) => {
                let _ = inputs.send(Input::Channel(ChannelStatus::Error(e.to_string())));
                return Err(e.into());
            }
        };
        log::info!("Signaling websocket connected: {}", url);
        let _ = inputs.send(Input::Channel(ChannelStatus::Connected));

        let (mut ws_write, mut ws_read) = ws_stream.split();
        let (send_tx, mut send_rx) = mpsc::unbounded_channel::<OutboundSignal>();

        let writer = tokio::spawn(async move {
            while let Some(signal) = send_rx.recv().await {
                match serde_json::to_string(&signal) {
                    Ok(text) => {
                        log::debug!("ws out (to {:?}): {}", signal.recipient(), text);
                        if let Err(e) = ws_write.send(Message::Text(text)).await {
                            log::warn!("Failed to write signaling frame: {}", e);
                            break;
                        }
                    }
                    Err(e) => log::error!("Failed to encode {:?}: {}", signal, e),
                }
            }
            let _ = ws_write.close().await;
        });

        let reader = tokio::spawn(async move {
            while let Some(msg) = ws_read.next().await {
                match msg {
                    Ok(Message::Text(text)) => {
                        if let Some(signal) = decode_frame(&text) {
                            if inputs.send(Input::Signal(signal)).is_err() {
                                return;
                            }
                        }
                    }
                    Ok(Message::Binary(data)) => match String::from_utf8(data) {
                        Ok(text) => {
                            if let Some(signal) = decode_frame(&text) {
                                if inputs.send(Input::Signal(signal)).is_err() {
                                    return;
                                }
                            }
                        }
                        Err(_) => log::warn!("Dropping non-UTF8 binary signaling frame"),
                    },
                    Ok(Message::Close(_)) => break,
                    Ok(_) => {}
                    Err(e) => {
                        log::warn!("Signaling connection error: {}", e);
                        let _ = inputs.send(Input::Channel(ChannelStatus::Error(e.to_string())));
                        break;
                    }
                }
            }
            log::info!("Signaling websocket closed");
            let _ = inputs.send(Input::Channel(ChannelStatus::Disconnected));
        });

        Ok(Self {
            send_tx,
            tasks: vec![writer, reader],
        })
    }
}

impl SignalingSink for WsSignaling {
    fn send(&self, signal: OutboundSignal) -> Result<()> {
        self.send_tx
            .send(signal)
            .map_err(|_| CallError::Signaling("signaling writer is gone".into()))
    }
}

impl Drop for WsSignaling {
    fn drop(&mut self) {
        for task in self.tasks.drain(..) {
            task.abort();
        }
    }
}

/// Разбор входящего кадра; неизвестные события логируются и отбрасываются
pub fn decode_frame(text: &str) -> Option<InboundSignal> {
    match serde_json::from_str::<InboundSignal>(text) {
        Ok(signal) => {
            log::debug!("ws in: {:?}", signal);
            Some(signal)
        }
        Err(e) => {
            log::warn!("Dropping unrecognised signaling frame ({}): {}", e, text);
            None
        }
    }
}
