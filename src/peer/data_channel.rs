use crate::error::{CallError, Result};
use crate::peer::transport::ToneSender;
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;
use webrtc::data_channel::data_channel_init::RTCDataChannelInit;
use webrtc::data_channel::data_channel_message::DataChannelMessage;
use webrtc::data_channel::data_channel_state::RTCDataChannelState;
use webrtc::data_channel::RTCDataChannel;
use webrtc::peer_connection::RTCPeerConnection;

/// Метка канала для DTMF
pub const TONE_CHANNEL_LABEL: &str = "dtmf";

/// Заранее согласованный id: обе стороны создают канал сами,
/// без on_data_channel
pub const TONE_CHANNEL_ID: u16 = 0;

/// Допустимые символы DTMF
pub fn is_valid_tone(digit: char) -> bool {
    matches!(digit, '0'..='9' | '*' | '#' | 'A'..='D' | ',')
}

/// Тоны внутри peer connection через data channel
pub struct DataChannelToneSender {
    dc: Arc<RTCDataChannel>,
}

impl DataChannelToneSender {
    pub fn is_open(&self) -> bool {
        self.dc.ready_state() == RTCDataChannelState::Open
    }
}

#[async_trait]
impl ToneSender for DataChannelToneSender {
    async fn insert_tones(&self, tones: &str) -> Result<()> {
        if let Some(bad) = tones.chars().find(|c| !is_valid_tone(*c)) {
            return Err(CallError::InvalidTone(bad));
        }
        if !self.is_open() {
            return Err(CallError::Transport(format!(
                "tone channel is {:?}",
                self.dc.ready_state()
            )));
        }
        self.dc
            .send(&Bytes::from(tones.as_bytes().to_vec()))
            .await?;
        log::debug!("Inserted tones {:?} on channel {}", tones, self.dc.label());
        Ok(())
    }
}

/// Создаёт канал тонов на peer connection и вешает обработчики
pub async fn open_tone_channel(
    pc: &RTCPeerConnection,
    connection_id: &str,
) -> Result<Arc<DataChannelToneSender>> {
    let init = RTCDataChannelInit {
        ordered: Some(true),
        negotiated: Some(TONE_CHANNEL_ID),
        ..Default::default()
    };
    let dc = pc.create_data_channel(TONE_CHANNEL_LABEL, Some(init)).await?;
    attach_dc(&dc, connection_id.to_string());
    Ok(Arc::new(DataChannelToneSender { dc }))
}

/// общий обработчик data-channel
fn attach_dc(dc: &Arc<RTCDataChannel>, connection_id: String) {
    let label = dc.label().to_string();

    let open_id = connection_id.clone();
    let open_label = label.clone();
    dc.on_open(Box::new(move || {
        log::info!("Data channel '{}' open ({})", open_label, open_id);
        Box::pin(async {})
    }));

    let close_id = connection_id.clone();
    let close_label = label.clone();
    dc.on_close(Box::new(move || {
        log::info!("Data channel '{}' closed ({})", close_label, close_id);
        Box::pin(async {})
    }));

    // Тоны, пришедшие в полосе, только логируем: табло обновляется
    // через сигнализацию, чтобы его видели все участники
    dc.on_message(Box::new(move |msg: DataChannelMessage| {
        let text = String::from_utf8_lossy(&msg.data).to_string();
        log::debug!("In-band tones {:?} received ({})", text, connection_id);
        Box::pin(async {})
    }));
}
