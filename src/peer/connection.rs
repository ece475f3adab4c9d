use crate::config::CallConfig;
use crate::error::{CallError, Result};
use crate::logger::{dump_candidate, dump_selected_pair};
use crate::peer::data_channel::{open_tone_channel, DataChannelToneSender};
use crate::peer::ice::{analyze_candidates, ice_servers};
use crate::peer::transport::{MediaTransport, ToneSender, TransportFactory, TransportNotifier};
use crate::peer::types::{Connectivity, IceCandidate, SdpKind, SessionDescription};
use crate::utils::random_id;
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::{MediaEngine, MIME_TYPE_OPUS};
use webrtc::api::{APIBuilder, API};
use webrtc::ice_transport::ice_candidate::RTCIceCandidate;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::offer_answer_options::RTCOfferOptions;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::policy::bundle_policy::RTCBundlePolicy;
use webrtc::peer_connection::policy::ice_transport_policy::RTCIceTransportPolicy;
use webrtc::peer_connection::policy::rtcp_mux_policy::RTCRtcpMuxPolicy;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_remote::TrackRemote;

/// Создает конфигурацию для peer connection
fn rtc_config(config: &CallConfig) -> RTCConfiguration {
    RTCConfiguration {
        ice_servers: ice_servers(&config.ice_servers),
        // Добавляем более агрессивные настройки ICE
        ice_candidate_pool_size: 10,
        bundle_policy: RTCBundlePolicy::MaxBundle,
        rtcp_mux_policy: RTCRtcpMuxPolicy::Require,
        ice_transport_policy: RTCIceTransportPolicy::All,
        ..Default::default()
    }
}

fn to_rtc(desc: SessionDescription) -> Result<RTCSessionDescription> {
    let rtc = match desc.kind {
        SdpKind::Offer => RTCSessionDescription::offer(desc.sdp)?,
        SdpKind::Answer => RTCSessionDescription::answer(desc.sdp)?,
        SdpKind::Pranswer => RTCSessionDescription::pranswer(desc.sdp)?,
        SdpKind::Rollback => {
            return Err(CallError::Transport("rollback is not supported".into()));
        }
    };
    Ok(rtc)
}

fn from_rtc(desc: &RTCSessionDescription, kind: SdpKind) -> SessionDescription {
    SessionDescription {
        kind,
        sdp: desc.sdp.clone(),
    }
}

/// ========== FACTORY ==========

/// Один API и один локальный аудио трек на все peer connection,
/// как общий localStream у браузера
pub struct RtcTransportFactory {
    api: API,
    config: CallConfig,
    local_track: Arc<TrackLocalStaticSample>,
}

impl RtcTransportFactory {
    pub fn new(config: CallConfig) -> Result<Self> {
        let mut media_engine = MediaEngine::default();
        media_engine.register_default_codecs()?;
        let mut registry = Registry::new();
        registry = register_default_interceptors(registry, &mut media_engine)?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        let local_track = Arc::new(TrackLocalStaticSample::new(
            RTCRtpCodecCapability {
                mime_type: MIME_TYPE_OPUS.to_owned(),
                clock_rate: 48000,
                channels: 2,
                sdp_fmtp_line: "minptime=10;useinbandfec=1".to_owned(),
                rtcp_feedback: vec![],
            },
            "audio".to_owned(),
            "meshcall".to_owned(),
        ));

        if !config.has_relay_server() {
            log::warn!("No TURN server configured, relay-only escalation has nothing to fall back to");
        }

        Ok(Self {
            api,
            config,
            local_track,
        })
    }

    /// Трек, в который внешний захват звука пишет сэмплы
    pub fn local_track(&self) -> Arc<TrackLocalStaticSample> {
        self.local_track.clone()
    }
}

#[async_trait]
impl TransportFactory for RtcTransportFactory {
    async fn create(
        &self,
        peer_id: &str,
        notifier: TransportNotifier,
    ) -> Result<Arc<dyn MediaTransport>> {
        let transport = RtcTransport::new(
            &self.api,
            rtc_config(&self.config),
            self.local_track.clone(),
            notifier,
        )
        .await?;
        log::info!(
            "Created peer connection {} for {}",
            transport.connection_id,
            peer_id
        );
        Ok(Arc::new(transport))
    }
}

/// ========== TRANSPORT ==========

pub struct RtcTransport {
    pc: Arc<RTCPeerConnection>,
    connection_id: String,
    config: RTCConfiguration,
    local_track: Arc<TrackLocalStaticSample>,
    tone: Arc<DataChannelToneSender>,
    tracks_attached: AtomicBool,
    /// Локальные кандидаты для текущего соединения (для анализа)
    local_candidates: Arc<Mutex<Vec<IceCandidate>>>,
}

impl RtcTransport {
    async fn new(
        api: &API,
        config: RTCConfiguration,
        local_track: Arc<TrackLocalStaticSample>,
        notifier: TransportNotifier,
    ) -> Result<Self> {
        let pc = Arc::new(api.new_peer_connection(config.clone()).await?);
        let connection_id = random_id();
        let local_candidates = Arc::new(Mutex::new(Vec::new()));

        // Обработчик для локальных кандидатов: сразу отправляем (trickle)
        let cand_notifier = notifier.clone();
        let collected = local_candidates.clone();
        pc.on_ice_candidate(Box::new(move |cand: Option<RTCIceCandidate>| {
            match cand {
                Some(c) => {
                    dump_candidate("LOCAL", &c);
                    match c.to_json() {
                        Ok(init) => {
                            let candidate = IceCandidate::from(init);
                            if let Ok(mut list) = collected.lock() {
                                list.push(candidate.clone());
                            }
                            cand_notifier.local_candidate(candidate);
                        }
                        Err(e) => log::warn!("Failed to serialize local candidate: {:?}", e),
                    }
                }
                None => {
                    // cand == None означает конец сбора
                    log::info!("ICE candidate gathering completed (null candidate received)");
                    if let Ok(list) = collected.lock() {
                        analyze_candidates(&list);
                    }
                }
            }
            Box::pin(async {})
        }));

        pc.on_ice_gathering_state_change(Box::new(move |state| {
            log::debug!("ICE gathering state changed to: {:?}", state);
            Box::pin(async {})
        }));

        // делаем копию для обработчика состояний
        let pc_state = Arc::downgrade(&pc);
        let state_notifier = notifier.clone();
        pc.on_peer_connection_state_change(Box::new(move |st: RTCPeerConnectionState| {
            log::info!(
                "Peer connection state for {} changed to: {:?}",
                state_notifier.peer_id(),
                st
            );
            if matches!(
                st,
                RTCPeerConnectionState::Disconnected | RTCPeerConnectionState::Failed
            ) {
                if let Some(pc) = pc_state.upgrade() {
                    tokio::spawn(async move {
                        dump_selected_pair(&pc, "BEFORE-FAIL").await;
                    });
                }
            }
            state_notifier.connectivity_changed(st.into());
            Box::pin(async {})
        }));

        let track_notifier = notifier.clone();
        pc.on_track(Box::new(move |track: Arc<TrackRemote>, _receiver, _transceiver| {
            log::info!("Received remote track {}", track.stream_id());
            track_notifier.remote_media(track.stream_id());
            Box::pin(async {})
        }));

        let tone = open_tone_channel(&pc, &connection_id).await?;

        Ok(Self {
            pc,
            connection_id,
            config,
            local_track,
            tone,
            tracks_attached: AtomicBool::new(false),
            local_candidates,
        })
    }
}

#[async_trait]
impl MediaTransport for RtcTransport {
    async fn attach_local_tracks(&self) -> Result<()> {
        if self.tracks_attached.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.pc
            .add_track(self.local_track.clone() as Arc<dyn TrackLocal + Send + Sync>)
            .await?;
        Ok(())
    }

    async fn create_offer(&self) -> Result<SessionDescription> {
        let offer = self.pc.create_offer(None).await?;
        Ok(from_rtc(&offer, SdpKind::Offer))
    }

    async fn create_answer(&self) -> Result<SessionDescription> {
        let answer = self.pc.create_answer(None).await?;
        Ok(from_rtc(&answer, SdpKind::Answer))
    }

    async fn set_local_description(&self, desc: SessionDescription) -> Result<()> {
        self.pc.set_local_description(to_rtc(desc)?).await?;
        Ok(())
    }

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<()> {
        self.pc.set_remote_description(to_rtc(desc)?).await?;
        Ok(())
    }

    async fn add_candidate(&self, candidate: IceCandidate) -> Result<()> {
        self.pc.add_ice_candidate(candidate.into()).await?;
        Ok(())
    }

    async fn regather_and_renegotiate(&self) -> Result<SessionDescription> {
        if let Ok(mut list) = self.local_candidates.lock() {
            list.clear();
        }
        let options = RTCOfferOptions {
            ice_restart: true,
            ..Default::default()
        };
        let offer = self.pc.create_offer(Some(options)).await?;
        self.pc.set_local_description(offer.clone()).await?;
        log::info!("ICE restart initiated on {}", self.connection_id);
        Ok(from_rtc(&offer, SdpKind::Offer))
    }

    async fn restrict_to_relay_paths(&self) -> Result<()> {
        let mut config = self.config.clone();
        config.ice_transport_policy = RTCIceTransportPolicy::Relay;
        self.pc.set_configuration(config).await?;
        log::info!("Forced relay-only ICE policy on {}", self.connection_id);
        Ok(())
    }

    fn connectivity(&self) -> Connectivity {
        self.pc.connection_state().into()
    }

    fn tone_sender(&self) -> Option<Arc<dyn ToneSender>> {
        if self.tone.is_open() {
            Some(self.tone.clone() as Arc<dyn ToneSender>)
        } else {
            None
        }
    }

    async fn close(&self) -> Result<()> {
        log::info!("Closing peer connection {}", self.connection_id);
        self.pc.close().await?;
        Ok(())
    }
}
