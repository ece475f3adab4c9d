use crate::config;
use std::io::Write;
use webrtc::ice_transport::ice_candidate::RTCIceCandidate;
use webrtc::peer_connection::RTCPeerConnection;

/// Инициализация логирования с временными метками.
///
/// Формат строки как раньше: `RUST: [время] LEVEL сообщение`.
/// `RUST_LOG` всегда имеет приоритет над константами из `config`.
pub fn init() {
    let enabled = config::LOGGING_ENABLED && config::dev::ENABLE_LOGGING;
    let default_filter = if enabled { "info" } else { "off" };

    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .format(|buf, record| {
            let now = chrono::Local::now();
            writeln!(
                buf,
                "RUST: [{}] {:<5} {}",
                now.format("%Y-%m-%d %H:%M:%S%.3f"),
                record.level(),
                record.args()
            )
        })
        .try_init();
}

/// Печать ICE-candidate при появлении (Trickle-ICE)
pub fn dump_candidate(label: &str, cand: &RTCIceCandidate) {
    if let Ok(init) = cand.to_json() {
        log::debug!(
            "Trickle {label}: candidate={} sdp_mid={:?} sdp_mline_index={:?} username_fragment={:?}",
            init.candidate,
            init.sdp_mid,
            init.sdp_mline_index,
            init.username_fragment
        );
    }
}

/// Быстрый снимок getStats → выбранная пара
pub async fn dump_selected_pair(pc: &RTCPeerConnection, moment: &str) {
    let stats = pc.get_stats().await;
    for (_, v) in stats.reports {
        if let webrtc::stats::StatsReportType::CandidatePair(pair) = v {
            if pair.nominated {
                log::info!(
                    "STATS {moment}: {}:{}  type: {:?}  bytes={}/{} state={:?}",
                    pair.local_candidate_id,
                    pair.remote_candidate_id,
                    pair.stats_type,
                    pair.bytes_sent,
                    pair.bytes_received,
                    pair.state
                );
            }
        }
    }
}
