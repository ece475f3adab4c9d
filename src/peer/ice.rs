use crate::peer::types::{IceCandidate, ServerConfig};
use crate::utils::add_ice_url_scheme;
use webrtc::ice_transport::ice_server::RTCIceServer;

/// Тип кандидата по строке `typ ...`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CandidateKind {
    Host,
    ServerReflexive,
    PeerReflexive,
    Relay,
    Unknown,
}

pub fn candidate_kind(candidate: &IceCandidate) -> CandidateKind {
    let line = &candidate.candidate;
    if line.contains("typ host") {
        CandidateKind::Host
    } else if line.contains("typ srflx") {
        CandidateKind::ServerReflexive
    } else if line.contains("typ prflx") {
        CandidateKind::PeerReflexive
    } else if line.contains("typ relay") {
        CandidateKind::Relay
    } else {
        CandidateKind::Unknown
    }
}

/// Считает кандидатов по типам и предупреждает, если нет relay
pub fn analyze_candidates(candidates: &[IceCandidate]) -> (usize, usize, usize) {
    let mut host_count = 0;
    let mut srflx_count = 0;
    let mut relay_count = 0;

    for candidate in candidates {
        match candidate_kind(candidate) {
            CandidateKind::Host => host_count += 1,
            CandidateKind::ServerReflexive => srflx_count += 1,
            CandidateKind::Relay => relay_count += 1,
            _ => {}
        }
    }

    log::info!(
        "Candidate analysis: {} host, {} srflx, {} relay",
        host_count,
        srflx_count,
        relay_count
    );

    if relay_count == 0 {
        log::warn!("No TURN relay candidates found! Relay-only escalation will not help.");
    }
    (host_count, srflx_count, relay_count)
}

/// Конфигурация серверов → RTCIceServer
pub fn ice_servers(servers: &[ServerConfig]) -> Vec<RTCIceServer> {
    servers
        .iter()
        .map(|config| RTCIceServer {
            urls: vec![add_ice_url_scheme(config)],
            username: config.username.clone().unwrap_or_default(),
            credential: config.credential.clone().unwrap_or_default(),
        })
        .collect()
}
