//! Восстановление соединения: grace таймер, ICE restart, переход на TURN
//! и сторожевая проверка.

use super::orchestrator::CallOrchestrator;
use crate::error::Result;
use crate::events::CloseReason;
use crate::peer::state::{Role, SessionState};
use crate::peer::types::Connectivity;
use crate::signaling::OutboundSignal;

impl CallOrchestrator {
    pub(super) async fn on_connectivity_change(
        &mut self,
        peer_id: &str,
        epoch: u64,
        state: Connectivity,
    ) -> Result<()> {
        let Some(session) = self.live_session(peer_id, epoch) else {
            return Ok(());
        };
        log::debug!(
            "Connectivity of {} is {:?} (session {:?})",
            peer_id,
            state,
            session.state
        );

        match state {
            Connectivity::Connected => {
                if !session.remote_applied {
                    log::warn!("{} reported connected before remote description", peer_id);
                } else if session.state != SessionState::Connected {
                    self.mark_session_connected(peer_id);
                }
            }
            s if s.is_broken() => {
                if matches!(
                    session.state,
                    SessionState::Negotiating | SessionState::Connected
                ) {
                    self.enter_recovering(peer_id);
                }
            }
            Connectivity::Closed => {
                log::warn!("Transport for {} closed underneath us", peer_id);
                self.close_session(peer_id, CloseReason::ConnectionLost).await;
            }
            _ => {}
        }
        Ok(())
    }

    fn mark_session_connected(&mut self, peer_id: &str) {
        let Some(session) = self.sessions.get_mut(peer_id) else {
            return;
        };
        let recovered = session.ever_connected;
        session.mark_connected();
        if recovered {
            self.events.emit_connection_recovered(peer_id);
        } else {
            self.events.emit_connected(peer_id);
        }
    }

    fn enter_recovering(&mut self, peer_id: &str) {
        let Some(session) = self.sessions.get_mut(peer_id) else {
            return;
        };
        session.state = SessionState::Recovering;
        self.events.emit_connection_problem(peer_id);
        self.arm_grace_timer(peer_id);
    }

    /// Grace таймер истёк, а соединение так и не вернулось
    pub(super) async fn on_grace_expired(&mut self, peer_id: &str, epoch: u64) -> Result<()> {
        let max_attempts = self.config.max_reconnect_attempts;
        let relay_after = self.config.relay_after_attempts;

        let Some(session) = self.live_session(peer_id, epoch) else {
            log::debug!("Stale grace timer for {}#{}", peer_id, epoch);
            return Ok(());
        };
        session.timers.grace = None;

        if session.state != SessionState::Recovering {
            return Ok(());
        }
        if session.transport.connectivity() == Connectivity::Connected {
            log::info!("{} recovered on its own", peer_id);
            self.mark_session_connected(peer_id);
            return Ok(());
        }

        if session.reconnect_attempts >= max_attempts {
            log::error!(
                "Giving up on {} after {} reconnect attempts",
                peer_id,
                session.reconnect_attempts
            );
            self.close_session(peer_id, CloseReason::ConnectionLost).await;
            return Ok(());
        }

        session.reconnect_attempts += 1;
        let attempt = session.reconnect_attempts;
        let role = session.role;
        let transport = session.transport.clone();
        let escalate = attempt >= relay_after && !session.using_relay_only;
        log::info!(
            "Reconnect attempt {}/{} for {}",
            attempt,
            max_attempts,
            peer_id
        );

        if escalate {
            session.using_relay_only = true;
            log::warn!("Escalating {} to relay-only paths", peer_id);
            if let Err(e) = transport.restrict_to_relay_paths().await {
                log::warn!("Failed to force relay-only paths for {}: {}", peer_id, e);
            }
        }

        // ICE restart делает только сторона, начавшая согласование
        if role == Role::Offerer {
            match transport.regather_and_renegotiate().await {
                Ok(offer) => {
                    let Some(session) = self.live_session(peer_id, epoch) else {
                        return Ok(());
                    };
                    session.awaiting_answer = true;
                    self.send(OutboundSignal::CallUser {
                        to_user_id: peer_id.to_string(),
                        offer,
                    })?;
                }
                Err(e) => log::warn!("ICE restart for {} failed: {}", peer_id, e),
            }
        } else {
            log::info!("Waiting for {} to restart ICE", peer_id);
        }

        if self.live_session(peer_id, epoch).is_some() {
            self.arm_grace_timer(peer_id);
        }
        Ok(())
    }

    /// Периодическая проверка на случай, если транспорт не прислал событие
    pub(super) async fn on_watchdog_tick(&mut self, peer_id: &str, epoch: u64) -> Result<()> {
        let negotiation_timeout = self.config.negotiation_timeout;
        let Some(session) = self.live_session(peer_id, epoch) else {
            return Ok(());
        };
        let connectivity = session.transport.connectivity();
        log::debug!(
            "Watchdog: {} is {:?}, transport {:?}",
            peer_id,
            session.state,
            connectivity
        );

        match (session.state, connectivity) {
            (SessionState::Negotiating | SessionState::Recovering, Connectivity::Connected)
                if session.remote_applied =>
            {
                log::info!("Watchdog found {} connected", peer_id);
                self.mark_session_connected(peer_id);
            }
            (SessionState::Negotiating | SessionState::Connected, c) if c.is_broken() => {
                log::warn!("Watchdog found {} {:?}", peer_id, c);
                self.enter_recovering(peer_id);
            }
            (SessionState::Negotiating, _)
                if !session.is_ringing()
                    && session.negotiating_since.elapsed() > negotiation_timeout =>
            {
                log::warn!(
                    "Negotiation with {} stuck for more than {:?}",
                    peer_id,
                    negotiation_timeout
                );
                self.enter_recovering(peer_id);
            }
            _ => {}
        }
        Ok(())
    }
}
