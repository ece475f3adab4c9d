//! Протокол участия: звонки, приглашения, mesh-присоединение и выход.

use super::orchestrator::CallOrchestrator;
use super::pending::{Admission, PendingCall, PendingInvite};
use crate::error::{CallError, Result};
use crate::events::{CallEvent, CloseReason};
use crate::peer::state::Role;
use crate::peer::types::{IceCandidate, PeerId, SessionDescription};
use crate::signaling::OutboundSignal;

impl CallOrchestrator {
    pub fn login(&self) -> Result<()> {
        log::info!("Logging in as {}", self.self_id);
        self.send(OutboundSignal::Login(self.self_id.clone()))
    }

    /// Исходящий звонок
    pub async fn initiate_call(&mut self, peer: PeerId) -> Result<()> {
        if self.roster.contains(&peer) || self.sessions.contains_key(&peer) {
            return Err(CallError::AlreadyInCall(peer));
        }
        if let Some(answered) = self.answer_queued_call(&peer).await {
            return answered;
        }
        log::info!("Calling {}", peer);
        self.open_session(&peer, Role::Offerer).await?;
        self.send_offer(&peer).await
    }

    /// Если от участника уже ждёт offer, отвечаем на него вместо встречного
    async fn answer_queued_call(&mut self, peer: &str) -> Option<Result<()>> {
        let (call, was_front) = self.pending_calls.remove_peer(peer)?;
        log::info!("{} already called us, answering their offer", peer);
        let result = self
            .accept_offer(peer, call.offer, call.early_candidates)
            .await;
        if was_front {
            self.present_next_call();
        }
        Some(result)
    }

    /// Входящий offer: очередь, mesh, glare или пересогласование
    pub async fn receive_offer(&mut self, peer: PeerId, offer: SessionDescription) -> Result<()> {
        if peer == self.self_id {
            log::warn!("Ignoring offer from ourselves");
            return Ok(());
        }

        if let Some(session) = self.sessions.get(&peer) {
            if !session.awaiting_answer {
                log::info!("Renegotiation offer from {} (state {:?})", peer, session.state);
                return self.answer_offer(&peer, offer).await;
            }
            // оба отправили offer одновременно
            if self.self_id > peer {
                log::info!("Offer glare with {}, keeping our offer", peer);
                return Ok(());
            }
            log::info!("Offer glare with {}, answering theirs", peer);
            self.close_session(&peer, CloseReason::Superseded).await;
            self.open_session(&peer, Role::Answerer).await?;
            return self.answer_offer(&peer, offer).await;
        }

        if self.roster.is_empty() {
            match self.pending_calls.push(PendingCall::new(peer.clone(), offer)) {
                Admission::Presented | Admission::Replaced { presented: true } => {
                    self.present_next_call()
                }
                Admission::Queued { ahead } => {
                    log::info!("Incoming call from {} queued behind {} other(s)", peer, ahead)
                }
                Admission::Replaced { presented: false } => {
                    log::info!("Queued call from {} updated with a newer offer", peer)
                }
            }
            return Ok(());
        }

        log::info!("Auto-accepting mesh offer from {}", peer);
        self.open_session(&peer, Role::Answerer).await?;
        self.answer_offer(&peer, offer).await
    }

    pub async fn accept_pending_call(&mut self) -> Result<()> {
        let Some(call) = self.pending_calls.pop_front() else {
            return Err(CallError::NoPendingCall);
        };
        let PendingCall {
            peer_id,
            offer,
            early_candidates,
        } = call;
        log::info!("Accepting call from {}", peer_id);

        let result = self.accept_offer(&peer_id, offer, early_candidates).await;
        self.present_next_call();
        result
    }

    async fn accept_offer(
        &mut self,
        peer_id: &str,
        offer: SessionDescription,
        early_candidates: Vec<IceCandidate>,
    ) -> Result<()> {
        self.open_session(peer_id, Role::Answerer).await?;
        if let Some(session) = self.sessions.get_mut(peer_id) {
            session.pending_candidates.extend(early_candidates);
        }
        self.answer_offer(peer_id, offer).await
    }

    pub fn reject_pending_call(&mut self) -> Result<()> {
        let Some(call) = self.pending_calls.pop_front() else {
            return Err(CallError::NoPendingCall);
        };
        log::info!("Rejecting call from {}", call.peer_id);
        let sent = self.send(OutboundSignal::RejectCall {
            to_user_id: call.peer_id,
        });
        self.present_next_call();
        sent
    }

    /// Пригласить участника в текущий звонок
    pub async fn invite_to_join(&mut self, peer: PeerId) -> Result<()> {
        if !self.in_call() {
            return self.initiate_call(peer).await;
        }
        if self.roster.contains(&peer) {
            return Err(CallError::AlreadyInCall(peer));
        }
        log::info!("Inviting {} to join the call", peer);
        self.send(OutboundSignal::JoinCall {
            joining_user_id: peer,
        })
    }

    pub async fn receive_join_call(&mut self, peer: PeerId) -> Result<()> {
        if peer == self.self_id || self.sessions.contains_key(&peer) {
            log::debug!("Ignoring join-call for {}", peer);
            return Ok(());
        }
        log::info!("{} is joining, connecting to them", peer);
        self.offer_to(&peer).await
    }

    pub fn receive_invite(&mut self, peer: PeerId) {
        match self.pending_invites.push(PendingInvite {
            peer_id: peer.clone(),
        }) {
            Admission::Presented | Admission::Replaced { presented: true } => {
                self.present_next_invite()
            }
            Admission::Queued { ahead } => {
                log::info!("Invite from {} queued behind {} other(s)", peer, ahead)
            }
            Admission::Replaced { presented: false } => {
                log::debug!("Duplicate invite from {}", peer)
            }
        }
    }

    /// Принять приглашение: offer каждому участнику нашего звонка и пригласившему
    pub async fn accept_pending_invite(&mut self) -> Result<()> {
        let Some(invite) = self.pending_invites.pop_front() else {
            return Err(CallError::NoPendingInvite);
        };
        let inviter = invite.peer_id;
        let members: Vec<PeerId> = self
            .roster
            .iter()
            .filter(|p| **p != inviter)
            .cloned()
            .collect();
        log::info!(
            "Accepting invite from {}, bringing {} member(s) along",
            inviter,
            members.len()
        );

        for member in &members {
            if let Err(e) = self.offer_to(member).await {
                log::warn!("Failed to offer to {}: {}", member, e);
            }
        }
        let inviter_result = self.offer_to(&inviter).await;

        for member in &members {
            if let Err(e) = self.send(OutboundSignal::NewParticipantJoined {
                to_user_id: member.clone(),
                new_participant: self.self_id.clone(),
            }) {
                log::warn!("Failed to announce ourselves to {}: {}", member, e);
            }
        }
        self.send(OutboundSignal::AcceptInvite {
            from_user_id: inviter,
        })?;

        self.present_next_invite();
        inviter_result
    }

    pub fn reject_pending_invite(&mut self) -> Result<()> {
        let Some(invite) = self.pending_invites.pop_front() else {
            return Err(CallError::NoPendingInvite);
        };
        log::info!("Declining invite from {}", invite.peer_id);
        let sent = self.send(OutboundSignal::RejectInvite {
            from_user_id: invite.peer_id,
        });
        self.present_next_invite();
        sent
    }

    pub fn receive_invite_accepted(&mut self, peer: &str) {
        log::info!("{} accepted our invite", peer);
        self.events.emit(CallEvent::InviteAccepted { peer: peer.into() });

        // остальные участники могут не знать о новичке
        let others: Vec<PeerId> = self.roster.iter().filter(|p| *p != peer).cloned().collect();
        for member in others {
            if let Err(e) = self.send(OutboundSignal::NewParticipantJoined {
                to_user_id: member.clone(),
                new_participant: peer.to_string(),
            }) {
                log::warn!("Failed to announce {} to {}: {}", peer, member, e);
            }
        }
    }

    pub fn receive_invite_rejected(&mut self, peer: &str) {
        log::info!("{} declined our invite", peer);
        self.events
            .emit(CallEvent::InviteDeclined { peer: peer.into() });
    }

    pub async fn receive_new_participant(&mut self, peer: PeerId) -> Result<()> {
        if peer == self.self_id || self.sessions.contains_key(&peer) {
            log::debug!("Already connected to {}, ignoring announcement", peer);
            return Ok(());
        }
        log::info!("New participant {} announced, connecting", peer);
        self.offer_to(&peer).await
    }

    /// Выход из звонка: уведомить всех и закрыть все сессии
    pub async fn leave_call(&mut self) {
        if self.roster.is_empty() && self.sessions.is_empty() {
            self.clear_tone_state();
            return;
        }
        log::info!("Leaving call with {} participant(s)", self.roster.len());

        let members: Vec<PeerId> = self.roster.iter().cloned().collect();
        for member in &members {
            if let Err(e) = self.send(OutboundSignal::ParticipantLeft {
                to_user_id: member.clone(),
                leaving_user_id: self.self_id.clone(),
            }) {
                log::warn!("Failed to notify {} that we left: {}", member, e);
            }
        }

        let peers: Vec<PeerId> = self.sessions.keys().cloned().collect();
        for peer in peers {
            self.close_session(&peer, CloseReason::LocalLeave).await;
        }
        self.roster.clear();
        self.clear_tone_state();
    }

    pub async fn receive_participant_left(&mut self, peer: &str) {
        let queued_call = self.pending_calls.remove_peer(peer);
        let queued_invite = self.pending_invites.remove_peer(peer);
        if let Some((_, true)) = queued_call {
            self.present_next_call();
        }
        if let Some((_, true)) = queued_invite {
            self.present_next_invite();
        }

        if !self.sessions.contains_key(peer) {
            if queued_call.is_none() && queued_invite.is_none() {
                log::warn!("participant-left for unknown peer {}", peer);
            }
            return;
        }
        log::info!("{} left the call", peer);
        self.close_session(peer, CloseReason::RemoteLeft).await;
    }

    pub async fn receive_answer(&mut self, peer: &str, answer: SessionDescription) -> Result<()> {
        let Some(session) = self.sessions.get_mut(peer) else {
            log::warn!("Answer from {} without a session, dropping", peer);
            return Ok(());
        };
        if !session.awaiting_answer {
            log::warn!("Unexpected answer from {} (state {:?}), dropping", peer, session.state);
            return Ok(());
        }
        session.awaiting_answer = false;
        let epoch = session.epoch;
        log::info!("Applying answer from {}", peer);

        if let Err(e) = self.apply_remote_description(peer, epoch, answer).await {
            return Err(self.fail_session(peer, e).await);
        }
        Ok(())
    }

    pub async fn receive_candidate(&mut self, peer: &str, candidate: IceCandidate) {
        if let Some(session) = self.sessions.get_mut(peer) {
            let Some(ready) = session.buffer_candidate(candidate) else {
                log::debug!(
                    "Buffered candidate from {} ({} pending)",
                    peer,
                    session.pending_candidates.len()
                );
                return;
            };
            let transport = session.transport.clone();
            if let Err(e) = transport.add_candidate(ready).await {
                log::warn!("Failed to add candidate from {}: {}", peer, e);
            }
            return;
        }

        if let Some(call) = self.pending_calls.find_mut(peer) {
            call.early_candidates.push(candidate);
            log::debug!("Stored early candidate for pending call from {}", peer);
            return;
        }
        log::warn!("Candidate from unknown peer {}, dropping", peer);
    }

    pub async fn receive_call_rejected(&mut self, peer: &str) {
        if !self.sessions.contains_key(peer) {
            log::warn!("call-rejected from {} without a session, dropping", peer);
            return;
        }
        log::info!("{} rejected the call", peer);
        self.close_session(peer, CloseReason::Rejected).await;
        self.events.emit(CallEvent::CallRejected { peer: peer.into() });
    }

    /// Offer участнику: на существующей сессии или на новой
    pub(super) async fn offer_to(&mut self, peer: &str) -> Result<()> {
        if !self.sessions.contains_key(peer) {
            if let Some(answered) = self.answer_queued_call(peer).await {
                return answered;
            }
            self.open_session(peer, Role::Offerer).await?;
        }
        self.send_offer(peer).await
    }
}
