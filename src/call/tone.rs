use super::orchestrator::CallOrchestrator;
use crate::error::{CallError, Result};
use crate::events::{CallEvent, ToneEntry};
use crate::peer::data_channel::is_valid_tone;
use crate::peer::types::PeerId;
use crate::signaling::OutboundSignal;

impl CallOrchestrator {
    /// DTMF всем участникам звонка
    pub async fn send_tone(&mut self, digit: char) -> Result<()> {
        if !is_valid_tone(digit) {
            return Err(CallError::InvalidTone(digit));
        }
        if !self.in_call() {
            log::warn!("Not in a call, tone {:?} not sent", digit);
            return Ok(());
        }

        let tone = digit.to_string();
        let mut accepted = 0usize;
        let peers: Vec<PeerId> = self.sessions.keys().cloned().collect();
        for peer in peers {
            let Some(session) = self.sessions.get_mut(&peer).filter(|s| s.is_live()) else {
                continue;
            };
            let Some(sender) = session.resolve_tone_sender() else {
                log::debug!("No tone sender for {}, skipping", peer);
                continue;
            };
            match sender.insert_tones(&tone).await {
                Ok(()) => accepted += 1,
                Err(e) => log::warn!("Failed to send tone to {}: {}", peer, e),
            }
        }

        if accepted == 0 {
            log::warn!("No session accepted tone {:?}", digit);
            return Ok(());
        }

        self.push_tone(self.self_id.clone(), digit);
        let members: Vec<PeerId> = self.roster.iter().cloned().collect();
        for member in members {
            if let Err(e) = self.send(OutboundSignal::DtmfTone {
                to_user_id: member.clone(),
                digit,
                sender: self.self_id.clone(),
            }) {
                log::warn!("Failed to relay tone to {}: {}", member, e);
            }
        }
        Ok(())
    }

    pub fn receive_tone(&mut self, digit: char, sender: PeerId) {
        log::info!("Tone {:?} from {}", digit, sender);
        self.push_tone(sender, digit);
    }

    /// Табло тонов и кэши tone sender'ов
    pub(super) fn clear_tone_state(&mut self) {
        self.tones.clear();
        for session in self.sessions.values_mut() {
            session.tone_sender = None;
        }
    }

    fn push_tone(&mut self, sender: PeerId, digit: char) {
        self.tones.push(ToneEntry { sender, digit });
        self.events.emit(CallEvent::ToneDisplay {
            entries: self.tones.clone(),
        });
    }
}
