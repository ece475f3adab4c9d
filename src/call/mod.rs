//! Оркестратор звонка: membership протокол, машина состояний сессий,
//! политика восстановления и ретрансляция тонов.
//!
//! Всё состояние принадлежит одному [`CallOrchestrator`], который по одному
//! обрабатывает [`Input`] из единственной очереди. Транспорт и таймеры
//! состояние не трогают: они кладут в очередь события с `(peer_id, epoch)`.

mod membership;
mod orchestrator;
mod pending;
mod recovery;
mod tone;

pub use orchestrator::CallOrchestrator;
pub use pending::{Admission, Pending, PendingCall, PendingInvite, PendingQueue};

use crate::events::ChannelStatus;
use crate::peer::transport::TransportEvent;
use crate::peer::types::PeerId;
use crate::signaling::InboundSignal;
use std::str::FromStr;

/// Всё, что может разбудить оркестратор
#[derive(Debug, Clone)]
pub enum Input {
    Signal(InboundSignal),
    Command(Command),
    Transport(TransportEvent),
    Timer(TimerEvent),
    Channel(ChannelStatus),
}

/// Действия пользователя
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Login,
    Call(PeerId),
    Invite(PeerId),
    AcceptCall,
    RejectCall,
    AcceptInvite,
    RejectInvite,
    Leave,
    Tone(char),
    Quit,
}

impl FromStr for Command {
    type Err = String;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let mut parts = line.split_whitespace();
        let verb = parts.next().ok_or_else(|| "empty command".to_string())?;
        let arg = parts.next();
        let need_arg = |name: &str| {
            arg.map(str::to_string)
                .ok_or_else(|| format!("'{}' needs an argument", name))
        };

        match verb {
            "login" => Ok(Command::Login),
            "call" => Ok(Command::Call(need_arg("call")?)),
            "invite" => Ok(Command::Invite(need_arg("invite")?)),
            "accept" => Ok(Command::AcceptCall),
            "reject" => Ok(Command::RejectCall),
            "accept-invite" => Ok(Command::AcceptInvite),
            "reject-invite" => Ok(Command::RejectInvite),
            "leave" => Ok(Command::Leave),
            "tone" => {
                let digits = need_arg("tone")?;
                let mut chars = digits.chars();
                match (chars.next(), chars.next()) {
                    (Some(d), None) => Ok(Command::Tone(d)),
                    _ => Err("tone takes a single digit".into()),
                }
            }
            "quit" | "exit" => Ok(Command::Quit),
            other => Err(format!("unknown command '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerKind {
    Grace,
    Watchdog,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimerEvent {
    pub peer_id: PeerId,
    pub epoch: u64,
    pub kind: TimerKind,
}
