use crate::peer::types::{IceCandidate, PeerId, SessionDescription};
use std::collections::VecDeque;

pub trait Pending {
    fn peer_id(&self) -> &str;
}

/// Входящий звонок, ждущий решения пользователя
#[derive(Debug, Clone, PartialEq)]
pub struct PendingCall {
    pub peer_id: PeerId,
    pub offer: SessionDescription,
    /// Кандидаты, пришедшие до принятия звонка
    pub early_candidates: Vec<IceCandidate>,
}

impl PendingCall {
    pub fn new(peer_id: PeerId, offer: SessionDescription) -> Self {
        Self {
            peer_id,
            offer,
            early_candidates: Vec::new(),
        }
    }
}

impl Pending for PendingCall {
    fn peer_id(&self) -> &str {
        &self.peer_id
    }
}

/// Входящее приглашение присоединиться к звонку
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingInvite {
    pub peer_id: PeerId,
}

impl Pending for PendingInvite {
    fn peer_id(&self) -> &str {
        &self.peer_id
    }
}

/// Результат постановки в очередь
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Стал текущим, его надо показать пользователю
    Presented,
    /// Ждёт за `ahead` другими
    Queued { ahead: usize },
    /// Заменил более старую запись того же участника
    Replaced { presented: bool },
}

/// FIFO очередь; пользователю показывается только первый элемент
#[derive(Debug)]
pub struct PendingQueue<T> {
    items: VecDeque<T>,
}

impl<T> Default for PendingQueue<T> {
    fn default() -> Self {
        Self {
            items: VecDeque::new(),
        }
    }
}

impl<T: Pending> PendingQueue<T> {
    pub fn push(&mut self, item: T) -> Admission {
        if let Some(pos) = self.position(item.peer_id()) {
            self.items[pos] = item;
            return Admission::Replaced {
                presented: pos == 0,
            };
        }
        self.items.push_back(item);
        match self.items.len() {
            1 => Admission::Presented,
            n => Admission::Queued { ahead: n - 1 },
        }
    }

    pub fn front(&self) -> Option<&T> {
        self.items.front()
    }

    pub fn pop_front(&mut self) -> Option<T> {
        self.items.pop_front()
    }

    pub fn find_mut(&mut self, peer_id: &str) -> Option<&mut T> {
        self.items.iter_mut().find(|i| i.peer_id() == peer_id)
    }

    /// Убирает запись участника; второй элемент: была ли она текущей
    pub fn remove_peer(&mut self, peer_id: &str) -> Option<(T, bool)> {
        let pos = self.position(peer_id)?;
        self.items.remove(pos).map(|item| (item, pos == 0))
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    fn position(&self, peer_id: &str) -> Option<usize> {
        self.items.iter().position(|i| i.peer_id() == peer_id)
    }
}
