use std::{
    collections::{HashMap, VecDeque},
    sync::Mutex,
};

use teloxide::types::ChatId;

use crate::generation::ChatTurn;

/// How many chats to remember at once unless told otherwise.
pub const DEFAULT_MAX_CHATS: usize = 10_000;

/// Last few lines of conversation per chat, so the text model has some
/// context. In memory only; a restart forgets everything.
///
/// The window is counted in turns, but turns are only ever kept and dropped
/// as whole prompt+reply exchanges, so the model never sees a reply without
/// the prompt it answered. Any nonzero window keeps at least the last
/// exchange. A window of 0 keeps nothing and every prompt goes out on its own.
///
/// Past `max_chats` chats, the one that talked least recently is forgotten.
pub struct ChatHistory {
    /// In exchanges, not turns.
    exchanges: usize,
    max_chats: usize,
    inner: Mutex<Chats>,
}

#[derive(Default)]
struct Chats {
    logs: HashMap<ChatId, ChatLog>,
    /// Bumped on every remembered exchange, for telling which chat is stalest.
    clock: u64,
}

struct ChatLog {
    turns: VecDeque<ChatTurn>,
    last_used: u64,
}

impl ChatHistory {
    pub fn new(window: usize) -> Self {
        ChatHistory::with_max_chats(window, DEFAULT_MAX_CHATS)
    }

    pub fn with_max_chats(window: usize, max_chats: usize) -> Self {
        let exchanges = match window {
            0 => 0,
            w => (w / 2).max(1),
        };
        ChatHistory {
            exchanges,
            max_chats: max_chats.max(1),
            inner: Mutex::new(Chats::default()),
        }
    }

    /// What to send to the model: the remembered turns, then `prompt`.
    pub fn conversation(&self, chat: ChatId, prompt: &str) -> Vec<ChatTurn> {
        let mut turns: Vec<ChatTurn> = if self.exchanges == 0 {
            Vec::new()
        } else {
            let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
            inner
                .logs
                .get(&chat)
                .map(|log| log.turns.iter().cloned().collect())
                .unwrap_or_default()
        };
        turns.push(ChatTurn::user(prompt));
        turns
    }

    /// Remember a prompt and the reply to it, dropping the oldest exchanges
    /// past the window.
    pub fn remember(&self, chat: ChatId, prompt: &str, reply: &str) {
        if self.exchanges == 0 {
            return;
        }
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.clock += 1;
        let now = inner.clock;

        if !inner.logs.contains_key(&chat) && inner.logs.len() >= self.max_chats {
            let stalest = inner
                .logs
                .iter()
                .min_by_key(|(_, log)| log.last_used)
                .map(|(id, _)| *id);
            if let Some(stalest) = stalest {
                inner.logs.remove(&stalest);
            }
        }

        let log = inner.logs.entry(chat).or_insert_with(|| ChatLog {
            turns: VecDeque::new(),
            last_used: now,
        });
        log.last_used = now;
        log.turns.push_back(ChatTurn::user(prompt));
        log.turns.push_back(ChatTurn::assistant(reply));
        while log.turns.len() > self.exchanges * 2 {
            // Always a user turn and then its reply.
            log.turns.pop_front();
            log.turns.pop_front();
        }
    }

    /// How many chats have something remembered.
    pub fn chat_count(&self) -> usize {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .logs
            .len()
    }
}
