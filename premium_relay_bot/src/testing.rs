//! Recording fakes of the outside world, for tests.

use std::{
    collections::HashSet,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Mutex,
    },
};

use async_trait::async_trait;
use teloxide::{
    types::{ChatId, UserId},
    RequestError,
};
use url::Url;

use crate::{
    chat::ChatApi,
    generation::{ChatTurn, GenerationError, ImageGenerator, TextGenerator},
    ledger::{AccessFlag, AccessLedger, AccessRecord, LedgerError, MemoryLedger},
    payments::{PaymentError, PaymentNotification, PaymentProvider},
};

/// In-memory ledger that counts how much it's been used.
#[derive(Default)]
pub struct TestLedger {
    inner: MemoryLedger,
    checks: AtomicUsize,
    grants: AtomicUsize,
    failing_writes: AtomicBool,
}

impl TestLedger {
    /// A ledger whose storage has gone away: every grant fails, reads still work.
    pub fn failing_writes() -> Self {
        let ledger = TestLedger::default();
        ledger.failing_writes.store(true, Ordering::SeqCst);
        ledger
    }
    pub fn checks(&self) -> usize {
        self.checks.load(Ordering::SeqCst)
    }
    pub fn grants(&self) -> usize {
        self.grants.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AccessLedger for TestLedger {
    async fn grant(&self, user: UserId, flag: AccessFlag) -> Result<(), LedgerError> {
        self.grants.fetch_add(1, Ordering::SeqCst);
        if self.failing_writes.load(Ordering::SeqCst) {
            return Err(LedgerError::Io(std::io::Error::other("disk went away")));
        }
        self.inner.grant(user, flag).await
    }

    async fn check(&self, user: UserId, flag: AccessFlag) -> Result<bool, LedgerError> {
        self.checks.fetch_add(1, Ordering::SeqCst);
        self.inner.check(user, flag).await
    }

    async fn record(&self, user: UserId) -> Result<AccessRecord, LedgerError> {
        self.inner.record(user).await
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Sent {
    Text(ChatId, String),
    Photo(ChatId, Url),
    Typing(ChatId),
}

#[derive(Default)]
pub struct FakeChat {
    sent: Mutex<Vec<Sent>>,
    members: Mutex<HashSet<(ChatId, UserId)>>,
}

impl FakeChat {
    /// Everything sent so far, minus the typing indicators.
    pub fn sent(&self) -> Vec<Sent> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter(|sent| !matches!(sent, Sent::Typing(_)))
            .cloned()
            .collect()
    }

    pub fn add_member(&self, chat: ChatId, user: UserId) {
        self.members.lock().unwrap().insert((chat, user));
    }
}

#[async_trait]
impl ChatApi for FakeChat {
    async fn send_text(&self, chat: ChatId, text: &str) -> Result<(), RequestError> {
        self.sent
            .lock()
            .unwrap()
            .push(Sent::Text(chat, text.to_string()));
        Ok(())
    }

    async fn send_photo(&self, chat: ChatId, photo: Url) -> Result<(), RequestError> {
        self.sent.lock().unwrap().push(Sent::Photo(chat, photo));
        Ok(())
    }

    async fn typing(&self, chat: ChatId) -> Result<(), RequestError> {
        self.sent.lock().unwrap().push(Sent::Typing(chat));
        Ok(())
    }

    async fn is_member(&self, chat: ChatId, user: UserId) -> Result<bool, RequestError> {
        Ok(self.members.lock().unwrap().contains(&(chat, user)))
    }
}

pub struct FakeText {
    reply: String,
    failing: AtomicBool,
    calls: Mutex<Vec<Vec<ChatTurn>>>,
}

impl FakeText {
    pub fn replying(reply: &str) -> Self {
        FakeText {
            reply: reply.to_string(),
            failing: AtomicBool::new(false),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn fail(&self) {
        self.failing.store(true, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<Vec<ChatTurn>> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl TextGenerator for FakeText {
    async fn complete(&self, turns: &[ChatTurn]) -> Result<String, GenerationError> {
        self.calls.lock().unwrap().push(turns.to_vec());
        if self.failing.load(Ordering::SeqCst) {
            return Err(GenerationError::Api(String::from("model on fire")));
        }
        Ok(self.reply.clone())
    }
}

pub struct FakeImage {
    url: Url,
    failing: AtomicBool,
    prompts: Mutex<Vec<String>>,
}

impl FakeImage {
    pub fn returning(url: &str) -> Self {
        FakeImage {
            url: Url::parse(url).unwrap(),
            failing: AtomicBool::new(false),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn fail(&self) {
        self.failing.store(true, Ordering::SeqCst);
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl ImageGenerator for FakeImage {
    async fn generate(&self, prompt: &str) -> Result<Url, GenerationError> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        if self.failing.load(Ordering::SeqCst) {
            return Err(GenerationError::EmptyResponse);
        }
        Ok(self.url.clone())
    }
}

/// Payment provider whose "signature" is just the literal string `good`,
/// and whose body is the ID of the user that paid, or `ignore`.
#[derive(Default)]
pub struct FakePayments {
    checkouts: Mutex<Vec<UserId>>,
}

impl FakePayments {
    pub fn checkouts(&self) -> Vec<UserId> {
        self.checkouts.lock().unwrap().clone()
    }
}

#[async_trait]
impl PaymentProvider for FakePayments {
    fn name(&self) -> &'static str {
        "fake"
    }

    async fn create_checkout(&self, user: UserId) -> Result<Url, PaymentError> {
        self.checkouts.lock().unwrap().push(user);
        Ok(Url::parse(&format!("https://pay.example.com/{user}"))?)
    }

    fn signature_header(&self) -> &'static str {
        "x-fake-signature"
    }

    fn verify_notification(
        &self,
        signature: Option<&str>,
        body: &[u8],
    ) -> Result<PaymentNotification, PaymentError> {
        match signature {
            None => return Err(PaymentError::MissingSignature),
            Some("good") => {}
            Some(_) => return Err(PaymentError::BadSignature),
        }
        let body = String::from_utf8_lossy(body);
        if body == "ignore" {
            return Ok(PaymentNotification::Ignored {
                reason: String::from("test"),
            });
        }
        let user_id = body
            .trim()
            .parse()
            .map(UserId)
            .map_err(|_| PaymentError::BadReference(body.to_string()))?;
        Ok(PaymentNotification::Completed {
            user_id,
            reference: String::from("pay_1"),
        })
    }
}
