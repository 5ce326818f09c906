//! Shared test fixtures for stage unit tests. Not part of the public API.

use std::collections::HashMap;
use std::sync::Arc;

use conduit_archive::ArchiveStore;
use conduit_core::types::{ChannelTag, ChatId, ContentBlock, Identity, Message, MessageId};
use conduit_memory::{MemoryManager, RecallWeights};
use conduit_policy::{AdminHandler, PolicyEngine};
use conduit_policy::schema::PolicySpec;
use conduit_security::SecurityEngine;
use rusqlite::Connection;

use crate::deps::{PipelineDeps, PipelineSettings};
use crate::responder::NullResponder;
use crate::tts::NullTts;

pub fn test_message(chat_id: &str, text: &str) -> Message {
    Message {
        id: MessageId::from(uuid::Uuid::new_v4().to_string()),
        channel: ChannelTag::from("whatsapp"),
        chat_id: ChatId::from(chat_id),
        sender: Identity::new("+15550001111"),
        content: vec![ContentBlock::text(text)],
        reply_to: None,
        timestamp: chrono::Utc::now(),
        is_group: false,
        mentioned_bot: false,
        reply_to_bot: false,
        participant: None,
        metadata: HashMap::new(),
    }
}

pub fn test_deps() -> PipelineDeps {
    let policy = Arc::new(PolicyEngine::from_spec(
        PolicySpec::default(),
        std::env::temp_dir().join(format!("conduit-pipeline-test-policy-{}.json", uuid::Uuid::new_v4())),
    ));
    let archive = Arc::new(ArchiveStore::new(Connection::open_in_memory().unwrap()));
    let memory = Arc::new(MemoryManager::new(
        Connection::open_in_memory().unwrap(),
        RecallWeights::default(),
        30.0,
    ));
    let security = Arc::new(SecurityEngine::empty());
    let tmp = std::env::temp_dir().join(format!("conduit-pipeline-test-{}", uuid::Uuid::new_v4()));
    let admin = Arc::new(
        AdminHandler::new(policy.clone(), tmp.join("audit.db"), tmp.join("backups")).unwrap(),
    );
    PipelineDeps::new(
        policy,
        archive,
        memory,
        security,
        admin,
        Arc::new(NullResponder),
        Arc::new(NullTts),
        PipelineSettings::default(),
        tokio_util::sync::CancellationToken::new(),
    )
}
