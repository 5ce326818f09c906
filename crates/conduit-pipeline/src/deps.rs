use std::sync::{Arc, Mutex};

use conduit_archive::ArchiveStore;
use conduit_core::cache::TtlLruSet;
use conduit_core::config::{
    DEFAULT_AMBIENT_WINDOW_LIMIT, DEFAULT_REPLY_CONTEXT_WINDOW_LIMIT, PIPELINE_DEDUP_MAX_ENTRIES,
    PIPELINE_DEDUP_TTL_SECS,
};
use conduit_memory::{Embedder, Extractor, HeuristicExtractor, MemoryManager};
use conduit_policy::{AdminHandler, PolicyEngine};
use conduit_security::SecurityEngine;
use tokio_util::sync::CancellationToken;

use crate::responder::Responder;
use crate::tts::TtsProvider;

/// Tunables that aren't part of any on-disk schema but still vary by
/// deployment (window sizes, the intent words IdeaCapture matches on, which
/// chat NewChatNotify posts into, the memory capture eligibility policy
/// Outbound applies).
pub struct PipelineSettings {
    pub reply_context_window_limit: usize,
    pub ambient_window_limit: usize,
    pub idea_intent_words: Vec<String>,
    pub backlog_intent_words: Vec<String>,
    pub owner_notify_channel: Option<String>,
    pub owner_notify_chat_id: Option<String>,
    /// Channels eligible for memory capture. Empty means no
    /// channel is eligible — capture is opt-in per deployment.
    pub memory_capture_channels: Vec<String>,
    /// Whether the assistant's own reply text is also eligible for capture.
    pub memory_capture_assistant: bool,
    pub memory_min_confidence: f64,
    pub memory_min_salience: f64,
    /// When set, drop non-owner `semantic`/`procedural` candidates during
    /// extraction filtering.
    pub memory_owner_only_preference: bool,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            reply_context_window_limit: DEFAULT_REPLY_CONTEXT_WINDOW_LIMIT,
            ambient_window_limit: DEFAULT_AMBIENT_WINDOW_LIMIT,
            idea_intent_words: vec!["idea".to_string(), "idee".to_string(), "ideia".to_string()],
            backlog_intent_words: vec!["backlog".to_string(), "todo".to_string()],
            owner_notify_channel: None,
            owner_notify_chat_id: None,
            memory_capture_channels: Vec::new(),
            memory_capture_assistant: false,
            memory_min_confidence: 0.5,
            memory_min_salience: 0.3,
            memory_owner_only_preference: false,
        }
    }
}

/// Everything a `Stage::run` needs besides the per-run `PipelineContext`.
///
/// Assembled once at bootstrap in `conduit-gateway::main` and shared (via
/// the enclosing `Arc`) across every concurrent pipeline run; the only
/// mutable piece is the dedup cache, which is a single-writer structure
/// behind its own `Mutex` (Design Note "Caches as bounded LRU+TTL").
pub struct PipelineDeps {
    pub policy: Arc<PolicyEngine>,
    pub archive: Arc<ArchiveStore>,
    pub memory: Arc<MemoryManager>,
    pub security: Arc<SecurityEngine>,
    pub admin: Arc<AdminHandler>,
    pub responder: Arc<dyn Responder>,
    pub tts: Arc<dyn TtsProvider>,
    pub embedder: Option<Arc<dyn Embedder>>,
    pub extractor: Arc<dyn Extractor>,
    pub dedup_cache: Mutex<TtlLruSet<(String, String, String)>>,
    pub settings: PipelineSettings,
    /// Cancelled by the `/panic` admin command; the runner checks this
    /// between stages and in-flight responders honor it as a soft deadline.
    pub shutdown: CancellationToken,
}

impl PipelineDeps {
    pub fn new(
        policy: Arc<PolicyEngine>,
        archive: Arc<ArchiveStore>,
        memory: Arc<MemoryManager>,
        security: Arc<SecurityEngine>,
        admin: Arc<AdminHandler>,
        responder: Arc<dyn Responder>,
        tts: Arc<dyn TtsProvider>,
        settings: PipelineSettings,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            policy,
            archive,
            memory,
            security,
            admin,
            responder,
            tts,
            embedder: None,
            extractor: Arc::new(HeuristicExtractor),
            dedup_cache: Mutex::new(TtlLruSet::new(
                std::time::Duration::from_secs(PIPELINE_DEDUP_TTL_SECS),
                PIPELINE_DEDUP_MAX_ENTRIES,
            )),
            settings,
            shutdown,
        }
    }

    pub fn with_extractor(mut self, extractor: Arc<dyn Extractor>) -> Self {
        self.extractor = extractor;
        self
    }

    pub fn with_embedder(mut self, embedder: Arc<dyn Embedder>) -> Self {
        self.embedder = Some(embedder);
        self
    }
}
