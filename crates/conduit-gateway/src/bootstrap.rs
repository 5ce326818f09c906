//! Constructs every collaborator the pipeline and channel adapters need
//! from one loaded [`ConduitConfig`]. Kept separate from [`crate::app`] so `main` stays a thin
//! "load config, bootstrap, serve" sequence.

use std::sync::Arc;

use conduit_archive::ArchiveStore;
use conduit_core::config::ConduitConfig;
use conduit_memory::{MemoryManager, RecallWeights};
use conduit_policy::{AdminHandler, PolicyEngine};
use conduit_security::{RuleSpec, SecurityEngine};
use conduit_sessions::SessionStore;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use conduit_pipeline::{Pipeline, PipelineDeps, PipelineSettings};

/// Everything `main` needs to register channel adapters and run the
/// orchestrator loop.
pub struct Bootstrap {
    pub pipeline: Arc<Pipeline>,
    pub deps: Arc<PipelineDeps>,
    pub sessions: Arc<SessionStore>,
    pub archive: Arc<ArchiveStore>,
    pub shutdown: CancellationToken,
}

/// Load `security_rules.json` from `path`, falling back to an empty rule
/// set (no input/output filtering) if the file is absent — curated
/// security rules are an operator-provided deployment artifact, not
/// something the gateway can invent a default for.
fn load_security_rules(path: &str) -> Vec<RuleSpec> {
    match std::fs::read_to_string(path) {
        Ok(raw) => match serde_json::from_str(&raw) {
            Ok(rules) => rules,
            Err(e) => {
                warn!(path, error = %e, "malformed security_rules.json, starting with no rules");
                Vec::new()
            }
        },
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
        Err(e) => {
            warn!(path, error = %e, "failed to read security_rules.json, starting with no rules");
            Vec::new()
        }
    }
}

pub fn bootstrap(config: &ConduitConfig) -> anyhow::Result<Bootstrap> {
    let storage = &config.storage;

    std::fs::create_dir_all(&config.media.incoming_dir)?;
    std::fs::create_dir_all(&config.media.outgoing_dir)?;
    std::fs::create_dir_all(storage.sessions_dir())?;
    std::fs::create_dir_all(storage.policy_backups_dir())?;
    if let Some(parent) = std::path::Path::new(&storage.archive_db_path()).parent() {
        std::fs::create_dir_all(parent)?;
    }
    if let Some(parent) = std::path::Path::new(&storage.memory_db_path()).parent() {
        std::fs::create_dir_all(parent)?;
    }

    let policy = Arc::new(PolicyEngine::load(storage.policy_path())?);
    let admin = Arc::new(AdminHandler::new(Arc::clone(&policy), storage.policy_audit_db_path(), storage.policy_backups_dir())?);

    let archive_conn = rusqlite::Connection::open(storage.archive_db_path())?;
    conduit_archive::db::init_db(&archive_conn)?;
    let archive = Arc::new(ArchiveStore::new(archive_conn));

    let memory_conn = rusqlite::Connection::open(storage.memory_db_path())?;
    conduit_memory::db::init_db(&memory_conn)?;
    let weights = RecallWeights {
        lexical: config.memory.weight_lexical,
        vector: config.memory.weight_vector,
        salience: config.memory.weight_salience,
        recency: config.memory.weight_recency,
    };
    let memory = Arc::new(MemoryManager::new(memory_conn, weights, config.memory.recall_half_life_days));

    let rules = load_security_rules(&storage.security_rules_path());
    let security = Arc::new(SecurityEngine::compile(rules)?);

    let sessions = Arc::new(SessionStore::new(storage.sessions_dir()));

    let shutdown = CancellationToken::new();

    let settings = PipelineSettings {
        memory_capture_channels: config.memory.capture_channels.clone(),
        memory_capture_assistant: config.memory.capture_assistant,
        memory_min_confidence: config.memory.min_confidence,
        memory_min_salience: config.memory.min_salience,
        memory_owner_only_preference: config.memory.owner_only_preference,
        ..PipelineSettings::default()
    };

    let deps = Arc::new(PipelineDeps::new(
        policy,
        Arc::clone(&archive),
        memory,
        security,
        admin,
        Arc::new(conduit_pipeline::responder::NullResponder),
        Arc::new(conduit_pipeline::tts::NullTts),
        settings,
        shutdown.clone(),
    ));

    let pipeline = Arc::new(Pipeline::new());

    Ok(Bootstrap {
        pipeline,
        deps,
        sessions,
        archive,
        shutdown,
    })
}
