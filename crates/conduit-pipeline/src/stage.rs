use async_trait::async_trait;

use crate::context::PipelineContext;
use crate::deps::PipelineDeps;
use crate::error::Result;

/// Whether the runner should continue to the next stage or stop.
///
/// A stage that halts has already appended whatever intents it needed to
/// `ctx.intents` and set `ctx.halted = true` itself — `Halt` here is just the
/// runner's own short-circuit signal, mirroring `ctx.halted` rather than
/// duplicating state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Halt,
}

/// One middleware in the 13-stage chain.
///
/// The chain is a static, declared-order `Vec<Box<dyn Stage>>` built once at
/// bootstrap (Design Note "Pipeline as explicit sequence, not reflection") —
/// there is no self-registration and no priority sort; call-site order in
/// `Pipeline::new` *is* the order stages run in.
#[async_trait]
pub trait Stage: Send + Sync {
    fn name(&self) -> &'static str;

    /// Run this stage. Must not block indefinitely and must not mutate
    /// `ctx.event` after Normalize has run, except for enrichment fields
    /// written into `event.metadata`.
    async fn run(&self, ctx: &mut PipelineContext, deps: &PipelineDeps) -> Result<Flow>;
}
