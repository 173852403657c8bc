//! Vouch service core.
//!
//! [`Vouch`] is the entry point the transport layer drives: it composes a
//! [`SessionRepository`](vouch_store::SessionRepository), the
//! [`ArtifactPipeline`](vouch_media::ArtifactPipeline) and a
//! [`DecisionEngine`](vouch_decision::DecisionEngine). Verification runs
//! through [`VerificationOrchestrator`]; raw-media retention through
//! [`RetentionScheduler`].

mod orchestrator;
mod pool;
mod retention;
mod service;

pub use orchestrator::{VerificationOrchestrator, VerifyRequest};
pub use pool::{BlockingPool, run_blocking};
pub use retention::{RetentionHandle, RetentionPolicy, RetentionScheduler, SweepOutcome, SweepReport};
pub use service::{Vouch, VouchOptions};
