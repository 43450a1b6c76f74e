//! The resumable inbox workflow.
//!
//! ```text
//! Fetching → Classifying → Drafting → AwaitingApproval ⟲ → Finalizing → Completed
//!                                                         (any) → Failed
//! ```

pub mod dispatcher;
pub mod engine;
pub mod queue;
pub mod state;

pub use dispatcher::{ActionEvent, ActionKind, ResumeDispatcher};
pub use engine::{ActiveRun, EngineDeps, WorkflowEngine};
pub use queue::{ApprovalQueue, DecisionCounts, DraftRef};
pub use state::{Decision, Draft, DraftSummary, Phase, ReplyTarget, RunResult, WorkflowState};
