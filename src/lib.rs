//! origin-tracer - attribute batched tree changes to the code that caused them
//!
//! Mutation-causing calls are intercepted and journaled per target with a
//! ranked call site. When change detection later reports a batch of
//! before/after differences, each change is matched against its target's
//! recent journal and passed through a noise-suppression gate before being
//! reported.

pub mod call_site;
pub mod change;
pub mod cli;
pub mod clock;
pub mod config;
pub mod dedupe;
pub mod engine;
pub mod gate;
pub mod journal;
pub mod json_output;
pub mod matcher;
pub mod operation;
pub mod replay;
pub mod scheduler;
pub mod text_output;

pub use call_site::{CallSite, StackResolver, TraceResolver};
pub use change::{ChangeShape, ChildNode, DetectedChange};
pub use config::{ConfigError, Preset, TracerConfig};
pub use engine::{AttributionResult, OriginEngine, ResultSink, SharedEngine, SuppressionNotice};
pub use journal::TargetId;
pub use operation::{Interception, OperationRecord, Sign};
pub use scheduler::{SchedulerContext, SchedulerKind};
