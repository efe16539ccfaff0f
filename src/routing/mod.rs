//! Routing core: agent labels, the phase map, access control, the
//! classifier and routing decisions.

pub mod access;
pub mod cache;
pub mod classifier;
pub mod decision;
pub mod kind;
pub mod mode;
pub mod phase_map;

pub use access::{AccessDecision, AccessGate, DenialReason};
pub use cache::BoundedCache;
pub use classifier::{Classification, ClassificationSource, Classifier, ClassifierConfig};
pub use decision::{
    ChannelDecisionSink, DecisionDraft, DecisionOutcome, DecisionSink, Latency, LatencyTracker,
    RoutingDecision, TracingDecisionSink,
};
pub use kind::{AgentKind, UnknownAgent};
pub use mode::{ExecutionMode, Mode};
pub use phase_map::{PhaseMap, PhaseRange};
