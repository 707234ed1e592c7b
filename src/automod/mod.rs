//! Automod Evaluation Engine (spec.md §4.2): rule loading, detector
//! dispatch, action execution, audit logging, event publication.

mod engine;
mod rules;

pub use engine::{AutomodEngine, AutomodPort, AutomodPortDyn, MessageContext, Trigger};
pub use rules::{check_rule, DetectorInput, DetectorOutcome, RuleConfig};
