//! Violation Evaluator
//!
//! A bucket is compliant only when all four public access block settings
//! are enabled.

use super::types::{PublicAccessState, Verdict, ViolationReason};

pub fn evaluate(state: &PublicAccessState) -> Verdict {
    let enabled = state.flags().iter().filter(|f| **f).count();

    let reason = match enabled {
        4 => ViolationReason::Compliant,
        0 => ViolationReason::NoBlockSettings,
        _ => ViolationReason::PartialBlockSettings,
    };

    Verdict {
        is_violation: reason != ViolationReason::Compliant,
        reason,
        state_before: state.clone(),
    }
}
