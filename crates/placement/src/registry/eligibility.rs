use std::fmt;

use serde::Serialize;

use super::domain::{Branch, Company, Student};

/// Gate a registration failed.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum IneligibilityReason {
    BranchNotAllowed { branch: Branch },
    AggregateBelowThreshold { aggregate: f64, threshold: f64 },
}

impl fmt::Display for IneligibilityReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BranchNotAllowed { branch } => write!(f, "branch {branch} is not accepted"),
            Self::AggregateBelowThreshold {
                aggregate,
                threshold,
            } => write!(f, "aggregate {aggregate} is below the threshold {threshold}"),
        }
    }
}

/// A student may register when their branch is allowed and their aggregate meets the threshold.
pub fn is_eligible(student: &Student, company: &Company) -> bool {
    company.allowed_branches.contains(&student.branch)
        && student.aggregate >= company.aggregate_threshold
}

pub fn ineligibility_reasons(student: &Student, company: &Company) -> Vec<IneligibilityReason> {
    let mut reasons = Vec::new();
    if !company.allowed_branches.contains(&student.branch) {
        reasons.push(IneligibilityReason::BranchNotAllowed {
            branch: student.branch,
        });
    }
    if student.aggregate < company.aggregate_threshold {
        reasons.push(IneligibilityReason::AggregateBelowThreshold {
            aggregate: student.aggregate,
            threshold: company.aggregate_threshold,
        });
    }
    reasons
}
