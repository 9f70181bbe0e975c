//! Dependency gate
//!
//! A release only proceeds once every release it depends on exists and
//! reports `Ready=True`. Dependencies are checked in declaration order and
//! the first unmet one is reported.

use crate::store::{DependencyLookup, StoreError};
use helm_types::{ConditionSet, ReleaseIdentity};
use std::collections::HashMap;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DependencyError {
    #[error("unable to get '{dependency}' dependency: {reason}")]
    Lookup {
        dependency: ReleaseIdentity,
        reason: String,
    },

    #[error("dependency '{0}' is not ready")]
    NotReady(ReleaseIdentity),
}

impl DependencyError {
    /// The unmet dependency
    pub fn dependency(&self) -> &ReleaseIdentity {
        match self {
            DependencyError::Lookup { dependency, .. } => dependency,
            DependencyError::NotReady(dependency) => dependency,
        }
    }
}

pub struct DependencyGate;

impl DependencyGate {
    /// Check a single dependency given its conditions, if it exists
    pub fn evaluate_one(
        dependency: &ReleaseIdentity,
        conditions: Option<&ConditionSet>,
    ) -> Result<(), DependencyError> {
        let conditions = conditions.ok_or_else(|| DependencyError::Lookup {
            dependency: dependency.clone(),
            reason: "not found".to_string(),
        })?;

        if conditions.is_empty() || !conditions.is_ready() {
            return Err(DependencyError::NotReady(dependency.clone()));
        }
        Ok(())
    }

    /// Check dependencies against a snapshot of condition sets
    pub fn evaluate(
        dependencies: &[ReleaseIdentity],
        snapshot: &HashMap<ReleaseIdentity, ConditionSet>,
    ) -> Result<(), DependencyError> {
        for dependency in dependencies {
            Self::evaluate_one(dependency, snapshot.get(dependency))?;
        }
        Ok(())
    }

    /// Check dependencies by looking each one up, stopping at the first unmet one
    pub async fn check(
        dependencies: &[ReleaseIdentity],
        lookup: &dyn DependencyLookup,
    ) -> Result<(), DependencyError> {
        for dependency in dependencies {
            let conditions = match lookup.conditions(dependency).await {
                Ok(conditions) => conditions,
                Err(StoreError::NotFound(_)) => None,
                Err(e) => {
                    return Err(DependencyError::Lookup {
                        dependency: dependency.clone(),
                        reason: e.to_string(),
                    })
                }
            };
            Self::evaluate_one(dependency, conditions.as_ref())?;
        }
        Ok(())
    }
}
