//! Principals, actions, resource scopes, and grants.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use dormant_core::normalize_record_name;

use crate::error::{IamError, IamResult};

/// Name of the autoscaling policy engine's identity.
pub const AUTOSCALER: &str = "autoscaler";
/// Default name of the launcher's identity.
pub const LAUNCHER: &str = "launcher";

/// An authenticated actor identity.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Principal(String);

impl Principal {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn autoscaler() -> Self {
        Self::new(AUTOSCALER)
    }

    pub fn launcher() -> Self {
        Self::new(LAUNCHER)
    }

    /// The sidecar identity bound to exactly one world.
    pub fn watchdog(world_id: &str) -> Self {
        Self(format!("watchdog:{world_id}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Principal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Action {
    DescribeService,
    UpdateDesiredCount,
    ReadMetrics,
    PutMetrics,
    ChangeRecord,
    ListRecords,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Action::DescribeService => "DescribeService",
            Action::UpdateDesiredCount => "UpdateDesiredCount",
            Action::ReadMetrics => "ReadMetrics",
            Action::PutMetrics => "PutMetrics",
            Action::ChangeRecord => "ChangeRecord",
            Action::ListRecords => "ListRecords",
        };
        f.write_str(name)
    }
}

/// A single concrete resource a grant applies to.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ResourceScope {
    Service { cluster: String, service: String },
    TaskFamily { cluster: String, family: String },
    /// One record inside a hosted zone. Zones may be shared between worlds,
    /// so DNS grants always name the record.
    Record { zone_id: String, name: String },
}

impl ResourceScope {
    /// A record scope with the name in canonical form.
    pub fn record(zone_id: impl Into<String>, name: &str) -> Self {
        ResourceScope::Record {
            zone_id: zone_id.into(),
            name: normalize_record_name(name),
        }
    }

    fn components(&self) -> Vec<&str> {
        match self {
            ResourceScope::Service { cluster, service } => vec![cluster.as_str(), service.as_str()],
            ResourceScope::TaskFamily { cluster, family } => vec![cluster.as_str(), family.as_str()],
            ResourceScope::Record { zone_id, name } => vec![zone_id.as_str(), name.as_str()],
        }
    }

    /// Reject scopes that could match more than one resource.
    fn validate(&self) -> IamResult<()> {
        for component in self.components() {
            if component.is_empty() || component.contains('*') || component.contains('?') {
                return Err(IamError::WildcardScope(self.to_string()));
            }
        }
        Ok(())
    }
}

impl fmt::Display for ResourceScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceScope::Service { cluster, service } => {
                write!(f, "service/{cluster}/{service}")
            }
            ResourceScope::TaskFamily { cluster, family } => {
                write!(f, "task/{cluster}/{family}")
            }
            ResourceScope::Record { zone_id, name } => write!(f, "hostedzone/{zone_id}/{name}"),
        }
    }
}

/// Permission for one principal to perform some actions on one resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Grant {
    principal: Principal,
    scope: ResourceScope,
    actions: BTreeSet<Action>,
}

impl Grant {
    pub fn new(
        principal: Principal,
        scope: ResourceScope,
        actions: impl IntoIterator<Item = Action>,
    ) -> IamResult<Self> {
        scope.validate()?;
        Ok(Self {
            principal,
            scope,
            actions: actions.into_iter().collect(),
        })
    }

    pub fn principal(&self) -> &Principal {
        &self.principal
    }

    pub fn scope(&self) -> &ResourceScope {
        &self.scope
    }

    pub fn actions(&self) -> &BTreeSet<Action> {
        &self.actions
    }

    pub fn permits(&self, principal: &Principal, action: Action, scope: &ResourceScope) -> bool {
        self.principal == *principal && self.scope == *scope && self.actions.contains(&action)
    }
}
