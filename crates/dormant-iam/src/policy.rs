//! Default-deny policy evaluation and the standard per-world grant set.

use tracing::debug;

use dormant_core::WorldConfig;

use crate::error::{IamError, IamResult};
use crate::grant::{Action, Grant, Principal, ResourceScope};

/// The concrete resources that make up one world.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorldScope {
    pub world_id: String,
    pub cluster: String,
    pub service: String,
    pub task_family: String,
    pub zone_id: String,
    pub record_name: String,
}

impl WorldScope {
    pub fn from_config(config: &WorldConfig) -> Self {
        Self {
            world_id: config.id.clone(),
            cluster: config.cluster_name(),
            service: config.service_name(),
            task_family: config.task_family_name(),
            zone_id: config.dns.zone_id.clone(),
            record_name: config.dns.record_name.clone(),
        }
    }

    pub fn service(&self) -> ResourceScope {
        ResourceScope::Service {
            cluster: self.cluster.clone(),
            service: self.service.clone(),
        }
    }

    pub fn task_family(&self) -> ResourceScope {
        ResourceScope::TaskFamily {
            cluster: self.cluster.clone(),
            family: self.task_family.clone(),
        }
    }

    /// The world's own record in its hosted zone.
    pub fn record(&self) -> ResourceScope {
        ResourceScope::record(self.zone_id.clone(), &self.record_name)
    }
}

/// The standard grants for one world.
///
/// - the world's watchdog may describe and scale its own service, report
///   metrics for its task family, and read and change its own record
/// - the autoscaler may describe and scale the service and read its metrics
/// - the launcher may describe and scale the service
pub fn grants_for_world(world: &WorldScope, launcher: &Principal) -> IamResult<Vec<Grant>> {
    let watchdog = Principal::watchdog(&world.world_id);
    let autoscaler = Principal::autoscaler();

    Ok(vec![
        Grant::new(
            watchdog.clone(),
            world.service(),
            [Action::DescribeService, Action::UpdateDesiredCount],
        )?,
        Grant::new(
            watchdog.clone(),
            world.task_family(),
            [Action::PutMetrics, Action::ReadMetrics],
        )?,
        Grant::new(
            watchdog,
            world.record(),
            [Action::ListRecords, Action::ChangeRecord],
        )?,
        Grant::new(
            autoscaler.clone(),
            world.service(),
            [Action::DescribeService, Action::UpdateDesiredCount],
        )?,
        Grant::new(autoscaler, world.task_family(), [Action::ReadMetrics])?,
        Grant::new(
            launcher.clone(),
            world.service(),
            [Action::DescribeService, Action::UpdateDesiredCount],
        )?,
    ])
}

/// A set of grants evaluated default-deny.
#[derive(Debug, Clone, Default)]
pub struct Policy {
    grants: Vec<Grant>,
}

impl Policy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the policy covering every configured world.
    pub fn for_worlds(worlds: &[WorldConfig], launcher: &Principal) -> IamResult<Self> {
        let mut policy = Self::new();
        for world in worlds {
            policy.extend(grants_for_world(&WorldScope::from_config(world), launcher)?);
        }
        Ok(policy)
    }

    pub fn add(&mut self, grant: Grant) {
        self.grants.push(grant);
    }

    pub fn extend(&mut self, grants: impl IntoIterator<Item = Grant>) {
        self.grants.extend(grants);
    }

    pub fn grants(&self) -> &[Grant] {
        &self.grants
    }

    pub fn is_allowed(&self, principal: &Principal, action: Action, scope: &ResourceScope) -> bool {
        self.grants
            .iter()
            .any(|grant| grant.permits(principal, action, scope))
    }

    pub fn authorize(
        &self,
        principal: &Principal,
        action: Action,
        scope: &ResourceScope,
    ) -> IamResult<()> {
        if self.is_allowed(principal, action, scope) {
            return Ok(());
        }
        debug!(%principal, %action, %scope, "access denied");
        Err(IamError::AccessDenied {
            principal: principal.to_string(),
            action,
            scope: scope.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn world(id: &str, zone: &str) -> WorldScope {
        WorldScope {
            world_id: id.to_string(),
            cluster: format!("{id}-cluster"),
            service: format!("{id}-service"),
            task_family: id.to_string(),
            zone_id: zone.to_string(),
            record_name: format!("{id}.example.com"),
        }
    }

    fn two_world_policy() -> (Policy, WorldScope, WorldScope) {
        let a = world("sat", "ZA");
        let b = world("val", "ZB");
        let mut policy = Policy::new();
        policy.extend(grants_for_world(&a, &Principal::launcher()).unwrap());
        policy.extend(grants_for_world(&b, &Principal::launcher()).unwrap());
        (policy, a, b)
    }

    #[test]
    fn empty_policy_denies_everything() {
        let policy = Policy::new();
        let a = world("sat", "ZA");
        let err = policy
            .authorize(&Principal::autoscaler(), Action::DescribeService, &a.service())
            .unwrap_err();
        assert!(matches!(err, IamError::AccessDenied { action: Action::DescribeService, .. }));
    }

    #[test]
    fn watchdog_confined_to_its_world() {
        let (policy, a, b) = two_world_policy();
        let watchdog = Principal::watchdog("sat");

        assert!(policy.authorize(&watchdog, Action::UpdateDesiredCount, &a.service()).is_ok());
        assert!(policy.authorize(&watchdog, Action::ChangeRecord, &a.record()).is_ok());
        assert!(policy.authorize(&watchdog, Action::PutMetrics, &a.task_family()).is_ok());

        assert!(policy.authorize(&watchdog, Action::UpdateDesiredCount, &b.service()).is_err());
        assert!(policy.authorize(&watchdog, Action::ChangeRecord, &b.record()).is_err());
        assert!(policy.authorize(&watchdog, Action::PutMetrics, &b.task_family()).is_err());
    }

    #[test]
    fn autoscaler_cannot_touch_dns() {
        let (policy, a, _) = two_world_policy();
        let autoscaler = Principal::autoscaler();
        assert!(policy.authorize(&autoscaler, Action::UpdateDesiredCount, &a.service()).is_ok());
        assert!(policy.authorize(&autoscaler, Action::ReadMetrics, &a.task_family()).is_ok());
        assert!(policy.authorize(&autoscaler, Action::PutMetrics, &a.task_family()).is_err());
        assert!(policy.authorize(&autoscaler, Action::ChangeRecord, &a.record()).is_err());
    }

    #[test]
    fn launcher_enumerated_per_world() {
        let a = world("sat", "ZA");
        let b = world("val", "ZB");
        let mut policy = Policy::new();
        policy.extend(grants_for_world(&a, &Principal::launcher()).unwrap());

        let launcher = Principal::launcher();
        assert!(policy.authorize(&launcher, Action::UpdateDesiredCount, &a.service()).is_ok());
        assert!(policy.authorize(&launcher, Action::UpdateDesiredCount, &b.service()).is_err());
        assert!(policy.authorize(&launcher, Action::ChangeRecord, &a.record()).is_err());
    }

    #[test]
    fn shared_zone_keeps_records_apart() {
        let a = world("sat", "ZSHARED");
        let b = world("val", "ZSHARED");
        let mut policy = Policy::new();
        policy.extend(grants_for_world(&a, &Principal::launcher()).unwrap());
        policy.extend(grants_for_world(&b, &Principal::launcher()).unwrap());

        let watchdog = Principal::watchdog("sat");
        assert!(policy.authorize(&watchdog, Action::ChangeRecord, &a.record()).is_ok());
        assert!(policy.authorize(&watchdog, Action::ChangeRecord, &b.record()).is_err());
        assert!(policy.authorize(&watchdog, Action::ListRecords, &b.record()).is_err());
        assert!(
            policy
                .authorize(
                    &watchdog,
                    Action::ChangeRecord,
                    &ResourceScope::record("ZSHARED", "SAT.example.com."),
                )
                .is_ok()
        );
    }

    #[test]
    fn unknown_principal_denied() {
        let (policy, a, _) = two_world_policy();
        assert!(
            policy
                .authorize(&Principal::new("intruder"), Action::DescribeService, &a.service())
                .is_err()
        );
    }
}
