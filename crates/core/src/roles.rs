//! Approver role ordering and per-role authority limits.
//!
//! The role table is injected read-only into the template selector and the
//! step processor; nothing in the engine mutates it after construction.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::domain::action::{Environment, RiskScore};
use crate::errors::PolicyError;

/// Strict total order: `Operator < Supervisor < Manager < Director <
/// ComplianceOfficer`. Declaration order drives both `Ord` and escalation
/// target selection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApproverRole {
    Operator,
    Supervisor,
    Manager,
    Director,
    ComplianceOfficer,
}

impl ApproverRole {
    pub const ORDERED: [ApproverRole; 5] = [
        Self::Operator,
        Self::Supervisor,
        Self::Manager,
        Self::Director,
        Self::ComplianceOfficer,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Operator => "operator",
            Self::Supervisor => "supervisor",
            Self::Manager => "manager",
            Self::Director => "director",
            Self::ComplianceOfficer => "compliance_officer",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "operator" => Some(Self::Operator),
            "supervisor" => Some(Self::Supervisor),
            "manager" => Some(Self::Manager),
            "director" => Some(Self::Director),
            "compliance_officer" => Some(Self::ComplianceOfficer),
            _ => None,
        }
    }

    /// Fallible variant for adapter boundaries; unknown role names must
    /// surface as a policy input error, never default to a role.
    pub fn from_input(value: &str) -> Result<Self, PolicyError> {
        Self::parse(value).ok_or_else(|| PolicyError::InvalidPolicyInput {
            field: "approver_role".to_owned(),
            value: value.to_owned(),
        })
    }

    pub fn rank(&self) -> u8 {
        match self {
            Self::Operator => 0,
            Self::Supervisor => 1,
            Self::Manager => 2,
            Self::Director => 3,
            Self::ComplianceOfficer => 4,
        }
    }

    /// Escalation target: the next role in the order, `None` at the top.
    pub fn next_higher(&self) -> Option<Self> {
        match self {
            Self::Operator => Some(Self::Supervisor),
            Self::Supervisor => Some(Self::Manager),
            Self::Manager => Some(Self::Director),
            Self::Director => Some(Self::ComplianceOfficer),
            Self::ComplianceOfficer => None,
        }
    }
}

/// Authority limits for one role. `allowed_environments` empty means no
/// environment restriction. `max_server_count` is carried for lookup by the
/// remediation executor; the engine itself has no per-workflow target count
/// to compare it against.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleAuthority {
    pub role: ApproverRole,
    pub max_risk_score: u8,
    pub max_server_count: u32,
    pub allowed_environments: Vec<Environment>,
}

impl RoleAuthority {
    pub fn allows_environment(&self, environment: Environment) -> bool {
        self.allowed_environments.is_empty() || self.allowed_environments.contains(&environment)
    }
}

#[derive(Clone, Debug)]
pub struct RolePolicyTable {
    authorities: BTreeMap<ApproverRole, RoleAuthority>,
}

impl RolePolicyTable {
    pub fn new(authorities: Vec<RoleAuthority>) -> Self {
        let authorities = authorities.into_iter().map(|authority| (authority.role, authority)).collect();
        Self { authorities }
    }

    /// Default table: every role may see every environment and any risk;
    /// server-count ceilings grow with seniority. Deployments tighten these
    /// through configuration, not code.
    pub fn builtin() -> Self {
        Self::new(vec![
            RoleAuthority {
                role: ApproverRole::Operator,
                max_risk_score: 100,
                max_server_count: 5,
                allowed_environments: Vec::new(),
            },
            RoleAuthority {
                role: ApproverRole::Supervisor,
                max_risk_score: 100,
                max_server_count: 25,
                allowed_environments: Vec::new(),
            },
            RoleAuthority {
                role: ApproverRole::Manager,
                max_risk_score: 100,
                max_server_count: 100,
                allowed_environments: Vec::new(),
            },
            RoleAuthority {
                role: ApproverRole::Director,
                max_risk_score: 100,
                max_server_count: 500,
                allowed_environments: Vec::new(),
            },
            RoleAuthority {
                role: ApproverRole::ComplianceOfficer,
                max_risk_score: 100,
                max_server_count: 10_000,
                allowed_environments: Vec::new(),
            },
        ])
    }

    pub fn authority_for(&self, role: ApproverRole) -> Option<&RoleAuthority> {
        self.authorities.get(&role)
    }

    /// Minimum-role comparison used by every decision precondition.
    pub fn satisfies(&self, acting: ApproverRole, required: ApproverRole) -> bool {
        acting >= required
    }

    pub fn escalation_target(&self, current: ApproverRole) -> Option<ApproverRole> {
        current.next_higher().filter(|next| self.authorities.contains_key(next))
    }

    /// Visibility filter for the actionable-workflow read model. A role with
    /// no configured authority sees nothing.
    pub fn can_act_on(&self, role: ApproverRole, risk: RiskScore, environment: Environment) -> bool {
        self.authority_for(role)
            .map(|authority| {
                risk.value() <= authority.max_risk_score && authority.allows_environment(environment)
            })
            .unwrap_or(false)
    }
}

impl Default for RolePolicyTable {
    fn default() -> Self {
        Self::builtin()
    }
}

#[cfg(test)]
mod tests {
    use super::{ApproverRole, RoleAuthority, RolePolicyTable};
    use crate::domain::action::{Environment, RiskScore};

    fn risk(value: i64) -> RiskScore {
        RiskScore::new(value).expect("test risk score in range")
    }

    #[test]
    fn role_order_is_strict_and_total() {
        let ordered = ApproverRole::ORDERED;
        for pair in ordered.windows(2) {
            assert!(pair[0] < pair[1], "{:?} must rank below {:?}", pair[0], pair[1]);
        }
        assert_eq!(ApproverRole::Operator.rank(), 0);
        assert_eq!(ApproverRole::ComplianceOfficer.rank(), 4);
    }

    #[test]
    fn role_names_round_trip_from_storage_encoding() {
        for role in ApproverRole::ORDERED {
            assert_eq!(ApproverRole::parse(role.as_str()), Some(role));
        }
    }

    #[test]
    fn unknown_role_name_is_a_policy_input_error() {
        let failure = ApproverRole::from_input("superuser").expect_err("must not default");
        assert!(matches!(
            failure,
            crate::errors::PolicyError::InvalidPolicyInput { ref field, .. } if field == "approver_role"
        ));
    }

    #[test]
    fn escalation_walks_the_order_and_stops_at_the_top() {
        let table = RolePolicyTable::builtin();
        assert_eq!(table.escalation_target(ApproverRole::Operator), Some(ApproverRole::Supervisor));
        assert_eq!(
            table.escalation_target(ApproverRole::Director),
            Some(ApproverRole::ComplianceOfficer)
        );
        assert_eq!(table.escalation_target(ApproverRole::ComplianceOfficer), None);
    }

    #[test]
    fn builtin_table_does_not_restrict_visibility() {
        let table = RolePolicyTable::builtin();
        assert!(table.can_act_on(ApproverRole::Operator, risk(85), Environment::Production));
    }

    #[test]
    fn tightened_authority_limits_restrict_visibility() {
        let table = RolePolicyTable::new(vec![RoleAuthority {
            role: ApproverRole::Operator,
            max_risk_score: 40,
            max_server_count: 5,
            allowed_environments: vec![Environment::Development, Environment::Staging],
        }]);

        assert!(table.can_act_on(ApproverRole::Operator, risk(35), Environment::Staging));
        assert!(!table.can_act_on(ApproverRole::Operator, risk(55), Environment::Staging));
        assert!(!table.can_act_on(ApproverRole::Operator, risk(35), Environment::Production));
        assert!(!table.can_act_on(ApproverRole::Manager, risk(10), Environment::Development));
    }
}
