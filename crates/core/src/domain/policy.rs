use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::absence::AbsenceTypeId;
use crate::domain::org::DepartmentId;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorkflowId(pub String);

impl WorkflowId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

/// Levels of the approval chain, in their default precedence.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalLevel {
    DepartmentManager,
    DepartmentDeputy,
    OfficeDirector,
    OfficeDeputy,
    Hr,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalTier {
    Department,
    Office,
    Hr,
}

impl ApprovalLevel {
    pub const ALL: [ApprovalLevel; 5] = [
        Self::DepartmentManager,
        Self::DepartmentDeputy,
        Self::OfficeDirector,
        Self::OfficeDeputy,
        Self::Hr,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::DepartmentManager => "department_manager",
            Self::DepartmentDeputy => "department_deputy",
            Self::OfficeDirector => "office_director",
            Self::OfficeDeputy => "office_deputy",
            Self::Hr => "hr",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        let key = raw.trim().to_ascii_lowercase();
        Self::ALL.into_iter().find(|level| level.as_str() == key)
    }

    pub fn tier(self) -> ApprovalTier {
        match self {
            Self::DepartmentManager | Self::DepartmentDeputy => ApprovalTier::Department,
            Self::OfficeDirector | Self::OfficeDeputy => ApprovalTier::Office,
            Self::Hr => ApprovalTier::Hr,
        }
    }
}

impl std::fmt::Display for ApprovalLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LevelPolicy {
    pub required: bool,
    /// Lower runs earlier.
    pub priority: i32,
    pub timeout_hours: u32,
}

impl LevelPolicy {
    pub fn new(required: bool, priority: i32, timeout_hours: u32) -> Self {
        Self { required, priority, timeout_hours }
    }
}

/// Approval policy for one (department, absence type) pair.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalWorkflow {
    pub id: WorkflowId,
    pub department_id: DepartmentId,
    pub absence_type_id: AbsenceTypeId,
    pub department_manager: LevelPolicy,
    pub department_deputy: LevelPolicy,
    pub office_director: LevelPolicy,
    pub office_deputy: LevelPolicy,
    pub hr: LevelPolicy,
    pub reminder_hours_before: u32,
    pub max_reminders: u32,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ApprovalWorkflow {
    /// A policy with every level disabled and the stock priorities and timeouts.
    pub fn new(department_id: DepartmentId, absence_type_id: AbsenceTypeId) -> Self {
        let now = Utc::now();
        Self {
            id: WorkflowId::generate(),
            department_id,
            absence_type_id,
            department_manager: LevelPolicy::new(false, 1, 24),
            department_deputy: LevelPolicy::new(false, 2, 24),
            office_director: LevelPolicy::new(false, 3, 48),
            office_deputy: LevelPolicy::new(false, 4, 48),
            hr: LevelPolicy::new(false, 5, 72),
            reminder_hours_before: 4,
            max_reminders: 3,
            active: true,
            created_at: now,
            updated_at: now,
        }
    }

    /// Fallback used when a request is filed and no policy exists yet:
    /// department manager then HR.
    pub fn permissive_default(department_id: DepartmentId, absence_type_id: AbsenceTypeId) -> Self {
        let mut policy = Self::new(department_id, absence_type_id);
        policy.department_manager.required = true;
        policy.hr.required = true;
        policy
    }

    pub fn with_levels(mut self, levels: &[ApprovalLevel]) -> Self {
        for level in levels {
            self.level_mut(*level).required = true;
        }
        self
    }

    pub fn level(&self, level: ApprovalLevel) -> &LevelPolicy {
        match level {
            ApprovalLevel::DepartmentManager => &self.department_manager,
            ApprovalLevel::DepartmentDeputy => &self.department_deputy,
            ApprovalLevel::OfficeDirector => &self.office_director,
            ApprovalLevel::OfficeDeputy => &self.office_deputy,
            ApprovalLevel::Hr => &self.hr,
        }
    }

    pub fn level_mut(&mut self, level: ApprovalLevel) -> &mut LevelPolicy {
        match level {
            ApprovalLevel::DepartmentManager => &mut self.department_manager,
            ApprovalLevel::DepartmentDeputy => &mut self.department_deputy,
            ApprovalLevel::OfficeDirector => &mut self.office_director,
            ApprovalLevel::OfficeDeputy => &mut self.office_deputy,
            ApprovalLevel::Hr => &mut self.hr,
        }
    }

    pub fn requires(&self, level: ApprovalLevel) -> bool {
        self.level(level).required
    }

    pub fn required_levels(&self) -> Vec<ApprovalLevel> {
        ApprovalLevel::ALL.into_iter().filter(|level| self.requires(*level)).collect()
    }

    pub fn timeout_for(&self, level: ApprovalLevel) -> Duration {
        Duration::hours(i64::from(self.level(level).timeout_hours))
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::{ApprovalLevel, ApprovalTier, ApprovalWorkflow};
    use crate::domain::absence::AbsenceTypeId;
    use crate::domain::org::DepartmentId;

    fn policy() -> ApprovalWorkflow {
        ApprovalWorkflow::new(DepartmentId("dept-it".to_owned()), AbsenceTypeId("annual".to_owned()))
    }

    #[test]
    fn level_tags_round_trip_through_parse() {
        for level in ApprovalLevel::ALL {
            assert_eq!(ApprovalLevel::parse(level.as_str()), Some(level));
        }
        assert_eq!(ApprovalLevel::parse("Department_Manager"), Some(ApprovalLevel::DepartmentManager));
        assert_eq!(ApprovalLevel::parse("ceo"), None);
    }

    #[test]
    fn levels_group_into_tiers() {
        assert_eq!(ApprovalLevel::DepartmentDeputy.tier(), ApprovalTier::Department);
        assert_eq!(ApprovalLevel::OfficeDirector.tier(), ApprovalTier::Office);
        assert_eq!(ApprovalLevel::Hr.tier(), ApprovalTier::Hr);
    }

    #[test]
    fn permissive_default_enables_manager_and_hr_only() {
        let policy = ApprovalWorkflow::permissive_default(
            DepartmentId("dept-it".to_owned()),
            AbsenceTypeId("annual".to_owned()),
        );

        assert_eq!(policy.required_levels(), vec![ApprovalLevel::DepartmentManager, ApprovalLevel::Hr]);
        assert_eq!(policy.hr.priority, 5);
    }

    #[test]
    fn timeouts_are_looked_up_per_level() {
        let mut policy = policy().with_levels(&[ApprovalLevel::OfficeDirector]);
        policy.office_director.timeout_hours = 6;

        assert!(policy.requires(ApprovalLevel::OfficeDirector));
        assert_eq!(policy.timeout_for(ApprovalLevel::OfficeDirector), Duration::hours(6));
        assert_eq!(policy.timeout_for(ApprovalLevel::Hr), Duration::hours(72));
    }
}
