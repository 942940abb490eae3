use async_trait::async_trait;
use sqlx::Row;

use hrflow_core::domain::absence::AbsenceTypeId;
use hrflow_core::domain::org::DepartmentId;
use hrflow_core::domain::policy::{ApprovalLevel, ApprovalWorkflow, LevelPolicy, WorkflowId};
use hrflow_core::workflow::ports::{PolicyStore, StoreError};

use super::{decode_error, format_timestamp, parse_timestamp, RepositoryError};
use crate::DbPool;

const POLICY_COLUMNS: &str = "id, department_id, absence_type_id,
    department_manager_required, department_manager_priority, department_manager_timeout_hours,
    department_deputy_required, department_deputy_priority, department_deputy_timeout_hours,
    office_director_required, office_director_priority, office_director_timeout_hours,
    office_deputy_required, office_deputy_priority, office_deputy_timeout_hours,
    hr_required, hr_priority, hr_timeout_hours,
    reminder_hours_before, max_reminders, active, created_at, updated_at";

pub struct SqlPolicyRepository {
    pool: DbPool,
}

impl SqlPolicyRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub async fn find_for(
        &self,
        department_id: &DepartmentId,
        absence_type_id: &AbsenceTypeId,
    ) -> Result<Option<ApprovalWorkflow>, RepositoryError> {
        let row = sqlx::query(&format!(
            "SELECT {POLICY_COLUMNS} FROM approval_workflow
             WHERE department_id = ? AND absence_type_id = ?"
        ))
        .bind(&department_id.0)
        .bind(&absence_type_id.0)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_policy).transpose()
    }

    pub async fn find_by_id(&self, id: &WorkflowId) -> Result<Option<ApprovalWorkflow>, RepositoryError> {
        let row = sqlx::query(&format!("SELECT {POLICY_COLUMNS} FROM approval_workflow WHERE id = ?"))
            .bind(&id.0)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(row_to_policy).transpose()
    }

    pub async fn list(&self) -> Result<Vec<ApprovalWorkflow>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {POLICY_COLUMNS} FROM approval_workflow ORDER BY department_id, absence_type_id"
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_policy).collect()
    }

    pub async fn save(&self, policy: &ApprovalWorkflow) -> Result<(), RepositoryError> {
        let mut query = sqlx::query(
            "INSERT INTO approval_workflow (id, department_id, absence_type_id,
                 department_manager_required, department_manager_priority, department_manager_timeout_hours,
                 department_deputy_required, department_deputy_priority, department_deputy_timeout_hours,
                 office_director_required, office_director_priority, office_director_timeout_hours,
                 office_deputy_required, office_deputy_priority, office_deputy_timeout_hours,
                 hr_required, hr_priority, hr_timeout_hours,
                 reminder_hours_before, max_reminders, active, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                 department_manager_required = excluded.department_manager_required,
                 department_manager_priority = excluded.department_manager_priority,
                 department_manager_timeout_hours = excluded.department_manager_timeout_hours,
                 department_deputy_required = excluded.department_deputy_required,
                 department_deputy_priority = excluded.department_deputy_priority,
                 department_deputy_timeout_hours = excluded.department_deputy_timeout_hours,
                 office_director_required = excluded.office_director_required,
                 office_director_priority = excluded.office_director_priority,
                 office_director_timeout_hours = excluded.office_director_timeout_hours,
                 office_deputy_required = excluded.office_deputy_required,
                 office_deputy_priority = excluded.office_deputy_priority,
                 office_deputy_timeout_hours = excluded.office_deputy_timeout_hours,
                 hr_required = excluded.hr_required,
                 hr_priority = excluded.hr_priority,
                 hr_timeout_hours = excluded.hr_timeout_hours,
                 reminder_hours_before = excluded.reminder_hours_before,
                 max_reminders = excluded.max_reminders,
                 active = excluded.active,
                 updated_at = excluded.updated_at",
        )
        .bind(&policy.id.0)
        .bind(&policy.department_id.0)
        .bind(&policy.absence_type_id.0);

        for level in ApprovalLevel::ALL {
            let level_policy = policy.level(level);
            query = query
                .bind(level_policy.required)
                .bind(level_policy.priority)
                .bind(i64::from(level_policy.timeout_hours));
        }

        query
            .bind(i64::from(policy.reminder_hours_before))
            .bind(i64::from(policy.max_reminders))
            .bind(policy.active)
            .bind(format_timestamp(policy.created_at))
            .bind(format_timestamp(policy.updated_at))
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}

#[async_trait]
impl PolicyStore for SqlPolicyRepository {
    async fn find_policy(
        &self,
        department_id: &DepartmentId,
        absence_type_id: &AbsenceTypeId,
    ) -> Result<Option<ApprovalWorkflow>, StoreError> {
        Ok(self.find_for(department_id, absence_type_id).await?)
    }

    async fn find_policy_by_id(&self, id: &WorkflowId) -> Result<Option<ApprovalWorkflow>, StoreError> {
        Ok(self.find_by_id(id).await?)
    }

    async fn save_policy(&self, policy: ApprovalWorkflow) -> Result<(), StoreError> {
        Ok(self.save(&policy).await?)
    }
}

fn unsigned(row: &sqlx::sqlite::SqliteRow, column: &str) -> Result<u32, RepositoryError> {
    let value: i64 = row.try_get(column).map_err(decode_error)?;
    u32::try_from(value)
        .map_err(|_| RepositoryError::Decode(format!("column `{column}` holds invalid value {value}")))
}

fn level_from_row(
    row: &sqlx::sqlite::SqliteRow,
    level: ApprovalLevel,
) -> Result<LevelPolicy, RepositoryError> {
    let prefix = level.as_str();
    let required: bool = row.try_get(format!("{prefix}_required").as_str()).map_err(decode_error)?;
    let priority: i32 = row.try_get(format!("{prefix}_priority").as_str()).map_err(decode_error)?;
    let timeout_hours = unsigned(row, &format!("{prefix}_timeout_hours"))?;

    Ok(LevelPolicy::new(required, priority, timeout_hours))
}

fn row_to_policy(row: &sqlx::sqlite::SqliteRow) -> Result<ApprovalWorkflow, RepositoryError> {
    let id: String = row.try_get("id").map_err(decode_error)?;
    let department_id: String = row.try_get("department_id").map_err(decode_error)?;
    let absence_type_id: String = row.try_get("absence_type_id").map_err(decode_error)?;
    let active: bool = row.try_get("active").map_err(decode_error)?;
    let created_at: String = row.try_get("created_at").map_err(decode_error)?;
    let updated_at: String = row.try_get("updated_at").map_err(decode_error)?;

    Ok(ApprovalWorkflow {
        id: WorkflowId(id),
        department_id: DepartmentId(department_id),
        absence_type_id: AbsenceTypeId(absence_type_id),
        department_manager: level_from_row(row, ApprovalLevel::DepartmentManager)?,
        department_deputy: level_from_row(row, ApprovalLevel::DepartmentDeputy)?,
        office_director: level_from_row(row, ApprovalLevel::OfficeDirector)?,
        office_deputy: level_from_row(row, ApprovalLevel::OfficeDeputy)?,
        hr: level_from_row(row, ApprovalLevel::Hr)?,
        reminder_hours_before: unsigned(row, "reminder_hours_before")?,
        max_reminders: unsigned(row, "max_reminders")?,
        active,
        created_at: parse_timestamp(&created_at)?,
        updated_at: parse_timestamp(&updated_at)?,
    })
}
