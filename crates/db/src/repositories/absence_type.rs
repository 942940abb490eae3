use sqlx::Row;

use hrflow_core::domain::absence::{AbsenceType, AbsenceTypeId};

use super::{decode_error, RepositoryError};
use crate::DbPool;

pub struct SqlAbsenceTypeRepository {
    pool: DbPool,
}

impl SqlAbsenceTypeRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub async fn find_by_id(&self, id: &AbsenceTypeId) -> Result<Option<AbsenceType>, RepositoryError> {
        let row = sqlx::query(
            "SELECT id, name, code, requires_approval, max_days_per_year, active
             FROM absence_type WHERE id = ?",
        )
        .bind(&id.0)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_absence_type).transpose()
    }

    pub async fn find_by_code(&self, code: &str) -> Result<Option<AbsenceType>, RepositoryError> {
        let row = sqlx::query(
            "SELECT id, name, code, requires_approval, max_days_per_year, active
             FROM absence_type WHERE code = ?",
        )
        .bind(code)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_absence_type).transpose()
    }

    pub async fn list_active(&self) -> Result<Vec<AbsenceType>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT id, name, code, requires_approval, max_days_per_year, active
             FROM absence_type WHERE active = 1 ORDER BY code ASC",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_absence_type).collect()
    }

    pub async fn save(&self, absence_type: &AbsenceType) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO absence_type (id, name, code, requires_approval, max_days_per_year, active)
             VALUES (?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                 name = excluded.name,
                 code = excluded.code,
                 requires_approval = excluded.requires_approval,
                 max_days_per_year = excluded.max_days_per_year,
                 active = excluded.active",
        )
        .bind(&absence_type.id.0)
        .bind(&absence_type.name)
        .bind(&absence_type.code)
        .bind(absence_type.requires_approval)
        .bind(absence_type.max_days_per_year.map(i64::from))
        .bind(absence_type.active)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

fn row_to_absence_type(row: &sqlx::sqlite::SqliteRow) -> Result<AbsenceType, RepositoryError> {
    let id: String = row.try_get("id").map_err(decode_error)?;
    let name: String = row.try_get("name").map_err(decode_error)?;
    let code: String = row.try_get("code").map_err(decode_error)?;
    let requires_approval: bool = row.try_get("requires_approval").map_err(decode_error)?;
    let max_days_per_year: Option<i64> = row.try_get("max_days_per_year").map_err(decode_error)?;
    let active: bool = row.try_get("active").map_err(decode_error)?;

    let max_days_per_year = max_days_per_year
        .map(|days| {
            u32::try_from(days).map_err(|_| {
                RepositoryError::Decode(format!("absence type `{id}` has negative day cap {days}"))
            })
        })
        .transpose()?;

    Ok(AbsenceType {
        id: AbsenceTypeId(id),
        name,
        code,
        requires_approval,
        max_days_per_year,
        active,
    })
}
