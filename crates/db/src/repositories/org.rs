use async_trait::async_trait;
use chrono::Utc;
use sqlx::Row;

use hrflow_core::domain::org::{Department, DepartmentId, Office, OfficeId, User, UserId, UserRole};
use hrflow_core::workflow::ports::{OrganizationDirectory, StoreError};

use super::{decode_error, format_timestamp, RepositoryError};
use crate::DbPool;

pub struct SqlOrganizationDirectory {
    pool: DbPool,
}

impl SqlOrganizationDirectory {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub async fn user(&self, id: &UserId) -> Result<Option<User>, RepositoryError> {
        let row = sqlx::query(
            "SELECT id, full_name, email, department_id, role, active FROM app_user WHERE id = ?",
        )
        .bind(&id.0)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_user).transpose()
    }

    pub async fn department(&self, id: &DepartmentId) -> Result<Option<Department>, RepositoryError> {
        let row = sqlx::query(
            "SELECT id, name, office_id, manager_id, deputy_manager_id FROM department WHERE id = ?",
        )
        .bind(&id.0)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_department).transpose()
    }

    pub async fn office(&self, id: &OfficeId) -> Result<Option<Office>, RepositoryError> {
        let row = sqlx::query(
            "SELECT id, name, director_id, deputy_director_id FROM office WHERE id = ?",
        )
        .bind(&id.0)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_office).transpose()
    }

    pub async fn hr_users(&self) -> Result<Vec<User>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT id, full_name, email, department_id, role, active
             FROM app_user
             WHERE role = 'hr' AND active = 1
             ORDER BY id ASC",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_user).collect()
    }

    /// Upserts a whole organization slice in one transaction; manager and director
    /// references are checked at commit, so insertion order does not matter.
    pub async fn save_organization(
        &self,
        offices: &[Office],
        departments: &[Department],
        users: &[User],
    ) -> Result<(), RepositoryError> {
        let now = format_timestamp(Utc::now());
        let mut tx = self.pool.begin().await?;

        for office in offices {
            sqlx::query(
                "INSERT INTO office (id, name, director_id, deputy_director_id, created_at)
                 VALUES (?, ?, ?, ?, ?)
                 ON CONFLICT(id) DO UPDATE SET
                     name = excluded.name,
                     director_id = excluded.director_id,
                     deputy_director_id = excluded.deputy_director_id",
            )
            .bind(&office.id.0)
            .bind(&office.name)
            .bind(office.director_id.as_ref().map(|id| id.0.as_str()))
            .bind(office.deputy_director_id.as_ref().map(|id| id.0.as_str()))
            .bind(&now)
            .execute(&mut *tx)
            .await?;
        }

        for department in departments {
            sqlx::query(
                "INSERT INTO department (id, name, office_id, manager_id, deputy_manager_id, created_at)
                 VALUES (?, ?, ?, ?, ?, ?)
                 ON CONFLICT(id) DO UPDATE SET
                     name = excluded.name,
                     office_id = excluded.office_id,
                     manager_id = excluded.manager_id,
                     deputy_manager_id = excluded.deputy_manager_id",
            )
            .bind(&department.id.0)
            .bind(&department.name)
            .bind(department.office_id.as_ref().map(|id| id.0.as_str()))
            .bind(department.manager_id.as_ref().map(|id| id.0.as_str()))
            .bind(department.deputy_manager_id.as_ref().map(|id| id.0.as_str()))
            .bind(&now)
            .execute(&mut *tx)
            .await?;
        }

        for user in users {
            sqlx::query(
                "INSERT INTO app_user (id, full_name, email, department_id, role, active, created_at)
                 VALUES (?, ?, ?, ?, ?, ?, ?)
                 ON CONFLICT(id) DO UPDATE SET
                     full_name = excluded.full_name,
                     email = excluded.email,
                     department_id = excluded.department_id,
                     role = excluded.role,
                     active = excluded.active",
            )
            .bind(&user.id.0)
            .bind(&user.full_name)
            .bind(&user.email)
            .bind(user.department_id.as_ref().map(|id| id.0.as_str()))
            .bind(user.role.as_str())
            .bind(user.active)
            .bind(&now)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }
}

#[async_trait]
impl OrganizationDirectory for SqlOrganizationDirectory {
    async fn find_user(&self, id: &UserId) -> Result<Option<User>, StoreError> {
        Ok(self.user(id).await?)
    }

    async fn find_department(&self, id: &DepartmentId) -> Result<Option<Department>, StoreError> {
        Ok(self.department(id).await?)
    }

    async fn find_office(&self, id: &OfficeId) -> Result<Option<Office>, StoreError> {
        Ok(self.office(id).await?)
    }

    async fn active_hr_users(&self) -> Result<Vec<User>, StoreError> {
        Ok(self.hr_users().await?)
    }
}

fn row_to_user(row: &sqlx::sqlite::SqliteRow) -> Result<User, RepositoryError> {
    let id: String = row.try_get("id").map_err(decode_error)?;
    let full_name: String = row.try_get("full_name").map_err(decode_error)?;
    let email: String = row.try_get("email").map_err(decode_error)?;
    let department_id: Option<String> = row.try_get("department_id").map_err(decode_error)?;
    let role: String = row.try_get("role").map_err(decode_error)?;
    let active: bool = row.try_get("active").map_err(decode_error)?;

    let role = UserRole::parse(&role)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown user role `{role}`")))?;

    Ok(User {
        id: UserId(id),
        full_name,
        email,
        department_id: department_id.map(DepartmentId),
        role,
        active,
    })
}

fn row_to_department(row: &sqlx::sqlite::SqliteRow) -> Result<Department, RepositoryError> {
    let id: String = row.try_get("id").map_err(decode_error)?;
    let name: String = row.try_get("name").map_err(decode_error)?;
    let office_id: Option<String> = row.try_get("office_id").map_err(decode_error)?;
    let manager_id: Option<String> = row.try_get("manager_id").map_err(decode_error)?;
    let deputy_manager_id: Option<String> =
        row.try_get("deputy_manager_id").map_err(decode_error)?;

    Ok(Department {
        id: DepartmentId(id),
        name,
        office_id: office_id.map(OfficeId),
        manager_id: manager_id.map(UserId),
        deputy_manager_id: deputy_manager_id.map(UserId),
    })
}

fn row_to_office(row: &sqlx::sqlite::SqliteRow) -> Result<Office, RepositoryError> {
    let id: String = row.try_get("id").map_err(decode_error)?;
    let name: String = row.try_get("name").map_err(decode_error)?;
    let director_id: Option<String> = row.try_get("director_id").map_err(decode_error)?;
    let deputy_director_id: Option<String> =
        row.try_get("deputy_director_id").map_err(decode_error)?;

    Ok(Office {
        id: OfficeId(id),
        name,
        director_id: director_id.map(UserId),
        deputy_director_id: deputy_director_id.map(UserId),
    })
}
