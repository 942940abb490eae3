use sqlx::Row;

use hrflow_core::attendance::{AttendanceRecord, AttendanceRecordId, GeoPoint, WorkLocation, WorkLocationId};
use hrflow_core::domain::org::UserId;

use super::{decode_error, format_timestamp, parse_optional_timestamp, parse_timestamp, RepositoryError};
use crate::DbPool;

pub struct SqlAttendanceRepository {
    pool: DbPool,
}

impl SqlAttendanceRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub async fn save_location(&self, location: &WorkLocation) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO work_location (id, name, latitude, longitude, radius_m, active)
             VALUES (?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                 name = excluded.name,
                 latitude = excluded.latitude,
                 longitude = excluded.longitude,
                 radius_m = excluded.radius_m,
                 active = excluded.active",
        )
        .bind(&location.id.0)
        .bind(&location.name)
        .bind(location.center.latitude)
        .bind(location.center.longitude)
        .bind(location.radius_m)
        .bind(location.active)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn list_active_locations(&self) -> Result<Vec<WorkLocation>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT id, name, latitude, longitude, radius_m, active
             FROM work_location WHERE active = 1 ORDER BY id ASC",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_location).collect()
    }

    pub async fn find_open_for_user(
        &self,
        user_id: &UserId,
    ) -> Result<Option<AttendanceRecord>, RepositoryError> {
        let row = sqlx::query(
            "SELECT id, user_id, location_id, check_in_at, check_in_latitude, check_in_longitude,
                    check_out_at, check_out_latitude, check_out_longitude
             FROM attendance_record
             WHERE user_id = ? AND check_out_at IS NULL",
        )
        .bind(&user_id.0)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_record).transpose()
    }

    pub async fn list_for_user(&self, user_id: &UserId) -> Result<Vec<AttendanceRecord>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT id, user_id, location_id, check_in_at, check_in_latitude, check_in_longitude,
                    check_out_at, check_out_latitude, check_out_longitude
             FROM attendance_record
             WHERE user_id = ?
             ORDER BY check_in_at DESC",
        )
        .bind(&user_id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_record).collect()
    }

    /// Fails on the open-record unique index when the user is already checked in.
    pub async fn insert_record(&self, record: &AttendanceRecord) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO attendance_record (id, user_id, location_id, check_in_at,
                 check_in_latitude, check_in_longitude, check_out_at, check_out_latitude, check_out_longitude)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&record.id.0)
        .bind(&record.user_id.0)
        .bind(&record.location_id.0)
        .bind(format_timestamp(record.check_in_at))
        .bind(record.check_in_point.latitude)
        .bind(record.check_in_point.longitude)
        .bind(record.check_out_at.map(format_timestamp))
        .bind(record.check_out_point.map(|point| point.latitude))
        .bind(record.check_out_point.map(|point| point.longitude))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Returns `false` when the record was already closed.
    pub async fn close_record(&self, record: &AttendanceRecord) -> Result<bool, RepositoryError> {
        let (Some(check_out_at), Some(point)) = (record.check_out_at, record.check_out_point) else {
            return Err(RepositoryError::Decode(format!(
                "attendance record `{}` has no check-out to store",
                record.id.0
            )));
        };

        let result = sqlx::query(
            "UPDATE attendance_record
             SET check_out_at = ?, check_out_latitude = ?, check_out_longitude = ?
             WHERE id = ? AND check_out_at IS NULL",
        )
        .bind(format_timestamp(check_out_at))
        .bind(point.latitude)
        .bind(point.longitude)
        .bind(&record.id.0)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }
}

fn row_to_location(row: &sqlx::sqlite::SqliteRow) -> Result<WorkLocation, RepositoryError> {
    let id: String = row.try_get("id").map_err(decode_error)?;
    let name: String = row.try_get("name").map_err(decode_error)?;
    let latitude: f64 = row.try_get("latitude").map_err(decode_error)?;
    let longitude: f64 = row.try_get("longitude").map_err(decode_error)?;
    let radius_m: f64 = row.try_get("radius_m").map_err(decode_error)?;
    let active: bool = row.try_get("active").map_err(decode_error)?;

    Ok(WorkLocation {
        id: WorkLocationId(id),
        name,
        center: GeoPoint::new(latitude, longitude),
        radius_m,
        active,
    })
}

fn row_to_record(row: &sqlx::sqlite::SqliteRow) -> Result<AttendanceRecord, RepositoryError> {
    let id: String = row.try_get("id").map_err(decode_error)?;
    let user_id: String = row.try_get("user_id").map_err(decode_error)?;
    let location_id: String = row.try_get("location_id").map_err(decode_error)?;
    let check_in_at: String = row.try_get("check_in_at").map_err(decode_error)?;
    let check_in_latitude: f64 = row.try_get("check_in_latitude").map_err(decode_error)?;
    let check_in_longitude: f64 = row.try_get("check_in_longitude").map_err(decode_error)?;
    let check_out_at: Option<String> = row.try_get("check_out_at").map_err(decode_error)?;
    let check_out_latitude: Option<f64> = row.try_get("check_out_latitude").map_err(decode_error)?;
    let check_out_longitude: Option<f64> =
        row.try_get("check_out_longitude").map_err(decode_error)?;

    let check_out_point = match (check_out_latitude, check_out_longitude) {
        (Some(latitude), Some(longitude)) => Some(GeoPoint::new(latitude, longitude)),
        (None, None) => None,
        _ => {
            return Err(RepositoryError::Decode(format!(
                "attendance record `{id}` has a partial check-out position"
            )))
        }
    };

    Ok(AttendanceRecord {
        id: AttendanceRecordId(id),
        user_id: UserId(user_id),
        location_id: WorkLocationId(location_id),
        check_in_at: parse_timestamp(&check_in_at)?,
        check_in_point: GeoPoint::new(check_in_latitude, check_in_longitude),
        check_out_at: parse_optional_timestamp(check_out_at)?,
        check_out_point,
    })
}
