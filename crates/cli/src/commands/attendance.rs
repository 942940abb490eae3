use tracing::info;

use hrflow_core::attendance::{AttendanceError, AttendanceRecord, GeoPoint};
use hrflow_core::domain::now_micros;
use hrflow_core::domain::org::UserId;
use hrflow_db::SqlAttendanceRepository;

use crate::commands::{repository_failure, to_data, with_database, CommandResult, Failure};

pub fn check_in(user: &str, latitude: f64, longitude: f64) -> CommandResult {
    let user_id = UserId(user.to_owned());
    let point = GeoPoint::new(latitude, longitude);

    let result = with_database("check-in", |pool| async move {
        let repository = SqlAttendanceRepository::new(pool);
        if repository.find_open_for_user(&user_id).await.map_err(repository_failure)?.is_some() {
            return Err(attendance_failure(AttendanceError::AlreadyCheckedIn(user_id.0)));
        }

        let locations = repository.list_active_locations().await.map_err(repository_failure)?;
        let record = AttendanceRecord::check_in(user_id, point, &locations, now_micros())
            .map_err(attendance_failure)?;
        repository.insert_record(&record).await.map_err(repository_failure)?;

        info!(
            event_name = "attendance.check_in",
            user_id = %record.user_id.0,
            location_id = %record.location_id.0,
            "check-in recorded"
        );
        Ok(record)
    });

    match result {
        Ok(record) => CommandResult::success_with_data(
            "check-in",
            format!("checked in at {}", record.location_id.0),
            to_data(&record),
        ),
        Err(failure) => failure,
    }
}

pub fn check_out(user: &str, latitude: f64, longitude: f64) -> CommandResult {
    let user_id = UserId(user.to_owned());
    let point = GeoPoint::new(latitude, longitude);

    let result = with_database("check-out", |pool| async move {
        let repository = SqlAttendanceRepository::new(pool);
        let Some(mut record) =
            repository.find_open_for_user(&user_id).await.map_err(repository_failure)?
        else {
            return Err(("not_checked_in", format!("user `{}` has no open check-in", user_id.0), 6u8));
        };

        record.check_out(now_micros(), point).map_err(attendance_failure)?;
        if !repository.close_record(&record).await.map_err(repository_failure)? {
            return Err(attendance_failure(AttendanceError::AlreadyCheckedOut(record.id.0)));
        }
        Ok(record)
    });

    match result {
        Ok(record) => {
            let minutes = record.worked_duration().map(|worked| worked.num_minutes()).unwrap_or_default();
            CommandResult::success_with_data(
                "check-out",
                format!("checked out after {minutes} minutes"),
                to_data(&record),
            )
        }
        Err(failure) => failure,
    }
}

fn attendance_failure(error: AttendanceError) -> Failure {
    let message = match &error {
        AttendanceError::OutsideGeofence { nearest: Some((location_id, distance)) } => format!(
            "{error}; nearest is `{}` at {:.0} m",
            location_id.0, distance
        ),
        _ => error.to_string(),
    };
    ("attendance_rule", message, 6)
}
