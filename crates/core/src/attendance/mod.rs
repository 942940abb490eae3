use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::domain::org::UserId;

pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
}

impl GeoPoint {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self { latitude, longitude }
    }

    pub fn is_valid(&self) -> bool {
        (-90.0..=90.0).contains(&self.latitude) && (-180.0..=180.0).contains(&self.longitude)
    }
}

/// Great-circle distance in metres.
pub fn haversine_distance_m(a: GeoPoint, b: GeoPoint) -> f64 {
    let lat_a = a.latitude.to_radians();
    let lat_b = b.latitude.to_radians();
    let d_lat = (b.latitude - a.latitude).to_radians();
    let d_lon = (b.longitude - a.longitude).to_radians();

    let h = (d_lat / 2.0).sin().powi(2) + lat_a.cos() * lat_b.cos() * (d_lon / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_M * h.sqrt().atan2((1.0 - h).sqrt())
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorkLocationId(pub String);

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WorkLocation {
    pub id: WorkLocationId,
    pub name: String,
    pub center: GeoPoint,
    pub radius_m: f64,
    pub active: bool,
}

impl WorkLocation {
    pub fn distance_to(&self, point: GeoPoint) -> f64 {
        haversine_distance_m(self.center, point)
    }

    pub fn contains(&self, point: GeoPoint) -> bool {
        self.active && self.distance_to(point) <= self.radius_m
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CheckInDecision {
    Inside { location_id: WorkLocationId, distance_m: f64 },
    Outside { nearest: Option<(WorkLocationId, f64)> },
}

impl CheckInDecision {
    pub fn is_inside(&self) -> bool {
        matches!(self, Self::Inside { .. })
    }
}

/// Picks the nearest active location whose fence contains `point`.
pub fn evaluate_check_in(point: GeoPoint, locations: &[WorkLocation]) -> CheckInDecision {
    let mut measured: Vec<(&WorkLocation, f64)> = locations
        .iter()
        .filter(|location| location.active)
        .map(|location| (location, location.distance_to(point)))
        .collect();
    measured.sort_by(|left, right| {
        left.1.total_cmp(&right.1).then_with(|| left.0.id.0.cmp(&right.0.id.0))
    });

    if let Some((location, distance_m)) =
        measured.iter().find(|(location, distance)| *distance <= location.radius_m)
    {
        return CheckInDecision::Inside { location_id: location.id.clone(), distance_m: *distance_m };
    }

    CheckInDecision::Outside {
        nearest: measured.first().map(|(location, distance)| (location.id.clone(), *distance)),
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AttendanceRecordId(pub String);

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AttendanceRecord {
    pub id: AttendanceRecordId,
    pub user_id: UserId,
    pub location_id: WorkLocationId,
    pub check_in_at: DateTime<Utc>,
    pub check_in_point: GeoPoint,
    pub check_out_at: Option<DateTime<Utc>>,
    pub check_out_point: Option<GeoPoint>,
}

#[derive(Clone, Debug, PartialEq, Error)]
pub enum AttendanceError {
    #[error("coordinates ({latitude}, {longitude}) are out of range")]
    InvalidCoordinates { latitude: f64, longitude: f64 },
    #[error("check-in is outside every work location")]
    OutsideGeofence { nearest: Option<(WorkLocationId, f64)> },
    #[error("user `{0}` already has an open check-in")]
    AlreadyCheckedIn(String),
    #[error("attendance record `{0}` is already checked out")]
    AlreadyCheckedOut(String),
    #[error("check-out at {check_out_at} precedes check-in at {check_in_at}")]
    CheckOutBeforeCheckIn { check_in_at: DateTime<Utc>, check_out_at: DateTime<Utc> },
}

impl AttendanceRecord {
    /// Opens a record if `point` falls inside one of `locations`.
    pub fn check_in(
        user_id: UserId,
        point: GeoPoint,
        locations: &[WorkLocation],
        at: DateTime<Utc>,
    ) -> Result<Self, AttendanceError> {
        if !point.is_valid() {
            return Err(AttendanceError::InvalidCoordinates {
                latitude: point.latitude,
                longitude: point.longitude,
            });
        }

        match evaluate_check_in(point, locations) {
            CheckInDecision::Inside { location_id, .. } => Ok(Self {
                id: AttendanceRecordId(Uuid::new_v4().to_string()),
                user_id,
                location_id,
                check_in_at: at,
                check_in_point: point,
                check_out_at: None,
                check_out_point: None,
            }),
            CheckInDecision::Outside { nearest } => Err(AttendanceError::OutsideGeofence { nearest }),
        }
    }

    pub fn is_open(&self) -> bool {
        self.check_out_at.is_none()
    }

    pub fn check_out(&mut self, at: DateTime<Utc>, point: GeoPoint) -> Result<(), AttendanceError> {
        if !self.is_open() {
            return Err(AttendanceError::AlreadyCheckedOut(self.id.0.clone()));
        }
        if at < self.check_in_at {
            return Err(AttendanceError::CheckOutBeforeCheckIn {
                check_in_at: self.check_in_at,
                check_out_at: at,
            });
        }

        self.check_out_at = Some(at);
        self.check_out_point = Some(point);
        Ok(())
    }

    pub fn worked_duration(&self) -> Option<Duration> {
        self.check_out_at.map(|out| out - self.check_in_at)
    }
}
