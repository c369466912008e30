//! Appointment slots and appointments.

use chrono::{DateTime, Utc};
use may_postgres::Row;
use sea_query::Iden;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Appointment status. Closed set used for staff updates; `Other` preserves
/// free-form values already stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum AppointmentStatus {
    Scheduled,
    Confirmed,
    InProgress,
    Completed,
    Cancelled,
    NoShow,
    Rejected,
    Other(String),
}

impl AppointmentStatus {
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_lowercase().as_str() {
            "scheduled" => AppointmentStatus::Scheduled,
            "confirmed" => AppointmentStatus::Confirmed,
            "in_progress" => AppointmentStatus::InProgress,
            "completed" => AppointmentStatus::Completed,
            "cancelled" => AppointmentStatus::Cancelled,
            "no_show" => AppointmentStatus::NoShow,
            "rejected" => AppointmentStatus::Rejected,
            other => AppointmentStatus::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            AppointmentStatus::Scheduled => "scheduled",
            AppointmentStatus::Confirmed => "confirmed",
            AppointmentStatus::InProgress => "in_progress",
            AppointmentStatus::Completed => "completed",
            AppointmentStatus::Cancelled => "cancelled",
            AppointmentStatus::NoShow => "no_show",
            AppointmentStatus::Rejected => "rejected",
            AppointmentStatus::Other(s) => s,
        }
    }

    /// Whether this appointment occupies a slot seat.
    ///
    /// Cancelled and rejected appointments release their capacity; everything
    /// else (including unknown stored values) counts as booked.
    pub fn counts_against_capacity(&self) -> bool {
        !matches!(
            self,
            AppointmentStatus::Cancelled | AppointmentStatus::Rejected
        )
    }

    /// Whether this is one of the closed, staff-settable statuses
    pub fn is_known(&self) -> bool {
        !matches!(self, AppointmentStatus::Other(_))
    }
}

impl From<String> for AppointmentStatus {
    fn from(s: String) -> Self {
        AppointmentStatus::parse(&s)
    }
}

impl From<AppointmentStatus> for String {
    fn from(s: AppointmentStatus) -> Self {
        s.as_str().to_string()
    }
}

impl fmt::Display for AppointmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Column identifiers for `appointment_slots`
#[derive(Iden)]
pub enum AppointmentSlots {
    Table,
    SlotId,
    StartAt,
    EndAt,
    Capacity,
    IsActive,
    Notes,
    UpdatedAt,
}

/// A bookable time window with finite capacity.
///
/// Remaining capacity is always derived from the appointment count at read
/// time; it is never stored on the row.
#[derive(Debug, Clone, Serialize)]
pub struct AppointmentSlot {
    pub slot_id: Uuid,
    pub start_at: DateTime<Utc>,
    pub end_at: Option<DateTime<Utc>>,
    pub capacity: i32,
    pub is_active: bool,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl AppointmentSlot {
    pub const COLUMNS: &'static str =
        "slot_id, start_at, end_at, capacity, is_active, notes, created_at, updated_at";

    pub fn from_row(row: &Row) -> Self {
        Self {
            slot_id: row.get("slot_id"),
            start_at: row.get("start_at"),
            end_at: row.get("end_at"),
            capacity: row.get("capacity"),
            is_active: row.get("is_active"),
            notes: row.get("notes"),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        }
    }
}

/// Column identifiers for `appointments`
#[derive(Iden)]
pub enum Appointments {
    Table,
    AppointmentId,
    CustomerId,
    VehicleId,
    ServiceId,
    SlotId,
    ScheduledStart,
    ScheduledEnd,
    RequestedWork,
    Status,
    AssignedMechanicId,
    CreatedBy,
    Notes,
    AdminMessage,
    ProgressPercent,
    UpdatedAt,
}

#[derive(Debug, Clone, Serialize)]
pub struct Appointment {
    pub appointment_id: Uuid,
    pub customer_id: Uuid,
    pub vehicle_id: Uuid,
    pub service_id: Uuid,
    pub slot_id: Option<Uuid>,
    pub scheduled_start: DateTime<Utc>,
    pub scheduled_end: Option<DateTime<Utc>>,
    pub requested_work: Option<String>,
    pub status: AppointmentStatus,
    pub assigned_mechanic_id: Option<Uuid>,
    pub created_by: Option<Uuid>,
    pub notes: Option<String>,
    pub admin_message: Option<String>,
    pub progress_percent: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Appointment {
    pub const COLUMNS: &'static str = "appointment_id, customer_id, vehicle_id, service_id, slot_id, \
         scheduled_start, scheduled_end, requested_work, status, assigned_mechanic_id, \
         created_by, notes, admin_message, progress_percent, created_at, updated_at";

    pub fn from_row(row: &Row) -> Self {
        let status: String = row.get("status");
        Self {
            appointment_id: row.get("appointment_id"),
            customer_id: row.get("customer_id"),
            vehicle_id: row.get("vehicle_id"),
            service_id: row.get("service_id"),
            slot_id: row.get("slot_id"),
            scheduled_start: row.get("scheduled_start"),
            scheduled_end: row.get("scheduled_end"),
            requested_work: row.get("requested_work"),
            status: AppointmentStatus::parse(&status),
            assigned_mechanic_id: row.get("assigned_mechanic_id"),
            created_by: row.get("created_by"),
            notes: row.get("notes"),
            admin_message: row.get("admin_message"),
            progress_percent: row.get("progress_percent"),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capacity_accounting_statuses() {
        assert!(!AppointmentStatus::Cancelled.counts_against_capacity());
        assert!(!AppointmentStatus::Rejected.counts_against_capacity());
        assert!(AppointmentStatus::Scheduled.counts_against_capacity());
        assert!(AppointmentStatus::Completed.counts_against_capacity());
        // unknown stored statuses keep their seat
        assert!(AppointmentStatus::parse("on_hold").counts_against_capacity());
    }

    #[test]
    fn test_parse_normalizes() {
        assert_eq!(AppointmentStatus::parse(" No_Show "), AppointmentStatus::NoShow);
        assert!(AppointmentStatus::parse("scheduled").is_known());
        assert!(!AppointmentStatus::parse("on_hold").is_known());
    }
}
