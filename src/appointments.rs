//! Appointment slots and bookings.
//!
//! Slot capacity is never stored as a counter; it is derived on demand by
//! counting the slot's appointments whose status still occupies a seat.
//! Booking locks the slot row before re-deriving the count, so two customers
//! racing for the last seat serialize and the loser gets a conflict.

use crate::entities::{
    Appointment, AppointmentSlot, AppointmentSlots, AppointmentStatus, Appointments,
};
use crate::error::WorkshopError;
use crate::executor::{ClientExecutor, Executor};
use crate::patch::{clean_text, double_option};
use crate::transaction::with_transaction;
use chrono::{DateTime, Utc};
use may_postgres::types::ToSql;
use sea_query::{Expr, ExprTrait, PostgresQueryBuilder, Query};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Statuses shown by default in the staff open-appointments view
const DEFAULT_OPEN_STATUSES: [&str; 4] = ["pending", "scheduled", "accepted", "in_progress"];

/// Count the appointments currently occupying a seat in the slot.
///
/// A NULL status counts as booked; only `cancelled` and `rejected` release
/// capacity.
pub fn used_capacity(executor: &impl Executor, slot_id: Uuid) -> Result<i64, WorkshopError> {
    let row = executor.query_one(
        "SELECT count(*) FROM appointments \
         WHERE slot_id = $1 AND coalesce(status, '') NOT IN ('cancelled', 'rejected')",
        &[&slot_id],
    )?;
    Ok(row.get(0))
}

/// Seats left in a slot; never negative even with overbooked data
pub fn remaining_capacity(capacity: i32, used: i64) -> i64 {
    std::cmp::Ord::max(i64::from(capacity) - used, 0)
}

// ---------------------------------------------------------------------------
// Slots
// ---------------------------------------------------------------------------

fn default_is_active() -> bool {
    true
}

/// Input for creating a slot
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NewSlot {
    pub start_at: DateTime<Utc>,
    #[serde(default)]
    pub end_at: Option<DateTime<Utc>>,
    pub capacity: i32,
    #[serde(default = "default_is_active")]
    pub is_active: bool,
    #[serde(default)]
    pub notes: Option<String>,
}

/// Mutable slot fields
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SlotPatch {
    #[serde(default)]
    pub start_at: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "double_option")]
    pub end_at: Option<Option<DateTime<Utc>>>,
    #[serde(default)]
    pub capacity: Option<i32>,
    #[serde(default)]
    pub is_active: Option<bool>,
    #[serde(default, deserialize_with = "double_option")]
    pub notes: Option<Option<String>>,
}

impl SlotPatch {
    pub fn is_empty(&self) -> bool {
        self.start_at.is_none()
            && self.end_at.is_none()
            && self.capacity.is_none()
            && self.is_active.is_none()
            && self.notes.is_none()
    }
}

fn validate_capacity(capacity: i32) -> Result<(), WorkshopError> {
    if capacity < 1 {
        return Err(WorkshopError::InvalidArgument(
            "capacity must be >= 1".to_string(),
        ));
    }
    Ok(())
}

/// Create a slot
pub fn create_slot(db: &ClientExecutor, input: NewSlot) -> Result<AppointmentSlot, WorkshopError> {
    validate_capacity(input.capacity)?;
    let notes = clean_text(input.notes);

    let sql = format!(
        "INSERT INTO appointment_slots \
           (start_at, end_at, capacity, is_active, notes, created_at, updated_at) \
         VALUES ($1, $2, $3, $4, $5, now(), now()) \
         RETURNING {}",
        AppointmentSlot::COLUMNS
    );
    let row = db.query_one(
        &sql,
        &[
            &input.start_at,
            &input.end_at,
            &input.capacity,
            &input.is_active,
            &notes,
        ],
    )?;
    Ok(AppointmentSlot::from_row(&row))
}

fn slot_update_sql(slot_id: Uuid, patch: &SlotPatch) -> String {
    let mut update = Query::update();
    update.table(AppointmentSlots::Table);
    if let Some(start_at) = patch.start_at {
        update.value(AppointmentSlots::StartAt, start_at);
    }
    if let Some(end_at) = &patch.end_at {
        update.value(AppointmentSlots::EndAt, *end_at);
    }
    if let Some(capacity) = patch.capacity {
        update.value(AppointmentSlots::Capacity, capacity);
    }
    if let Some(is_active) = patch.is_active {
        update.value(AppointmentSlots::IsActive, is_active);
    }
    if let Some(notes) = &patch.notes {
        update.value(AppointmentSlots::Notes, notes.clone());
    }
    update.value(AppointmentSlots::UpdatedAt, Expr::cust("now()"));
    update.and_where(Expr::col(AppointmentSlots::SlotId).eq(slot_id));
    update.to_string(PostgresQueryBuilder)
}

fn fetch_slot(executor: &impl Executor, slot_id: Uuid) -> Result<AppointmentSlot, WorkshopError> {
    let sql = format!(
        "SELECT {} FROM appointment_slots WHERE slot_id = $1",
        AppointmentSlot::COLUMNS
    );
    match executor.query_opt(&sql, &[&slot_id])? {
        Some(row) => Ok(AppointmentSlot::from_row(&row)),
        None => Err(WorkshopError::NotFound("slot does not exist".to_string())),
    }
}

/// Patch a slot. Shrinking the capacity below the booked count is allowed;
/// existing appointments keep their seats and the slot just stops accepting
/// new ones.
pub fn update_slot(
    db: &ClientExecutor,
    slot_id: Uuid,
    patch: SlotPatch,
) -> Result<AppointmentSlot, WorkshopError> {
    if let Some(capacity) = patch.capacity {
        validate_capacity(capacity)?;
    }
    let patch = SlotPatch {
        notes: patch.notes.map(clean_text),
        ..patch
    };

    with_transaction(db, |tx| {
        let existing = fetch_slot(tx, slot_id)?;
        if patch.is_empty() {
            return Ok(existing);
        }
        tx.execute(&slot_update_sql(slot_id, &patch), &[])?;
        fetch_slot(tx, slot_id)
    })
}

/// Delete a slot. Appointments keep a nulled slot reference via the schema's
/// ON DELETE SET NULL.
pub fn delete_slot(db: &ClientExecutor, slot_id: Uuid) -> Result<(), WorkshopError> {
    let deleted = db.execute(
        "DELETE FROM appointment_slots WHERE slot_id = $1",
        &[&slot_id],
    )?;
    if deleted == 0 {
        return Err(WorkshopError::NotFound("slot does not exist".to_string()));
    }
    Ok(())
}

/// Staff listing of slots, optionally filtered by active flag, earliest first
pub fn list_slots(
    db: &ClientExecutor,
    is_active: Option<bool>,
) -> Result<Vec<AppointmentSlot>, WorkshopError> {
    let rows = match is_active {
        Some(active) => db.query_all(
            &format!(
                "SELECT {} FROM appointment_slots WHERE is_active = $1 ORDER BY start_at",
                AppointmentSlot::COLUMNS
            ),
            &[&active],
        )?,
        None => db.query_all(
            &format!(
                "SELECT {} FROM appointment_slots ORDER BY start_at",
                AppointmentSlot::COLUMNS
            ),
            &[],
        )?,
    };
    Ok(rows.iter().map(AppointmentSlot::from_row).collect())
}

/// A slot as shown to customers: full slots are filtered out entirely
#[derive(Debug, Clone, Serialize)]
pub struct AvailableSlot {
    pub slot_id: Uuid,
    pub start_at: DateTime<Utc>,
    pub end_at: Option<DateTime<Utc>>,
    pub remaining_capacity: i64,
}

/// Upcoming active slots with at least one free seat, earliest first
pub fn list_available_slots(db: &ClientExecutor) -> Result<Vec<AvailableSlot>, WorkshopError> {
    let sql = format!(
        "SELECT {} FROM appointment_slots \
         WHERE is_active AND start_at >= now() ORDER BY start_at",
        AppointmentSlot::COLUMNS
    );
    let rows = db.query_all(&sql, &[])?;

    let mut result = Vec::new();
    for row in &rows {
        let slot = AppointmentSlot::from_row(row);
        let used = used_capacity(db, slot.slot_id)?;
        let remaining = remaining_capacity(slot.capacity, used);
        if remaining <= 0 {
            continue;
        }
        result.push(AvailableSlot {
            slot_id: slot.slot_id,
            start_at: slot.start_at,
            end_at: slot.end_at,
            remaining_capacity: remaining,
        });
    }
    Ok(result)
}

// ---------------------------------------------------------------------------
// Booking
// ---------------------------------------------------------------------------

/// A customer's booking request. Scheduling fields, status and progress are
/// not part of this shape; sending them is rejected outright.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NewBooking {
    pub vehicle_id: Uuid,
    pub service_id: Uuid,
    pub slot_id: Uuid,
    #[serde(default)]
    pub requested_work: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
}

/// Book an appointment in a slot on behalf of a customer.
///
/// The vehicle must belong to the customer. The slot row is locked before
/// the capacity count so a concurrent booking of the same slot waits for
/// this transaction to finish and then sees the new appointment.
pub fn book_appointment(
    db: &ClientExecutor,
    customer_id: Uuid,
    input: NewBooking,
) -> Result<Appointment, WorkshopError> {
    let requested_work = clean_text(input.requested_work);
    let notes = clean_text(input.notes);

    with_transaction(db, |tx| {
        let vehicle = tx.query_opt(
            "SELECT customer_id FROM vehicles WHERE vehicle_id = $1",
            &[&input.vehicle_id],
        )?;
        let owner: Uuid = match vehicle {
            Some(row) => row.get("customer_id"),
            None => return Err(WorkshopError::NotFound("vehicle does not exist".to_string())),
        };
        if owner != customer_id {
            return Err(WorkshopError::Forbidden(
                "vehicle does not belong to this account".to_string(),
            ));
        }

        let slot_sql = format!(
            "SELECT {} FROM appointment_slots \
             WHERE slot_id = $1 AND is_active FOR UPDATE",
            AppointmentSlot::COLUMNS
        );
        let slot = match tx.query_opt(&slot_sql, &[&input.slot_id])? {
            Some(row) => AppointmentSlot::from_row(&row),
            None => return Err(WorkshopError::NotFound("slot is not available".to_string())),
        };

        let used = used_capacity(tx, slot.slot_id)?;
        if remaining_capacity(slot.capacity, used) <= 0 {
            return Err(WorkshopError::Conflict(
                "no remaining capacity for this slot".to_string(),
            ));
        }

        let insert_sql = format!(
            "INSERT INTO appointments \
               (customer_id, vehicle_id, service_id, slot_id, scheduled_start, scheduled_end, \
                requested_work, status, notes, admin_message, progress_percent, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, 'scheduled', $8, NULL, 0, now(), now()) \
             RETURNING {}",
            Appointment::COLUMNS
        );
        let row = tx.query_one(
            &insert_sql,
            &[
                &customer_id,
                &input.vehicle_id,
                &input.service_id,
                &slot.slot_id,
                &slot.start_at,
                &slot.end_at,
                &requested_work,
                &notes,
            ],
        )?;
        Ok(Appointment::from_row(&row))
    })
}

// ---------------------------------------------------------------------------
// Appointment updates
// ---------------------------------------------------------------------------

/// Fields staff may change on an appointment
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StaffAppointmentPatch {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default, deserialize_with = "double_option")]
    pub admin_message: Option<Option<String>>,
    #[serde(default)]
    pub progress_percent: Option<i32>,
    #[serde(default, deserialize_with = "double_option")]
    pub scheduled_end: Option<Option<DateTime<Utc>>>,
    #[serde(default, deserialize_with = "double_option")]
    pub assigned_mechanic_id: Option<Option<Uuid>>,
}

impl StaffAppointmentPatch {
    pub fn is_empty(&self) -> bool {
        self.status.is_none()
            && self.admin_message.is_none()
            && self.progress_percent.is_none()
            && self.scheduled_end.is_none()
            && self.assigned_mechanic_id.is_none()
    }
}

/// Fields a customer may change on their own appointment
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CustomerAppointmentPatch {
    #[serde(default, deserialize_with = "double_option")]
    pub requested_work: Option<Option<String>>,
    #[serde(default, deserialize_with = "double_option")]
    pub notes: Option<Option<String>>,
}

impl CustomerAppointmentPatch {
    pub fn is_empty(&self) -> bool {
        self.requested_work.is_none() && self.notes.is_none()
    }
}

fn fetch_appointment(
    executor: &impl Executor,
    appointment_id: Uuid,
) -> Result<Appointment, WorkshopError> {
    let sql = format!(
        "SELECT {} FROM appointments WHERE appointment_id = $1",
        Appointment::COLUMNS
    );
    match executor.query_opt(&sql, &[&appointment_id])? {
        Some(row) => Ok(Appointment::from_row(&row)),
        None => Err(WorkshopError::NotFound("appointment does not exist".to_string())),
    }
}

fn fetch_customer_appointment(
    executor: &impl Executor,
    customer_id: Uuid,
    appointment_id: Uuid,
) -> Result<Appointment, WorkshopError> {
    let sql = format!(
        "SELECT {} FROM appointments WHERE appointment_id = $1 AND customer_id = $2",
        Appointment::COLUMNS
    );
    match executor.query_opt(&sql, &[&appointment_id, &customer_id])? {
        Some(row) => Ok(Appointment::from_row(&row)),
        None => Err(WorkshopError::NotFound("appointment does not exist".to_string())),
    }
}

fn staff_patch_update_sql(
    appointment_id: Uuid,
    patch: &StaffAppointmentPatch,
    status: Option<&AppointmentStatus>,
) -> String {
    let mut update = Query::update();
    update.table(Appointments::Table);
    if let Some(status) = status {
        update.value(Appointments::Status, status.as_str());
    }
    if let Some(admin_message) = &patch.admin_message {
        update.value(Appointments::AdminMessage, admin_message.clone());
    }
    if let Some(progress_percent) = patch.progress_percent {
        update.value(Appointments::ProgressPercent, progress_percent);
    }
    if let Some(scheduled_end) = &patch.scheduled_end {
        update.value(Appointments::ScheduledEnd, *scheduled_end);
    }
    if let Some(assigned_mechanic_id) = &patch.assigned_mechanic_id {
        update.value(Appointments::AssignedMechanicId, *assigned_mechanic_id);
    }
    update.value(Appointments::UpdatedAt, Expr::cust("now()"));
    update.and_where(Expr::col(Appointments::AppointmentId).eq(appointment_id));
    update.to_string(PostgresQueryBuilder)
}

/// Staff patch. Status moves are restricted to the closed status set, and
/// progress is a percentage.
pub fn update_appointment_staff(
    db: &ClientExecutor,
    appointment_id: Uuid,
    patch: StaffAppointmentPatch,
) -> Result<Appointment, WorkshopError> {
    let status = match &patch.status {
        Some(raw) => {
            let parsed = AppointmentStatus::parse(raw);
            if !parsed.is_known() {
                return Err(WorkshopError::InvalidArgument("invalid status".to_string()));
            }
            Some(parsed)
        }
        None => None,
    };
    if let Some(p) = patch.progress_percent {
        if !(0..=100).contains(&p) {
            return Err(WorkshopError::InvalidArgument(
                "progress_percent must be between 0 and 100".to_string(),
            ));
        }
    }
    let patch = StaffAppointmentPatch {
        admin_message: patch.admin_message.map(clean_text),
        ..patch
    };

    with_transaction(db, |tx| {
        let existing = fetch_appointment(tx, appointment_id)?;
        if patch.is_empty() {
            return Ok(existing);
        }
        tx.execute(
            &staff_patch_update_sql(appointment_id, &patch, status.as_ref()),
            &[],
        )?;
        fetch_appointment(tx, appointment_id)
    })
}

fn customer_patch_update_sql(appointment_id: Uuid, patch: &CustomerAppointmentPatch) -> String {
    let mut update = Query::update();
    update.table(Appointments::Table);
    if let Some(requested_work) = &patch.requested_work {
        update.value(Appointments::RequestedWork, requested_work.clone());
    }
    if let Some(notes) = &patch.notes {
        update.value(Appointments::Notes, notes.clone());
    }
    update.value(Appointments::UpdatedAt, Expr::cust("now()"));
    update.and_where(Expr::col(Appointments::AppointmentId).eq(appointment_id));
    update.to_string(PostgresQueryBuilder)
}

/// Customer patch: only the request text and notes are theirs to change
pub fn update_appointment_customer(
    db: &ClientExecutor,
    customer_id: Uuid,
    appointment_id: Uuid,
    patch: CustomerAppointmentPatch,
) -> Result<Appointment, WorkshopError> {
    let patch = CustomerAppointmentPatch {
        requested_work: patch.requested_work.map(clean_text),
        notes: patch.notes.map(clean_text),
    };

    with_transaction(db, |tx| {
        let existing = fetch_customer_appointment(tx, customer_id, appointment_id)?;
        if patch.is_empty() {
            return Ok(existing);
        }
        tx.execute(&customer_patch_update_sql(appointment_id, &patch), &[])?;
        fetch_customer_appointment(tx, customer_id, appointment_id)
    })
}

/// Customer cancellation.
///
/// Only a still-`scheduled` appointment can be cancelled; once the shop has
/// picked it up the customer has to call in. The status check and the update
/// run under a row lock so a staff status move cannot slip in between.
pub fn cancel_appointment(
    db: &ClientExecutor,
    customer_id: Uuid,
    appointment_id: Uuid,
) -> Result<(), WorkshopError> {
    with_transaction(db, |tx| {
        let sql = format!(
            "SELECT {} FROM appointments \
             WHERE appointment_id = $1 AND customer_id = $2 FOR UPDATE",
            Appointment::COLUMNS
        );
        let appointment = match tx.query_opt(&sql, &[&appointment_id, &customer_id])? {
            Some(row) => Appointment::from_row(&row),
            None => {
                return Err(WorkshopError::NotFound(
                    "appointment does not exist".to_string(),
                ))
            }
        };

        if appointment.status != AppointmentStatus::Scheduled {
            return Err(WorkshopError::Forbidden(
                "appointment has already been accepted or processed by the shop".to_string(),
            ));
        }

        tx.execute(
            "UPDATE appointments SET status = 'cancelled', updated_at = now() \
             WHERE appointment_id = $1 AND customer_id = $2 AND status = 'scheduled'",
            &[&appointment_id, &customer_id],
        )?;
        Ok(())
    })
}

// ---------------------------------------------------------------------------
// Listings
// ---------------------------------------------------------------------------

/// Staff list filters; all optional, combined with AND
#[derive(Debug, Default)]
pub struct AppointmentFilter {
    /// Matched case-insensitively against the stored status
    pub status: Option<String>,
    pub customer_id: Option<Uuid>,
    pub vehicle_id: Option<Uuid>,
    pub service_id: Option<Uuid>,
    pub slot_id: Option<Uuid>,
}

/// Staff listing, latest scheduled first
pub fn list_appointments(
    db: &ClientExecutor,
    filter: &AppointmentFilter,
) -> Result<Vec<Appointment>, WorkshopError> {
    let mut conditions: Vec<String> = Vec::new();
    let mut params: Vec<&dyn ToSql> = Vec::new();

    let status_norm = filter.status.as_ref().map(|s| s.trim().to_lowercase());
    if let Some(status) = &status_norm {
        params.push(status);
        conditions.push(format!("lower(status) = ${}", params.len()));
    }
    if let Some(customer_id) = &filter.customer_id {
        params.push(customer_id);
        conditions.push(format!("customer_id = ${}", params.len()));
    }
    if let Some(vehicle_id) = &filter.vehicle_id {
        params.push(vehicle_id);
        conditions.push(format!("vehicle_id = ${}", params.len()));
    }
    if let Some(service_id) = &filter.service_id {
        params.push(service_id);
        conditions.push(format!("service_id = ${}", params.len()));
    }
    if let Some(slot_id) = &filter.slot_id {
        params.push(slot_id);
        conditions.push(format!("slot_id = ${}", params.len()));
    }

    let mut sql = format!("SELECT {} FROM appointments", Appointment::COLUMNS);
    if !conditions.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&conditions.join(" AND "));
    }
    sql.push_str(" ORDER BY scheduled_start DESC");

    let rows = db.query_all(&sql, &params)?;
    Ok(rows.iter().map(Appointment::from_row).collect())
}

/// A customer's own appointments, latest scheduled first
pub fn list_customer_appointments(
    db: &ClientExecutor,
    customer_id: Uuid,
) -> Result<Vec<Appointment>, WorkshopError> {
    let sql = format!(
        "SELECT {} FROM appointments WHERE customer_id = $1 ORDER BY scheduled_start DESC",
        Appointment::COLUMNS
    );
    let rows = db.query_all(&sql, &[&customer_id])?;
    Ok(rows.iter().map(Appointment::from_row).collect())
}

/// Customer identity shown in the staff open-appointments view
#[derive(Debug, Clone, Serialize)]
pub struct CustomerSummary {
    pub customer_id: Uuid,
    pub full_name: String,
    pub email: String,
}

/// Vehicle identity shown in the staff open-appointments view
#[derive(Debug, Clone, Serialize)]
pub struct VehicleSummary {
    pub vehicle_id: Uuid,
    pub plate: String,
    pub make: Option<String>,
    pub model: Option<String>,
    pub year: Option<i32>,
}

/// One row of the staff work queue
#[derive(Debug, Clone, Serialize)]
pub struct OpenAppointment {
    pub appointment_id: Uuid,
    pub status: AppointmentStatus,
    pub scheduled_start: DateTime<Utc>,
    pub requested_work: Option<String>,
    pub customer: CustomerSummary,
    pub vehicle: VehicleSummary,
}

/// Staff work queue: appointments in the given statuses (or the default
/// open set), joined with their customer and vehicle, soonest first
pub fn list_open_appointments(
    db: &ClientExecutor,
    statuses: Option<Vec<String>>,
) -> Result<Vec<OpenAppointment>, WorkshopError> {
    let statuses: Vec<String> = match statuses {
        Some(list) => list
            .into_iter()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect(),
        None => DEFAULT_OPEN_STATUSES.iter().map(|s| s.to_string()).collect(),
    };

    let rows = db.query_all(
        "SELECT a.appointment_id, a.status, a.scheduled_start, a.requested_work, \
                c.customer_id, c.full_name, c.email, \
                v.vehicle_id, v.plate, v.make, v.model, v.year \
         FROM appointments a \
         JOIN customers c ON c.customer_id = a.customer_id \
         JOIN vehicles v ON v.vehicle_id = a.vehicle_id \
         WHERE a.status = any($1) \
         ORDER BY a.scheduled_start ASC \
         LIMIT 200",
        &[&statuses],
    )?;

    let mut result = Vec::with_capacity(rows.len());
    for row in &rows {
        let status: String = row.get("status");
        result.push(OpenAppointment {
            appointment_id: row.get("appointment_id"),
            status: AppointmentStatus::parse(&status),
            scheduled_start: row.get("scheduled_start"),
            requested_work: row.get("requested_work"),
            customer: CustomerSummary {
                customer_id: row.get("customer_id"),
                full_name: row.get("full_name"),
                email: row.get("email"),
            },
            vehicle: VehicleSummary {
                vehicle_id: row.get("vehicle_id"),
                plate: row.get("plate"),
                make: row.get("make"),
                model: row.get("model"),
                year: row.get("year"),
            },
        });
    }
    Ok(result)
}
