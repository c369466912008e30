//! Work orders and their line items.

use chrono::{DateTime, Utc};
use may_postgres::Row;
use rust_decimal::Decimal;
use sea_query::Iden;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Work order status.
///
/// Stored as text; parsing trims and lowercases so rows written with
/// `"Cancelled "` or `"CANCELLED"` still hit the terminal check. Values
/// outside the closed set are preserved via `Other` rather than rejected,
/// because existing data contains free-form statuses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum WorkOrderStatus {
    Open,
    Authorized,
    InProgress,
    Completed,
    Cancelled,
    Other(String),
}

impl WorkOrderStatus {
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_lowercase().as_str() {
            "open" => WorkOrderStatus::Open,
            "authorized" => WorkOrderStatus::Authorized,
            "in_progress" => WorkOrderStatus::InProgress,
            "completed" => WorkOrderStatus::Completed,
            "cancelled" => WorkOrderStatus::Cancelled,
            other => WorkOrderStatus::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            WorkOrderStatus::Open => "open",
            WorkOrderStatus::Authorized => "authorized",
            WorkOrderStatus::InProgress => "in_progress",
            WorkOrderStatus::Completed => "completed",
            WorkOrderStatus::Cancelled => "cancelled",
            WorkOrderStatus::Other(s) => s,
        }
    }

    /// Terminal state: once cancelled, no line item may be mutated
    pub fn is_cancelled(&self) -> bool {
        matches!(self, WorkOrderStatus::Cancelled)
    }
}

impl From<String> for WorkOrderStatus {
    fn from(s: String) -> Self {
        WorkOrderStatus::parse(&s)
    }
}

impl From<WorkOrderStatus> for String {
    fn from(s: WorkOrderStatus) -> Self {
        s.as_str().to_string()
    }
}

impl fmt::Display for WorkOrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Column identifiers for `work_orders`
#[derive(Iden)]
pub enum WorkOrders {
    Table,
    WorkOrderId,
    AppointmentId,
    CustomerId,
    VehicleId,
    Status,
    CustomerSymptoms,
    Diagnosis,
    EstimatedTotal,
    AuthorizationStatus,
    AuthorizedAt,
    AuthorizedBy,
    AssignedMechanicId,
    CreatedBy,
    OpenedAt,
    ClosedAt,
    Notes,
    UpdatedAt,
}

#[derive(Debug, Clone, Serialize)]
pub struct WorkOrder {
    pub work_order_id: Uuid,
    pub appointment_id: Option<Uuid>,
    pub customer_id: Uuid,
    pub vehicle_id: Uuid,
    pub status: WorkOrderStatus,
    pub customer_symptoms: Option<String>,
    pub diagnosis: Option<String>,
    pub estimated_total: Option<Decimal>,
    pub authorization_status: String,
    pub authorized_at: Option<DateTime<Utc>>,
    pub authorized_by: Option<String>,
    pub assigned_mechanic_id: Option<Uuid>,
    pub created_by: Option<Uuid>,
    pub opened_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WorkOrder {
    pub const COLUMNS: &'static str = "work_order_id, appointment_id, customer_id, vehicle_id, status, \
         customer_symptoms, diagnosis, estimated_total, authorization_status, \
         authorized_at, authorized_by, assigned_mechanic_id, created_by, \
         opened_at, closed_at, notes, created_at, updated_at";

    pub fn from_row(row: &Row) -> Self {
        let status: String = row.get("status");
        Self {
            work_order_id: row.get("work_order_id"),
            appointment_id: row.get("appointment_id"),
            customer_id: row.get("customer_id"),
            vehicle_id: row.get("vehicle_id"),
            status: WorkOrderStatus::parse(&status),
            customer_symptoms: row.get("customer_symptoms"),
            diagnosis: row.get("diagnosis"),
            estimated_total: row.get("estimated_total"),
            authorization_status: row.get("authorization_status"),
            authorized_at: row.get("authorized_at"),
            authorized_by: row.get("authorized_by"),
            assigned_mechanic_id: row.get("assigned_mechanic_id"),
            created_by: row.get("created_by"),
            opened_at: row.get("opened_at"),
            closed_at: row.get("closed_at"),
            notes: row.get("notes"),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        }
    }
}

/// Column identifiers for `work_order_services`
#[derive(Iden)]
pub enum WorkOrderServices {
    Table,
    WorkOrderServiceId,
    WorkOrderId,
    ServiceId,
    Description,
    Qty,
    UnitPrice,
    MechanicId,
    Status,
    StartedAt,
    CompletedAt,
    UpdatedAt,
}

/// A service line: labor billed against a work order. No stock interaction.
#[derive(Debug, Clone, Serialize)]
pub struct WorkOrderServiceLine {
    pub work_order_service_id: Uuid,
    pub work_order_id: Uuid,
    /// Nulled if the catalog service is removed; the line itself survives
    pub service_id: Option<Uuid>,
    pub description: Option<String>,
    pub qty: Decimal,
    pub unit_price: Decimal,
    pub mechanic_id: Option<Uuid>,
    pub status: String,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WorkOrderServiceLine {
    pub const COLUMNS: &'static str = "work_order_service_id, work_order_id, service_id, description, qty, \
         unit_price, mechanic_id, status, started_at, completed_at, created_at, updated_at";

    pub fn from_row(row: &Row) -> Self {
        Self {
            work_order_service_id: row.get("work_order_service_id"),
            work_order_id: row.get("work_order_id"),
            service_id: row.get("service_id"),
            description: row.get("description"),
            qty: row.get("qty"),
            unit_price: row.get("unit_price"),
            mechanic_id: row.get("mechanic_id"),
            status: row.get("status"),
            started_at: row.get("started_at"),
            completed_at: row.get("completed_at"),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        }
    }
}

/// Column identifiers for `work_order_products`
#[derive(Iden)]
pub enum WorkOrderProducts {
    Table,
    WorkOrderProductId,
    WorkOrderId,
    ProductId,
    Description,
    Qty,
    UnitPrice,
    UpdatedAt,
}

/// A product line: catalog stock consumed by a work order.
///
/// The sum of `qty` across live product lines for a product is exactly the
/// stock that has been taken from that product; every mutation of a line is
/// paired with the inverse stock movement inside one transaction.
#[derive(Debug, Clone, Serialize)]
pub struct WorkOrderProductLine {
    pub work_order_product_id: Uuid,
    pub work_order_id: Uuid,
    /// Nulled if the product is removed from the catalog
    pub product_id: Option<Uuid>,
    pub description: Option<String>,
    pub qty: Decimal,
    pub unit_price: Decimal,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WorkOrderProductLine {
    pub const COLUMNS: &'static str = "work_order_product_id, work_order_id, product_id, description, qty, \
         unit_price, created_at, updated_at";

    pub fn from_row(row: &Row) -> Self {
        Self {
            work_order_product_id: row.get("work_order_product_id"),
            work_order_id: row.get("work_order_id"),
            product_id: row.get("product_id"),
            description: row.get("description"),
            qty: row.get("qty"),
            unit_price: row.get("unit_price"),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        }
    }
}
