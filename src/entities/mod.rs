//! Row types for the workshop schema.
//!
//! These structs mirror the database tables one-to-one and decode with
//! `from_row`. Status columns are stored as text but surface as closed enums
//! with an `Other` escape hatch, so rows written by earlier systems still
//! round-trip unchanged.

pub mod appointment;
pub mod product;
pub mod work_order;

pub use appointment::{
    Appointment, AppointmentSlot, AppointmentStatus, Appointments, AppointmentSlots,
};
pub use product::{Product, Products};
pub use work_order::{
    WorkOrder, WorkOrderProductLine, WorkOrderProducts, WorkOrderServiceLine, WorkOrderServices,
    WorkOrderStatus, WorkOrders,
};
