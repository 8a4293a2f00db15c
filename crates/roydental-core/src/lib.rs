//! # roydental-core
//!
//! Domain records for the clinic data-access layer and the static
//! descriptors that drive the generic repository.
//!
//! Each record type implements [`Entity`] and points at one
//! [`EntityDescriptor`] naming its table, id scheme, cache keys, lock keys,
//! natural key and mutable columns. Adding a new record type means adding
//! a struct and a descriptor, not a new repository.

pub mod entity;
pub mod error;
pub mod id;
pub mod models;

pub use entity::{CacheScope, DEFAULT_CACHE_TTL, Entity, EntityDescriptor, ParentLink};
pub use error::{CoreError, Result, require_text};
pub use id::{IdScheme, format_sequential_id};
pub use models::{
    ALL_DESCRIPTORS, APPOINTMENT, Appointment, AppointmentStatus, BILLING, Billing, DOCTOR,
    Doctor, EMERGENCY_CONTACT, EXAMINATION, EmergencyContact, Examination, INSURANCE_COMPANY,
    InsuranceCompany, PATIENT, Patient, Sex, TREATMENT_PLAN, TreatmentPlan,
};

/// Current UTC time, used to stamp `created_at` on new records.
pub fn now_utc() -> time::OffsetDateTime {
    time::OffsetDateTime::now_utc()
}
