//! # roydental-repo
//!
//! Entity repositories that combine the backing store, the shared cache
//! and the lock manager.
//!
//! - [`Repository<E>`]: create, read, update and delete for any [`Entity`]
//!   described by an `EntityDescriptor`
//! - [`PatientRepository`]: the patient aggregate, including the atomic
//!   cascading delete and the full chart read
//! - [`IdAllocator`]: formatted sequential ids with best-effort rollback
//! - [`EntityCache`]: typed read-through cache with ordered invalidation
//!
//! All handles are injected through a [`RepoContext`]; the process entry
//! point owns their lifecycle.
//!
//! [`Entity`]: roydental_core::Entity

pub mod allocator;
pub mod context;
pub mod entity_cache;
pub mod error;
pub mod patient;
pub mod repository;

use roydental_core::{
    Appointment, Billing, Doctor, EmergencyContact, Examination, InsuranceCompany, TreatmentPlan,
};

pub use allocator::{IdAllocator, IssuedId};
pub use context::{RepoContext, RepositorySettings};
pub use entity_cache::EntityCache;
pub use error::{IdRollback, RepoError, RepoResult};
pub use patient::{CascadeSummary, DEPENDENTS, PatientChart, PatientRepository};
pub use repository::Repository;

/// One repository per entity type over a shared context.
#[derive(Clone)]
pub struct Repositories {
    pub patients: PatientRepository,
    pub doctors: Repository<Doctor>,
    pub insurance_companies: Repository<InsuranceCompany>,
    pub emergency_contacts: Repository<EmergencyContact>,
    pub examinations: Repository<Examination>,
    pub billings: Repository<Billing>,
    pub treatment_plans: Repository<TreatmentPlan>,
    pub appointments: Repository<Appointment>,
}

impl Repositories {
    pub fn new(ctx: RepoContext) -> Self {
        Self {
            patients: PatientRepository::new(ctx.clone()),
            doctors: Repository::new(ctx.clone()),
            insurance_companies: Repository::new(ctx.clone()),
            emergency_contacts: Repository::new(ctx.clone()),
            examinations: Repository::new(ctx.clone()),
            billings: Repository::new(ctx.clone()),
            treatment_plans: Repository::new(ctx.clone()),
            appointments: Repository::new(ctx),
        }
    }
}
