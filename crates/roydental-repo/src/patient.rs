//! Patient aggregate: the root record plus its five dependent collections.
//!
//! Removing a patient takes one long-lived lock on the patient key and runs
//! in two phases inside a single store transaction:
//!
//! 1. **Gather**: list every dependent row of the patient and drop its
//!    cache key while the row identities are still known.
//! 2. **Delete**: bulk-delete each dependent table, then the patient row.
//!
//! Before either phase the patient row is locked exclusively in the store.
//! Dependent inserts and updates hold that row under a share lock while
//! they confirm it exists, so a dependent written concurrently either
//! commits before the gather or fails its parent check.
//!
//! The collection keys are dropped after commit. No per-dependent locks
//! are taken, so the aggregate path never nests locks.

use roydental_core::{
    APPOINTMENT, Appointment, BILLING, Billing, CoreError, EMERGENCY_CONTACT, EXAMINATION,
    EmergencyContact, EntityDescriptor, Examination, PATIENT, Patient, TREATMENT_PLAN,
    TreatmentPlan,
};
use roydental_storage::{Filter, RowLock, StorageError, Transaction};
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use crate::context::RepoContext;
use crate::error::{IdRollback, RepoError, RepoResult};
use crate::repository::Repository;

/// Types owned by a patient, in cascade order.
pub static DEPENDENTS: [&EntityDescriptor; 5] = [
    &EMERGENCY_CONTACT,
    &EXAMINATION,
    &BILLING,
    &TREATMENT_PLAN,
    &APPOINTMENT,
];

/// A patient with every dependent record.
#[derive(Debug, Clone, Serialize)]
pub struct PatientChart {
    pub patient: Patient,
    pub emergency_contacts: Vec<EmergencyContact>,
    pub examinations: Vec<Examination>,
    pub billings: Vec<Billing>,
    pub treatment_plans: Vec<TreatmentPlan>,
    pub appointments: Vec<Appointment>,
}

/// Rows removed by a cascading delete, per table.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CascadeSummary {
    pub patient_id: String,
    pub removed: Vec<(&'static str, u64)>,
}

impl CascadeSummary {
    pub fn total(&self) -> u64 {
        self.removed.iter().map(|(_, n)| n).sum()
    }
}

#[derive(Clone)]
pub struct PatientRepository {
    patients: Repository<Patient>,
    emergency_contacts: Repository<EmergencyContact>,
    examinations: Repository<Examination>,
    billings: Repository<Billing>,
    treatment_plans: Repository<TreatmentPlan>,
    appointments: Repository<Appointment>,
    ctx: RepoContext,
}

impl PatientRepository {
    pub fn new(ctx: RepoContext) -> Self {
        Self {
            patients: Repository::new(ctx.clone()),
            emergency_contacts: Repository::new(ctx.clone()),
            examinations: Repository::new(ctx.clone()),
            billings: Repository::new(ctx.clone()),
            treatment_plans: Repository::new(ctx.clone()),
            appointments: Repository::new(ctx.clone()),
            ctx,
        }
    }

    pub async fn create(&self, patient: Patient) -> RepoResult<Patient> {
        self.patients.create(patient).await
    }

    pub async fn get_by_id(&self, id: &str) -> RepoResult<Patient> {
        self.patients.get_by_id(id, None).await
    }

    pub async fn get_all(&self) -> RepoResult<Vec<Patient>> {
        self.patients.get_all().await
    }

    pub async fn update(&self, patient: Patient) -> RepoResult<()> {
        self.patients.update(patient).await
    }

    /// Delete a patient that has no dependent records.
    ///
    /// Refuses with a validation error while any dependent row exists; use
    /// [`Self::delete_aggregate_and_dependents`] to remove everything.
    #[instrument(skip(self))]
    pub async fn delete(&self, id: &str) -> RepoResult<()> {
        let key = PATIENT.record_lock_key(id);
        let ttl = self.ctx.locks.policy().record_ttl();
        self.ctx.with_lock(&key, ttl, self.delete_root_locked(id)).await
    }

    async fn delete_root_locked(&self, id: &str) -> RepoResult<()> {
        let mut tx = self.ctx.store.begin_transaction().await.map_err(persistence)?;
        let outcome: RepoResult<()> = async {
            lock_root(tx.as_mut(), id).await?;
            for descriptor in DEPENDENTS {
                let rows = tx
                    .find(descriptor.table, &Filter::by_parent(id))
                    .await
                    .map_err(persistence)?;
                if !rows.is_empty() {
                    return Err(RepoError::from(CoreError::validation(
                        PATIENT.name,
                        format!("{id} still has {} {} record(s)", rows.len(), descriptor.name),
                    )));
                }
            }
            if !tx.delete(PATIENT.table, id).await.map_err(persistence)? {
                return Err(RepoError::not_found(PATIENT.name, id));
            }
            Ok(())
        }
        .await;

        if let Err(e) = outcome {
            abandon(tx).await;
            return Err(e);
        }
        tx.commit().await.map_err(persistence)?;

        self.ctx.cache.invalidate(&PATIENT, id, None).await;
        info!(id = %id, "patient deleted");
        Ok(())
    }

    /// Delete a patient and every record that belongs to it, atomically.
    #[instrument(skip(self))]
    pub async fn delete_aggregate_and_dependents(&self, id: &str) -> RepoResult<CascadeSummary> {
        let key = PATIENT.record_lock_key(id);
        let ttl = self.ctx.locks.policy().aggregate_ttl();
        self.ctx.with_lock(&key, ttl, self.cascade_locked(id)).await
    }

    async fn cascade_locked(&self, id: &str) -> RepoResult<CascadeSummary> {
        let mut tx = self.ctx.store.begin_transaction().await.map_err(persistence)?;

        if let Err(e) = lock_root(tx.as_mut(), id).await {
            abandon(tx).await;
            return Err(e);
        }
        let gathered = match self.gather(tx.as_mut(), id).await {
            Ok(gathered) => gathered,
            Err(e) => {
                abandon(tx).await;
                return Err(e);
            }
        };
        let summary = match self.remove(tx.as_mut(), id).await {
            Ok(summary) => summary,
            Err(e) => {
                abandon(tx).await;
                return Err(e);
            }
        };
        tx.commit().await.map_err(persistence)?;

        // Reads between gather and commit may have repopulated these
        for key in &gathered {
            self.ctx.cache.delete(key).await;
        }
        if let Some(root_key) = PATIENT.cache_key(None, id) {
            self.ctx.cache.delete(&root_key).await;
        }
        self.ctx.cache.delete(PATIENT.collection_key).await;
        for descriptor in DEPENDENTS {
            self.ctx.cache.delete(descriptor.collection_key).await;
        }

        info!(id = %id, removed = summary.total(), "patient and dependents deleted");
        Ok(summary)
    }

    /// Phase 1: list dependent rows and drop their cache keys.
    async fn gather(&self, tx: &mut dyn Transaction, id: &str) -> RepoResult<Vec<String>> {
        let mut keys = Vec::new();
        for descriptor in DEPENDENTS {
            let rows = tx
                .find(descriptor.table, &Filter::by_parent(id))
                .await
                .map_err(persistence)?;
            for row in rows {
                if let Some(key) = descriptor.cache_key(Some(id), &row.id) {
                    self.ctx.cache.delete(&key).await;
                    keys.push(key);
                }
            }
        }
        debug!(id = %id, keys = keys.len(), "dependent cache keys gathered");
        Ok(keys)
    }

    /// Phase 2: bulk-delete dependents, then the root.
    async fn remove(&self, tx: &mut dyn Transaction, id: &str) -> RepoResult<CascadeSummary> {
        let mut summary = CascadeSummary {
            patient_id: id.to_string(),
            removed: Vec::with_capacity(DEPENDENTS.len() + 1),
        };
        for descriptor in DEPENDENTS {
            let count = tx
                .delete_where(descriptor.table, &Filter::by_parent(id))
                .await
                .map_err(persistence)?;
            summary.removed.push((descriptor.table, count));
        }
        if !tx.delete(PATIENT.table, id).await.map_err(persistence)? {
            return Err(RepoError::not_found(PATIENT.name, id));
        }
        summary.removed.push((PATIENT.table, 1));
        Ok(summary)
    }

    /// The patient with all dependent collections.
    pub async fn chart(&self, id: &str) -> RepoResult<PatientChart> {
        let patient = self.get_by_id(id).await?;
        let (emergency_contacts, examinations, billings, treatment_plans, appointments) =
            futures_util::try_join!(
                self.emergency_contacts.find_by_parent(id),
                self.examinations.find_by_parent(id),
                self.billings.find_by_parent(id),
                self.treatment_plans.find_by_parent(id),
                self.appointments.find_by_parent(id),
            )?;
        Ok(PatientChart {
            patient,
            emergency_contacts,
            examinations,
            billings,
            treatment_plans,
            appointments,
        })
    }
}

/// Lock the patient row exclusively before touching its dependents.
///
/// Dependent writes hold the same row under a share lock while they check
/// it, so once this returns no dependent of `id` can be added until the
/// transaction ends.
async fn lock_root(tx: &mut dyn Transaction, id: &str) -> RepoResult<()> {
    match tx.read_row(PATIENT.table, id, RowLock::Exclusive).await {
        Ok(Some(_)) => Ok(()),
        Ok(None) => Err(RepoError::not_found(PATIENT.name, id)),
        Err(e) => Err(persistence(e)),
    }
}

fn persistence(err: StorageError) -> RepoError {
    RepoError::persistence(PATIENT.name, err, IdRollback::NotAttempted)
}

async fn abandon(tx: Box<dyn Transaction>) {
    if let Err(e) = tx.rollback().await {
        warn!(error = %e, "transaction rollback failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use roydental_cache::{CacheBackend, LockPolicy};
    use roydental_core::{Doctor, Sex};
    use roydental_db_memory::InMemoryStorage;
    use std::sync::Arc;

    use crate::context::RepositorySettings;

    fn context(store: &InMemoryStorage) -> RepoContext {
        let policy = LockPolicy {
            backoff_ms: 10,
            ..LockPolicy::default()
        };
        RepoContext::new(
            Arc::new(store.clone()),
            CacheBackend::new_local(),
            policy,
            &RepositorySettings::default(),
        )
    }

    async fn seeded(store: &InMemoryStorage) -> (PatientRepository, Patient) {
        let ctx = context(store);
        let patients = PatientRepository::new(ctx.clone());
        let doctors = Repository::<Doctor>::new(ctx.clone());

        let patient = patients
            .create(Patient::new("Amina", "Otieno", Sex::Female, "1990-04-12"))
            .await
            .unwrap();
        let doctor = doctors.create(Doctor::new("Ama", "Owusu")).await.unwrap();

        Repository::<EmergencyContact>::new(ctx.clone())
            .create(EmergencyContact::new(&patient.id, "Kwame", "0700111222", "Brother"))
            .await
            .unwrap();
        Repository::<Examination>::new(ctx.clone())
            .create(Examination::new(&patient.id, "Caries on 36"))
            .await
            .unwrap();
        Repository::<Billing>::new(ctx.clone())
            .create(Billing::new(&patient.id, &doctor.id, "Filling", 120.0))
            .await
            .unwrap();
        Repository::<Appointment>::new(ctx)
            .create(Appointment::new(&patient.id, &doctor.id, "2026-11-02T09:00:00Z"))
            .await
            .unwrap();
        (patients, patient)
    }

    #[tokio::test]
    async fn test_chart_collects_dependents() {
        let store = InMemoryStorage::new();
        let (patients, patient) = seeded(&store).await;

        let chart = patients.chart(&patient.id).await.unwrap();
        assert_eq!(chart.patient.id, "DP-000001");
        assert_eq!(chart.emergency_contacts.len(), 1);
        assert_eq!(chart.examinations.len(), 1);
        assert_eq!(chart.billings.len(), 1);
        assert!(chart.treatment_plans.is_empty());
        assert_eq!(chart.appointments.len(), 1);
    }

    #[tokio::test]
    async fn test_plain_delete_refuses_with_dependents() {
        let store = InMemoryStorage::new();
        let (patients, patient) = seeded(&store).await;

        let err = patients.delete(&patient.id).await.unwrap_err();
        assert!(matches!(err, RepoError::Validation(_)));
        assert_eq!(store.count("patient").await, 1);

        let lone = patients
            .create(Patient::new("Kofi", "Mensah", Sex::Male, "1985-01-30"))
            .await
            .unwrap();
        patients.delete(&lone.id).await.unwrap();
        assert!(patients.get_by_id(&lone.id).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_cascade_removes_everything() {
        let store = InMemoryStorage::new();
        let (patients, patient) = seeded(&store).await;

        let summary = patients
            .delete_aggregate_and_dependents(&patient.id)
            .await
            .unwrap();
        assert_eq!(summary.total(), 5);

        for table in ["patient", "emergency_contact", "examination", "billing", "appointment"] {
            assert_eq!(store.count(table).await, 0, "{table} not empty");
        }
        // The doctor is not part of the aggregate
        assert_eq!(store.count("doctor").await, 1);
    }

    #[tokio::test]
    async fn test_cascade_on_absent_patient_changes_nothing() {
        let store = InMemoryStorage::new();
        let (patients, _) = seeded(&store).await;

        let err = patients
            .delete_aggregate_and_dependents("DP-000404")
            .await
            .unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(store.count("emergency_contact").await, 1);
    }
}
