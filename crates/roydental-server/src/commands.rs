//! Subcommand implementations. Each returns the JSON document to print.

use anyhow::{Context, bail};
use roydental_core::Entity;
use roydental_db_postgres::test_connection;
use roydental_repo::Repository;
use serde_json::{Value, json};

use crate::cli::EntityKind;
use crate::services::{Services, entity_sequences, entity_tables};

pub async fn migrate(services: &Services) -> anyhow::Result<Value> {
    let Some(pg) = &services.postgres else {
        bail!("storage.postgres is not configured; the in-memory store needs no migration");
    };
    let tables = entity_tables();
    let sequences = entity_sequences();
    pg.schema()
        .bootstrap(&tables, &sequences)
        .await
        .context("schema bootstrap failed")?;
    tracing::info!(tables = tables.len(), sequences = sequences.len(), "Schema ready");
    Ok(json!({ "tables": tables, "sequences": sequences }))
}

pub async fn check(services: &Services) -> anyhow::Result<Value> {
    let store = match &services.postgres {
        Some(pg) => match test_connection(pg.pool()).await {
            Ok(()) => json!({ "backend": "postgres", "ok": true }),
            Err(e) => json!({ "backend": "postgres", "ok": false, "error": e.to_string() }),
        },
        None => json!({ "backend": services.store.backend_name(), "ok": true }),
    };
    let cache = match services.cache.ping().await {
        Ok(()) => json!({ "mode": services.cache.mode(), "ok": true }),
        Err(e) => json!({ "mode": services.cache.mode(), "ok": false, "error": e.to_string() }),
    };
    Ok(json!({ "store": store, "cache": cache }))
}

pub async fn get(
    services: &Services,
    entity: EntityKind,
    id: &str,
    parent: Option<&str>,
) -> anyhow::Result<Value> {
    let repos = &services.repos;
    match entity {
        EntityKind::Patient => to_json(repos.patients.get_by_id(id).await?),
        EntityKind::Doctor => fetch(&repos.doctors, id, parent).await,
        EntityKind::InsuranceCompany => fetch(&repos.insurance_companies, id, parent).await,
        EntityKind::EmergencyContact => fetch(&repos.emergency_contacts, id, parent).await,
        EntityKind::Examination => fetch(&repos.examinations, id, parent).await,
        EntityKind::Billing => fetch(&repos.billings, id, parent).await,
        EntityKind::TreatmentPlan => fetch(&repos.treatment_plans, id, parent).await,
        EntityKind::Appointment => fetch(&repos.appointments, id, parent).await,
    }
}

pub async fn list(services: &Services, entity: EntityKind) -> anyhow::Result<Value> {
    let repos = &services.repos;
    match entity {
        EntityKind::Patient => to_json(repos.patients.get_all().await?),
        EntityKind::Doctor => fetch_all(&repos.doctors).await,
        EntityKind::InsuranceCompany => fetch_all(&repos.insurance_companies).await,
        EntityKind::EmergencyContact => fetch_all(&repos.emergency_contacts).await,
        EntityKind::Examination => fetch_all(&repos.examinations).await,
        EntityKind::Billing => fetch_all(&repos.billings).await,
        EntityKind::TreatmentPlan => fetch_all(&repos.treatment_plans).await,
        EntityKind::Appointment => fetch_all(&repos.appointments).await,
    }
}

pub async fn chart(services: &Services, patient_id: &str) -> anyhow::Result<Value> {
    to_json(services.repos.patients.chart(patient_id).await?)
}

pub async fn purge_patient(services: &Services, patient_id: &str) -> anyhow::Result<Value> {
    let summary = services
        .repos
        .patients
        .delete_aggregate_and_dependents(patient_id)
        .await?;
    to_json(summary)
}

async fn fetch<E: Entity>(
    repo: &Repository<E>,
    id: &str,
    parent: Option<&str>,
) -> anyhow::Result<Value> {
    to_json(repo.get_by_id(id, parent).await?)
}

async fn fetch_all<E: Entity>(repo: &Repository<E>) -> anyhow::Result<Value> {
    to_json(repo.get_all().await?)
}

fn to_json<T: serde::Serialize>(value: T) -> anyhow::Result<Value> {
    Ok(serde_json::to_value(value)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use roydental_core::{Doctor, EmergencyContact, Patient, Sex};

    async fn services() -> Services {
        Services::init(&AppConfig::default()).await.unwrap()
    }

    #[tokio::test]
    async fn test_get_and_list() {
        let services = services().await;
        let doctor = services
            .repos
            .doctors
            .create(Doctor::new("Ama", "Owusu"))
            .await
            .unwrap();

        let one = get(&services, EntityKind::Doctor, &doctor.id, None).await.unwrap();
        assert_eq!(one["last_name"], "Owusu");

        let all = list(&services, EntityKind::Doctor).await.unwrap();
        assert_eq!(all.as_array().map(Vec::len), Some(1));

        let missing = get(&services, EntityKind::Patient, "DP-000404", None).await;
        assert!(missing.is_err());
    }

    #[tokio::test]
    async fn test_chart_and_purge() {
        let services = services().await;
        let patient = services
            .repos
            .patients
            .create(Patient::new("Amina", "Otieno", Sex::Female, "1990-04-12"))
            .await
            .unwrap();
        services
            .repos
            .emergency_contacts
            .create(EmergencyContact::new(&patient.id, "Kwame", "0700111222", "Brother"))
            .await
            .unwrap();

        let charted = chart(&services, &patient.id).await.unwrap();
        assert_eq!(charted["emergency_contacts"].as_array().map(Vec::len), Some(1));

        let purged = purge_patient(&services, &patient.id).await.unwrap();
        assert_eq!(purged["patient_id"], "DP-000001");
        assert!(get(&services, EntityKind::Patient, &patient.id, None).await.is_err());
    }

    #[tokio::test]
    async fn test_migrate_requires_postgres() {
        let services = services().await;
        assert!(migrate(&services).await.is_err());

        let status = check(&services).await.unwrap();
        assert_eq!(status["store"]["ok"], true);
        assert_eq!(status["cache"]["mode"], "local");
    }
}
