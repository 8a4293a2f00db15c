//! Clinic records and their descriptors.
//!
//! `Patient` is the aggregate root; emergency contacts, examinations,
//! billings, treatment plans and appointments each belong to exactly one
//! patient. Doctors and insurance companies stand alone.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::entity::{CacheScope, DEFAULT_CACHE_TTL, Entity, EntityDescriptor, ParentLink};
use crate::error::{CoreError, Result, require_text};
use crate::id::IdScheme;

/// Stored in place of an empty middle name so it takes part in the natural key.
pub const MISSING_MIDDLE_NAME: &str = "N/A";

pub static PATIENT: EntityDescriptor = EntityDescriptor {
    name: "patient",
    table: "patient",
    id_field: "id",
    id_scheme: IdScheme::Prefixed {
        prefix: "DP",
        sequence: "patient_id_seq",
        width: 6,
    },
    cache_prefix: "patient_cache",
    collection_key: "patients_cache",
    cache_scope: CacheScope::ById,
    ttl: DEFAULT_CACHE_TTL,
    parent: None,
    natural_key: &["first_name", "middle_name", "last_name", "date_of_birth"],
    mutable_fields: &[
        "first_name",
        "middle_name",
        "last_name",
        "date_of_birth",
        "sex",
        "insured",
        "cash",
        "insurance_company",
        "scheme",
        "cover_limit",
        "occupation",
        "place_of_work",
        "phone",
        "email",
        "address",
    ],
};

pub static DOCTOR: EntityDescriptor = EntityDescriptor {
    name: "doctor",
    table: "doctor",
    id_field: "id",
    id_scheme: IdScheme::Prefixed {
        prefix: "DR",
        sequence: "doctor_id_seq",
        width: 6,
    },
    cache_prefix: "doctor_cache",
    collection_key: "doctors_cache",
    cache_scope: CacheScope::ById,
    ttl: DEFAULT_CACHE_TTL,
    parent: None,
    natural_key: &["first_name", "last_name"],
    mutable_fields: &["first_name", "last_name"],
};

pub static INSURANCE_COMPANY: EntityDescriptor = EntityDescriptor {
    name: "insurance_company",
    table: "insurance_company",
    id_field: "id",
    id_scheme: IdScheme::Prefixed {
        prefix: "IC",
        sequence: "insurance_company_id_seq",
        width: 6,
    },
    cache_prefix: "insurance_company_cache",
    collection_key: "insurance_companies_cache",
    cache_scope: CacheScope::ById,
    ttl: DEFAULT_CACHE_TTL,
    parent: None,
    natural_key: &["name"],
    mutable_fields: &["name"],
};

pub static EMERGENCY_CONTACT: EntityDescriptor = EntityDescriptor {
    name: "emergency_contact",
    table: "emergency_contact",
    id_field: "id",
    id_scheme: IdScheme::Serial {
        sequence: "emergency_contact_id_seq",
    },
    cache_prefix: "emergency_contact_cache",
    collection_key: "emergency_contacts_cache",
    cache_scope: CacheScope::ByParentAndId,
    ttl: DEFAULT_CACHE_TTL,
    parent: Some(ParentLink {
        field: "patient_id",
        entity: &PATIENT,
    }),
    natural_key: &["patient_id", "phone"],
    mutable_fields: &["name", "phone", "relationship"],
};

pub static EXAMINATION: EntityDescriptor = EntityDescriptor {
    name: "examination",
    table: "examination",
    id_field: "id",
    id_scheme: IdScheme::Serial {
        sequence: "examination_id_seq",
    },
    cache_prefix: "examination_cache",
    collection_key: "examinations_cache",
    cache_scope: CacheScope::ByParentAndId,
    ttl: DEFAULT_CACHE_TTL,
    parent: Some(ParentLink {
        field: "patient_id",
        entity: &PATIENT,
    }),
    natural_key: &[],
    mutable_fields: &["report"],
};

pub static BILLING: EntityDescriptor = EntityDescriptor {
    name: "billing",
    table: "billing",
    id_field: "billing_id",
    id_scheme: IdScheme::Prefixed {
        prefix: "PB",
        sequence: "billing_id_seq",
        width: 6,
    },
    cache_prefix: "billing_cache",
    collection_key: "billings_cache",
    cache_scope: CacheScope::ById,
    ttl: DEFAULT_CACHE_TTL,
    parent: Some(ParentLink {
        field: "patient_id",
        entity: &PATIENT,
    }),
    natural_key: &[],
    mutable_fields: &[
        "doctor_id",
        "procedure",
        "billing_amount",
        "paid_cash_amount",
        "paid_insurance_amount",
        "balance",
        "total_received",
    ],
};

pub static TREATMENT_PLAN: EntityDescriptor = EntityDescriptor {
    name: "treatment_plan",
    table: "treatment_plan",
    id_field: "id",
    id_scheme: IdScheme::Serial {
        sequence: "treatment_plan_id_seq",
    },
    cache_prefix: "treatment_plan_cache",
    collection_key: "treatment_plans_cache",
    cache_scope: CacheScope::ByParentAndId,
    ttl: DEFAULT_CACHE_TTL,
    parent: Some(ParentLink {
        field: "patient_id",
        entity: &PATIENT,
    }),
    natural_key: &[],
    mutable_fields: &["plan"],
};

pub static APPOINTMENT: EntityDescriptor = EntityDescriptor {
    name: "appointment",
    table: "appointment",
    id_field: "id",
    id_scheme: IdScheme::Serial {
        sequence: "appointment_id_seq",
    },
    cache_prefix: "appointment_cache",
    collection_key: "appointments_cache",
    cache_scope: CacheScope::ByParentAndId,
    ttl: DEFAULT_CACHE_TTL,
    parent: Some(ParentLink {
        field: "patient_id",
        entity: &PATIENT,
    }),
    natural_key: &["patient_id", "doctor_id", "date_time"],
    mutable_fields: &["doctor_id", "date_time", "status"],
};

/// Every descriptor, root and standalone types first.
pub static ALL_DESCRIPTORS: [&EntityDescriptor; 8] = [
    &PATIENT,
    &DOCTOR,
    &INSURANCE_COMPANY,
    &EMERGENCY_CONTACT,
    &EXAMINATION,
    &BILLING,
    &TREATMENT_PLAN,
    &APPOINTMENT,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Sex {
    Male,
    Female,
    Other,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AppointmentStatus {
    #[default]
    Scheduled,
    Fulfilled,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Patient {
    #[serde(default)]
    pub id: String,
    pub first_name: String,
    #[serde(default)]
    pub middle_name: String,
    pub last_name: String,
    pub sex: Sex,
    pub date_of_birth: String,
    #[serde(default)]
    pub insured: bool,
    #[serde(default)]
    pub cash: bool,
    #[serde(default)]
    pub insurance_company: String,
    #[serde(default)]
    pub scheme: String,
    #[serde(default)]
    pub cover_limit: f64,
    #[serde(default)]
    pub occupation: String,
    #[serde(default)]
    pub place_of_work: String,
    #[serde(default)]
    pub phone: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub address: String,
    #[serde(
        default,
        with = "time::serde::rfc3339::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub created_at: Option<OffsetDateTime>,
}

impl Patient {
    pub fn new(
        first_name: impl Into<String>,
        last_name: impl Into<String>,
        sex: Sex,
        date_of_birth: impl Into<String>,
    ) -> Self {
        Self {
            id: String::new(),
            first_name: first_name.into(),
            middle_name: String::new(),
            last_name: last_name.into(),
            sex,
            date_of_birth: date_of_birth.into(),
            insured: false,
            cash: true,
            insurance_company: String::new(),
            scheme: String::new(),
            cover_limit: 0.0,
            occupation: String::new(),
            place_of_work: String::new(),
            phone: String::new(),
            email: String::new(),
            address: String::new(),
            created_at: None,
        }
    }
}

impl Entity for Patient {
    fn descriptor() -> &'static EntityDescriptor {
        &PATIENT
    }

    fn id(&self) -> &str {
        &self.id
    }

    fn set_id(&mut self, id: String) {
        self.id = id;
    }

    fn set_created_at(&mut self, at: OffsetDateTime) {
        self.created_at = Some(at);
    }

    fn normalize(&mut self) {
        if self.middle_name.trim().is_empty() {
            self.middle_name = MISSING_MIDDLE_NAME.to_string();
        }
    }

    fn validate(&self) -> Result<()> {
        require_text("patient", "first_name", &self.first_name)?;
        require_text("patient", "last_name", &self.last_name)?;
        require_text("patient", "date_of_birth", &self.date_of_birth)?;
        if self.cover_limit < 0.0 {
            return Err(CoreError::validation("patient", "cover_limit must not be negative"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Doctor {
    #[serde(default)]
    pub id: String,
    pub first_name: String,
    pub last_name: String,
    #[serde(
        default,
        with = "time::serde::rfc3339::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub created_at: Option<OffsetDateTime>,
}

impl Doctor {
    pub fn new(first_name: impl Into<String>, last_name: impl Into<String>) -> Self {
        Self {
            first_name: first_name.into(),
            last_name: last_name.into(),
            ..Default::default()
        }
    }
}

impl Entity for Doctor {
    fn descriptor() -> &'static EntityDescriptor {
        &DOCTOR
    }

    fn id(&self) -> &str {
        &self.id
    }

    fn set_id(&mut self, id: String) {
        self.id = id;
    }

    fn set_created_at(&mut self, at: OffsetDateTime) {
        self.created_at = Some(at);
    }

    fn validate(&self) -> Result<()> {
        require_text("doctor", "first_name", &self.first_name)?;
        require_text("doctor", "last_name", &self.last_name)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InsuranceCompany {
    #[serde(default)]
    pub id: String,
    pub name: String,
}

impl InsuranceCompany {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: String::new(),
            name: name.into(),
        }
    }
}

impl Entity for InsuranceCompany {
    fn descriptor() -> &'static EntityDescriptor {
        &INSURANCE_COMPANY
    }

    fn id(&self) -> &str {
        &self.id
    }

    fn set_id(&mut self, id: String) {
        self.id = id;
    }

    fn validate(&self) -> Result<()> {
        require_text("insurance_company", "name", &self.name)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EmergencyContact {
    #[serde(default)]
    pub id: String,
    pub patient_id: String,
    pub name: String,
    pub phone: String,
    pub relationship: String,
}

impl EmergencyContact {
    pub fn new(
        patient_id: impl Into<String>,
        name: impl Into<String>,
        phone: impl Into<String>,
        relationship: impl Into<String>,
    ) -> Self {
        Self {
            id: String::new(),
            patient_id: patient_id.into(),
            name: name.into(),
            phone: phone.into(),
            relationship: relationship.into(),
        }
    }
}

impl Entity for EmergencyContact {
    fn descriptor() -> &'static EntityDescriptor {
        &EMERGENCY_CONTACT
    }

    fn id(&self) -> &str {
        &self.id
    }

    fn set_id(&mut self, id: String) {
        self.id = id;
    }

    fn parent_id(&self) -> Option<&str> {
        Some(&self.patient_id)
    }

    fn validate(&self) -> Result<()> {
        require_text("emergency_contact", "name", &self.name)?;
        require_text("emergency_contact", "phone", &self.phone)?;
        require_text("emergency_contact", "relationship", &self.relationship)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Examination {
    #[serde(default)]
    pub id: String,
    pub patient_id: String,
    pub report: String,
    #[serde(
        default,
        with = "time::serde::rfc3339::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub created_at: Option<OffsetDateTime>,
}

impl Examination {
    pub fn new(patient_id: impl Into<String>, report: impl Into<String>) -> Self {
        Self {
            patient_id: patient_id.into(),
            report: report.into(),
            ..Default::default()
        }
    }
}

impl Entity for Examination {
    fn descriptor() -> &'static EntityDescriptor {
        &EXAMINATION
    }

    fn id(&self) -> &str {
        &self.id
    }

    fn set_id(&mut self, id: String) {
        self.id = id;
    }

    fn parent_id(&self) -> Option<&str> {
        Some(&self.patient_id)
    }

    fn set_created_at(&mut self, at: OffsetDateTime) {
        self.created_at = Some(at);
    }

    fn validate(&self) -> Result<()> {
        require_text("examination", "report", &self.report)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Billing {
    #[serde(default)]
    pub billing_id: String,
    pub patient_id: String,
    pub doctor_id: String,
    pub procedure: String,
    pub billing_amount: f64,
    #[serde(default)]
    pub paid_cash_amount: f64,
    #[serde(default)]
    pub paid_insurance_amount: f64,
    #[serde(default)]
    pub balance: f64,
    #[serde(default)]
    pub total_received: f64,
    #[serde(
        default,
        with = "time::serde::rfc3339::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub created_at: Option<OffsetDateTime>,
}

impl Billing {
    pub fn new(
        patient_id: impl Into<String>,
        doctor_id: impl Into<String>,
        procedure: impl Into<String>,
        billing_amount: f64,
    ) -> Self {
        Self {
            patient_id: patient_id.into(),
            doctor_id: doctor_id.into(),
            procedure: procedure.into(),
            billing_amount,
            ..Default::default()
        }
    }
}

impl Entity for Billing {
    fn descriptor() -> &'static EntityDescriptor {
        &BILLING
    }

    fn id(&self) -> &str {
        &self.billing_id
    }

    fn set_id(&mut self, id: String) {
        self.billing_id = id;
    }

    fn parent_id(&self) -> Option<&str> {
        Some(&self.patient_id)
    }

    fn set_created_at(&mut self, at: OffsetDateTime) {
        self.created_at = Some(at);
    }

    fn normalize(&mut self) {
        self.total_received = self.paid_cash_amount + self.paid_insurance_amount;
        self.balance = self.billing_amount - self.total_received;
    }

    fn validate(&self) -> Result<()> {
        require_text("billing", "procedure", &self.procedure)?;
        require_text("billing", "doctor_id", &self.doctor_id)?;
        if self.billing_amount < 0.0
            || self.paid_cash_amount < 0.0
            || self.paid_insurance_amount < 0.0
        {
            return Err(CoreError::validation("billing", "amounts must not be negative"));
        }
        Ok(())
    }

    fn references(&self) -> Vec<(&'static EntityDescriptor, String)> {
        vec![(&DOCTOR, self.doctor_id.clone())]
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TreatmentPlan {
    #[serde(default)]
    pub id: String,
    pub patient_id: String,
    pub plan: String,
    #[serde(
        default,
        with = "time::serde::rfc3339::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub created_at: Option<OffsetDateTime>,
}

impl TreatmentPlan {
    pub fn new(patient_id: impl Into<String>, plan: impl Into<String>) -> Self {
        Self {
            patient_id: patient_id.into(),
            plan: plan.into(),
            ..Default::default()
        }
    }
}

impl Entity for TreatmentPlan {
    fn descriptor() -> &'static EntityDescriptor {
        &TREATMENT_PLAN
    }

    fn id(&self) -> &str {
        &self.id
    }

    fn set_id(&mut self, id: String) {
        self.id = id;
    }

    fn parent_id(&self) -> Option<&str> {
        Some(&self.patient_id)
    }

    fn set_created_at(&mut self, at: OffsetDateTime) {
        self.created_at = Some(at);
    }

    fn validate(&self) -> Result<()> {
        require_text("treatment_plan", "plan", &self.plan)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Appointment {
    #[serde(default)]
    pub id: String,
    pub patient_id: String,
    pub doctor_id: String,
    pub date_time: String,
    #[serde(default)]
    pub status: AppointmentStatus,
    #[serde(
        default,
        with = "time::serde::rfc3339::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub created_at: Option<OffsetDateTime>,
}

impl Appointment {
    pub fn new(
        patient_id: impl Into<String>,
        doctor_id: impl Into<String>,
        date_time: impl Into<String>,
    ) -> Self {
        Self {
            patient_id: patient_id.into(),
            doctor_id: doctor_id.into(),
            date_time: date_time.into(),
            ..Default::default()
        }
    }
}

impl Entity for Appointment {
    fn descriptor() -> &'static EntityDescriptor {
        &APPOINTMENT
    }

    fn id(&self) -> &str {
        &self.id
    }

    fn set_id(&mut self, id: String) {
        self.id = id;
    }

    fn parent_id(&self) -> Option<&str> {
        Some(&self.patient_id)
    }

    fn set_created_at(&mut self, at: OffsetDateTime) {
        self.created_at = Some(at);
    }

    fn validate(&self) -> Result<()> {
        require_text("appointment", "doctor_id", &self.doctor_id)?;
        require_text("appointment", "date_time", &self.date_time)
    }

    fn references(&self) -> Vec<(&'static EntityDescriptor, String)> {
        vec![(&DOCTOR, self.doctor_id.clone())]
    }
}
