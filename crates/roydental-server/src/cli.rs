use clap::{Parser, Subcommand, ValueEnum};

#[derive(Parser)]
#[command(name = "roydental", about = "RoyDental data-access administration", version)]
pub struct Cli {
    /// Path to the TOML configuration file
    #[arg(long, short = 'c', env = "ROYDENTAL_CONFIG")]
    pub config: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create tables and id sequences in PostgreSQL
    Migrate,
    /// Verify backing store and cache connectivity
    Check,
    /// Print one record as JSON
    Get {
        entity: EntityKind,
        id: String,
        /// Owning patient, for patient-scoped records
        #[arg(long)]
        parent: Option<String>,
    },
    /// Print every record of a type as JSON, newest first
    List { entity: EntityKind },
    /// Print a patient with all dependent records
    Chart { patient_id: String },
    /// Delete a patient and every record that belongs to it
    PurgePatient { patient_id: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum EntityKind {
    Patient,
    Doctor,
    InsuranceCompany,
    EmergencyContact,
    Examination,
    Billing,
    TreatmentPlan,
    Appointment,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_get_with_parent() {
        let cli = Cli::parse_from([
            "roydental",
            "get",
            "emergency-contact",
            "4",
            "--parent",
            "DP-000001",
        ]);
        match cli.command {
            Commands::Get { entity, id, parent } => {
                assert_eq!(entity, EntityKind::EmergencyContact);
                assert_eq!(id, "4");
                assert_eq!(parent.as_deref(), Some("DP-000001"));
            }
            _ => panic!("expected get"),
        }
    }

    #[test]
    fn test_parse_purge() {
        let cli = Cli::parse_from(["roydental", "-c", "clinic.toml", "purge-patient", "DP-000001"]);
        assert_eq!(cli.config.as_deref(), Some("clinic.toml"));
        assert!(matches!(cli.command, Commands::PurgePatient { ref patient_id } if patient_id == "DP-000001"));
    }
}
