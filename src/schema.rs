use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::util;

// ------------------------------------------------------------
// Channel handle
// ------------------------------------------------------------
//
// A channel identifier that the message source successfully
// resolved at startup. Immutable for the rest of the run.
//
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelHandle {
    /// Identifier exactly as configured (e.g. "https://t.me/xyz")
    pub channel_ref: String,

    /// Human readable title reported by the source
    pub display_name: String,
}

// ------------------------------------------------------------
// Raw message
// ------------------------------------------------------------
//
// One unit of source text, produced by historical replay or by
// the live subscription. Consumed exactly once by extraction.
//
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawMessage {
    pub channel_ref: String,

    /// Delivery instant (UTC)
    pub timestamp: DateTime<Utc>,

    /// Message body, never blank
    pub text: String,
}

impl RawMessage {
    /// Builds a message, returning `None` for blank text.
    ///
    /// Blank messages (media-only posts, service messages) carry
    /// nothing to extract and are filtered before the pipeline.
    pub fn new(
        channel_ref: impl Into<String>,
        timestamp: DateTime<Utc>,
        text: impl Into<String>,
    ) -> Option<Self> {
        let text = text.into();
        if text.trim().is_empty() {
            return None;
        }

        Some(Self {
            channel_ref: channel_ref.into(),
            timestamp,
            text,
        })
    }
}

/// Where a message entered the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageOrigin {
    Replay,
    Live,
}

// ------------------------------------------------------------
// Job fields
// ------------------------------------------------------------
//
// The canonical field order is also the sink column order:
//
//   company_name, job_role, ctc, years_of_experience,
//   passout_year, application_link
//
// IMPORTANT:
// - Reordering variants changes the row layout of every sink.
// - `key()` values are the JSON keys requested from extraction.
//
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobField {
    CompanyName,
    JobRole,
    Ctc,
    YearsOfExperience,
    PassoutYear,
    ApplicationLink,
}

impl JobField {
    pub const ALL: [JobField; 6] = [
        JobField::CompanyName,
        JobField::JobRole,
        JobField::Ctc,
        JobField::YearsOfExperience,
        JobField::PassoutYear,
        JobField::ApplicationLink,
    ];

    pub fn key(self) -> &'static str {
        match self {
            JobField::CompanyName => "company_name",
            JobField::JobRole => "job_role",
            JobField::Ctc => "ctc",
            JobField::YearsOfExperience => "years_of_experience",
            JobField::PassoutYear => "passout_year",
            JobField::ApplicationLink => "application_link",
        }
    }

    /// Column header / prompt label
    pub fn label(self) -> &'static str {
        match self {
            JobField::CompanyName => "Company Name",
            JobField::JobRole => "Job Role",
            JobField::Ctc => "CTC (Cost to Company / Salary)",
            JobField::YearsOfExperience => "Years of Experience",
            JobField::PassoutYear => "Passout Year",
            JobField::ApplicationLink => "Application Link",
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            JobField::CompanyName => "The name of the company.",
            JobField::JobRole => "The specific job role or position.",
            JobField::Ctc => "The Cost to Company or salary information (e.g., 10-15 LPA).",
            JobField::YearsOfExperience => "The required years of experience for the job.",
            JobField::PassoutYear => "The passout year of the candidate.",
            JobField::ApplicationLink => "The URL or link to apply for the job.",
        }
    }

    /// Fields that decide whether a record is a posting at all.
    pub fn is_primary(self) -> bool {
        matches!(
            self,
            JobField::CompanyName | JobField::JobRole | JobField::Ctc | JobField::ApplicationLink
        )
    }
}

// ------------------------------------------------------------
// Field schema
// ------------------------------------------------------------
//
// The configured subset of `JobField`, always in canonical
// order and always containing company name and job role.
// Extraction, validation and row layout all read from the same
// schema so they can never disagree.
//
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldSchema {
    fields: Vec<JobField>,
}

impl FieldSchema {
    pub fn all() -> Self {
        Self {
            fields: JobField::ALL.to_vec(),
        }
    }

    pub fn from_config(selected: Option<&[JobField]>) -> Self {
        let Some(selected) = selected else {
            return Self::all();
        };

        let fields = JobField::ALL
            .into_iter()
            .filter(|f| {
                matches!(f, JobField::CompanyName | JobField::JobRole) || selected.contains(f)
            })
            .collect();

        Self { fields }
    }

    pub fn fields(&self) -> &[JobField] {
        &self.fields
    }

    pub fn header(&self) -> Vec<String> {
        self.fields.iter().map(|f| f.label().to_string()).collect()
    }
}

impl Default for FieldSchema {
    fn default() -> Self {
        Self::all()
    }
}

// ------------------------------------------------------------
// Job record
// ------------------------------------------------------------
//
// Structured extraction result. Either the all-empty sentinel
// (nothing extracted) or a record with at least one primary
// field set. `ExtractionAdapter` is the only producer.
//
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobRecord {
    pub company_name: String,
    pub job_role: String,
    pub ctc: String,
    pub years_of_experience: String,
    pub passout_year: String,
    pub application_link: String,
}

impl JobRecord {
    /// The all-empty sentinel ("no posting found").
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn get(&self, field: JobField) -> &str {
        match field {
            JobField::CompanyName => &self.company_name,
            JobField::JobRole => &self.job_role,
            JobField::Ctc => &self.ctc,
            JobField::YearsOfExperience => &self.years_of_experience,
            JobField::PassoutYear => &self.passout_year,
            JobField::ApplicationLink => &self.application_link,
        }
    }

    pub fn set(&mut self, field: JobField, value: impl Into<String>) {
        let slot = match field {
            JobField::CompanyName => &mut self.company_name,
            JobField::JobRole => &mut self.job_role,
            JobField::Ctc => &mut self.ctc,
            JobField::YearsOfExperience => &mut self.years_of_experience,
            JobField::PassoutYear => &mut self.passout_year,
            JobField::ApplicationLink => &mut self.application_link,
        };
        *slot = value.into();
    }

    pub fn is_empty(&self) -> bool {
        JobField::ALL.iter().all(|f| self.get(*f).is_empty())
    }

    /// Ordered row values for the given schema.
    pub fn row(&self, schema: &FieldSchema) -> Vec<String> {
        schema
            .fields()
            .iter()
            .map(|f| self.get(*f).to_string())
            .collect()
    }
}

// ------------------------------------------------------------
// Replay window
// ------------------------------------------------------------
//
// Backfill boundary: start of the current UTC calendar day at
// process start. Computed once, never persisted.
//
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplayWindow {
    pub since: DateTime<Utc>,
}

impl ReplayWindow {
    pub fn starting_today(now: DateTime<Utc>) -> Self {
        Self {
            since: util::start_of_utc_day(now),
        }
    }

    pub fn contains(&self, ts: DateTime<Utc>) -> bool {
        ts >= self.since
    }
}
