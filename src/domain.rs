use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::EgaError;

static RE_STUDY: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^EGAS\d{11}$").unwrap());
static RE_POLICY: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^EGAP\d{11}$").unwrap());
static RE_ANALYSIS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^EGAZ\d{11}$").unwrap());

fn validated(value: &str, pattern: &Regex) -> Result<String, EgaError> {
    let trimmed = value.trim();
    if !pattern.is_match(trimmed) {
        return Err(EgaError::InvalidAccession {
            value: value.to_string(),
            pattern: pattern.as_str().to_string(),
        });
    }
    Ok(trimmed.to_string())
}

/// EGA study accession, e.g. EGAS00001000001
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StudyAccession(String);

impl StudyAccession {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StudyAccession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for StudyAccession {
    type Err = EgaError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Ok(Self(validated(value, &RE_STUDY)?))
    }
}

/// EGA data access policy accession, e.g. EGAP00001000001
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PolicyAccession(String);

impl PolicyAccession {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PolicyAccession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for PolicyAccession {
    type Err = EgaError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Ok(Self(validated(value, &RE_POLICY)?))
    }
}

/// EGA analysis accession, e.g. EGAZ00001000001
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AnalysisAccession(String);

impl AnalysisAccession {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AnalysisAccession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for AnalysisAccession {
    type Err = EgaError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Ok(Self(validated(value, &RE_ANALYSIS)?))
    }
}

/// The metadata schema kinds the archive accepts in one submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SchemaKind {
    Analysis,
    Dataset,
    Sample,
    Study,
    Policy,
}

impl SchemaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SchemaKind::Analysis => "analysis",
            SchemaKind::Dataset => "dataset",
            SchemaKind::Sample => "sample",
            SchemaKind::Study => "study",
            SchemaKind::Policy => "policy",
        }
    }

    /// Multipart form field name for this schema in a submission request.
    pub fn form_name(&self) -> String {
        self.as_str().to_uppercase()
    }

    /// REST resource collection holding entities of this kind. Most kinds
    /// pluralize regularly; analysis, study and policy do not.
    pub fn archive_path(&self) -> String {
        match self {
            SchemaKind::Analysis => "analyses".to_string(),
            SchemaKind::Study => "studies".to_string(),
            SchemaKind::Policy => "policies".to_string(),
            other => format!("{}s", other.as_str()),
        }
    }
}

impl fmt::Display for SchemaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for SchemaKind {
    type Err = EgaError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "analysis" => Ok(SchemaKind::Analysis),
            "dataset" => Ok(SchemaKind::Dataset),
            "sample" => Ok(SchemaKind::Sample),
            "study" => Ok(SchemaKind::Study),
            "policy" => Ok(SchemaKind::Policy),
            _ => Err(EgaError::InvalidSchemaKind(value.to_string())),
        }
    }
}
