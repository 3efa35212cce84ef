use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CrateError;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RunId(String);

impl RunId {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn from_archive_path(path: &Path) -> Result<Self, CrateError> {
        let name = path
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| CrateError::InvalidRunId(path.display().to_string()))?;
        let mut parts = name.rsplitn(3, '.');
        let (_, _, stem) = (parts.next(), parts.next(), parts.next());
        match stem {
            Some(stem) => stem.parse(),
            None => Err(CrateError::InvalidRunId(name.to_string())),
        }
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for RunId {
    type Err = CrateError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        let is_valid = !trimmed.is_empty()
            && !trimmed.contains(['/', '\\'])
            && trimmed != "."
            && trimmed != "..";
        if !is_valid {
            return Err(CrateError::InvalidRunId(value.to_string()));
        }
        Ok(Self(trimmed.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefCodeRecord {
    pub ref_code: String,
    pub prefix: String,
    pub batch_number: u32,
    #[serde(default)]
    pub source_mat_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SampleRun {
    pub source_mat_id: String,
    pub run_id: RunId,
    pub ref_code: String,
    pub batch_number: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Person {
    pub name: String,
    #[serde(default)]
    pub identifier: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Organization {
    pub name: String,
    #[serde(default)]
    pub identifier: Option<String>,
}

impl Organization {
    pub fn node_id(&self) -> String {
        self.identifier
            .clone()
            .unwrap_or_else(|| format!("#{}", slug(&self.name)))
    }
}

impl Person {
    pub fn node_id(&self) -> String {
        self.identifier
            .clone()
            .unwrap_or_else(|| format!("#{}", slug(&self.name)))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvenanceRecord {
    pub sampling_person: Person,
    pub sampling_institution: Organization,
    pub creator_person: Person,
    pub creator_institution: Organization,
    pub software_version: String,
}

fn slug(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut dash = false;
    for ch in value.trim().chars() {
        if ch.is_ascii_alphanumeric() {
            out.push(ch.to_ascii_lowercase());
            dash = false;
        } else if !dash && !out.is_empty() {
            out.push('-');
            dash = true;
        }
    }
    while out.ends_with('-') {
        out.pop();
    }
    out
}
