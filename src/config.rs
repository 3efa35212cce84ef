use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::error::CrateError;

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct RawConfig {
    #[serde(default)]
    pub run_parameter: Option<String>,
    #[serde(default)]
    pub metagoflow_version: Option<String>,
    #[serde(default, rename = "datePublished")]
    pub date_published: Option<DateField>,
    #[serde(default)]
    pub missing_files: Option<Vec<String>>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_yaml::Value>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(untagged)]
pub enum DateField {
    Flag(bool),
    Text(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatePublished {
    Today,
    Fixed(NaiveDate),
}

impl DatePublished {
    /// `Today` makes assembly non-idempotent: two builds on different days
    /// produce different documents.
    pub fn resolve(&self, today: NaiveDate) -> String {
        match self {
            DatePublished::Today => today.format("%Y-%m-%d").to_string(),
            DatePublished::Fixed(date) => date.format("%Y-%m-%d").to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RunConfig {
    pub run_parameter: String,
    pub metagoflow_version: String,
    pub date_published: DatePublished,
    pub missing_files: Vec<String>,
    pub extra: BTreeMap<String, String>,
}

impl RunConfig {
    pub fn workflow_file_name(&self) -> String {
        format!("{}.yml", self.run_parameter)
    }

    pub fn is_allowed_missing(&self, relative_path: &str) -> bool {
        let file_name = relative_path.rsplit('/').next().unwrap_or(relative_path);
        self.missing_files
            .iter()
            .any(|entry| entry == file_name || entry == relative_path)
    }

    pub fn placeholders(&self) -> BTreeMap<String, String> {
        let mut values = self.extra.clone();
        values.insert("run_parameter".to_string(), self.run_parameter.clone());
        values.insert(
            "metagoflow_version".to_string(),
            self.metagoflow_version.clone(),
        );
        values
    }
}

pub struct ConfigLoader;

impl ConfigLoader {
    pub fn resolve(path: &Path) -> Result<RunConfig, CrateError> {
        let content =
            fs::read_to_string(path).map_err(|_| CrateError::ConfigRead(path.to_path_buf()))?;
        Self::resolve_str(&content)
    }

    pub fn resolve_str(content: &str) -> Result<RunConfig, CrateError> {
        let raw: RawConfig = serde_yaml::from_str(content)
            .map_err(|err| CrateError::ConfigParse(err.to_string()))?;
        Self::resolve_config(raw)
    }

    pub fn resolve_config(raw: RawConfig) -> Result<RunConfig, CrateError> {
        let run_parameter = required_string("run_parameter", raw.run_parameter)?;
        if run_parameter.contains(['/', '\\']) {
            return Err(CrateError::InvalidConfigValue {
                key: "run_parameter".to_string(),
                message: "must be a bare name, not a path".to_string(),
            });
        }
        let metagoflow_version = required_string("metagoflow_version", raw.metagoflow_version)?;

        let date_published = match raw.date_published {
            None | Some(DateField::Flag(false)) => DatePublished::Today,
            Some(DateField::Flag(true)) => {
                return Err(CrateError::InvalidConfigValue {
                    key: "datePublished".to_string(),
                    message: "expected a YYYY-MM-DD date or false".to_string(),
                });
            }
            Some(DateField::Text(text)) => {
                let date = NaiveDate::parse_from_str(text.trim(), "%Y-%m-%d").map_err(|err| {
                    CrateError::InvalidConfigValue {
                        key: "datePublished".to_string(),
                        message: format!("{text:?}: {err}"),
                    }
                })?;
                DatePublished::Fixed(date)
            }
        };

        let missing_files = raw
            .missing_files
            .unwrap_or_default()
            .into_iter()
            .map(|name| name.trim().to_string())
            .filter(|name| !name.is_empty())
            .collect();

        let extra = raw
            .extra
            .into_iter()
            .filter_map(|(key, value)| scalar_to_string(&value).map(|value| (key, value)))
            .collect();

        Ok(RunConfig {
            run_parameter,
            metagoflow_version,
            date_published,
            missing_files,
            extra,
        })
    }
}

fn required_string(key: &str, value: Option<String>) -> Result<String, CrateError> {
    let value = value.ok_or_else(|| CrateError::MissingConfigKey(key.to_string()))?;
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(CrateError::InvalidConfigValue {
            key: key.to_string(),
            message: "must be a non-empty string".to_string(),
        });
    }
    Ok(trimmed.to_string())
}

fn scalar_to_string(value: &serde_yaml::Value) -> Option<String> {
    match value {
        serde_yaml::Value::String(text) => Some(text.clone()),
        serde_yaml::Value::Number(number) => Some(number.to_string()),
        serde_yaml::Value::Bool(flag) => Some(flag.to_string()),
        _ => None,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum PackageFormat {
    #[default]
    Directory,
    Zip,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum BatchPolicy {
    #[default]
    SkipBroken,
    SkipFailedRuns,
    FailFast,
}

impl BatchPolicy {
    pub fn skips(&self, error: &CrateError) -> bool {
        if matches!(error, CrateError::MissingCodec) {
            return false;
        }
        match self {
            BatchPolicy::SkipBroken => error.is_broken_archive(),
            BatchPolicy::SkipFailedRuns => true,
            BatchPolicy::FailFast => false,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LookupSources {
    #[serde(default = "default_run_information")]
    pub run_information: Vec<String>,
    #[serde(default)]
    pub provenance: Option<String>,
    #[serde(default)]
    pub ena_accessions: Vec<String>,
}

impl Default for LookupSources {
    fn default() -> Self {
        Self {
            run_information: default_run_information(),
            provenance: None,
            ena_accessions: Vec::new(),
        }
    }
}

pub fn default_run_information() -> Vec<String> {
    vec![
        "https://raw.githubusercontent.com/emo-bon/sequencing-crate/refs/heads/main/shipment/batch-001/run-information-batch-001.csv".to_string(),
        "https://raw.githubusercontent.com/emo-bon/sequencing-crate/refs/heads/main/shipment/batch-002/run-information-batch-002.csv".to_string(),
        "https://raw.githubusercontent.com/emo-bon/sequencing-logistics-crate/refs/heads/main/shipment/batch-003-0/run-information-batch-003.csv".to_string(),
    ]
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Settings {
    #[serde(default)]
    pub object_store_root: Option<String>,
    #[serde(default)]
    pub lookup: LookupSources,
    #[serde(default)]
    pub template: Option<PathBuf>,
    #[serde(default)]
    pub package_format: PackageFormat,
    #[serde(default)]
    pub preview_renderer: Option<String>,
    #[serde(default)]
    pub batch_policy: BatchPolicy,
}

impl Settings {
    pub fn load(path: Option<&Path>) -> Result<Self, CrateError> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let content =
            fs::read_to_string(path).map_err(|_| CrateError::ConfigRead(path.to_path_buf()))?;
        serde_yaml::from_str(&content).map_err(|err| CrateError::ConfigParse(err.to_string()))
    }

    pub fn require_object_store_root(&self) -> Result<&str, CrateError> {
        self.object_store_root
            .as_deref()
            .map(|root| root.trim_end_matches('/'))
            .filter(|root| !root.is_empty())
            .ok_or_else(|| CrateError::MissingConfigKey("object_store_root".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn date_sentinel_means_today() {
        let config = ConfigLoader::resolve_str(
            "run_parameter: green\nmetagoflow_version: v5.1\ndatePublished: false\n",
        )
        .unwrap();
        assert_eq!(config.date_published, DatePublished::Today);
        let today = NaiveDate::from_ymd_opt(2024, 3, 7).unwrap();
        assert_eq!(config.date_published.resolve(today), "2024-03-07");
    }

    #[test]
    fn fixed_date_is_parsed() {
        let config = ConfigLoader::resolve_str(
            "run_parameter: green\nmetagoflow_version: v5.1\ndatePublished: \"2023-02-14\"\n",
        )
        .unwrap();
        assert_eq!(
            config.date_published,
            DatePublished::Fixed(NaiveDate::from_ymd_opt(2023, 2, 14).unwrap())
        );
    }

    #[test]
    fn invalid_date_is_rejected() {
        let err = ConfigLoader::resolve_str(
            "run_parameter: green\nmetagoflow_version: v5.1\ndatePublished: yesterday\n",
        )
        .unwrap_err();
        assert_matches!(err, CrateError::InvalidConfigValue { key, .. } if key == "datePublished");
    }

    #[test]
    fn extra_scalars_become_placeholders() {
        let config = ConfigLoader::resolve_str(
            "run_parameter: green\nmetagoflow_version: v5.1\nobs_id: NRMCB\nreplicate: 2\n",
        )
        .unwrap();
        let values = config.placeholders();
        assert_eq!(values["obs_id"], "NRMCB");
        assert_eq!(values["replicate"], "2");
        assert_eq!(values["run_parameter"], "green");
    }

    #[test]
    fn policy_never_skips_missing_codec() {
        assert!(!BatchPolicy::SkipFailedRuns.skips(&CrateError::MissingCodec));
        assert!(BatchPolicy::SkipBroken.skips(&CrateError::BrokenArchive {
            archive: PathBuf::from("a.tar.bz2"),
            renamed_to: PathBuf::from("a.tar.bz2-broken"),
        }));
        assert!(!BatchPolicy::SkipBroken.skips(&CrateError::RunNotFound("x".to_string())));
    }
}
