use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};

use crate::config::LookupSources;
use crate::domain::{Organization, Person, ProvenanceRecord, RefCodeRecord, RunId, SampleRun};
use crate::error::CrateError;

pub trait LookupService: Send + Sync {
    fn resolve_ref_code(&self, run_id: &RunId) -> Result<RefCodeRecord, CrateError>;
    fn resolve_provenance(&self, ref_code: &str) -> Result<ProvenanceRecord, CrateError>;
    fn resolve_ena_accession(&self, ref_code: &str, batch_number: u32)
    -> Result<String, CrateError>;
    fn resolve_source_mat_id(&self, source_mat_id: &str) -> Result<SampleRun, CrateError>;
}

#[derive(Debug, Clone, Default)]
pub struct InMemoryLookup {
    runs: HashMap<String, RefCodeRecord>,
    provenance: HashMap<String, Vec<ProvenanceRecord>>,
    accessions: HashMap<(String, u32), String>,
}

impl InMemoryLookup {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_run(mut self, run_id: &str, record: RefCodeRecord) -> Self {
        self.runs.insert(run_id.to_string(), record);
        self
    }

    pub fn with_provenance(mut self, ref_code: &str, record: ProvenanceRecord) -> Self {
        self.provenance
            .entry(ref_code.to_string())
            .or_default()
            .push(record);
        self
    }

    pub fn with_accession(mut self, ref_code: &str, batch_number: u32, accession: &str) -> Self {
        self.accessions
            .insert((ref_code.to_string(), batch_number), accession.to_string());
        self
    }
}

impl LookupService for InMemoryLookup {
    fn resolve_ref_code(&self, run_id: &RunId) -> Result<RefCodeRecord, CrateError> {
        self.runs
            .get(run_id.as_str())
            .cloned()
            .ok_or_else(|| CrateError::RunNotFound(run_id.to_string()))
    }

    fn resolve_provenance(&self, ref_code: &str) -> Result<ProvenanceRecord, CrateError> {
        match self.provenance.get(ref_code).map(Vec::as_slice) {
            None | Some([]) => Err(not_found("provenance", ref_code)),
            Some([record]) => Ok(record.clone()),
            Some(records) => Err(CrateError::AmbiguousRecord {
                table: "provenance".to_string(),
                key: ref_code.to_string(),
                count: records.len(),
            }),
        }
    }

    fn resolve_ena_accession(
        &self,
        ref_code: &str,
        batch_number: u32,
    ) -> Result<String, CrateError> {
        self.accessions
            .get(&(ref_code.to_string(), batch_number))
            .cloned()
            .ok_or_else(|| not_found("ena-accession", &format!("{ref_code} (batch {batch_number})")))
    }

    fn resolve_source_mat_id(&self, source_mat_id: &str) -> Result<SampleRun, CrateError> {
        let mut matches = self
            .runs
            .iter()
            .filter(|(_, record)| record.source_mat_id.as_deref() == Some(source_mat_id))
            .collect::<Vec<_>>();
        matches.sort_by(|(a_run, a), (b_run, b)| {
            a.batch_number.cmp(&b.batch_number).then(a_run.cmp(b_run))
        });
        let (run_id, record) = matches
            .first()
            .ok_or_else(|| not_found("run-information", source_mat_id))?;
        Ok(SampleRun {
            source_mat_id: source_mat_id.to_string(),
            run_id: run_id.parse()?,
            ref_code: record.ref_code.clone(),
            batch_number: record.batch_number,
        })
    }
}

#[derive(Debug, Clone)]
pub struct Table {
    source: String,
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
}

impl Table {
    pub fn parse(source: &str, bytes: &[u8]) -> Result<Self, CrateError> {
        let text = decode_text(bytes);
        let mut reader = csv::ReaderBuilder::new()
            .flexible(true)
            .from_reader(text.as_bytes());
        let headers = reader
            .headers()
            .map_err(|err| CrateError::LookupHttp(format!("{source}: {err}")))?
            .iter()
            .map(|header| header.trim().to_string())
            .collect();
        let mut rows = Vec::new();
        for record in reader.records() {
            let record = record.map_err(|err| CrateError::LookupHttp(format!("{source}: {err}")))?;
            rows.push(record.iter().map(|cell| cell.trim().to_string()).collect());
        }
        Ok(Self {
            source: source.to_string(),
            headers,
            rows,
        })
    }

    pub fn column(&self, name: &str) -> Result<usize, CrateError> {
        self.optional_column(name)
            .ok_or_else(|| CrateError::MissingColumn {
                source_name: self.source.clone(),
                column: name.to_string(),
            })
    }

    fn optional_column(&self, name: &str) -> Option<usize> {
        self.headers.iter().position(|header| header == name)
    }

    pub fn rows(&self) -> &[Vec<String>] {
        &self.rows
    }

    fn cell<'a>(row: &'a [String], index: usize) -> &'a str {
        row.get(index).map(String::as_str).unwrap_or("")
    }

    fn optional_cell(row: &[String], index: Option<usize>) -> Option<String> {
        index
            .map(|index| Self::cell(row, index))
            .filter(|value| !value.is_empty())
            .map(str::to_string)
    }
}

pub struct CsvLookup {
    client: Client,
    sources: LookupSources,
    tables: Mutex<HashMap<String, Arc<Table>>>,
}

impl CsvLookup {
    pub fn new(sources: LookupSources) -> Result<Self, CrateError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("mgf-crate/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| CrateError::LookupHttp(err.to_string()))?,
        );
        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|err| CrateError::LookupHttp(err.to_string()))?;
        Ok(Self {
            client,
            sources,
            tables: Mutex::new(HashMap::new()),
        })
    }

    fn table(&self, source: &str) -> Result<Arc<Table>, CrateError> {
        if let Some(table) = self
            .tables
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(source)
        {
            return Ok(Arc::clone(table));
        }
        tracing::info!("reading {source}");
        let bytes = self.fetch(source)?;
        let table = Arc::new(Table::parse(source, &bytes)?);
        self.tables
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(source.to_string(), Arc::clone(&table));
        Ok(table)
    }

    fn fetch(&self, source: &str) -> Result<Vec<u8>, CrateError> {
        if !(source.starts_with("http://") || source.starts_with("https://")) {
            let path = source.strip_prefix("file://").unwrap_or(source);
            return fs::read(Path::new(path))
                .map_err(|err| CrateError::LookupHttp(format!("{source}: {err}")));
        }
        let response = self
            .client
            .get(source)
            .send()
            .map_err(|err| CrateError::LookupHttp(err.to_string()))?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response
                .text()
                .unwrap_or_else(|_| "lookup request failed".to_string());
            return Err(CrateError::LookupStatus { status, message });
        }
        let bytes = response
            .bytes()
            .map_err(|err| CrateError::LookupHttp(err.to_string()))?;
        Ok(bytes.to_vec())
    }
}

impl LookupService for CsvLookup {
    fn resolve_ref_code(&self, run_id: &RunId) -> Result<RefCodeRecord, CrateError> {
        let mut matches = Vec::new();
        for (index, source) in self.sources.run_information.iter().enumerate() {
            let table = self.table(source)?;
            let reads = table.column("reads_name")?;
            let ref_code = table.column("ref_code")?;
            let source_mat_id = table.optional_column("source_mat_id");
            for row in table.rows() {
                let reads_name = Table::cell(row, reads);
                // not every registered sample went to sequencing
                if reads_name.is_empty() {
                    continue;
                }
                if reads_name.rsplit('_').next() != Some(run_id.as_str()) {
                    continue;
                }
                let prefix = reads_name
                    .split_once('_')
                    .map(|(prefix, _)| prefix)
                    .unwrap_or("");
                let code = Table::cell(row, ref_code);
                if code.is_empty() {
                    return Err(not_found("run-information.ref_code", run_id.as_str()));
                }
                if prefix.is_empty() {
                    return Err(not_found("run-information.prefix", run_id.as_str()));
                }
                matches.push(RefCodeRecord {
                    ref_code: code.to_string(),
                    prefix: prefix.to_string(),
                    batch_number: index as u32 + 1,
                    source_mat_id: Table::optional_cell(row, source_mat_id),
                });
            }
        }
        let Some(first) = matches.first() else {
            return Err(CrateError::RunNotFound(run_id.to_string()));
        };
        if matches.iter().any(|other| other.ref_code != first.ref_code) {
            return Err(CrateError::AmbiguousRecord {
                table: "run-information".to_string(),
                key: run_id.to_string(),
                count: matches.len(),
            });
        }
        Ok(first.clone())
    }

    fn resolve_provenance(&self, ref_code: &str) -> Result<ProvenanceRecord, CrateError> {
        let source = self
            .sources
            .provenance
            .as_deref()
            .ok_or_else(|| CrateError::MissingConfigKey("lookup.provenance".to_string()))?;
        let table = self.table(source)?;
        let key = table.column("ref_code")?;
        let rows = table
            .rows()
            .iter()
            .filter(|row| Table::cell(row, key) == ref_code)
            .collect::<Vec<_>>();
        let row = match rows.as_slice() {
            [] => return Err(not_found("provenance", ref_code)),
            [row] => *row,
            _ => {
                return Err(CrateError::AmbiguousRecord {
                    table: "provenance".to_string(),
                    key: ref_code.to_string(),
                    count: rows.len(),
                });
            }
        };

        let required = |column: &str| -> Result<String, CrateError> {
            let value = Table::cell(row, table.column(column)?);
            if value.is_empty() {
                return Err(not_found(&format!("provenance.{column}"), ref_code));
            }
            Ok(value.to_string())
        };
        let optional = |column: &str| Table::optional_cell(row, table.optional_column(column));

        Ok(ProvenanceRecord {
            sampling_person: Person {
                name: required("sampling_person")?,
                identifier: optional("sampling_person_orcid"),
            },
            sampling_institution: Organization {
                name: required("sampling_institution")?,
                identifier: optional("sampling_institution_ror"),
            },
            creator_person: Person {
                name: required("creator_person")?,
                identifier: optional("creator_person_orcid"),
            },
            creator_institution: Organization {
                name: required("creator_institution")?,
                identifier: optional("creator_institution_ror"),
            },
            software_version: required("software_version")?,
        })
    }

    fn resolve_ena_accession(
        &self,
        ref_code: &str,
        batch_number: u32,
    ) -> Result<String, CrateError> {
        let key = format!("{ref_code} (batch {batch_number})");
        let source = (batch_number as usize)
            .checked_sub(1)
            .and_then(|index| self.sources.ena_accessions.get(index))
            .ok_or_else(|| not_found("ena-accession table", &key))?;
        let table = self.table(source)?;
        let ref_column = table.column("ref_code")?;
        let accession = table.column("accession_number")?;
        table
            .rows()
            .iter()
            .find(|row| Table::cell(row, ref_column) == ref_code)
            .map(|row| Table::cell(row, accession).to_string())
            .filter(|value| !value.is_empty())
            .ok_or_else(|| not_found("ena-accession", &key))
    }

    fn resolve_source_mat_id(&self, source_mat_id: &str) -> Result<SampleRun, CrateError> {
        for (index, source) in self.sources.run_information.iter().enumerate() {
            let table = self.table(source)?;
            let reads = table.column("reads_name")?;
            let ref_code = table.column("ref_code")?;
            let sample = table.column("source_mat_id")?;
            let found = table.rows().iter().find(|row| {
                !Table::cell(row, reads).is_empty() && Table::cell(row, sample) == source_mat_id
            });
            let Some(row) = found else {
                continue;
            };
            let code = Table::cell(row, ref_code);
            if code.is_empty() {
                return Err(not_found("run-information.ref_code", source_mat_id));
            }
            let reads_name = Table::cell(row, reads);
            return Ok(SampleRun {
                source_mat_id: source_mat_id.to_string(),
                run_id: reads_name.rsplit('_').next().unwrap_or(reads_name).parse()?,
                ref_code: code.to_string(),
                batch_number: index as u32 + 1,
            });
        }
        Err(not_found("run-information", source_mat_id))
    }
}

fn not_found(table: &str, key: &str) -> CrateError {
    CrateError::RecordNotFound {
        table: table.to_string(),
        key: key.to_string(),
    }
}

fn decode_text(bytes: &[u8]) -> String {
    match std::str::from_utf8(bytes) {
        Ok(text) => text.to_string(),
        Err(_) => bytes.iter().map(|&byte| byte as char).collect(),
    }
}
