use std::collections::HashSet;
use std::fs;
use std::path::Path;

use chrono::NaiveDate;
use serde_json::{Map, Value, json};

use crate::config::RunConfig;
use crate::domain::{ProvenanceRecord, RefCodeRecord, RunId};
use crate::error::CrateError;
use crate::manifest::{Manifest, ManifestEntry};
use crate::placeholder::Context;

pub const DEFAULT_TEMPLATE: &str = include_str!("../templates/ro-crate-metadata.json-template");

pub const DATASET_ROOT_INDEX: usize = 1;
pub const DATASET_ROOT_ID: &str = "./";
pub const SEQUENCE_CATEGORY_ID: &str = "sequence-categorisation/";
pub const DYNAMIC_ENCODING_FORMAT: &str = "application/gzip";

#[derive(Debug, Clone)]
pub struct MetadataTemplate {
    context: Value,
    graph: Vec<Value>,
}

impl MetadataTemplate {
    pub fn parse(content: &str) -> Result<Self, CrateError> {
        let document: Value = serde_json::from_str(content)
            .map_err(|err| CrateError::InvalidTemplate(err.to_string()))?;
        let Value::Object(mut document) = document else {
            return Err(CrateError::InvalidTemplate(
                "top level is not an object".to_string(),
            ));
        };
        let context = document
            .remove("@context")
            .ok_or_else(|| CrateError::InvalidTemplate("missing @context".to_string()))?;
        let graph = match document.remove("@graph") {
            Some(Value::Array(nodes)) => nodes,
            _ => {
                return Err(CrateError::InvalidTemplate(
                    "missing @graph array".to_string(),
                ));
            }
        };
        if graph.len() <= DATASET_ROOT_INDEX {
            return Err(CrateError::InvalidTemplate(format!(
                "@graph has {} nodes, dataset root expected at index {DATASET_ROOT_INDEX}",
                graph.len()
            )));
        }
        Ok(Self { context, graph })
    }

    pub fn load(path: &Path) -> Result<Self, CrateError> {
        let content = fs::read_to_string(path)
            .map_err(|err| CrateError::InvalidTemplate(format!("{}: {err}", path.display())))?;
        Self::parse(&content)
    }

    pub fn builtin() -> Result<Self, CrateError> {
        Self::parse(DEFAULT_TEMPLATE)
    }
}

pub struct AssemblyInput<'a> {
    pub run_id: &'a RunId,
    pub config: &'a RunConfig,
    pub manifest: &'a Manifest,
    pub record: &'a RefCodeRecord,
    pub provenance: &'a ProvenanceRecord,
    pub accession_number: &'a str,
    pub object_store_root: &'a str,
    pub today: NaiveDate,
}

impl AssemblyInput<'_> {
    pub fn context(&self) -> Context {
        let mut context = Context::new();
        context.extend(self.config.placeholders());
        context.insert("run_id", self.run_id.as_str());
        context.insert("ref_code", self.record.ref_code.as_str());
        context.insert("prefix", self.record.prefix.as_str());
        context.insert("batch_number", self.record.batch_number.to_string());
        context.insert(
            "source_mat_id",
            self.record
                .source_mat_id
                .as_deref()
                .unwrap_or(&self.record.ref_code),
        );
        context.insert("accession_number", self.accession_number);
        context.insert(
            "software_version",
            self.provenance.software_version.as_str(),
        );
        context.insert(
            "datePublished",
            self.config.date_published.resolve(self.today),
        );
        context
    }
}

#[derive(Debug, Clone)]
pub struct MetadataDocument {
    context: Value,
    graph: Vec<Value>,
}

impl MetadataDocument {
    pub fn to_value(&self) -> Value {
        json!({
            "@context": self.context,
            "@graph": self.graph,
        })
    }

    pub fn to_json_pretty(&self) -> Result<String, CrateError> {
        serde_json::to_string_pretty(&self.to_value())
            .map_err(|err| CrateError::Filesystem(err.to_string()))
    }
}

pub struct GraphAssembler {
    template: MetadataTemplate,
}

impl GraphAssembler {
    pub fn new(template: MetadataTemplate) -> Self {
        Self { template }
    }

    pub fn assemble(&self, input: &AssemblyInput<'_>) -> Result<MetadataDocument, CrateError> {
        let context = input.context();
        let mut graph = self.template.graph.clone();
        for node in &mut graph {
            context.substitute_tree(node)?;
        }

        set_dataset_root_fields(&mut graph, &context)?;
        prune_missing(&mut graph, input.manifest);
        attach_sequence_categorisation(&mut graph, input.manifest)?;
        inject_provenance(&mut graph, input.provenance);
        attach_download_urls(
            &mut graph,
            input.manifest,
            input.object_store_root,
            &input.record.ref_code,
        )?;
        ensure_unique_ids(&graph)?;

        tracing::debug!("assembled metadata graph with {} nodes", graph.len());
        Ok(MetadataDocument {
            context: self.template.context.clone(),
            graph,
        })
    }
}

fn node_id(node: &Value) -> Option<&str> {
    node.get("@id").and_then(Value::as_str)
}

fn reference(id: &str) -> Value {
    json!({ "@id": id })
}

fn dataset_root(graph: &mut [Value]) -> Result<&mut Map<String, Value>, CrateError> {
    let root = graph
        .get_mut(DATASET_ROOT_INDEX)
        .and_then(Value::as_object_mut)
        .ok_or_else(|| CrateError::InvalidTemplate("dataset root is not an object".to_string()))?;
    if root.get("@id").and_then(Value::as_str) != Some(DATASET_ROOT_ID) {
        return Err(CrateError::InvalidTemplate(format!(
            "node {DATASET_ROOT_INDEX} is not the {DATASET_ROOT_ID} dataset"
        )));
    }
    Ok(root)
}

fn set_dataset_root_fields(graph: &mut [Value], context: &Context) -> Result<(), CrateError> {
    let root = dataset_root(graph)?;
    let date = context
        .get("datePublished")
        .ok_or_else(|| CrateError::UnresolvedPlaceholder {
            token: "datePublished".to_string(),
            value: String::new(),
        })?;
    root.insert("datePublished".to_string(), Value::String(date.to_string()));
    Ok(())
}

/// Index of the node an entry describes: exact relative path first, then a
/// unique bare-filename match.
fn find_entry_node(graph: &[Value], entry: &ManifestEntry) -> Option<usize> {
    if let Some(index) = graph
        .iter()
        .position(|node| node_id(node) == Some(entry.path.as_str()))
    {
        return Some(index);
    }
    let mut by_name = graph
        .iter()
        .enumerate()
        .filter(|(_, node)| node_id(node) == Some(entry.file_name()));
    match (by_name.next(), by_name.next()) {
        (Some((index, _)), None) => Some(index),
        _ => None,
    }
}

fn prune_missing(graph: &mut Vec<Value>, manifest: &Manifest) {
    let mut removed = HashSet::new();
    for entry in manifest.missing() {
        if let Some(index) = find_entry_node(graph, entry) {
            if let Some(id) = node_id(&graph[index]) {
                removed.insert(id.to_string());
            }
            graph.remove(index);
        }
    }
    if removed.is_empty() {
        return;
    }
    for node in graph.iter_mut() {
        if let Some(Value::Array(parts)) = node.get_mut("hasPart") {
            parts.retain(|part| {
                node_id(part)
                    .map(|id| !removed.contains(id))
                    .unwrap_or(true)
            });
        }
    }
}

fn attach_sequence_categorisation(
    graph: &mut Vec<Value>,
    manifest: &Manifest,
) -> Result<(), CrateError> {
    let mut entries = manifest.sequence_categorisation().collect::<Vec<_>>();
    entries.sort_by(|a, b| a.file_name().cmp(b.file_name()));

    let dynamic_ids = entries
        .iter()
        .map(|entry| entry.path.as_str())
        .collect::<HashSet<_>>();
    graph.retain(|node| {
        node_id(node)
            .map(|id| !dynamic_ids.contains(id))
            .unwrap_or(true)
    });
    let Some(parent) = graph
        .iter()
        .position(|node| node_id(node) == Some(SEQUENCE_CATEGORY_ID))
    else {
        if entries.is_empty() {
            return Ok(());
        }
        return Err(CrateError::InvalidTemplate(format!(
            "no {SEQUENCE_CATEGORY_ID} node for {} discovered files",
            entries.len()
        )));
    };

    let children = entries
        .iter()
        .map(|entry| {
            json!({
                "@id": entry.path,
                "@type": "File",
                "name": entry.file_name(),
                "encodingFormat": DYNAMIC_ENCODING_FORMAT,
            })
        })
        .collect::<Vec<_>>();

    let parent_node = graph[parent].as_object_mut().ok_or_else(|| {
        CrateError::InvalidTemplate(format!("{SEQUENCE_CATEGORY_ID} is not an object"))
    })?;
    let references = entries.iter().map(|entry| reference(&entry.path));
    match parent_node.get_mut("hasPart") {
        Some(Value::Array(parts)) => {
            parts.retain(|part| {
                node_id(part)
                    .map(|id| !dynamic_ids.contains(id))
                    .unwrap_or(true)
            });
            parts.extend(references);
        }
        _ => {
            parent_node.insert("hasPart".to_string(), Value::Array(references.collect()));
        }
    }

    let tail = graph.split_off(parent + 1);
    graph.extend(children);
    graph.extend(tail);
    Ok(())
}

fn inject_provenance(graph: &mut Vec<Value>, provenance: &ProvenanceRecord) {
    let sampler_org = provenance.sampling_institution.node_id();
    let creator_org = provenance.creator_institution.node_id();
    let sampler = provenance.sampling_person.node_id();
    let creator = provenance.creator_person.node_id();

    let mut nodes = vec![json!({
        "@id": sampler,
        "@type": "Person",
        "name": provenance.sampling_person.name,
        "affiliation": reference(&sampler_org),
    })];
    if creator != sampler {
        nodes.push(json!({
            "@id": creator,
            "@type": "Person",
            "name": provenance.creator_person.name,
            "affiliation": reference(&creator_org),
        }));
    }
    nodes.push(json!({
        "@id": sampler_org,
        "@type": "Organization",
        "name": provenance.sampling_institution.name,
    }));
    if creator_org != sampler_org {
        nodes.push(json!({
            "@id": creator_org,
            "@type": "Organization",
            "name": provenance.creator_institution.name,
        }));
    }

    if let Some(root) = graph
        .get_mut(DATASET_ROOT_INDEX)
        .and_then(Value::as_object_mut)
    {
        root.insert("wasAssociatedWith".to_string(), reference(&sampler));
        root.insert("creator".to_string(), reference(&creator));
    }

    let tail = graph.split_off(DATASET_ROOT_INDEX + 1);
    graph.extend(nodes);
    graph.extend(tail);
}

pub fn download_url(
    object_store_root: &str,
    ref_code: &str,
    entry: &ManifestEntry,
) -> Result<String, CrateError> {
    let segments = entry
        .segments()
        .map(|segment| urlencoding::encode(segment).into_owned())
        .collect::<Vec<_>>();
    if !(1..=3).contains(&segments.len()) || segments.len() != entry.depth {
        return Err(CrateError::PathTooDeep {
            path: entry.path.clone(),
            depth: segments.len(),
        });
    }
    Ok(format!(
        "{}/{}%2F{}",
        object_store_root.trim_end_matches('/'),
        urlencoding::encode(ref_code),
        segments.join("%2F")
    ))
}

fn attach_download_urls(
    graph: &mut [Value],
    manifest: &Manifest,
    object_store_root: &str,
    ref_code: &str,
) -> Result<(), CrateError> {
    for entry in manifest.files() {
        let index = find_entry_node(graph, entry)
            .ok_or_else(|| CrateError::UnlinkedManifestEntry(entry.path.clone()))?;
        let url = download_url(object_store_root, ref_code, entry)?;
        if let Some(node) = graph[index].as_object_mut() {
            node.insert("downloadUrl".to_string(), Value::String(url));
        }
    }
    Ok(())
}

fn ensure_unique_ids(graph: &[Value]) -> Result<(), CrateError> {
    let mut seen = HashSet::new();
    for (index, node) in graph.iter().enumerate() {
        let id = node_id(node)
            .ok_or_else(|| CrateError::InvalidTemplate(format!("node {index} has no @id")))?;
        if !seen.insert(id) {
            return Err(CrateError::DuplicateNodeId(id.to_string()));
        }
    }
    Ok(())
}
