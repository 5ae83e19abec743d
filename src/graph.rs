use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use camino::Utf8Path;
use reqwest::blocking::Client;
use reqwest::header::{ACCEPT, CONTENT_TYPE, HeaderMap, HeaderValue, USER_AGENT};
use serde_json::Value;

use crate::config::GraphEndpoints;
use crate::error::EgaError;
use crate::reference::{ReferenceAssembly, Species};

const ERR_DBMETA_NONE: &str = "db metadata not found for";
const ERR_DBMETA_MULTI: &str = "multiple records for db metadata for";

const PREFIXES: &str = "\
PREFIX : <https://grafli.org/schema#>
PREFIX collectedsample: <https://grafli.org/id/collectedsample/>
PREFIX alignedreadgroupset: <https://grafli.org/id/alignedreadgroupset/>
";

const FILE_FACTS_QUERY: &str = "\
SELECT ?fileType ?fileUuid ?egaAccession ?sampleUuid ?libraryCaptureKit ?sequencingPlatform ?reference
WHERE {
    ?file a :AlignedReadGroupSet ;
          :filePath \"$filePath\" ;
          :uuid ?fileUuid ;
          :type ?fileType ;
          :libraryCaptureKit ?libraryCaptureKit ;
          :sequencingPlatform ?sequencingPlatform ;
          :reference ?reference ;
          :sample ?sampleNode .
    ?sampleNode :uuid ?sampleUuid .
    OPTIONAL { ?file :egaAccession ?egaAccession }
}";

const SAMPLE_FACTS_QUERY: &str = "\
SELECT ?sampleUuid ?samplePublicationID ?egaAccession ?referenceSpecies ?sampleType ?sampleMaterial ?sampleTissue ?donorUuid ?donorPublicationID ?donorSex
WHERE {
    ?sample a :CollectedSample ;
            :uuid \"$sampleUuid\" .
    BIND(\"$sampleUuid\" AS ?sampleUuid)
    OPTIONAL { ?sample :publicationId ?samplePublicationID }
    OPTIONAL { ?sample :egaAccession ?egaAccession }
    OPTIONAL { ?sample :referenceSpecies ?referenceSpecies }
    OPTIONAL { ?sample :sampleType ?sampleType }
    OPTIONAL { ?sample :material ?sampleMaterial }
    OPTIONAL { ?sample :tissue ?sampleTissue }
    OPTIONAL {
        ?sample :donor ?donor .
        ?donor :uuid ?donorUuid .
        OPTIONAL { ?donor :publicationId ?donorPublicationID }
        OPTIONAL { ?donor :sex ?donorSex }
    }
}";

const ENTITY_QUERY: &str = "\
SELECT ?type ?egaAccession
WHERE {
    $iri a ?type .
    OPTIONAL { $iri :egaAccession ?egaAccession }
}";

/// One result row of named, optionally bound fields.
pub type Row = BTreeMap<String, Option<String>>;

/// The local entity classes a submission receipt can refer back to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    CollectedSample,
    AlignedReadGroupSet,
}

impl EntityKind {
    pub const ALL: [EntityKind; 2] = [EntityKind::CollectedSample, EntityKind::AlignedReadGroupSet];

    /// Receipt element tag corresponding to this entity class.
    pub fn receipt_tag(&self) -> &'static str {
        match self {
            EntityKind::CollectedSample => "SAMPLE",
            EntityKind::AlignedReadGroupSet => "ANALYSIS",
        }
    }

    /// Identifier namespace prefix for entities of this class.
    pub fn prefix(&self) -> &'static str {
        match self {
            EntityKind::CollectedSample => "collectedsample:",
            EntityKind::AlignedReadGroupSet => "alignedreadgroupset:",
        }
    }

    pub fn iri(&self, alias: &str) -> String {
        format!("{}{alias}", self.prefix())
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.receipt_tag())
    }
}

/// A local entity as seen by the reconciler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GraphEntity {
    pub iri: String,
    pub accession: Option<String>,
}

/// A staged mutation pairing an entity with its newly issued accession.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessionUpdate {
    pub kind: EntityKind,
    pub iri: String,
    pub accession: String,
}

/// Query and persistence boundary to the graph database.
pub trait GraphStore: Send + Sync {
    fn query(&self, sparql: &str) -> Result<Vec<Row>, EgaError>;

    fn find_entity(&self, kind: EntityKind, iri: &str) -> Result<Option<GraphEntity>, EgaError>;

    /// Merge all staged updates into the store in one write.
    fn bulk_merge(&self, updates: &[AccessionUpdate]) -> Result<(), EgaError>;
}

/// GraphStore over SPARQL 1.1 protocol HTTP endpoints.
pub struct SparqlHttpStore {
    client: Client,
    query_url: String,
    update_url: String,
}

impl SparqlHttpStore {
    pub fn new(endpoints: &GraphEndpoints, timeout_secs: u64) -> Result<Self, EgaError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("egameta/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| EgaError::GraphHttp(err.to_string()))?,
        );
        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|err| EgaError::GraphHttp(err.to_string()))?;
        Ok(Self {
            client,
            query_url: endpoints.query_url.clone(),
            update_url: endpoints.update_url.clone(),
        })
    }

    fn rows_from_results(body: &Value) -> Result<Vec<Row>, EgaError> {
        let vars: Vec<String> = body
            .get("head")
            .and_then(|head| head.get("vars"))
            .and_then(|vars| vars.as_array())
            .map(|vars| {
                vars.iter()
                    .filter_map(|v| v.as_str())
                    .map(|v| v.to_string())
                    .collect()
            })
            .ok_or_else(|| EgaError::GraphHttp("missing head.vars in results".to_string()))?;
        let bindings = body
            .get("results")
            .and_then(|results| results.get("bindings"))
            .and_then(|bindings| bindings.as_array())
            .ok_or_else(|| EgaError::GraphHttp("missing results.bindings".to_string()))?;

        let mut rows = Vec::with_capacity(bindings.len());
        for binding in bindings {
            let mut row = Row::new();
            for var in &vars {
                let value = binding
                    .get(var)
                    .and_then(|cell| cell.get("value"))
                    .and_then(|value| value.as_str())
                    .map(|value| value.to_string());
                row.insert(var.clone(), value);
            }
            rows.push(row);
        }
        Ok(rows)
    }
}

impl GraphStore for SparqlHttpStore {
    fn query(&self, sparql: &str) -> Result<Vec<Row>, EgaError> {
        let response = self
            .client
            .post(&self.query_url)
            .header(CONTENT_TYPE, "application/sparql-query")
            .header(ACCEPT, "application/sparql-results+json")
            .body(sparql.to_string())
            .send()
            .map_err(|err| EgaError::GraphHttp(err.to_string()))?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response
                .text()
                .unwrap_or_else(|_| "graph query failed".to_string());
            return Err(EgaError::GraphStatus { status, message });
        }
        let body: Value = response
            .json()
            .map_err(|err| EgaError::GraphHttp(err.to_string()))?;
        Self::rows_from_results(&body)
    }

    fn find_entity(&self, _kind: EntityKind, iri: &str) -> Result<Option<GraphEntity>, EgaError> {
        let query = format!("{PREFIXES}{}", ENTITY_QUERY.replace("$iri", iri));
        let rows = self.query(&query)?;
        let Some(row) = rows.first() else {
            return Ok(None);
        };
        Ok(Some(GraphEntity {
            iri: iri.to_string(),
            accession: row.get("egaAccession").cloned().flatten(),
        }))
    }

    fn bulk_merge(&self, updates: &[AccessionUpdate]) -> Result<(), EgaError> {
        if updates.is_empty() {
            return Ok(());
        }
        let triples: Vec<String> = updates
            .iter()
            .map(|update| {
                format!(
                    "    {} :egaAccession \"{}\" .",
                    update.iri,
                    escape_literal(&update.accession)
                )
            })
            .collect();
        let update = format!("{PREFIXES}INSERT DATA {{\n{}\n}}", triples.join("\n"));
        let response = self
            .client
            .post(&self.update_url)
            .header(CONTENT_TYPE, "application/sparql-update")
            .body(update)
            .send()
            .map_err(|err| EgaError::GraphHttp(err.to_string()))?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response
                .text()
                .unwrap_or_else(|_| "graph update failed".to_string());
            return Err(EgaError::GraphStatus { status, message });
        }
        Ok(())
    }
}

fn escape_literal(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}

/// Denormalized facts about one sequencing file.
#[derive(Debug, Clone)]
pub struct FileFacts {
    pub file_type: String,
    pub file_uuid: String,
    pub accession: Option<String>,
    pub sample_uuid: String,
    pub library_capture_kit: String,
    pub sequencing_platform: String,
    pub reference: &'static ReferenceAssembly,
}

impl FileFacts {
    /// Facts stand-in used when the database is deliberately skipped: every
    /// field empty except the supplied reference assembly.
    pub fn incomplete(reference: &'static ReferenceAssembly) -> Self {
        Self {
            file_type: String::new(),
            file_uuid: String::new(),
            accession: None,
            sample_uuid: String::new(),
            library_capture_kit: String::new(),
            sequencing_platform: String::new(),
            reference,
        }
    }
}

/// Fetch facts about the file registered at `path`. Exactly one matching
/// record must exist.
pub fn file_facts(store: &dyn GraphStore, path: &Utf8Path) -> Result<FileFacts, EgaError> {
    let query = format!(
        "{PREFIXES}{}",
        FILE_FACTS_QUERY.replace("$filePath", &escape_literal(path.as_str()))
    );
    let rows = store.query(&query)?;
    if rows.is_empty() {
        return Err(EgaError::MetadataConstruction(format!(
            "{ERR_DBMETA_NONE} {path}"
        )));
    }
    if rows.len() > 1 {
        return Err(EgaError::MetadataConstruction(format!(
            "{ERR_DBMETA_MULTI} {path}"
        )));
    }
    let row = &rows[0];

    let required = |name: &str| -> Result<String, EgaError> {
        row.get(name).cloned().flatten().ok_or_else(|| {
            EgaError::MetadataConstruction(format!("{path} - missing db data for {name}"))
        })
    };

    let reference = ReferenceAssembly::from_name(&required("reference")?)?;
    Ok(FileFacts {
        file_type: required("fileType")?,
        file_uuid: required("fileUuid")?,
        accession: row.get("egaAccession").cloned().flatten(),
        sample_uuid: required("sampleUuid")?,
        library_capture_kit: required("libraryCaptureKit")?,
        sequencing_platform: required("sequencingPlatform")?,
        reference,
    })
}

/// Denormalized facts about one collected sample. Construction guarantees
/// every field except `accession` is present.
#[derive(Debug, Clone)]
pub struct SampleFacts {
    pub sample_uuid: String,
    pub sample_publication_id: String,
    pub accession: Option<String>,
    pub reference_species: &'static Species,
    pub sample_type: String,
    pub sample_material: String,
    pub sample_tissue: String,
    pub donor_uuid: String,
    pub donor_publication_id: String,
    pub donor_sex: String,
    phenotype: String,
}

impl SampleFacts {
    /// Derived at construction as `<tissue>|<type>`; immutable thereafter.
    pub fn phenotype(&self) -> &str {
        &self.phenotype
    }
}

/// Fetch facts about the sample with the given uuid. Exactly one matching
/// record must exist, and every required field must be bound; missing
/// fields are reported all at once.
pub fn sample_facts(store: &dyn GraphStore, uuid: &str) -> Result<SampleFacts, EgaError> {
    let query = format!(
        "{PREFIXES}{}",
        SAMPLE_FACTS_QUERY.replace("$sampleUuid", &escape_literal(uuid))
    );
    let rows = store.query(&query)?;
    if rows.is_empty() {
        return Err(EgaError::MetadataConstruction(format!(
            "{ERR_DBMETA_NONE} collectedsample:{uuid}"
        )));
    }
    if rows.len() > 1 {
        return Err(EgaError::MetadataConstruction(format!(
            "{ERR_DBMETA_MULTI} collectedsample:{uuid}"
        )));
    }
    let row = &rows[0];

    let field = |name: &str| row.get(name).cloned().flatten();

    let required_names = [
        "sampleUuid",
        "samplePublicationID",
        "referenceSpecies",
        "sampleType",
        "sampleMaterial",
        "sampleTissue",
        "donorUuid",
        "donorPublicationID",
        "donorSex",
    ];
    let missing: Vec<&str> = required_names
        .into_iter()
        .filter(|name| field(name).is_none())
        .collect();
    if !missing.is_empty() {
        return Err(EgaError::MetadataConstruction(format!(
            "donor:{} collectedsample:{uuid} - missing db data for {}",
            field("donorUuid").unwrap_or_default(),
            missing.join(", ")
        )));
    }

    // every required field verified bound above
    let reference_species = Species::from_name(&field("referenceSpecies").unwrap_or_default())?;
    let sample_tissue = field("sampleTissue").unwrap_or_default();
    let sample_type = field("sampleType").unwrap_or_default();
    let phenotype = format!("{sample_tissue}|{sample_type}");

    Ok(SampleFacts {
        sample_uuid: field("sampleUuid").unwrap_or_default(),
        sample_publication_id: field("samplePublicationID").unwrap_or_default(),
        accession: field("egaAccession"),
        reference_species,
        sample_type,
        sample_material: field("sampleMaterial").unwrap_or_default(),
        sample_tissue,
        donor_uuid: field("donorUuid").unwrap_or_default(),
        donor_publication_id: field("donorPublicationID").unwrap_or_default(),
        donor_sex: field("donorSex").unwrap_or_default(),
        phenotype,
    })
}
