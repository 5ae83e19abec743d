use std::collections::BTreeSet;

use camino::{Utf8Path, Utf8PathBuf};
use tracing::{info, warn};

use crate::alignment::AlignmentReader;
use crate::checksum::read_checksum;
use crate::config::ArchiveConfig;
use crate::domain::{AnalysisAccession, PolicyAccession, SchemaKind, StudyAccession};
use crate::error::EgaError;
use crate::graph::{FileFacts, GraphStore, file_facts, sample_facts};
use crate::reference::ReferenceAssembly;

pub const BAM_NOTE: &str = "SAMPLE_REF label attribute contains csv list of bam @RG IDs";

const ERR_DATASET_POLICY: &str = "policy accession must be supplied iff the ICGC flag is not set";
const ERR_UNKNOWN_SEQ: &str = "header contains SQ not defined in the reference";
const ICGC_PORTAL_LABEL: &str = "ICGC Data Portal";
const ICGC_PORTAL_URL: &str = "http://dcc.icgc.org";

/// Tag/value pair attached to analyses and samples.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    pub tag: String,
    pub value: String,
}

impl Attribute {
    pub fn new(tag: &str, value: impl Into<String>) -> Self {
        Self {
            tag: tag.to_string(),
            value: value.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnalysisFileType {
    Bam,
}

impl AnalysisFileType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnalysisFileType::Bam => "bam",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChecksumMethod {
    Md5,
}

impl ChecksumMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChecksumMethod::Md5 => "MD5",
        }
    }
}

/// One FILE entry of an ANALYSIS record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnalysisFile {
    pub filename: Utf8PathBuf,
    pub filetype: AnalysisFileType,
    pub checksum_method: ChecksumMethod,
    pub checksum: String,
    pub unencrypted_checksum: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SampleRef {
    pub label: String,
    pub refname: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SequenceRef {
    pub accession: String,
    pub label: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferenceAlignment {
    pub assembly_accession: String,
    pub sequences: Vec<SequenceRef>,
}

/// An ANALYSIS record of type REFERENCE_ALIGNMENT.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Analysis {
    pub alias: String,
    pub accession: Option<String>,
    pub title: String,
    pub description: String,
    pub study_ref: StudyAccession,
    pub sample_refs: Vec<SampleRef>,
    pub reference_alignment: ReferenceAlignment,
    pub files: Vec<AnalysisFile>,
    pub attributes: Vec<Attribute>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AnalysisSet {
    pub analyses: Vec<Analysis>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SampleName {
    pub taxon_id: u32,
    pub scientific_name: String,
    pub common_name: String,
}

/// A SAMPLE record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sample {
    pub alias: String,
    pub accession: Option<String>,
    pub name: SampleName,
    pub description: String,
    pub attributes: Vec<Attribute>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SampleSet {
    pub samples: Vec<Sample>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Link {
    pub label: String,
    pub url: String,
}

/// A DATASET record referencing accessioned analyses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dataset {
    pub alias: String,
    pub title: String,
    pub description: String,
    pub analysis_refs: Vec<AnalysisAccession>,
    pub policy_ref: PolicyAccession,
    pub links: Vec<Link>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Datasets {
    pub datasets: Vec<Dataset>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmissionContact {
    pub name: String,
    pub inform_on_error: String,
    pub inform_on_status: String,
}

/// The only place the schema truly has alternation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmissionAction {
    Add { source: String, schema: SchemaKind },
    Validate { source: String, schema: SchemaKind },
    Protect,
}

/// A SUBMISSION envelope record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Submission {
    pub alias: Option<String>,
    pub broker_name: String,
    pub center_name: String,
    pub lab_name: String,
    pub contacts: Vec<SubmissionContact>,
    pub actions: Vec<SubmissionAction>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubmissionSet {
    pub submissions: Vec<Submission>,
}

/// Build one ANALYSIS record for the bam at `path`.
///
/// With `no_db_reference` the database is not consulted at all: facts are
/// empty apart from the supplied assembly, and the resulting record is only
/// good as a scaffold for hand-editing.
pub fn build_file_record(
    store: &dyn GraphStore,
    reader: &dyn AlignmentReader,
    path: &Utf8Path,
    checksum_dir: &Utf8Path,
    study: &StudyAccession,
    upload_dir: &Utf8Path,
    no_db_reference: Option<&'static ReferenceAssembly>,
) -> Result<Analysis, EgaError> {
    info!("building metadata for bam {path}");

    let facts = match no_db_reference {
        Some(reference) => {
            warn!("using empty db metadata for bam {path}; output metadata will be incomplete");
            FileFacts::incomplete(reference)
        }
        None => file_facts(store, path)?,
    };

    let header = reader.read_header(path)?;

    let assembly_names: BTreeSet<&str> = facts
        .reference
        .sequences
        .iter()
        .map(|sequence| sequence.name.as_str())
        .collect();
    let unknown: Vec<&str> = header
        .sequence_names
        .iter()
        .map(|name| name.as_str())
        .filter(|name| !assembly_names.contains(name))
        .collect();
    if !unknown.is_empty() {
        return Err(EgaError::MetadataConstruction(format!(
            "{path} {ERR_UNKNOWN_SEQ} {}: {}",
            facts.reference.name,
            unknown.join(", ")
        )));
    }

    let filename = path
        .file_name()
        .ok_or_else(|| EgaError::Filesystem(format!("no file name in path {path}")))?;
    let gpg_name = format!("{filename}.gpg");
    let checksum_plain = read_checksum(&checksum_dir.join(format!("{filename}.md5")), filename)?;
    let checksum_gpg = read_checksum(&checksum_dir.join(format!("{gpg_name}.md5")), &gpg_name)?;

    // Re-rooting under / then stripping it keeps a misconfigured absolute
    // upload dir from leaking an absolute path into the record.
    let rooted = Utf8Path::new("/").join(upload_dir).join(&gpg_name);
    let submission_path = rooted
        .strip_prefix("/")
        .unwrap_or(rooted.as_path())
        .to_owned();

    Ok(Analysis {
        alias: facts.file_uuid.clone(),
        accession: facts.accession.clone(),
        title: filename.to_string(),
        description: facts.file_type.clone(),
        study_ref: study.clone(),
        sample_refs: vec![SampleRef {
            label: header.read_group_ids.join(","),
            refname: facts.sample_uuid.clone(),
        }],
        reference_alignment: ReferenceAlignment {
            assembly_accession: facts.reference.accession.clone(),
            sequences: facts
                .reference
                .sequences_sorted()
                .into_iter()
                .map(|sequence| SequenceRef {
                    accession: sequence.accession.clone(),
                    label: sequence.name.clone(),
                })
                .collect(),
        },
        files: vec![AnalysisFile {
            filename: submission_path,
            filetype: AnalysisFileType::Bam,
            checksum_method: ChecksumMethod::Md5,
            checksum: checksum_gpg,
            unencrypted_checksum: checksum_plain,
        }],
        attributes: vec![
            Attribute::new("NOTE", BAM_NOTE),
            Attribute::new("LibraryCaptureKit", facts.library_capture_kit),
            Attribute::new("SequencingPlatform", facts.sequencing_platform),
            Attribute::new("ReferenceSpecies", facts.reference.species.scientific_name.clone()),
            Attribute::new("Reference", facts.reference.name.clone()),
        ],
    })
}

/// Build an ANALYSIS_SET for all of `paths`, accumulating per-file errors
/// into one failure after the full batch has been attempted.
#[allow(clippy::too_many_arguments)]
pub fn build_file_set(
    store: &dyn GraphStore,
    reader: &dyn AlignmentReader,
    paths: &[Utf8PathBuf],
    checksum_dir: &Utf8Path,
    study: &StudyAccession,
    upload_dir: &Utf8Path,
    no_db_reference: Option<&'static ReferenceAssembly>,
    include_accessioned: bool,
) -> Result<AnalysisSet, EgaError> {
    let mut analyses = Vec::new();
    let mut errors = Vec::new();
    for path in paths {
        match build_file_record(
            store,
            reader,
            path,
            checksum_dir,
            study,
            upload_dir,
            no_db_reference,
        ) {
            Ok(analysis) => analyses.push(analysis),
            Err(err) if is_item_error(&err) => errors.push(err.to_string()),
            Err(err) => return Err(err),
        }
    }
    if !errors.is_empty() {
        return Err(EgaError::MetadataConstruction(errors.join("\n")));
    }

    let analyses = analyses
        .into_iter()
        .filter(|analysis| include_accessioned || analysis.accession.is_none())
        .collect();
    Ok(AnalysisSet { analyses })
}

/// Construction and filesystem failures are captured per batch item;
/// anything else (e.g. a graph store transport failure) aborts the batch.
fn is_item_error(err: &EgaError) -> bool {
    matches!(
        err,
        EgaError::MetadataConstruction(_)
            | EgaError::Filesystem(_)
            | EgaError::ChecksumNotFound { .. }
            | EgaError::AlignmentHeader { .. }
            | EgaError::UnknownAssembly(_)
            | EgaError::UnknownSpecies(_)
    )
}

/// Build one SAMPLE record for the collected sample with the given uuid.
pub fn build_sample_record(store: &dyn GraphStore, uuid: &str) -> Result<Sample, EgaError> {
    info!("building metadata for collectedsample:{uuid}");

    let facts = sample_facts(store, uuid)?;

    Ok(Sample {
        alias: uuid.to_string(),
        accession: facts.accession.clone(),
        name: SampleName {
            taxon_id: facts.reference_species.taxon_id,
            scientific_name: facts.reference_species.scientific_name.clone(),
            common_name: facts.reference_species.common_name.clone(),
        },
        description: facts.sample_material.clone(),
        attributes: vec![
            Attribute::new("Sample ID", facts.sample_publication_id.clone()),
            Attribute::new("Donor ID", facts.donor_publication_id.clone()),
            Attribute::new("Phenotype", facts.phenotype()),
            Attribute::new("subject_id", facts.donor_uuid.clone()),
            Attribute::new("gender", facts.donor_sex.clone()),
        ],
    })
}

/// Build a SAMPLE_SET with the same accumulate-then-fail batching and
/// accessioned-filter semantics as [`build_file_set`].
pub fn build_sample_set(
    store: &dyn GraphStore,
    uuids: &[String],
    include_accessioned: bool,
) -> Result<SampleSet, EgaError> {
    let mut samples = Vec::new();
    let mut errors = Vec::new();
    for uuid in uuids {
        match build_sample_record(store, uuid) {
            Ok(sample) => samples.push(sample),
            Err(err) if is_item_error(&err) => errors.push(err.to_string()),
            Err(err) => return Err(err),
        }
    }
    if !errors.is_empty() {
        return Err(EgaError::MetadataConstruction(errors.join("; ")));
    }

    let samples = samples
        .into_iter()
        .filter(|sample| include_accessioned || sample.accession.is_none())
        .collect();
    Ok(SampleSet { samples })
}

/// Build a DATASET record referencing accessioned analyses. Exactly one of
/// `is_icgc` or an explicit policy accession must be given; the ICGC route
/// substitutes the configured policy and appends the fixed portal link.
pub fn build_dataset(
    alias: &str,
    title: &str,
    description: &str,
    analysis_accessions: Vec<AnalysisAccession>,
    policy_accession: Option<PolicyAccession>,
    is_icgc: bool,
    links: Vec<Link>,
    config: &ArchiveConfig,
) -> Result<Dataset, EgaError> {
    info!("building metadata for dataset {alias}");

    if is_icgc == policy_accession.is_some() {
        return Err(EgaError::MetadataConstruction(
            ERR_DATASET_POLICY.to_string(),
        ));
    }

    let mut links = links;
    let policy_ref = match policy_accession {
        Some(policy) => policy,
        None => {
            links.push(Link {
                label: ICGC_PORTAL_LABEL.to_string(),
                url: ICGC_PORTAL_URL.to_string(),
            });
            config.icgc_policy_accession.parse()?
        }
    };

    Ok(Dataset {
        alias: alias.to_string(),
        title: title.to_string(),
        description: description.to_string(),
        analysis_refs: analysis_accessions,
        policy_ref,
        links,
    })
}

/// Build the SUBMISSION envelope around prepared actions.
pub fn build_submission(
    alias: Option<String>,
    actions: Vec<SubmissionAction>,
    config: &ArchiveConfig,
) -> Submission {
    Submission {
        alias,
        broker_name: config.broker_name.clone(),
        center_name: config.center_name.clone(),
        lab_name: config.lab_name.clone(),
        contacts: config
            .contacts
            .iter()
            .map(|contact| SubmissionContact {
                name: contact.name.clone(),
                inform_on_error: contact.email.clone(),
                inform_on_status: contact.email.clone(),
            })
            .collect(),
        actions,
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use crate::config::Contact;

    use super::*;

    fn archive_config() -> ArchiveConfig {
        ArchiveConfig {
            submit_url_production: "https://example.org/submit/".to_string(),
            submit_url_test: "https://test.example.org/submit/".to_string(),
            api_url: "https://example.org/api/".to_string(),
            broker_name: "EGA".to_string(),
            center_name: "Example Institute".to_string(),
            lab_name: "Sequencing Core".to_string(),
            account_name: None,
            contacts: vec![Contact {
                name: "Ada".to_string(),
                email: "ada@example.org".to_string(),
            }],
            icgc_policy_accession: "EGAP00001000001".to_string(),
            timeout_secs: 120,
        }
    }

    fn accessions() -> Vec<AnalysisAccession> {
        vec!["EGAZ00001000001".parse().unwrap()]
    }

    #[test]
    fn dataset_requires_exactly_one_policy_source() {
        let config = archive_config();
        let both = build_dataset(
            "ds1",
            "title",
            "desc",
            accessions(),
            Some("EGAP00001000002".parse().unwrap()),
            true,
            Vec::new(),
            &config,
        );
        assert_matches!(both, Err(EgaError::MetadataConstruction(_)));

        let neither = build_dataset(
            "ds1",
            "title",
            "desc",
            accessions(),
            None,
            false,
            Vec::new(),
            &config,
        );
        assert_matches!(neither, Err(EgaError::MetadataConstruction(_)));
    }

    #[test]
    fn icgc_dataset_uses_configured_policy_and_portal_link() {
        let config = archive_config();
        let dataset = build_dataset(
            "ds1",
            "title",
            "desc",
            accessions(),
            None,
            true,
            Vec::new(),
            &config,
        )
        .unwrap();
        assert_eq!(dataset.policy_ref.as_str(), "EGAP00001000001");
        assert_eq!(dataset.links.len(), 1);
        assert_eq!(dataset.links[0].label, "ICGC Data Portal");
    }

    #[test]
    fn explicit_policy_dataset_keeps_links_as_given() {
        let config = archive_config();
        let dataset = build_dataset(
            "ds1",
            "title",
            "desc",
            accessions(),
            Some("EGAP00001000002".parse().unwrap()),
            false,
            vec![Link {
                label: "paper".to_string(),
                url: "https://doi.org/x".to_string(),
            }],
            &config,
        )
        .unwrap();
        assert_eq!(dataset.policy_ref.as_str(), "EGAP00001000002");
        assert_eq!(dataset.links.len(), 1);
        assert_eq!(dataset.links[0].label, "paper");
    }

    #[test]
    fn submission_carries_configured_identity() {
        let config = archive_config();
        let submission = build_submission(
            Some("js 20260210".to_string()),
            vec![SubmissionAction::Protect],
            &config,
        );
        assert_eq!(submission.broker_name, "EGA");
        assert_eq!(submission.center_name, "Example Institute");
        assert_eq!(submission.contacts.len(), 1);
        assert_eq!(submission.contacts[0].inform_on_error, "ada@example.org");
        assert_eq!(submission.contacts[0].inform_on_status, "ada@example.org");
    }
}
