use std::collections::BTreeSet;

use assert_matches::assert_matches;
use camino::{Utf8Path, Utf8PathBuf};

use egameta::alignment::{AlignmentReader, HeaderFacts};
use egameta::domain::StudyAccession;
use egameta::error::EgaError;
use egameta::graph::{AccessionUpdate, EntityKind, GraphEntity, GraphStore, Row};
use egameta::metadata::{build_file_set, build_sample_set};
use egameta::reference::ReferenceAssembly;
use egameta::xml::{write_analysis_set, write_sample_set};

/// Store answering fact queries from canned rows, matched on the
/// substituted key embedded in the query text.
#[derive(Default)]
struct CannedStore {
    rows_by_key: Vec<(String, Vec<Row>)>,
}

impl CannedStore {
    fn with_rows(mut self, key: &str, rows: Vec<Row>) -> Self {
        self.rows_by_key.push((key.to_string(), rows));
        self
    }
}

impl GraphStore for CannedStore {
    fn query(&self, sparql: &str) -> Result<Vec<Row>, EgaError> {
        Ok(self
            .rows_by_key
            .iter()
            .find(|(key, _)| sparql.contains(key))
            .map(|(_, rows)| rows.clone())
            .unwrap_or_default())
    }

    fn find_entity(&self, _kind: EntityKind, _iri: &str) -> Result<Option<GraphEntity>, EgaError> {
        Ok(None)
    }

    fn bulk_merge(&self, _updates: &[AccessionUpdate]) -> Result<(), EgaError> {
        Ok(())
    }
}

/// Reader answering header lookups from canned facts.
#[derive(Default)]
struct CannedReader {
    facts_by_path: Vec<(Utf8PathBuf, HeaderFacts)>,
}

impl CannedReader {
    fn with_header(mut self, path: &Utf8Path, read_groups: &[&str], sequences: &[&str]) -> Self {
        self.facts_by_path.push((
            path.to_owned(),
            HeaderFacts {
                read_group_ids: read_groups.iter().map(|rg| rg.to_string()).collect(),
                sequence_names: sequences
                    .iter()
                    .map(|name| name.to_string())
                    .collect::<BTreeSet<String>>(),
            },
        ));
        self
    }
}

impl AlignmentReader for CannedReader {
    fn read_header(&self, path: &Utf8Path) -> Result<HeaderFacts, EgaError> {
        self.facts_by_path
            .iter()
            .find(|(known, _)| known == path)
            .map(|(_, facts)| facts.clone())
            .ok_or_else(|| EgaError::AlignmentHeader {
                path: path.to_string(),
                message: "no such file".to_string(),
            })
    }
}

fn file_row(uuid: &str, sample_uuid: &str, accession: Option<&str>) -> Row {
    [
        ("fileType", Some("tumour wgs bam")),
        ("fileUuid", Some(uuid)),
        ("egaAccession", accession),
        ("sampleUuid", Some(sample_uuid)),
        ("libraryCaptureKit", Some("none")),
        ("sequencingPlatform", Some("Illumina NovaSeq 6000")),
        ("reference", Some("GRCh38")),
    ]
    .into_iter()
    .map(|(name, value)| (name.to_string(), value.map(|v| v.to_string())))
    .collect()
}

fn sample_row(uuid: &str, accession: Option<&str>) -> Row {
    [
        ("sampleUuid", Some(uuid)),
        ("samplePublicationID", Some("PD0001a")),
        ("egaAccession", accession),
        ("referenceSpecies", Some("Homo sapiens")),
        ("sampleType", Some("tumour")),
        ("sampleMaterial", Some("DNA")),
        ("sampleTissue", Some("skin")),
        ("donorUuid", Some("d0n0r123")),
        ("donorPublicationID", Some("PD0001")),
        ("donorSex", Some("female")),
    ]
    .into_iter()
    .map(|(name, value)| (name.to_string(), value.map(|v| v.to_string())))
    .collect()
}

fn study() -> StudyAccession {
    "EGAS00001000123".parse().unwrap()
}

struct Fixture {
    _dir: tempfile::TempDir,
    bam_dir: Utf8PathBuf,
    checksum_dir: Utf8PathBuf,
}

impl Fixture {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let bam_dir = Utf8PathBuf::from_path_buf(dir.path().join("bams")).unwrap();
        let checksum_dir = Utf8PathBuf::from_path_buf(dir.path().join("md5")).unwrap();
        std::fs::create_dir_all(bam_dir.as_std_path()).unwrap();
        std::fs::create_dir_all(checksum_dir.as_std_path()).unwrap();
        Self {
            _dir: dir,
            bam_dir,
            checksum_dir,
        }
    }

    /// Create an (empty) bam plus its two checksum sidecars.
    fn add_bam(&self, name: &str) -> Utf8PathBuf {
        let path = self.bam_dir.join(name);
        std::fs::write(path.as_std_path(), b"").unwrap();
        std::fs::write(
            self.checksum_dir.join(format!("{name}.md5")).as_std_path(),
            format!("{}  {name}\n", "1".repeat(32)),
        )
        .unwrap();
        std::fs::write(
            self.checksum_dir
                .join(format!("{name}.gpg.md5"))
                .as_std_path(),
            format!("{}  {name}.gpg\n", "2".repeat(32)),
        )
        .unwrap();
        path
    }
}

#[test]
fn file_set_builds_every_valid_bam() {
    let fixture = Fixture::new();
    let a = fixture.add_bam("a.bam");
    let b = fixture.add_bam("b.bam");
    let store = CannedStore::default()
        .with_rows(a.as_str(), vec![file_row("uuid-a", "sample-a", None)])
        .with_rows(b.as_str(), vec![file_row("uuid-b", "sample-b", None)]);
    let reader = CannedReader::default()
        .with_header(&a, &["rg1", "rg2"], &["1", "2", "X"])
        .with_header(&b, &["rg3"], &["1", "MT"]);

    let set = build_file_set(
        &store,
        &reader,
        &[a, b],
        &fixture.checksum_dir,
        &study(),
        Utf8Path::new("box/run-42"),
        None,
        false,
    )
    .unwrap();

    assert_eq!(set.analyses.len(), 2);
    let first = &set.analyses[0];
    assert_eq!(first.alias, "uuid-a");
    assert_eq!(first.title, "a.bam");
    assert_eq!(first.sample_refs[0].label, "rg1,rg2");
    assert_eq!(first.sample_refs[0].refname, "sample-a");
    assert_eq!(first.files[0].filename, Utf8Path::new("box/run-42/a.bam.gpg"));
    assert_eq!(first.files[0].unencrypted_checksum, "1".repeat(32));
    assert_eq!(first.files[0].checksum, "2".repeat(32));
    // every catalog sequence is listed, not just the ones in the header
    assert_eq!(first.reference_alignment.sequences.len(), 25);
}

#[test]
fn unknown_sequence_fails_with_path_and_names_only_for_the_bad_bam() {
    let fixture = Fixture::new();
    let bad = fixture.add_bam("bad.bam");
    let good = fixture.add_bam("good.bam");
    let store = CannedStore::default()
        .with_rows(bad.as_str(), vec![file_row("uuid-bad", "sample-a", None)])
        .with_rows(good.as_str(), vec![file_row("uuid-good", "sample-b", None)]);
    let reader = CannedReader::default()
        .with_header(&bad, &["rg1"], &["1", "chrUn_gl000220"])
        .with_header(&good, &["rg2"], &["1"]);

    let err = build_file_set(
        &store,
        &reader,
        &[bad.clone(), good.clone()],
        &fixture.checksum_dir,
        &study(),
        Utf8Path::new("box"),
        None,
        false,
    )
    .unwrap_err();

    assert_matches!(err, EgaError::MetadataConstruction(_));
    let message = err.to_string();
    assert!(message.contains(bad.as_str()));
    assert!(message.contains("chrUn_gl000220"));
    assert!(message.contains("GRCh38"));
    assert!(!message.contains(good.as_str()));
}

#[test]
fn per_file_errors_accumulate_across_the_whole_batch() {
    let fixture = Fixture::new();
    let unknown = fixture.add_bam("unknown.bam");
    // registered in the db but without checksum sidecars
    let missing_sidecar = fixture.bam_dir.join("nosums.bam");
    std::fs::write(missing_sidecar.as_std_path(), b"").unwrap();
    let store = CannedStore::default().with_rows(
        missing_sidecar.as_str(),
        vec![file_row("uuid-n", "sample-n", None)],
    );
    let reader = CannedReader::default()
        .with_header(&unknown, &["rg1"], &["1"])
        .with_header(&missing_sidecar, &["rg2"], &["1"]);

    let err = build_file_set(
        &store,
        &reader,
        &[unknown.clone(), missing_sidecar.clone()],
        &fixture.checksum_dir,
        &study(),
        Utf8Path::new("box"),
        None,
        false,
    )
    .unwrap_err();

    let message = err.to_string();
    assert!(message.contains(&format!("not found for {unknown}")));
    assert!(message.contains("nosums.bam"));
}

#[test]
fn accessioned_records_are_validated_but_filtered() {
    let fixture = Fixture::new();
    let done = fixture.add_bam("done.bam");
    let fresh = fixture.add_bam("fresh.bam");
    let store = CannedStore::default()
        .with_rows(
            done.as_str(),
            vec![file_row("uuid-done", "sample-a", Some("EGAZ00001000009"))],
        )
        .with_rows(fresh.as_str(), vec![file_row("uuid-fresh", "sample-b", None)]);
    let reader = CannedReader::default()
        .with_header(&done, &["rg1"], &["1"])
        .with_header(&fresh, &["rg2"], &["2"]);

    let set = build_file_set(
        &store,
        &reader,
        &[done.clone(), fresh.clone()],
        &fixture.checksum_dir,
        &study(),
        Utf8Path::new("box"),
        None,
        false,
    )
    .unwrap();
    assert_eq!(set.analyses.len(), 1);
    assert_eq!(set.analyses[0].alias, "uuid-fresh");

    let set = build_file_set(
        &store,
        &reader,
        &[done.clone(), fresh.clone()],
        &fixture.checksum_dir,
        &study(),
        Utf8Path::new("box"),
        None,
        true,
    )
    .unwrap();
    assert_eq!(set.analyses.len(), 2);
}

#[test]
fn accession_does_not_bypass_cross_validation() {
    let fixture = Fixture::new();
    let done = fixture.add_bam("done.bam");
    let store = CannedStore::default().with_rows(
        done.as_str(),
        vec![file_row("uuid-done", "sample-a", Some("EGAZ00001000009"))],
    );
    let reader = CannedReader::default().with_header(&done, &["rg1"], &["1", "not_in_assembly"]);

    let err = build_file_set(
        &store,
        &reader,
        &[done],
        &fixture.checksum_dir,
        &study(),
        Utf8Path::new("box"),
        None,
        false,
    )
    .unwrap_err();
    assert!(err.to_string().contains("not_in_assembly"));
}

#[test]
fn no_db_reference_skips_the_store_and_leaves_fields_empty() {
    let fixture = Fixture::new();
    let bam = fixture.add_bam("scaffold.bam");
    let store = CannedStore::default();
    let reader = CannedReader::default().with_header(&bam, &["rg1"], &["1"]);
    let grch37 = ReferenceAssembly::from_name("GRCh37").unwrap();

    let set = build_file_set(
        &store,
        &reader,
        &[bam],
        &fixture.checksum_dir,
        &study(),
        Utf8Path::new("box"),
        Some(grch37),
        false,
    )
    .unwrap();

    let analysis = &set.analyses[0];
    assert_eq!(analysis.alias, "");
    assert_eq!(analysis.description, "");
    assert_eq!(
        analysis.reference_alignment.assembly_accession,
        "GCA_000001405.1"
    );
    // header names must still be consistent with the override assembly
    let xml = write_analysis_set(&set).unwrap();
    assert!(xml.contains("GCA_000001405.1"));
}

#[test]
fn absolute_upload_dir_is_made_relative() {
    let fixture = Fixture::new();
    let bam = fixture.add_bam("a.bam");
    let store = CannedStore::default().with_rows(bam.as_str(), vec![file_row("u", "s", None)]);
    let reader = CannedReader::default().with_header(&bam, &["rg1"], &["1"]);

    let set = build_file_set(
        &store,
        &reader,
        &[bam],
        &fixture.checksum_dir,
        &study(),
        Utf8Path::new("/box/run-42"),
        None,
        false,
    )
    .unwrap();
    assert_eq!(
        set.analyses[0].files[0].filename,
        Utf8Path::new("box/run-42/a.bam.gpg")
    );
}

#[test]
fn sample_set_accumulates_errors_then_fails() {
    let store = CannedStore::default()
        .with_rows("sample-ok", vec![sample_row("sample-ok", None)])
        .with_rows("sample-bad", {
            let mut row = sample_row("sample-bad", None);
            row.insert("donorSex".to_string(), None);
            row.insert("sampleTissue".to_string(), None);
            vec![row]
        });

    let err = build_sample_set(
        &store,
        &[
            "sample-ok".to_string(),
            "sample-bad".to_string(),
            "sample-missing".to_string(),
        ],
        false,
    )
    .unwrap_err();

    let message = err.to_string();
    assert!(message.contains("donorSex"));
    assert!(message.contains("sampleTissue"));
    assert!(message.contains("collectedsample:sample-missing"));
    assert!(!message.contains("sample-ok missing"));
}

#[test]
fn sample_set_filters_accessioned_and_serializes() {
    let store = CannedStore::default()
        .with_rows("sample-new", vec![sample_row("sample-new", None)])
        .with_rows(
            "sample-done",
            vec![sample_row("sample-done", Some("EGAN00001000001"))],
        );
    let uuids = vec!["sample-new".to_string(), "sample-done".to_string()];

    let set = build_sample_set(&store, &uuids, false).unwrap();
    assert_eq!(set.samples.len(), 1);
    assert_eq!(set.samples[0].alias, "sample-new");

    let set = build_sample_set(&store, &uuids, true).unwrap();
    assert_eq!(set.samples.len(), 2);

    let xml = write_sample_set(&set).unwrap();
    assert!(xml.contains("<SAMPLE alias=\"sample-new\""));
    assert!(xml.contains("accession=\"EGAN00001000001\""));
    assert!(xml.contains("<TAG>Phenotype</TAG>"));
    assert!(xml.contains("<VALUE>skin|tumour</VALUE>"));
}
