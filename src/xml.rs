use std::fmt::Display;

use quick_xml::Reader;
use quick_xml::Writer;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};

use crate::error::EgaError;
use crate::graph::EntityKind;
use crate::metadata::{
    Analysis, AnalysisSet, Attribute, Dataset, Datasets, Sample, SampleSet, Submission,
    SubmissionAction, SubmissionSet,
};

const XSI_NS: &str = "http://www.w3.org/2001/XMLSchema-instance";
const SCHEMA_ROOT: &str = "https://ftp.ebi.ac.uk/pub/databases/ena/doc/xsd/sra_1_5";

fn xml_err(err: impl Display) -> EgaError {
    EgaError::Xml(err.to_string())
}

struct XmlWriter {
    inner: Writer<Vec<u8>>,
}

impl XmlWriter {
    fn new() -> Self {
        Self {
            inner: Writer::new_with_indent(Vec::new(), b' ', 2),
        }
    }

    fn declaration(&mut self) -> Result<(), EgaError> {
        self.inner
            .write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))
            .map_err(xml_err)
    }

    fn root(&mut self, tag: &str, xsd: &str) -> Result<(), EgaError> {
        let mut start = BytesStart::new(tag);
        start.push_attribute(("xmlns:xsi", XSI_NS));
        start.push_attribute((
            "xsi:noNamespaceSchemaLocation",
            format!("{SCHEMA_ROOT}/{xsd}").as_str(),
        ));
        self.inner
            .write_event(Event::Start(start))
            .map_err(xml_err)
    }

    fn start(&mut self, tag: &str, attributes: &[(&str, &str)]) -> Result<(), EgaError> {
        let mut start = BytesStart::new(tag);
        for (key, value) in attributes {
            start.push_attribute((*key, *value));
        }
        self.inner
            .write_event(Event::Start(start))
            .map_err(xml_err)
    }

    fn empty(&mut self, tag: &str, attributes: &[(&str, &str)]) -> Result<(), EgaError> {
        let mut empty = BytesStart::new(tag);
        for (key, value) in attributes {
            empty.push_attribute((*key, *value));
        }
        self.inner
            .write_event(Event::Empty(empty))
            .map_err(xml_err)
    }

    fn end(&mut self, tag: &str) -> Result<(), EgaError> {
        self.inner
            .write_event(Event::End(BytesEnd::new(tag)))
            .map_err(xml_err)
    }

    fn text_element(&mut self, tag: &str, text: &str) -> Result<(), EgaError> {
        self.start(tag, &[])?;
        self.inner
            .write_event(Event::Text(BytesText::new(text)))
            .map_err(xml_err)?;
        self.end(tag)
    }

    fn attributes(
        &mut self,
        wrapper: &str,
        item: &str,
        attributes: &[Attribute],
    ) -> Result<(), EgaError> {
        if attributes.is_empty() {
            return Ok(());
        }
        self.start(wrapper, &[])?;
        for attribute in attributes {
            self.start(item, &[])?;
            self.text_element("TAG", &attribute.tag)?;
            self.text_element("VALUE", &attribute.value)?;
            self.end(item)?;
        }
        self.end(wrapper)
    }

    fn finish(self) -> Result<String, EgaError> {
        String::from_utf8(self.inner.into_inner()).map_err(xml_err)
    }
}

/// Serialize an ANALYSIS_SET document.
pub fn write_analysis_set(set: &AnalysisSet) -> Result<String, EgaError> {
    let mut writer = XmlWriter::new();
    writer.declaration()?;
    writer.root("ANALYSIS_SET", "SRA.analysis.xsd")?;
    for analysis in &set.analyses {
        write_analysis(&mut writer, analysis)?;
    }
    writer.end("ANALYSIS_SET")?;
    writer.finish()
}

fn write_analysis(writer: &mut XmlWriter, analysis: &Analysis) -> Result<(), EgaError> {
    let mut attributes = vec![("alias", analysis.alias.as_str())];
    if let Some(accession) = &analysis.accession {
        attributes.push(("accession", accession.as_str()));
    }
    writer.start("ANALYSIS", &attributes)?;
    writer.text_element("TITLE", &analysis.title)?;
    writer.text_element("DESCRIPTION", &analysis.description)?;
    writer.empty("STUDY_REF", &[("accession", analysis.study_ref.as_str())])?;
    for sample_ref in &analysis.sample_refs {
        writer.empty(
            "SAMPLE_REF",
            &[
                ("label", sample_ref.label.as_str()),
                ("refname", sample_ref.refname.as_str()),
            ],
        )?;
    }
    writer.start("ANALYSIS_TYPE", &[])?;
    writer.start("REFERENCE_ALIGNMENT", &[])?;
    writer.start("ASSEMBLY", &[])?;
    writer.empty(
        "STANDARD",
        &[(
            "accession",
            analysis.reference_alignment.assembly_accession.as_str(),
        )],
    )?;
    writer.end("ASSEMBLY")?;
    for sequence in &analysis.reference_alignment.sequences {
        writer.empty(
            "SEQUENCE",
            &[
                ("accession", sequence.accession.as_str()),
                ("label", sequence.label.as_str()),
            ],
        )?;
    }
    writer.end("REFERENCE_ALIGNMENT")?;
    writer.end("ANALYSIS_TYPE")?;
    writer.start("FILES", &[])?;
    for file in &analysis.files {
        writer.empty(
            "FILE",
            &[
                ("filename", file.filename.as_str()),
                ("filetype", file.filetype.as_str()),
                ("checksum_method", file.checksum_method.as_str()),
                ("checksum", file.checksum.as_str()),
                ("unencrypted_checksum", file.unencrypted_checksum.as_str()),
            ],
        )?;
    }
    writer.end("FILES")?;
    writer.attributes(
        "ANALYSIS_ATTRIBUTES",
        "ANALYSIS_ATTRIBUTE",
        &analysis.attributes,
    )?;
    writer.end("ANALYSIS")
}

/// Serialize a SAMPLE_SET document.
pub fn write_sample_set(set: &SampleSet) -> Result<String, EgaError> {
    let mut writer = XmlWriter::new();
    writer.declaration()?;
    writer.root("SAMPLE_SET", "SRA.sample.xsd")?;
    for sample in &set.samples {
        write_sample(&mut writer, sample)?;
    }
    writer.end("SAMPLE_SET")?;
    writer.finish()
}

fn write_sample(writer: &mut XmlWriter, sample: &Sample) -> Result<(), EgaError> {
    let mut attributes = vec![("alias", sample.alias.as_str())];
    if let Some(accession) = &sample.accession {
        attributes.push(("accession", accession.as_str()));
    }
    writer.start("SAMPLE", &attributes)?;
    writer.start("SAMPLE_NAME", &[])?;
    writer.text_element("TAXON_ID", &sample.name.taxon_id.to_string())?;
    writer.text_element("SCIENTIFIC_NAME", &sample.name.scientific_name)?;
    writer.text_element("COMMON_NAME", &sample.name.common_name)?;
    writer.end("SAMPLE_NAME")?;
    writer.text_element("DESCRIPTION", &sample.description)?;
    writer.attributes("SAMPLE_ATTRIBUTES", "SAMPLE_ATTRIBUTE", &sample.attributes)?;
    writer.end("SAMPLE")
}

/// Serialize a DATASETS document.
pub fn write_datasets(datasets: &Datasets) -> Result<String, EgaError> {
    let mut writer = XmlWriter::new();
    writer.declaration()?;
    writer.root("DATASETS", "EGA.dataset.xsd")?;
    for dataset in &datasets.datasets {
        write_dataset(&mut writer, dataset)?;
    }
    writer.end("DATASETS")?;
    writer.finish()
}

fn write_dataset(writer: &mut XmlWriter, dataset: &Dataset) -> Result<(), EgaError> {
    writer.start("DATASET", &[("alias", dataset.alias.as_str())])?;
    writer.text_element("TITLE", &dataset.title)?;
    writer.text_element("DESCRIPTION", &dataset.description)?;
    for analysis_ref in &dataset.analysis_refs {
        writer.empty("ANALYSIS_REF", &[("accession", analysis_ref.as_str())])?;
    }
    writer.empty("POLICY_REF", &[("accession", dataset.policy_ref.as_str())])?;
    if !dataset.links.is_empty() {
        writer.start("DATASET_LINKS", &[])?;
        for link in &dataset.links {
            writer.start("DATASET_LINK", &[])?;
            writer.start("URL_LINK", &[])?;
            writer.text_element("LABEL", &link.label)?;
            writer.text_element("URL", &link.url)?;
            writer.end("URL_LINK")?;
            writer.end("DATASET_LINK")?;
        }
        writer.end("DATASET_LINKS")?;
    }
    writer.end("DATASET")
}

/// Serialize a SUBMISSION_SET envelope document.
pub fn write_submission_set(set: &SubmissionSet) -> Result<String, EgaError> {
    let mut writer = XmlWriter::new();
    writer.declaration()?;
    writer.root("SUBMISSION_SET", "SRA.submission.xsd")?;
    for submission in &set.submissions {
        write_submission(&mut writer, submission)?;
    }
    writer.end("SUBMISSION_SET")?;
    writer.finish()
}

fn write_submission(writer: &mut XmlWriter, submission: &Submission) -> Result<(), EgaError> {
    let mut attributes = Vec::new();
    if let Some(alias) = &submission.alias {
        attributes.push(("alias", alias.as_str()));
    }
    attributes.push(("broker_name", submission.broker_name.as_str()));
    attributes.push(("center_name", submission.center_name.as_str()));
    attributes.push(("lab_name", submission.lab_name.as_str()));
    writer.start("SUBMISSION", &attributes)?;
    if !submission.contacts.is_empty() {
        writer.start("CONTACTS", &[])?;
        for contact in &submission.contacts {
            writer.empty(
                "CONTACT",
                &[
                    ("name", contact.name.as_str()),
                    ("inform_on_error", contact.inform_on_error.as_str()),
                    ("inform_on_status", contact.inform_on_status.as_str()),
                ],
            )?;
        }
        writer.end("CONTACTS")?;
    }
    writer.start("ACTIONS", &[])?;
    for action in &submission.actions {
        writer.start("ACTION", &[])?;
        match action {
            SubmissionAction::Add { source, schema } => writer.empty(
                "ADD",
                &[
                    ("source", source.as_str()),
                    ("schema", schema.as_str()),
                ],
            )?,
            SubmissionAction::Validate { source, schema } => writer.empty(
                "VALIDATE",
                &[
                    ("source", source.as_str()),
                    ("schema", schema.as_str()),
                ],
            )?,
            SubmissionAction::Protect => writer.empty("PROTECT", &[])?,
        }
        writer.end("ACTION")?;
    }
    writer.end("ACTIONS")?;
    writer.end("SUBMISSION")
}

/// One receipted element mapped back to a local entity class.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceiptEntry {
    pub kind: EntityKind,
    pub alias: String,
    pub accession: String,
}

/// A parsed submission receipt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Receipt {
    pub success: bool,
    pub entries: Vec<ReceiptEntry>,
}

impl Receipt {
    /// Parse a receipt document. Every SAMPLE or ANALYSIS element must carry
    /// both `alias` and `accession`; an element missing either is treated as
    /// a validation error rather than silently skipped.
    pub fn parse(xml: &str) -> Result<Receipt, EgaError> {
        let success = receipt_success(xml)?;
        let mut entries = Vec::new();

        let mut reader = Reader::from_str(xml);
        loop {
            match reader.read_event().map_err(xml_err)? {
                Event::Start(element) | Event::Empty(element) => {
                    let name = element.name().as_ref().to_vec();
                    let Some(kind) = EntityKind::ALL
                        .into_iter()
                        .find(|kind| kind.receipt_tag().as_bytes() == name.as_slice())
                    else {
                        continue;
                    };
                    let alias = attribute_value(&element, "alias")?.ok_or_else(|| {
                        EgaError::Xml(format!(
                            "{} element without alias attribute",
                            kind.receipt_tag()
                        ))
                    })?;
                    let accession = attribute_value(&element, "accession")?.ok_or_else(|| {
                        EgaError::Xml(format!(
                            "{} element {alias} without accession attribute",
                            kind.receipt_tag()
                        ))
                    })?;
                    entries.push(ReceiptEntry {
                        kind,
                        alias,
                        accession,
                    });
                }
                Event::Eof => break,
                _ => {}
            }
        }

        Ok(Receipt { success, entries })
    }
}

/// Read the root element's `success` attribute only. A VALIDATE receipt
/// legitimately carries elements without accessions, so the submission
/// client checks success without parsing entries.
pub fn receipt_success(xml: &str) -> Result<bool, EgaError> {
    let mut reader = Reader::from_str(xml);
    loop {
        match reader.read_event().map_err(xml_err)? {
            Event::Start(element) | Event::Empty(element) => {
                let value = attribute_value(&element, "success")?
                    .ok_or_else(|| EgaError::Xml("root success attribute missing".to_string()))?;
                return match value.as_str() {
                    "true" => Ok(true),
                    "false" => Ok(false),
                    other => Err(EgaError::Xml(format!(
                        "unexpected success attribute value: {other}"
                    ))),
                };
            }
            Event::Eof => {
                return Err(EgaError::Xml("no root element found".to_string()));
            }
            _ => {}
        }
    }
}

/// Collect `attribute` from every `tag` element in the document, e.g.
/// SAMPLE_REF/@refname from a prepared ANALYSIS.xml or ANALYSIS/@accession
/// from a receipt. Elements without the attribute are skipped.
pub fn collect_attribute(xml: &str, tag: &str, attribute: &str) -> Result<Vec<String>, EgaError> {
    let mut values = Vec::new();
    let mut reader = Reader::from_str(xml);
    loop {
        match reader.read_event().map_err(xml_err)? {
            Event::Start(element) | Event::Empty(element) => {
                if element.name().as_ref() != tag.as_bytes() {
                    continue;
                }
                if let Some(value) = attribute_value(&element, attribute)? {
                    values.push(value);
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(values)
}

fn attribute_value(element: &BytesStart<'_>, name: &str) -> Result<Option<String>, EgaError> {
    for attribute in element.attributes() {
        let attribute = attribute.map_err(xml_err)?;
        if attribute.key.as_ref() == name.as_bytes() {
            let value = attribute.unescape_value().map_err(xml_err)?;
            return Ok(Some(value.into_owned()));
        }
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use crate::metadata::{
        AnalysisFile, AnalysisFileType, ChecksumMethod, ReferenceAlignment, SampleRef, SequenceRef,
    };

    use super::*;

    fn analysis() -> Analysis {
        Analysis {
            alias: "0a1b2c3d".to_string(),
            accession: None,
            title: "a.bam".to_string(),
            description: "tumour wgs bam".to_string(),
            study_ref: "EGAS00001000123".parse().unwrap(),
            sample_refs: vec![SampleRef {
                label: "rg1,rg2".to_string(),
                refname: "9f8e7d6c".to_string(),
            }],
            reference_alignment: ReferenceAlignment {
                assembly_accession: "GCA_000001405.15".to_string(),
                sequences: vec![SequenceRef {
                    accession: "CM000663.2".to_string(),
                    label: "1".to_string(),
                }],
            },
            files: vec![AnalysisFile {
                filename: "box/a.bam.gpg".into(),
                filetype: AnalysisFileType::Bam,
                checksum_method: ChecksumMethod::Md5,
                checksum: "2".repeat(32),
                unencrypted_checksum: "1".repeat(32),
            }],
            attributes: vec![Attribute::new("NOTE", "note text")],
        }
    }

    #[test]
    fn analysis_set_serializes_plain_uppercase_tags() {
        let xml = write_analysis_set(&AnalysisSet {
            analyses: vec![analysis()],
        })
        .unwrap();
        assert!(xml.contains("<ANALYSIS_SET"));
        assert!(xml.contains("<ANALYSIS alias=\"0a1b2c3d\""));
        assert!(xml.contains("<SAMPLE_REF label=\"rg1,rg2\" refname=\"9f8e7d6c\""));
        assert!(xml.contains("<STANDARD accession=\"GCA_000001405.15\""));
        assert!(xml.contains("unencrypted_checksum"));
        assert!(!xml.contains("xsi:type"));
    }

    #[test]
    fn analysis_accession_attribute_omitted_when_absent() {
        let without = write_analysis_set(&AnalysisSet {
            analyses: vec![analysis()],
        })
        .unwrap();
        assert!(!without.contains("<ANALYSIS alias=\"0a1b2c3d\" accession="));

        let mut accessioned = analysis();
        accessioned.accession = Some("EGAZ00001000001".to_string());
        let with = write_analysis_set(&AnalysisSet {
            analyses: vec![accessioned],
        })
        .unwrap();
        assert!(with.contains("accession=\"EGAZ00001000001\""));
    }

    #[test]
    fn submission_set_actions_in_order() {
        let submission = Submission {
            alias: Some("js 20260210".to_string()),
            broker_name: "EGA".to_string(),
            center_name: "Example Institute".to_string(),
            lab_name: "Sequencing Core".to_string(),
            contacts: Vec::new(),
            actions: vec![
                SubmissionAction::Add {
                    source: "ANALYSIS.xml".to_string(),
                    schema: crate::domain::SchemaKind::Analysis,
                },
                SubmissionAction::Protect,
            ],
        };
        let xml = write_submission_set(&SubmissionSet {
            submissions: vec![submission],
        })
        .unwrap();
        let add = xml.find("<ADD source=\"ANALYSIS.xml\" schema=\"analysis\"").unwrap();
        let protect = xml.find("<PROTECT/>").unwrap();
        assert!(add < protect);
    }

    #[test]
    fn dataset_document_contains_refs_and_links() {
        let datasets = Datasets {
            datasets: vec![Dataset {
                alias: "ds1".to_string(),
                title: "title".to_string(),
                description: "desc".to_string(),
                analysis_refs: vec!["EGAZ00001000001".parse().unwrap()],
                policy_ref: "EGAP00001000001".parse().unwrap(),
                links: vec![crate::metadata::Link {
                    label: "ICGC Data Portal".to_string(),
                    url: "http://dcc.icgc.org".to_string(),
                }],
            }],
        };
        let xml = write_datasets(&datasets).unwrap();
        assert!(xml.contains("<ANALYSIS_REF accession=\"EGAZ00001000001\""));
        assert!(xml.contains("<POLICY_REF accession=\"EGAP00001000001\""));
        assert!(xml.contains("<URL>http://dcc.icgc.org</URL>"));
    }

    #[test]
    fn parse_receipt_entries() {
        let xml = r#"<?xml version="1.0" encoding="UTF-8"?>
            <RECEIPT success="true">
                <ANALYSIS alias="0a1b2c3d" accession="EGAZ00001000001"/>
                <SAMPLE alias="9f8e7d6c" accession="EGAN00001000002"/>
            </RECEIPT>"#;
        let receipt = Receipt::parse(xml).unwrap();
        assert!(receipt.success);
        assert_eq!(receipt.entries.len(), 2);
        assert_eq!(receipt.entries[0].kind, EntityKind::AlignedReadGroupSet);
        assert_eq!(receipt.entries[0].accession, "EGAZ00001000001");
        assert_eq!(receipt.entries[1].kind, EntityKind::CollectedSample);
        assert_eq!(receipt.entries[1].alias, "9f8e7d6c");
    }

    #[test]
    fn receipt_element_without_accession_is_an_error() {
        let xml = r#"<RECEIPT success="true"><SAMPLE alias="9f8e7d6c"/></RECEIPT>"#;
        let err = Receipt::parse(xml).unwrap_err();
        assert_matches!(err, EgaError::Xml(_));
        assert!(err.to_string().contains("9f8e7d6c"));
    }

    #[test]
    fn receipt_success_flag_only() {
        assert!(receipt_success(r#"<RECEIPT success="true"/>"#).unwrap());
        assert!(!receipt_success(r#"<RECEIPT success="false"/>"#).unwrap());
        assert_matches!(
            receipt_success(r#"<RECEIPT success="yes"/>"#),
            Err(EgaError::Xml(_))
        );
        assert_matches!(receipt_success(r#"<RECEIPT/>"#), Err(EgaError::Xml(_)));
    }

    #[test]
    fn collect_attribute_harvests_refnames() {
        let xml = r#"<ANALYSIS_SET>
            <ANALYSIS alias="a"><SAMPLE_REF label="rg" refname="uuid-1"/></ANALYSIS>
            <ANALYSIS alias="b"><SAMPLE_REF refname="uuid-2"/></ANALYSIS>
            <ANALYSIS alias="c"><SAMPLE_REF label="no refname"/></ANALYSIS>
        </ANALYSIS_SET>"#;
        let refnames = collect_attribute(xml, "SAMPLE_REF", "refname").unwrap();
        assert_eq!(refnames, vec!["uuid-1", "uuid-2"]);
    }

    #[test]
    fn escapes_attribute_and_text_content() {
        let mut record = analysis();
        record.title = "a<b>&\"c\"".to_string();
        let xml = write_analysis_set(&AnalysisSet {
            analyses: vec![record],
        })
        .unwrap();
        assert!(xml.contains("a&lt;b&gt;&amp;"));
    }
}
