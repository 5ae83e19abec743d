use std::collections::BTreeSet;

use camino::Utf8Path;
use noodles::bam;

use crate::error::EgaError;

/// Facts embedded in an alignment file header: the read groups it declares
/// and the reference sequences it was aligned against.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderFacts {
    pub read_group_ids: Vec<String>,
    pub sequence_names: BTreeSet<String>,
}

pub trait AlignmentReader: Send + Sync {
    fn read_header(&self, path: &Utf8Path) -> Result<HeaderFacts, EgaError>;
}

/// Reads bam headers with noodles.
#[derive(Debug, Clone, Copy, Default)]
pub struct BamHeaderReader;

impl AlignmentReader for BamHeaderReader {
    fn read_header(&self, path: &Utf8Path) -> Result<HeaderFacts, EgaError> {
        let mut reader = bam::io::reader::Builder::default()
            .build_from_path(path.as_std_path())
            .map_err(|err| EgaError::AlignmentHeader {
                path: path.to_string(),
                message: err.to_string(),
            })?;
        let header = reader
            .read_header()
            .map_err(|err| EgaError::AlignmentHeader {
                path: path.to_string(),
                message: err.to_string(),
            })?;

        let read_group_ids = header
            .read_groups()
            .keys()
            .map(|id| String::from_utf8_lossy(id.as_ref()).into_owned())
            .collect();
        let sequence_names = header
            .reference_sequences()
            .keys()
            .map(|name| String::from_utf8_lossy(name.as_ref()).into_owned())
            .collect();

        Ok(HeaderFacts {
            read_group_ids,
            sequence_names,
        })
    }
}
