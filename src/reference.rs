use std::fmt;
use std::sync::LazyLock;

use serde::{Deserialize, Serialize};

use crate::error::EgaError;

/// A species the reference catalog knows about.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Species {
    pub taxon_id: u32,
    pub scientific_name: String,
    pub common_name: String,
}

impl Species {
    fn new(taxon_id: u32, scientific_name: &str, common_name: &str) -> Self {
        Self {
            taxon_id,
            scientific_name: scientific_name.to_string(),
            common_name: common_name.to_string(),
        }
    }

    /// Look up a species by scientific name.
    pub fn from_name(name: &str) -> Result<&'static Species, EgaError> {
        SPECIES
            .iter()
            .find(|species| species.scientific_name == name)
            .ok_or_else(|| EgaError::UnknownSpecies(name.to_string()))
    }
}

impl fmt::Display for Species {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.scientific_name)
    }
}

/// One named sequence of a reference assembly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferenceSequence {
    pub name: String,
    pub accession: String,
}

/// A fixed catalog entry describing a reference assembly: loaded once at
/// process start, never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferenceAssembly {
    pub name: String,
    pub accession: String,
    pub species: Species,
    pub sequences: Vec<ReferenceSequence>,
}

impl ReferenceAssembly {
    /// Look up an assembly by catalog name.
    pub fn from_name(name: &str) -> Result<&'static ReferenceAssembly, EgaError> {
        CATALOG
            .iter()
            .find(|assembly| assembly.name == name)
            .ok_or_else(|| EgaError::UnknownAssembly(name.to_string()))
    }

    /// All catalog names, sorted, for CLI help and argument validation.
    pub fn names() -> Vec<&'static str> {
        let mut names: Vec<&'static str> =
            CATALOG.iter().map(|assembly| assembly.name.as_str()).collect();
        names.sort_unstable();
        names
    }

    /// Sequences ordered by a stable key (sequence name) for serialization.
    pub fn sequences_sorted(&self) -> Vec<&ReferenceSequence> {
        let mut sequences: Vec<&ReferenceSequence> = self.sequences.iter().collect();
        sequences.sort_by(|a, b| a.name.cmp(&b.name));
        sequences
    }
}

impl fmt::Display for ReferenceAssembly {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

static SPECIES: LazyLock<Vec<Species>> = LazyLock::new(|| {
    vec![
        Species::new(9606, "Homo sapiens", "human"),
        Species::new(10090, "Mus musculus", "house mouse"),
    ]
});

static CATALOG: LazyLock<Vec<ReferenceAssembly>> = LazyLock::new(|| {
    vec![
        human_assembly("GRCh37", "GCA_000001405.1", 1),
        human_assembly("GRCh38", "GCA_000001405.15", 2),
    ]
});

// GenBank chromosome accessions CM000663..CM000686 cover 1..22, X, Y; the
// trailing version distinguishes GRCh37 (.1) from GRCh38 (.2). The
// mitochondrial sequence J01415.2 is shared by both assemblies.
fn human_assembly(name: &str, accession: &str, version: u32) -> ReferenceAssembly {
    let names = (1..=22)
        .map(|n| n.to_string())
        .chain(["X".to_string(), "Y".to_string()]);
    let mut sequences: Vec<ReferenceSequence> = names
        .enumerate()
        .map(|(i, seq_name)| ReferenceSequence {
            name: seq_name,
            accession: format!("CM{:06}.{version}", 663 + i),
        })
        .collect();
    sequences.push(ReferenceSequence {
        name: "MT".to_string(),
        accession: "J01415.2".to_string(),
    });
    ReferenceAssembly {
        name: name.to_string(),
        accession: accession.to_string(),
        species: Species::new(9606, "Homo sapiens", "human"),
        sequences,
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn lookup_known_assembly() {
        let grch37 = ReferenceAssembly::from_name("GRCh37").unwrap();
        assert_eq!(grch37.accession, "GCA_000001405.1");
        assert_eq!(grch37.species.taxon_id, 9606);
        assert_eq!(grch37.sequences.len(), 25);
    }

    #[test]
    fn lookup_unknown_assembly() {
        let err = ReferenceAssembly::from_name("hg19").unwrap_err();
        assert_matches!(err, EgaError::UnknownAssembly(_));
    }

    #[test]
    fn chromosome_accessions_track_assembly_version() {
        let grch37 = ReferenceAssembly::from_name("GRCh37").unwrap();
        let grch38 = ReferenceAssembly::from_name("GRCh38").unwrap();
        let chr1_37 = grch37.sequences.iter().find(|s| s.name == "1").unwrap();
        let chr1_38 = grch38.sequences.iter().find(|s| s.name == "1").unwrap();
        assert_eq!(chr1_37.accession, "CM000663.1");
        assert_eq!(chr1_38.accession, "CM000663.2");
        let y = grch38.sequences.iter().find(|s| s.name == "Y").unwrap();
        assert_eq!(y.accession, "CM000686.2");
    }

    #[test]
    fn sequences_sorted_is_stable_by_name() {
        let grch38 = ReferenceAssembly::from_name("GRCh38").unwrap();
        let sorted = grch38.sequences_sorted();
        let names: Vec<&str> = sorted.iter().map(|s| s.name.as_str()).collect();
        let mut expected = names.clone();
        expected.sort_unstable();
        assert_eq!(names, expected);
    }

    #[test]
    fn species_lookup() {
        let human = Species::from_name("Homo sapiens").unwrap();
        assert_eq!(human.common_name, "human");
        assert_matches!(
            Species::from_name("Rattus rattus"),
            Err(EgaError::UnknownSpecies(_))
        );
    }

    #[test]
    fn catalog_names_sorted() {
        assert_eq!(ReferenceAssembly::names(), vec!["GRCh37", "GRCh38"]);
    }
}
