use tracing::{info, warn};

use crate::error::EgaError;
use crate::graph::{AccessionUpdate, EntityKind, GraphStore};
use crate::xml::Receipt;

const MSG_NONE_FOUND: &str = "no accessions found in input";

/// Outcome counts of one reconciliation run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpdateSummary {
    pub updated: usize,
    pub unchanged: usize,
}

/// Reconcile archive-issued accessions from a receipt into the graph store.
///
/// Each receipted element's alias is assumed to be the uuid of a local
/// entity of the matching kind. Detection runs over the whole receipt
/// before anything is written: any missing entity or conflicting existing
/// accession fails the call and nothing is persisted. Staged updates are
/// applied in a single bulk write, so re-running with the same receipt is
/// safe and writes nothing.
pub fn update_accessions(
    store: &dyn GraphStore,
    receipt: &Receipt,
) -> Result<UpdateSummary, EgaError> {
    let mut errors = Vec::new();
    let mut updates = Vec::new();
    let mut summary = UpdateSummary::default();
    let mut found = false;

    for kind in EntityKind::ALL {
        for entry in receipt
            .entries
            .iter()
            .filter(|entry| entry.kind == kind)
        {
            found = true;
            let iri = kind.iri(&entry.alias);
            match store.find_entity(kind, &iri)? {
                None => {
                    errors.push(format!(
                        "{}: {} implied {iri} not found in db",
                        kind.receipt_tag(),
                        entry.alias
                    ));
                }
                Some(entity) => match entity.accession.as_deref() {
                    Some(existing) if existing != entry.accession => {
                        errors.push(format!(
                            "{iri} existing accession {existing} conflicts with new value {}",
                            entry.accession
                        ));
                    }
                    Some(existing) => {
                        info!("update not required, {iri} already has accession {existing}");
                        summary.unchanged += 1;
                    }
                    None => {
                        info!("{iri} accession marked for update: {}", entry.accession);
                        updates.push(AccessionUpdate {
                            kind,
                            iri,
                            accession: entry.accession.clone(),
                        });
                    }
                },
            }
        }
    }

    if !errors.is_empty() {
        return Err(EgaError::AccessionUpdate(errors.join("\n")));
    }
    if !updates.is_empty() {
        summary.updated = updates.len();
        store.bulk_merge(&updates)?;
    } else if !found {
        warn!("{MSG_NONE_FOUND}");
    }
    Ok(summary)
}
