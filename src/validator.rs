use crate::schema::{JobField, JobRecord};

/// Decides whether an extracted record is a posting worth keeping.
///
/// True iff at least one of company name, job role, CTC or
/// application link is non-empty. Deliberately permissive: a
/// record with only a CTC still counts, since extraction often
/// returns partial results.
pub fn is_present(record: &JobRecord) -> bool {
    JobField::ALL
        .iter()
        .any(|f| f.is_primary() && !record.get(*f).is_empty())
}
