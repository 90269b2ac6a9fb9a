//! Application lifecycle: `discovered -> eligible -> {applied | skipped | failed}`.
//!
//! `eligible` is persisted as [`ApplicationStatus::ToApply`]. Hand-entered labels
//! load as [`Stage::Closed`] and are never moved. Every mutation of a tracker
//! entry's status goes through this module.

use std::path::Path;

use chrono::{DateTime, Utc};
use jobbot_adapters::ApplyOutcome;
use jobbot_core::{ApplicationStatus, Listing, TrackerEntry};
use thiserror::Error;

use crate::filter::FilterDecision;

/// Lifecycle stage of a persisted entry. Listings that have not been admitted
/// yet have no entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Eligible,
    Applied,
    Skipped,
    Failed,
    Closed,
}

impl From<&ApplicationStatus> for Stage {
    fn from(status: &ApplicationStatus) -> Self {
        match status {
            ApplicationStatus::ToApply => Stage::Eligible,
            ApplicationStatus::Applied => Stage::Applied,
            ApplicationStatus::Skipped => Stage::Skipped,
            ApplicationStatus::Failed => Stage::Failed,
            ApplicationStatus::Other(_) => Stage::Closed,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransitionError {
    #[error("{link}: cannot move from {from} to {to}")]
    Invalid {
        link: String,
        from: ApplicationStatus,
        to: ApplicationStatus,
    },
    #[error("{link}: no cover letter recorded before applying")]
    MissingCoverLetter { link: String },
    #[error("{link}: cover letter path is empty")]
    EmptyCoverLetterPath { link: String },
}

fn append_note(entry: &mut TrackerEntry, note: &str) {
    let note = note.trim();
    if note.is_empty() {
        return;
    }
    if entry.notes.trim().is_empty() {
        entry.notes = note.to_string();
    } else {
        entry.notes = format!("{}; {note}", entry.notes.trim_end());
    }
}

fn require_eligible(entry: &TrackerEntry, to: ApplicationStatus) -> Result<(), TransitionError> {
    if Stage::from(&entry.status) == Stage::Eligible {
        Ok(())
    } else {
        Err(TransitionError::Invalid {
            link: entry.link.clone(),
            from: entry.status.clone(),
            to,
        })
    }
}

/// Creates the tracker entry for a newly discovered listing. Excluded
/// listings are stored as skipped with the reason in the notes.
pub fn admit_listing(listing: &Listing, decision: &FilterDecision) -> TrackerEntry {
    match decision {
        FilterDecision::Eligible => TrackerEntry::from_listing(listing, ApplicationStatus::ToApply, ""),
        FilterDecision::Excluded(reason) => {
            TrackerEntry::from_listing(listing, ApplicationStatus::Skipped, format!("Skipped: {reason}"))
        }
    }
}

pub fn record_cover_letter(entry: &mut TrackerEntry, path: &Path) -> Result<(), TransitionError> {
    require_eligible(entry, ApplicationStatus::ToApply)?;
    let path = path.display().to_string();
    if path.trim().is_empty() {
        return Err(TransitionError::EmptyCoverLetterPath {
            link: entry.link.clone(),
        });
    }
    entry.cover_letter_path = Some(path);
    Ok(())
}

pub fn mark_applied(entry: &mut TrackerEntry, at: DateTime<Utc>) -> Result<(), TransitionError> {
    require_eligible(entry, ApplicationStatus::Applied)?;
    if !entry.has_cover_letter() {
        return Err(TransitionError::MissingCoverLetter {
            link: entry.link.clone(),
        });
    }
    entry.status = ApplicationStatus::Applied;
    entry.applied_at = Some(at);
    append_note(entry, "Applied via automation");
    Ok(())
}

pub fn mark_failed(entry: &mut TrackerEntry, reason: &str) -> Result<(), TransitionError> {
    require_eligible(entry, ApplicationStatus::Failed)?;
    entry.status = ApplicationStatus::Failed;
    append_note(entry, &format!("Failed: {reason}"));
    Ok(())
}

pub fn mark_skipped(entry: &mut TrackerEntry, reason: &str) -> Result<(), TransitionError> {
    require_eligible(entry, ApplicationStatus::Skipped)?;
    entry.status = ApplicationStatus::Skipped;
    append_note(entry, &format!("Skipped: {reason}"));
    Ok(())
}

/// Applies the result of a submission attempt. Anything short of a confirmed
/// submission leaves the entry failed.
pub fn record_outcome(
    entry: &mut TrackerEntry,
    outcome: &ApplyOutcome,
    at: DateTime<Utc>,
) -> Result<ApplicationStatus, TransitionError> {
    match outcome {
        ApplyOutcome::Submitted => mark_applied(entry, at)?,
        ApplyOutcome::Incomplete { reason } => mark_failed(entry, reason)?,
    }
    Ok(entry.status.clone())
}

/// Moves every failed entry back to `to_apply`. Returns how many moved.
pub fn requeue_failed(entries: &mut [TrackerEntry]) -> usize {
    let mut moved = 0;
    for entry in entries
        .iter_mut()
        .filter(|e| e.status == ApplicationStatus::Failed)
    {
        entry.status = ApplicationStatus::ToApply;
        append_note(entry, "Requeued");
        moved += 1;
    }
    moved
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::ExclusionReason;
    use chrono::TimeZone;
    use jobbot_core::RawListing;

    fn at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 2, 9, 30, 0).single().unwrap()
    }

    fn listing() -> Listing {
        Listing::from_raw(
            RawListing {
                source_id: "linkedin".into(),
                native_id: Some("42".into()),
                title: Some("Python Developer".into()),
                company: Some("Globex".into()),
                location: None,
                url: Some("https://www.linkedin.com/jobs/view/42".into()),
            },
            at(),
        )
        .unwrap()
    }

    fn eligible() -> TrackerEntry {
        admit_listing(&listing(), &FilterDecision::Eligible)
    }

    #[test]
    fn excluded_listing_is_admitted_as_skipped_with_reason() {
        let entry = admit_listing(
            &listing(),
            &FilterDecision::Excluded(ExclusionReason::ExcludedCompany("globex".into())),
        );
        assert_eq!(entry.status, ApplicationStatus::Skipped);
        assert!(entry.notes.contains("excluded company 'globex'"));
    }

    #[test]
    fn applied_requires_recorded_cover_letter() {
        let mut entry = eligible();
        let err = mark_applied(&mut entry, at()).unwrap_err();
        assert!(matches!(err, TransitionError::MissingCoverLetter { .. }));
        assert_eq!(entry.status, ApplicationStatus::ToApply);

        record_cover_letter(&mut entry, Path::new("/letters/Cover_Letter_Globex_Python_Developer.txt")).unwrap();
        mark_applied(&mut entry, at()).unwrap();
        assert_eq!(entry.status, ApplicationStatus::Applied);
        assert_eq!(entry.applied_at, Some(at()));
    }

    #[test]
    fn empty_cover_letter_path_is_rejected() {
        let mut entry = eligible();
        let err = record_cover_letter(&mut entry, Path::new("")).unwrap_err();
        assert!(matches!(err, TransitionError::EmptyCoverLetterPath { .. }));
        assert!(!entry.has_cover_letter());
    }

    #[test]
    fn incomplete_submission_is_failed_not_applied() {
        let mut entry = eligible();
        record_cover_letter(&mut entry, Path::new("/letters/a.txt")).unwrap();
        let status = record_outcome(
            &mut entry,
            &ApplyOutcome::Incomplete {
                reason: "cover letter field not found".into(),
            },
            at(),
        )
        .unwrap();
        assert_eq!(status, ApplicationStatus::Failed);
        assert_eq!(entry.applied_at, None);
        assert!(entry.notes.contains("cover letter field not found"));
    }

    #[test]
    fn applied_is_terminal() {
        let mut entry = eligible();
        record_cover_letter(&mut entry, Path::new("/letters/a.txt")).unwrap();
        record_outcome(&mut entry, &ApplyOutcome::Submitted, at()).unwrap();

        let err = mark_failed(&mut entry, "late error").unwrap_err();
        assert_eq!(
            err,
            TransitionError::Invalid {
                link: entry.link.clone(),
                from: ApplicationStatus::Applied,
                to: ApplicationStatus::Failed,
            }
        );
        assert_eq!(requeue_failed(std::slice::from_mut(&mut entry)), 0);
        assert_eq!(entry.status, ApplicationStatus::Applied);
    }

    #[test]
    fn failed_entries_can_be_requeued() {
        let mut entries = vec![eligible(), eligible()];
        mark_failed(&mut entries[0], "timeout").unwrap();
        mark_skipped(&mut entries[1], "not easy apply").unwrap();

        assert_eq!(requeue_failed(&mut entries), 1);
        assert_eq!(entries[0].status, ApplicationStatus::ToApply);
        assert_eq!(entries[0].notes, "Failed: timeout; Requeued");
        assert_eq!(entries[1].status, ApplicationStatus::Skipped);
    }

    #[test]
    fn hand_entered_status_is_closed() {
        let mut entry = eligible();
        entry.status = ApplicationStatus::Other("Interviewing".into());
        assert_eq!(Stage::from(&entry.status), Stage::Closed);

        record_cover_letter(&mut entry, Path::new("/letters/a.txt")).unwrap_err();
        assert!(mark_failed(&mut entry, "timeout").is_err());
        assert_eq!(requeue_failed(std::slice::from_mut(&mut entry)), 0);
        assert_eq!(entry.status.label(), "Interviewing");
    }
}
