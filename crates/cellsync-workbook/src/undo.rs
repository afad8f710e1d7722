//! Undo over the document's action log.
//!
//! The log is the undo stack: undo depth equals its length. There is no redo
//! stack; a caller that wants redo keeps the [`Action`] returned by [`undo`] and
//! hands it to [`redo`].

use std::slice;

use serde::Serialize;

use crate::config::Limits;
use crate::document::{Action, Document};
use crate::error::ValidationError;
use crate::mutation::{ApplyOutcome, Diff, apply_batch, apply_operations};

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UndoOutcome {
    pub success: bool,
    pub undone_action: Option<Action>,
    pub diffs: Vec<Diff>,
    /// Only set if the inverse no longer applies; the action stays logged.
    pub errors: Vec<ValidationError>,
}

/// Pop the most recent action and apply its inverse atomically.
///
/// An empty log is not an error: the outcome reports `success: false`.
pub fn undo(doc: &mut Document, limits: &Limits) -> UndoOutcome {
    let Some(action) = doc.action_log.last().cloned() else {
        return UndoOutcome::default();
    };
    let ApplyOutcome {
        committed,
        diffs,
        errors,
    } = apply_batch(doc, &action.inverse, limits, false);
    if !committed {
        #[cfg(feature = "tracing")]
        tracing::warn!(
            document = %doc.id,
            action = %action.kind,
            errors = errors.len(),
            "inverse no longer applies; action kept"
        );
        return UndoOutcome {
            success: false,
            undone_action: None,
            diffs: Vec::new(),
            errors,
        };
    }
    doc.action_log.pop();
    if action.inverse.is_empty() {
        doc.touch();
    }

    #[cfg(feature = "tracing")]
    tracing::debug!(document = %doc.id, action = %action.kind, depth = doc.action_log.len(), "undid action");
    UndoOutcome {
        success: true,
        undone_action: Some(action),
        diffs,
        errors: Vec::new(),
    }
}

/// Re-apply a forward action previously returned by [`undo`] as a new batch.
pub fn redo(doc: &mut Document, action: &Action, limits: &Limits) -> ApplyOutcome {
    apply_operations(doc, slice::from_ref(&action.payload), limits)
}

/// Number of actions [`undo`] can step back through.
pub fn undo_depth(doc: &Document) -> usize {
    doc.action_log.len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{Cell, RawValue};
    use crate::operations::Operation;

    fn limits() -> Limits {
        Limits::default()
    }

    #[test]
    fn empty_log_reports_nothing_to_undo() {
        let mut doc = Document::new("d");
        let before = doc.clone();
        let out = undo(&mut doc, &limits());
        assert!(!out.success);
        assert!(out.undone_action.is_none());
        assert_eq!(doc, before);
    }

    #[test]
    fn undo_steps_back_one_action_at_a_time() {
        let mut doc = Document::new("d");
        apply_operations(
            &mut doc,
            &[
                Operation::set_value("Sheet1", "A1", 1.0),
                Operation::set_value("Sheet1", "A1", 2.0),
            ],
            &limits(),
        );
        assert_eq!(undo_depth(&doc), 2);

        assert!(undo(&mut doc, &limits()).success);
        assert_eq!(doc.sheets[0].cells["A1"], Cell::raw(1.0));
        assert!(undo(&mut doc, &limits()).success);
        assert!(doc.sheets[0].cells.is_empty());
        assert_eq!(undo_depth(&doc), 0);
    }

    #[test]
    fn redo_reapplies_the_forward_payload() {
        let mut doc = Document::new("d");
        apply_operations(
            &mut doc,
            &[Operation::AddSheet {
                name: "Extra".into(),
                sheet_id: None,
                index: None,
            }],
            &limits(),
        );
        let undone = undo(&mut doc, &limits()).undone_action.unwrap();
        assert_eq!(doc.sheets.len(), 1);

        let out = redo(&mut doc, &undone, &limits());
        assert!(out.committed);
        assert_eq!(doc.sheets[1].id, "sheet-2");
        assert_eq!(doc.action_log.len(), 1);
    }

    #[test]
    fn undoing_a_sheet_deletion_restores_its_contents() {
        let mut doc = Document::new("d");
        apply_operations(
            &mut doc,
            &[
                Operation::AddSheet {
                    name: "Data".into(),
                    sheet_id: None,
                    index: None,
                },
                Operation::set_value("Data", "B2", "kept"),
            ],
            &limits(),
        );
        let snapshot = doc.sheets.clone();
        apply_operations(
            &mut doc,
            &[Operation::DeleteSheet {
                sheet: "Data".into(),
            }],
            &limits(),
        );
        assert!(undo(&mut doc, &limits()).success);
        assert_eq!(doc.sheets, snapshot);
        assert_eq!(
            doc.sheets[1].cells["B2"].raw,
            Some(RawValue::Text("kept".into()))
        );
    }

    #[test]
    fn inverse_that_no_longer_applies_keeps_the_action() {
        let mut doc = Document::new("d");
        apply_operations(
            &mut doc,
            &[Operation::AddSheet {
                name: "Two".into(),
                sheet_id: None,
                index: None,
            }],
            &limits(),
        );
        // Remove the sheet behind the log's back.
        doc.sheets.retain(|s| s.id != "sheet-2");
        let out = undo(&mut doc, &limits());
        assert!(!out.success);
        assert_eq!(out.errors.len(), 1);
        assert_eq!(undo_depth(&doc), 1);
    }
}
