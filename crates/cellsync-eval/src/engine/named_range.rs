use cellsync_parse::ASTNode;

use crate::reference::SheetId;

/// Scope of a defined name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NameScope {
    Workbook,
    Sheet(SheetId),
}

/// A defined name: an expression evaluated relative to `home_sheet`.
#[derive(Debug, Clone)]
pub struct NamedRange {
    pub name: String,
    pub scope: NameScope,
    pub expression: String,
    pub ast: ASTNode,
    /// Sheet used for unqualified references inside the expression.
    pub home_sheet: SheetId,
}

/// Lookup key: scope plus the case-folded name.
pub(crate) fn name_key(scope: NameScope, name: &str) -> (NameScope, String) {
    (scope, name.to_uppercase())
}
