//! Registry of the block selectors this compiler knows how to generate.
//!
//! One entry per supported operation. Selectors not listed here still
//! parse (as [`BlockKind::Unimplemented`]) and only fail if code generation
//! reaches them. Deliberately left out of this port: motion, looks, sound,
//! pen and sensing blocks, broadcasts and clones, `doWait*`, `doForever`,
//! `fork`, the `doStop*` family, list delete/replace, `reportRandom`,
//! `reportMonadic`, `reportIsA`, `reportUnicode*` and `reportRound`.

use crate::error::{CompileError, Result};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Primitive {
    // Hats
    ReceiveGo,
    ReceiveKey,
    ReceiveClick,
    ReceiveInteraction,
    ReceiveMessage,
    ReceiveCondition,

    // Control
    DoIf,
    DoIfElse,
    DoUntil,
    DoRepeat,
    DoForEach,
    DoWarp,
    DoReport,
    DoRun,
    Evaluate,
    ReifyReporter,
    ReifyPredicate,
    ReifyScript,

    // Operators
    ReportTrue,
    ReportFalse,
    ReportNot,
    ReportAnd,
    ReportOr,
    ReportEquals,
    ReportLessThan,
    ReportGreaterThan,
    ReportSum,
    ReportDifference,
    ReportProduct,
    ReportQuotient,
    ReportModulus,
    ReportJoinWords,
    ReportLetter,
    ReportStringSize,

    // Variables and lists
    DoSetVar,
    DoChangeVar,
    DoDeclareVariables,
    ReportNewList,
    ReportCons,
    ReportCar,
    ReportCdr,
    ReportListItem,
    ReportListLength,
    ReportListContainsItem,
    DoAddToList,
    DoInsertInList,
}

const CATALOG: &[(&str, Primitive)] = &[
    ("receiveGo", Primitive::ReceiveGo),
    ("receiveKey", Primitive::ReceiveKey),
    ("receiveClick", Primitive::ReceiveClick),
    ("receiveInteraction", Primitive::ReceiveInteraction),
    ("receiveMessage", Primitive::ReceiveMessage),
    ("receiveCondition", Primitive::ReceiveCondition),
    ("doIf", Primitive::DoIf),
    ("doIfElse", Primitive::DoIfElse),
    ("doUntil", Primitive::DoUntil),
    ("doRepeat", Primitive::DoRepeat),
    ("doForEach", Primitive::DoForEach),
    ("doWarp", Primitive::DoWarp),
    ("doReport", Primitive::DoReport),
    ("doRun", Primitive::DoRun),
    ("evaluate", Primitive::Evaluate),
    ("reifyReporter", Primitive::ReifyReporter),
    ("reifyPredicate", Primitive::ReifyPredicate),
    ("reifyScript", Primitive::ReifyScript),
    ("reportTrue", Primitive::ReportTrue),
    ("reportFalse", Primitive::ReportFalse),
    ("reportNot", Primitive::ReportNot),
    ("reportAnd", Primitive::ReportAnd),
    ("reportOr", Primitive::ReportOr),
    ("reportEquals", Primitive::ReportEquals),
    ("reportLessThan", Primitive::ReportLessThan),
    ("reportGreaterThan", Primitive::ReportGreaterThan),
    ("reportSum", Primitive::ReportSum),
    ("reportDifference", Primitive::ReportDifference),
    ("reportProduct", Primitive::ReportProduct),
    ("reportQuotient", Primitive::ReportQuotient),
    ("reportModulus", Primitive::ReportModulus),
    ("reportJoinWords", Primitive::ReportJoinWords),
    ("reportLetter", Primitive::ReportLetter),
    ("reportStringSize", Primitive::ReportStringSize),
    ("doSetVar", Primitive::DoSetVar),
    ("doChangeVar", Primitive::DoChangeVar),
    ("doDeclareVariables", Primitive::DoDeclareVariables),
    ("reportNewList", Primitive::ReportNewList),
    ("reportCONS", Primitive::ReportCons),
    ("reportCAR", Primitive::ReportCar),
    ("reportCDR", Primitive::ReportCdr),
    ("reportListItem", Primitive::ReportListItem),
    ("reportListLength", Primitive::ReportListLength),
    ("reportListContainsItem", Primitive::ReportListContainsItem),
    ("doAddToList", Primitive::DoAddToList),
    ("doInsertInList", Primitive::DoInsertInList),
];

impl Primitive {
    pub fn from_selector(selector: &str) -> Option<Self> {
        CATALOG
            .iter()
            .find(|(name, _)| *name == selector)
            .map(|(_, primitive)| *primitive)
    }

    pub fn selector(self) -> &'static str {
        CATALOG
            .iter()
            .find(|(_, primitive)| *primitive == self)
            .map(|(name, _)| *name)
            .unwrap_or("")
    }

    pub fn is_hat(self) -> bool {
        matches!(
            self,
            Primitive::ReceiveGo
                | Primitive::ReceiveKey
                | Primitive::ReceiveClick
                | Primitive::ReceiveInteraction
                | Primitive::ReceiveMessage
                | Primitive::ReceiveCondition
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockKind {
    Primitive(Primitive),
    Variable(String),
    /// Known shape, unknown selector. Fails only when generated.
    Unimplemented(String),
}

impl BlockKind {
    pub fn block_name(&self) -> &str {
        match self {
            BlockKind::Primitive(p) => p.selector(),
            BlockKind::Variable(name) => name,
            BlockKind::Unimplemented(selector) => selector,
        }
    }
}

pub fn resolve(attributes: &HashMap<String, String>) -> Result<BlockKind> {
    if let Some(selector) = attributes.get("s") {
        return Ok(match Primitive::from_selector(selector) {
            Some(primitive) => BlockKind::Primitive(primitive),
            None => BlockKind::Unimplemented(selector.clone()),
        });
    }
    if let Some(var) = attributes.get("var") {
        return Ok(BlockKind::Variable(var.clone()));
    }
    Err(CompileError::structure(
        "unknown block shape: 'block' needs an 's' or 'var' attribute",
    ))
}
