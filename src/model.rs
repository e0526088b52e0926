use serde::{Deserialize, Serialize};
use std::fmt;

/// Canonical class name. Accepts dotted (`a.b.C`) or slashed (`a/b/C`)
/// input; equality and hashing are on the dotted form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct ClassName(String);

impl ClassName {
    pub fn new(name: &str) -> Self {
        Self(name.replace('/', "."))
    }

    pub fn as_dotted(&self) -> &str {
        &self.0
    }

    /// Relative classpath entry for this class, e.g. `a/b/C.class`.
    pub fn class_file_path(&self) -> String {
        format!("{}.class", self.0.replace('.', "/"))
    }
}

impl fmt::Display for ClassName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Immutability classification, ordered by severity. Worst wins in a merge.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize,
)]
pub enum Verdict {
    Immutable,
    EffectivelyImmutable,
    CouldNotAnalyse,
    NotImmutable,
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Verdict::Immutable => "Immutable",
            Verdict::EffectivelyImmutable => "EffectivelyImmutable",
            Verdict::CouldNotAnalyse => "CouldNotAnalyse",
            Verdict::NotImmutable => "NotImmutable",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReasonKind {
    CanBeSubclassed,
    PublishedNonFinalField,
    FieldCanBeReassigned,
    ArrayField,
    MutableTypeToField,
    AbstractTypeToField,
    EscapedThis,
    CouldNotAnalyse,
    HardcodedResult,
}

/// Where a reason points: the class itself, or one of its fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CodeLocation {
    pub class: ClassName,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
}

impl CodeLocation {
    pub fn class_level(class: ClassName) -> Self {
        Self { class, field: None }
    }

    pub fn field_level(class: ClassName, field: &str) -> Self {
        Self {
            class,
            field: Some(field.to_string()),
        }
    }
}

impl fmt::Display for CodeLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.field {
            Some(field) => write!(f, "{}.{}", self.class, field),
            None => write!(f, "{}", self.class),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Reason {
    pub kind: ReasonKind,
    pub message: String,
    pub location: CodeLocation,
}

impl Reason {
    pub fn new(kind: ReasonKind, message: impl Into<String>, location: CodeLocation) -> Self {
        Self {
            kind,
            message: message.into(),
            location,
        }
    }
}

/// Invariant: `verdict == Immutable` exactly when `reasons` is empty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AnalysisResult {
    pub class: ClassName,
    pub verdict: Verdict,
    pub reasons: Vec<Reason>,
}

impl AnalysisResult {
    pub fn immutable(class: ClassName) -> Self {
        Self {
            class,
            verdict: Verdict::Immutable,
            reasons: Vec::new(),
        }
    }

    pub fn definite(class: ClassName, verdict: Verdict, reason: Reason) -> Self {
        Self {
            class,
            verdict,
            reasons: vec![reason],
        }
    }
}

/// A checker failure. Non-fatal: the batch keeps going.
#[derive(Debug, Clone, Serialize)]
pub struct AnalysisError {
    pub class: ClassName,
    pub checker: String,
    pub description: String,
}

/// Partial result contributed by a single checker.
#[derive(Debug, Clone)]
pub struct CheckOutcome {
    pub verdict: Verdict,
    pub reasons: Vec<Reason>,
}

impl CheckOutcome {
    pub fn clean() -> Self {
        Self {
            verdict: Verdict::Immutable,
            reasons: Vec::new(),
        }
    }

    pub fn flagged(verdict: Verdict, reasons: Vec<Reason>) -> Self {
        Self { verdict, reasons }
    }
}

/// Merge the per-checker outcomes for one class: worst verdict wins, and
/// reasons accumulate from every contribution that is not `Immutable`.
/// Order-independent.
pub fn merge_outcomes(class: ClassName, outcomes: Vec<CheckOutcome>) -> AnalysisResult {
    let mut verdict = Verdict::Immutable;
    let mut reasons = Vec::new();
    for outcome in outcomes {
        verdict = verdict.max(outcome.verdict);
        if outcome.verdict != Verdict::Immutable {
            reasons.extend(outcome.reasons);
        }
    }
    AnalysisResult {
        class,
        verdict,
        reasons,
    }
}
