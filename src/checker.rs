//! The checker abstraction: one independent struct per concern, assembled
//! into a fixed registry. Precedence between checkers belongs to the
//! verdict merge, never to the checkers themselves.

use anyhow::Result;

use crate::escape::EscapedThis;
use crate::field_checks::{ArrayFields, MutableFieldTypes, NonFinalFields};
use crate::ir::{DecodedClass, Visibility};
use crate::model::{CheckOutcome, CodeLocation, Reason, ReasonKind, Verdict};
use crate::mutation::FieldMutations;
use crate::session::FieldTypeResolver;

pub trait Checker {
    fn name(&self) -> &'static str;

    /// A returned `Err` is an internal failure, not a mutability finding;
    /// the session records it and contributes `CouldNotAnalyse`.
    fn check(
        &self,
        class: &DecodedClass,
        resolver: &FieldTypeResolver<'_>,
    ) -> Result<CheckOutcome>;
}

/// The fixed set of checkers run for every class.
pub fn registry() -> Vec<Box<dyn Checker>> {
    vec![
        Box::new(Subclassability),
        Box::new(NonFinalFields),
        Box::new(ArrayFields),
        Box::new(MutableFieldTypes),
        Box::new(EscapedThis),
        Box::new(FieldMutations),
    ]
}

/// A non-final class with a reachable constructor can be subclassed, and a
/// subclass is free to violate its invariants.
pub struct Subclassability;

impl Checker for Subclassability {
    fn name(&self) -> &'static str {
        "subclassability"
    }

    fn check(
        &self,
        class: &DecodedClass,
        _resolver: &FieldTypeResolver<'_>,
    ) -> Result<CheckOutcome> {
        if class.flags.is_final {
            return Ok(CheckOutcome::clean());
        }

        let subclassable = class
            .methods
            .iter()
            .filter(|m| m.is_constructor)
            .any(|m| m.visibility != Visibility::Private);
        if !subclassable {
            return Ok(CheckOutcome::clean());
        }

        let reason = Reason::new(
            ReasonKind::CanBeSubclassed,
            format!(
                "{} is not final and has a non-private constructor, so subclasses can introduce mutability",
                class.name
            ),
            CodeLocation::class_level(class.name.clone()),
        );
        Ok(CheckOutcome::flagged(
            Verdict::EffectivelyImmutable,
            vec![reason],
        ))
    }
}
