//! Checkers driven by field declarations: published non-final fields,
//! array-typed fields, and fields whose declared type is itself mutable.

use anyhow::Result;

use crate::checker::Checker;
use crate::ir::{DecodedClass, Visibility};
use crate::model::{CheckOutcome, CodeLocation, Reason, ReasonKind, Verdict};
use crate::session::FieldTypeResolver;

/// Non-final instance fields. Visible ones are reassignable by anyone and
/// condemn the class outright; private ones only downgrade it to
/// effectively immutable (reassignment from inside the class is the
/// mutation checker's concern).
pub struct NonFinalFields;

impl Checker for NonFinalFields {
    fn name(&self) -> &'static str {
        "non-final-fields"
    }

    fn check(
        &self,
        class: &DecodedClass,
        _resolver: &FieldTypeResolver<'_>,
    ) -> Result<CheckOutcome> {
        let mut verdict = Verdict::Immutable;
        let mut reasons = Vec::new();

        for field in class.fields.iter().filter(|f| !f.is_static && !f.is_final) {
            let location = CodeLocation::field_level(class.name.clone(), &field.name);
            if field.visibility == Visibility::Private {
                verdict = verdict.max(Verdict::EffectivelyImmutable);
                reasons.push(Reason::new(
                    ReasonKind::FieldCanBeReassigned,
                    format!("private field {} is not final", field.name),
                    location,
                ));
            } else {
                verdict = verdict.max(Verdict::NotImmutable);
                reasons.push(Reason::new(
                    ReasonKind::PublishedNonFinalField,
                    format!(
                        "field {} is visible outside {} and not final",
                        field.name, class.name
                    ),
                    location,
                ));
            }
        }

        Ok(CheckOutcome::flagged(verdict, reasons))
    }
}

/// Array-typed instance fields are mutable through element aliasing no
/// matter how the reference itself is declared. No defensive-copy idiom is
/// recognized; static arrays are class-level state and exempt.
pub struct ArrayFields;

impl Checker for ArrayFields {
    fn name(&self) -> &'static str {
        "array-fields"
    }

    fn check(
        &self,
        class: &DecodedClass,
        _resolver: &FieldTypeResolver<'_>,
    ) -> Result<CheckOutcome> {
        let mut reasons = Vec::new();
        for field in class.fields.iter().filter(|f| !f.is_static) {
            if field.ty.is_array() {
                reasons.push(Reason::new(
                    ReasonKind::ArrayField,
                    format!(
                        "field {} is an array; its elements can be mutated through any alias",
                        field.name
                    ),
                    CodeLocation::field_level(class.name.clone(), &field.name),
                ));
            }
        }

        if reasons.is_empty() {
            Ok(CheckOutcome::clean())
        } else {
            Ok(CheckOutcome::flagged(Verdict::NotImmutable, reasons))
        }
    }
}

/// The recursive checker: a field of a reference type is only as immutable
/// as that type. Resolution goes through the session, which is what makes
/// the analysis cross-class.
pub struct MutableFieldTypes;

impl Checker for MutableFieldTypes {
    fn name(&self) -> &'static str {
        "mutable-field-types"
    }

    fn check(
        &self,
        class: &DecodedClass,
        resolver: &FieldTypeResolver<'_>,
    ) -> Result<CheckOutcome> {
        let mut reasons = Vec::new();

        for field in class.fields.iter().filter(|f| !f.is_static) {
            let Some(type_name) = field.ty.reference() else {
                continue;
            };
            if resolver.assumed_immutable(type_name) {
                continue;
            }

            let resolved = resolver.resolve(type_name);
            let location = CodeLocation::field_level(class.name.clone(), &field.name);
            if resolver.is_abstract(type_name) {
                // The declared type says nothing about the runtime type, so
                // even a clean verdict for the type itself proves nothing.
                reasons.push(Reason::new(
                    ReasonKind::AbstractTypeToField,
                    format!(
                        "field {} declares abstract type {}; the runtime type is unknown and must be assumed mutable",
                        field.name, type_name
                    ),
                    location,
                ));
            } else if resolved.verdict != Verdict::Immutable {
                reasons.push(Reason::new(
                    ReasonKind::MutableTypeToField,
                    format!(
                        "field {} has type {} which is {}",
                        field.name, type_name, resolved.verdict
                    ),
                    location,
                ));
            }
        }

        if reasons.is_empty() {
            Ok(CheckOutcome::clean())
        } else {
            Ok(CheckOutcome::flagged(Verdict::NotImmutable, reasons))
        }
    }
}
