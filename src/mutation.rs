//! Detects instance-field assignment reachable outside construction. The
//! constructor-only call-site map computed here is a value owned by one
//! checker run, never shared state.

use anyhow::Result;
use std::collections::HashMap;

use crate::checker::Checker;
use crate::ir::{DecodedClass, Insn, Visibility};
use crate::model::{CheckOutcome, CodeLocation, Reason, ReasonKind, Verdict};
use crate::session::FieldTypeResolver;

pub type MethodKey = (String, String);

/// For every method of the class: does every call site found anywhere in
/// the class sit inside a constructor? Starts `true` per method and flips
/// to `false` permanently the moment a non-constructor call site is seen.
pub fn constructor_only_calls(class: &DecodedClass) -> HashMap<MethodKey, bool> {
    let mut map: HashMap<MethodKey, bool> = class
        .methods
        .iter()
        .map(|m| ((m.name.clone(), m.descriptor.clone()), true))
        .collect();

    for caller in &class.methods {
        for insn in &caller.instructions {
            if let Insn::Invoke {
                owner,
                name,
                descriptor,
                ..
            } = insn
                && *owner == class.name
                && let Some(entry) = map.get_mut(&(name.clone(), descriptor.clone()))
            {
                *entry &= caller.is_constructor;
            }
        }
    }

    map
}

/// Instance methods other than constructors that assign any of the class's
/// instance fields. A private helper is exempt only while every one of its
/// call sites is inside a constructor.
pub struct FieldMutations;

impl Checker for FieldMutations {
    fn name(&self) -> &'static str {
        "field-mutations"
    }

    fn check(
        &self,
        class: &DecodedClass,
        _resolver: &FieldTypeResolver<'_>,
    ) -> Result<CheckOutcome> {
        let constructor_only = constructor_only_calls(class);
        let mut reasons = Vec::new();

        for m in &class.methods {
            if m.is_constructor || m.is_static {
                continue;
            }
            let exempt = m.visibility == Visibility::Private
                && constructor_only
                    .get(&(m.name.clone(), m.descriptor.clone()))
                    .copied()
                    .unwrap_or(false);
            if exempt {
                continue;
            }

            for insn in &m.instructions {
                if let Insn::PutField { owner, field } = insn
                    && *owner == class.name
                {
                    reasons.push(Reason::new(
                        ReasonKind::FieldCanBeReassigned,
                        format!("field {} is reassigned by method {}", field, m.name),
                        CodeLocation::field_level(class.name.clone(), field),
                    ));
                }
            }
        }

        if reasons.is_empty() {
            Ok(CheckOutcome::clean())
        } else {
            Ok(CheckOutcome::flagged(Verdict::NotImmutable, reasons))
        }
    }
}
