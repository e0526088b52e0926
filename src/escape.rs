//! Escape analysis of the constructing reference: walks constructor
//! instruction streams looking for any operation that makes `this` (or a
//! local aliasing it) observable before the constructor returns.

use anyhow::Result;
use std::collections::HashSet;

use crate::checker::Checker;
use crate::ir::{DecodedClass, DecodedMethod, Insn, method_arg_count, method_returns_value};
use crate::model::{CheckOutcome, CodeLocation, Reason, ReasonKind, Verdict};
use crate::session::FieldTypeResolver;

/// Abstract operand value: the reference under construction, or anything
/// else. One level of precision is enough for one-hop alias tracking.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Value {
    This,
    Other,
}

pub struct EscapedThis;

impl Checker for EscapedThis {
    fn name(&self) -> &'static str {
        "escaped-this"
    }

    fn check(
        &self,
        class: &DecodedClass,
        _resolver: &FieldTypeResolver<'_>,
    ) -> Result<CheckOutcome> {
        let mut reasons = Vec::new();
        for ctor in class.methods.iter().filter(|m| m.is_constructor) {
            reasons.extend(scan_constructor(class, ctor));
        }

        if reasons.is_empty() {
            Ok(CheckOutcome::clean())
        } else {
            Ok(CheckOutcome::flagged(Verdict::NotImmutable, reasons))
        }
    }
}

/// Linear abstract interpretation of one constructor. Local 0 starts as
/// `this`; stores propagate the alias one hop. The simulation is reset at
/// instructions whose stack effect is not modelled, trading completeness
/// for no false positives.
fn scan_constructor(class: &DecodedClass, ctor: &DecodedMethod) -> Vec<Reason> {
    let mut aliased: HashSet<u16> = HashSet::from([0]);
    let mut stack: Vec<Value> = Vec::new();
    let mut reasons = Vec::new();

    for insn in &ctor.instructions {
        match insn {
            Insn::Load(slot) => {
                let value = if aliased.contains(slot) {
                    Value::This
                } else {
                    Value::Other
                };
                stack.push(value);
            }
            Insn::Store(slot) => {
                if stack.pop() == Some(Value::This) {
                    aliased.insert(*slot);
                } else {
                    aliased.remove(slot);
                }
            }
            Insn::Dup => {
                let top = stack.last().copied().unwrap_or(Value::Other);
                stack.push(top);
            }
            Insn::New(_) => stack.push(Value::Other),
            Insn::GetField { .. } => {
                stack.pop();
                stack.push(Value::Other);
            }
            Insn::GetStatic { .. } => stack.push(Value::Other),
            Insn::PutStatic { owner, field } => {
                if stack.pop() == Some(Value::This) {
                    reasons.push(escape_reason(
                        class,
                        ctor,
                        format!("is stored in static field {owner}.{field}"),
                    ));
                }
            }
            Insn::PutField { owner, field } => {
                let value = stack.pop();
                let target = stack.pop();
                if value == Some(Value::This) && target != Some(Value::This) {
                    reasons.push(escape_reason(
                        class,
                        ctor,
                        format!("is stored in field {owner}.{field} of another object"),
                    ));
                }
            }
            Insn::Invoke {
                kind,
                owner,
                name,
                descriptor,
            } => {
                let mut passed_as_argument = false;
                for _ in 0..method_arg_count(descriptor) {
                    if stack.pop() == Some(Value::This) {
                        passed_as_argument = true;
                    }
                }
                if kind.has_receiver() {
                    // A chained this()/super() call, or any instance method
                    // invoked on the object itself, is not a publication.
                    let _receiver = stack.pop();
                }
                if passed_as_argument {
                    reasons.push(escape_reason(
                        class,
                        ctor,
                        format!("is passed to {owner}.{name} before construction completes"),
                    ));
                }
                if method_returns_value(descriptor) {
                    stack.push(Value::Other);
                }
            }
            Insn::InvokeDynamic { descriptor } => {
                let mut captured = false;
                for _ in 0..method_arg_count(descriptor) {
                    if stack.pop() == Some(Value::This) {
                        captured = true;
                    }
                }
                if captured {
                    reasons.push(escape_reason(
                        class,
                        ctor,
                        "is captured by a lambda or inner-class instance".to_string(),
                    ));
                }
                if method_returns_value(descriptor) {
                    stack.push(Value::Other);
                }
            }
            Insn::AReturn => {
                if stack.pop() == Some(Value::This) {
                    reasons.push(escape_reason(class, ctor, "is returned".to_string()));
                }
                stack.clear();
            }
            Insn::Other { pops, pushes } => {
                for _ in 0..*pops {
                    stack.pop();
                }
                for _ in 0..*pushes {
                    stack.push(Value::Other);
                }
            }
            Insn::Opaque => stack.clear(),
        }
    }

    reasons
}

fn escape_reason(class: &DecodedClass, ctor: &DecodedMethod, what: String) -> Reason {
    Reason::new(
        ReasonKind::EscapedThis,
        format!(
            "the object under construction {what} in constructor <init>{}",
            ctor.descriptor
        ),
        CodeLocation::class_level(class.name.clone()),
    )
}
