//! Structural model of a decoded class: fields, methods, and the
//! instruction stream checkers pattern-match against.

use crate::model::ClassName;

#[derive(Debug, Clone)]
pub struct DecodedClass {
    pub name: ClassName,
    pub super_name: Option<ClassName>,
    pub interfaces: Vec<ClassName>,
    pub flags: ClassFlags,
    pub fields: Vec<DecodedField>,
    pub methods: Vec<DecodedMethod>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ClassFlags {
    pub is_final: bool,
    pub is_abstract: bool,
    pub is_interface: bool,
    pub is_enum: bool,
}

#[derive(Debug, Clone)]
pub struct DecodedField {
    pub name: String,
    pub ty: FieldType,
    pub visibility: Visibility,
    pub is_final: bool,
    pub is_static: bool,
}

#[derive(Debug, Clone)]
pub struct DecodedMethod {
    pub name: String,
    pub descriptor: String,
    pub visibility: Visibility,
    pub is_constructor: bool,
    pub is_static: bool,
    pub instructions: Vec<Insn>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visibility {
    Private,
    Package,
    Protected,
    Public,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldType {
    Primitive(PrimitiveType),
    Reference(ClassName),
    Array(Box<FieldType>),
}

impl FieldType {
    pub fn is_array(&self) -> bool {
        matches!(self, FieldType::Array(_))
    }

    pub fn reference(&self) -> Option<&ClassName> {
        match self {
            FieldType::Reference(name) => Some(name),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrimitiveType {
    Boolean,
    Byte,
    Char,
    Short,
    Int,
    Long,
    Float,
    Double,
}

/// One decoded bytecode instruction. Only the shapes the checkers care
/// about get their own variant; everything else carries its value-level
/// stack effect so downstream simulation needs no opcode knowledge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Insn {
    /// aload: push the reference held in a local slot.
    Load(u16),
    /// astore: pop a reference into a local slot.
    Store(u16),
    Dup,
    New(ClassName),
    GetField { owner: ClassName, field: String },
    PutField { owner: ClassName, field: String },
    GetStatic { owner: ClassName, field: String },
    PutStatic { owner: ClassName, field: String },
    Invoke {
        kind: InvokeKind,
        owner: ClassName,
        name: String,
        descriptor: String,
    },
    InvokeDynamic { descriptor: String },
    AReturn,
    /// Any other instruction, reduced to how many values it pops and pushes.
    Other { pops: u8, pushes: u8 },
    /// Instruction whose stack effect is not modelled; simulation must reset.
    Opaque,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvokeKind {
    Virtual,
    Special,
    Static,
    Interface,
}

impl InvokeKind {
    pub fn has_receiver(self) -> bool {
        !matches!(self, InvokeKind::Static)
    }
}

pub fn parse_field_descriptor(descriptor: &str) -> Option<FieldType> {
    let bytes = descriptor.as_bytes();
    let mut pos = 0usize;
    let ty = parse_type(descriptor, bytes, &mut pos)?;
    if pos == bytes.len() { Some(ty) } else { None }
}

fn parse_type(descriptor: &str, bytes: &[u8], pos: &mut usize) -> Option<FieldType> {
    match bytes.get(*pos)? {
        b'[' => {
            *pos += 1;
            let element = parse_type(descriptor, bytes, pos)?;
            Some(FieldType::Array(Box::new(element)))
        }
        b'L' => {
            let semi = descriptor[*pos..].find(';')? + *pos;
            let name = &descriptor[*pos + 1..semi];
            *pos = semi + 1;
            Some(FieldType::Reference(ClassName::new(name)))
        }
        b'Z' => primitive(pos, PrimitiveType::Boolean),
        b'B' => primitive(pos, PrimitiveType::Byte),
        b'C' => primitive(pos, PrimitiveType::Char),
        b'S' => primitive(pos, PrimitiveType::Short),
        b'I' => primitive(pos, PrimitiveType::Int),
        b'J' => primitive(pos, PrimitiveType::Long),
        b'F' => primitive(pos, PrimitiveType::Float),
        b'D' => primitive(pos, PrimitiveType::Double),
        _ => None,
    }
}

fn primitive(pos: &mut usize, ty: PrimitiveType) -> Option<FieldType> {
    *pos += 1;
    Some(FieldType::Primitive(ty))
}

/// Number of declared parameters, counted as values (long/double count once).
pub fn method_arg_count(descriptor: &str) -> usize {
    let Some(open) = descriptor.find('(') else {
        return 0;
    };
    let Some(close) = descriptor.find(')') else {
        return 0;
    };
    let params = &descriptor[open + 1..close];
    let bytes = params.as_bytes();
    let mut pos = 0usize;
    let mut count = 0usize;
    while pos < bytes.len() {
        while bytes.get(pos) == Some(&b'[') {
            pos += 1;
        }
        match bytes.get(pos) {
            Some(b'L') => {
                let Some(semi) = params[pos..].find(';') else {
                    break;
                };
                pos += semi + 1;
            }
            Some(_) => pos += 1,
            None => break,
        }
        count += 1;
    }
    count
}

pub fn method_returns_value(descriptor: &str) -> bool {
    match descriptor.rfind(')') {
        Some(close) => &descriptor[close + 1..] != "V",
        None => false,
    }
}
