//! Class-file decoder: raw `.class` bytes into a `DecodedClass`.
//!
//! Parses the constant pool, field and method tables, and each method's
//! `Code` attribute into the instruction model in `ir`. Anything outside
//! the supported format surfaces as a typed `DecodeError`; the session
//! converts that into a `CouldNotAnalyse` result.

use thiserror::Error;

use crate::ir::{
    ClassFlags, DecodedClass, DecodedField, DecodedMethod, Insn, InvokeKind, Visibility,
    parse_field_descriptor,
};
use crate::model::ClassName;
use crate::opcodes::{self, Effect};

const MAGIC: u32 = 0xCAFE_BABE;

const ACC_PUBLIC: u16 = 0x0001;
const ACC_PRIVATE: u16 = 0x0002;
const ACC_PROTECTED: u16 = 0x0004;
const ACC_STATIC: u16 = 0x0008;
const ACC_FINAL: u16 = 0x0010;
const ACC_INTERFACE: u16 = 0x0200;
const ACC_ABSTRACT: u16 = 0x0400;
const ACC_ENUM: u16 = 0x4000;

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("not a class file: bad magic")]
    BadMagic,
    #[error("class file truncated at offset {at}")]
    Truncated { at: usize },
    #[error("unsupported constant pool tag {tag} at index {index}")]
    UnsupportedConstant { tag: u8, index: u16 },
    #[error("constant pool index {index} is not a {expected}")]
    BadConstant { index: u16, expected: &'static str },
    #[error("invalid field descriptor `{descriptor}`")]
    BadFieldDescriptor { descriptor: String },
    #[error("unknown opcode 0x{opcode:02x} at code offset {at}")]
    UnknownOpcode { opcode: u8, at: usize },
}

pub fn decode_class(bytes: &[u8]) -> Result<DecodedClass, DecodeError> {
    let mut r = Reader::new(bytes);

    if r.u32()? != MAGIC {
        return Err(DecodeError::BadMagic);
    }
    let _minor = r.u16()?;
    let _major = r.u16()?;

    let pool = ConstantPool::parse(&mut r)?;

    let access = r.u16()?;
    let this_class = r.u16()?;
    let super_class = r.u16()?;

    let name = pool.class_name(this_class)?;
    let super_name = if super_class == 0 {
        None
    } else {
        Some(pool.class_name(super_class)?)
    };

    let interface_count = r.u16()?;
    let mut interfaces = Vec::with_capacity(interface_count as usize);
    for _ in 0..interface_count {
        interfaces.push(pool.class_name(r.u16()?)?);
    }

    let field_count = r.u16()?;
    let mut fields = Vec::with_capacity(field_count as usize);
    for _ in 0..field_count {
        fields.push(parse_field(&mut r, &pool)?);
    }

    let method_count = r.u16()?;
    let mut methods = Vec::with_capacity(method_count as usize);
    for _ in 0..method_count {
        methods.push(parse_method(&mut r, &pool)?);
    }

    skip_attributes(&mut r)?;

    Ok(DecodedClass {
        name,
        super_name,
        interfaces,
        flags: ClassFlags {
            is_final: access & ACC_FINAL != 0,
            is_abstract: access & ACC_ABSTRACT != 0,
            is_interface: access & ACC_INTERFACE != 0,
            is_enum: access & ACC_ENUM != 0,
        },
        fields,
        methods,
    })
}

fn parse_field(r: &mut Reader<'_>, pool: &ConstantPool) -> Result<DecodedField, DecodeError> {
    let access = r.u16()?;
    let name = pool.utf8(r.u16()?)?.to_string();
    let descriptor = pool.utf8(r.u16()?)?.to_string();
    skip_attributes(r)?;

    let ty = parse_field_descriptor(&descriptor)
        .ok_or(DecodeError::BadFieldDescriptor { descriptor })?;

    Ok(DecodedField {
        name,
        ty,
        visibility: visibility_of(access),
        is_final: access & ACC_FINAL != 0,
        is_static: access & ACC_STATIC != 0,
    })
}

fn parse_method(r: &mut Reader<'_>, pool: &ConstantPool) -> Result<DecodedMethod, DecodeError> {
    let access = r.u16()?;
    let name = pool.utf8(r.u16()?)?.to_string();
    let descriptor = pool.utf8(r.u16()?)?.to_string();

    let mut instructions = Vec::new();
    let attribute_count = r.u16()?;
    for _ in 0..attribute_count {
        let attr_name = pool.utf8(r.u16()?)?;
        let attr_len = r.u32()? as usize;
        if attr_name == "Code" {
            let end = r.pos + attr_len;
            let _max_stack = r.u16()?;
            let _max_locals = r.u16()?;
            let code_len = r.u32()? as usize;
            let code = r.take(code_len)?;
            instructions = decode_code(code, pool)?;
            r.seek(end)?;
        } else {
            r.skip(attr_len)?;
        }
    }

    Ok(DecodedMethod {
        is_constructor: name == "<init>",
        name,
        descriptor,
        visibility: visibility_of(access),
        is_static: access & ACC_STATIC != 0,
        instructions,
    })
}

fn visibility_of(access: u16) -> Visibility {
    if access & ACC_PRIVATE != 0 {
        Visibility::Private
    } else if access & ACC_PROTECTED != 0 {
        Visibility::Protected
    } else if access & ACC_PUBLIC != 0 {
        Visibility::Public
    } else {
        Visibility::Package
    }
}

fn skip_attributes(r: &mut Reader<'_>) -> Result<(), DecodeError> {
    let count = r.u16()?;
    for _ in 0..count {
        let _name = r.u16()?;
        let len = r.u32()? as usize;
        r.skip(len)?;
    }
    Ok(())
}

fn decode_code(code: &[u8], pool: &ConstantPool) -> Result<Vec<Insn>, DecodeError> {
    let mut insns = Vec::new();
    let mut r = Reader::new(code);

    while !r.at_end() {
        let at = r.pos;
        let op = r.u8()?;
        let insn = match op {
            opcodes::ALOAD => Insn::Load(u16::from(r.u8()?)),
            opcodes::ALOAD_0..=opcodes::ALOAD_3 => Insn::Load(u16::from(op - opcodes::ALOAD_0)),
            opcodes::ASTORE => Insn::Store(u16::from(r.u8()?)),
            opcodes::ASTORE_0..=opcodes::ASTORE_3 => {
                Insn::Store(u16::from(op - opcodes::ASTORE_0))
            }
            opcodes::DUP => Insn::Dup,
            opcodes::ARETURN => Insn::AReturn,
            opcodes::GETSTATIC | opcodes::PUTSTATIC | opcodes::GETFIELD | opcodes::PUTFIELD => {
                let (owner, field) = pool.field_ref(r.u16()?)?;
                match op {
                    opcodes::GETSTATIC => Insn::GetStatic { owner, field },
                    opcodes::PUTSTATIC => Insn::PutStatic { owner, field },
                    opcodes::GETFIELD => Insn::GetField { owner, field },
                    _ => Insn::PutField { owner, field },
                }
            }
            opcodes::INVOKEVIRTUAL | opcodes::INVOKESPECIAL | opcodes::INVOKESTATIC => {
                let (owner, name, descriptor) = pool.method_ref(r.u16()?)?;
                let kind = match op {
                    opcodes::INVOKEVIRTUAL => InvokeKind::Virtual,
                    opcodes::INVOKESPECIAL => InvokeKind::Special,
                    _ => InvokeKind::Static,
                };
                Insn::Invoke {
                    kind,
                    owner,
                    name,
                    descriptor,
                }
            }
            opcodes::INVOKEINTERFACE => {
                let (owner, name, descriptor) = pool.method_ref(r.u16()?)?;
                r.skip(2)?; // count + zero byte
                Insn::Invoke {
                    kind: InvokeKind::Interface,
                    owner,
                    name,
                    descriptor,
                }
            }
            opcodes::INVOKEDYNAMIC => {
                let descriptor = pool.invoke_dynamic_descriptor(r.u16()?)?;
                r.skip(2)?;
                Insn::InvokeDynamic { descriptor }
            }
            opcodes::NEW => Insn::New(pool.class_name(r.u16()?)?),
            opcodes::WIDE => {
                let sub = r.u8()?;
                if sub == opcodes::IINC {
                    r.skip(4)?;
                    Insn::Other { pops: 0, pushes: 0 }
                } else {
                    let index = r.u16()?;
                    match sub {
                        opcodes::ALOAD => Insn::Load(index),
                        opcodes::ASTORE => Insn::Store(index),
                        0x15..=0x18 => Insn::Other { pops: 0, pushes: 1 },
                        0x36..=0x39 => Insn::Other { pops: 1, pushes: 0 },
                        0xa9 => Insn::Opaque, // ret
                        _ => return Err(DecodeError::UnknownOpcode { opcode: sub, at }),
                    }
                }
            }
            opcodes::TABLESWITCH => {
                r.align4()?;
                let _default = r.u32()?;
                let low = r.u32()? as i32;
                let high = r.u32()? as i32;
                let count = (i64::from(high) - i64::from(low) + 1).max(0) as usize;
                r.skip(count * 4)?;
                Insn::Opaque
            }
            opcodes::LOOKUPSWITCH => {
                r.align4()?;
                let _default = r.u32()?;
                let npairs = r.u32()? as usize;
                r.skip(npairs * 8)?;
                Insn::Opaque
            }
            opcodes::MULTIANEWARRAY => {
                r.skip(2)?;
                let dims = r.u8()?;
                Insn::Other {
                    pops: dims,
                    pushes: 1,
                }
            }
            _ => {
                let width = opcodes::operand_width(op)
                    .ok_or(DecodeError::UnknownOpcode { opcode: op, at })?;
                r.skip(width)?;
                match opcodes::effect(op)
                    .ok_or(DecodeError::UnknownOpcode { opcode: op, at })?
                {
                    Effect::Fixed { pops, pushes } => Insn::Other { pops, pushes },
                    Effect::Opaque => Insn::Opaque,
                }
            }
        };
        insns.push(insn);
    }

    Ok(insns)
}

#[derive(Debug)]
enum CpEntry {
    Utf8(String),
    Class(u16),
    FieldRef { class: u16, name_and_type: u16 },
    MethodRef { class: u16, name_and_type: u16 },
    NameAndType { name: u16, descriptor: u16 },
    InvokeDynamic { name_and_type: u16 },
    Other,
    /// Second slot of a long/double entry.
    Unused,
}

struct ConstantPool {
    entries: Vec<CpEntry>,
}

impl ConstantPool {
    fn parse(r: &mut Reader<'_>) -> Result<Self, DecodeError> {
        let count = r.u16()?;
        let mut entries = Vec::with_capacity(count as usize);
        entries.push(CpEntry::Unused); // pool indices are 1-based

        while entries.len() < count as usize {
            let index = entries.len() as u16;
            let tag = r.u8()?;
            let entry = match tag {
                1 => {
                    let len = r.u16()? as usize;
                    let raw = r.take(len)?;
                    // Modified UTF-8 differences do not matter for the
                    // identifiers the checkers look at.
                    CpEntry::Utf8(String::from_utf8_lossy(raw).into_owned())
                }
                3 | 4 => {
                    r.skip(4)?;
                    CpEntry::Other
                }
                5 | 6 => {
                    // long/double occupy two pool slots
                    r.skip(8)?;
                    entries.push(CpEntry::Other);
                    CpEntry::Unused
                }
                7 => CpEntry::Class(r.u16()?),
                8 => {
                    r.skip(2)?;
                    CpEntry::Other
                }
                9 => CpEntry::FieldRef {
                    class: r.u16()?,
                    name_and_type: r.u16()?,
                },
                10 | 11 => CpEntry::MethodRef {
                    class: r.u16()?,
                    name_and_type: r.u16()?,
                },
                12 => CpEntry::NameAndType {
                    name: r.u16()?,
                    descriptor: r.u16()?,
                },
                15 => {
                    r.skip(3)?;
                    CpEntry::Other
                }
                16 => {
                    r.skip(2)?;
                    CpEntry::Other
                }
                17 => {
                    r.skip(4)?;
                    CpEntry::Other
                }
                18 => {
                    let _bootstrap = r.u16()?;
                    CpEntry::InvokeDynamic {
                        name_and_type: r.u16()?,
                    }
                }
                19 | 20 => {
                    r.skip(2)?;
                    CpEntry::Other
                }
                other => return Err(DecodeError::UnsupportedConstant { tag: other, index }),
            };
            entries.push(entry);
        }

        Ok(Self { entries })
    }

    fn get(&self, index: u16, expected: &'static str) -> Result<&CpEntry, DecodeError> {
        self.entries
            .get(index as usize)
            .ok_or(DecodeError::BadConstant { index, expected })
    }

    fn utf8(&self, index: u16) -> Result<&str, DecodeError> {
        match self.get(index, "Utf8")? {
            CpEntry::Utf8(s) => Ok(s),
            _ => Err(DecodeError::BadConstant {
                index,
                expected: "Utf8",
            }),
        }
    }

    fn class_name(&self, index: u16) -> Result<ClassName, DecodeError> {
        match self.get(index, "Class")? {
            CpEntry::Class(name_index) => Ok(ClassName::new(self.utf8(*name_index)?)),
            _ => Err(DecodeError::BadConstant {
                index,
                expected: "Class",
            }),
        }
    }

    fn name_and_type(&self, index: u16) -> Result<(&str, &str), DecodeError> {
        match self.get(index, "NameAndType")? {
            CpEntry::NameAndType { name, descriptor } => {
                Ok((self.utf8(*name)?, self.utf8(*descriptor)?))
            }
            _ => Err(DecodeError::BadConstant {
                index,
                expected: "NameAndType",
            }),
        }
    }

    fn field_ref(&self, index: u16) -> Result<(ClassName, String), DecodeError> {
        match self.get(index, "Fieldref")? {
            CpEntry::FieldRef {
                class,
                name_and_type,
            } => {
                let owner = self.class_name(*class)?;
                let (name, _descriptor) = self.name_and_type(*name_and_type)?;
                Ok((owner, name.to_string()))
            }
            _ => Err(DecodeError::BadConstant {
                index,
                expected: "Fieldref",
            }),
        }
    }

    fn method_ref(&self, index: u16) -> Result<(ClassName, String, String), DecodeError> {
        match self.get(index, "Methodref")? {
            CpEntry::MethodRef {
                class,
                name_and_type,
            } => {
                let owner = self.class_name(*class)?;
                let (name, descriptor) = self.name_and_type(*name_and_type)?;
                Ok((owner, name.to_string(), descriptor.to_string()))
            }
            _ => Err(DecodeError::BadConstant {
                index,
                expected: "Methodref",
            }),
        }
    }

    fn invoke_dynamic_descriptor(&self, index: u16) -> Result<String, DecodeError> {
        match self.get(index, "InvokeDynamic")? {
            CpEntry::InvokeDynamic { name_and_type } => {
                let (_name, descriptor) = self.name_and_type(*name_and_type)?;
                Ok(descriptor.to_string())
            }
            _ => Err(DecodeError::BadConstant {
                index,
                expected: "InvokeDynamic",
            }),
        }
    }
}

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    fn at_end(&self) -> bool {
        self.pos >= self.bytes.len()
    }

    fn u8(&mut self) -> Result<u8, DecodeError> {
        let b = *self
            .bytes
            .get(self.pos)
            .ok_or(DecodeError::Truncated { at: self.pos })?;
        self.pos += 1;
        Ok(b)
    }

    fn u16(&mut self) -> Result<u16, DecodeError> {
        let raw = self.take(2)?;
        Ok(u16::from_be_bytes([raw[0], raw[1]]))
    }

    fn u32(&mut self) -> Result<u32, DecodeError> {
        let raw = self.take(4)?;
        Ok(u32::from_be_bytes([raw[0], raw[1], raw[2], raw[3]]))
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8], DecodeError> {
        let end = self
            .pos
            .checked_add(len)
            .ok_or(DecodeError::Truncated { at: self.pos })?;
        if end > self.bytes.len() {
            return Err(DecodeError::Truncated { at: self.pos });
        }
        let slice = &self.bytes[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn skip(&mut self, len: usize) -> Result<(), DecodeError> {
        self.take(len).map(|_| ())
    }

    fn seek(&mut self, pos: usize) -> Result<(), DecodeError> {
        if pos > self.bytes.len() {
            return Err(DecodeError::Truncated { at: pos });
        }
        self.pos = pos;
        Ok(())
    }

    /// Skip the `tableswitch`/`lookupswitch` padding to a 4-byte boundary
    /// relative to the start of the code array.
    fn align4(&mut self) -> Result<(), DecodeError> {
        let pad = (4 - self.pos % 4) % 4;
        self.skip(pad)
    }
}
