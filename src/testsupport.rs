//! Shared fixtures for checker and session tests.

use std::collections::HashMap;

use crate::ir::{
    ClassFlags, DecodedClass, DecodedField, DecodedMethod, FieldType, Insn, Visibility,
};
use crate::loader::{ClassProvider, LoadError};
use crate::model::ClassName;

/// Provider backed by a fixed map of pre-decoded classes.
#[derive(Default)]
pub struct FixedProvider {
    classes: HashMap<ClassName, DecodedClass>,
}

impl FixedProvider {
    pub fn with(mut self, class: DecodedClass) -> Self {
        self.classes.insert(class.name.clone(), class);
        self
    }
}

impl ClassProvider for FixedProvider {
    fn load(&self, name: &ClassName) -> Result<DecodedClass, LoadError> {
        self.classes
            .get(name)
            .cloned()
            .ok_or_else(|| LoadError::NotFound(name.clone()))
    }
}

pub fn bare_class(name: &str) -> DecodedClass {
    DecodedClass {
        name: ClassName::new(name),
        super_name: Some(ClassName::new("java.lang.Object")),
        interfaces: vec![],
        flags: ClassFlags::default(),
        fields: vec![],
        methods: vec![],
    }
}

pub fn final_class(name: &str) -> DecodedClass {
    let mut class = bare_class(name);
    class.flags.is_final = true;
    class
}

pub fn field(name: &str, ty: FieldType, visibility: Visibility, is_final: bool) -> DecodedField {
    DecodedField {
        name: name.to_string(),
        ty,
        visibility,
        is_final,
        is_static: false,
    }
}

pub fn static_field(name: &str, ty: FieldType) -> DecodedField {
    DecodedField {
        name: name.to_string(),
        ty,
        visibility: Visibility::Private,
        is_final: true,
        is_static: true,
    }
}

pub fn constructor(visibility: Visibility, instructions: Vec<Insn>) -> DecodedMethod {
    DecodedMethod {
        name: "<init>".to_string(),
        descriptor: "()V".to_string(),
        visibility,
        is_constructor: true,
        is_static: false,
        instructions,
    }
}

pub fn method(name: &str, visibility: Visibility, instructions: Vec<Insn>) -> DecodedMethod {
    DecodedMethod {
        name: name.to_string(),
        descriptor: "()V".to_string(),
        visibility,
        is_constructor: false,
        is_static: false,
        instructions,
    }
}
