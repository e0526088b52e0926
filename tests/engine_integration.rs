use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use mutability_scan::config::Configuration;
use mutability_scan::ir::{
    ClassFlags, DecodedClass, DecodedField, DecodedMethod, FieldType, Insn, InvokeKind,
    PrimitiveType, Visibility,
};
use mutability_scan::loader::{ClassProvider, DecodingProvider, LoadError, SearchPath,
    scan_classpath};
use mutability_scan::model::{ClassName, ReasonKind, Verdict};
use mutability_scan::session::AnalysisSession;

struct MapProvider {
    classes: HashMap<ClassName, DecodedClass>,
}

impl MapProvider {
    fn new(classes: Vec<DecodedClass>) -> Self {
        Self {
            classes: classes
                .into_iter()
                .map(|c| (c.name.clone(), c))
                .collect(),
        }
    }
}

impl ClassProvider for MapProvider {
    fn load(&self, name: &ClassName) -> Result<DecodedClass, LoadError> {
        self.classes
            .get(name)
            .cloned()
            .ok_or_else(|| LoadError::NotFound(name.clone()))
    }
}

fn session_over(classes: Vec<DecodedClass>) -> AnalysisSession {
    AnalysisSession::new(
        Box::new(MapProvider::new(classes)),
        Configuration::default(),
    )
}

fn final_class(name: &str) -> DecodedClass {
    DecodedClass {
        name: ClassName::new(name),
        super_name: Some(ClassName::new("java.lang.Object")),
        interfaces: vec![],
        flags: ClassFlags {
            is_final: true,
            ..ClassFlags::default()
        },
        fields: vec![],
        methods: vec![],
    }
}

fn field(name: &str, ty: FieldType, visibility: Visibility, is_final: bool) -> DecodedField {
    DecodedField {
        name: name.to_string(),
        ty,
        visibility,
        is_final,
        is_static: false,
    }
}

fn constructor(instructions: Vec<Insn>) -> DecodedMethod {
    DecodedMethod {
        name: "<init>".to_string(),
        descriptor: "()V".to_string(),
        visibility: Visibility::Public,
        is_constructor: true,
        is_static: false,
        instructions,
    }
}

fn plain_method(name: &str, visibility: Visibility, instructions: Vec<Insn>) -> DecodedMethod {
    DecodedMethod {
        name: name.to_string(),
        descriptor: "()V".to_string(),
        visibility,
        is_constructor: false,
        is_static: false,
        instructions,
    }
}

fn super_init() -> Insn {
    Insn::Invoke {
        kind: InvokeKind::Special,
        owner: ClassName::new("java.lang.Object"),
        name: "<init>".to_string(),
        descriptor: "()V".to_string(),
    }
}

fn assert_invariant(session: &AnalysisSession) {
    for result in session.results() {
        assert_eq!(
            result.verdict == Verdict::Immutable,
            result.reasons.is_empty(),
            "invariant violated for {}: {:?}",
            result.class,
            result
        );
    }
}

#[test]
fn scenario_a_private_final_primitive_field_is_immutable() {
    let mut class = final_class("a.Amount");
    class.fields.push(field(
        "value",
        FieldType::Primitive(PrimitiveType::Long),
        Visibility::Private,
        true,
    ));
    class
        .methods
        .push(constructor(vec![Insn::Load(0), super_init(), Insn::Opaque]));

    let session = session_over(vec![class]);
    let result = session.result_for(&ClassName::new("a.Amount"));
    assert_eq!(result.verdict, Verdict::Immutable);
    assert!(result.reasons.is_empty());
    assert_invariant(&session);
}

#[test]
fn scenario_b_public_non_final_field_is_not_immutable() {
    let mut class = final_class("a.Counter");
    class.fields.push(field(
        "x",
        FieldType::Primitive(PrimitiveType::Int),
        Visibility::Public,
        false,
    ));

    let session = session_over(vec![class]);
    let result = session.result_for(&ClassName::new("a.Counter"));
    assert_eq!(result.verdict, Verdict::NotImmutable);
    assert_eq!(result.reasons.len(), 1);
    assert_eq!(result.reasons[0].kind, ReasonKind::PublishedNonFinalField);
    assert_eq!(result.reasons[0].location.field.as_deref(), Some("x"));
    assert_invariant(&session);
}

#[test]
fn scenario_c_constructor_passing_this_is_not_immutable() {
    let mut class = final_class("a.Subscriber");
    class.methods.push(constructor(vec![
        Insn::Load(0),
        super_init(),
        Insn::Load(1),
        Insn::Load(0),
        Insn::Invoke {
            kind: InvokeKind::Virtual,
            owner: ClassName::new("a.Bus"),
            name: "subscribe".to_string(),
            descriptor: "(Ljava/lang/Object;)V".to_string(),
        },
        Insn::Opaque,
    ]));

    let session = session_over(vec![class]);
    let result = session.result_for(&ClassName::new("a.Subscriber"));
    assert_eq!(result.verdict, Verdict::NotImmutable);
    assert!(
        result
            .reasons
            .iter()
            .any(|r| r.kind == ReasonKind::EscapedThis)
    );
    assert_invariant(&session);
}

#[test]
fn scenario_d_instance_array_field_is_flagged_but_static_is_not() {
    let bytes_array = FieldType::Array(Box::new(FieldType::Primitive(PrimitiveType::Byte)));

    let mut instance = final_class("a.Buffer");
    instance
        .fields
        .push(field("data", bytes_array.clone(), Visibility::Private, true));

    let mut with_static = final_class("a.Shared");
    with_static.fields.push(DecodedField {
        name: "TABLE".to_string(),
        ty: bytes_array,
        visibility: Visibility::Private,
        is_final: true,
        is_static: true,
    });

    let session = session_over(vec![instance, with_static]);

    let flagged = session.result_for(&ClassName::new("a.Buffer"));
    assert_eq!(flagged.verdict, Verdict::NotImmutable);
    assert!(flagged.reasons.iter().any(|r| r.kind == ReasonKind::ArrayField));

    let clean = session.result_for(&ClassName::new("a.Shared"));
    assert!(!clean.reasons.iter().any(|r| r.kind == ReasonKind::ArrayField));
    assert_eq!(clean.verdict, Verdict::Immutable);
    assert_invariant(&session);
}

#[test]
fn scenario_e_two_class_cycle_terminates_as_immutable() {
    // Documented placeholder policy: a class already on the analysis chain
    // resolves as Immutable, so an otherwise-clean cycle stays clean.
    let mut a = final_class("a.A");
    a.fields.push(field(
        "b",
        FieldType::Reference(ClassName::new("a.B")),
        Visibility::Private,
        true,
    ));
    let mut b = final_class("a.B");
    b.fields.push(field(
        "a",
        FieldType::Reference(ClassName::new("a.A")),
        Visibility::Private,
        true,
    ));

    let session = session_over(vec![a, b]);
    let result_a = session.result_for(&ClassName::new("a.A"));
    let result_b = session.result_for(&ClassName::new("a.B"));
    assert_eq!(result_a.verdict, Verdict::Immutable);
    assert_eq!(result_b.verdict, Verdict::Immutable);
    assert_invariant(&session);
}

#[test]
fn five_class_cycle_terminates() {
    let names: Vec<String> = (0..5).map(|i| format!("ring.Node{i}")).collect();
    let mut classes = Vec::new();
    for i in 0..5 {
        let mut class = final_class(&names[i]);
        class.fields.push(field(
            "next",
            FieldType::Reference(ClassName::new(&names[(i + 1) % 5])),
            Visibility::Private,
            true,
        ));
        classes.push(class);
    }

    let session = session_over(classes);
    for name in &names {
        let result = session.result_for(&ClassName::new(name));
        assert_eq!(result.verdict, Verdict::Immutable, "for {name}");
    }
    assert_invariant(&session);
}

#[test]
fn mutable_member_of_a_cycle_condemns_its_holder() {
    // a.A -> a.B -> a.A, but B also carries a public non-final field. B is
    // NotImmutable on its own account, and A is NotImmutable for holding B.
    let mut a = final_class("a.A");
    a.fields.push(field(
        "b",
        FieldType::Reference(ClassName::new("a.B")),
        Visibility::Private,
        true,
    ));
    let mut b = final_class("a.B");
    b.fields.push(field(
        "a",
        FieldType::Reference(ClassName::new("a.A")),
        Visibility::Private,
        true,
    ));
    b.fields.push(field(
        "dirty",
        FieldType::Primitive(PrimitiveType::Int),
        Visibility::Public,
        false,
    ));

    // Ask for the holder first: B completes (NotImmutable on its own
    // account) while A is still in progress, so A then sees the real
    // verdict for B rather than the placeholder.
    let session = session_over(vec![a, b]);
    let result_a = session.result_for(&ClassName::new("a.A"));
    assert_eq!(result_a.verdict, Verdict::NotImmutable);
    assert!(
        result_a
            .reasons
            .iter()
            .any(|r| r.kind == ReasonKind::MutableTypeToField)
    );

    let result_b = session.result_for(&ClassName::new("a.B"));
    assert_eq!(result_b.verdict, Verdict::NotImmutable);
    assert_invariant(&session);
}

#[test]
fn scenario_f_constructor_only_private_assignment_is_effectively_immutable() {
    let mut class = final_class("a.Lazy");
    class.fields.push(field(
        "cached",
        FieldType::Primitive(PrimitiveType::Int),
        Visibility::Private,
        false,
    ));
    class.methods.push(constructor(vec![
        Insn::Load(0),
        super_init(),
        Insn::Load(0),
        Insn::Invoke {
            kind: InvokeKind::Special,
            owner: ClassName::new("a.Lazy"),
            name: "fill".to_string(),
            descriptor: "()V".to_string(),
        },
        Insn::Opaque,
    ]));
    class.methods.push(plain_method(
        "fill",
        Visibility::Private,
        vec![
            Insn::Load(0),
            Insn::Other { pops: 0, pushes: 1 },
            Insn::PutField {
                owner: ClassName::new("a.Lazy"),
                field: "cached".to_string(),
            },
            Insn::Opaque,
        ],
    ));

    let session = session_over(vec![class]);
    let result = session.result_for(&ClassName::new("a.Lazy"));
    assert_eq!(result.verdict, Verdict::EffectivelyImmutable);
    assert!(
        result
            .reasons
            .iter()
            .all(|r| r.kind == ReasonKind::FieldCanBeReassigned)
    );
    assert_invariant(&session);
}

#[test]
fn setter_reachable_helper_makes_the_class_not_immutable() {
    let mut class = final_class("a.Mutable");
    class.fields.push(field(
        "state",
        FieldType::Primitive(PrimitiveType::Int),
        Visibility::Private,
        false,
    ));
    class.methods.push(plain_method(
        "reset",
        Visibility::Public,
        vec![
            Insn::Load(0),
            Insn::Invoke {
                kind: InvokeKind::Special,
                owner: ClassName::new("a.Mutable"),
                name: "clear".to_string(),
                descriptor: "()V".to_string(),
            },
            Insn::Opaque,
        ],
    ));
    class.methods.push(plain_method(
        "clear",
        Visibility::Private,
        vec![
            Insn::Load(0),
            Insn::Other { pops: 0, pushes: 1 },
            Insn::PutField {
                owner: ClassName::new("a.Mutable"),
                field: "state".to_string(),
            },
            Insn::Opaque,
        ],
    ));

    let session = session_over(vec![class]);
    let result = session.result_for(&ClassName::new("a.Mutable"));
    assert_eq!(result.verdict, Verdict::NotImmutable);
    assert_invariant(&session);
}

#[test]
fn missing_field_type_degrades_to_a_reported_result() {
    let mut class = final_class("a.Holder");
    class.fields.push(field(
        "mystery",
        FieldType::Reference(ClassName::new("vendor.Unknown")),
        Visibility::Private,
        true,
    ));

    let session = session_over(vec![class]);
    let result = session.result_for(&ClassName::new("a.Holder"));
    assert_eq!(result.verdict, Verdict::NotImmutable);
    assert!(
        result
            .reasons
            .iter()
            .any(|r| r.kind == ReasonKind::MutableTypeToField)
    );

    let errors = session.errors();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].class, ClassName::new("vendor.Unknown"));
    assert_invariant(&session);
}

#[test]
fn override_wins_over_analysis() {
    let name = ClassName::new("vendor.KnownGood");
    let mut config = Configuration::default();
    config.add_override(mutability_scan::model::AnalysisResult::immutable(
        name.clone(),
    ));

    // the provider has nothing, yet the override answers
    let session = AnalysisSession::new(Box::new(MapProvider::new(vec![])), config);
    let result = session.result_for(&name);
    assert_eq!(result.verdict, Verdict::Immutable);
    assert!(session.errors().is_empty());
}

// ---------------------------------------------------------------------------
// End-to-end over real bytes: assemble class files, lay them out as a
// classpath directory and a JAR, and run the whole pipeline.
// ---------------------------------------------------------------------------

const ACC_PUBLIC: u16 = 0x0001;
const ACC_PRIVATE: u16 = 0x0002;
const ACC_FINAL: u16 = 0x0010;

struct ClassAssembler {
    pool: Vec<Vec<u8>>,
}

impl ClassAssembler {
    fn new() -> Self {
        Self { pool: Vec::new() }
    }

    fn push(&mut self, entry: Vec<u8>) -> u16 {
        self.pool.push(entry);
        self.pool.len() as u16
    }

    fn utf8(&mut self, s: &str) -> u16 {
        let mut e = vec![1u8];
        e.extend_from_slice(&(s.len() as u16).to_be_bytes());
        e.extend_from_slice(s.as_bytes());
        self.push(e)
    }

    fn class(&mut self, name: &str) -> u16 {
        let name_idx = self.utf8(&name.replace('.', "/"));
        let mut e = vec![7u8];
        e.extend_from_slice(&name_idx.to_be_bytes());
        self.push(e)
    }

    fn method_ref(&mut self, class: u16, name: &str, descriptor: &str) -> u16 {
        let n = self.utf8(name);
        let d = self.utf8(descriptor);
        let mut nat = vec![12u8];
        nat.extend_from_slice(&n.to_be_bytes());
        nat.extend_from_slice(&d.to_be_bytes());
        let nat_idx = self.push(nat);
        let mut e = vec![10u8];
        e.extend_from_slice(&class.to_be_bytes());
        e.extend_from_slice(&nat_idx.to_be_bytes());
        self.push(e)
    }

    fn assemble(
        &self,
        access: u16,
        this_class: u16,
        super_class: u16,
        fields: &[(u16, u16, u16)],
        methods: &[(u16, u16, u16, Option<(u16, Vec<u8>)>)],
    ) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&0xCAFE_BABEu32.to_be_bytes());
        out.extend_from_slice(&0u16.to_be_bytes());
        out.extend_from_slice(&52u16.to_be_bytes());
        out.extend_from_slice(&((self.pool.len() + 1) as u16).to_be_bytes());
        for entry in &self.pool {
            out.extend_from_slice(entry);
        }
        out.extend_from_slice(&access.to_be_bytes());
        out.extend_from_slice(&this_class.to_be_bytes());
        out.extend_from_slice(&super_class.to_be_bytes());
        out.extend_from_slice(&0u16.to_be_bytes());

        out.extend_from_slice(&(fields.len() as u16).to_be_bytes());
        for (acc, name, desc) in fields {
            out.extend_from_slice(&acc.to_be_bytes());
            out.extend_from_slice(&name.to_be_bytes());
            out.extend_from_slice(&desc.to_be_bytes());
            out.extend_from_slice(&0u16.to_be_bytes());
        }

        out.extend_from_slice(&(methods.len() as u16).to_be_bytes());
        for (acc, name, desc, code) in methods {
            out.extend_from_slice(&acc.to_be_bytes());
            out.extend_from_slice(&name.to_be_bytes());
            out.extend_from_slice(&desc.to_be_bytes());
            match code {
                Some((code_attr_name, bytes)) => {
                    out.extend_from_slice(&1u16.to_be_bytes());
                    out.extend_from_slice(&code_attr_name.to_be_bytes());
                    out.extend_from_slice(&((12 + bytes.len()) as u32).to_be_bytes());
                    out.extend_from_slice(&4u16.to_be_bytes()); // max_stack
                    out.extend_from_slice(&4u16.to_be_bytes()); // max_locals
                    out.extend_from_slice(&(bytes.len() as u32).to_be_bytes());
                    out.extend_from_slice(bytes);
                    out.extend_from_slice(&0u16.to_be_bytes());
                    out.extend_from_slice(&0u16.to_be_bytes());
                }
                None => out.extend_from_slice(&0u16.to_be_bytes()),
            }
        }

        out.extend_from_slice(&0u16.to_be_bytes());
        out
    }
}

/// `public final class geo.Point { private final int x, y; ... }`
fn point_class_bytes() -> Vec<u8> {
    let mut asm = ClassAssembler::new();
    let this = asm.class("geo.Point");
    let object = asm.class("java.lang.Object");
    let object_init = asm.method_ref(object, "<init>", "()V");
    let x_name = asm.utf8("x");
    let y_name = asm.utf8("y");
    let int_desc = asm.utf8("I");
    let ctor_name = asm.utf8("<init>");
    let ctor_desc = asm.utf8("(II)V");
    let code_name = asm.utf8("Code");

    let x_nat = {
        let mut e = vec![12u8];
        e.extend_from_slice(&x_name.to_be_bytes());
        e.extend_from_slice(&int_desc.to_be_bytes());
        asm.push(e)
    };
    let x_field = {
        let mut e = vec![9u8];
        e.extend_from_slice(&this.to_be_bytes());
        e.extend_from_slice(&x_nat.to_be_bytes());
        asm.push(e)
    };
    let y_nat = {
        let mut e = vec![12u8];
        e.extend_from_slice(&y_name.to_be_bytes());
        e.extend_from_slice(&int_desc.to_be_bytes());
        asm.push(e)
    };
    let y_field = {
        let mut e = vec![9u8];
        e.extend_from_slice(&this.to_be_bytes());
        e.extend_from_slice(&y_nat.to_be_bytes());
        asm.push(e)
    };

    let mut code = vec![0x2a]; // aload_0
    code.push(0xb7); // invokespecial Object.<init>
    code.extend_from_slice(&object_init.to_be_bytes());
    code.push(0x2a); // aload_0
    code.push(0x1b); // iload_1
    code.push(0xb5); // putfield x
    code.extend_from_slice(&x_field.to_be_bytes());
    code.push(0x2a); // aload_0
    code.push(0x1c); // iload_2
    code.push(0xb5); // putfield y
    code.extend_from_slice(&y_field.to_be_bytes());
    code.push(0xb1); // return

    asm.assemble(
        ACC_PUBLIC | ACC_FINAL,
        this,
        object,
        &[
            (ACC_PRIVATE | ACC_FINAL, x_name, int_desc),
            (ACC_PRIVATE | ACC_FINAL, y_name, int_desc),
        ],
        &[(ACC_PUBLIC, ctor_name, ctor_desc, Some((code_name, code)))],
    )
}

/// `public final class geo.MutablePoint { public int x; }`
fn mutable_point_class_bytes() -> Vec<u8> {
    let mut asm = ClassAssembler::new();
    let this = asm.class("geo.MutablePoint");
    let object = asm.class("java.lang.Object");
    let x_name = asm.utf8("x");
    let int_desc = asm.utf8("I");

    asm.assemble(
        ACC_PUBLIC | ACC_FINAL,
        this,
        object,
        &[(ACC_PUBLIC, x_name, int_desc)],
        &[],
    )
}

fn temp_dir(name: &str) -> PathBuf {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_nanos();
    std::env::temp_dir().join(format!(
        "mutability_scan_it_{}_{}_{}",
        std::process::id(),
        nanos,
        name
    ))
}

fn write_file(path: &Path, content: &[u8]) {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(path, content).unwrap();
}

fn write_jar(path: &Path, entries: &[(&str, &[u8])]) {
    use zip::write::FileOptions;

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    let file = std::fs::File::create(path).unwrap();
    let mut jar = zip::ZipWriter::new(file);
    let options = FileOptions::default().compression_method(zip::CompressionMethod::Deflated);
    for (name, content) in entries {
        jar.start_file(*name, options).unwrap();
        jar.write_all(content).unwrap();
    }
    jar.finish().unwrap();
}

#[test]
fn full_pipeline_over_a_classpath_directory() {
    let root = temp_dir("pipeline_dir");
    write_file(&root.join("geo/Point.class"), &point_class_bytes());
    write_file(
        &root.join("geo/MutablePoint.class"),
        &mutable_point_class_bytes(),
    );

    let roots = vec![root.clone()];
    let targets = scan_classpath(&roots).unwrap();
    assert_eq!(
        targets,
        vec![
            ClassName::new("geo.MutablePoint"),
            ClassName::new("geo.Point")
        ]
    );

    let provider = DecodingProvider::new(SearchPath::from_roots(&roots));
    let session = AnalysisSession::new(Box::new(provider), Configuration::default());
    session.run_analysis(&targets);

    let results = session.results();
    assert_eq!(results.len(), 2);
    assert_eq!(results[0].class, ClassName::new("geo.MutablePoint"));
    assert_eq!(results[0].verdict, Verdict::NotImmutable);
    assert_eq!(results[1].class, ClassName::new("geo.Point"));
    assert_eq!(results[1].verdict, Verdict::Immutable);
    assert!(session.errors().is_empty());
    assert_invariant(&session);

    let _ = std::fs::remove_dir_all(root);
}

#[test]
fn full_pipeline_over_a_jar() {
    let root = temp_dir("pipeline_jar");
    let jar = root.join("geo.jar");
    write_jar(
        &jar,
        &[
            ("geo/Point.class", &point_class_bytes()[..]),
            ("META-INF/MANIFEST.MF", b"Manifest-Version: 1.0\n"),
        ],
    );

    let roots = vec![jar];
    let targets = scan_classpath(&roots).unwrap();
    assert_eq!(targets, vec![ClassName::new("geo.Point")]);

    let provider = DecodingProvider::new(SearchPath::from_roots(&roots));
    let session = AnalysisSession::new(Box::new(provider), Configuration::default());
    let result = session.result_for(&ClassName::new("geo.Point"));
    assert_eq!(result.verdict, Verdict::Immutable);

    let _ = std::fs::remove_dir_all(root);
}

#[test]
fn corrupt_class_file_is_reported_not_fatal() {
    let root = temp_dir("pipeline_corrupt");
    write_file(&root.join("geo/Point.class"), &point_class_bytes());
    write_file(&root.join("geo/Broken.class"), b"garbage");

    let roots = vec![root.clone()];
    let provider = DecodingProvider::new(SearchPath::from_roots(&roots));
    let session = AnalysisSession::new(Box::new(provider), Configuration::default());
    session.run_analysis(&[ClassName::new("geo.Broken"), ClassName::new("geo.Point")]);

    let results = session.results();
    assert_eq!(results.len(), 2);
    assert_eq!(results[0].verdict, Verdict::CouldNotAnalyse);
    assert_eq!(results[1].verdict, Verdict::Immutable);
    assert_eq!(session.errors().len(), 1);
    assert_invariant(&session);

    let _ = std::fs::remove_dir_all(root);
}
