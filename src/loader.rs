//! Byte supply for the analysis session: classpath directories, JARs, and
//! the provider seam that turns bytes into decoded classes.

use memmap2::Mmap;
use rayon::prelude::*;
use std::fs::File;
use std::io::{Cursor, Read};
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use thiserror::Error;
use zip::ZipArchive;

use crate::decode::{DecodeError, decode_class};
use crate::ir::DecodedClass;
use crate::model::ClassName;

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("class not found: {0}")]
    NotFound(ClassName),
    #[error("failed to read {}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to read archive {}", path.display())]
    Archive {
        path: PathBuf,
        #[source]
        source: zip::result::ZipError,
    },
    #[error("malformed class {class}")]
    Malformed {
        class: ClassName,
        #[source]
        source: DecodeError,
    },
}

/// Supplies the raw bytes of a named class. The session asks at most once
/// per distinct class; caching beyond that is not this layer's concern.
pub trait ClassBytes {
    fn bytes_for(&self, name: &ClassName) -> Result<Vec<u8>, LoadError>;
}

/// Loads and decodes a named class. The session only ever sees this seam,
/// so tests can stub decoded classes without crafting bytes.
pub trait ClassProvider {
    fn load(&self, name: &ClassName) -> Result<DecodedClass, LoadError>;
}

/// Classpath directory laid out as `a/b/C.class` under a root.
#[derive(Debug, Clone)]
pub struct DirSource {
    root: PathBuf,
}

impl DirSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl ClassBytes for DirSource {
    fn bytes_for(&self, name: &ClassName) -> Result<Vec<u8>, LoadError> {
        let path = self.root.join(name.class_file_path());
        if !path.is_file() {
            return Err(LoadError::NotFound(name.clone()));
        }
        std::fs::read(&path).map_err(|source| LoadError::Io { path, source })
    }
}

/// A JAR on disk, memory-mapped per lookup.
#[derive(Debug, Clone)]
pub struct JarSource {
    path: PathBuf,
}

impl JarSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn open(&self) -> Result<(Mmap, File), LoadError> {
        let file = File::open(&self.path).map_err(|source| LoadError::Io {
            path: self.path.clone(),
            source,
        })?;
        let mmap = unsafe {
            Mmap::map(&file).map_err(|source| LoadError::Io {
                path: self.path.clone(),
                source,
            })?
        };
        Ok((mmap, file))
    }
}

impl ClassBytes for JarSource {
    fn bytes_for(&self, name: &ClassName) -> Result<Vec<u8>, LoadError> {
        let (mmap, _file) = self.open()?;
        let mut archive =
            ZipArchive::new(Cursor::new(&mmap[..])).map_err(|source| LoadError::Archive {
                path: self.path.clone(),
                source,
            })?;

        let Ok(mut entry) = archive.by_name(&name.class_file_path()) else {
            return Err(LoadError::NotFound(name.clone()));
        };
        let mut bytes = Vec::with_capacity(entry.size() as usize);
        entry
            .read_to_end(&mut bytes)
            .map_err(|source| LoadError::Io {
                path: self.path.clone(),
                source,
            })?;
        Ok(bytes)
    }
}

/// Ordered list of sources; the first hit wins.
pub struct SearchPath {
    sources: Vec<Box<dyn ClassBytes>>,
}

impl SearchPath {
    pub fn from_roots(roots: &[PathBuf]) -> Self {
        let sources = roots
            .iter()
            .map(|root| {
                if is_jar(root) {
                    Box::new(JarSource::new(root)) as Box<dyn ClassBytes>
                } else {
                    Box::new(DirSource::new(root))
                }
            })
            .collect();
        Self { sources }
    }
}

impl ClassBytes for SearchPath {
    fn bytes_for(&self, name: &ClassName) -> Result<Vec<u8>, LoadError> {
        for source in &self.sources {
            match source.bytes_for(name) {
                Err(LoadError::NotFound(_)) => continue,
                other => return other,
            }
        }
        Err(LoadError::NotFound(name.clone()))
    }
}

/// The default provider: fetch bytes, decode them.
pub struct DecodingProvider<S: ClassBytes> {
    source: S,
}

impl<S: ClassBytes> DecodingProvider<S> {
    pub fn new(source: S) -> Self {
        Self { source }
    }
}

impl<S: ClassBytes> ClassProvider for DecodingProvider<S> {
    fn load(&self, name: &ClassName) -> Result<DecodedClass, LoadError> {
        let bytes = self.source.bytes_for(name)?;
        decode_class(&bytes).map_err(|source| LoadError::Malformed {
            class: name.clone(),
            source,
        })
    }
}

fn is_jar(path: &Path) -> bool {
    path.extension().is_some_and(|e| e == "jar")
}

fn class_name_of_entry(entry: &str) -> Option<ClassName> {
    let stem = entry.strip_suffix(".class")?;
    if stem.ends_with("module-info") || stem.ends_with("package-info") {
        return None;
    }
    Some(ClassName::new(stem))
}

/// Every class name reachable from the given roots (directories or JARs).
/// Roots are probed in parallel; the analysis itself stays sequential.
pub fn scan_classpath(roots: &[PathBuf]) -> Result<Vec<ClassName>, LoadError> {
    let per_root: Vec<Vec<ClassName>> = roots
        .par_iter()
        .map(|root| {
            if is_jar(root) {
                jar_classes(root)
            } else {
                Ok(dir_classes(root))
            }
        })
        .collect::<Result<_, _>>()?;

    let mut names: Vec<ClassName> = per_root.into_iter().flatten().collect();
    names.sort();
    names.dedup();
    Ok(names)
}

fn jar_classes(path: &Path) -> Result<Vec<ClassName>, LoadError> {
    let source = JarSource::new(path);
    let (mmap, _file) = source.open()?;
    let mut archive =
        ZipArchive::new(Cursor::new(&mmap[..])).map_err(|source| LoadError::Archive {
            path: path.to_path_buf(),
            source,
        })?;

    let mut names = Vec::new();
    for i in 0..archive.len() {
        let entry = archive.by_index(i).map_err(|source| LoadError::Archive {
            path: path.to_path_buf(),
            source,
        })?;
        if let Some(name) = class_name_of_entry(entry.name()) {
            names.push(name);
        }
    }
    Ok(names)
}

fn dir_classes(root: &Path) -> Vec<ClassName> {
    let (tx, rx) = mpsc::channel();

    let walker = ignore::WalkBuilder::new(root)
        .hidden(false)
        .git_ignore(false)
        .git_global(false)
        .git_exclude(false)
        .build_parallel();

    walker.run(|| {
        let tx = tx.clone();
        let root = root.to_path_buf();
        Box::new(move |entry| {
            if let Ok(entry) = entry {
                let path = entry.path();
                if path.extension().is_some_and(|e| e == "class")
                    && let Ok(rel) = path.strip_prefix(&root)
                    && let Some(name) = class_name_of_entry(&rel.to_string_lossy())
                {
                    let _ = tx.send(name);
                }
            }
            ignore::WalkState::Continue
        })
    });

    drop(tx);
    rx.iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn temp_dir(name: &str) -> PathBuf {
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        std::env::temp_dir().join(format!(
            "mutability_scan_test_{}_{}_{}",
            std::process::id(),
            nanos,
            name
        ))
    }

    fn write_jar(path: &Path, entries: &[(&str, &[u8])]) {
        use zip::write::FileOptions;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        let file = std::fs::File::create(path).unwrap();
        let mut zip = zip::ZipWriter::new(file);
        for (name, content) in entries {
            zip.start_file(*name, FileOptions::default()).unwrap();
            zip.write_all(content).unwrap();
        }
        zip.finish().unwrap();
    }

    #[test]
    fn dir_source_reads_class_files() {
        let root = temp_dir("dir_source");
        let class_path = root.join("a/b/C.class");
        std::fs::create_dir_all(class_path.parent().unwrap()).unwrap();
        std::fs::write(&class_path, b"bytes").unwrap();

        let source = DirSource::new(&root);
        assert_eq!(
            source.bytes_for(&ClassName::new("a.b.C")).unwrap(),
            b"bytes"
        );
        assert!(matches!(
            source.bytes_for(&ClassName::new("a.b.Missing")),
            Err(LoadError::NotFound(_))
        ));

        let _ = std::fs::remove_dir_all(root);
    }

    #[test]
    fn jar_source_reads_entries() {
        let root = temp_dir("jar_source");
        let jar = root.join("lib.jar");
        write_jar(&jar, &[("a/b/C.class", b"bytes")]);

        let source = JarSource::new(&jar);
        assert_eq!(
            source.bytes_for(&ClassName::new("a/b/C")).unwrap(),
            b"bytes"
        );
        assert!(matches!(
            source.bytes_for(&ClassName::new("a.b.Missing")),
            Err(LoadError::NotFound(_))
        ));

        let _ = std::fs::remove_dir_all(root);
    }

    #[test]
    fn search_path_takes_first_hit() {
        let root = temp_dir("search_path");
        let dir_root = root.join("classes");
        let class_path = dir_root.join("a/A.class");
        std::fs::create_dir_all(class_path.parent().unwrap()).unwrap();
        std::fs::write(&class_path, b"from-dir").unwrap();

        let jar = root.join("lib.jar");
        write_jar(&jar, &[("a/A.class", b"from-jar"), ("a/B.class", b"b")]);

        let search = SearchPath::from_roots(&[dir_root, jar]);
        assert_eq!(search.bytes_for(&ClassName::new("a.A")).unwrap(), b"from-dir");
        assert_eq!(search.bytes_for(&ClassName::new("a.B")).unwrap(), b"b");

        let _ = std::fs::remove_dir_all(root);
    }

    #[test]
    fn scan_classpath_lists_dirs_and_jars() {
        let root = temp_dir("scan");
        let dir_root = root.join("classes");
        let class_path = dir_root.join("a/A.class");
        std::fs::create_dir_all(class_path.parent().unwrap()).unwrap();
        std::fs::write(&class_path, b"x").unwrap();

        let jar = root.join("lib.jar");
        write_jar(
            &jar,
            &[
                ("a/A.class", b"x"),
                ("b/B.class", b"x"),
                ("module-info.class", b"x"),
                ("META-INF/MANIFEST.MF", b"x"),
            ],
        );

        let names = scan_classpath(&[dir_root, jar]).unwrap();
        assert_eq!(
            names,
            vec![ClassName::new("a.A"), ClassName::new("b.B")]
        );

        let _ = std::fs::remove_dir_all(root);
    }

    #[test]
    fn decoding_provider_reports_malformed_bytes() {
        let root = temp_dir("malformed");
        let class_path = root.join("a/Bad.class");
        std::fs::create_dir_all(class_path.parent().unwrap()).unwrap();
        std::fs::write(&class_path, b"not a class file").unwrap();

        let provider = DecodingProvider::new(DirSource::new(&root));
        let err = provider.load(&ClassName::new("a.Bad")).unwrap_err();
        assert!(matches!(err, LoadError::Malformed { .. }));

        let _ = std::fs::remove_dir_all(root);
    }
}
