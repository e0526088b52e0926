//! Analysis configuration: hardcoded per-class result overrides (consulted
//! before any checker runs) and the allow-list of types assumed immutable
//! when used as field values.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::path::Path;

use crate::model::{AnalysisResult, ClassName, CodeLocation, Reason, ReasonKind, Verdict};

/// JDK types treated as inherently immutable field values.
const JDK_IMMUTABLE: &[&str] = &[
    "java.lang.String",
    "java.lang.Boolean",
    "java.lang.Byte",
    "java.lang.Character",
    "java.lang.Short",
    "java.lang.Integer",
    "java.lang.Long",
    "java.lang.Float",
    "java.lang.Double",
    "java.lang.Class",
    "java.math.BigDecimal",
    "java.math.BigInteger",
];

#[derive(Debug, Clone)]
pub struct Configuration {
    overrides: HashMap<ClassName, AnalysisResult>,
    assumed_immutable: HashSet<ClassName>,
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            overrides: HashMap::new(),
            assumed_immutable: JDK_IMMUTABLE.iter().map(|n| ClassName::new(n)).collect(),
        }
    }
}

impl Configuration {
    pub fn override_for(&self, name: &ClassName) -> Option<&AnalysisResult> {
        self.overrides.get(name)
    }

    pub fn add_override(&mut self, result: AnalysisResult) {
        self.overrides.insert(result.class.clone(), result);
    }

    pub fn assumes_immutable(&self, name: &ClassName) -> bool {
        self.assumed_immutable.contains(name)
    }

    pub fn assume_immutable(&mut self, name: ClassName) {
        self.assumed_immutable.insert(name);
    }

    /// Extend the defaults from a JSON file:
    ///
    /// ```json
    /// {
    ///   "assume_immutable": ["org.joda.time.DateTime"],
    ///   "overrides": [
    ///     { "class": "com.example.Tricky", "verdict": "NotImmutable",
    ///       "reason": "mutates through JNI" }
    ///   ]
    /// }
    /// ```
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        let file: ConfigFile = serde_json::from_str(&raw)
            .with_context(|| format!("failed to parse config file: {}", path.display()))?;

        let mut config = Configuration::default();
        for name in file.assume_immutable {
            config.assume_immutable(ClassName::new(&name));
        }
        for entry in file.overrides {
            let class = ClassName::new(&entry.class);
            let result = if entry.verdict == Verdict::Immutable {
                AnalysisResult::immutable(class)
            } else {
                let reason = Reason::new(
                    ReasonKind::HardcodedResult,
                    entry
                        .reason
                        .unwrap_or_else(|| "hardcoded result".to_string()),
                    CodeLocation::class_level(class.clone()),
                );
                AnalysisResult::definite(class, entry.verdict, reason)
            };
            config.add_override(result);
        }
        Ok(config)
    }
}

#[derive(Debug, Deserialize)]
struct ConfigFile {
    #[serde(default)]
    overrides: Vec<OverrideEntry>,
    #[serde(default)]
    assume_immutable: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct OverrideEntry {
    class: String,
    verdict: Verdict,
    #[serde(default)]
    reason: Option<String>,
}
