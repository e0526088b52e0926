//! Analysis session: orchestrates the checker registry per class, caches
//! results, and owns the in-progress set that makes recursion over cyclic
//! field-type graphs terminate.
//!
//! One session per thread: the interior state is deliberately not
//! synchronized, and sessions are cheap to construct.

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use tracing::{debug, warn};

use crate::checker::{self, Checker};
use crate::config::Configuration;
use crate::loader::ClassProvider;
use crate::model::{
    AnalysisError, AnalysisResult, CheckOutcome, ClassName, CodeLocation, Reason, ReasonKind,
    Verdict, merge_outcomes,
};

pub struct AnalysisSession {
    provider: Box<dyn ClassProvider>,
    config: Configuration,
    checkers: Vec<Box<dyn Checker>>,
    cache: RefCell<HashMap<ClassName, AnalysisResult>>,
    in_progress: RefCell<HashSet<ClassName>>,
    abstractness: RefCell<HashMap<ClassName, bool>>,
    errors: RefCell<Vec<AnalysisError>>,
}

impl AnalysisSession {
    pub fn new(provider: Box<dyn ClassProvider>, config: Configuration) -> Self {
        Self::with_checkers(provider, config, checker::registry())
    }

    pub fn with_checkers(
        provider: Box<dyn ClassProvider>,
        config: Configuration,
        checkers: Vec<Box<dyn Checker>>,
    ) -> Self {
        Self {
            provider,
            config,
            checkers,
            cache: RefCell::new(HashMap::new()),
            in_progress: RefCell::new(HashSet::new()),
            abstractness: RefCell::new(HashMap::new()),
            errors: RefCell::new(Vec::new()),
        }
    }

    /// The single entry point, re-entered by checkers through the resolver.
    ///
    /// On a cycle (the class is already on the active analysis chain) the
    /// call returns an optimistic `Immutable` placeholder without caching
    /// it: a reference cycle alone proves nothing, and any genuinely
    /// mutable member of the cycle still gets its own verdict when its
    /// analysis completes.
    pub fn result_for(&self, name: &ClassName) -> AnalysisResult {
        if let Some(result) = self.config.override_for(name) {
            debug!(class = %name, "configuration override");
            self.cache
                .borrow_mut()
                .entry(name.clone())
                .or_insert_with(|| result.clone());
            return result.clone();
        }
        if let Some(result) = self.cache.borrow().get(name) {
            debug!(class = %name, "cache hit");
            return result.clone();
        }
        if self.in_progress.borrow().contains(name) {
            debug!(class = %name, "cycle detected, returning placeholder");
            return AnalysisResult::immutable(name.clone());
        }

        self.in_progress.borrow_mut().insert(name.clone());
        let result = self.analyze(name);
        self.in_progress.borrow_mut().remove(name);
        self.cache
            .borrow_mut()
            .insert(name.clone(), result.clone());
        result
    }

    fn analyze(&self, name: &ClassName) -> AnalysisResult {
        let class = match self.provider.load(name) {
            Ok(class) => class,
            Err(err) => {
                warn!(class = %name, error = %err, "could not load class");
                self.errors.borrow_mut().push(AnalysisError {
                    class: name.clone(),
                    checker: "loader".to_string(),
                    description: err.to_string(),
                });
                return AnalysisResult::definite(
                    name.clone(),
                    Verdict::CouldNotAnalyse,
                    Reason::new(
                        ReasonKind::CouldNotAnalyse,
                        format!("could not analyse: {err}"),
                        CodeLocation::class_level(name.clone()),
                    ),
                );
            }
        };

        self.abstractness.borrow_mut().insert(
            name.clone(),
            class.flags.is_abstract || class.flags.is_interface,
        );

        let resolver = FieldTypeResolver::new(self);
        let mut outcomes = Vec::with_capacity(self.checkers.len());
        for checker in &self.checkers {
            match checker.check(&class, &resolver) {
                Ok(outcome) => outcomes.push(outcome),
                Err(err) => {
                    warn!(class = %name, checker = checker.name(), error = %err, "checker failed");
                    self.errors.borrow_mut().push(AnalysisError {
                        class: name.clone(),
                        checker: checker.name().to_string(),
                        description: format!("{err:#}"),
                    });
                    outcomes.push(CheckOutcome::flagged(
                        Verdict::CouldNotAnalyse,
                        vec![Reason::new(
                            ReasonKind::CouldNotAnalyse,
                            format!("checker {} failed: {err}", checker.name()),
                            CodeLocation::class_level(name.clone()),
                        )],
                    ));
                }
            }
        }

        merge_outcomes(name.clone(), outcomes)
    }

    /// Sequential batch entry point; failures never abort siblings.
    pub fn run_analysis(&self, names: &[ClassName]) {
        for name in names {
            let _ = self.result_for(name);
        }
    }

    pub fn results(&self) -> Vec<AnalysisResult> {
        let mut results: Vec<_> = self.cache.borrow().values().cloned().collect();
        results.sort_by(|a, b| a.class.cmp(&b.class));
        results
    }

    pub fn errors(&self) -> Vec<AnalysisError> {
        self.errors.borrow().clone()
    }

    fn is_recorded_abstract(&self, name: &ClassName) -> bool {
        self.abstractness.borrow().get(name).copied().unwrap_or(false)
    }
}

/// Handed to checkers; the only way one class's analysis reaches another's.
pub struct FieldTypeResolver<'s> {
    session: &'s AnalysisSession,
}

impl<'s> FieldTypeResolver<'s> {
    pub fn new(session: &'s AnalysisSession) -> Self {
        Self { session }
    }

    pub fn resolve(&self, ty: &ClassName) -> AnalysisResult {
        self.session.result_for(ty)
    }

    /// Whether the type resolved to an interface or abstract class. Only
    /// meaningful after `resolve` has been called for the type.
    pub fn is_abstract(&self, ty: &ClassName) -> bool {
        self.session.is_recorded_abstract(ty)
    }

    /// Configuration allow-list: types assumed immutable without analysis.
    pub fn assumed_immutable(&self, ty: &ClassName) -> bool {
        self.session.config.assumes_immutable(ty)
    }
}
