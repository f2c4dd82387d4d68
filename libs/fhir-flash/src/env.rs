//! The evaluation environment (spec.md §3, §6): a nested scope chain
//! carrying the resolved FHIR definitions, a compiled-regex cache, a
//! verbose-logger flag, and the transient per-scope accumulators
//! (`__collectedSliceErrors`, `__keys_before_auto_injection`).
//!
//! Per §9's own design note, this is modeled as "explicit fields of an
//! evaluation-context value threaded through calls" with "scope nesting
//! as a stack of contexts" rather than as global/thread-local state.

use crate::config::EvaluatorConfig;
use crate::definitions::FhirDefinitions;
use crate::error::FlashError;
use regex::Regex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// One frame of the scope stack. Dies when its `evaluate_flash` call
/// returns (spec.md §3 "Lifecycle").
#[derive(Debug, Default)]
struct Scope {
    vars: HashMap<String, Value>,
    collected_slice_errors: Vec<FlashError>,
    keys_before_auto_injection: Option<Vec<String>>,
}

/// The environment threaded through every `evaluate_flash` call.
///
/// The compiled-regex cache is the only state shared *across* scopes
/// (spec.md §5 "Shared state"): it lives behind an `Arc<Mutex<_>>` so a
/// caller sharing one `Environment`'s definitions across evaluations (or
/// workers) gets a correctly-guarded cache for free.
pub struct Environment {
    definitions: Arc<dyn FhirDefinitions>,
    regex_cache: Arc<Mutex<HashMap<String, Regex>>>,
    config: EvaluatorConfig,
    scopes: Vec<Scope>,
}

impl Environment {
    pub fn new(definitions: Arc<dyn FhirDefinitions>, config: EvaluatorConfig) -> Self {
        Self {
            definitions,
            regex_cache: Arc::new(Mutex::new(HashMap::new())),
            config,
            scopes: vec![Scope::default()],
        }
    }

    pub fn definitions(&self) -> &dyn FhirDefinitions {
        self.definitions.as_ref()
    }

    pub fn config(&self) -> &EvaluatorConfig {
        &self.config
    }

    /// Current recursion depth, i.e. how many scopes are stacked below
    /// the root. Used to enforce `max_recursion_depth` (SPEC_FULL.md
    /// §10.3) during virtual-rule synthesis.
    pub fn depth(&self) -> usize {
        self.scopes.len() - 1
    }

    /// Push a fresh scope for a recursive `evaluate_flash` call (e.g. a
    /// virtual rule). Must be paired with [`Environment::pop_scope`].
    pub fn push_scope(&mut self) {
        self.scopes.push(Scope::default());
    }

    /// Pop and discard the current scope's accumulators — they are
    /// scope-local and die with it (spec.md §3 "Lifecycle").
    pub fn pop_scope(&mut self) {
        self.scopes.pop();
        debug_assert!(!self.scopes.is_empty(), "popped the root scope");
    }

    fn current(&self) -> &Scope {
        self.scopes.last().expect("scope stack is never empty")
    }

    fn current_mut(&mut self) -> &mut Scope {
        self.scopes.last_mut().expect("scope stack is never empty")
    }

    /// Bind a variable in the current scope (host-evaluator bind nodes,
    /// spec.md §4.2, mutate the environment through this).
    pub fn bind(&mut self, name: impl Into<String>, value: Value) {
        self.current_mut().vars.insert(name.into(), value);
    }

    /// Hierarchical variable lookup: current scope first, then parents.
    pub fn lookup(&self, name: &str) -> Option<&Value> {
        self.scopes
            .iter()
            .rev()
            .find_map(|scope| scope.vars.get(name))
    }

    /// Get-or-compile a regex through the shared cache (spec.md §4.4,
    /// §6 `compiledFhirRegex_GET`/`_SET`).
    pub fn compile_regex(&self, pattern: &str) -> Result<Regex, regex::Error> {
        let mut cache = self.regex_cache.lock().expect("regex cache poisoned");
        if let Some(re) = cache.get(pattern) {
            return Ok(re.clone());
        }
        let re = Regex::new(pattern)?;
        cache.insert(pattern.to_string(), re.clone());
        Ok(re)
    }

    pub fn push_slice_error(&mut self, error: FlashError) {
        self.current_mut().collected_slice_errors.push(error);
    }

    pub fn collected_slice_errors(&self) -> &[FlashError] {
        &self.current().collected_slice_errors
    }

    pub fn take_collected_slice_errors(&mut self) -> Vec<FlashError> {
        std::mem::take(&mut self.current_mut().collected_slice_errors)
    }

    pub fn set_keys_before_auto_injection(&mut self, keys: Vec<String>) {
        self.current_mut().keys_before_auto_injection = Some(keys);
    }

    pub fn keys_before_auto_injection(&self) -> Option<&[String]> {
        self.current()
            .keys_before_auto_injection
            .as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definitions::StaticDefinitions;

    fn env() -> Environment {
        Environment::new(Arc::new(StaticDefinitions::new()), EvaluatorConfig::default())
    }

    #[test]
    fn regex_cache_reuses_compiled_pattern() {
        let env = env();
        let a = env.compile_regex(r"^\d+$").unwrap();
        let b = env.compile_regex(r"^\d+$").unwrap();
        assert_eq!(a.as_str(), b.as_str());
    }

    #[test]
    fn scope_accumulators_are_local_and_die_on_pop() {
        let mut env = env();
        env.push_slice_error(FlashError::forbidden_element("X.y"));
        assert_eq!(env.collected_slice_errors().len(), 1);

        env.push_scope();
        assert!(env.collected_slice_errors().is_empty(), "child scope starts clean");
        env.push_slice_error(FlashError::forbidden_element("X.z"));
        assert_eq!(env.collected_slice_errors().len(), 1);
        env.pop_scope();

        assert_eq!(env.collected_slice_errors().len(), 1, "parent scope untouched");
    }

    #[test]
    fn variable_lookup_walks_parent_scopes() {
        let mut env = env();
        env.bind("resource", Value::String("root".to_string()));
        env.push_scope();
        assert_eq!(
            env.lookup("resource"),
            Some(&Value::String("root".to_string()))
        );
        env.bind("resource", Value::String("child".to_string()));
        assert_eq!(
            env.lookup("resource"),
            Some(&Value::String("child".to_string()))
        );
        env.pop_scope();
        assert_eq!(
            env.lookup("resource"),
            Some(&Value::String("root".to_string()))
        );
    }
}
