//! Ambient evaluator knobs (SPEC_FULL.md §10.3). None of this is part of
//! the core algorithm in spec.md — it's the production-readiness surface
//! a deployed evaluator needs, constructed directly rather than parsed
//! from a CLI (parsing configuration is the surrounding application's
//! job, per spec.md §1).

/// Runtime configuration for [`crate::evaluator::evaluate_flash`].
#[derive(Debug, Clone)]
pub struct EvaluatorConfig {
    /// When `false`, a missing mandatory child (spec.md §7 F3002) is
    /// recorded as a warning on the environment instead of aborting the
    /// evaluation. Useful for previewing partially-authored instances.
    pub enforce_mandatory: bool,
    /// Hard ceiling on virtual-rule recursion depth (spec.md §5 notes
    /// real FHIR profiles bottom out around ~20).
    pub max_recursion_depth: usize,
    /// Mirrors binding `__disable_reordering` in the environment
    /// (spec.md §4.5) as a first-class knob.
    pub disable_reordering: bool,
    /// Upgrades selected `trace!` events to `debug!`, mirroring the
    /// `__verbose_logger` environment key (spec.md §6).
    pub verbose_logger: bool,
}

impl Default for EvaluatorConfig {
    fn default() -> Self {
        Self {
            enforce_mandatory: true,
            max_recursion_depth: 64,
            disable_reordering: false,
            verbose_logger: false,
        }
    }
}

impl EvaluatorConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enforce_mandatory(mut self, enforce: bool) -> Self {
        self.enforce_mandatory = enforce;
        self
    }

    pub fn max_recursion_depth(mut self, depth: usize) -> Self {
        self.max_recursion_depth = depth;
        self
    }

    pub fn disable_reordering(mut self, disable: bool) -> Self {
        self.disable_reordering = disable;
        self
    }

    pub fn verbose_logger(mut self, verbose: bool) -> Self {
        self.verbose_logger = verbose;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_notes() {
        let cfg = EvaluatorConfig::default();
        assert!(cfg.enforce_mandatory);
        assert_eq!(cfg.max_recursion_depth, 64);
        assert!(!cfg.disable_reordering);
    }

    #[test]
    fn builder_overrides_apply() {
        let cfg = EvaluatorConfig::new()
            .enforce_mandatory(false)
            .max_recursion_depth(8)
            .disable_reordering(true);
        assert!(!cfg.enforce_mandatory);
        assert_eq!(cfg.max_recursion_depth, 8);
        assert!(cfg.disable_reordering);
    }
}
