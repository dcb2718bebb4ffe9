//! Runtime-tunable knobs, read from environment variables with a `RCIMMIXCONS_` prefix and
//! overridable programmatically before [`crate::collector::Collector::create`].
//!
//! Grounded in `mmtk::util::options`: a plain struct of typed fields, a string-keyed setter
//! that never panics on bad input (it logs a warning and leaves the field unchanged), and a
//! `read_env_var_settings` pass applied once at start-up.

use crate::constants::{
    DEFAULT_EVACUATION_CANDIDATE_FRACTION, DEFAULT_INITIAL_HEAP_BLOCKS,
    DEFAULT_LARGE_OBJECT_THRESHOLD, DEFAULT_MAX_HEAP_BLOCKS,
};

/// Runtime configuration for a [`Collector`](crate::collector::Collector) instance.
#[derive(Debug, Clone, PartialEq)]
pub struct Options {
    /// Blocks reserved from the OS up front, at `create`.
    pub initial_heap_blocks: usize,
    /// Ceiling on how many blocks the block allocator will ever reserve for this instance.
    pub max_heap_blocks: usize,
    /// Objects at or above this size go to the large-object space instead of a block.
    pub large_object_threshold_bytes: usize,
    /// Fraction (0.0..=1.0) of the most-fragmented in-use blocks chosen as evacuation
    /// candidates when a cycle-collecting `collect` is asked to evacuate.
    pub evacuation_candidate_fraction: f64,
    /// If non-zero, force a collection after this many bytes have been allocated since the
    /// last one, regardless of allocator pressure. Zero disables the stress mode. Intended
    /// for tests that want to provoke collections deterministically.
    pub stress_factor: usize,
}

impl Default for Options {
    fn default() -> Self {
        Options {
            initial_heap_blocks: DEFAULT_INITIAL_HEAP_BLOCKS,
            max_heap_blocks: DEFAULT_MAX_HEAP_BLOCKS,
            large_object_threshold_bytes: DEFAULT_LARGE_OBJECT_THRESHOLD,
            evacuation_candidate_fraction: DEFAULT_EVACUATION_CANDIDATE_FRACTION,
            stress_factor: 0,
        }
    }
}

impl Options {
    pub fn new() -> Self {
        let mut options = Self::default();
        options.read_env_var_settings();
        options
    }

    /// Build options without consulting the environment, useful for reproducible tests.
    pub fn new_no_env_vars() -> Self {
        Self::default()
    }

    /// Scan `RCIMMIXCONS_*` environment variables and apply any that parse. Unrecognised
    /// names are ignored; values that fail to parse are logged at `warn` and left at their
    /// current value - a shared environment is not a contract the host necessarily controls.
    pub fn read_env_var_settings(&mut self) {
        for (name, env_key) in [
            ("initial_heap_blocks", "RCIMMIXCONS_INITIAL_HEAP_BLOCKS"),
            ("max_heap_blocks", "RCIMMIXCONS_MAX_HEAP_BLOCKS"),
            (
                "large_object_threshold_bytes",
                "RCIMMIXCONS_LARGE_OBJECT_THRESHOLD_BYTES",
            ),
            (
                "evacuation_candidate_fraction",
                "RCIMMIXCONS_EVACUATION_CANDIDATE_FRACTION",
            ),
            ("stress_factor", "RCIMMIXCONS_STRESS_FACTOR"),
        ] {
            if let Ok(value) = std::env::var(env_key) {
                if !self.set_from_command_line(name, &value) {
                    log::warn!("ignoring invalid value for {env_key}: {value:?}");
                }
            }
        }
    }

    /// Set a single option by name from a string value. Returns `false` if the name is
    /// unknown or the value fails to parse for that field.
    pub fn set_from_command_line(&mut self, name: &str, value: &str) -> bool {
        match name {
            "initial_heap_blocks" => Self::apply(value, |v| self.initial_heap_blocks = v),
            "max_heap_blocks" => Self::apply(value, |v| self.max_heap_blocks = v),
            "large_object_threshold_bytes" => {
                Self::apply(value, |v| self.large_object_threshold_bytes = v)
            }
            "evacuation_candidate_fraction" => {
                Self::apply(value, |v| self.evacuation_candidate_fraction = v)
            }
            "stress_factor" => Self::apply(value, |v| self.stress_factor = v),
            _ => false,
        }
    }

    fn apply<T: std::str::FromStr>(value: &str, mut set: impl FnMut(T)) -> bool {
        match value.parse() {
            Ok(parsed) => {
                set(parsed);
                true
            }
            Err(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_constants() {
        let options = Options::new_no_env_vars();
        assert_eq!(options.initial_heap_blocks, DEFAULT_INITIAL_HEAP_BLOCKS);
        assert_eq!(options.max_heap_blocks, DEFAULT_MAX_HEAP_BLOCKS);
        assert_eq!(options.stress_factor, 0);
    }

    #[test]
    fn set_from_command_line_applies_known_fields() {
        let mut options = Options::new_no_env_vars();
        assert!(options.set_from_command_line("max_heap_blocks", "128"));
        assert_eq!(options.max_heap_blocks, 128);
    }

    #[test]
    fn set_from_command_line_rejects_unknown_field() {
        let mut options = Options::new_no_env_vars();
        assert!(!options.set_from_command_line("not_a_real_field", "1"));
    }

    #[test]
    fn set_from_command_line_rejects_unparseable_value() {
        let mut options = Options::new_no_env_vars();
        let before = options.clone();
        assert!(!options.set_from_command_line("max_heap_blocks", "not-a-number"));
        assert_eq!(options, before);
    }

    #[test]
    fn set_from_command_line_parses_float_fraction() {
        let mut options = Options::new_no_env_vars();
        assert!(options.set_from_command_line("evacuation_candidate_fraction", "0.5"));
        assert_eq!(options.evacuation_candidate_fraction, 0.5);
    }
}
