//! In-process stand-in for "discover modules from a configured directory"
//! (spec §4.7.1): a `ModuleRegistry` of named constructors, populated at
//! compile time by whichever modules are linked into the binary, resolved
//! against the settings file's module-filename list in list order.

use std::collections::HashMap;

use crate::error::ModuleError;
use crate::module::Module;

type Constructor = Box<dyn Fn() -> Box<dyn Module> + Send + Sync>;

#[derive(Default)]
pub struct ModuleRegistry {
    constructors: HashMap<String, Constructor>,
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a module constructor under the name it will be referenced
    /// by in the settings file's `<Module file="...">` list.
    pub fn register<F>(&mut self, name: impl Into<String>, ctor: F)
    where
        F: Fn() -> Box<dyn Module> + Send + Sync + 'static,
    {
        self.constructors.insert(name.into(), Box::new(ctor));
    }

    /// Resolve the settings file's module list, in order, into live module
    /// instances. A name with no matching constructor is a `ConfigError`-class
    /// startup problem for the caller to decide how to handle (the spec
    /// treats a missing *file* as fatal, but an unlinked-in plug-in is
    /// reported rather than aborting, since no plug-in in this spec's scope
    /// is load-bearing for the core server to run).
    pub fn build(&self, names: &[String]) -> (Vec<Box<dyn Module>>, Vec<ModuleError>) {
        let mut modules = Vec::with_capacity(names.len());
        let mut errors = Vec::new();
        for name in names {
            match self.constructors.get(name) {
                Some(ctor) => modules.push(ctor()),
                None => errors.push(ModuleError::NotRegistered { module: name.clone() }),
            }
        }
        (modules, errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Noop;
    impl Module for Noop {
        fn name(&self) -> &str {
            "noop"
        }
    }

    #[test]
    fn build_resolves_registered_names_in_order() {
        let mut registry = ModuleRegistry::new();
        registry.register("noop", || Box::new(Noop));
        let (modules, errors) = registry.build(&["noop".to_string()]);
        assert_eq!(modules.len(), 1);
        assert!(errors.is_empty());
    }

    #[test]
    fn build_reports_unregistered_names_without_failing_the_rest() {
        let mut registry = ModuleRegistry::new();
        registry.register("noop", || Box::new(Noop));
        let (modules, errors) = registry.build(&["noop".to_string(), "missing".to_string()]);
        assert_eq!(modules.len(), 1);
        assert_eq!(errors.len(), 1);
    }
}
