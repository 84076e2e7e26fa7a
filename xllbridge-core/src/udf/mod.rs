//! Worksheet Function Registry
//!
//! Describes the functions the add-in exposes to the host: their names,
//! argument lists, help texts and categories. The host learns about them
//! from [`FunctionRegistry::register_all`] when the add-in opens.
//!
//! # Fallbacks
//!
//! Only the name and parameter count are required. Everything else falls
//! back when the host asks for it:
//!
//! - register name and display name: the function name
//! - type text: one `U` for the result plus one per parameter
//! - argument text: `arg1,arg2,...`
//! - category: the add-in's default category
//! - help texts: empty

use indexmap::IndexMap;
use tracing::{debug, warn};

use crate::config::AddinConfig;
use crate::error::{Error, Result};
use crate::host::Host;

/// Attribute that can be attached to a function description.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HelpAttribute {
    DisplayName,
    Help,
    Category,
    Arguments,
    ArgumentHelp,
    TypeText,
    RegisterName,
}

/// Description of one worksheet function.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FunctionInfo {
    pub name: String,
    pub param_count: usize,
    pub register_name: Option<String>,
    pub display_name: Option<String>,
    pub type_text: Option<String>,
    pub argument_text: Option<String>,
    pub category: Option<String>,
    pub function_help: Option<String>,
    pub argument_help: Option<String>,
}

impl FunctionInfo {
    pub fn new(name: impl Into<String>, param_count: usize) -> Self {
        Self {
            name: name.into(),
            param_count,
            ..Self::default()
        }
    }

    pub fn set(&mut self, attribute: HelpAttribute, text: impl Into<String>) -> &mut Self {
        let text = text.into();
        match attribute {
            HelpAttribute::DisplayName => self.display_name = Some(text),
            // The host cuts off the last character of the help line.
            HelpAttribute::Help => self.function_help = Some(text + " "),
            HelpAttribute::Category => self.category = Some(text),
            HelpAttribute::Arguments => self.argument_text = Some(text),
            HelpAttribute::ArgumentHelp => self.argument_help = Some(text),
            HelpAttribute::TypeText => self.type_text = Some(text),
            HelpAttribute::RegisterName => self.register_name = Some(text),
        }
        self
    }

    pub fn set_help(&mut self, text: impl Into<String>) -> &mut Self {
        self.set(HelpAttribute::Help, text)
    }

    /// The full record handed to the host, with fallbacks applied.
    pub fn registration(&self, default_category: &str) -> Registration {
        let argument_text = self.argument_text.clone().unwrap_or_else(|| {
            (1..=self.param_count)
                .map(|i| format!("arg{i}"))
                .collect::<Vec<_>>()
                .join(",")
        });
        Registration {
            register_name: self.register_name.clone().unwrap_or_else(|| self.name.clone()),
            type_text: self
                .type_text
                .clone()
                .unwrap_or_else(|| "U".repeat(self.param_count + 1)),
            function_name: self.display_name.clone().unwrap_or_else(|| self.name.clone()),
            argument_text,
            category: self
                .category
                .clone()
                .unwrap_or_else(|| default_category.to_string()),
            function_help: self.function_help.clone().unwrap_or_default(),
            argument_help: self.argument_help.clone().unwrap_or_default(),
        }
    }
}

/// What the host receives when a function is registered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registration {
    /// Exported symbol the host calls.
    pub register_name: String,
    /// Host type signature, result first.
    pub type_text: String,
    /// Name shown in formulas.
    pub function_name: String,
    pub argument_text: String,
    pub category: String,
    pub function_help: String,
    pub argument_help: String,
}

/// All worksheet functions of the add-in, in registration order.
#[derive(Debug, Default)]
pub struct FunctionRegistry {
    functions: IndexMap<String, FunctionInfo>,
}

impl FunctionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Describe function `name`, replacing any earlier description.
    pub fn register(&mut self, name: impl Into<String>, param_count: usize) -> &mut FunctionInfo {
        let name = name.into();
        let info = FunctionInfo::new(name.clone(), param_count);
        match self.functions.entry(name) {
            indexmap::map::Entry::Occupied(mut entry) => {
                entry.insert(info);
                entry.into_mut()
            }
            indexmap::map::Entry::Vacant(entry) => entry.insert(info),
        }
    }

    pub fn get(&self, name: &str) -> Option<&FunctionInfo> {
        self.functions.get(name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut FunctionInfo> {
        self.functions.get_mut(name)
    }

    pub fn set_help(&mut self, name: &str, text: impl Into<String>) -> Result<()> {
        self.lookup(name)?.set_help(text);
        Ok(())
    }

    /// Apply several attributes at once.
    pub fn set_info<I, S>(&mut self, name: &str, attributes: I) -> Result<()>
    where
        I: IntoIterator<Item = (HelpAttribute, S)>,
        S: Into<String>,
    {
        let info = self.lookup(name)?;
        for (attribute, text) in attributes {
            info.set(attribute, text);
        }
        Ok(())
    }

    fn lookup(&mut self, name: &str) -> Result<&mut FunctionInfo> {
        self.functions
            .get_mut(name)
            .ok_or_else(|| Error::InvalidArgument(format!("function {name:?} is not registered")))
    }

    pub fn len(&self) -> usize {
        self.functions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &FunctionInfo> {
        self.functions.values()
    }

    pub fn registration(&self, name: &str, config: &AddinConfig) -> Option<Registration> {
        self.functions
            .get(name)
            .map(|info| info.registration(&config.default_category))
    }

    /// Register every function with the host. Failures are logged and
    /// skipped; returns how many were accepted.
    pub fn register_all(&self, host: &dyn Host, config: &AddinConfig) -> usize {
        let mut accepted = 0;
        for info in self.functions.values() {
            let registration = info.registration(&config.default_category);
            match host.register_function(&registration) {
                Ok(()) => {
                    debug!(function = %info.name, "registered");
                    accepted += 1;
                }
                Err(code) => warn!(function = %info.name, code, "host refused registration"),
            }
        }
        accepted
    }

    /// Withdraw every function from the host; returns how many succeeded.
    pub fn unregister_all(&self, host: &dyn Host) -> usize {
        let mut withdrawn = 0;
        for info in self.functions.values() {
            let register_name = info.register_name.as_deref().unwrap_or(&info.name);
            match host.unregister_function(register_name) {
                Ok(()) => withdrawn += 1,
                Err(code) => warn!(function = %info.name, code, "host refused unregistration"),
            }
        }
        withdrawn
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::{CellRef, CoerceTarget, RawValue};
    use parking_lot::Mutex;

    #[derive(Default)]
    struct RegisteringHost {
        registered: Mutex<Vec<Registration>>,
        removed: Mutex<Vec<String>>,
        refuse: Option<String>,
    }

    impl Host for RegisteringHost {
        fn coerce(&self, _reference: &CellRef, _target: CoerceTarget) -> std::result::Result<RawValue, i32> {
            Err(32)
        }

        fn caller(&self) -> Option<CellRef> {
            None
        }

        fn register_function(&self, registration: &Registration) -> std::result::Result<(), i32> {
            if self.refuse.as_deref() == Some(registration.register_name.as_str()) {
                return Err(32);
            }
            self.registered.lock().push(registration.clone());
            Ok(())
        }

        fn unregister_function(&self, register_name: &str) -> std::result::Result<(), i32> {
            self.removed.lock().push(register_name.to_string());
            Ok(())
        }
    }

    #[test]
    fn fallbacks_fill_every_field() {
        let info = FunctionInfo::new("AddTwo", 2);
        let reg = info.registration("XLL Functions");
        assert_eq!(reg.register_name, "AddTwo");
        assert_eq!(reg.function_name, "AddTwo");
        assert_eq!(reg.type_text, "UUU");
        assert_eq!(reg.argument_text, "arg1,arg2");
        assert_eq!(reg.category, "XLL Functions");
        assert_eq!(reg.function_help, "");
    }

    #[test]
    fn no_parameters_means_no_argument_text() {
        let reg = FunctionInfo::new("Now", 0).registration("c");
        assert_eq!(reg.type_text, "U");
        assert_eq!(reg.argument_text, "");
    }

    #[test]
    fn help_gets_a_trailing_space() {
        let mut info = FunctionInfo::new("f", 1);
        info.set_help("Adds things");
        assert_eq!(info.registration("c").function_help, "Adds things ");
    }

    #[test]
    fn attributes_override_fallbacks() {
        let mut registry = FunctionRegistry::new();
        registry.register("RTDClock", 0);
        registry
            .set_info(
                "RTDClock",
                [
                    (HelpAttribute::DisplayName, "Clock"),
                    (HelpAttribute::Category, "Live"),
                    (HelpAttribute::RegisterName, "rtd_clock"),
                ],
            )
            .unwrap();
        let reg = registry.registration("RTDClock", &AddinConfig::default()).unwrap();
        assert_eq!(reg.function_name, "Clock");
        assert_eq!(reg.category, "Live");
        assert_eq!(reg.register_name, "rtd_clock");
    }

    #[test]
    fn unknown_function_cannot_be_described() {
        let mut registry = FunctionRegistry::new();
        assert!(registry.set_help("missing", "x").is_err());
    }

    #[test]
    fn re_registering_resets_the_description() {
        let mut registry = FunctionRegistry::new();
        registry.register("f", 1).set_help("old");
        registry.register("g", 0);
        registry.register("f", 3);
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.get("f").unwrap().function_help, None);
        let names: Vec<_> = registry.iter().map(|i| i.name.as_str()).collect();
        assert_eq!(names, ["f", "g"]);
    }

    #[test]
    fn register_all_skips_refusals() {
        let mut registry = FunctionRegistry::new();
        registry.register("a", 0);
        registry.register("b", 1);
        let host = RegisteringHost {
            refuse: Some("b".into()),
            ..RegisteringHost::default()
        };
        assert_eq!(registry.register_all(&host, &AddinConfig::default()), 1);
        assert_eq!(host.registered.lock()[0].register_name, "a");

        assert_eq!(registry.unregister_all(&host), 2);
        assert_eq!(*host.removed.lock(), vec!["a".to_string(), "b".to_string()]);
    }
}
