use std::collections::BTreeMap;

use specfile_config::Config;

/// Body and optional parameter signature of one macro.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MacroValue {
    pub body: String,
    /// getopt-style option string for parametric macros, e.g. `n:f`
    pub params: Option<String>,
}

impl MacroValue {
    pub fn new(body: impl Into<String>) -> Self {
        Self {
            body: body.into(),
            params: None,
        }
    }

    pub fn with_params(body: impl Into<String>, params: impl Into<String>) -> Self {
        Self {
            body: body.into(),
            params: Some(params.into()),
        }
    }
}

/// The macro table of one document.
///
/// Three layers, searched top-down:
///
/// 1. overrides supplied by the caller, which can also undefine a name and
///    hide it from the layers below
/// 2. definitions registered from the document while its conditionals are
///    scanned
/// 3. built-in defaults such as `_target_cpu`
///
/// Every [`Document`](crate::Document) owns its own context. Cloning copies
/// all layers, so clones never observe each other's changes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MacroContext {
    builtins: BTreeMap<String, MacroValue>,
    document: BTreeMap<String, MacroValue>,
    overrides: BTreeMap<String, Option<MacroValue>>,
}

impl Default for MacroContext {
    fn default() -> Self {
        Self::new()
    }
}

impl MacroContext {
    pub const TARGET_CPU: &'static str = "_target_cpu";
    pub const TARGET_OS: &'static str = "_target_os";

    pub fn new() -> Self {
        let mut builtins = BTreeMap::new();
        for (name, body) in [
            (Self::TARGET_CPU, "x86_64"),
            (Self::TARGET_OS, "linux"),
            ("_arch", "x86_64"),
            ("nil", ""),
            ("_sourcedir", "."),
            ("_prefix", "/usr"),
            ("_bindir", "%{_prefix}/bin"),
            ("_libdir", "%{_prefix}/lib64"),
            ("_datadir", "%{_prefix}/share"),
            ("_sysconfdir", "/etc"),
        ] {
            builtins.insert(name.to_string(), MacroValue::new(body));
        }
        Self {
            builtins,
            document: BTreeMap::new(),
            overrides: BTreeMap::new(),
        }
    }

    /// Context with the target and overrides from a configuration file.
    pub fn from_config(config: &Config) -> Self {
        let mut context = Self::new();
        context.set_target(config.target_cpu.as_deref(), config.target_os.as_deref());
        for (name, body) in &config.macros {
            context.define(name, body);
        }
        for name in &config.undefine {
            context.undefine(name);
        }
        context
    }

    /// Replace the built-in target architecture and operating system.
    pub fn set_target(&mut self, cpu: Option<&str>, os: Option<&str>) {
        if let Some(cpu) = cpu {
            self.builtins
                .insert(Self::TARGET_CPU.to_string(), MacroValue::new(cpu));
            self.builtins.insert("_arch".to_string(), MacroValue::new(cpu));
        }
        if let Some(os) = os {
            self.builtins
                .insert(Self::TARGET_OS.to_string(), MacroValue::new(os));
        }
    }

    pub fn lookup(&self, name: &str) -> Option<&MacroValue> {
        if let Some(overridden) = self.overrides.get(name) {
            return overridden.as_ref();
        }
        self.document
            .get(name)
            .or_else(|| self.builtins.get(name))
    }

    pub fn is_defined(&self, name: &str) -> bool {
        self.lookup(name).is_some()
    }

    /// Register a definition found in the document. Later registrations of
    /// the same name replace earlier ones.
    pub fn define_document(&mut self, name: &str, value: MacroValue) {
        self.document.insert(name.to_string(), value);
    }

    /// `%undefine` in the document.
    pub fn undefine_document(&mut self, name: &str) {
        self.document.remove(name);
    }

    pub fn clear_document(&mut self) {
        self.document.clear();
    }

    /// Shadow `name` with `body` regardless of what the document defines.
    pub fn define(&mut self, name: &str, body: &str) {
        self.overrides
            .insert(name.to_string(), Some(MacroValue::new(body)));
    }

    /// Hide `name` from every layer.
    pub fn undefine(&mut self, name: &str) {
        self.overrides.insert(name.to_string(), None);
    }

    /// Drop an override, exposing the document and built-in layers again.
    pub fn clear_override(&mut self, name: &str) -> bool {
        self.overrides.remove(name).is_some()
    }

    /// Explicit overrides; `None` marks an undefine.
    pub fn overrides(&self) -> impl Iterator<Item = (&str, Option<&MacroValue>)> {
        self.overrides
            .iter()
            .map(|(name, value)| (name.as_str(), value.as_ref()))
    }
}
