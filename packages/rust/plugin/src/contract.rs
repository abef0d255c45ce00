//! Interface contracts generated code must satisfy before it is ever called.

use serde::{Deserialize, Serialize};

use extractflow_shared::{ExtractflowError, Result};

/// What a plugin is loaded as.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PluginKind {
    Extractor,
    Converter,
}

impl PluginKind {
    pub fn contract(&self) -> &'static InterfaceContract {
        match self {
            Self::Extractor => &EXTRACTOR_CONTRACT,
            Self::Converter => &CONVERTER_CONTRACT,
        }
    }
}

/// The class shape a plugin kind requires.
pub struct InterfaceContract {
    pub class_name: &'static str,
    /// Keyword arguments the constructor is called with.
    pub constructor_args: &'static [&'static str],
    pub method: &'static str,
    /// Keyword parameters the method must accept.
    pub method_params: &'static [&'static str],
    /// Human-readable form of the required return annotation.
    pub returns: &'static str,
    pub returns_matches: fn(&str) -> bool,
}

pub static EXTRACTOR_CONTRACT: InterfaceContract = InterfaceContract {
    class_name: "HTMLExtractor",
    constructor_args: &["schema"],
    method: "extract",
    method_params: &["html_content", "file_path"],
    returns: "Dict[str, Any]",
    returns_matches: |ann| {
        let lower = ann.to_lowercase();
        lower.contains("dict") || lower.contains("mapping")
    },
};

pub static CONVERTER_CONTRACT: InterfaceContract = InterfaceContract {
    class_name: "MarkdownConverter",
    constructor_args: &[],
    method: "convert",
    method_params: &["json_data"],
    returns: "str",
    returns_matches: |ann| matches!(ann.trim(), "str" | "builtins.str" | "'str'"),
};

// ---------------------------------------------------------------------------
// Introspection report
// ---------------------------------------------------------------------------

/// One parameter as reported by the plugin host (`self` excluded).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParamInfo {
    pub name: String,
    /// Python parameter kind, e.g. `positional_or_keyword`, `var_keyword`.
    pub kind: String,
    pub required: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MethodInfo {
    pub name: String,
    #[serde(default)]
    pub params: Vec<ParamInfo>,
    #[serde(default)]
    pub returns: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassInfo {
    pub name: String,
    #[serde(default)]
    pub methods: Vec<MethodInfo>,
}

/// Classes defined by a plugin module.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginDescription {
    #[serde(default)]
    pub classes: Vec<ClassInfo>,
}

impl PluginDescription {
    pub fn class(&self, name: &str) -> Option<&ClassInfo> {
        self.classes.iter().find(|c| c.name == name)
    }
}

impl ClassInfo {
    pub fn method(&self, name: &str) -> Option<&MethodInfo> {
        self.methods.iter().find(|m| m.name == name)
    }
}

impl MethodInfo {
    fn accepts_var_keyword(&self) -> bool {
        self.params.iter().any(|p| p.kind == "var_keyword")
    }

    /// Whether a call passing only `names` as keywords can bind.
    fn accepts_keywords(&self, names: &[&str]) -> bool {
        names.iter().all(|n| {
            self.accepts_var_keyword()
                || self
                    .params
                    .iter()
                    .any(|p| p.name == *n && p.kind != "positional_only")
        })
    }

    /// Required parameters not covered by `names`.
    fn unfilled_required(&self, names: &[&str]) -> Vec<&str> {
        self.params
            .iter()
            .filter(|p| p.required && !names.contains(&p.name.as_str()))
            .map(|p| p.name.as_str())
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Verification
// ---------------------------------------------------------------------------

/// Every way `description` falls short of the contract for `kind`.
pub fn contract_violations(kind: PluginKind, description: &PluginDescription) -> Vec<String> {
    let contract = kind.contract();
    let class_name = contract.class_name;

    let Some(class) = description.class(class_name) else {
        let found: Vec<&str> = description.classes.iter().map(|c| c.name.as_str()).collect();
        return vec![format!(
            "class `{class_name}` is not defined (found: {})",
            if found.is_empty() { "none".to_string() } else { found.join(", ") }
        )];
    };

    let mut violations = Vec::new();

    match class.method("__init__") {
        Some(init) => {
            for arg in contract.constructor_args {
                if !init.accepts_keywords(&[*arg]) {
                    violations.push(format!("`{class_name}.__init__` does not accept `{arg}`"));
                }
            }
            for name in init.unfilled_required(contract.constructor_args) {
                violations.push(format!(
                    "`{class_name}.__init__` requires unexpected parameter `{name}`"
                ));
            }
        }
        None if !contract.constructor_args.is_empty() => {
            violations.push(format!(
                "`{class_name}.__init__` is not defined, so `{}` cannot be passed",
                contract.constructor_args.join("`, `")
            ));
        }
        None => {}
    }

    let method_name = contract.method;
    match class.method(method_name) {
        None => {
            let found: Vec<&str> = class
                .methods
                .iter()
                .map(|m| m.name.as_str())
                .filter(|n| !n.starts_with('_'))
                .collect();
            violations.push(format!(
                "`{class_name}` has no method `{method_name}` (found: {})",
                if found.is_empty() { "none".to_string() } else { found.join(", ") }
            ));
        }
        Some(method) => {
            for param in contract.method_params {
                if !method.accepts_keywords(&[*param]) {
                    violations.push(format!(
                        "`{class_name}.{method_name}` does not accept parameter `{param}`"
                    ));
                }
            }
            for name in method.unfilled_required(contract.method_params) {
                violations.push(format!(
                    "`{class_name}.{method_name}` requires unexpected parameter `{name}`"
                ));
            }
            match method.returns.as_deref() {
                None => violations.push(format!(
                    "`{class_name}.{method_name}` has no return annotation"
                )),
                Some(ann) if !(contract.returns_matches)(ann) => {
                    violations.push(format!(
                        "`{class_name}.{method_name}` is annotated `-> {ann}`, expected `-> {}`",
                        contract.returns
                    ));
                }
                Some(_) => {}
            }
        }
    }

    violations
}

/// Fail closed: any violation is a [`ExtractflowError::Contract`].
pub fn verify_contract(kind: PluginKind, description: &PluginDescription) -> Result<()> {
    let violations = contract_violations(kind, description);
    if violations.is_empty() {
        Ok(())
    } else {
        Err(ExtractflowError::contract(violations.join("; ")))
    }
}
