//! Static code-safety checks for analysis code.
//!
//! The validator parses submitted Python with the tree-sitter grammar and walks
//! the syntax tree in source order. It never executes anything. The first
//! violation found decides the verdict, so identical input always yields an
//! identical [`ValidationResult`].
//!
//! The check is conservative: constructs whose effect cannot be determined
//! statically are denied. That covers relative or wildcard imports, dunder
//! names, and strings (literal or assembled from pieces) that could spell a
//! dunder name for a dynamic attribute lookup. The default policy also denies
//! the dynamic-lookup helpers themselves and the pandas/numpy file and network
//! entry points.

use std::collections::BTreeSet;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tree_sitter::{Node, Parser};

use crate::core::types::ValidationResult;

/// How imports are judged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValidatorMode {
    /// Only modules listed in `allowed_modules` may be imported.
    Allowlist,
    /// Any module may be imported unless listed in `denied_modules`.
    Denylist,
}

/// Policy for the code-safety validator (the `[validator]` config table).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidatorPolicy {
    pub mode: ValidatorMode,
    /// Importable module roots in allowlist mode.
    pub allowed_modules: Vec<String>,
    /// Module roots that are never importable or referenceable, in either mode.
    pub denied_modules: Vec<String>,
    /// Names (builtins, attributes) that may not appear anywhere in the code.
    pub denied_names: Vec<String>,
}

impl Default for ValidatorPolicy {
    fn default() -> Self {
        Self {
            mode: ValidatorMode::Allowlist,
            allowed_modules: to_strings(&[
                "pandas",
                "numpy",
                "math",
                "statistics",
                "datetime",
                "decimal",
                "fractions",
                "collections",
                "itertools",
                "functools",
                "json",
                "re",
            ]),
            denied_modules: to_strings(&[
                "os",
                "sys",
                "subprocess",
                "shutil",
                "socket",
                "pathlib",
                "io",
                "importlib",
                "builtins",
                "ctypes",
                "multiprocessing",
                "threading",
                "signal",
                "pickle",
                "marshal",
                "inspect",
                "gc",
                "urllib",
                "http",
                "requests",
                "ftplib",
                "asyncio",
                "pty",
                "tempfile",
                "glob",
                "code",
                "codeop",
                "runpy",
            ]),
            denied_names: to_strings(&[
                "eval",
                "exec",
                "compile",
                "open",
                "input",
                "breakpoint",
                "getattr",
                "setattr",
                "delattr",
                "globals",
                "locals",
                "vars",
                "exit",
                "quit",
                "system",
                "popen",
                "help",
                "dir",
                "chr",
                "bytes",
                "bytearray",
                "decode",
                "attrgetter",
                "methodcaller",
                "query",
            ])
            .into_iter()
            .chain(to_strings(PANDAS_IO))
            .chain(to_strings(NUMPY_IO))
            .collect(),
        }
    }
}

/// pandas readers, writers and file handles. Any of them reaches the filesystem or network.
const PANDAS_IO: &[&str] = &[
    "read_csv",
    "read_table",
    "read_fwf",
    "read_excel",
    "read_json",
    "read_html",
    "read_xml",
    "read_pickle",
    "read_parquet",
    "read_feather",
    "read_orc",
    "read_sas",
    "read_spss",
    "read_stata",
    "read_hdf",
    "read_sql",
    "read_sql_query",
    "read_sql_table",
    "read_gbq",
    "read_clipboard",
    "to_csv",
    "to_excel",
    "to_json",
    "to_html",
    "to_xml",
    "to_pickle",
    "to_parquet",
    "to_feather",
    "to_orc",
    "to_stata",
    "to_hdf",
    "to_sql",
    "to_gbq",
    "to_clipboard",
    "to_latex",
    "to_markdown",
    "to_string",
    "ExcelWriter",
    "ExcelFile",
    "HDFStore",
];

/// numpy file and foreign-memory entry points.
const NUMPY_IO: &[&str] = &[
    "load",
    "save",
    "savez",
    "savez_compressed",
    "loadtxt",
    "savetxt",
    "genfromtxt",
    "fromfile",
    "tofile",
    "fromregex",
    "memmap",
    "ctypeslib",
    "DataSource",
];

/// Methods that assemble a new string from literal pieces.
const STRING_BUILDERS: &[&str] = &["format", "format_map", "join", "replace", "center", "ljust", "rjust"];

/// Python escapes that decode to `_`.
static UNDERSCORE_ESCAPE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\\(x5f|137|u005f|U0000005f|N\{low line\})").expect("underscore escape regex")
});

fn to_strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

/// Stateless code-safety validator built from a [`ValidatorPolicy`].
#[derive(Debug, Clone)]
pub struct CodeSafetyValidator {
    mode: ValidatorMode,
    allowed_modules: BTreeSet<String>,
    denied_modules: BTreeSet<String>,
    denied_names: BTreeSet<String>,
}

impl Default for CodeSafetyValidator {
    fn default() -> Self {
        Self::new(&ValidatorPolicy::default())
    }
}

impl CodeSafetyValidator {
    pub fn new(policy: &ValidatorPolicy) -> Self {
        Self {
            mode: policy.mode,
            allowed_modules: policy.allowed_modules.iter().cloned().collect(),
            denied_modules: policy.denied_modules.iter().cloned().collect(),
            denied_names: policy.denied_names.iter().cloned().collect(),
        }
    }

    pub fn validate(&self, code: &str) -> ValidationResult {
        let mut parser = Parser::new();
        if parser
            .set_language(&tree_sitter_python::LANGUAGE.into())
            .is_err()
        {
            return ValidationResult::deny("unparseable: python grammar unavailable");
        }
        let Some(tree) = parser.parse(code, None) else {
            return ValidationResult::deny("unparseable");
        };

        let root = tree.root_node();
        if root.has_error() {
            return match first_error_line(root) {
                Some(line) => {
                    ValidationResult::deny(format!("unparseable: syntax error on line {line}"))
                }
                None => ValidationResult::deny("unparseable"),
            };
        }

        let source = code.as_bytes();
        let mut cursor = root.walk();
        loop {
            if let Some(reason) = self.check_node(cursor.node(), source) {
                return ValidationResult::deny(reason);
            }
            if cursor.goto_first_child() {
                continue;
            }
            loop {
                if cursor.goto_next_sibling() {
                    break;
                }
                if !cursor.goto_parent() {
                    return ValidationResult::allow();
                }
            }
        }
    }

    fn check_node(&self, node: Node<'_>, source: &[u8]) -> Option<String> {
        match node.kind() {
            "import_statement" => {
                let mut cursor = node.walk();
                node.children_by_field_name("name", &mut cursor)
                    .find_map(|target| self.check_module(import_target(target, source)))
            }
            "import_from_statement" => {
                let module = node.child_by_field_name("module_name")?;
                if module.kind() == "relative_import" {
                    return Some(format!(
                        "relative import '{}' cannot be verified",
                        text(module, source)
                    ));
                }
                if let Some(reason) = self.check_module(text(module, source)) {
                    return Some(reason);
                }
                let mut cursor = node.walk();
                let wildcard = node
                    .children(&mut cursor)
                    .any(|child| child.kind() == "wildcard_import");
                wildcard.then(|| {
                    format!(
                        "wildcard import from '{}' cannot be verified",
                        text(module, source)
                    )
                })
            }
            "future_import_statement" => Some("__future__ imports are not allowed".to_string()),
            "exec_statement" => Some("use of denied name 'exec'".to_string()),
            "identifier" => self.check_name(text(node, source)),
            "string" => check_string_literal(node, source),
            "binary_operator" | "concatenated_string" => {
                check_assembled_string(&string_pieces(node, source))
            }
            "call" => {
                let function = node.child_by_field_name("function")?;
                if function.kind() != "attribute" {
                    return None;
                }
                let method = function.child_by_field_name("attribute")?;
                if !STRING_BUILDERS.contains(&text(method, source)) {
                    return None;
                }
                check_assembled_string(&string_pieces(node, source))
            }
            _ => None,
        }
    }

    fn check_module(&self, dotted: &str) -> Option<String> {
        let root = dotted.split('.').next().unwrap_or(dotted).trim();
        if self.denied_modules.contains(root) {
            return Some(format!("import of denied module '{root}'"));
        }
        if self.mode == ValidatorMode::Allowlist && !self.allowed_modules.contains(root) {
            return Some(format!("module '{root}' is not on the allowlist"));
        }
        None
    }

    fn check_name(&self, name: &str) -> Option<String> {
        if name.contains("__") {
            return Some(format!("dunder reference '{name}'"));
        }
        if self.denied_names.contains(name) {
            return Some(format!("use of denied name '{name}'"));
        }
        if self.denied_modules.contains(name) {
            return Some(format!("reference to denied module '{name}'"));
        }
        None
    }
}

fn check_string_literal(node: Node<'_>, source: &[u8]) -> Option<String> {
    let pieces = string_pieces(node, source);
    let content = pieces.concat();
    if text(node, source).contains("__") || content.contains("__") {
        return Some("dunder reference in string literal".to_string());
    }
    (!content.is_empty() && content.chars().all(|c| c == '_'))
        .then(|| "underscore-only string literal cannot be verified".to_string())
}

/// A string assembled at runtime is denied when its literal pieces could
/// join into a dunder name.
fn check_assembled_string(pieces: &[String]) -> Option<String> {
    if pieces.is_empty() {
        return None;
    }
    if pieces.concat().contains("__") {
        return Some("dunder reference assembled from string pieces".to_string());
    }
    pieces
        .iter()
        .any(|piece| piece.starts_with('_') || piece.ends_with('_'))
        .then(|| "string assembled from underscore pieces cannot be verified".to_string())
}

/// Content of every string literal under `node` in source order, with
/// underscore escapes decoded.
fn string_pieces(node: Node<'_>, source: &[u8]) -> Vec<String> {
    let mut pieces = Vec::new();
    let mut cursor = node.walk();
    loop {
        let current = cursor.node();
        if current.kind() == "string_content" {
            pieces.push(
                UNDERSCORE_ESCAPE
                    .replace_all(text(current, source), "_")
                    .into_owned(),
            );
        }
        if current.kind() != "string_content" && cursor.goto_first_child() {
            continue;
        }
        loop {
            if cursor.goto_next_sibling() {
                break;
            }
            if !cursor.goto_parent() {
                return pieces;
            }
        }
    }
}

/// Module path of one `import` target (`a.b` or `a.b as c`).
fn import_target<'a>(node: Node<'_>, source: &'a [u8]) -> &'a str {
    if node.kind() == "aliased_import"
        && let Some(name) = node.child_by_field_name("name")
    {
        return text(name, source);
    }
    text(node, source)
}

fn text<'a>(node: Node<'_>, source: &'a [u8]) -> &'a str {
    node.utf8_text(source).unwrap_or_default()
}

/// 1-based line of the first error or missing node, if any.
fn first_error_line(root: Node<'_>) -> Option<usize> {
    let mut cursor = root.walk();
    loop {
        let node = cursor.node();
        if node.is_error() || node.is_missing() {
            return Some(node.start_position().row + 1);
        }
        if node.has_error() && cursor.goto_first_child() {
            continue;
        }
        loop {
            if cursor.goto_next_sibling() {
                break;
            }
            if !cursor.goto_parent() {
                return None;
            }
        }
    }
}
