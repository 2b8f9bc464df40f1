//! Resolution of raw import strings to dotted module names.
//!
//! Pure functions over import syntax; the index is only consulted afterwards
//! to turn a module name into files.

/// A parsed raw import: how many parent levels it climbs and what it names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportSpec {
    /// Number of leading dots, 0 for an absolute import
    pub level: usize,
    /// Dotted name after the dots, possibly empty (`from .. import x`)
    pub module: String,
}

impl ImportSpec {
    pub fn parse(raw: &str) -> Self {
        let raw = raw.trim();
        let module = raw.trim_start_matches('.');
        Self {
            level: raw.len() - module.len(),
            module: module.to_string(),
        }
    }

    pub fn is_relative(&self) -> bool {
        self.level > 0
    }
}

/// Target module name of an import made from `importer_module`.
///
/// `importer_is_package` marks a package initializer, which is its own
/// package for relative imports. Relative imports that climb past the top of
/// the repository stop at the top. Returns `None` when nothing is named.
pub fn resolve_module_name(importer_module: &str, importer_is_package: bool, spec: &ImportSpec) -> Option<String> {
    if !spec.is_relative() {
        return if spec.module.is_empty() {
            None
        } else {
            Some(spec.module.clone())
        };
    }

    let mut package: Vec<&str> = importer_module.split('.').filter(|s| !s.is_empty()).collect();
    if !importer_is_package {
        package.pop();
    }

    let climb = (spec.level - 1).min(package.len());
    package.truncate(package.len() - climb);

    if !spec.module.is_empty() {
        package.push(&spec.module);
    }

    if package.is_empty() {
        None
    } else {
        Some(package.join("."))
    }
}
