//! Module loader.
//!
//! Resolves import paths to files, loads the transitive closure of imports,
//! detects dependency cycles, and assembles the [`Program`]. Dependencies of
//! a module always finish loading before the module itself, and the loaded
//! map keeps insertion order so runs are reproducible.

use crate::ast::{ImportDecl, ImportItems, Module, Program};
use crate::error::{DiagnosticEmitter, PangError, Result};
use crate::lexer::Lexer;
use crate::parser::Parser;
use crate::source::{SourceFile, SourceMap};
use colored::Colorize;
use indexmap::IndexMap;
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// Standard-library modules injected into the main module unless disabled.
const AUTO_IMPORTS: &[&str] = &["io"];

pub struct LoaderOptions {
    /// Directory import paths resolve against; defaults to the entry file's
    /// parent directory.
    pub base_dir: Option<PathBuf>,
    /// Root of the standard library; defaults to `<base_dir>/stdlib`.
    pub stdlib_root: Option<PathBuf>,
    pub auto_import_stdlib: bool,
    pub verbose: bool,
}

impl Default for LoaderOptions {
    fn default() -> Self {
        Self {
            base_dir: None,
            stdlib_root: None,
            auto_import_stdlib: true,
            verbose: false,
        }
    }
}

pub struct ModuleLoader<'a> {
    diagnostics: &'a mut DiagnosticEmitter,
    sources: &'a mut SourceMap,
    loaded: IndexMap<String, Module>,
    loading: HashSet<String>,
    base_dir: PathBuf,
    stdlib_root: PathBuf,
    options: LoaderOptions,
}

impl<'a> ModuleLoader<'a> {
    pub fn new(
        diagnostics: &'a mut DiagnosticEmitter,
        sources: &'a mut SourceMap,
        options: LoaderOptions,
    ) -> Self {
        Self {
            diagnostics,
            sources,
            loaded: IndexMap::new(),
            loading: HashSet::new(),
            base_dir: PathBuf::new(),
            stdlib_root: PathBuf::new(),
            options,
        }
    }

    /// Load the entry file and the transitive closure of its imports.
    pub fn create_program(mut self, entry: &Path) -> Result<Program> {
        self.base_dir = match &self.options.base_dir {
            Some(dir) => dir.clone(),
            None => entry.parent().unwrap_or_else(|| Path::new(".")).to_path_buf(),
        };
        self.stdlib_root = match &self.options.stdlib_root {
            Some(dir) => dir.clone(),
            None => self.base_dir.join("stdlib"),
        };

        let module_name = entry
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("main")
            .to_string();

        let content = std::fs::read_to_string(entry).map_err(|e| {
            PangError::Module(format!("Could not open file '{}': {}", entry.display(), e))
        })?;

        let mut main = self.parse_source(&module_name, &entry.display().to_string(), content);

        // The entry module itself counts as loading while its imports
        // resolve, so an import chain that circles back is caught.
        self.loading.insert(module_name.clone());

        if self.options.auto_import_stdlib {
            for stdlib_module in AUTO_IMPORTS {
                if self.options.verbose {
                    println!(
                        "{} auto-importing standard library module: {}",
                        "Loading".green().bold(),
                        stdlib_module
                    );
                }
                if self.load_module(stdlib_module) {
                    main.imports.push(ImportDecl {
                        module_path: stdlib_module.to_string(),
                        items: ImportItems::Wildcard,
                        location: Default::default(),
                    });
                }
            }
        }

        for import in &main.imports {
            self.load_module(&import.module_path);
        }

        self.loading.remove(&module_name);

        Ok(Program {
            modules: self.loaded.into_values().collect(),
            main,
        })
    }

    /// Load one module and its dependencies. Returns true when the module is
    /// available in the loaded map (either now or from an earlier load).
    fn load_module(&mut self, module_path: &str) -> bool {
        if self.loaded.contains_key(module_path) {
            return true;
        }
        if self.loading.contains(module_path) {
            self.diagnostics.fatal(format!(
                "Circular dependency detected for module: {}",
                module_path
            ));
            return false;
        }

        let Some(file_path) = self.resolve_module_path(module_path) else {
            self.diagnostics
                .fatal(format!("Could not find module: {}", module_path));
            return false;
        };

        if self.options.verbose {
            println!(
                "{} module {} from {}",
                "Loading".green().bold(),
                module_path,
                file_path.display()
            );
        }

        self.loading.insert(module_path.to_string());

        let content = match std::fs::read_to_string(&file_path) {
            Ok(content) => content,
            Err(e) => {
                self.diagnostics.fatal(format!(
                    "Could not read module '{}' from {}: {}",
                    module_path,
                    file_path.display(),
                    e
                ));
                self.loading.remove(module_path);
                return false;
            }
        };

        let module = self.parse_source(module_path, &file_path.display().to_string(), content);

        // Dependencies first, so they precede this module in the loaded map.
        for import in &module.imports {
            self.load_module(&import.module_path);
        }

        self.loading.remove(module_path);
        self.loaded.insert(module_path.to_string(), module);
        true
    }

    /// Probe order: `path.pang`, `path`, `stdlib/path.pang`, `stdlib/path`.
    fn resolve_module_path(&self, module_path: &str) -> Option<PathBuf> {
        let candidates = [
            self.base_dir.join(format!("{}.pang", module_path)),
            self.base_dir.join(module_path),
            self.stdlib_root.join(format!("{}.pang", module_path)),
            self.stdlib_root.join(module_path),
        ];
        candidates.into_iter().find(|c| c.is_file())
    }

    fn parse_source(&mut self, module_name: &str, file_name: &str, content: String) -> Module {
        let source_file = SourceFile::new(file_name, content);
        let tokens = Lexer::new(&source_file, self.diagnostics).tokenize();
        let module = Parser::new(tokens, self.diagnostics).parse_module(module_name, file_name);
        self.sources.insert(source_file);
        module
    }
}
