//! Command-line interface for `pangc`.

use clap::{error::ErrorKind, Parser as ClapParser, ValueEnum};
use colored::Colorize;
use std::io::IsTerminal;
use std::path::PathBuf;

use crate::backend::Backend;
use crate::builtins::BuiltinRegistry;
use crate::error::{DiagnosticEmitter, DiagnosticLevel, PangError, Result};
use crate::lexer::Lexer;
use crate::modules::{LoaderOptions, ModuleLoader};
use crate::sema::Analyzer;
use crate::source::{SourceFile, SourceMap};

#[derive(ClapParser)]
#[command(name = "pangc")]
#[command(about = "Ahead-of-time compiler for the Pang language")]
#[command(version)]
pub struct Cli {
    /// Input source file
    pub input: PathBuf,

    /// Output path
    #[arg(short = 'o', value_name = "FILE", default_value = "a.exe")]
    pub output: PathBuf,

    /// Trace pipeline progress on standard output
    #[arg(short = 'v', long)]
    pub verbose: bool,

    /// Diagnostic color policy
    #[arg(long, value_enum, default_value_t = ColorMode::Auto)]
    pub color: ColorMode,

    /// Emit intermediate representation instead of linking
    #[arg(long)]
    pub llvm: bool,

    /// Print tokens from the main file and exit
    #[arg(long)]
    pub tokens: bool,

    /// Print an AST summary and exit
    #[arg(long)]
    pub ast: bool,

    /// Suppress the standard-library auto-import
    #[arg(long)]
    pub no_stdlib: bool,

    /// Suppress built-in function registration
    #[arg(long)]
    pub no_builtins: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ColorMode {
    Always,
    Auto,
    Never,
}

/// Parse arguments and run. Returns the process exit code: 0 on success,
/// 1 on any compilation error or unrecognized option.
pub fn run() -> i32 {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) if matches!(e.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) => {
            print!("{}", e);
            return 0;
        }
        Err(e) => {
            eprint!("{}", e);
            return 1;
        }
    };
    run_with(cli, None, BuiltinRegistry::new())
}

/// Run the pipeline and map the outcome to an exit code. A backend, when
/// attached, consumes the typed AST; without one the invocation is a
/// front-end check.
pub fn run_with(cli: Cli, backend: Option<&mut dyn Backend>, builtins: BuiltinRegistry) -> i32 {
    match cli.color {
        ColorMode::Always => colored::control::set_override(true),
        ColorMode::Never => colored::control::set_override(false),
        ColorMode::Auto => colored::control::set_override(std::io::stderr().is_terminal()),
    }

    let mut diagnostics = DiagnosticEmitter::new();
    let mut sources = SourceMap::new();

    match compile(&cli, backend, builtins, &mut diagnostics, &mut sources) {
        Ok(()) => 0,
        Err(e) => {
            eprintln!("{}: {}", "error".red().bold(), e);
            1
        }
    }
}

/// The pipeline proper. Accumulated diagnostics are rendered exactly once
/// on every path; an error-level diagnostic turns into a hard error at the
/// stage that observed it ([`PangError::Parse`] when only the front half
/// ran, [`PangError::Failed`] with the error count otherwise).
fn compile(
    cli: &Cli,
    backend: Option<&mut dyn Backend>,
    builtins: BuiltinRegistry,
    diagnostics: &mut DiagnosticEmitter,
    sources: &mut SourceMap,
) -> Result<()> {
    if cli.tokens {
        return print_tokens(cli, diagnostics, sources);
    }

    if cli.verbose {
        println!("{} {}", "Compiling".green().bold(), cli.input.display());
    }

    let options = LoaderOptions {
        auto_import_stdlib: !cli.no_stdlib,
        verbose: cli.verbose,
        ..Default::default()
    };
    let loader = ModuleLoader::new(diagnostics, sources, options);
    let program = match loader.create_program(&cli.input) {
        Ok(program) => program,
        Err(e) => {
            diagnostics.print_all(sources);
            return Err(e);
        }
    };

    if cli.ast {
        if diagnostics.has_errors() {
            diagnostics.print_all(sources);
            // Only lexing, parsing, and loading have run at this point.
            return Err(parse_failure(diagnostics));
        }
        println!("Abstract Syntax Tree:");
        println!("Main module: {}", program.main.name);
        println!("Imported modules: {}", program.modules.len());
        for module in &program.modules {
            println!("  - {} ({})", module.name, module.file);
        }
        return Ok(());
    }

    if cli.verbose {
        println!("{} semantic analysis", "Running".green().bold());
    }

    let registry = if cli.no_builtins {
        BuiltinRegistry::new()
    } else {
        builtins
    };
    let analysis = Analyzer::new(diagnostics, &registry).analyze(&program);

    if diagnostics.has_errors() {
        diagnostics.print_all(sources);
        return Err(PangError::Failed(diagnostics.error_count()));
    }

    let Some(backend) = backend else {
        diagnostics.print_all(sources);
        if cli.llvm {
            return Err(PangError::Codegen(
                "no code generator is linked into this build".to_string(),
            ));
        }
        println!(
            "{} {} module(s) analyzed",
            "Finished".green().bold(),
            program.modules.len() + 1
        );
        return Ok(());
    };

    if cli.verbose {
        println!("{} code generation", "Running".green().bold());
    }
    backend.emit_program(&program, &analysis.expr_types, diagnostics)?;
    diagnostics.print_all(sources);
    if diagnostics.has_errors() {
        return Err(PangError::Failed(diagnostics.error_count()));
    }

    if cli.llvm {
        backend.write_ir(&cli.output)?;
    } else {
        backend.link_executable(&cli.output)?;
    }
    println!(
        "{} successfully: {}",
        "Compiled".green().bold(),
        cli.output.display()
    );
    Ok(())
}

/// The first located error as a hard parse failure; falls back to the
/// counted verdict when every error is position-free.
fn parse_failure(diagnostics: &DiagnosticEmitter) -> PangError {
    let located = diagnostics
        .diagnostics()
        .iter()
        .filter(|d| matches!(d.level, DiagnosticLevel::Error | DiagnosticLevel::Fatal))
        .find_map(|d| d.location.as_ref().map(|loc| (loc, &d.message)));
    match located {
        Some((loc, message)) => PangError::Parse {
            file: loc.file.clone(),
            line: loc.line,
            col: loc.column,
            message: message.clone(),
        },
        None => PangError::Failed(diagnostics.error_count()),
    }
}

fn print_tokens(cli: &Cli, diagnostics: &mut DiagnosticEmitter, sources: &mut SourceMap) -> Result<()> {
    let content = std::fs::read_to_string(&cli.input).map_err(|e| {
        PangError::Module(format!(
            "Could not open file '{}': {}",
            cli.input.display(),
            e
        ))
    })?;

    let file = SourceFile::new(cli.input.display().to_string(), content);
    let tokens = Lexer::new(&file, diagnostics).tokenize();
    sources.insert(file);

    if diagnostics.has_errors() {
        diagnostics.print_all(sources);
        return Err(PangError::Failed(diagnostics.error_count()));
    }

    println!("Tokens:");
    for token in &tokens {
        println!(
            "{} '{}' at {}",
            token.kind.tag(),
            token.lexeme.escape_default(),
            token.location
        );
    }
    Ok(())
}
