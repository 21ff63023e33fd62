//! Check keymap DSL files: syntax, semantic validation and (optionally) style.
//!
//! Usage:
//!   keymap_check [OPTIONS] [FILE ...]
//!   keymap_check < profile.rhai
//!
//! Prints one line per diagnostic (`path:line:col: severity: message [source]`)
//! and exits with status 1 when any file has a blocking error.
//!
//! `--fix` rewrites files in canonical layout. Files that do not parse only
//! get whitespace fixes. `--json` prints the projected visual model instead of
//! diagnostics, resolving device blocks against `--devices`.
//!
//! With `--profiles DIR` the arguments are profile names resolved through the
//! profile store (extension and template from `--config`), and `--fix` saves
//! through the store's conflict check.

use anyhow::Context;
use clap::Parser;
use keymap_sync::diagnostics::{check, CheckOptions, Diagnostic, DiagnosticSet, DiagnosticSource, Severity};
use keymap_sync::lint::lint_fix;
use keymap_sync::{
    format_source, project, DeviceInfo, DeviceRegistry, EngineConfig, FsProfileStore, JsonDeviceRegistry,
    ProfileStore,
};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

#[derive(Parser, Debug)]
#[command(name = "keymap_check")]
#[command(about = "Check keymap DSL profiles and print diagnostics")]
struct Args {
    /// Files to check; reads stdin when none are given.
    files: Vec<PathBuf>,

    /// Rewrite files in canonical layout (stdin: print the result).
    #[arg(long, short = 'f')]
    fix: bool,

    /// Human-readable output.
    #[arg(long, short = 'H')]
    human: bool,

    /// Also report style warnings.
    #[arg(long, short = 's')]
    style: bool,

    /// Do not warn about unknown key names.
    #[arg(long)]
    no_key_warnings: bool,

    /// Print the projected visual model as JSON.
    #[arg(long)]
    json: bool,

    /// Device registry (JSON array) used to resolve device blocks.
    #[arg(long, value_name = "FILE")]
    devices: Option<PathBuf>,

    /// Engine config (TOML); command-line flags override it.
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Treat arguments as profile names stored under DIR.
    #[arg(long, value_name = "DIR")]
    profiles: Option<PathBuf>,
}

/// Where checked text comes from and where `--fix` writes it back.
enum Input<'a> {
    File(&'a Path),
    Profile { store: &'a FsProfileStore, name: String },
}

impl Input<'_> {
    fn label(&self) -> String {
        match self {
            Input::File(path) => path.display().to_string(),
            Input::Profile { name, .. } => name.clone(),
        }
    }

    /// Text plus the store's hash token (empty for plain files).
    fn read(&self) -> anyhow::Result<(String, String)> {
        match self {
            Input::File(path) => Ok((std::fs::read_to_string(path).with_context(|| "read failed")?, String::new())),
            Input::Profile { store, name } => {
                let loaded = store.load_config(name)?;
                Ok((loaded.source, loaded.hash))
            }
        }
    }

    fn write(&self, text: &str, hash: &str) -> anyhow::Result<()> {
        match self {
            Input::File(path) => std::fs::write(path, text).with_context(|| "write failed"),
            Input::Profile { store, name } => {
                store.save_config(name, text, hash)?;
                Ok(())
            }
        }
    }
}

#[derive(Clone, Copy)]
enum OutputStyle {
    Compact,
    Human,
}

fn severity_str(s: Severity) -> &'static str {
    match s {
        Severity::Error => "error",
        Severity::Warning => "warning",
        Severity::Info => "info",
    }
}

fn source_str(s: DiagnosticSource) -> &'static str {
    match s {
        DiagnosticSource::Syntax => "syntax",
        DiagnosticSource::Validation => "validation",
        DiagnosticSource::Style => "style",
    }
}

fn print_diagnostic(path: &str, d: &Diagnostic, style: OutputStyle) {
    match style {
        OutputStyle::Compact => {
            println!(
                "{}:{}:{}: {}: {} [{}]",
                path,
                d.line,
                d.column,
                severity_str(d.severity),
                d.message,
                source_str(d.source)
            );
        }
        OutputStyle::Human => {
            println!("  {} {}:{}: {}", path, d.line, d.column, d.message);
            println!("    {} ({})", severity_str(d.severity), source_str(d.source));
        }
    }
}

#[derive(Default)]
struct Totals {
    errors: usize,
    warnings: usize,
}

impl Totals {
    fn add(&mut self, set: &DiagnosticSet) {
        for d in set.items() {
            match d.severity {
                Severity::Error => self.errors += 1,
                Severity::Warning => self.warnings += 1,
                Severity::Info => {}
            }
        }
    }
}

/// Canonical text when the source parses, whitespace fixes otherwise.
fn fixed_source(src: &str) -> String {
    format_source(src).unwrap_or_else(|e| {
        tracing::debug!(error = %e, "source does not parse; applying whitespace fixes only");
        lint_fix(src)
    })
}

fn diagnostics_of(src: &str, options: CheckOptions) -> DiagnosticSet {
    match check(src, options) {
        Ok((_, d)) | Err(d) => d,
    }
}

fn print_json(src: &str, devices: &[DeviceInfo], options: CheckOptions) -> anyhow::Result<bool> {
    match check(src, options) {
        Ok((ast, _)) => {
            let model = project(&ast, devices);
            println!("{}", serde_json::to_string_pretty(&model)?);
            Ok(true)
        }
        Err(d) => {
            println!("{}", serde_json::to_string_pretty(&d)?);
            Ok(false)
        }
    }
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(tracing::Level::WARN.into()),
        )
        .with_writer(io::stderr)
        .init();

    let args = Args::parse();
    let style = if args.human {
        OutputStyle::Human
    } else {
        OutputStyle::Compact
    };

    let config = match &args.config {
        Some(path) => EngineConfig::load(path).with_context(|| format!("loading {}", path.display()))?,
        None => EngineConfig::default(),
    };
    let mut options = config.check_options();
    options.style_warnings |= args.style;
    options.key_warnings &= !args.no_key_warnings;

    let devices = match &args.devices {
        Some(path) => JsonDeviceRegistry::new(path).list_devices()?,
        None => Vec::new(),
    };

    let mut has_error = false;
    let mut totals = Totals::default();

    if args.files.is_empty() {
        let mut src = String::new();
        io::stdin().read_to_string(&mut src)?;
        if args.fix {
            io::stdout().write_all(fixed_source(&src).as_bytes())?;
            return Ok(());
        }
        if args.json {
            if !print_json(&src, &devices, options)? {
                std::process::exit(1);
            }
            return Ok(());
        }
        let diagnostics = diagnostics_of(&src, options);
        totals.add(&diagnostics);
        for d in diagnostics.items() {
            print_diagnostic("<stdin>", d, style);
        }
        has_error = diagnostics.has_blocking_errors();
    } else {
        let store = args.profiles.as_ref().map(|dir| FsProfileStore::from_config(dir, &config));
        for path in &args.files {
            let input = match &store {
                Some(store) => Input::Profile {
                    store,
                    name: path.to_string_lossy().into_owned(),
                },
                None => Input::File(path),
            };
            match check_input(&input, &args, &devices, options, style, &mut totals) {
                Ok(ok) => has_error |= !ok,
                Err(e) => {
                    eprintln!("{}: {:#}", input.label(), e);
                    has_error = true;
                }
            }
        }
    }

    if totals.errors > 0 || totals.warnings > 0 {
        eprintln!("check: {} error(s), {} warning(s)", totals.errors, totals.warnings);
    }
    if has_error {
        std::process::exit(1);
    }
    Ok(())
}

/// Returns `Ok(false)` when the input has blocking errors.
fn check_input(
    input: &Input<'_>,
    args: &Args,
    devices: &[DeviceInfo],
    options: CheckOptions,
    style: OutputStyle,
    totals: &mut Totals,
) -> anyhow::Result<bool> {
    let display_path = input.label();
    let (mut src, hash) = input.read()?;
    if args.fix {
        let fixed = fixed_source(&src);
        if fixed != src {
            input.write(&fixed, &hash)?;
            eprintln!("{}: fixed", display_path);
            src = fixed;
        }
    }
    if args.json {
        return print_json(&src, devices, options);
    }
    let diagnostics = diagnostics_of(&src, options);
    totals.add(&diagnostics);
    for d in diagnostics.items() {
        print_diagnostic(&display_path, d, style);
    }
    Ok(!diagnostics.has_blocking_errors())
}
