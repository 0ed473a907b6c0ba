#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

//! CLI driver for `ctcore` (spec §6): discovers a translation unit's
//! `#include` dependency closure and aggregated magic build-flag
//! annotations, either by walking the graph directly or by delegating to
//! the system preprocessor's `-MM` output.

use std::path::{Path, PathBuf};
use std::process::{Command, ExitCode};

use anyhow::{Context, Result, bail};
use clap::{Parser, ValueEnum};
use colored::Colorize;
use ctcore::{Diagnostic, Engine, EngineConfig, HeaderDepsMode, MagicKey};

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum HeaderDepsArg {
    Direct,
    Cpp,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Text,
    #[cfg(feature = "json")]
    Json,
}

/// Header-dependency discovery and magic build-flag extraction for C/C++ sources.
#[derive(Parser, Debug)]
#[command(name = "ct-cppdeps", version, about)]
struct Cli {
    /// Source file paths to walk.
    #[arg(required = true)]
    sources: Vec<PathBuf>,

    /// Dependency-discovery strategy.
    #[arg(long, value_enum, default_value_t = HeaderDepsArg::Direct)]
    headerdeps: HeaderDepsArg,

    /// Named compiler/flag profile, e.g. `gcc.debug`.
    #[arg(long)]
    variant: Option<String>,

    /// Additional include search directory (repeatable).
    #[arg(long = "include", value_name = "DIR")]
    include: Vec<PathBuf>,

    /// Override the preprocessor command used for `--headerdeps=cpp`.
    #[arg(long = "CPP", env = "CPP")]
    cpp: Option<String>,

    /// Override the C compiler command (recorded, not otherwise used by this tool).
    #[arg(long = "CC", env = "CC")]
    cc: Option<String>,

    /// Override the C++ compiler command (recorded, not otherwise used by this tool).
    #[arg(long = "CXX", env = "CXX")]
    cxx: Option<String>,

    /// Extra flags passed to `$CPP -MM` in `--headerdeps=cpp` mode.
    #[arg(long = "CPPFLAGS")]
    cppflags: Option<String>,

    /// Recorded for parity with the source annotations; not consumed by dependency discovery.
    #[arg(long = "CXXFLAGS")]
    cxxflags: Option<String>,

    /// Recorded for parity with the source annotations; not consumed by dependency discovery.
    #[arg(long = "CFLAGS")]
    cflags: Option<String>,

    /// Additional `pkg-config` package to resolve (repeatable).
    #[arg(long = "pkg-config", value_name = "PKG")]
    pkg_config: Vec<String>,

    /// Increase log verbosity (debug-level tracing).
    #[arg(short, long)]
    verbose: bool,

    /// Decrease log verbosity (warnings and errors only).
    #[arg(short, long)]
    quiet: bool,

    /// Output format for the resolved dependency closure.
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    format: OutputFormat,
}

fn install_tracing(verbose: bool, quiet: bool) {
    let level = if verbose {
        tracing::Level::DEBUG
    } else if quiet {
        tracing::Level::WARN
    } else {
        tracing::Level::INFO
    };
    let filter = tracing_subscriber::EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env_lossy();
    tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();
}

fn print_diagnostic(diag: &Diagnostic, use_color: bool) {
    let line = format!("{}:{}: warning: {} [{}]", diag.file, diag.line, diag.message, diag.tag);
    if use_color {
        eprintln!("{}", line.yellow());
    } else {
        eprintln!("{line}");
    }
}

/// Resolve every `//#PKG-CONFIG=` annotation (plus `--pkg-config` overrides)
/// by shelling out to the system `pkg-config`, matching the teacher's
/// pattern of treating package-manager lookups as an external collaborator
/// rather than something this crate reimplements.
fn resolve_pkg_config(packages: &[String], use_color: bool) {
    for pkg in packages {
        let output = Command::new("pkg-config").arg("--cflags").arg("--libs").arg(pkg).output();
        match output {
            Ok(result) if result.status.success() => {
                let flags = String::from_utf8_lossy(&result.stdout);
                println!("pkg-config:{pkg}: {}", flags.trim());
            }
            Ok(result) => {
                let msg = format!("pkg-config failed for '{pkg}': {}", String::from_utf8_lossy(&result.stderr).trim());
                if use_color {
                    eprintln!("{}", msg.red());
                } else {
                    eprintln!("{msg}");
                }
            }
            Err(err) => {
                let msg = format!("could not run pkg-config for '{pkg}': {err}");
                if use_color {
                    eprintln!("{}", msg.red());
                } else {
                    eprintln!("{msg}");
                }
            }
        }
    }
}

/// `--headerdeps=cpp`: shell out to the system preprocessor's `-MM -MF`
/// output and parse the Makefile-rule it writes into a flat file list, so
/// both discovery modes are interchangeable from the caller's perspective.
fn headerdeps_via_cpp(source: &Path, cpp: &str, cppflags: Option<&str>, include_dirs: &[PathBuf]) -> Result<Vec<PathBuf>> {
    let depfile = tempfile::NamedTempFile::new().context("creating temp file for -MF output")?;
    let mut cmd = Command::new(cpp);
    cmd.arg("-MM").arg("-MF").arg(depfile.path());
    for dir in include_dirs {
        cmd.arg("-I").arg(dir);
    }
    if let Some(flags) = cppflags {
        for flag in flags.split_whitespace() {
            cmd.arg(flag);
        }
    }
    cmd.arg(source);

    let status = cmd.status().with_context(|| format!("running {cpp} -MM on {}", source.display()))?;
    if !status.success() {
        bail!("{cpp} -MM exited with {status}");
    }

    let contents = std::fs::read_to_string(depfile.path()).context("reading -MF dependency output")?;
    Ok(parse_make_rule(&contents))
}

fn parse_make_rule(contents: &str) -> Vec<PathBuf> {
    contents
        .replace('\\', " ")
        .split_whitespace()
        .skip(1) // the rule's target, e.g. "main.o:"
        .map(PathBuf::from)
        .collect()
}

fn run() -> Result<ExitCode> {
    let cli = Cli::parse();
    install_tracing(cli.verbose, cli.quiet);

    let use_color = atty::is(atty::Stream::Stderr);

    let mut config = EngineConfig::from_variant_name(cli.variant.as_deref())?;
    config = config.with_include_dirs(cli.include.clone());
    if let HeaderDepsArg::Cpp = cli.headerdeps {
        config = config.with_headerdeps(HeaderDepsMode::Cpp);
    }

    resolve_pkg_config(&cli.pkg_config, use_color);

    let mut had_fatal_error = false;
    let mut all_files: Vec<PathBuf> = Vec::new();
    let mut all_magic = Vec::new();

    // One engine for the whole invocation: the registry and cache it owns
    // are meant to be reused across every source file in a build session
    // (spec §5), not rebuilt per file.
    let mut engine = Engine::new(config);

    for source in &cli.sources {
        match cli.headerdeps {
            HeaderDepsArg::Direct => match engine.closure(source) {
                Ok(closure) => {
                    for diag in &closure.diagnostics {
                        print_diagnostic(diag, use_color);
                    }
                    all_files.extend(closure.files);
                    all_magic.extend(closure.magic_flags);
                }
                Err(err) => {
                    eprintln!("{}: {err}", source.display());
                    had_fatal_error = true;
                }
            },
            HeaderDepsArg::Cpp => {
                let cpp = cli.cpp.clone().unwrap_or_else(|| "cpp".to_string());
                match headerdeps_via_cpp(source, &cpp, cli.cppflags.as_deref(), &cli.include) {
                    Ok(files) => all_files.extend(files),
                    Err(err) => {
                        eprintln!("{}: {err}", source.display());
                        had_fatal_error = true;
                    }
                }
            }
        }
    }

    match cli.format {
        #[cfg(feature = "json")]
        OutputFormat::Json => {
            let payload = serde_json::json!({
                "files": all_files,
                "magic": all_magic.iter().map(|m| serde_json::json!({
                    "key": format!("{:?}", m.key),
                    "value": m.value,
                    "line": m.line,
                })).collect::<Vec<_>>(),
            });
            println!("{}", serde_json::to_string_pretty(&payload)?);
        }
        OutputFormat::Text => {
            for file in &all_files {
                println!("{}", file.display());
            }
            for annotation in &all_magic {
                if matches!(annotation.key, MagicKey::Source) {
                    println!("{}", annotation.value);
                }
            }
        }
    }

    Ok(if had_fatal_error { ExitCode::FAILURE } else { ExitCode::SUCCESS })
}

fn main() -> ExitCode {
    match run() {
        Ok(code) => code,
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::FAILURE
        }
    }
}
