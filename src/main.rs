//! # inclean
//!
//! A CLI tool that comments out `#include` directives a source file does not
//! need. Each directive is disabled on disk, an external build check is run
//! against the file, and the change is kept only if the check still passes.
//!
//! ## Overview
//!
//! `inclean` never deletes a line: an unneeded directive is rewritten as
//! `// #include ...`. Every other line is left byte-for-byte as it was, and a
//! directive whose removal breaks the build is restored before the next one is
//! tried.
//!
//! ## Key Components
//!
//! - **LineBuffer**: the lines of one target file plus persistence back to
//!   its path.
//! - **VerificationRunner**: runs the build check as a child process with a
//!   fixed redirection policy and reports its status.
//! - **ToggleSession**: disables the line under its cursor, then commits or
//!   rolls back. Whatever ends the session, the file on disk is left committed.
//! - **SessionSlot**: the one process-wide place the open session lives, so
//!   the termination handler can finalize it.
//! - **Driver**: walks each file, classifies lines, and runs the
//!   toggle → verify → commit/rollback protocol.
//!
//! ## Protocol
//!
//! ```text
//! for each line:
//!   not a directive ─────────────────────────────→ advance
//!   directive → disable + persist → verify ─ ok ──→ commit   → advance
//!                                          └ fail → rollback → advance
//! ```
//!
//! ## Exit Codes
//!
//! | Code | Meaning |
//! |------|---------|
//! | 0 | Success (including help and the usage banner) |
//! | 1 | General error, or the discard sink could not be opened |
//! | 2 | Invalid `--glob` pattern set |
//! | 130 | Interrupted (SIGINT, SIGTERM, SIGHUP, SIGQUIT); the file under test was restored first |

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use anyhow::{Context, Result};
use clap::ValueEnum;
use clap::error::ErrorKind;
use clap::{CommandFactory, Parser, Subcommand};
use globset::{Glob, GlobSet, GlobSetBuilder};
use ignore::WalkBuilder;
use rich_rust::terminal;
use rich_rust::{ColorSystem, Console};
use serde::{Deserialize, Serialize};
use similar::{ChangeTag, TextDiff};
use std::collections::HashMap;
use std::ffi::OsString;
use std::fmt;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

// ─────────────────────────────────────────────────────────────────────────────
// Exit Codes
// ─────────────────────────────────────────────────────────────────────────────

/// Semantic exit codes for scripting and CI integration
mod exit_codes {
    /// Success - completed without errors
    pub const SUCCESS: i32 = 0;
    /// General error (I/O error, bad config, discard sink unavailable)
    pub const ERROR: i32 = 1;
    /// Invalid argument that cannot be dropped and ignored (bad glob set)
    pub const INVALID_ARGS: i32 = 2;
    /// Terminated by SIGINT/SIGTERM/SIGHUP/SIGQUIT after the open session was finalized
    pub const INTERRUPTED: i32 = 130;
}

#[derive(Debug)]
struct ArgError(String);

impl fmt::Display for ArgError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for ArgError {}

#[derive(Debug)]
struct ParseError(String);

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for ParseError {}

/// The null device used to silence verification runs could not be opened.
#[derive(Debug)]
struct SinkError {
    device: &'static str,
    source: io::Error,
}

impl fmt::Display for SinkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "failed to open {}: {}", self.device, self.source)
    }
}

impl std::error::Error for SinkError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.source)
    }
}

/// A buffer could not be written back in full.
///
/// `written` is the byte offset reached before the failure; `expected` is the
/// length of the full serialization.
#[derive(Debug)]
struct PersistError {
    path: PathBuf,
    written: usize,
    expected: usize,
    source: io::Error,
}

impl fmt::Display for PersistError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "short write to {}: {} of {} bytes ({})",
            self.path.display(),
            self.written,
            self.expected,
            self.source
        )
    }
}

impl std::error::Error for PersistError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.source)
    }
}

#[derive(Debug)]
struct RunOutcome {
    interrupted: bool,
}

fn error_chain_has<T: std::error::Error + 'static>(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| cause.is::<T>())
}

fn exit_code_for_error(err: &anyhow::Error) -> i32 {
    if error_chain_has::<ArgError>(err) {
        exit_codes::INVALID_ARGS
    } else {
        exit_codes::ERROR
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// CLI Arguments
// ─────────────────────────────────────────────────────────────────────────────

/// Default glob set for --recursive: C and C++ sources and headers
const DEFAULT_GLOB: &str = "*.c,*.cc,*.cpp,*.cxx,*.h,*.hh,*.hpp,*.hxx";

/// Compiler used when neither --compiler, the config file, nor $CXX name one
const FALLBACK_COMPILER: &str = "c++";

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Deserialize)]
#[serde(rename_all = "lowercase")]
enum ColorMode {
    /// Auto-detect color support
    Auto,
    /// Always emit colors (even when not a TTY)
    Always,
    /// Never emit colors
    Never,
}

/// Comment out #include directives a source file compiles without
#[derive(Parser, Debug)]
#[command(
    name = "inclean",
    version,
    about,
    long_about = None,
    after_help = "EXIT CODES:\n  0    Success\n  1    General error, or /dev/null could not be opened\n  2    Invalid --glob pattern\n  130  Interrupted (the line under test is restored first)\n"
)]
struct Args {
    /// Source file(s) to clean in place
    #[arg(value_name = "FILE")]
    inputs: Vec<PathBuf>,

    /// Use COMPILER instead of $CXX for the `COMPILER -c FILE` check
    #[arg(long, value_name = "COMPILER", allow_hyphen_values = true)]
    compiler: Option<String>,

    /// Use shell COMMAND instead of `COMPILER -c FILE`.
    /// `{file}` is replaced by the target path, which is also passed as $1.
    #[arg(
        short = 'c',
        long = "command",
        value_name = "COMMAND",
        allow_hyphen_values = true
    )]
    shell: Option<String>,

    /// Extra compiler flag placed before `-c FILE` (repeatable)
    #[arg(long = "cflag", value_name = "FLAG", allow_hyphen_values = true)]
    cflags: Vec<String>,

    /// Path to config file (default: search for .incleanrc)
    #[arg(long = "config", value_name = "FILE")]
    config_file: Option<PathBuf>,

    /// Ignore config files
    #[arg(long = "no-config")]
    no_config: bool,

    /// Process files recursively in directories
    #[arg(short = 'r', long)]
    recursive: bool,

    /// Glob pattern to match files when recursing (comma-separated)
    #[arg(long, default_value = DEFAULT_GLOB)]
    glob: String,

    /// Do not respect .gitignore when recursing
    #[arg(long = "no-gitignore")]
    no_gitignore: bool,

    /// Maximum directory depth (0 = unlimited)
    #[arg(long, default_value = "0")]
    max_depth: usize,

    /// Copy each file to FILE<ext> before touching it
    #[arg(long)]
    backup: bool,

    /// Extension for backup files (default: .bak)
    #[arg(long, default_value = ".bak")]
    backup_ext: String,

    /// Print each directive before testing it, and the verdict after
    #[arg(short = 'v', long)]
    verbose: bool,

    /// Color output: auto, always, or never
    #[arg(long, value_enum, default_value = "auto")]
    color: ColorMode,

    /// Print a unified diff of each changed file
    #[arg(short = 'd', long)]
    diff: bool,

    /// Let the verification command write to the terminal instead of /dev/null
    #[arg(long = "show-output")]
    show_output: bool,

    /// Print a JSON report per file (suppresses --verbose, --diff and --show-output)
    #[arg(long)]
    json: bool,

    /// Subcommand (configuration management)
    #[command(subcommand)]
    subcommand: Option<Commands>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Subcommands
// ─────────────────────────────────────────────────────────────────────────────

/// Available subcommands
#[derive(Subcommand, Debug)]
enum Commands {
    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Config management actions
#[derive(Subcommand, Debug)]
enum ConfigAction {
    /// Initialize a new .incleanrc config file
    Init {
        /// Create in home directory instead of current
        #[arg(long)]
        global: bool,
    },
    /// Show effective configuration (merged file + CLI)
    Show,
    /// Show path to active config file
    Path,
}

// ─────────────────────────────────────────────────────────────────────────────
// Unknown Option Filtering
// ─────────────────────────────────────────────────────────────────────────────

/// Long and short option names of the whole command tree.
/// The value records whether the option takes an argument.
#[derive(Debug, Default)]
struct KnownFlags {
    long: HashMap<String, bool>,
    short: HashMap<char, bool>,
}

impl KnownFlags {
    fn from_command() -> Self {
        let mut command = Args::command();
        command.build();
        let mut known = Self::default();
        known.collect(&command);
        known
    }

    fn collect(&mut self, command: &clap::Command) {
        for arg in command.get_arguments() {
            if arg.is_positional() {
                continue;
            }
            let takes_value = arg.get_action().takes_values();
            if let Some(long) = arg.get_long() {
                self.long.insert(long.to_string(), takes_value);
            }
            if let Some(short) = arg.get_short() {
                self.short.insert(short, takes_value);
            }
        }
        for sub in command.get_subcommands() {
            self.collect(sub);
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FlagKind {
    /// Not an option at all
    Positional,
    /// A known option that is complete on its own
    Complete,
    /// A known option whose value is the next argument
    NeedsValue,
    /// Anything clap would reject
    Unknown,
}

fn classify_flag(arg: &str, known: &KnownFlags) -> FlagKind {
    if let Some(long) = arg.strip_prefix("--") {
        let (name, inline_value) = match long.split_once('=') {
            Some((name, _)) => (name, true),
            None => (long, false),
        };
        return match (known.long.get(name), inline_value) {
            (Some(true), false) => FlagKind::NeedsValue,
            (Some(true), true) | (Some(false), false) => FlagKind::Complete,
            _ => FlagKind::Unknown,
        };
    }

    let shorts = match arg.strip_prefix('-') {
        Some(shorts) if !shorts.is_empty() => shorts,
        _ => return FlagKind::Positional,
    };

    // A cluster like `-vr` or `-cCMD`: flags until the first value-taking one.
    for (offset, c) in shorts.char_indices() {
        match known.short.get(&c) {
            Some(true) if offset + c.len_utf8() == shorts.len() => return FlagKind::NeedsValue,
            Some(true) => return FlagKind::Complete,
            Some(false) => {}
            None => return FlagKind::Unknown,
        }
    }
    FlagKind::Complete
}

/// Whether clap accepts the value carried by one option group, parsed alone.
/// Only value errors count; anything else is left for the real parse.
fn accepts_value(group: &[&OsString]) -> bool {
    let argv = std::iter::once(OsString::from("inclean")).chain(group.iter().map(|a| (*a).clone()));
    match Args::try_parse_from(argv) {
        Ok(_) => true,
        Err(err) => !matches!(
            err.kind(),
            ErrorKind::InvalidValue | ErrorKind::ValueValidation
        ),
    }
}

/// Split `raw` into the arguments clap should see and the options it would
/// reject. Unknown options, known ones missing their value, and known ones
/// with a value clap refuses are dropped, so a stray flag never aborts a run.
fn strip_unknown_flags(raw: Vec<OsString>, known: &KnownFlags) -> (Vec<OsString>, Vec<String>) {
    let mut kept = Vec::with_capacity(raw.len());
    let mut unknown = Vec::new();
    let mut iter = raw.into_iter();

    if let Some(program) = iter.next() {
        kept.push(program);
    }

    while let Some(arg) = iter.next() {
        let Some(text) = arg.to_str().map(str::to_owned) else {
            kept.push(arg);
            continue;
        };

        if text == "--" {
            kept.push(arg);
            kept.extend(iter);
            break;
        }

        match classify_flag(&text, known) {
            FlagKind::Positional => kept.push(arg),
            FlagKind::Complete if accepts_value(&[&arg]) => kept.push(arg),
            FlagKind::NeedsValue => match iter.next() {
                Some(value) if accepts_value(&[&arg, &value]) => {
                    kept.push(arg);
                    kept.push(value);
                }
                Some(value) => unknown.push(format!("{} {}", text, value.to_string_lossy())),
                None => unknown.push(text),
            },
            FlagKind::Complete | FlagKind::Unknown => unknown.push(text),
        }
    }

    (kept, unknown)
}

// ─────────────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Runtime configuration derived from CLI args and the config file
#[derive(Debug)]
struct Config {
    compiler: Option<String>,
    shell: Option<String>,
    cflags: Vec<String>,
    recursive: bool,
    glob: String,
    gitignore: bool,
    max_depth: usize,
    backup: bool,
    backup_ext: String,
    color: ColorMode,
    verbose: bool,
    diff: bool,
    show_output: bool,
    json: bool,
}

impl From<&Args> for Config {
    fn from(args: &Args) -> Self {
        Self {
            compiler: args.compiler.clone(),
            shell: args.shell.clone(),
            cflags: args.cflags.clone(),
            recursive: args.recursive,
            glob: args.glob.clone(),
            gitignore: !args.no_gitignore,
            max_depth: args.max_depth,
            backup: args.backup,
            backup_ext: args.backup_ext.clone(),
            color: args.color,
            verbose: args.verbose,
            diff: args.diff,
            show_output: args.show_output,
            json: args.json,
        }
    }
}

impl Config {
    /// --compiler, then the config file, then $CXX, then `c++`
    fn effective_compiler(&self) -> String {
        self.compiler
            .clone()
            .or_else(|| std::env::var("CXX").ok().filter(|cxx| !cxx.is_empty()))
            .unwrap_or_else(|| FALLBACK_COMPILER.to_string())
    }

    fn verify_command(&self) -> VerifyCommand {
        match &self.shell {
            Some(command) => VerifyCommand::Shell(command.clone()),
            None => VerifyCommand::Compile {
                compiler: self.effective_compiler(),
                cflags: self.cflags.clone(),
            },
        }
    }
}

struct VerboseStyle {
    use_color: bool,
}

impl VerboseStyle {
    fn new(use_color: bool) -> Self {
        Self { use_color }
    }

    fn wrap(&self, tag: &str, text: impl fmt::Display) -> String {
        if self.use_color {
            format!("[{}]{}[/]", tag, text)
        } else {
            text.to_string()
        }
    }

    fn header(&self, text: impl fmt::Display) -> String {
        self.wrap("bold cyan", text)
    }

    fn location(&self, text: impl fmt::Display) -> String {
        self.wrap("yellow", text)
    }

    fn success(&self, text: impl fmt::Display) -> String {
        self.wrap("bold green", text)
    }

    fn warning(&self, text: impl fmt::Display) -> String {
        self.wrap("bold magenta", text)
    }

    fn dim(&self, text: impl fmt::Display) -> String {
        self.wrap("dim", text)
    }

    fn stat_label(&self, text: impl fmt::Display) -> String {
        self.wrap("bold blue", text)
    }

    fn separator(&self) -> String {
        self.wrap("dim", "───")
    }
}

/// Resolve `--color` against `NO_COLOR`/`FORCE_COLOR`; `None` defers to the terminal
fn forced_color(color: ColorMode) -> Option<bool> {
    match color {
        ColorMode::Never => Some(false),
        ColorMode::Always => Some(true),
        ColorMode::Auto if std::env::var_os("NO_COLOR").is_some() => Some(false),
        ColorMode::Auto if std::env::var_os("FORCE_COLOR").is_some() => Some(true),
        ColorMode::Auto => None,
    }
}

fn build_console(color: ColorMode) -> (Console, VerboseStyle) {
    let forced = forced_color(color);
    let console = match forced {
        Some(true) => Console::builder()
            .force_terminal(true)
            .color_system(terminal::detect_color_system().unwrap_or(ColorSystem::Standard))
            .build(),
        Some(false) | None => Console::new(),
    };
    let use_color = forced.unwrap_or_else(|| console.is_color_enabled());
    (console, VerboseStyle::new(use_color))
}

// ─────────────────────────────────────────────────────────────────────────────
// Config File Support
// ─────────────────────────────────────────────────────────────────────────────

/// Config file names searched in order
const CONFIG_FILENAMES: &[&str] = &[".incleanrc", ".incleanrc.toml", "incleanrc.toml"];

/// Configuration loaded from a .incleanrc file
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct FileConfig {
    /// Compiler for the `COMPILER -c FILE` check
    compiler: Option<String>,
    /// Shell command replacing the compiler check
    command: Option<String>,
    /// Extra compiler flags
    cflags: Option<Vec<String>>,
    /// Show verbose output
    verbose: Option<bool>,
    /// Color mode: auto, always, never
    color: Option<ColorMode>,
    /// Output as JSON
    json: Option<bool>,
    /// Print unified diffs
    diff: Option<bool>,
    /// Pass the verification command's output through
    show_output: Option<bool>,
    /// Create backup before editing
    backup: Option<bool>,
    /// Backup file extension
    backup_ext: Option<String>,
    /// Enable recursive mode
    recursive: Option<bool>,
    /// Glob patterns for recursive mode
    glob: Option<String>,
    /// Respect .gitignore
    gitignore: Option<bool>,
    /// Maximum directory depth
    max_depth: Option<usize>,
}

/// First config file in `start_dir` or any ancestor, then in the home directory
fn find_config_file(start_dir: &Path) -> Option<PathBuf> {
    let home = dirs::home_dir();
    start_dir
        .ancestors()
        .chain(home.as_deref())
        .flat_map(|dir| CONFIG_FILENAMES.iter().map(move |name| dir.join(name)))
        .find(|candidate| candidate.is_file())
}

/// Load and parse a config file
fn load_config_file(path: &Path) -> Result<FileConfig> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Create Config by merging file config with CLI args (CLI wins)
fn create_config(args: &Args) -> Result<Config> {
    let mut config = Config::from(args);

    if !args.no_config {
        let config_path = if let Some(ref path) = args.config_file {
            if !path.exists() {
                return Err(anyhow::anyhow!("Config file not found: {}", path.display()));
            }
            Some(path.clone())
        } else {
            let start_dir = args
                .inputs
                .first()
                .and_then(|p| {
                    if p.is_dir() {
                        Some(p.clone())
                    } else {
                        p.parent().map(|p| p.to_path_buf())
                    }
                })
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or_else(|| std::env::current_dir().unwrap_or_default());

            find_config_file(&start_dir)
        };

        if let Some(path) = config_path {
            let file_config = load_config_file(&path)?;
            merge_file_config(&mut config, args, file_config);
        }
    }

    // JSON owns stdout
    if config.json {
        config.verbose = false;
        config.diff = false;
        config.show_output = false;
    }

    Ok(config)
}

/// Apply file values wherever the CLI left the default in place
fn merge_file_config(config: &mut Config, args: &Args, file_config: FileConfig) {
    if args.compiler.is_none() {
        config.compiler = file_config.compiler;
    }

    if args.shell.is_none() {
        config.shell = file_config.command;
    }

    if args.cflags.is_empty() {
        if let Some(cflags) = file_config.cflags {
            config.cflags = cflags;
        }
    }

    if !args.verbose {
        if let Some(v) = file_config.verbose {
            config.verbose = v;
        }
    }

    if args.color == ColorMode::Auto {
        if let Some(c) = file_config.color {
            config.color = c;
        }
    }

    if !args.json {
        if let Some(j) = file_config.json {
            config.json = j;
        }
    }

    if !args.diff {
        if let Some(d) = file_config.diff {
            config.diff = d;
        }
    }

    if !args.show_output {
        if let Some(show) = file_config.show_output {
            config.show_output = show;
        }
    }

    if !args.backup {
        if let Some(b) = file_config.backup {
            config.backup = b;
        }
    }

    if args.backup_ext == ".bak" {
        if let Some(ext) = file_config.backup_ext {
            config.backup_ext = ext;
        }
    }

    if !args.recursive {
        if let Some(r) = file_config.recursive {
            config.recursive = r;
        }
    }

    if args.glob == DEFAULT_GLOB {
        if let Some(g) = file_config.glob {
            config.glob = g;
        }
    }

    if !args.no_gitignore {
        if let Some(gi) = file_config.gitignore {
            config.gitignore = gi;
        }
    }

    if args.max_depth == 0 {
        if let Some(d) = file_config.max_depth {
            config.max_depth = d;
        }
    }
}

/// Default config file content
const DEFAULT_CONFIG: &str = r#"# .incleanrc - inclean configuration file

# Verification: either a compiler (run as `COMPILER [cflags] -c FILE`)
# or a shell command. `{file}` in the command is replaced by the target path.
# compiler = "c++"
# cflags = ["-std=c++17", "-Iinclude"]
# command = "make -s {file}.o"

# Output options
# verbose = false
# color = "auto"
# json = false
# diff = false
# show_output = false

# Backup options
# backup = false
# backup_ext = ".bak"

# Recursive mode defaults
# recursive = false
# glob = "*.c,*.cc,*.cpp,*.cxx,*.h,*.hh,*.hpp,*.hxx"
# gitignore = true
# max_depth = 0
"#;

/// Handle the config subcommand
fn run_config_command(action: &ConfigAction) -> Result<()> {
    match action {
        ConfigAction::Init { global } => {
            let path = if *global {
                dirs::home_dir()
                    .ok_or_else(|| anyhow::anyhow!("Could not determine home directory"))?
                    .join(".incleanrc")
            } else {
                PathBuf::from(".incleanrc")
            };

            if path.exists() {
                return Err(anyhow::anyhow!(
                    "Config file already exists: {}",
                    path.display()
                ));
            }

            fs::write(&path, DEFAULT_CONFIG)
                .with_context(|| format!("Failed to create config file: {}", path.display()))?;

            eprintln!("Created config file: {}", path.display());
            Ok(())
        }

        ConfigAction::Show => {
            let args = Args::parse_from(["inclean"]);
            let config = create_config(&args)?;

            eprintln!("Effective configuration:");
            eprintln!("  verify: {}", config.verify_command());
            eprintln!("  verbose: {}", config.verbose);
            eprintln!("  color: {:?}", config.color);
            eprintln!("  json: {}", config.json);
            eprintln!("  diff: {}", config.diff);
            eprintln!("  show_output: {}", config.show_output);
            eprintln!("  backup: {}", config.backup);
            eprintln!("  backup_ext: {}", config.backup_ext);
            eprintln!("  recursive: {}", config.recursive);
            eprintln!("  glob: {}", config.glob);
            eprintln!("  gitignore: {}", config.gitignore);
            eprintln!("  max_depth: {}", config.max_depth);

            let start_dir = std::env::current_dir().unwrap_or_default();
            if let Some(path) = find_config_file(&start_dir) {
                eprintln!();
                eprintln!("Config file: {}", path.display());
            }

            Ok(())
        }

        ConfigAction::Path => {
            let start_dir = std::env::current_dir().unwrap_or_default();
            if let Some(path) = find_config_file(&start_dir) {
                println!("{}", path.display());
                Ok(())
            } else {
                eprintln!("No config file found");
                std::process::exit(exit_codes::ERROR);
            }
        }
    }
}

fn run_command(command: &Commands) -> Result<()> {
    match command {
        Commands::Config { action } => run_config_command(action),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Line Buffer
// ─────────────────────────────────────────────────────────────────────────────

/// The raw lines of one file, terminators stripped, plus the path they
/// persist to.
///
/// Lines are bytes, not text: sources in legacy encodings or with stray NUL
/// bytes are cleaned like any other. Only `\n` terminates a line, so a `\r`
/// from CRLF input stays in the line and is written back unchanged. Whether
/// the last line had a terminator is remembered, which keeps an untouched file
/// byte-identical after [`LineBuffer::persist`].
#[derive(Debug)]
struct LineBuffer {
    path: PathBuf,
    lines: Vec<Vec<u8>>,
    final_newline: bool,
    /// Why the file could not be loaded; such a buffer is never persisted
    unavailable: Option<String>,
}

impl LineBuffer {
    /// Load `path`. A path that cannot be read yields an empty buffer marked
    /// unavailable rather than an error.
    fn load(path: &Path) -> Self {
        match read_file(path) {
            Ok(content) => {
                let (lines, final_newline) = split_lines(&content);
                Self {
                    path: path.to_path_buf(),
                    lines,
                    final_newline,
                    unavailable: None,
                }
            }
            Err(err) => Self {
                path: path.to_path_buf(),
                lines: Vec::new(),
                final_newline: false,
                unavailable: Some(format!("{:#}", err)),
            },
        }
    }

    fn len(&self) -> usize {
        self.lines.len()
    }

    fn line(&self, index: usize) -> Option<&[u8]> {
        self.lines.get(index).map(Vec::as_slice)
    }

    /// Swap `text` into line `index`, returning the previous bytes
    fn replace(&mut self, index: usize, text: Vec<u8>) -> Vec<u8> {
        std::mem::replace(&mut self.lines[index], text)
    }

    fn serialize(&self) -> Vec<u8> {
        let mut out = self.lines.join(&b'\n');
        if self.final_newline && !self.lines.is_empty() {
            out.push(b'\n');
        }
        out
    }

    /// Overwrite the backing file with the buffer. Returns the bytes written.
    fn persist(&self) -> Result<usize, PersistError> {
        if self.unavailable.is_some() {
            return Ok(0);
        }

        let bytes = self.serialize();
        let expected = bytes.len();
        let fail = |written, source| PersistError {
            path: self.path.clone(),
            written,
            expected,
            source,
        };

        let mut file = File::create(&self.path).map_err(|source| fail(0, source))?;
        let mut written = 0;
        while written < expected {
            match file.write(&bytes[written..]) {
                Ok(0) => return Err(fail(written, io::ErrorKind::WriteZero.into())),
                Ok(n) => written += n,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
                Err(source) => return Err(fail(written, source)),
            }
        }
        file.flush().map_err(|source| fail(written, source))?;

        Ok(written)
    }
}

/// Read a target file's bytes; directories and other non-files are refused
fn read_file(path: &Path) -> Result<Vec<u8>> {
    let metadata = fs::metadata(path)
        .with_context(|| format!("Failed to read file metadata: {}", path.display()))?;

    if !metadata.is_file() {
        return Err(ParseError(format!("Not a regular file: {}", path.display())).into());
    }

    fs::read(path).with_context(|| format!("Failed to read input file: {}", path.display()))
}

/// Split on `\n` only; the flag reports whether the content ended with one
fn split_lines(content: &[u8]) -> (Vec<Vec<u8>>, bool) {
    if content.is_empty() {
        return (Vec::new(), false);
    }
    let final_newline = content.ends_with(b"\n");
    let body = content.strip_suffix(b"\n").unwrap_or(content);
    (
        body.split(|&b| b == b'\n').map(<[u8]>::to_vec).collect(),
        final_newline,
    )
}

// ─────────────────────────────────────────────────────────────────────────────
// Verification Runner
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(windows)]
const NULL_DEVICE: &str = "NUL";
#[cfg(not(windows))]
const NULL_DEVICE: &str = "/dev/null";

/// What a child's standard stream is connected to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Redirect {
    /// Share the parent's stream
    Inherit,
    /// Connect to the null device
    Discard,
    /// Give the child no stream; reads see end-of-file
    Close,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct RedirectPolicy {
    stdin: Redirect,
    stdout: Redirect,
    stderr: Redirect,
}

impl RedirectPolicy {
    /// No input, and both output streams thrown away
    const SILENT: Self = Self {
        stdin: Redirect::Close,
        stdout: Redirect::Discard,
        stderr: Redirect::Discard,
    };

    /// No input; the check writes to the terminal (`--show-output`)
    const PASSTHROUGH: Self = Self {
        stdin: Redirect::Close,
        stdout: Redirect::Inherit,
        stderr: Redirect::Inherit,
    };
}

/// Write handle on the null device, opened once per run
#[derive(Debug)]
struct DiscardSink {
    file: File,
}

impl DiscardSink {
    fn open() -> Result<Self, SinkError> {
        File::options()
            .read(true)
            .write(true)
            .open(NULL_DEVICE)
            .map(|file| Self { file })
            .map_err(|source| SinkError {
                device: NULL_DEVICE,
                source,
            })
    }
}

/// A program and its argument vector
#[derive(Debug, Clone, PartialEq, Eq)]
struct Invocation {
    program: OsString,
    args: Vec<OsString>,
}

impl fmt::Display for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program.to_string_lossy())?;
        for arg in &self.args {
            write!(f, " {}", arg.to_string_lossy())?;
        }
        Ok(())
    }
}

/// How a verification run ended
#[derive(Debug)]
enum VerifyStatus {
    /// The child ran and terminated with this status
    Exited(ExitStatus),
    /// No child could be started (lookup failure, resource exhaustion)
    Unverifiable(io::Error),
}

impl VerifyStatus {
    fn is_success(&self) -> bool {
        matches!(self, Self::Exited(status) if status.success())
    }
}

/// Runs the verification command and waits for it
#[derive(Debug)]
struct VerificationRunner {
    sink: DiscardSink,
    policy: RedirectPolicy,
}

impl VerificationRunner {
    fn new(sink: DiscardSink, policy: RedirectPolicy) -> Self {
        Self { sink, policy }
    }

    /// Spawn `invocation`, block until it exits, and report how it ended.
    /// Failing to spawn is reported, never raised.
    fn run(&self, invocation: &Invocation) -> VerifyStatus {
        match self.spawn_and_wait(invocation) {
            Ok(status) => VerifyStatus::Exited(status),
            Err(err) => VerifyStatus::Unverifiable(err),
        }
    }

    fn spawn_and_wait(&self, invocation: &Invocation) -> io::Result<ExitStatus> {
        Command::new(&invocation.program)
            .args(&invocation.args)
            .stdin(self.stdio(self.policy.stdin)?)
            .stdout(self.stdio(self.policy.stdout)?)
            .stderr(self.stdio(self.policy.stderr)?)
            .status()
    }

    fn stdio(&self, redirect: Redirect) -> io::Result<Stdio> {
        Ok(match redirect {
            Redirect::Inherit => Stdio::inherit(),
            Redirect::Discard => Stdio::from(self.sink.file.try_clone()?),
            Redirect::Close => Stdio::null(),
        })
    }
}

/// The build check run against a target file
#[derive(Debug, Clone, PartialEq, Eq)]
enum VerifyCommand {
    /// `COMPILER [cflags...] -c FILE`
    Compile {
        compiler: String,
        cflags: Vec<String>,
    },
    /// `sh -c COMMAND sh FILE`, with `{file}` in COMMAND replaced by FILE
    Shell(String),
}

impl VerifyCommand {
    fn invocation(&self, path: &Path) -> Invocation {
        match self {
            Self::Compile { compiler, cflags } => {
                let mut args: Vec<OsString> = cflags.iter().map(OsString::from).collect();
                args.push("-c".into());
                args.push(path.as_os_str().to_owned());
                Invocation {
                    program: compiler.into(),
                    args,
                }
            }
            Self::Shell(command) => {
                let quoted = shell_quote(&path.to_string_lossy());
                Invocation {
                    program: "sh".into(),
                    args: vec![
                        "-c".into(),
                        command.replace("{file}", &quoted).into(),
                        "sh".into(),
                        path.as_os_str().to_owned(),
                    ],
                }
            }
        }
    }
}

impl fmt::Display for VerifyCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Compile { compiler, cflags } => {
                write!(f, "{}", compiler)?;
                for flag in cflags {
                    write!(f, " {}", flag)?;
                }
                write!(f, " -c FILE")
            }
            Self::Shell(command) => write!(f, "sh -c '{}'", command),
        }
    }
}

/// Quote `s` for a POSIX shell unless it is made of safe characters only
fn shell_quote(s: &str) -> String {
    let safe = !s.is_empty()
        && s.chars()
            .all(|c| c.is_ascii_alphanumeric() || "_-./+,:@%=".contains(c));
    if safe {
        s.to_string()
    } else {
        format!("'{}'", s.replace('\'', r"'\''"))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Toggle Session
// ─────────────────────────────────────────────────────────────────────────────

/// Prefix that disables a directive
const COMMENT_PREFIX: &[u8] = b"// ";

/// Cursor over one file's lines that can disable the current line and then
/// either commit or roll back.
///
/// `pending` holds the original bytes of the cursor line while a disable is
/// under test; the session is committed exactly when it is `None`. While
/// committed the file on disk matches the buffer. While under test the
/// commented line is on disk too, since [`ToggleSession::disable_current`]
/// persists before returning.
///
/// However the session ends (explicit close, drop on early return or
/// unwinding, or finalization from the termination handler) a pending
/// disable is rolled back and the buffer persisted once more.
#[derive(Debug)]
struct ToggleSession {
    buffer: LineBuffer,
    cursor: usize,
    pending: Option<Vec<u8>>,
    closed: bool,
}

impl ToggleSession {
    fn open(path: &Path) -> Self {
        Self {
            buffer: LineBuffer::load(path),
            cursor: 0,
            pending: None,
            closed: false,
        }
    }

    fn path(&self) -> &Path {
        &self.buffer.path
    }

    fn unavailable_reason(&self) -> Option<&str> {
        self.buffer.unavailable.as_deref()
    }

    fn is_committed(&self) -> bool {
        self.pending.is_none()
    }

    /// Cursor position and line, or `None` at end of file
    fn current_line(&self) -> Option<(usize, Vec<u8>)> {
        self.buffer
            .line(self.cursor)
            .map(|line| (self.cursor, line.to_vec()))
    }

    fn snapshot(&self) -> Vec<Vec<u8>> {
        self.buffer.lines.clone()
    }

    /// Comment out the cursor line and persist it so the build check sees it
    fn disable_current(&mut self) -> Result<usize, PersistError> {
        assert!(self.is_committed(), "disable_current with a disable pending");
        assert!(self.cursor < self.buffer.len(), "disable_current past end");

        let commented = [COMMENT_PREFIX, self.buffer.lines[self.cursor].as_slice()].concat();
        let original = self.buffer.replace(self.cursor, commented);
        self.pending = Some(original);
        self.buffer.persist()
    }

    /// Keep the disabled line. Returns the bytes that were commented out.
    fn commit(&mut self) -> Vec<u8> {
        self.pending
            .take()
            .unwrap_or_else(|| panic!("commit without a pending disable"))
    }

    /// Restore the cursor line and persist the restored file
    fn rollback(&mut self) -> Result<usize, PersistError> {
        let original = self
            .pending
            .take()
            .unwrap_or_else(|| panic!("rollback without a pending disable"));
        self.buffer.replace(self.cursor, original);
        self.buffer.persist()
    }

    fn advance(&mut self) {
        assert!(self.is_committed(), "advance with a disable pending");
        if self.cursor < self.buffer.len() {
            self.cursor += 1;
        }
    }

    /// Roll back anything pending, then persist unconditionally
    fn close(mut self) -> Result<usize, PersistError> {
        self.teardown()
    }

    /// Drop a session that never changed anything without writing it back
    fn discard(mut self) {
        debug_assert!(self.is_committed());
        self.closed = true;
    }

    fn teardown(&mut self) -> Result<usize, PersistError> {
        if self.closed {
            return Ok(0);
        }
        self.closed = true;

        if !self.is_committed() {
            if let Err(err) = self.rollback() {
                eprintln!("Warning: {}", err);
            }
        }
        self.buffer.persist()
    }
}

impl Drop for ToggleSession {
    fn drop(&mut self) {
        if let Err(err) = self.teardown() {
            eprintln!("Warning: {}", err);
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Session Slot and Termination Guard
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct SlotState {
    session: Mutex<Option<ToggleSession>>,
    interrupted: AtomicBool,
}

/// Process-wide home of the open [`ToggleSession`].
///
/// A session enters through [`SessionSlot::open`] and leaves only through
/// finalization: when its [`ActiveSession`] guard closes or drops, or when
/// the termination handler calls [`SessionSlot::terminate`]. The lock is
/// held for each session operation and for finalization, never across a
/// verification run, so the handler can always get in while a check is
/// running.
#[derive(Debug, Clone, Default)]
struct SessionSlot {
    state: Arc<SlotState>,
}

impl SessionSlot {
    fn lock(&self) -> MutexGuard<'_, Option<ToggleSession>> {
        self.state
            .session
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Install `session`, finalizing any session still in the slot.
    ///
    /// Once termination has been requested no session gets in: `session` is
    /// discarded unwritten and `None` returned. The flag is read under the
    /// lock, and [`SessionSlot::terminate`] sets it before locking, so either
    /// the handler sees the new session or the session never opens.
    fn open(&self, session: ToggleSession) -> Option<ActiveSession<'_>> {
        let mut guard = self.lock();
        if self.is_interrupted() {
            drop(guard);
            session.discard();
            return None;
        }
        let previous = guard.replace(session);
        drop(guard);

        if let Some(previous) = previous {
            if let Err(err) = previous.close() {
                eprintln!("Warning: {}", err);
            }
        }
        Some(ActiveSession { slot: self })
    }

    /// Close and remove the session, if any. The lock is held until the
    /// session has been persisted.
    fn finalize(&self) -> Option<Result<usize, PersistError>> {
        let mut guard = self.lock();
        let session = guard.take()?;
        let result = session.close();
        drop(guard);
        Some(result)
    }

    /// Entry point for the termination handler
    fn terminate(&self) -> Option<Result<usize, PersistError>> {
        self.state.interrupted.store(true, Ordering::SeqCst);
        self.finalize()
    }

    fn is_interrupted(&self) -> bool {
        self.state.interrupted.load(Ordering::SeqCst)
    }
}

/// Scoped access to the session in a [`SessionSlot`]
struct ActiveSession<'a> {
    slot: &'a SessionSlot,
}

impl ActiveSession<'_> {
    /// Run `f` on the session. `None` once the termination handler has
    /// finalized it.
    fn with<R>(&self, f: impl FnOnce(&mut ToggleSession) -> R) -> Option<R> {
        self.slot.lock().as_mut().map(f)
    }

    fn close(self) -> Option<Result<usize, PersistError>> {
        self.slot.finalize()
    }
}

impl Drop for ActiveSession<'_> {
    fn drop(&mut self) {
        if let Some(Err(err)) = self.slot.finalize() {
            eprintln!("Warning: {}", err);
        }
    }
}

/// Finalize the open session, then exit
fn on_termination(slot: &SessionSlot) -> ! {
    match slot.terminate() {
        Some(Ok(_)) => eprintln!("\nInterrupted; file under test restored"),
        Some(Err(err)) => eprintln!("\nInterrupted; {}", err),
        None => eprintln!("\nInterrupted"),
    }
    std::process::exit(exit_codes::INTERRUPTED);
}

/// Route SIGINT, SIGTERM, SIGHUP and (on unix) SIGQUIT through the slot's
/// finalization
fn install_termination_guard(slot: &SessionSlot) -> Result<()> {
    let handler_slot = slot.clone();
    ctrlc::set_handler(move || on_termination(&handler_slot))
        .context("Failed to install termination handler")?;

    #[cfg(unix)]
    install_quit_guard(slot)?;

    Ok(())
}

/// ctrlc leaves SIGQUIT at its default action, which dumps core without
/// running teardown
#[cfg(unix)]
fn install_quit_guard(slot: &SessionSlot) -> Result<()> {
    use signal_hook::consts::signal::SIGQUIT;
    use signal_hook::iterator::Signals;

    let mut signals = Signals::new([SIGQUIT]).context("Failed to install SIGQUIT handler")?;
    let slot = slot.clone();
    std::thread::Builder::new()
        .name("inclean-sigquit".to_string())
        .spawn(move || {
            if signals.forever().next().is_some() {
                on_termination(&slot);
            }
        })
        .context("Failed to start SIGQUIT listener")?;
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Candidate Classification
// ─────────────────────────────────────────────────────────────────────────────

const DIRECTIVE_MARKER: u8 = b'#';
const INCLUDE_KEYWORD: &[u8] = b"include";

/// Whitespace as C's `isspace` sees it in the "C" locale
fn is_c_space(b: u8) -> bool {
    matches!(b, b' ' | b'\t' | b'\n' | b'\x0b' | b'\x0c' | b'\r')
}

fn skip_space(bytes: &[u8]) -> &[u8] {
    let n = bytes.iter().take_while(|&&b| is_c_space(b)).count();
    &bytes[n..]
}

/// `#`, optional whitespace around it, then a word starting with `include`.
///
/// Prefix match only: `#include_next` and `#includes` count too.
fn is_include_directive(line: &[u8]) -> bool {
    match skip_space(line).split_first() {
        Some((&DIRECTIVE_MARKER, rest)) => skip_space(rest).starts_with(INCLUDE_KEYWORD),
        _ => false,
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Driver
// ─────────────────────────────────────────────────────────────────────────────

/// What happened to one directive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
enum Verdict {
    /// The check passed without it; it stays commented out
    Removed,
    /// The check failed without it; it was restored
    Kept,
    /// The check could not run (or the disable could not be written); restored
    Unverifiable,
}

impl From<&VerifyStatus> for Verdict {
    fn from(status: &VerifyStatus) -> Self {
        match status {
            VerifyStatus::Exited(status) if status.success() => Self::Removed,
            VerifyStatus::Exited(_) => Self::Kept,
            VerifyStatus::Unverifiable(_) => Self::Unverifiable,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
struct CandidateReport {
    /// 1-based line number
    line: usize,
    /// The line as text, invalid UTF-8 replaced
    text: String,
    verdict: Verdict,
}

/// Result of cleaning a single file
struct FileResult {
    filename: String,
    original: Vec<Vec<u8>>,
    cleaned: Vec<Vec<u8>>,
    candidates: Vec<CandidateReport>,
    available: bool,
    interrupted: bool,
    elapsed: Duration,
}

impl FileResult {
    fn changed(&self) -> bool {
        self.original != self.cleaned
    }

    fn count(&self, verdict: Verdict) -> usize {
        self.candidates
            .iter()
            .filter(|c| c.verdict == verdict)
            .count()
    }
}

/// Runs the toggle → verify → commit/rollback protocol over target files
struct Driver<'a> {
    verifier: VerifyCommand,
    runner: &'a VerificationRunner,
    slot: &'a SessionSlot,
    console: &'a Console,
    styles: &'a VerboseStyle,
    verbose: bool,
}

impl Driver<'_> {
    fn clean_file(&self, path: &Path) -> FileResult {
        let start = Instant::now();
        let session = ToggleSession::open(path);
        let filename = session.path().display().to_string();

        if let Some(reason) = session.unavailable_reason() {
            if self.verbose {
                self.console
                    .print(&self.styles.dim(format!("Skipping {}", reason)));
            }
        } else if self.verbose {
            self.console.print(
                &self
                    .styles
                    .header(format!("Cleaning {} ({} lines)", filename, session.buffer.len())),
            );
        }

        let available = session.unavailable_reason().is_none();
        let original = session.snapshot();
        let Some(active) = self.slot.open(session) else {
            return FileResult {
                filename,
                cleaned: original.clone(),
                original,
                candidates: Vec::new(),
                available,
                interrupted: true,
                elapsed: start.elapsed(),
            };
        };

        let mut candidates = Vec::new();
        let interrupted = self.run_protocol(&active, path, &mut candidates).is_none();
        let cleaned = active
            .with(|session| session.snapshot())
            .unwrap_or_else(|| original.clone());

        if let Some(Err(err)) = active.close() {
            eprintln!("Warning: {}", err);
        }

        FileResult {
            filename,
            original,
            cleaned,
            candidates,
            available,
            interrupted,
            elapsed: start.elapsed(),
        }
    }

    /// `None` as soon as the termination handler has taken the session
    fn run_protocol(
        &self,
        active: &ActiveSession<'_>,
        path: &Path,
        candidates: &mut Vec<CandidateReport>,
    ) -> Option<()> {
        while let Some((index, line)) = active.with(|session| session.current_line())? {
            if is_include_directive(&line) {
                let text = String::from_utf8_lossy(&line).into_owned();
                if self.verbose {
                    self.console.print(&format!(
                        "{} {}",
                        self.styles
                            .location(format!("{}:{}:", path.display(), index + 1)),
                        text
                    ));
                }

                let verdict = self.test_candidate(active, path)?;
                self.announce(verdict);
                candidates.push(CandidateReport {
                    line: index + 1,
                    text,
                    verdict,
                });
            }
            active.with(ToggleSession::advance)?;
        }
        Some(())
    }

    fn test_candidate(&self, active: &ActiveSession<'_>, path: &Path) -> Option<Verdict> {
        if let Err(err) = active.with(ToggleSession::disable_current)? {
            eprintln!("Warning: {}", err);
            if let Err(err) = active.with(ToggleSession::rollback)? {
                eprintln!("Warning: {}", err);
            }
            return Some(Verdict::Unverifiable);
        }

        let invocation = self.verifier.invocation(path);
        let status = self.runner.run(&invocation);
        if let VerifyStatus::Unverifiable(err) = &status {
            if self.verbose {
                self.console.print(
                    &self
                        .styles
                        .warning(format!("  could not run `{}`: {}", invocation, err)),
                );
            }
        }

        let verdict = Verdict::from(&status);
        active.with(|session| {
            if verdict == Verdict::Removed {
                session.commit();
            } else if let Err(err) = session.rollback() {
                eprintln!("Warning: {}", err);
            }
        })?;
        Some(verdict)
    }

    fn announce(&self, verdict: Verdict) {
        if !self.verbose {
            return;
        }
        let line = match verdict {
            Verdict::Removed => self.styles.success("  removed"),
            Verdict::Kept => self.styles.dim("  kept"),
            Verdict::Unverifiable => self.styles.warning("  kept (unverifiable)"),
        };
        self.console.print(&line);
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Recursive File Discovery
// ─────────────────────────────────────────────────────────────────────────────

fn build_globset(patterns: &str) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    let mut added = 0;

    for raw in patterns.split(',') {
        let pattern = raw.trim();
        if pattern.is_empty() {
            continue;
        }

        let glob = Glob::new(pattern)
            .map_err(|err| ArgError(format!("Invalid glob pattern '{}': {}", pattern, err)))?;
        builder.add(glob);
        added += 1;
    }

    if added == 0 {
        return Err(ArgError("--glob must include at least one pattern".to_string()).into());
    }

    builder
        .build()
        .map_err(|err| ArgError(format!("Invalid glob set: {}", err)).into())
}

fn discover_recursive_files(
    paths: &[PathBuf],
    config: &Config,
    console: &Console,
    styles: &VerboseStyle,
) -> Result<Vec<PathBuf>> {
    let globs = build_globset(&config.glob)?;
    let mut files = std::collections::BTreeSet::new();

    for path in paths {
        if !path.is_dir() {
            // Files (and missing paths) go straight to the driver
            files.insert(path.clone());
            continue;
        }

        let mut walker = WalkBuilder::new(path);
        walker.git_ignore(config.gitignore);
        walker.git_exclude(config.gitignore);
        walker.git_global(config.gitignore);
        walker.ignore(config.gitignore);
        walker.hidden(false);

        if config.max_depth > 0 {
            walker.max_depth(Some(config.max_depth));
        }

        for entry in walker.build() {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    if config.verbose {
                        console.print(&styles.dim(format!("Warning: {}", err)));
                    }
                    continue;
                }
            };

            let entry_path = entry.path();
            if entry_path.is_file() {
                if let Some(name) = entry_path.file_name() {
                    if globs.is_match(name) {
                        files.insert(entry_path.to_path_buf());
                    }
                }
            }
        }
    }

    Ok(files.into_iter().collect())
}

// ─────────────────────────────────────────────────────────────────────────────
// Backup
// ─────────────────────────────────────────────────────────────────────────────

/// Creates a backup of the file by appending the extension to the filename.
/// For example: "main.cc" with extension ".bak" becomes "main.cc.bak"
fn create_backup(path: &Path, ext: &str) -> Result<PathBuf> {
    let mut backup_name = path.as_os_str().to_owned();
    backup_name.push(ext);
    let backup_path = PathBuf::from(backup_name);

    fs::copy(path, &backup_path)
        .with_context(|| format!("Failed to create backup at {}", backup_path.display()))?;

    Ok(backup_path)
}

// ─────────────────────────────────────────────────────────────────────────────
// Reporting
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Serialize)]
struct JsonReport<'a> {
    version: &'static str,
    status: &'static str,
    file: &'a str,
    lines: usize,
    changed: bool,
    removed: usize,
    kept: usize,
    unverifiable: usize,
    directives: &'a [CandidateReport],
}

fn output_json(result: &FileResult) -> Result<()> {
    let status = if result.interrupted {
        "interrupted"
    } else if !result.available {
        "unreadable"
    } else {
        "success"
    };

    let report = JsonReport {
        version: "1.0",
        status,
        file: &result.filename,
        lines: result.original.len(),
        changed: result.changed(),
        removed: result.count(Verdict::Removed),
        kept: result.count(Verdict::Kept),
        unverifiable: result.count(Verdict::Unverifiable),
        directives: &result.candidates,
    };

    println!(
        "{}",
        serde_json::to_string_pretty(&report).context("Failed to serialize JSON output")?
    );
    Ok(())
}

/// Output a unified diff for a file result
fn output_diff(result: &FileResult) -> Result<()> {
    if !result.changed() {
        return Ok(());
    }

    let original_text = String::from_utf8_lossy(&result.original.join(&b'\n')).into_owned();
    let cleaned_text = String::from_utf8_lossy(&result.cleaned.join(&b'\n')).into_owned();
    let diff = TextDiff::from_lines(&original_text, &cleaned_text);
    let mut stdout = io::stdout().lock();

    writeln!(stdout, "--- a/{}", result.filename)?;
    writeln!(stdout, "+++ b/{}", result.filename)?;

    for hunk in diff.unified_diff().context_radius(3).iter_hunks() {
        writeln!(stdout, "{}", hunk.header())?;
        for change in hunk.iter_changes() {
            let sign = match change.tag() {
                ChangeTag::Delete => "-",
                ChangeTag::Insert => "+",
                ChangeTag::Equal => " ",
            };
            let line = change.value();
            if line.ends_with('\n') {
                write!(stdout, "{}{}", sign, line)?;
            } else {
                writeln!(stdout, "{}{}", sign, line)?;
            }
        }
    }

    Ok(())
}

/// Statistics collected while cleaning
#[derive(Default, Clone)]
struct Stats {
    files_processed: usize,
    files_changed: usize,
    files_unreadable: usize,
    candidates: usize,
    removed: usize,
    kept: usize,
    unverifiable: usize,
    elapsed: Duration,
}

impl Stats {
    fn record(&mut self, result: &FileResult) {
        self.files_processed += 1;
        if result.changed() {
            self.files_changed += 1;
        }
        if !result.available {
            self.files_unreadable += 1;
        }
        self.candidates += result.candidates.len();
        self.removed += result.count(Verdict::Removed);
        self.kept += result.count(Verdict::Kept);
        self.unverifiable += result.count(Verdict::Unverifiable);
        self.elapsed += result.elapsed;
    }
}

/// Print a statistics summary
fn print_stats_summary(stats: &Stats, errors: usize, console: &Console, styles: &VerboseStyle) {
    console.print("");
    console.print(&format!(
        "{} Summary {}",
        styles.separator(),
        styles.separator()
    ));

    console.print(&format!(
        "  {} {} processed, {} modified, {} unreadable",
        styles.stat_label("Files:"),
        stats.files_processed,
        stats.files_changed,
        stats.files_unreadable
    ));

    console.print(&format!(
        "  {} {} tested, {} removed, {} kept, {} unverifiable",
        styles.stat_label("Directives:"),
        stats.candidates,
        stats.removed,
        stats.kept,
        stats.unverifiable
    ));

    console.print(&format!(
        "  {} {:.2}s",
        styles.stat_label("Time:"),
        stats.elapsed.as_secs_f64()
    ));

    if errors > 0 {
        console.print(&format!(
            "  {} {}",
            styles.wrap("bold red", "Errors:"),
            errors
        ));
    }

    console.print("");
}

// ─────────────────────────────────────────────────────────────────────────────
// Entry Point
// ─────────────────────────────────────────────────────────────────────────────

fn main() {
    let (argv, unknown) =
        strip_unknown_flags(std::env::args_os().collect(), &KnownFlags::from_command());
    for flag in &unknown {
        eprintln!("Unknown option: '{}'", flag);
    }

    let args = match Args::try_parse_from(argv) {
        Ok(args) => args,
        Err(err) => {
            let code = match err.kind() {
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => exit_codes::SUCCESS,
                _ => exit_codes::INVALID_ARGS,
            };
            let _ = err.print();
            std::process::exit(code);
        }
    };

    if let Some(command) = &args.subcommand {
        let exit_code = match run_command(command) {
            Ok(()) => exit_codes::SUCCESS,
            Err(err) => {
                eprintln!("Error: {:#}", err);
                exit_code_for_error(&err)
            }
        };
        std::process::exit(exit_code);
    }

    // Nothing to clean: show usage, like --help
    if args.inputs.is_empty() {
        let _ = Args::command().print_help();
        std::process::exit(exit_codes::SUCCESS);
    }

    let exit_code = match run(args) {
        Ok(outcome) if outcome.interrupted => exit_codes::INTERRUPTED,
        Ok(_) => exit_codes::SUCCESS,
        Err(err) => {
            eprintln!("Error: {:#}", err);
            exit_code_for_error(&err)
        }
    };

    std::process::exit(exit_code);
}

fn run(args: Args) -> Result<RunOutcome> {
    let config = create_config(&args)?;
    let (console, styles) = build_console(config.color);

    let sink = DiscardSink::open()?;
    let policy = if config.show_output {
        RedirectPolicy::PASSTHROUGH
    } else {
        RedirectPolicy::SILENT
    };
    let runner = VerificationRunner::new(sink, policy);
    let slot = SessionSlot::default();
    install_termination_guard(&slot)?;

    let paths = if config.recursive {
        discover_recursive_files(&args.inputs, &config, &console, &styles)?
    } else {
        args.inputs.clone()
    };

    let driver = Driver {
        verifier: config.verify_command(),
        runner: &runner,
        slot: &slot,
        console: &console,
        styles: &styles,
        verbose: config.verbose,
    };

    if config.verbose {
        console.print(&styles.dim(format!("Verifying with: {}", driver.verifier)));
    }

    clean_files(&driver, &config, &paths)
}

fn clean_files(driver: &Driver<'_>, config: &Config, paths: &[PathBuf]) -> Result<RunOutcome> {
    let mut stats = Stats::default();
    let mut errors: Vec<(PathBuf, anyhow::Error)> = Vec::new();
    let mut interrupted = false;

    for path in paths {
        if driver.slot.is_interrupted() {
            interrupted = true;
            break;
        }

        if config.backup && path.is_file() {
            match create_backup(path, &config.backup_ext) {
                Ok(backup_path) => {
                    if config.verbose {
                        driver.console.print(
                            &driver
                                .styles
                                .dim(format!("Created backup: {}", backup_path.display())),
                        );
                    }
                }
                Err(e) => {
                    eprintln!("Error processing {}: {:#}", path.display(), e);
                    errors.push((path.clone(), e));
                    continue;
                }
            }
        }

        let result = driver.clean_file(path);
        stats.record(&result);

        if config.json {
            output_json(&result)?;
        } else if config.diff {
            output_diff(&result)?;
        }

        if result.interrupted {
            interrupted = true;
            break;
        }
    }

    if config.verbose {
        print_stats_summary(&stats, errors.len(), driver.console, driver.styles);
    }

    if !errors.is_empty() {
        let files = errors
            .iter()
            .map(|(p, _)| p.display().to_string())
            .collect::<Vec<_>>()
            .join(", ");
        anyhow::bail!("{} file(s) had errors: {}", errors.len(), files);
    }

    Ok(RunOutcome { interrupted })
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
