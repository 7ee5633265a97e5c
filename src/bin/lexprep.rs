//! CLI binary for lexprep.
//!
//! A thin shim over the library crate that maps CLI flags to
//! `GenerationConfig`, opens the SQLite store and prints results.

use anyhow::{Context as _, Result};
use clap::{Args, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use lexprep::{
    archive_template, available_engines, context_from_values, delete_case, draft_manifest, generate_case,
    save_template, Context, ConverterError, EngineKind, FormValues, GenerationConfig,
    GenerationProgressCallback, Manifest, MissingPlaceholder, PipelineStage, ProgressCallback, SqliteStore,
    Store,
};
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Terminal spinner that follows a case through render → convert → persist
/// and logs every converter engine that fails along the way.
struct CliProgressCallback {
    bar: ProgressBar,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new_spinner();
        let style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}  {elapsed:.dim}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);
        bar.set_style(style);
        bar.set_prefix("Generating");
        bar.set_message("Loading template…");
        bar.enable_steady_tick(Duration::from_millis(80));
        Arc::new(Self { bar })
    }
}

impl GenerationProgressCallback for CliProgressCallback {
    fn on_stage_start(&self, stage: PipelineStage) {
        self.bar.set_message(match stage {
            PipelineStage::Render => "Filling template…".to_string(),
            PipelineStage::Convert => "Converting to RTF…".to_string(),
            PipelineStage::Persist => "Saving case…".to_string(),
        });
    }

    fn on_stage_complete(&self, stage: PipelineStage, elapsed_ms: u64) {
        self.bar.println(format!(
            "  {} {:<8} {}",
            green("✓"),
            stage,
            dim(&format!("{:.1}s", elapsed_ms as f64 / 1000.0))
        ));
    }

    fn on_engine_attempt(&self, engine: &str, attempt: usize) {
        self.bar.set_message(format!("Converting with {engine} (attempt {attempt})…"));
    }

    fn on_engine_failure(&self, engine: &str, error: &ConverterError) {
        let msg = error.to_string();
        let msg = match msg.char_indices().nth(100) {
            Some((cut, _)) => format!("{}\u{2026}", &msg[..cut]),
            None => msg,
        };
        self.bar
            .println(format!("  {} {:<8} {}", red("✗"), engine, red(&msg)));
    }

    fn on_generation_complete(&self, _case_id: i64) {
        self.bar.finish_and_clear();
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # List the placeholders of a template
  lexprep scan lease.docx

  # Show the field schema that would be inferred
  lexprep manifest lease.docx --title "Residential lease"

  # Save a template (optionally with a hand-edited manifest)
  lexprep template add lease.docx --name "Residential lease"
  lexprep template add lease.docx --manifest lease.manifest.json

  # Generate a case from flat form values
  #   {"tenant_name": "Ada", "parties::count": "2", "parties[0].role": "Landlord", ...}
  lexprep generate 1 --values form.json --doc-name "Ada lease"

  # Generate from a nested context instead
  #   {"tenant_name": "Ada", "parties": [{"role": "Landlord"}, {"role": "Tenant"}]}
  lexprep generate 1 --context context.json

  # Browse and clean up
  lexprep cases list
  lexprep cases delete 7
  lexprep template archive 1

  # Which converter engines are installed?
  lexprep engines

ENVIRONMENT VARIABLES:
  LEXPREP_DB              SQLite database path (default data/lexprep.db)
  LEXPREP_OUTPUT_DIR      Directory for generated artifacts (default outputs)
  LEXPREP_TEMPLATES_DIR   Directory for saved templates (default data/templates)
  LEXPREP_SOFFICE         Path to the LibreOffice soffice binary
  LEXPREP_PANDOC          Path to the pandoc binary
  RUST_LOG                Override log filtering (e.g. lexprep=debug)
"#;

/// Fill DOCX templates and produce DOCX + RTF case documents.
#[derive(Parser, Debug)]
#[command(
    name = "lexprep",
    version,
    about = "Fill DOCX templates and produce DOCX + RTF case documents",
    long_about = "Scan DOCX templates for {{ placeholder }} tokens, infer a field schema, and \
generate filled documents with an RTF copy converted by LibreOffice or pandoc. Templates and \
generated cases are recorded in a SQLite database.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    #[command(flatten)]
    global: GlobalArgs,
}

#[derive(Args, Debug)]
struct GlobalArgs {
    /// SQLite database file.
    #[arg(long, global = true, env = "LEXPREP_DB", default_value = "data/lexprep.db")]
    db: PathBuf,

    /// Directory for generated artifacts.
    #[arg(long, global = true, env = "LEXPREP_OUTPUT_DIR", default_value = "outputs")]
    output_dir: PathBuf,

    /// Directory saved templates are copied into.
    #[arg(long, global = true, env = "LEXPREP_TEMPLATES_DIR", default_value = "data/templates")]
    templates_dir: PathBuf,

    /// soffice binary (default: search PATH).
    #[arg(long, global = true, env = "LEXPREP_SOFFICE")]
    soffice: Option<PathBuf>,

    /// pandoc binary (default: search PATH).
    #[arg(long, global = true, env = "LEXPREP_PANDOC")]
    pandoc: Option<PathBuf>,

    /// Converter preference, primary first. Repeat or comma-separate.
    #[arg(
        long = "engine",
        global = true,
        env = "LEXPREP_ENGINES",
        value_enum,
        value_delimiter = ',',
        default_values_t = [EngineArg::Office, EngineArg::Pandoc]
    )]
    engines: Vec<EngineArg>,

    /// Minimum visible characters a fallback conversion must contain.
    #[arg(long, global = true, env = "LEXPREP_MIN_TEXT_LEN", default_value_t = 100)]
    min_text_len: usize,

    /// Output structured JSON instead of human-readable text.
    #[arg(long, global = true, env = "LEXPREP_JSON")]
    json: bool,

    /// Disable the progress spinner.
    #[arg(long, global = true, env = "LEXPREP_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, global = true, env = "LEXPREP_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, global = true, env = "LEXPREP_QUIET")]
    quiet: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the distinct placeholders of a DOCX template.
    Scan {
        template: PathBuf,
    },

    /// Print the manifest inferred from a DOCX template.
    Manifest {
        template: PathBuf,

        /// Manifest title (default: file name).
        #[arg(long)]
        title: Option<String>,
    },

    /// Save, list and archive templates.
    #[command(subcommand)]
    Template(TemplateCommand),

    /// Fill a saved template and convert the result.
    Generate {
        /// Template id.
        template_id: i64,

        /// Flat JSON object of form paths → values (`a`, `g::count`, `g[0].b`).
        #[arg(long, conflicts_with = "context")]
        values: Option<PathBuf>,

        /// Nested JSON context shaped like the manifest.
        #[arg(long)]
        context: Option<PathBuf>,

        /// Name for the generated document; also used in file names.
        #[arg(long)]
        doc_name: Option<String>,

        /// Repetitions for groups without a `::count` value.
        #[arg(long, env = "LEXPREP_DEFAULT_REPEAT", default_value_t = 1)]
        default_repeat: usize,

        /// What to write for placeholders with no value.
        #[arg(long, value_enum, default_value = "keep-token")]
        missing: MissingArg,
    },

    /// List and delete generated cases.
    #[command(subcommand)]
    Cases(CasesCommand),

    /// Show which converter engines are available.
    Engines,
}

#[derive(Subcommand, Debug)]
enum TemplateCommand {
    /// Save a DOCX template.
    Add {
        file: PathBuf,

        /// Template name (default: "Template N").
        #[arg(long, default_value = "")]
        name: String,

        #[arg(long)]
        description: Option<String>,

        /// Edited manifest JSON to store instead of the inferred one.
        #[arg(long)]
        manifest: Option<PathBuf>,
    },

    /// List templates, newest first.
    List {
        /// Include archived templates.
        #[arg(long)]
        all: bool,
    },

    /// Archive a template; its cases are kept.
    Archive {
        id: i64,
    },
}

#[derive(Subcommand, Debug)]
enum CasesCommand {
    /// List generated cases, newest first.
    List,

    /// Delete a case and its files.
    Delete {
        id: i64,
    },
}

#[derive(clap::ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum EngineArg {
    Office,
    Pandoc,
}

impl From<EngineArg> for EngineKind {
    fn from(v: EngineArg) -> Self {
        match v {
            EngineArg::Office => EngineKind::Office,
            EngineArg::Pandoc => EngineKind::Pandoc,
        }
    }
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum MissingArg {
    KeepToken,
    Blank,
}

impl From<MissingArg> for MissingPlaceholder {
    fn from(v: MissingArg) -> Self {
        match v {
            MissingArg::KeepToken => MissingPlaceholder::KeepToken,
            MissingArg::Blank => MissingPlaceholder::Blank,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let g = &cli.global;

    // ── Logging setup ────────────────────────────────────────────────────
    // While the spinner is shown, only warnings get through; the spinner
    // covers the rest.
    let show_progress = matches!(cli.command, Command::Generate { .. }) && !g.quiet && !g.no_progress && !g.json;
    let filter = if g.verbose {
        "debug"
    } else if g.quiet {
        "error"
    } else if show_progress {
        "warn"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_writer(io::stderr)
        .init();

    match &cli.command {
        Command::Scan { template } => {
            let tokens = lexprep::scan(template)
                .with_context(|| format!("Failed to scan {}", template.display()))?;
            if g.json {
                println!("{}", serde_json::to_string_pretty(&tokens)?);
            } else if tokens.is_empty() {
                eprintln!("{}", dim("No placeholders found."));
            } else {
                for t in &tokens {
                    println!("{t}");
                }
            }
        }

        Command::Manifest { template, title } => {
            let title = title.clone().unwrap_or_else(|| file_title(template));
            let draft = draft_manifest(template, &title)
                .with_context(|| format!("Failed to read {}", template.display()))?;
            for w in &draft.warnings {
                eprintln!("{} {w}", cyan("⚠"));
            }
            println!("{}", draft.manifest.to_json_pretty()?);
        }

        Command::Template(cmd) => {
            let store = open_store(g)?;
            run_template(cmd, &store, &build_config(g, None)?, g.json)?;
        }

        Command::Generate {
            template_id,
            values,
            context,
            doc_name,
            default_repeat,
            missing,
        } => {
            let store = open_store(g)?;
            let spinner = show_progress.then(CliProgressCallback::new);
            let progress = spinner.clone().map(|s| s as ProgressCallback);
            let mut config = build_config(g, progress)?;
            config.default_repeat_count = *default_repeat;
            config.missing_placeholder = (*missing).into();

            let ctx: Context = match (values, context) {
                (_, Some(path)) => {
                    let raw = tokio::fs::read_to_string(path)
                        .await
                        .with_context(|| format!("Failed to read context from {:?}", path))?;
                    serde_json::from_str(&raw).with_context(|| format!("{:?} is not a JSON context", path))?
                }
                (Some(path), None) => {
                    let raw = tokio::fs::read_to_string(path)
                        .await
                        .with_context(|| format!("Failed to read form values from {:?}", path))?;
                    let form = FormValues::from_json(&raw)?;
                    let template = store.get_template(*template_id)?;
                    context_from_values(&template, &form, &config)
                }
                (None, None) => {
                    let template = store.get_template(*template_id)?;
                    context_from_values(&template, &FormValues::new(), &config)
                }
            };

            let result = generate_case(&store, &config, *template_id, ctx, doc_name.as_deref()).await;
            if let Some(s) = &spinner {
                s.bar.finish_and_clear();
            }
            let case = match result {
                Ok(case) => case,
                Err(e) if e.is_configuration_error() => {
                    return Err(anyhow::Error::new(e).context("Generation is not possible on this machine"))
                }
                Err(e) => return Err(anyhow::Error::new(e).context("Generation failed")),
            };

            if g.json {
                println!("{}", serde_json::to_string_pretty(&case)?);
            } else if !g.quiet {
                eprintln!(
                    "{}  case #{}  {}",
                    green("✔"),
                    bold(&case.case_id.to_string()),
                    dim(&format!("via {}", case.engine))
                );
                println!("{}", case.filled_path.display());
                println!("{}", case.converted_path.display());
            }
        }

        Command::Cases(cmd) => {
            let store = open_store(g)?;
            run_cases(cmd, &store, g.json, g.quiet)?;
        }

        Command::Engines => {
            let config = build_config(g, None)?;
            let statuses = available_engines(&config);
            if g.json {
                println!("{}", serde_json::to_string_pretty(&statuses)?);
            } else {
                for s in &statuses {
                    println!(
                        "{} {:<8} {}",
                        if s.available { green("✓") } else { red("✗") },
                        s.name,
                        dim(&s.role.to_string())
                    );
                }
                if !statuses.iter().any(|s| s.available) {
                    eprintln!(
                        "{} no converter available; install LibreOffice or pandoc",
                        red("✘")
                    );
                }
            }
        }
    }

    Ok(())
}

fn run_template(cmd: &TemplateCommand, store: &SqliteStore, config: &GenerationConfig, json: bool) -> Result<()> {
    match cmd {
        TemplateCommand::Add {
            file,
            name,
            description,
            manifest,
        } => {
            let edited = match manifest {
                Some(path) => {
                    let raw = std::fs::read_to_string(path)
                        .with_context(|| format!("Failed to read manifest from {:?}", path))?;
                    Some(Manifest::from_json(&raw)?)
                }
                None => None,
            };
            let record = save_template(store, config, name, description.as_deref(), file, edited)
                .with_context(|| format!("Failed to save template {}", file.display()))?;
            if json {
                println!("{}", serde_json::to_string_pretty(&record)?);
            } else {
                eprintln!(
                    "{}  template #{} {}  {}",
                    green("✔"),
                    record.id,
                    bold(&record.name),
                    dim(&format!("{} field(s)", record.manifest.field_count()))
                );
            }
        }
        TemplateCommand::List { all } => {
            let templates = store.list_templates(!all)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&templates)?);
            } else {
                for t in &templates {
                    println!(
                        "#{:<4} {:<32} {} {}",
                        t.id,
                        t.name,
                        dim(&t.created_at.format("%Y-%m-%d %H:%M").to_string()),
                        if t.is_active { String::new() } else { red("archived") }
                    );
                }
            }
        }
        TemplateCommand::Archive { id } => {
            archive_template(store, *id)?;
            if !json {
                eprintln!("{}  template #{id} archived", green("✔"));
            }
        }
    }
    Ok(())
}

fn run_cases(cmd: &CasesCommand, store: &SqliteStore, json: bool, quiet: bool) -> Result<()> {
    match cmd {
        CasesCommand::List => {
            let cases = store.list_cases()?;
            if json {
                println!("{}", serde_json::to_string_pretty(&cases)?);
            } else {
                for c in &cases {
                    println!(
                        "#{:<4} {:<32} {:<24} {}",
                        c.id,
                        c.doc_name.as_deref().unwrap_or("(unnamed)"),
                        c.template_name,
                        dim(&c.created_at.format("%Y-%m-%d %H:%M").to_string())
                    );
                }
            }
        }
        CasesCommand::Delete { id } => {
            let removed = delete_case(store, *id)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&removed)?);
            } else if !quiet {
                eprintln!("{}  case #{} deleted", green("✔"), removed.id);
            }
        }
    }
    Ok(())
}

fn open_store(g: &GlobalArgs) -> Result<SqliteStore> {
    SqliteStore::open(&g.db).with_context(|| format!("Failed to open database {}", g.db.display()))
}

/// Map CLI args to `GenerationConfig`.
fn build_config(g: &GlobalArgs, progress: Option<ProgressCallback>) -> Result<GenerationConfig> {
    let mut builder = GenerationConfig::builder()
        .output_dir(&g.output_dir)
        .templates_dir(&g.templates_dir)
        .engine_order(g.engines.iter().copied().map(EngineKind::from).collect())
        .min_fallback_text_len(g.min_text_len);

    if let Some(ref p) = g.soffice {
        builder = builder.soffice_path(p);
    }
    if let Some(ref p) = g.pandoc {
        builder = builder.pandoc_path(p);
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}

fn file_title(path: &std::path::Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "Untitled".to_string())
}
