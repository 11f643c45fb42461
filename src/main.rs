//! CLI entry point for `i18nmail`.

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::Context;
use clap::{CommandFactory, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;

use i18nmail::config::Config;
use i18nmail::parser::header::{head_decode, skip_from_line};
use i18nmail::{MailPart, Visit, Walker};

#[derive(Parser)]
#[command(name = "i18nmail", version, about = "Walk, inspect and extract MIME mail")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Verbose logging (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// List the leaf parts of a message
    Walk {
        /// Message file (`-` for stdin)
        path: PathBuf,
        #[arg(long)]
        json: bool,
        /// List top-level parts only
        #[arg(long)]
        no_descend: bool,
        /// Maximum container nesting
        #[arg(long)]
        max_depth: Option<usize>,
        /// Do not unwrap S/MIME parts
        #[arg(long)]
        no_smime: bool,
    },
    /// Write every leaf part of a message to a directory
    Extract {
        path: PathBuf,
        #[arg(short, long)]
        output: PathBuf,
        #[arg(long)]
        no_descend: bool,
    },
    /// Print the decoded top-level headers of a message
    Headers {
        path: PathBuf,
        #[arg(long)]
        json: bool,
    },
    /// Decode an RFC 2047 header value
    Decode { value: String },
    /// Generate a new Message-ID
    Msgid {
        #[arg(short = 'n', long, default_value_t = 1)]
        count: usize,
    },
    /// Generate shell completions
    Completions {
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
    /// Generate a man page
    Manpage,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let config = i18nmail::config::load_config();

    // Configure logging: stderr + optional log file
    let log_level = match cli.verbose {
        0 => config.general.log_level.as_str(),
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    setup_logging(log_level, &config);

    match cli.command {
        Commands::Walk {
            path,
            json,
            no_descend,
            max_depth,
            no_smime,
        } => {
            let mut walker = Walker::from_config(&config);
            if no_descend {
                walker = walker.dont_descend(true);
            }
            if let Some(depth) = max_depth {
                walker = walker.max_depth(depth);
            }
            if no_smime {
                walker = walker.smime(None);
            }
            cmd_walk(&walker, &path, json)
        }
        Commands::Extract {
            path,
            output,
            no_descend,
        } => {
            let walker =
                Walker::from_config(&config).dont_descend(no_descend || config.walk.dont_descend);
            cmd_extract(&walker, &path, &output, &config)
        }
        Commands::Headers { path, json } => cmd_headers(&path, json, &config),
        Commands::Decode { value } => {
            println!("{}", head_decode(&value));
            Ok(())
        }
        Commands::Msgid { count } => {
            for _ in 0..count {
                println!("{}", i18nmail::msgid::make_msg_id());
            }
            Ok(())
        }
        Commands::Completions { shell } => cmd_completions(shell),
        Commands::Manpage => cmd_manpage(),
    }
}

/// Set up tracing with stderr output and optional file logging.
fn setup_logging(level: &str, config: &Config) {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    let stderr_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);

    // Try to set up file logging
    let log_path = i18nmail::config::log_file_path(config);
    let log_dir = i18nmail::config::cache_dir(config);
    let log_name = log_path.file_name().unwrap_or_default();
    if std::fs::create_dir_all(&log_dir).is_ok() {
        let file_appender = tracing_appender::rolling::never(&log_dir, log_name);
        let file_layer = tracing_subscriber::fmt::layer()
            .with_ansi(false)
            .with_writer(file_appender);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(stderr_layer)
            .with(file_layer)
            .init();
    } else {
        // Fall back to stderr only
        tracing_subscriber::registry()
            .with(env_filter)
            .with(stderr_layer)
            .init();
    }
}

/// Open a message file, or stdin for `-`.
fn open_input(path: &Path) -> anyhow::Result<Box<dyn Read>> {
    if path.as_os_str() == "-" {
        return Ok(Box::new(std::io::stdin().lock()));
    }
    let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
    Ok(Box::new(BufReader::new(file)))
}

/// One leaf, as printed by `walk`.
#[derive(Serialize)]
struct PartSummary {
    level: usize,
    seq: u64,
    content_type: String,
    file_name: String,
    name: String,
    size: u64,
    charset: Option<String>,
    hash: Option<String>,
}

impl PartSummary {
    fn new(part: &MailPart) -> Self {
        Self {
            level: part.level(),
            seq: part.seq(),
            content_type: part.content_type().to_string(),
            file_name: part.file_name(),
            name: i18nmail::walk::leaf_name(part),
            size: part.size(),
            charset: part.charset().map(str::to_string),
            hash: part.hash().map(str::to_string),
        }
    }
}

/// List the leaf parts of a message.
fn cmd_walk(walker: &Walker, path: &Path, json: bool) -> anyhow::Result<()> {
    let start = Instant::now();
    let mut parts = Vec::new();
    walker.walk(open_input(path)?, |part| {
        parts.push(PartSummary::new(&part));
        Ok(Visit::Continue)
    })?;
    let elapsed = start.elapsed();

    if json {
        let output = serde_json::json!({
            "file": path.display().to_string(),
            "part_count": parts.len(),
            "spills": walker.session().materializer().spills(),
            "parts": parts,
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    use humansize::{format_size, BINARY};

    println!();
    println!(
        "  {:<6} {:<6} {:<32} {:>10}  {}",
        "Level", "Seq", "Content-Type", "Size", "Name"
    );
    println!("  {}", "-".repeat(80));
    for part in &parts {
        let ct: String = part.content_type.chars().take(32).collect();
        println!(
            "  {:<6} {:<6} {:<32} {:>10}  {}",
            part.level,
            part.seq,
            ct,
            format_size(part.size, BINARY),
            part.name
        );
    }
    println!();
    println!(
        "  {} part(s) in {:.1} ms",
        parts.len(),
        elapsed.as_secs_f64() * 1000.0
    );
    println!();
    Ok(())
}

/// Extract every leaf part of a message.
fn cmd_extract(
    walker: &Walker,
    path: &Path,
    output: &Path,
    config: &Config,
) -> anyhow::Result<()> {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} Extracting {pos} part(s) {msg}")?,
    );

    let paths = i18nmail::export::parts::extract_parts(
        walker,
        open_input(path)?,
        output,
        config.extract.max_name_len,
        &|count, written| {
            pb.set_position(count as u64);
            pb.set_message(written.display().to_string());
        },
    )?;
    pb.finish_and_clear();

    println!(
        "  Extracted {} part(s) to {}",
        paths.len(),
        output.display()
    );
    Ok(())
}

/// Print the decoded top-level headers.
fn cmd_headers(path: &Path, json: bool, config: &Config) -> anyhow::Result<()> {
    let walker = Walker::from_config(config);
    let session = walker.session();
    let data = session.materializer().materialize(open_input(path)?)?;
    let part = MailPart::parse(session, skip_from_line(data.as_bytes()), None)?;

    if json {
        let fields: Vec<serde_json::Value> = part
            .header()
            .iter()
            .flat_map(|(name, values)| {
                values.iter().map(move |v| {
                    serde_json::json!({
                        "name": name,
                        "value": head_decode(v),
                    })
                })
            })
            .collect();
        let output = serde_json::json!({
            "content_type": part.content_type(),
            "from": part.addresses("From"),
            "to": part.addresses("To"),
            "cc": part.addresses("Cc"),
            "headers": fields,
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    for (name, values) in part.header().iter() {
        for value in values {
            println!("{name}: {}", head_decode(value));
        }
    }
    Ok(())
}

/// Generate shell completions and print to stdout.
fn cmd_completions(shell: clap_complete::Shell) -> anyhow::Result<()> {
    let mut cmd = Cli::command();
    clap_complete::generate(shell, &mut cmd, "i18nmail", &mut std::io::stdout());
    Ok(())
}

/// Generate a man page and print to stdout.
fn cmd_manpage() -> anyhow::Result<()> {
    let cmd = Cli::command();
    let man = clap_mangen::Man::new(cmd);
    let mut buf = Vec::new();
    man.render(&mut buf)?;
    std::io::Write::write_all(&mut std::io::stdout(), &buf)?;
    Ok(())
}
