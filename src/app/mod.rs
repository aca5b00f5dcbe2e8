use anyhow::{Context, Result, anyhow};
use clap::{Args, Parser, Subcommand};
use rayon::prelude::*;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use filtration::config::Settings;
use filtration::{
    BooleanNode, compile_query, decode_query_string, evaluate_filter, parse_filter,
};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Settings file (YAML, TOML or JSON)
    #[arg(short, long, global = true, env = "FILTRATION_CONFIG")]
    pub config: Option<PathBuf>,

    /// Number of threads for `filter` (default: all cores)
    #[arg(short, long, global = true)]
    pub threads: Option<usize>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Parse a filter and print it back in normalized form
    Check {
        #[command(flatten)]
        filter: FilterArg,
    },

    /// Evaluate a filter against one context document
    Eval {
        #[command(flatten)]
        filter: FilterArg,

        /// Context file (.json, .yaml, .yml); stdin JSON if omitted
        #[arg(long, conflicts_with = "context_json")]
        context: Option<PathBuf>,

        /// Context as an inline JSON document
        #[arg(long)]
        context_json: Option<String>,

        /// Exit with status 0 even when the filter does not match
        #[arg(long)]
        no_exit_code: bool,
    },

    /// Print the JSON Lines records that match a filter
    Filter {
        #[command(flatten)]
        filter: FilterArg,

        /// Input JSON Lines file (default: stdin)
        #[arg(short, long)]
        input: Option<PathBuf>,

        /// Output file (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Fail on the first record that cannot be evaluated
        #[arg(long)]
        strict: bool,
    },

    /// Compile a filter into a MongoDB-style query document
    Compile {
        #[command(flatten)]
        filter: FilterArg,

        #[arg(long)]
        pretty: bool,
    },

    /// Turn a `field__op=value&...` query string into filter source
    Decode {
        query_string: String,

        /// Print the compiled query instead of the filter source
        #[arg(long)]
        compile: bool,

        #[arg(long)]
        pretty: bool,
    },
}

#[derive(Args)]
pub struct FilterArg {
    /// Filter source, e.g. "src in 10.0.0.0/8 and not blocked"
    #[arg(required_unless_present = "named", conflicts_with = "named")]
    pub source: Option<String>,

    /// Use a named filter from the settings file
    #[arg(long)]
    pub named: Option<String>,
}

impl FilterArg {
    pub fn parse(&self, settings: &Settings) -> Result<BooleanNode> {
        let source = match (&self.source, &self.named) {
            (Some(source), _) => source.as_str(),
            (None, Some(name)) => settings
                .filter(name)
                .with_context(|| format!("CLI: No filter named '{}' in settings", name))?,
            (None, None) => return Err(anyhow!("CLI: No filter given")),
        };
        parse_filter(source).with_context(|| format!("CLI: Failed to parse filter '{}'", source))
    }
}

pub fn run(cli: &Cli, settings: &Settings) -> Result<ExitCode> {
    match &cli.command {
        Command::Check { filter } => {
            let ast = filter.parse(settings)?;
            println!("{}", ast);
            Ok(ExitCode::SUCCESS)
        }

        Command::Eval {
            filter,
            context,
            context_json,
            no_exit_code,
        } => {
            let ast = filter.parse(settings)?;
            let ctx = load_context(context.as_deref(), context_json.as_deref())?;
            let matched = evaluate_filter(&ast, &ctx).context("Eval: Failed to evaluate filter")?;
            println!("{}", matched);
            Ok(if matched || *no_exit_code {
                ExitCode::SUCCESS
            } else {
                ExitCode::from(1)
            })
        }

        Command::Filter {
            filter,
            input,
            output,
            strict,
        } => {
            let ast = filter.parse(settings)?;
            filter_records(&ast, input.as_deref(), output.as_deref(), *strict)?;
            Ok(ExitCode::SUCCESS)
        }

        Command::Compile { filter, pretty } => {
            let ast = filter.parse(settings)?;
            let query =
                compile_query(&ast, &settings.query).context("CLI: Failed to compile query")?;
            print_json(&query.to_json(&settings.query.operator_prefix), *pretty)?;
            Ok(ExitCode::SUCCESS)
        }

        Command::Decode {
            query_string,
            compile,
            pretty,
        } => {
            let source =
                decode_query_string(query_string).context("CLI: Failed to decode query string")?;
            if *compile {
                let ast = parse_filter(&source)
                    .with_context(|| format!("CLI: Decoded filter '{}' does not parse", source))?;
                let query =
                    compile_query(&ast, &settings.query).context("CLI: Failed to compile query")?;
                print_json(&query.to_json(&settings.query.operator_prefix), *pretty)?;
            } else {
                println!("{}", source);
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn print_json(value: &serde_json::Value, pretty: bool) -> Result<()> {
    let text = if pretty {
        serde_json::to_string_pretty(value)?
    } else {
        serde_json::to_string(value)?
    };
    println!("{}", text);
    Ok(())
}

/// Read the evaluation context from a file, an inline string or stdin.
pub fn load_context(path: Option<&Path>, inline: Option<&str>) -> Result<serde_json::Value> {
    if let Some(inline) = inline {
        return serde_json::from_str(inline).context("CLI: Invalid --context-json document");
    }

    let Some(path) = path else {
        let text = io::read_to_string(io::stdin()).context("CLI: Failed to read stdin")?;
        return serde_json::from_str(&text).context("CLI: Invalid JSON context on stdin");
    };

    let text = std::fs::read_to_string(path)
        .with_context(|| format!("CLI: Failed to read context {}", path.display()))?;
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());
    match ext.as_deref() {
        Some("yaml") | Some("yml") => serde_yaml::from_str(&text)
            .with_context(|| format!("CLI: Invalid YAML context {}", path.display())),
        _ => serde_json::from_str(&text)
            .with_context(|| format!("CLI: Invalid JSON context {}", path.display())),
    }
}

fn match_record(ast: &BooleanNode, line: &str) -> Result<bool> {
    let record: serde_json::Value = serde_json::from_str(line)?;
    Ok(evaluate_filter(ast, &record)?)
}

/// Evaluate every JSON Lines record in parallel and write the matches in
/// input order. Returns the number of matches.
pub fn filter_records(
    ast: &BooleanNode,
    input: Option<&Path>,
    output: Option<&Path>,
    strict: bool,
) -> Result<usize> {
    let text = match input {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("CLI: Failed to read input {}", path.display()))?,
        None => io::read_to_string(io::stdin()).context("CLI: Failed to read stdin")?,
    };

    let records: Vec<(usize, &str)> = text
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .collect();

    let results: Vec<Result<bool>> = records
        .par_iter()
        .map(|(idx, line)| {
            match_record(ast, line).with_context(|| format!("Eval: Record on line {}", idx + 1))
        })
        .collect();

    let mut writer: Box<dyn Write> = match output {
        Some(path) => Box::new(BufWriter::new(File::create(path).with_context(|| {
            format!("CLI: Failed to create output {}", path.display())
        })?)),
        None => Box::new(BufWriter::new(io::stdout().lock())),
    };

    let mut matched = 0usize;
    let mut skipped = 0usize;
    for ((_, line), result) in records.iter().zip(results) {
        match result {
            Ok(true) => {
                writeln!(writer, "{}", line)?;
                matched += 1;
            }
            Ok(false) => {}
            Err(e) if !strict => {
                tracing::warn!("Skipping record: {:#}", e);
                skipped += 1;
            }
            Err(e) => return Err(e),
        }
    }
    writer.flush().context("CLI: Failed to flush output")?;

    tracing::info!(
        "Filtered {} records: {} matched, {} skipped",
        records.len(),
        matched,
        skipped
    );
    Ok(matched)
}
