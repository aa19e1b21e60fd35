//! roll-table CLI
//!
//! Command-line tool for rolling on CSV roll tables and resolving their
//! `${...}` expressions.

mod output;

use clap::{Args, Parser};
use rt_core::{TableManager, DEFAULT_DEPTH};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "roll-table")]
#[command(about = "Roll on CSV roll tables", long_about = None)]
#[command(version)]
struct Cli {
    /// Path to csv file
    path: PathBuf,

    /// Field names to print; case-sensitive
    fields: Vec<String>,

    /// Repeat the roll i times
    #[arg(short, long, value_name = "i", default_value_t = 1)]
    number: usize,

    /// Maximum number of resolution passes
    #[arg(long, value_name = "n", default_value_t = DEFAULT_DEPTH)]
    depth: usize,

    /// Seed for reproducible rolls
    #[arg(long)]
    seed: Option<u64>,

    /// Log level; overrides ROLL_TABLE_LOG
    #[arg(
        long,
        value_name = "level",
        env = "ROLL_TABLE_LOG",
        value_parser = ["trace", "debug", "info", "warn", "error"]
    )]
    log: Option<String>,

    #[command(flatten)]
    format: Format,
}

#[derive(Args)]
#[group(multiple = false)]
struct Format {
    /// Print output in fixed-width columns
    #[arg(short, long)]
    column: bool,

    /// Print output in Markdown table format
    #[arg(short, long)]
    markdown: bool,

    /// Print a histogram of the values of each field
    #[arg(short = 'g', long)]
    histogram: bool,

    /// Print rolled rows as JSON
    #[arg(short, long)]
    json: bool,
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.log.as_deref());

    match run(&cli) {
        Ok(output) => println!("{}", output),
        Err(e) => {
            eprintln!("{}: {}", e.kind_name(), e);
            std::process::exit(1);
        }
    }
}

fn init_logging(level: Option<&str>) {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(level.unwrap_or("warn")))
        .with_writer(std::io::stderr)
        .with_target(false)
        .without_time()
        .compact()
        .init();
}

fn run(cli: &Cli) -> rt_core::Result<String> {
    let mut tm = match cli.seed {
        Some(seed) => TableManager::new().with_seed(seed),
        None => TableManager::new(),
    };

    let table = tm.get_table(&cli.path)?;
    let fields: Vec<String> = if cli.fields.is_empty() {
        table.user_fields().into_iter().map(str::to_string).collect()
    } else {
        table.check_fields(&cli.fields)?;
        cli.fields.clone()
    };

    let mut rows = Vec::with_capacity(cli.number);
    for _ in 0..cli.number {
        rows.push(tm.roll_resolve(&cli.path, cli.depth)?);
    }

    let format = &cli.format;
    let output = if format.column {
        output::columnated_output(&rows, &fields, false)
    } else if format.markdown {
        output::columnated_output(&rows, &fields, true)
    } else if format.histogram {
        output::histogram_output(&rows, &fields)
    } else if format.json {
        output::json_output(&rows, &fields)?
    } else {
        output::default_output(&rows, &fields)
    };

    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_output_modes_conflict() {
        let result = Cli::try_parse_from(["roll-table", "t.csv", "-c", "-m"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_fields_and_flags() {
        let cli = Cli::try_parse_from(["roll-table", "t.csv", "name", "hp", "-n", "3", "--seed", "9"]).unwrap();
        assert_eq!(cli.fields, vec!["name", "hp"]);
        assert_eq!(cli.number, 3);
        assert_eq!(cli.seed, Some(9));
        assert_eq!(cli.depth, DEFAULT_DEPTH);
    }
}
