//! Inspect BINA-family container files.
//!
//! Detects the header dialect of each file, prints the header summary and
//! the resolved relocation table, and optionally decodes one record at an
//! offset from the base.

mod report;

use std::{
    fs::File,
    io::BufReader,
    path::{Path, PathBuf},
    process::ExitCode,
};

use bina::{AnyHeader, Container, FieldType};
use clap::{Parser, ValueEnum};

use crate::report::Report;

#[derive(Debug, Clone, Copy, Default, ValueEnum)]
enum Format {
    #[default]
    Text,
    Json,
}

/// Field types of a record, parsed from a comma separated list.
#[derive(Debug, Clone)]
struct Layout(Vec<FieldType>);

fn parse_layout(s: &str) -> Result<Layout, bina::Error> {
    bina::parse_layout(s).map(Layout)
}

/// Accept decimal or `0x`-prefixed hexadecimal offsets.
fn parse_offset(s: &str) -> Result<u64, String> {
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => s.parse(),
    };
    parsed.map_err(|e| format!("invalid offset '{s}': {e}"))
}

#[derive(Parser)]
#[command(about = "Inspect BINA, PACx, Gens and Mirage container files")]
struct CliArgs {
    /// Container files to inspect.
    #[arg(required = true)]
    files: Vec<PathBuf>,

    /// Output format.
    #[arg(long, value_enum, default_value_t = Format::default())]
    format: Format,

    /// Decode a record with these field types (e.g. `string,u32,vec3`).
    #[arg(long, value_parser = parse_layout)]
    record: Option<Layout>,

    /// Record offset from the base offset.
    #[arg(long, value_parser = parse_offset, default_value = "0", requires = "record")]
    at: u64,
}

fn inspect(path: &Path, args: &CliArgs) -> bina::Result<Report> {
    let file = BufReader::new(File::open(path)?);
    let mut container = Container::<_, AnyHeader>::open(file)?;
    let relocations = container.resolve_offsets()?;

    let record = match &args.record {
        Some(Layout(layout)) => {
            let reader = container.reader();
            reader.jump_to_offset(args.at)?;
            Some(reader.read_record(layout)?)
        }
        None => None,
    };

    Ok(Report::new(path, container.header(), &relocations, record))
}

fn main() -> ExitCode {
    {
        use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
        tracing_subscriber::registry()
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .with(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
            )
            .init();
    }

    let args = CliArgs::parse();
    let mut failed = 0usize;
    let mut reports = Vec::new();

    for path in &args.files {
        match inspect(path, &args) {
            Ok(report) => {
                if let Format::Text = args.format {
                    print!("{report}");
                }
                reports.push(report);
            }
            Err(e) => {
                tracing::error!(path = %path.display(), "{e}");
                failed += 1;
            }
        }
    }

    if let Format::Json = args.format {
        match serde_json::to_string_pretty(&reports) {
            Ok(json) => println!("{json}"),
            Err(e) => {
                tracing::error!("failed to serialize report: {e}");
                return ExitCode::FAILURE;
            }
        }
    }

    if failed > 0 {
        tracing::warn!(failed, total = args.files.len(), "some files could not be read");
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}
