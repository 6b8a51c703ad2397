use std::path::PathBuf;
use std::process;

use clap::Parser;
use descent::{ParserConfig, Severity, compile};
use tracing::error;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "descent")]
#[command(about = "Translate a program and print the generated listing")]
struct Cli {
  /// Program text to translate
  #[arg(required_unless_present = "file", conflicts_with = "file")]
  source: Option<String>,

  /// Read the program from a file instead
  #[arg(long, short)]
  file: Option<PathBuf>,

  /// Report missing brackets and terminators as warnings
  #[arg(long)]
  lenient_structure: bool,

  /// Do not print warnings and notes
  #[arg(long, short)]
  quiet: bool,
}

fn main() {
  tracing_subscriber::registry()
    .with(
      tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "descent=warn".into()),
    )
    .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
    .init();

  let cli = Cli::parse();

  let source = match &cli.file {
    Some(path) => match std::fs::read_to_string(path) {
      Ok(text) => text,
      Err(err) => {
        error!("cannot read {}: {err}", path.display());
        process::exit(1);
      }
    },
    None => cli.source.clone().unwrap_or_default(),
  };

  let config = if cli.lenient_structure {
    ParserConfig::lenient()
  } else {
    ParserConfig::default()
  };

  let compilation = match compile(&source, config) {
    Ok(compilation) => compilation,
    Err(err) => {
      eprintln!("{err}");
      process::exit(1);
    }
  };

  for diagnostic in compilation.diagnostics.entries() {
    if cli.quiet && diagnostic.severity < Severity::Error {
      continue;
    }
    eprintln!("{}", diagnostic.render(&source));
  }

  if !compilation.accepted {
    process::exit(1);
  }
  print!("{}", compilation.module);
}
