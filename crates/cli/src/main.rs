mod cmd;
mod output;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use crate::output::{OutputFormat, print_error};

/// Build, version and publish course material
#[derive(Parser)]
#[command(name = "coursepress")]
#[command(author, version, about, long_about = None)]
struct Cli {
  /// Enable debug logging
  #[arg(short, long, global = true)]
  verbose: bool,

  /// Settings file
  #[arg(long, global = true, env = "COURSEPRESS_CONFIG")]
  config: Option<PathBuf>,

  #[command(subcommand)]
  command: Commands,
}

#[derive(Subcommand)]
enum Commands {
  /// Build a new version of a course
  Build {
    /// Course key
    course: String,

    /// Build from this directory instead of the course's configured source
    #[arg(long)]
    source: Option<PathBuf>,

    /// Take the fetched sources as the built tree
    #[arg(long)]
    skip_build: bool,

    /// Build image, replacing the one in apps.meta
    #[arg(long)]
    image: Option<String>,

    /// Build command; only used together with --image
    #[arg(long, requires = "image")]
    command: Option<String>,

    /// Store the build but leave publishing to `coursepress publish`
    #[arg(long)]
    no_publish: bool,

    #[arg(short, long, value_enum, default_value_t)]
    output: OutputFormat,
  },

  /// Publish a stored version
  Publish {
    /// Course key
    course: String,

    /// Version to publish (default: the stored one, else the live one)
    #[arg(long)]
    version: Option<u64>,

    #[arg(short, long, value_enum, default_value_t)]
    output: OutputFormat,
  },

  /// Show course state
  Status {
    /// Course key (default: every configured course)
    course: Option<String>,

    #[arg(short, long, value_enum, default_value_t)]
    output: OutputFormat,
  },

  /// Print the log of a build
  Log {
    /// Course key
    course: String,

    /// Version (default: the latest build)
    #[arg(long)]
    version: Option<u64>,
  },

  /// Put the previous live version back
  Rollback {
    /// Course key
    course: String,
  },

  /// Remove abandoned staging trees, old retired trees and old records
  Gc {
    #[arg(short, long, value_enum, default_value_t)]
    output: OutputFormat,
  },
}

fn main() {
  let cli = Cli::parse();

  let default_level = if cli.verbose { "debug" } else { "warn" };
  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
  tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_writer(std::io::stderr)
    .without_time()
    .init();

  let result = cmd::load_settings(cli.config.as_deref()).and_then(|settings| match cli.command {
    Commands::Build {
      course,
      source,
      skip_build,
      image,
      command,
      no_publish,
      output,
    } => cmd::cmd_build(
      settings,
      &course,
      cmd::BuildArgs {
        source,
        skip_build,
        image,
        command,
        no_publish,
      },
      output,
    ),
    Commands::Publish {
      course,
      version,
      output,
    } => cmd::cmd_publish(settings, &course, version, output),
    Commands::Status { course, output } => cmd::cmd_status(settings, course.as_deref(), output),
    Commands::Log { course, version } => cmd::cmd_log(settings, &course, version),
    Commands::Rollback { course } => cmd::cmd_rollback(settings, &course),
    Commands::Gc { output } => cmd::cmd_gc(settings, output),
  });

  if let Err(e) = result {
    print_error(&format!("{:#}", e));
    std::process::exit(1);
  }
}
