use std::env;
use std::path::PathBuf;

use clap::{Parser, ValueEnum};
use flexi_logger::{Duplicate, FileSpec, Logger, LoggerHandle};
use log::{debug, info};

use encapsulate::{
  default_format, run, EncapsulateBuilder, EncapsulateError, EncapsulateExit, EncapsulateOption,
  IsolationStep,
};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
  #[arg(help = "Directories kept writable, separated by '|' (empty for a read-only sandbox)")]
  writable: String,

  #[arg(
    help = "Command and its arguments",
    required = true,
    num_args = 1..,
    trailing_var_arg = true,
    allow_hyphen_values = true
  )]
  command: Vec<String>,

  #[arg(long, help = "Hide a directory behind an empty read-only mount")]
  hide: Vec<PathBuf>,

  #[arg(long, default_value_t = false, help = "Hide $HOME/.ssh and $HOME/.gnupg")]
  hide_credentials: bool,

  #[arg(long, default_value_t = false, help = "Detach the pid namespace as well")]
  unshare_pid: bool,

  #[arg(long, default_value_t = false, help = "Keep the host network namespace")]
  share_net: bool,

  #[arg(long, value_enum, help = "Abort when this isolation step fails")]
  strict: Vec<StrictStep>,

  #[arg(long, help = "Kill the sandboxed command after this many seconds")]
  timeout: Option<u32>,

  #[arg(long, help = "Lower the priority of the sandboxed command")]
  nice: Option<i32>,

  #[arg(long, default_value_t = false)]
  verbose: bool,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum StrictStep {
  Namespaces,
  Hiding,
  Elevation,
  All,
}

impl Cli {
  fn resolve(self) -> Result<EncapsulateOption, EncapsulateError> {
    let mut command = self.command.into_iter();
    let program = command
      .next()
      .ok_or(EncapsulateError::cli("Missing command"))?;

    let mut builder = EncapsulateBuilder::new(program, command.collect())
      .parse_writable_spec(&self.writable)
      .hide_list(self.hide)
      .set_hide_credentials(self.hide_credentials)
      .set_unshare_pid(self.unshare_pid)
      .set_share_network(self.share_net)
      .set_timeout(self.timeout)
      .set_nice(self.nice);

    for step in self.strict {
      let steps = match step {
        StrictStep::Namespaces => vec![IsolationStep::Namespaces],
        StrictStep::Hiding => vec![IsolationStep::Hiding],
        StrictStep::Elevation => vec![IsolationStep::Elevation],
        StrictStep::All => vec![
          IsolationStep::Namespaces,
          IsolationStep::Hiding,
          IsolationStep::Elevation,
        ],
      };
      for step in steps {
        builder = builder.strict(step);
      }
    }

    Ok(builder.build())
  }
}

fn start_logger(verbose: bool) -> Result<LoggerHandle, EncapsulateError> {
  let default_spec = if verbose {
    "encapsulate=debug"
  } else {
    "encapsulate=warn"
  };
  let spec = env::var("ENCAPSULATE_LOG").unwrap_or(default_spec.into());
  let logger = Logger::try_with_str(spec)?.format(default_format);

  let handle = match env::var("ENCAPSULATE_LOG_DIR") {
    Ok(dir) => logger
      .log_to_file(
        FileSpec::default()
          .directory(dir)
          .basename("encapsulate")
          .discriminant(format!("{}", chrono::offset::Local::now().format("%Y-%m-%d")))
          .suppress_timestamp(),
      )
      .append()
      .duplicate_to_stderr(Duplicate::Warn)
      .format_for_files(default_format)
      .start()?,
    Err(_) => logger.start()?,
  };
  Ok(handle)
}

fn start(cli: Cli) -> Result<i32, EncapsulateError> {
  let _logger = start_logger(cli.verbose)?;
  let option = cli.resolve()?;
  debug!("{:?}", option);

  info!("Start running encapsulate");
  let exit = run(&option)?;
  info!("Running encapsulate finished with status {}", exit.code());

  Ok(exit.code())
}

fn main() -> EncapsulateExit {
  let cli = Cli::parse();
  match start(cli) {
    Ok(status) => EncapsulateExit::Status(status),
    Err(err) => EncapsulateExit::Err(err),
  }
}
