use std::{
  error::Error,
  fmt::{Debug, Display},
  process::{ExitCode, Termination},
};

use flexi_logger::FlexiLoggerError;
use nix::{errno::Errno, libc::STDERR_FILENO, unistd::isatty};

/// Exit status for failures while building the sandbox
pub const EXIT_SETUP_FAILURE: i32 = 125;

/// Exit status when the target command exists but can not be executed
pub const EXIT_CANNOT_EXECUTE: i32 = 126;

/// Exit status when the target command can not be found
pub const EXIT_NOT_FOUND: i32 = 127;

pub enum EncapsulateError {
  Cli(String),
  Fork(String),
  Privilege(String),
  Namespace(String),
  Mount(String),
  Exec(Errno, String),
  Nix(Errno),
  Fs(String),
  Logger(FlexiLoggerError),
}

pub enum EncapsulateExit {
  Status(i32),
  Err(EncapsulateError),
}

impl EncapsulateError {
  pub fn cli<MS: Into<String>>(msg: MS) -> EncapsulateError {
    EncapsulateError::Cli(msg.into())
  }

  pub fn fork<MS: Into<String>>(msg: MS) -> EncapsulateError {
    EncapsulateError::Fork(msg.into())
  }

  pub fn privilege<MS: Into<String>>(msg: MS) -> EncapsulateError {
    EncapsulateError::Privilege(msg.into())
  }

  pub fn namespace<MS: Into<String>>(msg: MS) -> EncapsulateError {
    EncapsulateError::Namespace(msg.into())
  }

  pub fn mount<MS: Into<String>>(msg: MS) -> EncapsulateError {
    EncapsulateError::Mount(msg.into())
  }

  pub fn exec<MS: Into<String>>(errno: Errno, program: MS) -> EncapsulateError {
    EncapsulateError::Exec(errno, program.into())
  }

  pub fn fs<MS: Into<String>>(msg: MS) -> EncapsulateError {
    EncapsulateError::Fs(msg.into())
  }

  /// Status the process should exit with when this error ends it
  pub fn exit_code(&self) -> i32 {
    match self {
      EncapsulateError::Cli(_) => 2,
      EncapsulateError::Exec(Errno::ENOENT, _) => EXIT_NOT_FOUND,
      EncapsulateError::Exec(_, _) => EXIT_CANNOT_EXECUTE,
      _ => EXIT_SETUP_FAILURE,
    }
  }
}

impl Debug for EncapsulateError {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    std::fmt::Display::fmt(&self, f)
  }
}

impl Display for EncapsulateError {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match &self {
      EncapsulateError::Cli(msg) => f.write_fmt(format_args!("Encapsulate CLI Error: {}", msg)),
      EncapsulateError::Fork(msg) => f.write_fmt(format_args!("Encapsulate Fork Error: {}", msg)),
      EncapsulateError::Privilege(msg) => {
        f.write_fmt(format_args!("Encapsulate Privilege Error: {}", msg))
      }
      EncapsulateError::Namespace(msg) => {
        f.write_fmt(format_args!("Encapsulate Namespace Error: {}", msg))
      }
      EncapsulateError::Mount(msg) => f.write_fmt(format_args!("Encapsulate Mount Error: {}", msg)),
      EncapsulateError::Exec(errno, program) => f.write_fmt(format_args!(
        "Encapsulate Exec Error: {} ({})",
        program,
        errno.desc()
      )),
      EncapsulateError::Nix(errno) => f.write_fmt(format_args!("Encapsulate Nix Error: {}", errno)),
      EncapsulateError::Fs(msg) => {
        f.write_fmt(format_args!("Encapsulate File System Error: {}", msg))
      }
      EncapsulateError::Logger(err) => {
        f.write_fmt(format_args!("Encapsulate Logger Error: {}", err))
      }
    }
  }
}

impl From<Errno> for EncapsulateError {
  fn from(errno: Errno) -> Self {
    EncapsulateError::Nix(errno)
  }
}

impl From<std::io::Error> for EncapsulateError {
  fn from(err: std::io::Error) -> Self {
    EncapsulateError::Fs(err.to_string())
  }
}

impl From<FlexiLoggerError> for EncapsulateError {
  fn from(err: FlexiLoggerError) -> Self {
    EncapsulateError::Logger(err)
  }
}

impl Error for EncapsulateError {}

impl Termination for EncapsulateExit {
  fn report(self) -> ExitCode {
    match self {
      EncapsulateExit::Status(status) => ExitCode::from(status.clamp(0, 255) as u8),
      EncapsulateExit::Err(err) => {
        let text = format!("{}", err);
        let text = match text.split_once(": ") {
          Some((prefix, message)) => {
            let is_tty = isatty(STDERR_FILENO).unwrap_or(false);
            if is_tty {
              format!("\x1b[1m\x1b[91m{}\x1b[39m\x1b[22m  {}", prefix, message)
            } else {
              format!(
                "{{\n  \"ok\": false,\n  \"type\": \"{}\",\n  \"message\": \"{}\"\n}}",
                prefix,
                message.replace('\\', "\\\\").replace('"', "\\\"")
              )
            }
          }
          None => text,
        };
        eprintln!("{}", text);
        ExitCode::from(err.exit_code() as u8)
      }
    }
  }
}
