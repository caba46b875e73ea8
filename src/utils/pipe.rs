use std::os::unix::prelude::RawFd;

use nix::{
  errno::Errno,
  fcntl::OFlag,
  unistd::{self, close, pipe2},
};

use crate::error::EncapsulateError;

/// Channel from the sandboxed child back to the supervisor.
///
/// Both ends are close-on-exec, so a successful exec of the target closes the write end
/// without a message and the supervisor reads nothing.
pub struct ReportPipe(RawFd, RawFd);

pub struct ReportReadPipe(RawFd);

pub struct ReportWritePipe(RawFd);

impl ReportPipe {
  pub fn new() -> Result<Self, EncapsulateError> {
    let result = pipe2(OFlag::O_CLOEXEC | OFlag::O_NONBLOCK)?;
    Ok(ReportPipe(result.0, result.1))
  }

  pub fn read(self) -> Result<ReportReadPipe, EncapsulateError> {
    close(self.1)?;
    Ok(ReportReadPipe(self.0))
  }

  pub fn write(self) -> Result<ReportWritePipe, EncapsulateError> {
    close(self.0)?;
    Ok(ReportWritePipe(self.1))
  }
}

impl ReportReadPipe {
  /// Read the report, `None` when the child never wrote one
  pub fn read(&self) -> Result<Option<String>, EncapsulateError> {
    let mut buf = vec![0 as u8; 512];
    let size = match unistd::read(self.0, buf.as_mut_slice()) {
      Ok(size) => size,
      Err(Errno::EAGAIN) => 0,
      Err(err) => return Err(err.into()),
    };
    let buf = buf
      .into_iter()
      .take(size)
      .take_while(|b| *b != 0)
      .collect::<Vec<u8>>();
    if buf.is_empty() {
      Ok(None)
    } else {
      Ok(Some(String::from_utf8_lossy(&buf).into_owned()))
    }
  }
}

impl Drop for ReportReadPipe {
  fn drop(&mut self) {
    let _ = close(self.0);
  }
}

impl ReportWritePipe {
  pub fn write<S: Into<String>>(&self, text: S) -> Result<usize, EncapsulateError> {
    let text: String = text.into();
    let mut bytes = text.into_bytes();
    bytes.push(0);
    let size = unistd::write(self.0, &bytes)?;
    Ok(size)
  }
}

impl Drop for ReportWritePipe {
  fn drop(&mut self) {
    let _ = close(self.0);
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn it_should_carry_a_report() {
    let pipe = ReportPipe::new().unwrap();
    let (r, w) = (pipe.0, pipe.1);
    let reader = ReportReadPipe(r);
    let writer = ReportWritePipe(w);
    writer.write("mount failed").unwrap();
    drop(writer);
    assert_eq!(reader.read().unwrap(), Some("mount failed".to_string()));
  }

  #[test]
  fn it_should_read_nothing_from_silent_child() {
    let pipe = ReportPipe::new().unwrap();
    let (r, w) = (pipe.0, pipe.1);
    let reader = ReportReadPipe(r);
    let writer = ReportWritePipe(w);
    assert_eq!(reader.read().unwrap(), None);
    drop(writer);
    assert_eq!(reader.read().unwrap(), None);
  }
}
