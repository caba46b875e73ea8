use std::ffi::{CString, OsStr};
use std::os::unix::ffi::OsStrExt;

use flexi_logger::DeferredNow;
use log::Record;

pub use pipe::{ReportPipe, ReportReadPipe, ReportWritePipe};

use crate::EncapsulateError;

pub mod mountinfo;
pub mod pipe;

/// A logline-formatter that produces log lines like <br>
/// ```[datetime: INFO] Isolation root created at /tmp/encapsulate.x1Yz0a```
pub fn default_format(
  w: &mut dyn std::io::Write,
  now: &mut DeferredNow,
  record: &Record,
) -> Result<(), std::io::Error> {
  write!(
    w,
    "[{}: {:5}] {}",
    now.format("%Y-%m-%d %H:%M:%S"),
    record.level(),
    record.args()
  )
}

pub(crate) fn into_c_string<S: AsRef<OsStr>>(text: S) -> Result<CString, EncapsulateError> {
  let text = text.as_ref();
  CString::new(text.as_bytes()).map_err(|_| {
    EncapsulateError::cli(format!(
      "{} contains an interior nul byte",
      text.to_string_lossy()
    ))
  })
}
