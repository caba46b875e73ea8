#![allow(dead_code)]

use std::process::{Command, Stdio};
use std::sync::Once;

use flexi_logger::Logger;
use log::info;
use nix::unistd::Uid;

static INIT: Once = Once::new();

pub fn setup() {
  INIT.call_once(|| {
    Logger::try_with_str("encapsulate=debug,info")
      .unwrap()
      .start()
      .unwrap();
  });
}

pub fn encapsulate() -> Command {
  Command::new(env!("CARGO_BIN_EXE_encapsulate"))
}

/// Building a sandbox needs root and a kernel that lets us unshare and mount
pub fn sandbox_available() -> bool {
  if !Uid::effective().is_root() {
    info!("Skip sandbox test: not running as root");
    return false;
  }
  let status = encapsulate()
    .args(["", "true"])
    .stdout(Stdio::null())
    .stderr(Stdio::null())
    .status();
  match status {
    Ok(status) if status.success() => true,
    _ => {
      info!("Skip sandbox test: sandbox can not be built here");
      false
    }
  }
}
