use std::fs;
use std::path::Path;
use std::time::{Duration, Instant};

use log::info;
use nix::unistd::{getuid, Uid};
use tempfile::tempdir;

use encapsulate::{EXIT_NOT_FOUND, EXIT_SETUP_FAILURE};

mod common;

fn is_empty_dir(dir: &Path) -> bool {
  fs::read_dir(dir).unwrap().next().is_none()
}

#[test]
fn it_should_reject_missing_arguments() {
  common::setup();

  let tmp = tempdir().unwrap();
  let output = common::encapsulate().env("TMPDIR", tmp.path()).output().unwrap();
  assert_eq!(output.status.code(), Some(2));

  let output = common::encapsulate()
    .env("TMPDIR", tmp.path())
    .arg("/tmp")
    .output()
    .unwrap();
  assert_eq!(output.status.code(), Some(2));
  assert!(is_empty_dir(tmp.path()));
}

#[test]
fn it_should_fail_setup_on_missing_writable_path() {
  common::setup();

  let tmp = tempdir().unwrap();
  let marker = tmp.path().join("marker");
  let missing = tmp.path().join("missing");
  let output = common::encapsulate()
    .env("TMPDIR", tmp.path())
    .arg(missing.to_str().unwrap())
    .arg("touch")
    .arg(marker.to_str().unwrap())
    .output()
    .unwrap();

  info!("stderr: {}", String::from_utf8_lossy(&output.stderr));
  assert_eq!(output.status.code(), Some(EXIT_SETUP_FAILURE));
  assert!(!marker.exists());
  assert!(is_empty_dir(tmp.path()));
}

#[test]
fn it_should_keep_host_read_only() {
  common::setup();
  if !common::sandbox_available() {
    return;
  }

  let dir = tempdir().unwrap();
  let file = dir.path().join("escaped");
  let status = common::encapsulate()
    .args(["", "touch", file.to_str().unwrap()])
    .status()
    .unwrap();

  assert_ne!(status.code(), Some(0));
  assert!(!file.exists());
}

#[test]
fn it_should_write_through_writable_path() {
  common::setup();
  if !common::sandbox_available() {
    return;
  }

  let dir = tempdir().unwrap();
  let file = dir.path().join("file");
  let status = common::encapsulate()
    .arg(dir.path().to_str().unwrap())
    .arg("touch")
    .arg(file.to_str().unwrap())
    .status()
    .unwrap();

  assert_eq!(status.code(), Some(0));
  assert!(file.exists());
}

#[test]
fn it_should_accept_repeated_and_nested_writable_paths() {
  common::setup();
  if !common::sandbox_available() {
    return;
  }

  let dir = tempdir().unwrap();
  let nested = dir.path().join("nested");
  fs::create_dir(&nested).unwrap();
  let spec = format!(
    "{}|{}|{}",
    nested.to_str().unwrap(),
    dir.path().to_str().unwrap(),
    nested.to_str().unwrap()
  );
  let script = format!(
    "touch {}/a && touch {}/b",
    dir.path().to_str().unwrap(),
    nested.to_str().unwrap()
  );
  let status = common::encapsulate()
    .args([spec.as_str(), "sh", "-c", script.as_str()])
    .status()
    .unwrap();

  assert_eq!(status.code(), Some(0));
  assert!(dir.path().join("a").exists());
  assert!(nested.join("b").exists());
}

#[test]
fn it_should_hide_paths_as_empty_read_only_dirs() {
  common::setup();
  if !common::sandbox_available() {
    return;
  }

  let dir = tempdir().unwrap();
  let secret = dir.path().join("secret");
  fs::create_dir(&secret).unwrap();
  fs::write(secret.join("id_rsa"), "key").unwrap();

  let hidden = secret.to_str().unwrap();
  let script = format!(
    "test -d {0} && test -z \"$(ls -A {0})\" && ! touch {0}/new 2>/dev/null",
    hidden
  );
  let status = common::encapsulate()
    .arg(dir.path().to_str().unwrap())
    .args(["--hide", hidden])
    .args(["sh", "-c", script.as_str()])
    .status()
    .unwrap();

  assert_eq!(status.code(), Some(0));
  assert_eq!(fs::read_to_string(secret.join("id_rsa")).unwrap(), "key");
  assert!(!secret.join("new").exists());
}

#[test]
fn it_should_hide_credentials_under_home() {
  common::setup();
  if !common::sandbox_available() {
    return;
  }

  let home = tempdir().unwrap();
  let ssh = home.path().join(".ssh");
  fs::create_dir(&ssh).unwrap();
  fs::write(ssh.join("id_rsa"), "key").unwrap();

  let script = "test -d \"$HOME/.ssh\" && test -z \"$(ls -A \"$HOME/.ssh\")\" && ! touch \"$HOME/.ssh/new\" 2>/dev/null";
  let status = common::encapsulate()
    .env("HOME", home.path())
    .arg("--hide-credentials")
    .arg(home.path().to_str().unwrap())
    .args(["sh", "-c", script])
    .status()
    .unwrap();

  assert_eq!(status.code(), Some(0));
  assert_eq!(fs::read_to_string(ssh.join("id_rsa")).unwrap(), "key");
  assert!(!ssh.join("new").exists());
}

#[test]
fn it_should_seal_through_symlinked_tmpdir() {
  common::setup();
  if !common::sandbox_available() {
    return;
  }

  let real = tempdir().unwrap();
  let links = tempdir().unwrap();
  let link = links.path().join("tmp");
  std::os::unix::fs::symlink(real.path(), &link).unwrap();

  let host = tempdir().unwrap();
  let file = host.path().join("escaped");
  let status = common::encapsulate()
    .env("TMPDIR", &link)
    .args(["", "touch", file.to_str().unwrap()])
    .status()
    .unwrap();

  assert_ne!(status.code(), Some(0));
  assert!(!file.exists());
  assert!(is_empty_dir(real.path()));
}

#[test]
fn it_should_ignore_missing_hidden_path() {
  common::setup();
  if !common::sandbox_available() {
    return;
  }

  let dir = tempdir().unwrap();
  let missing = dir.path().join("missing");
  let status = common::encapsulate()
    .args(["--hide", missing.to_str().unwrap(), "", "true"])
    .status()
    .unwrap();
  assert_eq!(status.code(), Some(0));

  let status = common::encapsulate()
    .args(["--strict", "hiding", "--hide", missing.to_str().unwrap(), "", "true"])
    .status()
    .unwrap();
  assert_eq!(status.code(), Some(EXIT_SETUP_FAILURE));
}

#[test]
fn it_should_run_as_invoking_user() {
  common::setup();
  if !common::sandbox_available() {
    return;
  }

  let uid: Uid = getuid();
  let script = format!("test \"$(id -u)\" = {0} && test \"$(id -ru)\" = {0}", uid);
  let status = common::encapsulate()
    .args(["", "sh", "-c", script.as_str()])
    .status()
    .unwrap();
  assert_eq!(status.code(), Some(0));
}

#[test]
fn it_should_remove_isolation_root() {
  common::setup();
  if !common::sandbox_available() {
    return;
  }

  let tmp = tempdir().unwrap();
  for command in [vec!["true"], vec!["false"], vec!["sh", "-c", "kill -9 $$"]] {
    common::encapsulate()
      .env("TMPDIR", tmp.path())
      .arg("")
      .args(command)
      .status()
      .unwrap();
    assert!(is_empty_dir(tmp.path()));
  }
}

#[test]
fn it_should_propagate_exit_status() {
  common::setup();
  if !common::sandbox_available() {
    return;
  }

  let status = common::encapsulate()
    .args(["", "sh", "-c", "exit 7"])
    .status()
    .unwrap();
  assert_eq!(status.code(), Some(7));

  let status = common::encapsulate()
    .args(["", "sh", "-c", "kill -9 $$"])
    .status()
    .unwrap();
  assert_eq!(status.code(), Some(137));

  let status = common::encapsulate()
    .args(["", "encapsulate-no-such-command"])
    .status()
    .unwrap();
  assert_eq!(status.code(), Some(EXIT_NOT_FOUND));
}

#[test]
fn it_should_kill_on_timeout() {
  common::setup();
  if !common::sandbox_available() {
    return;
  }

  let start = Instant::now();
  let status = common::encapsulate()
    .args(["--timeout", "1", "", "sleep", "30"])
    .status()
    .unwrap();
  assert_eq!(status.code(), Some(137));
  assert!(start.elapsed() < Duration::from_secs(20));
}

#[test]
fn it_should_start_target_as_pid_one() {
  common::setup();
  if !common::sandbox_available() {
    return;
  }

  let status = common::encapsulate()
    .args(["--unshare-pid", "", "sh", "-c", "test $$ -eq 1"])
    .status()
    .unwrap();
  assert_eq!(status.code(), Some(0));
}
