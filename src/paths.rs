use std::fs::canonicalize;
use std::path::{Path, PathBuf};

use log::debug;
use path_absolutize::Absolutize;

use crate::EncapsulateError;

/// Separator between entries of a writable path spec
pub const SPEC_DELIMITER: char = '|';

/// Directories under `$HOME` masked by credential hiding
pub const CREDENTIAL_DIRS: [&str; 2] = [".ssh", ".gnupg"];

/// Split a `|` delimited spec into paths.
///
/// Order is kept and nothing is deduplicated or canonicalized here, so errors later point at the
/// resolved path. Empty segments are dropped, an empty spec gives no writable path at all.
pub fn parse_writable_spec(spec: &str) -> Vec<PathBuf> {
  spec
    .split(SPEC_DELIMITER)
    .filter(|p| !p.is_empty())
    .map(PathBuf::from)
    .collect()
}

/// Resolve a path to an existing directory
pub fn resolve_dir(path: &Path) -> Result<PathBuf, EncapsulateError> {
  let real = canonicalize(path).map_err(|err| {
    EncapsulateError::mount(format!(
      "{} is not a directory ({})",
      display_absolute(path),
      err
    ))
  })?;
  if !real.is_dir() {
    return Err(EncapsulateError::mount(format!(
      "{} is not a directory",
      real.to_string_lossy()
    )));
  }
  Ok(real)
}

/// Drop repeated paths and put every ancestor before its descendants.
///
/// The sort is stable on path depth so unrelated paths keep the order they were given in.
pub fn order_writable(paths: Vec<PathBuf>) -> Vec<PathBuf> {
  let mut unique: Vec<PathBuf> = vec![];
  for path in paths {
    if unique.contains(&path) {
      debug!("Skip repeated writable path {}", path.to_string_lossy());
    } else {
      unique.push(path);
    }
  }
  unique.sort_by_key(|p| p.components().count());
  unique
}

/// Location of a host path inside the isolation root
pub fn sandbox_target(root: &Path, real: &Path) -> PathBuf {
  match real.strip_prefix("/") {
    Ok(relative) => root.join(relative),
    Err(_) => root.join(real),
  }
}

/// Credential directories of the user owning `home`
pub fn credential_paths(home: &Path) -> Vec<PathBuf> {
  CREDENTIAL_DIRS.iter().map(|d| home.join(d)).collect()
}

fn display_absolute(path: &Path) -> String {
  match path.absolutize() {
    Ok(p) => p.to_string_lossy().to_string(),
    Err(_) => path.to_string_lossy().to_string(),
  }
}
