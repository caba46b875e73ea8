//! Detaching the sandboxed child from host namespaces.
//!
//! `unshare(CLONE_NEWPID)` does not move the caller into the new pid namespace, only the
//! processes it creates afterwards. When [`NamespaceSet::PID`] is requested the child therefore
//! forks once more before exec, see [`crate::supervisor`]. Even then `/proc` inside the sandbox is
//! the host procfs seen read-only, so tools reading it still see host processes.

use std::fmt::{Display, Formatter};
use std::ops::BitOr;

use log::{debug, info, warn};
use nix::sched::{unshare, CloneFlags};

use crate::context::Policy;
use crate::EncapsulateError;

/// A set of kernel namespaces
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NamespaceSet(CloneFlags);

impl NamespaceSet {
  pub const IPC: NamespaceSet = NamespaceSet(CloneFlags::CLONE_NEWIPC);
  pub const NET: NamespaceSet = NamespaceSet(CloneFlags::CLONE_NEWNET);
  pub const MOUNT: NamespaceSet = NamespaceSet(CloneFlags::CLONE_NEWNS);
  pub const UTS: NamespaceSet = NamespaceSet(CloneFlags::CLONE_NEWUTS);
  pub const SYSVSEM: NamespaceSet = NamespaceSet(CloneFlags::CLONE_SYSVSEM);
  pub const PID: NamespaceSet = NamespaceSet(CloneFlags::CLONE_NEWPID);

  const ALL: [NamespaceSet; 6] = [
    Self::MOUNT,
    Self::IPC,
    Self::NET,
    Self::UTS,
    Self::SYSVSEM,
    Self::PID,
  ];

  pub fn empty() -> Self {
    NamespaceSet(CloneFlags::empty())
  }

  pub fn flags(self) -> CloneFlags {
    self.0
  }

  pub fn contains(self, other: NamespaceSet) -> bool {
    self.0.contains(other.0)
  }

  pub fn set(&mut self, other: NamespaceSet, value: bool) {
    self.0.set(other.0, value);
  }

  pub fn is_empty(self) -> bool {
    self.0.is_empty()
  }

  /// Single namespaces of this set, mount namespace first
  pub fn members(self) -> Vec<NamespaceSet> {
    Self::ALL
      .iter()
      .copied()
      .filter(|ns| self.contains(*ns))
      .collect()
  }

  fn name(self) -> &'static str {
    const NAMES: [&str; 6] = ["mnt", "ipc", "net", "uts", "sysvsem", "pid"];
    Self::ALL
      .iter()
      .position(|ns| *ns == self)
      .map_or("mixed", |i| NAMES[i])
  }
}

impl Default for NamespaceSet {
  fn default() -> Self {
    Self::IPC | Self::NET | Self::MOUNT | Self::UTS | Self::SYSVSEM
  }
}

impl BitOr for NamespaceSet {
  type Output = NamespaceSet;

  fn bitor(self, rhs: Self) -> Self::Output {
    NamespaceSet(self.0 | rhs.0)
  }
}

impl Display for NamespaceSet {
  fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
    let names = self
      .members()
      .into_iter()
      .map(|ns| ns.name())
      .collect::<Vec<&str>>();
    f.write_str(&names.join(","))
  }
}

/// Detach the calling process from the namespaces in `set`, returning what was detached.
///
/// The mount namespace is always required, every later mount would otherwise land in the host
/// mount table. The other namespaces follow `policy`.
pub fn isolate(set: NamespaceSet, policy: Policy) -> Result<NamespaceSet, EncapsulateError> {
  let set = set | NamespaceSet::MOUNT;

  match unshare(set.flags()) {
    Ok(_) => {
      info!("Detached namespaces: {}", set);
      return Ok(set);
    }
    Err(err) if policy.is_strict() => {
      return Err(EncapsulateError::namespace(format!(
        "Can not detach namespaces {}: {}",
        set, err
      )));
    }
    Err(err) => {
      warn!("Can not detach namespaces {} at once: {}", set, err);
    }
  }

  let mut detached = NamespaceSet::empty();
  for ns in set.members() {
    match unshare(ns.flags()) {
      Ok(_) => {
        debug!("Detached {} namespace", ns);
        detached = detached | ns;
      }
      Err(err) if ns == NamespaceSet::MOUNT => {
        return Err(EncapsulateError::namespace(format!(
          "Can not detach mnt namespace: {}",
          err
        )));
      }
      Err(err) => {
        warn!("Can not detach {} namespace, continue without it: {}", ns, err);
      }
    }
  }
  info!("Detached namespaces: {}", detached);
  Ok(detached)
}
