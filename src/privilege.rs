use std::convert::Infallible;
use std::ffi::CString;

use log::{debug, info, warn};
use nix::unistd::{execvp, geteuid, getuid, seteuid, setuid, Uid};

use crate::context::Policy;
use crate::EncapsulateError;

/// Credentials of the invoking user, held across the privileged part of the setup.
///
/// `elevate` and `restore` are the only operations changing the process credentials, and
/// the target command can only be started through [`PrivilegeScope::exec`], which refuses to
/// run until `restore` succeeded.
#[derive(Debug)]
pub struct PrivilegeScope {
  uid: Uid,
  euid: Uid,
  restored: bool,
}

impl PrivilegeScope {
  /// Snapshot the current real and effective uid
  pub fn capture() -> Self {
    Self::new(getuid(), geteuid())
  }

  pub(crate) fn new(uid: Uid, euid: Uid) -> Self {
    PrivilegeScope {
      uid,
      euid,
      restored: false,
    }
  }

  /// Effective uid the target command runs with.
  ///
  /// A set-uid root launch shows up as a non root real uid with a root effective uid. Root was
  /// never held by the invoker then, so the effective uid drops to the real one.
  pub fn target_euid(&self) -> Uid {
    if !self.uid.is_root() && self.euid.is_root() {
      self.uid
    } else {
      self.euid
    }
  }

  pub fn is_restored(&self) -> bool {
    self.restored
  }

  /// Become root for the privileged part of the setup
  pub fn elevate(&mut self, policy: Policy) -> Result<(), EncapsulateError> {
    self.restored = false;
    match setuid(Uid::from_raw(0)).and_then(|_| seteuid(Uid::from_raw(0))) {
      Ok(_) => {
        debug!("Elevated to root (uid = {}, euid = {})", self.uid, self.euid);
        Ok(())
      }
      Err(err) => {
        if policy.is_strict() {
          Err(EncapsulateError::privilege(format!(
            "Can not elevate to root: {}",
            err
          )))
        } else {
          warn!("Can not elevate to root, continue with current credentials: {}", err);
          Ok(())
        }
      }
    }
  }

  /// Drop back to the invoking user, real uid first
  pub fn restore(&mut self) -> Result<(), EncapsulateError> {
    let euid = self.target_euid();
    if getuid() != self.uid {
      setuid(self.uid).map_err(|err| {
        EncapsulateError::privilege(format!("Can not restore uid {}: {}", self.uid, err))
      })?;
    }
    if geteuid() != euid {
      seteuid(euid).map_err(|err| {
        EncapsulateError::privilege(format!("Can not restore euid {}: {}", euid, err))
      })?;
    }
    if getuid() != self.uid || geteuid() != euid {
      return Err(EncapsulateError::privilege(format!(
        "Credentials are uid = {}, euid = {} after restore, expected uid = {}, euid = {}",
        getuid(),
        geteuid(),
        self.uid,
        euid
      )));
    }
    info!("Restored credentials (uid = {}, euid = {})", self.uid, euid);
    self.restored = true;
    Ok(())
  }

  /// Replace the current process image, only after credentials were restored
  pub fn exec(&self, program: &CString, args: &[CString]) -> Result<Infallible, EncapsulateError> {
    if !self.is_restored() {
      return Err(EncapsulateError::privilege(
        "Refuse to execute the target before credentials are restored",
      ));
    }
    execvp(program, args)
      .map_err(|errno| EncapsulateError::exec(errno, program.to_string_lossy()))
  }
}
