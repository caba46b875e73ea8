use std::fs::{self, remove_dir, Permissions};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use log::{debug, error, info, warn};
use nix::mount::{mount, umount2, MntFlags, MsFlags};
use nix::unistd::{chdir, chroot};
use tempfile::Builder;

use crate::context::Policy;
use crate::paths::{order_writable, resolve_dir, sandbox_target};
use crate::utils::mountinfo::{mount_table, mounts_under};
use crate::EncapsulateError;

const ROOT_PREFIX: &str = "encapsulate.";

const SCRATCH_PREFIX: &str = "encapsulate-empty.";

/// Temporary directories owned by one invocation.
///
/// `root` becomes `/` of the sandbox and `scratch` stays empty, it is the source of every hidden
/// path. Both are removed with a plain `rmdir`, a mount that is still attached makes removal fail
/// instead of deleting host files through it.
#[derive(Debug)]
pub struct IsolationRoot {
  root: PathBuf,
  scratch: PathBuf,
}

/// Builds the sandbox mount tree on top of an [`IsolationRoot`]
pub struct MountTree<'a> {
  root: &'a IsolationRoot,
}

impl IsolationRoot {
  pub fn create() -> Result<Self, EncapsulateError> {
    let root = Builder::new()
      .prefix(ROOT_PREFIX)
      .tempdir()
      .map_err(|err| EncapsulateError::fs(format!("Can not create isolation root: {}", err)))?
      .keep();
    // mountinfo reports resolved paths, a symlinked TMPDIR would hide the root from seal
    let root = Self::resolve(root)?;
    if !root.is_dir() {
      return Err(EncapsulateError::fs(format!(
        "Isolation root {} is not a directory",
        root.to_string_lossy()
      )));
    }

    let scratch = match Self::create_scratch() {
      Ok(scratch) => scratch,
      Err(err) => {
        let _ = remove_dir(&root);
        return Err(err);
      }
    };

    info!("Isolation root created at {}", root.to_string_lossy());
    Ok(IsolationRoot { root, scratch })
  }

  fn create_scratch() -> Result<PathBuf, EncapsulateError> {
    let scratch = Builder::new()
      .prefix(SCRATCH_PREFIX)
      .tempdir()
      .map_err(|err| EncapsulateError::fs(format!("Can not create scratch directory: {}", err)))?
      .keep();
    let scratch = Self::resolve(scratch)?;
    // readable by whoever runs the target, never writable
    fs::set_permissions(&scratch, Permissions::from_mode(0o555))?;
    Ok(scratch)
  }

  fn resolve(dir: PathBuf) -> Result<PathBuf, EncapsulateError> {
    fs::canonicalize(&dir).map_err(|err| {
      let _ = remove_dir(&dir);
      EncapsulateError::fs(format!(
        "Can not resolve {}: {}",
        dir.to_string_lossy(),
        err
      ))
    })
  }

  pub fn path(&self) -> &Path {
    &self.root
  }

  pub fn scratch(&self) -> &Path {
    &self.scratch
  }

  /// Remove both directories, failures are logged only
  pub fn remove(self) {
    for dir in [&self.root, &self.scratch] {
      match remove_dir(dir) {
        Ok(_) => {
          debug!("Remove directory {}", dir.to_string_lossy());
        }
        Err(err) => {
          error!("Fails removing {}: {}", dir.to_string_lossy(), err);
        }
      }
    }
  }
}

impl<'a> MountTree<'a> {
  pub fn new(root: &'a IsolationRoot) -> Self {
    MountTree { root }
  }

  /// Build the whole tree: private propagation, root capture, sealing, writable paths, hidden paths
  pub fn build(
    &self,
    writable: &[PathBuf],
    hidden: &[PathBuf],
    hiding: Policy,
  ) -> Result<(), EncapsulateError> {
    Self::privatize()?;
    self.capture_root()?;
    let sealed = self.seal()?;
    debug!("Sealed {} mount points read-only", sealed);
    let writable = self.expose_writable(writable)?;
    debug!("Exposed {} writable paths", writable.len());
    let hidden = self.hide(hidden, hiding)?;
    debug!("Hidden {} paths", hidden.len());
    Ok(())
  }

  /// Stop mount events from travelling between the host and this namespace
  pub fn privatize() -> Result<(), EncapsulateError> {
    mount::<str, str, str, str>(None, "/", None, MsFlags::MS_PRIVATE | MsFlags::MS_REC, None)
      .map_err(|err| EncapsulateError::mount(format!("Unsharing mount points failed: {}", err)))
  }

  /// Recursively bind the host root onto the isolation root
  pub fn capture_root(&self) -> Result<(), EncapsulateError> {
    let root = self.root.path();
    info!("Mount host root on {}", root.to_string_lossy());
    mount::<str, Path, str, str>(
      Some("/"),
      root,
      None,
      MsFlags::MS_BIND | MsFlags::MS_REC,
      None,
    )
    .map_err(|err| EncapsulateError::mount(format!("Binding host root failed: {}", err)))
  }

  /// Remount every mount point under the isolation root read-only.
  ///
  /// A recursive bind can not be made read-only in one remount, so the live mount table is read
  /// and each mount under the root is remounted on its own.
  pub fn seal(&self) -> Result<usize, EncapsulateError> {
    let table = mount_table()?;
    let targets = mounts_under(&table, self.root.path());
    if targets.is_empty() {
      return Err(EncapsulateError::mount(format!(
        "No mount point found under {}",
        self.root.path().to_string_lossy()
      )));
    }
    for entry in targets.iter() {
      debug!(
        "Seal {} ({})",
        entry.mount_point().to_string_lossy(),
        entry.options().join(",")
      );
      let flags =
        MsFlags::MS_BIND | MsFlags::MS_REMOUNT | MsFlags::MS_RDONLY | entry.preserved_flags();
      mount::<str, Path, str, str>(None, entry.mount_point(), None, flags, None).map_err(
        |err| {
          EncapsulateError::mount(format!(
            "Remount {} read-only failed: {}",
            entry.mount_point().to_string_lossy(),
            err
          ))
        },
      )?;
    }
    Ok(targets.len())
  }

  /// Bind each writable directory back over its read-only copy.
  ///
  /// Paths are canonicalized first, repeated paths are mounted once and ancestors are mounted
  /// before their descendants.
  pub fn expose_writable(&self, paths: &[PathBuf]) -> Result<Vec<PathBuf>, EncapsulateError> {
    let mut resolved = vec![];
    for path in paths {
      resolved.push(resolve_dir(path)?);
    }
    let resolved = order_writable(resolved);

    for real in resolved.iter() {
      let target = sandbox_target(self.root.path(), real);
      debug!("Mount writable {:?} -> {:?}", real, &target);
      mount::<Path, Path, str, str>(
        Some(real),
        &target,
        None,
        MsFlags::MS_BIND | MsFlags::MS_REC,
        None,
      )
      .map_err(|err| {
        EncapsulateError::mount(format!(
          "Mounting writable tree {} failed: {}",
          real.to_string_lossy(),
          err
        ))
      })?;
    }
    Ok(resolved)
  }

  /// Cover each hidden directory with the empty scratch directory, read-only
  pub fn hide(&self, paths: &[PathBuf], policy: Policy) -> Result<Vec<PathBuf>, EncapsulateError> {
    let mut resolved = vec![];
    for path in paths {
      match resolve_dir(path) {
        Ok(real) => resolved.push(real),
        Err(err) if policy.is_strict() => return Err(err),
        Err(err) => {
          warn!("Skip hiding {}: {}", path.to_string_lossy(), err);
        }
      }
    }

    let mut hidden: Vec<PathBuf> = vec![];
    for real in order_writable(resolved) {
      if hidden.iter().any(|h| real.starts_with(h)) {
        debug!("{:?} is already inside a hidden path", real);
        continue;
      }
      match self.mask(&real) {
        Ok(_) => hidden.push(real),
        Err(err) if policy.is_strict() => return Err(err),
        Err(err) => {
          warn!("{}", err);
        }
      }
    }
    Ok(hidden)
  }

  fn mask(&self, real: &Path) -> Result<(), EncapsulateError> {
    let target = sandbox_target(self.root.path(), real);
    debug!("Hide {:?}", &target);
    mount::<Path, Path, str, str>(Some(self.root.scratch()), &target, None, MsFlags::MS_BIND, None)
      .map_err(|err| {
        EncapsulateError::mount(format!(
          "Hiding {} failed: {}",
          real.to_string_lossy(),
          err
        ))
      })?;

    let flags = MsFlags::MS_BIND
      | MsFlags::MS_REMOUNT
      | MsFlags::MS_RDONLY
      | MsFlags::MS_NOSUID
      | MsFlags::MS_NODEV
      | MsFlags::MS_NOEXEC;
    if let Err(err) = mount::<str, Path, str, str>(None, &target, None, flags, None) {
      // never leave a writable scratch directory behind
      if let Err(err) = umount2(&target, MntFlags::MNT_DETACH) {
        error!("Fails umount {}: {}", target.to_string_lossy(), err);
      }
      return Err(EncapsulateError::mount(format!(
        "Remount hidden {} read-only failed: {}",
        real.to_string_lossy(),
        err
      )));
    }
    Ok(())
  }

  /// chroot into the isolation root and go back to `cwd` inside it
  pub fn change_root(&self, cwd: &Path) -> Result<(), EncapsulateError> {
    chroot(self.root.path()).map_err(|err| {
      EncapsulateError::mount(format!(
        "chroot {} failed: {}",
        self.root.path().to_string_lossy(),
        err
      ))
    })?;
    if let Err(err) = chdir(cwd) {
      warn!(
        "Can not enter {} inside the sandbox, use / instead: {}",
        cwd.to_string_lossy(),
        err
      );
      chdir("/")?;
    }
    Ok(())
  }
}
