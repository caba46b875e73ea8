use std::env;
use std::ffi::CString;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};

use log::{debug, error, info, warn};
use nix::errno::Errno;
use nix::libc::{self, c_int};
use nix::sys::signal::{killpg, sigaction, SaFlags, SigAction, SigHandler, SigSet, Signal};
use nix::sys::wait::{waitpid, WaitStatus};
use nix::unistd::{alarm, fork, setpgid, ForkResult, Pid};

use crate::context::{EncapsulateOption, IsolationStep};
use crate::error::EXIT_SETUP_FAILURE;
use crate::mount::{IsolationRoot, MountTree};
use crate::namespace::{isolate, NamespaceSet};
use crate::privilege::PrivilegeScope;
use crate::utils::{into_c_string, ReportPipe, ReportReadPipe, ReportWritePipe};
use crate::EncapsulateError;

static TIMED_OUT: AtomicBool = AtomicBool::new(false);

extern "C" fn on_alarm(_: c_int) {
  TIMED_OUT.store(true, Ordering::SeqCst);
}

/// How the sandboxed command ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChildExit {
  Exited(i32),
  Signaled(Signal),
}

impl ChildExit {
  /// Shell style status: the exit code, or 128 + signal number
  pub fn code(&self) -> i32 {
    match self {
      ChildExit::Exited(status) => *status,
      ChildExit::Signaled(signal) => 128 + *signal as i32,
    }
  }
}

/// Parent side handle of one sandboxed child
pub struct Supervisor {
  child: Pid,
  root: IsolationRoot,
  report: ReportReadPipe,
  timeout: Option<u32>,
}

/// Child side of the fork, never returns to the caller
pub struct IsolatedChildTask<'a> {
  option: &'a EncapsulateOption,
  root: &'a IsolationRoot,
  report: ReportWritePipe,
}

/// Create an isolation root and fork.
///
/// Only the parent returns from here. The child runs [`IsolatedChildTask::run`], which ends in
/// the target command or in `_exit`.
pub fn spawn_isolated(option: &EncapsulateOption) -> Result<Supervisor, EncapsulateError> {
  let root = IsolationRoot::create()?;
  let pipe = match ReportPipe::new() {
    Ok(pipe) => pipe,
    Err(err) => {
      root.remove();
      return Err(err);
    }
  };

  match unsafe { fork() } {
    Ok(ForkResult::Parent { child, .. }) => {
      info!("Start running child process (pid = {})", child);
      let report = match pipe.read() {
        Ok(report) => report,
        Err(err) => {
          let _ = waitpid(child, None);
          root.remove();
          return Err(err);
        }
      };
      if option.timeout().is_some() {
        // also done by the child, whichever runs first wins the race with killpg
        let _ = setpgid(child, child);
      }
      Ok(Supervisor {
        child,
        root,
        report,
        timeout: option.timeout(),
      })
    }
    Ok(ForkResult::Child) => match pipe.write() {
      Ok(report) => IsolatedChildTask {
        option,
        root: &root,
        report,
      }
      .run(),
      Err(_) => unsafe { libc::_exit(EXIT_SETUP_FAILURE) },
    },
    Err(err) => {
      root.remove();
      Err(EncapsulateError::fork(format!("Fork failed: {}", err)))
    }
  }
}

/// Run one command in a fresh isolation root and wait for it
pub fn run(option: &EncapsulateOption) -> Result<ChildExit, EncapsulateError> {
  spawn_isolated(option)?.wait()
}

impl Supervisor {
  pub fn child(&self) -> Pid {
    self.child
  }

  /// Wait for the child, then remove the isolation root whatever happened
  pub fn wait(self) -> Result<ChildExit, EncapsulateError> {
    let Supervisor {
      child,
      root,
      report,
      timeout,
    } = self;

    if let Some(seconds) = timeout {
      Self::arm_timeout(seconds);
    }
    let status = Self::wait_child(child, timeout.is_some());
    if timeout.is_some() {
      alarm::cancel();
    }

    match report.read() {
      Ok(Some(message)) => error!("{}", message),
      Ok(None) => debug!("Child process #{}. reported nothing", child),
      Err(err) => warn!("Can not read child report: {}", err),
    }
    drop(report);

    root.remove();
    status
  }

  fn arm_timeout(seconds: u32) {
    TIMED_OUT.store(false, Ordering::SeqCst);
    // no SA_RESTART, so waitpid comes back with EINTR once the alarm fires
    let action = SigAction::new(
      SigHandler::Handler(on_alarm),
      SaFlags::empty(),
      SigSet::empty(),
    );
    if let Err(err) = unsafe { sigaction(Signal::SIGALRM, &action) } {
      warn!("Can not install timeout handler: {}", err);
      return;
    }
    alarm::set(seconds);
    debug!("Set alarm {} seconds", seconds);
  }

  fn wait_child(child: Pid, group: bool) -> Result<ChildExit, EncapsulateError> {
    loop {
      // the alarm may fire before waitpid blocks, then no EINTR follows
      Self::kill_if_timed_out(child, group);
      match waitpid(child, None) {
        Ok(WaitStatus::Exited(pid, status)) => {
          info!("Child process #{}. exited with status {}", pid, status);
          return Ok(ChildExit::Exited(status));
        }
        Ok(WaitStatus::Signaled(pid, signal, _)) => {
          info!("Child process #{}. is signaled by {}", pid, signal);
          return Ok(ChildExit::Signaled(signal));
        }
        Ok(status) => {
          debug!("Child process #{}. changed state: {:?}", child, status);
        }
        Err(Errno::EINTR) => {}
        Err(err) => {
          return Err(EncapsulateError::fork(format!(
            "Waiting for child process #{} failed: {}",
            child, err
          )));
        }
      }
    }
  }

  fn kill_if_timed_out(child: Pid, group: bool) {
    if !TIMED_OUT.swap(false, Ordering::SeqCst) {
      return;
    }
    warn!("Child process #{}. timed out, killing it", child);
    let killed = if group {
      killpg(child, Signal::SIGKILL)
    } else {
      nix::sys::signal::kill(child, Signal::SIGKILL)
    };
    if let Err(err) = killed {
      error!("Fails killing child process #{}: {}", child, err);
    }
  }
}

impl<'a> IsolatedChildTask<'a> {
  /// Build the sandbox and exec the target; any failure ends the child with its exit code
  pub fn run(self) -> ! {
    let mut scope = PrivilegeScope::capture();
    let err = match self.prepare(&mut scope) {
      Ok(args) => self.execute(&scope, args),
      Err(err) => err,
    };
    debug!("Child process failed: {}", err);
    if self.report.write(err.to_string()).is_err() {
      error!("{}", err);
    }
    unsafe { libc::_exit(err.exit_code()) }
  }

  fn prepare(&self, scope: &mut PrivilegeScope) -> Result<Vec<CString>, EncapsulateError> {
    let policy = self.option.policy();
    let program = into_c_string(self.option.program())?;
    let mut args = vec![program];
    for arg in self.option.arguments() {
      args.push(into_c_string(arg)?);
    }
    let cwd = match self.option.cwd() {
      Some(cwd) => cwd.clone(),
      None => env::current_dir().unwrap_or_else(|_| PathBuf::from("/")),
    };

    if self.option.timeout().is_some() {
      setpgid(Pid::from_raw(0), Pid::from_raw(0))?;
    }

    debug!("Elevating");
    scope.elevate(policy.of(IsolationStep::Elevation))?;

    debug!("Isolating");
    isolate(self.option.namespaces(), policy.of(IsolationStep::Namespaces))?;

    debug!("Building mount tree");
    let tree = MountTree::new(self.root);
    tree.build(
      self.option.writable(),
      self.option.hidden(),
      policy.of(IsolationStep::Hiding),
    )?;
    tree.change_root(&cwd)?;

    debug!("Restoring");
    scope.restore()?;

    Ok(args)
  }

  fn execute(&self, scope: &PrivilegeScope, args: Vec<CString>) -> EncapsulateError {
    if let Some(nice) = self.option.nice() {
      lower_priority(nice);
    }

    if self.option.namespaces().contains(NamespaceSet::PID) {
      match unsafe { fork() } {
        Ok(ForkResult::Parent { child }) => {
          let code = match waitpid(child, None) {
            Ok(WaitStatus::Exited(_, status)) => status,
            Ok(WaitStatus::Signaled(_, signal, _)) => 128 + signal as i32,
            _ => EXIT_SETUP_FAILURE,
          };
          unsafe { libc::_exit(code) };
        }
        Ok(ForkResult::Child) => {
          debug!("Running as pid 1 of the new pid namespace");
        }
        Err(err) => {
          return EncapsulateError::fork(format!("Fork into pid namespace failed: {}", err));
        }
      }
    }

    let line = args
      .iter()
      .map(|cstr| cstr.to_string_lossy().into())
      .collect::<Vec<Box<str>>>();
    info!("Start running program {}", line.join(" "));

    match scope.exec(&args[0], &args) {
      Ok(never) => match never {},
      Err(err) => err,
    }
  }
}

/// Lower the scheduling priority of the calling process, best effort
fn lower_priority(nice: i32) {
  if nice <= 0 {
    debug!("Ignore non positive nice value {}", nice);
    return;
  }
  let ret = unsafe { libc::setpriority(libc::PRIO_PROCESS, 0, nice) };
  if ret != 0 {
    warn!("Can not lower priority to {}: {}", nice, Errno::last());
  }
}
