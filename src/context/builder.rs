use std::env;
use std::path::PathBuf;

use log::{debug, warn};

use crate::context::{EncapsulateOption, IsolationPolicy, IsolationStep, Policy};
use crate::namespace::NamespaceSet;
use crate::paths::{credential_paths, parse_writable_spec};

/// Build the running option of one sandboxed command
pub struct EncapsulateBuilder {
  option: EncapsulateOption,
}

impl EncapsulateBuilder {
  /// Create a builder for a command and its arguments
  pub fn new<PS: Into<String>, AS: Into<String>>(program: PS, arguments: Vec<AS>) -> Self {
    EncapsulateBuilder {
      option: EncapsulateOption::new(
        program.into(),
        arguments.into_iter().map(|a| a.into()).collect(),
      ),
    }
  }

  /// Finish building
  pub fn build(self) -> EncapsulateOption {
    self.option
  }

  /// Parse a `|` delimited writable path spec
  pub fn parse_writable_spec(mut self, spec: &str) -> Self {
    for path in parse_writable_spec(spec) {
      self.option.writable.push(path);
    }
    self
  }

  /// Keep a directory writable
  pub fn writable<P: Into<PathBuf>>(mut self, path: P) -> Self {
    self.option.writable.push(path.into());
    self
  }

  /// Mask a directory with an empty read-only mount
  pub fn hide<P: Into<PathBuf>>(mut self, path: P) -> Self {
    self.option.hidden.push(path.into());
    self
  }

  /// Mask a list of directories
  pub fn hide_list(mut self, list: Vec<PathBuf>) -> Self {
    self.option.hidden.extend(list);
    self
  }

  /// Mask the credential directories under `$HOME` or do nothing
  pub fn set_hide_credentials(mut self, flag: bool) -> Self {
    if !flag {
      return self;
    }
    match env::var_os("HOME") {
      Some(home) if !home.is_empty() => {
        for path in credential_paths(&PathBuf::from(home)) {
          debug!("Hide credential directory {}", path.to_string_lossy());
          self.option.hidden.push(path);
        }
      }
      _ => {
        warn!("HOME is not set, no credential directory is hidden");
      }
    }
    self
  }

  /// Set the detached namespaces
  pub fn namespaces(mut self, namespaces: NamespaceSet) -> Self {
    self.option.namespaces = namespaces;
    self
  }

  /// Detach the pid namespace as well
  pub fn set_unshare_pid(mut self, flag: bool) -> Self {
    self.option.namespaces.set(NamespaceSet::PID, flag);
    self
  }

  /// Stay in the host network namespace
  pub fn set_share_network(mut self, flag: bool) -> Self {
    self.option.namespaces.set(NamespaceSet::NET, !flag);
    self
  }

  /// Set the whole failure policy
  pub fn policy(mut self, policy: IsolationPolicy) -> Self {
    self.option.policy = policy;
    self
  }

  /// Abort when the given step fails
  pub fn strict(mut self, step: IsolationStep) -> Self {
    self.option.policy = self.option.policy.with(step, Policy::Strict);
    self
  }

  /// Set work directory inside the sandbox or keep the current one
  pub fn set_cwd(mut self, path: Option<PathBuf>) -> Self {
    self.option.cwd = path;
    self
  }

  /// Set the timeout in seconds or run without one
  pub fn set_timeout(mut self, seconds: Option<u32>) -> Self {
    self.option.timeout = seconds.filter(|s| *s > 0);
    self
  }

  /// Set the nice increment of the sandboxed command or keep the current priority
  pub fn set_nice(mut self, value: Option<i32>) -> Self {
    self.option.nice = value;
    self
  }
}
