use std::path::PathBuf;

use crate::namespace::NamespaceSet;

pub use builder::EncapsulateBuilder;

mod builder;

/// How a failing isolation step is handled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Policy {
  /// Log the failure and carry on with weaker isolation
  #[default]
  BestEffort,
  /// Abort before the target command runs
  Strict,
}

/// Isolation steps whose failure policy can be chosen
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IsolationStep {
  Namespaces,
  Hiding,
  Elevation,
}

/// Failure policy of every step that may fail without compromising the read-only root
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct IsolationPolicy {
  namespaces: Policy,
  hiding: Policy,
  elevation: Policy,
}

/// Everything needed to run one command in an isolation root
#[derive(Debug, Clone)]
pub struct EncapsulateOption {
  program: String,
  arguments: Vec<String>,
  writable: Vec<PathBuf>,
  hidden: Vec<PathBuf>,
  namespaces: NamespaceSet,
  policy: IsolationPolicy,
  cwd: Option<PathBuf>,
  timeout: Option<u32>,
  nice: Option<i32>,
}

impl Policy {
  pub fn is_strict(self) -> bool {
    self == Policy::Strict
  }
}

impl IsolationPolicy {
  pub fn strict() -> Self {
    IsolationPolicy {
      namespaces: Policy::Strict,
      hiding: Policy::Strict,
      elevation: Policy::Strict,
    }
  }

  pub fn with(mut self, step: IsolationStep, policy: Policy) -> Self {
    match step {
      IsolationStep::Namespaces => self.namespaces = policy,
      IsolationStep::Hiding => self.hiding = policy,
      IsolationStep::Elevation => self.elevation = policy,
    }
    self
  }

  pub fn of(&self, step: IsolationStep) -> Policy {
    match step {
      IsolationStep::Namespaces => self.namespaces,
      IsolationStep::Hiding => self.hiding,
      IsolationStep::Elevation => self.elevation,
    }
  }
}

impl EncapsulateOption {
  pub(crate) fn new(program: String, arguments: Vec<String>) -> Self {
    EncapsulateOption {
      program,
      arguments,
      writable: vec![],
      hidden: vec![],
      namespaces: NamespaceSet::default(),
      policy: IsolationPolicy::default(),
      cwd: None,
      timeout: None,
      nice: None,
    }
  }

  pub fn program(&self) -> &String {
    &self.program
  }

  pub fn arguments(&self) -> &Vec<String> {
    &self.arguments
  }

  /// Writable paths as given, before canonicalization
  pub fn writable(&self) -> &Vec<PathBuf> {
    &self.writable
  }

  pub fn hidden(&self) -> &Vec<PathBuf> {
    &self.hidden
  }

  pub fn namespaces(&self) -> NamespaceSet {
    self.namespaces
  }

  pub fn policy(&self) -> &IsolationPolicy {
    &self.policy
  }

  /// Working directory inside the sandbox, `None` keeps the current one
  pub fn cwd(&self) -> &Option<PathBuf> {
    &self.cwd
  }

  /// Seconds before the sandboxed process group is killed
  pub fn timeout(&self) -> Option<u32> {
    self.timeout
  }

  pub fn nice(&self) -> Option<i32> {
    self.nice
  }
}
