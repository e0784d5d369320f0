//! Post-build disposal policy.
//!
//! After a build finishes, the VM that hosted the agent is torn down
//! according to its configured [`PostBuildBehavior`]. [`resolve`] turns
//! that configuration plus the state captured before the VM was started
//! into a [`DisposalAction`], and [`DisposalAction::commands`] spells the
//! action out as `prlctl` invocations.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::config::VmConfig;
use crate::inventory::VmStatus;

/// What to do with a VM once its build has completed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PostBuildBehavior {
    /// Leave the VM running.
    #[default]
    KeepRunning,
    Stop,
    Suspend,
    /// Switch to the configured snapshot, then stop.
    RevertAndStop,
    /// Switch to the configured snapshot, then suspend.
    RevertAndSuspend,
    /// Put the VM back into the state it had before it was started.
    ReturnPrevState,
}

impl PostBuildBehavior {
    /// Whether this behavior needs a snapshot id.
    pub fn needs_snapshot(&self) -> bool {
        matches!(
            self,
            PostBuildBehavior::RevertAndStop | PostBuildBehavior::RevertAndSuspend
        )
    }
}

impl fmt::Display for PostBuildBehavior {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PostBuildBehavior::KeepRunning => "keep-running",
            PostBuildBehavior::Stop => "stop",
            PostBuildBehavior::Suspend => "suspend",
            PostBuildBehavior::RevertAndStop => "revert-and-stop",
            PostBuildBehavior::RevertAndSuspend => "revert-and-suspend",
            PostBuildBehavior::ReturnPrevState => "return-prev-state",
        };
        f.write_str(s)
    }
}

impl FromStr for PostBuildBehavior {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "keep-running" => Ok(PostBuildBehavior::KeepRunning),
            "stop" => Ok(PostBuildBehavior::Stop),
            "suspend" => Ok(PostBuildBehavior::Suspend),
            "revert-and-stop" => Ok(PostBuildBehavior::RevertAndStop),
            "revert-and-suspend" => Ok(PostBuildBehavior::RevertAndSuspend),
            "return-prev-state" => Ok(PostBuildBehavior::ReturnPrevState),
            other => Err(format!("unknown post-build behavior: {}", other)),
        }
    }
}

/// Terminal action applied to a VM after its build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisposalAction {
    /// Leave the VM as it is.
    None,
    Stop,
    Suspend,
    RevertAndStop { snapshot: String },
    RevertAndSuspend { snapshot: String },
    /// Restore the state captured before start, not the state at disposal.
    RestorePriorState(VmStatus),
}

impl DisposalAction {
    /// Collapse [`DisposalAction::RestorePriorState`] into the concrete action.
    pub fn concrete(&self) -> DisposalAction {
        match self {
            DisposalAction::RestorePriorState(VmStatus::Running) => DisposalAction::None,
            DisposalAction::RestorePriorState(VmStatus::Stopped) => DisposalAction::Stop,
            DisposalAction::RestorePriorState(_) => DisposalAction::Suspend,
            other => other.clone(),
        }
    }

    /// Whether applying this action issues no command.
    pub fn is_noop(&self) -> bool {
        self.concrete() == DisposalAction::None
    }

    /// `prlctl` argument vectors to run, in order, for `vm`.
    pub fn commands(&self, vm: &str) -> Vec<Vec<String>> {
        let cmd = |verb: &str| vec![verb.to_string(), vm.to_string()];
        let switch = |snapshot: &str| {
            vec![
                "snapshot-switch".to_string(),
                vm.to_string(),
                "--id".to_string(),
                snapshot.to_string(),
            ]
        };

        match self {
            DisposalAction::RestorePriorState(_) => self.concrete().commands(vm),
            DisposalAction::None => Vec::new(),
            DisposalAction::Stop => vec![cmd("stop")],
            DisposalAction::Suspend => vec![cmd("suspend")],
            DisposalAction::RevertAndStop { snapshot } => {
                vec![switch(snapshot.as_str()), cmd("stop")]
            }
            DisposalAction::RevertAndSuspend { snapshot } => {
                vec![switch(snapshot.as_str()), cmd("suspend")]
            }
        }
    }
}

impl fmt::Display for DisposalAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DisposalAction::None => write!(f, "keep running"),
            DisposalAction::Stop => write!(f, "stop"),
            DisposalAction::Suspend => write!(f, "suspend"),
            DisposalAction::RevertAndStop { snapshot } => {
                write!(f, "revert to {} and stop", snapshot)
            }
            DisposalAction::RevertAndSuspend { snapshot } => {
                write!(f, "revert to {} and suspend", snapshot)
            }
            DisposalAction::RestorePriorState(prior) => {
                write!(f, "restore prior state ({})", prior)
            }
        }
    }
}

/// Decide the disposal action for a VM.
///
/// `prior` is the state captured when the VM was started; it is only
/// consulted for [`PostBuildBehavior::ReturnPrevState`]. Without a captured
/// state there is nothing to restore and the VM is left alone. A revert
/// behavior without a snapshot id degrades to the plain stop or suspend.
pub fn resolve(config: &VmConfig, prior: Option<&VmStatus>) -> DisposalAction {
    let snapshot = config.snapshot.clone();
    match config.post_build {
        PostBuildBehavior::KeepRunning => DisposalAction::None,
        PostBuildBehavior::Stop => DisposalAction::Stop,
        PostBuildBehavior::Suspend => DisposalAction::Suspend,
        PostBuildBehavior::RevertAndStop => match snapshot {
            Some(snapshot) => DisposalAction::RevertAndStop { snapshot },
            None => DisposalAction::Stop,
        },
        PostBuildBehavior::RevertAndSuspend => match snapshot {
            Some(snapshot) => DisposalAction::RevertAndSuspend { snapshot },
            None => DisposalAction::Suspend,
        },
        PostBuildBehavior::ReturnPrevState => match prior {
            Some(prior) => DisposalAction::RestorePriorState(prior.clone()),
            None => DisposalAction::None,
        },
    }
}
