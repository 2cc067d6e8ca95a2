use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;

/// Durable background-task discriminant. Tasks are fire-and-forget work
/// queue records consumed out of process; the store never blocks on them.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    /// Notify moderators that an unapproved attachment entered the queue.
    ApprovalNotify,
    /// One-time warning that the active directory is close to its quota.
    DirectorySpaceWarning,
}

impl Display for TaskType {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            TaskType::ApprovalNotify => write!(f, "approval_notify"),
            TaskType::DirectorySpaceWarning => write!(f, "directory_space_warning"),
        }
    }
}

impl FromStr for TaskType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "approval_notify" => Ok(TaskType::ApprovalNotify),
            "directory_space_warning" => Ok(TaskType::DirectorySpaceWarning),
            _ => Err(anyhow::anyhow!("Invalid task type: {}", s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_type_display_and_parse_agree() {
        for t in [TaskType::ApprovalNotify, TaskType::DirectorySpaceWarning] {
            assert_eq!(t.to_string().parse::<TaskType>().unwrap(), t);
        }
    }
}
