//! Git workspace collaborator used at task completion.

pub mod git;

pub use git::{GitWorkspace, WorkspaceGuard, WorkspaceReport};
