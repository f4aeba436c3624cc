//! Explicit caller context.

use escrow_core::UserId;
use serde::{Deserialize, Serialize};

/// Who is invoking a settlement operation.
///
/// Passed into every call instead of being read from session state, so the
/// service never acts on behalf of a user it was not told about.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallerContext {
    pub user_id: UserId,
}

impl CallerContext {
    pub fn new(user_id: UserId) -> Self {
        Self { user_id }
    }
}
