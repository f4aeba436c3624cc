//! # Collaborator Ports
//!
//! Narrow interfaces to the services the settlement engine consumes but
//! does not own. Production deployments use [`crate::HttpCollaborators`];
//! development and tests use [`InMemoryDirectory`].

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;

use escrow_core::{CourseId, IdentityHandle, UserId};

/// Errors from collaborator calls.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CollaboratorError {
    /// HTTP transport error.
    #[error("HTTP error calling {endpoint}: {reason}")]
    Http { endpoint: String, reason: String },
    /// The collaborator returned a non-2xx status.
    #[error("{endpoint} returned {status}: {body}")]
    Api {
        endpoint: String,
        status: u16,
        body: String,
    },
    #[error("failed to deserialize response from {endpoint}: {reason}")]
    Deserialization { endpoint: String, reason: String },
    #[error("collaborator unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait EnrollmentService: Send + Sync {
    async fn is_enrolled(&self, course: &CourseId, user: &UserId)
        -> Result<bool, CollaboratorError>;
}

#[async_trait]
pub trait WatchProgressService: Send + Sync {
    /// Total seconds watched across all enrolled payers.
    async fn aggregated_watch_seconds(&self, course: &CourseId) -> Result<u64, CollaboratorError>;

    /// Length of the course content in seconds.
    async fn course_duration_seconds(&self, course: &CourseId) -> Result<u64, CollaboratorError>;
}

#[async_trait]
pub trait IdentityService: Send + Sync {
    /// The user's payout identity, if one is configured.
    async fn payout_identity(
        &self,
        user: &UserId,
    ) -> Result<Option<IdentityHandle>, CollaboratorError>;
}

/// The collaborator set handed to the settlement service.
#[derive(Clone)]
pub struct Collaborators {
    pub enrollment: Arc<dyn EnrollmentService>,
    pub watch_progress: Arc<dyn WatchProgressService>,
    pub identity: Arc<dyn IdentityService>,
}

impl Collaborators {
    pub fn from_directory(directory: InMemoryDirectory) -> Self {
        let shared = Arc::new(directory);
        Self {
            enrollment: shared.clone(),
            watch_progress: shared.clone(),
            identity: shared,
        }
    }

    pub fn from_http(client: crate::http::HttpCollaborators) -> Self {
        let shared = Arc::new(client);
        Self {
            enrollment: shared.clone(),
            watch_progress: shared.clone(),
            identity: shared,
        }
    }
}

#[derive(Default)]
struct DirectoryState {
    enrollments: HashSet<(CourseId, UserId)>,
    identities: HashMap<UserId, IdentityHandle>,
    watch_seconds: HashMap<CourseId, u64>,
    durations: HashMap<CourseId, u64>,
    unavailable: bool,
}

/// In-memory stand-in for all three collaborators.
#[derive(Clone, Default)]
pub struct InMemoryDirectory {
    state: Arc<RwLock<DirectoryState>>,
}

impl InMemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enroll(&self, course: CourseId, user: UserId) {
        self.state.write().enrollments.insert((course, user));
    }

    pub fn set_payout_identity(&self, user: UserId, identity: IdentityHandle) {
        self.state.write().identities.insert(user, identity);
    }

    pub fn set_watch_seconds(&self, course: CourseId, seconds: u64) {
        self.state.write().watch_seconds.insert(course, seconds);
    }

    pub fn set_course_duration(&self, course: CourseId, seconds: u64) {
        self.state.write().durations.insert(course, seconds);
    }

    /// Make every call fail until switched back.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.state.write().unavailable = unavailable;
    }

    fn check(&self) -> Result<(), CollaboratorError> {
        if self.state.read().unavailable {
            return Err(CollaboratorError::Unavailable("directory offline".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl EnrollmentService for InMemoryDirectory {
    async fn is_enrolled(
        &self,
        course: &CourseId,
        user: &UserId,
    ) -> Result<bool, CollaboratorError> {
        self.check()?;
        Ok(self
            .state
            .read()
            .enrollments
            .contains(&(*course, user.clone())))
    }
}

#[async_trait]
impl WatchProgressService for InMemoryDirectory {
    async fn aggregated_watch_seconds(&self, course: &CourseId) -> Result<u64, CollaboratorError> {
        self.check()?;
        Ok(self
            .state
            .read()
            .watch_seconds
            .get(course)
            .copied()
            .unwrap_or(0))
    }

    async fn course_duration_seconds(&self, course: &CourseId) -> Result<u64, CollaboratorError> {
        self.check()?;
        Ok(self.state.read().durations.get(course).copied().unwrap_or(0))
    }
}

#[async_trait]
impl IdentityService for InMemoryDirectory {
    async fn payout_identity(
        &self,
        user: &UserId,
    ) -> Result<Option<IdentityHandle>, CollaboratorError> {
        self.check()?;
        Ok(self.state.read().identities.get(user).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn directory_answers_all_ports() {
        let dir = InMemoryDirectory::new();
        let course = CourseId::derive("rust-101").unwrap();
        let alice = UserId::new("alice").unwrap();
        dir.enroll(course, alice.clone());
        dir.set_payout_identity(alice.clone(), IdentityHandle::new("addr_alice").unwrap());
        dir.set_watch_seconds(course, 3_900);
        dir.set_course_duration(course, 1_200);

        let ports = Collaborators::from_directory(dir);
        assert!(ports.enrollment.is_enrolled(&course, &alice).await.unwrap());
        assert_eq!(
            ports.watch_progress.aggregated_watch_seconds(&course).await.unwrap(),
            3_900
        );
        assert_eq!(
            ports.identity.payout_identity(&alice).await.unwrap().unwrap().as_str(),
            "addr_alice"
        );
        let bob = UserId::new("bob").unwrap();
        assert!(!ports.enrollment.is_enrolled(&course, &bob).await.unwrap());
        assert!(ports.identity.payout_identity(&bob).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn offline_directory_fails() {
        let dir = InMemoryDirectory::new();
        dir.set_unavailable(true);
        let course = CourseId::derive("rust-101").unwrap();
        assert!(matches!(
            dir.course_duration_seconds(&course).await,
            Err(CollaboratorError::Unavailable(_))
        ));
    }
}
