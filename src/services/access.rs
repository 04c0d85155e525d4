use crate::models::job::Job;

/// The caller of a submission or query operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub id: String,
    pub is_admin: bool,
}

impl Principal {
    pub fn user(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            is_admin: false,
        }
    }

    pub fn admin(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            is_admin: true,
        }
    }
}

/// Ownership and privilege decisions for job access.
pub trait AccessPolicy: Send + Sync {
    fn is_owner(&self, principal: &Principal, job: &Job) -> bool {
        principal.id == job.owner
    }

    fn is_privileged(&self, principal: &Principal) -> bool;

    fn can_access(&self, principal: &Principal, job: &Job) -> bool {
        self.is_owner(principal, job) || self.is_privileged(principal)
    }
}

/// Owners see their own jobs; admins see everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct OwnerOrAdmin;

impl AccessPolicy for OwnerOrAdmin {
    fn is_privileged(&self, principal: &Principal) -> bool {
        principal.is_admin
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::job::{JobInput, JobKind};

    #[test]
    fn test_owner_or_admin() {
        let job = Job::new(JobKind::TextToImage, JobInput::prompt("a"), "alice");
        let policy = OwnerOrAdmin;

        assert!(policy.can_access(&Principal::user("alice"), &job));
        assert!(!policy.can_access(&Principal::user("bob"), &job));
        assert!(policy.can_access(&Principal::admin("root"), &job));
    }
}
