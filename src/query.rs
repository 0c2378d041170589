//! Read-only, authorization-checked access to job state.

use std::sync::Arc;

use rd_core::{Job, JobId, Requester, Result};
use rd_store::{JobFilter, JobStore};

/// Answers status queries on behalf of a requester.
#[derive(Debug, Clone)]
pub struct JobQuery {
    store: Arc<JobStore>,
}

impl JobQuery {
    pub fn new(store: Arc<JobStore>) -> Self {
        Self { store }
    }

    /// A snapshot of one job.
    ///
    /// # Errors
    ///
    /// - [`rd_core::Error::NotFound`] if the job does not exist.
    /// - [`rd_core::Error::NotAuthorized`] if the requester neither owns the
    ///   job's asset nor holds the admin role.
    pub fn get_job(&self, job_id: JobId, requester: &Requester) -> Result<Job> {
        let job = self.store.get_job(job_id)?;
        requester.authorize(job.owner)?;
        Ok(job)
    }

    /// Every job matching `filter`. Admin only.
    pub fn list_jobs(&self, requester: &Requester, filter: &JobFilter) -> Result<Vec<Job>> {
        requester.require_admin()?;
        Ok(self.store.list_jobs(filter))
    }

    /// The requester's own jobs, oldest first.
    pub fn list_own_jobs(&self, requester: &Requester) -> Vec<Job> {
        self.store.list_jobs(&JobFilter::owner(requester.user_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use rd_core::{Asset, Error, ProfileSet, UserId};
    use std::path::PathBuf;

    fn setup() -> (JobQuery, UserId, JobId) {
        let store = Arc::new(JobStore::in_memory());
        let owner = UserId::new();
        let asset = Asset::new(owner, PathBuf::from("/uploads/clip.mov"));
        let job = store.create_job(&asset, &ProfileSet::standard()).unwrap();
        (JobQuery::new(store), owner, job.id)
    }

    #[test]
    fn owner_can_read_own_job() {
        let (query, owner, job_id) = setup();
        let job = query.get_job(job_id, &Requester::user(owner)).unwrap();
        assert_eq!(job.id, job_id);
    }

    #[test]
    fn stranger_is_not_authorized() {
        let (query, _, job_id) = setup();
        assert_matches!(
            query.get_job(job_id, &Requester::user(UserId::new())),
            Err(Error::NotAuthorized(_))
        );
    }

    #[test]
    fn admin_reads_any_job() {
        let (query, _, job_id) = setup();
        assert!(query.get_job(job_id, &Requester::admin(UserId::new())).is_ok());
    }

    #[test]
    fn unknown_job_is_not_found() {
        let (query, owner, _) = setup();
        assert_matches!(
            query.get_job(JobId::new(), &Requester::user(owner)),
            Err(Error::NotFound { .. })
        );
    }

    #[test]
    fn listing_all_requires_admin() {
        let (query, owner, _) = setup();
        assert_matches!(
            query.list_jobs(&Requester::user(owner), &JobFilter::default()),
            Err(Error::NotAuthorized(_))
        );
        let all = query
            .list_jobs(&Requester::admin(UserId::new()), &JobFilter::default())
            .unwrap();
        assert_eq!(all.len(), 1);
    }

    #[test]
    fn own_jobs_only() {
        let (query, owner, job_id) = setup();
        let mine = query.list_own_jobs(&Requester::user(owner));
        assert_eq!(mine.len(), 1);
        assert_eq!(mine[0].id, job_id);
        assert!(query.list_own_jobs(&Requester::user(UserId::new())).is_empty());
    }
}
