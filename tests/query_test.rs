//! Query interface integration tests.

mod common;

use assert_matches::assert_matches;
use common::{standard_profiles, ScriptedRunner, TestHarness};

use rd_core::{Error, JobStatus, Requester, UserId};
use rd_store::JobFilter;
use renditiond::JobQuery;

#[tokio::test]
async fn owner_sees_progress_of_own_job() {
    let h = TestHarness::new(ScriptedRunner::new());
    let query = JobQuery::new(h.store.clone());
    let asset = h.source();
    let job_id = h.orchestrator.start_job(asset, standard_profiles()).unwrap();

    let job = query.get_job(job_id, &h.requester()).unwrap();
    assert_eq!(job.tasks.len(), 3);

    h.wait(job_id).await;
    let job = query.get_job(job_id, &h.requester()).unwrap();
    assert_eq!(job.status, JobStatus::Completed);
}

#[tokio::test]
async fn foreign_job_is_not_authorized() {
    let h = TestHarness::new(ScriptedRunner::new());
    let query = JobQuery::new(h.store.clone());
    let asset = h.source();
    let job_id = h.orchestrator.start_job(asset, standard_profiles()).unwrap();

    let stranger = Requester::user(UserId::new());
    assert_matches!(query.get_job(job_id, &stranger), Err(Error::NotAuthorized(_)));
    assert!(query.list_own_jobs(&stranger).is_empty());

    let admin = Requester::admin(UserId::new());
    assert!(query.get_job(job_id, &admin).is_ok());
    let all = query
        .list_jobs(
            &admin,
            &JobFilter {
                owner: Some(h.owner),
                ..JobFilter::default()
            },
        )
        .unwrap();
    assert_eq!(all.len(), 1);

    h.wait(job_id).await;
}
