//! Credential revoke/persist/restart round trips.

use crate::prelude::{signed_cred, KEY};
use gridd_core::{CredError, FakeClock, JobId, StepId};
use gridd_node::credstore::CredStore;
use std::sync::Arc;

fn open_store(dir: &tempfile::TempDir, at: u64) -> CredStore {
    CredStore::open(
        dir.path().join("cred_state.json"),
        KEY.to_vec(),
        Arc::new(FakeClock::at(at)),
    )
    .unwrap()
}

#[test]
fn revoked_job_stays_revoked_across_restart() {
    let dir = tempfile::tempdir().unwrap();
    let cred = signed_cred(100, "n0", Some(vec![2]));

    {
        let store = open_store(&dir, 100);
        assert_eq!(
            store.verify(&cred, JobId(100), StepId(0), 1000, Some(2), "n0", false),
            Ok(())
        );
        store.revoke(JobId(100)).unwrap();
    }

    // Simulated restart: a fresh store from the same state file
    let store = open_store(&dir, 200);
    assert_eq!(
        store.verify(&cred, JobId(100), StepId(0), 1000, Some(2), "n0", false),
        Err(CredError::Revoked(JobId(100)))
    );
}

#[test]
fn seen_jobs_survive_restart_but_rewind_does_not() {
    let dir = tempfile::tempdir().unwrap();
    {
        let store = open_store(&dir, 100);
        assert!(store.insert_jobid(JobId(7)).unwrap());
        assert!(store.insert_jobid(JobId(8)).unwrap());
        store.rewind(JobId(8)).unwrap();
    }

    let store = open_store(&dir, 101);
    assert!(store.jobid_cached(JobId(7)), "seen persists");
    assert!(!store.jobid_cached(JobId(8)), "rewind persists too");
}

#[test]
fn expiration_window_clears_the_entry_eventually() {
    let dir = tempfile::tempdir().unwrap();
    {
        let store = open_store(&dir, 100);
        store.revoke(JobId(9)).unwrap();
        store.begin_expiration(JobId(9), 50).unwrap();
    }

    // Restart after the window has passed; first mutation prunes
    let store = open_store(&dir, 1_000);
    store.insert_jobid(JobId(10)).unwrap();
    assert!(!store.revoked(JobId(9)));
}

#[test]
fn signature_does_not_survive_field_tampering() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(&dir, 100);
    let mut cred = signed_cred(100, "n0", None);
    cred.hosts = "evil0".to_string();
    assert_eq!(
        store.verify(&cred, JobId(100), StepId(0), 1000, None, "evil0", false),
        Err(CredError::InvalidSignature)
    );
}
