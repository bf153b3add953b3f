//! Fakes shared by unit tests.

use std::{
    collections::VecDeque,
    sync::{
        Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use serde_json::{Map, json};
use tokio::sync::Notify;

use crate::{
    gateway::{AnalysisGateway, GatewayError, JobSnapshot, SubmitResponse},
    prelude::*,
    stage::ObjectStage,
};

/// Build a job snapshot with the given status.
pub fn snapshot(job_id: &str, status: &str, result: Option<Value>) -> JobSnapshot {
    JobSnapshot {
        id: Some(job_id.to_owned()),
        status: status.to_owned(),
        result,
        extra: Map::new(),
    }
}

/// An in-memory [`ObjectStage`] which records every call.
#[derive(Default)]
pub struct FakeStage {
    fail_puts: bool,
    fail_deletes: bool,
    hang_deletes: bool,
    puts: Mutex<Vec<String>>,
    deletes: Mutex<Vec<Url>>,
    delete_happened: Notify,
}

impl FakeStage {
    /// A stage where every upload fails.
    pub fn failing_puts() -> Self {
        Self {
            fail_puts: true,
            ..Self::default()
        }
    }

    /// A stage where every delete fails.
    pub fn failing_deletes() -> Self {
        Self {
            fail_deletes: true,
            ..Self::default()
        }
    }

    /// A stage where every delete is recorded, then never finishes.
    pub fn hanging_deletes() -> Self {
        Self {
            hang_deletes: true,
            ..Self::default()
        }
    }

    /// Names passed to successful `put` calls.
    pub fn put_names(&self) -> Vec<String> {
        self.puts.lock().expect("lock poisoned").clone()
    }

    /// How many `put` calls were made.
    pub fn put_count(&self) -> usize {
        self.puts.lock().expect("lock poisoned").len()
    }

    /// Locators passed to `delete`, in order.
    pub fn deleted(&self) -> Vec<Url> {
        self.deletes.lock().expect("lock poisoned").clone()
    }

    /// How many `delete` calls were made.
    pub fn delete_count(&self) -> usize {
        self.deletes.lock().expect("lock poisoned").len()
    }

    /// Wait until at least `count` deletes have happened.
    pub async fn wait_for_deletes(&self, count: usize) {
        let wait = async {
            loop {
                let notified = self.delete_happened.notified();
                if self.delete_count() >= count {
                    return;
                }
                notified.await;
            }
        };
        tokio::time::timeout(Duration::from_secs(5), wait)
            .await
            .expect("timed out waiting for staged object to be deleted");
    }

    /// The locator we hand out for `name`.
    pub fn locator_for(name: &str) -> Url {
        Url::parse(&format!("https://stage.test/docs/{name}?sig=fake"))
            .expect("bad fake locator")
    }
}

#[async_trait]
impl ObjectStage for FakeStage {
    async fn put(&self, name: &str, _content: Vec<u8>) -> Result<Url> {
        if self.fail_puts {
            bail!("fake upload failure");
        }
        self.puts.lock().expect("lock poisoned").push(name.to_owned());
        Ok(Self::locator_for(name))
    }

    async fn delete(&self, locator: &Url) -> Result<()> {
        let already_deleted = {
            let mut deletes = self.deletes.lock().expect("lock poisoned");
            let already_deleted = deletes.contains(locator);
            deletes.push(locator.clone());
            already_deleted
        };
        self.delete_happened.notify_waiters();
        if self.hang_deletes {
            std::future::pending::<()>().await;
        }
        if self.fail_deletes {
            bail!("fake delete failure");
        }
        if already_deleted {
            bail!("{locator} was already deleted");
        }
        Ok(())
    }
}

/// One scripted reply to `fetch_status`.
pub enum FetchReply {
    Snapshot(JobSnapshot),
    Transient,
    Fatal,
    Panic,
    /// Never answer.
    Hang,
}

/// A scripted [`AnalysisGateway`].
pub struct FakeGateway {
    submit_reply: Mutex<Option<Result<SubmitResponse, GatewayError>>>,
    fetch_replies: Mutex<VecDeque<FetchReply>>,
    /// Returned once `fetch_replies` is empty.
    fallback: Option<JobSnapshot>,
    submitted: Mutex<Vec<(String, Url)>>,
    fetch_count: AtomicUsize,
}

impl FakeGateway {
    /// Accept a job as `job_id`, then reply to fetches from `replies`.
    pub fn new(job_id: &str, replies: Vec<FetchReply>) -> Self {
        Self::with_submit_reply(
            Ok(SubmitResponse {
                id: Some(job_id.to_owned()),
                status: Some("Running".to_owned()),
            }),
            replies,
        )
    }

    /// Reply to `submit` with `reply`.
    pub fn with_submit_reply(
        reply: Result<SubmitResponse, GatewayError>,
        replies: Vec<FetchReply>,
    ) -> Self {
        Self {
            submit_reply: Mutex::new(Some(reply)),
            fetch_replies: Mutex::new(replies.into()),
            fallback: None,
            submitted: Mutex::new(vec![]),
            fetch_count: AtomicUsize::new(0),
        }
    }

    /// Report `n` "Running" statuses, then succeed with `result`.
    pub fn running_then_succeeded(job_id: &str, n: usize, result: Value) -> Self {
        let mut replies = (0..n)
            .map(|_| FetchReply::Snapshot(snapshot(job_id, "Running", None)))
            .collect::<Vec<_>>();
        replies.push(FetchReply::Snapshot(snapshot(
            job_id,
            "Succeeded",
            Some(result),
        )));
        Self::new(job_id, replies)
    }

    /// Report "Running" forever.
    pub fn always_running(job_id: &str) -> Self {
        let mut gateway = Self::new(job_id, vec![]);
        gateway.fallback = Some(snapshot(job_id, "Running", None));
        gateway
    }

    /// `(analyzer_id, locator)` pairs passed to `submit`.
    pub fn submitted(&self) -> Vec<(String, Url)> {
        self.submitted.lock().expect("lock poisoned").clone()
    }

    /// How many times `submit` was called.
    pub fn submit_count(&self) -> usize {
        self.submitted.lock().expect("lock poisoned").len()
    }

    /// How many times `fetch_status` was called.
    pub fn fetch_count(&self) -> usize {
        self.fetch_count.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AnalysisGateway for FakeGateway {
    async fn submit(
        &self,
        analyzer_id: &str,
        locator: &Url,
    ) -> Result<SubmitResponse, GatewayError> {
        self.submitted
            .lock()
            .expect("lock poisoned")
            .push((analyzer_id.to_owned(), locator.clone()));
        self.submit_reply
            .lock()
            .expect("lock poisoned")
            .take()
            .unwrap_or_else(|| panic!("submit called more than once"))
    }

    async fn fetch_status(
        &self,
        job_id: &str,
        _analyzer_id: &str,
    ) -> Result<JobSnapshot, GatewayError> {
        self.fetch_count.fetch_add(1, Ordering::SeqCst);
        let reply = self.fetch_replies.lock().expect("lock poisoned").pop_front();
        match reply {
            Some(FetchReply::Snapshot(snapshot)) => Ok(snapshot),
            Some(FetchReply::Transient) => Err(GatewayError::Http {
                status: 503,
                message: "busy".to_owned(),
            }),
            Some(FetchReply::Fatal) => Err(GatewayError::Http {
                status: 401,
                message: json!({ "error": "denied" }).to_string(),
            }),
            Some(FetchReply::Panic) => panic!("fake gateway exploded"),
            Some(FetchReply::Hang) => std::future::pending().await,
            None => match &self.fallback {
                Some(snapshot) => Ok(snapshot.clone()),
                None => panic!("no scripted reply for job {job_id}"),
            },
        }
    }
}
