//! A scriptable [`Adapter`] used by the integration tests in this directory.
//!
//! Each call kind that a test actually needs to control (`query`, `declare`,
//! `fetch`, `deallocate`) is driven by its own FIFO queue of scripted steps;
//! an empty queue falls back to a boring default success so tests that don't
//! care about a particular call don't need to script it.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex as StdMutex;

use async_trait::async_trait;
use dbc_core::{Adapter, CallOptions, DeclareOutcome, FetchOutcome, Outcome};

#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct MockError(pub String);

pub enum Step {
    Ok(String),
    Err(String),
    Disconnect(String),
}

pub enum DeclareStep {
    Ok(u64),
    OkQuery(String, u64),
    Err(String),
    Disconnect(String),
}

pub enum FetchStep {
    Cont(String),
    Halt(String),
    Err(String),
    Disconnect(String),
}

/// A connect+backing-store double. `State` is just a generation counter so
/// `connect`'s return value is observable in assertions if a test wants it.
pub struct MockAdapter {
    pub connect_attempts: AtomicU64,
    pub disconnects: AtomicU64,
    fail_connects: AtomicU64,
    query_script: StdMutex<VecDeque<Step>>,
    declare_script: StdMutex<VecDeque<DeclareStep>>,
    fetch_script: StdMutex<VecDeque<FetchStep>>,
    deallocate_script: StdMutex<VecDeque<Step>>,
    rollback_script: StdMutex<VecDeque<Step>>,
}

impl Default for MockAdapter {
    fn default() -> Self {
        MockAdapter {
            connect_attempts: AtomicU64::new(0),
            disconnects: AtomicU64::new(0),
            fail_connects: AtomicU64::new(0),
            query_script: StdMutex::new(VecDeque::new()),
            declare_script: StdMutex::new(VecDeque::new()),
            fetch_script: StdMutex::new(VecDeque::new()),
            deallocate_script: StdMutex::new(VecDeque::new()),
            rollback_script: StdMutex::new(VecDeque::new()),
        }
    }
}

impl MockAdapter {
    pub fn fail_next_connects(&self, n: u64) {
        self.fail_connects.store(n, Ordering::SeqCst);
    }

    pub fn push_query(&self, step: Step) {
        self.query_script.lock().unwrap().push_back(step);
    }

    pub fn push_declare(&self, step: DeclareStep) {
        self.declare_script.lock().unwrap().push_back(step);
    }

    pub fn push_fetch(&self, step: FetchStep) {
        self.fetch_script.lock().unwrap().push_back(step);
    }

    pub fn push_deallocate(&self, step: Step) {
        self.deallocate_script.lock().unwrap().push_back(step);
    }

    pub fn push_rollback(&self, step: Step) {
        self.rollback_script.lock().unwrap().push_back(step);
    }
}

#[async_trait]
impl Adapter for MockAdapter {
    type State = u64;
    type Error = MockError;
    type Query = String;
    type Params = ();
    type Result = String;
    type Cursor = u64;
    type Info = ();
    type Options = ();

    async fn connect(&self, _opts: &()) -> Result<u64, MockError> {
        let attempt = self.connect_attempts.fetch_add(1, Ordering::SeqCst);
        if self.fail_connects.load(Ordering::SeqCst) > 0 {
            self.fail_connects.fetch_sub(1, Ordering::SeqCst);
            return Err(MockError("connect failed".into()));
        }
        Ok(attempt)
    }

    async fn disconnect(&self, _err: Option<&MockError>, _state: u64) {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
    }

    async fn checkout(&self, state: u64) -> Outcome<(), Self> {
        Outcome::Ok((), state)
    }

    async fn checkin(&self, state: u64) -> Outcome<(), Self> {
        Outcome::Ok((), state)
    }

    async fn handle_begin(&self, _opts: &CallOptions, state: u64) -> Outcome<String, Self> {
        Outcome::Ok("BEGIN".into(), state)
    }

    async fn handle_commit(&self, _opts: &CallOptions, state: u64) -> Outcome<String, Self> {
        Outcome::Ok("COMMIT".into(), state)
    }

    async fn handle_rollback(&self, _opts: &CallOptions, state: u64) -> Outcome<String, Self> {
        match self.rollback_script.lock().unwrap().pop_front() {
            None => Outcome::Ok("ROLLBACK".into(), state),
            Some(Step::Ok(v)) => Outcome::Ok(v, state),
            Some(Step::Err(e)) => Outcome::Error(MockError(e), state),
            Some(Step::Disconnect(e)) => Outcome::Disconnect(MockError(e), state),
        }
    }

    async fn handle_query(&self, query: String, _params: (), _opts: &CallOptions, state: u64) -> Outcome<String, Self> {
        match self.query_script.lock().unwrap().pop_front() {
            None => Outcome::Ok(query, state),
            Some(Step::Ok(v)) => Outcome::Ok(v, state),
            Some(Step::Err(e)) => Outcome::Error(MockError(e), state),
            Some(Step::Disconnect(e)) => Outcome::Disconnect(MockError(e), state),
        }
    }

    async fn handle_declare(&self, query: String, _params: (), _opts: &CallOptions, state: u64) -> DeclareOutcome<Self> {
        match self.declare_script.lock().unwrap().pop_front() {
            None => DeclareOutcome::Ok(0, state),
            Some(DeclareStep::Ok(cursor)) => DeclareOutcome::Ok(cursor, state),
            Some(DeclareStep::OkQuery(q, cursor)) => DeclareOutcome::OkQuery(q, cursor, state),
            Some(DeclareStep::Err(e)) => {
                let _ = query;
                DeclareOutcome::Error(MockError(e), state)
            }
            Some(DeclareStep::Disconnect(e)) => DeclareOutcome::Disconnect(MockError(e), state),
        }
    }

    async fn handle_fetch(&self, _query: String, _cursor: u64, _opts: &CallOptions, state: u64) -> FetchOutcome<Self> {
        match self.fetch_script.lock().unwrap().pop_front() {
            None => FetchOutcome::Halt("eof".into(), state),
            Some(FetchStep::Cont(v)) => FetchOutcome::Cont(v, state),
            Some(FetchStep::Halt(v)) => FetchOutcome::Halt(v, state),
            Some(FetchStep::Err(e)) => FetchOutcome::Error(MockError(e), state),
            Some(FetchStep::Disconnect(e)) => FetchOutcome::Disconnect(MockError(e), state),
        }
    }

    async fn handle_deallocate(&self, _query: String, _cursor: u64, _opts: &CallOptions, state: u64) -> Outcome<String, Self> {
        match self.deallocate_script.lock().unwrap().pop_front() {
            None => Outcome::Ok("closed".into(), state),
            Some(Step::Ok(v)) => Outcome::Ok(v, state),
            Some(Step::Err(e)) => Outcome::Error(MockError(e), state),
            Some(Step::Disconnect(e)) => Outcome::Disconnect(MockError(e), state),
        }
    }
}
