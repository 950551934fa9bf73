//! Test support utilities shared across unit and integration tests.

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::env;
use std::ffi::OsString;
use std::sync::{Arc, Mutex, MutexGuard as StdMutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::{Mutex as AsyncMutex, MutexGuard};

use crate::command::{CommandError, CommandOutput, CommandRunner};
use crate::storage::{BucketStore, ObjectPage, StorageError, StorageFuture};

#[derive(Debug, Default)]
struct RunnerState {
    responses: VecDeque<CommandOutput>,
    invocations: Vec<CommandInvocation>,
    succeed_when_empty: bool,
    delay: Option<Duration>,
}

/// Scripted command runner that returns pre-seeded outputs in FIFO order.
///
/// Used to drive deterministic command outcomes without spawning processes.
/// Clones share the same script and invocation log.
#[derive(Clone, Debug, Default)]
pub struct ScriptedRunner {
    state: Arc<Mutex<RunnerState>>,
}

/// Records a single invocation made through [`ScriptedRunner`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CommandInvocation {
    /// Program name as passed to the runner.
    pub program: String,
    /// Arguments passed to the program.
    pub args: Vec<OsString>,
}

impl CommandInvocation {
    /// Returns a shell-like command string for assertions.
    #[must_use]
    pub fn command_string(&self) -> String {
        let mut parts = Vec::with_capacity(self.args.len() + 1);
        parts.push(self.program.clone());
        parts.extend(
            self.args
                .iter()
                .map(|arg| arg.to_string_lossy().into_owned()),
        );
        parts.join(" ")
    }
}

impl ScriptedRunner {
    /// Creates a new runner with no queued responses.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a runner that reports success whenever its queue is empty.
    #[must_use]
    pub fn succeeding() -> Self {
        let runner = Self::default();
        runner.lock().succeed_when_empty = true;
        runner
    }

    /// Makes every invocation block the calling thread for `delay`.
    pub fn set_delay(&self, delay: Duration) {
        self.lock().delay = Some(delay);
    }

    fn lock(&self) -> StdMutexGuard<'_, RunnerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns a snapshot of all invocations recorded so far.
    #[must_use]
    pub fn invocations(&self) -> Vec<CommandInvocation> {
        self.lock().invocations.clone()
    }

    /// Returns the invocations rendered with
    /// [`CommandInvocation::command_string`].
    #[must_use]
    pub fn command_strings(&self) -> Vec<String> {
        self.lock()
            .invocations
            .iter()
            .map(CommandInvocation::command_string)
            .collect()
    }

    /// Pushes a successful exit status.
    pub fn push_success(&self) {
        self.push_output(Some(0), "", "");
    }

    /// Pushes a failing exit code with stderr text.
    pub fn push_failure(&self, code: i32) {
        self.push_output(Some(code), "", "simulated failure");
    }

    /// Pushes a response with no exit code to simulate abnormal termination.
    pub fn push_missing_exit_code(&self) {
        self.push_output(None, "", "");
    }

    /// Pushes an explicit command output response.
    pub fn push_output(
        &self,
        code: Option<i32>,
        stdout: impl Into<String>,
        stderr: impl Into<String>,
    ) {
        self.lock().responses.push_back(CommandOutput {
            code,
            stdout: stdout.into(),
            stderr: stderr.into(),
        });
    }
}

impl CommandRunner for ScriptedRunner {
    fn run(&self, program: &str, args: &[OsString]) -> Result<CommandOutput, CommandError> {
        let (delay, response) = {
            let mut state = self.lock();
            state.invocations.push(CommandInvocation {
                program: program.to_owned(),
                args: args.to_vec(),
            });
            let next = state.responses.pop_front();
            let response = match next {
                Some(output) => Some(output),
                None if state.succeed_when_empty => Some(CommandOutput {
                    code: Some(0),
                    stdout: String::new(),
                    stderr: String::new(),
                }),
                None => None,
            };
            (state.delay, response)
        };
        if let Some(pause) = delay {
            std::thread::sleep(pause);
        }
        response.ok_or_else(|| CommandError::Spawn {
            program: program.to_owned(),
            message: String::from("no scripted response available"),
        })
    }
}

/// Raw storage calls recorded and fault-injected by [`MemoryBucketStore`].
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum StoreCall {
    /// `list_buckets`.
    ListBuckets,
    /// `insert_bucket`.
    InsertBucket,
    /// `delete_bucket`.
    DeleteBucket,
    /// `list_objects`.
    ListObjects,
    /// `delete_object`.
    DeleteObject,
}

#[derive(Debug)]
struct StoreState {
    buckets: BTreeMap<String, BTreeSet<String>>,
    page_size: usize,
    failures: HashMap<StoreCall, VecDeque<StorageError>>,
    calls: Vec<(StoreCall, String)>,
    delay: Option<Duration>,
}

impl Default for StoreState {
    fn default() -> Self {
        Self {
            buckets: BTreeMap::new(),
            page_size: 1000,
            failures: HashMap::new(),
            calls: Vec::new(),
            delay: None,
        }
    }
}

impl StoreState {
    fn begin(&mut self, call: StoreCall, target: &str) -> Result<(), StorageError> {
        self.calls.push((call, target.to_owned()));
        match self.failures.get_mut(&call).and_then(VecDeque::pop_front) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

/// In-memory [`BucketStore`] with paging, call recording, and one-shot
/// failure injection. Clones share state.
#[derive(Clone, Debug, Default)]
pub struct MemoryBucketStore {
    state: Arc<Mutex<StoreState>>,
}

impl MemoryBucketStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> StdMutexGuard<'_, StoreState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn pause(&self) {
        let delay = self.lock().delay;
        if let Some(pause) = delay {
            tokio::time::sleep(pause).await;
        }
    }

    /// Limits object listings to `size` names per page.
    pub fn set_page_size(&self, size: usize) {
        self.lock().page_size = size.max(1);
    }

    /// Makes every call sleep for `delay` before touching state.
    pub fn set_delay(&self, delay: Duration) {
        self.lock().delay = Some(delay);
    }

    /// Seeds a bucket holding `objects`.
    pub fn add_bucket(&self, bucket: &str, objects: &[&str]) {
        self.lock().buckets.insert(
            bucket.to_owned(),
            objects.iter().map(|object| (*object).to_owned()).collect(),
        );
    }

    /// Queues `err` as the outcome of the next `call`.
    pub fn fail_next(&self, call: StoreCall, err: StorageError) {
        self.lock().failures.entry(call).or_default().push_back(err);
    }

    /// Returns whether `bucket` exists.
    #[must_use]
    pub fn has_bucket(&self, bucket: &str) -> bool {
        self.lock().buckets.contains_key(bucket)
    }

    /// Returns every bucket name in order.
    #[must_use]
    pub fn bucket_names(&self) -> Vec<String> {
        self.lock().buckets.keys().cloned().collect()
    }

    /// Returns the objects in `bucket`, or `None` when it does not exist.
    #[must_use]
    pub fn objects(&self, bucket: &str) -> Option<Vec<String>> {
        self.lock()
            .buckets
            .get(bucket)
            .map(|objects| objects.iter().cloned().collect())
    }

    /// Returns how many times `call` was made.
    #[must_use]
    pub fn count(&self, call: StoreCall) -> usize {
        self.lock()
            .calls
            .iter()
            .filter(|(made, _)| *made == call)
            .count()
    }

    /// Returns every recorded call with its bucket or object target.
    #[must_use]
    pub fn calls(&self) -> Vec<(StoreCall, String)> {
        self.lock().calls.clone()
    }
}

impl BucketStore for MemoryBucketStore {
    fn list_buckets<'a>(&'a self, project_id: &'a str) -> StorageFuture<'a, Vec<String>> {
        Box::pin(async move {
            self.pause().await;
            let mut state = self.lock();
            state.begin(StoreCall::ListBuckets, project_id)?;
            Ok(state.buckets.keys().cloned().collect())
        })
    }

    fn insert_bucket<'a>(
        &'a self,
        _project_id: &'a str,
        bucket: &'a str,
    ) -> StorageFuture<'a, ()> {
        Box::pin(async move {
            self.pause().await;
            let mut state = self.lock();
            state.begin(StoreCall::InsertBucket, bucket)?;
            if state.buckets.contains_key(bucket) {
                return Err(StorageError::BucketAlreadyExists {
                    bucket: bucket.to_owned(),
                });
            }
            state.buckets.insert(bucket.to_owned(), BTreeSet::new());
            Ok(())
        })
    }

    fn delete_bucket<'a>(&'a self, bucket: &'a str) -> StorageFuture<'a, ()> {
        Box::pin(async move {
            self.pause().await;
            let mut state = self.lock();
            state.begin(StoreCall::DeleteBucket, bucket)?;
            match state.buckets.get(bucket) {
                None => Err(StorageError::BucketNotFound {
                    bucket: bucket.to_owned(),
                }),
                Some(objects) if !objects.is_empty() => Err(StorageError::BucketNotEmpty {
                    bucket: bucket.to_owned(),
                }),
                Some(_) => {
                    state.buckets.remove(bucket);
                    Ok(())
                }
            }
        })
    }

    fn list_objects<'a>(
        &'a self,
        bucket: &'a str,
        page_token: Option<&'a str>,
    ) -> StorageFuture<'a, ObjectPage> {
        Box::pin(async move {
            self.pause().await;
            let mut state = self.lock();
            state.begin(StoreCall::ListObjects, bucket)?;
            let page_size = state.page_size;
            let objects = state
                .buckets
                .get(bucket)
                .ok_or_else(|| StorageError::BucketNotFound {
                    bucket: bucket.to_owned(),
                })?;
            let start = page_token
                .and_then(|token| token.parse::<usize>().ok())
                .unwrap_or(0);
            let names: Vec<String> = objects.iter().skip(start).take(page_size).cloned().collect();
            let end = start + names.len();
            let next_page_token = (end < objects.len()).then(|| end.to_string());
            Ok(ObjectPage {
                names,
                next_page_token,
            })
        })
    }

    fn delete_object<'a>(&'a self, bucket: &'a str, object: &'a str) -> StorageFuture<'a, ()> {
        Box::pin(async move {
            self.pause().await;
            let mut state = self.lock();
            state.begin(StoreCall::DeleteObject, object)?;
            if let Some(objects) = state.buckets.get_mut(bucket) {
                objects.remove(object);
            }
            Ok(())
        })
    }
}

/// Global mutex used to serialise environment mutation in tests.
pub static ENV_LOCK: AsyncMutex<()> = AsyncMutex::const_new(());

/// Guard that holds the env mutex and cleans up variables on drop.
pub struct EnvGuard {
    previous: Vec<(String, Option<OsString>)>,
    _guard: MutexGuard<'static, ()>,
}

impl EnvGuard {
    /// Sets and removes environment variables while holding a global mutex.
    /// A `None` value removes the variable for the guard's lifetime.
    pub async fn set_vars(pairs: &[(&str, Option<&str>)]) -> Self {
        debug_assert!(
            {
                let mut seen = BTreeSet::new();
                pairs.iter().all(|(key, _)| seen.insert(*key))
            },
            "duplicate environment variable keys passed to EnvGuard::set_vars"
        );

        let guard = ENV_LOCK.lock().await;
        let mut previous = Vec::with_capacity(pairs.len());
        for (key, value) in pairs {
            let old = env::var_os(key);
            // SAFETY: Environment mutation is serialised by `ENV_LOCK`, preventing races.
            unsafe {
                match value {
                    Some(val) => env::set_var(key, val),
                    None => env::remove_var(key),
                }
            }
            previous.push(((*key).to_owned(), old));
        }

        Self {
            previous,
            _guard: guard,
        }
    }
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        for (key, old) in &self.previous {
            // SAFETY: Environment mutation is serialised by holding `_guard`.
            unsafe {
                match old {
                    Some(val) => env::set_var(key, val),
                    None => env::remove_var(key),
                }
            }
        }
    }
}
