//! Shared fixtures for volume lifecycle scenarios.

use std::fmt;
use std::sync::Arc;

use camino::Utf8PathBuf;
use gcsvol::test_support::{MemoryBucketStore, ScriptedRunner};
use gcsvol::{
    BucketLifecycle, Driver, DriverError, DriverParts, DriverSettings, MountExecutor,
    MountpointManager,
};
use rstest::fixture;
use tempfile::TempDir;
use tokio::runtime::Runtime;

pub type TestDriver = Driver<MemoryBucketStore, ScriptedRunner>;

pub const PROJECT_ID: &str = "p";
pub const MOUNT_BIN: &str = "gcsfuse";
pub const UNMOUNT_BIN: &str = "fusermount";

#[derive(Clone, Debug)]
pub enum StepOutcome {
    Success,
    Failure(DriverError),
}

#[derive(Clone)]
pub struct LifecycleContext {
    pub _workspace: Arc<TempDir>,
    pub root: Utf8PathBuf,
    pub store: MemoryBucketStore,
    pub runner: ScriptedRunner,
    pub runtime: Arc<Runtime>,
    pub driver: Option<Arc<TestDriver>>,
    pub outcome: Option<StepOutcome>,
}

impl fmt::Debug for LifecycleContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LifecycleContext")
            .field("root", &self.root)
            .field("store", &self.store)
            .field("runner", &self.runner)
            .field("outcome", &self.outcome)
            .finish_non_exhaustive()
    }
}

impl LifecycleContext {
    /// Starts a fresh driver over the shared root and store, as a plugin
    /// restart would.
    pub fn start_driver(&self) -> Arc<TestDriver> {
        let parts = DriverParts {
            mountpoints: MountpointManager::new(self.root.clone()),
            buckets: BucketLifecycle::new(self.store.clone(), PROJECT_ID),
            mounter: MountExecutor::new(self.runner.clone(), "/etc/gcsvol/key.json")
                .with_binaries(MOUNT_BIN, UNMOUNT_BIN),
            settings: DriverSettings::default(),
        };
        let (driver, _) = self
            .runtime
            .block_on(Driver::start(parts))
            .unwrap_or_else(|err| panic!("driver should start: {err}"));
        Arc::new(driver)
    }

    pub fn driver(&self) -> Arc<TestDriver> {
        self.driver
            .clone()
            .unwrap_or_else(|| panic!("test setup requires a running driver"))
    }

    pub fn helper_runs(&self, program: &str) -> usize {
        self.runner
            .invocations()
            .iter()
            .filter(|call| call.program == program)
            .count()
    }
}

#[fixture]
pub fn lifecycle_context() -> LifecycleContext {
    let workspace = TempDir::new().unwrap_or_else(|err| panic!("tempdir: {err}"));
    let root = Utf8PathBuf::from_path_buf(workspace.path().join("gcstorage"))
        .unwrap_or_else(|path| panic!("temp path should be utf8: {}", path.display()));
    let runtime = Runtime::new().unwrap_or_else(|err| panic!("tokio runtime: {err}"));
    LifecycleContext {
        _workspace: Arc::new(workspace),
        root,
        store: MemoryBucketStore::new(),
        runner: ScriptedRunner::succeeding(),
        runtime: Arc::new(runtime),
        driver: None,
        outcome: None,
    }
}
