//! BDD step definitions for the volume lifecycle.

use std::collections::HashMap;

use camino::Utf8PathBuf;
use gcsvol::test_support::StoreCall;
use gcsvol::{DriverError, ErrorKind, StorageError, VolumeName};
use rstest_bdd_macros::{given, then, when};

use super::test_helpers::{LifecycleContext, MOUNT_BIN, StepOutcome, UNMOUNT_BIN};

#[derive(Debug, thiserror::Error)]
pub enum StepError {
    #[error("assertion failed: {0}")]
    Assertion(String),
}

fn record_outcome(
    mut lifecycle_context: LifecycleContext,
    result: Result<(), DriverError>,
) -> LifecycleContext {
    lifecycle_context.outcome = Some(match result {
        Ok(()) => StepOutcome::Success,
        Err(err) => StepOutcome::Failure(err),
    });
    lifecycle_context
}

fn create_with(
    lifecycle_context: LifecycleContext,
    name: &str,
    options: &HashMap<String, String>,
) -> LifecycleContext {
    let driver = lifecycle_context.driver();
    let result = lifecycle_context
        .runtime
        .block_on(driver.create(name, options))
        .map(drop);
    record_outcome(lifecycle_context, result)
}

#[given("a running plugin driver")]
fn running_driver(mut lifecycle_context: LifecycleContext) -> LifecycleContext {
    lifecycle_context.driver = Some(lifecycle_context.start_driver());
    lifecycle_context
}

#[given("bucket \"{bucket}\" holds object \"{object}\"")]
fn bucket_holds_object(
    lifecycle_context: LifecycleContext,
    bucket: String,
    object: String,
) -> LifecycleContext {
    lifecycle_context.store.add_bucket(&bucket, &[object.as_str()]);
    lifecycle_context
}

#[given("bucket creation fails")]
fn bucket_creation_fails(lifecycle_context: LifecycleContext) -> LifecycleContext {
    lifecycle_context.store.fail_next(
        StoreCall::InsertBucket,
        StorageError::Api {
            operation: String::from("insert bucket"),
            status: 403,
            message: String::from("quota exceeded"),
        },
    );
    lifecycle_context
}

#[when("I create volume \"{name}\"")]
fn create_volume(lifecycle_context: LifecycleContext, name: String) -> LifecycleContext {
    create_with(lifecycle_context, &name, &HashMap::new())
}

#[when("I create volume \"{name}\" with option \"{key}\" set to \"{value}\"")]
fn create_volume_with_option(
    lifecycle_context: LifecycleContext,
    name: String,
    key: String,
    value: String,
) -> LifecycleContext {
    create_with(lifecycle_context, &name, &HashMap::from([(key, value)]))
}

#[when("container \"{id}\" mounts volume \"{name}\"")]
fn mount_volume(lifecycle_context: LifecycleContext, id: String, name: String) -> LifecycleContext {
    let driver = lifecycle_context.driver();
    let result = lifecycle_context
        .runtime
        .block_on(driver.mount(&name, &id))
        .map(drop);
    record_outcome(lifecycle_context, result)
}

#[when("container \"{id}\" unmounts volume \"{name}\"")]
fn unmount_volume(
    lifecycle_context: LifecycleContext,
    id: String,
    name: String,
) -> LifecycleContext {
    let driver = lifecycle_context.driver();
    let result = lifecycle_context.runtime.block_on(driver.unmount(&name, &id));
    record_outcome(lifecycle_context, result)
}

#[when("I remove volume \"{name}\"")]
fn remove_volume(lifecycle_context: LifecycleContext, name: String) -> LifecycleContext {
    let driver = lifecycle_context.driver();
    let result = lifecycle_context.runtime.block_on(driver.remove(&name));
    record_outcome(lifecycle_context, result)
}

#[when("the driver restarts")]
fn driver_restarts(mut lifecycle_context: LifecycleContext) -> LifecycleContext {
    lifecycle_context.driver = None;
    lifecycle_context.driver = Some(lifecycle_context.start_driver());
    lifecycle_context
}

#[then("the request succeeds")]
fn request_succeeds(lifecycle_context: &LifecycleContext) -> Result<(), StepError> {
    match &lifecycle_context.outcome {
        Some(StepOutcome::Success) => Ok(()),
        Some(StepOutcome::Failure(err)) => Err(StepError::Assertion(format!(
            "expected success, got failure: {err}"
        ))),
        None => Err(StepError::Assertion(String::from("missing outcome"))),
    }
}

#[then("the request fails with kind \"{kind}\"")]
fn request_fails_with(lifecycle_context: &LifecycleContext, kind: String) -> Result<(), StepError> {
    let expected = parse_kind(&kind)?;
    let Some(StepOutcome::Failure(err)) = &lifecycle_context.outcome else {
        return Err(StepError::Assertion(String::from(
            "expected failure outcome",
        )));
    };
    if err.kind() == expected {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "expected {expected:?}, got {:?}: {err}",
            err.kind()
        )))
    }
}

#[then("volume \"{name}\" is listed with state \"{state}\"")]
fn volume_listed(
    lifecycle_context: &LifecycleContext,
    name: String,
    state: String,
) -> Result<(), StepError> {
    let listed = lifecycle_context.driver().list();
    let record = listed
        .iter()
        .find(|record| record.name.as_str() == name)
        .ok_or_else(|| StepError::Assertion(format!("volume {name} is not listed")))?;
    if record.state.as_str() == state {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "expected {name} to be {state}, got {}",
            record.state
        )))
    }
}

#[then("volume \"{name}\" is not listed")]
fn volume_not_listed(lifecycle_context: &LifecycleContext, name: String) -> Result<(), StepError> {
    let listed = lifecycle_context.driver().list();
    if listed.iter().any(|record| record.name.as_str() == name) {
        Err(StepError::Assertion(format!("volume {name} is still listed")))
    } else {
        Ok(())
    }
}

#[then("bucket \"{bucket}\" exists")]
fn bucket_exists(lifecycle_context: &LifecycleContext, bucket: String) -> Result<(), StepError> {
    if lifecycle_context.store.has_bucket(&bucket) {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "bucket {bucket} missing; have {:?}",
            lifecycle_context.store.bucket_names()
        )))
    }
}

#[then("bucket \"{bucket}\" does not exist")]
fn bucket_absent(lifecycle_context: &LifecycleContext, bucket: String) -> Result<(), StepError> {
    if lifecycle_context.store.has_bucket(&bucket) {
        Err(StepError::Assertion(format!("bucket {bucket} still exists")))
    } else {
        Ok(())
    }
}

#[then("bucket \"{bucket}\" still holds object \"{object}\"")]
fn bucket_still_holds(
    lifecycle_context: &LifecycleContext,
    bucket: String,
    object: String,
) -> Result<(), StepError> {
    let objects = lifecycle_context.store.objects(&bucket).unwrap_or_default();
    if objects.contains(&object) {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "bucket {bucket} lost {object}; holds {objects:?}"
        )))
    }
}

#[then("the mountpoint of \"{name}\" exists")]
fn mountpoint_exists(lifecycle_context: &LifecycleContext, name: String) -> Result<(), StepError> {
    let path = data_dir(lifecycle_context, &name)?;
    if path.is_dir() {
        Ok(())
    } else {
        Err(StepError::Assertion(format!("{path} is not a directory")))
    }
}

#[then("the mountpoint of \"{name}\" does not exist")]
fn mountpoint_absent(lifecycle_context: &LifecycleContext, name: String) -> Result<(), StepError> {
    let path = data_dir(lifecycle_context, &name)?;
    if path.exists() {
        Err(StepError::Assertion(format!("{path} still exists")))
    } else {
        Ok(())
    }
}

#[then("the mount helper ran {count:u32} times")]
fn mount_helper_runs(lifecycle_context: &LifecycleContext, count: u32) -> Result<(), StepError> {
    expect_runs(lifecycle_context, MOUNT_BIN, count as usize)
}

#[then("the unmount helper ran {count:u32} times")]
fn unmount_helper_runs(
    lifecycle_context: &LifecycleContext,
    count: u32,
) -> Result<(), StepError> {
    expect_runs(lifecycle_context, UNMOUNT_BIN, count as usize)
}

fn expect_runs(
    lifecycle_context: &LifecycleContext,
    program: &str,
    expected: usize,
) -> Result<(), StepError> {
    let actual = lifecycle_context.helper_runs(program);
    if actual == expected {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "expected {program} to run {expected} times, ran {actual}: {:?}",
            lifecycle_context.runner.command_strings()
        )))
    }
}

fn data_dir(
    lifecycle_context: &LifecycleContext,
    name: &str,
) -> Result<Utf8PathBuf, StepError> {
    let volume =
        VolumeName::parse(name).map_err(|err| StepError::Assertion(err.to_string()))?;
    Ok(lifecycle_context
        .driver()
        .mountpoints()
        .mountpoint_for(&volume))
}

fn parse_kind(kind: &str) -> Result<ErrorKind, StepError> {
    match kind {
        "not_found" => Ok(ErrorKind::NotFound),
        "already_exists" => Ok(ErrorKind::AlreadyExists),
        "invalid_request" => Ok(ErrorKind::InvalidRequest),
        "invalid_state" => Ok(ErrorKind::InvalidState),
        "io" => Ok(ErrorKind::Io),
        "storage_api" => Ok(ErrorKind::StorageApi),
        "process" => Ok(ErrorKind::Process),
        _ => Err(StepError::Assertion(format!("unknown error kind: {kind}"))),
    }
}
