//! BDD scenarios for the volume lifecycle.

use rstest_bdd_macros::scenario;

use super::test_helpers::{LifecycleContext, lifecycle_context};

#[scenario(
    path = "tests/features/volume_lifecycle.feature",
    name = "Create and remove a volume with bucket cleanup"
)]
fn scenario_create_and_remove(lifecycle_context: LifecycleContext) {
    drop(lifecycle_context);
}

#[scenario(
    path = "tests/features/volume_lifecycle.feature",
    name = "Keep the bucket when cleanup is disabled"
)]
fn scenario_keep_bucket(lifecycle_context: LifecycleContext) {
    drop(lifecycle_context);
}

#[scenario(
    path = "tests/features/volume_lifecycle.feature",
    name = "Share one mount between containers"
)]
fn scenario_shared_mount(lifecycle_context: LifecycleContext) {
    drop(lifecycle_context);
}

#[scenario(
    path = "tests/features/volume_lifecycle.feature",
    name = "Refuse to remove a mounted volume"
)]
fn scenario_remove_mounted(lifecycle_context: LifecycleContext) {
    drop(lifecycle_context);
}

#[scenario(
    path = "tests/features/volume_lifecycle.feature",
    name = "Rediscover volumes after a restart"
)]
fn scenario_restart(lifecycle_context: LifecycleContext) {
    drop(lifecycle_context);
}

#[scenario(
    path = "tests/features/volume_lifecycle.feature",
    name = "Roll back the mountpoint when bucket creation fails"
)]
fn scenario_rollback(lifecycle_context: LifecycleContext) {
    drop(lifecycle_context);
}

#[scenario(
    path = "tests/features/volume_lifecycle.feature",
    name = "Report unknown volumes"
)]
fn scenario_unknown_volume(lifecycle_context: LifecycleContext) {
    drop(lifecycle_context);
}
