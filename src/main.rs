//! Binary entry point for the `gcsvol` volume plugin.

use std::io::{self, Write};
use std::process;
use std::sync::Arc;

use clap::Parser;
use thiserror::Error;
use tokio::signal::unix::{SignalKind, signal};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use gcsvol::{
    BucketLifecycle, ConfigError, CredentialsError, Driver, DriverParts, GcsStore, LogFormat,
    MountExecutor, MountpointManager, PluginConfig, ProcessCommandRunner, ProtocolError,
    ReconcileError, ServiceAccountKey, StorageError, TokenSource, protocol,
};

mod cli;

use cli::{Cli, ServeCommand};

#[derive(Debug, Error)]
enum StartupError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Credentials(#[from] CredentialsError),
    #[error("storage client error: {0}")]
    Storage(#[from] StorageError),
    #[error("startup reconciliation failed: {0}")]
    Reconcile(#[from] ReconcileError),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let exit_code = match dispatch(cli).await {
        Ok(()) => 0,
        Err(err) => {
            error!(error = %err, "gcsvol stopped");
            report_error(&err);
            1
        }
    };

    process::exit(exit_code);
}

async fn dispatch(cli: Cli) -> Result<(), StartupError> {
    match cli {
        Cli::Serve(args) => serve(&args).await,
    }
}

async fn serve(args: &ServeCommand) -> Result<(), StartupError> {
    let mut config = PluginConfig::load_without_cli_args()?;
    apply_overrides(&mut config, args);
    config.validate()?;
    init_tracing(config.log_format()?);

    let key_path = config.key_file();
    let key = ServiceAccountKey::load(&key_path)?;
    info!(
        project = %key.project_id,
        account = key.client_email.as_deref().unwrap_or("unknown"),
        "credentials loaded"
    );

    let tokens = match config.access_token.as_deref().map(str::trim) {
        Some(token) if !token.is_empty() => TokenSource::Static(token.to_owned()),
        _ => TokenSource::service_account(key.document.as_str())?,
    };
    let store = GcsStore::new(config.gcs_settings(), tokens)?;
    let parts = DriverParts {
        mountpoints: MountpointManager::new(config.root_dir()),
        buckets: BucketLifecycle::new(store, key.project_id),
        mounter: MountExecutor::new(ProcessCommandRunner, key_path)
            .with_binaries(&config.mount_bin, &config.unmount_bin),
        settings: config.driver_settings(),
    };

    let (driver, report) = Driver::start(parts).await?;
    info!(
        volumes = report.registered,
        buckets_created = report.buckets_created.len(),
        "driver ready"
    );

    let listener = protocol::bind(&config.socket_path())?;
    protocol::serve(
        listener,
        protocol::router(Arc::new(driver)),
        shutdown_signal(),
    )
    .await?;
    info!("plugin stopped");
    Ok(())
}

fn apply_overrides(config: &mut PluginConfig, args: &ServeCommand) {
    if let Some(key_file) = &args.key_file {
        config.key_file = Some(key_file.clone());
    }
    if let Some(root_dir) = &args.root_dir {
        root_dir.clone_into(&mut config.root_dir);
    }
    if let Some(socket_path) = &args.socket_path {
        socket_path.clone_into(&mut config.socket_path);
    }
}

fn init_tracing(format: LogFormat) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .with_writer(io::stderr);
    let installed = match format {
        LogFormat::Json => builder.json().flatten_event(true).try_init(),
        LogFormat::Compact => builder.compact().try_init(),
    };
    if let Err(err) = installed {
        writeln!(io::stderr(), "failed to install log subscriber: {err}").ok();
    }
}

async fn shutdown_signal() {
    let terminate = async {
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                warn!(error = %err, "SIGTERM handler unavailable");
                std::future::pending::<()>().await;
            }
        }
    };
    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(err) = result {
                warn!(error = %err, "SIGINT handler failed");
            }
        }
        () = terminate => {}
    }
    info!("shutdown requested; draining connections");
}

fn report_error(err: &StartupError) {
    write_error(io::stderr(), err);
}

fn write_error(mut target: impl Write, err: &StartupError) {
    writeln!(target, "gcsvol: {err}").ok();
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> PluginConfig {
        PluginConfig {
            key_file: Some(String::from("/etc/gcsvol/key.json")),
            root_dir: String::from("/var/lib/docker-volumes/gcstorage"),
            socket_path: String::from("/run/docker/plugins/gcstorage.sock"),
            mount_bin: String::from("gcsfuse"),
            unmount_bin: String::from("fusermount"),
            bucket_location: String::from("US"),
            storage_class: String::from("STANDARD"),
            storage_endpoint: String::from("https://storage.googleapis.com/storage/v1"),
            access_token: None,
            rollback_on_create_failure: true,
            log_format: String::from("compact"),
        }
    }

    #[test]
    fn overrides_replace_only_given_values() {
        let mut config = base_config();
        apply_overrides(
            &mut config,
            &ServeCommand {
                key_file: Some(String::from("/tmp/key.json")),
                root_dir: None,
                socket_path: Some(String::from("/tmp/gcs.sock")),
            },
        );
        assert_eq!(config.key_file.as_deref(), Some("/tmp/key.json"));
        assert_eq!(config.root_dir, "/var/lib/docker-volumes/gcstorage");
        assert_eq!(config.socket_path, "/tmp/gcs.sock");
    }

    #[test]
    fn write_error_prefixes_binary_name() {
        let mut buffer = Vec::new();
        write_error(
            &mut buffer,
            &StartupError::Config(ConfigError::MissingField(String::from("key_file"))),
        );
        assert_eq!(
            String::from_utf8_lossy(&buffer),
            "gcsvol: configuration error: missing configuration field: key_file\n"
        );
    }
}
