//! Implementation of the `courier upload` command.

use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::Context;
use courier_transfer::{
    CourierConfig, Transfer, TransferCoordinator, TransferError, TransferManager, TransferResult,
    WorkUnit,
};
use object_store::path::Path as ObjectPath;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Arguments for the upload command.
pub struct UploadArgs {
    /// Configuration file.
    pub config: PathBuf,
    /// Files or directories to upload.
    pub paths: Vec<PathBuf>,
    /// Key prefix for uploaded objects.
    pub prefix: String,
    /// Worker thread override.
    pub pool_size: Option<usize>,
}

pub async fn run(args: UploadArgs) -> anyhow::Result<()> {
    let config_path = args
        .config
        .to_str()
        .context("configuration path is not valid UTF-8")?;
    let mut config = CourierConfig::load_from(config_path).context("failed to load configuration")?;
    if let Some(pool_size) = args.pool_size {
        config.transfer.pool_size = pool_size;
    }

    let prefix = ObjectPath::parse(args.prefix.trim_matches('/'))
        .with_context(|| format!("invalid key prefix: {}", args.prefix))?;

    let cancel = CancellationToken::new();
    let signals = tokio::spawn(shutdown_signal(cancel.clone()));

    let paths = args.paths;
    let work = WorkUnit::new(move |manager: &TransferManager| issue(manager, &prefix, &paths))
        .cancel_on(cancel.clone());

    let started = Instant::now();
    let result = TransferCoordinator::new(config.transfer.clone())
        .run_with_storage(&config.storage, work)
        .await;
    signals.abort();

    let completed = result.context("upload failed")?;
    for transfer in &completed {
        if let Some(uploaded) = transfer.outcome() {
            println!("  {} ({} bytes)", uploaded.location, uploaded.size);
        }
    }

    if cancel.is_cancelled() {
        println!("Upload cancelled: {} objects stored", completed.len());
    } else {
        println!(
            "Uploaded {} objects in {:.1?}",
            completed.len(),
            started.elapsed()
        );
    }
    Ok(())
}

/// One transfer per file; directories keep their name under the prefix.
fn issue(
    manager: &TransferManager,
    prefix: &ObjectPath,
    paths: &[PathBuf],
) -> TransferResult<Vec<Transfer>> {
    let mut transfers = Vec::new();
    for path in paths {
        let location = match file_name(path)? {
            Some(name) => prefix.child(name),
            None => prefix.clone(),
        };
        if path.is_dir() {
            transfers.extend(manager.upload_directory(&location, path)?);
        } else {
            transfers.push(manager.upload_file(location, path.clone())?);
        }
    }
    Ok(transfers)
}

fn file_name(path: &Path) -> TransferResult<Option<&str>> {
    path.file_name()
        .map(|name| {
            name.to_str()
                .ok_or_else(|| TransferError::InvalidPath(path.display().to_string()))
        })
        .transpose()
}

async fn shutdown_signal(cancel: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("received Ctrl+C, cancelling upload");
        }
        () = terminate => {
            info!("received SIGTERM, cancelling upload");
        }
    }
    cancel.cancel();
}
