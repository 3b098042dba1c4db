use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, Result, anyhow};
use clap::{CommandFactory, Parser};
use clap_complete::generate;
use tracing::{debug, error, trace, warn};

use s3objects_rs::config::Config;
use s3objects_rs::storage::create_storage;
use s3objects_rs::{
    CLIArgs, DeletionPipeline, ListObjectsRequest, Operation, PipelineCancellationToken,
    S3ObjectsError, create_pipeline_cancellation_token, exit_code_from_error, is_cancelled_error,
    list_and_enrich,
};

mod ctrl_c_handler;
mod tracing_init;

const EXIT_CODE_ERROR: i32 = 1;
const EXIT_CODE_WARNING: i32 = 3;

/// s3objects - List and delete objects in S3 compatible storage.
///
/// This binary is a thin wrapper over the s3objects-rs library.
#[cfg_attr(coverage_nightly, coverage(off))]
#[tokio::main]
async fn main() -> Result<()> {
    let (config, operation) = load_config_exit_if_err();

    let Some(operation) = operation else {
        if let Some(shell) = config.auto_complete_shell {
            generate(
                shell,
                &mut CLIArgs::command(),
                "s3objects",
                &mut std::io::stdout(),
            );
        }
        return Ok(());
    };

    start_tracing_if_necessary(&config);

    trace!("config = {:?}", config);

    let warn_as_error = config.warn_as_error;
    match run(config, operation).await {
        Ok(false) => Ok(()),
        Ok(true) => {
            std::process::exit(if warn_as_error {
                EXIT_CODE_ERROR
            } else {
                EXIT_CODE_WARNING
            });
        }
        Err(e) if is_cancelled_error(&e) => {
            debug!("operation cancelled by user.");
            Ok(())
        }
        Err(e) => {
            error!(error = format!("{e:#}"), "s3objects failed.");
            eprintln!("Error: {e:#}");
            std::process::exit(exit_code_from_error(&e));
        }
    }
}

// Returns no operation when only shell completions were requested.
#[cfg_attr(coverage_nightly, coverage(off))]
fn load_config_exit_if_err() -> (Config, Option<Operation>) {
    let args = CLIArgs::parse();
    let config = match Config::try_from(args.clone()) {
        Ok(config) => config,
        Err(error_message) => {
            clap::Error::raw(clap::error::ErrorKind::ValueValidation, error_message).exit()
        }
    };

    if config.auto_complete_shell.is_some() {
        return (config, None);
    }

    match Operation::try_from(&args) {
        Ok(operation) => (config, Some(operation)),
        Err(error_message) => {
            clap::Error::raw(clap::error::ErrorKind::ValueValidation, error_message).exit()
        }
    }
}

fn start_tracing_if_necessary(config: &Config) -> bool {
    let Some(tracing_config) = config.tracing_config.as_ref() else {
        return false;
    };

    tracing_init::init_tracing(tracing_config);
    true
}

/// Run the operation and report whether it completed with warnings.
async fn run(config: Config, operation: Operation) -> Result<bool> {
    let cancellation_token = create_pipeline_cancellation_token();
    ctrl_c_handler::spawn_ctrl_c_handler(cancellation_token.clone());

    let start_time = tokio::time::Instant::now();

    let has_warning = match operation {
        Operation::List(request) => list(config, request, cancellation_token).await?,
        Operation::Remove {
            bucket,
            path,
            version_id,
            recursive,
        } => {
            let pipeline = DeletionPipeline::new(config, cancellation_token).await;
            pipeline
                .delete(&bucket, &path, version_id.as_deref(), recursive)
                .await?;
            pipeline.has_warning()
        }
    };

    let duration_sec = format!("{:.3}", start_time.elapsed().as_secs_f32());
    if has_warning {
        warn!(duration_sec = duration_sec, "s3objects completed with warnings.");
    } else {
        debug!(duration_sec = duration_sec, "s3objects has been completed.");
    }

    Ok(has_warning)
}

async fn list(
    config: Config,
    request: ListObjectsRequest,
    cancellation_token: PipelineCancellationToken,
) -> Result<bool> {
    let has_warning = Arc::new(AtomicBool::new(false));
    let storage = create_storage(config.clone(), cancellation_token.clone()).await;

    // A cancelled storage ends its listing early; never print that partial result.
    let response = tokio::select! {
        result = list_and_enrich(storage, &config, &request, has_warning.clone()) => result?,
        _ = cancellation_token.cancelled() => return Err(anyhow!(S3ObjectsError::Cancelled)),
    };
    let json = serde_json::to_string_pretty(&response).context("serializing listing failed.")?;
    println!("{json}");

    Ok(has_warning.load(Ordering::SeqCst))
}
