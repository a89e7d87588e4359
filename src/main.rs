// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use std::process::ExitCode;
use std::sync::Arc;

use resource_outbox::config::OutboxConfig;
use resource_outbox::crypto::{EncryptResourceTypes, EnvelopeBuilder, PublicKeyCache};
use resource_outbox::error::OutboxResult;
use resource_outbox::flush_poller::FlushPoller;
use resource_outbox::logging::init_logging;
use resource_outbox::queue::QueueManager;
use resource_outbox::transport::{HttpResourceClient, QueueingTransport};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> ExitCode {
    let config = match OutboxConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Configuration error: {e}");
            return ExitCode::FAILURE;
        }
    };
    if let Err(e) = init_logging(config.log_format) {
        eprintln!("{e}");
        return ExitCode::FAILURE;
    }

    match run(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "Resource outbox stopped");
            ExitCode::FAILURE
        }
    }
}

async fn run(config: OutboxConfig) -> OutboxResult<()> {
    let mut client = HttpResourceClient::new(&config.resource_base_url, config.http_timeout)?;
    if let Some(envelope) = &config.envelope {
        let delegate = EncryptResourceTypes::only(
            envelope.resource_types.iter().cloned(),
            envelope.key_id.clone(),
        );
        let builder = EnvelopeBuilder::new(
            PublicKeyCache::from_path(&envelope.cert_path),
            Arc::new(delegate),
        );
        client = client.with_envelope(&envelope.base_url, builder)?;
        info!(
            encrypted_base_url = %envelope.base_url,
            resource_types = ?envelope.resource_types,
            "Envelope encryption enabled"
        );
    }

    let host = client.host();
    let queue = QueueManager::for_host(&config.storage_paths(), &host, config.queue_options());
    queue.store().ensure_directory()?;
    let status = queue.status()?;
    info!(
        host = %host,
        queue_dir = %queue.store().layout().dir().display(),
        pending = status.pending,
        replay_failure = ?queue.replay_failure_policy(),
        "Resource outbox starting"
    );

    let transport = Arc::new(QueueingTransport::new(client, Arc::new(queue)));

    match transport.flush().await {
        Ok(submitted) => info!(submitted, "Startup flush complete"),
        Err(e) => warn!(error = %e, "Startup flush failed, will retry in background"),
    }

    let shutdown = CancellationToken::new();
    let poller = tokio::spawn(
        FlushPoller::new(transport.clone())
            .with_interval(config.flush_interval)
            .run(shutdown.clone()),
    );

    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for shutdown signal");
    }
    info!("Shutdown requested");
    shutdown.cancel();
    if let Err(e) = poller.await {
        warn!(error = %e, "Flush poller task ended abnormally");
    }

    let status = transport.queue().status()?;
    info!(pending = status.pending, "Resource outbox stopped");
    Ok(())
}
