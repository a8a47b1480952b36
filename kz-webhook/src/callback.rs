use std::fs;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::sync::Mutex;
use tokio::sync::mpsc;
use tokio::time::sleep;
use tracing::*;

use kz_core::errors::*;
use kz_core::prelude::*;
use kz_core::report::{
    CallbackAck,
    DriftReport,
};

use crate::config::BackendConfig;

const QUEUE_DEPTH: usize = 128;
const WORKERS: usize = 4;

err_impl! {CallbackError,
    #[error("backend returned {0}")]
    BackendStatus(String),

    #[error("backend did not acknowledge report {0}")]
    NotAcknowledged(String),
}

struct Backend {
    url: String,
    client: reqwest::Client,
    retry_count: u32,
    retry_interval: Duration,
}

impl Backend {
    fn new(config: &BackendConfig) -> anyhow::Result<Backend> {
        let mut builder = reqwest::Client::builder().timeout(Duration::from_secs(config.timeout));
        if let Some(ca_file) = &config.ca_file {
            let cert = reqwest::Certificate::from_pem(&fs::read(ca_file)?)?;
            builder = builder.add_root_certificate(cert);
        }
        Ok(Backend {
            url: config.url.clone(),
            client: builder.build()?,
            retry_count: config.retry_count,
            retry_interval: Duration::from_secs(config.retry_interval),
        })
    }

    async fn deliver(&self, report: &DriftReport) {
        for attempt in 0..=self.retry_count {
            match self.post(report).await {
                Ok(()) => {
                    debug!("report {} delivered to {}", report.spec.id, self.url);
                    return;
                },
                Err(err) => {
                    debug!("report {} to {} failed (attempt {attempt}): {err}", report.spec.id, self.url);
                    if attempt < self.retry_count {
                        sleep(self.retry_interval).await;
                    }
                },
            }
        }
        error!("giving up on report {} to {} after {} attempts", report.spec.id, self.url, self.retry_count + 1);
    }

    async fn post(&self, report: &DriftReport) -> EmptyResult {
        let resp = self.client.post(&self.url).json(report).send().await?;
        let status = resp.status();
        if !status.is_success() {
            bail!(CallbackError::backend_status(status.to_string()));
        }
        let ack: CallbackAck = resp.json().await?;
        if !ack.acknowledged {
            bail!(CallbackError::not_acknowledged(&report.spec.id));
        }
        Ok(())
    }
}

/// Fans drift/resolution reports out to every configured backend from a
/// small worker pool.  Fire-and-forget by design: a slow or broken backend
/// can never slow down or fail an admission.
pub struct CallbackSender {
    tx: Option<mpsc::Sender<DriftReport>>,
}

impl CallbackSender {
    pub fn new(configs: &[BackendConfig]) -> anyhow::Result<CallbackSender> {
        if configs.is_empty() {
            return Ok(CallbackSender { tx: None });
        }

        let backends: Arc<Vec<Backend>> = Arc::new(configs.iter().map(Backend::new).collect::<Result<_, _>>()?);
        let (tx, rx) = mpsc::channel(QUEUE_DEPTH);
        let rx = Arc::new(Mutex::new(rx));

        for _ in 0..WORKERS {
            tokio::spawn(worker(rx.clone(), backends.clone()));
        }

        Ok(CallbackSender { tx: Some(tx) })
    }

    pub fn send(&self, report: DriftReport) {
        let Some(tx) = &self.tx else {
            debug!("no backends configured, dropping report {}", report.spec.id);
            return;
        };
        if let Err(err) = tx.try_send(report) {
            warn!("callback queue full, dropping report: {err}");
        }
    }
}

async fn worker(rx: Arc<Mutex<mpsc::Receiver<DriftReport>>>, backends: Arc<Vec<Backend>>) {
    loop {
        let report = {
            let mut rx = rx.lock().await;
            rx.recv().await
        };
        let Some(report) = report else {
            // channel closed, we're shutting down
            return;
        };
        join_all(backends.iter().map(|b| b.deliver(&report))).await;
    }
}
