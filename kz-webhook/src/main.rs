mod annotations;
mod callback;
mod config;
mod drift;
mod mode;
mod mutation;
mod parent;
mod policy;

use std::net::{
    IpAddr,
    Ipv4Addr,
};
use std::sync::Arc;

use clap::Parser;
use rocket::config::TlsConfig;
use tokio::sync::Mutex;
use tracing::*;

use kz_core::errors::*;
use kz_core::k8s::ApiSet;
use kz_core::kzerr;
use kz_core::logging;
use kz_core::prelude::*;

use crate::callback::CallbackSender;
use crate::config::WebhookConfig;

#[derive(Clone, Debug, Parser)]
struct Options {
    #[arg(short, long)]
    config_file: String,

    #[arg(long, default_value = WEBHOOK_PORT)]
    port: u16,

    #[arg(long)]
    cert_path: String,

    #[arg(long)]
    key_path: String,

    #[arg(short, long, default_value = "info")]
    verbosity: String,
}

#[derive(Clone)]
pub struct WebhookContext {
    config: Arc<WebhookConfig>,
    client: kube::Client,
    apiset: Arc<Mutex<ApiSet>>,
    callbacks: Arc<CallbackSender>,
}

#[instrument(ret, err)]
async fn run(opts: Options) -> EmptyResult {
    let config = Arc::new(WebhookConfig::load(&opts.config_file)?);
    info!(
        "loaded config: default mode {}, {} overrides, {} backends",
        config.drift_detection.default_mode,
        config.drift_detection.overrides.len(),
        config.backends.len(),
    );

    let client = kube::Client::try_default().await?;
    let apiset = Arc::new(Mutex::new(ApiSet::new(client.clone())));
    let callbacks = Arc::new(CallbackSender::new(&config.backends)?);

    let ctx = WebhookContext { config, client, apiset, callbacks };

    let rkt_config = rocket::Config {
        address: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
        port: opts.port,
        tls: Some(TlsConfig::from_paths(&opts.cert_path, &opts.key_path)),
        ..Default::default()
    };
    let server = rocket::custom(&rkt_config).mount("/", rocket::routes![mutation::handler]).manage(ctx);
    server.launch().await?;

    Ok(())
}

#[tokio::main]
async fn main() {
    let args = Options::parse();
    logging::setup(&format!("{},rocket=warn", args.verbosity));
    if let Err(err) = run(args).await {
        kzerr!(err, "webhook failed");
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests;
