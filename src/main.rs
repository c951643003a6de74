use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum_server::tls_rustls::RustlsConfig;
use axum_server::Handle;
use clap::Parser;
use clap_serde_derive::ClapSerde;
use image::RgbImage;
use tokio::net::TcpListener;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::inference::decoder::decode_image;
use crate::inference::models::blip::BlipModel;
use crate::inference::models::model::{select_device, ModelBase, ModelFile};
use crate::routes::AppState;
use crate::service::CaptionService;
use crate::telemetry::{init_telemetry, shutdown_telemetry};
use crate::translator::GoogleTranslator;

mod config;
mod error;
mod extractors;
mod inference;
mod routes;
mod service;
mod telemetry;
#[cfg(test)]
mod testing;
mod translator;

#[macro_export]
macro_rules! exit_err {
    ($code:expr, $fmt:expr $(, $arg:expr)*) => {
        {
            tracing::error!($fmt $(, $arg)*);
            std::process::exit($code);
        }
    };
}

#[cfg(unix)]
#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

const DEFAULT_CONFIG_FILE: &str = "CaptionService.toml";

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file
    #[arg(short, long, env, default_value = DEFAULT_CONFIG_FILE)]
    config_file: String,

    /// Configuration options
    #[command(flatten)]
    pub opt_config: <Config as ClapSerde>::Opt,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = match Config::from_toml(&args.config_file) {
        Ok(opt) => Config::from(opt).merge(args.opt_config),
        Err(err) => {
            if args.config_file == DEFAULT_CONFIG_FILE {
                Config::default().merge(args.opt_config)
            } else {
                eprintln!(
                    "Failed to read configuration file {} with error: {}",
                    args.config_file, err
                );
                std::process::exit(1);
            }
        }
    };
    init_telemetry(config.otel_endpoint(), config.console)?;

    let state = match build_state(&config).await {
        Ok(state) => state,
        Err(err) => exit_err!(1, "Failed to initialize caption service: {:#}", err),
    };
    let router = routes::router(state, config.max_upload_bytes);

    let address: SocketAddr = format!("{}:{}", config.address, config.port)
        .parse()
        .context("Invalid listener address")?;
    info!(
        "Supported features: avx: {}, neon: {}, simd128: {}, f16c: {}, cuda: {}",
        candle_core::utils::with_avx(),
        candle_core::utils::with_neon(),
        candle_core::utils::with_simd128(),
        candle_core::utils::with_f16c(),
        candle_core::utils::cuda_is_available()
    );

    if let Some((cert, key)) = config.tls_files() {
        let tls = RustlsConfig::from_pem_file(cert, key)
            .await
            .context("Failed to load TLS certificate")?;
        let handle = Handle::new();
        tokio::spawn(shutdown_on_signal(handle.clone()));

        info!("Listening on https://{}", address);
        axum_server::bind_rustls(address, tls)
            .handle(handle)
            .serve(router.into_make_service())
            .await?;
    } else {
        let listener = TcpListener::bind(address).await?;
        info!("Listening on http://{}", listener.local_addr()?);
        axum::serve(listener, router)
            .with_graceful_shutdown(shutdown_signal())
            .await?;
    }

    shutdown_telemetry();
    Ok(())
}

async fn build_state(config: &Config) -> Result<AppState> {
    let device = select_device(config.cpu)?;
    let weights = ModelFile {
        base: ModelBase {
            name: "Candle BLIP large".into(),
            license: "BSD-3-Clause".into(),
            repo_id: config.model_repo.clone(),
            repo_revision: config.model_revision.clone(),
        },
        filename: config.model_filename.clone(),
        local_path: config.model_path().map(PathBuf::from),
    };
    let tokenizer = ModelFile {
        base: ModelBase {
            name: "BLIP tokenizer".into(),
            license: "BSD-3-Clause".into(),
            repo_id: config.tokenizer_repo.clone(),
            repo_revision: "main".into(),
        },
        filename: config.tokenizer_filename.clone(),
        local_path: config.tokenizer_path().map(PathBuf::from),
    };
    let generation = config.generation()?;

    // Downloads and weight loading block
    let captioner = tokio::task::spawn_blocking(move || {
        BlipModel::new(&weights, &tokenizer, device, generation)
    })
    .await??;
    let translator = GoogleTranslator::new(&config.translate_url, config.translate_timeout())?;

    let service = CaptionService::new(
        Arc::new(captioner),
        Arc::new(translator),
        config.source_language.clone(),
        config.target_language.clone(),
    );

    Ok(AppState {
        service: Arc::new(service),
        sample_image: load_sample_image(&config.sample_image),
        sample_max_length: config.sample_max_length,
        upload_max_length: config.upload_max_length,
    })
}

fn load_sample_image(path: &str) -> Option<Arc<RgbImage>> {
    let image = std::fs::read(path)
        .map_err(anyhow::Error::from)
        .and_then(|bytes| Ok(decode_image(&bytes)?));
    match image {
        Ok(image) => Some(Arc::new(image)),
        Err(err) => {
            warn!("Sample image {} unavailable, /photo_test will fail: {}", path, err);
            None
        }
    }
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Shutting down..."),
        Err(e) => error!("Failed to listen for shutdown signal: {}", e),
    }
}

async fn shutdown_on_signal(handle: Handle) {
    shutdown_signal().await;
    handle.graceful_shutdown(Some(Duration::from_secs(10)));
}
