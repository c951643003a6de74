use std::time::Duration;

use anyhow::{Context, Result};
use clap_serde_derive::ClapSerde;

use crate::inference::model_config::GenerationConfig;

#[derive(ClapSerde, Debug)]
pub struct Config {
    /// The address the listener binds to
    #[default("0.0.0.0".to_string())]
    #[arg(short, long, env)]
    pub(crate) address: String,

    /// The port the listener binds to
    #[default(5000)]
    #[arg(short, long, env)]
    pub(crate) port: u16,

    /// Hugging Face repository holding the captioning model weights
    #[default("lmz/candle-blip".to_string())]
    #[arg(long, env)]
    pub(crate) model_repo: String,

    /// Revision of the model repository
    #[default("main".to_string())]
    #[arg(long, env)]
    pub(crate) model_revision: String,

    /// GGUF weight file inside the model repository
    #[default("blip-image-captioning-large-q4k.gguf".to_string())]
    #[arg(long, env)]
    pub(crate) model_filename: String,

    /// Local GGUF weight file, skips the download when set
    #[default(String::new())]
    #[arg(long, env)]
    pub(crate) model_path: String,

    /// Hugging Face repository holding the tokenizer
    #[default("Salesforce/blip-image-captioning-large".to_string())]
    #[arg(long, env)]
    pub(crate) tokenizer_repo: String,

    /// Tokenizer file inside the tokenizer repository
    #[default("tokenizer.json".to_string())]
    #[arg(long, env)]
    pub(crate) tokenizer_filename: String,

    /// Local tokenizer file, skips the download when set
    #[default(String::new())]
    #[arg(long, env)]
    pub(crate) tokenizer_path: String,

    /// Run the model on the CPU even when an accelerator is available
    #[default(false)]
    #[arg(long, env)]
    pub(crate) cpu: bool,

    /// Sampling seed, empty picks a random one
    #[default(String::new())]
    #[arg(long, env)]
    pub(crate) seed: String,

    /// Sampling temperature, 0 decodes greedily
    #[default(0.0)]
    #[arg(long, env)]
    pub(crate) temperature: f64,

    /// Nucleus sampling probability, 0 disables it
    #[default(0.0)]
    #[arg(long, env)]
    pub(crate) top_p: f64,

    /// Image captioned by the /photo_test route
    #[default("./images/test.jpg".to_string())]
    #[arg(long, env)]
    pub(crate) sample_image: String,

    /// Maximum number of generated tokens for the sample image
    #[default(20)]
    #[arg(long, env)]
    pub(crate) sample_max_length: usize,

    /// Maximum number of generated tokens for uploaded images
    #[default(30)]
    #[arg(long, env)]
    pub(crate) upload_max_length: usize,

    /// Language of the generated caption
    #[default("en".to_string())]
    #[arg(long, env)]
    pub(crate) source_language: String,

    /// Language the caption is translated to
    #[default("ja".to_string())]
    #[arg(long, env)]
    pub(crate) target_language: String,

    /// Endpoint of the translation service
    #[default("https://translate.googleapis.com/translate_a/single".to_string())]
    #[arg(long, env)]
    pub(crate) translate_url: String,

    /// Timeout of a single translation request in seconds
    #[default(30)]
    #[arg(long, env)]
    pub(crate) translate_timeout_secs: u64,

    /// Maximum accepted request body size for uploads
    #[default(10_000_000)]
    #[arg(long, env)]
    pub(crate) max_upload_bytes: usize,

    /// OTLP collector endpoint, telemetry is only exported when set
    #[default(String::new())]
    #[arg(long, env)]
    pub(crate) otel_endpoint: String,

    /// Keep logging to the console while exporting telemetry
    #[default(false)]
    #[arg(long, env)]
    pub(crate) console: bool,

    /// PEM certificate chain, enables TLS together with tls_key
    #[default(String::new())]
    #[arg(long, env)]
    pub(crate) tls_cert: String,

    /// PEM private key, enables TLS together with tls_cert
    #[default(String::new())]
    #[arg(long, env)]
    pub(crate) tls_key: String,
}

impl Config {
    pub fn from_toml(path: &str) -> Result<<Self as ClapSerde>::Opt> {
        let str = std::fs::read_to_string(path)?;
        let opt = toml::from_str(&str)?;
        Ok(opt)
    }

    pub fn otel_endpoint(&self) -> Option<String> {
        non_empty(&self.otel_endpoint).map(str::to_string)
    }

    pub fn model_path(&self) -> Option<&str> {
        non_empty(&self.model_path)
    }

    pub fn tokenizer_path(&self) -> Option<&str> {
        non_empty(&self.tokenizer_path)
    }

    pub fn tls_files(&self) -> Option<(&str, &str)> {
        non_empty(&self.tls_cert).zip(non_empty(&self.tls_key))
    }

    pub fn translate_timeout(&self) -> Duration {
        Duration::from_secs(self.translate_timeout_secs)
    }

    pub fn generation(&self) -> Result<GenerationConfig> {
        let seed = non_empty(&self.seed)
            .map(str::parse::<u64>)
            .transpose()
            .with_context(|| format!("Invalid sampling seed {:?}", self.seed))?;
        Ok(GenerationConfig {
            seed,
            temperature: (self.temperature > 0.0).then_some(self.temperature),
            top_p: (self.top_p > 0.0).then_some(self.top_p),
        })
    }
}

fn non_empty(value: &str) -> Option<&str> {
    let value = value.trim();
    (!value.is_empty()).then_some(value)
}
