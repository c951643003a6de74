use std::path::PathBuf;

use anyhow::Result;
use candle_core::Device;
use hf_hub::api::sync::Api;
use hf_hub::{Repo, RepoType};
use tracing::info;

#[derive(Debug, Clone)]
pub struct ModelBase {
    /// The name of the model
    pub name: String,

    /// The license of the model
    pub license: String,

    /// The id of the model repository
    pub repo_id: String,

    /// The revision of the model repository
    pub repo_revision: String,
}

/// A single file of a model, either fetched from its hub repository or read from disk.
#[derive(Debug, Clone)]
pub struct ModelFile {
    pub base: ModelBase,
    pub filename: String,
    pub local_path: Option<PathBuf>,
}

impl ModelFile {
    #[tracing::instrument(level = "info", skip(self), fields(repo = %self.base.repo_id, file = %self.filename))]
    pub fn resolve(&self) -> Result<PathBuf> {
        if let Some(path) = &self.local_path {
            info!("Using local file {}", path.display());
            return Ok(path.clone());
        }

        let repo = Api::new()?.repo(Repo::with_revision(
            self.base.repo_id.clone(),
            RepoType::Model,
            self.base.repo_revision.clone(),
        ));
        Ok(repo.get(&self.filename)?)
    }
}

/// Picks the first CUDA device when one is available unless the CPU is forced.
pub fn select_device(force_cpu: bool) -> Result<Device> {
    if force_cpu {
        return Ok(Device::Cpu);
    }
    Ok(Device::cuda_if_available(0)?)
}
