use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use env_logger::{Builder, Env};
use log::info;

use rice_leaf::{server, AppState, ModelManager, ServerConfig};

/// Resolves the model and head files, downloading them into the cache when URLs are configured.
async fn provision_model(config: &ServerConfig) -> Result<(PathBuf, Option<PathBuf>)> {
    let Some(model_info) = config.model_info() else {
        return Ok((config.model.clone(), config.head.clone()));
    };

    let manager = match &config.cache_dir {
        Some(dir) => ModelManager::new(dir.join("models")),
        None => ModelManager::new_default(),
    }
    .context("Failed to create model cache directory")?;

    if config.fresh {
        info!("Fresh download requested - removing any existing model files...");
        manager.remove_download(&model_info.name)?;
    }
    manager
        .ensure_model_downloaded(&model_info)
        .await
        .with_context(|| format!("Failed to download model from {}", model_info.model_url))?;

    let model_path = manager.get_model_path(&model_info.name);
    let head_path = if model_info.head_url.is_some() {
        Some(manager.get_head_path(&model_info.name))
    } else {
        config.head.clone()
    };
    Ok((model_path, head_path))
}

#[tokio::main]
async fn main() -> Result<()> {
    Builder::from_env(Env::default().default_filter_or("info")).init();
    let config = ServerConfig::parse();

    info!("=== Rice Leaf Disease Detection Server ===");
    info!("Model: {:?}", config.model);
    info!("Load strategy: {:?}", config.load_strategy);

    let (model_path, head_path) = provision_model(&config).await?;
    let slot = server::model_slot(&config, &model_path, head_path.as_deref()).await;

    server::serve(&config, AppState::new(slot))
        .await
        .context("Server error")?;
    Ok(())
}
