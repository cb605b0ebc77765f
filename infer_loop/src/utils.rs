//! Utility functions
//!
use std::{
    io::Cursor,
    path::{Path, PathBuf},
};

use reqwest::Client;

use crate::{error::InferenceError, nn::UltrafaceVariant};

/// Directory where downloaded models are kept by default.
pub fn default_model_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("infer_loop")
}

/// Download a file from a URL to a given filepath.
pub async fn download_file(
    client: &Client,
    url: &str,
    filepath: impl AsRef<Path>,
) -> Result<(), InferenceError> {
    let load_err = |err: &dyn std::fmt::Display| InferenceError::Load(format!("{url}: {err}"));

    let resp = client
        .get(url)
        .send()
        .await
        .and_then(|resp| resp.error_for_status())
        .map_err(|err| load_err(&err))?;
    let bytes = resp.bytes().await.map_err(|err| load_err(&err))?;

    let mut file = std::fs::File::create(filepath).map_err(|err| load_err(&err))?;
    std::io::copy(&mut Cursor::new(bytes), &mut file).map_err(|err| load_err(&err))?;

    Ok(())
}

/// Path of the model file for `variant` in `dir`, downloading it first if it is missing.
pub async fn ensure_model_file(
    client: &Client,
    variant: UltrafaceVariant,
    dir: &Path,
) -> Result<PathBuf, InferenceError> {
    let path = dir.join(variant.filename());
    if path.is_file() {
        return Ok(path);
    }

    std::fs::create_dir_all(dir)
        .map_err(|err| InferenceError::Load(format!("{}: {err}", dir.display())))?;
    log::info!("Downloading {} to {}", variant.url(), path.display());

    // Download next to the target so a partial file is never picked up
    let partial = path.with_extension("part");
    download_file(client, &variant.url(), &partial).await?;
    std::fs::rename(&partial, &path)
        .map_err(|err| InferenceError::Load(format!("{}: {err}", path.display())))?;

    Ok(path)
}

#[cfg(test)]
mod test {
    use super::*;

    #[tokio::test]
    async fn existing_model_is_not_downloaded() {
        let dir = std::env::temp_dir().join(format!("infer_loop-test-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(UltrafaceVariant::W320H240.filename());
        std::fs::write(&path, b"onnx").unwrap();

        // An unroutable client proves no request is made
        let client = Client::builder()
            .proxy(reqwest::Proxy::all("http://127.0.0.1:9").unwrap())
            .build()
            .unwrap();
        let found = ensure_model_file(&client, UltrafaceVariant::W320H240, &dir)
            .await
            .unwrap();

        assert_eq!(found, path);
        std::fs::remove_dir_all(&dir).ok();
    }
}
