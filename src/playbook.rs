use std::fs;
use std::path::Path;
use tempfile::TempPath;

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("failed to fetch playbook from {url}: {reason}")]
    Request { url: String, reason: String },
    #[error("failed to create scratch directory {path}: {source}")]
    ScratchDir {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to write playbook scratch file: {source}")]
    Write {
        #[source]
        source: std::io::Error,
    },
}

/// Streams the automation definition at `url` into a fresh unique file under
/// the scratch directory. The returned path is ephemeral: the file is
/// removed when the path is dropped, after the run that needed it.
pub fn retrieve(url: &str, scratch_dir: &Path) -> Result<TempPath, FetchError> {
    fs::create_dir_all(scratch_dir).map_err(|err| FetchError::ScratchDir {
        path: scratch_dir.display().to_string(),
        source: err,
    })?;

    let response = ureq::get(url).call().map_err(|err| FetchError::Request {
        url: url.to_string(),
        reason: err.to_string(),
    })?;

    let mut file = tempfile::Builder::new()
        .prefix("playbook-")
        .suffix(".yml")
        .tempfile_in(scratch_dir)
        .map_err(|err| FetchError::Write { source: err })?;
    std::io::copy(&mut response.into_reader(), file.as_file_mut())
        .map_err(|err| FetchError::Write { source: err })?;

    Ok(file.into_temp_path())
}
