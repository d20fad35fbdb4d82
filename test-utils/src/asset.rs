use std::{
    env::var_os,
    io::{Error, ErrorKind, Result},
    path::{Path, PathBuf},
};

/// The data directory relative to the workspace directory.
pub const DATA_DIR: &str = "data";

/// The environment variable which overrides the directory of a pretrained model.
pub const MODEL_DIR_VAR: &str = "SBERT_MODEL_DIR";

/// Resolves the path to the requested data relative to the workspace directory.
pub fn resolve_path(path: &[impl AsRef<Path>]) -> Result<PathBuf> {
    let manifest = var_os("CARGO_MANIFEST_DIR")
        .ok_or_else(|| Error::new(ErrorKind::NotFound, "missing CARGO_MANIFEST_DIR"))?;
    let workspace = PathBuf::from(manifest)
        .parent()
        .ok_or_else(|| Error::new(ErrorKind::NotFound, "missing cargo workspace dir"))?
        .to_path_buf();

    path.iter()
        .fold(workspace, |path, component| path.join(component))
        .canonicalize()
}

/// Resolves the directory of an exported pretrained model.
///
/// The directory is taken from [`MODEL_DIR_VAR`] if set, otherwise it is looked up by its name
/// in the [`DATA_DIR`].
pub fn resolve_model_dir(name: &str) -> Result<PathBuf> {
    match var_os(MODEL_DIR_VAR) {
        Some(dir) => PathBuf::from(dir).canonicalize(),
        None => resolve_path(&[DATA_DIR, name]),
    }
}

/// Resolves the first existing file in the directory.
pub fn resolve_file(dir: &Path, candidates: &[&str]) -> Result<PathBuf> {
    candidates
        .iter()
        .map(|file| dir.join(file))
        .find(|file| file.is_file())
        .ok_or_else(|| {
            Error::new(
                ErrorKind::NotFound,
                format!("missing any of {:?} in {}", candidates, dir.display()),
            )
        })
}
