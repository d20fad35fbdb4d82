use std::{fs::File, io::BufReader, path::Path};

use anyhow::{Context, Error};
use indicatif::{ProgressBar, ProgressStyle};
use ndarray::Array2;
use serde::de::DeserializeOwned;

pub(crate) fn progress_spin_until_done<R>(msg: &'static str, func: impl FnOnce() -> R) -> R {
    let progress_bar = ProgressBar::new_spinner()
        .with_style(ProgressStyle::default_bar().template("{msg}: {elapsed:>10} {spinner:.green}"));
    progress_bar.set_message(msg);
    progress_bar.enable_steady_tick(100);
    let res = func();
    progress_bar.finish();
    res
}

/// Reads a json file.
pub(crate) fn read_json<T>(path: &Path) -> Result<T, Error>
where
    T: DeserializeOwned,
{
    let file = File::open(path).with_context(|| format!("Opening {} failed", path.display()))?;
    serde_json::from_reader(BufReader::new(file))
        .with_context(|| format!("Parsing {} failed", path.display()))
}

/// Serializes the value as json.
pub(crate) fn to_json<T>(value: &T, pretty: bool) -> Result<String, Error>
where
    T: serde::Serialize,
{
    let serialized = if pretty {
        serde_json::to_string_pretty(value)?
    } else {
        serde_json::to_string(value)?
    };

    Ok(serialized)
}

/// Collects the rows of the array into nested vectors.
pub(crate) fn to_rows(array: &Array2<f32>) -> Vec<Vec<f32>> {
    array.rows().into_iter().map(|row| row.to_vec()).collect()
}
