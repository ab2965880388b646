//! Front-end tensor dumps for offline comparison.

use crate::pipeline::Frontend;
use crate::preprocessing::batch_row;
use anyhow::{Context, Result};
use ndarray::{Array1, Array2};
use ndarray_npy::{NpzWriter, WriteNpyExt};
use std::fs::{self, File};
use std::path::{Path, PathBuf};

/// Save the front-end tensors of one utterance.
///
/// Creates files:
/// - 00_frontend.npz: x_tst, tones, language, input_ids, attention_mask,
///   word2ph (all `[1, len]` i64)
/// - 01_style.npy: style vector as `[1, 256]` f32, when given
pub fn save_frontend_tensors(
    output_dir: &Path,
    frontend: &Frontend,
    style: Option<&Array1<f32>>,
) -> Result<Vec<PathBuf>> {
    fs::create_dir_all(output_dir)
        .context(format!("Failed to create output directory {:?}", output_dir))?;

    let mut written = Vec::new();

    let frontend_path = output_dir.join("00_frontend.npz");
    let mut npz = NpzWriter::new(
        File::create(&frontend_path).context("Failed to create 00_frontend.npz")?,
    );
    let word2ph: Vec<i64> = frontend.word2ph.iter().map(|&n| n as i64).collect();
    let arrays: [(&str, Array2<i64>); 6] = [
        ("x_tst.npy", batch_row(&frontend.sequence.phoneme_ids)),
        ("tones.npy", batch_row(&frontend.sequence.tones)),
        ("language.npy", batch_row(&frontend.sequence.language_ids)),
        ("input_ids.npy", batch_row(&frontend.encoding.input_ids)),
        ("attention_mask.npy", batch_row(&frontend.encoding.attention_mask)),
        ("word2ph.npy", batch_row(&word2ph)),
    ];
    for (name, array) in &arrays {
        npz.add_array(*name, array)
            .context(format!("Failed to write {}", name))?;
    }
    npz.finish().context("Failed to finalize 00_frontend.npz")?;
    tracing::debug!(path = ?frontend_path, "Saved front-end tensors");
    written.push(frontend_path);

    if let Some(style) = style {
        let style_path = output_dir.join("01_style.npy");
        style
            .view()
            .insert_axis(ndarray::Axis(0))
            .write_npy(File::create(&style_path).context("Failed to create 01_style.npy")?)
            .context("Failed to write 01_style.npy")?;
        written.push(style_path);
    }

    Ok(written)
}
