//! Token-level BERT features -> phoneme-level features.

use crate::error::{Result, TtsError};
use ndarray::{Array2, ArrayView2, ArrayViewMut2, Axis};
use rayon::prelude::*;

/// Hidden size of the DeBERTa encoder.
pub const EMBEDDING_DIM: usize = 1024;

/// Expand `[dim, token_len]` embeddings to `[dim, phone_len]`.
///
/// Token `t` is repeated `word2ph[t]` times, so `word2ph` must have one entry
/// per token and sum to `phone_len`.
pub fn align_embeddings(
    embeddings: ArrayView2<f32>,
    word2ph: &[usize],
    phone_len: usize,
) -> Result<Array2<f32>> {
    let mut out = Array2::<f32>::zeros((embeddings.nrows(), phone_len));
    fill_aligned(embeddings, word2ph, phone_len, out.view_mut())?;
    Ok(out)
}

/// Like [`align_embeddings`] but writes into a caller-owned, dim-major buffer.
pub fn align_embeddings_into(
    embeddings: ArrayView2<f32>,
    word2ph: &[usize],
    phone_len: usize,
    dest: &mut [f32],
) -> Result<()> {
    let required = embeddings.nrows() * phone_len;
    if dest.len() < required {
        return Err(TtsError::Capacity {
            required,
            available: dest.len(),
        });
    }
    let view = ArrayViewMut2::from_shape((embeddings.nrows(), phone_len), &mut dest[..required])
        .map_err(|err| TtsError::Alignment(err.to_string()))?;
    fill_aligned(embeddings, word2ph, phone_len, view)
}

fn fill_aligned(
    embeddings: ArrayView2<f32>,
    word2ph: &[usize],
    phone_len: usize,
    mut out: ArrayViewMut2<f32>,
) -> Result<()> {
    let token_len = embeddings.ncols();
    if word2ph.len() != token_len {
        return Err(TtsError::Alignment(format!(
            "word2ph has {} entries for {} tokens",
            word2ph.len(),
            token_len
        )));
    }
    let total: usize = word2ph.iter().sum();
    if total != phone_len {
        return Err(TtsError::Alignment(format!(
            "word2ph sums to {} but sequence has {} phonemes",
            total, phone_len
        )));
    }

    let source: Vec<usize> = word2ph
        .iter()
        .enumerate()
        .flat_map(|(token, &count)| std::iter::repeat(token).take(count))
        .collect();

    out.axis_iter_mut(Axis(0))
        .into_par_iter()
        .zip(embeddings.axis_iter(Axis(0)).into_par_iter())
        .for_each(|(mut dst_row, src_row)| {
            for (phone, &token) in source.iter().enumerate() {
                dst_row[phone] = src_row[token];
            }
        });

    Ok(())
}
