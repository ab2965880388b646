//! Inference model boundaries.
//!
//! The embedding (DeBERTa) and synthesis (VITS) networks are supplied by the
//! host through these traits; the pipeline only ever calls them from the
//! thread that owns it.

use crate::alignment::EMBEDDING_DIM;
use crate::error::{Result, TtsError};
use crate::voice::STYLE_DIM;
use ndarray::{Array2, ArrayView1, ArrayView2};

/// Text encoder producing one feature column per token.
pub trait EmbeddingModel: Send {
    fn hidden_size(&self) -> usize;

    /// Returns `[hidden_size, token_len]`.
    fn run(&mut self, token_ids: &[i64], attention_mask: &[i64]) -> Result<Array2<f32>>;
}

/// Everything the synthesis network consumes for one utterance.
#[derive(Debug, Clone)]
pub struct SynthesisInputs<'a> {
    pub phoneme_ids: &'a [i64],
    pub tones: &'a [i64],
    pub language_ids: &'a [i64],
    pub speaker_id: i64,
    /// `[EMBEDDING_DIM, phone_len]`
    pub bert: ArrayView2<'a, f32>,
    /// `[STYLE_DIM]`
    pub style: ArrayView1<'a, f32>,
    pub sdp_ratio: f32,
    pub noise_scale: f32,
    pub noise_scale_w: f32,
    pub length_scale: f32,
}

impl SynthesisInputs<'_> {
    pub fn phone_len(&self) -> usize {
        self.phoneme_ids.len()
    }

    /// All per-phoneme inputs agree on length and the feature widths match
    /// the exported model.
    pub fn check(&self) -> Result<()> {
        if self.bert.nrows() != EMBEDDING_DIM {
            return Err(TtsError::Alignment(format!(
                "bert features have {} rows, expected {}",
                self.bert.nrows(),
                EMBEDDING_DIM
            )));
        }
        if self.style.len() != STYLE_DIM {
            return Err(TtsError::Alignment(format!(
                "style vector has {} values, expected {}",
                self.style.len(),
                STYLE_DIM
            )));
        }
        let n = self.phone_len();
        if self.tones.len() != n || self.language_ids.len() != n || self.bert.ncols() != n {
            return Err(TtsError::Alignment(format!(
                "synthesis inputs disagree: ids {}, tones {}, langs {}, bert {}",
                n,
                self.tones.len(),
                self.language_ids.len(),
                self.bert.ncols()
            )));
        }
        Ok(())
    }
}

/// Acoustic model + vocoder producing mono PCM.
pub trait SynthesisModel: Send {
    fn run(&mut self, inputs: &SynthesisInputs<'_>) -> Result<Vec<f32>>;
}

/// Outcome of trying a preferred backend and then a fallback.
#[derive(Debug)]
pub enum BackendSelection<T> {
    Primary(T),
    Fallback { backend: T, primary_error: TtsError },
    Failed { primary_error: TtsError, fallback_error: TtsError },
}

impl<T> BackendSelection<T> {
    pub fn into_result(self) -> Result<T> {
        match self {
            BackendSelection::Primary(backend) | BackendSelection::Fallback { backend, .. } => {
                Ok(backend)
            }
            BackendSelection::Failed {
                primary_error,
                fallback_error,
            } => Err(TtsError::Library(format!(
                "no usable backend (primary: {}; fallback: {})",
                primary_error, fallback_error
            ))),
        }
    }

    pub fn is_fallback(&self) -> bool {
        matches!(self, BackendSelection::Fallback { .. })
    }
}

/// Construct the primary backend, falling back to the second constructor.
pub fn select_backend<T, P, F>(primary: P, fallback: F) -> BackendSelection<T>
where
    P: FnOnce() -> Result<T>,
    F: FnOnce() -> Result<T>,
{
    let primary_error = match primary() {
        Ok(backend) => return BackendSelection::Primary(backend),
        Err(err) => err,
    };
    tracing::warn!(error = %primary_error, "Primary backend unavailable, trying fallback");
    match fallback() {
        Ok(backend) => BackendSelection::Fallback {
            backend,
            primary_error,
        },
        Err(fallback_error) => {
            tracing::warn!(error = %fallback_error, "Fallback backend unavailable");
            BackendSelection::Failed {
                primary_error,
                fallback_error,
            }
        }
    }
}
