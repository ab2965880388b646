//! Style vector loading and interpolation.

use crate::error::{Result, TtsError};
use ndarray::{Array1, Array2};
use ndarray_npy::{ReadNpyError, ReadNpyExt};
use std::path::Path;

/// Width of one style vector.
pub const STYLE_DIM: usize = 256;

fn unsupported(err: ReadNpyError) -> TtsError {
    TtsError::UnsupportedFormat(err.to_string())
}

/// Decode a C-order `.npy` float matrix; f64 banks are narrowed to f32.
pub fn read_style_matrix(bytes: &[u8]) -> Result<Array2<f32>> {
    let vectors = match Array2::<f32>::read_npy(bytes) {
        Ok(vectors) => vectors,
        Err(ReadNpyError::WrongDescriptor(_)) => {
            let wide = Array2::<f64>::read_npy(bytes).map_err(unsupported)?;
            if !wide.is_standard_layout() {
                return Err(fortran_order());
            }
            wide.mapv(|v| v as f32)
        }
        Err(err) => return Err(unsupported(err)),
    };
    if !vectors.is_standard_layout() {
        return Err(fortran_order());
    }
    Ok(vectors)
}

fn fortran_order() -> TtsError {
    TtsError::UnsupportedFormat("fortran-ordered style banks are not supported".to_string())
}

/// Bank of per-style vectors, row 0 being the neutral mean.
#[derive(Debug, Clone, Default)]
pub struct StyleVectorStore {
    vectors: Option<Array2<f32>>,
}

impl StyleVectorStore {
    /// An empty, unloaded store.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let mut store = Self::new();
        store.load(path)?;
        Ok(store)
    }

    pub fn from_array(vectors: Array2<f32>) -> Result<Self> {
        check_shape(&vectors)?;
        Ok(Self {
            vectors: Some(vectors),
        })
    }

    pub fn load(&mut self, path: &Path) -> Result<()> {
        let bytes = std::fs::read(path)?;
        self.load_bytes(&bytes)?;
        tracing::info!(path = ?path, styles = self.num_styles(), "Loaded style vectors");
        Ok(())
    }

    /// Replace the bank from `.npy` bytes; on error the store is unchanged.
    pub fn load_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        let vectors = read_style_matrix(bytes)?;
        check_shape(&vectors)?;
        self.vectors = Some(vectors);
        Ok(())
    }

    pub fn is_loaded(&self) -> bool {
        self.vectors.is_some()
    }

    pub fn num_styles(&self) -> usize {
        self.vectors.as_ref().map_or(0, |v| v.nrows())
    }

    fn bank(&self) -> Result<&Array2<f32>> {
        self.vectors.as_ref().ok_or(TtsError::NotLoaded)
    }

    fn checked_bank(&self, style_id: usize) -> Result<&Array2<f32>> {
        let bank = self.bank()?;
        if style_id >= bank.nrows() {
            return Err(TtsError::StyleOutOfRange {
                id: style_id,
                count: bank.nrows(),
            });
        }
        Ok(bank)
    }

    /// Unmodified row `index`.
    pub fn raw_vector(&self, index: usize) -> Result<Array1<f32>> {
        Ok(self.checked_bank(index)?.row(index).to_owned())
    }

    /// `mean + (style - mean) * weight`, with row 0 as the mean.
    pub fn get_vector(&self, style_id: usize, weight: f32) -> Result<Array1<f32>> {
        let mut out = vec![0.0f32; STYLE_DIM];
        self.interpolate(style_id, weight, &mut out)?;
        Ok(Array1::from_vec(out))
    }

    pub fn get_vector_into(&self, style_id: usize, weight: f32, dest: &mut [f32]) -> Result<()> {
        if dest.len() < STYLE_DIM {
            return Err(TtsError::Capacity {
                required: STYLE_DIM,
                available: dest.len(),
            });
        }
        self.interpolate(style_id, weight, &mut dest[..STYLE_DIM])
    }

    fn interpolate(&self, style_id: usize, weight: f32, dest: &mut [f32]) -> Result<()> {
        let bank = self.checked_bank(style_id)?;
        let mean = bank.row(0);
        let style = bank.row(style_id);
        for ((out, &m), &s) in dest.iter_mut().zip(mean.iter()).zip(style.iter()) {
            *out = m + (s - m) * weight;
        }
        Ok(())
    }
}

fn check_shape(vectors: &Array2<f32>) -> Result<()> {
    if vectors.ncols() != STYLE_DIM {
        return Err(TtsError::UnsupportedFormat(format!(
            "style vectors must have {} columns, got {}",
            STYLE_DIM,
            vectors.ncols()
        )));
    }
    if vectors.nrows() == 0 {
        return Err(TtsError::UnsupportedFormat(
            "style vector file has no rows".to_string(),
        ));
    }
    Ok(())
}
