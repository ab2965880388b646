//! Phonemizer boundary and the native OpenJTalk wrapper.
//!
//! The wrapper library (`openjtalk_wrapper`) is opened at runtime with
//! `libloading`; the raw handle never leaves [`OpenJTalk`].

use crate::error::{Result, TtsError};
use libloading::Library;
use std::ffi::{c_char, c_void, CStr, CString};
use std::path::Path;
use std::ptr::NonNull;

/// Files an OpenJTalk (NAIST-JDIC) dictionary directory must contain.
pub const REQUIRED_DICTIONARY_FILES: [&str; 8] = [
    "sys.dic",
    "unk.dic",
    "char.bin",
    "matrix.bin",
    "left-id.def",
    "right-id.def",
    "pos-id.def",
    "rewrite.def",
];

/// Phonemes and their per-phoneme prosody labels (A1, A2, A3).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProsodyPhonemes {
    pub phonemes: Vec<String>,
    pub a1: Vec<i32>,
    pub a2: Vec<i32>,
    pub a3: Vec<i32>,
    /// Token-grade alignment, when the phonemizer can provide one.
    pub word2ph: Option<Vec<usize>>,
}

impl ProsodyPhonemes {
    /// Build from the native space-delimited phoneme string.
    pub fn from_space_delimited(phonemes: &str, a1: Vec<i32>, a2: Vec<i32>, a3: Vec<i32>) -> Self {
        Self {
            phonemes: phonemes.split_whitespace().map(str::to_string).collect(),
            a1,
            a2,
            a3,
            word2ph: None,
        }
    }

    /// Number of phonemes that have a full set of labels.
    pub fn len(&self) -> usize {
        self.phonemes
            .len()
            .min(self.a1.len())
            .min(self.a2.len())
            .min(self.a3.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Text -> phonemes with prosody labels.
pub trait Phonemizer: Send {
    fn phonemize_with_prosody(&mut self, text: &str) -> Result<ProsodyPhonemes>;
}

/// Check that a dictionary directory has every file OpenJTalk needs.
pub fn validate_dictionary(dir: &Path) -> Result<()> {
    let missing: Vec<&str> = REQUIRED_DICTIONARY_FILES
        .iter()
        .copied()
        .filter(|name| !dir.join(name).is_file())
        .collect();
    if missing.is_empty() {
        Ok(())
    } else {
        Err(TtsError::Config(format!(
            "OpenJTalk dictionary {:?} is missing {}",
            dir,
            missing.join(", ")
        )))
    }
}

#[repr(C)]
struct RawProsodyResult {
    phonemes: *const c_char,
    prosody_a1: *const i32,
    prosody_a2: *const i32,
    prosody_a3: *const i32,
    phoneme_count: i32,
}

type CreateFn = unsafe extern "C" fn(*const c_char) -> *mut c_void;
type DestroyFn = unsafe extern "C" fn(*mut c_void);
type PhonemizeFn = unsafe extern "C" fn(*mut c_void, *const c_char) -> *mut RawProsodyResult;
type FreeResultFn = unsafe extern "C" fn(*mut RawProsodyResult);
type LastErrorFn = unsafe extern "C" fn(*mut c_void) -> i32;

#[derive(Clone, Copy)]
struct OpenJTalkApi {
    create: CreateFn,
    destroy: DestroyFn,
    phonemize: PhonemizeFn,
    free_result: FreeResultFn,
    last_error: LastErrorFn,
}

impl OpenJTalkApi {
    fn resolve(library: &Library) -> Result<Self> {
        unsafe {
            Ok(Self {
                create: *symbol::<CreateFn>(library, b"openjtalk_create\0")?,
                destroy: *symbol::<DestroyFn>(library, b"openjtalk_destroy\0")?,
                phonemize: *symbol::<PhonemizeFn>(
                    library,
                    b"openjtalk_phonemize_with_prosody\0",
                )?,
                free_result: *symbol::<FreeResultFn>(
                    library,
                    b"openjtalk_free_prosody_result\0",
                )?,
                last_error: *symbol::<LastErrorFn>(library, b"openjtalk_get_last_error\0")?,
            })
        }
    }
}

unsafe fn symbol<'lib, T>(library: &'lib Library, name: &[u8]) -> Result<libloading::Symbol<'lib, T>> {
    library.get(name).map_err(|err| {
        TtsError::Library(format!(
            "missing symbol {}: {}",
            String::from_utf8_lossy(&name[..name.len().saturating_sub(1)]),
            err
        ))
    })
}

/// Frees a native prosody result on every exit path.
struct ResultGuard {
    ptr: NonNull<RawProsodyResult>,
    free: FreeResultFn,
}

impl Drop for ResultGuard {
    fn drop(&mut self) {
        unsafe { (self.free)(self.ptr.as_ptr()) }
    }
}

/// Owned OpenJTalk instance.
///
/// The native handle is created in [`OpenJTalk::open_with_library`] and
/// destroyed in `Drop`, before the library itself is unloaded.
pub struct OpenJTalk {
    handle: NonNull<c_void>,
    api: OpenJTalkApi,
    _library: Library,
}

// The handle is only ever used through `&mut self`, one thread at a time.
unsafe impl Send for OpenJTalk {}

impl OpenJTalk {
    /// Open using the platform's default wrapper library name.
    pub fn open(dict_dir: &Path) -> Result<Self> {
        let library_name = libloading::library_filename("openjtalk_wrapper");
        Self::open_with_library(Path::new(&library_name), dict_dir)
    }

    pub fn open_with_library(library_path: &Path, dict_dir: &Path) -> Result<Self> {
        let library = unsafe { Library::new(library_path) }
            .map_err(|err| TtsError::Library(format!("{:?}: {}", library_path, err)))?;
        let api = OpenJTalkApi::resolve(&library)?;

        let dict = path_to_cstring(dict_dir)?;
        let raw = unsafe { (api.create)(dict.as_ptr()) };
        let handle = NonNull::new(raw).ok_or_else(|| {
            TtsError::Config(format!(
                "Failed to initialize OpenJTalk with dictionary {:?}",
                dict_dir
            ))
        })?;

        tracing::info!(dictionary = ?dict_dir, "OpenJTalk initialized");

        Ok(Self {
            handle,
            api,
            _library: library,
        })
    }

    fn last_error(&self) -> i32 {
        unsafe { (self.api.last_error)(self.handle.as_ptr()) }
    }
}

impl Phonemizer for OpenJTalk {
    fn phonemize_with_prosody(&mut self, text: &str) -> Result<ProsodyPhonemes> {
        let text = CString::new(text)
            .map_err(|_| TtsError::Input("Text contains an interior NUL byte".to_string()))?;

        let raw = unsafe { (self.api.phonemize)(self.handle.as_ptr(), text.as_ptr()) };
        let ptr = match NonNull::new(raw) {
            Some(ptr) => ptr,
            None => {
                let code = self.last_error();
                return Err(TtsError::Phonemizer {
                    code,
                    message: "phonemize_with_prosody returned null".to_string(),
                });
            }
        };
        let guard = ResultGuard {
            ptr,
            free: self.api.free_result,
        };

        let result = unsafe { guard.ptr.as_ref() };
        let count = usize::try_from(result.phoneme_count).unwrap_or(0);

        let phonemes = if result.phonemes.is_null() {
            String::new()
        } else {
            unsafe { CStr::from_ptr(result.phonemes) }
                .to_string_lossy()
                .into_owned()
        };

        let a1 = unsafe { copy_labels(result.prosody_a1, count) }?;
        let a2 = unsafe { copy_labels(result.prosody_a2, count) }?;
        let a3 = unsafe { copy_labels(result.prosody_a3, count) }?;

        drop(guard);
        Ok(ProsodyPhonemes::from_space_delimited(&phonemes, a1, a2, a3))
    }
}

impl Drop for OpenJTalk {
    fn drop(&mut self) {
        unsafe { (self.api.destroy)(self.handle.as_ptr()) }
    }
}

unsafe fn copy_labels(ptr: *const i32, count: usize) -> Result<Vec<i32>> {
    if count == 0 {
        return Ok(Vec::new());
    }
    if ptr.is_null() {
        return Err(TtsError::Phonemizer {
            code: -1,
            message: "prosody labels missing from native result".to_string(),
        });
    }
    Ok(std::slice::from_raw_parts(ptr, count).to_vec())
}

fn path_to_cstring(path: &Path) -> Result<CString> {
    let text = path
        .to_str()
        .ok_or_else(|| TtsError::Config(format!("Dictionary path is not UTF-8: {:?}", path)))?;
    CString::new(text).map_err(|_| TtsError::Config("Dictionary path contains NUL".to_string()))
}
