//! Invocation boundary.
//!
//! Requests and responses cross into the loaded artifact as JSON over a
//! C ABI entry point. Errors and panics inside the artifact are caught at
//! this boundary and surfaced as structured failures; they never crash the
//! serving process.

use std::collections::HashMap;

use libloading::{Library, Symbol};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Structured request handed to the loaded function.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InvokeRequest {
    pub method: String,
    pub url: String,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default)]
    pub body: String,
}

/// Structured response collected from the loaded function.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvokeResponse {
    pub status: u16,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default)]
    pub body: String,
}

/// The loaded, invocable representation of a function entry point.
pub trait Artifact: Send + Sync {
    /// Dispatch one request to the artifact.
    fn invoke(&self, request: &InvokeRequest) -> Result<InvokeResponse>;
}

/// C ABI entry point exported by compiled functions.
///
/// The request is passed as a JSON buffer; on success the function
/// allocates a JSON response buffer (ownership transfers to the caller,
/// freed with `libc::free`) and returns 0.
pub type EntryFn = unsafe extern "C" fn(
    *const u8,
    usize, // request
    *mut *mut u8,
    *mut usize, // response out
) -> i32;

/// Result code returned by a function entry point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum EntryResult {
    /// Request handled, response written.
    Success = 0,
    /// Request could not be deserialized.
    BadRequest = -1,
    /// The function reported a failure.
    HandlerError = -2,
    /// Response could not be serialized.
    BadResponse = -3,
    /// The function panicked.
    Panic = -4,
}

impl From<i32> for EntryResult {
    fn from(code: i32) -> Self {
        match code {
            0 => Self::Success,
            -1 => Self::BadRequest,
            -3 => Self::BadResponse,
            -4 => Self::Panic,
            // Unknown codes are treated as handler failures.
            _ => Self::HandlerError,
        }
    }
}

/// RAII guard for the entry point's output buffer.
/// Ensures libc::free runs even if response parsing fails.
struct OutputGuard {
    ptr: *mut u8,
}

impl OutputGuard {
    unsafe fn new(ptr: *mut u8) -> Self {
        Self { ptr }
    }

    fn as_slice(&self, len: usize) -> &[u8] {
        unsafe { std::slice::from_raw_parts(self.ptr, len) }
    }
}

impl Drop for OutputGuard {
    fn drop(&mut self) {
        if !self.ptr.is_null() {
            unsafe {
                libc::free(self.ptr as *mut libc::c_void);
            }
        }
    }
}

/// Call a function entry point inside `library`.
pub(crate) fn call_entry(
    library: &Library,
    symbol: &str,
    request: &InvokeRequest,
) -> Result<InvokeResponse> {
    let request_json = serde_json::to_vec(request)
        .map_err(|e| Error::Invocation(format!("cannot serialize request: {}", e)))?;

    // Safety: the symbol was verified at load time to exist; its signature
    // is fixed by the compilation contract.
    let entry: Symbol<EntryFn> = unsafe { library.get(symbol.as_bytes()) }
        .map_err(|e| Error::EntrySymbolNotFound(format!("{}: {}", symbol, e)))?;

    let mut out_ptr: *mut u8 = std::ptr::null_mut();
    let mut out_len: usize = 0;

    let code = unsafe {
        entry(
            request_json.as_ptr(),
            request_json.len(),
            &mut out_ptr,
            &mut out_len,
        )
    };

    interpret_entry_result(code, out_ptr, out_len, symbol)
}

/// Map an entry point's result code and output buffer to a response.
///
/// Any non-null output buffer is owned by a guard before the code is
/// inspected, so a buffer written on an error path is still freed.
fn interpret_entry_result(
    code: i32,
    out_ptr: *mut u8,
    out_len: usize,
    symbol: &str,
) -> Result<InvokeResponse> {
    let guard = (!out_ptr.is_null()).then(|| unsafe { OutputGuard::new(out_ptr) });

    match EntryResult::from(code) {
        EntryResult::Success => {
            let Some(guard) = guard.filter(|_| out_len > 0) else {
                return Err(Error::Invocation(format!(
                    "{} reported success but wrote no response",
                    symbol
                )));
            };
            serde_json::from_slice(guard.as_slice(out_len))
                .map_err(|e| Error::Invocation(format!("malformed response from {}: {}", symbol, e)))
        }
        EntryResult::BadRequest => Err(Error::Invocation(format!(
            "{} could not deserialize the request",
            symbol
        ))),
        EntryResult::HandlerError => match guard.filter(|_| out_len > 0) {
            // The handler may still have written an error payload.
            Some(guard) => {
                let detail = String::from_utf8_lossy(guard.as_slice(out_len)).into_owned();
                Err(Error::Invocation(detail))
            }
            None => Err(Error::Invocation(format!("{} returned an error", symbol))),
        },
        EntryResult::BadResponse => Err(Error::Invocation(format!(
            "{} failed to serialize its response",
            symbol
        ))),
        EntryResult::Panic => Err(Error::Invocation(format!(
            "{} panicked during invocation",
            symbol
        ))),
    }
}
