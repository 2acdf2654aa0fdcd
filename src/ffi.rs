//! FFI bindings for feedtrace
//!
//! C-compatible entry points so host applications (the survey front end, R or
//! Python analysis scripts) can build rows and summaries without a Rust
//! toolchain. All functions take null-terminated C strings and return
//! allocated memory that must be freed with `feedtrace_free_string`.

use std::cell::RefCell;
use std::ffi::{CStr, CString};
use std::os::raw::c_char;
use std::ptr;

use crate::pipeline::{roster_to_summary, session_to_row, RosterProcessor};

thread_local! {
    static LAST_ERROR: RefCell<Option<CString>> = const { RefCell::new(None) };
}

fn set_last_error(msg: &str) {
    LAST_ERROR.with(|e| {
        *e.borrow_mut() = CString::new(msg).ok();
    });
}

fn clear_last_error() {
    LAST_ERROR.with(|e| {
        *e.borrow_mut() = None;
    });
}

unsafe fn cstr_to_string(ptr: *const c_char) -> Option<String> {
    if ptr.is_null() {
        return None;
    }
    CStr::from_ptr(ptr).to_str().ok().map(|s| s.to_string())
}

/// Caller must free with `feedtrace_free_string`
fn string_to_cstr(s: &str) -> *mut c_char {
    match CString::new(s) {
        Ok(cstr) => cstr.into_raw(),
        Err(_) => {
            set_last_error("Output contains an interior NUL byte");
            ptr::null_mut()
        }
    }
}

/// Run a JSON-in / JSON-out function over a C string
unsafe fn json_call<F>(json: *const c_char, f: F) -> *mut c_char
where
    F: FnOnce(String) -> Result<String, crate::ComputeError>,
{
    clear_last_error();

    let json_str = match cstr_to_string(json) {
        Some(s) => s,
        None => {
            set_last_error("Invalid JSON string pointer");
            return ptr::null_mut();
        }
    };

    match f(json_str) {
        Ok(out) => string_to_cstr(&out),
        Err(e) => {
            set_last_error(&e.to_string());
            ptr::null_mut()
        }
    }
}

// ============================================================================
// Stateless API
// ============================================================================

/// Build the analytics row of a session JSON document.
///
/// # Safety
/// - `json` must be a valid null-terminated C string.
/// - Returns a newly allocated string that must be freed with `feedtrace_free_string`.
/// - Returns NULL on error; call `feedtrace_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn feedtrace_session_to_row(json: *const c_char) -> *mut c_char {
    json_call(json, session_to_row)
}

/// Summarize a JSON array of stored rows (`null` is an empty roster).
///
/// # Safety
/// - `json` must be a valid null-terminated C string.
/// - Returns a newly allocated string that must be freed with `feedtrace_free_string`.
/// - Returns NULL on error; call `feedtrace_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn feedtrace_summarize_roster(json: *const c_char) -> *mut c_char {
    json_call(json, roster_to_summary)
}

// ============================================================================
// Stateful Processor API
// ============================================================================

/// Opaque handle to a RosterProcessor
pub struct RosterProcessorHandle {
    processor: RosterProcessor,
}

/// Create an empty RosterProcessor.
///
/// # Safety
/// - Returns a pointer to a newly allocated processor.
/// - Must be freed with `feedtrace_processor_free`.
#[no_mangle]
pub unsafe extern "C" fn feedtrace_processor_new() -> *mut RosterProcessorHandle {
    clear_last_error();
    let handle = Box::new(RosterProcessorHandle {
        processor: RosterProcessor::new(),
    });
    Box::into_raw(handle)
}

/// Free a RosterProcessor.
///
/// # Safety
/// - `processor` must be a valid pointer returned by `feedtrace_processor_new`, or NULL.
/// - After calling this function, the pointer is invalid.
#[no_mangle]
pub unsafe extern "C" fn feedtrace_processor_free(processor: *mut RosterProcessorHandle) {
    if !processor.is_null() {
        drop(Box::from_raw(processor));
    }
}

/// Build a session's row, keep it in the processor, and return it.
///
/// # Safety
/// - `processor` must be a valid pointer returned by `feedtrace_processor_new`.
/// - `json` must be a valid null-terminated C string.
/// - Returns a newly allocated string that must be freed with `feedtrace_free_string`.
/// - Returns NULL on error; call `feedtrace_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn feedtrace_processor_process_session(
    processor: *mut RosterProcessorHandle,
    json: *const c_char,
) -> *mut c_char {
    if processor.is_null() {
        set_last_error("Null processor pointer");
        return ptr::null_mut();
    }
    let handle = &mut *processor;
    json_call(json, |s| handle.processor.process_session(&s))
}

/// Summarize the rows accumulated so far.
///
/// # Safety
/// - `processor` must be a valid pointer returned by `feedtrace_processor_new`.
/// - Returns a newly allocated string that must be freed with `feedtrace_free_string`.
/// - Returns NULL on error; call `feedtrace_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn feedtrace_processor_summary(
    processor: *mut RosterProcessorHandle,
) -> *mut c_char {
    clear_last_error();

    if processor.is_null() {
        set_last_error("Null processor pointer");
        return ptr::null_mut();
    }

    let handle = &*processor;

    match handle.processor.summary_json() {
        Ok(json) => string_to_cstr(&json),
        Err(e) => {
            set_last_error(&e.to_string());
            ptr::null_mut()
        }
    }
}

/// Save the accumulated rows as a JSON array.
///
/// # Safety
/// - `processor` must be a valid pointer returned by `feedtrace_processor_new`.
/// - Returns a newly allocated string that must be freed with `feedtrace_free_string`.
/// - Returns NULL on error; call `feedtrace_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn feedtrace_processor_save_rows(
    processor: *mut RosterProcessorHandle,
) -> *mut c_char {
    clear_last_error();

    if processor.is_null() {
        set_last_error("Null processor pointer");
        return ptr::null_mut();
    }

    let handle = &*processor;

    match handle.processor.save_rows() {
        Ok(json) => string_to_cstr(&json),
        Err(e) => {
            set_last_error(&e.to_string());
            ptr::null_mut()
        }
    }
}

/// Replace the processor's rows with a stored JSON array.
///
/// # Safety
/// - `processor` must be a valid pointer returned by `feedtrace_processor_new`.
/// - `json` must be a valid null-terminated C string.
/// - Returns 0 on success, non-zero on error.
/// - On error, call `feedtrace_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn feedtrace_processor_load_rows(
    processor: *mut RosterProcessorHandle,
    json: *const c_char,
) -> i32 {
    clear_last_error();

    if processor.is_null() {
        set_last_error("Null processor pointer");
        return -1;
    }

    let handle = &mut *processor;

    let json_str = match cstr_to_string(json) {
        Some(s) => s,
        None => {
            set_last_error("Invalid JSON string pointer");
            return -1;
        }
    };

    match handle.processor.load_rows(&json_str) {
        Ok(()) => 0,
        Err(e) => {
            set_last_error(&e.to_string());
            -1
        }
    }
}

// ============================================================================
// Memory Management
// ============================================================================

/// Free a string returned by feedtrace functions.
///
/// # Safety
/// - `ptr` must be a valid pointer returned by a feedtrace function, or NULL.
/// - After calling this function, the pointer is invalid.
#[no_mangle]
pub unsafe extern "C" fn feedtrace_free_string(ptr: *mut c_char) {
    if !ptr.is_null() {
        drop(CString::from_raw(ptr));
    }
}

// ============================================================================
// Error Handling
// ============================================================================

/// Get the last error message.
///
/// # Safety
/// - Returns a pointer to a thread-local error string.
/// - The returned pointer is valid until the next feedtrace call on this thread.
/// - Do NOT free the returned pointer.
/// - Returns NULL if no error occurred.
#[no_mangle]
pub unsafe extern "C" fn feedtrace_last_error() -> *const c_char {
    LAST_ERROR.with(|e| match &*e.borrow() {
        Some(cstr) => cstr.as_ptr(),
        None => ptr::null(),
    })
}

// ============================================================================
// Version Information
// ============================================================================

/// Get the library version.
///
/// # Safety
/// - Returns a pointer to a static string. Do NOT free.
#[no_mangle]
pub unsafe extern "C" fn feedtrace_version() -> *const c_char {
    static VERSION: &[u8] = concat!(env!("CARGO_PKG_VERSION"), "\0").as_bytes();
    VERSION.as_ptr() as *const c_char
}
