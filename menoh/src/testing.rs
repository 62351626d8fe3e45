//! In-process stand-in for the Menoh C API, used by the unit tests.
//!
//! It understands a single graph, the Boolean AND network
//! (`input[N,2] -> Gemm -> Relu -> Abs -> output[N,1]`), identified by the
//! exact bytes of [`AND_MODEL`]. Native objects are never freed: deleting
//! one only bumps a counter, so tests can assert that each object was
//! deleted exactly once, and later use of a deleted object is reported as
//! an engine error instead of touching freed memory.

use std::cell::RefCell;
use std::collections::HashMap;
use std::ffi::{CStr, CString};
use std::os::raw::{c_char, c_void};
use std::io::Write;
use std::sync::atomic::{AtomicU32, Ordering};

use parking_lot::Mutex;
use tempfile::NamedTempFile;

use crate::engine::Engine;
use crate::error::ErrorCode;
use crate::ffi::MenohApi;

/// ONNX bytes of the AND model.
pub(crate) const AND_MODEL: &[u8] = b"menoh-fake-onnx:and_op";
/// ONNX bytes of a model declaring an opset newer than the engine supports.
pub(crate) const OPSET99_MODEL: &[u8] = b"menoh-fake-onnx:opset99";
/// Name of the Gemm node's output inside the AND graph.
pub(crate) const GEMM_NODE: &str = "140211424823896";

const BACKENDS: [&str; 2] = ["mkldnn", "mkldnn_with_generic_fallback"];

pub(crate) fn engine() -> Engine {
    Engine::new(&FAKE_API)
}

// ---------------------------------------------------------------------------
// Last error
// ---------------------------------------------------------------------------

thread_local! {
    static LAST_ERROR: RefCell<CString> = RefCell::new(CString::default());
}

pub(crate) fn set_last_error(msg: &str) {
    let msg = CString::new(msg).unwrap_or_default();
    LAST_ERROR.with(|e| *e.borrow_mut() = msg);
}

fn fail(code: ErrorCode, msg: impl Into<String>) -> i32 {
    set_last_error(&msg.into());
    code.id()
}

unsafe extern "C" fn get_last_error_message() -> *const c_char {
    // The CString lives in the thread-local until the next failure.
    LAST_ERROR.with(|e| e.borrow().as_ptr())
}

// ---------------------------------------------------------------------------
// Objects
// ---------------------------------------------------------------------------

#[repr(C)]
struct Object<T> {
    deletes: AtomicU32,
    value: Mutex<T>,
}

fn new_object_of<T>(value: T) -> *mut c_void {
    let obj = Box::new(Object {
        deletes: AtomicU32::new(0),
        value: Mutex::new(value),
    });
    Box::into_raw(obj) as *mut c_void
}

unsafe fn live<'a, T>(p: *mut c_void) -> Result<&'a Object<T>, i32> {
    if p.is_null() {
        return Err(fail(ErrorCode::StdError, "menoh fake: null handle"));
    }
    let obj = unsafe { &*(p as *const Object<T>) };
    if obj.deletes.load(Ordering::SeqCst) > 0 {
        return Err(fail(ErrorCode::StdError, "menoh fake: use after delete"));
    }
    Ok(obj)
}

unsafe extern "C" fn delete_any(p: *mut c_void) {
    if p.is_null() {
        return;
    }
    // `deletes` is the first field of every `Object<T>`.
    let deletes = unsafe { &*(p as *const AtomicU32) };
    deletes.fetch_add(1, Ordering::SeqCst);
}

/// Creates a bare object for handle tests.
pub(crate) fn new_object() -> *mut c_void {
    new_object_of(())
}

pub(crate) unsafe extern "C" fn delete_object(p: *mut c_void) {
    unsafe { delete_any(p) }
}

/// Number of times the native object at `p` has been deleted.
pub(crate) fn delete_count(p: *mut c_void) -> u32 {
    assert!(!p.is_null());
    unsafe { &*(p as *const AtomicU32) }.load(Ordering::SeqCst)
}

fn status(r: Result<(), i32>) -> i32 {
    match r {
        Ok(()) => 0,
        Err(code) => code,
    }
}

unsafe fn c_str(p: *const c_char) -> String {
    unsafe { CStr::from_ptr(p) }.to_string_lossy().into_owned()
}

// ---------------------------------------------------------------------------
// Model data
// ---------------------------------------------------------------------------

struct FakeModelData {
    optimized: bool,
    loaded_from: usize,
}

fn parse(bytes: &[u8], source: &str, loaded_from: usize) -> Result<FakeModelData, i32> {
    if bytes == AND_MODEL {
        Ok(FakeModelData {
            optimized: false,
            loaded_from,
        })
    } else if bytes == OPSET99_MODEL {
        Err(fail(
            ErrorCode::UnsupportedOnnxOpsetVersion,
            format!("menoh unsupported onnx opset version error: {source} has onnx opset version 99 > 8"),
        ))
    } else {
        Err(fail(ErrorCode::OnnxParseError, format!("menoh onnx parse error: {source}")))
    }
}

unsafe extern "C" fn make_model_data_from_onnx(path: *const c_char, dst: *mut *mut c_void) -> i32 {
    let path = unsafe { c_str(path) };
    let bytes = match std::fs::read(&path) {
        Ok(b) => b,
        Err(_) => return fail(ErrorCode::InvalidFilename, format!("menoh invalid filename error: {path}")),
    };
    status(parse(&bytes, &path, 0).map(|data| unsafe { *dst = new_object_of(data) }))
}

unsafe extern "C" fn make_model_data_from_onnx_data_on_memory(data: *const u8, size: i32, dst: *mut *mut c_void) -> i32 {
    if data.is_null() || size <= 0 {
        return fail(ErrorCode::OnnxParseError, "menoh onnx parse error: onnx data");
    }
    let bytes = unsafe { std::slice::from_raw_parts(data, size as usize) };
    status(parse(bytes, "onnx data", data as usize).map(|d| unsafe { *dst = new_object_of(d) }))
}

unsafe extern "C" fn model_data_optimize(model_data: *mut c_void, vpt: *mut c_void) -> i32 {
    status((|| -> Result<(), i32> {
        let data = unsafe { live::<FakeModelData>(model_data)? };
        unsafe { live::<FakeVpt>(vpt)? };
        data.value.lock().optimized = true;
        Ok(())
    })())
}

/// Whether `optimize` ran on the model data at `p`.
pub(crate) fn model_data_optimized(p: *mut c_void) -> bool {
    unsafe { &*(p as *const Object<FakeModelData>) }.value.lock().optimized
}

/// Address the model data at `p` was parsed from (0 when loaded from a file).
pub(crate) fn model_data_source(p: *mut c_void) -> usize {
    unsafe { &*(p as *const Object<FakeModelData>) }.value.lock().loaded_from
}

// ---------------------------------------------------------------------------
// Variable profile table
// ---------------------------------------------------------------------------

#[derive(Clone)]
struct Profile {
    dtype: i32,
    dims: Vec<i32>,
}

#[derive(Default)]
struct FakeVptBuilder {
    inputs: Vec<(String, Profile)>,
    outputs: Vec<String>,
}

struct FakeVpt {
    profiles: HashMap<String, Profile>,
}

unsafe extern "C" fn make_variable_profile_table_builder(dst: *mut *mut c_void) -> i32 {
    unsafe { *dst = new_object_of(FakeVptBuilder::default()) };
    0
}

unsafe extern "C" fn add_input_profile(
    builder: *mut c_void,
    name: *const c_char,
    dtype: i32,
    dims_size: i32,
    dims: *const i32,
) -> i32 {
    status((|| -> Result<(), i32> {
        let b = unsafe { live::<FakeVptBuilder>(builder)? };
        let name = unsafe { c_str(name) };
        let dims = if dims_size > 0 {
            unsafe { std::slice::from_raw_parts(dims, dims_size as usize) }.to_vec()
        } else {
            Vec::new()
        };
        b.value.lock().inputs.push((name, Profile { dtype, dims }));
        Ok(())
    })())
}

unsafe extern "C" fn add_output_name(builder: *mut c_void, name: *const c_char) -> i32 {
    status((|| -> Result<(), i32> {
        let b = unsafe { live::<FakeVptBuilder>(builder)? };
        b.value.lock().outputs.push(unsafe { c_str(name) });
        Ok(())
    })())
}

fn resolve_and_graph(b: &FakeVptBuilder) -> Result<HashMap<String, Profile>, i32> {
    let input = b
        .inputs
        .iter()
        .rev()
        .find(|(n, _)| n == "input")
        .map(|(_, p)| p)
        .ok_or_else(|| fail(ErrorCode::VariableNotFound, "menoh variable not found error: input"))?;
    if let Some((name, _)) = b.inputs.iter().find(|(n, _)| n != "input") {
        return Err(fail(ErrorCode::VariableNotFound, format!("menoh variable not found error: {name}")));
    }
    if input.dtype != 0 {
        return Err(fail(ErrorCode::InvalidDType, format!("menoh invalid dtype error: {}", input.dtype)));
    }
    if input.dims.len() != 2 {
        return Err(fail(
            ErrorCode::UnsupportedInputDims,
            format!("menoh unsupported input dims error: input has {} dims", input.dims.len()),
        ));
    }
    if input.dims[1] != 2 {
        return Err(fail(
            ErrorCode::DimensionMismatch,
            format!(
                "menoh dimension mismatch error: Gemm issuing \"{GEMM_NODE}\": input[1] and weight[1] \
                 actual value: {} valid value: 2",
                input.dims[1]
            ),
        ));
    }
    let batch = input.dims[0];

    let mut profiles = HashMap::new();
    profiles.insert("input".to_string(), input.clone());
    for out in &b.outputs {
        if out != "output" && out != GEMM_NODE {
            return Err(fail(ErrorCode::VariableNotFound, format!("menoh variable not found error: {out}")));
        }
        profiles.insert(out.clone(), Profile { dtype: 0, dims: vec![batch, 1] });
    }
    Ok(profiles)
}

unsafe extern "C" fn build_variable_profile_table(builder: *mut c_void, model_data: *mut c_void, dst: *mut *mut c_void) -> i32 {
    status((|| -> Result<(), i32> {
        let b = unsafe { live::<FakeVptBuilder>(builder)? };
        unsafe { live::<FakeModelData>(model_data)? };
        let profiles = resolve_and_graph(&b.value.lock())?;
        unsafe { *dst = new_object_of(FakeVpt { profiles }) };
        Ok(())
    })())
}

fn lookup<'a>(profiles: &'a HashMap<String, Profile>, name: &str) -> Result<&'a Profile, i32> {
    profiles
        .get(name)
        .ok_or_else(|| fail(ErrorCode::VariableNotFound, format!("menoh variable not found error: {name}")))
}

fn dims_at(p: &Profile, index: i32) -> Result<i32, i32> {
    usize::try_from(index)
        .ok()
        .and_then(|i| p.dims.get(i).copied())
        .ok_or_else(|| fail(ErrorCode::IndexOutOfRange, format!("menoh index out of range error: {index}")))
}

unsafe extern "C" fn vpt_get_dtype(vpt: *mut c_void, name: *const c_char, dst: *mut i32) -> i32 {
    status((|| -> Result<(), i32> {
        let t = unsafe { live::<FakeVpt>(vpt)? };
        let v = t.value.lock();
        let p = lookup(&v.profiles, &unsafe { c_str(name) })?;
        unsafe { *dst = p.dtype };
        Ok(())
    })())
}

unsafe extern "C" fn vpt_get_dims_size(vpt: *mut c_void, name: *const c_char, dst: *mut i32) -> i32 {
    status((|| -> Result<(), i32> {
        let t = unsafe { live::<FakeVpt>(vpt)? };
        let v = t.value.lock();
        let p = lookup(&v.profiles, &unsafe { c_str(name) })?;
        unsafe { *dst = p.dims.len() as i32 };
        Ok(())
    })())
}

unsafe extern "C" fn vpt_get_dims_at(vpt: *mut c_void, name: *const c_char, index: i32, dst: *mut i32) -> i32 {
    status((|| -> Result<(), i32> {
        let t = unsafe { live::<FakeVpt>(vpt)? };
        let v = t.value.lock();
        let p = lookup(&v.profiles, &unsafe { c_str(name) })?;
        let d = dims_at(p, index)?;
        unsafe { *dst = d };
        Ok(())
    })())
}

// ---------------------------------------------------------------------------
// Model builder and model
// ---------------------------------------------------------------------------

struct FakeModelBuilder {
    profiles: HashMap<String, Profile>,
    attached: HashMap<String, *mut c_void>,
}

struct FakeModel {
    profiles: HashMap<String, Profile>,
    buffers: HashMap<String, *mut f32>,
}

unsafe extern "C" fn make_model_builder(vpt: *mut c_void, dst: *mut *mut c_void) -> i32 {
    status((|| -> Result<(), i32> {
        let t = unsafe { live::<FakeVpt>(vpt)? };
        let profiles = t.value.lock().profiles.clone();
        unsafe {
            *dst = new_object_of(FakeModelBuilder {
                profiles,
                attached: HashMap::new(),
            })
        };
        Ok(())
    })())
}

unsafe extern "C" fn attach_external_buffer(builder: *mut c_void, name: *const c_char, buffer: *mut c_void) -> i32 {
    status((|| -> Result<(), i32> {
        let b = unsafe { live::<FakeModelBuilder>(builder)? };
        let name = unsafe { c_str(name) };
        let mut b = b.value.lock();
        lookup(&b.profiles, &name)?;
        b.attached.insert(name, buffer);
        Ok(())
    })())
}

unsafe extern "C" fn build_model(
    builder: *mut c_void,
    model_data: *mut c_void,
    backend_name: *const c_char,
    backend_config: *const c_char,
    dst: *mut *mut c_void,
) -> i32 {
    status((|| -> Result<(), i32> {
        let b = unsafe { live::<FakeModelBuilder>(builder)? };
        unsafe { live::<FakeModelData>(model_data)? };
        let backend_name = unsafe { c_str(backend_name) };
        let backend_config = unsafe { c_str(backend_config) };
        if !BACKENDS.contains(&backend_name.as_str()) {
            return Err(fail(
                ErrorCode::InvalidBackendName,
                format!("menoh invalid backend name error: {backend_name}"),
            ));
        }
        if !backend_config.is_empty() && serde_json::from_str::<serde_json::Value>(&backend_config).is_err() {
            return Err(fail(
                ErrorCode::JsonParseError,
                format!("menoh json parse error: {backend_config}"),
            ));
        }

        let b = b.value.lock();
        let mut buffers = HashMap::new();
        for (name, p) in &b.profiles {
            let ptr = match b.attached.get(name) {
                Some(&ptr) => ptr as *mut f32,
                None => {
                    let len: i32 = p.dims.iter().product();
                    Box::leak(vec![0.0f32; len.max(0) as usize].into_boxed_slice()).as_mut_ptr()
                }
            };
            buffers.insert(name.clone(), ptr);
        }
        unsafe {
            *dst = new_object_of(FakeModel {
                profiles: b.profiles.clone(),
                buffers,
            })
        };
        Ok(())
    })())
}

unsafe extern "C" fn model_get_variable_buffer_handle(model: *mut c_void, name: *const c_char, dst: *mut *mut c_void) -> i32 {
    status((|| -> Result<(), i32> {
        let m = unsafe { live::<FakeModel>(model)? };
        let name = unsafe { c_str(name) };
        let m = m.value.lock();
        let ptr = m
            .buffers
            .get(&name)
            .copied()
            .ok_or_else(|| fail(ErrorCode::VariableNotFound, format!("menoh variable not found error: {name}")))?;
        unsafe { *dst = ptr as *mut c_void };
        Ok(())
    })())
}

unsafe extern "C" fn model_get_variable_dtype(model: *mut c_void, name: *const c_char, dst: *mut i32) -> i32 {
    status((|| -> Result<(), i32> {
        let m = unsafe { live::<FakeModel>(model)? };
        let m = m.value.lock();
        let p = lookup(&m.profiles, &unsafe { c_str(name) })?;
        unsafe { *dst = p.dtype };
        Ok(())
    })())
}

unsafe extern "C" fn model_get_variable_dims_size(model: *mut c_void, name: *const c_char, dst: *mut i32) -> i32 {
    status((|| -> Result<(), i32> {
        let m = unsafe { live::<FakeModel>(model)? };
        let m = m.value.lock();
        let p = lookup(&m.profiles, &unsafe { c_str(name) })?;
        unsafe { *dst = p.dims.len() as i32 };
        Ok(())
    })())
}

unsafe extern "C" fn model_get_variable_dims_at(model: *mut c_void, name: *const c_char, index: i32, dst: *mut i32) -> i32 {
    status((|| -> Result<(), i32> {
        let m = unsafe { live::<FakeModel>(model)? };
        let m = m.value.lock();
        let p = lookup(&m.profiles, &unsafe { c_str(name) })?;
        let d = dims_at(p, index)?;
        unsafe { *dst = d };
        Ok(())
    })())
}

unsafe extern "C" fn model_run(model: *mut c_void) -> i32 {
    status((|| -> Result<(), i32> {
        let m = unsafe { live::<FakeModel>(model)? };
        let m = m.value.lock();
        let batch = m.profiles["input"].dims[0].max(0) as usize;
        let input = unsafe { std::slice::from_raw_parts(m.buffers["input"], batch * 2) };
        for row in 0..batch {
            let gemm = input[row * 2] + input[row * 2 + 1] - 1.0;
            if let Some(&out) = m.buffers.get(GEMM_NODE) {
                unsafe { *out.add(row) = gemm };
            }
            if let Some(&out) = m.buffers.get("output") {
                unsafe { *out.add(row) = gemm.max(0.0).abs() };
            }
        }
        Ok(())
    })())
}

static FAKE_API: MenohApi = MenohApi {
    get_last_error_message,
    make_model_data_from_onnx,
    make_model_data_from_onnx_data_on_memory,
    delete_model_data: delete_any,
    model_data_optimize,
    make_variable_profile_table_builder,
    delete_variable_profile_table_builder: delete_any,
    variable_profile_table_builder_add_input_profile: add_input_profile,
    variable_profile_table_builder_add_output_name: add_output_name,
    build_variable_profile_table,
    delete_variable_profile_table: delete_any,
    variable_profile_table_get_dtype: vpt_get_dtype,
    variable_profile_table_get_dims_size: vpt_get_dims_size,
    variable_profile_table_get_dims_at: vpt_get_dims_at,
    make_model_builder,
    delete_model_builder: delete_any,
    model_builder_attach_external_buffer: attach_external_buffer,
    build_model,
    delete_model: delete_any,
    model_get_variable_buffer_handle,
    model_get_variable_dtype,
    model_get_variable_dims_size,
    model_get_variable_dims_at,
    model_run,
};

// ---------------------------------------------------------------------------
// Files
// ---------------------------------------------------------------------------

/// Writes `data` to a temporary `.onnx` file, removed when dropped.
pub(crate) fn write_model_file(data: &[u8]) -> NamedTempFile {
    let mut file = NamedTempFile::with_suffix(".onnx").unwrap();
    file.write_all(data).unwrap();
    file.flush().unwrap();
    file
}
