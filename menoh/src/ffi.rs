//! Raw FFI bindings for the Menoh C API.
//!
//! These declarations match `menoh/menoh.h` (v1.1). We hand-write them
//! instead of using bindgen, and route every call through a function
//! table so the same safe wrappers can drive the linked library or any
//! other implementation of the table.

use std::os::raw::{c_char, c_void};

/// Status code returned by every fallible Menoh call. Zero means success.
pub type MenohErrorCode = i32;
/// Data type id (`menoh_dtype`).
pub type MenohDType = i32;

/// Opaque model data handle.
pub type MenohModelDataHandle = *mut c_void;
/// Opaque variable profile table builder handle.
pub type MenohVariableProfileTableBuilderHandle = *mut c_void;
/// Opaque variable profile table handle.
pub type MenohVariableProfileTableHandle = *mut c_void;
/// Opaque model builder handle.
pub type MenohModelBuilderHandle = *mut c_void;
/// Opaque model handle.
pub type MenohModelHandle = *mut c_void;

/// Function table for the Menoh C API.
///
/// Field names drop the `menoh_` prefix of the C symbols.
#[repr(C)]
pub struct MenohApi {
    pub get_last_error_message: unsafe extern "C" fn() -> *const c_char,

    // Model data
    pub make_model_data_from_onnx:
        unsafe extern "C" fn(onnx_filename: *const c_char, dst_handle: *mut MenohModelDataHandle) -> MenohErrorCode,
    pub make_model_data_from_onnx_data_on_memory: unsafe extern "C" fn(
        onnx_data: *const u8,
        size: i32,
        dst_handle: *mut MenohModelDataHandle,
    ) -> MenohErrorCode,
    pub delete_model_data: unsafe extern "C" fn(model_data: MenohModelDataHandle),
    pub model_data_optimize: unsafe extern "C" fn(
        model_data: MenohModelDataHandle,
        variable_profile_table: MenohVariableProfileTableHandle,
    ) -> MenohErrorCode,

    // Variable profile table builder
    pub make_variable_profile_table_builder:
        unsafe extern "C" fn(dst_handle: *mut MenohVariableProfileTableBuilderHandle) -> MenohErrorCode,
    pub delete_variable_profile_table_builder: unsafe extern "C" fn(builder: MenohVariableProfileTableBuilderHandle),
    pub variable_profile_table_builder_add_input_profile: unsafe extern "C" fn(
        builder: MenohVariableProfileTableBuilderHandle,
        name: *const c_char,
        dtype: MenohDType,
        dims_size: i32,
        dims: *const i32,
    ) -> MenohErrorCode,
    pub variable_profile_table_builder_add_output_name:
        unsafe extern "C" fn(builder: MenohVariableProfileTableBuilderHandle, name: *const c_char) -> MenohErrorCode,
    pub build_variable_profile_table: unsafe extern "C" fn(
        builder: MenohVariableProfileTableBuilderHandle,
        model_data: MenohModelDataHandle,
        dst_handle: *mut MenohVariableProfileTableHandle,
    ) -> MenohErrorCode,

    // Variable profile table
    pub delete_variable_profile_table: unsafe extern "C" fn(variable_profile_table: MenohVariableProfileTableHandle),
    pub variable_profile_table_get_dtype: unsafe extern "C" fn(
        variable_profile_table: MenohVariableProfileTableHandle,
        variable_name: *const c_char,
        dst_dtype: *mut MenohDType,
    ) -> MenohErrorCode,
    pub variable_profile_table_get_dims_size: unsafe extern "C" fn(
        variable_profile_table: MenohVariableProfileTableHandle,
        variable_name: *const c_char,
        dst_size: *mut i32,
    ) -> MenohErrorCode,
    pub variable_profile_table_get_dims_at: unsafe extern "C" fn(
        variable_profile_table: MenohVariableProfileTableHandle,
        variable_name: *const c_char,
        index: i32,
        dst_size: *mut i32,
    ) -> MenohErrorCode,

    // Model builder
    pub make_model_builder: unsafe extern "C" fn(
        variable_profile_table: MenohVariableProfileTableHandle,
        dst_handle: *mut MenohModelBuilderHandle,
    ) -> MenohErrorCode,
    pub delete_model_builder: unsafe extern "C" fn(model_builder: MenohModelBuilderHandle),
    pub model_builder_attach_external_buffer: unsafe extern "C" fn(
        builder: MenohModelBuilderHandle,
        variable_name: *const c_char,
        buffer_handle: *mut c_void,
    ) -> MenohErrorCode,
    pub build_model: unsafe extern "C" fn(
        builder: MenohModelBuilderHandle,
        model_data: MenohModelDataHandle,
        backend_name: *const c_char,
        backend_config: *const c_char,
        dst_model_handle: *mut MenohModelHandle,
    ) -> MenohErrorCode,

    // Model
    pub delete_model: unsafe extern "C" fn(model: MenohModelHandle),
    pub model_get_variable_buffer_handle: unsafe extern "C" fn(
        model: MenohModelHandle,
        variable_name: *const c_char,
        data_p: *mut *mut c_void,
    ) -> MenohErrorCode,
    pub model_get_variable_dtype: unsafe extern "C" fn(
        model: MenohModelHandle,
        variable_name: *const c_char,
        dst_dtype: *mut MenohDType,
    ) -> MenohErrorCode,
    pub model_get_variable_dims_size: unsafe extern "C" fn(
        model: MenohModelHandle,
        variable_name: *const c_char,
        dst_size: *mut i32,
    ) -> MenohErrorCode,
    pub model_get_variable_dims_at: unsafe extern "C" fn(
        model: MenohModelHandle,
        variable_name: *const c_char,
        index: i32,
        dst_size: *mut i32,
    ) -> MenohErrorCode,
    pub model_run: unsafe extern "C" fn(model: MenohModelHandle) -> MenohErrorCode,
}

#[cfg(feature = "link")]
mod linked {
    use super::*;

    #[link(name = "menoh")]
    unsafe extern "C" {
        pub fn menoh_get_last_error_message() -> *const c_char;

        pub fn menoh_make_model_data_from_onnx(
            onnx_filename: *const c_char,
            dst_handle: *mut MenohModelDataHandle,
        ) -> MenohErrorCode;
        pub fn menoh_make_model_data_from_onnx_data_on_memory(
            onnx_data: *const u8,
            size: i32,
            dst_handle: *mut MenohModelDataHandle,
        ) -> MenohErrorCode;
        pub fn menoh_delete_model_data(model_data: MenohModelDataHandle);
        pub fn menoh_model_data_optimize(
            model_data: MenohModelDataHandle,
            variable_profile_table: MenohVariableProfileTableHandle,
        ) -> MenohErrorCode;

        pub fn menoh_make_variable_profile_table_builder(
            dst_handle: *mut MenohVariableProfileTableBuilderHandle,
        ) -> MenohErrorCode;
        pub fn menoh_delete_variable_profile_table_builder(builder: MenohVariableProfileTableBuilderHandle);
        pub fn menoh_variable_profile_table_builder_add_input_profile(
            builder: MenohVariableProfileTableBuilderHandle,
            name: *const c_char,
            dtype: MenohDType,
            dims_size: i32,
            dims: *const i32,
        ) -> MenohErrorCode;
        pub fn menoh_variable_profile_table_builder_add_output_name(
            builder: MenohVariableProfileTableBuilderHandle,
            name: *const c_char,
        ) -> MenohErrorCode;
        pub fn menoh_build_variable_profile_table(
            builder: MenohVariableProfileTableBuilderHandle,
            model_data: MenohModelDataHandle,
            dst_handle: *mut MenohVariableProfileTableHandle,
        ) -> MenohErrorCode;

        pub fn menoh_delete_variable_profile_table(variable_profile_table: MenohVariableProfileTableHandle);
        pub fn menoh_variable_profile_table_get_dtype(
            variable_profile_table: MenohVariableProfileTableHandle,
            variable_name: *const c_char,
            dst_dtype: *mut MenohDType,
        ) -> MenohErrorCode;
        pub fn menoh_variable_profile_table_get_dims_size(
            variable_profile_table: MenohVariableProfileTableHandle,
            variable_name: *const c_char,
            dst_size: *mut i32,
        ) -> MenohErrorCode;
        pub fn menoh_variable_profile_table_get_dims_at(
            variable_profile_table: MenohVariableProfileTableHandle,
            variable_name: *const c_char,
            index: i32,
            dst_size: *mut i32,
        ) -> MenohErrorCode;

        pub fn menoh_make_model_builder(
            variable_profile_table: MenohVariableProfileTableHandle,
            dst_handle: *mut MenohModelBuilderHandle,
        ) -> MenohErrorCode;
        pub fn menoh_delete_model_builder(model_builder: MenohModelBuilderHandle);
        pub fn menoh_model_builder_attach_external_buffer(
            builder: MenohModelBuilderHandle,
            variable_name: *const c_char,
            buffer_handle: *mut c_void,
        ) -> MenohErrorCode;
        pub fn menoh_build_model(
            builder: MenohModelBuilderHandle,
            model_data: MenohModelDataHandle,
            backend_name: *const c_char,
            backend_config: *const c_char,
            dst_model_handle: *mut MenohModelHandle,
        ) -> MenohErrorCode;

        pub fn menoh_delete_model(model: MenohModelHandle);
        pub fn menoh_model_get_variable_buffer_handle(
            model: MenohModelHandle,
            variable_name: *const c_char,
            data_p: *mut *mut c_void,
        ) -> MenohErrorCode;
        pub fn menoh_model_get_variable_dtype(
            model: MenohModelHandle,
            variable_name: *const c_char,
            dst_dtype: *mut MenohDType,
        ) -> MenohErrorCode;
        pub fn menoh_model_get_variable_dims_size(
            model: MenohModelHandle,
            variable_name: *const c_char,
            dst_size: *mut i32,
        ) -> MenohErrorCode;
        pub fn menoh_model_get_variable_dims_at(
            model: MenohModelHandle,
            variable_name: *const c_char,
            index: i32,
            dst_size: *mut i32,
        ) -> MenohErrorCode;
        pub fn menoh_model_run(model: MenohModelHandle) -> MenohErrorCode;
    }
}

/// Function table backed by the linked `libmenoh`.
#[cfg(feature = "link")]
pub static LINKED: MenohApi = MenohApi {
    get_last_error_message: linked::menoh_get_last_error_message,
    make_model_data_from_onnx: linked::menoh_make_model_data_from_onnx,
    make_model_data_from_onnx_data_on_memory: linked::menoh_make_model_data_from_onnx_data_on_memory,
    delete_model_data: linked::menoh_delete_model_data,
    model_data_optimize: linked::menoh_model_data_optimize,
    make_variable_profile_table_builder: linked::menoh_make_variable_profile_table_builder,
    delete_variable_profile_table_builder: linked::menoh_delete_variable_profile_table_builder,
    variable_profile_table_builder_add_input_profile: linked::menoh_variable_profile_table_builder_add_input_profile,
    variable_profile_table_builder_add_output_name: linked::menoh_variable_profile_table_builder_add_output_name,
    build_variable_profile_table: linked::menoh_build_variable_profile_table,
    delete_variable_profile_table: linked::menoh_delete_variable_profile_table,
    variable_profile_table_get_dtype: linked::menoh_variable_profile_table_get_dtype,
    variable_profile_table_get_dims_size: linked::menoh_variable_profile_table_get_dims_size,
    variable_profile_table_get_dims_at: linked::menoh_variable_profile_table_get_dims_at,
    make_model_builder: linked::menoh_make_model_builder,
    delete_model_builder: linked::menoh_delete_model_builder,
    model_builder_attach_external_buffer: linked::menoh_model_builder_attach_external_buffer,
    build_model: linked::menoh_build_model,
    delete_model: linked::menoh_delete_model,
    model_get_variable_buffer_handle: linked::menoh_model_get_variable_buffer_handle,
    model_get_variable_dtype: linked::menoh_model_get_variable_dtype,
    model_get_variable_dims_size: linked::menoh_model_get_variable_dims_size,
    model_get_variable_dims_at: linked::menoh_model_get_variable_dims_at,
    model_run: linked::menoh_model_run,
};
