//! Memory the engine can read and write.
//!
//! Menoh keeps raw pointers into attached buffers for the lifetime of a
//! model, so every pointer handed to it must stay valid until the last
//! owner record ([`ForeignBuffer`]) referencing the memory is dropped.
//!
//! Two kinds of memory cross the boundary:
//!
//! - [`DirectBuffer`]: a caller-owned, pinned region. It is attached
//!   without copying, and the engine reads and writes it in place.
//! - Copies: any other source (`&[u8]`, `&[f32]`) is copied into a freshly
//!   allocated native region owned by the resulting [`ForeignBuffer`].
//!
//! All copies use the platform's native byte order.
//!
//! Every region carries a reader/writer lock. Reads and writes made by this
//! crate take it, and [`Model::run`](crate::Model::run) holds it for writing
//! on every attached region, so a [`DirectBuffer`] shared with a running
//! model is never read while the engine writes into it.

use std::alloc::{self, Layout};
use std::fmt;
use std::ptr::{self, NonNull};
use std::sync::Arc;

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::error::MenohError;

const ALIGN: usize = 64;

// ---------------------------------------------------------------------------
// NativeMemory
// ---------------------------------------------------------------------------

/// A zero-initialized, 64-byte aligned heap region with a stable address.
pub(crate) struct NativeMemory {
    ptr: NonNull<u8>,
    len: usize,
    access: RwLock<()>,
}

// Access goes through raw copies made under `access`.
unsafe impl Send for NativeMemory {}
unsafe impl Sync for NativeMemory {}

impl NativeMemory {
    pub(crate) fn zeroed(len: usize) -> Result<Self, MenohError> {
        if len == 0 {
            return Ok(Self {
                ptr: NonNull::dangling(),
                len: 0,
                access: RwLock::new(()),
            });
        }
        let layout = Self::layout(len)?;
        let ptr = unsafe { alloc::alloc_zeroed(layout) };
        let ptr = NonNull::new(ptr).ok_or(MenohError::OutOfMemory(len))?;
        Ok(Self {
            ptr,
            len,
            access: RwLock::new(()),
        })
    }

    pub(crate) fn copy_of(data: &[u8]) -> Result<Self, MenohError> {
        let mem = Self::zeroed(data.len())?;
        unsafe { ptr::copy_nonoverlapping(data.as_ptr(), mem.as_ptr(), data.len()) };
        Ok(mem)
    }

    fn layout(len: usize) -> Result<Layout, MenohError> {
        Layout::from_size_align(len, ALIGN).map_err(|e| MenohError::InvalidArgument(e.to_string()))
    }

    pub(crate) fn as_ptr(&self) -> *mut u8 {
        self.ptr.as_ptr()
    }

    pub(crate) fn len(&self) -> usize {
        self.len
    }

    pub(crate) fn read(&self) -> RwLockReadGuard<'_, ()> {
        self.access.read()
    }

    pub(crate) fn write(&self) -> RwLockWriteGuard<'_, ()> {
        self.access.write()
    }
}

impl Drop for NativeMemory {
    fn drop(&mut self) {
        if self.len > 0 {
            if let Ok(layout) = Self::layout(self.len) {
                unsafe { alloc::dealloc(self.ptr.as_ptr(), layout) };
            }
        }
    }
}

// ---------------------------------------------------------------------------
// DirectBuffer
// ---------------------------------------------------------------------------

/// A pinned byte region the engine can use in place.
///
/// Like a NIO direct buffer, it has a `position` and a `limit`; the
/// readable region is `position..limit`. Clones share memory and carry
/// their own cursors. Values are read and written in native byte order.
///
/// The memory is shared with every model it is attached to, which writes
/// outputs into it during `run`. Each read or write here is atomic with
/// respect to other clones and to a running model.
#[derive(Clone)]
pub struct DirectBuffer {
    memory: Arc<NativeMemory>,
    position: usize,
    limit: usize,
}

impl DirectBuffer {
    /// Allocates a zeroed buffer. `position` is 0 and `limit` is `capacity`.
    pub fn allocate(capacity: usize) -> Result<Self, MenohError> {
        Ok(Self {
            memory: Arc::new(NativeMemory::zeroed(capacity)?),
            position: 0,
            limit: capacity,
        })
    }

    /// Allocates a buffer holding a copy of `data`.
    pub fn from_bytes(data: &[u8]) -> Result<Self, MenohError> {
        Ok(Self {
            memory: Arc::new(NativeMemory::copy_of(data)?),
            position: 0,
            limit: data.len(),
        })
    }

    /// Allocates a buffer holding `values` in native byte order.
    pub fn from_f32(values: &[f32]) -> Result<Self, MenohError> {
        Self::from_bytes(&f32_to_ne_bytes(values))
    }

    pub fn capacity(&self) -> usize {
        self.memory.len()
    }

    pub fn position(&self) -> usize {
        self.position
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Number of bytes between `position` and `limit`.
    pub fn remaining(&self) -> usize {
        self.limit - self.position
    }

    pub fn set_position(&mut self, position: usize) -> Result<&mut Self, MenohError> {
        if position > self.limit {
            return Err(MenohError::InvalidArgument(format!(
                "position {position} exceeds limit {}",
                self.limit
            )));
        }
        self.position = position;
        Ok(self)
    }

    pub fn set_limit(&mut self, limit: usize) -> Result<&mut Self, MenohError> {
        if limit > self.capacity() {
            return Err(MenohError::InvalidArgument(format!(
                "limit {limit} exceeds capacity {}",
                self.capacity()
            )));
        }
        self.limit = limit;
        self.position = self.position.min(limit);
        Ok(self)
    }

    /// Resets `position` to 0.
    pub fn rewind(&mut self) -> &mut Self {
        self.position = 0;
        self
    }

    /// Copies the readable region.
    pub fn to_vec(&self) -> Vec<u8> {
        let mut out = vec![0u8; self.remaining()];
        let _guard = self.memory.read();
        unsafe { ptr::copy_nonoverlapping(self.remaining_ptr(), out.as_mut_ptr(), out.len()) };
        out
    }

    /// Copies the readable region as native-order f32 values.
    pub fn to_f32_vec(&self) -> Vec<f32> {
        f32_from_ne_bytes(&self.to_vec())
    }

    /// Writes `data` at `offset` bytes past `position`. Cursors are unchanged.
    pub fn write_bytes(&mut self, offset: usize, data: &[u8]) -> Result<(), MenohError> {
        if offset.checked_add(data.len()).is_none_or(|end| end > self.remaining()) {
            return Err(MenohError::InvalidArgument(format!(
                "write of {} bytes at {offset} exceeds remaining {}",
                data.len(),
                self.remaining()
            )));
        }
        let _guard = self.memory.write();
        unsafe { ptr::copy_nonoverlapping(data.as_ptr(), self.remaining_ptr().add(offset), data.len()) };
        Ok(())
    }

    /// Writes `values` in native byte order at `offset` bytes past `position`.
    pub fn write_f32(&mut self, offset: usize, values: &[f32]) -> Result<(), MenohError> {
        self.write_bytes(offset, &f32_to_ne_bytes(values))
    }

    pub(crate) fn remaining_ptr(&self) -> *mut u8 {
        unsafe { self.memory.as_ptr().add(self.position) }
    }
}

impl fmt::Debug for DirectBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DirectBuffer")
            .field("capacity", &self.capacity())
            .field("position", &self.position)
            .field("limit", &self.limit)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// ForeignBuffer
// ---------------------------------------------------------------------------

/// Who owns the memory behind a [`ForeignBuffer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provenance {
    /// Caller memory used in place. Never freed by this crate.
    CallerOwnedZeroCopy,
    /// A copy allocated by this crate, freed with its last owner record.
    EngineOwnedCopy,
}

/// Input accepted by the bridge.
#[derive(Debug, Clone, Copy)]
pub enum BufferSource<'a> {
    Direct(&'a DirectBuffer),
    Bytes(&'a [u8]),
    Floats(&'a [f32]),
}

impl<'a> From<&'a DirectBuffer> for BufferSource<'a> {
    fn from(b: &'a DirectBuffer) -> Self {
        BufferSource::Direct(b)
    }
}

impl<'a> From<&'a [u8]> for BufferSource<'a> {
    fn from(b: &'a [u8]) -> Self {
        BufferSource::Bytes(b)
    }
}

impl<'a> From<&'a Vec<u8>> for BufferSource<'a> {
    fn from(b: &'a Vec<u8>) -> Self {
        BufferSource::Bytes(b)
    }
}

impl<'a, const N: usize> From<&'a [u8; N]> for BufferSource<'a> {
    fn from(b: &'a [u8; N]) -> Self {
        BufferSource::Bytes(b)
    }
}

impl<'a> From<&'a [f32]> for BufferSource<'a> {
    fn from(v: &'a [f32]) -> Self {
        BufferSource::Floats(v)
    }
}

impl<'a> From<&'a Vec<f32>> for BufferSource<'a> {
    fn from(v: &'a Vec<f32>) -> Self {
        BufferSource::Floats(v)
    }
}

impl<'a, const N: usize> From<&'a [f32; N]> for BufferSource<'a> {
    fn from(v: &'a [f32; N]) -> Self {
        BufferSource::Floats(v)
    }
}

impl BufferSource<'_> {
    fn byte_len(&self) -> usize {
        match self {
            BufferSource::Direct(b) => b.remaining(),
            BufferSource::Bytes(b) => b.len(),
            BufferSource::Floats(v) => v.len() * size_of::<f32>(),
        }
    }

    fn to_ne_bytes(&self) -> Vec<u8> {
        match self {
            BufferSource::Direct(b) => b.to_vec(),
            BufferSource::Bytes(b) => b.to_vec(),
            BufferSource::Floats(v) => f32_to_ne_bytes(v),
        }
    }
}

/// A pointer/length pair handed to the engine, plus the owner record that
/// keeps the memory behind it alive.
///
/// Clones share the same memory. Copy-in memory is freed when the last
/// clone is dropped.
#[derive(Clone)]
pub struct ForeignBuffer {
    ptr: *mut u8,
    len: usize,
    provenance: Provenance,
    memory: Arc<NativeMemory>,
}

// The pointer targets `memory`, which is Send + Sync.
unsafe impl Send for ForeignBuffer {}
unsafe impl Sync for ForeignBuffer {}

impl ForeignBuffer {
    pub fn provenance(&self) -> Provenance {
        self.provenance
    }

    /// Length in bytes.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Copies the bytes out.
    pub fn to_vec(&self) -> Vec<u8> {
        let mut out = vec![0u8; self.len];
        let _guard = self.memory.read();
        unsafe { ptr::copy_nonoverlapping(self.ptr, out.as_mut_ptr(), self.len) };
        out
    }

    pub(crate) fn as_ptr(&self) -> *mut u8 {
        self.ptr
    }

    /// The region behind the pointer, for locking around engine access.
    pub(crate) fn memory(&self) -> &Arc<NativeMemory> {
        &self.memory
    }

    fn copied(bytes: &[u8]) -> Result<Self, MenohError> {
        let memory = Arc::new(NativeMemory::copy_of(bytes)?);
        Ok(Self {
            ptr: memory.as_ptr(),
            len: memory.len(),
            provenance: Provenance::EngineOwnedCopy,
            memory,
        })
    }
}

impl fmt::Debug for ForeignBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ForeignBuffer")
            .field("len", &self.len)
            .field("provenance", &self.provenance)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Bridge
// ---------------------------------------------------------------------------

/// Makes `source` reachable by the engine.
///
/// A [`DirectBuffer`] is used in place: the pointer starts at its
/// `position` and spans `remaining()` bytes, and its cursors are left
/// untouched. Any other source is copied, unless `must_be_zero_copy` is
/// set, in which case it fails with [`MenohError::NotDirect`].
pub fn bridge<'a>(source: impl Into<BufferSource<'a>>, must_be_zero_copy: bool) -> Result<ForeignBuffer, MenohError> {
    let source = source.into();
    if source.byte_len() == 0 {
        return Err(MenohError::EmptyBuffer);
    }
    match source {
        BufferSource::Direct(b) => Ok(ForeignBuffer {
            ptr: b.remaining_ptr(),
            len: b.remaining(),
            provenance: Provenance::CallerOwnedZeroCopy,
            memory: Arc::clone(&b.memory),
        }),
        _ if must_be_zero_copy => Err(MenohError::NotDirect),
        other => ForeignBuffer::copied(&other.to_ne_bytes()),
    }
}

/// Copies `source` into new native memory, even if it is a [`DirectBuffer`].
pub fn copy_in<'a>(source: impl Into<BufferSource<'a>>) -> Result<ForeignBuffer, MenohError> {
    let source = source.into();
    if source.byte_len() == 0 {
        return Err(MenohError::EmptyBuffer);
    }
    ForeignBuffer::copied(&source.to_ne_bytes())
}

/// Copies `values[offset..offset + length]` into new native memory.
pub fn copy_in_range(values: &[f32], offset: usize, length: usize) -> Result<ForeignBuffer, MenohError> {
    if values.is_empty() {
        return Err(MenohError::EmptyBuffer);
    }
    copy_in(checked_range(values, offset, length)?)
}

/// Returns `data[offset..offset + length]` or an argument error.
pub(crate) fn checked_range<T>(data: &[T], offset: usize, length: usize) -> Result<&[T], MenohError> {
    offset
        .checked_add(length)
        .filter(|&end| end <= data.len())
        .map(|end| &data[offset..end])
        .ok_or_else(|| {
            MenohError::InvalidArgument(format!(
                "range {offset}..+{length} is out of bounds for length {}",
                data.len()
            ))
        })
}

pub(crate) fn f32_to_ne_bytes(values: &[f32]) -> Vec<u8> {
    values.iter().flat_map(|v| v.to_ne_bytes()).collect()
}

pub(crate) fn f32_from_ne_bytes(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(size_of::<f32>())
        .map(|c| f32::from_ne_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}
