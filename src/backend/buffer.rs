//! Device buffer handles.
//!
//! A [`DeviceBuffer`] is a cheap, cloneable handle onto backend-owned storage.
//! Clones share the same storage. [`DeviceBuffer::read_only`] hands out a view
//! that refuses writes, which is how borrowed input buffers are passed to
//! kernels without letting them mutate upstream data.

use crate::backend::BackendError;
use crate::types::{Extents, PixelType};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

static NEXT_BUFFER_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of a buffer's storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferId(pub u64);

impl BufferId {
    fn next() -> Self {
        BufferId(NEXT_BUFFER_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for BufferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

struct Storage {
    extents: Extents,
    pixel_type: PixelType,
    data: RwLock<Vec<f32>>,
}

/// Handle onto a buffer living in a compute backend.
#[derive(Clone)]
pub struct DeviceBuffer {
    id: BufferId,
    storage: Arc<Storage>,
    writable: bool,
}

impl DeviceBuffer {
    /// Allocate a zero-filled buffer.
    pub fn zeroed(extents: Extents, pixel_type: PixelType) -> Self {
        let len = extents.element_count();
        Self::with_storage(extents, pixel_type, vec![0.0; len])
    }

    /// Allocate a zero-filled buffer, reporting allocation failure instead of aborting.
    pub fn try_zeroed(extents: Extents, pixel_type: PixelType) -> Result<Self, BackendError> {
        let len = extents.element_count();
        let mut data = Vec::new();
        data.try_reserve_exact(len).map_err(|e| {
            BackendError::Allocation(format!("{} buffer of {}: {}", pixel_type, extents, e))
        })?;
        data.resize(len, 0.0);
        Ok(Self::with_storage(extents, pixel_type, data))
    }

    /// Wrap host data. Values are coerced to `pixel_type`.
    pub fn from_data(
        extents: Extents,
        pixel_type: PixelType,
        data: Vec<f32>,
    ) -> Result<Self, BackendError> {
        if data.len() != extents.element_count() {
            return Err(BackendError::Allocation(format!(
                "{} values supplied for a {} buffer ({} elements)",
                data.len(),
                extents,
                extents.element_count()
            )));
        }
        let data = data
            .into_iter()
            .map(|v| pixel_type.coerce(v as f64))
            .collect();
        Ok(Self::with_storage(extents, pixel_type, data))
    }

    fn with_storage(extents: Extents, pixel_type: PixelType, data: Vec<f32>) -> Self {
        Self {
            id: BufferId::next(),
            storage: Arc::new(Storage {
                extents,
                pixel_type,
                data: RwLock::new(data),
            }),
            writable: true,
        }
    }

    pub fn id(&self) -> BufferId {
        self.id
    }

    pub fn extents(&self) -> &Extents {
        &self.storage.extents
    }

    pub fn pixel_type(&self) -> PixelType {
        self.storage.pixel_type
    }

    /// Number of elements
    pub fn len(&self) -> usize {
        self.storage.extents.element_count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether writes through this handle are permitted
    pub fn is_writable(&self) -> bool {
        self.writable
    }

    /// A handle onto the same storage that rejects writes
    pub fn read_only(&self) -> Self {
        Self {
            id: self.id,
            storage: Arc::clone(&self.storage),
            writable: false,
        }
    }

    /// Whether both handles refer to the same storage
    pub fn shares_storage(&self, other: &DeviceBuffer) -> bool {
        Arc::ptr_eq(&self.storage, &other.storage)
    }

    fn read_guard(&self) -> RwLockReadGuard<'_, Vec<f32>> {
        // A panicking kernel thread cannot leave the Vec itself inconsistent.
        self.storage
            .data
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write_guard(&self) -> RwLockWriteGuard<'_, Vec<f32>> {
        self.storage
            .data
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Copy the contents out to host memory
    pub fn to_vec(&self) -> Vec<f32> {
        self.read_guard().clone()
    }

    /// Read one element; `None` when out of bounds
    pub fn get(&self, x: usize, y: usize, z: usize) -> Option<f32> {
        let index = self.storage.extents.linear_index(x, y, z)?;
        self.read_guard().get(index).copied()
    }

    /// Write one element, coercing to the pixel type.
    pub fn set(&self, x: usize, y: usize, z: usize, value: f64) -> Result<(), BackendError> {
        if !self.writable {
            return Err(BackendError::ReadOnlyBuffer(self.id));
        }
        let index = self
            .storage
            .extents
            .linear_index(x, y, z)
            .ok_or_else(|| {
                BackendError::Launch(format!(
                    "write to ({}, {}, {}) is outside buffer {} of size {}",
                    x, y, z, self.id, self.storage.extents
                ))
            })?;
        let coerced = self.storage.pixel_type.coerce(value);
        match self.write_guard().get_mut(index) {
            Some(slot) => {
                *slot = coerced;
                Ok(())
            }
            None => Err(BackendError::Launch(format!(
                "buffer {} holds fewer elements than its size {}",
                self.id, self.storage.extents
            ))),
        }
    }

    /// Overwrite the whole buffer from host memory.
    pub fn upload(&self, data: &[f32]) -> Result<(), BackendError> {
        if !self.writable {
            return Err(BackendError::ReadOnlyBuffer(self.id));
        }
        if data.len() != self.len() {
            return Err(BackendError::InvalidArgument(format!(
                "upload of {} values into buffer {} with {} elements",
                data.len(),
                self.id,
                self.len()
            )));
        }
        let pixel_type = self.storage.pixel_type;
        let mut guard = self.write_guard();
        for (dst, &src) in guard.iter_mut().zip(data) {
            *dst = pixel_type.coerce(src as f64);
        }
        Ok(())
    }
}

impl fmt::Debug for DeviceBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceBuffer")
            .field("id", &self.id)
            .field("extents", &self.storage.extents)
            .field("pixel_type", &self.storage.pixel_type)
            .field("writable", &self.writable)
            .finish()
    }
}
