//! Shared backend session.
//!
//! One `BackendSession` wraps one backend instance. Clones share it, so every
//! node and worker thread built from the same session dispatches onto the same
//! backend, one lease at a time.
//!
//! Prefer [`BackendSession::call`] over holding a lease directly: it turns a
//! panicking backend call into [`BackendError::Launch`] while the lease is
//! still held, so the session stays usable for later invocations.

use crate::backend::{BackendError, BackendResult, ComputeBackend};
use crate::error::{KernelNodeError, Result};
use std::any::Any;
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

struct Shared {
    name: String,
    backend: Mutex<Box<dyn ComputeBackend>>,
    leases: AtomicU64,
}

/// Cloneable handle to a shared compute backend
#[derive(Clone)]
pub struct BackendSession {
    shared: Arc<Shared>,
}

impl BackendSession {
    pub fn new(backend: impl ComputeBackend + 'static) -> Self {
        Self::from_boxed(Box::new(backend))
    }

    pub fn from_boxed(backend: Box<dyn ComputeBackend>) -> Self {
        Self {
            shared: Arc::new(Shared {
                name: backend.name().to_string(),
                backend: Mutex::new(backend),
                leases: AtomicU64::new(0),
            }),
        }
    }

    /// Name of the wrapped backend
    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Number of leases granted so far
    pub fn lease_count(&self) -> u64 {
        self.shared.leases.load(Ordering::Relaxed)
    }

    /// Whether both handles refer to the same backend instance
    pub fn same_session(&self, other: &BackendSession) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }

    /// Take exclusive access to the backend, blocking until it is free.
    ///
    /// A lease poisoned by a panic during a previous dispatch is reported as
    /// an error rather than recovered, since backend state may be torn.
    pub fn lease(&self) -> Result<BackendLease<'_>> {
        let started = Instant::now();
        let guard = self.shared.backend.lock().map_err(|_| {
            KernelNodeError::Session(format!(
                "backend '{}' was poisoned by a panicking dispatch",
                self.shared.name
            ))
        })?;
        self.shared.leases.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(
            backend = %self.shared.name,
            waited_us = started.elapsed().as_micros() as u64,
            "backend lease acquired"
        );
        Ok(BackendLease { guard })
    }

    /// Run `f` under a lease. A panic inside `f` is reported as a launch
    /// failure and does not poison the session.
    pub fn call<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut dyn ComputeBackend) -> BackendResult<T>,
    {
        let mut lease = self.lease()?;
        match panic::catch_unwind(AssertUnwindSafe(|| f(&mut *lease))) {
            Ok(result) => Ok(result?),
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                tracing::error!(backend = %self.shared.name, "backend call panicked: {}", message);
                Err(BackendError::Launch(format!(
                    "backend '{}' panicked: {}",
                    self.shared.name, message
                ))
                .into())
            }
        }
    }
}

/// Text of a panic payload
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

impl fmt::Debug for BackendSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackendSession")
            .field("name", &self.shared.name)
            .field("leases", &self.lease_count())
            .finish()
    }
}

/// Exclusive access to a session's backend; released on drop.
pub struct BackendLease<'a> {
    guard: MutexGuard<'a, Box<dyn ComputeBackend>>,
}

impl Deref for BackendLease<'_> {
    type Target = dyn ComputeBackend;

    fn deref(&self) -> &Self::Target {
        &**self.guard
    }
}

impl DerefMut for BackendLease<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut **self.guard
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::HostBackend;
    use crate::types::{Extents, PixelType};

    #[test]
    fn test_session_name_and_clone() {
        let session = BackendSession::new(HostBackend::new());
        let other = session.clone();
        assert_eq!(session.name(), "host");
        assert!(session.same_session(&other));
        assert!(!session.same_session(&BackendSession::new(HostBackend::new())));
    }

    #[test]
    fn test_lease_counts() {
        let session = BackendSession::new(HostBackend::new());
        {
            let mut lease = session.lease().unwrap();
            let extents = Extents::new(vec![2, 2]).unwrap();
            let buf = lease.create_buffer(&extents, PixelType::Float32).unwrap();
            assert_eq!(buf.len(), 4);
        }
        let _second = session.lease().unwrap();
        assert_eq!(session.lease_count(), 2);
    }

    #[test]
    fn test_leases_serialize_across_threads() {
        let session = BackendSession::new(HostBackend::new());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let session = session.clone();
                std::thread::spawn(move || {
                    let _lease = session.lease().unwrap();
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(session.lease_count(), 4);
    }

    struct Exploding;

    impl ComputeBackend for Exploding {
        fn name(&self) -> &str {
            "exploding"
        }

        fn create_buffer(
            &mut self,
            extents: &Extents,
            pixel_type: PixelType,
        ) -> BackendResult<crate::backend::DeviceBuffer> {
            Ok(crate::backend::DeviceBuffer::zeroed(extents.clone(), pixel_type))
        }

        fn execute(&mut self, launch: &crate::backend::KernelLaunch) -> BackendResult<()> {
            panic!("no device for {}", launch.entry_point);
        }
    }

    #[test]
    fn test_panicking_call_keeps_session_usable() {
        let session = BackendSession::new(Exploding);
        let extents = Extents::new(vec![2]).unwrap();
        let launch = crate::backend::KernelLaunch {
            source: std::sync::Arc::from(""),
            entry_point: "main".to_string(),
            dimensions: extents.clone(),
            global_sizes: extents.clone(),
            arguments: Default::default(),
        };

        let err = session.call(|backend| backend.execute(&launch)).unwrap_err();
        match err {
            KernelNodeError::Backend(BackendError::Launch(msg)) => {
                assert!(msg.contains("no device for main"), "{}", msg)
            }
            other => panic!("unexpected error: {:?}", other),
        }

        let buf = session
            .call(|backend| backend.create_buffer(&extents, PixelType::Float32))
            .unwrap();
        assert_eq!(buf.len(), 2);
        assert!(session.lease().is_ok());
    }
}
