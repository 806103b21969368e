//! Mock construction helpers

use kernel_node_rs::backend::{
    BackendResult, BackendSession, ComputeBackend, DeviceBuffer, KernelLaunch,
};
use kernel_node_rs::types::{Extents, PixelType};
use mockall::mock;

/// The launch step of a backend, split out so tests can set expectations on it
pub trait KernelRunner: Send {
    fn run(&self, launch: &KernelLaunch) -> BackendResult<()>;
}

mock! {
    pub Runner {}

    impl KernelRunner for Runner {
        fn run(&self, launch: &KernelLaunch) -> BackendResult<()>;
    }
}

/// Backend that allocates host buffers and hands launches to a mocked runner
pub struct MockedBackend {
    runner: MockRunner,
}

impl MockedBackend {
    pub fn new(runner: MockRunner) -> Self {
        Self { runner }
    }
}

impl ComputeBackend for MockedBackend {
    fn name(&self) -> &str {
        "mock"
    }

    fn create_buffer(
        &mut self,
        extents: &Extents,
        pixel_type: PixelType,
    ) -> BackendResult<DeviceBuffer> {
        Ok(DeviceBuffer::zeroed(extents.clone(), pixel_type))
    }

    fn execute(&mut self, launch: &KernelLaunch) -> BackendResult<()> {
        self.runner.run(launch)
    }
}

/// Session over a [`MockedBackend`]
pub fn mock_session(runner: MockRunner) -> BackendSession {
    BackendSession::new(MockedBackend::new(runner))
}
