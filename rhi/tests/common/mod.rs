//! Common utilities for GPU integration tests.
//!
//! Every test creates a [`TestContext`]; when no Vulkan device is available
//! (headless CI) the context is `None` and the test returns early.

use std::sync::Arc;

use redlilium_rhi::{
    Buffer, BufferDescriptor, BufferUsage, CommandBuffer, GraphicsAdapter, GraphicsDevice,
    GraphicsInstance, InstanceDescriptor, MemoryType, QueueType, ValidationMode,
};

/// Test context owning an instance and a device.
pub struct TestContext {
    #[allow(dead_code)]
    pub instance: Arc<GraphicsInstance>,
    #[allow(dead_code)]
    pub adapter: Arc<GraphicsAdapter>,
    pub device: Arc<GraphicsDevice>,
}

impl TestContext {
    /// Create a context on the preferred adapter.
    ///
    /// Returns `None` if no Vulkan loader or device is present.
    pub fn new() -> Option<Self> {
        let _ = env_logger::builder().is_test(true).try_init();

        let validation = if std::env::var_os("REDLILIUM_VALIDATION").is_some() {
            ValidationMode::Enabled
        } else {
            ValidationMode::Disabled
        };
        let descriptor = InstanceDescriptor::new()
            .with_application_name("redlilium-rhi-tests")
            .with_validation(validation);
        let instance = GraphicsInstance::new(descriptor).ok()?;
        let adapter = instance.request_adapter().ok()?;
        let device = adapter
            .create_device(&redlilium_rhi::DeviceDescriptor::new().with_label("test device"))
            .ok()?;
        Some(Self {
            instance,
            adapter,
            device,
        })
    }

    /// Host-visible buffer that copies can write into.
    pub fn create_readback_buffer(&self, size: u64) -> Arc<Buffer> {
        self.device
            .create_buffer(
                &BufferDescriptor::new(size, BufferUsage::empty())
                    .with_label("readback")
                    .with_memory_type(MemoryType::Readback),
            )
            .expect("readback buffer")
    }

    /// Device-local buffer initialized with `data`.
    pub fn create_gpu_buffer(&self, data: &[u8], usage: BufferUsage) -> Arc<Buffer> {
        self.device
            .create_buffer_with_data(
                &BufferDescriptor::new(data.len() as u64, usage).with_label("gpu"),
                data,
            )
            .expect("gpu buffer")
    }

    pub fn begin(&self, queue: QueueType) -> CommandBuffer {
        self.device
            .begin_command_buffer(queue, Some("test"))
            .expect("command buffer")
    }

    /// Submit, commit the frame and wait for the GPU to finish it.
    pub fn submit_and_wait(&self, cmd: CommandBuffer) {
        self.device.submit(cmd).expect("submit");
        self.device.commit_frame().expect("commit frame");
        self.device.wait_idle().expect("wait idle");
    }

    pub fn read_buffer(&self, buffer: &Buffer) -> Vec<u8> {
        let mut out = vec![0u8; buffer.size() as usize];
        buffer.read_data(0, &mut out).expect("mapped readback buffer");
        out
    }
}

/// Bytes `0, 1, 2, ...` wrapping at 256.
pub fn generate_test_pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 256) as u8).collect()
}
