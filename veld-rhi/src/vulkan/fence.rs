//! Timeline-semaphore fence: a monotonically increasing 64-bit counter the
//! queue signals and the CPU blocks on. `completed() <= target()` always.

use std::sync::Arc;

use ash::vk;

use crate::{Fence, Queue, RhiError, RhiResult};

use super::{DeviceShared, VulkanQueue};

pub struct VulkanFence {
    shared: Arc<DeviceShared>,
    semaphore: vk::Semaphore,
    target: u64,
}

impl VulkanFence {
    pub(crate) fn new(shared: Arc<DeviceShared>) -> RhiResult<Self> {
        let mut type_info = vk::SemaphoreTypeCreateInfo::default()
            .semaphore_type(vk::SemaphoreType::TIMELINE)
            .initial_value(0);
        let create_info = vk::SemaphoreCreateInfo::default().push_next(&mut type_info);
        let semaphore = unsafe {
            shared
                .device
                .create_semaphore(&create_info, None)
                .map_err(|e| RhiError::ResourceCreation(format!("fence semaphore: {e:?}")))?
        };
        Ok(Self {
            shared,
            semaphore,
            target: 0,
        })
    }
}

impl Drop for VulkanFence {
    fn drop(&mut self) {
        unsafe {
            self.shared.device.destroy_semaphore(self.semaphore, None);
        }
    }
}

impl std::fmt::Debug for VulkanFence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VulkanFence").field("target", &self.target).finish()
    }
}

impl Fence for VulkanFence {
    fn target(&self) -> u64 {
        self.target
    }

    fn completed(&self) -> RhiResult<u64> {
        unsafe {
            self.shared
                .device
                .get_semaphore_counter_value(self.semaphore)
                .map_err(|e| RhiError::Sync(format!("counter read: {e:?}")))
        }
    }

    fn signal(&mut self, queue: &dyn Queue) -> RhiResult<u64> {
        let queue = queue
            .as_any()
            .downcast_ref::<VulkanQueue>()
            .ok_or_else(|| RhiError::Sync("queue is not a Vulkan queue".into()))?;
        let value = self.target + 1;
        // A command-buffer-less submission: the semaphore reaches `value`
        // once all previously submitted work on the queue has completed.
        let values = [value];
        let mut timeline_info =
            vk::TimelineSemaphoreSubmitInfo::default().signal_semaphore_values(&values);
        let submit_info = vk::SubmitInfo::default()
            .signal_semaphores(std::slice::from_ref(&self.semaphore))
            .push_next(&mut timeline_info);
        unsafe {
            self.shared
                .device
                .queue_submit(queue.raw(), &[submit_info], vk::Fence::null())
                .map_err(|e| RhiError::Sync(format!("fence signal: {e:?}")))?;
        }
        self.target = value;
        Ok(value)
    }

    fn wait_until(&self, value: u64) -> RhiResult<()> {
        if self.completed()? >= value {
            return Ok(());
        }
        let semaphores = [self.semaphore];
        let values = [value];
        let wait_info = vk::SemaphoreWaitInfo::default()
            .semaphores(&semaphores)
            .values(&values);
        unsafe {
            self.shared
                .device
                .wait_semaphores(&wait_info, u64::MAX)
                .map_err(|e| RhiError::Sync(format!("fence wait: {e:?}")))
        }
    }
}
