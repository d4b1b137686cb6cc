//! Vulkan backend for the veld RHI.
//! Implements Device, Queue, Fence, Surface, DepthTarget, TargetViews and
//! CommandList on top of `ash`. The device requires Vulkan 1.2 with timeline
//! semaphores (the fence protocol) and a queue family that supports both
//! graphics and presentation to the supplied window.

mod command;
mod depth;
mod fence;
mod surface;
mod views;

use std::ffi::{CStr, CString};
use std::sync::Arc;

use ash::vk;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle, RawDisplayHandle, RawWindowHandle};

use crate::{
    CommandList, DepthFormat, DepthTarget, Device, Fence, Queue, ResourceState, RhiError,
    RhiResult, Surface, SurfaceDescriptor, SurfaceFormat, TargetViews,
};

pub use command::{VulkanCommandList, VulkanQueue};
pub use depth::VulkanDepthTarget;
pub use fence::VulkanFence;
pub use surface::VulkanSurface;
pub use views::VulkanTargetViews;

const VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";

/// Everything sub-resources need to talk to the driver. Held behind an `Arc`
/// by every resource so the device and instance are destroyed only after the
/// last resource is gone, giving reverse-of-creation teardown structurally.
pub(crate) struct DeviceShared {
    _entry: ash::Entry,
    pub(crate) instance: ash::Instance,
    pub(crate) physical_device: vk::PhysicalDevice,
    pub(crate) device: ash::Device,
    pub(crate) queue_family_index: u32,
    pub(crate) queue: vk::Queue,
    pub(crate) surface: vk::SurfaceKHR,
    pub(crate) surface_loader: ash::khr::surface::Instance,
    pub(crate) swapchain_loader: ash::khr::swapchain::Device,
}

impl Drop for DeviceShared {
    fn drop(&mut self) {
        unsafe {
            self.surface_loader.destroy_surface(self.surface, None);
            self.device.destroy_device(None);
            self.instance.destroy_instance(None);
        }
    }
}

pub struct VulkanDevice {
    shared: Arc<DeviceShared>,
}

impl std::fmt::Debug for VulkanDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VulkanDevice").finish_non_exhaustive()
    }
}

fn validation_requested() -> bool {
    if cfg!(feature = "validation") {
        return true;
    }
    std::env::var("VELD_VALIDATION").map(|v| v == "1").unwrap_or(false)
}

impl VulkanDevice {
    /// Create the device against the given window. Selects the first adapter
    /// meeting the minimum capability level (Vulkan 1.2, timeline semaphores,
    /// a graphics queue family that can present to the window's surface);
    /// fails with `DeviceCreation` if none does. No fallback, no retries.
    pub fn new(window: &(impl HasWindowHandle + HasDisplayHandle)) -> RhiResult<Self> {
        let raw_window = window
            .window_handle()
            .map_err(|e| RhiError::DeviceCreation(format!("window handle: {e}")))?
            .as_raw();
        let raw_display = window
            .display_handle()
            .map_err(|e| RhiError::DeviceCreation(format!("display handle: {e}")))?
            .as_raw();

        let entry = unsafe {
            ash::Entry::load().map_err(|e| RhiError::DeviceCreation(e.to_string()))?
        };

        let app_name = CString::new("veld").map_err(|e| RhiError::DeviceCreation(e.to_string()))?;
        let app_info = vk::ApplicationInfo::default()
            .api_version(vk::API_VERSION_1_2)
            .application_name(&app_name)
            .engine_name(&app_name);

        let platform_surface_ext = platform_surface_extension(&raw_display)?;
        let ext_names = [ash::khr::surface::NAME.as_ptr(), platform_surface_ext.as_ptr()];

        let mut layer_names: Vec<*const std::ffi::c_char> = Vec::new();
        if validation_requested() {
            let available = unsafe {
                entry
                    .enumerate_instance_layer_properties()
                    .map_err(|e| RhiError::DeviceCreation(e.to_string()))?
            };
            let found = available.iter().any(|p| {
                p.layer_name_as_c_str().is_ok_and(|n| n == VALIDATION_LAYER)
            });
            if found {
                log::info!("enabling {:?}", VALIDATION_LAYER);
                layer_names.push(VALIDATION_LAYER.as_ptr());
            } else {
                log::warn!("validation requested but {:?} is not installed", VALIDATION_LAYER);
            }
        }

        let instance_create_info = vk::InstanceCreateInfo::default()
            .application_info(&app_info)
            .enabled_extension_names(&ext_names)
            .enabled_layer_names(&layer_names);
        let instance = unsafe {
            entry
                .create_instance(&instance_create_info, None)
                .map_err(|e| RhiError::DeviceCreation(e.to_string()))?
        };

        let surface_loader = ash::khr::surface::Instance::new(&entry, &instance);
        let surface = create_platform_surface(&entry, &instance, &raw_window, &raw_display)?;

        let (physical_device, queue_family_index) =
            select_adapter(&instance, &surface_loader, surface)?;

        let queue_priorities = [1.0f32];
        let queue_create_info = vk::DeviceQueueCreateInfo::default()
            .queue_family_index(queue_family_index)
            .queue_priorities(&queue_priorities);
        let swapchain_ext = ash::khr::swapchain::NAME.as_ptr();
        let mut vk12_features =
            vk::PhysicalDeviceVulkan12Features::default().timeline_semaphore(true);
        let device_create_info = vk::DeviceCreateInfo::default()
            .queue_create_infos(std::slice::from_ref(&queue_create_info))
            .enabled_extension_names(std::slice::from_ref(&swapchain_ext))
            .push_next(&mut vk12_features);
        let device = unsafe {
            instance
                .create_device(physical_device, &device_create_info, None)
                .map_err(|e| RhiError::DeviceCreation(e.to_string()))?
        };
        let queue = unsafe { device.get_device_queue(queue_family_index, 0) };
        let swapchain_loader = ash::khr::swapchain::Device::new(&instance, &device);

        log::info!(
            "created Vulkan device (queue family {queue_family_index})"
        );
        Ok(Self {
            shared: Arc::new(DeviceShared {
                _entry: entry,
                instance,
                physical_device,
                device,
                queue_family_index,
                queue,
                surface,
                surface_loader,
                swapchain_loader,
            }),
        })
    }
}

fn platform_surface_extension(display: &RawDisplayHandle) -> RhiResult<&'static CStr> {
    match display {
        RawDisplayHandle::Windows(_) => Ok(ash::khr::win32_surface::NAME),
        RawDisplayHandle::Xlib(_) => Ok(ash::khr::xlib_surface::NAME),
        RawDisplayHandle::Wayland(_) => Ok(ash::khr::wayland_surface::NAME),
        other => Err(RhiError::DeviceCreation(format!(
            "unsupported display system: {other:?}"
        ))),
    }
}

fn create_platform_surface(
    entry: &ash::Entry,
    instance: &ash::Instance,
    window: &RawWindowHandle,
    display: &RawDisplayHandle,
) -> RhiResult<vk::SurfaceKHR> {
    let err = |e: vk::Result| RhiError::DeviceCreation(format!("surface creation: {e:?}"));
    match (window, display) {
        (RawWindowHandle::Win32(w), RawDisplayHandle::Windows(_)) => {
            let create_info = vk::Win32SurfaceCreateInfoKHR::default()
                .hinstance(w.hinstance.map(|h| h.get()).unwrap_or(0))
                .hwnd(w.hwnd.get());
            let loader = ash::khr::win32_surface::Instance::new(entry, instance);
            unsafe { loader.create_win32_surface(&create_info, None).map_err(err) }
        }
        (RawWindowHandle::Xlib(w), RawDisplayHandle::Xlib(d)) => {
            let dpy = d
                .display
                .ok_or_else(|| RhiError::DeviceCreation("Xlib display is null".into()))?;
            let create_info = vk::XlibSurfaceCreateInfoKHR::default()
                .dpy(dpy.as_ptr().cast())
                .window(w.window);
            let loader = ash::khr::xlib_surface::Instance::new(entry, instance);
            unsafe { loader.create_xlib_surface(&create_info, None).map_err(err) }
        }
        (RawWindowHandle::Wayland(w), RawDisplayHandle::Wayland(d)) => {
            let create_info = vk::WaylandSurfaceCreateInfoKHR::default()
                .display(d.display.as_ptr())
                .surface(w.surface.as_ptr());
            let loader = ash::khr::wayland_surface::Instance::new(entry, instance);
            unsafe { loader.create_wayland_surface(&create_info, None).map_err(err) }
        }
        (w, d) => Err(RhiError::DeviceCreation(format!(
            "mismatched window/display handles: {w:?} / {d:?}"
        ))),
    }
}

/// First physical device at the minimum capability level, together with a
/// queue family supporting both graphics and present.
fn select_adapter(
    instance: &ash::Instance,
    surface_loader: &ash::khr::surface::Instance,
    surface: vk::SurfaceKHR,
) -> RhiResult<(vk::PhysicalDevice, u32)> {
    let physical_devices = unsafe {
        instance
            .enumerate_physical_devices()
            .map_err(|e| RhiError::DeviceCreation(e.to_string()))?
    };
    for physical_device in physical_devices {
        let properties = unsafe { instance.get_physical_device_properties(physical_device) };
        if properties.api_version < vk::API_VERSION_1_2 {
            continue;
        }
        let mut vk12_features = vk::PhysicalDeviceVulkan12Features::default();
        let mut features2 = vk::PhysicalDeviceFeatures2::default().push_next(&mut vk12_features);
        unsafe { instance.get_physical_device_features2(physical_device, &mut features2) };
        if vk12_features.timeline_semaphore != vk::TRUE {
            continue;
        }
        let queue_families =
            unsafe { instance.get_physical_device_queue_family_properties(physical_device) };
        let family = queue_families.iter().enumerate().find(|(i, f)| {
            let graphics = f.queue_flags.contains(vk::QueueFlags::GRAPHICS);
            let present = unsafe {
                surface_loader
                    .get_physical_device_surface_support(physical_device, *i as u32, surface)
                    .unwrap_or(false)
            };
            graphics && present
        });
        if let Some((index, _)) = family {
            return Ok((physical_device, index as u32));
        }
    }
    Err(RhiError::DeviceCreation(
        "no adapter with Vulkan 1.2, timeline semaphores and a graphics+present queue".into(),
    ))
}

pub(crate) fn find_memory_type(
    instance: &ash::Instance,
    physical_device: vk::PhysicalDevice,
    type_bits: u32,
    required: vk::MemoryPropertyFlags,
) -> Option<u32> {
    let props = unsafe { instance.get_physical_device_memory_properties(physical_device) };
    (0..props.memory_type_count).find(|i| {
        (type_bits & (1 << i)) != 0
            && props.memory_types[*i as usize].property_flags.contains(required)
    })
}

pub(crate) fn surface_format_to_vk(format: SurfaceFormat) -> vk::Format {
    match format {
        SurfaceFormat::Rgba8Unorm => vk::Format::R8G8B8A8_UNORM,
        SurfaceFormat::Bgra8Unorm => vk::Format::B8G8R8A8_UNORM,
    }
}

pub(crate) fn vk_to_surface_format(format: vk::Format) -> SurfaceFormat {
    match format {
        vk::Format::B8G8R8A8_UNORM => SurfaceFormat::Bgra8Unorm,
        _ => SurfaceFormat::Rgba8Unorm,
    }
}

pub(crate) fn depth_format_to_vk(format: DepthFormat) -> vk::Format {
    match format {
        DepthFormat::D24UnormS8 => vk::Format::D24_UNORM_S8_UINT,
        DepthFormat::D32FloatS8 => vk::Format::D32_SFLOAT_S8_UINT,
    }
}

/// Image layout declared by a resource state. `Common` is the freshly
/// created, never-used layout.
pub(crate) fn state_layout(state: ResourceState) -> vk::ImageLayout {
    match state {
        ResourceState::Common => vk::ImageLayout::UNDEFINED,
        ResourceState::Present => vk::ImageLayout::PRESENT_SRC_KHR,
        ResourceState::RenderTarget => vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        ResourceState::DepthWrite => vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
    }
}

/// Access mask and pipeline stage that a state's use runs at, for barrier
/// src/dst scopes.
pub(crate) fn state_sync_scope(
    state: ResourceState,
) -> (vk::AccessFlags, vk::PipelineStageFlags) {
    match state {
        ResourceState::Common => (vk::AccessFlags::empty(), vk::PipelineStageFlags::TOP_OF_PIPE),
        ResourceState::Present => (
            vk::AccessFlags::empty(),
            vk::PipelineStageFlags::BOTTOM_OF_PIPE,
        ),
        ResourceState::RenderTarget => (
            vk::AccessFlags::COLOR_ATTACHMENT_READ | vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
            vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
        ),
        ResourceState::DepthWrite => (
            vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_READ
                | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
            vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS
                | vk::PipelineStageFlags::LATE_FRAGMENT_TESTS,
        ),
    }
}

impl Device for VulkanDevice {
    fn queue(&self) -> RhiResult<Box<dyn Queue>> {
        Ok(Box::new(VulkanQueue::new(Arc::clone(&self.shared))))
    }

    fn create_fence(&self) -> RhiResult<Box<dyn Fence>> {
        Ok(Box::new(VulkanFence::new(Arc::clone(&self.shared))?))
    }

    fn create_command_list(&self) -> RhiResult<Box<dyn CommandList>> {
        Ok(Box::new(VulkanCommandList::new(Arc::clone(&self.shared))?))
    }

    fn create_surface(&self, desc: &SurfaceDescriptor) -> RhiResult<Box<dyn Surface>> {
        Ok(Box::new(VulkanSurface::new(Arc::clone(&self.shared), desc)?))
    }

    fn create_depth_target(
        &self,
        width: u32,
        height: u32,
        format: DepthFormat,
    ) -> RhiResult<Box<dyn DepthTarget>> {
        Ok(Box::new(VulkanDepthTarget::new(
            Arc::clone(&self.shared),
            width,
            height,
            format,
        )?))
    }

    fn create_target_views(
        &self,
        surface: &dyn Surface,
        depth: &dyn DepthTarget,
    ) -> RhiResult<Box<dyn TargetViews>> {
        let surface = surface
            .as_any()
            .downcast_ref::<VulkanSurface>()
            .ok_or_else(|| RhiError::ResourceCreation("surface is not a Vulkan surface".into()))?;
        let depth = depth
            .as_any()
            .downcast_ref::<VulkanDepthTarget>()
            .ok_or_else(|| RhiError::ResourceCreation("depth target is not Vulkan".into()))?;
        Ok(Box::new(VulkanTargetViews::new(
            Arc::clone(&self.shared),
            surface,
            depth,
        )?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn supported_surface_formats_round_trip() {
        for format in [SurfaceFormat::Rgba8Unorm, SurfaceFormat::Bgra8Unorm] {
            assert_eq!(vk_to_surface_format(surface_format_to_vk(format)), format);
        }
    }

    #[test]
    fn unrepresentable_driver_formats_collapse_to_the_default() {
        // The public enum cannot represent e.g. sRGB swapchain formats, so
        // anything format-exact must read the raw format off the surface
        // rather than reconstruct it from the enum.
        assert_eq!(
            vk_to_surface_format(vk::Format::B8G8R8A8_SRGB),
            SurfaceFormat::Rgba8Unorm
        );
    }
}
