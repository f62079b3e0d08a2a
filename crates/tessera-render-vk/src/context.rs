// SPDX-License-Identifier: CEPL-1.0
//! Device Context: instance, surface, GPU selection, logical device and the
//! graphics/present queues. Built once, torn down last.

use crate::error::EngineError;
use anyhow::{Context, Result};
use ash::ext::debug_utils;
use ash::khr::{surface, swapchain};
use ash::{vk, Entry, Instance};
use raw_window_handle::{HasDisplayHandle, HasWindowHandle, RawDisplayHandle};
use std::collections::BTreeSet;
use std::ffi::{c_void, CStr};
use tracing::{debug, error, info, warn};

const VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";
const APP_NAME: &CStr = c"Engine";

unsafe extern "system" fn debug_callback(
    severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    _types: vk::DebugUtilsMessageTypeFlagsEXT,
    data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _user: *mut c_void,
) -> vk::Bool32 {
    if data.is_null() || (*data).p_message.is_null() {
        return vk::FALSE;
    }
    let msg = CStr::from_ptr((*data).p_message).to_string_lossy();
    if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::ERROR) {
        error!(target: "vulkan", "{msg}");
    } else if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::WARNING) {
        warn!(target: "vulkan", "{msg}");
    } else {
        debug!(target: "vulkan", "{msg}");
    }
    vk::FALSE
}

/// Queue family lookup result; `None` means "not found yet".
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct QueueFamilyIndices {
    pub graphics: Option<u32>,
    pub present: Option<u32>,
}

impl QueueFamilyIndices {
    pub fn complete(&self) -> Option<QueueFamilies> {
        Some(QueueFamilies {
            graphics: self.graphics?,
            present: self.present?,
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct QueueFamilies {
    pub graphics: u32,
    pub present: u32,
}

impl QueueFamilies {
    pub fn unique(&self) -> BTreeSet<u32> {
        BTreeSet::from([self.graphics, self.present])
    }

    pub fn shared(&self) -> bool {
        self.graphics == self.present
    }
}

/// Scans families in order, keeping the latest match for each role and
/// stopping as soon as both roles are filled.
pub fn find_queue_families(
    families: &[vk::QueueFamilyProperties],
    mut present_support: impl FnMut(u32) -> bool,
) -> QueueFamilyIndices {
    let mut found = QueueFamilyIndices::default();
    for (i, family) in families.iter().enumerate() {
        let i = i as u32;
        if family.queue_count > 0 && family.queue_flags.contains(vk::QueueFlags::GRAPHICS) {
            found.graphics = Some(i);
        }
        if family.queue_count > 0 && present_support(i) {
            found.present = Some(i);
        }
        if found.complete().is_some() {
            break;
        }
    }
    found
}

fn has_layer(available: &[vk::LayerProperties], name: &CStr) -> bool {
    available
        .iter()
        .any(|l| unsafe { CStr::from_ptr(l.layer_name.as_ptr()) } == name)
}

fn has_extension(available: &[vk::ExtensionProperties], name: &CStr) -> bool {
    available
        .iter()
        .any(|e| unsafe { CStr::from_ptr(e.extension_name.as_ptr()) } == name)
}

/// Instance-scoped objects. Dropping releases the debug messenger, the
/// surface and then the instance; it must outlive any device made from it.
struct InstanceBundle {
    entry: Entry,
    instance: Instance,
    debug: Option<(debug_utils::Instance, vk::DebugUtilsMessengerEXT)>,
    surface_loader: surface::Instance,
    surface: vk::SurfaceKHR,
}

impl Drop for InstanceBundle {
    fn drop(&mut self) {
        unsafe {
            if let Some((loader, messenger)) = self.debug.take() {
                loader.destroy_debug_utils_messenger(messenger, None);
            }
            self.surface_loader.destroy_surface(self.surface, None);
            self.instance.destroy_instance(None);
        }
    }
}

unsafe fn create_instance(
    entry: &Entry,
    display_raw: RawDisplayHandle,
    validation: bool,
) -> Result<Instance> {
    if validation {
        let layers = entry
            .enumerate_instance_layer_properties()
            .context("enumerate_instance_layer_properties")?;
        if !has_layer(&layers, VALIDATION_LAYER) {
            return Err(EngineError::ValidationLayerMissing(
                VALIDATION_LAYER.to_string_lossy().into_owned(),
            )
            .into());
        }
    }

    let app_info = vk::ApplicationInfo {
        s_type: vk::StructureType::APPLICATION_INFO,
        p_application_name: APP_NAME.as_ptr(),
        application_version: vk::make_api_version(0, 1, 0, 0),
        p_engine_name: c"No Engine".as_ptr(),
        engine_version: vk::make_api_version(0, 1, 0, 0),
        api_version: vk::API_VERSION_1_0,
        ..Default::default()
    };

    let mut ext_vec = ash_window::enumerate_required_extensions(display_raw)
        .context("enumerate_required_extensions")?
        .to_vec();
    if validation {
        ext_vec.push(debug_utils::NAME.as_ptr());
    }
    let layers = [VALIDATION_LAYER.as_ptr()];
    let (enabled_layer_count, pp_enabled_layer_names) = if validation {
        (layers.len() as u32, layers.as_ptr())
    } else {
        (0, std::ptr::null())
    };

    let create_info = vk::InstanceCreateInfo {
        s_type: vk::StructureType::INSTANCE_CREATE_INFO,
        p_application_info: &app_info,
        enabled_extension_count: ext_vec.len() as u32,
        pp_enabled_extension_names: ext_vec.as_ptr(),
        enabled_layer_count,
        pp_enabled_layer_names,
        ..Default::default()
    };

    Ok(entry.create_instance(&create_info, None)?)
}

unsafe fn create_debug_messenger(
    entry: &Entry,
    instance: &Instance,
) -> Result<(debug_utils::Instance, vk::DebugUtilsMessengerEXT)> {
    let loader = debug_utils::Instance::new(entry, instance);
    let ci = vk::DebugUtilsMessengerCreateInfoEXT {
        s_type: vk::StructureType::DEBUG_UTILS_MESSENGER_CREATE_INFO_EXT,
        message_severity: vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
            | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
        message_type: vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
            | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
            | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
        pfn_user_callback: Some(debug_callback),
        ..Default::default()
    };
    let messenger = loader
        .create_debug_utils_messenger(&ci, None)
        .context("failed to set up debug messenger")?;
    Ok((loader, messenger))
}

// STRICT ORDER:
// 1) Instance (WSI extensions + optional validation)
// 2) Debug messenger, then surface from THIS instance
// 3) Physical device chosen AGAINST this surface (present support)
// 4) Logical device + queues
unsafe fn init_instance_and_surface(
    window: &dyn HasWindowHandle,
    display: &dyn HasDisplayHandle,
    validation: bool,
) -> Result<InstanceBundle> {
    let dh = display.display_handle()?.as_raw();
    let wh = window.window_handle()?.as_raw();

    let entry = Entry::load().context("load Vulkan loader")?;
    let instance = create_instance(&entry, dh, validation).context("create_instance")?;
    let surface_loader = surface::Instance::new(&entry, &instance);

    // From here on the bundle owns what exists, so an early return unwinds it.
    let mut bundle = InstanceBundle {
        entry,
        instance,
        debug: None,
        surface_loader,
        surface: vk::SurfaceKHR::null(),
    };
    if validation {
        bundle.debug = Some(create_debug_messenger(&bundle.entry, &bundle.instance)?);
    }
    bundle.surface = ash_window::create_surface(&bundle.entry, &bundle.instance, dh, wh, None)
        .context("failed to create window surface")?;
    Ok(bundle)
}

unsafe fn suitable_families(
    base: &InstanceBundle,
    phys: vk::PhysicalDevice,
) -> Result<Option<QueueFamilies>> {
    let qprops = base
        .instance
        .get_physical_device_queue_family_properties(phys);
    let indices = find_queue_families(&qprops, |i| {
        base.surface_loader
            .get_physical_device_surface_support(phys, i, base.surface)
            .unwrap_or(false)
    });
    let Some(families) = indices.complete() else {
        return Ok(None);
    };

    let exts = base
        .instance
        .enumerate_device_extension_properties(phys)
        .context("enumerate_device_extension_properties")?;
    if !has_extension(&exts, swapchain::NAME) {
        return Ok(None);
    }

    // Swap chain support is only adequate with at least one format and mode.
    let formats = base
        .surface_loader
        .get_physical_device_surface_formats(phys, base.surface)?;
    let modes = base
        .surface_loader
        .get_physical_device_surface_present_modes(phys, base.surface)?;
    if formats.is_empty() || modes.is_empty() {
        return Ok(None);
    }
    Ok(Some(families))
}

unsafe fn pick_physical_device(
    base: &InstanceBundle,
) -> Result<(vk::PhysicalDevice, QueueFamilies)> {
    let devices = base
        .instance
        .enumerate_physical_devices()
        .context("enumerate_physical_devices")?;
    if devices.is_empty() {
        return Err(EngineError::NoVulkanDevice.into());
    }
    for phys in devices {
        if let Some(families) = suitable_families(base, phys)? {
            return Ok((phys, families));
        }
    }
    Err(EngineError::NoSuitableDevice.into())
}

/// Everything that lives for the whole engine run. Handles are public so
/// the builders can borrow them; nothing mutates them after creation.
pub struct DeviceContext {
    base: InstanceBundle,
    pub phys: vk::PhysicalDevice,
    pub device: ash::Device,
    pub families: QueueFamilies,
    pub graphics_queue: vk::Queue,
    pub present_queue: vk::Queue,
    pub swapchain_loader: swapchain::Device,
    pub memory_properties: vk::PhysicalDeviceMemoryProperties,
}

impl DeviceContext {
    pub fn new(
        window: &dyn HasWindowHandle,
        display: &dyn HasDisplayHandle,
        validation: bool,
    ) -> Result<Self> {
        unsafe {
            let base = init_instance_and_surface(window, display, validation)?;
            let (phys, families) = pick_physical_device(&base)?;

            let props = base.instance.get_physical_device_properties(phys);
            let name = CStr::from_ptr(props.device_name.as_ptr()).to_string_lossy();
            info!(
                "gpu = {name}, graphics family = {}, present family = {}",
                families.graphics, families.present
            );

            let priorities = [1.0_f32];
            let qinfos: Vec<_> = families
                .unique()
                .into_iter()
                .map(|family| vk::DeviceQueueCreateInfo {
                    s_type: vk::StructureType::DEVICE_QUEUE_CREATE_INFO,
                    queue_family_index: family,
                    queue_count: 1,
                    p_queue_priorities: priorities.as_ptr(),
                    ..Default::default()
                })
                .collect();

            let features = vk::PhysicalDeviceFeatures::default();
            let device_exts = [swapchain::NAME.as_ptr()];
            let dinfo = vk::DeviceCreateInfo {
                s_type: vk::StructureType::DEVICE_CREATE_INFO,
                queue_create_info_count: qinfos.len() as u32,
                p_queue_create_infos: qinfos.as_ptr(),
                enabled_extension_count: device_exts.len() as u32,
                pp_enabled_extension_names: device_exts.as_ptr(),
                p_enabled_features: &features,
                ..Default::default()
            };
            let device = base
                .instance
                .create_device(phys, &dinfo, None)
                .context("failed to create logical device")?;

            let graphics_queue = device.get_device_queue(families.graphics, 0);
            let present_queue = device.get_device_queue(families.present, 0);
            let swapchain_loader = swapchain::Device::new(&base.instance, &device);
            let memory_properties = base.instance.get_physical_device_memory_properties(phys);

            Ok(Self {
                base,
                phys,
                device,
                families,
                graphics_queue,
                present_queue,
                swapchain_loader,
                memory_properties,
            })
        }
    }

    pub fn surface_loader(&self) -> &surface::Instance {
        &self.base.surface_loader
    }

    pub fn surface(&self) -> vk::SurfaceKHR {
        self.base.surface
    }

    /// Coarse barrier: every queue on the device drained.
    pub fn wait_idle(&self) -> Result<()> {
        unsafe { self.device.device_wait_idle() }.context("device_wait_idle")
    }
}

impl Drop for DeviceContext {
    fn drop(&mut self) {
        unsafe {
            self.device.device_wait_idle().ok();
            self.device.destroy_device(None);
        }
        // `base` drops next: debug messenger, surface, instance.
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn family(flags: vk::QueueFlags, count: u32) -> vk::QueueFamilyProperties {
        vk::QueueFamilyProperties {
            queue_flags: flags,
            queue_count: count,
            ..Default::default()
        }
    }

    #[test]
    fn single_family_serves_both_roles() {
        let families = [family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE, 4)];
        let found = find_queue_families(&families, |_| true);
        let q = found.complete().unwrap();
        assert_eq!(q, QueueFamilies { graphics: 0, present: 0 });
        assert!(q.shared());
        assert_eq!(q.unique().len(), 1);
    }

    #[test]
    fn split_graphics_and_present_families() {
        let families = [
            family(vk::QueueFlags::GRAPHICS, 1),
            family(vk::QueueFlags::TRANSFER, 1),
        ];
        let found = find_queue_families(&families, |i| i == 1);
        let q = found.complete().unwrap();
        assert_eq!((q.graphics, q.present), (0, 1));
        assert!(!q.shared());
        assert_eq!(q.unique().into_iter().collect::<Vec<_>>(), vec![0, 1]);
    }

    #[test]
    fn empty_families_are_skipped() {
        let families = [
            family(vk::QueueFlags::GRAPHICS, 0),
            family(vk::QueueFlags::COMPUTE, 2),
        ];
        let found = find_queue_families(&families, |_| true);
        assert_eq!(found.graphics, None);
        assert_eq!(found.present, Some(1));
        assert!(found.complete().is_none());
    }

    #[test]
    fn layer_lookup_compares_names() {
        let mut layer = vk::LayerProperties::default();
        for (dst, src) in layer
            .layer_name
            .iter_mut()
            .zip(VALIDATION_LAYER.to_bytes_with_nul())
        {
            *dst = *src as std::ffi::c_char;
        }
        assert!(has_layer(&[layer], VALIDATION_LAYER));
        assert!(!has_layer(&[layer], c"VK_LAYER_LUNARG_api_dump"));
        assert!(!has_layer(&[], VALIDATION_LAYER));
    }
}
