//! Vulkan instance creation and physical device selection.

use crate::capabilities::GpuCapabilities;
use crate::error::{GpuError, Result};
use ash::vk;
use std::ffi::{c_char, CStr, CString};

/// Instance extensions to enable.
///
/// Rendering is offscreen, so no surface extensions are needed. Debug utils
/// carries validation messages to the diagnostic sink.
pub fn required_instance_extensions(enable_validation: bool) -> Vec<&'static CStr> {
    let mut extensions = Vec::new();
    if enable_validation {
        extensions.push(ash::ext::debug_utils::NAME);
    }
    #[cfg(target_os = "macos")]
    extensions.push(ash::khr::portability_enumeration::NAME);
    extensions
}

/// Validation layers to enable in debug builds.
pub fn validation_layers() -> Vec<&'static CStr> {
    vec![c"VK_LAYER_KHRONOS_validation"]
}

/// Create a Vulkan instance.
///
/// # Safety
/// The entry must be a valid Vulkan entry point.
pub unsafe fn create_instance(
    entry: &ash::Entry,
    app_name: &str,
    enable_validation: bool,
) -> Result<ash::Instance> {
    let app_name = CString::new(app_name)
        .map_err(|e| GpuError::InvalidState(format!("Application name: {e}")))?;

    let app_info = vk::ApplicationInfo::default()
        .application_name(&app_name)
        .application_version(vk::make_api_version(0, 0, 1, 0))
        .engine_name(c"virtex")
        .engine_version(vk::make_api_version(0, 0, 1, 0))
        .api_version(vk::API_VERSION_1_3);

    let extension_names: Vec<*const c_char> = required_instance_extensions(enable_validation)
        .iter()
        .map(|ext| ext.as_ptr())
        .collect();

    let requested_layers = if enable_validation {
        validation_layers()
    } else {
        vec![]
    };

    // Missing layers are skipped rather than failing instance creation
    let available_layers = entry.enumerate_instance_layer_properties()?;
    let layers: Vec<&CStr> = requested_layers
        .into_iter()
        .filter(|layer| {
            let found = available_layers
                .iter()
                .any(|props| props.layer_name_as_c_str().ok() == Some(*layer));
            if !found {
                tracing::warn!("Validation layer {} not available", layer.to_string_lossy());
            }
            found
        })
        .collect();

    let layer_names: Vec<*const c_char> = layers.iter().map(|l| l.as_ptr()).collect();

    #[cfg(target_os = "macos")]
    let create_flags = vk::InstanceCreateFlags::ENUMERATE_PORTABILITY_KHR;
    #[cfg(not(target_os = "macos"))]
    let create_flags = vk::InstanceCreateFlags::empty();

    let create_info = vk::InstanceCreateInfo::default()
        .application_info(&app_info)
        .enabled_extension_names(&extension_names)
        .enabled_layer_names(&layer_names)
        .flags(create_flags);

    let instance = entry.create_instance(&create_info, None)?;

    Ok(instance)
}

/// Pick the device best suited to streaming: one that offers everything in
/// [`GpuCapabilities::missing_features`], preferring discrete GPUs.
///
/// # Safety
/// The instance must be valid.
pub unsafe fn select_physical_device(instance: &ash::Instance) -> Result<vk::PhysicalDevice> {
    instance
        .enumerate_physical_devices()?
        .into_iter()
        .filter_map(|device| {
            let caps = GpuCapabilities::query(instance, device);
            let missing = caps.missing_features();
            if !missing.is_empty() {
                tracing::debug!("Skipping {}: lacks {}", caps.device_name, missing.join(", "));
                return None;
            }
            let kind = instance.get_physical_device_properties(device).device_type;
            Some((device_score(kind, &caps), device))
        })
        .max_by_key(|&(score, _)| score)
        .map(|(_, device)| device)
        .ok_or(GpuError::NoSuitableDevice)
}

fn device_score(kind: vk::PhysicalDeviceType, caps: &GpuCapabilities) -> u32 {
    let kind_score = match kind {
        vk::PhysicalDeviceType::DISCRETE_GPU => 1000,
        vk::PhysicalDeviceType::INTEGRATED_GPU => 100,
        vk::PhysicalDeviceType::VIRTUAL_GPU => 50,
        _ => 1,
    };
    kind_score + u32::from(caps.astc_ldr) * 100 + u32::from(caps.non_resident_strict) * 10
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_adds_debug_utils() {
        assert!(required_instance_extensions(true).contains(&ash::ext::debug_utils::NAME));
        assert!(!required_instance_extensions(false).contains(&ash::ext::debug_utils::NAME));
    }
}
