//! Sparse residency capability detection.

use ash::vk;
use std::collections::HashSet;
use std::ffi::CStr;

/// GPU vendor identification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GpuVendor {
    Nvidia,
    Amd,
    Intel,
    Apple,
    Other(u32),
}

impl GpuVendor {
    /// Identify vendor from PCI vendor ID.
    pub const fn from_vendor_id(id: u32) -> Self {
        match id {
            0x10DE => Self::Nvidia,
            0x1002 => Self::Amd,
            0x8086 => Self::Intel,
            0x106B => Self::Apple,
            other => Self::Other(other),
        }
    }

    pub fn name(self) -> String {
        match self {
            Self::Nvidia => "NVIDIA".to_string(),
            Self::Amd => "AMD".to_string(),
            Self::Intel => "Intel".to_string(),
            Self::Apple => "Apple".to_string(),
            Self::Other(id) => format!("vendor {id:#06x}"),
        }
    }
}

/// What a physical device offers for sparse texture streaming.
#[derive(Debug, Clone)]
pub struct GpuCapabilities {
    pub vendor: GpuVendor,
    pub device_name: String,
    pub api_version: u32,
    pub driver_version: u32,

    /// `sparseBinding`
    pub sparse_binding: bool,
    /// `sparseResidencyImage2D`
    pub sparse_residency_2d: bool,
    /// `shaderResourceResidency`, needed for residency feedback in the fetch shader
    pub shader_resource_residency: bool,
    /// Non-resident texels read as zero
    pub non_resident_strict: bool,

    pub astc_ldr: bool,
    pub bc: bool,
    pub etc2: bool,

    pub max_image_dimension_2d: u32,
    pub available_extensions: HashSet<String>,
}

impl GpuCapabilities {
    /// Query capabilities from a physical device.
    ///
    /// # Safety
    /// The instance and physical device must be valid.
    pub unsafe fn query(instance: &ash::Instance, physical_device: vk::PhysicalDevice) -> Self {
        let properties = instance.get_physical_device_properties(physical_device);
        let features = instance.get_physical_device_features(physical_device);

        let available_extensions = instance
            .enumerate_device_extension_properties(physical_device)
            .unwrap_or_default()
            .iter()
            .filter_map(|ext| {
                CStr::from_ptr(ext.extension_name.as_ptr())
                    .to_str()
                    .ok()
                    .map(String::from)
            })
            .collect();

        Self {
            vendor: GpuVendor::from_vendor_id(properties.vendor_id),
            device_name: CStr::from_ptr(properties.device_name.as_ptr())
                .to_string_lossy()
                .into_owned(),
            api_version: properties.api_version,
            driver_version: properties.driver_version,

            sparse_binding: features.sparse_binding == vk::TRUE,
            sparse_residency_2d: features.sparse_residency_image2_d == vk::TRUE,
            shader_resource_residency: features.shader_resource_residency == vk::TRUE,
            non_resident_strict: properties.sparse_properties.residency_non_resident_strict
                == vk::TRUE,

            astc_ldr: features.texture_compression_astc_ldr == vk::TRUE,
            bc: features.texture_compression_bc == vk::TRUE,
            etc2: features.texture_compression_etc2 == vk::TRUE,

            max_image_dimension_2d: properties.limits.max_image_dimension2_d,
            available_extensions,
        }
    }

    /// Dynamic rendering and synchronization2 are core from Vulkan 1.3.
    pub const fn has_vulkan_1_3(&self) -> bool {
        let major = vk::api_version_major(self.api_version);
        major > 1 || (major == 1 && vk::api_version_minor(self.api_version) >= 3)
    }

    /// Features the streaming pipeline needs that this device lacks.
    pub fn missing_features(&self) -> Vec<&'static str> {
        [
            (self.has_vulkan_1_3(), "Vulkan 1.3"),
            (self.sparse_binding, "sparseBinding"),
            (self.sparse_residency_2d, "sparseResidencyImage2D"),
            (self.shader_resource_residency, "shaderResourceResidency"),
            (
                self.astc_ldr || self.bc || self.etc2,
                "block-compressed textures",
            ),
        ]
        .into_iter()
        .filter_map(|(present, name)| (!present).then_some(name))
        .collect()
    }

    /// Driver version as a display string.
    pub fn driver_version_string(&self) -> String {
        format!(
            "{}.{}.{}",
            vk::api_version_major(self.driver_version),
            vk::api_version_minor(self.driver_version),
            vk::api_version_patch(self.driver_version),
        )
    }

    pub fn summary(&self) -> String {
        format!(
            "{} ({}) - Vulkan {}.{}.{} - strict residency: {}, ASTC: {}, BC: {}, ETC2: {}",
            self.device_name,
            self.vendor.name(),
            vk::api_version_major(self.api_version),
            vk::api_version_minor(self.api_version),
            vk::api_version_patch(self.api_version),
            self.non_resident_strict,
            self.astc_ldr,
            self.bc,
            self.etc2,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn capable() -> GpuCapabilities {
        GpuCapabilities {
            vendor: GpuVendor::Amd,
            device_name: "test".to_string(),
            api_version: vk::make_api_version(0, 1, 3, 250),
            driver_version: 0,
            sparse_binding: true,
            sparse_residency_2d: true,
            shader_resource_residency: true,
            non_resident_strict: true,
            astc_ldr: false,
            bc: true,
            etc2: false,
            max_image_dimension_2d: 16384,
            available_extensions: HashSet::new(),
        }
    }

    #[test]
    fn vendor_identification() {
        assert_eq!(GpuVendor::from_vendor_id(0x10DE), GpuVendor::Nvidia);
        assert_eq!(GpuVendor::from_vendor_id(0x1002), GpuVendor::Amd);
        assert_eq!(GpuVendor::from_vendor_id(0x8086), GpuVendor::Intel);
        assert_eq!(GpuVendor::from_vendor_id(0x5143).name(), "vendor 0x5143");
    }

    #[test]
    fn capable_device_misses_nothing() {
        assert!(capable().missing_features().is_empty());
    }

    #[test]
    fn missing_features_are_named() {
        let caps = GpuCapabilities {
            api_version: vk::make_api_version(0, 1, 2, 0),
            sparse_residency_2d: false,
            bc: false,
            ..capable()
        };
        assert_eq!(
            caps.missing_features(),
            vec!["Vulkan 1.3", "sparseResidencyImage2D", "block-compressed textures"]
        );

        let newer = GpuCapabilities {
            api_version: vk::make_api_version(0, 2, 0, 0),
            ..capable()
        };
        assert!(newer.has_vulkan_1_3());
    }
}
