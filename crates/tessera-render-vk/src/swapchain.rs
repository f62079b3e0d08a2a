// SPDX-License-Identifier: CEPL-1.0
//! Surface queries, the deterministic swap-chain parameter choice, and the
//! swap chain object itself (images + one view per image).

use crate::context::DeviceContext;
use anyhow::{Context, Result};
use ash::vk;
use tessera_render::RenderSize;
use tracing::info;

/// What we ask for when the surface leaves the choice to us.
pub const PREFERRED_FORMAT: vk::SurfaceFormatKHR = vk::SurfaceFormatKHR {
    format: vk::Format::B8G8R8A8_UNORM,
    color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
};

/// `current_extent.width == u32::MAX` means the surface takes any size.
const ANY_SIZE: u32 = u32::MAX;

pub fn choose_surface_format(formats: &[vk::SurfaceFormatKHR]) -> vk::SurfaceFormatKHR {
    // A lone UNDEFINED entry means the surface has no preference at all.
    if let [only] = formats {
        if only.format == vk::Format::UNDEFINED {
            return PREFERRED_FORMAT;
        }
    }
    formats
        .iter()
        .copied()
        .find(|&f| same_format(f, PREFERRED_FORMAT))
        .or_else(|| formats.first().copied())
        .unwrap_or(PREFERRED_FORMAT)
}

/// MAILBOX, then IMMEDIATE, then FIFO (the only mode every surface supports).
pub fn choose_present_mode(modes: &[vk::PresentModeKHR]) -> vk::PresentModeKHR {
    [vk::PresentModeKHR::MAILBOX, vk::PresentModeKHR::IMMEDIATE]
        .into_iter()
        .find(|m| modes.contains(m))
        .unwrap_or(vk::PresentModeKHR::FIFO)
}

pub fn choose_extent(caps: &vk::SurfaceCapabilitiesKHR, window: RenderSize) -> vk::Extent2D {
    if caps.current_extent.width != ANY_SIZE {
        caps.current_extent
    } else {
        vk::Extent2D {
            width: window
                .width
                .clamp(caps.min_image_extent.width, caps.max_image_extent.width),
            height: window
                .height
                .clamp(caps.min_image_extent.height, caps.max_image_extent.height),
        }
    }
}

/// One more than the minimum; `max_image_count == 0` means "no max".
pub fn choose_image_count(caps: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let want = caps.min_image_count + 1;
    if caps.max_image_count > 0 {
        want.min(caps.max_image_count)
    } else {
        want
    }
}

/// Snapshot of what the surface supports on the selected GPU.
#[derive(Clone, Debug)]
pub struct SwapchainSupport {
    pub capabilities: vk::SurfaceCapabilitiesKHR,
    pub formats: Vec<vk::SurfaceFormatKHR>,
    pub present_modes: Vec<vk::PresentModeKHR>,
}

#[derive(Clone, Copy, Debug)]
pub struct SwapchainChoice {
    pub surface_format: vk::SurfaceFormatKHR,
    pub present_mode: vk::PresentModeKHR,
    pub extent: vk::Extent2D,
    pub image_count: u32,
}

impl PartialEq for SwapchainChoice {
    fn eq(&self, other: &Self) -> bool {
        same_format(self.surface_format, other.surface_format)
            && self.present_mode == other.present_mode
            && self.extent == other.extent
            && self.image_count == other.image_count
    }
}

pub fn same_format(a: vk::SurfaceFormatKHR, b: vk::SurfaceFormatKHR) -> bool {
    a.format == b.format && a.color_space == b.color_space
}

impl SwapchainSupport {
    pub fn query(ctx: &DeviceContext) -> Result<Self> {
        let loader = ctx.surface_loader();
        let surface = ctx.surface();
        unsafe {
            Ok(Self {
                capabilities: loader
                    .get_physical_device_surface_capabilities(ctx.phys, surface)
                    .context("get_physical_device_surface_capabilities")?,
                formats: loader
                    .get_physical_device_surface_formats(ctx.phys, surface)
                    .context("get_physical_device_surface_formats")?,
                present_modes: loader
                    .get_physical_device_surface_present_modes(ctx.phys, surface)
                    .context("get_physical_device_surface_present_modes")?,
            })
        }
    }

    pub fn choose(&self, window: RenderSize) -> SwapchainChoice {
        SwapchainChoice {
            surface_format: choose_surface_format(&self.formats),
            present_mode: choose_present_mode(&self.present_modes),
            extent: choose_extent(&self.capabilities, window),
            image_count: choose_image_count(&self.capabilities),
        }
    }
}

/// The presentable images and their views. Owns both; framebuffers built on
/// the views belong to the caller and must be gone before [`Swapchain::destroy`].
pub struct Swapchain {
    pub handle: vk::SwapchainKHR,
    pub format: vk::Format,
    pub extent: vk::Extent2D,
    pub images: Vec<vk::Image>,
    pub image_views: Vec<vk::ImageView>,
}

impl Swapchain {
    pub fn new(ctx: &DeviceContext, support: &SwapchainSupport, choice: SwapchainChoice) -> Result<Self> {
        let caps = &support.capabilities;
        let family_indices = [ctx.families.graphics, ctx.families.present];
        // Images are touched by both queues; share them if those differ.
        let (sharing_mode, index_count, p_indices) = if ctx.families.shared() {
            (vk::SharingMode::EXCLUSIVE, 0, std::ptr::null())
        } else {
            (vk::SharingMode::CONCURRENT, 2, family_indices.as_ptr())
        };

        let swap_info = vk::SwapchainCreateInfoKHR {
            s_type: vk::StructureType::SWAPCHAIN_CREATE_INFO_KHR,
            surface: ctx.surface(),
            min_image_count: choice.image_count,
            image_format: choice.surface_format.format,
            image_color_space: choice.surface_format.color_space,
            image_extent: choice.extent,
            image_array_layers: 1,
            image_usage: vk::ImageUsageFlags::COLOR_ATTACHMENT,
            image_sharing_mode: sharing_mode,
            queue_family_index_count: index_count,
            p_queue_family_indices: p_indices,
            pre_transform: caps.current_transform,
            composite_alpha: vk::CompositeAlphaFlagsKHR::OPAQUE,
            present_mode: choice.present_mode,
            clipped: vk::TRUE,
            old_swapchain: vk::SwapchainKHR::null(),
            ..Default::default()
        };

        let handle = unsafe { ctx.swapchain_loader.create_swapchain(&swap_info, None) }
            .context("failed to create swap chain")?;
        let mut sc = Swapchain {
            handle,
            format: choice.surface_format.format,
            extent: choice.extent,
            images: Vec::new(),
            image_views: Vec::new(),
        };
        if let Err(e) = sc.create_views(ctx) {
            unsafe { sc.destroy(ctx) };
            return Err(e);
        }

        info!(
            "swapchain: format {:?} / {:?}, present_mode {:?}, extent {}x{}, images {} (min {})",
            choice.surface_format.format,
            choice.surface_format.color_space,
            choice.present_mode,
            choice.extent.width,
            choice.extent.height,
            sc.images.len(),
            caps.min_image_count,
        );
        Ok(sc)
    }

    fn create_views(&mut self, ctx: &DeviceContext) -> Result<()> {
        self.images = unsafe { ctx.swapchain_loader.get_swapchain_images(self.handle) }
            .context("get_swapchain_images")?;
        self.image_views.reserve(self.images.len());
        for &image in &self.images {
            let iv_info = vk::ImageViewCreateInfo {
                s_type: vk::StructureType::IMAGE_VIEW_CREATE_INFO,
                image,
                view_type: vk::ImageViewType::TYPE_2D,
                format: self.format,
                components: vk::ComponentMapping {
                    r: vk::ComponentSwizzle::IDENTITY,
                    g: vk::ComponentSwizzle::IDENTITY,
                    b: vk::ComponentSwizzle::IDENTITY,
                    a: vk::ComponentSwizzle::IDENTITY,
                },
                subresource_range: vk::ImageSubresourceRange {
                    aspect_mask: vk::ImageAspectFlags::COLOR,
                    base_mip_level: 0,
                    level_count: 1,
                    base_array_layer: 0,
                    layer_count: 1,
                },
                ..Default::default()
            };
            let view = unsafe { ctx.device.create_image_view(&iv_info, None) }
                .context("failed to create image view")?;
            self.image_views.push(view);
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }

    /// Releases every image view. The images themselves belong to the swap
    /// chain and go with it.
    pub unsafe fn destroy_views(&mut self, device: &ash::Device) {
        for iv in self.image_views.drain(..) {
            device.destroy_image_view(iv, None);
        }
    }

    pub unsafe fn destroy_handle(&mut self, ctx: &DeviceContext) {
        ctx.swapchain_loader.destroy_swapchain(self.handle, None);
        self.handle = vk::SwapchainKHR::null();
        self.images.clear();
    }

    /// Views first, then the swap chain. Caller guarantees the device is idle
    /// and no framebuffer still references a view.
    pub unsafe fn destroy(mut self, ctx: &DeviceContext) {
        self.destroy_views(&ctx.device);
        self.destroy_handle(ctx);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fmt(format: vk::Format, color_space: vk::ColorSpaceKHR) -> vk::SurfaceFormatKHR {
        vk::SurfaceFormatKHR {
            format,
            color_space,
        }
    }

    fn caps_any_size(min: (u32, u32), max: (u32, u32)) -> vk::SurfaceCapabilitiesKHR {
        vk::SurfaceCapabilitiesKHR {
            current_extent: vk::Extent2D {
                width: u32::MAX,
                height: u32::MAX,
            },
            min_image_extent: vk::Extent2D {
                width: min.0,
                height: min.1,
            },
            max_image_extent: vk::Extent2D {
                width: max.0,
                height: max.1,
            },
            min_image_count: 2,
            ..Default::default()
        }
    }

    #[test]
    fn undefined_sentinel_yields_preferred_format() {
        let chosen = choose_surface_format(&[fmt(
            vk::Format::UNDEFINED,
            vk::ColorSpaceKHR::DISPLAY_P3_NONLINEAR_EXT,
        )]);
        assert!(same_format(chosen, PREFERRED_FORMAT));
    }

    #[test]
    fn exact_match_beats_earlier_entries() {
        let other = fmt(vk::Format::R8G8B8A8_UNORM, vk::ColorSpaceKHR::SRGB_NONLINEAR);
        let chosen = choose_surface_format(&[other, PREFERRED_FORMAT]);
        assert!(same_format(chosen, PREFERRED_FORMAT));
    }

    #[test]
    fn format_falls_back_to_first_entry() {
        let first = fmt(vk::Format::R16G16B16A16_SFLOAT, vk::ColorSpaceKHR::EXTENDED_SRGB_LINEAR_EXT);
        let second = fmt(vk::Format::B8G8R8A8_UNORM, vk::ColorSpaceKHR::HDR10_ST2084_EXT);
        assert!(same_format(choose_surface_format(&[first, second]), first));
    }

    #[test]
    fn undefined_among_others_is_not_the_sentinel() {
        let first = fmt(vk::Format::UNDEFINED, vk::ColorSpaceKHR::SRGB_NONLINEAR);
        let second = fmt(vk::Format::R8G8B8A8_SRGB, vk::ColorSpaceKHR::SRGB_NONLINEAR);
        assert!(same_format(choose_surface_format(&[first, second]), first));
    }

    #[test]
    fn present_mode_preference_order() {
        use vk::PresentModeKHR as P;
        assert_eq!(choose_present_mode(&[P::FIFO, P::IMMEDIATE]), P::IMMEDIATE);
        assert_eq!(choose_present_mode(&[P::FIFO]), P::FIFO);
        assert_eq!(
            choose_present_mode(&[P::FIFO, P::IMMEDIATE, P::MAILBOX]),
            P::MAILBOX
        );
        assert_eq!(choose_present_mode(&[]), P::FIFO);
    }

    #[test]
    fn fixed_current_extent_wins_over_window() {
        let caps = vk::SurfaceCapabilitiesKHR {
            current_extent: vk::Extent2D {
                width: 1024,
                height: 768,
            },
            ..Default::default()
        };
        let chosen = choose_extent(&caps, RenderSize::new(300, 200));
        assert_eq!((chosen.width, chosen.height), (1024, 768));
    }

    #[test]
    fn any_size_uses_window_within_bounds() {
        let caps = caps_any_size((100, 100), (2000, 2000));
        let chosen = choose_extent(&caps, RenderSize::new(300, 200));
        assert_eq!((chosen.width, chosen.height), (300, 200));
    }

    #[test]
    fn any_size_clamps_each_axis() {
        let caps = caps_any_size((100, 100), (2000, 2000));
        let chosen = choose_extent(&caps, RenderSize::new(50, 4000));
        assert_eq!((chosen.width, chosen.height), (100, 2000));
    }

    #[test]
    fn image_count_respects_cap() {
        let mut caps = caps_any_size((1, 1), (1, 1));
        caps.min_image_count = 2;
        caps.max_image_count = 0;
        assert_eq!(choose_image_count(&caps), 3);
        caps.max_image_count = 2;
        assert_eq!(choose_image_count(&caps), 2);
        caps.max_image_count = 8;
        assert_eq!(choose_image_count(&caps), 3);
    }

    #[test]
    fn choice_is_stable_for_unchanged_surface() {
        let support = SwapchainSupport {
            capabilities: caps_any_size((1, 1), (4096, 4096)),
            formats: vec![
                fmt(vk::Format::R8G8B8A8_UNORM, vk::ColorSpaceKHR::SRGB_NONLINEAR),
                PREFERRED_FORMAT,
            ],
            present_modes: vec![vk::PresentModeKHR::FIFO, vk::PresentModeKHR::MAILBOX],
        };
        let window = RenderSize::new(800, 600);
        let first = support.choose(window);
        let second = support.choose(window);
        assert_eq!(first, second);
        assert!(same_format(first.surface_format, PREFERRED_FORMAT));
        assert_eq!(first.present_mode, vk::PresentModeKHR::MAILBOX);
        assert_eq!((first.extent.width, first.extent.height), (800, 600));
        assert_eq!(first.image_count, 3);
    }

    #[test]
    fn image_count_reports_through_len_and_is_empty() {
        let mut sc = Swapchain {
            handle: vk::SwapchainKHR::null(),
            format: vk::Format::B8G8R8A8_UNORM,
            extent: vk::Extent2D { width: 800, height: 600 },
            images: Vec::new(),
            image_views: Vec::new(),
        };
        assert!(sc.is_empty());
        sc.images = vec![vk::Image::null(); 3];
        assert_eq!(sc.len(), 3);
        assert!(!sc.is_empty());
    }
}
