// SPDX-License-Identifier: CEPL-1.0
//! Frame Loop pieces that don't need a live device: sync objects, result
//! classification for acquire/present, and the resize bookkeeping.

use crate::error::EngineError;
use anyhow::{Context, Result};
use ash::prelude::VkResult;
use ash::vk;
use tessera_render::RenderSize;

/// The two semaphores shared by every frame. Only one frame is ever in
/// flight, so a single pair is enough.
pub struct FrameSync {
    pub image_available: vk::Semaphore,
    pub render_finished: vk::Semaphore,
}

impl FrameSync {
    pub fn new(device: &ash::Device) -> Result<Self> {
        let ci = vk::SemaphoreCreateInfo {
            s_type: vk::StructureType::SEMAPHORE_CREATE_INFO,
            ..Default::default()
        };
        unsafe {
            let image_available = device
                .create_semaphore(&ci, None)
                .context("failed to create semaphores")?;
            let render_finished = match device.create_semaphore(&ci, None) {
                Ok(s) => s,
                Err(e) => {
                    device.destroy_semaphore(image_available, None);
                    return Err(e).context("failed to create semaphores");
                }
            };
            Ok(Self {
                image_available,
                render_finished,
            })
        }
    }

    pub unsafe fn destroy(self, device: &ash::Device) {
        device.destroy_semaphore(self.render_finished, None);
        device.destroy_semaphore(self.image_available, None);
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Acquired {
    Image(u32),
    /// The swap chain no longer matches the surface; nothing was acquired.
    Rebuild,
}

/// SUBOPTIMAL still hands back a usable image, so the frame proceeds.
pub fn classify_acquire(result: VkResult<(u32, bool)>) -> Result<Acquired, EngineError> {
    match result {
        Ok((index, _suboptimal)) => Ok(Acquired::Image(index)),
        Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(Acquired::Rebuild),
        Err(e) => Err(EngineError::Acquire(e)),
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Presented {
    Done,
    Rebuild,
}

pub fn classify_present(result: VkResult<bool>) -> Result<Presented, EngineError> {
    match result {
        Ok(false) => Ok(Presented::Done),
        Ok(true) | Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(Presented::Rebuild),
        Err(e) => Err(EngineError::Present(e)),
    }
}

/// Latest window size plus the "rebuild wanted" flag. A rebuild requested
/// while the window has zero area stays pending until the area is usable.
#[derive(Debug, Default)]
pub struct SurfaceState {
    size: RenderSize,
    pending: bool,
}

impl SurfaceState {
    pub fn new(size: RenderSize) -> Self {
        Self {
            size,
            pending: false,
        }
    }

    pub fn size(&self) -> RenderSize {
        self.size
    }

    pub fn resized(&mut self, size: RenderSize) {
        self.size = size;
        self.pending = true;
    }

    pub fn request_rebuild(&mut self) {
        self.pending = true;
    }

    pub fn is_drawable(&self) -> bool {
        !self.size.is_zero_area()
    }

    pub fn is_pending(&self) -> bool {
        self.pending
    }

    /// Size to rebuild at, clearing the flag, if a rebuild is both wanted
    /// and possible right now.
    pub fn take_rebuild(&mut self) -> Option<RenderSize> {
        if self.pending && self.is_drawable() {
            self.pending = false;
            Some(self.size)
        } else {
            None
        }
    }
}
