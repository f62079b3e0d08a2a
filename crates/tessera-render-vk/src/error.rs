// SPDX-License-Identifier: CEPL-1.0
use ash::vk;
use std::path::PathBuf;
use thiserror::Error;

/// Conditions that end the run. Transient swap-chain results never become
/// one of these; they are absorbed by the rebuild path.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("validation layer {0} requested but not available")]
    ValidationLayerMissing(String),

    #[error("failed to find GPUs with Vulkan support")]
    NoVulkanDevice,

    #[error("no GPU offers graphics + present queues, VK_KHR_swapchain and a usable surface")]
    NoSuitableDevice,

    #[error("no memory type in filter {type_filter:#b} provides {required:?}")]
    NoCompatibleMemoryType {
        type_filter: u32,
        required: vk::MemoryPropertyFlags,
    },

    #[error("failed to read shader binary {path}")]
    ShaderRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{path} is not valid SPIR-V")]
    ShaderInvalid {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to acquire swap chain image: {0}")]
    Acquire(vk::Result),

    #[error("failed to submit draw command buffer: {0}")]
    Submit(vk::Result),

    #[error("failed to present swap chain image: {0}")]
    Present(vk::Result),
}
