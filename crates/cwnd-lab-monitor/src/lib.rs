pub mod sampler;

pub use sampler::{MonitorError, Sampler, SamplerHandle, SamplerStats, spawn_to_file};
