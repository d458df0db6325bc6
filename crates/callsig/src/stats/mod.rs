//! Outbound bitrate statistics

pub mod sampler;

pub use sampler::{
    compute_bitrate, BitrateReading, SAMPLING_INTERVAL, BitrateTracker, StatsSample, StatsSampler, StatsSource,
};
