use serde::{Deserialize, Serialize};

use crate::GraphError;

/// Shape of the matrix fragment handled by one tensor-core instruction.
#[derive(new, Clone, Copy, Debug, Hash, PartialEq, Eq, Serialize, Deserialize)]
pub struct FragmentShape {
    pub m: usize,
    pub n: usize,
    pub k: usize,
}

/// Static description of one target accelerator.
///
/// Immutable once built. Profiles are passed explicitly to every search, there is no global
/// target. Deserialized profiles are validated like built ones.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "HardwareLimits")]
pub struct HardwareProfile {
    name: String,
    max_shared_memory_per_block: usize,
    max_shared_memory_per_sm: usize,
    warp_size: u32,
    max_threads_per_block: u32,
    max_threads_per_sm: u32,
    max_registers_per_thread: u32,
    registers_per_sm: u32,
    num_streaming_multiprocessors: u32,
    memory_bandwidth: f64,
    peak_flops: f64,
    peak_tensor_flops: f64,
    tensor_core: Option<FragmentShape>,
}

/// Unchecked fields of a serialized [HardwareProfile].
#[derive(Deserialize)]
struct HardwareLimits {
    name: String,
    max_shared_memory_per_block: usize,
    max_shared_memory_per_sm: usize,
    warp_size: u32,
    max_threads_per_block: u32,
    max_threads_per_sm: u32,
    max_registers_per_thread: u32,
    registers_per_sm: u32,
    num_streaming_multiprocessors: u32,
    memory_bandwidth: f64,
    peak_flops: f64,
    peak_tensor_flops: f64,
    tensor_core: Option<FragmentShape>,
}

impl TryFrom<HardwareLimits> for HardwareProfile {
    type Error = GraphError;

    fn try_from(limits: HardwareLimits) -> Result<Self, Self::Error> {
        validate(HardwareProfile {
            name: limits.name,
            max_shared_memory_per_block: limits.max_shared_memory_per_block,
            max_shared_memory_per_sm: limits.max_shared_memory_per_sm,
            warp_size: limits.warp_size,
            max_threads_per_block: limits.max_threads_per_block,
            max_threads_per_sm: limits.max_threads_per_sm,
            max_registers_per_thread: limits.max_registers_per_thread,
            registers_per_sm: limits.registers_per_sm,
            num_streaming_multiprocessors: limits.num_streaming_multiprocessors,
            memory_bandwidth: limits.memory_bandwidth,
            peak_flops: limits.peak_flops,
            peak_tensor_flops: limits.peak_tensor_flops,
            tensor_core: limits.tensor_core,
        })
    }
}

impl HardwareProfile {
    /// Start describing a new device.
    pub fn builder(name: impl Into<String>) -> HardwareProfileBuilder {
        HardwareProfileBuilder::new(name)
    }

    /// Name of the profile.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Maximum shared memory usable by one block, in bytes.
    pub fn max_shared_memory_per_block(&self) -> usize {
        self.max_shared_memory_per_block
    }

    /// Shared memory available on one streaming multiprocessor, in bytes.
    pub fn max_shared_memory_per_sm(&self) -> usize {
        self.max_shared_memory_per_sm
    }

    pub fn warp_size(&self) -> u32 {
        self.warp_size
    }

    pub fn max_threads_per_block(&self) -> u32 {
        self.max_threads_per_block
    }

    pub fn max_threads_per_sm(&self) -> u32 {
        self.max_threads_per_sm
    }

    pub fn max_registers_per_thread(&self) -> u32 {
        self.max_registers_per_thread
    }

    /// Size of the register file of one streaming multiprocessor.
    pub fn registers_per_sm(&self) -> u32 {
        self.registers_per_sm
    }

    pub fn num_streaming_multiprocessors(&self) -> u32 {
        self.num_streaming_multiprocessors
    }

    /// Global memory bandwidth, in bytes per second.
    pub fn memory_bandwidth(&self) -> f64 {
        self.memory_bandwidth
    }

    /// Fragment of one tensor-core instruction, `None` when the device has no tensor cores.
    pub fn tensor_core(&self) -> Option<FragmentShape> {
        self.tensor_core
    }

    /// Peak FLOP/s reachable with or without tensor cores.
    pub fn peak(&self, tensor_core: bool) -> f64 {
        match tensor_core && self.tensor_core.is_some() {
            true => self.peak_tensor_flops,
            false => self.peak_flops,
        }
    }

    /// Number of blocks that can be resident on one streaming multiprocessor.
    pub fn blocks_per_sm(&self, threads: u32, shared_memory: usize, registers: u32) -> u32 {
        if threads == 0 {
            return 0;
        }
        let by_threads = self.max_threads_per_sm / threads;
        let by_smem = match shared_memory {
            0 => u32::MAX,
            smem => (self.max_shared_memory_per_sm / smem) as u32,
        };
        let by_registers = match registers * threads {
            0 => u32::MAX,
            total => self.registers_per_sm / total,
        };

        by_threads.min(by_smem).min(by_registers)
    }

    /// NVIDIA A100, fp16.
    pub fn a100() -> Self {
        Self {
            name: "a100".into(),
            max_shared_memory_per_block: 163_840,
            max_shared_memory_per_sm: 167_936,
            warp_size: 32,
            max_threads_per_block: 1024,
            max_threads_per_sm: 2048,
            max_registers_per_thread: 255,
            registers_per_sm: 65_536,
            num_streaming_multiprocessors: 108,
            memory_bandwidth: 1.555e12,
            peak_flops: 78e12,
            peak_tensor_flops: 312e12,
            tensor_core: Some(FragmentShape::new(16, 16, 16)),
        }
    }

    /// NVIDIA V100, fp16.
    pub fn v100() -> Self {
        Self {
            name: "v100".into(),
            max_shared_memory_per_block: 98_304,
            max_shared_memory_per_sm: 98_304,
            warp_size: 32,
            max_threads_per_block: 1024,
            max_threads_per_sm: 2048,
            max_registers_per_thread: 255,
            registers_per_sm: 65_536,
            num_streaming_multiprocessors: 80,
            memory_bandwidth: 900e9,
            peak_flops: 31.4e12,
            peak_tensor_flops: 125e12,
            tensor_core: Some(FragmentShape::new(16, 16, 16)),
        }
    }

    /// NVIDIA RTX 3090, fp16.
    pub fn rtx3090() -> Self {
        Self {
            name: "rtx3090".into(),
            max_shared_memory_per_block: 101_376,
            max_shared_memory_per_sm: 102_400,
            warp_size: 32,
            max_threads_per_block: 1024,
            max_threads_per_sm: 1536,
            max_registers_per_thread: 255,
            registers_per_sm: 65_536,
            num_streaming_multiprocessors: 82,
            memory_bandwidth: 936e9,
            peak_flops: 35.6e12,
            peak_tensor_flops: 71e12,
            tensor_core: Some(FragmentShape::new(16, 16, 16)),
        }
    }
}

/// Builder validating a [HardwareProfile].
#[derive(Clone, Debug)]
pub struct HardwareProfileBuilder {
    profile: HardwareProfile,
}

impl HardwareProfileBuilder {
    fn new(name: impl Into<String>) -> Self {
        let mut profile = HardwareProfile::a100();
        profile.name = name.into();
        profile.tensor_core = None;
        profile.peak_tensor_flops = 0.0;
        Self { profile }
    }

    pub fn shared_memory(mut self, per_block: usize, per_sm: usize) -> Self {
        self.profile.max_shared_memory_per_block = per_block;
        self.profile.max_shared_memory_per_sm = per_sm;
        self
    }

    pub fn warp_size(mut self, warp_size: u32) -> Self {
        self.profile.warp_size = warp_size;
        self
    }

    pub fn threads(mut self, per_block: u32, per_sm: u32) -> Self {
        self.profile.max_threads_per_block = per_block;
        self.profile.max_threads_per_sm = per_sm;
        self
    }

    pub fn registers(mut self, per_thread: u32, per_sm: u32) -> Self {
        self.profile.max_registers_per_thread = per_thread;
        self.profile.registers_per_sm = per_sm;
        self
    }

    pub fn streaming_multiprocessors(mut self, count: u32) -> Self {
        self.profile.num_streaming_multiprocessors = count;
        self
    }

    pub fn memory_bandwidth(mut self, bytes_per_sec: f64) -> Self {
        self.profile.memory_bandwidth = bytes_per_sec;
        self
    }

    pub fn peak_flops(mut self, flops: f64) -> Self {
        self.profile.peak_flops = flops;
        self
    }

    /// Enable tensor cores with the given fragment and peak.
    pub fn tensor_core(mut self, fragment: FragmentShape, flops: f64) -> Self {
        self.profile.tensor_core = Some(fragment);
        self.profile.peak_tensor_flops = flops;
        self
    }

    /// Validate and return the profile.
    pub fn build(self) -> Result<HardwareProfile, GraphError> {
        validate(self.profile)
    }
}

fn validate(profile: HardwareProfile) -> Result<HardwareProfile, GraphError> {
    let fail = |reason: &str| {
        Err(GraphError::InvalidHardware {
            name: profile.name.clone(),
            reason: reason.to_string(),
        })
    };

    if profile.name.is_empty() {
        return fail("empty name");
    }
    if profile.warp_size == 0 || !profile.warp_size.is_power_of_two() {
        return fail("warp size must be a power of two");
    }
    if profile.max_threads_per_block < profile.warp_size
        || profile.max_threads_per_block % profile.warp_size != 0
    {
        return fail("threads per block must be a multiple of the warp size");
    }
    if profile.max_threads_per_sm < profile.max_threads_per_block {
        return fail("threads per SM must hold at least one block");
    }
    if profile.max_shared_memory_per_block == 0
        || profile.max_shared_memory_per_sm < profile.max_shared_memory_per_block
    {
        return fail("shared memory per SM must hold at least one block");
    }
    if profile.max_registers_per_thread == 0 || profile.registers_per_sm == 0 {
        return fail("no registers");
    }
    if profile.num_streaming_multiprocessors == 0 {
        return fail("no streaming multiprocessor");
    }
    let positive = |value: f64| value.is_finite() && value > 0.0;
    if !positive(profile.memory_bandwidth) || !positive(profile.peak_flops) {
        return fail("bandwidth and peak must be positive");
    }
    if profile.tensor_core.is_some() && !positive(profile.peak_tensor_flops) {
        return fail("tensor core peak must be positive");
    }

    Ok(profile)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn builder_validates_warp_size() {
        let err = HardwareProfile::builder("odd").warp_size(24).build().unwrap_err();

        assert!(matches!(err, GraphError::InvalidHardware { .. }));
    }

    #[test]
    fn builder_without_tensor_core_uses_regular_peak() {
        let profile = HardwareProfile::builder("simt")
            .peak_flops(10e12)
            .build()
            .unwrap();

        assert_eq!(profile.peak(true), 10e12);
        assert_eq!(profile.name(), "simt");
    }

    #[test]
    fn presets_are_valid() {
        for preset in [
            HardwareProfile::a100(),
            HardwareProfile::v100(),
            HardwareProfile::rtx3090(),
        ] {
            let fragment = preset.tensor_core().unwrap();
            let rebuilt = HardwareProfile::builder(preset.name())
                .shared_memory(
                    preset.max_shared_memory_per_block(),
                    preset.max_shared_memory_per_sm(),
                )
                .threads(preset.max_threads_per_block(), preset.max_threads_per_sm())
                .streaming_multiprocessors(preset.num_streaming_multiprocessors())
                .memory_bandwidth(preset.memory_bandwidth())
                .peak_flops(preset.peak(false))
                .tensor_core(fragment, preset.peak(true))
                .build()
                .unwrap();

            assert_eq!(rebuilt, preset);
        }
    }

    #[test]
    fn occupancy_limited_by_shared_memory() {
        let profile = HardwareProfile::a100();

        assert_eq!(profile.blocks_per_sm(128, 64 * 1024, 64), 2);
        assert_eq!(profile.blocks_per_sm(1024, 0, 32), 2);
    }

    #[test]
    fn deserialized_profiles_are_validated() {
        let profile = HardwareProfile::a100();
        let json = serde_json::to_string(&profile).unwrap();
        assert_eq!(
            serde_json::from_str::<HardwareProfile>(&json).unwrap(),
            profile
        );

        let mut zero_peak = serde_json::to_value(&profile).unwrap();
        zero_peak["peak_flops"] = serde_json::json!(0.0);
        let err = serde_json::from_value::<HardwareProfile>(zero_peak).unwrap_err();
        assert!(err.to_string().contains("peak must be positive"));
    }
}
