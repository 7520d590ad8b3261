use crate::device::DeviceProfile;

const RAM_CEILING_GB: f64 = 64.0;
const VRAM_CEILING_GB: f64 = 24.0;
const CPU_CEILING_CORES: f64 = 16.0;
const DISK_CEILING_GB: f64 = 1024.0;

const RAM_WEIGHT: f64 = 0.40;
const GPU_WEIGHT: f64 = 0.30;
const CPU_WEIGHT: f64 = 0.20;
const DISK_WEIGHT: f64 = 0.10;

pub const MIN_CPU_CORES: u32 = 2;
pub const MIN_RAM_GB: f64 = 4.0;
pub const MIN_DISK_GB: f64 = 100.0;

/// Map `value` onto 0..=100 against `ceiling`. Each term is capped before
/// weighting so a single outlier dimension cannot exceed its weight.
fn normalize(value: f64, ceiling: f64) -> f64 {
    if !value.is_finite() || value <= 0.0 {
        return 0.0;
    }
    (value / ceiling * 100.0).min(100.0)
}

/// Capability score in `[0, 100]`: 40% RAM, 30% GPU, 20% CPU, 10% disk.
pub fn score(profile: &DeviceProfile) -> f64 {
    let ram = normalize(profile.ram.total_gb, RAM_CEILING_GB);
    let gpu = normalize(profile.usable_vram_gb(), VRAM_CEILING_GB);
    let cpu = normalize(f64::from(profile.cpu.cores), CPU_CEILING_CORES);
    let disk = normalize(profile.disk.total_gb, DISK_CEILING_GB);

    let total = ram * RAM_WEIGHT + gpu * GPU_WEIGHT + cpu * CPU_WEIGHT + disk * DISK_WEIGHT;
    total.clamp(0.0, 100.0)
}

/// Advisory minimum for hosting any part of the stack. Callers log and proceed.
pub fn meets_minimum(profile: &DeviceProfile) -> bool {
    profile.cpu.cores >= MIN_CPU_CORES
        && profile.ram.total_gb >= MIN_RAM_GB
        && profile.disk.total_gb >= MIN_DISK_GB
}
