pub mod platform;
pub mod probe;
pub mod range;
pub mod scan;

pub use platform::{GpuReport, HardwareReport, PlatformProbe};
pub use probe::{apply_stats, parse_capabilities, ProbeReport, ServiceProber, DEFAULT_PROBE_TIMEOUT};
pub use range::{AddressRange, RangeError};
pub use scan::{scan, ScanConfig};
