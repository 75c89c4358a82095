use std::time::Duration;

/// Initialization parameters for the device.
///
/// Keep this structure minimal. Add flags only when a concrete adapter
/// requirement exists.
#[derive(Debug, Clone)]
pub struct DeviceInit {
    /// Permit the software reference adapter when no hardware adapter qualifies.
    pub allow_software_fallback: bool,

    /// Check every barrier and resource use against the device's actual state.
    ///
    /// A mismatch removes the device.
    pub validation: bool,

    /// Artificial delay before each command list executes.
    ///
    /// Useful to make CPU/GPU ordering bugs deterministic in tests.
    pub simulated_latency: Option<Duration>,
}

impl Default for DeviceInit {
    fn default() -> Self {
        Self {
            allow_software_fallback: true,
            validation: cfg!(debug_assertions),
            simulated_latency: None,
        }
    }
}
