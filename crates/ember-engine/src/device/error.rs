/// Device-level failures.
///
/// Every variant is fatal for the frame loop; callers propagate it to `main`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DeviceError {
    /// No hardware adapter was found and the software fallback is not permitted.
    #[error("no compatible adapter found and software fallback is not permitted")]
    NoCompatibleAdapter,

    /// The device faulted; every later submission and fence wait fails.
    #[error("device removed: {reason}")]
    Removed { reason: String },

    /// A resource description the device cannot allocate.
    #[error("invalid resource '{name}': {detail}")]
    InvalidResource { name: String, detail: String },
}
