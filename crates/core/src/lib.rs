//! Shared primitives for the Gatehouse resource gateway.

/// Wire-level error envelope.
pub mod envelope;
/// UTC accounting-period math.
pub mod period;
/// Resource identifiers of the form `<resourceType>:<provider>`.
pub mod resource;

pub use resource::{ResourceId, ResourceIdParseError};

/// Seconds since the Unix epoch, saturating at zero for pre-epoch clocks.
pub fn unix_now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
