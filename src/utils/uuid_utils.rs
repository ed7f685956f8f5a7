//! UUID generation helpers.

use uuid::Uuid;

/// Generates a new UUID v4.
///
/// Job ids and default instance identifiers are v4; the engine never
/// assumes time-ordering of ids.
#[must_use]
pub fn generate_uuid() -> Uuid {
    Uuid::new_v4()
}
