//! Opaque task identifiers: a cryptographically-generated token, not a
//! sequential identifier.

use rand::RngCore;
use uuid::Uuid;

/// Generates a task id from an OS-backed CSPRNG rather than `Uuid::new_v4`'s
/// default thread-local generator, so the id space can't be influenced by
/// anything but the kernel's entropy pool.
pub fn new_task_id() -> Uuid {
    let mut bytes = [0u8; 16];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    // Stamp the UUIDv4 version/variant bits so the value still round-trips
    // through the `uuid` crate's usual parsing and display as a valid v4.
    bytes[6] = (bytes[6] & 0x0f) | 0x40;
    bytes[8] = (bytes[8] & 0x3f) | 0x80;
    Uuid::from_bytes(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generates_distinct_ids() {
        let a = new_task_id();
        let b = new_task_id();
        assert_ne!(a, b);
    }

    #[test]
    fn sets_uuid_v4_version_and_variant_bits() {
        let id = new_task_id();
        assert_eq!(id.get_version_num(), 4);
    }
}
