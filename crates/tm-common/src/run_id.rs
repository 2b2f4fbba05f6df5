//! Run identifiers.
//!
//! The process gets one ULID at first access; every population checkpoint and
//! log line of the same process can carry it. Ranking requests take a fresh
//! ULID each (`generate`).

use std::sync::LazyLock;

use ulid::Ulid;

static RUN_ID: LazyLock<String> = LazyLock::new(|| Ulid::new().to_string());

/// Process-level run ID; same value for the whole process lifetime.
#[inline]
pub fn get() -> &'static str {
    &RUN_ID
}

/// Fresh, time-ordered, 26-character ULID.
#[inline]
pub fn generate() -> String {
    Ulid::new().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn process_id_is_stable() {
        assert_eq!(get(), get());
        assert_eq!(get().len(), 26);
    }

    #[test]
    fn generated_ids_are_unique() {
        let a = generate();
        let b = generate();
        assert_ne!(a, b);
        assert_eq!(a.len(), 26);
    }
}
