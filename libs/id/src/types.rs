//! Typed ID definitions.

use crate::define_id;

define_id!(
    /// Correlates a request on the bus with its reply inbox.
    RequestId,
    "req"
);

define_id!(
    /// Identity of a binding handle; distinct from the owning instance's id.
    BindingId,
    "bind"
);

define_id!(
    /// One orphan-reconciliation sweep (stage + confirm).
    SweepId,
    "swp"
);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::IdError;
    use proptest::prelude::*;

    #[test]
    fn test_roundtrip_through_string() {
        let id = BindingId::new();
        let s = id.to_string();
        assert!(s.starts_with("bind_"));
        assert_eq!(s.parse::<BindingId>().unwrap(), id);
    }

    #[test]
    fn test_rejects_foreign_prefix() {
        let sweep = SweepId::new().to_string();
        let err = sweep.parse::<RequestId>().unwrap_err();
        assert!(err.is_prefix_error());
    }

    #[test]
    fn test_rejects_malformed() {
        assert_eq!(RequestId::parse(""), Err(IdError::Empty));
        assert_eq!(
            RequestId::parse("req01HV4Z2WQXKJNM8GPQY6VBKC3D"),
            Err(IdError::MissingSeparator)
        );
        assert!(matches!(
            RequestId::parse("req_not-a-ulid"),
            Err(IdError::InvalidUlid(_))
        ));
    }

    #[test]
    fn test_serde_uses_string_form() {
        let id = RequestId::new();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{id}\""));
        let back: RequestId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn test_ids_sort_by_creation() {
        let first = SweepId::new();
        std::thread::sleep(std::time::Duration::from_millis(2));
        let second = SweepId::new();
        assert!(first < second);
        assert!(first.timestamp_ms() <= second.timestamp_ms());
    }

    proptest! {
        #[test]
        fn parse_never_panics(s in "\\PC*") {
            let _ = BindingId::parse(&s);
        }
    }
}
