use crate::session::{Field, SessionConfig, SessionDraft};
use std::net::Ipv4Addr;
use thiserror::Error;

/// First rule a draft violated. Only one is ever reported.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Invalid '{}': expected an IPv4 address like 192.168.1.10", .0.label())]
    InvalidAddress(Field),
    #[error("Invalid '{}': port must be an integer in 0-65535", .0.label())]
    PortOutOfRange(Field),
    #[error("'{}' is required", .0.label())]
    Required(Field),
}

impl ValidationError {
    pub fn field(&self) -> Field {
        match self {
            ValidationError::InvalidAddress(f)
            | ValidationError::PortOutOfRange(f)
            | ValidationError::Required(f) => *f,
        }
    }
}

/// Checks a draft in form order and returns the typed snapshot.
pub fn validate(draft: &SessionDraft) -> Result<SessionConfig, ValidationError> {
    let local_address = parse_ipv4(&draft.local_address, Field::LocalAddress)?;
    let local_port = parse_port(&draft.local_port, Field::LocalPort)?;
    let remote_address = parse_ipv4(&draft.remote_address, Field::RemoteAddress)?;
    let remote_port = parse_port(&draft.remote_port, Field::RemotePort)?;
    if draft.user.is_empty() {
        return Err(ValidationError::Required(Field::User));
    }
    if draft.password.is_empty() {
        return Err(ValidationError::Required(Field::Password));
    }

    Ok(SessionConfig {
        local_address: local_address.to_string(),
        local_port,
        remote_address: remote_address.to_string(),
        remote_port,
        user: draft.user.clone(),
        password: draft.password.clone(),
    })
}

// std's parser already enforces four decimal octets, 0-255, no leading zeros.
fn parse_ipv4(text: &str, field: Field) -> Result<Ipv4Addr, ValidationError> {
    text.parse::<Ipv4Addr>()
        .map_err(|_| ValidationError::InvalidAddress(field))
}

// Plain decimal digits only: no sign, no whitespace, at most five digits,
// and a five digit port may not start with zero.
fn parse_port(text: &str, field: Field) -> Result<u16, ValidationError> {
    let digits_only = !text.is_empty() && text.bytes().all(|b| b.is_ascii_digit());
    let padded_five = text.len() == 5 && text.starts_with('0');
    if !digits_only || text.len() > 5 || padded_five {
        return Err(ValidationError::PortOutOfRange(field));
    }
    text.parse::<u16>()
        .map_err(|_| ValidationError::PortOutOfRange(field))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn good_draft() -> SessionDraft {
        SessionDraft {
            local_address: "127.0.0.1".to_string(),
            local_port: "5678".to_string(),
            remote_address: "10.0.0.5".to_string(),
            remote_port: "22".to_string(),
            user: "root".to_string(),
            password: "x".to_string(),
        }
    }

    #[test]
    fn accepts_reference_config() {
        let config = validate(&good_draft()).unwrap();
        assert_eq!(config.local_port, 5678);
        assert_eq!(config.remote_address, "10.0.0.5");
        assert_eq!(config.remote_port, 22);
    }

    #[test]
    fn rejects_local_port_above_range() {
        let mut draft = good_draft();
        draft.local_port = "70000".to_string();
        let err = validate(&draft).unwrap_err();
        assert_eq!(err, ValidationError::PortOutOfRange(Field::LocalPort));
        assert!(err.to_string().contains("0-65535"));
    }

    #[test]
    fn empty_user_is_required() {
        let mut draft = good_draft();
        draft.user.clear();
        let err = validate(&draft).unwrap_err();
        assert_eq!(err.field(), Field::User);
        assert!(err.to_string().contains("required"));
    }

    #[test]
    fn empty_password_is_required() {
        let mut draft = good_draft();
        draft.password.clear();
        assert_eq!(
            validate(&draft).unwrap_err(),
            ValidationError::Required(Field::Password)
        );
    }

    #[test]
    fn port_bounds_are_inclusive() {
        let mut draft = good_draft();
        draft.local_port = "0".to_string();
        draft.remote_port = "65535".to_string();
        let config = validate(&draft).unwrap();
        assert_eq!(config.local_port, 0);
        assert_eq!(config.remote_port, 65535);
    }

    #[test]
    fn only_first_failure_is_reported() {
        let mut draft = good_draft();
        draft.local_address = "localhost".to_string();
        draft.remote_port = "99999".to_string();
        draft.user.clear();
        assert_eq!(
            validate(&draft).unwrap_err(),
            ValidationError::InvalidAddress(Field::LocalAddress)
        );
    }

    #[test]
    fn rejects_malformed_addresses() {
        for bad in ["", "1.2.3", "1.2.3.4.5", "01.2.3.4", "1.2.3.x", " 1.2.3.4", "1..3.4"] {
            let mut draft = good_draft();
            draft.remote_address = bad.to_string();
            assert_eq!(
                validate(&draft).unwrap_err(),
                ValidationError::InvalidAddress(Field::RemoteAddress),
                "{bad:?} should be rejected"
            );
        }
    }

    #[test]
    fn rejects_malformed_ports() {
        for bad in ["", "-1", "+22", "2 2", "65536", "00022", "abc"] {
            let mut draft = good_draft();
            draft.remote_port = bad.to_string();
            assert_eq!(
                validate(&draft).unwrap_err(),
                ValidationError::PortOutOfRange(Field::RemotePort),
                "{bad:?} should be rejected"
            );
        }
    }

    #[test]
    fn short_zero_padded_ports_are_accepted() {
        let mut draft = good_draft();
        draft.remote_port = "0022".to_string();
        assert_eq!(validate(&draft).unwrap().remote_port, 22);
    }

    proptest! {
        #[test]
        fn octet_above_255_is_rejected(
            octets in prop::array::uniform3(0u16..=255),
            big in 256u32..100_000,
            pos in 0usize..4,
        ) {
            let mut parts: Vec<String> = octets.iter().map(|o| o.to_string()).collect();
            parts.insert(pos, big.to_string());
            let mut draft = good_draft();
            draft.local_address = parts.join(".");
            prop_assert_eq!(
                validate(&draft).unwrap_err(),
                ValidationError::InvalidAddress(Field::LocalAddress)
            );
        }

        #[test]
        fn non_numeric_segment_is_rejected(
            octets in prop::array::uniform3(0u16..=255),
            word in "[a-zA-Z]{1,4}",
            pos in 0usize..4,
        ) {
            let mut parts: Vec<String> = octets.iter().map(|o| o.to_string()).collect();
            parts.insert(pos, word);
            let mut draft = good_draft();
            draft.remote_address = parts.join(".");
            prop_assert_eq!(
                validate(&draft).unwrap_err(),
                ValidationError::InvalidAddress(Field::RemoteAddress)
            );
        }

        #[test]
        fn any_in_range_port_is_accepted(port in 0u32..=65535) {
            let mut draft = good_draft();
            draft.local_port = port.to_string();
            prop_assert_eq!(u32::from(validate(&draft).unwrap().local_port), port);
        }

        #[test]
        fn any_out_of_range_port_is_rejected(port in 65536u64..10_000_000_000) {
            let mut draft = good_draft();
            draft.remote_port = port.to_string();
            prop_assert_eq!(
                validate(&draft).unwrap_err(),
                ValidationError::PortOutOfRange(Field::RemotePort)
            );
        }
    }
}
