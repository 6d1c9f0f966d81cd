//! `application/x-www-form-urlencoded` body of the credential form.

use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Field name of the network selector.
pub const SSID_FIELD: &str = "ssid";
/// Field name of the security key input.
pub const PASSPHRASE_FIELD: &str = "ipass";

/// Decoded form fields, not yet validated.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct CredentialForm {
    pub ssid: String,
    pub passphrase: String,
}

impl fmt::Debug for CredentialForm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialForm")
            .field("ssid", &self.ssid)
            .field("passphrase", &"****")
            .finish()
    }
}

/// Malformed form body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FormError {
    /// Body had no token for this field.
    MissingField(&'static str),
    /// Token did not start with `<field>=`.
    UnexpectedField { expected: &'static str },
    /// Bad `%XX` escape.
    BadEscape,
    /// Decoded value is not UTF-8.
    NotUtf8,
}

impl fmt::Display for FormError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingField(name) => write!(f, "missing field '{}'", name),
            Self::UnexpectedField { expected } => write!(f, "expected field '{}'", expected),
            Self::BadEscape => write!(f, "malformed percent escape"),
            Self::NotUtf8 => write!(f, "field is not valid UTF-8"),
        }
    }
}

impl std::error::Error for FormError {}

/// Parse `ssid=<value>&ipass=<value>`.
///
/// The body is split on the first `&`. The first token must be the SSID
/// field, the second the passphrase field, which ends at the next `&` if
/// there is one. Trailing line breaks and NULs are ignored. Values are
/// percent-decoded with `+` as space.
pub fn parse_credential_form(body: &[u8]) -> Result<CredentialForm, FormError> {
    let body = trim_trailing(body);

    let (first, rest) = match body.iter().position(|&b| b == b'&') {
        Some(i) => (&body[..i], Some(&body[i + 1..])),
        None => (body, None),
    };

    if first.is_empty() {
        return Err(FormError::MissingField(SSID_FIELD));
    }
    let ssid = field_value(first, SSID_FIELD)?;

    let second = match rest {
        Some(rest) => match rest.iter().position(|&b| b == b'&') {
            Some(i) => &rest[..i],
            None => rest,
        },
        None => return Err(FormError::MissingField(PASSPHRASE_FIELD)),
    };
    if second.is_empty() {
        return Err(FormError::MissingField(PASSPHRASE_FIELD));
    }
    let passphrase = field_value(second, PASSPHRASE_FIELD)?;

    Ok(CredentialForm { ssid, passphrase })
}

fn trim_trailing(body: &[u8]) -> &[u8] {
    let end = body
        .iter()
        .rposition(|b| !matches!(b, b'\r' | b'\n' | b'\0'))
        .map_or(0, |i| i + 1);
    &body[..end]
}

fn field_value(token: &[u8], name: &'static str) -> Result<String, FormError> {
    let value = token
        .strip_prefix(name.as_bytes())
        .and_then(|rest| rest.strip_prefix(b"="))
        .ok_or(FormError::UnexpectedField { expected: name })?;
    percent_decode(value)
}

/// Decode `+` and `%XX` escapes.
pub fn percent_decode(input: &[u8]) -> Result<String, FormError> {
    let mut out = Vec::with_capacity(input.len());
    let mut i = 0;
    while i < input.len() {
        match input[i] {
            b'+' => out.push(b' '),
            b'%' => {
                let hi = input.get(i + 1).and_then(|&b| hex_value(b));
                let lo = input.get(i + 2).and_then(|&b| hex_value(b));
                match (hi, lo) {
                    (Some(hi), Some(lo)) => out.push((hi << 4) | lo),
                    _ => return Err(FormError::BadEscape),
                }
                i += 2;
            }
            b => out.push(b),
        }
        i += 1;
    }
    String::from_utf8(out).map_err(|_| FormError::NotUtf8)
}

fn hex_value(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'a'..=b'f' => Some(b - b'a' + 10),
        b'A'..=b'F' => Some(b - b'A' + 10),
        _ => None,
    }
}

#[cfg(feature = "tap-tests")]
mod tap_tests {
    use super::*;
    use wifi_provisioning_esp32_macros::tap_test;

    #[tap_test]
    fn form_parses_submitted_credential() {
        let form = parse_credential_form(b"ssid=lab-iot&ipass=IoT-IoT-IoT").unwrap();
        assert_eq!(form.ssid, "lab-iot");
        assert_eq!(form.passphrase, "IoT-IoT-IoT");
    }

    #[tap_test]
    fn form_rejects_missing_key() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        match parse_credential_form(b"ssid=lab-iot") {
            Err(FormError::MissingField(PASSPHRASE_FIELD)) => Ok(()),
            other => Err(format!("unexpected parse result: {:?}", other).into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_plain_form() {
        let form = parse_credential_form(b"ssid=lab-iot&ipass=IoT-IoT-IoT").unwrap();
        assert_eq!(form.ssid, "lab-iot");
        assert_eq!(form.passphrase, "IoT-IoT-IoT");
    }

    #[test]
    fn test_parse_missing_passphrase() {
        assert_eq!(
            parse_credential_form(b"ssid=lab-iot"),
            Err(FormError::MissingField("ipass"))
        );
        assert_eq!(
            parse_credential_form(b"ssid=lab-iot&"),
            Err(FormError::MissingField("ipass"))
        );
    }

    #[test]
    fn test_parse_empty_body() {
        assert_eq!(parse_credential_form(b""), Err(FormError::MissingField("ssid")));
    }

    #[test]
    fn test_parse_fields_out_of_order() {
        assert_eq!(
            parse_credential_form(b"ipass=IoT-IoT-IoT&ssid=lab-iot"),
            Err(FormError::UnexpectedField { expected: "ssid" })
        );
    }

    #[test]
    fn test_parse_wrong_second_field() {
        assert_eq!(
            parse_credential_form(b"ssid=lab-iot&password=x"),
            Err(FormError::UnexpectedField { expected: "ipass" })
        );
    }

    #[test]
    fn test_passphrase_ends_at_next_ampersand() {
        let form = parse_credential_form(b"ssid=lab-iot&ipass=abc&submit=Submit").unwrap();
        assert_eq!(form.passphrase, "abc");
    }

    #[test]
    fn test_trailing_newline_ignored() {
        let form = parse_credential_form(b"ssid=lab-iot&ipass=IoT-IoT-IoT\r\n").unwrap();
        assert_eq!(form.passphrase, "IoT-IoT-IoT");
    }

    #[test]
    fn test_percent_decoding() {
        let form = parse_credential_form(b"ssid=Caf%C3%A9+Wifi&ipass=a%26b%2Bc%25").unwrap();
        assert_eq!(form.ssid, "Caf\u{e9} Wifi");
        assert_eq!(form.passphrase, "a&b+c%");
    }

    #[test]
    fn test_bad_escape() {
        assert_eq!(percent_decode(b"abc%2"), Err(FormError::BadEscape));
        assert_eq!(percent_decode(b"%zz"), Err(FormError::BadEscape));
        assert_eq!(percent_decode(b"%ff"), Err(FormError::NotUtf8));
    }

    #[test]
    fn test_empty_values_pass_through() {
        let form = parse_credential_form(b"ssid=&ipass=x").unwrap();
        assert_eq!(form.ssid, "");
    }

    #[test]
    fn test_debug_masks_passphrase() {
        let form = parse_credential_form(b"ssid=lab-iot&ipass=IoT-IoT-IoT").unwrap();
        let debug = format!("{:?}", form);
        assert!(debug.contains("lab-iot"));
        assert!(!debug.contains("IoT-IoT-IoT"));
    }
}
