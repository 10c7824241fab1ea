use serde::{Deserialize, Serialize};

/// Modifier flags attached to a keypress, as sent by clients.
///
/// `bitmask` follows the Chrome DevTools Protocol encoding:
/// Alt=1, Ctrl=2, Meta=4, Shift=8.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct KeyModifiers {
    #[serde(default)]
    pub ctrl: bool,
    #[serde(default)]
    pub alt: bool,
    #[serde(default)]
    pub shift: bool,
    #[serde(default)]
    pub meta: bool,
}

impl KeyModifiers {
    pub fn bitmask(&self) -> i32 {
        let mut m = 0i32;
        if self.alt {
            m |= 1;
        }
        if self.ctrl {
            m |= 2;
        }
        if self.meta {
            m |= 4;
        }
        if self.shift {
            m |= 8;
        }
        m
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bitmask_encoding() {
        let m = KeyModifiers {
            ctrl: true,
            shift: true,
            ..Default::default()
        };
        assert_eq!(m.bitmask(), 2 | 8);
        assert_eq!(KeyModifiers::default().bitmask(), 0);
    }

    #[test]
    fn test_deserialize_partial_flags() {
        let m: KeyModifiers = serde_json::from_str(r#"{"ctrl": true}"#).unwrap();
        assert!(m.ctrl);
        assert!(!m.shift);
    }
}
