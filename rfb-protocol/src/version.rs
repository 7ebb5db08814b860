//! RFB protocol version strings.
//!
//! Both peers open a connection by exchanging a fixed 12-byte version
//! string of the form `RFB xxx.yyy\n`. The digits are zero-padded
//! decimal. Everything downstream of the exchange branches on the
//! agreed version, most visibly the security negotiation framing.

use std::fmt;

/// A parsed RFB protocol version.
///
/// Ordering is lexicographic on (major, minor), which matches how the
/// protocol compares versions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RfbVersion {
    pub major: u32,
    pub minor: u32,
}

impl RfbVersion {
    /// RFB 3.3 - legacy protocol; the server picks the security scheme.
    pub const V3_3: RfbVersion = RfbVersion { major: 3, minor: 3 };

    /// RFB 3.7 - client picks from a server list; no SecurityResult after None.
    pub const V3_7: RfbVersion = RfbVersion { major: 3, minor: 7 };

    /// RFB 3.8 - like 3.7 plus SecurityResult for every type and failure reasons.
    pub const V3_8: RfbVersion = RfbVersion { major: 3, minor: 8 };

    /// Parse a 12-byte wire version string.
    ///
    /// # Errors
    ///
    /// Returns an error if the buffer does not match `RFB xxx.yyy\n`
    /// with decimal digits in both positions.
    pub fn parse(buf: &[u8; 12]) -> std::io::Result<Self> {
        let invalid = || {
            std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!(
                    "invalid RFB version string: expected 'RFB xxx.yyy\\n', got {:?}",
                    String::from_utf8_lossy(buf)
                ),
            )
        };

        if &buf[0..4] != b"RFB " || buf[7] != b'.' || buf[11] != b'\n' {
            return Err(invalid());
        }

        let parse_digits = |bytes: &[u8]| -> Option<u32> {
            std::str::from_utf8(bytes).ok()?.parse().ok()
        };

        let major = parse_digits(&buf[4..7]).ok_or_else(invalid)?;
        let minor = parse_digits(&buf[8..11]).ok_or_else(invalid)?;

        Ok(Self { major, minor })
    }

    /// Format as the 12-byte wire string.
    pub fn to_wire(self) -> [u8; 12] {
        let s = format!("RFB {:03}.{:03}\n", self.major, self.minor);
        let mut buf = [0u8; 12];
        buf.copy_from_slice(s.as_bytes());
        buf
    }

    /// True for versions before 3.7, which use the server-chosen
    /// security scheme instead of a type list.
    pub fn is_legacy(&self) -> bool {
        *self < Self::V3_7
    }

    /// True when this version is at least `major.minor`.
    pub fn at_least(&self, major: u32, minor: u32) -> bool {
        *self >= RfbVersion { major, minor }
    }
}

impl fmt::Display for RfbVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}
