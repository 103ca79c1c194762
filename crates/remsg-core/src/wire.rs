//! Wire format shared with the remote processor.
//!
//! Everything here is little-endian and packed; both sides of the link
//! must agree on these layouts byte for byte. Fields are encoded and
//! decoded explicitly rather than by transmuting structs, so the format
//! is stable across platforms regardless of host endianness or padding.
//!
//! A datagram occupies one pool buffer:
//!
//! ```text
//! ┌──────┬───────┬──────┬──────┬──────────┬─────────────────┐
//! │ len  │ flags │ src  │ dst  │ reserved │ payload         │
//! │ u16  │ u16   │ u32  │ u32  │ u32      │ len bytes       │
//! └──────┴───────┴──────┴──────┴──────────┴─────────────────┘
//! ```

/// Sentinel meaning "no address assigned yet". Never valid on the wire in
/// the `src` or `dst` of a sent message.
pub const ADDR_ANY: u32 = 0xffff_ffff;

/// Addresses below this are reserved for predefined services and are never
/// handed out by the dynamic allocator.
pub const RESERVED_ADDRESSES: u32 = 1024;

/// Well-known address of the name service on both sides of the link.
pub const NS_ADDR: u32 = 53;

/// Size of the datagram header in bytes.
pub const HDR_LEN: usize = 16;

/// Maximum service-name length on the wire, including the NUL terminator.
pub const NAME_LEN: usize = 32;

/// Size of a name-service announcement in bytes.
pub const NS_MSG_LEN: usize = NAME_LEN + 8;

/// `flags` bit 0 of a name-service message: set = destroy, clear = create.
pub const NS_DESTROY: u32 = 1;

/// Datagram header. `flags` and `reserved` must be zero on send.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MsgHeader {
    /// Payload byte count.
    pub len: u16,
    pub flags: u16,
    /// Source endpoint address.
    pub src: u32,
    /// Destination endpoint address.
    pub dst: u32,
    pub reserved: u32,
}

impl MsgHeader {
    pub fn new(len: u16, src: u32, dst: u32) -> Self {
        Self {
            len,
            flags: 0,
            src,
            dst,
            reserved: 0,
        }
    }

    pub fn to_bytes(&self) -> [u8; HDR_LEN] {
        let mut b = [0u8; HDR_LEN];
        b[0..2].copy_from_slice(&self.len.to_le_bytes());
        b[2..4].copy_from_slice(&self.flags.to_le_bytes());
        b[4..8].copy_from_slice(&self.src.to_le_bytes());
        b[8..12].copy_from_slice(&self.dst.to_le_bytes());
        b[12..16].copy_from_slice(&self.reserved.to_le_bytes());
        b
    }

    pub fn from_bytes(b: &[u8; HDR_LEN]) -> Self {
        Self {
            len: u16::from_le_bytes([b[0], b[1]]),
            flags: u16::from_le_bytes([b[2], b[3]]),
            src: u32::from_le_bytes([b[4], b[5], b[6], b[7]]),
            dst: u32::from_le_bytes([b[8], b[9], b[10], b[11]]),
            reserved: u32::from_le_bytes([b[12], b[13], b[14], b[15]]),
        }
    }
}

/// Name-service announcement: the remote advertises or revokes a named
/// service at a given address.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct NsMessage {
    /// Service name, NUL-padded.
    pub name: [u8; NAME_LEN],
    /// Address of the announced service on the sender's side.
    pub addr: u32,
    /// Bit 0: [`NS_DESTROY`].
    pub flags: u32,
}

impl NsMessage {
    /// Build a create announcement. Over-length names are truncated to
    /// `NAME_LEN - 1` bytes so the terminator always fits.
    pub fn create(name: &str, addr: u32) -> Self {
        Self {
            name: pack_name(name),
            addr,
            flags: 0,
        }
    }

    /// Build a destroy announcement for the same `(name, addr)` pair.
    pub fn destroy(name: &str, addr: u32) -> Self {
        Self {
            name: pack_name(name),
            addr,
            flags: NS_DESTROY,
        }
    }

    pub fn is_destroy(&self) -> bool {
        self.flags & NS_DESTROY != 0
    }

    /// The announced name as a string, up to the first NUL. Non-UTF-8
    /// bytes are replaced; the remote is not trusted to send clean names.
    pub fn name_str(&self) -> String {
        let end = self.name.iter().position(|&b| b == 0).unwrap_or(NAME_LEN);
        String::from_utf8_lossy(&self.name[..end]).into_owned()
    }

    pub fn to_bytes(&self) -> [u8; NS_MSG_LEN] {
        let mut b = [0u8; NS_MSG_LEN];
        b[..NAME_LEN].copy_from_slice(&self.name);
        b[NAME_LEN..NAME_LEN + 4].copy_from_slice(&self.addr.to_le_bytes());
        b[NAME_LEN + 4..].copy_from_slice(&self.flags.to_le_bytes());
        b
    }

    /// Decode an announcement. Returns `None` unless `b` is exactly
    /// [`NS_MSG_LEN`] bytes. The name is forcibly terminated at its last
    /// byte; the remote is not trusted to terminate it.
    pub fn from_bytes(b: &[u8]) -> Option<Self> {
        if b.len() != NS_MSG_LEN {
            return None;
        }
        let mut name = [0u8; NAME_LEN];
        name.copy_from_slice(&b[..NAME_LEN]);
        name[NAME_LEN - 1] = 0;
        Some(Self {
            name,
            addr: u32::from_le_bytes([b[32], b[33], b[34], b[35]]),
            flags: u32::from_le_bytes([b[36], b[37], b[38], b[39]]),
        })
    }
}

/// NUL-pad `name` into a wire name field, truncating at `NAME_LEN - 1`.
fn pack_name(name: &str) -> [u8; NAME_LEN] {
    let mut out = [0u8; NAME_LEN];
    let n = name.len().min(NAME_LEN - 1);
    out[..n].copy_from_slice(&name.as_bytes()[..n]);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_layout_is_little_endian() {
        let hdr = MsgHeader::new(4, 0x0400, 60);
        let b = hdr.to_bytes();
        assert_eq!(&b[0..2], &[4, 0]);
        assert_eq!(&b[2..4], &[0, 0]);
        assert_eq!(&b[4..8], &[0x00, 0x04, 0, 0]);
        assert_eq!(&b[8..12], &[60, 0, 0, 0]);
        assert_eq!(&b[12..16], &[0, 0, 0, 0]);
    }

    #[test]
    fn header_round_trips_byte_for_byte() {
        for (len, src, dst) in [
            (0u16, 0u32, 0u32),
            (4, 1024, 60),
            (496, 0xdead_beef, 0x0102_0304),
            (u16::MAX, u32::MAX - 1, 53),
        ] {
            let hdr = MsgHeader::new(len, src, dst);
            let b = hdr.to_bytes();
            assert_eq!(MsgHeader::from_bytes(&b), hdr);
            assert_eq!(MsgHeader::from_bytes(&b).to_bytes(), b);
        }
    }

    #[test]
    fn ns_message_round_trips() {
        let msg = NsMessage::create("echo", 42);
        let decoded = NsMessage::from_bytes(&msg.to_bytes()).unwrap();
        assert_eq!(decoded, msg);
        assert_eq!(decoded.name_str(), "echo");
        assert_eq!(decoded.addr, 42);
        assert!(!decoded.is_destroy());

        let msg = NsMessage::destroy("echo", 42);
        let decoded = NsMessage::from_bytes(&msg.to_bytes()).unwrap();
        assert!(decoded.is_destroy());
    }

    #[test]
    fn ns_message_rejects_wrong_length() {
        let msg = NsMessage::create("echo", 42).to_bytes();
        assert!(NsMessage::from_bytes(&msg[..NS_MSG_LEN - 1]).is_none());
        let mut long = msg.to_vec();
        long.push(0);
        assert!(NsMessage::from_bytes(&long).is_none());
    }

    #[test]
    fn ns_name_is_truncated_and_terminated() {
        let long = "a".repeat(NAME_LEN + 10);
        let msg = NsMessage::create(&long, 1);
        assert_eq!(msg.name[NAME_LEN - 1], 0);
        assert_eq!(msg.name_str().len(), NAME_LEN - 1);

        // An unterminated name straight off the wire is clamped too.
        let mut raw = [0x41u8; NS_MSG_LEN];
        raw[NAME_LEN..].copy_from_slice(&[0u8; 8]);
        let decoded = NsMessage::from_bytes(&raw).unwrap();
        assert_eq!(decoded.name_str().len(), NAME_LEN - 1);
    }
}
