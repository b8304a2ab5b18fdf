use bytes::{Bytes, BytesMut};

/// One capture batch: an immutable, reference-counted byte region shared by
/// every packet sliced out of it.
///
/// The arena is never mutated after creation. It stays alive for as long as
/// any [`Payload`] slice over it exists.
#[derive(Debug, Clone)]
pub struct Arena {
    bytes: Bytes,
}

impl Arena {
    pub fn new(bytes: Bytes) -> Self {
        Self { bytes }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Returns a zero-copy slice over `[offset, offset + len)`.
    ///
    /// # Panics
    /// Panics if the range falls outside the arena.
    pub fn slice(&self, offset: usize, len: usize) -> Payload {
        assert!(
            offset + len <= self.bytes.len(),
            "slice out of arena bounds: {}..{} > {}",
            offset,
            offset + len,
            self.bytes.len()
        );

        Payload {
            repr: Repr::Shared { arena: self.bytes.clone(), offset, len },
        }
    }
}

impl From<Vec<u8>> for Arena {
    fn from(bytes: Vec<u8>) -> Self {
        Self::new(Bytes::from(bytes))
    }
}

impl From<BytesMut> for Arena {
    fn from(bytes: BytesMut) -> Self {
        Self::new(bytes.freeze())
    }
}

/// A copy-on-write slice of packet bytes.
///
/// A payload starts out *shared*: a reference-counted view into the capture
/// [`Arena`], created without copying. Mutation goes through [`make_mut`],
/// which either reclaims the buffer when this payload is the sole
/// outstanding handle, or detaches the region into a privately owned buffer.
/// Detached payloads no longer share an arena with anything, which the
/// engine's contiguous-write batching relies on.
///
/// [`make_mut`]: Payload::make_mut
#[derive(Debug, Clone)]
pub struct Payload {
    repr: Repr,
}

#[derive(Debug, Clone)]
enum Repr {
    Shared { arena: Bytes, offset: usize, len: usize },
    Owned(BytesMut),
}

impl Payload {
    pub fn len(&self) -> usize {
        match &self.repr {
            Repr::Shared { len, .. } => *len,
            Repr::Owned(buf) => buf.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether `self` and `other` are slices of the same arena.
    ///
    /// This is the identity the engine uses to detect runs of records that
    /// can be re-injected with a single write. Owned (detached) payloads
    /// share an arena with nothing, themselves included.
    pub fn same_arena(&self, other: &Self) -> bool {
        match (&self.repr, &other.repr) {
            (Repr::Shared { arena: a, .. }, Repr::Shared { arena: b, .. }) => {
                a.as_ptr() == b.as_ptr() && a.len() == b.len()
            }
            _ => false,
        }
    }

    /// Byte offset of this slice within its arena. Owned payloads report 0.
    pub fn offset(&self) -> usize {
        match &self.repr {
            Repr::Shared { offset, .. } => *offset,
            Repr::Owned(_) => 0,
        }
    }

    /// Offset one past the last byte of this slice within its arena.
    pub fn end_offset(&self) -> usize {
        self.offset() + self.len()
    }

    /// Returns a mutable view of the payload bytes, copy-on-write.
    ///
    /// If this payload is the only handle over its arena the buffer is
    /// reclaimed in place; otherwise the region is copied into an owned
    /// buffer first. Either way the payload is detached from the shared
    /// arena afterwards.
    pub fn make_mut(&mut self) -> &mut [u8] {
        if let Repr::Shared { arena, offset, len } = &mut self.repr {
            let owned = if *offset == 0 && *len == arena.len() {
                match std::mem::take(arena).try_into_mut() {
                    Ok(buf) => buf,
                    Err(shared) => BytesMut::from(&shared[..]),
                }
            } else {
                BytesMut::from(&arena[*offset..*offset + *len])
            };

            self.repr = Repr::Owned(owned);
        }

        match &mut self.repr {
            Repr::Owned(buf) => &mut buf[..],
            Repr::Shared { .. } => unreachable!("payload was just detached"),
        }
    }

    /// Returns a handle to the full backing arena region, or `None` for
    /// detached payloads.
    ///
    /// The engine uses this to issue one injection write covering a run of
    /// offset-adjacent slices.
    pub fn arena(&self) -> Option<Bytes> {
        match &self.repr {
            Repr::Shared { arena, .. } => Some(arena.clone()),
            Repr::Owned(_) => None,
        }
    }

    /// Consumes the payload into immutable bytes, without copying.
    pub fn into_bytes(self) -> Bytes {
        match self.repr {
            Repr::Shared { arena, offset, len } => arena.slice(offset..offset + len),
            Repr::Owned(buf) => buf.freeze(),
        }
    }
}

impl AsRef<[u8]> for Payload {
    fn as_ref(&self) -> &[u8] {
        match &self.repr {
            Repr::Shared { arena, offset, len } => &arena[*offset..*offset + *len],
            Repr::Owned(buf) => &buf[..],
        }
    }
}
