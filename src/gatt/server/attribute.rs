//! The unit of addressable state: a characteristic or descriptor value with
//! its permissions, backing buffer, and per-attribute reader/writer lock.

use std::fmt;
use std::sync::{Arc, OnceLock, RwLock};

use bitflags::bitflags;

use crate::core::uuid::Uuid;
use crate::gatt::ids::AttHandle;
use crate::gatt::stack::AttStatus;

bitflags! {
    /// The access permissions declared for an attribute.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct AttPermissions: u8 {
        const READABLE = 1 << 0;
        const WRITABLE = 1 << 1;
        const WRITABLE_NO_RESPONSE = 1 << 2;
        const ENCRYPTION_REQUIRED = 1 << 3;
    }
}

bitflags! {
    /// The properties advertised in a characteristic declaration
    /// (bit values per Core Spec 5.3 Vol 3G 3.3.1.1).
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct CharacteristicProperties: u8 {
        const BROADCAST = 0x01;
        const READ = 0x02;
        const WRITE_NO_RESPONSE = 0x04;
        const WRITE = 0x08;
        const NOTIFY = 0x10;
        const INDICATE = 0x20;
    }
}

/// Whether an attribute backs a characteristic value or a descriptor.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AttributeKind {
    Characteristic,
    Descriptor,
}

/// The kind of access a completed transaction performed, as seen by the
/// attribute's completion hook.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AccessKind {
    Read,
    Write,
}

/// A completion hook invoked after a read or write transaction involving the
/// attribute has fully completed. Runs on the stack's callback thread with no
/// lock held, so it may freely re-inspect the attribute.
pub type AccessHook = Arc<dyn Fn(AccessKind, &Attribute) + Send + Sync>;

struct AttributeValue {
    /// Fixed-capacity backing storage, never resized after construction.
    data: Box<[u8]>,
    /// The logically valid prefix of `data`.
    len: usize,
}

/// The unit of addressable state in the attribute protocol.
pub struct Attribute {
    pub kind: AttributeKind,
    pub uuid: Uuid,
    pub permissions: AttPermissions,
    /// Declared properties; empty for descriptors.
    pub properties: CharacteristicProperties,
    value: RwLock<AttributeValue>,
    on_access: Option<AccessHook>,
    /// Unset until the stack confirms creation.
    handle: OnceLock<AttHandle>,
}

impl Attribute {
    /// A characteristic value attribute with `initial` occupying the valid
    /// prefix of a `max_len`-byte buffer.
    pub fn characteristic(
        uuid: Uuid,
        permissions: AttPermissions,
        properties: CharacteristicProperties,
        max_len: usize,
        initial: &[u8],
    ) -> Self {
        Self::new(AttributeKind::Characteristic, uuid, permissions, properties, max_len, initial)
    }

    /// A descriptor attribute. Descriptors carry no declared properties.
    pub fn descriptor(
        uuid: Uuid,
        permissions: AttPermissions,
        max_len: usize,
        initial: &[u8],
    ) -> Self {
        Self::new(
            AttributeKind::Descriptor,
            uuid,
            permissions,
            CharacteristicProperties::empty(),
            max_len,
            initial,
        )
    }

    fn new(
        kind: AttributeKind,
        uuid: Uuid,
        permissions: AttPermissions,
        properties: CharacteristicProperties,
        max_len: usize,
        initial: &[u8],
    ) -> Self {
        assert!(initial.len() <= max_len, "initial value exceeds declared capacity");
        let mut data = vec![0u8; max_len].into_boxed_slice();
        data[..initial.len()].copy_from_slice(initial);
        Self {
            kind,
            uuid,
            permissions,
            properties,
            value: RwLock::new(AttributeValue { data, len: initial.len() }),
            on_access: None,
            handle: OnceLock::new(),
        }
    }

    /// Attach a completion hook, builder-style.
    pub fn with_hook(mut self, hook: AccessHook) -> Self {
        self.on_access = Some(hook);
        self
    }

    /// The stack-assigned handle, if creation has been confirmed.
    pub fn handle(&self) -> Option<AttHandle> {
        self.handle.get().copied()
    }

    /// Record the stack-assigned handle. Returns false if one was already
    /// recorded (a duplicate addition event).
    pub(crate) fn assign_handle(&self, handle: AttHandle) -> bool {
        self.handle.set(handle).is_ok()
    }

    /// The capacity of the backing buffer.
    pub fn max_len(&self) -> usize {
        self.value.read().unwrap().data.len()
    }

    /// The length of the logically valid prefix.
    pub fn len(&self) -> usize {
        self.value.read().unwrap().len
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy out one response fragment starting at `offset`, bounded by the
    /// negotiated transfer unit (one byte of which is protocol overhead).
    /// The returned flag marks the final fragment of the logical read.
    pub fn read_chunk(&self, offset: usize, mtu: usize) -> (Vec<u8>, bool) {
        let value = self.value.read().unwrap();
        let start = offset.min(value.len);
        let chunk = (value.len - start).min(mtu.saturating_sub(1));
        let data = value.data[start..start + chunk].to_vec();
        (data, offset + chunk >= value.len)
    }

    /// Apply one write fragment at `offset`, extending the valid prefix.
    /// Rejects fragments that would overrun the fixed capacity, leaving the
    /// buffer untouched.
    pub fn write_at(&self, offset: usize, payload: &[u8]) -> Result<(), AttStatus> {
        let mut value = self.value.write().unwrap();
        let end = offset + payload.len();
        if end > value.data.len() {
            return Err(AttStatus::InvalidAttributeLength);
        }
        value.data[offset..end].copy_from_slice(payload);
        value.len = value.len.max(end);
        Ok(())
    }

    /// Replace the valid prefix wholesale (feature-side updates).
    pub fn set_value(&self, bytes: &[u8]) -> Result<(), AttStatus> {
        let mut value = self.value.write().unwrap();
        if bytes.len() > value.data.len() {
            return Err(AttStatus::InvalidAttributeLength);
        }
        value.data[..bytes.len()].copy_from_slice(bytes);
        value.len = bytes.len();
        Ok(())
    }

    /// A read-locked copy of the valid prefix.
    pub fn snapshot_value(&self) -> Vec<u8> {
        let value = self.value.read().unwrap();
        value.data[..value.len].to_vec()
    }

    /// Fire the completion hook, if any. Callers must not hold the value
    /// lock.
    pub(crate) fn invoke_hook(&self, kind: AccessKind) {
        if let Some(hook) = &self.on_access {
            hook(kind, self);
        }
    }
}

impl fmt::Debug for Attribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Attribute")
            .field("kind", &self.kind)
            .field("uuid", &self.uuid)
            .field("permissions", &self.permissions)
            .field("handle", &self.handle.get())
            .finish()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    const UUID: Uuid = Uuid::new(0x2A19);
    const MTU: usize = 23;

    fn readable_attribute(contents: &[u8]) -> Attribute {
        Attribute::characteristic(
            UUID,
            AttPermissions::READABLE,
            CharacteristicProperties::READ,
            contents.len(),
            contents,
        )
    }

    #[test]
    fn test_chunked_read_reassembles_original() {
        // arrange: 100 bytes of 0xAA behind the default transfer unit
        let attribute = readable_attribute(&[0xAA; 100]);
        let mut reassembled = vec![];
        let mut sizes = vec![];

        // act: read fragments until the attribute reports the final one
        let mut offset = 0;
        loop {
            let (chunk, done) = attribute.read_chunk(offset, MTU);
            offset += chunk.len();
            sizes.push(chunk.len());
            reassembled.extend(chunk);
            if done {
                break;
            }
        }

        // assert: ceil(100/22) fragments reconstruct the buffer exactly
        assert_eq!(sizes, vec![22, 22, 22, 22, 12]);
        assert_eq!(reassembled, vec![0xAA; 100]);
    }

    #[test]
    fn test_read_past_end_yields_empty_final_chunk() {
        let attribute = readable_attribute(&[1, 2, 3]);

        let (chunk, done) = attribute.read_chunk(10, MTU);

        assert!(chunk.is_empty());
        assert!(done);
    }

    #[test]
    fn test_write_within_capacity_extends_length() {
        let attribute = Attribute::characteristic(
            UUID,
            AttPermissions::WRITABLE,
            CharacteristicProperties::WRITE,
            10,
            &[9; 4],
        );

        attribute.write_at(2, &[7, 7, 7]).unwrap();

        assert_eq!(attribute.len(), 5);
        assert_eq!(attribute.snapshot_value(), vec![9, 9, 7, 7, 7]);
    }

    #[test]
    fn test_write_does_not_shrink_length() {
        let attribute = Attribute::characteristic(
            UUID,
            AttPermissions::WRITABLE,
            CharacteristicProperties::WRITE,
            10,
            &[1; 8],
        );

        attribute.write_at(0, &[2, 2]).unwrap();

        assert_eq!(attribute.len(), 8);
    }

    #[test]
    fn test_write_overrun_leaves_buffer_untouched() {
        let attribute = Attribute::characteristic(
            UUID,
            AttPermissions::WRITABLE,
            CharacteristicProperties::WRITE,
            100,
            &[0xAA; 100],
        );

        let result = attribute.write_at(95, &[0; 10]);

        assert_eq!(result, Err(AttStatus::InvalidAttributeLength));
        assert_eq!(attribute.snapshot_value(), vec![0xAA; 100]);
    }

    #[test]
    fn test_handle_assignment_is_single_shot() {
        let attribute = readable_attribute(&[0]);

        assert!(attribute.assign_handle(AttHandle(42)));
        assert!(!attribute.assign_handle(AttHandle(43)));
        assert_eq!(attribute.handle(), Some(AttHandle(42)));
    }

    #[test]
    fn test_concurrent_readers_see_untorn_snapshots() {
        // arrange: a writer cycles uniform patterns while readers snapshot
        let attribute = Arc::new(Attribute::characteristic(
            UUID,
            AttPermissions::READABLE | AttPermissions::WRITABLE,
            CharacteristicProperties::READ | CharacteristicProperties::WRITE,
            64,
            &[0; 64],
        ));
        let torn = Arc::new(AtomicUsize::new(0));

        // act
        let mut handles = vec![];
        for _ in 0..4 {
            let attribute = attribute.clone();
            let torn = torn.clone();
            handles.push(thread::spawn(move || {
                for _ in 0..1000 {
                    let snapshot = attribute.snapshot_value();
                    if snapshot.windows(2).any(|w| w[0] != w[1]) {
                        torn.fetch_add(1, Ordering::Relaxed);
                    }
                }
            }));
        }
        let writer = {
            let attribute = attribute.clone();
            thread::spawn(move || {
                for i in 0..1000u32 {
                    attribute.set_value(&[(i % 251) as u8; 64]).unwrap();
                }
            })
        };
        for handle in handles {
            handle.join().unwrap();
        }
        writer.join().unwrap();

        // assert: every snapshot was uniform
        assert_eq!(torn.load(Ordering::Relaxed), 0);
    }
}
