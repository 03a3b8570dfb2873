//! Handlers for peer-initiated read and write transactions.
//!
//! Each handler runs on the stack's callback thread, resolves the target
//! attribute through the handle index, performs the access under the
//! attribute's own lock, responds if the transaction demands one, and fires
//! the attribute's completion hook with no lock held.

use log::warn;

use crate::gatt::ids::{ConnectionId, TransactionId};
use crate::gatt::stack::{AttStatus, AttributeData, GattStack, StackEvent};

use super::attribute::AccessKind;
use super::registry::ServiceRegistry;

/// Serve one read fragment. The hook fires only once the final fragment of
/// the logical read has been served.
pub(crate) fn handle_read(stack: &dyn GattStack, registry: &ServiceRegistry, event: &StackEvent) {
    let StackEvent::Read { conn, trans, handle, offset, needs_response } = *event else {
        return;
    };
    let Some(attribute) = registry.attribute_by_handle(handle) else {
        warn!("read for unknown handle {handle:?}, ignoring");
        return;
    };
    let (value, finished) = attribute.read_chunk(offset as usize, registry.mtu() as usize);
    if needs_response {
        let data = AttributeData { handle, offset, value };
        if let Err(e) = stack.send_response(conn, trans, AttStatus::Ok, Some(data)) {
            warn!("failed to respond to read on {handle:?}: {e}");
        }
    }
    if finished {
        attribute.invoke_hook(AccessKind::Read);
    }
}

/// Apply one write fragment. Prepared (staged) fragments are applied in
/// place like any other; the hook fires once per physical fragment.
pub(crate) fn handle_write(stack: &dyn GattStack, registry: &ServiceRegistry, event: &StackEvent) {
    let StackEvent::Write { conn, trans, handle, offset, ref value, needs_response, .. } = *event
    else {
        return;
    };
    let Some(attribute) = registry.attribute_by_handle(handle) else {
        warn!("write for unknown handle {handle:?}, ignoring");
        return;
    };
    let status = match attribute.write_at(offset as usize, value) {
        Ok(()) => AttStatus::Ok,
        Err(status) => {
            warn!(
                "rejecting write of {} bytes at offset {offset} on {handle:?}",
                value.len()
            );
            status
        }
    };
    if needs_response {
        if let Err(e) = stack.send_response(conn, trans, status, None) {
            warn!("failed to respond to write on {handle:?}: {e}");
        }
    }
    if status == AttStatus::Ok {
        attribute.invoke_hook(AccessKind::Write);
    }
}

/// Acknowledge the commit (or cancel) of a long-write sequence. Staged
/// fragments were already applied as they arrived, so there is nothing left
/// to do beyond the acknowledgement.
pub(crate) fn handle_execute_write(
    stack: &dyn GattStack,
    conn: ConnectionId,
    trans: TransactionId,
) {
    if let Err(e) = stack.send_response(conn, trans, AttStatus::Ok, None) {
        warn!("failed to acknowledge execute-write on {conn:?}: {e}");
    }
}

#[cfg(test)]
mod test {
    use super::*;

    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use crate::core::uuid::Uuid;
    use crate::gatt::ids::AttHandle;
    use crate::gatt::mocks::mock_stack::{MockStack, StackCommand};
    use crate::gatt::server::attribute::{AttPermissions, Attribute, CharacteristicProperties};

    const UUID: Uuid = Uuid::new(0x2A4B);
    const CONN: ConnectionId = ConnectionId(1);
    const TRANS: TransactionId = TransactionId(7);
    const HANDLE: AttHandle = AttHandle(40);

    fn registry_with(attribute: Attribute) -> (ServiceRegistry, Arc<Attribute>) {
        let registry = ServiceRegistry::default();
        let attribute = Arc::new(attribute);
        registry.index_attribute(HANDLE, attribute.clone());
        (registry, attribute)
    }

    fn read_event(offset: u16) -> StackEvent {
        StackEvent::Read { conn: CONN, trans: TRANS, handle: HANDLE, offset, needs_response: true }
    }

    fn write_event(offset: u16, value: &[u8], prepared: bool) -> StackEvent {
        StackEvent::Write {
            conn: CONN,
            trans: TRANS,
            handle: HANDLE,
            offset,
            value: value.to_vec(),
            prepared,
            needs_response: true,
        }
    }

    #[test]
    fn test_long_read_responds_per_fragment_and_hooks_once() {
        // arrange: a 100-byte attribute read through the default transfer unit
        let stack = MockStack::new();
        let reads = Arc::new(AtomicUsize::new(0));
        let hook_reads = reads.clone();
        let (registry, _) = registry_with(
            Attribute::characteristic(
                UUID,
                AttPermissions::READABLE,
                CharacteristicProperties::READ,
                100,
                &[0xAA; 100],
            )
            .with_hook(Arc::new(move |kind, _| {
                if kind == AccessKind::Read {
                    hook_reads.fetch_add(1, Ordering::SeqCst);
                }
            })),
        );

        // act: the peer issues the five fragments of the long read
        for offset in [0u16, 22, 44, 66, 88] {
            handle_read(&stack, &registry, &read_event(offset));
        }

        // assert: one OK response per fragment, sized 22,22,22,22,12; the
        // completion hook fired only on the final fragment
        let sizes: Vec<usize> = stack
            .take_commands()
            .into_iter()
            .map(|command| match command {
                StackCommand::SendResponse { status: AttStatus::Ok, data: Some(data), .. } => {
                    data.value.len()
                }
                other => panic!("unexpected command {other:?}"),
            })
            .collect();
        assert_eq!(sizes, vec![22, 22, 22, 22, 12]);
        assert_eq!(reads.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_read_for_unknown_handle_is_ignored() {
        let stack = MockStack::new();
        let registry = ServiceRegistry::default();

        handle_read(&stack, &registry, &read_event(0));

        assert_eq!(stack.take_commands(), vec![]);
    }

    #[test]
    fn test_write_applies_fragment_and_fires_hook() {
        let stack = MockStack::new();
        let writes = Arc::new(AtomicUsize::new(0));
        let hook_writes = writes.clone();
        let (registry, attribute) = registry_with(
            Attribute::characteristic(
                UUID,
                AttPermissions::WRITABLE,
                CharacteristicProperties::WRITE,
                8,
                &[],
            )
            .with_hook(Arc::new(move |kind, _| {
                if kind == AccessKind::Write {
                    hook_writes.fetch_add(1, Ordering::SeqCst);
                }
            })),
        );

        handle_write(&stack, &registry, &write_event(0, &[1, 2, 3], false));

        assert_eq!(
            stack.take_commands(),
            vec![StackCommand::SendResponse {
                conn: CONN,
                trans: TRANS,
                status: AttStatus::Ok,
                data: None
            }]
        );
        assert_eq!(attribute.snapshot_value(), vec![1, 2, 3]);
        assert_eq!(writes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_prepared_write_fragments_each_fire_hook() {
        // arrange
        let stack = MockStack::new();
        let writes = Arc::new(AtomicUsize::new(0));
        let hook_writes = writes.clone();
        let (registry, attribute) = registry_with(
            Attribute::characteristic(
                UUID,
                AttPermissions::WRITABLE,
                CharacteristicProperties::WRITE,
                40,
                &[],
            )
            .with_hook(Arc::new(move |kind, _| {
                if kind == AccessKind::Write {
                    hook_writes.fetch_add(1, Ordering::SeqCst);
                }
            })),
        );

        // act: two staged fragments followed by the commit
        handle_write(&stack, &registry, &write_event(0, &[0x11; 18], true));
        handle_write(&stack, &registry, &write_event(18, &[0x22; 18], true));
        handle_execute_write(&stack, CONN, TRANS);

        // assert: fragments were applied in place, each acknowledged, and the
        // commit acknowledged with no further mutation
        assert_eq!(attribute.len(), 36);
        let mut expected = vec![0x11; 18];
        expected.extend_from_slice(&[0x22; 18]);
        assert_eq!(attribute.snapshot_value(), expected);
        assert_eq!(writes.load(Ordering::SeqCst), 2);
        let responses = stack.take_commands();
        assert_eq!(responses.len(), 3);
        assert!(responses.iter().all(|command| matches!(
            command,
            StackCommand::SendResponse { status: AttStatus::Ok, data: None, .. }
        )));
    }

    #[test]
    fn test_out_of_bounds_write_responds_with_error_and_skips_hook() {
        let stack = MockStack::new();
        let writes = Arc::new(AtomicUsize::new(0));
        let hook_writes = writes.clone();
        let (registry, attribute) = registry_with(
            Attribute::characteristic(
                UUID,
                AttPermissions::WRITABLE,
                CharacteristicProperties::WRITE,
                100,
                &[0xAA; 100],
            )
            .with_hook(Arc::new(move |_, _| {
                hook_writes.fetch_add(1, Ordering::SeqCst);
            })),
        );

        handle_write(&stack, &registry, &write_event(95, &[0; 10], false));

        assert_eq!(
            stack.take_commands(),
            vec![StackCommand::SendResponse {
                conn: CONN,
                trans: TRANS,
                status: AttStatus::InvalidAttributeLength,
                data: None
            }]
        );
        assert_eq!(attribute.snapshot_value(), vec![0xAA; 100]);
        assert_eq!(writes.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_write_for_unknown_handle_is_ignored() {
        let stack = MockStack::new();
        let registry = ServiceRegistry::default();

        handle_write(&stack, &registry, &write_event(0, &[1], false));

        assert_eq!(stack.take_commands(), vec![]);
    }
}
