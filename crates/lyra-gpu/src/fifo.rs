//! Byte-granular SPSC command ring.
//!
//! Records are variable-length, header-prefixed and never straddle the end of
//! the arena: when the tail run is too small the producer writes a
//! [`kind::WRAPAROUND`] marker consuming the remainder and restarts at offset
//! zero. The consumer therefore always walks forward linearly until it meets
//! the write cursor or a marker.

use std::alloc::{alloc_zeroed, dealloc, Layout};
use std::mem;
use std::ptr;
use std::sync::atomic::{AtomicU32, Ordering};

use bytemuck::{Pod, Zeroable};

use crate::wake::WakeCoordinator;

/// Default command ring capacity in bytes.
pub const DEFAULT_FIFO_SIZE: u32 = 4 * 1024 * 1024;

/// Every record starts on a 4-byte boundary.
const RECORD_ALIGN: u32 = 4;
const ARENA_ALIGN: usize = 64;

/// Record kinds handled by the worker itself. Values at or above
/// [`lyra_gpu_device::FIRST_BACKEND_COMMAND_KIND`] belong to the backend.
pub(crate) mod kind {
    /// Skip marker; `size` covers the rest of the arena.
    pub const WRAPAROUND: u32 = 0;
    /// Owned callable run on the worker thread.
    pub const ASYNC_CALL: u32 = 1;
    /// Re-evaluate the requested renderer.
    pub const CHANGE_BACKEND: u32 = 2;
    /// Apply the requested vsync mode.
    pub const UPDATE_VSYNC: u32 = 3;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Pod, Zeroable)]
#[repr(C)]
pub(crate) struct RecordHeader {
    /// Total record size in bytes including this header, multiple of 4.
    pub size: u32,
    pub kind: u32,
}

pub(crate) const HEADER_SIZE: u32 = mem::size_of::<RecordHeader>() as u32;

#[repr(align(64))]
struct CacheLine<T>(T);

/// The ring arena plus its two cursors.
///
/// Exactly one thread advances `write_ptr` (the producer) and exactly one
/// advances `read_ptr` (the consumer). `read_ptr == write_ptr` means empty;
/// the producer keeps the cursors from meeting any other way.
pub(crate) struct CommandFifo {
    arena: *mut u8,
    capacity: u32,
    read_ptr: CacheLine<AtomicU32>,
    write_ptr: CacheLine<AtomicU32>,
}

// SAFETY: arena bytes are handed off between the two threads through the
// release/acquire cursor updates; a byte is only written by the producer
// before publication and only read by the consumer after it observed the
// publishing store.
unsafe impl Send for CommandFifo {}
unsafe impl Sync for CommandFifo {}

impl CommandFifo {
    pub fn new(capacity: u32) -> Self {
        assert!(
            capacity >= HEADER_SIZE * 2 && capacity % RECORD_ALIGN == 0,
            "invalid command ring capacity {capacity}"
        );
        let layout = Layout::from_size_align(capacity as usize, ARENA_ALIGN)
            .expect("command ring layout");
        // SAFETY: layout has non-zero size; allocation failure aborts below.
        let arena = unsafe { alloc_zeroed(layout) };
        assert!(!arena.is_null(), "failed to allocate command ring");
        Self {
            arena,
            capacity,
            read_ptr: CacheLine(AtomicU32::new(0)),
            write_ptr: CacheLine(AtomicU32::new(0)),
        }
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Bytes committed but not yet consumed.
    pub fn pending_size(&self) -> u32 {
        let read_ptr = self.read_ptr.0.load(Ordering::Relaxed);
        let write_ptr = self.write_ptr.0.load(Ordering::Relaxed);
        if write_ptr >= read_ptr {
            write_ptr - read_ptr
        } else {
            self.capacity - read_ptr + write_ptr
        }
    }

    /// Reserves a record and writes its header. Blocks (spinning, waking the
    /// consumer) while the ring is too full; never fails for any payload that
    /// can fit the arena at all.
    pub fn allocate(
        &self,
        kind: u32,
        payload_size: u32,
        wake: &WakeCoordinator,
    ) -> CommandSlot<'_> {
        let size = (HEADER_SIZE + payload_size + (RECORD_ALIGN - 1)) & !(RECORD_ALIGN - 1);
        assert!(
            size <= self.capacity - HEADER_SIZE,
            "command payload of {payload_size} bytes does not fit the ring"
        );

        loop {
            let read_ptr = self.read_ptr.0.load(Ordering::Acquire);
            let write_ptr = self.write_ptr.0.load(Ordering::Relaxed);

            if read_ptr > write_ptr {
                // The consumer is still draining the tail of the arena behind
                // us. Strict inequality keeps the cursors from meeting with
                // data in flight.
                if read_ptr - write_ptr > size {
                    unsafe { self.write_header(write_ptr, RecordHeader { size, kind }) };
                    return CommandSlot {
                        fifo: self,
                        offset: write_ptr,
                        size,
                    };
                }
                wake.wake_consumer();
                std::hint::spin_loop();
                continue;
            }

            let forward = self.capacity - write_ptr;
            if size + HEADER_SIZE > forward {
                if read_ptr == 0 {
                    // Resetting `write` to zero now would alias the empty
                    // state while [0, write) is still unread. Wait for the
                    // consumer to move off zero first.
                    wake.wake_consumer();
                    std::hint::spin_loop();
                    continue;
                }
                unsafe {
                    self.write_header(
                        write_ptr,
                        RecordHeader {
                            size: forward,
                            kind: kind::WRAPAROUND,
                        },
                    );
                }
                self.write_ptr.0.store(0, Ordering::Release);
                continue;
            }

            unsafe { self.write_header(write_ptr, RecordHeader { size, kind }) };
            return CommandSlot {
                fifo: self,
                offset: write_ptr,
                size,
            };
        }
    }

    /// Publishes `size` bytes previously reserved at the write cursor.
    fn publish(&self, size: u32) {
        let new_write = self.write_ptr.0.fetch_add(size, Ordering::Release) + size;
        debug_assert!(new_write <= self.capacity);
    }

    // Consumer side.

    pub fn acquire_write(&self) -> u32 {
        self.write_ptr.0.load(Ordering::Acquire)
    }

    pub fn read_pos(&self) -> u32 {
        self.read_ptr.0.load(Ordering::Relaxed)
    }

    pub fn store_read(&self, pos: u32) {
        self.read_ptr.0.store(pos, Ordering::Release);
    }

    pub fn header_at(&self, offset: u32) -> RecordHeader {
        debug_assert!(offset % RECORD_ALIGN == 0 && offset + HEADER_SIZE <= self.capacity);
        // SAFETY: offset is 4-aligned within the arena and the header bytes
        // were published by the producer before the cursor advance that led
        // the caller here.
        unsafe { ptr::read(self.arena.add(offset as usize) as *const RecordHeader) }
    }

    /// Payload bytes of the record at `offset`.
    ///
    /// # Safety
    ///
    /// The record must be published and unconsumed, and the returned slice
    /// must be dropped before the read cursor advances past it.
    pub unsafe fn payload_at(&self, offset: u32, len: u32) -> &[u8] {
        debug_assert!(offset + HEADER_SIZE + len <= self.capacity);
        std::slice::from_raw_parts(
            self.arena.add((offset + HEADER_SIZE) as usize),
            len as usize,
        )
    }

    /// Raw payload pointer of the record at `offset`.
    ///
    /// # Safety
    ///
    /// Same contract as [`CommandFifo::payload_at`].
    pub unsafe fn payload_ptr_at(&self, offset: u32) -> *mut u8 {
        debug_assert!(offset + HEADER_SIZE <= self.capacity);
        self.arena.add((offset + HEADER_SIZE) as usize)
    }

    unsafe fn write_header(&self, offset: u32, header: RecordHeader) {
        debug_assert!(offset % RECORD_ALIGN == 0 && offset + HEADER_SIZE <= self.capacity);
        ptr::write(self.arena.add(offset as usize) as *mut RecordHeader, header);
    }
}

impl Drop for CommandFifo {
    fn drop(&mut self) {
        let layout = Layout::from_size_align(self.capacity as usize, ARENA_ALIGN)
            .expect("command ring layout");
        // SAFETY: allocated with the identical layout in `new`.
        unsafe { dealloc(self.arena, layout) };
    }
}

/// A reserved, unpublished record. The producer fills the payload and then
/// commits through one of the push operations.
pub(crate) struct CommandSlot<'a> {
    fifo: &'a CommandFifo,
    offset: u32,
    size: u32,
}

impl CommandSlot<'_> {
    pub fn payload_mut(&mut self) -> &mut [u8] {
        // SAFETY: the slot is reserved and unpublished, so the producer has
        // exclusive access to these bytes.
        unsafe {
            std::slice::from_raw_parts_mut(
                self.fifo.arena.add((self.offset + HEADER_SIZE) as usize),
                (self.size - HEADER_SIZE) as usize,
            )
        }
    }

    pub fn payload_ptr(&mut self) -> *mut u8 {
        // SAFETY: as above.
        unsafe { self.fifo.payload_ptr_at(self.offset) }
    }

    /// Publishes the record to the consumer.
    pub fn commit(self) {
        self.fifo.publish(self.size);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wake::WakeCoordinator;
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    fn wake() -> WakeCoordinator {
        WakeCoordinator::new(Duration::from_micros(10))
    }

    /// Walks and consumes every published record, mimicking the worker loop.
    fn drain(fifo: &CommandFifo) -> Vec<RecordHeader> {
        let mut out = Vec::new();
        let mut write_ptr = fifo.acquire_write();
        let mut read_ptr = fifo.read_pos();
        if read_ptr == write_ptr {
            return out;
        }
        let mut local_write = if write_ptr < read_ptr {
            fifo.capacity()
        } else {
            write_ptr
        };
        while read_ptr < local_write {
            let header = fifo.header_at(read_ptr);
            out.push(header);
            read_ptr += header.size;
            if header.kind == kind::WRAPAROUND {
                assert_eq!(read_ptr, fifo.capacity());
                write_ptr = fifo.acquire_write();
                read_ptr = 0;
                fifo.store_read(0);
                local_write = write_ptr;
            }
        }
        fifo.store_read(read_ptr);
        out
    }

    #[test]
    fn sizes_are_rounded_to_record_alignment() {
        let fifo = CommandFifo::new(256);
        let wake = wake();
        let slot = fifo.allocate(0x100, 5, &wake);
        assert_eq!(slot.size, 16); // 8 header + 5 payload -> 16
        slot.commit();
        let records = drain(&fifo);
        assert_eq!(records, vec![RecordHeader { size: 16, kind: 0x100 }]);
    }

    #[test]
    fn empty_fifo_reports_no_pending_bytes() {
        let fifo = CommandFifo::new(256);
        assert_eq!(fifo.pending_size(), 0);
        let wake = wake();
        fifo.allocate(0x100, 0, &wake).commit();
        assert_eq!(fifo.pending_size(), 8);
    }

    #[test]
    fn tail_too_small_emits_wraparound_marker() {
        let fifo = CommandFifo::new(64);
        let wake = wake();

        // Three records of 16 bytes leave a 16-byte tail.
        for _ in 0..3 {
            fifo.allocate(0x100, 8, &wake).commit();
        }
        assert_eq!(drain(&fifo).len(), 3);

        // 24-byte record cannot use the 16-byte tail: marker plus restart.
        fifo.allocate(0x101, 16, &wake).commit();
        let records = drain(&fifo);
        assert_eq!(
            records,
            vec![
                RecordHeader {
                    size: 16,
                    kind: kind::WRAPAROUND
                },
                RecordHeader {
                    size: 24,
                    kind: 0x101
                },
            ]
        );
        assert_eq!(fifo.read_pos(), 24);
        assert_eq!(fifo.pending_size(), 0);
    }

    #[test]
    fn record_never_reaches_the_exact_arena_end() {
        let fifo = CommandFifo::new(64);
        let wake = wake();

        // The largest legal record (capacity minus one header) still leaves
        // marker headroom at the tail.
        fifo.allocate(0x100, 48, &wake).commit(); // 56 bytes, tail 8
        assert_eq!(fifo.acquire_write(), 56);
        assert!(fifo.acquire_write() < fifo.capacity());
    }

    #[test]
    fn payload_bytes_roundtrip() {
        let fifo = CommandFifo::new(256);
        let wake = wake();
        let mut slot = fifo.allocate(0x100, 4, &wake);
        slot.payload_mut().copy_from_slice(&[1, 2, 3, 4]);
        slot.commit();

        let header = fifo.header_at(0);
        assert_eq!(header.kind, 0x100);
        let payload = unsafe { fifo.payload_at(0, header.size - HEADER_SIZE) };
        assert_eq!(payload, &[1, 2, 3, 4]);
    }

    #[test]
    #[should_panic(expected = "does not fit the ring")]
    fn oversized_payload_is_a_programming_error() {
        let fifo = CommandFifo::new(64);
        let wake = wake();
        let _ = fifo.allocate(0x100, 64, &wake);
    }
}
