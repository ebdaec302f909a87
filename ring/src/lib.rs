//! A fixed-capacity single-producer/single-consumer byte ring.
//!
//! This is the boundary between a hard-real-time audio callback and a
//! best-effort network thread: the producer side must never allocate, lock,
//! or block, so the ring is built on two atomic cursors and a contiguous
//! backing buffer fixed at construction time.
//!
//! Capacity `N` is requested by the caller; `N - 1` bytes are usable at any
//! time (one slot is kept empty so a full ring can be distinguished from an
//! empty one without a separate flag).

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

struct Shared {
    buf: Box<[UnsafeCell<u8>]>,
    capacity: usize,
    // Indices are kept in [0, capacity) by the producer/consumer that owns
    // them; the other side only ever loads them.
    read: AtomicUsize,
    write: AtomicUsize,
}

// SAFETY: `buf` is only ever written through `Producer` (single producer)
// and only ever read through `Consumer` (single consumer); the `read`/`write`
// atomics establish the happens-before edges that make those accesses race
// free, per the ordering discipline documented on `Producer`/`Consumer`.
unsafe impl Sync for Shared {}

/// Creates a ring of the given byte capacity and splits it into its producer
/// and consumer halves. `capacity` must be at least 2 (one byte is always
/// reserved to disambiguate full from empty).
pub fn ring(capacity: usize) -> (Producer, Consumer) {
    assert!(capacity >= 2, "ring capacity must be at least 2 bytes");

    let buf: Box<[UnsafeCell<u8>]> = (0..capacity).map(|_| UnsafeCell::new(0)).collect();

    let shared = Arc::new(Shared {
        buf,
        capacity,
        read: AtomicUsize::new(0),
        write: AtomicUsize::new(0),
    });

    (
        Producer {
            shared: shared.clone(),
        },
        Consumer { shared },
    )
}

#[inline(always)]
fn wrapping_diff(write: usize, read: usize, capacity: usize) -> usize {
    if write >= read {
        write - read
    } else {
        capacity - read + write
    }
}

/// The producer half of a [`ring`]. Owns the write cursor; only ever loads
/// the read cursor.
pub struct Producer {
    shared: Arc<Shared>,
}

// SAFETY: a `Producer` is the sole writer to `shared.buf`'s producer-owned
// region; moving it to another thread just moves which thread is the sole
// writer.
unsafe impl Send for Producer {}

impl Producer {
    /// Bytes immediately available to write without blocking.
    #[inline]
    pub fn available_write(&self) -> usize {
        let read = self.shared.read.load(Ordering::Acquire);
        let write = self.shared.write.load(Ordering::Relaxed);
        self.shared.capacity - 1 - wrapping_diff(write, read, self.shared.capacity)
    }

    /// Writes `data` into the ring if `available_write() >= data.len()`.
    /// Whole-message discipline: either all of `data` is written, or nothing
    /// is (no-op on insufficient space). Returns whether the write happened.
    #[inline]
    pub fn write(&mut self, data: &[u8]) -> bool {
        if self.available_write() < data.len() {
            return false;
        }
        self.copy_in(data);
        self.advance_write(data.len());
        true
    }

    /// Advances the write cursor by `n` bytes without copying any data, for
    /// use after filling a span returned by [`Producer::borrow_write`].
    /// Returns `false` (no-op) if fewer than `n` bytes are writable.
    #[inline]
    pub fn advance_write_only(&mut self, n: usize) -> bool {
        if self.available_write() < n {
            return false;
        }
        self.advance_write(n);
        true
    }

    fn copy_in(&mut self, data: &[u8]) {
        let write = self.shared.write.load(Ordering::Relaxed);
        let capacity = self.shared.capacity;
        let first = (capacity - write).min(data.len());

        // SAFETY: [write, write+first) and [0, data.len()-first) are both
        // producer-owned (not yet visible to the consumer, since `write`
        // hasn't advanced), and disjoint from each other.
        unsafe {
            copy_into(&self.shared.buf, write, &data[..first]);
            if first < data.len() {
                copy_into(&self.shared.buf, 0, &data[first..]);
            }
        }
    }

    fn advance_write(&mut self, n: usize) {
        let write = self.shared.write.load(Ordering::Relaxed);
        let new_write = (write + n) % self.shared.capacity;
        // Release: publishes everything copied in before this point.
        self.shared.write.store(new_write, Ordering::Release);
    }

    /// Borrows the next contiguous producer-owned span, up to `max` bytes
    /// (and up to `available_write()`). The span may be shorter than the
    /// total writable region when that region wraps around the end of the
    /// buffer; call again after committing to obtain the remainder.
    ///
    /// Commit written bytes with [`Producer::advance_write_only`].
    #[inline]
    pub fn borrow_write(&mut self, max: usize) -> &mut [u8] {
        let avail = self.available_write().min(max);
        if avail == 0 {
            return &mut [];
        }
        let write = self.shared.write.load(Ordering::Relaxed);
        let capacity = self.shared.capacity;
        let contig = (capacity - write).min(avail);

        // SAFETY: this span starts at the producer's own write cursor and
        // is not yet visible to the consumer (write hasn't advanced past
        // it), so no other reference to these bytes can exist.
        unsafe { slice_mut(&self.shared.buf, write, contig) }
    }
}

/// The consumer half of a [`ring`]. Owns the read cursor; only ever loads
/// the write cursor.
pub struct Consumer {
    shared: Arc<Shared>,
}

// SAFETY: symmetric to `Producer`'s.
unsafe impl Send for Consumer {}

impl Consumer {
    /// Bytes immediately available to read.
    #[inline]
    pub fn available_read(&self) -> usize {
        let write = self.shared.write.load(Ordering::Acquire);
        let read = self.shared.read.load(Ordering::Relaxed);
        wrapping_diff(write, read, self.shared.capacity)
    }

    /// Copies `dst.len()` bytes out of the ring and advances the read
    /// cursor. No-op (returns `false`) if fewer bytes are available.
    #[inline]
    pub fn read(&mut self, dst: &mut [u8]) -> bool {
        if !self.peek(dst) {
            return false;
        }
        self.advance_read(dst.len());
        true
    }

    /// Advances the read cursor by `n` bytes without copying any data out,
    /// i.e. discards them. No-op (returns `false`) if fewer bytes are
    /// available.
    #[inline]
    pub fn skip(&mut self, n: usize) -> bool {
        if self.available_read() < n {
            return false;
        }
        self.advance_read(n);
        true
    }

    /// Copies `dst.len()` bytes out of the ring without advancing the read
    /// cursor. No-op (returns `false`) if fewer bytes are available.
    #[inline]
    pub fn peek(&self, dst: &mut [u8]) -> bool {
        self.peek_at(0, dst)
    }

    /// Like [`Consumer::peek`], but starting `offset` bytes past the current
    /// read cursor. Requires `available_read() >= dst.len() + offset`.
    #[inline]
    pub fn peek_at(&self, offset: usize, dst: &mut [u8]) -> bool {
        if self.available_read() < dst.len() + offset {
            return false;
        }
        let read = self.shared.read.load(Ordering::Relaxed);
        let capacity = self.shared.capacity;
        let at = (read + offset) % capacity;
        let first = (capacity - at).min(dst.len());

        // SAFETY: [at, at+len) lies within the consumer-visible region
        // established by the `available_read` check above (an Acquire load
        // of `write`), and only the consumer ever reads these bytes.
        unsafe {
            copy_out(&self.shared.buf, at, &mut dst[..first]);
            if first < dst.len() {
                copy_out(&self.shared.buf, 0, &mut dst[first..]);
            }
        }
        true
    }

    fn advance_read(&mut self, n: usize) {
        let read = self.shared.read.load(Ordering::Relaxed);
        let new_read = (read + n) % self.shared.capacity;
        // Release: signals to the producer that these bytes may be reused.
        self.shared.read.store(new_read, Ordering::Release);
    }

    /// Borrows the next contiguous consumer-readable span, up to `max`
    /// bytes (and up to `available_read()`). The span may be shorter than
    /// the total readable region when that region wraps; call again after
    /// consuming to obtain the remainder.
    ///
    /// Commit consumed bytes with [`Consumer::skip`].
    #[inline]
    pub fn borrow_read(&self, max: usize) -> &[u8] {
        let avail = self.available_read().min(max);
        if avail == 0 {
            return &[];
        }
        let read = self.shared.read.load(Ordering::Relaxed);
        let capacity = self.shared.capacity;
        let contig = (capacity - read).min(avail);

        // SAFETY: this span lies entirely within the region the Acquire
        // load in `available_read` proved visible, and starts at the
        // consumer's own read cursor.
        unsafe { slice_ref(&self.shared.buf, read, contig) }
    }
}

#[inline(always)]
unsafe fn copy_into(buf: &[UnsafeCell<u8>], at: usize, data: &[u8]) {
    for (i, &b) in data.iter().enumerate() {
        *buf[at + i].get() = b;
    }
}

#[inline(always)]
unsafe fn copy_out(buf: &[UnsafeCell<u8>], at: usize, dst: &mut [u8]) {
    for (i, b) in dst.iter_mut().enumerate() {
        *b = *buf[at + i].get();
    }
}

#[inline(always)]
unsafe fn slice_ref(buf: &[UnsafeCell<u8>], at: usize, len: usize) -> &[u8] {
    std::slice::from_raw_parts(buf[at].get(), len)
}

// The `&[UnsafeCell<u8>]` receiver is shared (it's `Shared.buf`, reachable
// from both `Producer` and `Consumer`), but the returned `&mut [u8]` is only
// ever handed to the producer over a span it exclusively owns; aliasing is
// ruled out by the ring's single-producer discipline, not by the borrow
// checker.
#[allow(clippy::mut_from_ref)]
#[inline(always)]
unsafe fn slice_mut(buf: &[UnsafeCell<u8>], at: usize, len: usize) -> &mut [u8] {
    std::slice::from_raw_parts_mut(buf[at].get(), len)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_ring_is_empty_and_fully_writable() {
        let (p, c) = ring(8);
        assert_eq!(c.available_read(), 0);
        assert_eq!(p.available_write(), 7);
    }

    #[test]
    fn write_then_read_round_trips_bytes_in_order() {
        let (mut p, mut c) = ring(16);
        assert!(p.write(b"hello"));
        let mut out = [0u8; 5];
        assert!(c.read(&mut out));
        assert_eq!(&out, b"hello");
    }

    #[test]
    fn write_is_whole_or_noop() {
        let (mut p, _c) = ring(4);
        // capacity 4 -> usable 3
        assert!(!p.write(b"abcd"));
        assert_eq!(p.available_write(), 3);
        assert!(p.write(b"abc"));
        assert_eq!(p.available_write(), 0);
    }

    #[test]
    fn available_read_plus_available_write_is_capacity_minus_one() {
        let (mut p, mut c) = ring(32);
        assert_eq!(c.available_read() + p.available_write(), 31);
        for n in [5usize, 10, 16] {
            assert!(p.write(&vec![1u8; n]));
            assert_eq!(c.available_read() + p.available_write(), 31);
            assert!(c.read(&mut vec![0u8; n]));
            assert_eq!(c.available_read() + p.available_write(), 31);
        }
    }

    #[test]
    fn peek_at_matches_read_then_restore() {
        let (mut p, c) = ring(32);
        assert!(p.write(b"0123456789"));

        let mut a = [0u8; 3];
        assert!(c.peek_at(2, &mut a));
        assert_eq!(&a, b"234");

        // emulate "read(offset, _); peek(n, dst); restore" via a scratch consumer
        let mut b = [0u8; 2];
        assert!(c.peek(&mut b));
        assert_eq!(&b, b"01");
    }

    #[test]
    fn wrap_around_preserves_order() {
        let (mut p, mut c) = ring(8);
        assert!(p.write(b"abcde"));
        let mut out = [0u8; 3];
        assert!(c.read(&mut out));
        assert_eq!(&out, b"abc");
        // write pointer is now ahead; this write wraps past the end
        assert!(p.write(b"XYZ"));
        let mut out2 = [0u8; 5];
        assert!(c.read(&mut out2));
        assert_eq!(&out2, b"deXYZ");
    }

    #[test]
    fn zero_copy_spans_concatenate_to_full_readable_range() {
        let (mut p, mut c) = ring(8);
        assert!(p.write(b"abcde"));
        let mut out = [0u8; 3];
        assert!(c.read(&mut out));
        assert!(p.write(b"XYZ"));

        let mut collected = Vec::new();
        loop {
            let n = c.available_read();
            if n == 0 {
                break;
            }
            let span = c.borrow_read(n);
            let len = span.len();
            collected.extend_from_slice(span);
            c.skip(len);
        }
        assert_eq!(collected, b"deXYZ");
    }

    #[test]
    fn borrow_write_then_commit_is_observable_by_consumer() {
        let (mut p, mut c) = ring(8);
        {
            let span = p.borrow_write(4);
            assert_eq!(span.len(), 4); // capacity-1 == 7 writable, contig to end is 8
            span[..4].copy_from_slice(b"wxyz");
        }
        assert!(p.advance_write_only(4));
        let mut out = [0u8; 4];
        assert!(c.read(&mut out));
        assert_eq!(&out, b"wxyz");
    }

    #[test]
    fn overfull_write_never_partially_applies() {
        let (mut p, c) = ring(16);
        let before = p.available_write();
        assert!(!p.write(&[0u8; 100]));
        assert_eq!(p.available_write(), before);
        assert_eq!(c.available_read(), 0);
    }
}
