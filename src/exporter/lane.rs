//! Lane Writers
//!
//! Multi-producer append protocol for the record lanes and the dictionary
//! region. Records are framed as a 32-bit length word followed by a kind
//! byte and the payload; the length word doubles as the publication flag.
//!
//! Append protocol: a writer reserves space with a fetch-add on the
//! region's cursor word, copies the body into the reserved span, then
//! release-stores the body length with the ready bit set into the length
//! word. Readers that observe a zero length word or an unset ready bit
//! treat the record as mid-publish and come back later. A reservation
//! that would cross the region end is rewound with a best-effort CAS and
//! surfaces as `LaneFull`; a lost rewind leaves a hole that never becomes
//! ready, which stalls readers at a frame that stays unpublished rather
//! than exposing torn bytes.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::error::{ExporterError, ExporterResult};
use crate::exporter::layout::{FileLayout, Region};
use crate::exporter::memory_map::MappedFile;

/// Ready flag in the high bit of the frame length word
pub const READY_BIT: u32 = 0x8000_0000;

/// Length-word prefix of every frame, in bytes
pub const FRAME_PREFIX: u64 = 4;

/// Total reserved bytes for a record body of `body_len` bytes, including
/// the length word and padding to 4-byte alignment.
pub fn frame_len(body_len: usize) -> u64 {
    (FRAME_PREFIX as usize + body_len).next_multiple_of(4) as u64
}

/// Counters for one lane, process-local
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LaneStats {
    /// Records successfully published
    pub appended: u64,
    /// Records discarded because the lane was full
    pub dropped: u64,
}

/// Appender for one region of the mapped file
#[derive(Debug)]
pub struct LaneWriter {
    file: Arc<MappedFile>,
    name: &'static str,
    base: u64,
    capacity: u64,
    cursor_offset: u64,
    appended: AtomicU64,
    dropped_total: AtomicU64,
    unreported_drops: AtomicU64,
}

impl LaneWriter {
    pub fn new(file: Arc<MappedFile>, region: Region, layout: &FileLayout) -> Self {
        let descriptor = layout.region(region);
        Self {
            file,
            name: region.name(),
            base: descriptor.offset,
            capacity: descriptor.capacity,
            cursor_offset: region.cursor_offset(),
            appended: AtomicU64::new(0),
            dropped_total: AtomicU64::new(0),
            unreported_drops: AtomicU64::new(0),
        }
    }

    /// Region name, used in errors and drop-counter attributes.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Append one framed record. The body is the kind byte plus payload.
    pub fn append(&self, body: &[u8]) -> ExporterResult<()> {
        let frame = frame_len(body.len());
        let cursor = self.file.atomic_u64(self.cursor_offset);

        let start = cursor.fetch_add(frame, Ordering::AcqRel);
        let end = start + frame;
        if end > self.capacity {
            // Best-effort rewind; if another producer reserved past us the
            // hole stays and is never published.
            let _ = cursor.compare_exchange(end, start, Ordering::AcqRel, Ordering::Relaxed);
            return Err(ExporterError::LaneFull {
                region: self.name,
                needed: frame as usize,
                remaining: self.capacity.saturating_sub(start.min(self.capacity)),
            });
        }

        let record = self.base + start;
        let length_word = self.file.atomic_u32(record);
        length_word.store(0, Ordering::Relaxed);
        self.file.write_at(record + FRAME_PREFIX, body)?;
        length_word.store(body.len() as u32 | READY_BIT, Ordering::Release);

        self.appended.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Count one dropped record.
    pub fn count_drop(&self) {
        self.dropped_total.fetch_add(1, Ordering::Relaxed);
        self.unreported_drops.fetch_add(1, Ordering::Relaxed);
    }

    /// Drops accumulated since the last successful report, clearing the
    /// pending count.
    pub fn take_unreported_drops(&self) -> u64 {
        self.unreported_drops.swap(0, Ordering::Relaxed)
    }

    /// Re-bank pending drops after a failed report.
    pub fn restore_unreported_drops(&self, count: u64) {
        self.unreported_drops.fetch_add(count, Ordering::Relaxed);
    }

    /// Total records dropped on this lane over the exporter's lifetime.
    pub fn dropped_total(&self) -> u64 {
        self.dropped_total.load(Ordering::Relaxed)
    }

    pub fn stats(&self) -> LaneStats {
        LaneStats {
            appended: self.appended.load(Ordering::Relaxed),
            dropped: self.dropped_total(),
        }
    }
}
