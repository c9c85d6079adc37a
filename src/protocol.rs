//! Record Protocol
//!
//! Wire-level schema for everything that lands in the mapped file: record
//! kinds, attribute values, aggregation descriptors and the fixed-width
//! payload encodings for dictionary entries and lane records. All integers
//! are little-endian; trace and span ids are opaque byte strings copied
//! verbatim.
//!
//! Every deduplicated entity is addressed by a 32-bit handle minted from 1.
//! Handle 0 is reserved and means "absent". Records reference handles
//! instead of inline payloads, which keeps lane records fixed-size and the
//! hot path free of serialization work.

use crate::error::{ExporterError, ExporterResult};

/// Handle to an interned string
pub type StringHandle = u32;
/// Handle to an interned attribute set
pub type AttributeSetHandle = u32;
/// Handle to an interned resource
pub type ResourceHandle = u32;
/// Handle to an interned instrumentation scope
pub type ScopeHandle = u32;
/// Handle to an interned metric stream
pub type MetricStreamHandle = u32;

/// Reserved handle value meaning "absent"
pub const HANDLE_ABSENT: u32 = 0;

/// Discriminants for every record that appears in the file.
///
/// Values 1..=5 are dictionary entries, 16..=19 are lane records. The kind
/// byte is the first byte of every framed record body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RecordKind {
    String = 1,
    AttributeSet = 2,
    Resource = 3,
    Scope = 4,
    MetricStream = 5,
    Measurement = 16,
    SpanStart = 17,
    SpanEnd = 18,
    Event = 19,
}

impl RecordKind {
    pub fn from_u8(value: u8) -> ExporterResult<Self> {
        Ok(match value {
            1 => Self::String,
            2 => Self::AttributeSet,
            3 => Self::Resource,
            4 => Self::Scope,
            5 => Self::MetricStream,
            16 => Self::Measurement,
            17 => Self::SpanStart,
            18 => Self::SpanEnd,
            19 => Self::Event,
            other => {
                return Err(ExporterError::decode(format!(
                    "unknown record kind {other}"
                )))
            }
        })
    }
}

/// Attribute value as supplied by instrumentation callers.
///
/// Strings inside values are interned before the value reaches the file;
/// see [`ValueRef`] for the interned form. Arrays must be homogeneous and
/// may not nest.
#[derive(Debug, Clone, PartialEq)]
pub enum AttributeValue {
    String(String),
    Int(i64),
    Double(f64),
    Bool(bool),
    Bytes(Vec<u8>),
    Array(Vec<AttributeValue>),
}

impl From<&str> for AttributeValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for AttributeValue {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<i64> for AttributeValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<f64> for AttributeValue {
    fn from(value: f64) -> Self {
        Self::Double(value)
    }
}

impl From<bool> for AttributeValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

/// Interned attribute value as stored in dictionary records.
///
/// Doubles are kept as raw IEEE-754 bits so the type can serve as a hash
/// map key; equality of attribute sets is bit-equality on doubles.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ValueRef {
    String(StringHandle),
    Int(i64),
    Double(u64),
    Bool(bool),
    Bytes(Vec<u8>),
    Array(Vec<ValueRef>),
}

impl ValueRef {
    fn tag(&self) -> u8 {
        match self {
            Self::String(_) => 1,
            Self::Int(_) => 2,
            Self::Double(_) => 3,
            Self::Bool(_) => 4,
            Self::Bytes(_) => 5,
            Self::Array(_) => 6,
        }
    }
}

/// Aggregation temporality for sums and histograms
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Temporality {
    Delta = 1,
    Cumulative = 2,
}

impl Temporality {
    pub fn from_u8(value: u8) -> ExporterResult<Self> {
        match value {
            1 => Ok(Self::Delta),
            2 => Ok(Self::Cumulative),
            other => Err(ExporterError::decode(format!(
                "unknown temporality {other}"
            ))),
        }
    }
}

/// Aggregation descriptor attached to a metric stream
#[derive(Debug, Clone, PartialEq)]
pub enum Aggregation {
    Sum {
        temporality: Temporality,
        is_monotonic: bool,
    },
    Gauge,
    Histogram {
        temporality: Temporality,
        /// Explicit bucket boundaries, sorted ascending. An empty list
        /// means the stream carries sum and count only.
        bucket_boundaries: Vec<f64>,
    },
}

/// Span kind discriminants
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SpanKind {
    Internal = 1,
    Server = 2,
    Client = 3,
    Producer = 4,
    Consumer = 5,
}

impl SpanKind {
    pub fn from_u8(value: u8) -> ExporterResult<Self> {
        Ok(match value {
            1 => Self::Internal,
            2 => Self::Server,
            3 => Self::Client,
            4 => Self::Producer,
            5 => Self::Consumer,
            other => {
                return Err(ExporterError::decode(format!("unknown span kind {other}")))
            }
        })
    }
}

/// Span context attached to measurements and events.
///
/// Flag bit 0 means "sampled".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpanContext {
    pub trace_id: [u8; 16],
    pub span_id: [u8; 8],
    pub flags: u8,
}

/// Sampled flag bit in [`SpanContext::flags`]
pub const SPAN_FLAG_SAMPLED: u8 = 0x01;

/// Value carried by a measurement record
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MeasurementValue {
    Int(i64),
    Double(f64),
}

impl From<i64> for MeasurementValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<f64> for MeasurementValue {
    fn from(value: f64) -> Self {
        Self::Double(value)
    }
}

// ---------------------------------------------------------------------------
// Payload cursor helpers
// ---------------------------------------------------------------------------

struct PayloadWriter {
    buf: Vec<u8>,
}

impl PayloadWriter {
    fn with_kind(kind: RecordKind) -> Self {
        let mut buf = Vec::with_capacity(64);
        buf.push(kind as u8);
        Self { buf }
    }

    fn put_u8(&mut self, value: u8) {
        self.buf.push(value);
    }

    fn put_u32(&mut self, value: u32) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    fn put_u64(&mut self, value: u64) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    fn put_i64(&mut self, value: i64) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    fn put_f64(&mut self, value: f64) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    fn put_bytes(&mut self, value: &[u8]) {
        self.buf.extend_from_slice(value);
    }

    fn finish(self) -> Vec<u8> {
        self.buf
    }
}

struct PayloadReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> PayloadReader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn take(&mut self, len: usize) -> ExporterResult<&'a [u8]> {
        if self.pos + len > self.buf.len() {
            return Err(ExporterError::decode(format!(
                "record truncated: wanted {} bytes at offset {}, have {}",
                len,
                self.pos,
                self.buf.len()
            )));
        }
        let slice = &self.buf[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    fn u8(&mut self) -> ExporterResult<u8> {
        Ok(self.take(1)?[0])
    }

    fn u32(&mut self) -> ExporterResult<u32> {
        let bytes = self.take(4)?;
        Ok(u32::from_le_bytes(bytes.try_into().expect("4-byte slice")))
    }

    fn u64(&mut self) -> ExporterResult<u64> {
        let bytes = self.take(8)?;
        Ok(u64::from_le_bytes(bytes.try_into().expect("8-byte slice")))
    }

    fn i64(&mut self) -> ExporterResult<i64> {
        let bytes = self.take(8)?;
        Ok(i64::from_le_bytes(bytes.try_into().expect("8-byte slice")))
    }

    fn f64(&mut self) -> ExporterResult<f64> {
        let bytes = self.take(8)?;
        Ok(f64::from_le_bytes(bytes.try_into().expect("8-byte slice")))
    }

    fn rest(&mut self) -> &'a [u8] {
        let slice = &self.buf[self.pos..];
        self.pos = self.buf.len();
        slice
    }

    fn done(&self) -> ExporterResult<()> {
        if self.pos != self.buf.len() {
            return Err(ExporterError::decode(format!(
                "{} trailing bytes after record payload",
                self.buf.len() - self.pos
            )));
        }
        Ok(())
    }
}

fn put_value(writer: &mut PayloadWriter, value: &ValueRef) {
    writer.put_u8(value.tag());
    match value {
        ValueRef::String(handle) => writer.put_u32(*handle),
        ValueRef::Int(v) => writer.put_i64(*v),
        ValueRef::Double(bits) => writer.put_u64(*bits),
        ValueRef::Bool(v) => writer.put_u8(*v as u8),
        ValueRef::Bytes(v) => {
            writer.put_u32(v.len() as u32);
            writer.put_bytes(v);
        }
        ValueRef::Array(items) => {
            let elem_tag = items.first().map(ValueRef::tag).unwrap_or(2);
            writer.put_u8(elem_tag);
            writer.put_u32(items.len() as u32);
            for item in items {
                put_value_body(writer, item);
            }
        }
    }
}

fn put_value_body(writer: &mut PayloadWriter, value: &ValueRef) {
    match value {
        ValueRef::String(handle) => writer.put_u32(*handle),
        ValueRef::Int(v) => writer.put_i64(*v),
        ValueRef::Double(bits) => writer.put_u64(*bits),
        ValueRef::Bool(v) => writer.put_u8(*v as u8),
        ValueRef::Bytes(v) => {
            writer.put_u32(v.len() as u32);
            writer.put_bytes(v);
        }
        ValueRef::Array(_) => unreachable!("nested arrays are rejected at intern time"),
    }
}

fn read_value_body(reader: &mut PayloadReader<'_>, tag: u8) -> ExporterResult<ValueRef> {
    Ok(match tag {
        1 => ValueRef::String(reader.u32()?),
        2 => ValueRef::Int(reader.i64()?),
        3 => ValueRef::Double(reader.u64()?),
        4 => ValueRef::Bool(reader.u8()? != 0),
        5 => {
            let len = reader.u32()? as usize;
            ValueRef::Bytes(reader.take(len)?.to_vec())
        }
        other => {
            return Err(ExporterError::decode(format!(
                "unknown attribute value tag {other}"
            )))
        }
    })
}

fn read_value(reader: &mut PayloadReader<'_>) -> ExporterResult<ValueRef> {
    let tag = reader.u8()?;
    if tag == 6 {
        let elem_tag = reader.u8()?;
        if elem_tag == 6 {
            return Err(ExporterError::decode("nested array attribute value"));
        }
        let count = reader.u32()? as usize;
        // The count comes straight from the file; grow the buffer as
        // elements decode so a corrupt count fails the bounds check
        // instead of forcing a huge allocation up front.
        let mut items = Vec::new();
        for _ in 0..count {
            items.push(read_value_body(reader, elem_tag)?);
        }
        return Ok(ValueRef::Array(items));
    }
    read_value_body(reader, tag)
}

fn put_span_context(writer: &mut PayloadWriter, context: Option<&SpanContext>) {
    match context {
        Some(ctx) => {
            writer.put_u8(1);
            writer.put_bytes(&ctx.trace_id);
            writer.put_bytes(&ctx.span_id);
            writer.put_u8(ctx.flags);
        }
        None => writer.put_u8(0),
    }
}

fn read_span_context(reader: &mut PayloadReader<'_>) -> ExporterResult<Option<SpanContext>> {
    if reader.u8()? == 0 {
        return Ok(None);
    }
    let trace_id: [u8; 16] = reader.take(16)?.try_into().expect("16-byte slice");
    let span_id: [u8; 8] = reader.take(8)?.try_into().expect("8-byte slice");
    let flags = reader.u8()?;
    Ok(Some(SpanContext {
        trace_id,
        span_id,
        flags,
    }))
}

fn put_aggregation(writer: &mut PayloadWriter, aggregation: &Aggregation) {
    match aggregation {
        Aggregation::Sum {
            temporality,
            is_monotonic,
        } => {
            writer.put_u8(1);
            writer.put_u8(*temporality as u8);
            writer.put_u8(*is_monotonic as u8);
        }
        Aggregation::Gauge => writer.put_u8(2),
        Aggregation::Histogram {
            temporality,
            bucket_boundaries,
        } => {
            writer.put_u8(3);
            writer.put_u8(*temporality as u8);
            writer.put_u32(bucket_boundaries.len() as u32);
            for boundary in bucket_boundaries {
                writer.put_f64(*boundary);
            }
        }
    }
}

fn read_aggregation(reader: &mut PayloadReader<'_>) -> ExporterResult<Aggregation> {
    Ok(match reader.u8()? {
        1 => Aggregation::Sum {
            temporality: Temporality::from_u8(reader.u8()?)?,
            is_monotonic: reader.u8()? != 0,
        },
        2 => Aggregation::Gauge,
        3 => {
            let temporality = Temporality::from_u8(reader.u8()?)?;
            let count = reader.u32()? as usize;
            // File-supplied count; let the per-element bounds check catch
            // a corrupt value rather than pre-reserving.
            let mut bucket_boundaries = Vec::new();
            for _ in 0..count {
                bucket_boundaries.push(reader.f64()?);
            }
            Aggregation::Histogram {
                temporality,
                bucket_boundaries,
            }
        }
        other => {
            return Err(ExporterError::decode(format!(
                "unknown aggregation tag {other}"
            )))
        }
    })
}

// ---------------------------------------------------------------------------
// Lane records
// ---------------------------------------------------------------------------

/// Decoded metric-lane record
#[derive(Debug, Clone, PartialEq)]
pub struct MeasurementRecord {
    pub stream: MetricStreamHandle,
    pub attributes: AttributeSetHandle,
    pub time_ns: u64,
    pub value: MeasurementValue,
    pub span_context: Option<SpanContext>,
}

/// Decoded span-lane start record
#[derive(Debug, Clone, PartialEq)]
pub struct SpanStartRecord {
    pub scope: ScopeHandle,
    pub trace_id: [u8; 16],
    pub span_id: [u8; 8],
    pub parent_span_id: Option<[u8; 8]>,
    pub flags: u8,
    pub name: StringHandle,
    pub kind: SpanKind,
    pub start_time_ns: u64,
    pub attributes: AttributeSetHandle,
}

/// Decoded span-lane end record
#[derive(Debug, Clone, PartialEq)]
pub struct SpanEndRecord {
    pub scope: ScopeHandle,
    pub trace_id: [u8; 16],
    pub span_id: [u8; 8],
    pub end_time_ns: u64,
}

/// Decoded event-lane record
#[derive(Debug, Clone, PartialEq)]
pub struct EventRecord {
    pub scope: ScopeHandle,
    pub span_context: Option<SpanContext>,
    pub name: StringHandle,
    pub time_ns: u64,
    pub severity_number: u8,
    pub severity_text: StringHandle,
    pub attributes: AttributeSetHandle,
}

/// Any record that can appear in one of the three lanes
#[derive(Debug, Clone, PartialEq)]
pub enum LaneRecord {
    Measurement(MeasurementRecord),
    SpanStart(SpanStartRecord),
    SpanEnd(SpanEndRecord),
    Event(EventRecord),
}

pub fn encode_measurement(record: &MeasurementRecord) -> Vec<u8> {
    let mut writer = PayloadWriter::with_kind(RecordKind::Measurement);
    writer.put_u32(record.stream);
    writer.put_u32(record.attributes);
    writer.put_u64(record.time_ns);
    match record.value {
        MeasurementValue::Int(v) => {
            writer.put_u8(2);
            writer.put_i64(v);
        }
        MeasurementValue::Double(v) => {
            writer.put_u8(3);
            writer.put_f64(v);
        }
    }
    put_span_context(&mut writer, record.span_context.as_ref());
    writer.finish()
}

pub fn encode_span_start(record: &SpanStartRecord) -> Vec<u8> {
    let mut writer = PayloadWriter::with_kind(RecordKind::SpanStart);
    writer.put_u32(record.scope);
    writer.put_bytes(&record.trace_id);
    writer.put_bytes(&record.span_id);
    match record.parent_span_id {
        Some(parent) => {
            writer.put_u8(1);
            writer.put_bytes(&parent);
        }
        None => writer.put_u8(0),
    }
    writer.put_u8(record.flags);
    writer.put_u32(record.name);
    writer.put_u8(record.kind as u8);
    writer.put_u64(record.start_time_ns);
    writer.put_u32(record.attributes);
    writer.finish()
}

pub fn encode_span_end(record: &SpanEndRecord) -> Vec<u8> {
    let mut writer = PayloadWriter::with_kind(RecordKind::SpanEnd);
    writer.put_u32(record.scope);
    writer.put_bytes(&record.trace_id);
    writer.put_bytes(&record.span_id);
    writer.put_u64(record.end_time_ns);
    writer.finish()
}

pub fn encode_event(record: &EventRecord) -> Vec<u8> {
    let mut writer = PayloadWriter::with_kind(RecordKind::Event);
    writer.put_u32(record.scope);
    put_span_context(&mut writer, record.span_context.as_ref());
    writer.put_u32(record.name);
    writer.put_u64(record.time_ns);
    writer.put_u8(record.severity_number);
    writer.put_u32(record.severity_text);
    writer.put_u32(record.attributes);
    writer.finish()
}

/// Decode a framed lane record (kind byte first, as returned by the reader).
pub fn decode_lane_record(bytes: &[u8]) -> ExporterResult<LaneRecord> {
    let mut reader = PayloadReader::new(bytes);
    let kind = RecordKind::from_u8(reader.u8()?)?;
    let record = match kind {
        RecordKind::Measurement => {
            let stream = reader.u32()?;
            let attributes = reader.u32()?;
            let time_ns = reader.u64()?;
            let value = match reader.u8()? {
                2 => MeasurementValue::Int(reader.i64()?),
                3 => MeasurementValue::Double(reader.f64()?),
                other => {
                    return Err(ExporterError::decode(format!(
                        "unknown measurement value tag {other}"
                    )))
                }
            };
            let span_context = read_span_context(&mut reader)?;
            LaneRecord::Measurement(MeasurementRecord {
                stream,
                attributes,
                time_ns,
                value,
                span_context,
            })
        }
        RecordKind::SpanStart => {
            let scope = reader.u32()?;
            let trace_id: [u8; 16] = reader.take(16)?.try_into().expect("16-byte slice");
            let span_id: [u8; 8] = reader.take(8)?.try_into().expect("8-byte slice");
            let parent_span_id = if reader.u8()? != 0 {
                Some(reader.take(8)?.try_into().expect("8-byte slice"))
            } else {
                None
            };
            let flags = reader.u8()?;
            let name = reader.u32()?;
            let kind = SpanKind::from_u8(reader.u8()?)?;
            let start_time_ns = reader.u64()?;
            let attributes = reader.u32()?;
            LaneRecord::SpanStart(SpanStartRecord {
                scope,
                trace_id,
                span_id,
                parent_span_id,
                flags,
                name,
                kind,
                start_time_ns,
                attributes,
            })
        }
        RecordKind::SpanEnd => LaneRecord::SpanEnd(SpanEndRecord {
            scope: reader.u32()?,
            trace_id: reader.take(16)?.try_into().expect("16-byte slice"),
            span_id: reader.take(8)?.try_into().expect("8-byte slice"),
            end_time_ns: reader.u64()?,
        }),
        RecordKind::Event => {
            let scope = reader.u32()?;
            let span_context = read_span_context(&mut reader)?;
            let name = reader.u32()?;
            let time_ns = reader.u64()?;
            let severity_number = reader.u8()?;
            let severity_text = reader.u32()?;
            let attributes = reader.u32()?;
            LaneRecord::Event(EventRecord {
                scope,
                span_context,
                name,
                time_ns,
                severity_number,
                severity_text,
                attributes,
            })
        }
        other => {
            return Err(ExporterError::decode(format!(
                "dictionary record kind {other:?} in a lane"
            )))
        }
    };
    reader.done()?;
    Ok(record)
}

// ---------------------------------------------------------------------------
// Dictionary records
// ---------------------------------------------------------------------------

/// Decoded resource dictionary entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceRecord {
    pub handle: ResourceHandle,
    pub attributes: AttributeSetHandle,
    /// `HANDLE_ABSENT` when the resource carries no schema URL
    pub schema_url: StringHandle,
}

/// Decoded instrumentation scope dictionary entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScopeRecord {
    pub handle: ScopeHandle,
    pub resource: ResourceHandle,
    pub name: StringHandle,
    /// `HANDLE_ABSENT` when the scope carries no version
    pub version: StringHandle,
    /// `HANDLE_ABSENT` when the scope carries no attributes
    pub attributes: AttributeSetHandle,
}

/// Decoded metric stream dictionary entry
#[derive(Debug, Clone, PartialEq)]
pub struct MetricStreamRecord {
    pub handle: MetricStreamHandle,
    pub scope: ScopeHandle,
    pub name: StringHandle,
    pub description: StringHandle,
    pub unit: StringHandle,
    pub aggregation: Aggregation,
}

/// Any record that can appear in the dictionary region
#[derive(Debug, Clone, PartialEq)]
pub enum DictionaryRecord {
    String {
        handle: StringHandle,
        value: String,
    },
    AttributeSet {
        handle: AttributeSetHandle,
        entries: Vec<(StringHandle, ValueRef)>,
    },
    Resource(ResourceRecord),
    Scope(ScopeRecord),
    MetricStream(MetricStreamRecord),
}

impl DictionaryRecord {
    /// The handle this entry defines.
    pub fn handle(&self) -> u32 {
        match self {
            Self::String { handle, .. } => *handle,
            Self::AttributeSet { handle, .. } => *handle,
            Self::Resource(record) => record.handle,
            Self::Scope(record) => record.handle,
            Self::MetricStream(record) => record.handle,
        }
    }
}

pub fn encode_string_entry(handle: StringHandle, value: &str) -> Vec<u8> {
    let mut writer = PayloadWriter::with_kind(RecordKind::String);
    writer.put_u32(handle);
    writer.put_bytes(value.as_bytes());
    writer.finish()
}

pub fn encode_attribute_set_entry(
    handle: AttributeSetHandle,
    entries: &[(StringHandle, ValueRef)],
) -> Vec<u8> {
    let mut writer = PayloadWriter::with_kind(RecordKind::AttributeSet);
    writer.put_u32(handle);
    writer.put_u32(entries.len() as u32);
    for (key, value) in entries {
        writer.put_u32(*key);
        put_value(&mut writer, value);
    }
    writer.finish()
}

pub fn encode_resource_entry(record: &ResourceRecord) -> Vec<u8> {
    let mut writer = PayloadWriter::with_kind(RecordKind::Resource);
    writer.put_u32(record.handle);
    writer.put_u32(record.attributes);
    writer.put_u32(record.schema_url);
    writer.finish()
}

pub fn encode_scope_entry(record: &ScopeRecord) -> Vec<u8> {
    let mut writer = PayloadWriter::with_kind(RecordKind::Scope);
    writer.put_u32(record.handle);
    writer.put_u32(record.resource);
    writer.put_u32(record.name);
    writer.put_u32(record.version);
    writer.put_u32(record.attributes);
    writer.finish()
}

pub fn encode_metric_stream_entry(record: &MetricStreamRecord) -> Vec<u8> {
    let mut writer = PayloadWriter::with_kind(RecordKind::MetricStream);
    writer.put_u32(record.handle);
    writer.put_u32(record.scope);
    writer.put_u32(record.name);
    writer.put_u32(record.description);
    writer.put_u32(record.unit);
    put_aggregation(&mut writer, &record.aggregation);
    writer.finish()
}

/// Decode a framed dictionary record (kind byte first).
pub fn decode_dictionary_record(bytes: &[u8]) -> ExporterResult<DictionaryRecord> {
    let mut reader = PayloadReader::new(bytes);
    let kind = RecordKind::from_u8(reader.u8()?)?;
    let record = match kind {
        RecordKind::String => {
            let handle = reader.u32()?;
            let value = std::str::from_utf8(reader.rest())
                .map_err(|e| ExporterError::decode(format!("string entry not UTF-8: {e}")))?
                .to_string();
            DictionaryRecord::String { handle, value }
        }
        RecordKind::AttributeSet => {
            let handle = reader.u32()?;
            let count = reader.u32()? as usize;
            // File-supplied count; let the per-element bounds check catch
            // a corrupt value rather than pre-reserving.
            let mut entries = Vec::new();
            for _ in 0..count {
                let key = reader.u32()?;
                let value = read_value(&mut reader)?;
                entries.push((key, value));
            }
            DictionaryRecord::AttributeSet { handle, entries }
        }
        RecordKind::Resource => DictionaryRecord::Resource(ResourceRecord {
            handle: reader.u32()?,
            attributes: reader.u32()?,
            schema_url: reader.u32()?,
        }),
        RecordKind::Scope => DictionaryRecord::Scope(ScopeRecord {
            handle: reader.u32()?,
            resource: reader.u32()?,
            name: reader.u32()?,
            version: reader.u32()?,
            attributes: reader.u32()?,
        }),
        RecordKind::MetricStream => {
            let handle = reader.u32()?;
            let scope = reader.u32()?;
            let name = reader.u32()?;
            let description = reader.u32()?;
            let unit = reader.u32()?;
            let aggregation = read_aggregation(&mut reader)?;
            DictionaryRecord::MetricStream(MetricStreamRecord {
                handle,
                scope,
                name,
                description,
                unit,
                aggregation,
            })
        }
        other => {
            return Err(ExporterError::decode(format!(
                "lane record kind {other:?} in the dictionary region"
            )))
        }
    };
    reader.done()?;
    Ok(record)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn measurement_round_trip() {
        let record = MeasurementRecord {
            stream: 7,
            attributes: 3,
            time_ns: 1_000_000_123,
            value: MeasurementValue::Double(10.5),
            span_context: Some(SpanContext {
                trace_id: [0x11; 16],
                span_id: [0x22; 8],
                flags: SPAN_FLAG_SAMPLED,
            }),
        };
        let bytes = encode_measurement(&record);
        assert_eq!(bytes[0], RecordKind::Measurement as u8);
        match decode_lane_record(&bytes).unwrap() {
            LaneRecord::Measurement(decoded) => assert_eq!(decoded, record),
            other => panic!("unexpected record {other:?}"),
        }
    }

    #[test]
    fn span_start_round_trip_without_parent() {
        let record = SpanStartRecord {
            scope: 2,
            trace_id: [9; 16],
            span_id: [8; 8],
            parent_span_id: None,
            flags: 1,
            name: 4,
            kind: SpanKind::Server,
            start_time_ns: 1000,
            attributes: 1,
        };
        let bytes = encode_span_start(&record);
        match decode_lane_record(&bytes).unwrap() {
            LaneRecord::SpanStart(decoded) => assert_eq!(decoded, record),
            other => panic!("unexpected record {other:?}"),
        }
    }

    #[test]
    fn span_end_round_trip() {
        let record = SpanEndRecord {
            scope: 2,
            trace_id: [9; 16],
            span_id: [8; 8],
            end_time_ns: 2000,
        };
        let bytes = encode_span_end(&record);
        match decode_lane_record(&bytes).unwrap() {
            LaneRecord::SpanEnd(decoded) => assert_eq!(decoded, record),
            other => panic!("unexpected record {other:?}"),
        }
    }

    #[test]
    fn event_round_trip() {
        let record = EventRecord {
            scope: 5,
            span_context: None,
            name: 6,
            time_ns: 1500,
            severity_number: 9,
            severity_text: 7,
            attributes: 2,
        };
        let bytes = encode_event(&record);
        match decode_lane_record(&bytes).unwrap() {
            LaneRecord::Event(decoded) => assert_eq!(decoded, record),
            other => panic!("unexpected record {other:?}"),
        }
    }

    #[test]
    fn attribute_set_entry_round_trip() {
        let entries = vec![
            (1, ValueRef::String(2)),
            (3, ValueRef::Int(-5)),
            (4, ValueRef::Double(2.5f64.to_bits())),
            (5, ValueRef::Bool(true)),
            (6, ValueRef::Bytes(vec![1, 2, 3])),
            (7, ValueRef::Array(vec![ValueRef::Int(1), ValueRef::Int(2)])),
        ];
        let bytes = encode_attribute_set_entry(9, &entries);
        match decode_dictionary_record(&bytes).unwrap() {
            DictionaryRecord::AttributeSet { handle, entries: decoded } => {
                assert_eq!(handle, 9);
                assert_eq!(decoded, entries);
            }
            other => panic!("unexpected record {other:?}"),
        }
    }

    #[test]
    fn metric_stream_entry_round_trip() {
        let record = MetricStreamRecord {
            handle: 1,
            scope: 2,
            name: 3,
            description: 4,
            unit: 5,
            aggregation: Aggregation::Histogram {
                temporality: Temporality::Delta,
                bucket_boundaries: vec![0.5, 1.0, 2.0],
            },
        };
        let bytes = encode_metric_stream_entry(&record);
        match decode_dictionary_record(&bytes).unwrap() {
            DictionaryRecord::MetricStream(decoded) => assert_eq!(decoded, record),
            other => panic!("unexpected record {other:?}"),
        }
    }

    #[test]
    fn string_entry_round_trip() {
        let bytes = encode_string_entry(12, "service.name");
        match decode_dictionary_record(&bytes).unwrap() {
            DictionaryRecord::String { handle, value } => {
                assert_eq!(handle, 12);
                assert_eq!(value, "service.name");
            }
            other => panic!("unexpected record {other:?}"),
        }
    }

    #[test]
    fn lane_kind_in_dictionary_is_rejected() {
        let bytes = encode_span_end(&SpanEndRecord {
            scope: 1,
            trace_id: [0; 16],
            span_id: [0; 8],
            end_time_ns: 1,
        });
        assert!(decode_dictionary_record(&bytes).is_err());
    }

    #[test]
    fn oversized_entry_count_is_rejected_not_allocated() {
        // kind = AttributeSet, handle 1, count u32::MAX, no entries
        let mut bytes = vec![RecordKind::AttributeSet as u8];
        bytes.extend_from_slice(&1u32.to_le_bytes());
        bytes.extend_from_slice(&u32::MAX.to_le_bytes());
        assert!(decode_dictionary_record(&bytes).is_err());

        // same for a histogram boundary count
        let mut bytes = vec![RecordKind::MetricStream as u8];
        bytes.extend_from_slice(&1u32.to_le_bytes());
        for handle in [2u32, 3, 4, 5] {
            bytes.extend_from_slice(&handle.to_le_bytes());
        }
        bytes.push(3); // histogram aggregation
        bytes.push(1); // delta temporality
        bytes.extend_from_slice(&u32::MAX.to_le_bytes());
        assert!(decode_dictionary_record(&bytes).is_err());
    }

    #[test]
    fn truncated_record_is_rejected() {
        let bytes = encode_span_end(&SpanEndRecord {
            scope: 1,
            trace_id: [0; 16],
            span_id: [0; 8],
            end_time_ns: 1,
        });
        assert!(decode_lane_record(&bytes[..bytes.len() - 4]).is_err());
    }
}
