//! Publishing boundary. The orchestrator hands every record to an
//! [`EventSink`] exactly once and never retries on its behalf.

use std::io::{self, Write};

use tracing::warn;

use pf_core::{EventEnvelope, PlantRecord, Stream};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishOutcome {
    Accepted,
    /// The sink could not take the record now; redelivery is its own concern.
    RetryLater,
}

pub trait EventSink {
    fn publish(&mut self, stream: Stream, record: &EventEnvelope<PlantRecord>) -> PublishOutcome;

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Keeps published records in memory, optionally up to a fixed capacity.
#[derive(Debug, Default)]
pub struct MemorySink {
    records: Vec<(Stream, EventEnvelope<PlantRecord>)>,
    capacity: Option<usize>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accepts `capacity` records, then answers `RetryLater`.
    pub fn bounded(capacity: usize) -> Self {
        Self { records: Vec::new(), capacity: Some(capacity) }
    }

    pub fn records(&self) -> &[(Stream, EventEnvelope<PlantRecord>)] {
        &self.records
    }

    pub fn stream(&self, stream: Stream) -> impl Iterator<Item = &PlantRecord> + '_ {
        self.records
            .iter()
            .filter(move |(s, _)| *s == stream)
            .map(|(_, env)| &env.payload)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn into_records(self) -> Vec<(Stream, EventEnvelope<PlantRecord>)> {
        self.records
    }
}

impl EventSink for MemorySink {
    fn publish(&mut self, stream: Stream, record: &EventEnvelope<PlantRecord>) -> PublishOutcome {
        if self.capacity.is_some_and(|cap| self.records.len() >= cap) {
            return PublishOutcome::RetryLater;
        }
        self.records.push((stream, record.clone()));
        PublishOutcome::Accepted
    }
}

/// Writes one JSON envelope per line; the envelope kind names the stream.
pub struct JsonLinesSink<W: Write> {
    writer: W,
    written: u64,
}

impl<W: Write> JsonLinesSink<W> {
    pub fn new(writer: W) -> Self {
        Self { writer, written: 0 }
    }

    pub fn written(&self) -> u64 {
        self.written
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write> EventSink for JsonLinesSink<W> {
    fn publish(&mut self, stream: Stream, record: &EventEnvelope<PlantRecord>) -> PublishOutcome {
        let line = match record.to_json_line() {
            Ok(line) => line,
            Err(err) => {
                warn!(stream = stream.as_str(), error = %err, "record could not be serialized");
                return PublishOutcome::RetryLater;
            }
        };
        match writeln!(self.writer, "{line}") {
            Ok(()) => {
                self.written += 1;
                PublishOutcome::Accepted
            }
            Err(err) => {
                warn!(stream = stream.as_str(), error = %err, "write failed");
                PublishOutcome::RetryLater
            }
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        self.writer.flush()
    }
}
