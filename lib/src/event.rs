//! Wyoming events this crate reacts to, and a reader for the wire format.
//!
//! An event on the wire is a single JSON header line, optionally followed by
//! `data_length` bytes of JSON data and `payload_length` bytes of binary
//! payload. Only the header's `type` matters here; everything else is skipped.

use std::io;

use log::debug;
use serde::Deserialize;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt};

/// Longest header line accepted before the stream is treated as garbage.
pub const MAX_HEADER_LEN: u64 = 64 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    StreamingStarted,
    VoiceStarted,
    Detection,
    Transcript,
    StreamingStopped,
    RunSatellite,
    SatelliteConnected,
    SatelliteDisconnected,
}

impl EventKind {
    pub const ALL: [EventKind; 8] = [
        EventKind::StreamingStarted,
        EventKind::VoiceStarted,
        EventKind::Detection,
        EventKind::Transcript,
        EventKind::StreamingStopped,
        EventKind::RunSatellite,
        EventKind::SatelliteConnected,
        EventKind::SatelliteDisconnected,
    ];

    /// Maps a Wyoming `type` string. Anything else is not ours to handle.
    pub fn from_type(event_type: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.as_type() == event_type)
    }

    pub fn as_type(&self) -> &'static str {
        match self {
            EventKind::StreamingStarted => "streaming-started",
            EventKind::VoiceStarted => "voice-started",
            EventKind::Detection => "detection",
            EventKind::Transcript => "transcript",
            EventKind::StreamingStopped => "streaming-stopped",
            EventKind::RunSatellite => "run-satellite",
            EventKind::SatelliteConnected => "satellite-connected",
            EventKind::SatelliteDisconnected => "satellite-disconnected",
        }
    }
}

#[derive(Deserialize)]
struct Header {
    #[serde(rename = "type")]
    event_type: String,
    #[serde(default)]
    data_length: Option<u64>,
    #[serde(default)]
    payload_length: Option<u64>,
}

pub struct EventReader<R> {
    reader: R,
    line: Vec<u8>,
}

impl<R> EventReader<R>
where
    R: AsyncBufRead + Unpin,
{
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            line: Vec::new(),
        }
    }

    /// Bytes discarded, or `None` if the stream ended first.
    async fn skip(&mut self, len: u64) -> io::Result<Option<()>> {
        if len == 0 {
            return Ok(Some(()));
        }
        let mut limited = (&mut self.reader).take(len);
        let skipped = tokio::io::copy(&mut limited, &mut tokio::io::sink()).await?;
        Ok((skipped == len).then_some(()))
    }

    /// Next recognized event, or `None` at end of stream.
    ///
    /// Malformed headers and unknown event types are skipped. Only a header
    /// longer than [`MAX_HEADER_LEN`] is an error, since there is no way to
    /// find the next event after it.
    pub async fn next_event(&mut self) -> io::Result<Option<EventKind>> {
        loop {
            self.line.clear();
            let read = (&mut self.reader)
                .take(MAX_HEADER_LEN)
                .read_until(b'\n', &mut self.line)
                .await?;
            if read == 0 {
                return Ok(None);
            }
            if self.line.last() != Some(&b'\n') {
                if read as u64 >= MAX_HEADER_LEN {
                    return Err(io::Error::new(
                        io::ErrorKind::InvalidData,
                        "event header too long",
                    ));
                }
                // truncated final line
                return Ok(None);
            }

            let header: Header = match serde_json::from_slice(&self.line) {
                Ok(header) => header,
                Err(e) => {
                    debug!("skipping malformed event header: {e}");
                    continue;
                }
            };

            let extra = header
                .data_length
                .unwrap_or(0)
                .checked_add(header.payload_length.unwrap_or(0))
                .ok_or_else(|| {
                    io::Error::new(io::ErrorKind::InvalidData, "event body length overflows")
                })?;
            if self.skip(extra).await?.is_none() {
                return Ok(None);
            }

            match EventKind::from_type(&header.event_type) {
                Some(kind) => return Ok(Some(kind)),
                None => debug!("ignoring event {}", header.event_type),
            }
        }
    }
}
