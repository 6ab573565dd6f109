use std::fmt;

use bytes::{Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use tracing::trace;

use super::{
    frame::{Frame, FrameSink},
    marker::{FRAME_END, FRAME_START, find_marker},
};

const LOOKBACK: &[u8] = &[0xFF];

/// Optional demuxer settings. The defaults are right for every well-formed
/// stream; nothing here is required.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DemuxConfig {
    /// Keep a trailing `FF` of an idle chunk so that a start marker split
    /// across two writes is still recognised. When off, the search for a
    /// start marker is scoped to the current chunk and such a frame is lost.
    pub split_start_lookback: bool,
}

impl Default for DemuxConfig {
    fn default() -> Self {
        Self {
            split_start_lookback: true,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DemuxStats {
    pub frames_emitted: u64,
    /// Bytes seen outside any frame (boundary text, filler, lost fragments).
    pub bytes_discarded: u64,
    pub pending_bytes: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Idle,
    Accumulating,
}

/// Segments of the frame in progress. Every segment is non-empty.
#[derive(Debug, Default)]
struct Pending {
    segments: Vec<Bytes>,
    len: usize,
}

impl Pending {
    fn push(&mut self, segment: Bytes) {
        if segment.is_empty() {
            return;
        }
        self.len += segment.len();
        self.segments.push(segment);
    }

    fn last_byte(&self) -> Option<u8> {
        self.segments.last().and_then(|s| s.last()).copied()
    }

    fn concat(&self) -> Bytes {
        match self.segments.as_slice() {
            [] => Bytes::new(),
            [only] => only.clone(),
            segments => {
                let mut out = BytesMut::with_capacity(self.len);
                for segment in segments {
                    out.extend_from_slice(segment);
                }
                out.freeze()
            }
        }
    }

    fn take(&mut self) -> Bytes {
        let frame = self.concat();
        self.clear();
        frame
    }

    fn clear(&mut self) {
        self.segments.clear();
        self.len = 0;
    }
}

/// The marker scanning state machine, kept apart from the observer list so
/// the two can be borrowed independently while a chunk is processed.
#[derive(Debug)]
struct Scanner {
    config: DemuxConfig,
    state: State,
    pending: Pending,
    lookback: bool,
    frames_emitted: u64,
    bytes_discarded: u64,
}

impl Scanner {
    fn new(config: DemuxConfig) -> Self {
        Self {
            config,
            state: State::Idle,
            pending: Pending::default(),
            lookback: false,
            frames_emitted: 0,
            bytes_discarded: 0,
        }
    }

    fn write<F: FnMut(Frame)>(&mut self, chunk: Bytes, emit: &mut F) {
        if chunk.is_empty() {
            return;
        }

        let mut pos = self.resume_split_start(&chunk);
        while pos < chunk.len() {
            pos = match self.state {
                State::Idle => self.scan_idle(&chunk, pos, emit),
                State::Accumulating => self.scan_accumulating(&chunk, pos, emit),
            };
        }
    }

    /// Completes a start marker whose `FF` ended the previous chunk.
    fn resume_split_start(&mut self, chunk: &Bytes) -> usize {
        if !std::mem::take(&mut self.lookback) {
            return 0;
        }

        if chunk[0] == FRAME_START[1] {
            self.pending.push(Bytes::from_static(LOOKBACK));
            self.pending.push(chunk.slice(..1));
            self.state = State::Accumulating;
            1
        } else {
            self.bytes_discarded += 1;
            0
        }
    }

    fn scan_idle<F: FnMut(Frame)>(&mut self, chunk: &Bytes, pos: usize, emit: &mut F) -> usize {
        let rest = &chunk[pos..];
        let Some(offset) = find_marker(rest, &FRAME_START) else {
            let mut discarded = rest.len();
            if self.config.split_start_lookback && rest.last() == Some(&FRAME_START[0]) {
                self.lookback = true;
                discarded -= 1;
            }
            self.bytes_discarded += discarded as u64;
            return chunk.len();
        };

        let start = pos + offset;
        self.bytes_discarded += offset as u64;

        let body = start + FRAME_START.len();
        match find_marker(&chunk[body..], &FRAME_END) {
            Some(offset) => {
                let end = body + offset + FRAME_END.len();
                self.emit(chunk.slice(start..end), emit);
                end
            }
            None => {
                self.pending.push(chunk.slice(start..));
                self.state = State::Accumulating;
                chunk.len()
            }
        }
    }

    fn scan_accumulating<F: FnMut(Frame)>(
        &mut self,
        chunk: &Bytes,
        pos: usize,
        emit: &mut F,
    ) -> usize {
        // End marker split across the chunk boundary.
        if self.pending.last_byte() == Some(FRAME_END[0]) && chunk[pos] == FRAME_END[1] {
            let end = pos + 1;
            self.pending.push(chunk.slice(pos..end));
            self.finish(emit);
            return end;
        }

        match find_marker(&chunk[pos..], &FRAME_END) {
            Some(offset) => {
                let end = pos + offset + FRAME_END.len();
                self.pending.push(chunk.slice(pos..end));
                self.finish(emit);
                end
            }
            None => {
                self.pending.push(chunk.slice(pos..));
                chunk.len()
            }
        }
    }

    fn finish<F: FnMut(Frame)>(&mut self, emit: &mut F) {
        let data = self.pending.take();
        self.state = State::Idle;
        self.emit(data, emit);
    }

    fn emit<F: FnMut(Frame)>(&mut self, data: Bytes, emit: &mut F) {
        let seq = self.frames_emitted;
        self.frames_emitted += 1;
        trace!(seq, len = data.len(), "frame complete");
        emit(Frame::new(seq, data));
    }

    fn reset(&mut self) {
        self.pending.clear();
        self.state = State::Idle;
        self.lookback = false;
    }
}

/// Splits a Motion-JPEG byte stream into complete JPEG frames.
///
/// Feed it chunks in stream order with [`write`](Self::write); every frame
/// whose end marker arrives during a call is delivered to all subscribed
/// observers before the call returns. Inside an open frame a start marker
/// is payload, not a new boundary.
///
/// ```
/// use mjpeg_tap::FrameDemuxer;
/// use std::sync::{Arc, Mutex};
///
/// let frames = Arc::new(Mutex::new(Vec::new()));
/// let mut demuxer = FrameDemuxer::new();
/// let seen = frames.clone();
/// demuxer.subscribe(move |frame: mjpeg_tap::Frame| seen.lock().unwrap().push(frame));
///
/// demuxer.write_slice(b"--boundary\r\n\xFF\xD8abc");
/// demuxer.write_slice(b"def\xFF\xD9");
///
/// let frames = frames.lock().unwrap();
/// assert_eq!(frames.len(), 1);
/// assert_eq!(frames[0].as_ref(), b"\xFF\xD8abcdef\xFF\xD9");
/// ```
pub struct FrameDemuxer {
    scanner: Scanner,
    sinks: Vec<Box<dyn FrameSink>>,
}

impl FrameDemuxer {
    pub fn new() -> Self {
        Self::with_config(DemuxConfig::default())
    }

    pub fn with_config(config: DemuxConfig) -> Self {
        Self {
            scanner: Scanner::new(config),
            sinks: Vec::new(),
        }
    }

    pub fn config(&self) -> DemuxConfig {
        self.scanner.config
    }

    /// Registers an observer. Every later frame goes to every observer, in
    /// registration order.
    pub fn subscribe(&mut self, sink: impl FrameSink + 'static) {
        self.sinks.push(Box::new(sink));
    }

    pub fn observer_count(&self) -> usize {
        self.sinks.len()
    }

    /// Processes one chunk and notifies observers of each completed frame.
    pub fn write(&mut self, chunk: impl Into<Bytes>) {
        let sinks = &mut self.sinks;
        self.scanner
            .write(chunk.into(), &mut |frame| dispatch(sinks.as_mut_slice(), frame));
    }

    pub fn write_slice(&mut self, chunk: &[u8]) {
        self.write(Bytes::copy_from_slice(chunk));
    }

    /// Same as [`write`](Self::write), but completed frames go to `emit`
    /// instead of the registered observers.
    pub fn write_with<F: FnMut(Frame)>(&mut self, chunk: impl Into<Bytes>, mut emit: F) {
        self.scanner.write(chunk.into(), &mut emit);
    }

    pub fn is_accumulating(&self) -> bool {
        self.scanner.state == State::Accumulating
    }

    pub fn pending_len(&self) -> usize {
        self.scanner.pending.len
    }

    /// Copy of the bytes collected so far for the frame in progress.
    pub fn pending_bytes(&self) -> Bytes {
        self.scanner.pending.concat()
    }

    pub fn stats(&self) -> DemuxStats {
        DemuxStats {
            frames_emitted: self.scanner.frames_emitted,
            bytes_discarded: self.scanner.bytes_discarded,
            pending_bytes: self.scanner.pending.len,
        }
    }

    /// Drops the frame in progress, if any. Counters are kept.
    pub fn reset(&mut self) {
        self.scanner.reset();
    }
}

impl Default for FrameDemuxer {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for FrameDemuxer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrameDemuxer")
            .field("scanner", &self.scanner)
            .field("observers", &self.sinks.len())
            .finish()
    }
}

fn dispatch(sinks: &mut [Box<dyn FrameSink>], frame: Frame) {
    let Some((last, rest)) = sinks.split_last_mut() else {
        return;
    };
    for sink in rest {
        sink.on_frame(frame.clone());
    }
    last.on_frame(frame);
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use bytes::Bytes;
    use proptest::prelude::*;

    use super::{DemuxConfig, FrameDemuxer};
    use crate::demux::Frame;

    fn fake_jpeg(payload: &[u8]) -> Vec<u8> {
        let mut out = vec![0xFF, 0xD8];
        out.extend_from_slice(payload);
        out.extend_from_slice(&[0xFF, 0xD9]);
        out
    }

    fn feed(demuxer: &mut FrameDemuxer, chunks: &[&[u8]]) -> Vec<Vec<u8>> {
        let mut frames = Vec::new();
        for chunk in chunks {
            demuxer.write_with(Bytes::copy_from_slice(chunk), |frame| {
                frames.push(frame.as_ref().to_vec())
            });
        }
        frames
    }

    fn split_at_points<'a>(data: &'a [u8], points: &[usize]) -> Vec<&'a [u8]> {
        let mut chunks = Vec::new();
        let mut last = 0;
        for &point in points {
            chunks.push(&data[last..point]);
            last = point;
        }
        chunks.push(&data[last..]);
        chunks
    }

    #[test]
    fn single_chunk_frame_is_emitted_whole() {
        let frame = fake_jpeg(b"abc");
        let mut demuxer = FrameDemuxer::new();

        let frames = feed(&mut demuxer, &[&frame]);

        assert_eq!(frames, vec![frame]);
        assert!(!demuxer.is_accumulating());
        assert_eq!(demuxer.pending_len(), 0);
    }

    #[test]
    fn multiple_frames_in_one_chunk_keep_order() {
        let first = fake_jpeg(b"A");
        let second = fake_jpeg(b"B");
        let mut chunk = first.clone();
        chunk.extend_from_slice(&second);

        let mut demuxer = FrameDemuxer::new();
        let frames = feed(&mut demuxer, &[&chunk]);

        assert_eq!(frames, vec![first, second]);
        assert_eq!(demuxer.stats().frames_emitted, 2);
    }

    #[test]
    fn frame_split_across_chunks_is_reassembled() {
        let mut demuxer = FrameDemuxer::new();

        let frames = feed(&mut demuxer, &[&[0xFF, 0xD8, b'A'], &[b'B', 0xFF, 0xD9]]);

        assert_eq!(frames, vec![vec![0xFF, 0xD8, b'A', b'B', 0xFF, 0xD9]]);
    }

    #[test]
    fn frame_spanning_many_chunks_is_reassembled() {
        let frame = fake_jpeg(b"hello-world, this is a longer payload");
        let chunks: Vec<&[u8]> = frame.chunks(3).collect();
        let mut demuxer = FrameDemuxer::new();

        let frames = feed(&mut demuxer, &chunks);

        assert_eq!(frames, vec![frame]);
    }

    #[test]
    fn leading_garbage_is_discarded() {
        let mut demuxer = FrameDemuxer::new();

        let frames = feed(&mut demuxer, &[&[0x00, 0x11, 0x22, 0xFF, 0xD8, b'A', 0xFF, 0xD9]]);

        assert_eq!(frames, vec![vec![0xFF, 0xD8, b'A', 0xFF, 0xD9]]);
        assert_eq!(demuxer.stats().bytes_discarded, 3);
    }

    #[test]
    fn multipart_boundary_text_never_reaches_frames() {
        let first = fake_jpeg(b"one");
        let second = fake_jpeg(b"two");
        let mut stream = b"--mjpegtap\r\nContent-Type: image/jpeg\r\n\r\n".to_vec();
        stream.extend_from_slice(&first);
        stream.extend_from_slice(b"\r\n--mjpegtap\r\nContent-Type: image/jpeg\r\n\r\n");
        stream.extend_from_slice(&second);
        stream.extend_from_slice(b"\r\n");

        let mut demuxer = FrameDemuxer::new();
        let frames = feed(&mut demuxer, &[&stream]);

        assert_eq!(frames, vec![first, second]);
    }

    #[test]
    fn unterminated_frame_stays_pending() {
        let mut demuxer = FrameDemuxer::new();

        let frames = feed(&mut demuxer, &[&[0xFF, 0xD8, b'A']]);

        assert!(frames.is_empty());
        assert!(demuxer.is_accumulating());
        assert_eq!(demuxer.pending_bytes().as_ref(), &[0xFF, 0xD8, b'A']);
        assert_eq!(demuxer.stats().pending_bytes, 3);
    }

    #[test]
    fn start_marker_inside_open_frame_is_payload() {
        let mut demuxer = FrameDemuxer::new();

        let frames = feed(
            &mut demuxer,
            &[&[0xFF, 0xD8, b'A'], &[0xFF, 0xD8, b'B', 0xFF, 0xD9]],
        );

        assert_eq!(
            frames,
            vec![vec![0xFF, 0xD8, b'A', 0xFF, 0xD8, b'B', 0xFF, 0xD9]]
        );
    }

    #[test]
    fn end_marker_before_start_in_same_chunk_is_ignored() {
        let mut demuxer = FrameDemuxer::new();

        let frames = feed(&mut demuxer, &[&[0xFF, 0xD9, 0x01, 0xFF, 0xD8, b'Z', 0xFF, 0xD9]]);

        assert_eq!(frames, vec![vec![0xFF, 0xD8, b'Z', 0xFF, 0xD9]]);
    }

    #[test]
    fn split_end_marker_closes_frame() {
        let mut demuxer = FrameDemuxer::new();

        let frames = feed(
            &mut demuxer,
            &[&[0xFF, 0xD8, b'A', 0xFF], &[0xD9, 0xFF, 0xD8, b'B', 0xFF, 0xD9]],
        );

        assert_eq!(
            frames,
            vec![
                vec![0xFF, 0xD8, b'A', 0xFF, 0xD9],
                vec![0xFF, 0xD8, b'B', 0xFF, 0xD9],
            ]
        );
    }

    #[test]
    fn split_start_marker_is_recovered_with_lookback() {
        let mut demuxer = FrameDemuxer::new();

        let frames = feed(&mut demuxer, &[&[0x00, 0xFF], &[0xD8, b'A', 0xFF, 0xD9]]);

        assert_eq!(frames, vec![vec![0xFF, 0xD8, b'A', 0xFF, 0xD9]]);
        assert_eq!(demuxer.stats().bytes_discarded, 1);
    }

    #[test]
    fn split_start_marker_is_lost_without_lookback() {
        let mut demuxer = FrameDemuxer::with_config(DemuxConfig {
            split_start_lookback: false,
        });

        let frames = feed(&mut demuxer, &[&[0x00, 0xFF], &[0xD8, b'A', 0xFF, 0xD9]]);

        assert!(frames.is_empty());
        assert!(!demuxer.is_accumulating());
    }

    #[test]
    fn lookback_byte_not_followed_by_start_is_discarded() {
        let mut demuxer = FrameDemuxer::new();

        let frames = feed(&mut demuxer, &[&[0xFF], &[0x00, 0xFF, 0xD8, 0xFF, 0xD9]]);

        assert_eq!(frames, vec![vec![0xFF, 0xD8, 0xFF, 0xD9]]);
        assert_eq!(demuxer.stats().bytes_discarded, 2);
    }

    #[test]
    fn empty_chunks_do_not_disturb_state() {
        let mut demuxer = FrameDemuxer::new();

        let frames = feed(&mut demuxer, &[&[0x00, 0xFF], &[], &[0xD8, 0xFF, 0xD9]]);

        assert_eq!(frames, vec![vec![0xFF, 0xD8, 0xFF, 0xD9]]);
    }

    #[test]
    fn single_chunk_frame_is_zero_copy() {
        let chunk = Bytes::from(fake_jpeg(b"zero-copy"));
        let mut demuxer = FrameDemuxer::new();
        let mut frames = Vec::new();

        demuxer.write_with(chunk.clone(), |frame| frames.push(frame));

        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].data().as_ptr(), chunk.as_ptr());
    }

    #[test]
    fn every_observer_sees_every_frame_in_order() {
        let first = Arc::new(Mutex::new(Vec::new()));
        let second = Arc::new(Mutex::new(Vec::new()));
        let mut demuxer = FrameDemuxer::new();
        {
            let first = first.clone();
            demuxer.subscribe(move |frame: Frame| first.lock().unwrap().push(frame.seq()));
        }
        {
            let second = second.clone();
            demuxer.subscribe(move |frame: Frame| second.lock().unwrap().push(frame.seq()));
        }

        let mut chunk = fake_jpeg(b"1");
        chunk.extend_from_slice(&fake_jpeg(b"2"));
        demuxer.write(chunk);
        demuxer.write(fake_jpeg(b"3"));

        assert_eq!(demuxer.observer_count(), 2);
        assert_eq!(*first.lock().unwrap(), vec![0, 1, 2]);
        assert_eq!(*second.lock().unwrap(), vec![0, 1, 2]);
    }

    #[test]
    fn reset_drops_frame_in_progress() {
        let mut demuxer = FrameDemuxer::new();
        feed(&mut demuxer, &[&[0xFF, 0xD8, b'A']]);

        demuxer.reset();
        let frames = feed(&mut demuxer, &[&[b'B', 0xFF, 0xD9, 0xFF, 0xD8, 0xFF, 0xD9]]);

        assert_eq!(frames, vec![vec![0xFF, 0xD8, 0xFF, 0xD9]]);
        assert_eq!(demuxer.pending_len(), 0);
    }

    #[test]
    fn config_deserializes_with_defaults() {
        let config: DemuxConfig = serde_json::from_str("{}").expect("empty config should parse");
        assert_eq!(config, DemuxConfig::default());
        assert!(config.split_start_lookback);
    }

    fn payload() -> impl Strategy<Value = Vec<u8>> {
        prop::collection::vec(0u8..0xFF, 0..24)
    }

    proptest! {
        #[test]
        fn rechunking_does_not_change_frames(
            parts in prop::collection::vec((payload(), payload()), 1..6),
            cuts in prop::collection::vec(any::<prop::sample::Index>(), 0..12),
        ) {
            let mut stream = Vec::new();
            let mut expected = Vec::new();
            for (filler, body) in &parts {
                stream.extend_from_slice(filler);
                let frame = fake_jpeg(body);
                stream.extend_from_slice(&frame);
                expected.push(frame);
            }

            let mut points: Vec<usize> = cuts.iter().map(|cut| cut.index(stream.len() + 1)).collect();
            points.sort_unstable();
            points.dedup();

            let mut demuxer = FrameDemuxer::new();
            let frames = feed(&mut demuxer, &split_at_points(&stream, &points));

            prop_assert_eq!(frames, expected);
            prop_assert_eq!(demuxer.pending_len(), 0);
        }
    }
}
