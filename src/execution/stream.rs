//! Standard stream plumbing between the supervisor and the child
//!
//! Each stream is served by its own thread. Threads are spawned before the
//! child exists, report themselves alive, then block on the readiness gate;
//! the pipe is attached by the supervisor after a successful launch.
//!
//! Pipes are switched to non-blocking mode and every wait is a short `poll`
//! tick, so disposing a feeder or drain unblocks its thread promptly even
//! when the child never reads or never writes.

use std::fs::File;
use std::io::{self, Read, Write};
use std::os::fd::{AsRawFd, OwnedFd, RawFd};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};

use log::debug;

use crate::execution::sync::{Flag, Latch};

/// Bytes read from the input source per write to the child
pub const FEED_CHUNK_SIZE: usize = 4096;
/// Bytes read from an output pipe per decode step
pub const DRAIN_CHUNK_SIZE: usize = 1024;
/// Upper bound on how long a stream thread goes without checking for disposal
const POLL_TICK_MS: i32 = 50;

/// Receives decoded output; `None` marks end of stream and is delivered
/// exactly once
pub type OutputConsumer = Box<dyn FnMut(Option<&str>) -> io::Result<()> + Send>;

/// Called once when the consumer fails
pub type FaultHook = Box<dyn FnOnce(io::Error) + Send>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poison| poison.into_inner())
}

/// Consumer writing into `writer`, flushed and dropped on end of stream
pub fn sink_consumer(writer: Box<dyn Write + Send>) -> OutputConsumer {
    let mut writer = Some(writer);
    Box::new(move |chunk| match chunk {
        Some(text) => match writer.as_mut() {
            Some(sink) => sink.write_all(text.as_bytes()),
            None => Ok(()),
        },
        None => match writer.take() {
            Some(mut sink) => sink.flush(),
            None => Ok(()),
        },
    })
}

pub(crate) fn set_nonblocking(fd: RawFd) -> io::Result<()> {
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFL) };
    if flags < 0 {
        return Err(io::Error::last_os_error());
    }
    if unsafe { libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) } < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// Wait for `events` on `fd`; `Ok(false)` on timeout or interruption
fn poll_fd(fd: RawFd, events: libc::c_short, timeout_ms: i32) -> io::Result<bool> {
    let mut pollfd = libc::pollfd {
        fd,
        events,
        revents: 0,
    };

    let ret = unsafe { libc::poll(&mut pollfd, 1, timeout_ms) };
    if ret < 0 {
        let err = io::Error::last_os_error();
        if err.kind() == io::ErrorKind::Interrupted {
            return Ok(false);
        }
        return Err(err);
    }
    Ok(ret > 0)
}

fn attach_pipe(slot: &Mutex<Option<File>>, pipe: OwnedFd) -> io::Result<()> {
    set_nonblocking(pipe.as_raw_fd())?;
    *lock(slot) = Some(File::from(pipe));
    Ok(())
}

/// Incremental UTF-8 decoder.
///
/// Sequences split across reads are carried over to the next call; invalid
/// bytes become U+FFFD.
#[derive(Debug, Default)]
pub struct Utf8Decoder {
    pending: Vec<u8>,
}

impl Utf8Decoder {
    pub fn decode(&mut self, bytes: &[u8]) -> String {
        self.pending.extend_from_slice(bytes);

        let mut text = String::with_capacity(self.pending.len());
        loop {
            match std::str::from_utf8(&self.pending) {
                Ok(valid) => {
                    text.push_str(valid);
                    self.pending.clear();
                    break;
                }
                Err(e) => {
                    let valid_up_to = e.valid_up_to();
                    text.push_str(&String::from_utf8_lossy(&self.pending[..valid_up_to]));
                    match e.error_len() {
                        Some(invalid) => {
                            text.push(char::REPLACEMENT_CHARACTER);
                            self.pending.drain(..valid_up_to + invalid);
                        }
                        None => {
                            // incomplete sequence at the end, wait for more bytes
                            self.pending.drain(..valid_up_to);
                            break;
                        }
                    }
                }
            }
        }
        text
    }

    /// Flush a dangling partial sequence
    pub fn finish(&mut self) -> String {
        if self.pending.is_empty() {
            String::new()
        } else {
            self.pending.clear();
            char::REPLACEMENT_CHARACTER.to_string()
        }
    }
}

/// Feeds the input source into the child's stdin
pub struct StreamFeeder {
    shared: Arc<FeederShared>,
}

struct FeederShared {
    source: Mutex<Option<Box<dyn Read + Send>>>,
    pipe: Mutex<Option<File>>,
    disposed: Flag,
}

impl StreamFeeder {
    pub fn new(source: Box<dyn Read + Send>) -> Self {
        Self {
            shared: Arc::new(FeederShared {
                source: Mutex::new(Some(source)),
                pipe: Mutex::new(None),
                disposed: Flag::new(),
            }),
        }
    }

    /// Hand over the child's stdin
    pub fn attach(&self, pipe: impl Into<OwnedFd>) -> io::Result<()> {
        attach_pipe(&self.shared.pipe, pipe.into())
    }

    /// Start the feeder thread.
    ///
    /// The thread counts `alive` down, waits for `gate`, and stops early once
    /// `terminated` is raised.
    pub fn spawn(
        &self,
        gate: Arc<Latch>,
        alive: Arc<Latch>,
        terminated: Arc<Flag>,
    ) -> io::Result<JoinHandle<()>> {
        let shared = Arc::clone(&self.shared);
        thread::Builder::new()
            .name("sandbox-stdin".to_string())
            .spawn(move || {
                alive.count_down();
                gate.wait();
                shared.run(&terminated);
            })
    }

    /// Stop feeding and close the child's stdin
    pub fn dispose(&self) {
        self.shared.disposed.raise();
        self.shared.close_pipe();
    }

    pub fn is_disposed(&self) -> bool {
        self.shared.disposed.is_raised()
    }
}

impl FeederShared {
    fn stopped(&self, terminated: &Flag) -> bool {
        self.disposed.is_raised() || terminated.is_raised()
    }

    fn run(&self, terminated: &Flag) {
        if !self.stopped(terminated) {
            let source = lock(&self.source).take();
            if let Some(mut source) = source {
                self.pump(source.as_mut(), terminated);
            }
        }
        self.close_pipe();
    }

    fn pump(&self, source: &mut dyn Read, terminated: &Flag) {
        let mut buffer = vec![0u8; FEED_CHUNK_SIZE];
        while !self.stopped(terminated) {
            let read = match source.read(&mut buffer) {
                Ok(0) => break,
                Ok(read) => read,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    debug!("Input source failed: {}", e);
                    break;
                }
            };

            if let Err(e) = self.write_all(&buffer[..read], terminated) {
                debug!("Child stdin closed: {}", e);
                break;
            }
        }
    }

    fn write_all(&self, mut data: &[u8], terminated: &Flag) -> io::Result<()> {
        while !data.is_empty() {
            if self.stopped(terminated) {
                return Err(io::Error::new(io::ErrorKind::Interrupted, "feeder stopped"));
            }

            let pipe = lock(&self.pipe);
            let mut file = pipe
                .as_ref()
                .ok_or_else(|| io::Error::from(io::ErrorKind::BrokenPipe))?;

            match file.write(data) {
                Ok(0) => return Err(io::Error::from(io::ErrorKind::WriteZero)),
                Ok(written) => data = &data[written..],
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    poll_fd(file.as_raw_fd(), libc::POLLOUT, POLL_TICK_MS)?;
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    fn close_pipe(&self) {
        if lock(&self.pipe).take().is_some() {
            debug!("Child stdin closed");
        }
    }
}

/// Live output statistics of a drain
#[derive(Debug, Default)]
pub struct OutputCounters {
    length: AtomicU64,
    exceeded: AtomicBool,
}

impl OutputCounters {
    /// Characters delivered to the consumer
    pub fn length(&self) -> u64 {
        self.length.load(Ordering::SeqCst)
    }

    pub fn exceeded(&self) -> bool {
        self.exceeded.load(Ordering::SeqCst)
    }

    fn add(&self, chars: u64) {
        self.length.fetch_add(chars, Ordering::SeqCst);
    }

    fn mark_exceeded(&self) {
        self.exceeded.store(true, Ordering::SeqCst);
    }
}

/// Final output statistics, captured when a drain is disposed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OutputSnapshot {
    pub length: u64,
    pub exceeded: bool,
}

/// Drains one output pipe of the child into a bounded consumer
pub struct StreamDrain {
    shared: Arc<DrainShared>,
}

struct DrainShared {
    name: &'static str,
    limit: Option<u64>,
    counters: Arc<OutputCounters>,
    delivery: Mutex<Delivery>,
    pipe: Mutex<Option<File>>,
    disposed: Flag,
    closed: Arc<Latch>,
}

struct Delivery {
    consumer: OutputConsumer,
    eof_posted: bool,
    on_fault: Option<FaultHook>,
}

impl Delivery {
    fn post_eof(&mut self) -> io::Result<()> {
        if self.eof_posted {
            return Ok(());
        }
        self.eof_posted = true;
        (self.consumer)(None)
    }
}

impl StreamDrain {
    /// `limit` of `None` is unlimited; `Some(0)` delivers nothing
    pub fn new(name: &'static str, limit: Option<u64>, consumer: OutputConsumer) -> Self {
        Self {
            shared: Arc::new(DrainShared {
                name,
                limit,
                counters: Arc::new(OutputCounters::default()),
                delivery: Mutex::new(Delivery {
                    consumer,
                    eof_posted: false,
                    on_fault: None,
                }),
                pipe: Mutex::new(None),
                disposed: Flag::new(),
                closed: Arc::new(Latch::new()),
            }),
        }
    }

    /// Register the hook run when the consumer fails
    pub fn set_fault_hook(&self, hook: FaultHook) {
        lock(&self.shared.delivery).on_fault = Some(hook);
    }

    /// Hand over the child's stdout or stderr
    pub fn attach(&self, pipe: impl Into<OwnedFd>) -> io::Result<()> {
        attach_pipe(&self.shared.pipe, pipe.into())
    }

    /// Opens once the pipe is closed or the drain is stopped
    pub fn closed(&self) -> Arc<Latch> {
        Arc::clone(&self.shared.closed)
    }

    pub fn output_length(&self) -> u64 {
        self.shared.counters.length()
    }

    pub fn limit_exceeded(&self) -> bool {
        self.shared.counters.exceeded()
    }

    pub fn spawn(&self, gate: Arc<Latch>, alive: Arc<Latch>) -> io::Result<JoinHandle<()>> {
        let shared = Arc::clone(&self.shared);
        thread::Builder::new()
            .name(format!("sandbox-{}", self.shared.name))
            .spawn(move || {
                alive.count_down();
                gate.wait();
                shared.run();
            })
    }

    /// Stop delivering, post end of stream and return the final counters
    pub fn dispose(&self) -> OutputSnapshot {
        self.shared.disposed.raise();

        let mut delivery = lock(&self.shared.delivery);
        if let Err(e) = delivery.post_eof() {
            debug!("Closing {} sink failed: {}", self.shared.name, e);
        }

        OutputSnapshot {
            length: self.shared.counters.length(),
            exceeded: self.shared.counters.exceeded(),
        }
    }
}

impl DrainShared {
    fn run(&self) {
        if self.limit == Some(0) {
            self.finish();
        }

        let pipe = lock(&self.pipe).take();
        match pipe {
            Some(file) if !self.disposed.is_raised() => self.read_loop(file),
            _ => debug!("No {} pipe to drain", self.name),
        }

        self.finish();
        self.closed.open();
    }

    fn read_loop(&self, mut file: File) {
        let fd = file.as_raw_fd();
        let mut decoder = Utf8Decoder::default();
        let mut buffer = [0u8; DRAIN_CHUNK_SIZE];

        while !self.disposed.is_raised() {
            match poll_fd(fd, libc::POLLIN, POLL_TICK_MS) {
                Ok(false) => continue,
                Ok(true) => {}
                Err(e) => {
                    debug!("Polling {} failed: {}", self.name, e);
                    break;
                }
            }

            match file.read(&mut buffer) {
                Ok(0) => break,
                Ok(read) => self.deliver(&decoder.decode(&buffer[..read])),
                Err(e)
                    if matches!(
                        e.kind(),
                        io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
                    ) => {}
                Err(e) => {
                    debug!("Reading {} failed: {}", self.name, e);
                    break;
                }
            }
        }

        self.deliver(&decoder.finish());
    }

    /// Deliver the part of `text` that fits the budget; counters are only
    /// touched under the delivery lock.
    fn deliver(&self, text: &str) {
        if text.is_empty() {
            return;
        }

        let fault = {
            let mut delivery = lock(&self.delivery);
            if self.disposed.is_raised() {
                return;
            }

            let chars = text.chars().count() as u64;
            let accepted = match self.limit {
                None => {
                    self.counters.add(chars);
                    text
                }
                Some(_) if self.counters.exceeded() => return,
                Some(limit) => {
                    let remaining = limit.saturating_sub(self.counters.length());
                    if chars <= remaining {
                        self.counters.add(chars);
                        text
                    } else {
                        let end = text
                            .char_indices()
                            .nth(remaining as usize)
                            .map_or(text.len(), |(index, _)| index);
                        self.counters.add(remaining);
                        self.counters.mark_exceeded();
                        &text[..end]
                    }
                }
            };

            let mut result = Ok(());
            if !accepted.is_empty() && !delivery.eof_posted {
                result = (delivery.consumer)(Some(accepted));
            }
            if result.is_ok() && self.counters.exceeded() {
                result = delivery.post_eof();
            }
            self.take_fault(&mut delivery, result)
        };

        self.raise_fault(fault);
    }

    fn finish(&self) {
        let fault = {
            let mut delivery = lock(&self.delivery);
            let result = delivery.post_eof();
            self.take_fault(&mut delivery, result)
        };
        self.raise_fault(fault);
    }

    fn take_fault(
        &self,
        delivery: &mut Delivery,
        result: io::Result<()>,
    ) -> Option<(FaultHook, io::Error)> {
        let error = result.err()?;
        // the sink is unusable, make sure nothing else reaches it
        let _ = delivery.post_eof();
        match delivery.on_fault.take() {
            Some(hook) => Some((hook, error)),
            None => {
                debug!("{} sink failed: {}", self.name, error);
                None
            }
        }
    }

    /// Runs outside the delivery lock; the hook may dispose this drain
    fn raise_fault(&self, fault: Option<(FaultHook, io::Error)>) {
        if let Some((hook, error)) = fault {
            debug!("{} sink failed: {}", self.name, error);
            hook(error);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use std::time::Duration;

    #[derive(Default)]
    struct Recorded {
        chunks: Vec<String>,
        eofs: usize,
    }

    fn recording_consumer() -> (OutputConsumer, Arc<Mutex<Recorded>>) {
        let recorded = Arc::new(Mutex::new(Recorded::default()));
        let sink = Arc::clone(&recorded);
        let consumer: OutputConsumer = Box::new(move |chunk| {
            let mut recorded = sink.lock().unwrap();
            match chunk {
                Some(text) => recorded.chunks.push(text.to_string()),
                None => recorded.eofs += 1,
            }
            Ok(())
        });
        (consumer, recorded)
    }

    fn pipe() -> (OwnedFd, File) {
        let (read, write) = nix::unistd::pipe().unwrap();
        (read, File::from(write))
    }

    /// Run a drain over `input` written up front, wait until it closes
    fn drain_bytes(limit: Option<u64>, input: &[u8]) -> (OutputSnapshot, Arc<Mutex<Recorded>>) {
        let (consumer, recorded) = recording_consumer();
        let drain = StreamDrain::new("stdout", limit, consumer);
        let gate = Arc::new(Latch::new());
        let alive = Arc::new(Latch::new());

        let (read, mut write) = pipe();
        drain.attach(read).unwrap();
        let handle = drain.spawn(Arc::clone(&gate), Arc::clone(&alive)).unwrap();
        alive.wait();
        gate.open();

        write.write_all(input).unwrap();
        drop(write);

        assert!(drain.closed().wait_timeout(Duration::from_secs(5)));
        handle.join().unwrap();
        (drain.dispose(), recorded)
    }

    #[test]
    fn decoder_carries_split_sequences() {
        let bytes = "héllo wörld".as_bytes();
        let mut decoder = Utf8Decoder::default();
        let mut text = String::new();
        for byte in bytes {
            text.push_str(&decoder.decode(std::slice::from_ref(byte)));
        }
        text.push_str(&decoder.finish());
        assert_eq!(text, "héllo wörld");
    }

    #[test]
    fn decoder_replaces_invalid_bytes() {
        let mut decoder = Utf8Decoder::default();
        assert_eq!(decoder.decode(b"a\xffb"), "a\u{FFFD}b");
        assert_eq!(decoder.decode(b"c\xc3"), "c");
        assert_eq!(decoder.finish(), "\u{FFFD}");
        assert_eq!(decoder.finish(), "");
    }

    #[test]
    fn unlimited_drain_delivers_everything() {
        let (snapshot, recorded) = drain_bytes(None, b"hello world");
        let recorded = recorded.lock().unwrap();
        assert_eq!(recorded.chunks.concat(), "hello world");
        assert_eq!(recorded.eofs, 1);
        assert_eq!(snapshot, OutputSnapshot { length: 11, exceeded: false });
    }

    #[test]
    fn bounded_drain_truncates_and_marks_exceeded() {
        let (snapshot, recorded) = drain_bytes(Some(10), b"123456789012345");
        let recorded = recorded.lock().unwrap();
        assert_eq!(recorded.chunks.concat(), "1234567890");
        assert_eq!(recorded.eofs, 1);
        assert_eq!(snapshot, OutputSnapshot { length: 10, exceeded: true });
    }

    #[test]
    fn exact_fill_is_not_exceeded() {
        let (snapshot, recorded) = drain_bytes(Some(5), b"hello");
        assert_eq!(recorded.lock().unwrap().chunks.concat(), "hello");
        assert_eq!(snapshot, OutputSnapshot { length: 5, exceeded: false });
    }

    #[test]
    fn limit_counts_characters_not_bytes() {
        let (snapshot, recorded) = drain_bytes(Some(3), "ééééé".as_bytes());
        assert_eq!(recorded.lock().unwrap().chunks.concat(), "ééé");
        assert_eq!(snapshot, OutputSnapshot { length: 3, exceeded: true });
    }

    #[test]
    fn zero_limit_posts_eof_and_still_drains() {
        let input = vec![b'x'; 256 * 1024];
        let (snapshot, recorded) = drain_bytes(Some(0), &input);
        let recorded = recorded.lock().unwrap();
        assert!(recorded.chunks.is_empty());
        assert_eq!(recorded.eofs, 1);
        assert_eq!(snapshot, OutputSnapshot { length: 0, exceeded: true });
    }

    #[test]
    fn zero_limit_with_silent_child_is_not_exceeded() {
        let (snapshot, recorded) = drain_bytes(Some(0), b"");
        assert_eq!(recorded.lock().unwrap().eofs, 1);
        assert!(!snapshot.exceeded);
    }

    #[test]
    fn dispose_before_launch_posts_single_eof() {
        let (consumer, recorded) = recording_consumer();
        let drain = StreamDrain::new("stderr", None, consumer);
        let gate = Arc::new(Latch::new());
        let alive = Arc::new(Latch::new());
        let handle = drain.spawn(Arc::clone(&gate), Arc::clone(&alive)).unwrap();
        alive.wait();

        drain.dispose();
        gate.open();
        handle.join().unwrap();
        drain.dispose();

        assert_eq!(recorded.lock().unwrap().eofs, 1);
        assert!(drain.closed().is_open());
    }

    #[test]
    fn dispose_unblocks_drain_on_open_pipe() {
        let (consumer, recorded) = recording_consumer();
        let drain = StreamDrain::new("stdout", None, consumer);
        let gate = Arc::new(Latch::new());
        let alive = Arc::new(Latch::new());
        let (read, _write) = pipe();
        drain.attach(read).unwrap();
        let handle = drain.spawn(Arc::clone(&gate), alive).unwrap();
        gate.open();

        std::thread::sleep(Duration::from_millis(100));
        drain.dispose();
        assert!(drain.closed().wait_timeout(Duration::from_secs(2)));
        handle.join().unwrap();
        assert_eq!(recorded.lock().unwrap().eofs, 1);
    }

    #[test]
    fn consumer_failure_runs_fault_hook_once() {
        let consumer: OutputConsumer = Box::new(|chunk| match chunk {
            Some(_) => Err(io::Error::new(io::ErrorKind::BrokenPipe, "sink gone")),
            None => Ok(()),
        });
        let drain = StreamDrain::new("stdout", None, consumer);
        let faults = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&faults);
        drain.set_fault_hook(Box::new(move |e| seen.lock().unwrap().push(e.kind())));

        let gate = Arc::new(Latch::new());
        let (read, mut write) = pipe();
        drain.attach(read).unwrap();
        let handle = drain.spawn(Arc::clone(&gate), Arc::new(Latch::new())).unwrap();
        write.write_all(b"first").unwrap();
        gate.open();
        std::thread::sleep(Duration::from_millis(100));
        write.write_all(b"second").unwrap();
        drop(write);
        handle.join().unwrap();

        assert_eq!(*faults.lock().unwrap(), vec![io::ErrorKind::BrokenPipe]);
    }

    #[test]
    fn sink_consumer_writes_and_flushes() {
        struct Shared(Arc<Mutex<Vec<u8>>>);
        impl Write for Shared {
            fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
                self.0.lock().unwrap().extend_from_slice(buf);
                Ok(buf.len())
            }
            fn flush(&mut self) -> io::Result<()> {
                Ok(())
            }
        }

        let buffer = Arc::new(Mutex::new(Vec::new()));
        let mut consumer = sink_consumer(Box::new(Shared(Arc::clone(&buffer))));
        consumer(Some("ab")).unwrap();
        consumer(Some("c")).unwrap();
        consumer(None).unwrap();
        consumer(Some("ignored")).unwrap();
        assert_eq!(&*buffer.lock().unwrap(), b"abc");
    }

    #[test]
    fn feeder_copies_source_and_closes_pipe() {
        let input = "x".repeat(3 * FEED_CHUNK_SIZE + 17);
        let feeder = StreamFeeder::new(Box::new(Cursor::new(input.clone().into_bytes())));
        let (read, write) = nix::unistd::pipe().unwrap();
        feeder.attach(write).unwrap();

        let gate = Arc::new(Latch::new());
        let handle = feeder
            .spawn(Arc::clone(&gate), Arc::new(Latch::new()), Arc::new(Flag::new()))
            .unwrap();
        gate.open();

        let mut received = String::new();
        File::from(read).read_to_string(&mut received).unwrap();
        handle.join().unwrap();
        assert_eq!(received, input);
    }

    #[test]
    fn feeder_dispose_unblocks_full_pipe() {
        let feeder = StreamFeeder::new(Box::new(Cursor::new(vec![b'y'; 1024 * 1024])));
        let (_read, write) = nix::unistd::pipe().unwrap();
        feeder.attach(write).unwrap();

        let gate = Arc::new(Latch::new());
        let handle = feeder
            .spawn(Arc::clone(&gate), Arc::new(Latch::new()), Arc::new(Flag::new()))
            .unwrap();
        gate.open();
        std::thread::sleep(Duration::from_millis(150));

        feeder.dispose();
        handle.join().unwrap();
        assert!(feeder.is_disposed());
    }

    #[test]
    fn feeder_skips_work_when_already_terminated() {
        let feeder = StreamFeeder::new(Box::new(Cursor::new(b"data".to_vec())));
        let (read, write) = nix::unistd::pipe().unwrap();
        feeder.attach(write).unwrap();

        let terminated = Arc::new(Flag::new());
        terminated.raise();
        let gate = Arc::new(Latch::new());
        gate.open();
        feeder
            .spawn(gate, Arc::new(Latch::new()), terminated)
            .unwrap()
            .join()
            .unwrap();

        let mut received = Vec::new();
        File::from(read).read_to_end(&mut received).unwrap();
        assert!(received.is_empty());
    }
}
