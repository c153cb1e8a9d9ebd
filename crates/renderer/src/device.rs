//! Graphics device adapter over a host-owned GL context.
//!
//! The context lives on exactly one thread. Callers anywhere submit work
//! through [`Device`]; a single [`Executor`] owning the context runs it in
//! submission order. A command reports [`Pass::Complete`] when it rendered
//! a whole frame; the executor then presents and emits
//! [`FrameEvent::Presented`].

use std::{
    fmt,
    io::Write,
    thread::{self, JoinHandle},
};

use crossbeam_channel::{Receiver, Sender, TryRecvError, TrySendError};
use thiserror::Error;

/// Where the host context writes diagnostics.
pub type DebugSink = Box<dyn Write + Send>;

/// Viewport / framebuffer rectangle in physical pixels.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Bounds {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl Bounds {
    pub const fn from_size(width: u32, height: u32) -> Self {
        Self {
            x: 0,
            y: 0,
            width,
            height,
        }
    }
}

/// Outcome of one submitted command.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Pass {
    /// Work done, nothing to show yet.
    Partial,
    /// A full frame was rendered and should be presented.
    Complete,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameEvent {
    /// Frame number `frame` (1-based) was handed to the host for display.
    Presented { frame: u64 },
}

/// Contract a foreign GPU context implements to sit behind a [`Device`].
pub trait HostContext: 'static {
    /// Show the frame rendered by the last `Pass::Complete` command.
    fn present(&mut self);
    fn update_bounds(&mut self, bounds: Bounds);
    fn set_debug_output(&mut self, sink: Option<DebugSink>);
    /// Release GPU resources. No command runs after this.
    fn destroy(&mut self);
}

#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("Failed to create host context: {0:#}")]
    Init(anyhow::Error),
    #[error("Failed to spawn device thread: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("Device is destroyed or its executor is gone")]
    Disconnected,
    #[error("Command was dropped before it ran")]
    Canceled,
    #[error("Device thread panicked")]
    WorkerPanicked,
}

pub type DeviceResult<T> = Result<T, DeviceError>;

/// Presented-frame events kept for a reader; older ones are dropped once
/// the channel is full.
pub const EVENT_CAPACITY: usize = 64;

#[derive(Clone, Debug)]
pub struct DeviceConfig {
    /// `None`: unbounded queue. `Some(n)`: submitters block once `n`
    /// commands are waiting.
    pub queue_capacity: Option<usize>,
    /// Name of the executor thread created by [`Device::spawn`].
    pub thread_name: String,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            queue_capacity: None,
            thread_name: "gl-device".to_string(),
        }
    }
}

type Job<C> = Box<dyn FnOnce(&mut C) -> Pass + Send>;

enum Command<C> {
    Exec { job: Job<C>, done: Sender<Pass> },
    UpdateBounds(Bounds),
    SetDebugOutput(Option<DebugSink>),
    Destroy,
}

impl<C> fmt::Debug for Command<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Exec { .. } => f.write_str("Exec"),
            Command::UpdateBounds(b) => write!(f, "UpdateBounds({b:?})"),
            Command::SetDebugOutput(sink) => {
                write!(f, "SetDebugOutput({})", if sink.is_some() { "some" } else { "none" })
            }
            Command::Destroy => f.write_str("Destroy"),
        }
    }
}

/// Result slot of one [`Device::exec`] call.
#[must_use = "dropping a Completion does not cancel the command"]
pub struct Completion {
    rx: Receiver<Pass>,
}

impl Completion {
    /// Block until the command ran.
    pub fn wait(self) -> DeviceResult<Pass> {
        self.rx.recv().map_err(|_| DeviceError::Canceled)
    }

    /// `Ok(None)` while the command is still queued.
    pub fn try_result(&self) -> DeviceResult<Option<Pass>> {
        match self.rx.try_recv() {
            Ok(pass) => Ok(Some(pass)),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => Err(DeviceError::Canceled),
        }
    }
}

/// Caller-side handle. Cheap to share by reference across threads.
pub struct Device<C: HostContext> {
    tx: Option<Sender<Command<C>>>,
    events: Receiver<FrameEvent>,
    worker: Option<JoinHandle<()>>,
}

fn queue<T>(capacity: Option<usize>) -> (Sender<T>, Receiver<T>) {
    match capacity {
        Some(n) => crossbeam_channel::bounded(n),
        None => crossbeam_channel::unbounded(),
    }
}

impl<C: HostContext> Device<C> {
    /// Device whose executor is driven by the caller, for contexts bound
    /// to the thread that created them (a browser canvas, for one).
    pub fn attached(context: C, config: &DeviceConfig) -> (Self, Executor<C>) {
        let (tx, rx) = queue(config.queue_capacity);
        let (event_tx, event_rx) = crossbeam_channel::bounded(EVENT_CAPACITY);
        let device = Self {
            tx: Some(tx),
            events: event_rx,
            worker: None,
        };
        (device, Executor::new(context, rx, event_tx))
    }

    /// Build the context with `init` on a dedicated thread and run the
    /// executor there until the device is destroyed.
    pub fn spawn<F>(config: &DeviceConfig, init: F) -> DeviceResult<Self>
    where
        F: FnOnce() -> anyhow::Result<C> + Send + 'static,
    {
        let (tx, rx) = queue::<Command<C>>(config.queue_capacity);
        let (event_tx, event_rx) = crossbeam_channel::bounded(EVENT_CAPACITY);
        let (ready_tx, ready_rx) = crossbeam_channel::bounded::<anyhow::Result<()>>(1);

        let worker = thread::Builder::new()
            .name(config.thread_name.clone())
            .spawn(move || {
                let context = match init() {
                    Ok(context) => context,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                let _ = ready_tx.send(Ok(()));
                Executor::new(context, rx, event_tx).run();
            })
            .map_err(DeviceError::Spawn)?;

        match ready_rx.recv() {
            Ok(Ok(())) => {
                log::info!("Device thread '{}' started", config.thread_name);
                Ok(Self {
                    tx: Some(tx),
                    events: event_rx,
                    worker: Some(worker),
                })
            }
            Ok(Err(e)) => {
                let _ = worker.join();
                Err(DeviceError::Init(e))
            }
            Err(_) => {
                let _ = worker.join();
                Err(DeviceError::WorkerPanicked)
            }
        }
    }

    fn send(&self, command: Command<C>) -> DeviceResult<()> {
        let tx = self.tx.as_ref().ok_or(DeviceError::Disconnected)?;
        tx.send(command).map_err(|_| DeviceError::Disconnected)
    }

    /// Queue `job` to run against the context.
    pub fn exec<F>(&self, job: F) -> DeviceResult<Completion>
    where
        F: FnOnce(&mut C) -> Pass + Send + 'static,
    {
        let (done, rx) = crossbeam_channel::bounded(1);
        self.send(Command::Exec {
            job: Box::new(job),
            done,
        })?;
        Ok(Completion { rx })
    }

    pub fn update_bounds(&self, bounds: Bounds) -> DeviceResult<()> {
        self.send(Command::UpdateBounds(bounds))
    }

    pub fn set_debug_output(&self, sink: Option<DebugSink>) -> DeviceResult<()> {
        self.send(Command::SetDebugOutput(sink))
    }

    /// Presented-frame notifications, in order. At most [`EVENT_CAPACITY`]
    /// are held; frames presented while it is full are not reported.
    pub fn events(&self) -> &Receiver<FrameEvent> {
        &self.events
    }

    /// Commands waiting for the executor.
    pub fn pending(&self) -> usize {
        self.tx.as_ref().map_or(0, Sender::len)
    }

    /// Tear the context down after every already queued command ran, and
    /// wait for the executor thread if there is one.
    pub fn destroy(mut self) -> DeviceResult<()> {
        self.shutdown()
    }

    fn shutdown(&mut self) -> DeviceResult<()> {
        // A full queue is left to disconnect: the executor drains it and
        // tears down on its own.
        if let Some(tx) = self.tx.take() {
            match tx.try_send(Command::Destroy) {
                Ok(()) | Err(TrySendError::Disconnected(_)) => {}
                Err(TrySendError::Full(_)) => {
                    log::debug!("Device queue full at shutdown, disconnecting");
                }
            }
        }
        match self.worker.take() {
            Some(worker) => worker.join().map_err(|_| DeviceError::WorkerPanicked),
            None => Ok(()),
        }
    }
}

impl<C: HostContext> Drop for Device<C> {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            log::error!("Device shutdown failed: {e}");
        }
    }
}

/// Whether an executor can keep going.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExecState {
    Running,
    /// Destroyed, or every `Device` handle is gone.
    Finished,
}

/// Single consumer of a device queue. Owns the context.
pub struct Executor<C: HostContext> {
    context: Option<C>,
    rx: Receiver<Command<C>>,
    events: Sender<FrameEvent>,
    frames: u64,
}

impl<C: HostContext> Executor<C> {
    fn new(context: C, rx: Receiver<Command<C>>, events: Sender<FrameEvent>) -> Self {
        Self {
            context: Some(context),
            rx,
            events,
            frames: 0,
        }
    }

    pub fn context(&self) -> Option<&C> {
        self.context.as_ref()
    }

    pub fn frames_presented(&self) -> u64 {
        self.frames
    }

    /// Run every command already queued without blocking.
    pub fn run_pending(&mut self) -> ExecState {
        loop {
            if self.context.is_none() {
                return ExecState::Finished;
            }
            match self.rx.try_recv() {
                Ok(command) => self.handle(command),
                Err(TryRecvError::Empty) => return ExecState::Running,
                Err(TryRecvError::Disconnected) => {
                    self.teardown();
                    return ExecState::Finished;
                }
            }
        }
    }

    /// Block on the queue until destroyed or disconnected.
    pub fn run(mut self) {
        while self.context.is_some() {
            match self.rx.recv() {
                Ok(command) => self.handle(command),
                Err(_) => self.teardown(),
            }
        }
        log::debug!("Device executor finished after {} frames", self.frames);
    }

    fn handle(&mut self, command: Command<C>) {
        let Some(context) = self.context.as_mut() else {
            return;
        };
        log::trace!("Device command: {command:?}");
        match command {
            Command::Exec { job, done } => {
                let pass = job(context);
                if pass == Pass::Complete {
                    context.present();
                    self.frames += 1;
                    let event = FrameEvent::Presented { frame: self.frames };
                    if let Err(TrySendError::Full(_)) = self.events.try_send(event) {
                        log::trace!("Frame event {} dropped, no reader", self.frames);
                    }
                }
                let _ = done.send(pass);
            }
            Command::UpdateBounds(bounds) => context.update_bounds(bounds),
            Command::SetDebugOutput(sink) => context.set_debug_output(sink),
            Command::Destroy => self.teardown(),
        }
    }

    fn teardown(&mut self) {
        if let Some(mut context) = self.context.take() {
            log::info!("Destroying device context");
            context.destroy();
        }
    }
}

impl<C: HostContext> Drop for Executor<C> {
    fn drop(&mut self) {
        self.teardown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{sync::Arc, time::Duration};

    use parking_lot::Mutex;

    #[derive(Clone, Debug, PartialEq, Eq)]
    enum Call {
        Job(u32),
        Present,
        Bounds(Bounds),
        Debug(bool),
        Destroy,
    }

    struct FakeContext {
        calls: Arc<Mutex<Vec<Call>>>,
        sink: Option<DebugSink>,
        owner: Option<thread::ThreadId>,
    }

    impl FakeContext {
        fn new(calls: &Arc<Mutex<Vec<Call>>>) -> Self {
            Self {
                calls: Arc::clone(calls),
                sink: None,
                owner: Some(thread::current().id()),
            }
        }

        fn job(&mut self, id: u32) {
            self.calls.lock().push(Call::Job(id));
        }
    }

    impl HostContext for FakeContext {
        fn present(&mut self) {
            self.calls.lock().push(Call::Present);
            if let Some(sink) = self.sink.as_mut() {
                let _ = writeln!(sink, "presented");
            }
        }

        fn update_bounds(&mut self, bounds: Bounds) {
            self.calls.lock().push(Call::Bounds(bounds));
        }

        fn set_debug_output(&mut self, sink: Option<DebugSink>) {
            self.calls.lock().push(Call::Debug(sink.is_some()));
            self.sink = sink;
        }

        fn destroy(&mut self) {
            self.calls.lock().push(Call::Destroy);
        }
    }

    /// Debug sink backed by a shared buffer.
    #[derive(Clone, Default)]
    struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn spawn_fake(calls: &Arc<Mutex<Vec<Call>>>) -> Device<FakeContext> {
        let calls = Arc::clone(calls);
        Device::spawn(&DeviceConfig::default(), move || Ok(FakeContext::new(&calls)))
            .expect("spawn device")
    }

    #[test]
    fn commands_run_in_submission_order() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let device = spawn_fake(&calls);

        let completions: Vec<Completion> = (0..5)
            .map(|i| {
                device
                    .exec(move |ctx: &mut FakeContext| {
                        ctx.job(i);
                        Pass::Partial
                    })
                    .unwrap()
            })
            .collect();
        for c in completions {
            assert_eq!(c.wait().unwrap(), Pass::Partial);
        }
        device.destroy().unwrap();

        let calls = calls.lock();
        let jobs: Vec<Call> = (0..5).map(Call::Job).collect();
        assert_eq!(&calls[..5], &jobs[..]);
        assert_eq!(calls.last(), Some(&Call::Destroy));
    }

    #[test]
    fn jobs_run_on_the_context_thread() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let device = spawn_fake(&calls);
        let (tx, rx) = crossbeam_channel::bounded(1);
        device
            .exec(move |ctx: &mut FakeContext| {
                let _ = tx.send(ctx.owner == Some(thread::current().id()));
                Pass::Partial
            })
            .unwrap()
            .wait()
            .unwrap();
        assert!(rx.recv().unwrap());
        device.destroy().unwrap();
    }

    #[test]
    fn complete_pass_presents_and_emits_event() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let device = spawn_fake(&calls);

        let pass = device
            .exec(|ctx: &mut FakeContext| {
                ctx.job(1);
                Pass::Complete
            })
            .unwrap()
            .wait()
            .unwrap();
        assert_eq!(pass, Pass::Complete);
        assert_eq!(
            device.events().recv().unwrap(),
            FrameEvent::Presented { frame: 1 }
        );

        device
            .exec(|_: &mut FakeContext| Pass::Partial)
            .unwrap()
            .wait()
            .unwrap();
        assert!(device.events().try_recv().is_err());
        device.destroy().unwrap();

        assert_eq!(
            &calls.lock()[..2],
            &[Call::Job(1), Call::Present][..]
        );
    }

    #[test]
    fn bounds_and_debug_output_reach_the_context() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let device = spawn_fake(&calls);
        let buf = SharedBuf::default();

        device.update_bounds(Bounds::from_size(640, 480)).unwrap();
        device.set_debug_output(Some(Box::new(buf.clone()))).unwrap();
        device
            .exec(|_: &mut FakeContext| Pass::Complete)
            .unwrap()
            .wait()
            .unwrap();
        device.destroy().unwrap();

        let calls = calls.lock();
        assert_eq!(calls[0], Call::Bounds(Bounds::from_size(640, 480)));
        assert_eq!(calls[1], Call::Debug(true));
        assert_eq!(String::from_utf8(buf.0.lock().clone()).unwrap(), "presented\n");
    }

    #[test]
    fn init_failure_surfaces_from_spawn() {
        let result = Device::<FakeContext>::spawn(&DeviceConfig::default(), || {
            Err(anyhow::anyhow!("no GL context"))
        });
        match result {
            Err(DeviceError::Init(e)) => assert!(e.to_string().contains("no GL context")),
            Err(other) => panic!("unexpected error: {other}"),
            Ok(_) => panic!("spawn should fail"),
        }
    }

    #[test]
    fn attached_executor_runs_when_pumped() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let (device, mut executor) =
            Device::attached(FakeContext::new(&calls), &DeviceConfig::default());

        let done = device
            .exec(|ctx: &mut FakeContext| {
                ctx.job(7);
                Pass::Complete
            })
            .unwrap();
        assert_eq!(device.pending(), 1);
        assert_eq!(done.try_result().unwrap(), None);

        assert_eq!(executor.run_pending(), ExecState::Running);
        assert_eq!(done.try_result().unwrap(), Some(Pass::Complete));
        assert_eq!(executor.frames_presented(), 1);

        drop(device);
        assert_eq!(executor.run_pending(), ExecState::Finished);
        assert!(executor.context().is_none());
        assert_eq!(calls.lock().last(), Some(&Call::Destroy));
    }

    #[test]
    fn queued_work_finishes_before_destroy() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let config = DeviceConfig {
            queue_capacity: Some(2),
            ..DeviceConfig::default()
        };
        let (device, executor) = Device::attached(FakeContext::new(&calls), &config);
        let consumer = thread::spawn(move || executor.run());

        for i in 0..6 {
            let _ = device
                .exec(move |ctx: &mut FakeContext| {
                    ctx.job(i);
                    Pass::Partial
                })
                .unwrap();
        }
        device.destroy().unwrap();
        consumer.join().unwrap();

        let calls = calls.lock();
        assert_eq!(calls.len(), 7);
        assert_eq!(calls[6], Call::Destroy);
    }

    #[test]
    fn dropping_a_device_with_a_full_queue_does_not_block() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let config = DeviceConfig {
            queue_capacity: Some(2),
            ..DeviceConfig::default()
        };
        let (device, mut executor) = Device::attached(FakeContext::new(&calls), &config);

        let (dropped_tx, dropped_rx) = crossbeam_channel::bounded(1);
        let submitter = thread::spawn(move || {
            for i in 0..2 {
                let _ = device
                    .exec(move |ctx: &mut FakeContext| {
                        ctx.job(i);
                        Pass::Partial
                    })
                    .unwrap();
            }
            drop(device);
            let _ = dropped_tx.send(());
        });
        assert!(
            dropped_rx.recv_timeout(Duration::from_secs(2)).is_ok(),
            "drop blocked on a full queue"
        );
        submitter.join().unwrap();

        // The queued jobs still run, then the disconnect tears down.
        assert_eq!(executor.run_pending(), ExecState::Finished);
        assert_eq!(
            *calls.lock(),
            [Call::Job(0), Call::Job(1), Call::Destroy]
        );
    }

    #[test]
    fn unread_frame_events_stay_bounded() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let (device, mut executor) =
            Device::attached(FakeContext::new(&calls), &DeviceConfig::default());

        for _ in 0..1000 {
            let _ = device.exec(|_: &mut FakeContext| Pass::Complete).unwrap();
        }
        assert_eq!(executor.run_pending(), ExecState::Running);
        assert_eq!(executor.frames_presented(), 1000);
        assert_eq!(device.events().len(), EVENT_CAPACITY);
        assert_eq!(
            device.events().try_recv(),
            Ok(FrameEvent::Presented { frame: 1 })
        );
    }

    #[test]
    fn submitting_after_executor_is_gone_fails() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let (device, executor) =
            Device::attached(FakeContext::new(&calls), &DeviceConfig::default());
        drop(executor);

        let err = device.exec(|_: &mut FakeContext| Pass::Partial).err();
        assert!(matches!(err, Some(DeviceError::Disconnected)));
        assert!(matches!(
            device.update_bounds(Bounds::default()),
            Err(DeviceError::Disconnected)
        ));
    }
}
