use crate::config::Settings;
use crate::contours::extract_features;
use crate::export::{annotate, CsvExporter};
use crate::stack::functions::to_gray;
use crate::tracking::PathTracker;
use crate::video::{open_sink, Video};
use crate::Errors;
use anyhow::Result;
use crossbeam::channel::{unbounded, Receiver, Sender, TryRecvError};
use log::{error, info, warn};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::thread::{self, JoinHandle};

pub const WORKER_THREAD_NAME: &str = "videotracker-worker";

/// Everything a worker needs to process one input
///
#[derive(Debug, Clone)]
pub struct Job {
    pub input: PathBuf,
    pub csv: Option<PathBuf>,
    pub output: Option<PathBuf>,
    pub settings: Settings,
    /// First frame to process
    pub start: usize,
    /// Frame to stop before, `None` runs to the end
    pub end: Option<usize>,
}

impl Job {
    pub fn new(input: impl Into<PathBuf>, settings: Settings) -> Self {
        Self {
            input: input.into(),
            csv: None,
            output: None,
            settings,
            start: 0,
            end: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Pause,
    Resume,
    Stop,
}

/// What a job produced
///
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Summary {
    /// Frames processed
    pub frames: usize,
    pub detections: usize,
    /// Paths started
    pub paths: u64,
    pub csv: Option<PathBuf>,
    pub output: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Started {
        frames: usize,
    },
    Progress {
        frame: usize,
        frames: usize,
        detections: usize,
    },
    Paused,
    Resumed,
    Finished(Summary),
    Stopped(Summary),
    Failed(String),
}

impl Event {
    /// The worker sends nothing after a terminal event
    pub fn is_terminal(&self) -> bool {
        matches!(self, Event::Finished(_) | Event::Stopped(_) | Event::Failed(_))
    }
}

enum Outcome {
    Finished(Summary),
    Stopped(Summary),
}

/// Runs jobs on a dedicated thread
///
pub struct Worker;

impl Worker {
    /// Starts `job` in the background
    ///
    /// Errors and panics inside the job end up as [`Event::Failed`].
    ///
    pub fn spawn(job: Job) -> Result<WorkerHandle> {
        Self::spawn_with(job, &[], run)
    }

    /// Starts `task` on the worker thread with `queued` commands already waiting
    fn spawn_with<F>(job: Job, queued: &[Command], task: F) -> Result<WorkerHandle>
    where
        F: FnOnce(&Job, &Receiver<Command>, &Sender<Event>) -> Result<Outcome> + Send + 'static,
    {
        let (command_tx, command_rx) = unbounded();
        let (event_tx, event_rx) = unbounded();
        for command in queued {
            let _ = command_tx.send(*command);
        }

        let thread = thread::Builder::new()
            .name(WORKER_THREAD_NAME.to_string())
            .spawn(move || {
                info!("Worker started for {}", job.input.display());
                let result = panic::catch_unwind(AssertUnwindSafe(|| {
                    task(&job, &command_rx, &event_tx)
                }));
                let event = match result {
                    Ok(Ok(Outcome::Finished(s))) => {
                        info!("Worker finished: {} frames, {} paths", s.frames, s.paths);
                        Event::Finished(s)
                    }
                    Ok(Ok(Outcome::Stopped(s))) => {
                        info!("Worker stopped after {} frames", s.frames);
                        Event::Stopped(s)
                    }
                    Ok(Err(e)) => {
                        error!("Worker failed: {:#}", e);
                        Event::Failed(format!("{:#}", e))
                    }
                    Err(panic) => {
                        let message = panic_message(panic.as_ref());
                        error!("Worker panicked: {}", message);
                        Event::Failed(message)
                    }
                };
                // nobody listens once the handle is gone
                let _ = event_tx.send(event);
            })?;

        Ok(WorkerHandle {
            commands: command_tx,
            events: event_rx,
            thread: Some(thread),
        })
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "worker panicked".to_string()
    }
}

/// Drains pending commands, blocking while paused. `true` means stop.
fn stop_requested(commands: &Receiver<Command>, events: &Sender<Event>) -> bool {
    loop {
        match commands.try_recv() {
            Ok(Command::Stop) | Err(TryRecvError::Disconnected) => return true,
            Ok(Command::Resume) => {}
            Ok(Command::Pause) => {
                info!("Worker paused");
                let _ = events.send(Event::Paused);
                loop {
                    match commands.recv() {
                        Ok(Command::Resume) => break,
                        Ok(Command::Pause) => {}
                        Ok(Command::Stop) | Err(_) => return true,
                    }
                }
                info!("Worker resumed");
                let _ = events.send(Event::Resumed);
            }
            Err(TryRecvError::Empty) => return false,
        }
    }
}

fn run(job: &Job, commands: &Receiver<Command>, events: &Sender<Event>) -> Result<Outcome> {
    let video = Video::open(&job.input, job.settings.framerate)?;
    process(job, video, commands, events)
}

/// Processes the frames of `video` selected by the job
///
/// Sources that do not know their length run until they end and report `frames: 0`.
///
fn process(
    job: &Job,
    mut video: Video,
    commands: &Receiver<Command>,
    events: &Sender<Event>,
) -> Result<Outcome> {
    let end = match video.frames() {
        0 => job.end,
        total => Some(job.end.map_or(total, |e| e.min(total))),
    };
    if end.map_or(false, |e| job.start >= e) {
        return Err(Errors::FrameOutOfRange(job.start).into());
    }
    video.set_position(job.start)?;

    let mut stack = job.settings.stack()?;
    let mut tracker = PathTracker::new(job.settings.tracker.clone());
    let mut csv = job.csv.as_deref().map(CsvExporter::create).transpose()?;
    let mut sink = job
        .output
        .as_deref()
        .map(|p| open_sink(p, video.framerate(), video.resolution()))
        .transpose()?;
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(job.settings.threads)
        .thread_name(|i| format!("videotracker-features-{}", i))
        .build()?;

    let limit = end.map_or(usize::MAX, |e| e - job.start);
    let frames = end.map_or(0, |_| limit);
    let _ = events.send(Event::Started { frames });

    let mut summary = Summary {
        csv: job.csv.clone(),
        output: job.output.clone(),
        ..Summary::default()
    };
    let mut stopped = false;
    for frame in video.by_ref().take(limit) {
        if stop_requested(commands, events) {
            stopped = true;
            break;
        }
        let frame = frame?;
        stack.process(frame.image.clone())?;
        let gray = to_gray(&frame.image);
        let detections = pool.install(|| {
            extract_features(frame.index, frame.timestamp, stack.contours(), Some(&gray))
        });
        let ids = tracker.predict(frame.index, &detections)?;

        if let Some(csv) = csv.as_mut() {
            csv.write_frame(&ids, &detections)?;
        }
        if let Some(sink) = sink.as_mut() {
            sink.write(&annotate(&frame.image, &ids, &detections, &tracker))?;
        }
        tracker.wasted();

        summary.frames += 1;
        summary.detections += detections.len();
        let _ = events.send(Event::Progress {
            frame: frame.index,
            frames,
            detections: detections.len(),
        });
    }
    if !stopped && end.is_some() && summary.frames < frames {
        warn!(
            "Source ended after {} of {} frames",
            summary.frames, frames
        );
    }
    summary.paths = tracker.started();

    if let Some(csv) = csv.as_mut() {
        csv.finish()?;
    }
    if let Some(sink) = sink.as_mut() {
        sink.finish()?;
    }

    Ok(if stopped {
        Outcome::Stopped(summary)
    } else {
        Outcome::Finished(summary)
    })
}

/// Controls a running worker and receives its events
///
pub struct WorkerHandle {
    commands: Sender<Command>,
    events: Receiver<Event>,
    thread: Option<JoinHandle<()>>,
}

impl WorkerHandle {
    fn send(&self, command: Command) -> Result<()> {
        self.commands
            .send(command)
            .map_err(|_| Errors::NotRunning.into())
    }

    pub fn pause(&self) -> Result<()> {
        self.send(Command::Pause)
    }

    pub fn resume(&self) -> Result<()> {
        self.send(Command::Resume)
    }

    /// Asks the worker to stop after the current frame, a paused worker stops right away
    pub fn stop(&self) -> Result<()> {
        self.send(Command::Stop)
    }

    pub fn events(&self) -> &Receiver<Event> {
        &self.events
    }

    /// Events received so far, without blocking
    pub fn try_events(&self) -> Vec<Event> {
        self.events.try_iter().collect()
    }

    pub fn is_finished(&self) -> bool {
        self.thread.as_ref().map_or(true, |t| t.is_finished())
    }

    /// Blocks until the worker ends, passing every remaining event to `f`
    ///
    pub fn wait_with<F>(mut self, mut f: F) -> Result<Summary>
    where
        F: FnMut(&Event),
    {
        let mut outcome = None;
        for event in self.events.iter() {
            f(&event);
            match event {
                Event::Finished(s) | Event::Stopped(s) => outcome = Some(Ok(s)),
                Event::Failed(m) => outcome = Some(Err(Errors::WorkerFailed(m))),
                _ => {}
            }
        }
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                return Err(Errors::WorkerFailed("worker thread panicked".into()).into());
            }
        }
        match outcome {
            Some(Ok(s)) => Ok(s),
            Some(Err(e)) => Err(e.into()),
            None => Err(Errors::WorkerFailed("worker ended without a result".into()).into()),
        }
    }

    pub fn wait(self) -> Result<Summary> {
        self.wait_with(|_| {})
    }
}
