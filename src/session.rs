use crate::config::Settings;
use crate::stack::functions::draw_contours;
use crate::stack::params::ParamValue;
use crate::stack::{Stack, StackValues};
use crate::video::Video;
use crate::worker::{Event, Job, Summary, Worker, WorkerHandle};
use crate::Errors;
use anyhow::Result;
use image::RgbImage;
use log::{info, warn};
use std::path::{Path, PathBuf};

/// Colour of contours in previews
pub const PREVIEW_COLOR: [u8; 3] = [255, 0, 0];
pub const PREVIEW_THICKNESS: u32 = 3;

/// Suffix of the output files derived from the input name
pub const OUTPUT_SUFFIX: &str = "_output";

/// Output location, either derived from the input or set explicitly
///
#[derive(Debug, Clone, Default, PartialEq)]
struct OutputFile {
    path: Option<PathBuf>,
    pinned: bool,
}

impl OutputFile {
    fn derive(&mut self, path: PathBuf) {
        if !self.pinned {
            self.path = Some(path);
        }
    }

    fn pin(&mut self, path: Option<PathBuf>) {
        self.pinned = path.is_some();
        self.path = path;
    }
}

/// Default CSV and annotated video locations for `input`
///
/// Without the `opencv` feature annotated frames go to a directory instead of a video file.
///
pub fn default_outputs(input: &Path) -> (PathBuf, PathBuf) {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "video".to_string());
    let dir = input.parent().unwrap_or_else(|| Path::new(""));
    let base = format!("{}{}", stem, OUTPUT_SUFFIX);
    let video = if cfg!(feature = "opencv") {
        dir.join(format!("{}.mp4", base))
    } else {
        dir.join(&base)
    };
    (dir.join(format!("{}.csv", base)), video)
}

/// Controller state: the loaded input, its outputs, the stack used for previews and
/// the background worker.
///
/// Everything that changes what a run would do is refused while a run is active.
///
pub struct Session {
    settings: Settings,
    stack: Stack,
    video: Option<Video>,
    csv: OutputFile,
    output: OutputFile,
    worker: Option<WorkerHandle>,
    paused: bool,
    outcome: Option<std::result::Result<Summary, String>>,
    progress: Option<(usize, usize)>,
}

impl Session {
    pub fn new(settings: Settings) -> Result<Self> {
        let stack = settings.stack()?;
        Ok(Self {
            settings,
            stack,
            video: None,
            csv: OutputFile::default(),
            output: OutputFile::default(),
            worker: None,
            paused: false,
            outcome: None,
            progress: None,
        })
    }

    fn ensure_idle(&self) -> Result<()> {
        if self.is_running() {
            Err(Errors::Busy.into())
        } else {
            Ok(())
        }
    }

    fn loaded_video(&mut self) -> Result<&mut Video> {
        self.video.as_mut().ok_or_else(|| Errors::NotLoaded.into())
    }

    /// Loads an input, rewinds it and derives the default outputs
    ///
    /// Derived outputs follow every new input, outputs set explicitly are kept.
    ///
    pub fn open(&mut self, input: impl AsRef<Path>) -> Result<()> {
        self.ensure_idle()?;
        let input = input.as_ref();
        let mut video = Video::open(input, self.settings.framerate)?;
        video.set_position(0)?;

        let (csv, output) = default_outputs(input);
        self.csv.derive(csv);
        self.output.derive(output);
        self.video = Some(video);
        self.outcome = None;
        self.progress = None;
        info!("Loaded {}", input.display());
        Ok(())
    }

    pub fn is_loaded(&self) -> bool {
        self.video.is_some()
    }

    pub fn is_running(&self) -> bool {
        self.worker.is_some()
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn input(&self) -> Option<&Path> {
        self.video.as_ref().map(|v| v.path())
    }

    pub fn video(&self) -> Option<&Video> {
        self.video.as_ref()
    }

    pub fn csv(&self) -> Option<&Path> {
        self.csv.path.as_deref()
    }

    pub fn output(&self) -> Option<&Path> {
        self.output.path.as_deref()
    }

    /// Sets the CSV destination; `None` disables CSV output
    pub fn set_csv(&mut self, path: Option<PathBuf>) -> Result<()> {
        self.ensure_idle()?;
        self.csv.pin(path);
        Ok(())
    }

    /// Sets the annotated video destination; `None` disables it
    pub fn set_output(&mut self, path: Option<PathBuf>) -> Result<()> {
        self.ensure_idle()?;
        self.output.pin(path);
        Ok(())
    }

    pub fn position(&self) -> Option<usize> {
        self.video.as_ref().map(|v| v.position())
    }

    pub fn seek(&mut self, index: usize) -> Result<()> {
        self.ensure_idle()?;
        self.loaded_video()?.set_position(index)
    }

    pub fn stack(&self) -> &Stack {
        &self.stack
    }

    pub fn set_view(&mut self, stage: Option<&str>) -> Result<()> {
        self.stack.set_view(stage)
    }

    pub fn set_param(&mut self, stage: &str, param: &str, value: ParamValue) -> Result<()> {
        self.ensure_idle()?;
        self.stack.set_value(stage, param, value)
    }

    pub fn load_values(&mut self, values: &StackValues) -> Result<()> {
        self.ensure_idle()?;
        self.stack.set_values(values)
    }

    /// Switches the segmentation stack, values start from the stack's defaults
    pub fn set_module(&mut self, module: &str) -> Result<()> {
        self.ensure_idle()?;
        self.stack = Stack::new(module)?;
        self.settings.module = module.to_string();
        self.settings.values = StackValues::default();
        Ok(())
    }

    /// Effective settings, including the current stage values
    pub fn settings(&self) -> Settings {
        Settings {
            values: self.stack.values(),
            ..self.settings.clone()
        }
    }

    /// Segments the current frame and draws the found contours onto it
    ///
    pub fn preview(&mut self) -> Result<RgbImage> {
        let frame = self.loaded_video()?.frame()?.image.clone();
        let fresh = self.stack.input().map_or(true, |i| i.rgb().as_ref() != &frame);
        if fresh {
            self.stack.set_input(frame.clone());
        }
        self.stack.evaluate()?;
        let mut canvas = frame;
        draw_contours(
            &mut canvas,
            self.stack.contours(),
            PREVIEW_COLOR,
            PREVIEW_THICKNESS,
        );
        Ok(canvas)
    }

    /// Starts processing the loaded input in the background
    ///
    /// # Parameters
    /// * `start` - first frame
    /// * `end` - frame to stop before, `None` processes to the end
    ///
    pub fn start(&mut self, start: usize, end: Option<usize>) -> Result<()> {
        self.ensure_idle()?;
        let input = self
            .video
            .as_ref()
            .map(|v| v.path().to_path_buf())
            .ok_or(Errors::NotLoaded)?;
        let job = Job {
            input,
            csv: self.csv.path.clone(),
            output: self.output.path.clone(),
            settings: self.settings(),
            start,
            end,
        };
        self.worker = Some(Worker::spawn(job)?);
        self.paused = false;
        self.outcome = None;
        self.progress = None;
        Ok(())
    }

    fn worker(&self) -> Result<&WorkerHandle> {
        self.worker.as_ref().ok_or_else(|| Errors::NotRunning.into())
    }

    pub fn pause(&self) -> Result<()> {
        self.worker()?.pause()
    }

    pub fn resume(&self) -> Result<()> {
        self.worker()?.resume()
    }

    pub fn stop(&self) -> Result<()> {
        self.worker()?.stop()
    }

    /// Last reported `(frame, frames)` of the current or last run
    pub fn progress(&self) -> Option<(usize, usize)> {
        self.progress
    }

    /// Result of the last finished run
    pub fn outcome(&self) -> Option<&std::result::Result<Summary, String>> {
        self.outcome.as_ref()
    }

    fn record(&mut self, event: &Event) {
        match event {
            Event::Started { frames } => self.progress = Some((0, *frames)),
            Event::Progress { frame, frames, .. } => self.progress = Some((*frame, *frames)),
            Event::Paused => self.paused = true,
            Event::Resumed => self.paused = false,
            Event::Finished(s) | Event::Stopped(s) => {
                self.paused = false;
                self.outcome = Some(Ok(s.clone()));
            }
            Event::Failed(m) => {
                warn!("Processing failed: {}", m);
                self.paused = false;
                self.outcome = Some(Err(m.clone()));
            }
        }
    }

    /// Takes the events sent by the worker so far and updates the run state
    ///
    pub fn poll(&mut self) -> Vec<Event> {
        let events = self
            .worker
            .as_ref()
            .map(|w| w.try_events())
            .unwrap_or_default();
        for e in &events {
            self.record(e);
        }
        if events.iter().any(Event::is_terminal) {
            self.worker = None;
        }
        events
    }

    /// Blocks until the current run ends
    ///
    pub fn wait(&mut self) -> Result<Summary> {
        if let Some(handle) = self.worker.take() {
            let mut events = Vec::default();
            let result = handle.wait_with(|e| events.push(e.clone()));
            for e in &events {
                self.record(e);
            }
            return result;
        }
        match &self.outcome {
            Some(Ok(s)) => Ok(s.clone()),
            Some(Err(m)) => Err(Errors::WorkerFailed(m.clone()).into()),
            None => Err(Errors::NotRunning.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::config::Settings;
    use crate::session::{default_outputs, Session};
    use crate::stack::params::ParamValue;
    use crate::test_stuff::{moving_disks, temp_dir};
    use crate::Errors;
    use image::Rgb;
    use std::path::{Path, PathBuf};

    fn input(frames: usize) -> PathBuf {
        let dir = temp_dir("session").join("clip");
        std::fs::create_dir_all(&dir).unwrap();
        moving_disks(&dir, frames, 3.0);
        dir
    }

    fn error(r: anyhow::Result<impl std::fmt::Debug>) -> Errors {
        r.unwrap_err().downcast_ref::<Errors>().unwrap().clone()
    }

    #[test]
    fn derived_outputs() {
        let (csv, video) = default_outputs(Path::new("/data/run1.avi"));
        assert_eq!(csv, PathBuf::from("/data/run1_output.csv"));
        if cfg!(feature = "opencv") {
            assert_eq!(video, PathBuf::from("/data/run1_output.mp4"));
        } else {
            assert_eq!(video, PathBuf::from("/data/run1_output"));
        }
        let (csv, _) = default_outputs(Path::new("/data/run.1.avi"));
        assert_eq!(csv, PathBuf::from("/data/run.1_output.csv"));
    }

    #[test]
    fn outputs_follow_new_inputs() {
        let mut s = Session::new(Settings::default()).unwrap();
        let first = input(2);
        s.open(&first).unwrap();
        assert_eq!(s.csv(), Some(first.with_file_name("clip_output.csv").as_path()));

        let second = temp_dir("session-other").join("other");
        std::fs::create_dir_all(&second).unwrap();
        moving_disks(&second, 2, 3.0);
        s.open(&second).unwrap();
        assert_eq!(s.csv(), Some(second.with_file_name("other_output.csv").as_path()));

        // explicit outputs survive a new input
        let pinned = temp_dir("pinned").join("mine.csv");
        s.set_csv(Some(pinned.clone())).unwrap();
        s.open(&first).unwrap();
        assert_eq!(s.csv(), Some(pinned.as_path()));
        assert_eq!(s.output(), Some(first.with_file_name("clip_output").as_path()));
    }

    #[test]
    fn failed_open_keeps_state() {
        let mut s = Session::new(Settings::default()).unwrap();
        assert_eq!(
            error(s.open("/nonexistent/clip")),
            Errors::MissingInput("/nonexistent/clip".into())
        );
        assert!(!s.is_loaded());
        assert_eq!(error(s.start(0, None)), Errors::NotLoaded);
        assert_eq!(error(s.seek(1)), Errors::NotLoaded);
        assert_eq!(error(s.preview()), Errors::NotLoaded);
        assert_eq!(error(s.pause()), Errors::NotRunning);
        assert_eq!(error(s.wait()), Errors::NotRunning);
    }

    #[test]
    fn preview_draws_contours() {
        let mut s = Session::new(Settings::default()).unwrap();
        s.open(input(3)).unwrap();
        s.seek(2).unwrap();
        assert_eq!(s.position(), Some(2));
        let image = s.preview().unwrap();
        assert!(image.pixels().any(|p| *p == Rgb([255, 0, 0])));
        assert_eq!(s.stack().contours().len(), 2);

        // values changes are picked up by the next preview
        s.set_param("size_filter", "minimum", ParamValue::Int(1000))
            .unwrap();
        let image = s.preview().unwrap();
        assert!(image.pixels().all(|p| *p != Rgb([255, 0, 0])));

        s.set_module("null").unwrap();
        assert_eq!(s.settings().module, "null");
        assert!(s.preview().unwrap().pixels().all(|p| *p != Rgb([255, 0, 0])));
        assert!(s.seek(3).is_err());
    }

    #[test]
    fn run_to_completion() {
        let mut s = Session::new(Settings::default()).unwrap();
        let clip = input(5);
        s.open(&clip).unwrap();
        s.start(0, None).unwrap();
        assert!(s.is_running());
        assert_eq!(error(s.start(0, None)), Errors::Busy);

        let summary = s.wait().unwrap();
        assert!(!s.is_running());
        assert_eq!(summary.frames, 5);
        assert_eq!(summary.paths, 2);
        assert_eq!(s.progress(), Some((4, 5)));
        assert!(matches!(s.outcome(), Some(Ok(_))));
        assert!(clip.with_file_name("clip_output.csv").exists());

        // finished runs can be waited for again
        assert_eq!(s.wait().unwrap(), summary);
    }

    #[test]
    fn controls_are_gated_while_running() {
        let mut s = Session::new(Settings::default()).unwrap();
        s.open(input(20)).unwrap();
        s.set_output(None).unwrap();
        s.start(0, None).unwrap();
        s.pause().unwrap();

        assert_eq!(error(s.seek(1)), Errors::Busy);
        assert_eq!(
            error(s.set_param("gaussian_blur", "size", ParamValue::Int(3))),
            Errors::Busy
        );
        assert_eq!(error(s.set_module("short")), Errors::Busy);
        assert_eq!(error(s.open("/tmp")), Errors::Busy);
        assert_eq!(error(s.set_csv(None)), Errors::Busy);

        s.stop().unwrap();
        s.wait().unwrap();
        assert!(!s.is_running());
        assert!(!s.is_paused());
        s.seek(1).unwrap();
    }

    #[test]
    fn polling() {
        let mut s = Session::new(Settings::default()).unwrap();
        s.open(input(3)).unwrap();
        s.set_csv(None).unwrap();
        s.set_output(None).unwrap();
        s.start(0, None).unwrap();

        let mut events = Vec::default();
        let deadline = std::time::Instant::now() + std::time::Duration::from_secs(30);
        while s.is_running() && std::time::Instant::now() < deadline {
            events.extend(s.poll());
            std::thread::sleep(std::time::Duration::from_millis(5));
        }
        assert!(!s.is_running());
        assert!(events.last().map_or(false, |e| e.is_terminal()));
        assert_eq!(s.outcome().unwrap().as_ref().unwrap().frames, 3);
    }
}
