use anyhow::{bail, Result};
use clap::Parser;
use log::info;
use std::path::PathBuf;
use std::time::Duration;
use videotracker::prelude::*;
use videotracker::stack::params::ParamKind;
use videotracker::worker::Event;

/// Segments the frames of a video, links the found objects into paths and exports
/// them as CSV and annotated frames
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Video file, image file or directory of images
    #[arg(short, long)]
    input: Option<PathBuf>,

    /// CSV output, defaults to `<input>_output.csv`
    #[arg(short, long)]
    csv: Option<PathBuf>,

    /// Annotated video output, defaults to `<input>_output`
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Segmentation module (threshold, short, simple, null)
    #[arg(short, long)]
    module: Option<String>,

    /// Settings file to load
    #[arg(long)]
    config: Option<PathBuf>,

    /// Writes the effective settings to this file
    #[arg(long)]
    save_config: Option<PathBuf>,

    /// Framerate for image sequences
    #[arg(long)]
    fps: Option<f64>,

    /// First frame to process
    #[arg(long, default_value_t = 0)]
    start: usize,

    /// Frame to stop before
    #[arg(long)]
    end: Option<usize>,

    /// Renders the segmentation of one frame instead of processing the input
    #[arg(long, requires = "preview_out")]
    preview: Option<usize>,

    /// Image the preview is written to
    #[arg(long)]
    preview_out: Option<PathBuf>,

    /// Prints the parameters of the selected module
    #[arg(long)]
    list_params: bool,
}

fn list_params(stack: &Stack) -> Result<()> {
    println!("{}", stack.module());
    for stage in stack.stage_names() {
        println!("  {} ({})", stage, stack.stage(stage)?.function().title());
        for (name, param) in stack.params(stage)? {
            let range = match &param.kind {
                ParamKind::Int {
                    minimum,
                    maximum,
                    step,
                } => format!("{}..={} step {}", minimum, maximum, step),
                ParamKind::Float {
                    minimum,
                    maximum,
                    step,
                } => format!("{}..={} step {}", minimum, maximum, step),
                ParamKind::Choice(choices) => choices.iter().map(|(_, v)| *v).collect::<Vec<_>>().join("|"),
                kind => kind.name().to_string(),
            };
            println!(
                "    {:<16} {:<24} {} = {}",
                name,
                param.label,
                range,
                stack.value(stage, name)?
            );
        }
    }
    Ok(())
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut settings = match &args.config {
        Some(path) => Settings::load(path)?,
        None => Settings::default(),
    };
    if let Some(module) = &args.module {
        if *module != settings.module {
            settings.module = module.clone();
            settings.values.clear();
        }
    }
    if args.fps.is_some() {
        settings.framerate = args.fps;
    }

    let mut session = Session::new(settings)?;

    if let Some(path) = &args.save_config {
        session.settings().save(path)?;
    }
    if args.list_params {
        return list_params(session.stack());
    }

    let Some(input) = &args.input else {
        if args.save_config.is_some() {
            return Ok(());
        }
        bail!("No input given, see --help");
    };
    session.open(input)?;
    if args.csv.is_some() {
        session.set_csv(args.csv.clone())?;
    }
    if args.output.is_some() {
        session.set_output(args.output.clone())?;
    }

    if let (Some(frame), Some(out)) = (args.preview, &args.preview_out) {
        session.seek(frame)?;
        session.preview()?.save(out)?;
        info!(
            "Preview of frame {} with {} contours written to {}",
            frame,
            session.stack().contours().len(),
            out.display()
        );
        return Ok(());
    }

    session.start(args.start, args.end)?;
    let mut reported = 0;
    while session.is_running() {
        for event in session.poll() {
            if let Event::Progress { frame, frames, .. } = event {
                let processed = (frame + 1).saturating_sub(args.start);
                if frames == 0 {
                    // unknown length
                    if processed % 100 == 0 {
                        info!("{} frames", processed);
                    }
                    continue;
                }
                let done = processed * 10 / frames;
                if done > reported {
                    reported = done;
                    info!("{}% of {} frames", done * 10, frames);
                }
            }
        }
        std::thread::sleep(Duration::from_millis(50));
    }

    let summary = session.wait()?;
    info!(
        "Processed {} frames, {} detections in {} paths",
        summary.frames, summary.detections, summary.paths
    );
    if let Some(csv) = &summary.csv {
        info!("CSV written to {}", csv.display());
    }
    if let Some(output) = &summary.output {
        info!("Annotated frames written to {}", output.display());
    }
    Ok(())
}
