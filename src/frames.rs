//! Frame timing report of a timeline trace

use crate::{
    duration::{display_duration, duration_string},
    CliError, ConfigError, FramesArgs,
};
use log::info;
use runtime_timeline::{
    frame::frame_budget, AnomalyKind, Diagnostics, Duration, Frame, TimelineConfig,
    TimelineSession, TrackRole,
};
use std::{fs::File, io, path::Path};

/// Run the frame analysis
pub fn run(args: FramesArgs) -> Result<(), CliError> {
    let config = session_config(&args)?;
    let budget = frame_budget(config.target_fps);

    // Replay the trace into a session
    eprintln!("Processing input data...");
    let trace = runtime_timeline::load_trace(&args.input)?;
    let mut session = TimelineSession::new(config);
    session.ingest(trace);
    session.flush();
    let frames = session.drain_frames().collect::<Vec<_>>();
    let num_spans = session.drain_spans().count();
    info!("Got {} frame(s) and {num_spans} other span(s)", frames.len());

    // Display the report
    let stdout = io::stdout();
    let mut output = stdout.lock();
    print_frames(&mut output, &frames, args.janky_only)?;
    print_summary(&mut output, &frames, budget)?;
    print_anomalies(&mut output, session.diagnostics(), args.anomalies)?;
    Ok(())
}

/// Assemble the session settings from the settings file and CLI overrides
fn session_config(args: &FramesArgs) -> Result<TimelineConfig, ConfigError> {
    let mut config = match &args.config {
        Some(path) => load_config(path)?,
        None => TimelineConfig::default(),
    };
    if let Some(window) = args.window {
        config.reorder_window = window;
    }
    if let Some(capacity) = args.pending_capacity {
        config.pending_frame_capacity = capacity;
    }
    if let Some(max_age) = args.max_age {
        config.max_frame_age = max_age;
    }
    if let Some(fps) = args.fps {
        config.target_fps = fps;
    }
    if let Some(tid) = args.ui_track {
        config.ui_track = Some(tid);
    }
    if let Some(tid) = args.raster_track {
        config.raster_track = Some(tid);
    }
    Ok(config)
}

/// Load session settings from a JSON file
fn load_config(path: &Path) -> Result<TimelineConfig, ConfigError> {
    let file = File::open(path)?;
    Ok(serde_json::from_reader(io::BufReader::new(file))?)
}

/// Display one line per frame
fn print_frames(
    mut output: impl io::Write,
    frames: &[Frame],
    janky_only: bool,
) -> io::Result<()> {
    writeln!(output, "Frames:")?;
    for frame in frames.iter().filter(|f| !janky_only || f.is_janky()) {
        write!(output, "- {}", frame.key())?;
        for role in TrackRole::ALL {
            write!(output, "  {role} ")?;
            display_duration(&mut output, frame.track_duration(role))?;
        }
        write!(output, "  total ")?;
        display_duration(&mut output, frame.duration())?;
        if frame.is_janky() {
            let slow = TrackRole::ALL
                .into_iter()
                .filter(|&role| frame.track_duration(role) > frame.budget())
                .map(|role| role.to_string())
                .collect::<Vec<_>>();
            write!(output, "  JANK ({})", slow.join(", "))?;
        }
        writeln!(output)?;
    }
    Ok(())
}

/// Display frame statistics
fn print_summary(mut output: impl io::Write, frames: &[Frame], budget: Duration) -> io::Result<()> {
    writeln!(output, "\nSummary (budget {}):", duration_string(budget))?;
    if frames.is_empty() {
        return writeln!(output, "- No complete frame");
    }
    let num_frames = frames.len();
    let num_janky = frames.iter().filter(|f| f.is_janky()).count();
    writeln!(
        output,
        "- {num_janky}/{num_frames} janky frame(s) ({:.2}%)",
        num_janky as f64 / num_frames as f64 * 100.0
    )?;
    for role in TrackRole::ALL {
        let durations = frames.iter().map(|f| f.track_duration(role));
        let total = durations.clone().sum::<Duration>();
        let worst = durations.fold(0.0, Duration::max);
        writeln!(
            output,
            "- {role}: average {}, worst {}",
            duration_string(total / num_frames as Duration),
            duration_string(worst)
        )?;
    }
    Ok(())
}

/// Display anomaly counts and the most recent anomalies
fn print_anomalies(
    mut output: impl io::Write,
    diagnostics: &Diagnostics,
    max_listed: usize,
) -> io::Result<()> {
    if diagnostics.total() == 0 {
        return Ok(());
    }
    writeln!(output, "\nAnomalies:")?;
    for kind in AnomalyKind::ALL {
        let count = diagnostics.count(kind);
        if count > 0 {
            writeln!(output, "- {kind:?}: {count}")?;
        }
    }
    let recent = diagnostics.recent().collect::<Vec<_>>();
    let listed = &recent[recent.len().saturating_sub(max_listed)..];
    if !listed.is_empty() {
        writeln!(output, "\nMost recent anomalies:")?;
        for anomaly in listed {
            writeln!(output, "- {anomaly}")?;
        }
    }
    Ok(())
}
