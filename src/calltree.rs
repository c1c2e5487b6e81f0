//! Call tree display of a sampled CPU profile

use crate::{duration::display_duration, CliError, CpuArgs};
use runtime_timeline::{CpuProfileData, CpuStackFrame, Duration};
use std::io::{self, Write};
use termtree::{GlyphPalette, Tree};
use unicode_width::{UnicodeWidthChar, UnicodeWidthStr};

/// Tree glyphs
const PALETTE: GlyphPalette = GlyphPalette {
    middle_item: "├",
    last_item: "└",
    item_indent: "─",
    middle_skip: "│",
    last_skip: " ",
    skip_indent: " ",
};

/// Run the CPU profile analysis
pub fn run(args: CpuArgs, max_cols: u16) -> Result<(), CliError> {
    eprintln!("Processing input data...");
    let mut profile = CpuProfileData::from_file(&args.input)?;
    if args.start.is_some() || args.end.is_some() {
        let start = args.start.unwrap_or(f64::NEG_INFINITY);
        let end = args.end.unwrap_or(f64::INFINITY);
        profile = profile
            .sub_profile(start, end)
            .map_err(runtime_timeline::CpuProfileLoadError::from)?;
    }

    let stdout = io::stdout();
    let mut output = stdout.lock();
    print_profile(
        &mut output,
        &profile,
        args.self_threshold,
        args.hierarchical_threshold,
        max_cols,
    )?;
    Ok(())
}

/// Display the profile header, the flat profile and the call tree
fn print_profile(
    mut output: impl io::Write,
    profile: &CpuProfileData,
    self_threshold: f64,
    hierarchical_threshold: f64,
    max_cols: u16,
) -> io::Result<()> {
    writeln!(
        output,
        "{} sample(s), one every {}µs, up to {} frame(s) deep",
        profile.sample_count(),
        profile.sample_period(),
        profile.stack_depth()
    )?;
    if profile.sample_count() == 0 {
        return Ok(());
    }

    writeln!(output, "\nHottest frames by self samples:")?;
    print_flat_profile(&mut output, profile, self_threshold, max_cols)?;

    writeln!(output, "\nCall tree:")?;
    let tree = call_tree(
        profile,
        profile.root(),
        hierarchical_threshold / 100.0,
        max_cols,
    )?;
    writeln!(output, "{tree}")
}

/// Display the frames whose self samples reach a percentage threshold,
/// hottest first
fn print_flat_profile(
    mut output: impl io::Write,
    profile: &CpuProfileData,
    threshold_percent: f64,
    max_cols: u16,
) -> io::Result<()> {
    let threshold = threshold_percent / 100.0;
    let mut hottest = profile
        .pre_order()
        .filter(|frame| !frame.is_synthetic() && frame.self_ratio() >= threshold)
        .collect::<Vec<_>>();
    hottest.sort_by(|a, b| b.self_ratio().total_cmp(&a.self_ratio()));
    for frame in &hottest {
        let duration = sample_duration(profile, frame.exclusive_sample_count());
        write!(output, "- ")?;
        display_frame(
            &mut output,
            frame,
            max_cols.saturating_sub(2),
            duration,
            frame.self_ratio(),
        )?;
        writeln!(output)?;
    }
    let num_frames = profile.pre_order().filter(|f| !f.is_synthetic()).count();
    if hottest.len() < num_frames {
        writeln!(
            output,
            "- ... and {} other frame(s) below {threshold_percent:.2}% ...",
            num_frames - hottest.len(),
        )?;
    }
    Ok(())
}

/// Time represented by some number of samples
fn sample_duration(profile: &CpuProfileData, samples: u64) -> Duration {
    samples as Duration * profile.sample_period() as Duration
}

/// Make a tree display of the call tree below some frame
fn call_tree(
    profile: &CpuProfileData,
    root: CpuStackFrame,
    threshold: f64,
    max_cols: u16,
) -> io::Result<Tree<Box<str>>> {
    // Render root node
    let mut root_display = Vec::<u8>::new();
    display_frame(
        &mut root_display,
        &root,
        max_cols,
        sample_duration(profile, root.inclusive_sample_count()),
        root.consumption_ratio(),
    )?;
    let root_display: Box<str> = String::from_utf8_lossy(&root_display).into();
    let mut tree = Tree::new(root_display).with_glyphs(PALETTE);

    // Stop recursion when there is no space to render children
    let child_cols = max_cols
        .saturating_sub(PALETTE.middle_item.width() as u16)
        .saturating_sub(PALETTE.item_indent.width() as u16);
    if child_cols == 0 {
        return Ok(tree);
    }

    // Collect hottest children
    let mut hottest = root
        .children()
        .filter(|child| {
            child.inclusive_sample_count() > 0 && child.consumption_ratio() >= threshold
        })
        .collect::<Vec<_>>();
    hottest.sort_by(|a, b| b.inclusive_sample_count().cmp(&a.inclusive_sample_count()));
    let num_hidden = root.num_children() - hottest.len();

    // Render hottest children
    for child in hottest {
        tree.push(call_tree(profile, child, threshold, child_cols)?);
    }
    if num_hidden > 0 {
        // If there are more children, warn about it
        let mut terminator = format!(
            "…{num_hidden} callee(s) below {:.2}%…",
            threshold * 100.0
        );
        if terminator.width() > child_cols.into() {
            terminator.clear();
            terminator.push('…');
        }
        tree.push(Tree::new(terminator.into_boxed_str()).with_glyphs(PALETTE));
    }
    Ok(tree)
}

/// Display a stack frame with its profiling information, within a column budget
fn display_frame(
    mut output: impl io::Write,
    frame: &CpuStackFrame,
    max_cols: u16,
    duration: Duration,
    ratio: f64,
) -> io::Result<()> {
    // Display the trailing profiling numbers in a private string to know its
    // display width and how many columns that leaves for the frame name.
    let mut trailer = Vec::<u8>::new();
    display_profile_info(&mut trailer, duration, ratio)?;
    let trailer = String::from_utf8_lossy(&trailer);
    let name_cols = usize::from(max_cols).saturating_sub(trailer.width());

    let name = frame.name();
    if name.width() <= name_cols {
        write!(output, "{name}{trailer}")
    } else if name_cols >= 2 {
        write!(output, "{}{trailer}", truncate(name, name_cols))
    } else {
        write!(output, "{}", truncate(name, max_cols.into()))
    }
}

/// Shorten a name to a display width, marking the cut with an ellipsis
fn truncate(name: &str, max_cols: usize) -> String {
    if name.width() <= max_cols {
        return name.to_owned();
    }
    let mut result = String::new();
    let mut width = 0;
    for c in name.chars() {
        let c_width = c.width().unwrap_or(0);
        if width + c_width + 1 > max_cols {
            break;
        }
        result.push(c);
        width += c_width;
    }
    if max_cols > 0 {
        result.push('…');
    }
    result
}

/// Display profiling information (absolute duration and sample share)
fn display_profile_info(
    mut output: impl io::Write,
    duration: Duration,
    ratio: f64,
) -> io::Result<()> {
    write!(output, " [")?;
    display_duration(&mut output, duration)?;
    let percent = ratio * 100.0;
    write!(output, ", {percent:.2}%]")
}

#[cfg(test)]
mod tests {
    use super::*;

    const PROFILE: &str = r#"{
        "samplePeriod": 1000,
        "sampleCount": 4,
        "stackFrames": {
            "1": {"category": "Dart", "name": "main"},
            "2": {"category": "Dart", "name": "build", "parent": "1"},
            "3": {"category": "Dart", "name": "layout", "parent": "1"}
        },
        "traceEvents": [
            {"sf": "2", "ts": 0},
            {"sf": "2", "ts": 1000},
            {"sf": "2", "ts": 2000},
            {"sf": "3", "ts": 3000}
        ]
    }"#;

    #[test]
    fn truncation() {
        assert_eq!(truncate("layout", 10), "layout");
        assert_eq!(truncate("layout", 6), "layout");
        assert_eq!(truncate("layout", 4), "lay…");
        assert_eq!(truncate("レイアウト", 5), "レイ…");
        assert_eq!(truncate("layout", 0), "");
    }

    #[test]
    fn frame_display() {
        let profile = PROFILE
            .parse::<CpuProfileData>()
            .expect("Profile should be valid");
        let build = profile.frame(&"2".into()).expect("build should exist");
        let display = |max_cols| {
            let mut buffer = Vec::new();
            display_frame(&mut buffer, &build, max_cols, 3000.0, 0.75)
                .expect("Writing to a Vec should succeed");
            String::from_utf8(buffer).expect("Display should be UTF-8")
        };
        assert_eq!(display(80), "build [3.00ms, 75.00%]");
        assert_eq!(display(20), "bu… [3.00ms, 75.00%]");
        assert_eq!(display(4), "bui…");
    }

    #[test]
    fn tree() {
        let profile = PROFILE
            .parse::<CpuProfileData>()
            .expect("Profile should be valid");
        let tree = call_tree(&profile, profile.root(), 0.3, 80).expect("Rendering should succeed");
        let text = tree.to_string();
        let lines = text.lines().collect::<Vec<_>>();
        assert_eq!(lines[0], "all [4.00ms, 100.00%]");
        assert!(lines[1].ends_with("main [4.00ms, 100.00%]"));
        assert!(lines[2].ends_with("build [3.00ms, 75.00%]"));
        assert!(lines[3].ends_with("…1 callee(s) below 30.00%…"));
        assert_eq!(lines.len(), 4);
    }

    fn profile_report(self_threshold: f64, max_cols: u16) -> String {
        let profile = PROFILE
            .parse::<CpuProfileData>()
            .expect("Profile should be valid");
        let mut buffer = Vec::new();
        print_profile(&mut buffer, &profile, self_threshold, 30.0, max_cols)
            .expect("Writing to a Vec should succeed");
        String::from_utf8(buffer).expect("Report should be UTF-8")
    }

    #[test]
    fn flat_profile() {
        let report = profile_report(50.0, 80);
        let lines = report.lines().collect::<Vec<_>>();
        assert_eq!(lines[0], "4 sample(s), one every 1000µs, up to 0 frame(s) deep");
        assert_eq!(lines[2], "Hottest frames by self samples:");
        assert_eq!(lines[3], "- build [3.00ms, 75.00%]");
        assert_eq!(lines[4], "- ... and 2 other frame(s) below 50.00% ...");
        assert_eq!(lines[6], "Call tree:");
        assert_eq!(lines[7], "all [4.00ms, 100.00%]");

        let report = profile_report(0.0, 80);
        assert!(report.contains("- build [3.00ms, 75.00%]\n- layout [1.00ms, 25.00%]\n"));
        assert!(!report.contains("other frame(s)"));
    }

    #[test]
    fn empty_profile_header_only() {
        let profile = r#"{"sampleCount": 0, "samplePeriod": 1000, "stackFrames": {}, "traceEvents": []}"#
            .parse::<CpuProfileData>()
            .expect("Empty profile should be valid");
        let mut buffer = Vec::new();
        print_profile(&mut buffer, &profile, 1.0, 1.0, 80).expect("Writing to a Vec should succeed");
        let report = String::from_utf8(buffer).expect("Report should be UTF-8");
        assert_eq!(report.lines().count(), 1);
        assert!(report.starts_with("0 sample(s)"));
    }
}
