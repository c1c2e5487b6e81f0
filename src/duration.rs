//! Utility to display durations

use runtime_timeline::{
    ctf::{MICROSECOND, MILLISECOND, SECOND},
    Duration,
};
use std::io;

/// Display a duration in a human-readable format
///
/// Frame-scale durations are shown in milliseconds, longer ones switch to
/// seconds and then to a H:MM:SS format.
pub fn display_duration(mut output: impl io::Write, duration: Duration) -> io::Result<()> {
    if duration >= 59.995 * SECOND {
        // Round to hundredths of seconds before splitting so that carries
        // propagate to minutes and hours
        let centiseconds = (duration / (SECOND / 100.0)).round() as u64;
        let (seconds, centiseconds) = (centiseconds / 100, centiseconds % 100);
        let (minutes, seconds) = (seconds / 60, seconds % 60);
        let (hours, minutes) = (minutes / 60, minutes % 60);
        if hours > 0 {
            write!(output, "{hours}:{minutes:02}:{seconds:02}.{centiseconds:02}")
        } else {
            write!(output, "{minutes}:{seconds:02}.{centiseconds:02}")
        }
    } else if duration >= 0.999995 * SECOND {
        write!(output, "{:.2}s", duration / SECOND)
    } else if duration >= MILLISECOND {
        write!(output, "{:.2}ms", duration / MILLISECOND)
    } else {
        write!(output, "{}µs", duration / MICROSECOND)
    }
}

/// Display a duration into a string
pub fn duration_string(duration: Duration) -> String {
    let mut buffer = Vec::new();
    // Writing into a Vec cannot fail
    let _ = display_duration(&mut buffer, duration);
    String::from_utf8_lossy(&buffer).into_owned()
}
