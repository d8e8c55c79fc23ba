//! Pure projection of upload byte counters into user-facing progress text.
//! Sampling rate and delivery are the orchestrator's problem; nothing here
//! performs I/O.

use std::time::Instant;

const BAR_UNITS: usize = 20;

#[derive(Debug, Clone, PartialEq)]
pub struct ProgressView {
    pub percent: f64,
    pub bar: String,
    pub bytes_per_sec: f64,
    pub eta_seconds: Option<f64>,
}

/// Projects a byte cursor into percent, bar, throughput and ETA. Clamps
/// percent to `[0, 100]` and guards the throughput division against a
/// zero-length elapsed window on the very first sample.
pub fn project(current: u64, total: u64, start: Instant, now: Instant) -> ProgressView {
    let percent = if total == 0 {
        0.0
    } else {
        (current as f64 * 100.0 / total as f64).clamp(0.0, 100.0)
    };
    let filled = ((percent / 5.0).floor() as usize).min(BAR_UNITS);
    let bar = format!(
        "[{}{}]",
        "█".repeat(filled),
        "░".repeat(BAR_UNITS - filled)
    );
    let elapsed = now.saturating_duration_since(start).as_secs_f64();
    let bytes_per_sec = current as f64 / elapsed.max(f64::EPSILON);
    let eta_seconds = if bytes_per_sec > 0.0 {
        Some(total.saturating_sub(current) as f64 / bytes_per_sec)
    } else {
        None
    };
    ProgressView {
        percent,
        bar,
        bytes_per_sec,
        eta_seconds,
    }
}

/// Renders a view into the progress message body.
pub fn render(view: &ProgressView) -> String {
    let eta = match view.eta_seconds {
        Some(seconds) => format!("{}s", seconds.round() as u64),
        None => "--".to_string(),
    };
    format!(
        "{} {:.2}%\nSpeed: {:.2} KB/s\nETA: {}",
        view.bar,
        view.percent,
        view.bytes_per_sec / 1024.0,
        eta
    )
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn halfway_projection() {
        let start = Instant::now();
        let view = project(50, 100, start, start + Duration::from_secs(1));
        assert!((view.percent - 50.0).abs() < 1e-9);
        assert_eq!(view.bar.matches('█').count(), 10);
        assert_eq!(view.bar.matches('░').count(), 10);
        assert!((view.bytes_per_sec - 50.0).abs() < 1e-6);
        assert!((view.eta_seconds.unwrap() - 1.0).abs() < 1e-6);
    }

    #[test]
    fn zero_elapsed_does_not_divide_by_zero() {
        let start = Instant::now();
        let view = project(10, 100, start, start);
        assert!(view.bytes_per_sec.is_finite());
        assert!(view.eta_seconds.unwrap().is_finite());
    }

    #[test]
    fn zero_bytes_has_unknown_eta() {
        let start = Instant::now();
        let view = project(0, 100, start, start + Duration::from_secs(2));
        assert_eq!(view.bytes_per_sec, 0.0);
        assert!(view.eta_seconds.is_none());
        assert_eq!(view.bar.matches('█').count(), 0);
        assert!(render(&view).contains("ETA: --"));
    }

    #[test]
    fn overflowing_cursor_is_clamped() {
        let start = Instant::now();
        let view = project(150, 100, start, start + Duration::from_secs(1));
        assert!((view.percent - 100.0).abs() < 1e-9);
        assert_eq!(view.bar.matches('█').count(), 20);
        assert_eq!(view.eta_seconds.unwrap(), 0.0);
    }

    #[test]
    fn empty_total_is_zero_percent() {
        let start = Instant::now();
        let view = project(0, 0, start, start + Duration::from_secs(1));
        assert_eq!(view.percent, 0.0);
    }
}
