//! Download progress reporting: an interactive bar for a terminal, throttled
//! log lines otherwise. Ported from `Chunker`/`ProgressIndicator`/
//! `ProgressBar`/`ProgressLogger` in `examples/original_source/getm/progress.py`.

use std::time::{Duration, Instant};

use indicatif::{ProgressBar as IndicatifBar, ProgressStyle};

const INCREMENTS: u64 = 40;

pub fn sizeof_fmt(mut num: f64) -> String {
    const UNITS: [&str; 9] = ["", "Ki", "Mi", "Gi", "Ti", "Pi", "Ei", "Zi", "Yi"];
    for unit in &UNITS[..8] {
        if num.abs() < 1024.0 {
            return format!("{:.1}{}B", num, unit);
        }
        num /= 1024.0;
    }
    format!("{:.1}{}B", num, UNITS[8])
}

/// Buckets `add()` calls into `num_chunks` even slices of `size` bytes,
/// firing once per newly-crossed chunk boundary rather than on every call.
struct Chunker {
    size: u64,
    num_chunks: u64,
    chunk_size: f64,
    progress: u64,
    chunks_completed: u64,
    start: Instant,
}

impl Chunker {
    fn new(size: u64, num_chunks: u64) -> Self {
        Chunker {
            size,
            num_chunks,
            chunk_size: (size.max(1)) as f64 / num_chunks as f64,
            progress: 0,
            chunks_completed: 0,
            start: Instant::now(),
        }
    }

    fn add(&mut self, sz: u64) -> Option<(u64, u64, u64, Duration)> {
        self.progress += sz;
        assert!(self.progress <= self.size, "more than 100% progress");
        let chunks_completed = (self.progress as f64 / self.chunk_size).floor() as u64;
        if chunks_completed > self.chunks_completed {
            self.chunks_completed = chunks_completed;
            let chunks_remaining = self.num_chunks.saturating_sub(chunks_completed);
            Some((self.progress, chunks_completed, chunks_remaining, self.start.elapsed()))
        } else {
            None
        }
    }
}

/// A download's progress, reported either as a terminal bar or as throttled
/// log lines. Pick at construction time based on whether stderr is a tty.
pub enum Progress {
    Bar(BarIndicator),
    Logger(LoggerIndicator),
}

impl Progress {
    pub fn bar(name: &str, size: u64) -> Self {
        Progress::Bar(BarIndicator::new(name, size))
    }

    pub fn logger(name: &str, size: u64) -> Self {
        Progress::Logger(LoggerIndicator::new(name, size))
    }

    pub fn add(&mut self, sz: u64) {
        match self {
            Progress::Bar(p) => p.add(sz),
            Progress::Logger(p) => p.add(sz),
        }
    }

    pub fn finish(&mut self) {
        match self {
            Progress::Bar(p) => p.finish(),
            Progress::Logger(p) => p.finish(),
        }
    }
}

pub struct BarIndicator {
    bar: IndicatifBar,
}

impl BarIndicator {
    fn new(name: &str, size: u64) -> Self {
        let bar = IndicatifBar::new(size);
        bar.set_style(
            ProgressStyle::default_bar()
                .template("{prefix:.bold}   {percent:3}%   [{bar:40}]   {bytes}   {bytes_per_sec}   {elapsed}")
                .progress_chars("=> "),
        );
        bar.set_prefix(name.chars().take(40).collect::<String>());
        BarIndicator { bar }
    }

    fn add(&mut self, sz: u64) {
        self.bar.inc(sz);
    }

    fn finish(&mut self) {
        self.bar.finish();
    }
}

pub struct LoggerIndicator {
    name: String,
    size: u64,
    chunker: Chunker,
}

impl LoggerIndicator {
    fn new(name: &str, size: u64) -> Self {
        LoggerIndicator {
            name: name.to_string(),
            size,
            chunker: Chunker::new(size, INCREMENTS),
        }
    }

    fn add(&mut self, sz: u64) {
        if let Some((progress, _completed, _remaining, duration)) = self.chunker.add(sz) {
            self.log(progress, duration);
        }
    }

    fn finish(&mut self) {
        let duration = self.chunker.start.elapsed();
        self.log(self.chunker.progress, duration);
    }

    fn log(&self, progress: u64, duration: Duration) {
        let percent = (progress as f64 / self.size.max(1) as f64 * 100.0).floor();
        let rate = progress as f64 / duration.as_secs_f64().max(f64::EPSILON);
        tracing::info!(
            "{} {:>3}% {} {}/s {:.6}s",
            self.name,
            percent,
            sizeof_fmt(self.size as f64),
            sizeof_fmt(rate),
            duration.as_secs_f64(),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sizeof_fmt_picks_the_right_unit() {
        assert_eq!(sizeof_fmt(512.0), "512.0B");
        assert_eq!(sizeof_fmt(1536.0), "1.5KiB");
        assert_eq!(sizeof_fmt(3.0 * 1024.0 * 1024.0), "3.0MiB");
    }

    #[test]
    fn chunker_fires_once_per_crossed_boundary() {
        let mut c = Chunker::new(100, 10);
        assert!(c.add(5).is_none());
        assert!(c.add(5).is_some());
        let (progress, completed, remaining, _) = c.add(90).unwrap();
        assert_eq!(progress, 100);
        assert_eq!(completed, 10);
        assert_eq!(remaining, 0);
    }

    #[test]
    fn logger_indicator_does_not_panic_on_finish() {
        let mut p = LoggerIndicator::new("obj", 1000);
        p.add(500);
        p.finish();
    }
}
