use std::cell::RefCell;
use std::time::Duration;

/// Wall-clock spent in the hot paths of the tracker, per thread.
#[derive(Default, Clone)]
pub struct TimingStats {
    pub locate_times: Vec<Duration>,
    pub intersection_times: Vec<Duration>,
    pub track_times: Vec<Duration>,
    pub total_time: Duration,
}

impl TimingStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold another thread's samples into these.
    pub fn merge(&mut self, other: TimingStats) {
        self.locate_times.extend(other.locate_times);
        self.intersection_times.extend(other.intersection_times);
        self.track_times.extend(other.track_times);
        self.total_time = self.total_time.max(other.total_time);
    }

    fn millis(times: &[Duration]) -> (f64, f64) {
        let total: Duration = times.iter().sum();
        let avg = if times.is_empty() {
            0.0
        } else {
            total.as_secs_f64() * 1000.0 / times.len() as f64
        };
        (total.as_secs_f64() * 1000.0, avg)
    }

    #[cfg(feature = "timing")]
    pub fn print_summary(&self) {
        if self.track_times.is_empty() {
            return;
        }

        let (track, track_avg) = Self::millis(&self.track_times);
        let (locate, locate_avg) = Self::millis(&self.locate_times);
        let (junction, junction_avg) = Self::millis(&self.intersection_times);

        println!("\n{}", "=".repeat(60));
        println!("{:^60}", "TRACKING TIMING SUMMARY");
        println!("{}", "=".repeat(60));
        println!(
            "Total run time:                {:.3}s",
            self.total_time.as_secs_f64()
        );
        println!("{}", "-".repeat(60));
        println!("Component breakdown (all threads):");
        println!(
            "  Particle tracks:           {:>9.3}ms  (avg: {:>9.3}ms)",
            track, track_avg
        );
        println!(
            "  Neighbor searches:         {:>9.3}ms  (avg: {:>9.3}ms)",
            locate, locate_avg
        );
        println!(
            "  Intersection crossings:    {:>9.3}ms  (avg: {:>9.3}ms)",
            junction, junction_avg
        );
        println!("{}", "=".repeat(60));
        println!(
            "Counts:                        {} tracks, {} searches, {} crossings\n",
            self.track_times.len(),
            self.locate_times.len(),
            self.intersection_times.len()
        );
    }

    #[cfg(not(feature = "timing"))]
    pub fn print_summary(&self) {}
}

#[cfg(feature = "timing")]
thread_local! {
    static TIMING_STATS: RefCell<TimingStats> = RefCell::new(TimingStats::new());
}

#[cfg(feature = "timing")]
pub fn reset_timing() {
    TIMING_STATS.with(|stats| {
        *stats.borrow_mut() = TimingStats::new();
    });
    rayon::broadcast(|_| {
        TIMING_STATS.with(|stats| {
            *stats.borrow_mut() = TimingStats::new();
        })
    });
}

#[cfg(not(feature = "timing"))]
pub fn reset_timing() {}

#[cfg(feature = "timing")]
fn timed<F, R>(f: F, sink: fn(&mut TimingStats) -> &mut Vec<Duration>) -> R
where
    F: FnOnce() -> R,
{
    let start = std::time::Instant::now();
    let result = f();
    let elapsed = start.elapsed();
    TIMING_STATS.with(|stats| {
        sink(&mut stats.borrow_mut()).push(elapsed);
    });
    result
}

#[cfg(feature = "timing")]
pub fn record_locate<F, R>(f: F) -> R
where
    F: FnOnce() -> R,
{
    timed(f, |s| &mut s.locate_times)
}

#[cfg(not(feature = "timing"))]
pub fn record_locate<F, R>(f: F) -> R
where
    F: FnOnce() -> R,
{
    f()
}

#[cfg(feature = "timing")]
pub fn record_intersection<F, R>(f: F) -> R
where
    F: FnOnce() -> R,
{
    timed(f, |s| &mut s.intersection_times)
}

#[cfg(not(feature = "timing"))]
pub fn record_intersection<F, R>(f: F) -> R
where
    F: FnOnce() -> R,
{
    f()
}

#[cfg(feature = "timing")]
pub fn record_track<F, R>(f: F) -> R
where
    F: FnOnce() -> R,
{
    timed(f, |s| &mut s.track_times)
}

#[cfg(not(feature = "timing"))]
pub fn record_track<F, R>(f: F) -> R
where
    F: FnOnce() -> R,
{
    f()
}

#[cfg(feature = "timing")]
pub fn finalize_timing(total_time: Duration) -> TimingStats {
    TIMING_STATS.with(|stats| {
        let mut s = stats.borrow_mut();
        s.total_time = total_time;
        s.clone()
    })
}

#[cfg(not(feature = "timing"))]
pub fn finalize_timing(_total_time: Duration) -> TimingStats {
    TimingStats::new()
}

/// Merge the samples of the calling thread and of every rayon worker.
#[cfg(feature = "timing")]
pub fn collect_timing(total_time: Duration) -> TimingStats {
    let mut merged = finalize_timing(total_time);
    for stats in rayon::broadcast(|_| finalize_timing(total_time)) {
        merged.merge(stats);
    }
    merged
}

#[cfg(not(feature = "timing"))]
pub fn collect_timing(_total_time: Duration) -> TimingStats {
    TimingStats::new()
}
