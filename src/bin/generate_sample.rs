use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{Duration, NaiveDate, NaiveDateTime};

/// Channels written per trace row.
const CHANNELS: usize = 3;

/// Rows per day, one per second.
const ROWS_PER_DAY: usize = 420;

fn gaussian(x: f64, mu: f64, sigma: f64, amplitude: f64) -> f64 {
    amplitude * (-(x - mu).powi(2) / (2.0 * sigma.powi(2))).exp()
}

/// Minimal deterministic PRNG (xoshiro256**)
struct SimpleRng {
    state: [u64; 4],
}

impl SimpleRng {
    fn new(seed: u64) -> Self {
        let mut s = [0u64; 4];
        let mut x = seed;
        for slot in &mut s {
            x = x.wrapping_mul(6364136223846793005).wrapping_add(1);
            *slot = x;
        }
        SimpleRng { state: s }
    }

    fn next_u64(&mut self) -> u64 {
        let result = (self.state[1].wrapping_mul(5))
            .rotate_left(7)
            .wrapping_mul(9);
        let t = self.state[1] << 17;
        self.state[2] ^= self.state[0];
        self.state[3] ^= self.state[1];
        self.state[1] ^= self.state[2];
        self.state[0] ^= self.state[3];
        self.state[2] ^= t;
        self.state[3] = self.state[3].rotate_left(45);
        result
    }

    fn next_f64(&mut self) -> f64 {
        (self.next_u64() >> 11) as f64 / (1u64 << 53) as f64
    }

    fn below(&mut self, n: u64) -> u64 {
        self.next_u64() % n
    }

    /// Box-Muller transform for normal distribution
    fn gauss(&mut self, mean: f64, std_dev: f64) -> f64 {
        let u1 = self.next_f64().max(1e-15);
        let u2 = self.next_f64();
        let z = (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos();
        mean + std_dev * z
    }
}

/// Bead layout of one day: `(start row, length)`.
fn bead_plan(rng: &mut SimpleRng) -> Vec<(usize, usize)> {
    let mut plan = Vec::new();
    let mut row = 15 + rng.below(10) as usize;
    loop {
        let len = 40 + rng.below(40) as usize;
        if row + len + 5 >= ROWS_PER_DAY {
            break;
        }
        plan.push((row, len));
        row += len + 15 + rng.below(20) as usize;
    }
    plan
}

/// One trace row per second: power profile, current following it, and a
/// slow background channel.
fn day_rows(rng: &mut SimpleRng) -> Vec<[f64; CHANNELS]> {
    let plan = bead_plan(rng);
    (0..ROWS_PER_DAY)
        .map(|row| {
            let bead = plan
                .iter()
                .find(|&&(start, len)| row >= start && row < start + len);
            let (power, current) = match bead {
                Some(&(start, len)) => {
                    let x = (row - start) as f64;
                    let plateau = 5.0 + gaussian(x, len as f64 / 2.0, len as f64 / 4.0, 1.5);
                    (
                        plateau + rng.gauss(0.0, 0.15),
                        plateau * 24.0 + rng.gauss(0.0, 2.0),
                    )
                }
                None => (rng.gauss(0.0, 0.05), rng.gauss(0.0, 0.5)),
            };
            let background = 20.0 + (row as f64 * 0.01).sin() + rng.gauss(0.0, 0.02);
            [power, current, background]
        })
        .collect()
}

fn identifier(ts: NaiveDateTime, feed: u32) -> String {
    format!(
        "{}_BM{}Y0001_LINE2_F{feed}.csv",
        ts.format("%H%M%S"),
        ts.format("%y%m%d")
    )
}

/// One headerless file covering every day, one row per second within a day.
fn write_trace(
    path: &Path,
    feed: u32,
    days: &[(NaiveDateTime, Vec<[f64; CHANNELS]>)],
) -> Result<usize> {
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_path(path)
        .with_context(|| format!("creating {}", path.display()))?;
    let mut written = 0;
    for (start, rows) in days {
        for (i, row) in rows.iter().enumerate() {
            let ts = *start + Duration::seconds(i as i64);
            let mut record = vec![identifier(ts, feed)];
            record.extend(row.iter().map(|v| format!("{v:.4}")));
            writer.write_record(&record)?;
            written += 1;
        }
    }
    // A row the identifier parser rejects.
    let mut broken = vec!["export_footer.csv".to_string()];
    broken.extend(std::iter::repeat("0".to_string()).take(CHANNELS));
    writer.write_record(&broken)?;
    writer.flush()?;
    Ok(written + 1)
}

fn write_status(path: &Path, days: &[NaiveDateTime], rng: &mut SimpleRng) -> Result<usize> {
    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("creating {}", path.display()))?;
    writer.write_record(["Timestamp", "Stat1", "Stat2", "Value"])?;
    let stat1 = ["ROBOT", "FEEDER"];
    let mut rows = 0;
    for &start in days {
        for step in (0..ROWS_PER_DAY as i64).step_by(3) {
            let jitter = rng.below(700) as i64 - 350;
            let ts = start + Duration::seconds(step) + Duration::milliseconds(jitter);
            let s1 = stat1[rng.below(2) as usize];
            let s2 = 1 + rng.below(3);
            let value = 50.0 + rng.gauss(0.0, 5.0);
            writer.write_record([
                ts.format("%Y-%m-%d %H:%M:%S%.3f").to_string(),
                s1.to_string(),
                s2.to_string(),
                format!("{value:.3}"),
            ])?;
            rows += 1;
        }
    }
    // Rows the loader has to skip.
    writer.write_record(["2024-03-04 10:00:00", "ROBOT", "", "1.0"])?;
    writer.write_record(["not a time", "ROBOT", "1", "1.0"])?;
    writer.write_record(["2024-03-04 10:00:01", "ROBOT", "1", "n/a"])?;
    writer.flush()?;
    Ok(rows)
}

fn main() -> Result<()> {
    let out_dir = PathBuf::from(
        std::env::args()
            .nth(1)
            .unwrap_or_else(|| "sample_data".to_string()),
    );
    let trace_dir = out_dir.join("traces");
    std::fs::create_dir_all(&trace_dir)
        .with_context(|| format!("creating {}", trace_dir.display()))?;

    let mut rng = SimpleRng::new(42);

    // Monday, Tuesday and Thursday shifts.
    let days: Vec<NaiveDateTime> = [(4, 9, 30), (5, 13, 0), (7, 6, 45)]
        .iter()
        .filter_map(|&(day, h, m)| NaiveDate::from_ymd_opt(2024, 3, day)?.and_hms_opt(h, m, 0))
        .collect();

    for feed in 1..=2 {
        let per_day: Vec<(NaiveDateTime, Vec<[f64; CHANNELS]>)> = days
            .iter()
            .map(|&start| (start, day_rows(&mut rng)))
            .collect();
        let path = trace_dir.join(format!("line2_F{feed}.csv"));
        let rows = write_trace(&path, feed, &per_day)?;
        println!("Wrote {rows} rows ({} days) to {}", days.len(), path.display());
    }

    let status_path = out_dir.join("status.csv");
    let rows = write_status(&status_path, &days, &mut rng)?;
    println!("Wrote {rows} status rows (+3 malformed) to {}", status_path.display());
    Ok(())
}
