use camino::Utf8PathBuf;
use loadout_infra::StoreEvent;
use std::collections::VecDeque;
use std::time::Instant;

#[derive(Debug, Clone)]
pub struct ExtractSnapshot {
    pub total_files: u64,
    pub extracted_files: u64,
    pub extracted_bytes: u64,
    pub speed_bps: u64,
    pub last_file: Option<Utf8PathBuf>,
}

/// Folds file store events into a displayable view of an extraction.
pub struct ProgressTracker {
    total_files: u64,
    extracted_files: u64,
    extracted_bytes: u64,
    last_file: Option<Utf8PathBuf>,
    last_tick: Instant,
    bytes_since_last_tick: u64,
    speed_bps: u64,
    history: VecDeque<u64>,
}

impl Default for ProgressTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self {
            total_files: 0,
            extracted_files: 0,
            extracted_bytes: 0,
            last_file: None,
            last_tick: Instant::now(),
            bytes_since_last_tick: 0,
            speed_bps: 0,
            history: VecDeque::new(),
        }
    }

    pub fn update(&mut self, event: StoreEvent) {
        match event {
            // Several extraction batches may report into the same tracker.
            StoreEvent::Started { total_files } => self.total_files += total_files as u64,
            StoreEvent::FileDone { destination, bytes } => {
                self.extracted_files += 1;
                self.extracted_bytes += bytes;
                self.bytes_since_last_tick += bytes;
                self.last_file = Some(destination);
            }
        }
    }

    pub fn is_done(&self) -> bool {
        self.total_files > 0 && self.extracted_files >= self.total_files
    }

    pub fn get_snapshot(&mut self) -> ExtractSnapshot {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_tick).as_secs_f64();

        if elapsed >= 0.5 {
            let current_bps = (self.bytes_since_last_tick as f64 / elapsed) as u64;
            self.history.push_back(current_bps);
            if self.history.len() > 5 {
                self.history.pop_front();
            }
            self.speed_bps =
                (self.history.iter().sum::<u64>() as f64 / self.history.len() as f64) as u64;
            self.last_tick = now;
            self.bytes_since_last_tick = 0;
        }

        ExtractSnapshot {
            total_files: self.total_files,
            extracted_files: self.extracted_files,
            extracted_bytes: self.extracted_bytes,
            speed_bps: self.speed_bps,
            last_file: self.last_file.clone(),
        }
    }
}
