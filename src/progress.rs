//! Progress reporting for streamed transfers.
//!
//! A [`ProgressSink`] is injected into bulk calls; the transport drives it
//! with `start`, one `update` per chunk and `finish`. The sink never decides
//! anything about the transfer itself.

use log::info;

/// Receiver of transfer progress, counted in array elements.
pub trait ProgressSink {
    /// Transfer begins; `total` is known for downloads and uploads.
    fn start(&mut self, total: Option<usize>);
    /// `current` elements have moved so far.
    fn update(&mut self, current: usize);
    /// Transfer complete.
    fn finish(&mut self);
}

/// Sink that ignores everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn start(&mut self, _total: Option<usize>) {}
    fn update(&mut self, _current: usize) {}
    fn finish(&mut self) {}
}

/// One observed progress call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressRecord {
    Start(Option<usize>),
    Update(usize),
    Finish,
}

/// Sink that keeps every call, in order.
#[derive(Debug, Default, Clone)]
pub struct ProgressRecorder {
    pub records: Vec<ProgressRecord>,
}

impl ProgressRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of `update` calls seen.
    pub fn updates(&self) -> usize {
        self.records
            .iter()
            .filter(|r| matches!(r, ProgressRecord::Update(_)))
            .count()
    }

    /// Last reported element count.
    pub fn last(&self) -> Option<usize> {
        self.records.iter().rev().find_map(|r| match r {
            ProgressRecord::Update(n) => Some(*n),
            _ => None,
        })
    }

    pub fn finished(&self) -> bool {
        matches!(self.records.last(), Some(ProgressRecord::Finish))
    }
}

impl ProgressSink for ProgressRecorder {
    fn start(&mut self, total: Option<usize>) {
        self.records.push(ProgressRecord::Start(total));
    }
    fn update(&mut self, current: usize) {
        self.records.push(ProgressRecord::Update(current));
    }
    fn finish(&mut self) {
        self.records.push(ProgressRecord::Finish);
    }
}

/// Sink that logs every 10% step through the `log` facade.
#[derive(Debug, Clone)]
pub struct LogProgress {
    label: String,
    total: Option<usize>,
    last_decile: usize,
}

impl LogProgress {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            total: None,
            last_decile: 0,
        }
    }
}

impl ProgressSink for LogProgress {
    fn start(&mut self, total: Option<usize>) {
        self.total = total;
        self.last_decile = 0;
        info!("{}: transfer of {:?} elements started", self.label, total);
    }

    fn update(&mut self, current: usize) {
        let Some(total) = self.total.filter(|&t| t > 0) else {
            return;
        };
        let decile = (current.min(total) * 10) / total;
        if decile > self.last_decile {
            self.last_decile = decile;
            info!("{}: {}%", self.label, decile * 10);
        }
    }

    fn finish(&mut self) {
        info!("{}: transfer finished", self.label);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recorder_tracks_calls() {
        let mut r = ProgressRecorder::new();
        r.start(Some(10));
        r.update(4);
        r.update(10);
        r.finish();
        assert_eq!(r.updates(), 2);
        assert_eq!(r.last(), Some(10));
        assert!(r.finished());
    }
}
