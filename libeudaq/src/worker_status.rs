/// The pass a worker is in. Each pass gets its own progress bar colour.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Stage {
    /// Reading and converting to collect identifier streams
    #[default]
    Scan,
    /// Re-reading and writing re-synchronised events
    Write,
}

impl Stage {
    /// Colour name understood by indicatif templates.
    pub fn color(&self) -> &'static str {
        match self {
            Stage::Scan => "cyan",
            Stage::Write => "green",
        }
    }
}

/// Progress message sent from a worker thread to the front end.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WorkerStatus {
    pub progress: f32,
    pub run_number: u32,
    pub worker_id: usize,
    pub stage: Stage,
}

impl WorkerStatus {
    pub fn new(progress: f32, run_number: u32, worker_id: usize, stage: Stage) -> Self {
        Self {
            progress,
            run_number,
            worker_id,
            stage,
        }
    }
}
