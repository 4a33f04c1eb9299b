//! Concurrent, order-preserving, fail-fast transcription of segments
//!
//! Layout: `job queue → N worker threads → completion channel → collector`
//!
//! Workers are plain threads pulling from a shared crossbeam queue. Results
//! come back over a tokio channel to an async collector that writes each one
//! into the slot of its segment index. The first error sets a shared cancel
//! flag and returns immediately. Workers still busy are left to finish their
//! current call, and their results are discarded.

use crate::audio::AudioSegment;
use crate::config::TranscriptionConfig;
use crate::error::{ParleyError, Result};
use crate::temp::ArtifactStore;
use crate::transcriber::Transcriber;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use tokio::sync::mpsc;
use tracing::{debug, error, info};

/// One unit of work: a segment plus what the transcriber needs to know.
#[derive(Debug, Clone)]
pub struct SegmentJob {
    pub index: usize,
    pub audio: AudioSegment,
    pub language: Arc<str>,
    pub adjust_for_noise: bool,
}

/// What a worker reports for one job.
#[derive(Debug)]
pub struct SegmentResult {
    pub index: usize,
    pub outcome: Result<Option<String>>,
}

/// Progress of a run: `completed` of `total` segments have succeeded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Progress {
    pub completed: usize,
    pub total: usize,
}

impl Progress {
    pub fn is_done(&self) -> bool {
        self.completed == self.total
    }
}

/// Per-run options for [`Pipeline`]
#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub language: String,
    pub adjust_for_noise: bool,
    pub max_workers: usize,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            language: "en-US".to_string(),
            adjust_for_noise: false,
            max_workers: num_cpus::get(),
        }
    }
}

impl From<&TranscriptionConfig> for PipelineOptions {
    fn from(config: &TranscriptionConfig) -> Self {
        Self {
            language: config.language.clone(),
            adjust_for_noise: config.adapt_to_ambient_noise,
            max_workers: config.max_workers,
        }
    }
}

/// Runs a transcriber over many segments with a bounded worker pool.
pub struct Pipeline {
    transcriber: Arc<dyn Transcriber>,
    options: PipelineOptions,
    artifacts: Option<Arc<ArtifactStore>>,
}

impl Pipeline {
    pub fn new(transcriber: Arc<dyn Transcriber>, options: PipelineOptions) -> Self {
        Self {
            transcriber,
            options,
            artifacts: None,
        }
    }

    /// Write each segment to disk while it is being transcribed.
    pub fn with_artifacts(mut self, store: ArtifactStore) -> Self {
        self.artifacts = Some(Arc::new(store));
        self
    }

    /// Number of worker threads a run over `segments` segments would use.
    pub fn worker_count(&self, segments: usize) -> usize {
        self.options.max_workers.clamp(1, segments.max(1))
    }

    pub async fn run(&self, segments: Vec<AudioSegment>) -> Result<Vec<Option<String>>> {
        self.run_with_progress(segments, |_| {}).await
    }

    /// Transcribe every segment and return the texts in segment order.
    ///
    /// `on_progress` sees `(0, total)` first, then one event per successful
    /// segment with a strictly increasing count. Nothing is reported after a
    /// failure.
    pub async fn run_with_progress<F>(
        &self,
        segments: Vec<AudioSegment>,
        mut on_progress: F,
    ) -> Result<Vec<Option<String>>>
    where
        F: FnMut(Progress),
    {
        let total = segments.len();
        check_indices(&segments)?;

        let mut state = CollectorState::new(total);
        on_progress(state.progress());
        if total == 0 {
            return Ok(Vec::new());
        }

        let workers = self.worker_count(total);
        info!(
            "Transcribing {} segments with {} workers using {}",
            total,
            workers,
            self.transcriber.name()
        );

        let language: Arc<str> = Arc::from(self.options.language.as_str());
        let (job_tx, job_rx) = crossbeam_channel::unbounded::<SegmentJob>();
        for audio in segments {
            let job = SegmentJob {
                index: audio.index(),
                audio,
                language: Arc::clone(&language),
                adjust_for_noise: self.options.adjust_for_noise,
            };
            job_tx
                .send(job)
                .map_err(|_| ParleyError::Pipeline("job queue closed".to_string()))?;
        }
        drop(job_tx);

        let cancelled = Arc::new(AtomicBool::new(false));
        let (done_tx, mut done_rx) = mpsc::unbounded_channel::<SegmentResult>();
        for id in 0..workers {
            let spawned = spawn_worker(
                id,
                job_rx.clone(),
                done_tx.clone(),
                Arc::clone(&self.transcriber),
                self.artifacts.clone(),
                Arc::clone(&cancelled),
            );
            if let Err(e) = spawned {
                cancelled.store(true, Ordering::SeqCst);
                return Err(ParleyError::Resource(format!(
                    "Failed to start worker thread: {}",
                    e
                )));
            }
        }
        drop(done_tx);
        drop(job_rx);

        collect(&mut state, &mut done_rx, &cancelled, &mut on_progress).await?;
        Ok(state.into_results())
    }
}

/// Fill `state` from worker results until every slot is written. Every
/// failure raises `cancelled` before returning.
async fn collect<F>(
    state: &mut CollectorState,
    done_rx: &mut mpsc::UnboundedReceiver<SegmentResult>,
    cancelled: &AtomicBool,
    on_progress: &mut F,
) -> Result<()>
where
    F: FnMut(Progress),
{
    while let Some(result) = done_rx.recv().await {
        match result.outcome {
            Ok(text) => {
                if let Err(err) = state.record(result.index, text) {
                    cancelled.store(true, Ordering::SeqCst);
                    return Err(err);
                }
                on_progress(state.progress());
                if state.is_complete() {
                    return Ok(());
                }
            }
            Err(err) => {
                cancelled.store(true, Ordering::SeqCst);
                error!("Segment {} failed: {}", result.index, err);
                return Err(err);
            }
        }
    }

    cancelled.store(true, Ordering::SeqCst);
    Err(ParleyError::Pipeline(format!(
        "workers stopped after {} of {} segments",
        state.completed,
        state.slots.len()
    )))
}

fn check_indices(segments: &[AudioSegment]) -> Result<()> {
    let mut seen = vec![false; segments.len()];
    for segment in segments {
        match seen.get_mut(segment.index()) {
            Some(slot) if !*slot => *slot = true,
            Some(_) => {
                return Err(ParleyError::Pipeline(format!(
                    "duplicate segment index {}",
                    segment.index()
                )))
            }
            None => {
                return Err(ParleyError::Pipeline(format!(
                    "segment index {} out of range for {} segments",
                    segment.index(),
                    segments.len()
                )))
            }
        }
    }
    Ok(())
}

/// Write-once result slots plus the success counter.
struct CollectorState {
    slots: Vec<Option<Option<String>>>,
    completed: usize,
}

impl CollectorState {
    fn new(total: usize) -> Self {
        Self {
            slots: vec![None; total],
            completed: 0,
        }
    }

    fn record(&mut self, index: usize, text: Option<String>) -> Result<()> {
        let slot = self.slots.get_mut(index).ok_or_else(|| {
            ParleyError::Pipeline(format!("result for unknown segment {}", index))
        })?;
        if slot.is_some() {
            return Err(ParleyError::Pipeline(format!(
                "segment {} reported twice",
                index
            )));
        }
        *slot = Some(text);
        self.completed += 1;
        Ok(())
    }

    fn progress(&self) -> Progress {
        Progress {
            completed: self.completed,
            total: self.slots.len(),
        }
    }

    fn is_complete(&self) -> bool {
        self.completed == self.slots.len()
    }

    fn into_results(self) -> Vec<Option<String>> {
        self.slots.into_iter().map(Option::flatten).collect()
    }
}

fn spawn_worker(
    id: usize,
    jobs: crossbeam_channel::Receiver<SegmentJob>,
    done: mpsc::UnboundedSender<SegmentResult>,
    transcriber: Arc<dyn Transcriber>,
    artifacts: Option<Arc<ArtifactStore>>,
    cancelled: Arc<AtomicBool>,
) -> std::io::Result<JoinHandle<()>> {
    std::thread::Builder::new()
        .name(format!("parley-worker-{}", id))
        .spawn(move || {
            for job in jobs {
                if cancelled.load(Ordering::Relaxed) {
                    break;
                }
                let index = job.index;
                let outcome = run_job(&job, &*transcriber, artifacts.as_deref());
                if cancelled.load(Ordering::Relaxed) {
                    debug!("Discarding result of segment {} after abort", index);
                    break;
                }
                if done.send(SegmentResult { index, outcome }).is_err() {
                    break;
                }
            }
        })
}

fn run_job(
    job: &SegmentJob,
    transcriber: &dyn Transcriber,
    artifacts: Option<&ArtifactStore>,
) -> Result<Option<String>> {
    // Removed when this returns, whatever the outcome
    let _artifact = artifacts.map(|store| store.write(&job.audio));

    debug!(
        "Segment {}: {} ms",
        job.index,
        job.audio.duration_ms()
    );
    transcriber.transcribe(&job.audio, &job.language, job.adjust_for_noise)
}
