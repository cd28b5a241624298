use leaf_proto::{DetectionResult, EntrySource};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::{Analyzer, AutoBatch, SchedulerConfig, Session, StationError};

/// Handle on the periodic detection task of one session.
pub struct SchedulerHandle {
    stop: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl SchedulerHandle {
    pub fn spawn(session: Arc<Session>, analyzer: Arc<Analyzer>, cfg: &SchedulerConfig) -> Self {
        let (stop, stop_rx) = watch::channel(false);
        let period = Duration::from_millis(cfg.interval_ms.max(1));
        let task = tokio::spawn(run(session, analyzer, period, stop_rx));
        info!("scheduler: started (every {}ms)", period.as_millis());
        Self { stop, task }
    }

    /// Cancels the next tick and waits for the one in flight, if any.
    pub async fn stop(self) {
        let _ = self.stop.send(true);
        if let Err(e) = self.task.await {
            warn!("scheduler: task ended abnormally: {}", e);
        }
        info!("scheduler: stopped");
    }
}

async fn run(session: Arc<Session>, analyzer: Arc<Analyzer>, period: Duration, mut stop_rx: watch::Receiver<bool>) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut tick: u64 = 0;

    loop {
        tokio::select! {
            _ = stop_rx.changed() => break,
            _ = ticker.tick() => {}
        }
        if *stop_rx.borrow() || !session.mode().is_automatic() {
            break;
        }
        tick += 1;
        match run_tick(&session, &analyzer, tick).await {
            Ok(n) => debug!("scheduler: tick {} published {} results", tick, n),
            Err(e) => warn!("scheduler: tick {} failed: {}", tick, e),
        }
    }
}

/// One detect-crop-classify pass. Returns the size of the published batch.
pub async fn run_tick(session: &Session, analyzer: &Analyzer, tick: u64) -> Result<usize, StationError> {
    let frame = session.read_frame().await?;
    let detections = analyzer.detect(frame.clone()).await;
    debug!("scheduler: tick {} {} strategy, {} boxes", tick, detections.strategy(), detections.boxes().len());

    let boxes: Vec<_> = detections.into_boxes().into_iter().map(|b| (b.bbox, b.confidence)).collect();
    let Some(regions) = session.replace_automatic(&boxes) else {
        return Ok(0);
    };

    let side = analyzer.input_size();
    let mut results = Vec::with_capacity(regions.len());
    for region in &regions {
        let conf = region.confidence.unwrap_or(0.0);
        let res = match frame.crop_resized(&region.bbox, side) {
            Some(crop) => analyzer.analyze(EntrySource::Automatic, region.id, conf, &crop, Some(region.bbox)).await,
            None => DetectionResult::failed(region.id, conf, "region outside frame").with_bbox(region.bbox),
        };
        results.push(res);
    }

    let n = results.len();
    session.publish_batch(AutoBatch { tick, frame_seq: frame.seq, results });
    Ok(n)
}
