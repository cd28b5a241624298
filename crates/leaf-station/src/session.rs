use leaf_proto::{BBox, DetectionResult, Region, RegionOrigin};
use leaf_vision::{Frame, FrameSource};
use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;
use tokio::sync::Mutex as AsyncMutex;
use tracing::info;

use crate::{ModeController, ModeState, RegionStore, StationError};

/// Results of one scheduler tick. Published whole, never edited in place.
#[derive(Debug, Clone, Default, Serialize)]
pub struct AutoBatch {
    pub tick: u64,
    pub frame_seq: u64,
    pub results: Vec<DetectionResult>,
}

#[derive(Default)]
struct SessionState {
    mode: ModeController,
    regions: RegionStore,
    batch: Arc<AutoBatch>,
    last_frame: Option<Arc<Frame>>,
    last_click: Option<Instant>,
}

/// One monitoring run, from start-video to stop-video.
///
/// Mode, regions, the latest batch and the latest frame sit behind one lock.
/// The camera has its own async lock so at most one read is in flight.
pub struct Session {
    camera: AsyncMutex<Box<dyn FrameSource>>,
    state: Mutex<SessionState>,
    frame_size: (u32, u32),
}

impl Session {
    /// Wraps an opened camera. `first` is the probe frame taken at start.
    pub fn new(camera: Box<dyn FrameSource>, first: Frame) -> Self {
        let frame_size = (first.width(), first.height());
        let state = SessionState { last_frame: Some(Arc::new(first)), ..SessionState::default() };
        Self { camera: AsyncMutex::new(camera), state: Mutex::new(state), frame_size }
    }

    fn state(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn frame_size(&self) -> (u32, u32) {
        self.frame_size
    }

    pub fn mode(&self) -> ModeState {
        self.state().mode.state()
    }

    /// Flips the mode. Entering Automatic starts from an empty batch.
    pub fn toggle_mode(&self) -> ModeState {
        let mut st = self.state();
        let mode = st.mode.toggle();
        if mode.is_automatic() {
            st.batch = Arc::new(AutoBatch::default());
        }
        mode
    }

    pub async fn read_frame(&self) -> Result<Arc<Frame>, StationError> {
        let frame = {
            let mut cam = self.camera.lock().await;
            Arc::new(cam.read().await?)
        };
        self.state().last_frame = Some(frame.clone());
        Ok(frame)
    }

    pub fn last_frame(&self) -> Option<Arc<Frame>> {
        self.state().last_frame.clone()
    }

    /// Waits for any read in flight, then releases the device.
    pub async fn close(&self) {
        let mut cam = self.camera.lock().await;
        cam.close().await;
        let mut st = self.state();
        st.regions.clear();
        st.batch = Arc::new(AutoBatch::default());
        st.last_frame = None;
        info!("session: closed");
    }

    /// Adds a manual region unless the session is in Automatic mode or a click
    /// was accepted less than `cooldown_ms` ago.
    pub fn add_click_region(&self, bbox: BBox, cooldown_ms: u64) -> Result<(Region, usize), StationError> {
        let (fw, fh) = self.frame_size;
        let mut st = self.state();
        if st.mode.state().is_automatic() {
            return Err(StationError::WrongMode("clicks are disabled in automatic mode"));
        }
        if let Some(t) = st.last_click {
            if t.elapsed().as_millis() < cooldown_ms as u128 {
                return Err(StationError::Cooldown(cooldown_ms));
            }
        }
        let region = st.regions.add(bbox, RegionOrigin::Manual, None, fw, fh)?;
        st.last_click = Some(Instant::now());
        Ok((region, st.regions.len()))
    }

    pub fn region(&self, id: u64) -> Result<Region, StationError> {
        self.state().regions.get(id).cloned()
    }

    pub fn regions(&self) -> Vec<Region> {
        self.state().regions.all()
    }

    pub fn region_count(&self) -> usize {
        self.state().regions.len()
    }

    /// `None` when the session left Automatic mode while the tick was running.
    pub fn replace_automatic(&self, boxes: &[(BBox, f32)]) -> Option<Vec<Region>> {
        let (fw, fh) = self.frame_size;
        let mut st = self.state();
        if !st.mode.state().is_automatic() {
            return None;
        }
        Some(st.regions.replace_automatic(boxes, fw, fh))
    }

    pub fn publish_batch(&self, batch: AutoBatch) -> bool {
        let mut st = self.state();
        if !st.mode.state().is_automatic() {
            return false;
        }
        st.batch = Arc::new(batch);
        true
    }

    pub fn batch(&self) -> Arc<AutoBatch> {
        self.state().batch.clone()
    }
}
