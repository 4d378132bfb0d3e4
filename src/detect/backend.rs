use anyhow::Result;

use crate::detect::labels::LabelSet;
use crate::detect::result::Detection;
use crate::frame::Frame;

/// Detector backend trait.
///
/// The session loop calls `detect` synchronously for every frame and waits
/// for it before deciding recording transitions, so implementations should
/// not defer work past the call.
pub trait DetectorBackend: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Closed vocabulary the backend can emit.
    fn labels(&self) -> &LabelSet;

    /// Run detection on a frame.
    ///
    /// Returned detections are ordered by descending confidence and carry
    /// boxes in normalized, bottom-left-origin coordinates.
    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>>;

    /// Optional warm-up hook.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}
