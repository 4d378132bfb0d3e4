mod backend;
mod backends;
mod labels;
mod registry;
mod result;

pub use backend::DetectorBackend;
pub use backends::StubBackend;
#[cfg(feature = "backend-tract")]
pub use backends::TractBackend;
pub use labels::{LabelSet, COCO_CLASSES};
pub use registry::{shared, BackendRegistry, SharedBackend};
pub use result::{non_max_suppression, Detection, NormalizedRect};
