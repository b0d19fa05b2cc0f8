use std::sync::Arc;

use crate::clock::Clock;
use crate::feed::Broadcaster;
use crate::simulation::{GlucoseModel, SharedRng};
use crate::store::{PatientDirectory, ReadingStore};

/// Collaborators shared by the flow controller and the glucose service.
#[derive(Clone)]
pub struct SimContext {
    pub store: Arc<dyn ReadingStore>,
    pub patients: Arc<dyn PatientDirectory>,
    pub feed: Arc<dyn Broadcaster>,
    pub clock: Arc<dyn Clock>,
    pub model: Arc<GlucoseModel>,
    pub rng: SharedRng,
}
