use std::ops::{Deref, DerefMut};

use super::{Mode, Pipeline};

/// Holds a pipeline in `Mode::Eval` for as long as it lives.
///
/// Dropping the guard puts the pipeline back in `Mode::Train`, on every exit path.
pub struct EvalGuard<'p, P: Pipeline + ?Sized> {
    pipeline: &'p mut P,
}

impl<'p, P: Pipeline + ?Sized> EvalGuard<'p, P> {
    pub fn new(pipeline: &'p mut P) -> Self {
        pipeline.set_mode(Mode::Eval);
        Self { pipeline }
    }
}

impl<P: Pipeline + ?Sized> Deref for EvalGuard<'_, P> {
    type Target = P;

    fn deref(&self) -> &P {
        self.pipeline
    }
}

impl<P: Pipeline + ?Sized> DerefMut for EvalGuard<'_, P> {
    fn deref_mut(&mut self) -> &mut P {
        self.pipeline
    }
}

impl<P: Pipeline + ?Sized> Drop for EvalGuard<'_, P> {
    fn drop(&mut self) {
        self.pipeline.set_mode(Mode::Train);
    }
}
