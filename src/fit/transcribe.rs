//! Copies the primary model's imputed fine series into the augmented model.

use crate::error::TranscriptionError;
use crate::models::{AugmentedModel, PosteriorModel};

/// Overwrite the augmented observations with the primary imputed series.
///
/// On a length mismatch nothing is written.
pub fn transcribe_response<P, A>(primary: &P, augmented: &mut A) -> Result<(), TranscriptionError>
where
    P: PosteriorModel + ?Sized,
    A: AugmentedModel + ?Sized,
{
    let target = augmented.observations_mut();
    let Some(imputed) = primary.state().imputed_series() else {
        return Err(TranscriptionError {
            imputed: 0,
            augmented: target.len(),
        });
    };
    if imputed.len() != target.len() {
        return Err(TranscriptionError {
            imputed: imputed.len(),
            augmented: target.len(),
        });
    }
    target.copy_from_slice(&imputed);
    Ok(())
}
