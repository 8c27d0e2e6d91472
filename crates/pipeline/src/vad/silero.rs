use ort::session::Session;
use ort::value::Value;
use tracing::{debug, info};

use super::VadModel;

/// Shape of the Silero v5 recurrent state tensor.
const STATE_LEN: usize = 2 * 1 * 128;

/// Silero VAD inference over ONNX Runtime.
///
/// The model scores 512-sample windows at 16kHz and threads a `[2, 1, 128]`
/// hidden state between calls, so one instance serves exactly one audio
/// stream.
pub struct SileroVad {
    session: Session,
    state: Vec<f32>,
}

impl SileroVad {
    pub fn new(model_path: &str) -> anyhow::Result<Self> {
        let session = Session::builder()?
            .with_intra_threads(1)?
            .commit_from_file(model_path)
            .map_err(|e| anyhow::anyhow!("failed to load VAD model '{model_path}': {e}"))?;
        info!(model_path, "Silero VAD model loaded");
        Ok(Self {
            session,
            state: vec![0.0; STATE_LEN],
        })
    }
}

impl VadModel for SileroVad {
    fn reset(&mut self) {
        self.state.fill(0.0);
        debug!("VAD state reset");
    }

    fn process_window(&mut self, window: &[f32], sample_rate: u32) -> anyhow::Result<f32> {
        let input = Value::from_array(([1usize, window.len()], window.to_vec()))?;
        let state = Value::from_array(([2usize, 1usize, 128usize], self.state.clone()))?;
        let sr = Value::from_array(([1usize], vec![sample_rate as i64]))?;

        let outputs = self.session.run(ort::inputs![input, state, sr])?;

        let (_, prob) = outputs[0].try_extract_tensor::<f32>()?;
        let (_, new_state) = outputs[1].try_extract_tensor::<f32>()?;
        if new_state.len() == self.state.len() {
            self.state.copy_from_slice(new_state);
        }

        Ok(prob.first().copied().unwrap_or(0.0))
    }
}
