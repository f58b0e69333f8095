use super::model::InferenceBackend;
use crate::errors::ScanError;
use ndarray::{ArrayD, IxDyn};
use ort::{inputs, session::Session, value::TensorRef};
use std::path::Path;

/// ONNX Runtime session on the CPU execution provider
pub struct OnnxBackend {
    session: Session,
    input_name: String,
    output_name: String,
    model_path: String,
}

impl OnnxBackend {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ScanError> {
        let path = path.as_ref();
        let builder = Session::builder()
            .map_err(|e| ScanError::InferenceFailure(format!("failed to create session builder: {}", e)))?;
        let session = builder
            .commit_from_file(path)
            .map_err(|e| ScanError::InferenceFailure(format!("failed to load model from {:?}: {}", path, e)))?;

        let input_name = session
            .inputs()
            .first()
            .map(|input| input.name().to_string())
            .ok_or_else(|| ScanError::InferenceFailure("model declares no inputs".to_string()))?;
        let output_name = session
            .outputs()
            .first()
            .map(|output| output.name().to_string())
            .ok_or_else(|| ScanError::InferenceFailure("model declares no outputs".to_string()))?;

        log::info!("Loaded ONNX model {:?} (input '{}', output '{}')", path, input_name, output_name);

        Ok(Self {
            session,
            input_name,
            output_name,
            model_path: path.display().to_string(),
        })
    }
}

impl InferenceBackend for OnnxBackend {
    fn infer(&mut self, input: &[f32], shape: [usize; 4]) -> Result<Vec<f32>, ScanError> {
        let array = ArrayD::from_shape_vec(IxDyn(&shape), input.to_vec())
            .map_err(|e| ScanError::InferenceFailure(format!("input does not match shape {:?}: {}", shape, e)))?;
        let tensor = TensorRef::from_array_view(array.view())
            .map_err(|e| ScanError::InferenceFailure(format!("failed to create tensor ref: {}", e)))?;

        let outputs = self
            .session
            .run(inputs![self.input_name.as_str() => tensor])
            .map_err(|e| ScanError::InferenceFailure(format!("inference failed: {}", e)))?;

        let scores = outputs[self.output_name.as_str()]
            .try_extract_array::<f32>()
            .map_err(|e| ScanError::InferenceFailure(format!("output '{}' is not f32: {}", self.output_name, e)))?;

        Ok(scores.iter().copied().collect())
    }

    fn describe(&self) -> String {
        format!("onnx:{}", self.model_path)
    }
}
