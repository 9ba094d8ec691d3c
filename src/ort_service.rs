use crate::{
    config::{ModelConfig, Validatable},
    detection::Detection,
    model_service::{Detector, DetectorError},
};
use async_trait::async_trait;
use image::{imageops::FilterType, RgbImage};
use ndarray::{s, Array, ArrayView2, Axis, Ix3, Ix4};
use ort::{
    session::{builder::GraphOptimizationLevel, Session},
    value::TensorRef,
};
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc, Mutex,
};

/// YOLOv5 rows are `xc, yc, w, h, objectness` followed by one score per class.
const BOX_FIELDS: usize = 5;

#[derive(Debug, Clone, Copy)]
pub struct DecodeSettings {
    pub min_probability: f32,
    pub iou_threshold: f32,
    pub max_detections: usize,
}

impl From<&ModelConfig> for DecodeSettings {
    fn from(config: &ModelConfig) -> Self {
        Self {
            min_probability: config.min_probability,
            iou_threshold: config.iou_threshold,
            max_detections: config.max_detections,
        }
    }
}

fn intersection(box1: &[f32; 4], box2: &[f32; 4]) -> f32 {
    let width = (box1[2].min(box2[2]) - box1[0].max(box2[0])).max(0.);
    let height = (box1[3].min(box2[3]) - box1[1].max(box2[1])).max(0.);
    width * height
}

fn union(box1: &[f32; 4], box2: &[f32; 4]) -> f32 {
    ((box1[2] - box1[0]) * (box1[3] - box1[1])) + ((box2[2] - box2[0]) * (box2[3] - box2[1]))
        - intersection(box1, box2)
}

fn iou(box1: &[f32; 4], box2: &[f32; 4]) -> f32 {
    let union = union(box1, box2);
    if union <= 0. {
        return 0.;
    }
    intersection(box1, box2) / union
}

fn transform_image(image: &RgbImage, input_size: u32) -> Array<f32, Ix4> {
    let resized;
    let image = if image.dimensions() == (input_size, input_size) {
        image
    } else {
        resized = image::imageops::resize(image, input_size, input_size, FilterType::CatmullRom);
        &resized
    };

    let size = input_size as usize;
    let mut input = Array::zeros((1, 3, size, size));
    for (x, y, pixel) in image.enumerate_pixels() {
        let x = x as usize;
        let y = y as usize;
        let [r, g, b] = pixel.0;
        input[[0, 0, y, x]] = (r as f32) / 255.;
        input[[0, 1, y, x]] = (g as f32) / 255.;
        input[[0, 2, y, x]] = (b as f32) / 255.;
    }

    input
}

/// Turns raw `[N, 5 + classes]` predictions into detections sorted by
/// confidence, with per-class non-maximum suppression applied.
pub fn decode_predictions(
    output: ArrayView2<f32>,
    settings: &DecodeSettings,
) -> Result<Vec<Detection>, DetectorError> {
    let row_len = output.ncols();
    if row_len <= BOX_FIELDS {
        return Err(DetectorError::InvalidOutput(format!(
            "prediction rows have {} values, expected more than {}",
            row_len, BOX_FIELDS
        )));
    }

    let mut boxes = Vec::new();
    for row in output.axis_iter(Axis(0)) {
        let objectness = row[4];
        if objectness < settings.min_probability {
            continue;
        }

        let Some((class_index, class_score)) = row
            .iter()
            .skip(BOX_FIELDS)
            .copied()
            .enumerate()
            .reduce(|accum, item| if item.1 > accum.1 { item } else { accum })
        else {
            continue;
        };

        let confidence = objectness * class_score;
        if confidence < settings.min_probability {
            continue;
        }

        let (xc, yc, w, h) = (row[0], row[1], row[2], row[3]);
        boxes.push(Detection::new(
            class_index,
            confidence,
            [xc - w / 2., yc - h / 2., xc + w / 2., yc + h / 2.],
        ));
    }

    boxes.sort_by(|box1, box2| box2.confidence.total_cmp(&box1.confidence));

    let mut result: Vec<Detection> = Vec::new();
    for candidate in boxes {
        if result.len() >= settings.max_detections {
            break;
        }
        let suppressed = result.iter().any(|kept| {
            kept.class_index == candidate.class_index
                && iou(&kept.bbox, &candidate.bbox) > settings.iou_threshold
        });
        if !suppressed {
            result.push(candidate);
        }
    }

    Ok(result)
}

#[derive(Clone)]
pub struct OrtModelService {
    sessions: Arc<Vec<Arc<Mutex<Session>>>>,
    counter: Arc<AtomicUsize>,
    input_size: u32,
    output_name: String,
    settings: DecodeSettings,
}

impl OrtModelService {
    pub fn new(model_config: &ModelConfig) -> Result<Self, DetectorError> {
        model_config
            .validate()
            .map_err(DetectorError::ModelUnavailable)?;

        let num_instances = model_config.num_instances.max(1);
        let sessions = (0..num_instances)
            .map(|_| {
                let session = Session::builder()?
                    .with_optimization_level(GraphOptimizationLevel::Level3)?
                    .commit_from_file(model_config.get_path())?;
                Ok(Arc::new(Mutex::new(session)))
            })
            .collect::<Result<Vec<_>, ort::Error>>()?;

        tracing::info!("Created {} ONNX sessions", num_instances);

        Ok(Self {
            sessions: Arc::new(sessions),
            counter: Arc::new(AtomicUsize::new(0)),
            input_size: model_config.input_size,
            output_name: model_config.output_name.clone(),
            settings: DecodeSettings::from(model_config),
        })
    }

    fn run_inference(
        &self,
        input: &Array<f32, Ix4>,
    ) -> Result<ndarray::ArrayD<f32>, DetectorError> {
        let index = self.counter.fetch_add(1, Ordering::SeqCst) % self.sessions.len();
        let mut session = self.sessions[index]
            .lock()
            .map_err(|e| DetectorError::Inference(format!("session mutex poisoned: {}", e)))?;

        tracing::debug!("Handling request with session {}", index);
        let tensor_ref = TensorRef::from_array_view(input.view())?;
        let outputs = session.run(ort::inputs![tensor_ref])?;

        let (shape, data) = outputs[self.output_name.as_str()].try_extract_tensor::<f32>()?;
        let array = ndarray::ArrayD::from_shape_vec(shape.to_ixdyn(), data.to_vec())
            .map_err(|e| DetectorError::InvalidOutput(format!("invalid tensor shape: {}", e)))?;

        Ok(array)
    }

    fn infer(&self, image: &RgbImage) -> Result<Vec<Detection>, DetectorError> {
        let input = transform_image(image, self.input_size);
        let output = self
            .run_inference(&input)?
            .into_dimensionality::<Ix3>()
            .map_err(|e| DetectorError::InvalidOutput(format!("expected [1, N, C]: {}", e)))?;

        decode_predictions(output.slice(s![0, .., ..]), &self.settings)
    }
}

#[async_trait]
impl Detector for OrtModelService {
    async fn detect(&self, image: RgbImage) -> Result<Vec<Detection>, DetectorError> {
        let service = self.clone();
        let detections = tokio::task::spawn_blocking(move || service.infer(&image))
            .await
            .map_err(|e| DetectorError::Inference(format!("inference task failed: {}", e)))??;

        tracing::debug!("Detected {} boxes", detections.len());
        Ok(detections)
    }
}
