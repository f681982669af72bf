use crate::{
    config::{ModelConfig, Validatable},
    model_service::ModelService,
};
use detection_proto::Detection;
use image::{imageops::FilterType, GenericImageView};
use ndarray::{s, Array, ArrayViewD, Axis, Ix2, Ix4};
use ort::{
    session::{builder::GraphOptimizationLevel, Session},
    value::TensorRef,
};
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc, Mutex,
};
use tonic::{async_trait, Status};

const INPUT_SIZE: u32 = 640;

fn intersection(box1: &Detection, box2: &Detection) -> f32 {
    let width = (box1.x2.min(box2.x2) - box1.x1.max(box2.x1)).max(0.);
    let height = (box1.y2.min(box2.y2) - box1.y1.max(box2.y1)).max(0.);
    width * height
}

fn area(bbox: &Detection) -> f32 {
    (bbox.x2 - bbox.x1) * (bbox.y2 - bbox.y1)
}

fn iou(box1: &Detection, box2: &Detection) -> f32 {
    let inter = intersection(box1, box2);
    let union = area(box1) + area(box2) - inter;
    if union <= 0. {
        return 0.;
    }
    inter / union
}

/// Decodes and resizes an encoded image into a normalized NCHW tensor.
/// Returns the tensor with the original height and width.
fn transform_image(image_data: &[u8]) -> Result<(Array<f32, Ix4>, u32, u32), String> {
    let image_reader = image::ImageReader::new(std::io::Cursor::new(image_data))
        .with_guessed_format()
        .map_err(|e| format!("Error decoding image: {}", e))?;

    let original_img = image_reader
        .decode()
        .map_err(|e| format!("Error decoding image: {}", e))?;

    let (img_width, img_height) = original_img.dimensions();
    let img = original_img.resize_exact(INPUT_SIZE, INPUT_SIZE, FilterType::CatmullRom);

    let size = INPUT_SIZE as usize;
    let mut input = Array::zeros((1, 3, size, size));
    for pixel in img.pixels() {
        let x = pixel.0 as usize;
        let y = pixel.1 as usize;
        let [r, g, b, _] = pixel.2 .0;
        input[[0, 0, y, x]] = (r as f32) / 255.;
        input[[0, 1, y, x]] = (g as f32) / 255.;
        input[[0, 2, y, x]] = (b as f32) / 255.;
    }

    Ok((input, img_height, img_width))
}

/// Turns a YOLOv8 `output0` tensor of shape `[1, 4 + classes, anchors]` into
/// detections in the original image's pixel space, highest confidence first.
pub(crate) fn decode_output(
    output: ArrayViewD<'_, f32>,
    img_width: u32,
    img_height: u32,
    min_probability: f32,
    iou_threshold: f32,
) -> Result<Vec<Detection>, String> {
    let shape = output.shape();
    if shape.len() != 3 || shape[0] != 1 || shape[1] < 5 {
        return Err(format!("unexpected output shape {:?}", shape));
    }

    let scale_x = img_width as f32 / INPUT_SIZE as f32;
    let scale_y = img_height as f32 / INPUT_SIZE as f32;
    let (max_x, max_y) = (img_width as f32, img_height as f32);

    let mut boxes = Vec::new();
    let output = output.t();
    let rows = output
        .slice(s![.., .., 0])
        .into_dimensionality::<Ix2>()
        .map_err(|e| format!("unexpected output layout: {}", e))?;

    for row in rows.axis_iter(Axis(0)) {
        let Some((class_id, prob)) = row
            .iter()
            .skip(4)
            .copied()
            .enumerate()
            .reduce(|accum, item| if item.1 > accum.1 { item } else { accum })
        else {
            continue;
        };

        if prob.is_nan() || prob < min_probability {
            continue;
        }

        let xc = row[0] * scale_x;
        let yc = row[1] * scale_y;
        let w = row[2] * scale_x;
        let h = row[3] * scale_y;

        let (xa, xb) = (xc - w / 2., xc + w / 2.);
        let (ya, yb) = (yc - h / 2., yc + h / 2.);

        boxes.push(Detection {
            class_id: class_id as i32,
            class_name: String::new(),
            confidence: prob.clamp(0., 1.),
            x1: xa.min(xb).clamp(0., max_x),
            y1: ya.min(yb).clamp(0., max_y),
            x2: xa.max(xb).clamp(0., max_x),
            y2: ya.max(yb).clamp(0., max_y),
        });
    }

    boxes.sort_by(|box1, box2| box2.confidence.total_cmp(&box1.confidence));

    let mut result = Vec::new();
    while let Some(best) = boxes.first().cloned() {
        boxes.retain(|other| iou(&best, other) < iou_threshold);
        // A zero-area box has no overlap with itself.
        if boxes.first() == Some(&best) {
            boxes.remove(0);
        }
        result.push(best);
    }

    Ok(result)
}

#[derive(Clone)]
pub struct OrtModelService {
    sessions: Arc<Vec<Arc<Mutex<Session>>>>,
    counter: Arc<AtomicUsize>,
    min_probability: f32,
    iou_threshold: f32,
}

impl OrtModelService {
    pub fn new(model_config: &ModelConfig) -> Result<Self, Box<dyn std::error::Error>> {
        let num_instances = model_config.num_instances.max(1);
        let sessions = (0..num_instances)
            .map(|_| {
                let session = Session::builder()?
                    .with_optimization_level(GraphOptimizationLevel::Level3)?
                    .commit_from_file(model_config.get_path())?;
                Ok(Arc::new(Mutex::new(session)))
            })
            .collect::<Result<Vec<_>, ort::Error>>()?;

        tracing::info!(
            model = %model_config.get_path().display(),
            "Created {} ONNX sessions",
            num_instances
        );

        Ok(Self {
            counter: Arc::new(AtomicUsize::new(0)),
            sessions: Arc::new(sessions),
            min_probability: model_config.min_probability,
            iou_threshold: model_config.iou_threshold,
        })
    }

    fn run_inference(&self, input: &Array<f32, Ix4>) -> Result<ndarray::ArrayD<f32>, Status> {
        let index = self.counter.fetch_add(1, Ordering::SeqCst) % self.sessions.len();
        let mut session = self.sessions[index]
            .lock()
            .map_err(|e| Status::internal(format!("session mutex poisoned: {}", e)))?;

        tracing::debug!("Handling request with session {}", index);
        let owned_buffer;
        let input_view = if input.view().is_standard_layout() {
            input.view()
        } else {
            owned_buffer = input.as_standard_layout().to_owned();
            owned_buffer.view()
        };

        let tensor_ref = TensorRef::from_array_view(input_view)
            .map_err(|e| Status::internal(format!("failed to build tensor: {}", e)))?;

        let outputs = session
            .run(ort::inputs![tensor_ref])
            .map_err(|e| Status::internal(format!("inference failed: {}", e)))?;

        let array = outputs["output0"]
            .try_extract_array::<f32>()
            .map_err(|e| Status::internal(format!("failed to extract tensor: {}", e)))?
            .to_owned();

        Ok(array)
    }

    fn predict_blocking(&self, image_data: &[u8]) -> Result<Vec<Detection>, Status> {
        let (input, img_height, img_width) = transform_image(image_data)
            .map_err(|err| Status::invalid_argument(format!("Image transformation error: {}", err)))?;

        let outputs = self.run_inference(&input)?;

        decode_output(
            outputs.view(),
            img_width,
            img_height,
            self.min_probability,
            self.iou_threshold,
        )
        .map_err(Status::internal)
    }
}

#[async_trait]
impl ModelService for OrtModelService {
    async fn predict(&self, image_data: &[u8]) -> Result<Vec<Detection>, Status> {
        let service = self.clone();
        let image_data = image_data.to_vec();
        tokio::task::spawn_blocking(move || service.predict_blocking(&image_data))
            .await
            .map_err(|e| Status::internal(format!("inference task failed: {}", e)))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageBuffer, Rgb};
    use ndarray::Array3;
    use std::io::Cursor;

    /// Builds a `[1, 4 + classes, anchors]` tensor from per-anchor rows.
    fn output_tensor(rows: &[[f32; 7]]) -> ndarray::ArrayD<f32> {
        let mut output = Array3::<f32>::zeros((1, 7, rows.len()));
        for (anchor, row) in rows.iter().enumerate() {
            for (channel, value) in row.iter().enumerate() {
                output[[0, channel, anchor]] = *value;
            }
        }
        output.into_dyn()
    }

    #[test]
    fn test_transform_image() {
        let img = ImageBuffer::<Rgb<u8>, Vec<u8>>::from_pixel(100, 80, Rgb([255, 0, 0]));
        let mut image_data: Vec<u8> = Vec::new();
        img.write_to(&mut Cursor::new(&mut image_data), image::ImageFormat::Png)
            .unwrap();

        let (input, img_height, img_width) = transform_image(&image_data).unwrap();

        assert_eq!(input.shape(), &[1, 3, 640, 640]);
        assert_eq!(img_width, 100);
        assert_eq!(img_height, 80);
        assert!(input[[0, 0, 320, 320]] > 0.99);
        assert!(input[[0, 1, 320, 320]] < 0.01);
    }

    #[test]
    fn test_transform_rejects_garbage() {
        assert!(transform_image(&[0u8; 64]).is_err());
    }

    #[test]
    fn test_decode_scales_and_thresholds() {
        let output = output_tensor(&[
            // xc, yc, w, h, class0, class1, class2
            [320., 320., 64., 64., 0.1, 0.9, 0.2],
            [100., 100., 20., 20., 0.1, 0.1, 0.2],
        ]);

        let detections = decode_output(output.view(), 1280, 320, 0.25, 0.7).unwrap();

        assert_eq!(detections.len(), 1);
        let d = &detections[0];
        assert_eq!(d.class_id, 1);
        assert_eq!(d.confidence, 0.9);
        assert_eq!((d.x1, d.x2), (576., 704.));
        assert_eq!((d.y1, d.y2), (144., 176.));
    }

    #[test]
    fn test_decode_suppresses_overlapping_boxes() {
        let output = output_tensor(&[
            [320., 320., 100., 100., 0.8, 0.0, 0.0],
            [322., 322., 100., 100., 0.9, 0.0, 0.0],
            [50., 50., 40., 40., 0.0, 0.0, 0.6],
        ]);

        let detections = decode_output(output.view(), 640, 640, 0.25, 0.7).unwrap();

        assert_eq!(detections.len(), 2);
        assert_eq!(detections[0].confidence, 0.9);
        assert_eq!(detections[1].class_id, 2);
    }

    #[test]
    fn test_decode_clamps_to_image_bounds() {
        let output = output_tensor(&[[10., 630., 60., 40., 1.5, 0.0, 0.0]]);

        let detections = decode_output(output.view(), 640, 640, 0.25, 0.7).unwrap();

        assert_eq!(detections.len(), 1);
        let d = &detections[0];
        assert_eq!(d.confidence, 1.0);
        assert_eq!(d.x1, 0.);
        assert_eq!(d.y2, 640.);
        assert!(d.x1 <= d.x2 && d.y1 <= d.y2);
    }

    #[test]
    fn test_decode_is_deterministic() {
        let output = output_tensor(&[
            [100., 100., 50., 50., 0.5, 0.0, 0.0],
            [400., 400., 50., 50., 0.5, 0.0, 0.0],
        ]);

        let first = decode_output(output.view(), 640, 640, 0.25, 0.7).unwrap();
        let second = decode_output(output.view(), 640, 640, 0.25, 0.7).unwrap();

        assert_eq!(first, second);
        assert_eq!(first[0].x1, 75.);
    }

    #[test]
    fn test_decode_rejects_unexpected_shape() {
        let output = ndarray::ArrayD::<f32>::zeros(ndarray::IxDyn(&[1, 3]));
        assert!(decode_output(output.view(), 640, 640, 0.25, 0.7).is_err());
    }
}
