use crate::{
    codec::{CodecError, ImageCodec},
    detection::{ClassTable, Detection},
    envelope::ResultEnvelope,
};
use base64::{engine::general_purpose::STANDARD, Engine};
use image::RgbImage;
use std::{borrow::Borrow, collections::HashSet};
use thiserror::Error;

/// The detector reported a class the class table does not know about.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("class index {class_index} is outside the class table (len {table_len})")]
pub struct IndexMappingError {
    pub class_index: usize,
    pub table_len: usize,
}

#[derive(Error, Debug)]
pub enum NormalizeError {
    #[error(transparent)]
    IndexMapping(#[from] IndexMappingError),
    #[error(transparent)]
    Encode(#[from] CodecError),
}

/// Unique labels in first-detection order.
pub fn unique_labels<I, D>(
    detections: I,
    class_table: &ClassTable,
) -> Result<Vec<String>, IndexMappingError>
where
    I: IntoIterator<Item = D>,
    D: Borrow<Detection>,
{
    let mut emitted = HashSet::new();
    let mut labels = Vec::new();

    for detection in detections {
        let detection: &Detection = detection.borrow();
        let class_index = detection.class_index;
        let label = class_table.get(class_index).ok_or(IndexMappingError {
            class_index,
            table_len: class_table.len(),
        })?;
        if emitted.insert(label) {
            labels.push(label.to_string());
        }
    }

    Ok(labels)
}

/// Builds the result envelope for one analyzed image.
///
/// Detections are taken in the order the detector produced them; the first
/// occurrence of each label wins. Labels are resolved before the image is
/// encoded, so an unknown class index fails without doing any encoding work.
pub fn normalize<I, D, C>(
    image: &RgbImage,
    detections: I,
    class_table: &ClassTable,
    codec: &C,
) -> Result<ResultEnvelope, NormalizeError>
where
    I: IntoIterator<Item = D>,
    D: Borrow<Detection>,
    C: ImageCodec + ?Sized,
{
    let labels = unique_labels(detections, class_table)?;
    let encoded = STANDARD.encode(codec.encode(image)?);

    Ok(ResultEnvelope::new(encoded, labels))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{codec::JpegCodec, envelope::NO_OBJECT_LABEL};
    use image::Rgb;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn detections(class_indices: &[usize]) -> Vec<Detection> {
        class_indices
            .iter()
            .enumerate()
            .map(|(i, &class_index)| {
                let offset = i as f32 * 10.0;
                Detection::new(class_index, 0.9, [offset, offset, offset + 5.0, offset + 5.0])
            })
            .collect()
    }

    fn test_image() -> RgbImage {
        RgbImage::from_pixel(16, 16, Rgb([40, 160, 60]))
    }

    struct CountingCodec {
        calls: AtomicUsize,
    }

    impl ImageCodec for CountingCodec {
        fn encode(&self, _image: &RgbImage) -> Result<Vec<u8>, CodecError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(vec![1, 2, 3])
        }
    }

    #[test]
    fn test_labels_keep_first_occurrence_order() {
        let table = ClassTable::plants();
        let envelope = normalize(
            &test_image(),
            detections(&[3, 1, 3, 7, 1]),
            &table,
            &JpegCodec::default(),
        )
        .unwrap();

        assert_eq!(envelope.labels, vec!["Pachira", "Fan-Palms", "creeping fig"]);
        assert_eq!(envelope.label, "Pachira");
    }

    #[test]
    fn test_no_detections_yields_sentinel() {
        let empty: Vec<Detection> = Vec::new();
        let envelope = normalize(
            &test_image(),
            empty,
            &ClassTable::plants(),
            &JpegCodec::default(),
        )
        .unwrap();

        assert_eq!(envelope.label, NO_OBJECT_LABEL);
        assert!(envelope.labels.is_empty());
        assert!(!envelope.image.is_empty());
    }

    #[test]
    fn test_repeated_class_collapses_to_one_label() {
        let envelope = normalize(
            &test_image(),
            &detections(&[5, 5, 5]),
            &ClassTable::plants(),
            &JpegCodec::default(),
        )
        .unwrap();

        assert_eq!(envelope.labels, vec!["caladium"]);
    }

    #[test]
    fn test_lazily_produced_detections() {
        let lazy = [3, 1, 3]
            .iter()
            .map(|&class_index| Detection::new(class_index, 0.9, [0.; 4]));
        let envelope = normalize(
            &test_image(),
            lazy,
            &ClassTable::plants(),
            &JpegCodec::default(),
        )
        .unwrap();

        assert_eq!(envelope.labels, vec!["Pachira", "Fan-Palms"]);
    }

    #[test]
    fn test_dedup_is_by_label_text() {
        let table = ClassTable::new(["croton", "geranium", "croton"]);
        let labels = unique_labels(&detections(&[2, 1, 0]), &table).unwrap();

        assert_eq!(labels, vec!["croton", "geranium"]);
    }

    #[test]
    fn test_out_of_range_index_fails_without_encoding() {
        let codec = CountingCodec {
            calls: AtomicUsize::new(0),
        };
        let table = ClassTable::plants();
        let err = normalize(&test_image(), detections(&[2, 14, 1]), &table, &codec).unwrap_err();

        match err {
            NormalizeError::IndexMapping(e) => {
                assert_eq!(
                    e,
                    IndexMappingError {
                        class_index: 14,
                        table_len: 14
                    }
                );
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(codec.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_image_field_is_base64_of_codec_output() {
        let codec = CountingCodec {
            calls: AtomicUsize::new(0),
        };
        let envelope =
            normalize(&test_image(), detections(&[0]), &ClassTable::plants(), &codec).unwrap();

        assert_eq!(envelope.image, "AQID");
        assert_eq!(codec.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_identical_inputs_give_identical_envelopes() {
        let table = ClassTable::plants();
        let codec = JpegCodec::default();
        let image = RgbImage::from_fn(48, 48, |x, y| Rgb([(x * 5) as u8, (y * 5) as u8, 90]));
        let input = detections(&[9, 4, 9, 12]);

        let first = normalize(&image, &input, &table, &codec).unwrap();
        let second = normalize(&image, &input, &table, &codec).unwrap();

        assert_eq!(first, second);
        assert_eq!(
            serde_json::to_vec(&first).unwrap(),
            serde_json::to_vec(&second).unwrap()
        );
    }

    #[test]
    fn test_concurrent_calls_do_not_interfere() {
        let table = ClassTable::plants();
        let codec = JpegCodec::default();

        std::thread::scope(|scope| {
            let handles: Vec<_> = (0..32usize)
                .map(|i| {
                    let table = &table;
                    let codec = &codec;
                    scope.spawn(move || {
                        let first = i % 14;
                        let second = (i + 5) % 14;
                        let image = RgbImage::from_pixel(8, 8, Rgb([i as u8, 0, 0]));
                        let input = detections(&[first, second, first, second]);
                        let envelope = normalize(&image, &input, table, codec).unwrap();
                        (i, envelope)
                    })
                })
                .collect();

            for handle in handles {
                let (i, envelope) = handle.join().unwrap();
                let first = table.get(i % 14).unwrap();
                let second = table.get((i + 5) % 14).unwrap();
                assert_eq!(envelope.labels, vec![first, second]);
                assert_eq!(envelope.label, first);

                let image = RgbImage::from_pixel(8, 8, Rgb([i as u8, 0, 0]));
                let expected = STANDARD.encode(codec.encode(&image).unwrap());
                assert_eq!(envelope.image, expected);
            }
        });
    }
}
