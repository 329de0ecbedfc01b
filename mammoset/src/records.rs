//! Reading and decoding the serialized training record files.
//!
//! Records are framed the TFRecord way: a little-endian `u64` payload
//! length, a masked CRC32 of the length bytes, the payload, then a masked
//! CRC32 of the payload. Each payload is an `Example` protobuf message
//! holding the fixed schema this project uses: `label` (int64),
//! `label_normal` (int64) and `image` (raw u8 bytes, 299x299x1).

use std::{
    collections::HashMap,
    fs::File,
    io::{BufReader, BufWriter, Read, Write},
    path::{Path, PathBuf},
};

use crc32fast::Hasher;
use ndarray::{s, Array3};
use prost::Message;
use rand::{rngs::StdRng, Rng, SeedableRng};

use crate::error::Error;

pub const IMAGE_HEIGHT: usize = 299;
pub const IMAGE_WIDTH: usize = 299;
pub const IMAGE_CHANNELS: usize = 1;

const IMAGE_BYTES: usize = IMAGE_HEIGHT * IMAGE_WIDTH * IMAGE_CHANNELS;

#[derive(Clone, PartialEq, Message)]
pub struct BytesList {
    #[prost(bytes = "vec", repeated, tag = "1")]
    pub value: Vec<Vec<u8>>,
}

#[derive(Clone, PartialEq, Message)]
pub struct FloatList {
    #[prost(float, repeated, tag = "1")]
    pub value: Vec<f32>,
}

#[derive(Clone, PartialEq, Message)]
pub struct Int64List {
    #[prost(int64, repeated, tag = "1")]
    pub value: Vec<i64>,
}

#[derive(Clone, PartialEq, Message)]
pub struct Feature {
    #[prost(oneof = "feature::Kind", tags = "1, 2, 3")]
    pub kind: Option<feature::Kind>,
}

pub mod feature {
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Kind {
        #[prost(message, tag = "1")]
        BytesList(super::BytesList),
        #[prost(message, tag = "2")]
        FloatList(super::FloatList),
        #[prost(message, tag = "3")]
        Int64List(super::Int64List),
    }
}

#[derive(Clone, PartialEq, Message)]
pub struct Features {
    #[prost(map = "string, message", tag = "1")]
    pub feature: HashMap<String, Feature>,
}

#[derive(Clone, PartialEq, Message)]
pub struct Example {
    #[prost(message, optional, tag = "1")]
    pub features: Option<Features>,
}

/// Build an `Example` with the fixed schema of this project.
pub fn new_example(label: i64, label_normal: i64, image: &[u8]) -> Example {
    let mut feature = HashMap::new();
    feature.insert(
        "label".to_string(),
        Feature {
            kind: Some(feature::Kind::Int64List(Int64List { value: vec![label] })),
        },
    );
    feature.insert(
        "label_normal".to_string(),
        Feature {
            kind: Some(feature::Kind::Int64List(Int64List {
                value: vec![label_normal],
            })),
        },
    );
    feature.insert(
        "image".to_string(),
        Feature {
            kind: Some(feature::Kind::BytesList(BytesList {
                value: vec![image.to_vec()],
            })),
        },
    );
    Example {
        features: Some(Features { feature }),
    }
}

// TFRecord-style CRC masking, so a CRC stored inside CRC'd data does not
// collide with itself.
fn masked_crc(bytes: &[u8]) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(bytes);
    let crc = hasher.finalize();
    ((crc >> 15) | (crc << 17)).wrapping_add(0xa282_ead8)
}

/// Streaming reader over one or more record files. Yields raw payloads in
/// file order; files are opened lazily as the previous one is exhausted.
pub struct RecordReader {
    files: std::vec::IntoIter<PathBuf>,
    current: Option<BufReader<File>>,
    validate_crc: bool,
}

impl RecordReader {
    pub fn open(paths: impl IntoIterator<Item = impl Into<PathBuf>>) -> Self {
        Self {
            files: paths
                .into_iter()
                .map(Into::into)
                .collect::<Vec<_>>()
                .into_iter(),
            current: None,
            validate_crc: true,
        }
    }

    pub fn validate_crc(mut self, validate: bool) -> Self {
        self.validate_crc = validate;
        self
    }

    /// Decode every payload into `(image, label)` pairs with `decoder`.
    pub fn examples(self, decoder: ExampleDecoder) -> ExampleIter {
        ExampleIter {
            reader: self,
            decoder,
        }
    }

    fn next_payload(&mut self) -> Result<Option<Vec<u8>>, Error> {
        loop {
            if self.current.is_none() {
                match self.files.next() {
                    Some(path) => {
                        log::debug!("Reading records from {}", path.display());
                        self.current = Some(BufReader::new(File::open(&path)?));
                    }
                    None => return Ok(None),
                }
            }
            let Some(reader) = self.current.as_mut() else {
                continue;
            };

            let mut len_bytes = [0u8; 8];
            match reader.read_exact(&mut len_bytes) {
                Ok(()) => {}
                Err(err) if err.kind() == std::io::ErrorKind::UnexpectedEof => {
                    // End of this file; move on to the next one.
                    self.current = None;
                    continue;
                }
                Err(err) => return Err(err.into()),
            }

            let mut len_crc = [0u8; 4];
            reader.read_exact(&mut len_crc)?;
            if self.validate_crc && u32::from_le_bytes(len_crc) != masked_crc(&len_bytes) {
                return Err(Error::RecordCorrupt("length checksum mismatch"));
            }

            let len = u64::from_le_bytes(len_bytes) as usize;
            let mut payload = vec![0u8; len];
            reader.read_exact(&mut payload)?;

            let mut payload_crc = [0u8; 4];
            reader.read_exact(&mut payload_crc)?;
            if self.validate_crc && u32::from_le_bytes(payload_crc) != masked_crc(&payload) {
                return Err(Error::RecordCorrupt("payload checksum mismatch"));
            }

            return Ok(Some(payload));
        }
    }
}

impl Iterator for RecordReader {
    type Item = Result<Vec<u8>, Error>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_payload().transpose()
    }
}

/// Writer producing record files the [`RecordReader`] can consume. Used by
/// the dataset-preparation tooling and by tests.
pub struct RecordWriter<W: Write> {
    inner: W,
}

impl RecordWriter<BufWriter<File>> {
    pub fn create(path: &Path) -> Result<Self, Error> {
        Ok(Self::new(BufWriter::new(File::create(path)?)))
    }
}

impl<W: Write> RecordWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner }
    }

    pub fn write_record(&mut self, payload: &[u8]) -> Result<(), Error> {
        let len_bytes = (payload.len() as u64).to_le_bytes();
        self.inner.write_all(&len_bytes)?;
        self.inner.write_all(&masked_crc(&len_bytes).to_le_bytes())?;
        self.inner.write_all(payload)?;
        self.inner.write_all(&masked_crc(payload).to_le_bytes())?;
        Ok(())
    }

    pub fn write_example(&mut self, example: &Example) -> Result<(), Error> {
        self.write_record(&example.encode_to_vec())
    }

    pub fn flush(&mut self) -> Result<(), Error> {
        self.inner.flush()?;
        Ok(())
    }
}

/// Which int64 feature of a record is used as the label.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LabelField {
    /// The raw five-class code under the `label` key.
    Label,
    /// The binary code under the `label_normal` key.
    Normal,
}

impl LabelField {
    fn key(self) -> &'static str {
        match self {
            Self::Label => "label",
            Self::Normal => "label_normal",
        }
    }
}

/// Decodes a single serialized example into an image and a label, with
/// optional random left-right / up-down flips.
pub struct ExampleDecoder {
    label_field: LabelField,
    distort: bool,
    rng: StdRng,
}

impl ExampleDecoder {
    pub fn new(label_field: LabelField) -> Self {
        Self {
            label_field,
            distort: false,
            rng: StdRng::from_entropy(),
        }
    }

    pub fn distort(mut self, distort: bool) -> Self {
        self.distort = distort;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    pub fn decode(&mut self, payload: &[u8]) -> Result<(Array3<u8>, i64), Error> {
        let example = Example::decode(payload)?;
        let features = example
            .features
            .ok_or(Error::RecordCorrupt("example has no features"))?
            .feature;

        let key = self.label_field.key();
        let label = match features.get(key).and_then(|f| f.kind.as_ref()) {
            Some(feature::Kind::Int64List(list)) => *list
                .value
                .first()
                .ok_or_else(|| Error::MissingFeature(key.to_string()))?,
            _ => return Err(Error::MissingFeature(key.to_string())),
        };

        let blob = match features.get("image").and_then(|f| f.kind.as_ref()) {
            Some(feature::Kind::BytesList(list)) => list
                .value
                .first()
                .ok_or_else(|| Error::MissingFeature("image".to_string()))?,
            _ => return Err(Error::MissingFeature("image".to_string())),
        };
        if blob.len() != IMAGE_BYTES {
            return Err(Error::ImageSize {
                got: blob.len(),
                want: IMAGE_BYTES,
            });
        }

        let mut image = Array3::from_shape_vec(
            (IMAGE_HEIGHT, IMAGE_WIDTH, IMAGE_CHANNELS),
            blob.clone(),
        )?;

        if self.distort {
            if self.rng.gen_bool(0.5) {
                image = image.slice(s![.., ..;-1, ..]).to_owned();
            }
            if self.rng.gen_bool(0.5) {
                image = image.slice(s![..;-1, .., ..]).to_owned();
            }
        }

        Ok((image, label))
    }
}

/// Iterator adapter pairing a [`RecordReader`] with an [`ExampleDecoder`].
pub struct ExampleIter {
    reader: RecordReader,
    decoder: ExampleDecoder,
}

impl Iterator for ExampleIter {
    type Item = Result<(Array3<u8>, i64), Error>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.reader.next()? {
            Ok(payload) => Some(self.decoder.decode(&payload)),
            Err(err) => Some(Err(err)),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;

    fn temp_dir(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("mammoset-{}-{}", tag, std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn gradient_image(start: u8) -> Vec<u8> {
        (0..IMAGE_BYTES)
            .map(|i| start.wrapping_add((i % 251) as u8))
            .collect()
    }

    fn write_records(path: &Path, examples: &[Example]) {
        let mut writer = RecordWriter::create(path).unwrap();
        for example in examples {
            writer.write_example(example).unwrap();
        }
        writer.flush().unwrap();
    }

    #[test]
    fn round_trips_examples_across_files() {
        let dir = temp_dir("records");
        let first = dir.join("training0_0.tfrecords");
        let second = dir.join("training0_1.tfrecords");
        write_records(
            &first,
            &[
                new_example(3, 1, &gradient_image(0)),
                new_example(0, 0, &gradient_image(10)),
            ],
        );
        write_records(&second, &[new_example(4, 1, &gradient_image(20))]);

        let decoder = ExampleDecoder::new(LabelField::Label);
        let decoded: Vec<_> = RecordReader::open([&first, &second])
            .examples(decoder)
            .collect::<Result<_, _>>()
            .unwrap();

        assert_eq!(decoded.len(), 3);
        let labels: Vec<i64> = decoded.iter().map(|(_, label)| *label).collect();
        assert_eq!(labels, vec![3, 0, 4]);
        assert_eq!(
            decoded[0].0.shape(),
            &[IMAGE_HEIGHT, IMAGE_WIDTH, IMAGE_CHANNELS]
        );
        assert_eq!(decoded[0].0[[0, 1, 0]], 1);
    }

    #[test]
    fn label_field_selects_the_normal_encoding() {
        let payload = new_example(4, 1, &gradient_image(0)).encode_to_vec();
        let (_, label) = ExampleDecoder::new(LabelField::Normal)
            .decode(&payload)
            .unwrap();
        assert_eq!(label, 1);
        let (_, label) = ExampleDecoder::new(LabelField::Label)
            .decode(&payload)
            .unwrap();
        assert_eq!(label, 4);
    }

    #[test]
    fn corrupt_payload_fails_the_checksum() {
        let dir = temp_dir("records-corrupt");
        let path = dir.join("bad.tfrecords");
        write_records(&path, &[new_example(1, 1, &gradient_image(0))]);

        // Flip one payload byte past the header.
        let mut bytes = fs::read(&path).unwrap();
        bytes[20] ^= 0xff;
        fs::write(&path, &bytes).unwrap();

        let err = RecordReader::open([&path]).next().unwrap().unwrap_err();
        assert!(matches!(err, Error::RecordCorrupt(_)));
    }

    #[test]
    fn undersized_image_blob_is_rejected() {
        let payload = new_example(1, 1, &[0u8; 16]).encode_to_vec();
        let err = ExampleDecoder::new(LabelField::Label)
            .decode(&payload)
            .unwrap_err();
        assert!(matches!(err, Error::ImageSize { got: 16, .. }));
    }

    #[test]
    fn missing_label_feature_is_reported_by_name() {
        let mut example = new_example(1, 1, &gradient_image(0));
        example
            .features
            .as_mut()
            .unwrap()
            .feature
            .remove("label_normal");
        let err = ExampleDecoder::new(LabelField::Normal)
            .decode(&example.encode_to_vec())
            .unwrap_err();
        assert!(matches!(err, Error::MissingFeature(name) if name == "label_normal"));
    }

    #[test]
    fn distorted_decode_yields_a_flip_of_the_original() {
        let payload = new_example(2, 1, &gradient_image(5)).encode_to_vec();
        let (original, _) = ExampleDecoder::new(LabelField::Label)
            .decode(&payload)
            .unwrap();
        let (distorted, _) = ExampleDecoder::new(LabelField::Label)
            .distort(true)
            .with_seed(42)
            .decode(&payload)
            .unwrap();

        let lr = original.slice(s![.., ..;-1, ..]).to_owned();
        let ud = original.slice(s![..;-1, .., ..]).to_owned();
        let both = lr.slice(s![..;-1, .., ..]).to_owned();
        assert!(
            distorted == original || distorted == lr || distorted == ud || distorted == both
        );
    }
}
