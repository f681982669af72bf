//! Frame sources: lazy, finite, strictly ordered sequences of frames.

use crate::frame::{Frame, SequenceCounter};
use bytes::Bytes;
use std::cmp::Ordering;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[cfg(feature = "video")]
pub use video::VideoFileSource;

#[derive(Error, Debug)]
pub enum SourceError {
    #[error("Failed to open frame source {path}: {reason}")]
    Open { path: PathBuf, reason: String },
    #[error("Failed to read frame {sequence}: {reason}")]
    Read { sequence: u64, reason: String },
    #[error("Failed to decode frame {sequence}: {reason}")]
    Decode { sequence: u64, reason: String },
}

pub trait FrameSource: Send {
    /// Returns the next frame, or `None` once the stream is exhausted.
    fn next_frame(&mut self) -> Result<Option<Frame>, SourceError>;
}

/// Every image file in a directory, in natural file name order
/// (`frame_2.png` before `frame_10.png`).
pub struct ImageSequenceSource {
    files: std::vec::IntoIter<PathBuf>,
    counter: SequenceCounter,
}

impl ImageSequenceSource {
    pub fn open(dir: &Path) -> Result<Self, SourceError> {
        let open_err = |reason: String| SourceError::Open {
            path: dir.to_path_buf(),
            reason,
        };

        let mut files = Vec::new();
        for entry in std::fs::read_dir(dir).map_err(|e| open_err(e.to_string()))? {
            let entry = entry.map_err(|e| open_err(e.to_string()))?;
            let path = entry.path();
            let hidden = path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with('.'));
            if path.is_file() && !hidden {
                files.push(path);
            }
        }
        files.sort_by(|a, b| natural_cmp(&file_name(a), &file_name(b)));

        tracing::info!(path = %dir.display(), frames = files.len(), "opened image sequence");
        Ok(Self {
            files: files.into_iter(),
            counter: SequenceCounter::new(),
        })
    }
}

fn file_name(path: &Path) -> std::borrow::Cow<'_, str> {
    path.file_name()
        .map(|n| n.to_string_lossy())
        .unwrap_or_default()
}

/// Compares names chunk by chunk, treating runs of ASCII digits as numbers.
fn natural_cmp(a: &str, b: &str) -> Ordering {
    let (mut a, mut b) = (a, b);
    loop {
        match (a.chars().next(), b.chars().next()) {
            (None, None) => return Ordering::Equal,
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(ca), Some(cb)) if ca.is_ascii_digit() && cb.is_ascii_digit() => {
                let (num_a, rest_a) = split_digits(a);
                let (num_b, rest_b) = split_digits(b);
                let (trim_a, trim_b) = (num_a.trim_start_matches('0'), num_b.trim_start_matches('0'));
                let ord = trim_a
                    .len()
                    .cmp(&trim_b.len())
                    .then_with(|| trim_a.cmp(trim_b))
                    .then_with(|| num_a.len().cmp(&num_b.len()));
                if ord != Ordering::Equal {
                    return ord;
                }
                (a, b) = (rest_a, rest_b);
            }
            (Some(ca), Some(cb)) => {
                if ca != cb {
                    return ca.cmp(&cb);
                }
                (a, b) = (&a[ca.len_utf8()..], &b[cb.len_utf8()..]);
            }
        }
    }
}

fn split_digits(s: &str) -> (&str, &str) {
    let end = s.find(|c: char| !c.is_ascii_digit()).unwrap_or(s.len());
    s.split_at(end)
}

impl FrameSource for ImageSequenceSource {
    fn next_frame(&mut self) -> Result<Option<Frame>, SourceError> {
        let Some(path) = self.files.next() else {
            return Ok(None);
        };
        let sequence = self.counter.emitted() + 1;

        let data = std::fs::read(&path).map_err(|e| SourceError::Read {
            sequence,
            reason: format!("{}: {}", path.display(), e),
        })?;
        image::guess_format(&data).map_err(|e| SourceError::Decode {
            sequence,
            reason: format!("{}: {}", path.display(), e),
        })?;

        Ok(Some(self.counter.frame(Bytes::from(data))))
    }
}

#[cfg(feature = "video")]
mod video {
    use super::{FrameSource, SourceError};
    use crate::frame::{Frame, SequenceCounter};
    use bytes::Bytes;
    use opencv::{core::Mat, core::Vector, imgcodecs, prelude::*, videoio};
    use std::path::Path;

    /// Frames of a video file, JPEG encoded.
    pub struct VideoFileSource {
        capture: videoio::VideoCapture,
        counter: SequenceCounter,
    }

    impl VideoFileSource {
        pub fn open(path: &Path) -> Result<Self, SourceError> {
            let open_err = |reason: String| SourceError::Open {
                path: path.to_path_buf(),
                reason,
            };
            let capture = videoio::VideoCapture::from_file(&path.to_string_lossy(), videoio::CAP_ANY)
                .map_err(|e| open_err(e.to_string()))?;
            if !capture.is_opened().map_err(|e| open_err(e.to_string()))? {
                return Err(open_err("capture could not be opened".to_string()));
            }

            tracing::info!(path = %path.display(), "opened video file");
            Ok(Self {
                capture,
                counter: SequenceCounter::new(),
            })
        }
    }

    impl FrameSource for VideoFileSource {
        fn next_frame(&mut self) -> Result<Option<Frame>, SourceError> {
            let sequence = self.counter.emitted() + 1;
            let mut mat = Mat::default();
            let grabbed = self
                .capture
                .read(&mut mat)
                .map_err(|e| SourceError::Read {
                    sequence,
                    reason: e.to_string(),
                })?;
            if !grabbed || mat.empty() {
                return Ok(None);
            }

            let mut buf = Vector::<u8>::new();
            imgcodecs::imencode(".jpg", &mat, &mut buf, &Vector::new()).map_err(|e| {
                SourceError::Decode {
                    sequence,
                    reason: e.to_string(),
                }
            })?;

            Ok(Some(self.counter.frame(Bytes::from(buf.to_vec()))))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageBuffer, Rgb};

    fn write_png(dir: &Path, name: &str) {
        let img = ImageBuffer::<Rgb<u8>, Vec<u8>>::from_pixel(8, 8, Rgb([0, 128, 255]));
        img.save(dir.join(name)).unwrap();
    }

    #[test]
    fn test_sequence_numbers_start_at_one_without_gaps() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["c.png", "a.png", "b.png", "d.png"] {
            write_png(dir.path(), name);
        }

        let mut source = ImageSequenceSource::open(dir.path()).unwrap();
        let mut sequences = Vec::new();
        while let Some(frame) = source.next_frame().unwrap() {
            sequences.push(frame.sequence);
        }

        assert_eq!(sequences, vec![1, 2, 3, 4]);
        assert!(source.next_frame().unwrap().is_none());
    }

    #[test]
    fn test_frames_follow_file_name_order() {
        let dir = tempfile::tempdir().unwrap();
        write_png(dir.path(), "frame_b.png");
        std::fs::write(dir.path().join("frame_a.jpg"), [0xFF, 0xD8, 0xFF, 0xE0]).unwrap();

        let mut source = ImageSequenceSource::open(dir.path()).unwrap();
        let first = source.next_frame().unwrap().unwrap();

        assert_eq!(first.sequence, 1);
        assert_eq!(&first.data[..4], &[0xFF, 0xD8, 0xFF, 0xE0]);
    }

    #[test]
    fn test_numbered_names_sort_numerically() {
        let dir = tempfile::tempdir().unwrap();
        for (i, name) in ["frame_10.png", "frame_2.png", "frame_1.png"].iter().enumerate() {
            let img = ImageBuffer::<Rgb<u8>, Vec<u8>>::from_pixel(8, 8, Rgb([i as u8, 0, 0]));
            img.save(dir.path().join(name)).unwrap();
        }

        let mut source = ImageSequenceSource::open(dir.path()).unwrap();
        let mut order = Vec::new();
        while let Some(frame) = source.next_frame().unwrap() {
            let img = image::load_from_memory(&frame.data).unwrap().to_rgb8();
            order.push(img.get_pixel(0, 0).0[0]);
        }

        // frame_1 was written third, frame_2 second, frame_10 first.
        assert_eq!(order, vec![2, 1, 0]);
    }

    #[test]
    fn test_natural_cmp() {
        assert_eq!(natural_cmp("frame_2.png", "frame_10.png"), Ordering::Less);
        assert_eq!(natural_cmp("frame_0010.png", "frame_0009.png"), Ordering::Greater);
        assert_eq!(natural_cmp("a.png", "b.png"), Ordering::Less);
        assert_eq!(natural_cmp("img7b", "img7a"), Ordering::Greater);
        assert_eq!(natural_cmp("x01", "x1"), Ordering::Greater);
        assert_eq!(natural_cmp("same", "same"), Ordering::Equal);
    }

    #[test]
    fn test_unrecognised_file_is_a_decode_error() {
        let dir = tempfile::tempdir().unwrap();
        write_png(dir.path(), "0001.png");
        std::fs::write(dir.path().join("0002.txt"), b"not an image").unwrap();

        let mut source = ImageSequenceSource::open(dir.path()).unwrap();
        assert!(source.next_frame().unwrap().is_some());
        assert!(matches!(
            source.next_frame(),
            Err(SourceError::Decode { sequence: 2, .. })
        ));
    }

    #[test]
    fn test_missing_directory_fails_to_open() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope");

        assert!(matches!(
            ImageSequenceSource::open(&missing),
            Err(SourceError::Open { .. })
        ));
    }
}
