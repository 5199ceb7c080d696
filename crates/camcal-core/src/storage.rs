//! OpenCV `FileStorage` YAML codec for calibration results.
//!
//! Layout written (key order is fixed):
//! ```text
//! %YAML:1.0
//! ---
//! intrinsic: !!opencv-matrix
//!    rows: 3
//!    cols: 3
//!    dt: d
//!    data: [ 1200.0, 0.0, 640.0, 0.0, 1200.0, 480.0, 0.0, 0.0, 1.0 ]
//! distCoeffs: !!opencv-matrix
//!    rows: 1
//!    cols: 5
//!    dt: d
//!    data: [ 0.1, -0.2, 0.001, 0.001, 0.0 ]
//! rms: 0.3
//! ```
//! Floats use the shortest representation that parses back to the same
//! bits, so a write/read cycle is exact.
//!
//! Reading goes through `yaml_rust`. OpenCV's `%YAML:1.0` header is not a
//! valid YAML directive and is turned into a comment first.

use crate::{DistortionCoefficients, GeometryError, IntrinsicMatrix};
use std::borrow::Cow;
use std::fmt::Write as _;
use yaml_rust::{Yaml, YamlLoader};

pub const KEY_INTRINSIC: &str = "intrinsic";
pub const KEY_DIST_COEFFS: &str = "distCoeffs";
pub const KEY_RMS: &str = "rms";

const MATRIX_TAG: &str = "!!opencv-matrix";

#[derive(thiserror::Error, Debug)]
pub enum SerializationError {
    #[error("missing key `{0}`")]
    MissingKey(&'static str),

    #[error("line {line}: {reason}")]
    Malformed { line: usize, reason: String },

    #[error(transparent)]
    Yaml(#[from] yaml_rust::ScanError),

    #[error("`{key}`: {reason}")]
    InvalidValue { key: &'static str, reason: String },

    #[error("`{key}` has shape {rows}x{cols}, expected {expected}")]
    Shape {
        key: &'static str,
        rows: usize,
        cols: usize,
        expected: &'static str,
    },

    #[error("`{key}` declares {declared} elements but lists {got}")]
    DataLength {
        key: String,
        declared: usize,
        got: usize,
    },

    #[error("unsupported matrix element type `{0}`")]
    UnsupportedType(String),

    #[error("intrinsic matrix is not a zero-skew pinhole matrix")]
    InvalidIntrinsics,

    #[error("non-finite value in `{0}`")]
    NonFinite(&'static str),

    #[error(transparent)]
    Geometry(#[from] GeometryError),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

/// The three persisted quantities of a calibration.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct StoredCalibration {
    pub intrinsics: IntrinsicMatrix,
    pub distortion: DistortionCoefficients,
    pub rms: f64,
}

impl StoredCalibration {
    pub fn to_opencv_yaml(&self) -> String {
        let k = self.intrinsics.to_rows();
        let flat_k = [
            k[0][0], k[0][1], k[0][2], k[1][0], k[1][1], k[1][2], k[2][0], k[2][1], k[2][2],
        ];

        let mut out = String::from("%YAML:1.0\n---\n");
        write_matrix(&mut out, KEY_INTRINSIC, 3, 3, &flat_k);
        write_matrix(&mut out, KEY_DIST_COEFFS, 1, 5, &self.distortion.to_array());
        let _ = writeln!(out, "{KEY_RMS}: {}", fmt_f64(self.rms));
        out
    }

    pub fn from_opencv_yaml(text: &str) -> Result<Self, SerializationError> {
        let root = load_document(text)?;

        let k = read_matrix(&root, KEY_INTRINSIC)?;
        if k.rows != 3 || k.cols != 3 {
            return Err(SerializationError::Shape {
                key: KEY_INTRINSIC,
                rows: k.rows,
                cols: k.cols,
                expected: "3x3",
            });
        }
        let d = &k.data;
        let intrinsics = IntrinsicMatrix::from_rows([
            [d[0], d[1], d[2]],
            [d[3], d[4], d[5]],
            [d[6], d[7], d[8]],
        ])
        .ok_or(SerializationError::InvalidIntrinsics)?;
        if !intrinsics.is_finite() {
            return Err(SerializationError::NonFinite(KEY_INTRINSIC));
        }

        let dist = read_matrix(&root, KEY_DIST_COEFFS)?;
        if dist.rows * dist.cols != 5 || dist.rows.min(dist.cols) != 1 {
            return Err(SerializationError::Shape {
                key: KEY_DIST_COEFFS,
                rows: dist.rows,
                cols: dist.cols,
                expected: "1x5",
            });
        }
        let distortion = DistortionCoefficients::from_array([
            dist.data[0],
            dist.data[1],
            dist.data[2],
            dist.data[3],
            dist.data[4],
        ]);
        if !distortion.is_finite() {
            return Err(SerializationError::NonFinite(KEY_DIST_COEFFS));
        }

        let rms = read_real(&root, KEY_RMS)?;
        if !rms.is_finite() {
            return Err(SerializationError::NonFinite(KEY_RMS));
        }

        Ok(Self {
            intrinsics,
            distortion,
            rms,
        })
    }
}

fn fmt_f64(v: f64) -> String {
    format!("{v:?}")
}

fn write_matrix(out: &mut String, key: &str, rows: usize, cols: usize, data: &[f64]) {
    let values = data.iter().map(|v| fmt_f64(*v)).collect::<Vec<_>>();
    let _ = writeln!(out, "{key}: {MATRIX_TAG}");
    let _ = writeln!(out, "   rows: {rows}");
    let _ = writeln!(out, "   cols: {cols}");
    let _ = writeln!(out, "   dt: d");
    let _ = writeln!(out, "   data: [ {} ]", values.join(", "));
}

struct Matrix {
    rows: usize,
    cols: usize,
    data: Vec<f64>,
}

fn invalid(key: &'static str, reason: impl Into<String>) -> SerializationError {
    SerializationError::InvalidValue {
        key,
        reason: reason.into(),
    }
}

/// The single top-level mapping of an OpenCV storage file.
fn load_document(text: &str) -> Result<Yaml, SerializationError> {
    let text = match text.strip_prefix('%') {
        Some(rest) if rest.starts_with("YAML:") => Cow::Owned(format!("#{rest}")),
        _ => Cow::Borrowed(text),
    };
    let docs = YamlLoader::load_from_str(&text)?;
    match docs.into_iter().next() {
        Some(root @ Yaml::Hash(_)) => Ok(root),
        None => Err(SerializationError::MissingKey(KEY_INTRINSIC)),
        Some(_) => Err(SerializationError::Malformed {
            line: 1,
            reason: "top level must be a mapping".to_owned(),
        }),
    }
}

/// Integers and reals both read as `f64`; OpenCV writes `0.` for zero.
fn as_real(node: &Yaml) -> Option<f64> {
    match node {
        Yaml::Real(_) => node.as_f64(),
        Yaml::Integer(i) => Some(*i as f64),
        _ => None,
    }
}

fn lookup<'y>(root: &'y Yaml, key: &'static str) -> Result<&'y Yaml, SerializationError> {
    let node = &root[key];
    if node.is_badvalue() {
        return Err(SerializationError::MissingKey(key));
    }
    Ok(node)
}

fn read_real(root: &Yaml, key: &'static str) -> Result<f64, SerializationError> {
    let node = lookup(root, key)?;
    as_real(node).ok_or_else(|| invalid(key, format!("expected a number, got {node:?}")))
}

fn read_matrix(root: &Yaml, key: &'static str) -> Result<Matrix, SerializationError> {
    let node = lookup(root, key)?;
    if node.as_hash().is_none() {
        return Err(invalid(key, "expected an opencv-matrix"));
    }

    let count = |field: &str| {
        node[field]
            .as_i64()
            .and_then(|v| usize::try_from(v).ok())
            .ok_or_else(|| invalid(key, format!("`{field}` must be a non-negative integer")))
    };
    let rows = count("rows")?;
    let cols = count("cols")?;

    match node["dt"].as_str() {
        Some("d") | Some("f") => {}
        Some(other) => return Err(SerializationError::UnsupportedType(other.to_owned())),
        None => return Err(invalid(key, "missing `dt`")),
    }

    let data = node["data"]
        .as_vec()
        .ok_or_else(|| invalid(key, "`data` must be a list"))?
        .iter()
        .enumerate()
        .map(|(i, v)| {
            as_real(v).ok_or_else(|| invalid(key, format!("element {i} is not a number")))
        })
        .collect::<Result<Vec<_>, _>>()?;
    if data.len() != rows * cols {
        return Err(SerializationError::DataLength {
            key: key.to_owned(),
            declared: rows * cols,
            got: data.len(),
        });
    }
    Ok(Matrix { rows, cols, data })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> StoredCalibration {
        StoredCalibration {
            intrinsics: IntrinsicMatrix::new(1200.0, 1200.0, 640.0, 480.0),
            distortion: DistortionCoefficients::from_array([0.1, -0.2, 0.001, 0.001, 0.0]),
            rms: 0.3,
        }
    }

    #[test]
    fn writes_keys_in_stable_order() {
        let text = sample().to_opencv_yaml();
        let i = text.find("intrinsic:").expect("intrinsic");
        let d = text.find("distCoeffs:").expect("distCoeffs");
        let r = text.find("rms:").expect("rms");
        assert!(text.starts_with("%YAML:1.0\n---\n"));
        assert!(i < d && d < r);
        assert!(text.contains("data: [ 0.1, -0.2, 0.001, 0.001, 0.0 ]"));
    }

    #[test]
    fn round_trip_is_exact() {
        let stored = sample();
        let back = StoredCalibration::from_opencv_yaml(&stored.to_opencv_yaml()).expect("parse");
        assert_eq!(back, stored);

        let awkward = StoredCalibration {
            intrinsics: IntrinsicMatrix::new(1234.567891234567, 1233.1, 639.91, 481.0000001),
            distortion: DistortionCoefficients::from_array([
                -0.123456789012345,
                1e-17,
                -3.3e-5,
                2.0e-4,
                0.05,
            ]),
            rms: 0.1 + 0.2,
        };
        let back = StoredCalibration::from_opencv_yaml(&awkward.to_opencv_yaml()).expect("parse");
        assert_eq!(back, awkward);
    }

    #[test]
    fn reads_opencv_written_files() {
        let text = concat!(
            "%YAML:1.0\n",
            "---\n",
            "intrinsic: !!opencv-matrix\n",
            "   rows: 3\n",
            "   cols: 3\n",
            "   dt: d\n",
            "   data: [ 1234.56, 0., 640., 0.,\n",
            "       1234.56, 480., 0., 0., 1. ]\n",
            "distCoeffs: !!opencv-matrix\n",
            "   rows: 1\n",
            "   cols: 5\n",
            "   dt: d\n",
            "   data: [ 0.1, -0.2, 1.0000000000000000e-03, 0.001, 0.05 ]\n",
            "rms: 0.42\n",
        );
        let parsed = StoredCalibration::from_opencv_yaml(text).expect("parse");
        assert_eq!(parsed.intrinsics.fx, 1234.56);
        assert_eq!(parsed.intrinsics.cy, 480.0);
        assert_eq!(parsed.distortion.p1, 0.001);
        assert_eq!(parsed.distortion.k3, 0.05);
        assert_eq!(parsed.rms, 0.42);
    }

    #[test]
    fn missing_and_malformed_inputs_are_rejected() {
        let text = sample().to_opencv_yaml();

        let no_rms: String = text
            .lines()
            .filter(|l| !l.starts_with("rms"))
            .collect::<Vec<_>>()
            .join("\n");
        assert!(matches!(
            StoredCalibration::from_opencv_yaml(&no_rms),
            Err(SerializationError::MissingKey("rms"))
        ));

        let short = text.replace("0.001, 0.001, 0.0 ]", "0.001 ]");
        assert!(matches!(
            StoredCalibration::from_opencv_yaml(&short),
            Err(SerializationError::DataLength { .. })
        ));

        let skewed = text.replace("[ 1200.0, 0.0,", "[ 1200.0, 2.0,");
        assert!(matches!(
            StoredCalibration::from_opencv_yaml(&skewed),
            Err(SerializationError::InvalidIntrinsics)
        ));

        let bad_number = text.replace("rms: 0.3", "rms: zero");
        assert!(matches!(
            StoredCalibration::from_opencv_yaml(&bad_number),
            Err(SerializationError::InvalidValue { key: "rms", .. })
        ));

        let float_type = text.replace("dt: d", "dt: u");
        assert!(matches!(
            StoredCalibration::from_opencv_yaml(&float_type),
            Err(SerializationError::UnsupportedType(t)) if t == "u"
        ));

        let unclosed = text.replace("0.001, 0.001, 0.0 ]", "0.001, 0.001, 0.0");
        assert!(matches!(
            StoredCalibration::from_opencv_yaml(&unclosed),
            Err(SerializationError::Yaml(_))
        ));

        assert!(matches!(
            StoredCalibration::from_opencv_yaml(""),
            Err(SerializationError::MissingKey("intrinsic"))
        ));
    }

    #[test]
    fn integer_elements_and_plain_header_are_accepted() {
        let text = concat!(
            "---\n",
            "intrinsic: !!opencv-matrix\n",
            "  rows: 3\n",
            "  cols: 3\n",
            "  dt: d\n",
            "  data: [ 800, 0, 320, 0, 800, 240, 0, 0, 1 ]\n",
            "distCoeffs: !!opencv-matrix\n",
            "  rows: 5\n",
            "  cols: 1\n",
            "  dt: f\n",
            "  data: [ 0, 0, 0, 0, 0 ]\n",
            "rms: 1\n",
        );
        let parsed = StoredCalibration::from_opencv_yaml(text).expect("parse");
        assert_eq!(parsed.intrinsics, IntrinsicMatrix::new(800.0, 800.0, 320.0, 240.0));
        assert_eq!(parsed.distortion, DistortionCoefficients::zero());
        assert_eq!(parsed.rms, 1.0);
    }
}
