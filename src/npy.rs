//! Minimal NPY reader / writer for codec token matrices.
//!
//! Supports the subset of the NumPy array format the pipeline exchanges:
//!   - NPY format version 1.0 and 2.0
//!   - integer dtypes `i2 i4 i8 u2 u4`, plus `f4` holding integral values
//!   - little- and big-endian, C-contiguous (row-major) layout
//!
//! Values are widened to `i64`.  Written files are always v1.0 `<i8`.

use anyhow::{bail, Context, Result};
use std::path::Path;

const MAGIC: &[u8] = b"\x93NUMPY";

/// A loaded array: shape + flat row-major values.
#[derive(Debug, Clone, PartialEq)]
pub struct NpyArray {
    pub shape: Vec<usize>,
    pub data: Vec<i64>,
}

impl NpyArray {
    /// Number of rows (first dimension).
    pub fn nrows(&self) -> usize {
        self.shape.first().copied().unwrap_or(0)
    }

    /// Number of columns (second dimension).
    pub fn ncols(&self) -> usize {
        self.shape.get(1).copied().unwrap_or(1)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Dtype {
    I16,
    I32,
    I64,
    U16,
    U32,
    F32,
}

impl Dtype {
    /// Parse a `descr` string such as `<i8` into (dtype, big_endian).
    fn parse(descr: &str) -> Result<(Self, bool)> {
        let mut chars = descr.chars();
        let big_endian = match chars.next() {
            Some('<' | '=' | '|') => false,
            Some('>') => true,
            _ => bail!("Unsupported dtype '{}'", descr),
        };
        let dtype = match chars.as_str() {
            "i2" => Self::I16,
            "i4" => Self::I32,
            "i8" => Self::I64,
            "u2" => Self::U16,
            "u4" => Self::U32,
            "f4" => Self::F32,
            _ => bail!("Unsupported dtype '{}', expected an integer or float32 array", descr),
        };
        Ok((dtype, big_endian))
    }

    fn size(self) -> usize {
        match self {
            Self::I16 | Self::U16 => 2,
            Self::I32 | Self::U32 | Self::F32 => 4,
            Self::I64 => 8,
        }
    }

    fn decode(self, b: &[u8], big_endian: bool) -> Result<i64> {
        macro_rules! read {
            ($t:ty, $n:literal) => {{
                let mut arr = [0u8; $n];
                arr.copy_from_slice(b);
                if big_endian { <$t>::from_be_bytes(arr) } else { <$t>::from_le_bytes(arr) }
            }};
        }
        Ok(match self {
            Self::I16 => read!(i16, 2) as i64,
            Self::I32 => read!(i32, 4) as i64,
            Self::I64 => read!(i64, 8),
            Self::U16 => read!(u16, 2) as i64,
            Self::U32 => read!(u32, 4) as i64,
            Self::F32 => {
                let v = read!(f32, 4);
                if v.fract() != 0.0 || !v.is_finite() {
                    bail!("float32 array holds non-integral value {}", v);
                }
                v as i64
            }
        })
    }
}

/// Parse a raw `.npy` byte buffer.
pub fn parse_npy(data: &[u8]) -> Result<NpyArray> {
    if data.len() < 10 || &data[..6] != MAGIC {
        bail!("Not a valid NPY file (bad magic)");
    }

    let (major, minor) = (data[6], data[7]);

    // Header length: 2 bytes (v1) or 4 bytes (v2), little-endian.
    let (header_len, header_start) = match major {
        1 => (u16::from_le_bytes([data[8], data[9]]) as usize, 10),
        2 => {
            if data.len() < 12 {
                bail!("NPY v2 file too short");
            }
            (u32::from_le_bytes([data[8], data[9], data[10], data[11]]) as usize, 12)
        }
        _ => bail!("Unsupported NPY version {}.{}", major, minor),
    };

    let header_end = header_start + header_len;
    if data.len() < header_end {
        bail!("NPY file truncated in header");
    }
    let header = std::str::from_utf8(&data[header_start..header_end])
        .context("NPY header is not valid UTF-8")?;

    let descr = extract_header_field(header, "descr").context("NPY header missing 'descr'")?;
    let (dtype, big_endian) = Dtype::parse(descr.trim())?;

    let fortran = extract_header_field(header, "fortran_order")
        .unwrap_or("False")
        .trim()
        .to_ascii_lowercase();
    if fortran == "true" {
        bail!("Fortran-order arrays are not supported");
    }

    let shape_str = extract_header_field(header, "shape").context("NPY header missing 'shape'")?;
    let shape = parse_shape(shape_str.trim())?;

    let n_bytes = element_count(&shape)
        .and_then(|n| n.checked_mul(dtype.size()))
        .with_context(|| format!("NPY shape {:?} overflows", shape))?;
    let body = &data[header_end..];
    if body.len() < n_bytes {
        bail!("NPY data section too short: expected {} bytes, got {}", n_bytes, body.len());
    }

    let values = body[..n_bytes]
        .chunks_exact(dtype.size())
        .map(|b| dtype.decode(b, big_endian))
        .collect::<Result<Vec<i64>>>()?;

    Ok(NpyArray { shape, data: values })
}

/// Product of the dimensions, `None` on overflow.
pub(crate) fn element_count(shape: &[usize]) -> Option<usize> {
    shape.iter().try_fold(1usize, |acc, &d| acc.checked_mul(d))
}

/// Extract the value of a field from a Python-literal dict header string.
///
/// e.g. `extract_header_field("{'descr': '<i8', 'shape': (3,)}", "descr")`
/// returns `Some("<i8")`.
fn extract_header_field<'a>(header: &'a str, field: &str) -> Option<&'a str> {
    let key_sq = format!("'{}':", field);
    let key_dq = format!("\"{}\":", field);

    let start = header
        .find(key_sq.as_str())
        .map(|p| p + key_sq.len())
        .or_else(|| header.find(key_dq.as_str()).map(|p| p + key_dq.len()))?;

    let rest = header[start..].trim_start();

    if rest.starts_with('(') {
        let end = rest.find(')')?;
        Some(&rest[..end + 1])
    } else if rest.starts_with('\'') || rest.starts_with('"') {
        let quote = rest.chars().next()?;
        let inner = &rest[1..];
        let end = inner.find(quote)?;
        Some(&inner[..end])
    } else {
        let end = rest.find([',', '}']).unwrap_or(rest.len());
        Some(rest[..end].trim())
    }
}

/// Parse a Python-style shape tuple like `(256, 8, )` or `(100,)` or `()`.
fn parse_shape(s: &str) -> Result<Vec<usize>> {
    let inner = s.trim_start_matches('(').trim_end_matches(')');
    inner
        .split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(|t| t.parse::<usize>().with_context(|| format!("Bad shape dim: '{}'", t)))
        .collect()
}

/// Load an `.npy` file from disk.
pub fn load_npy(path: &Path) -> Result<NpyArray> {
    let bytes =
        std::fs::read(path).with_context(|| format!("Cannot read NPY file: {}", path.display()))?;
    parse_npy(&bytes).with_context(|| format!("Failed to parse NPY file: {}", path.display()))
}

/// Serialise `data` with `shape` as a v1.0 `<i8` NPY buffer.
pub fn encode_npy(shape: &[usize], data: &[i64]) -> Result<Vec<u8>> {
    let n = element_count(shape).with_context(|| format!("NPY shape {:?} overflows", shape))?;
    if n != data.len() {
        bail!("NPY shape {:?} needs {} values, got {}", shape, n, data.len());
    }

    let dims = match shape {
        [d] => format!("{},", d),
        _ => shape.iter().map(|d| d.to_string()).collect::<Vec<_>>().join(", "),
    };
    let mut header = format!("{{'descr': '<i8', 'fortran_order': False, 'shape': ({}), }}", dims);
    // Preamble + header + '\n' is padded with spaces to a multiple of 64 bytes.
    let unpadded = MAGIC.len() + 4 + header.len() + 1;
    header.extend(std::iter::repeat(' ').take((64 - unpadded % 64) % 64));
    header.push('\n');

    let header_len = u16::try_from(header.len()).context("NPY header too long")?;
    let mut buf = Vec::with_capacity(MAGIC.len() + 4 + header.len() + data.len() * 8);
    buf.extend_from_slice(MAGIC);
    buf.extend_from_slice(&[1, 0]);
    buf.extend_from_slice(&header_len.to_le_bytes());
    buf.extend_from_slice(header.as_bytes());
    for v in data {
        buf.extend_from_slice(&v.to_le_bytes());
    }
    Ok(buf)
}
