//! The slice algebra: a compact textual form for addressing sub-regions
//! of N-dimensional arrays.
//!
//! The grammar accepts integer indices (including negative),
//! `start:stop:step` with any part omitted, the literal `mean` or
//! `mean(N)` in the step position to request server-side downsampling,
//! `...` expansion against the array rank, and comma-separated
//! multi-dimensional tuples.
//!
//! Inputs containing any character outside `[-0-9,:.mean()]` are rejected
//! before any further parsing. This is the whole defense against
//! expression smuggling, so it runs first and unconditionally.

use serde::{Deserialize, Serialize};

const ALLOWED_CHARS: &str = "-0123456789,:.mean()";

/// The step position of a slice: a stride, or a request for server-side
/// mean aggregation (optionally with a bin size).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Step {
    Stride(i64),
    Mean(Option<u64>),
}

/// One parsed dimension of a slice expression.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SliceDim {
    Index(i64),
    Slice {
        start: Option<i64>,
        stop: Option<i64>,
        step: Option<Step>,
    },
    Ellipsis,
}

impl SliceDim {
    fn full() -> Self {
        SliceDim::Slice {
            start: None,
            stop: None,
            step: None,
        }
    }
}

/// Errors parsing or resolving a slice expression.
#[derive(Debug, Clone, PartialEq)]
pub enum SliceError {
    ForbiddenCharacter(char),
    Malformed(String),
    MultipleEllipsis,
    TooManyAxes { given: usize, rank: usize },
    ZeroStep,
    IndexOutOfRange { index: i64, axis: usize, dim: u64 },
    MeanWithNegativeStride,
}

impl std::fmt::Display for SliceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SliceError::ForbiddenCharacter(c) => {
                write!(f, "slice contains forbidden character {c:?}")
            }
            SliceError::Malformed(segment) => write!(f, "malformed slice segment: {segment:?}"),
            SliceError::MultipleEllipsis => write!(f, "slice may contain at most one '...'"),
            SliceError::TooManyAxes { given, rank } => {
                write!(f, "slice addresses {given} axes; array has rank {rank}")
            }
            SliceError::ZeroStep => write!(f, "slice step cannot be zero"),
            SliceError::IndexOutOfRange { index, axis, dim } => {
                write!(f, "index {index} is out of range on axis {axis} (size {dim})")
            }
            SliceError::MeanWithNegativeStride => {
                write!(f, "mean aggregation cannot be combined with a negative stride")
            }
        }
    }
}

impl std::error::Error for SliceError {}

/// One axis of a slice after resolution against a concrete shape.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResolvedAxis {
    /// A single integer index; this axis is dropped from the output.
    Pick(u64),
    /// A strided range. `start` may exceed the axis bounds only when
    /// `len == 0`; `step` may be negative.
    Strided { start: i64, step: i64, len: u64 },
    /// Contiguous range aggregated in bins of `bin` elements.
    Mean { start: u64, len: u64, bin: u64 },
}

impl ResolvedAxis {
    /// The length this axis contributes to the output shape, or `None`
    /// if the axis is dropped.
    pub fn output_len(&self) -> Option<u64> {
        match self {
            ResolvedAxis::Pick(_) => None,
            ResolvedAxis::Strided { len, .. } => Some(*len),
            ResolvedAxis::Mean { len, bin, .. } => {
                if *len == 0 {
                    Some(0)
                } else {
                    Some(len.div_ceil(*bin))
                }
            }
        }
    }
}

/// A parsed multi-dimensional slice expression.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct NdSlice(pub Vec<SliceDim>);

impl NdSlice {
    /// The slice selecting everything.
    pub fn all() -> Self {
        NdSlice(Vec::new())
    }

    pub fn is_all(&self) -> bool {
        self.0.is_empty()
    }

    /// Parse the compact textual form.
    pub fn parse(text: &str) -> Result<Self, SliceError> {
        if let Some(c) = text.chars().find(|c| !ALLOWED_CHARS.contains(*c)) {
            return Err(SliceError::ForbiddenCharacter(c));
        }
        let mut dims = Vec::new();
        for segment in text.split(',') {
            if segment.is_empty() {
                continue;
            }
            dims.push(parse_dim(segment)?);
        }
        if dims.iter().filter(|d| **d == SliceDim::Ellipsis).count() > 1 {
            return Err(SliceError::MultipleEllipsis);
        }
        Ok(NdSlice(dims))
    }

    /// Resolve against a concrete shape: expand the ellipsis, pad missing
    /// trailing axes with full ranges, normalize negative indices, and
    /// clamp ranges (Python slicing semantics).
    pub fn resolve(&self, shape: &[u64]) -> Result<Vec<ResolvedAxis>, SliceError> {
        let explicit = self.0.iter().filter(|d| **d != SliceDim::Ellipsis).count();
        if explicit > shape.len() {
            return Err(SliceError::TooManyAxes {
                given: explicit,
                rank: shape.len(),
            });
        }
        let mut expanded = Vec::with_capacity(shape.len());
        let mut saw_ellipsis = false;
        for dim in &self.0 {
            if *dim == SliceDim::Ellipsis {
                saw_ellipsis = true;
                for _ in 0..(shape.len() - explicit) {
                    expanded.push(SliceDim::full());
                }
            } else {
                expanded.push(*dim);
            }
        }
        // Without an ellipsis, unstated trailing axes are taken whole.
        if !saw_ellipsis {
            while expanded.len() < shape.len() {
                expanded.push(SliceDim::full());
            }
        }

        let mut resolved = Vec::with_capacity(shape.len());
        for (axis, (dim, &len)) in expanded.iter().zip(shape).enumerate() {
            resolved.push(resolve_dim(dim, axis, len)?);
        }
        Ok(resolved)
    }

    /// The shape of the payload this slice selects from `shape`.
    pub fn output_shape(&self, shape: &[u64]) -> Result<Vec<u64>, SliceError> {
        Ok(self
            .resolve(shape)?
            .iter()
            .filter_map(ResolvedAxis::output_len)
            .collect())
    }
}

impl std::str::FromStr for NdSlice {
    type Err = SliceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        NdSlice::parse(s)
    }
}

fn parse_dim(segment: &str) -> Result<SliceDim, SliceError> {
    if segment == "..." {
        return Ok(SliceDim::Ellipsis);
    }
    if segment.contains('.') {
        return Err(SliceError::Malformed(segment.to_string()));
    }
    if !segment.contains(':') {
        let index = parse_int(segment)?;
        return Ok(SliceDim::Index(index));
    }
    let parts: Vec<&str> = segment.split(':').collect();
    if parts.len() > 3 {
        return Err(SliceError::Malformed(segment.to_string()));
    }
    let start = parse_opt_int(parts[0])?;
    let stop = parse_opt_int(parts.get(1).copied().unwrap_or(""))?;
    let step = match parts.get(2).copied().unwrap_or("") {
        "" => None,
        "mean" => Some(Step::Mean(None)),
        text if text.starts_with("mean(") && text.ends_with(')') => {
            let inner = &text["mean(".len()..text.len() - 1];
            let bin: u64 = inner
                .parse()
                .map_err(|_| SliceError::Malformed(segment.to_string()))?;
            if bin == 0 {
                return Err(SliceError::ZeroStep);
            }
            Some(Step::Mean(Some(bin)))
        }
        text => Some(Step::Stride(parse_int(text)?)),
    };
    Ok(SliceDim::Slice { start, stop, step })
}

fn parse_int(text: &str) -> Result<i64, SliceError> {
    text.parse()
        .map_err(|_| SliceError::Malformed(text.to_string()))
}

fn parse_opt_int(text: &str) -> Result<Option<i64>, SliceError> {
    if text.is_empty() {
        Ok(None)
    } else {
        parse_int(text).map(Some)
    }
}

fn resolve_dim(dim: &SliceDim, axis: usize, len: u64) -> Result<ResolvedAxis, SliceError> {
    let ilen = len as i64;
    match *dim {
        SliceDim::Ellipsis => unreachable!("ellipsis expanded before resolution"),
        SliceDim::Index(index) => {
            let normalized = if index < 0 { index + ilen } else { index };
            if normalized < 0 || normalized >= ilen {
                return Err(SliceError::IndexOutOfRange {
                    index,
                    axis,
                    dim: len,
                });
            }
            Ok(ResolvedAxis::Pick(normalized as u64))
        }
        SliceDim::Slice { start, stop, step } => match step {
            None | Some(Step::Stride(_)) => {
                let stride = match step {
                    Some(Step::Stride(0)) => return Err(SliceError::ZeroStep),
                    Some(Step::Stride(s)) => s,
                    _ => 1,
                };
                let (start, out_len) = clamp_range(start, stop, stride, ilen);
                Ok(ResolvedAxis::Strided {
                    start,
                    step: stride,
                    len: out_len,
                })
            }
            Some(Step::Mean(bin)) => {
                let (start, out_len) = clamp_range(start, stop, 1, ilen);
                if out_len == 0 {
                    return Ok(ResolvedAxis::Mean {
                        start: 0,
                        len: 0,
                        bin: bin.unwrap_or(1),
                    });
                }
                // `mean` with no parameter aggregates the whole range.
                let bin = bin.unwrap_or(out_len);
                Ok(ResolvedAxis::Mean {
                    start: start as u64,
                    len: out_len,
                    bin,
                })
            }
        },
    }
}

/// Python `slice.indices` semantics: normalize negative bounds, apply
/// defaults per stride sign, clamp, and compute the output length.
fn clamp_range(start: Option<i64>, stop: Option<i64>, step: i64, len: i64) -> (i64, u64) {
    let (lower, upper) = if step > 0 { (0, len) } else { (-1, len - 1) };
    let normalize = |bound: i64| {
        let b = if bound < 0 { bound + len } else { bound };
        b.clamp(lower, upper)
    };
    let start = match start {
        Some(s) => normalize(s),
        None => {
            if step > 0 {
                0
            } else {
                len - 1
            }
        }
    };
    let stop = match stop {
        Some(s) => normalize(s),
        None => {
            if step > 0 {
                len
            } else {
                -1
            }
        }
    };
    // Truncating division matches floor division here: for a non-empty
    // range, dividend and step share a sign; empty ranges clamp to 0.
    let out_len = if step > 0 {
        ((stop - start) + step - 1) / step
    } else {
        ((stop - start) + step + 1) / step
    }
    .max(0);
    (start, out_len as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_plain_forms() {
        for text in [
            "", ":", "::", "0", "0:", "0::", ":0", "-1", "-5:", ":-5", "3:5", "5:3", "123::4",
            ":123:4", ",", ",,", ",:", ":,::", "0,1,2", "5:,:10,::-5", "1:2:3,4:5:6,7:8:9",
        ] {
            assert!(NdSlice::parse(text).is_ok(), "should accept {text:?}");
        }
    }

    #[test]
    fn rejects_typos() {
        for text in [":::", "1:2:3:4", "1:2,3:4:5:6"] {
            assert!(NdSlice::parse(text).is_err(), "should reject {text:?}");
        }
    }

    #[test]
    fn rejects_forbidden_characters_without_parsing() {
        for text in [
            "1:(2+3)",
            "1**2",
            "print('x')",
            "; import sys; sys.exit()",
            "touch /tmp/x",
            "rm -rf /tmp/*",
            "1 : 2",
        ] {
            match NdSlice::parse(text) {
                Err(SliceError::ForbiddenCharacter(_)) => {}
                other => panic!("expected ForbiddenCharacter for {text:?}, got {other:?}"),
            }
        }
    }

    #[test]
    fn mean_forms() {
        let parsed = NdSlice::parse("0:100:mean").unwrap();
        assert_eq!(
            parsed.0[0],
            SliceDim::Slice {
                start: Some(0),
                stop: Some(100),
                step: Some(Step::Mean(None)),
            }
        );
        let parsed = NdSlice::parse("::mean(10)").unwrap();
        assert_eq!(
            parsed.0[0],
            SliceDim::Slice {
                start: None,
                stop: None,
                step: Some(Step::Mean(Some(10))),
            }
        );
        assert!(NdSlice::parse("::mean()").is_err());
        assert!(NdSlice::parse("::mean(0)").is_err());
    }

    #[test]
    fn resolve_basic_ranges() {
        let slice = NdSlice::parse("2:3,0:5").unwrap();
        let resolved = slice.resolve(&[10, 15]).unwrap();
        assert_eq!(
            resolved,
            vec![
                ResolvedAxis::Strided {
                    start: 2,
                    step: 1,
                    len: 1
                },
                ResolvedAxis::Strided {
                    start: 0,
                    step: 1,
                    len: 5
                },
            ]
        );
        assert_eq!(slice.output_shape(&[10, 15]).unwrap(), vec![1, 5]);
    }

    #[test]
    fn resolve_negative_and_clamped() {
        let slice = NdSlice::parse("-3:").unwrap();
        assert_eq!(
            slice.resolve(&[10]).unwrap()[0],
            ResolvedAxis::Strided {
                start: 7,
                step: 1,
                len: 3
            }
        );
        // Out-of-bounds stop clamps rather than errors.
        let slice = NdSlice::parse("5:100").unwrap();
        assert_eq!(
            slice.resolve(&[10]).unwrap()[0],
            ResolvedAxis::Strided {
                start: 5,
                step: 1,
                len: 5
            }
        );
        // Reversed range is empty.
        let slice = NdSlice::parse("5:3").unwrap();
        assert_eq!(slice.output_shape(&[10]).unwrap(), vec![0]);
    }

    #[test]
    fn resolve_negative_stride() {
        let slice = NdSlice::parse("::-1").unwrap();
        assert_eq!(
            slice.resolve(&[4]).unwrap()[0],
            ResolvedAxis::Strided {
                start: 3,
                step: -1,
                len: 4
            }
        );
        // Non-divisible negative stride: 4, 2 (floor-division length).
        let slice = NdSlice::parse("4:0:-2").unwrap();
        assert_eq!(
            slice.resolve(&[10]).unwrap()[0],
            ResolvedAxis::Strided {
                start: 4,
                step: -2,
                len: 2
            }
        );
    }

    #[test]
    fn resolve_index_and_drop_axis() {
        let slice = NdSlice::parse("3,:").unwrap();
        let resolved = slice.resolve(&[10, 5]).unwrap();
        assert_eq!(resolved[0], ResolvedAxis::Pick(3));
        assert_eq!(slice.output_shape(&[10, 5]).unwrap(), vec![5]);

        let slice = NdSlice::parse("-1").unwrap();
        assert_eq!(slice.resolve(&[10]).unwrap()[0], ResolvedAxis::Pick(9));
        assert!(NdSlice::parse("10").unwrap().resolve(&[10]).is_err());
    }

    #[test]
    fn ellipsis_expands_against_rank() {
        let slice = NdSlice::parse("1,...").unwrap();
        let resolved = slice.resolve(&[4, 5, 6]).unwrap();
        assert_eq!(resolved.len(), 3);
        assert_eq!(resolved[0], ResolvedAxis::Pick(1));
        assert_eq!(
            resolved[2],
            ResolvedAxis::Strided {
                start: 0,
                step: 1,
                len: 6
            }
        );
        assert!(NdSlice::parse("...,...").is_err());
    }

    #[test]
    fn too_many_axes_rejected() {
        let slice = NdSlice::parse("1,2,3").unwrap();
        assert!(matches!(
            slice.resolve(&[4, 5]),
            Err(SliceError::TooManyAxes { given: 3, rank: 2 })
        ));
    }

    #[test]
    fn mean_output_lengths() {
        let slice = NdSlice::parse("0:100:mean").unwrap();
        assert_eq!(slice.output_shape(&[100]).unwrap(), vec![1]);
        let slice = NdSlice::parse("::mean(30)").unwrap();
        assert_eq!(slice.output_shape(&[100]).unwrap(), vec![4]);
    }
}
