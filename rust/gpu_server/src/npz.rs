//! Reading uploaded `.npz` archives into dense f32 arrays.
//!
//! The `.npy` header of the first entry is parsed before any element data is
//! touched. The declared element count must fit both the bytes the entry really
//! holds and the configured decode limit, so a lying header is rejected without
//! allocating what it claims.

use std::fmt::Display;
use std::io::{Cursor, Read, Seek};

use ndarray::{IxDyn, OwnedRepr};
use ndarray_npy::{NpzReader, ReadNpzError, ReadableElement};
use py_literal::Value;
use zip::ZipArchive;

use crate::error::BadInputError;

const NPY_MAGIC: &[u8; 6] = b"\x93NUMPY";
const MAX_HEADER_LEN: usize = 64 * 1024;

/// A row-major f32 array taken from the first entry of an archive.
#[derive(Debug, Clone, PartialEq)]
pub struct DenseArray {
    pub shape: Vec<usize>,
    pub data: Vec<f32>,
}

impl DenseArray {
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Stored element types that coerce to f32.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementType {
    F32,
    F64,
    I8,
    I16,
    I32,
    I64,
    U8,
    U16,
    U32,
    U64,
    Bool,
}

impl ElementType {
    /// Maps a numpy descriptor such as `<f4` or `|b1`.
    pub fn from_descr(descr: &str) -> Option<Self> {
        let body = descr
            .strip_prefix(|c: char| matches!(c, '<' | '>' | '|'))
            .unwrap_or(descr);
        let element = match body {
            "f4" => ElementType::F32,
            "f8" => ElementType::F64,
            "i1" => ElementType::I8,
            "i2" => ElementType::I16,
            "i4" => ElementType::I32,
            "i8" => ElementType::I64,
            "u1" => ElementType::U8,
            "u2" => ElementType::U16,
            "u4" => ElementType::U32,
            "u8" => ElementType::U64,
            "b1" => ElementType::Bool,
            _ => return None,
        };
        Some(element)
    }

    pub fn size(self) -> usize {
        match self {
            ElementType::I8 | ElementType::U8 | ElementType::Bool => 1,
            ElementType::I16 | ElementType::U16 => 2,
            ElementType::F32 | ElementType::I32 | ElementType::U32 => 4,
            ElementType::F64 | ElementType::I64 | ElementType::U64 => 8,
        }
    }
}

/// The parts of a `.npy` header needed to bound the decode.
#[derive(Debug, Clone, PartialEq)]
pub struct NpyHeader {
    pub element: ElementType,
    pub shape: Vec<usize>,
    /// Bytes from the start of the entry to the first element.
    pub data_offset: u64,
}

impl NpyHeader {
    pub fn read<R: Read>(reader: &mut R) -> Result<Self, String> {
        let mut preamble = [0u8; 8];
        reader
            .read_exact(&mut preamble)
            .map_err(|e| format!("truncated .npy preamble: {}", e))?;
        if &preamble[..6] != NPY_MAGIC {
            return Err("entry is not a .npy array".to_string());
        }

        let (header_len, len_bytes) = match preamble[6] {
            1 => {
                let mut len = [0u8; 2];
                reader
                    .read_exact(&mut len)
                    .map_err(|e| format!("truncated .npy header length: {}", e))?;
                (u16::from_le_bytes(len) as usize, 2)
            }
            2 | 3 => {
                let mut len = [0u8; 4];
                reader
                    .read_exact(&mut len)
                    .map_err(|e| format!("truncated .npy header length: {}", e))?;
                (u32::from_le_bytes(len) as usize, 4)
            }
            version => return Err(format!("unsupported .npy version {}", version)),
        };
        if header_len > MAX_HEADER_LEN {
            return Err(format!("oversized .npy header ({} bytes)", header_len));
        }

        let mut text = vec![0u8; header_len];
        reader
            .read_exact(&mut text)
            .map_err(|e| format!("truncated .npy header: {}", e))?;
        let text = String::from_utf8(text).map_err(|_| "non-text .npy header".to_string())?;

        let mut header = Self::parse_dict(text.trim())?;
        header.data_offset = (preamble.len() + len_bytes + header_len) as u64;
        Ok(header)
    }

    fn parse_dict(text: &str) -> Result<Self, String> {
        let value: Value = text
            .parse()
            .map_err(|e| format!("invalid .npy header: {}", e))?;
        let Value::Dict(entries) = value else {
            return Err("invalid .npy header: not a dict".to_string());
        };

        let mut descr = None;
        let mut shape = None;
        for (key, value) in entries {
            match (key, value) {
                (Value::String(key), Value::String(d)) if key == "descr" => descr = Some(d),
                (Value::String(key), Value::Tuple(dims)) if key == "shape" => {
                    let dims = dims
                        .iter()
                        .map(|dim| match dim {
                            Value::Integer(n) => usize::try_from(n)
                                .map_err(|_| format!("invalid dimension {}", n)),
                            other => Err(format!("invalid dimension {:?}", other)),
                        })
                        .collect::<Result<Vec<usize>, String>>()?;
                    shape = Some(dims);
                }
                _ => {}
            }
        }

        let descr = descr.ok_or("no 'descr' in .npy header")?;
        let shape = shape.ok_or("no 'shape' in .npy header")?;
        let element = ElementType::from_descr(&descr)
            .ok_or_else(|| format!("unsupported dtype '{}'", descr))?;

        Ok(Self {
            element,
            shape,
            data_offset: 0,
        })
    }

    /// Element count, or `None` when the shape cannot describe an in-memory array.
    pub fn element_count(&self) -> Option<usize> {
        let mut nonzero: usize = 1;
        for &dim in self.shape.iter().filter(|&&dim| dim != 0) {
            nonzero = nonzero.checked_mul(dim)?;
        }
        if nonzero > isize::MAX as usize {
            return None;
        }
        Some(if self.shape.contains(&0) { 0 } else { nonzero })
    }
}

fn bad_npz(cause: impl Display) -> BadInputError {
    BadInputError(format!("Bad NPZ file: {}", cause))
}

/// Parses an in-memory `.npz` archive and returns its first array coerced to f32.
///
/// `max_decoded_bytes` bounds both the inflated entry and the f32 output.
pub fn read_first_array(bytes: &[u8], max_decoded_bytes: usize) -> Result<DenseArray, BadInputError> {
    let mut archive = ZipArchive::new(Cursor::new(bytes)).map_err(bad_npz)?;
    if archive.len() == 0 {
        return Err(bad_npz("archive contains no arrays"));
    }

    let (name, entry_size, header) = {
        let mut entry = archive.by_index(0).map_err(bad_npz)?;
        let name = entry.name().to_string();
        let size = entry.size();
        let header =
            NpyHeader::read(&mut entry).map_err(|e| bad_npz(format!("entry '{}': {}", name, e)))?;
        (name, size, header)
    };

    if entry_size > max_decoded_bytes as u64 {
        return Err(bad_npz(format!(
            "entry '{}' inflates to {} bytes, limit is {}",
            name, entry_size, max_decoded_bytes
        )));
    }
    let len = header
        .element_count()
        .ok_or_else(|| bad_npz(format!("entry '{}' has an impossible shape {:?}", name, header.shape)))?;
    let data_bytes = len
        .checked_mul(header.element.size())
        .ok_or_else(|| bad_npz(format!("entry '{}' shape {:?} overflows", name, header.shape)))?;
    let available = entry_size.saturating_sub(header.data_offset);
    if data_bytes as u64 > available {
        return Err(bad_npz(format!(
            "entry '{}' header claims {} data bytes but holds {}",
            name, data_bytes, available
        )));
    }
    if len.saturating_mul(std::mem::size_of::<f32>()) > max_decoded_bytes {
        return Err(bad_npz(format!(
            "entry '{}' decodes to {} f32 values, limit is {} bytes",
            name, len, max_decoded_bytes
        )));
    }

    tracing::debug!(
        "Reading '{}' as {:?} {:?} ({} entries in archive)",
        name,
        header.element,
        header.shape,
        archive.len()
    );

    let mut npz = NpzReader::new(Cursor::new(bytes)).map_err(bad_npz)?;
    let array = match header.element {
        ElementType::F32 => read_as::<f32, _>(&mut npz, |x| x),
        ElementType::F64 => read_as::<f64, _>(&mut npz, |x| x as f32),
        ElementType::I8 => read_as::<i8, _>(&mut npz, |x| x as f32),
        ElementType::I16 => read_as::<i16, _>(&mut npz, |x| x as f32),
        ElementType::I32 => read_as::<i32, _>(&mut npz, |x| x as f32),
        ElementType::I64 => read_as::<i64, _>(&mut npz, |x| x as f32),
        ElementType::U8 => read_as::<u8, _>(&mut npz, |x| x as f32),
        ElementType::U16 => read_as::<u16, _>(&mut npz, |x| x as f32),
        ElementType::U32 => read_as::<u32, _>(&mut npz, |x| x as f32),
        ElementType::U64 => read_as::<u64, _>(&mut npz, |x| x as f32),
        ElementType::Bool => read_as::<bool, _>(&mut npz, |x| if x { 1.0 } else { 0.0 }),
    };
    array.map_err(bad_npz)
}

fn read_as<T, R>(npz: &mut NpzReader<R>, convert: fn(T) -> f32) -> Result<DenseArray, ReadNpzError>
where
    T: ReadableElement + Copy,
    R: Read + Seek,
{
    let array = npz.by_index::<OwnedRepr<T>, IxDyn>(0)?;
    // iter() walks logical row-major order, so Fortran-ordered entries flatten like C ones
    Ok(DenseArray {
        shape: array.shape().to_vec(),
        data: array.iter().map(|&x| convert(x)).collect(),
    })
}


#[cfg(test)]
mod tests {
    use super::testing::{npy_bytes, npz_bytes, raw_npz, TEST_LIMIT};
    use super::*;
    use ndarray::{arr0, arr1, arr2, Array2, Array3};
    use ndarray_npy::NpzWriter;
    use proptest::prelude::*;

    fn read(bytes: &[u8]) -> Result<DenseArray, BadInputError> {
        read_first_array(bytes, TEST_LIMIT)
    }

    #[test]
    fn test_reads_f32_with_shape() {
        let bytes = npz_bytes(&arr2(&[[1.0f32, 2.0], [3.0, 4.0]]));
        let array = read(&bytes).unwrap();

        assert_eq!(array.shape, vec![2, 2]);
        assert_eq!(array.data, vec![1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn test_compressed_archive() {
        let source = Array3::<f32>::from_shape_fn((2, 3, 4), |(i, j, k)| (i * 12 + j * 4 + k) as f32);
        let mut npz = NpzWriter::new_compressed(Cursor::new(Vec::new()));
        npz.add_array("arr_0", &source).unwrap();
        let bytes = npz.finish().unwrap().into_inner();

        let array = read(&bytes).unwrap();
        assert_eq!(array.shape, vec![2, 3, 4]);
        assert_eq!(array.data, (0..24).map(|v| v as f32).collect::<Vec<_>>());
    }

    #[test]
    fn test_coerces_other_dtypes() {
        let doubles = read(&npz_bytes(&arr1(&[0.5f64, -1.25]))).unwrap();
        assert_eq!(doubles.data, vec![0.5, -1.25]);

        let ints = read(&npz_bytes(&arr1(&[-3i64, 7]))).unwrap();
        assert_eq!(ints.data, vec![-3.0, 7.0]);

        let bytes = read(&npz_bytes(&arr1(&[255u8, 0]))).unwrap();
        assert_eq!(bytes.data, vec![255.0, 0.0]);

        let flags = read(&npz_bytes(&arr1(&[true, false]))).unwrap();
        assert_eq!(flags.data, vec![1.0, 0.0]);
    }

    #[test]
    fn test_descriptor_mapping() {
        assert_eq!(ElementType::from_descr("<f4"), Some(ElementType::F32));
        assert_eq!(ElementType::from_descr(">f8"), Some(ElementType::F64));
        assert_eq!(ElementType::from_descr("|u1"), Some(ElementType::U8));
        assert_eq!(ElementType::from_descr("|b1"), Some(ElementType::Bool));
        assert_eq!(ElementType::from_descr("<i8").map(ElementType::size), Some(8));
        assert_eq!(ElementType::from_descr("<c8"), None);
        assert_eq!(ElementType::from_descr("<f2"), None);
    }

    #[test]
    fn test_header_is_parsed_once_from_the_entry() {
        let payload = npy_bytes(
            "{'descr': '<u2', 'fortran_order': False, 'shape': (3, 1), }",
            &[0; 6],
        );
        let mut cursor = Cursor::new(payload.as_slice());
        let header = NpyHeader::read(&mut cursor).unwrap();

        assert_eq!(header.element, ElementType::U16);
        assert_eq!(header.shape, vec![3, 1]);
        assert_eq!(header.data_offset, cursor.position());
        assert_eq!(header.element_count(), Some(3));
    }

    #[test]
    fn test_fortran_order_flattens_row_major() {
        let source = arr2(&[[1.0f32, 2.0], [3.0, 4.0]]);
        let bytes = npz_bytes(&source.t());

        let array = read(&bytes).unwrap();
        assert_eq!(array.shape, vec![2, 2]);
        assert_eq!(array.data, vec![1.0, 3.0, 2.0, 4.0]);
    }

    #[test]
    fn test_scalar_and_empty_arrays() {
        let scalar = read(&npz_bytes(&arr0(2.5f32))).unwrap();
        assert!(scalar.shape.is_empty());
        assert_eq!(scalar.data, vec![2.5]);

        let empty = read(&npz_bytes(&Array2::<f32>::zeros((0, 3)))).unwrap();
        assert_eq!(empty.shape, vec![0, 3]);
        assert!(empty.is_empty());
    }

    #[test]
    fn test_first_entry_wins() {
        let mut npz = NpzWriter::new(Cursor::new(Vec::new()));
        npz.add_array("first", &arr1(&[1.0f32])).unwrap();
        npz.add_array("second", &arr1(&[2.0f32, 3.0])).unwrap();
        let bytes = npz.finish().unwrap().into_inner();

        let array = read(&bytes).unwrap();
        assert_eq!(array.data, vec![1.0]);
    }

    #[test]
    fn test_empty_archive_is_rejected() {
        let npz = NpzWriter::new(Cursor::new(Vec::new()));
        let bytes = npz.finish().unwrap().into_inner();

        let err = read(&bytes).unwrap_err();
        assert!(err.to_string().starts_with("Bad NPZ file:"));
        assert!(err.to_string().contains("no arrays"));
    }

    #[test]
    fn test_garbage_is_rejected() {
        let err = read(b"definitely not a zip archive").unwrap_err();
        assert!(err.to_string().starts_with("Bad NPZ file:"));

        assert!(read(&[]).is_err());
    }

    #[test]
    fn test_non_npy_entry_is_rejected() {
        let bytes = raw_npz("notes.txt", b"hello, world");
        let err = read(&bytes).unwrap_err();
        assert!(err.to_string().contains("not a .npy array"));
    }

    #[test]
    fn test_header_claiming_more_than_it_holds() {
        // 16 GB declared, zero bytes present
        let payload = npy_bytes(
            "{'descr': '<f4', 'fortran_order': False, 'shape': (4000000000,), }",
            &[],
        );
        let err = read(&raw_npz("arr_0.npy", &payload)).unwrap_err();

        assert!(err.to_string().starts_with("Bad NPZ file:"));
        assert!(err.to_string().contains("claims 16000000000 data bytes"));
    }

    #[test]
    fn test_overflowing_shape_is_rejected() {
        let payload = npy_bytes(
            "{'descr': '<f8', 'fortran_order': False, 'shape': (4294967296, 4294967296, 4294967296), }",
            &[],
        );
        let err = read(&raw_npz("arr_0.npy", &payload)).unwrap_err();
        assert!(err.to_string().contains("impossible shape"));

        let negative = npy_bytes("{'descr': '<f4', 'fortran_order': False, 'shape': (-1,), }", &[]);
        assert!(read(&raw_npz("arr_0.npy", &negative)).is_err());
    }

    #[test]
    fn test_unsupported_dtype_is_rejected() {
        let payload = npy_bytes("{'descr': '<c8', 'fortran_order': False, 'shape': (1,), }", &[0; 8]);
        let err = read(&raw_npz("arr_0.npy", &payload)).unwrap_err();
        assert!(err.to_string().contains("unsupported dtype '<c8'"));
    }

    #[test]
    fn test_decode_limit() {
        let bytes = npz_bytes(&Array2::<f32>::zeros((32, 32)));
        assert!(read_first_array(&bytes, 1024 * 1024).is_ok());

        // the inflated entry alone is over 4 KiB
        let err = read_first_array(&bytes, 1024).unwrap_err();
        assert!(err.to_string().contains("limit is 1024"));

        // u8 entries grow fourfold once coerced to f32
        let small = npz_bytes(&Array2::<u8>::zeros((32, 32)));
        let err = read_first_array(&small, 2048).unwrap_err();
        assert!(err.to_string().contains("decodes to 1024 f32 values"));
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(256))]

        /// Arbitrary bytes must yield an error or an array, never a panic
        #[test]
        fn fuzz_arbitrary_bytes(bytes in proptest::collection::vec(any::<u8>(), 0..512)) {
            let _ = read(&bytes);
        }

        /// Corrupting a valid archive must not panic either
        #[test]
        fn fuzz_truncated_archive(cut in 0usize..200) {
            let bytes = npz_bytes(&arr2(&[[1.0f32, 2.0], [3.0, 4.0]]));
            let cut = cut.min(bytes.len());
            let _ = read(&bytes[..cut]);
        }

        /// Headers declaring arbitrary shapes over a tiny payload are refused up front
        #[test]
        fn fuzz_declared_shapes(dims in proptest::collection::vec(1u64..=u32::MAX as u64, 1..4)) {
            let shape = dims.iter().map(|d| format!("{}, ", d)).collect::<String>();
            let header = format!("{{'descr': '<f4', 'fortran_order': False, 'shape': ({}), }}", shape);
            let data = [0u8; 16];
            let payload = npy_bytes(&header, &data);

            let result = read(&raw_npz("arr_0.npy", &payload));
            let declared = dims.iter().try_fold(4u64, |acc, &d| acc.checked_mul(d));
            if declared.map_or(true, |bytes| bytes > data.len() as u64) {
                prop_assert!(result.is_err());
            }
        }
    }
}
