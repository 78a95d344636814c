//! INT8 weight file: little-endian, no padding.
//!
//! ```text
//! i32        record count
//! per record:
//!   i32      name length in bytes
//!   u8[]     name (UTF-8)
//!   i32[]    shape; rank from the name suffix (.weight -> 2, .bias -> 1)
//!   f32      scale
//!   i8[]     data, row-major, product(shape) elements
//! ```

use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use tracing::info;

use crate::error::{Result, SnnError};
use crate::network::SpikingNetwork;
use crate::quant::QuantRecord;

/// Writer that only counts bytes; used to size a file before writing it.
pub struct CountingWriter {
    written: usize,
}

impl CountingWriter {
    pub fn new() -> Self {
        Self { written: 0 }
    }

    pub fn written(&self) -> usize {
        self.written
    }
}

impl Default for CountingWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl Write for CountingWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.written = self.written.saturating_add(buf.len());
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

pub fn write_i32_le<W: Write>(w: &mut W, v: i32) -> io::Result<()> {
    w.write_all(&v.to_le_bytes())
}

pub fn write_f32_le<W: Write>(w: &mut W, v: f32) -> io::Result<()> {
    w.write_all(&v.to_le_bytes())
}

pub fn read_exact<const N: usize, R: Read>(r: &mut R) -> io::Result<[u8; N]> {
    let mut buf = [0u8; N];
    r.read_exact(&mut buf)?;
    Ok(buf)
}

pub fn read_i32_le<R: Read>(r: &mut R) -> io::Result<i32> {
    Ok(i32::from_le_bytes(read_exact::<4, _>(r)?))
}

pub fn read_f32_le<R: Read>(r: &mut R) -> io::Result<f32> {
    Ok(f32::from_le_bytes(read_exact::<4, _>(r)?))
}

/// Tensor rank implied by a parameter name.
pub fn rank_for_name(name: &str) -> Option<usize> {
    if name.ends_with(".weight") {
        Some(2)
    } else if name.ends_with(".bias") {
        Some(1)
    } else {
        None
    }
}

fn to_i32(what: &str, v: usize) -> Result<i32> {
    i32::try_from(v).map_err(|_| SnnError::format(format!("{what} {v} does not fit in i32")))
}

fn to_len(what: &str, v: i32) -> Result<usize> {
    usize::try_from(v).map_err(|_| SnnError::format(format!("negative {what}: {v}")))
}

/// Map a short read to a format error; other I/O failures stay I/O errors.
fn truncated(what: &'static str) -> impl Fn(io::Error) -> SnnError {
    move |e| {
        if e.kind() == io::ErrorKind::UnexpectedEof {
            SnnError::format(format!("truncated file while reading {what}"))
        } else {
            SnnError::Io(e)
        }
    }
}

/// Read exactly `n` bytes without trusting `n` for the allocation.
fn read_vec<R: Read>(r: &mut R, n: usize, what: &'static str) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    r.take(n as u64).read_to_end(&mut buf)?;
    if buf.len() != n {
        return Err(SnnError::format(format!(
            "truncated file while reading {what}: expected {n} bytes, got {}",
            buf.len()
        )));
    }
    Ok(buf)
}

fn write_record<W: Write>(w: &mut W, rec: &QuantRecord) -> Result<()> {
    let rank = rank_for_name(&rec.name)
        .ok_or_else(|| SnnError::format(format!("cannot infer rank of {}", rec.name)))?;
    if rec.shape.len() != rank {
        return Err(SnnError::format(format!(
            "{} has rank {}, name implies {rank}",
            rec.name,
            rec.shape.len()
        )));
    }
    rec.validate()?;

    write_i32_le(w, to_i32("name length", rec.name.len())?)?;
    w.write_all(rec.name.as_bytes())?;
    for &dim in &rec.shape {
        write_i32_le(w, to_i32("dimension", dim)?)?;
    }
    write_f32_le(w, rec.scale)?;
    w.write_all(bytemuck::cast_slice::<i8, u8>(&rec.data))?;
    Ok(())
}

/// Encode `records` in order. An empty slice produces a bare zero count.
pub fn write_weight_file<W: Write>(w: &mut W, records: &[QuantRecord]) -> Result<()> {
    write_i32_le(w, to_i32("record count", records.len())?)?;
    for rec in records {
        write_record(w, rec)?;
    }
    Ok(())
}

fn read_record<R: Read>(r: &mut R) -> Result<QuantRecord> {
    let name_len = to_len("name length", read_i32_le(r).map_err(truncated("name length"))?)?;
    let name = String::from_utf8(read_vec(r, name_len, "name")?)
        .map_err(|e| SnnError::format(format!("record name is not UTF-8: {e}")))?;
    let rank = rank_for_name(&name)
        .ok_or_else(|| SnnError::format(format!("unknown tensor suffix: {name}")))?;

    let mut shape = Vec::with_capacity(rank);
    for _ in 0..rank {
        shape.push(to_len("dimension", read_i32_le(r).map_err(truncated("shape"))?)?);
    }
    let count = shape
        .iter()
        .try_fold(1usize, |acc, &d| acc.checked_mul(d))
        .ok_or_else(|| SnnError::format(format!("shape {shape:?} overflows")))?;
    let scale = read_f32_le(r).map_err(truncated("scale"))?;
    let data = bytemuck::cast_slice::<u8, i8>(&read_vec(r, count, "data")?).to_vec();

    // Same checks the writer applies: positive finite scale, no -128.
    let rec = QuantRecord {
        name,
        shape,
        scale,
        data,
    };
    rec.validate()?;
    Ok(rec)
}

/// Decode a weight file. Trailing bytes after the last record are an error.
pub fn read_weight_file<R: Read>(r: &mut R) -> Result<Vec<QuantRecord>> {
    let count = to_len("record count", read_i32_le(r).map_err(truncated("record count"))?)?;
    let mut records = Vec::new();
    for _ in 0..count {
        records.push(read_record(r)?);
    }
    let mut extra = [0u8; 1];
    if r.read(&mut extra)? != 0 {
        return Err(SnnError::format("trailing bytes after last record"));
    }
    Ok(records)
}

/// Encoded size of `records` in bytes.
pub fn encoded_len(records: &[QuantRecord]) -> Result<usize> {
    let mut counter = CountingWriter::new();
    write_weight_file(&mut counter, records)?;
    Ok(counter.written())
}

fn temp_sibling(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!(".{name}.{}.tmp", std::process::id()))
}

fn write_synced(tmp: &Path, records: &[QuantRecord]) -> Result<()> {
    let mut w = BufWriter::new(File::create(tmp)?);
    write_weight_file(&mut w, records)?;
    w.flush()?;
    w.into_inner().map_err(|e| e.into_error())?.sync_all()?;
    Ok(())
}

/// Write `records` to `path`.
///
/// The bytes go to a temporary sibling first and are renamed into place
/// after a successful flush. On failure the temporary file is removed and
/// `path` is left untouched.
pub fn serialize(records: &[QuantRecord], path: impl AsRef<Path>) -> Result<()> {
    let path = path.as_ref();
    let tmp = temp_sibling(path);
    let result = write_synced(&tmp, records).and_then(|()| Ok(fs::rename(&tmp, path)?));
    if result.is_err() {
        let _ = fs::remove_file(&tmp);
        return result;
    }
    info!(
        path = %path.display(),
        records = records.len(),
        bytes = encoded_len(records)?,
        "wrote INT8 weights"
    );
    Ok(())
}

pub fn load_weight_file(path: impl AsRef<Path>) -> Result<Vec<QuantRecord>> {
    let mut r = BufReader::new(File::open(path)?);
    read_weight_file(&mut r)
}

impl SpikingNetwork {
    /// Quantize every parameter and write the INT8 weight file.
    pub fn export(&self, path: impl AsRef<Path>) -> Result<Vec<QuantRecord>> {
        let records = self.quantize()?;
        serialize(&records, path)?;
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NetworkConfig;
    use crate::network::TensorRef;
    use crate::quant::quantize;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;
    use std::io::Cursor;

    fn encode(records: &[QuantRecord]) -> Vec<u8> {
        let mut buf = Vec::new();
        write_weight_file(&mut buf, records).unwrap();
        buf
    }

    #[test]
    fn empty_mapping_is_a_zero_count() {
        let buf = encode(&[]);
        assert_eq!(buf, vec![0, 0, 0, 0]);
        assert!(read_weight_file(&mut Cursor::new(buf)).unwrap().is_empty());

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.bin");
        serialize(&[], &path).unwrap();
        assert_eq!(fs::read(&path).unwrap(), vec![0, 0, 0, 0]);
    }

    #[test]
    fn layout_matches_byte_format() {
        let data = [-2.0, 1.0];
        let records = quantize(&[TensorRef {
            name: "l.bias",
            shape: vec![2],
            data: &data,
        }])
        .unwrap();
        let buf = encode(&records);

        let mut expected = Vec::new();
        expected.extend_from_slice(&1i32.to_le_bytes());
        expected.extend_from_slice(&6i32.to_le_bytes());
        expected.extend_from_slice(b"l.bias");
        expected.extend_from_slice(&2i32.to_le_bytes());
        expected.extend_from_slice(&(2.0f32 / 127.0).to_le_bytes());
        expected.extend_from_slice(&[0x81, 64]);
        assert_eq!(buf, expected);
        assert_eq!(encoded_len(&records).unwrap(), buf.len());
    }

    #[test]
    fn network_export_reads_back_bit_exact() {
        let cfg = NetworkConfig::with_size(6, 16, 6);
        let net = SpikingNetwork::init(cfg, &mut ChaCha8Rng::seed_from_u64(5)).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("weights.bin");

        let written = net.export(&path).unwrap();
        let read = load_weight_file(&path).unwrap();
        assert_eq!(read, written);
        let names: Vec<&str> = read.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(
            names,
            ["lif1.fc.weight", "lif1.fc.bias", "lif2.fc.weight", "lif2.fc.bias"]
        );
        assert_eq!(read[0].shape, vec![16, 6]);
        assert_eq!(read[3].shape, vec![6]);
        // No temporary file left behind.
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn truncated_file_is_a_format_error() {
        let cfg = NetworkConfig::with_size(2, 3, 2);
        let net = SpikingNetwork::init(cfg, &mut ChaCha8Rng::seed_from_u64(1)).unwrap();
        let buf = encode(&net.quantize().unwrap());
        for cut in [2, 7, 20, buf.len() - 1] {
            let err = read_weight_file(&mut Cursor::new(&buf[..cut])).unwrap_err();
            assert!(matches!(err, SnnError::Format(_)), "cut {cut}: {err}");
        }
    }

    #[test]
    fn rejects_malformed_headers() {
        let negative = (-1i32).to_le_bytes().to_vec();
        assert!(read_weight_file(&mut Cursor::new(negative)).is_err());

        let mut bad_name = Vec::new();
        bad_name.extend_from_slice(&1i32.to_le_bytes());
        bad_name.extend_from_slice(&2i32.to_le_bytes());
        bad_name.extend_from_slice(&[0xff, 0xfe]);
        assert!(read_weight_file(&mut Cursor::new(bad_name)).is_err());

        let mut unknown = Vec::new();
        unknown.extend_from_slice(&1i32.to_le_bytes());
        unknown.extend_from_slice(&3i32.to_le_bytes());
        unknown.extend_from_slice(b"foo");
        assert!(read_weight_file(&mut Cursor::new(unknown)).is_err());

        let mut trailing = encode(&[]);
        trailing.push(0);
        assert!(read_weight_file(&mut Cursor::new(trailing)).is_err());
    }

    #[test]
    fn reader_rejects_records_the_writer_would_refuse() {
        let record = |scale: f32, q: u8| {
            let mut buf = Vec::new();
            buf.extend_from_slice(&1i32.to_le_bytes());
            buf.extend_from_slice(&6i32.to_le_bytes());
            buf.extend_from_slice(b"l.bias");
            buf.extend_from_slice(&1i32.to_le_bytes());
            buf.extend_from_slice(&scale.to_le_bytes());
            buf.push(q);
            buf
        };
        assert_eq!(read_weight_file(&mut Cursor::new(record(0.5, 3))).unwrap()[0].data, vec![3]);
        for bad in [record(0.0, 3), record(-1.0, 3), record(f32::NAN, 3), record(0.5, 0x80)] {
            let err = read_weight_file(&mut Cursor::new(bad)).unwrap_err();
            assert!(matches!(err, SnnError::Format(_)), "{err}");
        }
    }

    #[test]
    fn refuses_names_without_rank_suffix() {
        let data = [1.0];
        let records = quantize(&[TensorRef {
            name: "layer.gamma",
            shape: vec![1],
            data: &data,
        }])
        .unwrap();
        assert!(write_weight_file(&mut Vec::new(), &records).is_err());
    }

    #[test]
    fn failed_export_leaves_nothing_behind() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("missing").join("weights.bin");
        let cfg = NetworkConfig::with_size(2, 2, 2);
        let net = SpikingNetwork::new(cfg).unwrap();
        assert!(matches!(net.export(&target), Err(SnnError::Io(_))));
        assert!(!target.exists());

        // Invalid record fails mid-write; the temp sibling must be gone.
        let path = dir.path().join("bad.bin");
        let bad = QuantRecord {
            name: "x.weight".into(),
            shape: vec![2, 2],
            scale: 1.0,
            data: vec![1, 2, 3],
        };
        assert!(serialize(&[bad], &path).is_err());
        assert!(!path.exists());
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }
}
