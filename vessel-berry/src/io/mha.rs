//! MetaImage (`.mha`) 读写. 头部为 ASCII 键值对, 数据紧随其后, 可选 zlib 压缩.

use std::collections::HashMap;
use std::fs;
use std::io::{Read, Write};
use std::path::Path;

use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use itertools::Itertools;
use nalgebra::Matrix3;
use ndarray::Array3;

use crate::data::{Geometry, Volume, VolumeGeometry};
use crate::error::{VesselError, VesselResult};

/// 可以按 MetaImage 元素存储的体素类型. 一律小端序.
pub trait MetaElement: Copy + Sized {
    /// `ElementType` 取值.
    const TYPE: &'static str;

    /// 单个元素的字节数.
    const SIZE: usize;

    /// 追加小端序字节.
    fn write_le(&self, out: &mut Vec<u8>);

    /// 从恰好 `SIZE` 个字节解码.
    fn read_le(bytes: &[u8]) -> Self;
}

macro_rules! impl_meta_element {
    ($($t: ty => $name: literal),+) => {
        $(
            impl MetaElement for $t {
                const TYPE: &'static str = $name;
                const SIZE: usize = std::mem::size_of::<$t>();

                #[inline]
                fn write_le(&self, out: &mut Vec<u8>) {
                    out.extend_from_slice(&self.to_le_bytes());
                }

                #[inline]
                fn read_le(bytes: &[u8]) -> Self {
                    let mut buf = [0u8; std::mem::size_of::<$t>()];
                    buf.copy_from_slice(bytes);
                    <$t>::from_le_bytes(buf)
                }
            }
        )+
    };
}

impl_meta_element!(u8 => "MET_UCHAR", u32 => "MET_UINT", f32 => "MET_FLOAT");

#[inline]
fn join(xs: impl IntoIterator<Item = f64>) -> String {
    xs.into_iter().join(" ")
}

impl<T: MetaElement> Volume<T> {
    /// 将体数据保存为 `.mha` 文件. `compress` 为 `true` 时数据以 zlib 压缩.
    pub fn save_mha<P: AsRef<Path>>(&self, path: P, compress: bool) -> VesselResult<()> {
        let path = path.as_ref();
        let g = self.geometry();
        let (z, h, w) = self.shape();

        let mut payload = Vec::with_capacity(self.size() * T::SIZE);
        // 标准布局下 w 变化最快, 与 MetaImage 的 x 最快顺序一致.
        for v in self.raw().iter() {
            v.write_le(&mut payload);
        }
        if compress {
            let mut enc = ZlibEncoder::new(Vec::new(), Compression::default());
            enc.write_all(&payload)
                .map_err(|e| VesselError::io(path, e))?;
            payload = enc.finish().map_err(|e| VesselError::io(path, e))?;
        }

        let d = g.direction();
        let mut header = String::new();
        header.push_str("ObjectType = Image\nNDims = 3\nBinaryData = True\n");
        header.push_str("BinaryDataByteOrderMSB = False\n");
        if compress {
            header.push_str("CompressedData = True\n");
            header.push_str(&format!("CompressedDataSize = {}\n", payload.len()));
        } else {
            header.push_str("CompressedData = False\n");
        }
        // 逐列写出: 每三个数为一个索引轴的物理方向.
        header.push_str(&format!(
            "TransformMatrix = {}\n",
            join((0..3).flat_map(|c| (0..3).map(move |r| d[(r, c)])))
        ));
        header.push_str(&format!("Offset = {}\n", join(g.origin().iter().copied())));
        header.push_str("CenterOfRotation = 0 0 0\n");
        header.push_str(&format!("ElementSpacing = {}\n", join(g.spacing().iter().copied())));
        header.push_str(&format!("DimSize = {w} {h} {z}\n"));
        header.push_str(&format!("ElementType = {}\n", T::TYPE));
        header.push_str("ElementDataFile = LOCAL\n");

        let mut bytes = header.into_bytes();
        bytes.extend_from_slice(&payload);
        fs::write(path, bytes).map_err(|e| VesselError::io(path, e))
    }

    /// 读取 `.mha` 文件. 元素类型必须与 `T` 一致, 且数据须位于文件内部.
    pub fn open_mha<P: AsRef<Path>>(path: P) -> VesselResult<Self> {
        let path = path.as_ref();
        let bytes = fs::read(path).map_err(|e| VesselError::io(path, e))?;
        let (fields, offset) = parse_header(&bytes)?;
        let get = |key: &str| {
            fields
                .get(key)
                .map(String::as_str)
                .ok_or_else(|| VesselError::format(format!("missing `{key}`")))
        };

        if get("NDims")?.trim() != "3" {
            return Err(VesselError::format("only 3-D images are supported"));
        }
        if get("ElementType")? != T::TYPE {
            return Err(VesselError::format(format!(
                "element type `{}` does not match `{}`",
                get("ElementType")?,
                T::TYPE
            )));
        }
        if get("ElementDataFile")? != "LOCAL" {
            return Err(VesselError::format("only LOCAL element data is supported"));
        }
        if fields.get("BinaryDataByteOrderMSB").map(String::as_str) == Some("True") {
            return Err(VesselError::format("big-endian data is not supported"));
        }

        let dims = numbers::<usize>(get("DimSize")?, 3)?;
        let spacing = numbers::<f64>(fields.get("ElementSpacing").map_or("1 1 1", String::as_str), 3)?;
        let offset3 = numbers::<f64>(fields.get("Offset").map_or("0 0 0", String::as_str), 3)?;
        let m = numbers::<f64>(
            fields
                .get("TransformMatrix")
                .map_or("1 0 0 0 1 0 0 0 1", String::as_str),
            9,
        )?;
        let direction = Matrix3::from_column_slice(&m);
        let geometry = Geometry::new(
            [spacing[0], spacing[1], spacing[2]],
            [offset3[0], offset3[1], offset3[2]],
            direction,
        )
        .map_err(|e| VesselError::format(e.to_string()))?;

        let mut payload = bytes[offset..].to_vec();
        if fields.get("CompressedData").map(String::as_str) == Some("True") {
            let mut out = Vec::new();
            ZlibDecoder::new(payload.as_slice())
                .read_to_end(&mut out)
                .map_err(|e| VesselError::io(path, e))?;
            payload = out;
        }

        let (w, h, z) = (dims[0], dims[1], dims[2]);
        let n = w * h * z;
        if payload.len() != n * T::SIZE {
            return Err(VesselError::format(format!(
                "expected {} bytes of element data, found {}",
                n * T::SIZE,
                payload.len()
            )));
        }
        let values: Vec<T> = payload.chunks_exact(T::SIZE).map(T::read_le).collect();
        let data = Array3::from_shape_vec((z, h, w), values)
            .map_err(|e| VesselError::format(e.to_string()))?;
        Ok(Volume::new(data, geometry))
    }
}

/// 解析头部. 返回键值表和数据起始偏移.
fn parse_header(bytes: &[u8]) -> VesselResult<(HashMap<String, String>, usize)> {
    let mut fields = HashMap::new();
    let mut pos = 0;
    while pos < bytes.len() {
        let end = bytes[pos..]
            .iter()
            .position(|&b| b == b'\n')
            .map_or(bytes.len(), |i| pos + i);
        let line = std::str::from_utf8(&bytes[pos..end])
            .map_err(|_| VesselError::format("header is not valid UTF-8"))?;
        pos = (end + 1).min(bytes.len());

        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let (key, value) = line
            .split_once('=')
            .ok_or_else(|| VesselError::format(format!("malformed header line `{line}`")))?;
        let (key, value) = (key.trim(), value.trim());
        fields.insert(key.to_string(), value.to_string());
        if key == "ElementDataFile" {
            return Ok((fields, pos));
        }
    }
    Err(VesselError::format("header has no `ElementDataFile` entry"))
}

/// 解析恰好 `n` 个以空白分隔的数.
fn numbers<N: std::str::FromStr>(s: &str, n: usize) -> VesselResult<Vec<N>> {
    let out = s
        .split_whitespace()
        .map(|t| t.parse::<N>())
        .collect::<Result<Vec<N>, _>>()
        .map_err(|_| VesselError::format(format!("cannot parse numbers from `{s}`")))?;
    if out.len() != n {
        return Err(VesselError::format(format!("expected {n} numbers in `{s}`")));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn temp(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("vessel-berry-{}-{name}", std::process::id()))
    }

    fn volume() -> Volume<f32> {
        #[rustfmt::skip]
        let rot = Matrix3::new(
            0.0, -1.0, 0.0,
            1.0, 0.0, 0.0,
            0.0, 0.0, 1.0,
        );
        let g = Geometry::new([0.5, 0.7, 2.0], [10.0, -3.0, 4.25], rot).unwrap();
        let data = Array3::from_shape_fn((3, 4, 5), |(z, h, w)| (z * 100 + h * 10 + w) as f32 * 0.5);
        Volume::new(data, g)
    }

    #[test]
    fn test_mha_compressed_and_plain() {
        let v = volume();
        for compress in [true, false] {
            let path = temp(&format!("{compress}.mha"));
            v.save_mha(&path, compress).unwrap();
            let back = Volume::<f32>::open_mha(&path).unwrap();
            let _ = fs::remove_file(&path);
            assert_eq!(back.raw(), v.raw());
            assert_eq!(back.geometry(), v.geometry());
        }
    }

    #[test]
    fn test_mha_type_mismatch() {
        let v = volume().map(|&x| x as u8);
        let path = temp("mismatch.mha");
        v.save_mha(&path, true).unwrap();
        assert!(matches!(
            Volume::<f32>::open_mha(&path),
            Err(VesselError::Format { .. })
        ));
        let back = Volume::<u8>::open_mha(&path).unwrap();
        let _ = fs::remove_file(&path);
        assert_eq!(back[(2, 3, 4)], 117);
    }

    #[test]
    fn test_mha_truncated() {
        let path = temp("truncated.mha");
        fs::write(
            &path,
            "NDims = 3\nDimSize = 2 2 2\nElementType = MET_UCHAR\nElementDataFile = LOCAL\n\x01\x02",
        )
        .unwrap();
        let err = Volume::<u8>::open_mha(&path).unwrap_err();
        let _ = fs::remove_file(&path);
        assert!(matches!(err, VesselError::Format { .. }));
        assert!(matches!(
            Volume::<u8>::open_mha(temp("missing.mha")),
            Err(VesselError::Io { .. })
        ));
    }
}
