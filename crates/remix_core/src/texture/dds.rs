//! DDS header validation.
//!
//! A Remix texture that fails these checks renders as the runtime's purple
//! fallback. Only the header and data length are checked; block contents are
//! never decoded.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Why a DDS file was rejected.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DdsError {
    #[error("file is {0} bytes, too short for a DDS header")]
    TooShort(usize),

    #[error("missing DDS magic")]
    BadMagic,

    #[error("header size {0}, expected 124")]
    BadHeaderSize(u32),

    #[error("pixel format size {0}, expected 32")]
    BadPixelFormatSize(u32),

    #[error("zero width or height")]
    ZeroDimensions,

    #[error("unknown pixel format {0}")]
    UnknownFormat(String),

    #[error("pixel data truncated: {actual} of {expected} bytes")]
    Truncated { expected: u64, actual: u64 },
}

/// A recognized pixel format.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct DdsFormat {
    pub name: &'static str,
    /// Bytes per 4x4 block, or per pixel when not block compressed
    pub unit_bytes: u32,
    pub block_compressed: bool,
}

impl DdsFormat {
    const fn block(name: &'static str, unit_bytes: u32) -> Self {
        Self {
            name,
            unit_bytes,
            block_compressed: true,
        }
    }

    const fn pixel(name: &'static str, unit_bytes: u32) -> Self {
        Self {
            name,
            unit_bytes,
            block_compressed: false,
        }
    }

    /// Format for a DX10 header DXGI code.
    pub fn from_dxgi(code: u32) -> Option<Self> {
        let format = match code {
            2 => Self::pixel("R32G32B32A32_FLOAT", 16),
            10 => Self::pixel("R16G16B16A16_FLOAT", 8),
            28 => Self::pixel("R8G8B8A8_UNORM", 4),
            29 => Self::pixel("R8G8B8A8_UNORM_SRGB", 4),
            61 => Self::pixel("R8_UNORM", 1),
            71 => Self::block("BC1_UNORM", 8),
            72 => Self::block("BC1_UNORM_SRGB", 8),
            74 => Self::block("BC2_UNORM", 16),
            75 => Self::block("BC2_UNORM_SRGB", 16),
            77 => Self::block("BC3_UNORM", 16),
            78 => Self::block("BC3_UNORM_SRGB", 16),
            80 => Self::block("BC4_UNORM", 8),
            81 => Self::block("BC4_SNORM", 8),
            83 => Self::block("BC5_UNORM", 16),
            84 => Self::block("BC5_SNORM", 16),
            87 => Self::pixel("B8G8R8A8_UNORM", 4),
            91 => Self::pixel("B8G8R8A8_UNORM_SRGB", 4),
            95 => Self::block("BC6H_UF16", 16),
            96 => Self::block("BC6H_SF16", 16),
            98 => Self::block("BC7_UNORM", 16),
            99 => Self::block("BC7_UNORM_SRGB", 16),
            _ => return None,
        };
        Some(format)
    }

    /// Format for a legacy FourCC code.
    pub fn from_four_cc(code: &[u8; 4]) -> Option<Self> {
        let format = match code {
            b"DXT1" => Self::block("BC1_UNORM", 8),
            b"DXT2" | b"DXT3" => Self::block("BC2_UNORM", 16),
            b"DXT4" | b"DXT5" => Self::block("BC3_UNORM", 16),
            b"ATI1" | b"BC4U" => Self::block("BC4_UNORM", 8),
            b"BC4S" => Self::block("BC4_SNORM", 8),
            b"ATI2" | b"BC5U" => Self::block("BC5_UNORM", 16),
            b"BC5S" => Self::block("BC5_SNORM", 16),
            _ => return None,
        };
        Some(format)
    }
}

/// Header facts of a valid DDS file.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct DdsInfo {
    pub width: u32,
    pub height: u32,
    pub mip_count: u32,
    /// Array layers, times six for cube maps
    pub layers: u32,
    pub format: DdsFormat,
    /// Bytes of pixel data the header implies
    pub data_len: u64,
}

const MAGIC: &[u8; 4] = b"DDS ";
const HEADER_SIZE: u32 = 124;
const PIXEL_FORMAT_SIZE: u32 = 32;
const DX10_HEADER_LEN: usize = 20;
const DDPF_FOURCC: u32 = 0x4;
const DDPF_RGB: u32 = 0x40;
const DDSCAPS2_CUBEMAP: u32 = 0x200;
const DX10_MISC_TEXTURECUBE: u32 = 0x4;

fn read_u32(bytes: &[u8], offset: usize) -> u32 {
    let mut word = [0u8; 4];
    word.copy_from_slice(&bytes[offset..offset + 4]);
    u32::from_le_bytes(word)
}

/// Validate a DDS file's header and data length.
pub fn inspect_dds(bytes: &[u8]) -> Result<DdsInfo, DdsError> {
    if bytes.len() < 4 + HEADER_SIZE as usize {
        if bytes.len() >= 4 && &bytes[..4] != MAGIC {
            return Err(DdsError::BadMagic);
        }
        return Err(DdsError::TooShort(bytes.len()));
    }
    if &bytes[..4] != MAGIC {
        return Err(DdsError::BadMagic);
    }

    let header_size = read_u32(bytes, 4);
    if header_size != HEADER_SIZE {
        return Err(DdsError::BadHeaderSize(header_size));
    }
    let height = read_u32(bytes, 12);
    let width = read_u32(bytes, 16);
    if width == 0 || height == 0 {
        return Err(DdsError::ZeroDimensions);
    }
    let mip_count = read_u32(bytes, 28).clamp(1, 32);

    let pf_size = read_u32(bytes, 76);
    if pf_size != PIXEL_FORMAT_SIZE {
        return Err(DdsError::BadPixelFormatSize(pf_size));
    }
    let pf_flags = read_u32(bytes, 80);
    let mut four_cc = [0u8; 4];
    four_cc.copy_from_slice(&bytes[84..88]);
    let caps2 = read_u32(bytes, 112);

    let mut data_offset = 4 + HEADER_SIZE as usize;
    let mut layers = if caps2 & DDSCAPS2_CUBEMAP != 0 { 6 } else { 1 };

    let format = if pf_flags & DDPF_FOURCC != 0 && &four_cc == b"DX10" {
        if bytes.len() < data_offset + DX10_HEADER_LEN {
            return Err(DdsError::TooShort(bytes.len()));
        }
        let dxgi = read_u32(bytes, data_offset);
        let misc = read_u32(bytes, data_offset + 8);
        let array_size = read_u32(bytes, data_offset + 12).max(1);
        layers = array_size.saturating_mul(if misc & DX10_MISC_TEXTURECUBE != 0 { 6 } else { 1 });
        data_offset += DX10_HEADER_LEN;
        DdsFormat::from_dxgi(dxgi).ok_or_else(|| DdsError::UnknownFormat(format!("DXGI {}", dxgi)))?
    } else if pf_flags & DDPF_FOURCC != 0 {
        DdsFormat::from_four_cc(&four_cc).ok_or_else(|| {
            DdsError::UnknownFormat(String::from_utf8_lossy(&four_cc).into_owned())
        })?
    } else if pf_flags & DDPF_RGB != 0 {
        match read_u32(bytes, 88) {
            32 => DdsFormat::pixel("RGBA8", 4),
            24 => DdsFormat::pixel("RGB8", 3),
            16 => DdsFormat::pixel("RGB16", 2),
            bits => return Err(DdsError::UnknownFormat(format!("{}-bit RGB", bits))),
        }
    } else {
        return Err(DdsError::UnknownFormat(format!("pixel format flags {:#x}", pf_flags)));
    };

    let data_len = expected_data_len(width, height, mip_count, &format) * layers as u64;
    let actual = (bytes.len() - data_offset) as u64;
    if actual < data_len {
        return Err(DdsError::Truncated {
            expected: data_len,
            actual,
        });
    }

    Ok(DdsInfo {
        width,
        height,
        mip_count,
        layers,
        format,
        data_len,
    })
}

fn expected_data_len(width: u32, height: u32, mip_count: u32, format: &DdsFormat) -> u64 {
    let mut total = 0u64;
    for level in 0..mip_count {
        let w = (width >> level).max(1) as u64;
        let h = (height >> level).max(1) as u64;
        total += if format.block_compressed {
            w.div_ceil(4) * h.div_ceil(4) * format.unit_bytes as u64
        } else {
            w * h * format.unit_bytes as u64
        };
    }
    total
}

/// Build a DX10 DDS file with zeroed pixel data.
#[cfg(test)]
pub(crate) fn test_dds(width: u32, height: u32, dxgi: u32, mip_count: u32) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(MAGIC);
    let mut header = [0u32; 31];
    header[0] = HEADER_SIZE;
    header[1] = 0x1 | 0x2 | 0x4 | 0x1000 | 0x20000;
    header[2] = height;
    header[3] = width;
    header[6] = mip_count;
    header[18] = PIXEL_FORMAT_SIZE;
    header[19] = DDPF_FOURCC;
    header[20] = u32::from_le_bytes(*b"DX10");
    header[26] = 0x1000;
    for word in header {
        out.extend_from_slice(&word.to_le_bytes());
    }
    for word in [dxgi, 3, 0, 1, 0] {
        out.extend_from_slice(&word.to_le_bytes());
    }
    let format = DdsFormat::from_dxgi(dxgi).unwrap_or(DdsFormat::block("BC7_UNORM", 16));
    let len = expected_data_len(width, height, mip_count.max(1), &format);
    out.resize(out.len() + len as usize, 0);
    out
}
