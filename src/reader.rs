use std::{
    fs::File,
    io::BufReader,
    path::{Path, PathBuf},
    sync::OnceLock,
};

use ndarray::{s, Array3, ArrayD, Axis, IxDyn};
use regex::Regex;
use tiff::{
    decoder::{Decoder, DecodingResult, Limits},
    tags::Tag,
};
use tracing::debug;

use crate::errors::{CellposeError, Result};
use crate::imageops::normalize::to_f32;

/// Decoded image with the OME-XML it came with.
#[derive(Debug, Clone)]
pub struct BioImage {
    /// Samples in `(Y, X, Z, C, T)` order.
    pub data: ArrayD<f32>,
    /// Raw OME-XML from the first IFD, empty when absent.
    pub metadata: String,
}

impl BioImage {
    /// Drop every singleton axis.
    pub fn squeeze(self) -> ArrayD<f32> {
        squeeze(self.data)
    }
}

pub fn squeeze(mut array: ArrayD<f32>) -> ArrayD<f32> {
    for axis in (0..array.ndim()).rev() {
        if array.len_of(Axis(axis)) == 1 {
            array = array.index_axis_move(Axis(axis), 0);
        }
    }
    array
}

/// Image geometry declared by the OME `Pixels` element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OmePixels {
    pub size_x: usize,
    pub size_y: usize,
    pub size_z: usize,
    pub size_c: usize,
    pub size_t: usize,
    pub dimension_order: String,
}

impl OmePixels {
    pub fn parse(xml: &str) -> Option<Self> {
        static PIXELS: OnceLock<Regex> = OnceLock::new();
        static ATTRIBUTE: OnceLock<Regex> = OnceLock::new();
        let pixels = PIXELS.get_or_init(|| Regex::new(r"<(?:\w+:)?Pixels\b[^>]*>").unwrap());
        let attribute = ATTRIBUTE.get_or_init(|| Regex::new(r#"\b(\w+)\s*=\s*"([^"]*)""#).unwrap());

        let element = pixels.find(xml)?.as_str();
        let lookup = |name: &str| {
            attribute
                .captures_iter(element)
                .find(|c| &c[1] == name)
                .map(|c| c[2].to_string())
        };
        let size = |name: &str| lookup(name).and_then(|v| v.parse::<usize>().ok());

        Some(Self {
            size_x: size("SizeX")?,
            size_y: size("SizeY")?,
            size_z: size("SizeZ").unwrap_or(1),
            size_c: size("SizeC").unwrap_or(1),
            size_t: size("SizeT").unwrap_or(1),
            dimension_order: lookup("DimensionOrder").unwrap_or_else(|| "XYZCT".to_string()),
        })
    }
}

/// How the IFDs of a file map onto Z, C and T.
#[derive(Debug, Clone, PartialEq, Eq)]
struct PlaneLayout {
    size_z: usize,
    /// Channels stored as separate pages; interleaved samples multiply this.
    page_channels: usize,
    size_t: usize,
    /// Plane axes from fastest to slowest varying, e.g. `['Z', 'C', 'T']`.
    order: Vec<char>,
}

impl PlaneLayout {
    fn from_ome(ome: &OmePixels, pages: usize, samples: usize) -> Option<Self> {
        let page_channels = (ome.size_c / samples.max(1)).max(1);
        let order: Vec<char> = ome.dimension_order.chars().skip(2).collect();
        let valid_order = order.len() == 3 && ['Z', 'C', 'T'].iter().all(|c| order.contains(c));
        (valid_order && ome.size_z * page_channels * ome.size_t == pages).then(|| Self {
            size_z: ome.size_z,
            page_channels,
            size_t: ome.size_t,
            order,
        })
    }

    /// Without OME geometry every page is a Z plane.
    fn stack(pages: usize) -> Self {
        Self {
            size_z: pages,
            page_channels: 1,
            size_t: 1,
            order: vec!['Z', 'C', 'T'],
        }
    }

    /// `(z, c, t)` of page `index`.
    fn locate(&self, index: usize) -> (usize, usize, usize) {
        let mut rest = index;
        let (mut z, mut c, mut t) = (0, 0, 0);
        for axis in &self.order {
            let size = match axis {
                'Z' => self.size_z,
                'C' => self.page_channels,
                _ => self.size_t,
            };
            let value = rest % size;
            rest /= size;
            match axis {
                'Z' => z = value,
                'C' => c = value,
                _ => t = value,
            }
        }
        (z, c, t)
    }
}

fn decode_error(
    path: &Path,
    operation: &str,
    source: impl Into<Box<dyn std::error::Error + Send + Sync>>,
) -> CellposeError {
    CellposeError::ImageDecode {
        path: path.to_path_buf(),
        operation: operation.to_string(),
        source: source.into(),
    }
}

fn samples_to_f32(result: DecodingResult) -> Vec<f32> {
    match result {
        DecodingResult::U8(v) => to_f32(v),
        DecodingResult::U16(v) => to_f32(v),
        DecodingResult::U32(v) => to_f32(v),
        DecodingResult::U64(v) => to_f32(v),
        DecodingResult::I8(v) => to_f32(v),
        DecodingResult::I16(v) => to_f32(v),
        DecodingResult::I32(v) => to_f32(v),
        DecodingResult::I64(v) => to_f32(v),
        DecodingResult::F32(v) => v,
        DecodingResult::F64(v) => to_f32(v),
    }
}

/// Decode every page of an OME-TIFF into a `(Y, X, Z, C, T)` array.
pub fn read(path: &Path) -> Result<BioImage> {
    let file = File::open(path).map_err(|e| CellposeError::FileSystem {
        path: PathBuf::from(path),
        operation: "open image".to_string(),
        source: e,
    })?;
    let mut decoder = Decoder::new(BufReader::new(file))
        .map_err(|e| decode_error(path, "read tiff header", e))?
        .with_limits(Limits::unlimited());

    let metadata = decoder
        .get_tag_ascii_string(Tag::ImageDescription)
        .unwrap_or_default();
    let (width, height) = decoder
        .dimensions()
        .map_err(|e| decode_error(path, "read dimensions", e))?;
    let (width, height) = (width as usize, height as usize);

    let mut pages = Vec::new();
    let mut samples = 0;
    loop {
        let dims = decoder
            .dimensions()
            .map_err(|e| decode_error(path, "read dimensions", e))?;
        if (dims.0 as usize, dims.1 as usize) != (width, height) {
            return Err(decode_error(
                path,
                "page size check",
                format!(
                    "page {} is {}x{}, expected {width}x{height}",
                    pages.len(),
                    dims.0,
                    dims.1
                ),
            ));
        }

        let page = samples_to_f32(
            decoder
                .read_image()
                .map_err(|e| decode_error(path, "decode page", e))?,
        );
        let page_samples = page.len() / (width * height).max(1);
        if page_samples == 0 || page_samples * width * height != page.len() {
            return Err(decode_error(
                path,
                "sample count check",
                "unexpected number of samples",
            ));
        }
        if samples != 0 && samples != page_samples {
            return Err(decode_error(
                path,
                "sample count check",
                "pages differ in samples per pixel",
            ));
        }
        samples = page_samples;
        pages.push(page);

        if !decoder.more_images() {
            break;
        }
        decoder
            .next_image()
            .map_err(|e| decode_error(path, "advance to next page", e))?;
    }

    let layout = OmePixels::parse(&metadata)
        .filter(|ome| (ome.size_x, ome.size_y) == (width, height))
        .and_then(|ome| PlaneLayout::from_ome(&ome, pages.len(), samples))
        .unwrap_or_else(|| PlaneLayout::stack(pages.len()));
    debug!(path = %path.display(), pages = pages.len(), samples, ?layout, "decoded tiff pages");

    let channels = layout.page_channels * samples;
    let shape = [height, width, layout.size_z, channels, layout.size_t];
    let mut data = ArrayD::<f32>::zeros(IxDyn(&shape));
    for (index, page) in pages.into_iter().enumerate() {
        let (z, c, t) = layout.locate(index);
        let page = Array3::from_shape_vec((height, width, samples), page)?;
        data.slice_mut(s![.., .., z, c * samples..(c + 1) * samples, t])
            .assign(&page);
    }

    Ok(BioImage { data, metadata })
}

#[cfg(test)]
mod tests {
    use super::*;

    const OME_XML: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<OME xmlns="http://www.openmicroscopy.org/Schemas/OME/2016-06">
  <Image ID="Image:0">
    <Pixels ID="Pixels:0" DimensionOrder="XYCZT" Type="uint16"
            SizeX="8" SizeY="4" SizeZ="3" SizeC="2" SizeT="1">
      <Channel ID="Channel:0:0"/>
    </Pixels>
  </Image>
</OME>"#;

    #[test]
    fn test_parse_ome_pixels() {
        let ome = OmePixels::parse(OME_XML).unwrap();
        assert_eq!(
            ome,
            OmePixels {
                size_x: 8,
                size_y: 4,
                size_z: 3,
                size_c: 2,
                size_t: 1,
                dimension_order: "XYCZT".to_string(),
            }
        );
        assert_eq!(OmePixels::parse("ImageJ=1.53"), None);
    }

    #[test]
    fn test_layout_locate() {
        let ome = OmePixels::parse(OME_XML).unwrap();
        let layout = PlaneLayout::from_ome(&ome, 6, 1).unwrap();
        // XYCZT: channel varies fastest
        assert_eq!(layout.locate(0), (0, 0, 0));
        assert_eq!(layout.locate(1), (0, 1, 0));
        assert_eq!(layout.locate(2), (1, 0, 0));
        assert_eq!(layout.locate(5), (2, 1, 0));

        assert_eq!(PlaneLayout::from_ome(&ome, 5, 1), None);
        assert_eq!(PlaneLayout::stack(4).locate(3), (3, 0, 0));
    }

    #[test]
    fn test_squeeze() {
        let array = ArrayD::<f32>::zeros(IxDyn(&[16, 8, 1, 1, 1]));
        assert_eq!(squeeze(array).shape(), &[16, 8]);

        let array = ArrayD::<f32>::zeros(IxDyn(&[16, 8, 4, 1, 1]));
        assert_eq!(squeeze(array).shape(), &[16, 8, 4]);

        let array = ArrayD::<f32>::zeros(IxDyn(&[1, 1, 1, 1, 1]));
        assert_eq!(squeeze(array).ndim(), 0);
    }
}
