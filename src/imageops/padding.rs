use ndarray::{s, Array3, ArrayView3};

/// Spatial size the network's down/up-sampling path needs.
pub const NETWORK_ALIGNMENT: usize = 16;

/// Offsets of a centred padding, kept so the network output can be cropped back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PadInfo {
    pub top: usize,
    pub left: usize,
    pub height: usize,
    pub width: usize,
}

pub fn to_position(size: usize, padded: usize) -> Option<usize> {
    if size > padded {
        return None;
    }
    Some((padded - size) / 2)
}

pub fn align_up(size: usize, multiple: usize) -> usize {
    size.div_ceil(multiple) * multiple
}

/// Zero-pad the spatial axes of a `(C, Y, X)` tensor to the network alignment,
/// centring the image.
pub fn pad_to_alignment(tensor: ArrayView3<f32>) -> (Array3<f32>, PadInfo) {
    let (channels, height, width) = tensor.dim();
    let pad_height = align_up(height.max(1), NETWORK_ALIGNMENT);
    let pad_width = align_up(width.max(1), NETWORK_ALIGNMENT);

    let top = to_position(height, pad_height).unwrap_or(0);
    let left = to_position(width, pad_width).unwrap_or(0);

    let mut canvas = Array3::<f32>::zeros((channels, pad_height, pad_width));
    canvas
        .slice_mut(s![.., top..top + height, left..left + width])
        .assign(&tensor);

    (
        canvas,
        PadInfo {
            top,
            left,
            height,
            width,
        },
    )
}

/// Inverse of [`pad_to_alignment`].
pub fn crop(tensor: ArrayView3<f32>, pad: PadInfo) -> Array3<f32> {
    tensor
        .slice(s![
            ..,
            pad.top..pad.top + pad.height,
            pad.left..pad.left + pad.width
        ])
        .to_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array;

    #[test]
    fn test_align_up() {
        assert_eq!(align_up(16, 16), 16);
        assert_eq!(align_up(17, 16), 32);
        assert_eq!(align_up(1, 16), 16);
    }

    #[test]
    fn test_to_position() {
        assert_eq!(to_position(10, 16), Some(3));
        assert_eq!(to_position(16, 16), Some(0));
        assert_eq!(to_position(20, 16), None);
    }

    #[test]
    fn test_pad_and_crop() {
        let tensor = Array::from_shape_fn((2, 10, 20), |(c, y, x)| (c * 1000 + y * 20 + x) as f32);
        let (padded, pad) = pad_to_alignment(tensor.view());

        assert_eq!(padded.dim(), (2, 16, 32));
        assert_eq!(pad.top, 3);
        assert_eq!(pad.left, 6);
        assert_eq!(padded[[0, 0, 0]], 0.0);

        let cropped = crop(padded.view(), pad);
        assert_eq!(cropped, tensor);
    }
}
