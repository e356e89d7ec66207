use image::DynamicImage;
use image_hasher::{HashAlg, HasherConfig, ImageHash};

/// Coarse perceptual signature of a frame: the image shrunk to a 16x16
/// luminance grid, one bit per cell above or below the mean.
pub fn compute_signature(image: &DynamicImage) -> String {
    let hasher = HasherConfig::new()
        .hash_alg(HashAlg::Mean)
        .hash_size(16, 16)
        .to_hasher();

    hasher.hash_image(image).to_base64()
}

pub fn signature_distance(lhs: &str, rhs: &str) -> u32 {
    let Ok(h1) = ImageHash::<Vec<u8>>::from_base64(lhs) else {
        return u32::MAX;
    };
    let Ok(h2) = ImageHash::<Vec<u8>>::from_base64(rhs) else {
        return u32::MAX;
    };
    h1.dist(&h2)
}

fn signature_bits(signature: &str) -> Option<u32> {
    ImageHash::<Vec<u8>>::from_base64(signature)
        .ok()
        .map(|hash| hash.as_bytes().len() as u32 * 8)
}

/// Whether two signatures show the same picture: at least `similarity` of
/// their bits agree.
pub fn signatures_match(lhs: &str, rhs: &str, similarity: f64) -> bool {
    if lhs == rhs {
        return true;
    }
    let Some(bits) = signature_bits(lhs) else {
        return false;
    };
    let distance = signature_distance(lhs, rhs);
    if distance == u32::MAX {
        return false;
    }

    let allowed = ((1.0 - similarity.clamp(0.0, 1.0)) * f64::from(bits)).floor() as u32;
    distance <= allowed
}
