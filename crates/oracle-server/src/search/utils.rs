// crates/oracle-server/src/search/utils.rs
// Vector encoding helpers shared by storage and retrieval

/// Serialize an embedding as little-endian f32 bytes for BLOB storage
pub fn embedding_to_bytes(embedding: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(embedding.len() * 4);
    for value in embedding {
        bytes.extend_from_slice(&value.to_le_bytes());
    }
    bytes
}

/// Decode a stored embedding BLOB
pub fn bytes_to_embedding(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Map a cosine distance (0..2) onto a 0..1 similarity score
pub fn distance_to_score(distance: f64) -> f32 {
    (1.0 - distance / 2.0).clamp(0.0, 1.0) as f32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_embedding_roundtrip() {
        let original = vec![0.5f32, -1.25, 3.0];
        let bytes = embedding_to_bytes(&original);
        assert_eq!(bytes.len(), 12);
        assert_eq!(bytes_to_embedding(&bytes), original);
    }

    #[test]
    fn test_distance_to_score_range() {
        assert_eq!(distance_to_score(0.0), 1.0);
        assert_eq!(distance_to_score(2.0), 0.0);
        assert!((distance_to_score(1.0) - 0.5).abs() < f32::EPSILON);
        // Out-of-range distances stay clamped
        assert_eq!(distance_to_score(-0.5), 1.0);
        assert_eq!(distance_to_score(3.0), 0.0);
    }
}
