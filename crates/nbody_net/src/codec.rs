//! MessagePack codec helpers.
//!
//! Every job, completion notice and store value travels as MessagePack
//! produced by `rmp-serde`. Numeric body columns (`Vec<DVec3>`, `Vec<f64>`)
//! encode as plain arrays of floats.

use serde::{Deserialize, Serialize};

use crate::error::NetError;

/// Encode a value to MessagePack bytes.
///
/// # Errors
///
/// Returns [`NetError::Encode`] if serialisation fails.
pub fn encode<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>, NetError> {
    rmp_serde::to_vec(value).map_err(NetError::Encode)
}

/// Decode a value from MessagePack bytes.
///
/// # Errors
///
/// Returns [`NetError::Decode`] if deserialisation fails.
pub fn decode<'a, T: Deserialize<'a>>(bytes: &'a [u8]) -> Result<T, NetError> {
    rmp_serde::from_slice(bytes).map_err(NetError::Decode)
}

#[cfg(test)]
mod tests {
    use nbody_core::DVec3;

    use super::*;

    #[test]
    fn test_vector_column_roundtrip() {
        let column = vec![DVec3::new(1.5e11, -2.0, 0.25), DVec3::ZERO, DVec3::NEG_Z];
        let bytes = encode(&column).unwrap();
        let restored: Vec<DVec3> = decode(&bytes).unwrap();
        assert_eq!(restored, column);
    }

    #[test]
    fn test_mass_column_keeps_full_precision() {
        let masses = vec![1.0e30, 5.972_167_9e24, f64::MIN_POSITIVE];
        let restored: Vec<f64> = decode(&encode(masses.as_slice()).unwrap()).unwrap();
        assert_eq!(restored, masses);
    }

    #[test]
    fn test_decode_wrong_shape() {
        let bytes = encode(&vec![1.0_f64, 2.0]).unwrap();
        let result: Result<Vec<DVec3>, _> = decode(&bytes);
        assert!(matches!(result, Err(NetError::Decode(_))));
    }
}
