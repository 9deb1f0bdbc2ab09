//! Domain checks applied to raw records before they are mapped.
//!
//! Shape and field types are already enforced when the upstream JSON is decoded into
//! [`RawPhoto`], so nothing else is rejected here yet.

use crate::errors::ValidationError;
use crate::types::RawPhoto;

pub fn validate_photo(raw: RawPhoto) -> Result<RawPhoto, ValidationError> {
    Ok(raw)
}
