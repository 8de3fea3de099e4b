use quill_core::claims::{self, Claims};
use quill_core::MappingDefinition;

use crate::error::IssuanceError;

/// Project evaluated claims into credential claims. Missing optional inputs
/// are skipped; a missing required input is an error.
pub fn map_claims(mappings: &[MappingDefinition], source: &Claims) -> Result<Claims, IssuanceError> {
    let mut mapped = Claims::new();
    for mapping in mappings {
        match claims::navigate(source, &mapping.input) {
            Some(value) => claims::insert_path(&mut mapped, &mapping.output, value.clone())?,
            None if mapping.required => return Err(IssuanceError::MissingClaim(mapping.input.clone())),
            None => tracing::trace!(input = %mapping.input, "optional claim absent"),
        }
    }
    Ok(mapped)
}
